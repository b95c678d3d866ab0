//! Azure AD OAuth2 client-credentials authentication.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::ExporterError;

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Timestamp,
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self, resource: &str) -> Result<AccessToken, ExporterError>;
}

/// Client-credentials grant against `{authority}/{tenant}/oauth2/v2.0/token`,
/// mirroring the original's default `auth.NewAuthorizerFromEnvironment()`
/// flow. Reads `AZURE_TENANT_ID`/`AZURE_CLIENT_ID`/`AZURE_CLIENT_SECRET` from
/// the environment; missing variables are a `FatalInit` error at
/// construction time.
pub struct EnvironmentCredential {
    http: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<AccessToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl EnvironmentCredential {
    pub fn from_env(http: reqwest::Client, authority: &str) -> Result<Arc<Self>, ExporterError> {
        let tenant_id = required_env("AZURE_TENANT_ID")?;
        let client_id = required_env("AZURE_CLIENT_ID")?;
        let client_secret = required_env("AZURE_CLIENT_SECRET")?;
        Ok(Arc::new(Self {
            http,
            authority: authority.to_string(),
            tenant_id,
            client_id,
            client_secret,
            cached: Mutex::new(None),
        }))
    }

    async fn fetch_token(&self, resource: &str) -> Result<AccessToken, ExporterError> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id);
        let scope = format!("{}/.default", resource.trim_end_matches('/'));
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ExporterError::FatalInit {
                reason: format!("token request failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExporterError::FatalInit {
                reason: format!("token endpoint returned {status}: {body}"),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| ExporterError::FatalInit {
            reason: format!("failed to decode token response: {e}"),
        })?;

        let expires_at = Timestamp::now()
            .checked_add(jiff::Span::new().seconds(body.expires_in))
            .unwrap_or_else(|_| Timestamp::now());

        Ok(AccessToken {
            token: body.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    async fn token(&self, resource: &str) -> Result<AccessToken, ExporterError> {
        let mut cached = self.cached.lock().await;
        let refresh_needed = match &*cached {
            Some(token) => {
                let margin = jiff::Span::new().seconds(60);
                let refresh_at = token.expires_at.checked_sub(margin).unwrap_or(token.expires_at);
                Timestamp::now() >= refresh_at
            }
            None => true,
        };

        if refresh_needed {
            let fresh = self.fetch_token(resource).await?;
            *cached = Some(fresh.clone());
            Ok(fresh)
        } else {
            Ok(cached.clone().expect("checked above"))
        }
    }
}

fn required_env(name: &str) -> Result<String, ExporterError> {
    std::env::var(name).map_err(|_| ExporterError::FatalInit {
        reason: format!("missing required environment variable {name}"),
    })
}
