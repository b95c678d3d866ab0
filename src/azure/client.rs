//! `reqwest`-based implementation of the three Azure backend traits,
//! talking to the resource manager endpoint of whichever cloud
//! `azure-environment` selects.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::auth::TokenCredential;
use super::types::{MetricsQuery, MetricsResponse, ResourceGraphPage, ResourcesApiPage};
use super::{ApiError, AzureResource, MetricsApi, ResourceGraphApi, ResourcesApi};
use crate::self_metrics::SelfMetrics;

const METRICS_API_VERSION: &str = "2019-07-01";
const RESOURCES_API_VERSION: &str = "2021-04-01";
const RESOURCE_GRAPH_API_VERSION: &str = "2021-03-01";

pub struct AzureRestClient {
    http: reqwest::Client,
    base: String,
    resource_url: String,
    credential: Arc<dyn TokenCredential>,
    self_metrics: Arc<SelfMetrics>,
}

impl AzureRestClient {
    pub fn new(
        http: reqwest::Client,
        base: impl Into<String>,
        resource_url: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
        self_metrics: Arc<SelfMetrics>,
    ) -> Self {
        Self {
            http,
            base: base.into(),
            resource_url: resource_url.into(),
            credential,
            self_metrics,
        }
    }

    async fn bearer(&self) -> Result<String, ApiError> {
        self.credential
            .token(&self.resource_url)
            .await
            .map(|t| t.token)
            .map_err(|e| ApiError::Transport(e.to_string()))
    }

    fn query_pairs_for_metrics(query: &MetricsQuery) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("api-version".to_string(), METRICS_API_VERSION.to_string()),
            ("timespan".to_string(), query.timespan.clone()),
            ("metricnames".to_string(), query.metric_names.join(",")),
            ("autoAdjustTimegrain".to_string(), query.auto_adjust_timegrain.to_string()),
            ("validatedimensions".to_string(), query.validate_dimensions.to_string()),
        ];
        if let Some(interval) = &query.interval {
            pairs.push(("interval".to_string(), interval.clone()));
        }
        if !query.aggregations.is_empty() {
            pairs.push(("aggregation".to_string(), query.aggregations.join(",")));
        }
        if let Some(top) = query.top {
            pairs.push(("top".to_string(), top.to_string()));
        }
        if let Some(ns) = &query.metric_namespace {
            pairs.push(("metricnamespace".to_string(), ns.clone()));
        }
        if let Some(order_by) = &query.order_by {
            pairs.push(("orderby".to_string(), order_by.clone()));
        }
        if let Some(filter) = &query.filter {
            pairs.push(("$filter".to_string(), filter.clone()));
        }
        pairs
    }

    /// Builds the URL then URL-decodes `%2C` back to a literal comma, which
    /// the upstream metrics API requires in its comma-joined list
    /// parameters even though `url` percent-encodes commas by default.
    fn build_url(base: &str, pairs: &[(String, String)]) -> String {
        let mut url = url::Url::parse(base).expect("base url must be valid");
        {
            let mut qp = url.query_pairs_mut();
            for (k, v) in pairs {
                qp.append_pair(k, v);
            }
        }
        url.as_str().replace("%2C", ",")
    }

    async fn send_and_record(&self, request: reqwest::RequestBuilder, subscription_id: &str) -> Result<reqwest::Response, ApiError> {
        let response = request
            .header("cache-control", "no-cache")
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        super::ratelimit::record_ratelimit_headers(response.headers(), subscription_id, &self.self_metrics);

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { code, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl MetricsApi for AzureRestClient {
    async fn list_metrics(&self, resource_id: &str, query: &MetricsQuery) -> Result<MetricsResponse, ApiError> {
        let base = format!("{}{}/providers/Microsoft.Insights/metrics", self.base, resource_id);
        let url = Self::query_pairs_for_metrics(query);
        let full = Self::build_url(&base, &url);
        let token = self.bearer().await?;
        let subscription_id = resource_id
            .split('/')
            .skip_while(|s| !s.eq_ignore_ascii_case("subscriptions"))
            .nth(1)
            .unwrap_or_default();

        let request = self.http.get(full).bearer_auth(token);
        let response = self.send_and_record(request, subscription_id).await?;
        response
            .json::<MetricsResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn list_metrics_at_subscription_scope(
        &self,
        subscription: &str,
        region: &str,
        query: &MetricsQuery,
    ) -> Result<MetricsResponse, ApiError> {
        let base = format!(
            "{}/subscriptions/{}/providers/microsoft.insights/metrics",
            self.base, subscription
        );
        let mut pairs = Self::query_pairs_for_metrics(query);
        pairs.push(("region".to_string(), region.to_string()));
        let full = Self::build_url(&base, &pairs);
        let token = self.bearer().await?;

        let request = self.http.get(full).bearer_auth(token);
        let response = self.send_and_record(request, subscription).await?;
        response
            .json::<MetricsResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ResourcesApi for AzureRestClient {
    async fn list_resources(&self, subscription: &str, filter: &str) -> Result<Vec<AzureResource>, ApiError> {
        let mut url = format!(
            "{}/subscriptions/{}/resources?api-version={}&$filter={}",
            self.base,
            subscription,
            RESOURCES_API_VERSION,
            urlencoding_light(filter)
        );
        let mut out = Vec::new();

        loop {
            let token = self.bearer().await?;
            let request = self.http.get(&url).bearer_auth(token);
            let response = self.send_and_record(request, subscription).await?;
            let page: ResourcesApiPage = response.json().await.map_err(|e| ApiError::Decode(e.to_string()))?;
            out.extend(page.value.into_iter().map(AzureResource::from));

            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl ResourceGraphApi for AzureRestClient {
    async fn query(
        &self,
        subscriptions: &[String],
        kusto: &str,
        skip: u32,
        top: u32,
    ) -> Result<ResourceGraphPage, ApiError> {
        let url = format!(
            "{}/providers/Microsoft.ResourceGraph/resources?api-version={}",
            self.base, RESOURCE_GRAPH_API_VERSION
        );
        let token = self.bearer().await?;
        let body = json!({
            "subscriptions": subscriptions,
            "query": kusto,
            "options": { "$skip": skip, "$top": top, "resultFormat": "objectArray" },
        });

        let request = self.http.post(&url).bearer_auth(token).json(&body);
        let subscription_id = subscriptions.first().cloned().unwrap_or_default();
        let response = self.send_and_record(request, &subscription_id).await?;
        response
            .json::<ResourceGraphPage>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn urlencoding_light(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_restores_literal_commas() {
        let base = "https://management.azure.com/foo";
        let pairs = vec![("metricnames".to_string(), "a,b,c".to_string())];
        let url = AzureRestClient::build_url(base, &pairs);
        assert!(url.contains("metricnames=a,b,c"));
        assert!(!url.contains("%2C"));
    }
}
