//! Azure backend traits and their `reqwest`-based implementation.
//!
//! C5/C6 depend only on the traits in this module, never on `client`
//! directly, so tests can substitute in-memory fakes.

pub mod auth;
pub mod client;
pub mod ratelimit;
pub mod types;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

pub use types::{MetricsQuery, MetricsResponse, ResourceGraphPage};

/// A resource discovered via the Resources API or Resource Graph.
#[derive(Debug, Clone, PartialEq)]
pub struct AzureResource {
    pub id: String,
    pub location: String,
    pub tags: HashMap<String, String>,
}

#[derive(Debug)]
pub enum ApiError {
    Transport(String),
    Status { code: u16, body: String },
    Decode(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Transport(e) => write!(f, "transport error: {e}"),
            ApiError::Status { code, body } => write!(f, "http {code}: {body}"),
            ApiError::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for ApiError {}

#[async_trait]
pub trait MetricsApi: Send + Sync {
    /// `GET {base}/{resourceId}/providers/Microsoft.Insights/metrics?...`
    async fn list_metrics(
        &self,
        resource_id: &str,
        query: &MetricsQuery,
    ) -> Result<MetricsResponse, ApiError>;

    /// `GET {base}/subscriptions/{sub}/providers/microsoft.insights/metrics?region=...`
    async fn list_metrics_at_subscription_scope(
        &self,
        subscription: &str,
        region: &str,
        query: &MetricsQuery,
    ) -> Result<MetricsResponse, ApiError>;
}

#[async_trait]
pub trait ResourcesApi: Send + Sync {
    /// Paginates through `GET {base}/subscriptions/{sub}/resources?$filter=...`
    /// following `nextLink` until exhaustion.
    async fn list_resources(
        &self,
        subscription: &str,
        filter: &str,
    ) -> Result<Vec<AzureResource>, ApiError>;
}

#[async_trait]
pub trait ResourceGraphApi: Send + Sync {
    /// `POST {base}/providers/Microsoft.ResourceGraph/resources?api-version=...`
    async fn query(
        &self,
        subscriptions: &[String],
        kusto: &str,
        skip: u32,
        top: u32,
    ) -> Result<ResourceGraphPage, ApiError>;
}
