//! Process-lifetime self-observability metrics, separate from the
//! per-request registry C7 builds for each probe response.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
pub enum RatelimitScope {
    Subscription,
    Tenant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
pub enum RatelimitType {
    Read,
    ResourceRequests,
    ResourceEntitiesRead,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct RatelimitLabels {
    pub subscription_id: String,
    pub scope: RatelimitScope,
    pub r#type: RatelimitType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct CollectLabels {
    pub subscription_id: String,
    pub handler: String,
    pub filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
pub enum RequestResult {
    Success,
    Error,
    Cached,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct RequestLabels {
    pub subscription_id: String,
    pub handler: String,
    pub filter: String,
    pub result: RequestResult,
}

/// Owns the registry exposed at `/metrics`, distinct from the fresh
/// registry each probe response builds.
pub struct SelfMetrics {
    pub registry: Registry,
    pub ratelimit: Family<RatelimitLabels, Gauge>,
    pub collect_time: Family<CollectLabels, Histogram>,
    pub requests: Family<RequestLabels, Counter>,
}

impl SelfMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let ratelimit = Family::<RatelimitLabels, Gauge>::default();
        registry.register(
            "azurerm_ratelimit",
            "Last seen value of an Azure API rate-limit header",
            ratelimit.clone(),
        );

        // prometheus_client has no native Summary type; a histogram with
        // second-scale buckets is the idiomatic substitute for end-to-end
        // probe latency.
        let collect_time = Family::<CollectLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0].into_iter())
        });
        registry.register(
            "azurerm_stats_metric_collecttime",
            "Time in seconds to collect metrics for a probe",
            collect_time.clone(),
        );

        let requests = Family::<RequestLabels, Counter>::default();
        registry.register(
            "azurerm_stats_metric_requests",
            "Count of metric requests per result",
            requests.clone(),
        );

        Self {
            registry,
            ratelimit,
            collect_time,
            requests,
        }
    }

    pub fn record_request(&self, subscription_id: &str, handler: &str, filter: &str, result: RequestResult) {
        self.requests
            .get_or_create(&RequestLabels {
                subscription_id: subscription_id.to_string(),
                handler: handler.to_string(),
                filter: filter.to_string(),
                result,
            })
            .inc();
    }

    pub fn record_collect_time(&self, subscription_id: &str, handler: &str, filter: &str, seconds: f64) {
        self.collect_time
            .get_or_create(&CollectLabels {
                subscription_id: subscription_id.to_string(),
                handler: handler.to_string(),
                filter: filter.to_string(),
            })
            .observe(seconds);
    }

    pub fn record_ratelimit(&self, subscription_id: &str, scope: RatelimitScope, kind: RatelimitType, value: i64) {
        self.ratelimit
            .get_or_create(&RatelimitLabels {
                subscription_id: subscription_id.to_string(),
                scope,
                r#type: kind,
            })
            .set(value);
    }
}

impl Default for SelfMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_request_counters() {
        let metrics = SelfMetrics::new();
        metrics.record_request("SUB1", "resource", "", RequestResult::Success);
        metrics.record_request("SUB1", "resource", "", RequestResult::Success);
        let value = metrics
            .requests
            .get_or_create(&RequestLabels {
                subscription_id: "SUB1".to_string(),
                handler: "resource".to_string(),
                filter: String::new(),
                result: RequestResult::Success,
            })
            .get();
        assert_eq!(value, 2);
    }

    #[test]
    fn records_ratelimit_gauge() {
        let metrics = SelfMetrics::new();
        metrics.record_ratelimit("SUB1", RatelimitScope::Subscription, RatelimitType::Read, 42);
        let value = metrics
            .ratelimit
            .get_or_create(&RatelimitLabels {
                subscription_id: "SUB1".to_string(),
                scope: RatelimitScope::Subscription,
                r#type: RatelimitType::Read,
            })
            .get();
        assert_eq!(value, 42);
    }
}
