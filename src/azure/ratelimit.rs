//! Rate-limit header inspection. Every response from the resources,
//! metrics and resource-graph APIs is inspected for six headers, recorded
//! to the shared `azurerm_ratelimit` gauge.

use reqwest::header::HeaderMap;

use crate::self_metrics::{RatelimitScope, RatelimitType, SelfMetrics};

const HEADERS: &[(&str, RatelimitScope, RatelimitType)] = &[
    (
        "x-ms-ratelimit-remaining-subscription-reads",
        RatelimitScope::Subscription,
        RatelimitType::Read,
    ),
    (
        "x-ms-ratelimit-remaining-subscription-resource-requests",
        RatelimitScope::Subscription,
        RatelimitType::ResourceRequests,
    ),
    (
        "x-ms-ratelimit-remaining-subscription-resource-entities-read",
        RatelimitScope::Subscription,
        RatelimitType::ResourceEntitiesRead,
    ),
    (
        "x-ms-ratelimit-remaining-tenant-reads",
        RatelimitScope::Tenant,
        RatelimitType::Read,
    ),
    (
        "x-ms-ratelimit-remaining-tenant-resource-requests",
        RatelimitScope::Tenant,
        RatelimitType::ResourceRequests,
    ),
    (
        "x-ms-ratelimit-remaining-tenant-resource-entities-read",
        RatelimitScope::Tenant,
        RatelimitType::ResourceEntitiesRead,
    ),
];

pub fn record_ratelimit_headers(headers: &HeaderMap, subscription_id: &str, self_metrics: &SelfMetrics) {
    for (name, scope, kind) in HEADERS {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            if let Ok(parsed) = value.parse::<i64>() {
                self_metrics.record_ratelimit(subscription_id, *scope, *kind, parsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    #[test]
    fn records_present_headers_and_ignores_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-ms-ratelimit-remaining-subscription-reads"),
            HeaderValue::from_static("123"),
        );
        let metrics = SelfMetrics::new();
        record_ratelimit_headers(&headers, "SUB1", &metrics);
        let value = metrics
            .ratelimit
            .get_or_create(&crate::self_metrics::RatelimitLabels {
                subscription_id: "SUB1".to_string(),
                scope: RatelimitScope::Subscription,
                r#type: RatelimitType::Read,
            })
            .get();
        assert_eq!(value, 123);
    }
}
