//! Target resolution: the four (plus subscription-scope) modes that decide
//! which Azure resources a probe will fetch metrics for.

use std::collections::HashMap;
use std::sync::Arc;

use jiff::Timestamp;

use crate::azure::types::normalize_tag_map;
use crate::azure::{ResourceGraphApi, ResourcesApi};
use crate::cache::{hash_sd_cache_key, ServiceDiscoveryCache};
use crate::error::ExporterError;
use crate::settings::MetricSettings;

/// A resolved scrape target, grouped by subscription before fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub resource_id: String,
    pub metrics: Vec<String>,
    pub aggregations: Vec<String>,
    pub tags: HashMap<String, String>,
}

const RESOURCE_GRAPH_PAGE_SIZE: u32 = 1000;

/// D1 — explicit targets: each `settings.target` entry becomes a `Target`
/// carrying the request's global metrics/aggregations.
pub fn discover_explicit(settings: &MetricSettings) -> Vec<Target> {
    settings
        .target
        .iter()
        .map(|resource_id| Target {
            resource_id: resource_id.clone(),
            metrics: settings.metrics.clone(),
            aggregations: settings.aggregations.iter().map(|a| a.as_str().to_string()).collect(),
            tags: HashMap::new(),
        })
        .collect()
}

/// D2 — list-by-filter: one `Target` per resource returned by the resources
/// API for the subscription, using the global metrics/aggregations.
pub async fn discover_list_by_filter(
    resources_api: &dyn ResourcesApi,
    sd_cache: &ServiceDiscoveryCache,
    cache_ttl: jiff::Span,
    settings: &MetricSettings,
    subscription: &str,
) -> Result<Vec<Target>, ExporterError> {
    let resources = list_resources_cached(resources_api, sd_cache, cache_ttl, subscription, &settings.filter).await?;
    Ok(resources
        .into_iter()
        .map(|r| Target {
            resource_id: r.id,
            metrics: settings.metrics.clone(),
            aggregations: settings.aggregations.iter().map(|a| a.as_str().to_string()).collect(),
            tags: r.tags,
        })
        .collect())
}

/// D3 — tag-driven scrape: same listing as D2, but each resource's own
/// `metricTagName`/`aggregationTagName` tags supply its metrics and
/// aggregations. Resources missing either tag are silently skipped.
pub async fn discover_tag_scrape(
    resources_api: &dyn ResourcesApi,
    sd_cache: &ServiceDiscoveryCache,
    cache_ttl: jiff::Span,
    settings: &MetricSettings,
    subscription: &str,
) -> Result<Vec<Target>, ExporterError> {
    let resources = list_resources_cached(resources_api, sd_cache, cache_ttl, subscription, &settings.filter).await?;
    let mut targets = Vec::new();
    for resource in resources {
        let metrics_tag = resource.tags.get(&settings.metric_tag_name);
        let aggregation_tag = resource.tags.get(&settings.aggregation_tag_name);
        let (Some(metrics_tag), Some(aggregation_tag)) = (metrics_tag, aggregation_tag) else {
            continue;
        };
        let metrics: Vec<String> = metrics_tag.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        let aggregations: Vec<String> = aggregation_tag.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        if metrics.is_empty() || aggregations.is_empty() {
            continue;
        }
        targets.push(Target {
            resource_id: resource.id,
            metrics,
            aggregations,
            tags: resource.tags,
        });
    }
    Ok(targets)
}

/// D4 — resource-graph discovery: pages a Kusto query of the form
/// `Resources | where type =~ "<type>" [| <filter>] | project id, tags`
/// across `subscriptions`, 1000 rows per page.
pub async fn discover_resource_graph(
    resource_graph_api: &dyn ResourceGraphApi,
    sd_cache: &ServiceDiscoveryCache,
    cache_ttl: jiff::Span,
    settings: &MetricSettings,
    subscriptions: &[String],
) -> Result<Vec<Target>, ExporterError> {
    let cache_key = hash_sd_cache_key(&subscriptions.join(","), &settings.filter);
    let now = Timestamp::now();
    if let Some(cached) = sd_cache.get(&cache_key, now) {
        if let Ok(targets) = serde_json::from_slice::<Vec<StoredTarget>>(&cached) {
            return Ok(targets.into_iter().map(StoredTarget::into_target).collect());
        }
        // CacheCorrupt: decode failure is treated as a miss and logged.
        tracing::debug!(key = %cache_key, "servicediscovery cache entry failed to decode, treating as miss");
    }

    let mut kusto = format!("Resources | where type =~ \"{}\"", settings.resource_type);
    if !settings.filter.is_empty() {
        kusto.push_str(&format!(" | {}", settings.filter));
    }
    kusto.push_str(" | project id, tags");

    let mut targets = Vec::new();
    let mut skip = 0u32;
    loop {
        let page = resource_graph_api
            .query(subscriptions, &kusto, skip, RESOURCE_GRAPH_PAGE_SIZE)
            .await
            .map_err(|e| ExporterError::DiscoveryFailed { source: e.to_string() })?;

        for row in &page.data {
            targets.push(Target {
                resource_id: row.id.clone(),
                metrics: settings.metrics.clone(),
                aggregations: settings.aggregations.iter().map(|a| a.as_str().to_string()).collect(),
                tags: normalize_tag_map(&row.tags),
            });
        }

        skip += page.data.len() as u32;
        if page.data.is_empty() || (skip as u64) >= page.total_records {
            break;
        }
    }

    if let Ok(serialized) = serde_json::to_vec(&targets.iter().map(StoredTarget::from_target).collect::<Vec<_>>()) {
        let expires_at = now.checked_add(cache_ttl).unwrap_or(now);
        sd_cache.set(cache_key, Arc::new(serialized), expires_at);
    }

    Ok(targets)
}

async fn list_resources_cached(
    resources_api: &dyn ResourcesApi,
    sd_cache: &ServiceDiscoveryCache,
    cache_ttl: jiff::Span,
    subscription: &str,
    filter: &str,
) -> Result<Vec<crate::azure::AzureResource>, ExporterError> {
    let cache_key = hash_sd_cache_key(subscription, filter);
    let now = Timestamp::now();
    if let Some(cached) = sd_cache.get(&cache_key, now) {
        if let Ok(resources) = serde_json::from_slice::<Vec<StoredResource>>(&cached) {
            return Ok(resources.into_iter().map(StoredResource::into_resource).collect());
        }
        tracing::debug!(key = %cache_key, "servicediscovery cache entry failed to decode, treating as miss");
    }

    let resources = resources_api
        .list_resources(subscription, filter)
        .await
        .map_err(|e| ExporterError::DiscoveryFailed { source: e.to_string() })?;

    if let Ok(serialized) = serde_json::to_vec(&resources.iter().map(StoredResource::from_resource).collect::<Vec<_>>()) {
        let expires_at = now.checked_add(cache_ttl).unwrap_or(now);
        sd_cache.set(cache_key, Arc::new(serialized), expires_at);
    }

    Ok(resources)
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredResource {
    id: String,
    location: String,
    tags: HashMap<String, String>,
}

impl StoredResource {
    fn from_resource(r: &crate::azure::AzureResource) -> Self {
        Self {
            id: r.id.clone(),
            location: r.location.clone(),
            tags: r.tags.clone(),
        }
    }

    fn into_resource(self) -> crate::azure::AzureResource {
        crate::azure::AzureResource {
            id: self.id,
            location: self.location,
            tags: self.tags,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredTarget {
    resource_id: String,
    metrics: Vec<String>,
    aggregations: Vec<String>,
    tags: HashMap<String, String>,
}

impl StoredTarget {
    fn from_target(t: &Target) -> Self {
        Self {
            resource_id: t.resource_id.clone(),
            metrics: t.metrics.clone(),
            aggregations: t.aggregations.clone(),
            tags: t.tags.clone(),
        }
    }

    fn into_target(self) -> Target {
        Target {
            resource_id: self.resource_id,
            metrics: self.metrics,
            aggregations: self.aggregations,
            tags: self.tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_targets_carry_global_metrics() {
        let mut settings = MetricSettings::default_for_test();
        settings.target = vec!["/subscriptions/S/resourceGroups/R/providers/Microsoft.KeyVault/vaults/V".to_string()];
        let targets = discover_explicit(&settings);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].metrics, settings.metrics);
    }

    #[test]
    fn explicit_targets_empty_without_target_param() {
        let settings = MetricSettings::default_for_test();
        assert!(discover_explicit(&settings).is_empty());
    }
}
