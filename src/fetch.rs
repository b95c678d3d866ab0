//! Metric fetcher (C6): issues one API call per (resource, <=20 metrics)
//! chunk and turns the response into a stream of rendered samples.

use std::collections::HashMap;

use crate::azure::types::{DataPoint, MetricsQuery, MetricsResponse};
use crate::azure::{ApiError, MetricsApi};
use crate::discovery::Target;
use crate::resource_id::parse_resource_id;
use crate::settings::{Aggregation, MetricSettings};
use crate::template::{render_help, render_name, sanitize_label_name};

pub const MAX_METRICS_PER_CALL: usize = 20;

/// One rendered sample, ready to be added to a [`crate::metric_list::MetricList`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub value: f64,
    pub help: String,
}

/// Splits `metrics` into chunks of at most [`MAX_METRICS_PER_CALL`] entries.
pub fn chunk_metrics(metrics: &[String]) -> Vec<Vec<String>> {
    metrics.chunks(MAX_METRICS_PER_CALL).map(|c| c.to_vec()).collect()
}

fn combine_filter(base: &str, segment: &str) -> Option<String> {
    match (base.is_empty(), segment.is_empty()) {
        (true, true) => None,
        (false, true) => Some(base.to_string()),
        (true, false) => Some(format!("$segment={segment}")),
        (false, false) => Some(format!("{base} and $segment={segment}")),
    }
}

/// Appends `/<type>/default` to `resource_id` when `metric_namespace` names
/// a storage-account sub-resource type, matching the upstream API's
/// expectation for blob/file/queue/table endpoints.
fn adjust_resource_uri(resource_id: &str, metric_namespace: &str) -> String {
    let prefix = "microsoft.storage/storageaccounts/";
    if metric_namespace.to_lowercase().starts_with(prefix) {
        if let Some(subtype) = metric_namespace.rsplit('/').next() {
            return format!("{resource_id}/{subtype}/default");
        }
    }
    resource_id.to_string()
}

/// `Fetch(client, target, metricsChunk, aggregations) -> MetricsResponse | Error`.
pub async fn fetch(
    metrics_api: &dyn MetricsApi,
    settings: &MetricSettings,
    target: &Target,
    metrics_chunk: &[String],
    aggregations: &[String],
) -> Result<MetricsResponse, ApiError> {
    let filter = combine_filter(&settings.metric_filter, &settings.metric_segment);
    let query = MetricsQuery {
        timespan: settings.timespan.clone(),
        interval: settings.interval.clone(),
        metric_names: metrics_chunk.to_vec(),
        aggregations: aggregations.to_vec(),
        top: settings.metric_top,
        auto_adjust_timegrain: true,
        validate_dimensions: settings.validate_dimensions,
        metric_namespace: if settings.metric_namespace.is_empty() {
            None
        } else {
            Some(settings.metric_namespace.clone())
        },
        order_by: if settings.metric_order_by.is_empty() {
            None
        } else {
            Some(settings.metric_order_by.clone())
        },
        filter,
    };

    let resource_id = adjust_resource_uri(&target.resource_id, &settings.metric_namespace);
    metrics_api.list_metrics(&resource_id, &query).await
}

/// `Fetch` variant for the subscription-scope mode (D5): the base filter is
/// `Microsoft.ResourceId eq '*'`, AND-chained with any user filter, and the
/// per-sample resource id comes from the `microsoft.resourceid` dimension
/// rather than from a pre-resolved `Target`.
pub async fn fetch_at_subscription_scope(
    metrics_api: &dyn MetricsApi,
    settings: &MetricSettings,
    subscription: &str,
    region: &str,
    metrics_chunk: &[String],
) -> Result<MetricsResponse, ApiError> {
    let base = "Microsoft.ResourceId eq '*'".to_string();
    let filter = if settings.metric_filter.is_empty() {
        base
    } else {
        format!("{base} and {}", settings.metric_filter)
    };

    let query = MetricsQuery {
        timespan: settings.timespan.clone(),
        interval: settings.interval.clone(),
        metric_names: metrics_chunk.to_vec(),
        aggregations: settings.aggregations.iter().map(|a| a.as_str().to_string()).collect(),
        top: settings.metric_top,
        auto_adjust_timegrain: true,
        validate_dimensions: settings.validate_dimensions,
        metric_namespace: if settings.metric_namespace.is_empty() {
            None
        } else {
            Some(settings.metric_namespace.clone())
        },
        order_by: if settings.metric_order_by.is_empty() {
            None
        } else {
            Some(settings.metric_order_by.clone())
        },
        filter: Some(filter),
    };

    metrics_api
        .list_metrics_at_subscription_scope(subscription, region, &query)
        .await
}

/// Projects a single API response into rendered samples, in the canonical
/// per-metric / per-timeseries / per-datapoint / per-kind order.
pub fn project_response(
    response: &MetricsResponse,
    settings: &MetricSettings,
    target: &Target,
    subscription_name: Option<&str>,
    is_subscription_scope: bool,
) -> Vec<MetricSample> {
    let mut samples = Vec::new();

    for metric in &response.value {
        for series in &metric.timeseries {
            let mut labels = base_labels(series, metric, settings, target, subscription_name, is_subscription_scope);
            apply_dimension_labels(&mut labels, series, settings);

            for point in &series.data {
                for (kind, value) in ordered_aggregations(point) {
                    let mut point_labels = labels.clone();
                    point_labels.insert("aggregation".to_string(), kind.as_str().to_string());

                    let (name, remaining_labels) = render_name(&settings.metric_template, settings, &point_labels);
                    let help = render_help(&settings.help_template, settings, &remaining_labels);

                    let mut final_labels = HashMap::new();
                    for (k, v) in &remaining_labels {
                        final_labels.insert(sanitize_label_name(k), v.clone());
                    }

                    samples.push(MetricSample {
                        name,
                        labels: final_labels,
                        value,
                        help,
                    });
                }
            }
            labels.clear();
        }
    }

    samples
}

fn ordered_aggregations(point: &DataPoint) -> Vec<(Aggregation, f64)> {
    let mut out = Vec::new();
    for kind in Aggregation::ALL_IN_ORDER {
        let value = match kind {
            Aggregation::Total => point.total,
            Aggregation::Minimum => point.minimum,
            Aggregation::Maximum => point.maximum,
            Aggregation::Average => point.average,
            Aggregation::Count => point.count,
        };
        if let Some(value) = value {
            out.push((kind, value));
        }
    }
    out
}

fn base_labels(
    series: &crate::azure::types::TimeSeries,
    metric: &crate::azure::types::Metric,
    settings: &MetricSettings,
    target: &Target,
    subscription_name: Option<&str>,
    is_subscription_scope: bool,
) -> HashMap<String, String> {
    let resource_id = if is_subscription_scope {
        series
            .metadatavalues
            .iter()
            .find(|m| m.name.value.eq_ignore_ascii_case("microsoft.resourceid"))
            .map(|m| m.value.clone())
            .unwrap_or_default()
    } else {
        target.resource_id.clone()
    };

    let parsed = parse_resource_id(&resource_id);
    let resource_id_label = if settings.lowercase_resource_id {
        resource_id.to_lowercase()
    } else {
        resource_id.clone()
    };

    let mut labels = HashMap::new();
    labels.insert("resourceID".to_string(), resource_id_label);
    labels.insert("subscriptionID".to_string(), parsed.subscription.clone());
    if is_subscription_scope {
        labels.insert("subscriptionName".to_string(), subscription_name.unwrap_or_default().to_string());
    }
    labels.insert("resourceGroup".to_string(), parsed.resource_group);
    labels.insert("resourceName".to_string(), parsed.resource_name);
    labels.insert("metric".to_string(), metric.name.value.clone());
    labels.insert("unit".to_string(), metric.unit.clone());
    labels.insert("interval".to_string(), settings.interval.clone().unwrap_or_default());
    labels.insert("timespan".to_string(), settings.timespan.clone());
    labels.insert("aggregation".to_string(), String::new());

    for tag_name in &settings.tag_labels {
        if let Some(value) = target.tags.get(tag_name) {
            labels.insert(format!("tag_{tag_name}"), value.clone());
        }
    }

    labels
}

fn apply_dimension_labels(labels: &mut HashMap<String, String>, series: &crate::azure::types::TimeSeries, settings: &MetricSettings) {
    let values: Vec<(&str, String)> = series
        .metadatavalues
        .iter()
        .filter(|m| !m.name.value.eq_ignore_ascii_case("microsoft.resourceid"))
        .map(|m| {
            let v = if settings.dimension_lowercase {
                m.value.to_lowercase()
            } else {
                m.value.clone()
            };
            (m.name.value.as_str(), v)
        })
        .collect();

    match values.len() {
        0 => {}
        1 => {
            labels.insert("dimension".to_string(), values[0].1.clone());
        }
        _ => {
            for (name, value) in &values {
                let key = format!("dimension{}", ucfirst(name));
                labels.insert(sanitize_label_name(&key), value.clone());
            }
        }
    }
}

fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::types::{LocalizableString, MetadataValue, Metric, TimeSeries};

    fn target() -> Target {
        Target {
            resource_id: "/subscriptions/SUB1/resourceGroups/RG/providers/Microsoft.KeyVault/vaults/V1".to_string(),
            metrics: vec!["Availability".to_string()],
            aggregations: vec!["average".to_string()],
            tags: HashMap::new(),
        }
    }

    fn metric_with_series(series: TimeSeries) -> MetricsResponse {
        MetricsResponse {
            value: vec![Metric {
                name: LocalizableString { value: "Availability".to_string() },
                unit: "Percent".to_string(),
                timeseries: vec![series],
            }],
        }
    }

    #[test]
    fn chunking_respects_upper_bound() {
        let metrics: Vec<String> = (0..45).map(|i| format!("m{i}")).collect();
        let chunks = chunk_metrics(&metrics);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= MAX_METRICS_PER_CALL));
    }

    #[test]
    fn storage_namespace_adjusts_resource_uri() {
        let uri = adjust_resource_uri("/subscriptions/S/.../accounts/A", "Microsoft.Storage/storageAccounts/blobServices");
        assert!(uri.ends_with("/blobServices/default"));
    }

    #[test]
    fn non_storage_namespace_leaves_uri_unchanged() {
        let uri = adjust_resource_uri("/subscriptions/S/.../vaults/V", "Microsoft.KeyVault/vaults");
        assert_eq!(uri, "/subscriptions/S/.../vaults/V");
    }

    #[test]
    fn single_dimension_produces_bare_dimension_label() {
        let series = TimeSeries {
            metadatavalues: vec![MetadataValue {
                name: LocalizableString { value: "connectionName".to_string() },
                value: "c1".to_string(),
            }],
            data: vec![DataPoint {
                average: Some(99.9),
                ..Default::default()
            }],
        };
        let response = metric_with_series(series);
        let settings = MetricSettings::default_for_test();
        let samples = project_response(&response, &settings, &target(), None, false);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].labels.get("dimension"), Some(&"c1".to_string()));
        assert!(!samples[0].labels.contains_key("dimensionConnectionname"));
    }

    #[test]
    fn multiple_dimensions_use_ucfirst_keys() {
        let series = TimeSeries {
            metadatavalues: vec![
                MetadataValue { name: LocalizableString { value: "connectionName".to_string() }, value: "c1".to_string() },
                MetadataValue { name: LocalizableString { value: "status".to_string() }, value: "ok".to_string() },
            ],
            data: vec![DataPoint {
                average: Some(1.0),
                ..Default::default()
            }],
        };
        let response = metric_with_series(series);
        let settings = MetricSettings::default_for_test();
        let samples = project_response(&response, &settings, &target(), None, false);
        assert_eq!(samples[0].labels.get("dimensionConnectionName"), Some(&"c1".to_string()));
        assert_eq!(samples[0].labels.get("dimensionStatus"), Some(&"ok".to_string()));
        assert!(!samples[0].labels.contains_key("dimension"));
    }

    #[test]
    fn emits_samples_in_canonical_aggregation_order() {
        let series = TimeSeries {
            metadatavalues: vec![],
            data: vec![DataPoint {
                total: Some(1.0),
                minimum: Some(2.0),
                maximum: Some(3.0),
                average: Some(4.0),
                count: Some(5.0),
                ..Default::default()
            }],
        };
        let response = metric_with_series(series);
        let settings = MetricSettings::default_for_test();
        let samples = project_response(&response, &settings, &target(), None, false);
        let order: Vec<&str> = samples.iter().map(|s| s.labels.get("aggregation").unwrap().as_str()).collect();
        assert_eq!(order, vec!["total", "minimum", "maximum", "average", "count"]);
    }

    #[test]
    fn absent_aggregations_emit_no_sample() {
        let series = TimeSeries {
            metadatavalues: vec![],
            data: vec![DataPoint {
                average: Some(1.0),
                ..Default::default()
            }],
        };
        let response = metric_with_series(series);
        let settings = MetricSettings::default_for_test();
        let samples = project_response(&response, &settings, &target(), None, false);
        assert_eq!(samples.len(), 1);
    }
}
