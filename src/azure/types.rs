//! Wire shapes returned by the Azure Monitor metrics API, the Resources
//! API and Resource Graph, plus the tag-shape normalization Resource Graph
//! needs.

use std::collections::HashMap;

use serde::Deserialize;

use super::AzureResource;

#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub timespan: String,
    pub interval: Option<String>,
    pub metric_names: Vec<String>,
    pub aggregations: Vec<String>,
    pub top: Option<i32>,
    pub auto_adjust_timegrain: bool,
    pub validate_dimensions: bool,
    pub metric_namespace: Option<String>,
    pub order_by: Option<String>,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsResponse {
    #[serde(default)]
    pub value: Vec<Metric>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metric {
    pub name: LocalizableString,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalizableString {
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeSeries {
    #[serde(default)]
    pub metadatavalues: Vec<MetadataValue>,
    #[serde(default)]
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataValue {
    pub name: LocalizableString,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataPoint {
    #[serde(default, rename = "timeStamp")]
    pub timestamp: String,
    pub total: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub average: Option<f64>,
    pub count: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesApiPage {
    #[serde(default)]
    pub value: Vec<ResourcesApiItem>,
    #[serde(default, rename = "nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesApiItem {
    pub id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl From<ResourcesApiItem> for AzureResource {
    fn from(item: ResourcesApiItem) -> Self {
        AzureResource {
            id: item.id,
            location: item.location,
            tags: item.tags,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceGraphPage {
    #[serde(rename = "totalRecords", default)]
    pub total_records: u64,
    #[serde(default)]
    pub data: Vec<ResourceGraphRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceGraphRow {
    pub id: String,
    #[serde(default)]
    pub tags: serde_json::Value,
}

/// Resource Graph's `tags` projection arrives as several shapes: a map of
/// strings, a map of optional strings, or (rarely) something else entirely.
/// Normalize all of them into a plain string map at this one site so the
/// polymorphism never leaks further into the discovery pipeline.
pub fn normalize_tag_map(value: &serde_json::Value) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let serde_json::Value::Object(map) = value {
        for (k, v) in map {
            match v {
                serde_json::Value::String(s) => {
                    out.insert(k.clone(), s.clone());
                }
                serde_json::Value::Null => {}
                other => {
                    out.insert(k.clone(), other.to_string());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_string_map() {
        let value = serde_json::json!({"owner": "team-a", "extra": null});
        let tags = normalize_tag_map(&value);
        assert_eq!(tags.get("owner"), Some(&"team-a".to_string()));
        assert!(!tags.contains_key("extra"));
    }

    #[test]
    fn non_object_yields_empty_map() {
        let value = serde_json::json!("not-an-object");
        assert!(normalize_tag_map(&value).is_empty());
    }
}
