//! Request settings: parses and validates a scrape request's query string
//! into a canonical, immutable [`MetricSettings`].

use std::collections::HashMap;
use std::fmt;

use jiff::{Span, Timestamp};

use crate::error::ExporterError;

/// Reduction applied by Azure Monitor to a timeseries bucket.
///
/// Emission order (`total, minimum, maximum, average, count`) is
/// significant: the fetcher walks aggregations in this order when emitting
/// samples for a single data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    Total,
    Minimum,
    Maximum,
    Average,
    Count,
}

impl Aggregation {
    pub const ALL_IN_ORDER: [Aggregation; 5] = [
        Aggregation::Total,
        Aggregation::Minimum,
        Aggregation::Maximum,
        Aggregation::Average,
        Aggregation::Count,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Total => "total",
            Aggregation::Minimum => "minimum",
            Aggregation::Maximum => "maximum",
            Aggregation::Average => "average",
            Aggregation::Count => "count",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_lowercase().as_str() {
            "total" => Ok(Aggregation::Total),
            "minimum" => Ok(Aggregation::Minimum),
            "maximum" => Ok(Aggregation::Maximum),
            "average" => Ok(Aggregation::Average),
            "count" => Ok(Aggregation::Count),
            other => Err(format!("unknown aggregation \"{other}\"")),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defaults supplied by process configuration, consulted where a request
/// does not override them.
#[derive(Debug, Clone)]
pub struct ParseDefaults {
    pub metric_template: String,
    pub help_template: String,
    pub dimension_lowercase: bool,
    pub caching_enabled: bool,
    pub service_discovery_cache: Span,
}

/// Immutable, per-request settings derived from a probe's query string.
#[derive(Debug, Clone)]
pub struct MetricSettings {
    pub name: String,
    pub subscriptions: Vec<String>,
    pub regions: Vec<String>,
    pub resource_type: String,
    pub metric_namespace: String,
    pub resource_sub_path: String,
    pub metrics: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    pub timespan: String,
    pub interval: Option<String>,
    pub metric_top: Option<i32>,
    pub metric_filter: String,
    pub metric_order_by: String,
    pub metric_segment: String,
    pub validate_dimensions: bool,
    pub filter: String,
    pub target: Vec<String>,
    pub tag_labels: Vec<String>,
    pub metric_template: String,
    pub help_template: String,
    pub lowercase_resource_id: bool,
    pub dimension_lowercase: bool,
    pub cache: Option<Span>,
    pub metric_tag_name: String,
    pub aggregation_tag_name: String,
}

impl MetricSettings {
    /// Time remaining until `now + cache - 2s`, or `None` if that instant
    /// has already passed or no cache TTL was requested. The 2-second
    /// safety margin keeps a cached entry from being served at the instant
    /// it expires.
    pub fn cache_duration(&self, now: Timestamp) -> Option<Span> {
        let cache = self.cache?;
        let margin = Span::new().seconds(2);
        let expiry = now.checked_add(cache).ok()?.checked_sub(margin).ok()?;
        let remaining_seconds = expiry.as_second() - now.as_second();
        if remaining_seconds <= 0 {
            None
        } else {
            Some(Span::new().seconds(remaining_seconds))
        }
    }

    #[cfg(test)]
    pub fn default_for_test() -> Self {
        MetricSettings {
            name: String::new(),
            subscriptions: vec!["SUB1".to_string()],
            regions: Vec::new(),
            resource_type: String::new(),
            metric_namespace: String::new(),
            resource_sub_path: String::new(),
            metrics: vec!["Availability".to_string()],
            aggregations: vec![Aggregation::Average],
            timespan: "PT1M".to_string(),
            interval: None,
            metric_top: None,
            metric_filter: String::new(),
            metric_order_by: String::new(),
            metric_segment: String::new(),
            validate_dimensions: false,
            filter: String::new(),
            target: Vec::new(),
            tag_labels: Vec::new(),
            metric_template: "{name}".to_string(),
            help_template: String::new(),
            lowercase_resource_id: true,
            dimension_lowercase: false,
            cache: None,
            metric_tag_name: String::new(),
            aggregation_tag_name: String::new(),
        }
    }
}

/// Collects every value bound to `key`, treating comma-separated values and
/// repeated query keys equivalently (`metric=a&metric=b` == `metric=a,b`).
fn multi_values(params: &HashMap<String, Vec<String>>, key: &str) -> Vec<String> {
    params
        .get(key)
        .into_iter()
        .flatten()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn single_value(params: &HashMap<String, Vec<String>>, key: &str) -> String {
    params
        .get(key)
        .and_then(|v| v.first())
        .cloned()
        .unwrap_or_default()
}

fn bool_value(params: &HashMap<String, Vec<String>>, key: &str, default: bool) -> bool {
    match single_value(params, key).to_lowercase().as_str() {
        "" => default,
        "true" | "1" | "yes" => true,
        _ => false,
    }
}

/// Parses a raw query string (as produced by `url::form_urlencoded`) into a
/// key -> values map, so repeated keys are preserved.
pub fn collect_query_params(raw_query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(raw_query.as_bytes()) {
        params.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    params
}

/// `ParseSettings(query, defaults) -> Settings | ErrBadRequest`.
///
/// `require_filter`, `require_target` and `require_tags` encode the
/// endpoint-specific preconditions (§4.8): the generic parser below handles
/// every shared field; the caller layers its own required-parameter checks
/// on top, since the "stricter" Azure-resource-API parse flavor differs only
/// in which fields are mandatory, not in their shape.
pub fn parse_settings(
    raw_query: &str,
    defaults: &ParseDefaults,
) -> Result<MetricSettings, ExporterError> {
    let params = collect_query_params(raw_query);

    let subscriptions = multi_values(&params, "subscription");
    if subscriptions.is_empty() {
        return Err(ExporterError::param_invalid("subscription", "is required"));
    }

    let metrics = multi_values(&params, "metric");
    let mut aggregations = Vec::new();
    for raw in multi_values(&params, "aggregation") {
        aggregations.push(
            Aggregation::parse(&raw)
                .map_err(|reason| ExporterError::param_invalid("aggregation", reason))?,
        );
    }

    let metric_top = match single_value(&params, "metricTop").as_str() {
        "" => None,
        value => Some(
            value
                .parse::<i32>()
                .map_err(|_| ExporterError::param_invalid("metricTop", "must be an integer"))?,
        ),
    };

    let timespan = {
        let value = single_value(&params, "timespan");
        if value.is_empty() {
            "PT1M".to_string()
        } else {
            value
        }
    };

    let cache = if defaults.caching_enabled {
        let raw_cache = single_value(&params, "cache");
        if raw_cache.is_empty() {
            // Default cache TTL derives from the timespan when caching is
            // enabled globally and the request did not opt out.
            parse_iso8601_span(&timespan).ok()
        } else {
            Some(
                parse_iso8601_span(&raw_cache)
                    .map_err(|_| ExporterError::param_invalid("cache", "must be an ISO-8601 duration"))?,
            )
        }
    } else {
        None
    };

    let metric_template = {
        let value = single_value(&params, "template");
        if value.is_empty() {
            defaults.metric_template.clone()
        } else {
            value
        }
    };
    let help_template = {
        let value = single_value(&params, "helpTemplate");
        if value.is_empty() {
            defaults.help_template.clone()
        } else {
            value
        }
    };

    Ok(MetricSettings {
        name: single_value(&params, "name"),
        subscriptions,
        regions: multi_values(&params, "region"),
        resource_type: single_value(&params, "resourceType"),
        metric_namespace: single_value(&params, "metricNamespace"),
        resource_sub_path: single_value(&params, "resourceSubPath"),
        metrics,
        aggregations,
        timespan,
        interval: {
            let v = single_value(&params, "interval");
            if v.is_empty() { None } else { Some(v) }
        },
        metric_top,
        metric_filter: single_value(&params, "metricFilter"),
        metric_order_by: single_value(&params, "metricOrderBy"),
        metric_segment: single_value(&params, "metricSegment"),
        validate_dimensions: bool_value(&params, "validateDimensions", false),
        filter: single_value(&params, "filter"),
        target: multi_values(&params, "target"),
        tag_labels: multi_values(&params, "tagLabel"),
        metric_template,
        help_template,
        lowercase_resource_id: bool_value(&params, "lowercaseResourceId", true),
        dimension_lowercase: bool_value(&params, "dimensionLowercase", defaults.dimension_lowercase),
        cache,
        metric_tag_name: single_value(&params, "metricTagName"),
        aggregation_tag_name: single_value(&params, "aggregationTagName"),
    })
}

/// Parses an ISO-8601 duration such as `PT1H` into a [`Span`].
pub fn parse_iso8601_span(raw: &str) -> Result<Span, jiff::Error> {
    raw.parse::<Span>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ParseDefaults {
        ParseDefaults {
            metric_template: "{name}".to_string(),
            help_template: String::new(),
            dimension_lowercase: false,
            caching_enabled: false,
            service_discovery_cache: Span::new().minutes(30),
        }
    }

    #[test]
    fn comma_and_repeated_keys_are_equivalent() {
        let a = parse_settings("subscription=S&metric=a,b", &defaults()).unwrap();
        let b = parse_settings("subscription=S&metric=a&metric=b", &defaults()).unwrap();
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.metrics, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn missing_subscription_is_bad_request() {
        let err = parse_settings("metric=a", &defaults()).unwrap_err();
        assert!(matches!(err, ExporterError::ParamInvalid { .. }));
    }

    #[test]
    fn timespan_defaults_to_pt1m() {
        let settings = parse_settings("subscription=S", &defaults()).unwrap();
        assert_eq!(settings.timespan, "PT1M");
    }

    #[test]
    fn unknown_aggregation_is_rejected() {
        let err = parse_settings("subscription=S&aggregation=bogus", &defaults()).unwrap_err();
        assert!(matches!(err, ExporterError::ParamInvalid { .. }));
    }

    #[test]
    fn cache_duration_respects_margin() {
        let mut settings = MetricSettings::default_for_test();
        settings.cache = Some(Span::new().seconds(10));
        let now = Timestamp::from_second(1_000_000).unwrap();
        let remaining = settings.cache_duration(now).unwrap();
        assert!(remaining.get_seconds() <= 8);
    }

    #[test]
    fn cache_duration_none_when_elapsed() {
        let mut settings = MetricSettings::default_for_test();
        settings.cache = Some(Span::new().seconds(1));
        let now = Timestamp::from_second(1_000_000).unwrap();
        assert!(settings.cache_duration(now).is_none());
    }
}
