//! Metric name/help templating (`{token}` substitution) and Prometheus
//! name/label sanitization.

use std::collections::HashMap;

use crate::settings::MetricSettings;

/// Scans `template` for `{token}` occurrences and resolves each one against
/// `settings` and `labels`.
///
/// `name` resolves to `settings.name`, `type` resolves to
/// `settings.metric_namespace` (falling back to `settings.resource_type`),
/// and any other token is looked up in `labels`. Tokens consumed this way are
/// removed from the returned label map, since they have been promoted into
/// the metric name; callers rendering help text instead should pass
/// `remove_consumed = false` so the labels survive for publication.
fn render(template: &str, settings: &MetricSettings, labels: &HashMap<String, String>, remove_consumed: bool) -> (String, HashMap<String, String>) {
    let mut out = labels.clone();
    let mut rendered = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i..].find('}') {
                let token = &template[i + 1..i + end];
                let value = resolve_token(token, settings, labels);
                rendered.push_str(&value);
                if remove_consumed && !matches!(token, "name" | "type") {
                    out.remove(token);
                }
                i += end + 1;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap();
        rendered.push(ch);
        i += ch.len_utf8();
    }
    (rendered, out)
}

fn resolve_token(token: &str, settings: &MetricSettings, labels: &HashMap<String, String>) -> String {
    match token {
        "name" => settings.name.clone(),
        "type" => {
            if !settings.metric_namespace.is_empty() {
                settings.metric_namespace.clone()
            } else {
                settings.resource_type.clone()
            }
        }
        other => labels.get(other).cloned().unwrap_or_default(),
    }
}

/// `RenderName(template, settings, labels) -> (name, labels')`.
///
/// The returned name is lowercased and stripped to `[a-zA-Z0-9_:]` (with
/// separator characters first normalized to `_`).
pub fn render_name(template: &str, settings: &MetricSettings, labels: &HashMap<String, String>) -> (String, HashMap<String, String>) {
    let (rendered, remaining) = render(template, settings, labels, true);
    (sanitize_metric_name(&rendered), remaining)
}

/// `RenderHelp(template, settings, labels) -> help`. Labels are left intact.
pub fn render_help(template: &str, settings: &MetricSettings, labels: &HashMap<String, String>) -> String {
    render(template, settings, labels, false).0
}

/// Normalizes a candidate metric name: `-`, ` `, `/`, `.` become `_`, the
/// result is lowercased, then anything outside `[a-zA-Z0-9_:]` is dropped.
pub fn sanitize_metric_name(raw: &str) -> String {
    let separated: String = raw
        .chars()
        .map(|c| match c {
            '-' | ' ' | '/' | '.' => '_',
            other => other,
        })
        .collect();
    separated
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ':')
        .collect()
}

/// Label names added to the registry are stripped to `[a-zA-Z0-9_]` (no
/// `:`, which is reserved for metric names by convention).
pub fn sanitize_label_name(raw: &str) -> String {
    let separated: String = raw
        .chars()
        .map(|c| match c {
            '-' | ' ' | '/' | '.' => '_',
            other => other,
        })
        .collect();
    separated
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MetricSettings;

    fn settings_with_name(name: &str) -> MetricSettings {
        let mut s = MetricSettings::default_for_test();
        s.name = name.to_string();
        s
    }

    #[test]
    fn renders_name_and_consumes_label() {
        let settings = settings_with_name("kv");
        let mut labels = HashMap::new();
        labels.insert("metric".to_string(), "Availability".to_string());
        labels.insert("aggregation".to_string(), "average".to_string());
        let (name, remaining) = render_name("{name}_{metric}_{aggregation}", &settings, &labels);
        assert_eq!(name, "kv_availability_average");
        assert!(!remaining.contains_key("metric"));
        assert!(!remaining.contains_key("aggregation"));
    }

    #[test]
    fn help_template_preserves_labels() {
        let settings = settings_with_name("kv");
        let mut labels = HashMap::new();
        labels.insert("metric".to_string(), "Availability".to_string());
        let help = render_help("Metric {metric} for {name}", &settings, &labels);
        assert_eq!(help, "Metric Availability for kv");
        assert!(labels.contains_key("metric"));
    }

    #[test]
    fn sanitize_strips_disallowed_chars() {
        assert_eq!(sanitize_metric_name("Foo-Bar/Baz.Qux quux"), "foo_bar_baz_qux_quux");
        assert_eq!(sanitize_metric_name("weird$chars!"), "weirdchars");
    }

    #[test]
    fn sanitize_label_drops_colon() {
        assert_eq!(sanitize_label_name("dimension:Status"), "dimensionStatus");
    }

    #[test]
    fn unknown_token_renders_empty() {
        let settings = settings_with_name("kv");
        let labels = HashMap::new();
        let (name, _) = render_name("{name}_{nope}", &settings, &labels);
        assert_eq!(name, "kv_");
    }
}
