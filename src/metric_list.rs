//! Accumulates rendered metric samples per probe, tracking the union label
//! set for each metric name so the publisher can build one gauge family per
//! name with a consistent label schema.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// One rendered sample: a label set and a value, plus whatever samples came
/// before it under the same metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

#[derive(Default)]
struct Inner {
    rows: HashMap<String, Vec<Row>>,
    help: HashMap<String, String>,
    label_names: HashMap<String, HashSet<String>>,
}

/// Thread-safe accumulator owned by a single probe for its lifetime, then
/// either published to a registry or stored whole in the result cache.
#[derive(Default)]
pub struct MetricList {
    inner: Mutex<Inner>,
}

impl MetricList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `row` under `name`. The row's labels are copied so later
    /// mutation by the caller cannot alias into the stored value. Repeated
    /// `(name, row)` additions intentionally produce repeated rows: distinct
    /// aggregations of the same metric coexist rather than being deduped.
    pub fn add(&self, name: &str, row: Row) {
        let mut inner = self.inner.lock().expect("metric list mutex poisoned");
        let names = inner.label_names.entry(name.to_string()).or_default();
        for key in row.labels.keys() {
            names.insert(key.clone());
        }
        inner.rows.entry(name.to_string()).or_default().push(row);
    }

    /// Last-writer-wins: every writer for a given name is expected to agree
    /// on its help text.
    pub fn set_help(&self, name: &str, help: &str) {
        let mut inner = self.inner.lock().expect("metric list mutex poisoned");
        inner.help.insert(name.to_string(), help.to_string());
    }

    pub fn get_metric_names(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("metric list mutex poisoned");
        inner.rows.keys().cloned().collect()
    }

    pub fn get_metric_list(&self, name: &str) -> Vec<Row> {
        let inner = self.inner.lock().expect("metric list mutex poisoned");
        inner.rows.get(name).cloned().unwrap_or_default()
    }

    /// Union of every label key seen across all rows added under `name`.
    pub fn get_metric_label_names(&self, name: &str) -> Vec<String> {
        let inner = self.inner.lock().expect("metric list mutex poisoned");
        let mut names: Vec<String> = inner
            .label_names
            .get(name)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        names.sort();
        names
    }

    pub fn get_metric_help(&self, name: &str) -> String {
        let inner = self.inner.lock().expect("metric list mutex poisoned");
        inner.help.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)], value: f64) -> Row {
        Row {
            labels: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            value,
        }
    }

    #[test]
    fn label_union_across_varying_keys() {
        let list = MetricList::new();
        list.add("m", row(&[("a", "1")], 1.0));
        list.add("m", row(&[("b", "2")], 2.0));
        list.add("m", row(&[("a", "3"), ("b", "4")], 3.0));
        let mut names = list.get_metric_label_names("m");
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn repeated_add_is_not_deduped() {
        let list = MetricList::new();
        let r = row(&[("a", "1")], 1.0);
        list.add("m", r.clone());
        list.add("m", r);
        assert_eq!(list.get_metric_list("m").len(), 2);
    }

    #[test]
    fn set_help_is_last_writer_wins() {
        let list = MetricList::new();
        list.set_help("m", "first");
        list.set_help("m", "second");
        assert_eq!(list.get_metric_help("m"), "second");
    }
}
