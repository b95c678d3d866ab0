//! Prober (C7): orchestrates parse -> resolve targets -> fan out ->
//! aggregate -> publish -> cache for a single probe request.

use std::collections::HashMap;
use std::sync::Arc;

use jiff::Timestamp;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tokio::sync::{mpsc, Semaphore};

use crate::azure::MetricsApi;
use crate::cache::{hash_result_cache_key, ResultCache};
use crate::discovery::Target;
use crate::fetch::{chunk_metrics, fetch, fetch_at_subscription_scope, project_response, MetricSample};
use crate::metric_list::{MetricList, Row};
use crate::self_metrics::{RequestResult, SelfMetrics};
use crate::settings::MetricSettings;

/// Concurrency bounds applied to a single probe's fan-out, matching
/// `concurrency.subscription` / `concurrency.subscription.resource`.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimits {
    pub subscriptions: usize,
    pub subscription_resources: usize,
}

pub struct Prober {
    settings: MetricSettings,
    limits: ConcurrencyLimits,
    metrics_api: Arc<dyn MetricsApi>,
    self_metrics: Arc<SelfMetrics>,
    handler: String,
    request_url: String,
    targets_by_subscription: HashMap<String, Vec<Target>>,
    list: Arc<MetricList>,
    cached: bool,
    cached_until: Option<Timestamp>,
}

impl Prober {
    pub fn new(
        settings: MetricSettings,
        limits: ConcurrencyLimits,
        metrics_api: Arc<dyn MetricsApi>,
        self_metrics: Arc<SelfMetrics>,
        handler: impl Into<String>,
        request_url: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            limits,
            metrics_api,
            self_metrics,
            handler: handler.into(),
            request_url: request_url.into(),
            targets_by_subscription: HashMap::new(),
            list: Arc::new(MetricList::new()),
            cached: false,
            cached_until: None,
        }
    }

    /// Groups targets by the subscription parsed from their resource id.
    pub fn add_targets(&mut self, targets: Vec<Target>) {
        for target in targets {
            let subscription = crate::resource_id::parse_resource_id(&target.resource_id).subscription;
            self.targets_by_subscription.entry(subscription).or_default().push(target);
        }
    }

    /// Installs a cached `MetricList` in place of running fan-out, if the
    /// result cache holds a fresh entry for this request's URL.
    pub fn fetch_from_cache(&mut self, result_cache: &ResultCache) -> bool {
        let key = hash_result_cache_key(&self.request_url);
        if let Some(cached) = result_cache.get(&key, Timestamp::now()) {
            self.list = cached;
            self.cached = true;
            true
        } else {
            false
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Runs target-mode fan-out: one worker per subscription (bounded),
    /// each spawning one worker per target (bounded), each chunking its
    /// metrics at 20 and calling the fetcher.
    pub async fn run(&self) {
        let (tx, mut rx) = mpsc::channel::<MetricSample>(256);
        let sub_semaphore = Arc::new(Semaphore::new(self.limits.subscriptions.max(1)));
        let resource_semaphore = Arc::new(Semaphore::new(self.limits.subscription_resources.max(1)));

        let mut subscription_handles = Vec::new();
        for (subscription, targets) in &self.targets_by_subscription {
            let subscription = subscription.clone();
            let targets = targets.clone();
            let tx = tx.clone();
            let sub_semaphore = sub_semaphore.clone();
            let resource_semaphore = resource_semaphore.clone();
            let metrics_api = self.metrics_api.clone();
            let settings = self.settings.clone();
            let self_metrics = self.self_metrics.clone();
            let handler = self.handler.clone();

            subscription_handles.push(tokio::spawn(async move {
                let _permit = sub_semaphore.acquire_owned().await.expect("semaphore closed");
                let started = std::time::Instant::now();

                let mut resource_handles = Vec::new();
                for target in targets {
                    let tx = tx.clone();
                    let resource_semaphore = resource_semaphore.clone();
                    let metrics_api = metrics_api.clone();
                    let settings = settings.clone();
                    let self_metrics = self_metrics.clone();
                    let subscription = subscription.clone();
                    let handler = handler.clone();

                    resource_handles.push(tokio::spawn(async move {
                        let _permit = resource_semaphore.acquire_owned().await.expect("semaphore closed");

                        for chunk in chunk_metrics(&target.metrics) {
                            let aggregations = if target.aggregations.is_empty() {
                                settings.aggregations.iter().map(|a| a.as_str().to_string()).collect()
                            } else {
                                target.aggregations.clone()
                            };

                            match fetch(metrics_api.as_ref(), &settings, &target, &chunk, &aggregations).await {
                                Ok(response) => {
                                    let samples = project_response(&response, &settings, &target, None, false);
                                    for sample in samples {
                                        let _ = tx.send(sample).await;
                                    }
                                    self_metrics.record_request(&subscription, &handler, &settings.filter, RequestResult::Success);
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        name = %settings.name,
                                        filter = %settings.filter,
                                        resource_id = %target.resource_id,
                                        error = %e,
                                        "metric fetch failed for target"
                                    );
                                    self_metrics.record_request(&subscription, &handler, &settings.filter, RequestResult::Error);
                                }
                            }
                        }
                    }));
                }

                for handle in resource_handles {
                    let _ = handle.await;
                }
                self_metrics.record_collect_time(&subscription, &handler, &settings.filter, started.elapsed().as_secs_f64());
            }));
        }
        drop(tx);

        for handle in subscription_handles {
            let _ = handle.await;
        }

        while let Some(sample) = rx.recv().await {
            self.list.add(&sample.name, Row { labels: sample.labels, value: sample.value });
            if !sample.help.is_empty() {
                self.list.set_help(&sample.name, &sample.help);
            }
        }
    }

    /// Runs subscription-scope fan-out (D5): no pre-resolved targets;
    /// iterates subscriptions (bounded) x regions x metrics-chunks.
    pub async fn run_on_subscription_scope(&self, subscriptions: &[String]) {
        let (tx, mut rx) = mpsc::channel::<MetricSample>(256);
        let sub_semaphore = Arc::new(Semaphore::new(self.limits.subscriptions.max(1)));

        let mut handles = Vec::new();
        for subscription in subscriptions {
            let subscription = subscription.clone();
            let tx = tx.clone();
            let sub_semaphore = sub_semaphore.clone();
            let metrics_api = self.metrics_api.clone();
            let settings = self.settings.clone();
            let self_metrics = self.self_metrics.clone();
            let handler = self.handler.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sub_semaphore.acquire_owned().await.expect("semaphore closed");
                let started = std::time::Instant::now();
                let regions = if settings.regions.is_empty() {
                    vec![String::new()]
                } else {
                    settings.regions.clone()
                };

                for region in regions {
                    for chunk in chunk_metrics(&settings.metrics) {
                        match fetch_at_subscription_scope(metrics_api.as_ref(), &settings, &subscription, &region, &chunk).await {
                            Ok(response) => {
                                let dummy_target = Target {
                                    resource_id: String::new(),
                                    metrics: chunk.clone(),
                                    aggregations: Vec::new(),
                                    tags: HashMap::new(),
                                };
                                let samples = project_response(&response, &settings, &dummy_target, Some(&subscription), true);
                                for sample in samples {
                                    let _ = tx.send(sample).await;
                                }
                                self_metrics.record_request(&subscription, &handler, &settings.filter, RequestResult::Success);
                            }
                            Err(e) => {
                                tracing::warn!(
                                    name = %settings.name,
                                    filter = %settings.filter,
                                    subscription = %subscription,
                                    error = %e,
                                    "subscription-scope metric fetch failed"
                                );
                                self_metrics.record_request(&subscription, &handler, &settings.filter, RequestResult::Error);
                            }
                        }
                    }
                }
                self_metrics.record_collect_time(&subscription, &handler, &settings.filter, started.elapsed().as_secs_f64());
            }));
        }
        drop(tx);

        for handle in handles {
            let _ = handle.await;
        }

        while let Some(sample) = rx.recv().await {
            self.list.add(&sample.name, Row { labels: sample.labels, value: sample.value });
            if !sample.help.is_empty() {
                self.list.set_help(&sample.name, &sample.help);
            }
        }
    }

    /// Stores the aggregated `MetricList` under the URL-hash key with the
    /// settings-computed TTL, when caching applies to this request.
    pub fn save_to_cache(&mut self, result_cache: &ResultCache) -> Option<Timestamp> {
        let now = Timestamp::now();
        let duration = self.settings.cache_duration(now)?;
        let expires_at = now.checked_add(duration).ok()?;
        let key = hash_result_cache_key(&self.request_url);
        result_cache.set(key, self.list.clone(), expires_at);
        self.cached_until = Some(expires_at);
        self.cached_until
    }

    pub fn cached_until(&self) -> Option<Timestamp> {
        self.cached_until
    }

    /// Renders every metric name's rows as a gauge family with the union
    /// label set, registered on `registry`.
    pub fn publish(&self, registry: &mut Registry) {
        for name in self.list.get_metric_names() {
            let label_names = self.list.get_metric_label_names(&name);
            let help = self.list.get_metric_help(&name);
            let family = Family::<Vec<(String, String)>, Gauge<f64, std::sync::atomic::AtomicU64>>::default();
            registry.register(name.clone(), if help.is_empty() { "Azure monitor insight metric".to_string() } else { help }, family.clone());

            for row in self.list.get_metric_list(&name) {
                let mut labels: Vec<(String, String)> = Vec::new();
                for label_name in &label_names {
                    labels.push((label_name.clone(), row.labels.get(label_name).cloned().unwrap_or_default()));
                }
                family.get_or_create(&labels).set(row.value);
            }
        }
    }
}

/// Renders a registry to Prometheus text exposition format.
pub fn encode_registry(registry: &Registry) -> String {
    let mut buffer = String::new();
    let _ = encode(&mut buffer, registry);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::types::{DataPoint, LocalizableString, Metric, MetricsResponse, TimeSeries};
    use crate::azure::{ApiError, MetricsQuery};
    use async_trait::async_trait;

    struct FakeMetricsApi {
        response: MetricsResponse,
    }

    #[async_trait]
    impl MetricsApi for FakeMetricsApi {
        async fn list_metrics(&self, _resource_id: &str, _query: &MetricsQuery) -> Result<MetricsResponse, ApiError> {
            Ok(self.response.clone())
        }

        async fn list_metrics_at_subscription_scope(
            &self,
            _subscription: &str,
            _region: &str,
            _query: &MetricsQuery,
        ) -> Result<MetricsResponse, ApiError> {
            Ok(self.response.clone())
        }
    }

    fn canned_response() -> MetricsResponse {
        MetricsResponse {
            value: vec![Metric {
                name: LocalizableString { value: "Availability".to_string() },
                unit: "Percent".to_string(),
                timeseries: vec![TimeSeries {
                    metadatavalues: vec![],
                    data: vec![DataPoint {
                        average: Some(99.9),
                        ..Default::default()
                    }],
                }],
            }],
        }
    }

    #[tokio::test]
    async fn run_aggregates_samples_from_all_targets() {
        let mut settings = MetricSettings::default_for_test();
        settings.name = "kv".to_string();
        settings.metric_template = "{name}_{metric}_{aggregation}".to_string();

        let metrics_api: Arc<dyn MetricsApi> = Arc::new(FakeMetricsApi { response: canned_response() });
        let self_metrics = Arc::new(SelfMetrics::new());

        let mut prober = Prober::new(
            settings,
            ConcurrencyLimits { subscriptions: 5, subscription_resources: 10 },
            metrics_api,
            self_metrics,
            "resource",
            "http://x/probe",
        );

        prober.add_targets(vec![Target {
            resource_id: "/subscriptions/SUB1/resourceGroups/RG/providers/Microsoft.KeyVault/vaults/V1".to_string(),
            metrics: vec!["Availability".to_string()],
            aggregations: vec!["average".to_string()],
            tags: HashMap::new(),
        }]);

        prober.run().await;

        let names = prober.list.get_metric_names();
        assert_eq!(names, vec!["kv_availability_average".to_string()]);
        let rows = prober.list.get_metric_list(&names[0]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 99.9);
    }
}
