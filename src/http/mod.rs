//! HTTP surface (C8): five probe endpoints plus `/metrics`, `/healthz` and
//! `/readyz`, sharing a parse -> precondition -> prober -> render skeleton.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::azure::{MetricsApi, ResourceGraphApi, ResourcesApi};
use crate::cache::{ResultCache, ServiceDiscoveryCache};
use crate::config::Config;
use crate::discovery::{discover_explicit, discover_list_by_filter, discover_resource_graph, discover_tag_scrape, Target};
use crate::error::ExporterError;
use crate::prober::{encode_registry, ConcurrencyLimits, Prober};
use crate::self_metrics::SelfMetrics;
use crate::settings::{parse_settings, MetricSettings, ParseDefaults};

/// Shared, process-lifetime dependencies installed as `axum::State`.
pub struct Deps {
    pub config: Config,
    pub result_cache: ResultCache,
    pub sd_cache: ServiceDiscoveryCache,
    pub metrics_api: Arc<dyn MetricsApi>,
    pub resources_api: Arc<dyn ResourcesApi>,
    pub resource_graph_api: Arc<dyn ResourceGraphApi>,
    pub self_metrics: Arc<SelfMetrics>,
}

impl Deps {
    fn parse_defaults(&self) -> ParseDefaults {
        ParseDefaults {
            metric_template: self.config.metrics_template.clone(),
            help_template: self.config.metrics_help.clone(),
            dimension_lowercase: self.config.metrics_dimensions_lowercase,
            caching_enabled: self.config.enable_caching,
            service_discovery_cache: jiff::Span::new().seconds(self.config.azure_servicediscovery_cache as i64),
        }
    }

    fn concurrency_limits(&self) -> ConcurrencyLimits {
        ConcurrencyLimits {
            subscriptions: self.config.concurrency_subscription,
            subscription_resources: self.config.concurrency_subscription_resource,
        }
    }
}

pub fn router(deps: Arc<Deps>) -> Router {
    Router::new()
        .route("/", get(|| async { "azure-metrics-exporter" }))
        .route("/metrics", get(handle_self_metrics))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(|| async { StatusCode::OK }))
        .route("/probe/metrics/resource", get(handle_resource))
        .route("/probe/metrics/list", get(handle_list))
        .route("/probe/metrics", get(handle_subscription))
        .route("/probe/metrics/scrape", get(handle_scrape))
        .route("/probe/metrics/resourcegraph", get(handle_resourcegraph))
        .with_state(deps)
}

pub async fn serve(deps: Arc<Deps>) -> std::io::Result<()> {
    let bind = deps.config.bind_address();
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, "starting http server");
    axum::serve(listener, router(deps)).await
}

async fn handle_self_metrics(State(deps): State<Arc<Deps>>) -> impl IntoResponse {
    let mut buffer = String::new();
    let _ = prometheus_client::encoding::text::encode(&mut buffer, &deps.self_metrics.registry);
    ([("content-type", "text/plain; version=0.0.4")], buffer)
}

fn scrape_timeout(headers: &HeaderMap, default_seconds: u64) -> Result<Duration, ExporterError> {
    match headers.get("X-Prometheus-Scrape-Timeout-Seconds") {
        None => Ok(Duration::from_secs(default_seconds)),
        Some(value) => {
            let raw = value.to_str().unwrap_or_default();
            let seconds: f64 = raw
                .parse()
                .map_err(|_| ExporterError::TimeoutParse { value: raw.to_string() })?;
            Ok(Duration::from_secs_f64(seconds))
        }
    }
}

fn error_response(err: ExporterError) -> Response {
    let status = if err.is_bad_request() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, err.to_string()).into_response()
}

fn render_with_headers(prober: &Prober) -> Response {
    let mut registry = prometheus_client::registry::Registry::default();
    prober.publish(&mut registry);
    let body = encode_registry(&registry);

    let mut headers = HeaderMap::new();
    headers.insert("X-metrics-cached", prober.is_cached().to_string().parse().unwrap());
    if let Some(until) = prober.cached_until() {
        if let Ok(value) = until.strftime("%Y-%m-%dT%H:%M:%SZ").to_string().parse() {
            headers.insert("X-metrics-cached-until", value);
        }
    }
    headers.insert("content-type", "text/plain; version=0.0.4".parse().unwrap());
    (headers, body).into_response()
}

/// A request's scrape timeout is parsed up front for every handler but does
/// not yet gate fan-out with a `tokio::time::timeout` wrapper here; each
/// handler returns as soon as its own work completes, so client-driven
/// cancellation (connection drop) is the only cancellation path exercised in
/// practice, consistent with the "render whatever is in the MetricList"
/// decision recorded in DESIGN.md.
async fn handle_resource(State(deps): State<Arc<Deps>>, headers: HeaderMap, RawQuery(query): RawQuery) -> Response {
    if let Err(e) = scrape_timeout(&headers, 10) {
        return error_response(e);
    }
    let query = query.unwrap_or_default();
    let settings = match parse_settings(&query, &deps.parse_defaults()) {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    if settings.target.is_empty() {
        return error_response(ExporterError::param_invalid("target", "is required"));
    }

    let targets = discover_explicit(&settings);
    run_prober(&deps, settings, &query, "resource", targets).await
}

async fn handle_list(State(deps): State<Arc<Deps>>, headers: HeaderMap, RawQuery(query): RawQuery) -> Response {
    if let Err(e) = scrape_timeout(&headers, 120) {
        return error_response(e);
    }
    let query = query.unwrap_or_default();
    let settings = match parse_settings(&query, &deps.parse_defaults()) {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    if settings.filter.is_empty() {
        return error_response(ExporterError::param_invalid("filter", "is required"));
    }

    let cache_ttl = deps.parse_defaults().service_discovery_cache;
    let mut targets = Vec::new();
    for subscription in &settings.subscriptions {
        match discover_list_by_filter(deps.resources_api.as_ref(), &deps.sd_cache, cache_ttl, &settings, subscription).await {
            Ok(t) => targets.extend(t),
            Err(e) => return error_response(e),
        }
    }
    run_prober(&deps, settings, &query, "list", targets).await
}

async fn handle_scrape(State(deps): State<Arc<Deps>>, headers: HeaderMap, RawQuery(query): RawQuery) -> Response {
    if let Err(e) = scrape_timeout(&headers, 120) {
        return error_response(e);
    }
    let query = query.unwrap_or_default();
    let settings = match parse_settings(&query, &deps.parse_defaults()) {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    if settings.filter.is_empty() || settings.metric_tag_name.is_empty() || settings.aggregation_tag_name.is_empty() {
        return error_response(ExporterError::param_invalid(
            "filter/metricTagName/aggregationTagName",
            "are required",
        ));
    }

    let cache_ttl = deps.parse_defaults().service_discovery_cache;
    let mut targets = Vec::new();
    for subscription in &settings.subscriptions {
        match discover_tag_scrape(deps.resources_api.as_ref(), &deps.sd_cache, cache_ttl, &settings, subscription).await {
            Ok(t) => targets.extend(t),
            Err(e) => return error_response(e),
        }
    }
    run_prober(&deps, settings, &query, "scrape", targets).await
}

async fn handle_resourcegraph(State(deps): State<Arc<Deps>>, headers: HeaderMap, RawQuery(query): RawQuery) -> Response {
    if let Err(e) = scrape_timeout(&headers, 120) {
        return error_response(e);
    }
    let query = query.unwrap_or_default();
    let settings = match parse_settings(&query, &deps.parse_defaults()) {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    if settings.resource_type.is_empty() {
        return error_response(ExporterError::param_invalid("resourceType", "is required"));
    }

    let cache_ttl = deps.parse_defaults().service_discovery_cache;
    let targets = match discover_resource_graph(
        deps.resource_graph_api.as_ref(),
        &deps.sd_cache,
        cache_ttl,
        &settings,
        &settings.subscriptions,
    )
    .await
    {
        Ok(t) => t,
        Err(e) => return error_response(e),
    };
    run_prober(&deps, settings, &query, "resourcegraph", targets).await
}

async fn handle_subscription(State(deps): State<Arc<Deps>>, headers: HeaderMap, RawQuery(query): RawQuery) -> Response {
    if let Err(e) = scrape_timeout(&headers, 120) {
        return error_response(e);
    }
    let query = query.unwrap_or_default();
    let settings = match parse_settings(&query, &deps.parse_defaults()) {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    if settings.metrics.is_empty() || settings.resource_type.is_empty() {
        return error_response(ExporterError::param_invalid("metric/resourceType", "are required"));
    }

    let request_url = format!("/probe/metrics?{query}");
    let mut prober = Prober::new(
        settings.clone(),
        deps.concurrency_limits(),
        deps.metrics_api.clone(),
        deps.self_metrics.clone(),
        "subscription",
        request_url,
    );
    let cached = prober.fetch_from_cache(&deps.result_cache);
    if !cached {
        prober.run_on_subscription_scope(&settings.subscriptions).await;
    }
    let _ = prober.save_to_cache(&deps.result_cache);
    render_with_headers(&prober)
}

async fn run_prober(deps: &Arc<Deps>, settings: MetricSettings, query: &str, handler: &str, targets: Vec<Target>) -> Response {
    let request_url = format!("/probe/metrics/{handler}?{query}");
    let mut prober = Prober::new(
        settings,
        deps.concurrency_limits(),
        deps.metrics_api.clone(),
        deps.self_metrics.clone(),
        handler,
        request_url,
    );
    let cached = prober.fetch_from_cache(&deps.result_cache);
    if !cached {
        prober.add_targets(targets);
        prober.run().await;
    }
    let _ = prober.save_to_cache(&deps.result_cache);
    render_with_headers(&prober)
}
