//! Prometheus probe exporter for Azure Monitor metrics.
//!
//! A scrape request carries everything needed to answer it in its query
//! string: subscriptions, target resources (or a discovery filter), metric
//! names, aggregations and a timespan. The exporter resolves targets, fans
//! out to Azure's metrics API, and renders the result as a Prometheus
//! registry for that single request.

pub mod azure;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod http;
pub mod log;
pub mod metric_list;
pub mod prober;
pub mod resource_id;
pub mod self_metrics;
pub mod settings;
pub mod template;

pub use config::Config;
pub use error::ExporterError;
