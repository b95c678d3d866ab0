use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use azure_metrics_exporter::azure::auth::EnvironmentCredential;
use azure_metrics_exporter::azure::client::AzureRestClient;
use azure_metrics_exporter::http::{serve, Deps};
use azure_metrics_exporter::log::Logger;
use azure_metrics_exporter::self_metrics::SelfMetrics;
use azure_metrics_exporter::Config;
use clap::Parser;

fn main() -> ExitCode {
    let config = Config::parse();

    let logger = match Logger::launch(&config.logging()) {
        Ok(logger) => logger,
        Err(error) => {
            eprintln!("could not start logger: {error}");
            return ExitCode::FAILURE;
        }
    };
    let _ = logger;

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("could not start tokio: {error}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config))
}

async fn run(config: Config) -> ExitCode {
    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server_timeout_read.max(config.server_timeout_write)))
        .build()
    {
        Ok(http) => http,
        Err(error) => {
            tracing::error!(error = %error, "failed to build http client");
            return ExitCode::FAILURE;
        }
    };

    let credential = match EnvironmentCredential::from_env(http.clone(), config.azure_environment.active_directory_base()) {
        Ok(credential) => credential,
        Err(error) => {
            tracing::error!(error = %error, "failed to initialize azure credentials");
            return ExitCode::FAILURE;
        }
    };

    let self_metrics = Arc::new(SelfMetrics::new());
    let client = Arc::new(AzureRestClient::new(
        http,
        config.azure_environment.resource_manager_base(),
        config.azure_ad_resource(),
        credential,
        self_metrics.clone(),
    ));

    let deps = Arc::new(Deps {
        result_cache: azure_metrics_exporter::cache::ResultCache::new(),
        sd_cache: azure_metrics_exporter::cache::ServiceDiscoveryCache::new(),
        metrics_api: client.clone(),
        resources_api: client.clone(),
        resource_graph_api: client,
        self_metrics,
        config,
    });

    if let Err(error) = serve(deps).await {
        tracing::error!(error = %error, "http server exited with an error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
