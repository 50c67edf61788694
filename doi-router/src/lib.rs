pub mod aggregator;
pub mod client;
pub mod config;
pub mod errors;
pub mod executor;
pub mod lookup;
pub mod metrics_defs;
pub mod protocol;
pub mod service;
pub mod types;
pub mod validator;

#[cfg(test)]
mod testutils;

pub use config::{Config, Credentials};
pub use errors::DoiRouterError;
pub use service::DoiRouterService;
pub use types::{BatchResult, Identifier, LookupFailure, LookupOutcome};

use shared::admin_service::AdminService;
use shared::http::run_http_service;

/// Serves batch lookups on the main listener and health probes on the admin
/// listener until either fails.
pub async fn run(config: Config, credentials: Credentials) -> Result<(), DoiRouterError> {
    let service = DoiRouterService::from_config(&config, credentials)?;
    tracing::info!(
        concurrency = config.lookup.concurrency,
        max_batch_size = config.lookup.max_batch_size,
        http_timeout_ms = config.lookup.http_timeout_ms,
        batch_deadline_ms = config.lookup.batch_deadline_ms,
        provider = %config.provider.url,
        "Starting doi-router"
    );

    let router_task = run_http_service(&config.listener.host, config.listener.port, service);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(|| true),
    );

    tokio::try_join!(router_task, admin_task)?;
    Ok(())
}
