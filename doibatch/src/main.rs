mod config;

use clap::Parser;
use config::{CommonConfig, Config, ConfigError};
use doi_router::config::ValidationError;
use doi_router::metrics_defs::ALL_METRICS;
use doi_router::protocol::{BatchResponse, ResponseOptions};
use doi_router::{Credentials, DoiRouterError, DoiRouterService};
use metrics_exporter_statsd::StatsdBuilder;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRICS_PREFIX: &str = "doibatch";

#[derive(Parser)]
#[command(version, about = "Bounded fan-out DOI metadata lookups")]
enum CliCommand {
    /// Serve batch lookups over HTTP
    Serve {
        #[arg(long)]
        config_file_path: PathBuf,
    },
    /// Resolve one file of DOIs and print the batch response
    Lookup {
        #[arg(long)]
        config_file_path: PathBuf,
        /// One DOI per line; blank lines are skipped
        #[arg(long)]
        dois_file: PathBuf,
        /// Print one JSON object per DOI instead of the full response
        #[arg(long, conflicts_with = "csv")]
        jsonl: bool,
        /// Print a CSV table with one row per DOI instead of the full response
        #[arg(long)]
        csv: bool,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Credentials(#[from] ValidationError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not read DOI file: {0}")]
    DoisFile(std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Router(#[from] DoiRouterError),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();
    let config_file_path = match &cli {
        CliCommand::Serve {
            config_file_path, ..
        }
        | CliCommand::Lookup {
            config_file_path, ..
        } => config_file_path,
    };

    let config = match Config::from_file(config_file_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Keep the guard alive so pending events are flushed on exit
    let _sentry = init_logging(&config.common);

    if let Err(e) = init_metrics(&config.common) {
        tracing::error!(error = %e, "Metrics disabled");
    }

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "doibatch failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: CliCommand, config: &Config) -> Result<(), CliError> {
    let router_config = config.doi_router()?;
    let credentials = Credentials::from_env(&router_config.provider)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli {
        CliCommand::Serve { .. } => {
            rt.block_on(doi_router::run(router_config.clone(), credentials))?;
        }
        CliCommand::Lookup {
            dois_file,
            jsonl,
            csv,
            ..
        } => {
            let dois = read_dois(&dois_file).map_err(CliError::DoisFile)?;
            tracing::info!(count = dois.len(), file = %dois_file.display(), "Resolving DOI file");

            let service = DoiRouterService::from_config(router_config, credentials)?;
            let result = rt.block_on(service.lookup_batch(dois))?;
            let options = ResponseOptions {
                include_jsonl: jsonl,
                include_csv: csv,
            };
            let response = BatchResponse::from_result(result, options)?;

            let mut stdout = std::io::stdout().lock();
            match (&response.jsonl, &response.csv) {
                (Some(lines), _) => writeln!(stdout, "{lines}")?,
                (_, Some(table)) => stdout.write_all(table.as_bytes())?,
                (None, None) => {
                    stdout.write_all(&response.to_bytes()?)?;
                    writeln!(stdout)?;
                }
            }
        }
    }

    Ok(())
}

fn init_logging(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let guard = common.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(common: &CommonConfig) -> Result<(), CliError> {
    let Some(statsd) = &common.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(statsd.statsd_host.clone(), statsd.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;
    shared::metrics_defs::describe_all(ALL_METRICS);

    tracing::info!(
        host = %statsd.statsd_host,
        port = statsd.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}

/// One DOI per line, trimmed, blank lines skipped.
fn read_dois(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
