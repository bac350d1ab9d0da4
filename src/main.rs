//! This file defines the disclosure-stats binary entry point.

use disclosure_stats::aggregator;
use disclosure_stats::app;
use disclosure_stats::app_state::AppState;
use disclosure_stats::cli::{self, AggregateArgs, Command, ServeArgs};
use disclosure_stats::error::DisclosureError;
use disclosure_stats::metrics;
use disclosure_stats::server;
use disclosure_stats::tracing;

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use ::tracing::error;

/// Application entry point
#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    tracing::init_tracing(&args);
    let result = match args.command {
        Command::Aggregate(aggregate_args) => aggregate(aggregate_args).await,
        Command::Serve(serve_args) => serve(&serve_args).await,
    };
    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log_error(&err);
            ExitCode::FAILURE
        }
    };
    tracing::shutdown_tracing();
    code
}

/// Run the aggregation job and print its summary as JSON.
async fn aggregate(args: AggregateArgs) -> Result<(), DisclosureError> {
    let summary = tokio::task::spawn_blocking(move || aggregator::run(&args)).await??;
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{json}"),
        Err(err) => error!("failed to serialise aggregation summary: {}", err),
    }
    Ok(())
}

/// Load the artifact, then serve it until shutdown.
async fn serve(args: &ServeArgs) -> Result<(), DisclosureError> {
    metrics::register_metrics().map_err(|err| DisclosureError::Configuration {
        reason: format!("failed to register metrics: {err}"),
    })?;
    let state = Arc::new(AppState::new());
    app::load(&state, &args.artifact).await?;
    server::serve(args, app::service(state)).await
}

/// Log an error and its chain of causes.
fn log_error(err: &DisclosureError) {
    error!("{}", err);
    let mut current = err.source();
    while let Some(source) = current {
        error!("Caused by: {}", source);
        current = source.source();
    }
}
