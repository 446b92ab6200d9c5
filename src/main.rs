//! # Provider Sentinel
//!
//! Runs the monitor as a long-lived service with its HTTP trigger and
//! status routes, or performs a single check with `--once` and prints the
//! report.

use provider_sentinel::{
    bootstrap::build_components, create_router, AppState, Config, EnvCredentialSource, GracefulShutdown,
    SystemClock,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from CLI args and .env file
    let config = Config::parse_args();

    let components = build_components(&config, &EnvCredentialSource, Arc::new(SystemClock))?;

    if config.once {
        let record = components.service.force_run_now().await?;
        if let Some(failure) = &record.failure {
            error!(run_id = %record.run_id, "❌ Health check could not complete: {}", failure);
            println!("{}", serde_json::to_string_pretty(&record)?);
            std::process::exit(1);
        }
        match components.service.last_report().await {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => println!("{}", serde_json::to_string_pretty(&record)?),
        }
        return Ok(());
    }

    let shutdown = GracefulShutdown::new();
    shutdown.listen_for_signals();

    components.service.start().await;

    let state = AppState::new(config.clone(), components.service.clone());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("🚀 Provider Sentinel listening on http://{}", listener.local_addr()?);
    info!("Environment: {}", config.environment);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.wait().await })
        .await?;

    shutdown
        .drain(&components.service, Duration::from_secs(config.run_timeout_secs))
        .await;

    Ok(())
}
