//! Serve command - runs the HTTP admin API

use std::net::SocketAddr;

use clap::Args;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{info, warn};

use crate::api::create_router_with_state;
use crate::config::AppConfig;
use crate::domain::experiment::EvaluationResult;
use crate::infrastructure::logging;
use crate::infrastructure::observability::{create_metrics_router, init_metrics};

/// Arguments for the serve command
#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Host to bind (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    pub port: Option<u16>,
}

/// Run the server
pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let (config, load_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    logging::init_logging(&config.logging)?;

    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load configuration, using defaults");
    }

    let state = crate::create_app_state_with_config(&config).await?;
    tokio::spawn(log_completions(state.experiment_service.subscribe()));

    let mut app = create_router_with_state(state);

    if let Some(metrics) = init_metrics(&config.metrics) {
        app = app.merge(create_metrics_router(metrics, &config.metrics.path));
    }

    let addr = build_socket_addr(&config, &args)?;
    info!("Starting split engine on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn build_socket_addr(config: &AppConfig, args: &ServeArgs) -> anyhow::Result<SocketAddr> {
    let host = args.host.as_deref().unwrap_or(&config.server.host);
    let port = args.port.unwrap_or(config.server.port);

    Ok(SocketAddr::from((host.parse::<std::net::IpAddr>()?, port)))
}

/// Report every completed experiment until the channel closes
async fn log_completions(mut completions: Receiver<EvaluationResult>) {
    loop {
        match completions.recv().await {
            Ok(result) => info!(
                experiment_id = %result.test_id,
                winner = %result.winner,
                recommendation = %result.recommendation,
                "Winner ready to publish"
            ),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Completion listener fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr_prefers_args() {
        let config = AppConfig::default();
        let args = ServeArgs {
            host: Some("127.0.0.1".to_string()),
            port: Some(3000),
        };

        let addr = build_socket_addr(&config, &args).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_socket_addr_falls_back_to_config() {
        let config = AppConfig::default();
        let args = ServeArgs {
            host: None,
            port: None,
        };

        let addr = build_socket_addr(&config, &args).unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_invalid_host_is_an_error() {
        let config = AppConfig::default();
        let args = ServeArgs {
            host: Some("not-an-ip".to_string()),
            port: None,
        };

        assert!(build_socket_addr(&config, &args).is_err());
    }
}
