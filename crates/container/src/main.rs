//! Polaris Container - encrypting sidecar proxy for confidential workloads
//!
//! Sits in front of a co-located workload and terminates application-layer
//! encryption: inbound requests are decrypted before forwarding, responses
//! are re-encrypted under the caller's public key. Configuration comes from
//! `POLARIS_CONTAINER_*` environment variables; a few flags override it.

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use service::{Config, ServiceState};

/// Polaris Container - encrypting sidecar proxy for confidential workloads
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on for HTTP requests (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing; a level we cannot parse is fatal, not silently
    // downgraded to the default
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let env_level = std::env::var("POLARIS_CONTAINER_LOG_LEVEL").ok();
    let log_level = match resolve_log_level(args.log_level, env_level) {
        Ok(level) => level,
        Err(invalid) => {
            eprintln!("Invalid log level: {invalid}");
            std::process::exit(1);
        }
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stdout_layer).init();

    tracing::info!("Starting Polaris Container");

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    config.log_level = log_level;
    if let Some(port) = args.port {
        config.listen_port = port;
    }
    let listen_port = config.listen_port;

    // Create state
    let state = match ServiceState::from_config(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to create service state: {}", e);
            std::process::exit(1);
        }
    };

    // Warm up the key backend; a failure here is not fatal since handlers
    // re-acquire on demand
    if let Err(e) = state.sdk().init().await {
        tracing::warn!("Key material not available at boot: {}", e);
    }

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let graceful_shutdown = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    };
    tokio::spawn(graceful_shutdown);

    // Serve
    let listen_addr = SocketAddr::from_str(&format!("0.0.0.0:{}", listen_port))?;
    let router = service::http::router(state);

    tracing::info!("Polaris Container listening on {}", listen_addr);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    let mut server_rx = shutdown_rx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = server_rx.changed().await;
        })
        .await?;

    tracing::info!("Polaris Container shutdown complete");
    Ok(())
}

/// Resolve the log level from the flag (preferred) or the environment,
/// defaulting to INFO only when neither is set
fn resolve_log_level(
    arg: Option<String>,
    env: Option<String>,
) -> Result<tracing::Level, String> {
    match arg.or(env) {
        Some(level) => level.parse().map_err(|_| level),
        None => Ok(tracing::Level::INFO),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resolve_log_level_defaults_to_info() {
        assert_eq!(resolve_log_level(None, None), Ok(tracing::Level::INFO));
    }

    #[test]
    fn test_resolve_log_level_flag_beats_env() {
        assert_eq!(
            resolve_log_level(Some("debug".into()), Some("error".into())),
            Ok(tracing::Level::DEBUG)
        );
        assert_eq!(
            resolve_log_level(None, Some("warn".into())),
            Ok(tracing::Level::WARN)
        );
    }

    #[test]
    fn test_resolve_log_level_invalid_is_an_error() {
        assert_eq!(
            resolve_log_level(Some("verbose".into()), None),
            Err("verbose".to_string())
        );
        assert_eq!(
            resolve_log_level(None, Some("loud".into())),
            Err("loud".to_string())
        );
    }
}
