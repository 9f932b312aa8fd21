//! S3 gateway server binary

use clap::Parser;
use s3_gateway::config::{BackendConfig, Config};
use s3_gateway::init::{build_router, build_state};
use s3_gateway::tls::build_rustls_config;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// S3-compatible gateway over pluggable blob stores
#[derive(Parser, Debug)]
#[command(name = "s3_gateway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Virtual-host suffix (overrides config)
    #[arg(long, value_name = "DOMAIN")]
    virtual_host: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;

    // CLI overrides
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }
    if let Some(ref host) = cli.virtual_host {
        config.virtual_host = Some(host.clone());
    }

    // Initialize tracing
    let log_level = if cli.verbose {
        "s3_gateway=trace,tower_http=trace".to_string()
    } else {
        config.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting S3 gateway v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("S3GW_BUILD_TIME")
    );
    info!("  Listen address: {}", config.listen_addr);
    match &config.backend {
        BackendConfig::Memory { .. } => info!("  Backend: Memory (transient)"),
        BackendConfig::Filesystem { path, .. } => {
            info!("  Backend: Filesystem");
            info!("  Data directory: {:?}", path);
        }
    }
    info!(
        "  Max object size: {} MB",
        config.max_object_size / 1024 / 1024
    );
    if let Some(ref host) = config.virtual_host {
        info!("  Virtual-host suffix: {}", host);
    }

    let state = build_state(&config).await?;

    // Drop stale multipart sessions in the background
    let tracker = Arc::clone(&state.multipart);
    let max_age = Duration::from_secs(config.multipart_expiry_secs);
    let period = Duration::from_secs((config.multipart_expiry_secs / 10).clamp(1, 600));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = tracker.cleanup_expired(max_age).await;
            if removed > 0 {
                info!("Dropped {} expired multipart upload(s)", removed);
            }
        }
    });

    let app = build_router(state);

    // Optional HTTPS listener alongside the plain one
    let secure = match config.secure_listen_addr {
        Some(addr) => {
            let rustls = build_rustls_config(config.tls.as_ref(), config.virtual_host.as_deref())
                .await?;
            let handle = axum_server::Handle::new();
            let server = axum_server::bind_rustls(addr, rustls)
                .handle(handle.clone())
                .serve(app.clone().into_make_service());
            info!("S3 gateway listening on https://{}", addr);
            Some((handle, tokio::spawn(server)))
        }
        None => None,
    };

    // Start server with graceful shutdown
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("S3 gateway listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some((handle, task)) = secure {
        handle.graceful_shutdown(Some(Duration::from_secs(10)));
        task.await??;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
