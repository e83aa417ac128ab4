use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tg_domain::config::Config;
use tg_gateway::cli::{Cli, Command, ConfigCommand};
use tg_gateway::{bootstrap, runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = tg_gateway::cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config { command }) => {
            let config = tg_gateway::cli::load_config(&cli.config)?;
            match command {
                ConfigCommand::Validate => {
                    println!("config ok: {}", cli.config.display());
                    Ok(())
                }
                ConfigCommand::Show => {
                    println!("{}", toml::to_string_pretty(&config)?);
                    Ok(())
                }
            }
        }
        Some(Command::Version) => {
            println!("tradegate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON logs, `RUST_LOG`-filterable.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tg_gateway=debug"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config.clone()).await?;

    // Worker loops share the state; their handle drives the drain on
    // shutdown.
    let worker = if config.worker.enabled {
        Some(runtime::worker::start(state.clone()))
    } else {
        tracing::info!("worker disabled, serving API only");
        None
    };

    let app = bootstrap::build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!(addr = %addr, "tradegate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Stop accepting new dequeues; in-flight tasks drain naturally.
    if let Some(worker) = worker {
        tracing::info!("draining worker loops");
        worker.shutdown().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "shutdown signal listener failed");
    }
    tracing::info!("shutdown signal received");
}
