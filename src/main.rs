//! Application container.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────────┐
//!                 │                     APPLICATION CONTAINER                     │
//!                 │                                                               │
//!   Client ──────▶│  net::Listener ──▶ net::WorkerPool ──▶ http::transport        │
//!                 │                    (backlog full ⇒ 503)        │              │
//!                 │                                                ▼              │
//!                 │                                   deploy::Deployer::route     │
//!                 │                                   (longest context path)      │
//!                 │                                                │              │
//!                 │                                                ▼              │
//!                 │                     context::ApplicationContext::route        │
//!                 │                       │                  │                    │
//!                 │                       ▼                  ▼                    │
//!                 │          dispatch::HandlerRegistry   session::SessionStore    │
//!                 │          (exact > prefix > suffix)   (JSESSIONID, sweeper)    │
//!                 │                                                               │
//!   webapps/ ────▶│  deploy reconciler (interval + notify) ──▶ start()/stop()     │
//!                 │                                                               │
//!                 │  admin API (axum) · metrics (Prometheus) · tracing            │
//!                 └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use app_container::config::{load_config, validation::validate_config, ConfigError, ContainerConfig};
use app_container::context::ModuleCatalog;
use app_container::lifecycle::{shutdown_signal, Container};
use app_container::modules::core_modules;
use app_container::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "app-container")]
#[command(about = "Minimal application server with hot deployment", long_about = None)]
struct Args {
    /// TOML configuration file; defaults apply without it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deployment root, overriding `deployment.root`
    #[arg(long)]
    webapps: Option<PathBuf>,

    /// Listen address, overriding `listener.bind_address`
    #[arg(long)]
    bind: Option<String>,
}

fn resolve_config(args: &Args) -> Result<ContainerConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ContainerConfig::default(),
    };
    if let Some(root) = &args.webapps {
        config.deployment.root = root.clone();
    }
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    init_logging(&config.observability)?;
    tracing::info!("app-container v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        webapps = ?config.deployment.root,
        core_workers = config.workers.core_workers,
        max_workers = config.workers.max_workers,
        backlog = config.workers.backlog,
        "Configuration loaded"
    );

    let container = Container::start(config, ModuleCatalog::new(core_modules())).await?;
    container.run_until(shutdown_signal()).await;
    Ok(())
}
