//! Startup orchestration.
//!
//! # Responsibilities
//! - Bring subsystems up in dependency order
//! - Hand back a [`Container`] that owns every background task
//! - Tear everything down in reverse on shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::ContainerConfig;
use crate::context::ModuleCatalog;
use crate::deploy::Deployer;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError, PoolStats};
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to prepare deployment root {path}: {source}")]
    DeploymentRoot {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to bind admin API on {address}: {source}")]
    Admin {
        address: String,
        source: std::io::Error,
    },
}

/// A running container.
pub struct Container {
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    deployer: Arc<Deployer>,
    server: Arc<HttpServer>,
    shutdown: Shutdown,
    server_task: JoinHandle<()>,
    admin_task: Option<JoinHandle<()>>,
}

impl Container {
    /// Start serving `config` with handler modules from `catalog`.
    pub async fn start(config: ContainerConfig, catalog: ModuleCatalog) -> Result<Self, StartupError> {
        let started = Instant::now();

        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(_) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                ),
            }
        }

        let listener = Listener::bind(&config.listener).await?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        let root = &config.deployment.root;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| StartupError::DeploymentRoot {
                path: root.display().to_string(),
                source,
            })?;

        let deployer = Arc::new(Deployer::new(
            config.deployment.clone(),
            config.session.clone(),
            Arc::new(catalog),
        ));
        deployer.start().await;

        let shutdown = Shutdown::new();
        let server = Arc::new(HttpServer::new(&config, Arc::clone(&deployer)));
        let server_task = {
            let server = Arc::clone(&server);
            let stop = shutdown.subscribe();
            tokio::spawn(async move { server.run(listener, stop).await })
        };

        let mut admin_addr = None;
        let mut admin_task = None;
        if config.admin.enabled {
            let address = config.admin.bind_address.clone();
            let admin_listener = match tokio::net::TcpListener::bind(address.as_str()).await {
                Ok(listener) => listener,
                Err(source) => {
                    shutdown.trigger();
                    let _ = server_task.await;
                    deployer.stop().await;
                    return Err(StartupError::Admin { address, source });
                }
            };
            admin_addr = admin_listener.local_addr().ok();

            let router = setup_admin_router(AdminState {
                deployer: Arc::clone(&deployer),
                pool: Arc::clone(server.pool()),
                api_key: Arc::from(config.admin.api_key.as_str()),
                started,
            });
            let mut stop = shutdown.subscribe();
            admin_task = Some(tokio::spawn(async move {
                let served = axum::serve(admin_listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped with error");
                }
            }));
            tracing::info!(address = ?admin_addr, "Admin API listening");
        }

        tracing::info!(
            address = %local_addr,
            deployed = deployer.len(),
            elapsed = ?started.elapsed(),
            "Container started"
        );

        Ok(Self {
            local_addr,
            admin_addr,
            deployer,
            server,
            shutdown,
            server_task,
            admin_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn deployer(&self) -> &Arc<Deployer> {
        &self.deployer
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.server.pool_stats()
    }

    /// Serve until `signal` resolves, then shut down.
    pub async fn run_until(self, signal: impl Future<Output = ()>) {
        signal.await;
        self.shutdown().await;
    }

    /// Stop accepting, drain the pool, stop the admin API, undeploy everything.
    pub async fn shutdown(self) {
        tracing::info!("Container shutting down");
        self.shutdown.trigger();

        if let Err(e) = self.server_task.await {
            tracing::error!(error = %e, "HTTP server task failed");
        }
        if let Some(admin) = self.admin_task {
            if let Err(e) = admin.await {
                tracing::error!(error = %e, "Admin task failed");
            }
        }
        self.deployer.stop().await;
        tracing::info!("Shutdown complete");
    }
}
