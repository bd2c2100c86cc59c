//! HTTP server: the connection processor.
//!
//! # Responsibilities
//! - Accept connections and submit them to the worker pool
//! - Answer `503` on the spot when the pool refuses a connection
//! - Close the pool on shutdown and wait for in-flight connections

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};

use crate::config::ContainerConfig;
use crate::deploy::Deployer;
use crate::http::transport;
use crate::net::{Connection, ConnectionTracker, Listener, PoolConfig, PoolStats, Rejected, WorkerPool};
use crate::observability::metrics;

const SERVICE_UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Length: 20\r\n\
Connection: close\r\n\
\r\n\
Server is too busy.\n";

/// Accept loop plus the worker pool serving accepted connections.
pub struct HttpServer {
    pool: Arc<WorkerPool<Connection>>,
    tracker: ConnectionTracker,
    draining: watch::Sender<bool>,
}

impl HttpServer {
    /// Must be called inside a tokio runtime; the pool's workers start here.
    pub fn new(config: &ContainerConfig, deployer: Arc<Deployer>) -> Self {
        let http = config.http.clone();
        let (draining, drain_rx) = watch::channel(false);
        let pool = WorkerPool::new("http", PoolConfig::from(&config.workers), move |connection| {
            transport::serve_connection(connection, Arc::clone(&deployer), http.clone(), drain_rx.clone())
        });

        Self {
            pool: Arc::new(pool),
            tracker: ConnectionTracker::new(),
            draining,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool<Connection>> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Accept until `shutdown` fires, then drain the pool.
    pub async fn run(&self, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "HTTP server starting");
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.submit(Connection::new(stream, peer, self.tracker.track())),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        drop(listener);
        self.draining.send_replace(true);
        tracing::info!(active = self.tracker.active_count(), "HTTP server draining");
        self.pool.shutdown().await;
        tracing::info!("HTTP server stopped");
    }

    fn submit(&self, connection: Connection) {
        if let Err(Rejected { job, reason }) = self.pool.submit(connection) {
            metrics::record_connection_rejected();
            tracing::warn!(
                connection_id = %job.id(),
                peer_addr = %job.peer,
                reason = %reason,
                "Connection rejected"
            );
            let (stream, _, _guard) = job.into_parts();
            reject(&stream);
        }
    }
}

/// Best-effort 503 without waiting on the socket; the stream closes on drop.
fn reject(stream: &TcpStream) {
    match stream.try_write(SERVICE_UNAVAILABLE) {
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "Could not write 503 to rejected connection"),
    }
}
