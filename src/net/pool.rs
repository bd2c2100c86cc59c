//! Bounded worker pool with explicit rejection.
//!
//! # Responsibilities
//! - Keep `core_workers` workers pulling jobs from a bounded backlog
//! - Grow to `max_workers` when the backlog is full; extra workers retire when idle
//! - Hand the job back to the caller when neither has room
//!
//! # Design Decisions
//! - A job that triggers an overflow worker becomes that worker's first job
//! - A panicking job is logged and counted; the worker keeps running

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time;

use crate::config::WorkerConfig;
use crate::dispatch::registry::panic_message;

/// Sizing of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub backlog: usize,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl From<&WorkerConfig> for PoolConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            core_workers: config.core_workers,
            max_workers: config.max_workers.max(config.core_workers),
            backlog: config.backlog.max(1),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("backlog full and all workers busy")]
    Saturated,
    #[error("pool is shut down")]
    ShutDown,
}

/// A job the pool would not take, handed back to the submitter.
#[derive(Debug)]
pub struct Rejected<J> {
    pub job: J,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub core_workers: usize,
    pub max_workers: usize,
    pub live_workers: usize,
    pub busy_workers: usize,
    pub queued: usize,
    pub backlog: usize,
    pub submitted: u64,
    pub completed: u64,
    pub rejected: u64,
    pub panicked: u64,
}

type JobHandler<J> = Arc<dyn Fn(J) -> BoxFuture<'static, ()> + Send + Sync>;

struct Shared<J> {
    name: &'static str,
    config: PoolConfig,
    handler: JobHandler<J>,
    queue: tokio::sync::Mutex<mpsc::Receiver<J>>,
    live: AtomicUsize,
    busy: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl<J: Send + 'static> Shared<J> {
    async fn next_job(&self) -> Option<J> {
        self.queue.lock().await.recv().await
    }

    async fn run(&self, job: J) {
        self.busy.fetch_add(1, Ordering::SeqCst);
        let outcome = AssertUnwindSafe((self.handler)(job)).catch_unwind().await;
        self.busy.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::Relaxed);

        if let Err(panic) = outcome {
            self.panicked.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                pool = self.name,
                error = %panic_message(panic.as_ref()),
                "Job panicked"
            );
        }
    }
}

/// Fixed core plus elastic overflow workers over a bounded queue.
///
/// Must be created inside a tokio runtime; core workers start immediately.
pub struct WorkerPool<J> {
    shared: Arc<Shared<J>>,
    sender: Mutex<Option<mpsc::Sender<J>>>,
    submitted: AtomicU64,
    rejected: AtomicU64,
}

impl<J: Send + 'static> WorkerPool<J> {
    pub fn new<F, Fut>(name: &'static str, config: PoolConfig, handler: F) -> Self
    where
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.backlog.max(1));
        let handler: JobHandler<J> = Arc::new(move |job| handler(job).boxed());

        let shared = Arc::new(Shared {
            name,
            config,
            handler,
            queue: tokio::sync::Mutex::new(rx),
            live: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });

        for _ in 0..shared.config.core_workers {
            shared.live.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(run_worker(Arc::clone(&shared), None, false));
        }

        tracing::info!(
            pool = name,
            core_workers = shared.config.core_workers,
            max_workers = shared.config.max_workers,
            backlog = shared.config.backlog,
            "Worker pool started"
        );

        Self {
            shared,
            sender: Mutex::new(Some(tx)),
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Queue a job without waiting. Returns it back if there is no room.
    pub fn submit(&self, job: J) -> Result<(), Rejected<J>> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return Err(self.reject(job, RejectReason::ShutDown));
        };

        match tx.try_send(job) {
            Ok(()) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                if self.reserve_overflow_worker() {
                    self.submitted.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        pool = self.shared.name,
                        live = self.shared.live.load(Ordering::SeqCst),
                        "Backlog full, starting overflow worker"
                    );
                    tokio::spawn(run_worker(Arc::clone(&self.shared), Some(job), true));
                    Ok(())
                } else {
                    Err(self.reject(job, RejectReason::Saturated))
                }
            }
            Err(TrySendError::Closed(job)) => Err(self.reject(job, RejectReason::ShutDown)),
        }
    }

    fn reserve_overflow_worker(&self) -> bool {
        let max = self.shared.config.max_workers;
        self.shared
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| (live < max).then_some(live + 1))
            .is_ok()
    }

    fn reject(&self, job: J, reason: RejectReason) -> Rejected<J> {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        Rejected { job, reason }
    }

    pub fn stats(&self) -> PoolStats {
        let queued = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);

        PoolStats {
            core_workers: self.shared.config.core_workers,
            max_workers: self.shared.config.max_workers,
            live_workers: self.shared.live.load(Ordering::SeqCst),
            busy_workers: self.shared.busy.load(Ordering::SeqCst),
            queued,
            backlog: self.shared.config.backlog,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Close the queue and wait for workers to finish what is queued.
    ///
    /// Returns `false` if workers were still running at the deadline.
    pub async fn shutdown(&self) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let shared = Arc::clone(&self.shared);
        let drained = time::timeout(self.shared.config.shutdown_timeout, async move {
            while shared.live.load(Ordering::SeqCst) > 0 {
                time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .is_ok();

        if drained {
            tracing::info!(pool = self.shared.name, "Worker pool drained");
        } else {
            tracing::warn!(
                pool = self.shared.name,
                live = self.shared.live.load(Ordering::SeqCst),
                busy = self.shared.busy.load(Ordering::SeqCst),
                "Worker pool shutdown timed out"
            );
        }
        drained
    }
}

async fn run_worker<J: Send + 'static>(shared: Arc<Shared<J>>, first: Option<J>, overflow: bool) {
    if let Some(job) = first {
        shared.run(job).await;
    }

    loop {
        let next = if overflow {
            match time::timeout(shared.config.idle_timeout, shared.next_job()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::debug!(pool = shared.name, "Idle overflow worker retiring");
                    break;
                }
            }
        } else {
            shared.next_job().await
        };

        let Some(job) = next else {
            break;
        };
        shared.run(job).await;
    }

    shared.live.fetch_sub(1, Ordering::SeqCst);
}
