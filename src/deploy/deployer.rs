//! Reconciles the deployment root against the running contexts.
//!
//! # Responsibilities
//! - Map directory names to context paths (`ROOT` → `""`, `shop` → `/shop`)
//! - Deploy new directories, undeploy vanished ones, one pass at a time
//! - Route each request to the longest matching running context

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use notify::RecommendedWatcher;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::{DeploymentConfig, SessionConfig};
use crate::context::{ApplicationContext, ContextSummary, DrainSettings, LifecycleState};
use crate::deploy::watcher::DeploymentWatcher;
use crate::dispatch::registry::panic_message;
use crate::http::{Request, Response};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Quiet period after a watch event before reconciling.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Outcome of one reconciliation pass, by context path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub deployed: Vec<String>,
    pub undeployed: Vec<String>,
    pub failed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.deployed.is_empty() && self.undeployed.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStats {
    pub root: String,
    pub deployed: usize,
    pub deployed_total: u64,
    pub undeployed_total: u64,
    pub failed_total: u64,
    pub reconciliations: u64,
    pub contexts: BTreeMap<String, LifecycleState>,
}

struct Reconciler {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

/// Owns every application context of the container.
pub struct Deployer {
    config: DeploymentConfig,
    sessions: SessionConfig,
    catalog: Arc<crate::context::ModuleCatalog>,
    contexts: DashMap<String, Arc<ApplicationContext>>,
    reconcile_lock: tokio::sync::Mutex<()>,
    reconciler: Mutex<Option<Reconciler>>,
    stopped: AtomicBool,
    deployed_total: AtomicU64,
    undeployed_total: AtomicU64,
    failed_total: AtomicU64,
    reconciliations: AtomicU64,
}

impl Deployer {
    pub fn new(
        config: DeploymentConfig,
        sessions: SessionConfig,
        catalog: Arc<crate::context::ModuleCatalog>,
    ) -> Self {
        Self {
            config,
            sessions,
            catalog,
            contexts: DashMap::new(),
            reconcile_lock: tokio::sync::Mutex::new(()),
            reconciler: Mutex::new(None),
            stopped: AtomicBool::new(false),
            deployed_total: AtomicU64::new(0),
            undeployed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            reconciliations: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Context path served by the application in directory `name`.
    pub fn context_path_for(&self, name: &str) -> String {
        if name == self.config.root_app_name {
            String::new()
        } else {
            format!("/{}", name)
        }
    }

    /// Reconcile once, then keep reconciling in the background.
    pub async fn start(self: &Arc<Self>) {
        self.reconcile().await;

        let mut slot = self.reconciler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let (watcher, nudges) = if self.config.watch {
            let (watcher, nudges) = DeploymentWatcher::new(&self.config.root);
            match watcher.run() {
                Ok(watcher) => (Some(watcher), Some(nudges)),
                Err(e) => {
                    tracing::warn!(
                        root = ?self.config.root,
                        error = %e,
                        "Deployment watcher unavailable, relying on periodic scan"
                    );
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let shutdown = Shutdown::new();
        let period = Duration::from_secs(self.config.scan_interval_secs.max(1));
        let handle = tokio::spawn(run_reconciler(
            Arc::downgrade(self),
            period,
            shutdown.subscribe(),
            nudges,
            watcher,
        ));
        *slot = Some(Reconciler { shutdown, handle });

        tracing::info!(
            root = ?self.config.root,
            interval = ?period,
            watch = self.config.watch,
            "Deployer started"
        );
    }

    /// Run a reconciliation pass now, waiting for any pass already running.
    pub async fn reconcile_now(&self) -> ReconcileReport {
        self.reconcile().await
    }

    async fn reconcile(&self) -> ReconcileReport {
        let _pass = self.reconcile_lock.lock().await;
        let mut report = ReconcileReport::default();
        if self.stopped.load(Ordering::SeqCst) {
            return report;
        }
        self.reconciliations.fetch_add(1, Ordering::Relaxed);

        let listing = match self.scan().await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(
                    root = ?self.config.root,
                    error = %e,
                    "Cannot list deployment root, skipping pass"
                );
                return report;
            }
        };

        let vanished: Vec<Arc<ApplicationContext>> = self
            .contexts
            .iter()
            .filter(|entry| !listing.contains_key(entry.key()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for context in vanished {
            self.undeploy(&context).await;
            report.undeployed.push(context.context_path().to_string());
        }

        for (context_path, (name, directory)) in listing {
            if self.contexts.contains_key(&context_path) {
                continue;
            }
            if self.deploy(name, context_path.clone(), directory).await {
                report.deployed.push(context_path);
            } else {
                report.failed.push(context_path);
            }
        }

        if !report.is_empty() {
            tracing::info!(
                deployed = ?report.deployed,
                undeployed = ?report.undeployed,
                failed = ?report.failed,
                "Reconciliation pass finished"
            );
        }
        report
    }

    /// Application directories keyed by context path.
    async fn scan(&self) -> std::io::Result<HashMap<String, (String, PathBuf)>> {
        let mut listing = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.config.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(path = ?entry.path(), "Skipping non UTF-8 application directory");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            listing.insert(self.context_path_for(&name), (name, entry.path()));
        }
        Ok(listing)
    }

    async fn deploy(&self, name: String, context_path: String, directory: PathBuf) -> bool {
        let context = Arc::new(ApplicationContext::new(
            name,
            context_path.clone(),
            directory,
            Arc::clone(&self.catalog),
            self.sessions.clone(),
            DrainSettings {
                policy: self.config.drain,
                timeout: Duration::from_secs(self.config.drain_timeout_secs),
            },
        ));

        let failure = match AssertUnwindSafe(context.start()).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };

        match failure {
            None => {
                self.contexts.insert(context_path.clone(), context);
                self.deployed_total.fetch_add(1, Ordering::Relaxed);
                metrics::record_deployment("deployed");
                tracing::info!(context_path = %context_path, "Application deployed");
                true
            }
            Some(reason) => {
                self.failed_total.fetch_add(1, Ordering::Relaxed);
                metrics::record_deployment("failed");
                tracing::error!(context_path = %context_path, error = %reason, "Deployment failed");
                false
            }
        }
    }

    async fn undeploy(&self, context: &Arc<ApplicationContext>) {
        let context_path = context.context_path().to_string();
        self.contexts
            .remove_if(&context_path, |_, current| Arc::ptr_eq(current, context));

        match AssertUnwindSafe(context.stop()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(context_path = %context_path, error = %e, "Undeploy failed");
            }
            Err(panic) => {
                tracing::error!(
                    context_path = %context_path,
                    error = %panic_message(panic.as_ref()),
                    "Undeploy panicked"
                );
            }
        }

        self.undeployed_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_deployment("undeployed");
        tracing::info!(context_path = %context_path, "Application undeployed");
    }

    /// The running context owning `path`: longest matching prefix, root last.
    pub fn resolve(&self, path: &str) -> Option<Arc<ApplicationContext>> {
        self.contexts
            .iter()
            .filter(|entry| entry.value().state() == LifecycleState::Running)
            .filter(|entry| entry.value().relative_path(path).is_some())
            .max_by_key(|entry| entry.key().len())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Hand the request to its context. `false` means nothing served it.
    pub async fn route(&self, request: &Request, response: &mut Response) -> bool {
        let start = std::time::Instant::now();
        let Some(context) = self.resolve(request.path()) else {
            return false;
        };

        let handled = context.route(request, response).await;
        if handled {
            let label = match context.context_path() {
                "" => "/",
                path => path,
            };
            metrics::record_request(label, response.status(), start);
        }
        handled
    }

    /// Stop the background task and undeploy everything.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let reconciler = self
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reconciler) = reconciler {
            reconciler.shutdown.trigger();
            if let Err(e) = reconciler.handle.await {
                if e.is_panic() {
                    tracing::error!("Reconciler task panicked");
                }
            }
        }

        let _pass = self.reconcile_lock.lock().await;
        let running: Vec<Arc<ApplicationContext>> =
            self.contexts.iter().map(|e| Arc::clone(e.value())).collect();
        for context in running {
            self.undeploy(&context).await;
        }
        tracing::info!("Deployer stopped");
    }

    pub fn context(&self, context_path: &str) -> Option<Arc<ApplicationContext>> {
        self.contexts.get(context_path).map(|e| Arc::clone(e.value()))
    }

    /// Look a context up by application (directory) name.
    pub fn context_by_name(&self, name: &str) -> Option<Arc<ApplicationContext>> {
        self.context(&self.context_path_for(name))
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn contexts(&self) -> Vec<ContextSummary> {
        let running: Vec<Arc<ApplicationContext>> =
            self.contexts.iter().map(|e| Arc::clone(e.value())).collect();
        let mut summaries: Vec<ContextSummary> = running.iter().map(|c| c.summary()).collect();
        summaries.sort_by(|a, b| a.context_path.cmp(&b.context_path));
        summaries
    }

    pub fn stats(&self) -> DeploymentStats {
        DeploymentStats {
            root: self.config.root.display().to_string(),
            deployed: self.contexts.len(),
            deployed_total: self.deployed_total.load(Ordering::Relaxed),
            undeployed_total: self.undeployed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
            contexts: self
                .contexts
                .iter()
                .map(|e| (e.key().clone(), e.value().state()))
                .collect(),
        }
    }
}

async fn next_nudge(nudges: &mut Option<mpsc::UnboundedReceiver<()>>) -> Option<()> {
    match nudges {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_reconciler(
    deployer: Weak<Deployer>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut nudges: Option<mpsc::UnboundedReceiver<()>>,
    _watcher: Option<RecommendedWatcher>,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
            nudge = next_nudge(&mut nudges) => {
                if nudge.is_none() {
                    nudges = None;
                    continue;
                }
                time::sleep(WATCH_DEBOUNCE).await;
                if let Some(rx) = nudges.as_mut() {
                    while rx.try_recv().is_ok() {}
                }
            }
        }

        let Some(deployer) = deployer.upgrade() else {
            break;
        };
        deployer.reconcile().await;
    }

    tracing::debug!("Reconciler stopped");
}
