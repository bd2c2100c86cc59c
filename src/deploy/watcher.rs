//! Deployment root watcher.
//!
//! Nudges the reconciler when application directories appear, vanish or
//! are renamed. The periodic scan stays authoritative; a lost event only
//! delays convergence until the next tick.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Watches the top level of the deployment root.
pub struct DeploymentWatcher {
    root: PathBuf,
    nudge_tx: mpsc::UnboundedSender<()>,
}

impl DeploymentWatcher {
    /// Returns the watcher and the receiver its nudges arrive on.
    pub fn new(root: &Path) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (nudge_tx, nudge_rx) = mpsc::unbounded_channel();
        (
            Self {
                root: root.to_path_buf(),
                nudge_tx,
            },
            nudge_rx,
        )
    }

    /// Start watching. Dropping the returned handle stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.nudge_tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if affects_listing(&event.kind) => {
                    tracing::debug!(paths = ?event.paths, kind = ?event.kind, "Deployment root changed");
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Deployment watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.root, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.root, "Deployment watcher started");
        Ok(watcher)
    }
}

fn affects_listing(kind: &EventKind) -> bool {
    kind.is_create() || kind.is_remove() || matches!(kind, EventKind::Modify(ModifyKind::Name(_)))
}
