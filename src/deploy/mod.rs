//! Hot deployment subsystem.
//!
//! # Data Flow
//! ```text
//! webapps/ listing (interval tick or watcher nudge)
//!     → deployer.rs reconcile(): one pass at a time
//!         new directory      → ApplicationContext::start()
//!         vanished directory → ApplicationContext::stop()
//!     → context map (context path → context)
//!
//! Request path
//!     → deployer.rs route(): longest running context prefix, root last
//! ```
//!
//! # Design Decisions
//! - Failures stay with the application that caused them
//! - A directory that fails to deploy is retried on every pass
//! - An unreadable root skips the pass rather than undeploying everything

pub mod deployer;
pub mod watcher;

pub use deployer::{DeploymentStats, Deployer, ReconcileReport};
pub use watcher::DeploymentWatcher;
