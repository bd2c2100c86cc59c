//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Metrics → bind listener → deploy webapps → worker pool + accept loop → admin API
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → drain pool → undeploy every context
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - The listener binds before anything deploys, so a taken port fails fast
//! - Shutdown is bounded by the pool's shutdown timeout

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{Container, StartupError};
