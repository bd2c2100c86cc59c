//! Framework-level handler modules.
//!
//! # Data Flow
//! ```text
//! core_modules() → ModuleRegistry ("core.*" names)
//!     → ModuleCatalog::new(core)
//!     → every ModuleNamespace consults it before the app's own modules
//! ```
//!
//! # Design Decisions
//! - Core names share the `core.` prefix, which applications cannot claim
//! - Handlers answer JSON so they double as diagnostics endpoints

pub mod context_info;
pub mod session_info;
pub mod static_files;

pub use context_info::{ContextInfoReport, Echo};
pub use session_info::{SessionInfo, SessionStatsReport};
pub use static_files::StaticFiles;

use crate::context::ModuleRegistry;
use crate::dispatch::factory;

/// Registry of every built-in handler under its `core.` name.
pub fn core_modules() -> ModuleRegistry {
    ModuleRegistry::new()
        .with("core.static", factory(StaticFiles::default))
        .with("core.session-info", factory(|| SessionInfo))
        .with("core.session-stats", factory(|| SessionStatsReport))
        .with("core.context-info", factory(|| ContextInfoReport))
        .with("core.echo", factory(|| Echo))
}
