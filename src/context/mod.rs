//! Application contexts.
//!
//! # Data Flow
//! ```text
//! webapps/<name>/
//!     → manifest.rs (app.toml: handlers, session override, static files)
//!     → namespace.rs (core modules + the application's own modules)
//!     → context.rs ApplicationContext::start()
//!     → Running: route() strips the context path, dispatches, falls back
//!     → stop(): drain, destroy handlers, invalidate sessions, drop namespace
//! ```
//!
//! # Design Decisions
//! - State transitions are serialized per context; reads are lock-free
//! - A context runs at most once; redeploys build a fresh one

#[allow(clippy::module_inception)]
pub mod context;
pub mod lifecycle;
pub mod manifest;
pub mod namespace;

pub use context::{ApplicationContext, ContextSummary, DeployError, DrainSettings};
pub use lifecycle::LifecycleState;
pub use manifest::{AppManifest, ManifestError, MANIFEST_FILE};
pub use namespace::{ModuleCatalog, ModuleNamespace, ModuleRegistry, NamespaceError, CORE_PREFIX};
