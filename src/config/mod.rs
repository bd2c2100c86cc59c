//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! container.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ContainerConfig (validated, immutable)
//!     → sections cloned into each subsystem at startup
//!
//! Per application:
//!     <app dir>/app.toml → context::manifest (handlers, session overrides)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, ContainerConfig, DeploymentConfig, DrainPolicy, HttpConfig, ListenerConfig,
    ObservabilityConfig, SessionConfig, WorkerConfig,
};
