//! Handler dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Context-relative path (e.g. "/api/status")
//!     → pattern.rs (exact → longest prefix → longest suffix)
//!     → registry.rs (registration slot by name)
//!     → first use? create + init the singleton (once per registration)
//!     → handler.rs Handler::service(&mut Exchange)
//!     → error / panic → 500 with the failure message
//! ```
//!
//! # Design Decisions
//! - Handlers are trait objects built by named factories
//! - A registry belongs to exactly one application context
//! - Dispatch reports "no match" instead of writing a 404 so the context
//!   can fall back to its default handler

pub mod handler;
pub mod pattern;
pub mod registry;

pub use handler::{
    factory, ContextInfo, Exchange, Handler, HandlerConfig, HandlerError, HandlerFactory,
};
pub use pattern::{PatternMatch, PatternTable, UrlPattern};
pub use registry::{HandlerRegistration, HandlerRegistry, RegistrationSummary, RegistryError};
