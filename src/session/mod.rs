//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! Handler asks Exchange::session(create)
//!     → store.rs (id from JSESSIONID cookie, else jsessionid query parameter)
//!     → live session?      → refresh access time, return it
//!     → expired session?   → remove + invalidate, treat as absent
//!     → absent + create    → new UUID session, Set-Cookie on the response
//!
//! Background:
//!     sweeper task (every sweep_interval) → cleanup_expired()
//! ```
//!
//! # Design Decisions
//! - One store per application context; ids never cross contexts
//! - Lookup-and-refresh runs under the map's per-key entry lock
//! - Attribute values are `serde_json::Value` so stores can be inspected

#[allow(clippy::module_inception)]
pub mod session;
pub mod store;

pub use session::{Session, SessionError};
pub use store::{SessionStats, SessionStore, SessionSummary};
