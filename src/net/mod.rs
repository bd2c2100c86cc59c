//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop)
//!     → connection.rs (id, live-connection tracking)
//!     → pool.rs (bounded backlog; full ⇒ rejected with 503)
//!     → worker hands the socket to the HTTP transport
//! ```
//!
//! # Design Decisions
//! - Backpressure is explicit: a saturated pool refuses, it never queues unboundedly
//! - Each connection is tracked until its guard drops

pub mod connection;
pub mod listener;
pub mod pool;

pub use connection::{Connection, ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use pool::{PoolConfig, PoolStats, RejectReason, Rejected, WorkerPool};
