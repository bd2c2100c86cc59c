//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection (from the worker pool)
//!     → transport.rs (hyper http1: parse, keep-alive, header timeout)
//!     → request.rs (Request: path, query parameters, headers, cookies)
//!     → Deployer::route → context → handler mutates response.rs (Response)
//!     → transport.rs serialises status, headers, Set-Cookie, body
//! ```
//!
//! `server.rs` owns the accept loop and the pool that feeds the transport.

pub mod cookie;
pub mod request;
pub mod response;
pub mod server;
pub mod transport;

pub use cookie::Cookie;
pub use request::{Request, RequestBuilder};
pub use response::{reason_phrase, Response, ResponseError, ResponseParts};
pub use server::HttpServer;
