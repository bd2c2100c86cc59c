//! Minimal application server library.
//!
//! Requests are routed to a deployed application by context path, then to a
//! handler by URL pattern. Each application owns its handler singletons,
//! sessions and module namespace, and is deployed or undeployed as its
//! directory appears in or disappears from the deployment root.

// Request path
pub mod dispatch;
pub mod http;
pub mod net;
pub mod session;

// Applications and deployment
pub mod context;
pub mod deploy;
pub mod modules;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::ContainerConfig;
pub use context::{ApplicationContext, ModuleCatalog, ModuleRegistry};
pub use deploy::Deployer;
pub use dispatch::{factory, Exchange, Handler, HandlerConfig, HandlerError};
pub use http::{HttpServer, Request, Response};
pub use lifecycle::{Container, Shutdown};
