//! Handler contract and the per-request exchange handed to handlers.
//!
//! # Responsibilities
//! - Define the `Handler` lifecycle (`init` once, `service` per request, `destroy` once)
//! - Carry request, response, context and session access into `service`
//! - Name handler implementations through factories

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::http::{Request, Response, ResponseError};
use crate::session::{Session, SessionError, SessionStore};

/// Failure raised by a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Request-processing logic registered against a URL pattern.
///
/// One instance serves every request for its registration, so `service`
/// takes `&self` and any mutable state needs interior synchronisation.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Called once before the first request.
    async fn init(&mut self, _config: &HandlerConfig) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError>;

    /// Called once when the owning application is undeployed.
    async fn destroy(&self) {}
}

/// Named constructor for a handler implementation.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

/// Wrap a constructor closure as a [`HandlerFactory`].
pub fn factory<H, F>(make: F) -> HandlerFactory
where
    H: Handler + 'static,
    F: Fn() -> H + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()) as Box<dyn Handler>)
}

/// Identity of the application a handler runs in.
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub app_name: String,
    pub context_path: String,
    pub directory: PathBuf,
}

/// Configuration passed to [`Handler::init`].
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub handler_name: String,
    pub context: ContextInfo,
    pub params: HashMap<String, String>,
}

impl HandlerConfig {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn directory(&self) -> &Path {
        &self.context.directory
    }
}

/// Everything a handler sees while serving one request.
pub struct Exchange<'a> {
    request: &'a Request,
    response: &'a mut Response,
    context: &'a ContextInfo,
    sessions: &'a SessionStore,
    relative_path: &'a str,
    handler_name: Option<String>,
    handler_path: String,
    residual_path: Option<String>,
    session: Option<Arc<Session>>,
}

impl<'a> Exchange<'a> {
    pub fn new(
        request: &'a Request,
        response: &'a mut Response,
        context: &'a ContextInfo,
        sessions: &'a SessionStore,
        relative_path: &'a str,
    ) -> Self {
        Self {
            request,
            response,
            context,
            sessions,
            relative_path,
            handler_name: None,
            handler_path: relative_path.to_string(),
            residual_path: None,
            session: None,
        }
    }

    pub(crate) fn set_match(&mut self, name: &str, handler_path: String, residual: Option<String>) {
        self.handler_name = Some(name.to_string());
        self.handler_path = handler_path;
        self.residual_path = residual;
    }

    pub fn request(&self) -> &Request {
        self.request
    }

    pub fn response(&mut self) -> &mut Response {
        &mut *self.response
    }

    pub fn context(&self) -> &ContextInfo {
        self.context
    }

    pub fn context_path(&self) -> &str {
        &self.context.context_path
    }

    /// Request path with the context path removed (`/` at minimum).
    pub fn relative_path(&self) -> &str {
        self.relative_path
    }

    /// Registration name that matched, if dispatched through the registry.
    pub fn handler_name(&self) -> Option<&str> {
        self.handler_name.as_deref()
    }

    /// Part of the relative path consumed by the matching pattern.
    pub fn handler_path(&self) -> &str {
        &self.handler_path
    }

    /// Remainder of the path beyond a prefix pattern.
    pub fn residual_path(&self) -> Option<&str> {
        self.residual_path.as_deref()
    }

    pub fn sessions(&self) -> &SessionStore {
        self.sessions
    }

    /// The caller's session, created when `create` is set.
    ///
    /// The session resolved first is reused for the rest of the request, so
    /// at most one session is created and bound per request.
    pub fn session(&mut self, create: bool) -> Result<Option<Arc<Session>>, SessionError> {
        if let Some(session) = &self.session {
            if session.is_valid() {
                return Ok(Some(Arc::clone(session)));
            }
        }

        let session = self.sessions.get_session(self.request, &mut *self.response, create)?;
        self.session = session.clone();
        Ok(session)
    }
}
