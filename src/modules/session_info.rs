//! Session inspection handlers.
//!
//! # Responsibilities
//! - `SessionInfo`: show and edit the caller's own session
//! - `SessionStatsReport`: store-wide counts, with an on-demand sweep

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::dispatch::{Exchange, Handler, HandlerError};

/// JSON view of the caller's session.
///
/// Query actions: `action=set&key=k&value=v`, `action=remove&key=k`,
/// `action=invalidate` (starts a fresh session). Every call bumps `visitCount`.
#[derive(Debug, Default)]
pub struct SessionInfo;

#[async_trait]
impl Handler for SessionInfo {
    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
        let request = exchange.request();
        let action = request.parameter("action").map(str::to_string);
        let key = request.parameter("key").map(str::to_string);
        let value = request.parameter("value").map(str::to_string);

        let mut session = exchange
            .session(true)?
            .ok_or_else(|| HandlerError::msg("session could not be created"))?;

        match (action.as_deref(), key, value) {
            (Some("set"), Some(key), Some(value)) => session.set_attribute(&key, Value::String(value))?,
            (Some("remove"), Some(key), _) => {
                session.remove_attribute(&key)?;
            }
            (Some("invalidate"), _, _) => {
                session.invalidate()?;
                session = exchange
                    .session(true)?
                    .ok_or_else(|| HandlerError::msg("session could not be created"))?;
            }
            _ => {}
        }

        let visits = session.get::<u64>("visitCount")?.unwrap_or(0) + 1;
        session.set("visitCount", visits)?;

        let mut attributes = serde_json::Map::new();
        for name in session.attribute_names()? {
            if let Some(value) = session.attribute(&name)? {
                attributes.insert(name, value);
            }
        }

        let body = json!({
            "id": session.id(),
            "new": session.is_new()?,
            "maxInactiveInterval": session.max_inactive_interval(),
            "attributes": attributes,
        });

        let response = exchange.response();
        response.set_content_type("application/json")?;
        response.write(&serde_json::to_vec_pretty(&body)?)?;
        Ok(())
    }
}

/// Counts for the application's session store. `?action=cleanup` sweeps first.
#[derive(Debug, Default)]
pub struct SessionStatsReport;

#[async_trait]
impl Handler for SessionStatsReport {
    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
        let removed = if exchange.request().parameter("action") == Some("cleanup") {
            Some(exchange.sessions().cleanup_expired())
        } else {
            None
        };

        let body = json!({
            "context": exchange.context_path(),
            "stats": exchange.sessions().stats(),
            "removed": removed,
            "sessions": exchange.sessions().summaries(),
        });

        let response = exchange.response();
        response.set_content_type("application/json")?;
        response.write(&serde_json::to_vec_pretty(&body)?)?;
        Ok(())
    }
}
