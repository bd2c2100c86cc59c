//! Request and context introspection handlers.

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::{Exchange, Handler, HandlerError};

/// Describes the application and how the request was routed to it.
#[derive(Debug, Default)]
pub struct ContextInfoReport;

#[async_trait]
impl Handler for ContextInfoReport {
    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
        let context = exchange.context();
        let body = json!({
            "application": context.app_name,
            "contextPath": context.context_path,
            "directory": context.directory.display().to_string(),
            "requestPath": exchange.request().path(),
            "relativePath": exchange.relative_path(),
            "handler": exchange.handler_name(),
            "handlerPath": exchange.handler_path(),
            "residualPath": exchange.residual_path(),
        });

        let response = exchange.response();
        response.set_content_type("application/json")?;
        response.write(&serde_json::to_vec_pretty(&body)?)?;
        Ok(())
    }
}

/// Echoes method, path, parameters and selected headers back as JSON.
#[derive(Debug, Default)]
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
        let request = exchange.request();
        let mut parameters = serde_json::Map::new();
        for name in request.parameter_names() {
            parameters.insert(name.to_string(), json!(request.parameter_values(name)));
        }
        let body = json!({
            "method": request.method(),
            "path": request.path(),
            "query": request.query_string(),
            "parameters": parameters,
            "userAgent": request.header("user-agent"),
        });

        let response = exchange.response();
        response.set_content_type("application/json")?;
        response.write(&serde_json::to_vec_pretty(&body)?)?;
        Ok(())
    }
}
