//! Static file serving.
//!
//! # Responsibilities
//! - Map a request path to a file below the configured root
//! - Pick a content type from the file extension
//! - Refuse paths escaping the root (403)

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::dispatch::{Exchange, Handler, HandlerConfig, HandlerError};

/// Serves files from a directory. Used as the default handler of each
/// application and available to manifests as `core.static`.
#[derive(Debug, Default)]
pub struct StaticFiles {
    root: Option<PathBuf>,
}

impl StaticFiles {
    pub fn serving(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn init(&mut self, config: &HandlerConfig) -> Result<(), HandlerError> {
        if self.root.is_none() {
            let dir = config.param("dir").unwrap_or("static");
            self.root = Some(config.directory().join(dir));
        }
        Ok(())
    }

    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
        let Some(root) = &self.root else {
            return Err(HandlerError::msg("static file root not configured"));
        };

        let requested = exchange
            .residual_path()
            .unwrap_or_else(|| exchange.relative_path())
            .to_string();

        let Some(relative) = sanitize(&requested) else {
            tracing::warn!(path = %requested, "Rejected static path");
            exchange.response().send_error(403, "Forbidden")?;
            return Ok(());
        };

        let candidate = root.join(relative);
        let file = match tokio::fs::canonicalize(&candidate).await {
            Ok(file) => file,
            Err(_) => {
                exchange
                    .response()
                    .send_error(404, &format!("{} not found", requested))?;
                return Ok(());
            }
        };

        // Symlinks may still point outside the root.
        if let Ok(canonical_root) = tokio::fs::canonicalize(root).await {
            if !file.starts_with(&canonical_root) {
                exchange.response().send_error(403, "Forbidden")?;
                return Ok(());
            }
        }

        if !tokio::fs::metadata(&file).await.map(|m| m.is_file()).unwrap_or(false) {
            exchange
                .response()
                .send_error(404, &format!("{} not found", requested))?;
            return Ok(());
        }

        let bytes = tokio::fs::read(&file).await?;
        let response = exchange.response();
        response.set_content_type(content_type(&file))?;
        response.write(&bytes)?;
        Ok(())
    }
}

/// Relative file path for a request path, or `None` if it tries to climb out.
fn sanitize(path: &str) -> Option<PathBuf> {
    if path.contains('\\') || path.contains('\0') {
        return None;
    }

    let trimmed = path.trim_start_matches('/');
    let trimmed = if trimmed.is_empty() || trimmed.ends_with('/') {
        format!("{}index.html", trimmed)
    } else {
        trimmed.to_string()
    };

    let mut relative = PathBuf::new();
    for component in Path::new(&trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(relative)
}

pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::dispatch::ContextInfo;
    use crate::http::{Request, Response};
    use crate::session::SessionStore;

    #[test]
    fn sanitize_rejects_traversal() {
        assert_eq!(sanitize("/"), Some(PathBuf::from("index.html")));
        assert_eq!(sanitize("/docs/"), Some(PathBuf::from("docs/index.html")));
        assert_eq!(sanitize("/a/./b.css"), Some(PathBuf::from("a/b.css")));
        assert_eq!(sanitize("/../etc/passwd"), None);
        assert_eq!(sanitize("/a/../../b"), None);
        assert_eq!(sanitize("/a\\..\\b"), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Path::new("a/index.HTML")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("logo.png")), "image/png");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }

    async fn serve(root: &Path, target: &str) -> Response {
        let handler = StaticFiles::serving(root);
        let store = SessionStore::new("", SessionConfig::default());
        let ctx = ContextInfo {
            app_name: "ROOT".into(),
            context_path: String::new(),
            directory: root.to_path_buf(),
        };
        let request = Request::builder("GET", target).build();
        let path = request.path().to_string();
        let mut response = Response::new();
        {
            let mut exchange = Exchange::new(&request, &mut response, &ctx, &store, &path);
            handler.service(&mut exchange).await.unwrap();
        }
        response
    }

    #[tokio::test]
    async fn serves_index_and_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("app.css"), "body{}").unwrap();

        let index = serve(dir.path(), "/").await;
        assert_eq!(index.status(), 200);
        assert_eq!(index.body(), b"<h1>home</h1>");
        assert_eq!(index.header("content-type"), Some("text/html; charset=utf-8"));

        let css = serve(dir.path(), "/app.css").await;
        assert_eq!(css.header("content-type"), Some("text/css; charset=utf-8"));
    }

    #[tokio::test]
    async fn missing_and_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        assert_eq!(serve(dir.path(), "/nope.txt").await.status(), 404);
        assert_eq!(serve(dir.path(), "/sub").await.status(), 404);
        assert_eq!(serve(dir.path(), "/../secret").await.status(), 403);
    }
}
