//! Outbound response builder.
//!
//! # Responsibilities
//! - Accumulate status, headers, cookies and body for one request
//! - Enforce commit-once semantics
//! - Produce the standard error and redirect responses
//!
//! # Design Decisions
//! - Every mutator fails with `ResponseError::Committed` after commit,
//!   so late writes surface as errors instead of being silently lost
//! - Headers keep insertion order and allow duplicates

use crate::http::cookie::Cookie;

/// Errors raised by response mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("response already committed")]
    Committed,
    #[error("invalid status code {0}")]
    InvalidStatus(u16),
}

/// A mutable, commit-once HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    reason: Option<String>,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    body: Vec<u8>,
    committed: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            reason: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: Vec::new(),
            committed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), ResponseError> {
        if self.committed {
            Err(ResponseError::Committed)
        } else {
            Ok(())
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase: the custom one if set, otherwise the standard phrase.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| reason_phrase(self.status))
    }

    pub fn has_custom_reason(&self) -> bool {
        self.reason.is_some()
    }

    pub fn set_status(&mut self, status: u16) -> Result<(), ResponseError> {
        self.ensure_open()?;
        if !(100..=999).contains(&status) {
            return Err(ResponseError::InvalidStatus(status));
        }
        self.status = status;
        self.reason = None;
        Ok(())
    }

    pub fn set_status_with_reason(
        &mut self,
        status: u16,
        reason: impl Into<String>,
    ) -> Result<(), ResponseError> {
        self.set_status(status)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    /// Replace every header with this name by a single value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
        Ok(())
    }

    /// Append a header, keeping any existing values.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.headers.push((name.to_string(), value.into()));
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn set_content_type(&mut self, content_type: &str) -> Result<(), ResponseError> {
        self.set_header("Content-Type", content_type)
    }

    /// Queue a `Set-Cookie` directive.
    pub fn add_cookie(&mut self, cookie: Cookie) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.cookies.push(cookie);
        Ok(())
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.body.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_str(&mut self, text: &str) -> Result<(), ResponseError> {
        self.write(text.as_bytes())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Discard the buffered body.
    pub fn reset_body(&mut self) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.body.clear();
        Ok(())
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Freeze the response. Committing twice is harmless.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    /// Replace the body with an HTML error page and commit.
    pub fn send_error(&mut self, status: u16, message: &str) -> Result<(), ResponseError> {
        self.set_status(status)?;
        self.body.clear();
        let page = error_page(status, message);
        self.set_content_type("text/html; charset=utf-8")?;
        self.body.extend_from_slice(page.as_bytes());
        self.committed = true;
        Ok(())
    }

    /// Temporary redirect (302) to `location`, committed.
    pub fn send_redirect(&mut self, location: &str) -> Result<(), ResponseError> {
        self.set_status(302)?;
        self.body.clear();
        self.set_header("Location", location)?;
        self.committed = true;
        Ok(())
    }

    /// Split into the parts the transport serialises.
    pub fn into_parts(self) -> ResponseParts {
        ResponseParts {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            cookies: self.cookies,
            body: self.body,
        }
    }
}

/// Owned pieces of a finished response.
#[derive(Debug)]
pub struct ResponseParts {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<Cookie>,
    pub body: Vec<u8>,
}

/// Standard reason phrase for a status code.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn error_page(status: u16, message: &str) -> String {
    let reason = reason_phrase(status);
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{status} {reason}</title></head>\n\
         <body>\n<h1>{status} {reason}</h1>\n<p>{}</p>\n</body>\n</html>\n",
        escape_html(message)
    )
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
