//! Inbound request view.
//!
//! # Responsibilities
//! - Hold the parsed request line, headers, query parameters and cookies
//! - Answer the accessors dispatch and handlers need
//!
//! # Design Decisions
//! - Immutable once built; the transport builds one per request
//! - Header names are stored lower-cased, last write wins
//! - Query parameters keep their arrival order and allow repeats

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::http::cookie::Cookie;

/// A parsed HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    path: String,
    query_string: Option<String>,
    protocol: String,
    headers: HashMap<String, String>,
    parameters: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Start building a request from its method and request target (`/path?query`).
    pub fn builder(method: impl Into<String>, target: &str) -> RequestBuilder {
        RequestBuilder::new(method, target)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// First value of a query parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a query parameter, in arrival order.
    pub fn parameter_values(&self, name: &str) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Distinct parameter names in first-seen order.
    pub fn parameter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (k, _) in &self.parameters {
            if !names.contains(&k.as_str()) {
                names.push(k);
            }
        }
        names
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name() == name)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Builder used by the transport and by tests.
#[derive(Debug)]
pub struct RequestBuilder {
    method: String,
    path: String,
    query_string: Option<String>,
    protocol: String,
    headers: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
}

impl RequestBuilder {
    fn new(method: impl Into<String>, target: &str) -> Self {
        let (path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        let path = if path.is_empty() { "/" } else { path };

        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.to_string(),
            query_string,
            protocol: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
            remote_addr: None,
        }
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Insert a header. A repeated name replaces the earlier value.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn build(self) -> Request {
        let parameters = self
            .query_string
            .as_deref()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let cookies = self
            .headers
            .get("cookie")
            .map(|header| Cookie::parse_header(header))
            .unwrap_or_default();

        Request {
            method: self.method,
            path: self.path,
            query_string: self.query_string,
            protocol: self.protocol,
            headers: self.headers,
            parameters,
            cookies,
            remote_addr: self.remote_addr,
        }
    }
}
