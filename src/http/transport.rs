//! HTTP/1.1 wire handling for one connection.
//!
//! # Responsibilities
//! - Parse requests off the socket with hyper and build [`Request`]s
//! - Route through the deployer; answer 404 when nothing claims the path
//! - Serialise [`Response`]s, cookies included

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, SET_COOKIE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{StatusCode, Version};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::sync::watch;

use crate::config::HttpConfig;
use crate::deploy::Deployer;
use crate::http::{Request, Response};
use crate::net::Connection;
use crate::observability::metrics;

/// Serve every request on `connection` until the client or keep-alive ends it.
///
/// Once `draining` turns true the in-flight request finishes and the
/// connection closes instead of waiting for the next one.
pub async fn serve_connection(
    connection: Connection,
    deployer: Arc<Deployer>,
    config: HttpConfig,
    draining: watch::Receiver<bool>,
) {
    let id = connection.id();
    let (stream, peer, _guard) = connection.into_parts();
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
        let deployer = Arc::clone(&deployer);
        async move { Ok::<_, Infallible>(handle(req, peer, &deployer).await) }
    });

    let mut builder = http1::Builder::new();
    builder
        .keep_alive(config.keep_alive)
        .timer(TokioTimer::new())
        .header_read_timeout(Duration::from_secs(config.header_read_timeout_secs));

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let served = tokio::select! {
        served = conn.as_mut() => served,
        _ = drained(draining) => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = served {
        tracing::debug!(connection_id = %id, peer_addr = %peer, error = %e, "Connection ended with error");
    }
}

async fn drained(mut draining: watch::Receiver<bool>) {
    let _ = draining.wait_for(|draining| *draining).await;
}

async fn handle(
    req: hyper::Request<hyper::body::Incoming>,
    peer: SocketAddr,
    deployer: &Deployer,
) -> hyper::Response<Body> {
    let start = Instant::now();
    let request = to_request(&req, peer);
    let mut response = Response::new();

    if !deployer.route(&request, &mut response).await {
        let _ = response.send_error(404, &format!("No context for {}", request.path()));
        metrics::record_request("none", 404, start);
    }

    tracing::debug!(
        method = %request.method(),
        path = %request.path(),
        status = response.status(),
        elapsed = ?start.elapsed(),
        "Request served"
    );
    to_hyper(response)
}

fn to_request<B>(req: &hyper::Request<B>, peer: SocketAddr) -> Request {
    let target = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let mut builder = Request::builder(req.method().as_str(), target)
        .protocol(protocol(req.version()))
        .remote_addr(peer);

    for name in req.headers().keys() {
        let separator = if name == hyper::header::COOKIE { "; " } else { ", " };
        let values: Vec<&str> = req
            .headers()
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if !values.is_empty() {
            builder = builder.header(name.as_str(), values.join(separator));
        }
    }
    builder.build()
}

fn protocol(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn to_hyper(response: Response) -> hyper::Response<Body> {
    let parts = response.into_parts();
    let mut out = hyper::Response::new(Body::empty());

    *out.status_mut() = StatusCode::from_u16(parts.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if let Some(reason) = parts.reason {
        match hyper::ext::ReasonPhrase::try_from(reason.into_bytes()) {
            Ok(phrase) => {
                out.extensions_mut().insert(phrase);
            }
            Err(_) => tracing::warn!(status = parts.status, "Dropping invalid reason phrase"),
        }
    }

    let headers = out.headers_mut();
    for (name, value) in &parts.headers {
        let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
        else {
            tracing::warn!(header = %name, "Dropping invalid response header");
            continue;
        };
        // hyper computes the length from the body.
        if name == CONTENT_LENGTH {
            continue;
        }
        headers.append(name, value);
    }
    for cookie in &parts.cookies {
        match HeaderValue::from_str(&cookie.to_header_value()) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(_) => tracing::warn!(cookie = %cookie.name(), "Dropping invalid cookie"),
        }
    }

    *out.body_mut() = Body::from(parts.body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Cookie;

    #[test]
    fn builds_request_from_hyper_parts() {
        let req = hyper::Request::builder()
            .method("POST")
            .uri("/shop/cart?item=1&item=2")
            .header("Cookie", "a=1")
            .header("Cookie", "JSESSIONID=abc")
            .header("X-Trace", "t1")
            .body(())
            .unwrap();
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();

        let request = to_request(&req, peer);
        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/shop/cart");
        assert_eq!(request.parameter_values("item"), vec!["1", "2"]);
        assert_eq!(request.cookie("JSESSIONID").map(|c| c.value()), Some("abc"));
        assert_eq!(request.header("x-trace"), Some("t1"));
        assert_eq!(request.remote_addr(), Some(peer));
        assert_eq!(request.protocol(), "HTTP/1.1");
    }

    #[test]
    fn serialises_cookies_and_custom_reason() {
        let mut response = Response::new();
        response.set_status_with_reason(299, "Mostly Fine").unwrap();
        response.set_header("X-App", "shop").unwrap();
        response.set_header("Content-Length", "999").unwrap();
        response
            .add_cookie(Cookie::new("JSESSIONID", "abc").with_path("/").http_only(true))
            .unwrap();
        response.write_str("hi").unwrap();

        let out = to_hyper(response);
        assert_eq!(out.status().as_u16(), 299);
        assert_eq!(
            out.extensions().get::<hyper::ext::ReasonPhrase>().map(|r| r.as_bytes()),
            Some(&b"Mostly Fine"[..])
        );
        assert_eq!(out.headers()["x-app"], "shop");
        assert!(out.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(out.headers()[SET_COOKIE], "JSESSIONID=abc; Path=/; HttpOnly");
    }
}
