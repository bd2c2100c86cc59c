//! Per-application handler registry and dispatch.
//!
//! # Responsibilities
//! - Record registrations (name, code identity, pattern)
//! - Resolve a path to the best registration
//! - Create each handler singleton once, on first use
//! - Contain handler failures and panics to the request that hit them
//!
//! # Design Decisions
//! - Pattern table behind `ArcSwap`: dispatch never takes a lock
//! - One `OnceCell` per registration linearises instance creation
//! - Creation and teardown share a per-slot lock, so an instance that
//!   finishes `init` during `destroy_all` is still destroyed
//! - A failed `init` is remembered; later requests get 500 without retrying

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};

use crate::dispatch::handler::{ContextInfo, Exchange, Handler, HandlerConfig, HandlerFactory};
use crate::dispatch::pattern::{PatternTable, UrlPattern};
use crate::observability::metrics;

/// Errors raised while registering handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("handler '{0}' is already registered")]
    DuplicateName(String),
    #[error("pattern '{0}' is already registered")]
    DuplicatePattern(String),
    #[error("invalid URL pattern '{0}'")]
    InvalidPattern(String),
    #[error("unknown handler code '{0}'")]
    UnknownCode(String),
    #[error("registry is closed")]
    Closed,
}

/// Static description of one handler registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerRegistration {
    /// Stable name, unique within the registry.
    pub name: String,
    /// Identity of the code to instantiate, as resolved in the module namespace.
    pub code: String,
    /// URL pattern as written.
    pub pattern: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
}

impl HandlerRegistration {
    pub fn new(name: impl Into<String>, code: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            pattern: pattern.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Admin view of a registration and its instance state.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationSummary {
    #[serde(flatten)]
    pub registration: HandlerRegistration,
    /// `idle`, `active` or `failed`.
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

enum Activation {
    Ready(Arc<dyn Handler>),
    Failed(String),
}

struct HandlerSlot {
    registration: HandlerRegistration,
    factory: HandlerFactory,
    instance: OnceCell<Activation>,
    /// Held while creating the instance and while destroying it.
    lifecycle: AsyncMutex<()>,
}

/// Handler table of one application context.
pub struct HandlerRegistry {
    context: ContextInfo,
    slots: DashMap<String, Arc<HandlerSlot>>,
    table: ArcSwap<PatternTable>,
    writer: Mutex<()>,
    closed: AtomicBool,
}

impl HandlerRegistry {
    pub fn new(context: ContextInfo) -> Self {
        Self {
            context,
            slots: DashMap::new(),
            table: ArcSwap::from_pointee(PatternTable::default()),
            writer: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a registration. Names and patterns must be unique.
    pub fn register(
        &self,
        registration: HandlerRegistration,
        factory: HandlerFactory,
    ) -> Result<(), RegistryError> {
        let pattern = UrlPattern::parse(&registration.pattern)?;

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }
        if self.slots.contains_key(&registration.name) {
            return Err(RegistryError::DuplicateName(registration.name));
        }
        let table = self.table.load_full();
        if table.contains(&pattern) {
            return Err(RegistryError::DuplicatePattern(registration.pattern));
        }

        tracing::debug!(
            context = %self.context.context_path,
            handler = %registration.name,
            pattern = %pattern,
            "Handler registered"
        );

        let name = registration.name.clone();
        self.table.store(Arc::new(table.with(&pattern, &name)));
        self.slots.insert(
            name,
            Arc::new(HandlerSlot {
                registration,
                factory,
                instance: OnceCell::new(),
                lifecycle: AsyncMutex::new(()),
            }),
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Serve the exchange with the best-matching handler.
    ///
    /// Returns `false` when no pattern matches; the response is untouched.
    /// Any match returns `true`, including when the handler failed and the
    /// response became a 500.
    pub async fn dispatch(&self, exchange: &mut Exchange<'_>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let (matched, slot) = {
            let table = self.table.load();
            let Some(matched) = table.resolve(exchange.relative_path()) else {
                return false;
            };
            let Some(slot) = self.slots.get(&matched.name).map(|s| Arc::clone(s.value())) else {
                return false;
            };
            (matched, slot)
        };

        let name = matched.name.clone();
        exchange.set_match(&matched.name, matched.handler_path, matched.residual_path);

        let handler = match self.activate(&slot).await {
            Ok(handler) => handler,
            Err(reason) => {
                self.fail(exchange, &name, &format!("Handler '{}' unavailable: {}", name, reason));
                return true;
            }
        };

        match AssertUnwindSafe(handler.service(exchange)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics::record_handler_failure(&self.context.context_path, &name, "service");
                self.fail(exchange, &name, &e.to_string());
            }
            Err(panic) => {
                metrics::record_handler_failure(&self.context.context_path, &name, "service");
                self.fail(exchange, &name, &panic_message(panic.as_ref()));
            }
        }
        true
    }

    async fn activate(&self, slot: &HandlerSlot) -> Result<Arc<dyn Handler>, String> {
        let activation = match slot.instance.get() {
            Some(activation) => activation,
            None => {
                let _lifecycle = slot.lifecycle.lock().await;
                if self.closed.load(Ordering::SeqCst) && !slot.instance.initialized() {
                    return Err("registry closed".to_string());
                }
                slot.instance.get_or_init(|| self.instantiate(slot)).await
            }
        };

        match activation {
            Activation::Ready(handler) => Ok(Arc::clone(handler)),
            Activation::Failed(reason) => Err(reason.clone()),
        }
    }

    async fn instantiate(&self, slot: &HandlerSlot) -> Activation {
        let registration = &slot.registration;
        let made = std::panic::catch_unwind(AssertUnwindSafe(|| (slot.factory)()));
        let mut handler = match made {
            Ok(handler) => handler,
            Err(panic) => return self.init_failed(registration, panic_message(panic.as_ref())),
        };

        let config = HandlerConfig {
            handler_name: registration.name.clone(),
            context: self.context.clone(),
            params: registration.params.clone(),
        };

        match AssertUnwindSafe(handler.init(&config)).catch_unwind().await {
            Ok(Ok(())) => {
                tracing::info!(
                    context = %self.context.context_path,
                    handler = %registration.name,
                    code = %registration.code,
                    "Handler initialized"
                );
                Activation::Ready(Arc::from(handler))
            }
            Ok(Err(e)) => self.init_failed(registration, e.to_string()),
            Err(panic) => self.init_failed(registration, panic_message(panic.as_ref())),
        }
    }

    fn init_failed(&self, registration: &HandlerRegistration, reason: String) -> Activation {
        tracing::error!(
            context = %self.context.context_path,
            handler = %registration.name,
            error = %reason,
            "Handler initialization failed"
        );
        metrics::record_handler_failure(&self.context.context_path, &registration.name, "init");
        Activation::Failed(reason)
    }

    fn fail(&self, exchange: &mut Exchange<'_>, name: &str, message: &str) {
        tracing::error!(
            context = %self.context.context_path,
            handler = %name,
            path = %exchange.request().path(),
            error = %message,
            "Handler failed"
        );
        let response = exchange.response();
        if response.is_committed() {
            tracing::warn!(handler = %name, "Response already committed, cannot send 500");
            return;
        }
        let _ = response.send_error(500, message);
    }

    /// Destroy every live instance once and refuse further dispatch.
    pub async fn destroy_all(&self) -> usize {
        {
            let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            if self.closed.swap(true, Ordering::SeqCst) {
                return 0;
            }
        }

        let slots: Vec<Arc<HandlerSlot>> = self.slots.iter().map(|s| Arc::clone(s.value())).collect();
        let mut destroyed = 0;
        for slot in slots {
            // Waits out an `init` that is still running.
            let _lifecycle = slot.lifecycle.lock().await;
            let Some(Activation::Ready(handler)) = slot.instance.get() else {
                continue;
            };
            if let Err(panic) = AssertUnwindSafe(handler.destroy()).catch_unwind().await {
                tracing::error!(
                    context = %self.context.context_path,
                    handler = %slot.registration.name,
                    error = %panic_message(panic.as_ref()),
                    "Handler destroy panicked"
                );
            }
            destroyed += 1;
        }

        tracing::info!(context = %self.context.context_path, destroyed, "Handlers destroyed");
        destroyed
    }

    pub fn registrations(&self) -> Vec<RegistrationSummary> {
        let mut summaries: Vec<RegistrationSummary> = self
            .slots
            .iter()
            .map(|slot| {
                let (state, failure) = match slot.instance.get() {
                    None => ("idle", None),
                    Some(Activation::Ready(_)) => ("active", None),
                    Some(Activation::Failed(reason)) => ("failed", Some(reason.clone())),
                };
                RegistrationSummary {
                    registration: slot.registration.clone(),
                    state,
                    failure,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.registration.name.cmp(&b.registration.name));
        summaries
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic: unknown payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::dispatch::handler::{factory, HandlerError};
    use crate::http::{Request, Response};
    use crate::session::SessionStore;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Tagged {
        tag: &'static str,
    }

    #[async_trait]
    impl Handler for Tagged {
        async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
            let residual = exchange.residual_path().unwrap_or("-").to_string();
            exchange
                .response()
                .write_str(&format!("{}|{}", self.tag, residual))?;
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    struct Counters {
        inits: Arc<AtomicUsize>,
        destroys: Arc<AtomicUsize>,
        instances: Arc<AtomicUsize>,
    }

    struct Counted {
        counters: Counters,
        serial: usize,
    }

    #[async_trait]
    impl Handler for Counted {
        async fn init(&mut self, _config: &HandlerConfig) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.counters.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
            exchange.response().write_str(&self.serial.to_string())?;
            Ok(())
        }

        async fn destroy(&self) {
            self.counters.destroys.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Broken;

    #[async_trait]
    impl Handler for Broken {
        async fn init(&mut self, config: &HandlerConfig) -> Result<(), HandlerError> {
            Err(HandlerError::msg(format!("{} cannot start", config.handler_name)))
        }

        async fn service(&self, _exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
            if exchange.request().parameter("panic").is_some() {
                panic!("handler exploded");
            }
            exchange.response().write_str("partial")?;
            Err(HandlerError::msg("database offline"))
        }
    }

    fn info() -> ContextInfo {
        ContextInfo {
            app_name: "shop".into(),
            context_path: "/shop".into(),
            directory: PathBuf::from("/tmp/shop"),
        }
    }

    fn tagged(tag: &'static str) -> HandlerFactory {
        factory(move || Tagged { tag })
    }

    async fn run(registry: &HandlerRegistry, target: &str) -> (bool, Response) {
        let store = SessionStore::new("/shop", SessionConfig::default());
        let ctx = info();
        let request = Request::builder("GET", target).build();
        let path = request.path().to_string();
        let mut response = Response::new();
        let handled = {
            let mut exchange = Exchange::new(&request, &mut response, &ctx, &store, &path);
            registry.dispatch(&mut exchange).await
        };
        (handled, response)
    }

    fn body(response: &Response) -> String {
        String::from_utf8(response.body().to_vec()).unwrap()
    }

    #[test]
    fn duplicate_name_rejected() {
        let registry = HandlerRegistry::new(info());
        registry
            .register(HandlerRegistration::new("a", "tagged", "/a"), tagged("a"))
            .unwrap();
        assert_eq!(
            registry.register(HandlerRegistration::new("a", "tagged", "/b"), tagged("a")),
            Err(RegistryError::DuplicateName("a".into()))
        );
        assert_eq!(
            registry.register(HandlerRegistration::new("b", "tagged", "/a"), tagged("b")),
            Err(RegistryError::DuplicatePattern("/a".into()))
        );
        assert_eq!(
            registry.register(HandlerRegistration::new("c", "tagged", "nope"), tagged("c")),
            Err(RegistryError::InvalidPattern("nope".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn prefix_match_passes_residual_path() {
        let registry = HandlerRegistry::new(info());
        registry
            .register(HandlerRegistration::new("api", "tagged", "/api/*"), tagged("H"))
            .unwrap();

        let (handled, response) = run(&registry, "/api/status").await;
        assert!(handled);
        assert_eq!(body(&response), "H|/status");
    }

    #[tokio::test]
    async fn exact_match_wins_over_prefix_and_suffix() {
        let registry = HandlerRegistry::new(info());
        for (name, pattern) in [("prefix", "/api/*"), ("suffix", "*.json"), ("exact", "/api/a.json")] {
            registry
                .register(HandlerRegistration::new(name, "tagged", pattern), tagged(name))
                .unwrap();
        }
        let (_, response) = run(&registry, "/api/a.json").await;
        assert_eq!(body(&response), "exact|-");
    }

    #[tokio::test]
    async fn unmatched_path_is_not_handled() {
        let registry = HandlerRegistry::new(info());
        registry
            .register(HandlerRegistration::new("api", "tagged", "/api/*"), tagged("H"))
            .unwrap();
        let (handled, response) = run(&registry, "/missing").await;
        assert!(!handled);
        assert_eq!(response.status(), 200);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn concurrent_first_requests_init_once() {
        let registry = Arc::new(HandlerRegistry::new(info()));
        let counters = Counters::default();
        let made = counters.clone();
        registry
            .register(
                HandlerRegistration::new("counted", "counted", "/count"),
                factory(move || Counted {
                    serial: made.instances.fetch_add(1, Ordering::SeqCst),
                    counters: made.clone(),
                }),
            )
            .unwrap();

        let (a, b) = tokio::join!(run(&registry, "/count"), run(&registry, "/count"));
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
        assert_eq!(counters.instances.load(Ordering::SeqCst), 1);
        assert_eq!(body(&a.1), body(&b.1));

        assert_eq!(registry.destroy_all().await, 1);
        assert_eq!(registry.destroy_all().await, 0);
        assert_eq!(counters.destroys.load(Ordering::SeqCst), 1);

        let (handled, _) = run(&registry, "/count").await;
        assert!(!handled);
    }

    #[tokio::test]
    async fn init_racing_destroy_all_is_destroyed() {
        let registry = Arc::new(HandlerRegistry::new(info()));
        let counters = Counters::default();
        let made = counters.clone();
        registry
            .register(
                HandlerRegistration::new("counted", "counted", "/count"),
                factory(move || Counted {
                    serial: made.instances.fetch_add(1, Ordering::SeqCst),
                    counters: made.clone(),
                }),
            )
            .unwrap();

        let request = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { run(&registry, "/count").await })
        };
        while counters.instances.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // `init` sleeps 20ms; teardown starts while it is still running.
        assert_eq!(registry.destroy_all().await, 1);
        let (handled, _) = request.await.unwrap();
        assert!(handled);

        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
        assert_eq!(counters.destroys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_instance_is_created_after_destroy_all() {
        let registry = HandlerRegistry::new(info());
        let counters = Counters::default();
        let made = counters.clone();
        registry
            .register(
                HandlerRegistration::new("counted", "counted", "/count"),
                factory(move || Counted {
                    serial: made.instances.fetch_add(1, Ordering::SeqCst),
                    counters: made.clone(),
                }),
            )
            .unwrap();

        assert_eq!(registry.destroy_all().await, 0);
        let slot = registry.slots.get("counted").map(|s| Arc::clone(s.value())).unwrap();
        assert_eq!(
            registry.activate(&slot).await.err().as_deref(),
            Some("registry closed")
        );
        assert_eq!(counters.instances.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_init_is_sticky_500() {
        let registry = HandlerRegistry::new(info());
        registry
            .register(HandlerRegistration::new("broken", "broken", "/broken"), factory(|| Broken))
            .unwrap();

        for _ in 0..2 {
            let (handled, response) = run(&registry, "/broken").await;
            assert!(handled);
            assert_eq!(response.status(), 500);
            assert!(body(&response).contains("broken cannot start"));
        }
        let summary = registry.registrations();
        assert_eq!(summary[0].state, "failed");
    }

    #[tokio::test]
    async fn service_error_becomes_500_with_message() {
        let registry = HandlerRegistry::new(info());
        registry
            .register(HandlerRegistration::new("failing", "failing", "/fail"), factory(|| Failing))
            .unwrap();

        let (handled, response) = run(&registry, "/fail").await;
        assert!(handled);
        assert_eq!(response.status(), 500);
        let text = body(&response);
        assert!(text.contains("database offline"));
        assert!(!text.contains("partial"));

        let (_, response) = run(&registry, "/fail?panic=1").await;
        assert_eq!(response.status(), 500);
        assert!(body(&response).contains("handler exploded"));

        let (_, response) = run(&registry, "/fail").await;
        assert_eq!(response.status(), 500);
        assert_eq!(registry.registrations()[0].state, "active");
    }
}
