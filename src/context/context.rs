//! A deployed application: registry, sessions and namespace under one context path.
//!
//! # Responsibilities
//! - Drive the lifecycle (`start`, `stop`) under an exclusive transition lock
//! - Admit requests only while running and count them for draining
//! - Strip the context path and hand the rest to the registry, then the default handler

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;

use crate::config::{DrainPolicy, SessionConfig};
use crate::context::lifecycle::{LifecycleState, StateCell};
use crate::context::manifest::{AppManifest, ManifestError};
use crate::context::namespace::{ModuleCatalog, ModuleNamespace, NamespaceError};
use crate::dispatch::registry::panic_message;
use crate::dispatch::{
    ContextInfo, Exchange, Handler, HandlerConfig, HandlerRegistration, HandlerRegistry,
    RegistrationSummary,
};
use crate::http::{Request, Response};
use crate::modules::StaticFiles;
use crate::session::{SessionStats, SessionStore};

/// Errors raised while deploying or undeploying an application.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("application directory {0} does not exist")]
    MissingDirectory(PathBuf),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error("context '{context}' is {actual}, expected {expected}")]
    InvalidState {
        context: String,
        actual: LifecycleState,
        expected: LifecycleState,
    },
    #[error("context '{0}' was already started once")]
    Retired(String),
    #[error("default handler failed to initialize: {0}")]
    DefaultHandler(String),
}

/// Undeploy behaviour for requests still in flight.
#[derive(Debug, Clone, Copy)]
pub struct DrainSettings {
    pub policy: DrainPolicy,
    pub timeout: Duration,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            policy: DrainPolicy::Wait,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Admin view of a context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub name: String,
    pub display_name: Option<String>,
    pub context_path: String,
    pub directory: String,
    pub state: LifecycleState,
    pub in_flight: usize,
    pub handlers: Vec<RegistrationSummary>,
    pub sessions: SessionStats,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One deployed application.
pub struct ApplicationContext {
    info: ContextInfo,
    state: StateCell,
    started: AtomicBool,
    registry: HandlerRegistry,
    sessions: Arc<SessionStore>,
    catalog: Arc<ModuleCatalog>,
    namespace: Mutex<Option<ModuleNamespace>>,
    default_handler: Mutex<Option<Arc<dyn Handler>>>,
    display_name: Mutex<Option<String>>,
    in_flight: AtomicUsize,
    transition: tokio::sync::Mutex<()>,
    drain: DrainSettings,
}

impl ApplicationContext {
    pub fn new(
        app_name: impl Into<String>,
        context_path: impl Into<String>,
        directory: impl Into<PathBuf>,
        catalog: Arc<ModuleCatalog>,
        sessions: SessionConfig,
        drain: DrainSettings,
    ) -> Self {
        let info = ContextInfo {
            app_name: app_name.into(),
            context_path: context_path.into(),
            directory: directory.into(),
        };
        Self {
            registry: HandlerRegistry::new(info.clone()),
            sessions: Arc::new(SessionStore::new(info.context_path.clone(), sessions)),
            info,
            state: StateCell::new(LifecycleState::Unloaded),
            started: AtomicBool::new(false),
            catalog,
            namespace: Mutex::new(None),
            default_handler: Mutex::new(None),
            display_name: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            transition: tokio::sync::Mutex::new(()),
            drain,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.app_name
    }

    pub fn context_path(&self) -> &str {
        &self.info.context_path
    }

    pub fn directory(&self) -> &Path {
        &self.info.directory
    }

    pub fn info(&self) -> &ContextInfo {
        &self.info
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// `Unloaded → Deploying → Running`.
    ///
    /// On failure the context falls back to `Unloaded` and cannot be reused.
    pub async fn start(&self) -> Result<(), DeployError> {
        let _transition = self.transition.lock().await;

        let actual = self.state();
        if actual != LifecycleState::Unloaded {
            return Err(DeployError::InvalidState {
                context: self.info.context_path.clone(),
                actual,
                expected: LifecycleState::Unloaded,
            });
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DeployError::Retired(self.info.context_path.clone()));
        }

        self.state.set(LifecycleState::Deploying);
        match self.activate().await {
            Ok(()) => {
                self.state.set(LifecycleState::Running);
                tracing::info!(
                    app = %self.info.app_name,
                    context_path = %self.info.context_path,
                    handlers = self.registry.len(),
                    "Application started"
                );
                Ok(())
            }
            Err(e) => {
                self.release().await;
                self.state.set(LifecycleState::Unloaded);
                Err(e)
            }
        }
    }

    async fn activate(&self) -> Result<(), DeployError> {
        if !tokio::fs::metadata(&self.info.directory)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(DeployError::MissingDirectory(self.info.directory.clone()));
        }

        let namespace = self.catalog.namespace_for(&self.info.app_name)?;
        let manifest = AppManifest::load(&self.info.directory).await?;

        if let Some(seconds) = manifest.session.max_inactive_secs {
            self.sessions.set_default_max_inactive(seconds);
        }
        *lock(&self.display_name) = manifest.display_name.clone();

        for entry in manifest.handlers {
            let Some(factory) = namespace.resolve(&entry.handler) else {
                tracing::warn!(
                    context_path = %self.info.context_path,
                    handler = %entry.name,
                    code = %entry.handler,
                    "Unknown handler code, registration skipped"
                );
                continue;
            };

            let mut registration = HandlerRegistration::new(entry.name, entry.handler, entry.pattern);
            registration.params = entry.params;
            if let Err(e) = self.registry.register(registration, factory) {
                tracing::warn!(
                    context_path = %self.info.context_path,
                    error = %e,
                    "Handler registration skipped"
                );
            }
        }

        if manifest.static_files.enabled {
            let mut files = StaticFiles::serving(self.info.directory.join(&manifest.static_files.dir));
            let config = HandlerConfig {
                handler_name: "default".to_string(),
                context: self.info.clone(),
                params: Default::default(),
            };
            files
                .init(&config)
                .await
                .map_err(|e| DeployError::DefaultHandler(e.to_string()))?;
            *lock(&self.default_handler) = Some(Arc::new(files));
        }

        self.sessions.start_sweeper();
        *lock(&self.namespace) = Some(namespace);
        Ok(())
    }

    /// `Running → Undeploying → Unloaded`.
    pub async fn stop(&self) -> Result<(), DeployError> {
        let _transition = self.transition.lock().await;

        let actual = self.state();
        if actual != LifecycleState::Running {
            return Err(DeployError::InvalidState {
                context: self.info.context_path.clone(),
                actual,
                expected: LifecycleState::Running,
            });
        }

        self.state.set(LifecycleState::Undeploying);
        if self.drain.policy == DrainPolicy::Wait {
            self.wait_for_in_flight().await;
        }

        self.release().await;
        self.state.set(LifecycleState::Unloaded);
        tracing::info!(
            app = %self.info.app_name,
            context_path = %self.info.context_path,
            "Application stopped"
        );
        Ok(())
    }

    async fn wait_for_in_flight(&self) {
        let drained = tokio::time::timeout(self.drain.timeout, async {
            while self.in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                context_path = %self.info.context_path,
                in_flight = self.in_flight(),
                timeout = ?self.drain.timeout,
                "Drain timed out, tearing down with requests in flight"
            );
        }
    }

    async fn release(&self) {
        self.registry.destroy_all().await;
        self.sessions.destroy();
        lock(&self.default_handler).take();
        if let Some(namespace) = lock(&self.namespace).take() {
            tracing::debug!(
                app = %namespace.app_name(),
                modules = namespace.local_modules().len(),
                "Module namespace released"
            );
        }
    }

    /// `path` minus the context path, if `path` starts with it.
    ///
    /// A request for exactly `/shop` yields `""`, and `/shopping` yields
    /// `"ping"`.
    pub fn relative_path(&self, path: &str) -> Option<String> {
        path.strip_prefix(self.info.context_path.as_str()).map(str::to_string)
    }

    fn admit(&self) -> Option<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        (self.state() == LifecycleState::Running).then_some(guard)
    }

    /// Serve `request` if it belongs here and the context is running.
    ///
    /// Returns `false` without touching `response` otherwise.
    pub async fn route(&self, request: &Request, response: &mut Response) -> bool {
        let Some(relative) = self.relative_path(request.path()) else {
            return false;
        };
        let Some(_admitted) = self.admit() else {
            return false;
        };

        let mut exchange = Exchange::new(request, response, &self.info, &self.sessions, &relative);
        if self.registry.dispatch(&mut exchange).await {
            return true;
        }

        let fallback = lock(&self.default_handler).clone();
        match fallback {
            Some(handler) => {
                let served = AssertUnwindSafe(handler.service(&mut exchange)).catch_unwind().await;
                let failure = match served {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(panic) => Some(panic_message(panic.as_ref())),
                };
                if let Some(message) = failure {
                    tracing::error!(
                        context_path = %self.info.context_path,
                        path = %request.path(),
                        error = %message,
                        "Default handler failed"
                    );
                    let response = exchange.response();
                    if !response.is_committed() {
                        let _ = response.send_error(500, &message);
                    }
                }
            }
            None => {
                let _ = exchange
                    .response()
                    .send_error(404, &format!("No handler for {}", request.path()));
            }
        }
        true
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            name: self.info.app_name.clone(),
            display_name: lock(&self.display_name).clone(),
            context_path: self.info.context_path.clone(),
            directory: self.info.directory.display().to_string(),
            state: self.state(),
            in_flight: self.in_flight(),
            handlers: self.registry.registrations(),
            sessions: self.sessions.stats(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::namespace::ModuleRegistry;
    use crate::dispatch::{factory, HandlerError};
    use crate::modules::core_modules;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Greeter {
        greeting: String,
        destroyed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for Greeter {
        async fn init(&mut self, config: &HandlerConfig) -> Result<(), HandlerError> {
            self.greeting = config.param("greeting").unwrap_or("hello").to_string();
            Ok(())
        }

        async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
            if let Some(delay) = exchange.request().parameter("sleep_ms") {
                let ms: u64 = delay.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            let text = format!("{} from {}", self.greeting, exchange.context_path());
            exchange.response().write_str(&text)?;
            Ok(())
        }

        async fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn catalog(destroyed: Arc<AtomicUsize>) -> Arc<ModuleCatalog> {
        Arc::new(ModuleCatalog::new(core_modules()).with_app(
            "shop",
            ModuleRegistry::new().with(
                "greeter",
                factory(move || Greeter {
                    greeting: String::new(),
                    destroyed: Arc::clone(&destroyed),
                }),
            ),
        ))
    }

    fn write_app(root: &Path) -> PathBuf {
        let dir = root.join("shop");
        std::fs::create_dir_all(dir.join("static")).unwrap();
        std::fs::write(dir.join("static/index.html"), "shop home").unwrap();
        std::fs::write(
            dir.join("app.toml"),
            r#"
            display_name = "Shop"
            [session]
            max_inactive_secs = 120
            [[handlers]]
            name = "hello"
            handler = "greeter"
            pattern = "/hello"
            [handlers.params]
            greeting = "hi"
            [[handlers]]
            name = "ghost"
            handler = "not-installed"
            pattern = "/ghost"
            "#,
        )
        .unwrap();
        dir
    }

    fn context(dir: PathBuf, destroyed: Arc<AtomicUsize>, drain: DrainSettings) -> ApplicationContext {
        ApplicationContext::new("shop", "/shop", dir, catalog(destroyed), SessionConfig::default(), drain)
    }

    async fn get(ctx: &ApplicationContext, target: &str) -> (bool, Response) {
        let request = Request::builder("GET", target).build();
        let mut response = Response::new();
        let handled = ctx.route(&request, &mut response).await;
        (handled, response)
    }

    #[test]
    fn relative_paths() {
        let ctx = context(PathBuf::from("/x"), Arc::default(), DrainSettings::default());
        assert_eq!(ctx.relative_path("/shop"), Some("".into()));
        assert_eq!(ctx.relative_path("/shop/cart"), Some("/cart".into()));
        assert_eq!(ctx.relative_path("/shopping"), Some("ping".into()));
        assert_eq!(ctx.relative_path("/other"), None);

        let root = ApplicationContext::new(
            "ROOT",
            "",
            "/x",
            Arc::new(ModuleCatalog::default()),
            SessionConfig::default(),
            DrainSettings::default(),
        );
        assert_eq!(root.relative_path("/anything"), Some("/anything".into()));
    }

    #[tokio::test]
    async fn lifecycle_and_routing() {
        let root = tempfile::tempdir().unwrap();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let ctx = context(write_app(root.path()), Arc::clone(&destroyed), DrainSettings::default());

        let (handled, _) = get(&ctx, "/shop/hello").await;
        assert!(!handled, "not routed before start");

        ctx.start().await.unwrap();
        assert_eq!(ctx.state(), LifecycleState::Running);
        assert_eq!(ctx.registry().len(), 1, "unknown code is skipped");
        assert_eq!(ctx.sessions().default_max_inactive(), 120);

        let (handled, response) = get(&ctx, "/shop/hello").await;
        assert!(handled);
        assert_eq!(response.body(), b"hi from /shop");

        let (_, response) = get(&ctx, "/shop/").await;
        assert_eq!(response.body(), b"shop home");

        let (handled, response) = get(&ctx, "/shop/ghost").await;
        assert!(handled);
        assert_eq!(response.status(), 404);

        let (handled, _) = get(&ctx, "/elsewhere").await;
        assert!(!handled);

        let session = ctx.sessions().create();
        ctx.stop().await.unwrap();
        assert_eq!(ctx.state(), LifecycleState::Unloaded);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(!session.is_valid());
        assert!(ctx.sessions().is_empty());

        let (handled, _) = get(&ctx, "/shop/hello").await;
        assert!(!handled);
        assert!(matches!(ctx.start().await, Err(DeployError::Retired(_))));
    }

    #[tokio::test]
    async fn missing_directory_fails_start() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path().join("gone"), Arc::default(), DrainSettings::default());
        assert!(matches!(ctx.start().await, Err(DeployError::MissingDirectory(_))));
        assert_eq!(ctx.state(), LifecycleState::Unloaded);
    }

    #[tokio::test]
    async fn bad_manifest_fails_start() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("shop");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("app.toml"), "handlers = 3").unwrap();
        let ctx = context(dir, Arc::default(), DrainSettings::default());
        assert!(matches!(ctx.start().await, Err(DeployError::Manifest(_))));
    }

    #[tokio::test]
    async fn wait_policy_drains_in_flight_requests() {
        let root = tempfile::tempdir().unwrap();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let ctx = Arc::new(context(
            write_app(root.path()),
            Arc::clone(&destroyed),
            DrainSettings {
                policy: DrainPolicy::Wait,
                timeout: Duration::from_secs(5),
            },
        ));
        ctx.start().await.unwrap();

        let slow = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { get(&ctx, "/shop/hello?sleep_ms=200").await })
        };
        while ctx.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        ctx.stop().await.unwrap();
        let (handled, response) = slow.await.unwrap();
        assert!(handled);
        assert_eq!(response.status(), 200);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.in_flight(), 0);
    }

    struct SlowStart {
        inits: Arc<AtomicUsize>,
        destroys: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for SlowStart {
        async fn init(&mut self, _config: &HandlerConfig) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
            exchange.response().write_str("started")?;
            Ok(())
        }

        async fn destroy(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn reject_policy_stops_admitting_and_destroys_every_instance() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("shop");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("app.toml"),
            "[[handlers]]\nname = \"slow\"\nhandler = \"slow-start\"\npattern = \"/slow\"\n",
        )
        .unwrap();

        let inits = Arc::new(AtomicUsize::new(0));
        let destroys = Arc::new(AtomicUsize::new(0));
        let catalog = {
            let (inits, destroys) = (Arc::clone(&inits), Arc::clone(&destroys));
            Arc::new(ModuleCatalog::new(core_modules()).with_app(
                "shop",
                ModuleRegistry::new().with(
                    "slow-start",
                    factory(move || SlowStart {
                        inits: Arc::clone(&inits),
                        destroys: Arc::clone(&destroys),
                    }),
                ),
            ))
        };
        let ctx = Arc::new(ApplicationContext::new(
            "shop",
            "/shop",
            dir,
            catalog,
            SessionConfig::default(),
            DrainSettings {
                policy: DrainPolicy::Reject,
                timeout: Duration::from_secs(5),
            },
        ));
        ctx.start().await.unwrap();

        // First request is still inside `init` when the stop begins.
        let first = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { get(&ctx, "/shop/slow").await })
        };
        while ctx.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let stopping = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.stop().await })
        };
        while ctx.state() != LifecycleState::Undeploying {
            tokio::task::yield_now().await;
        }
        let (handled, response) = get(&ctx, "/shop/slow").await;
        assert!(!handled, "no admission while undeploying");
        assert!(response.body().is_empty());

        stopping.await.unwrap().unwrap();
        let _ = first.await.unwrap();
        assert_eq!(ctx.state(), LifecycleState::Unloaded);
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(destroys.load(Ordering::SeqCst), 1);
    }

    struct Exploding;

    #[async_trait]
    impl Handler for Exploding {
        async fn service(&self, _exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
            panic!("static root vanished");
        }
    }

    #[tokio::test]
    async fn default_handler_panic_becomes_500() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(write_app(root.path()), Arc::default(), DrainSettings::default());
        ctx.start().await.unwrap();
        *lock(&ctx.default_handler) = Some(Arc::new(Exploding));

        let (handled, response) = get(&ctx, "/shop/anything").await;
        assert!(handled);
        assert_eq!(response.status(), 500);
        assert!(String::from_utf8_lossy(response.body()).contains("static root vanished"));

        let (_, response) = get(&ctx, "/shop/hello").await;
        assert_eq!(response.status(), 200);
        ctx.stop().await.unwrap();
    }

    #[tokio::test]
    async fn context_path_is_stripped_as_a_plain_prefix() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(write_app(root.path()), Arc::default(), DrainSettings::default());
        ctx.start().await.unwrap();

        // Exactly the context path reaches the default handler with "" and gets the index.
        let (handled, response) = get(&ctx, "/shop").await;
        assert!(handled);
        assert_eq!(response.body(), b"shop home");

        let (handled, response) = get(&ctx, "/shopping").await;
        assert!(handled);
        assert_eq!(response.status(), 404);
        ctx.stop().await.unwrap();
    }
}
