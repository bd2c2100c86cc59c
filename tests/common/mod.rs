//! Shared helpers for integration tests: a container on an ephemeral port
//! with a temporary deployment root and a catalog of test handlers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use app_container::config::{ContainerConfig, DrainPolicy};
use app_container::context::{ModuleCatalog, ModuleRegistry};
use app_container::dispatch::{factory, Exchange, Handler, HandlerConfig, HandlerError};
use app_container::lifecycle::Container;
use app_container::modules::core_modules;
use async_trait::async_trait;
use tempfile::TempDir;

/// Writes `<greeting> from <context path>`.
pub struct Hello {
    greeting: String,
}

#[async_trait]
impl Handler for Hello {
    async fn init(&mut self, config: &HandlerConfig) -> Result<(), HandlerError> {
        self.greeting = config.param("greeting").unwrap_or("hello").to_string();
        Ok(())
    }

    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
        let text = format!("{} from {}", self.greeting, exchange.context_path());
        exchange.response().set_content_type("text/plain; charset=utf-8")?;
        exchange.response().write_str(&text)?;
        Ok(())
    }
}

/// Always fails while servicing.
pub struct Failing;

#[async_trait]
impl Handler for Failing {
    async fn service(&self, _exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
        Err(HandlerError::msg("inventory backend offline"))
    }
}

/// Never finishes initialising.
pub struct Broken;

#[async_trait]
impl Handler for Broken {
    async fn init(&mut self, _config: &HandlerConfig) -> Result<(), HandlerError> {
        Err(HandlerError::msg("missing database url"))
    }

    async fn service(&self, _exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Sleeps for `?ms=` milliseconds before answering.
pub struct Slow;

#[async_trait]
impl Handler for Slow {
    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), HandlerError> {
        let ms: u64 = exchange
            .request()
            .parameter("ms")
            .and_then(|ms| ms.parse().ok())
            .unwrap_or(500);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        exchange.response().write_str("done")?;
        Ok(())
    }
}

pub fn test_modules() -> ModuleRegistry {
    ModuleRegistry::new()
        .with("hello", factory(|| Hello { greeting: String::new() }))
        .with("failing", factory(|| Failing))
        .with("broken", factory(|| Broken))
        .with("slow", factory(|| Slow))
}

pub const SHOP_MANIFEST: &str = r#"
display_name = "Shop"

[[handlers]]
name = "hello"
handler = "hello"
pattern = "/hello"
[handlers.params]
greeting = "hi"

[[handlers]]
name = "session"
handler = "core.session-info"
pattern = "/session"

[[handlers]]
name = "info"
handler = "core.context-info"
pattern = "/info/*"

[[handlers]]
name = "echo"
handler = "core.echo"
pattern = "*.do"

[[handlers]]
name = "failing"
handler = "failing"
pattern = "/failing"

[[handlers]]
name = "broken"
handler = "broken"
pattern = "/broken"

[[handlers]]
name = "slow"
handler = "slow"
pattern = "/slow"
"#;

/// Create `<root>/<name>` with a manifest and optional static files.
pub fn write_app(root: &Path, name: &str, manifest: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(dir.join("static")).unwrap();
    std::fs::write(dir.join("app.toml"), manifest).unwrap();
    for (path, content) in files {
        let file = dir.join("static").join(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(file, content).unwrap();
    }
    dir
}

pub struct TestServer {
    pub container: Container,
    pub root: TempDir,
    pub base: String,
    pub client: reqwest::Client,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }
}

/// Start a container after `setup` has populated the deployment root.
pub async fn start_server(
    setup: impl FnOnce(&Path),
    tweak: impl FnOnce(&mut ContainerConfig),
) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    setup(root.path());

    let mut config = ContainerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.deployment.root = root.path().to_path_buf();
    config.deployment.watch = false;
    config.deployment.scan_interval_secs = 3600;
    config.deployment.drain = DrainPolicy::Wait;
    config.deployment.drain_timeout_secs = 5;
    config.workers.core_workers = 4;
    config.workers.max_workers = 8;
    config.workers.shutdown_timeout_secs = 2;
    tweak(&mut config);

    let catalog = ModuleCatalog::new(core_modules())
        .with_app("shop", test_modules())
        .with_app("blog", test_modules());
    let container = Container::start(config, catalog).await.unwrap();
    let base = format!("http://{}", container.local_addr());

    TestServer {
        container,
        root,
        base,
        client: reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap(),
    }
}

/// The default server: `shop` deployed with [`SHOP_MANIFEST`] and an index page.
pub async fn start_shop() -> TestServer {
    start_server(
        |root| {
            write_app(root, "shop", SHOP_MANIFEST, &[("index.html", "<h1>shop</h1>"), ("css/site.css", "body{}")]);
        },
        |_| {},
    )
    .await
}

/// The `JSESSIONID=<id>` pair of every Set-Cookie header carrying one.
pub fn session_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.starts_with("JSESSIONID="))
        .map(str::to_string)
        .collect()
}
