//! Per-application module namespaces.
//!
//! # Responsibilities
//! - Hold named handler factories (`ModuleRegistry`)
//! - Pair the shared core registry with each application's own registry
//! - Resolve a code identity: core first, then the application's modules
//!
//! # Design Decisions
//! - Applications cannot define names under the reserved `core.` prefix
//! - A namespace is built on deploy and dropped on undeploy

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::HandlerFactory;

/// Prefix reserved for framework-level modules.
pub const CORE_PREFIX: &str = "core.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("application '{app}' defines reserved module name '{name}'")]
    ReservedName { app: String, name: String },
}

/// Named handler constructors.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, factory: HandlerFactory) -> Self {
        self.insert(name, factory);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, factory: HandlerFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn get(&self, name: &str) -> Option<HandlerFactory> {
        self.factories.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

/// Core modules plus the modules each application ships.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    core: Arc<ModuleRegistry>,
    apps: HashMap<String, Arc<ModuleRegistry>>,
}

impl ModuleCatalog {
    pub fn new(core: ModuleRegistry) -> Self {
        Self {
            core: Arc::new(core),
            apps: HashMap::new(),
        }
    }

    /// Modules for the application deployed from directory `app_name`.
    pub fn with_app(mut self, app_name: impl Into<String>, modules: ModuleRegistry) -> Self {
        self.apps.insert(app_name.into(), Arc::new(modules));
        self
    }

    pub fn core(&self) -> &ModuleRegistry {
        &self.core
    }

    /// Build the namespace for one application deployment.
    pub fn namespace_for(&self, app_name: &str) -> Result<ModuleNamespace, NamespaceError> {
        let local = self.apps.get(app_name).cloned().unwrap_or_default();

        if let Some(name) = local.names().into_iter().find(|n| n.starts_with(CORE_PREFIX)) {
            return Err(NamespaceError::ReservedName {
                app: app_name.to_string(),
                name,
            });
        }

        Ok(ModuleNamespace {
            app_name: app_name.to_string(),
            core: Arc::clone(&self.core),
            local,
        })
    }
}

/// Two-tier lookup scope of one deployed application.
#[derive(Debug)]
pub struct ModuleNamespace {
    app_name: String,
    core: Arc<ModuleRegistry>,
    local: Arc<ModuleRegistry>,
}

impl ModuleNamespace {
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn resolve(&self, code: &str) -> Option<HandlerFactory> {
        self.core.get(code).or_else(|| self.local.get(code))
    }

    pub fn local_modules(&self) -> Vec<String> {
        self.local.names()
    }
}
