use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;

/// Backend handle shared by every request.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Registry of loaded detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) -> SharedBackend {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        let shared: SharedBackend = Arc::new(Mutex::new(backend));
        self.backends.insert(name, shared.clone());
        shared
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Result<SharedBackend> {
        self.default_name
            .as_ref()
            .and_then(|name| self.get(name))
            .ok_or_else(|| anyhow!("no detector backend registered"))
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;

    #[test]
    fn first_registered_is_default() {
        let mut registry = BackendRegistry::new();
        assert!(registry.default_backend().is_err());
        registry.register(StubBackend::new());
        let backend = registry.default_backend().unwrap();
        assert_eq!(backend.lock().unwrap().name(), "stub");
        assert_eq!(registry.list(), vec!["stub".to_string()]);
    }

    #[test]
    fn unknown_name_is_absent() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        assert!(registry.get("tract").is_none());
        assert!(registry.get("stub").is_some());
    }
}
