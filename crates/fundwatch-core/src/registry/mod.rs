//! Plugin-based service registry
//!
//! The registry allows fundraising services and state stores to be
//! registered dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fundwatch_core::registry::ServiceRegistry;
//! use fundwatch_core::config::ServiceConfig;
//!
//! // Create a registry with the built-in state stores
//! let registry = ServiceRegistry::with_builtin_stores();
//!
//! // Register services
//! registry.register_service("tiltify", Box::new(tiltify_factory));
//!
//! // Create a service from config
//! let config = ServiceConfig::Tiltify { ... };
//! let service = registry.create_service(&config)?;
//! ```
//!
//! ## Registration
//!
//! Service crates register themselves during initialization:
//!
//! ```rust,ignore
//! // In fundwatch-service-tiltify
//! pub fn register(registry: &ServiceRegistry) {
//!     registry.register_service("tiltify", Box::new(TiltifyFactory));
//! }
//! ```

use crate::config::{ServiceConfig, StateStoreConfig};
use crate::error::{Error, Result};
use crate::state::{FileStateStoreFactory, MemoryStateStoreFactory};
use crate::traits::{FundraisingService, FundraisingServiceFactory, StateStore, StateStoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registry for plugin-based service and state store creation
///
/// The registry maintains a map of type names to factory objects, allowing
/// dynamic instantiation based on configuration.
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ServiceRegistry {
    /// Registered fundraising service factories
    services: RwLock<HashMap<String, Box<dyn FundraisingServiceFactory>>>,

    /// Registered state store factories
    state_stores: RwLock<HashMap<String, Arc<dyn StateStoreFactory>>>,
}

impl ServiceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` state stores registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_state_store("memory", Arc::new(MemoryStateStoreFactory));
        registry.register_state_store("file", Arc::new(FileStateStoreFactory));
        registry
    }

    /// Register a fundraising service factory
    ///
    /// # Parameters
    ///
    /// - `name`: Service type name (e.g., "tiltify")
    /// - `factory`: Factory object for creating service instances
    pub fn register_service(
        &self,
        name: impl Into<String>,
        factory: Box<dyn FundraisingServiceFactory>,
    ) {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        services.insert(name.into(), factory);
    }

    /// Register a state store factory
    ///
    /// # Parameters
    ///
    /// - `name`: State store type name (e.g., "file", "memory")
    /// - `factory`: Factory object for creating state store instances
    pub fn register_state_store(&self, name: impl Into<String>, factory: Arc<dyn StateStoreFactory>) {
        let mut stores = self.state_stores.write().unwrap_or_else(PoisonError::into_inner);
        stores.insert(name.into(), factory);
    }

    /// Create a fundraising service from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn FundraisingService>)`: Created service instance
    /// - `Err(Error)`: If the service type is not registered or creation fails
    pub fn create_service(&self, config: &ServiceConfig) -> Result<Box<dyn FundraisingService>> {
        let service_type = config.type_name();
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);

        let factory = services
            .get(service_type)
            .ok_or_else(|| Error::config(format!("Unknown service type: {}", service_type)))?;

        factory.create(config)
    }

    /// Create a state store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn StateStore>)`: Created state store instance
    /// - `Err(Error)`: If the store type is not registered or creation fails
    pub async fn create_state_store(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>> {
        let store_type = config.type_name();

        // Release the lock before calling async create
        let factory = {
            let stores = self.state_stores.read().unwrap_or_else(PoisonError::into_inner);
            stores
                .get(store_type)
                .cloned()
                .ok_or_else(|| Error::config(format!("Unknown state store type: {}", store_type)))?
        };

        factory.create(config).await
    }

    /// List all registered service types
    pub fn list_services(&self) -> Vec<String> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services.keys().cloned().collect()
    }

    /// List all registered state store types
    pub fn list_state_stores(&self) -> Vec<String> {
        let stores = self.state_stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.keys().cloned().collect()
    }

    /// Check if a service type is registered
    pub fn has_service(&self, name: &str) -> bool {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services.contains_key(name)
    }

    /// Check if a state store type is registered
    pub fn has_state_store(&self, name: &str) -> bool {
        let stores = self.state_stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.contains_key(name)
    }
}
