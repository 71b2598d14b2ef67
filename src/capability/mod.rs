// ABOUTME: Capability contract and registry for pluggable device/browser drivers
// ABOUTME: Maps capability names to driver instances and exposes a uniform invoke surface

pub mod error;
pub mod shell;
pub mod vision;

pub use error::{CapabilityError, Result};
pub use vision::{
    MatchResult, OcrEngine, Region, TemplateMatcher, UnconfiguredMatcher, UnconfiguredOcr,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Parameters handed to a capability action after `$var` resolution.
pub type Params = Map<String, Value>;

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        ""
    }

    fn supported_platforms(&self) -> Vec<String> {
        Vec::new()
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Action names this capability understands. An empty list means the
    /// capability accepts arbitrary action names.
    fn list_actions(&self) -> Vec<String>;

    async fn invoke(&self, action: &str, params: &Params) -> Result<Value>;

    async fn health_check(&self) -> bool {
        true
    }
}

struct RegisteredCapability {
    driver: Arc<dyn Capability>,
    enabled: bool,
}

/// Discovery record for a registered capability.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CapabilityInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub platforms: Vec<String>,
    pub actions: Vec<String>,
    pub enabled: bool,
}

pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, RegisteredCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the built-in capabilities
    pub async fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(shell::ShellCapability)).await;
        registry
    }

    /// Register a driver under its own name, replacing any previous instance
    pub async fn register(&self, driver: Arc<dyn Capability>) {
        let name = driver.name().to_string();
        let mut capabilities = self.capabilities.write().await;
        if capabilities
            .insert(
                name.clone(),
                RegisteredCapability {
                    driver,
                    enabled: true,
                },
            )
            .is_some()
        {
            warn!("Capability '{}' re-registered, previous instance replaced", name);
        } else {
            info!("Registered capability: {}", name);
        }
    }

    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Capability>> {
        let mut capabilities = self.capabilities.write().await;
        capabilities.remove(name).map(|entry| entry.driver)
    }

    pub async fn enable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true).await
    }

    pub async fn disable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut capabilities = self.capabilities.write().await;
        let entry = capabilities
            .get_mut(name)
            .ok_or_else(|| CapabilityError::NotFound {
                name: name.to_string(),
            })?;
        entry.enabled = enabled;
        info!(
            "Capability '{}' {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        let capabilities = self.capabilities.read().await;
        capabilities.get(name).map(|e| e.enabled).unwrap_or(false)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.capabilities.read().await.contains_key(name)
    }

    /// Discovery listing, sorted by name
    pub async fn list(&self) -> Vec<CapabilityInfo> {
        let capabilities = self.capabilities.read().await;
        let mut infos: Vec<CapabilityInfo> = capabilities
            .values()
            .map(|entry| CapabilityInfo {
                name: entry.driver.name().to_string(),
                version: entry.driver.version().to_string(),
                description: entry.driver.description().to_string(),
                platforms: entry.driver.supported_platforms(),
                actions: entry.driver.list_actions(),
                enabled: entry.enabled,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn actions_of(&self, name: &str) -> Option<Vec<String>> {
        let capabilities = self.capabilities.read().await;
        capabilities.get(name).map(|e| e.driver.list_actions())
    }

    /// Initialize every registered driver. Drivers that fail their health
    /// check or initialization stay registered but disabled.
    pub async fn initialize_all(&self) {
        for (name, driver) in self.snapshot().await {
            let outcome = if !driver.health_check().await {
                Err(CapabilityError::Unavailable { name: name.clone() })
            } else {
                driver.initialize().await
            };

            if let Err(e) = outcome {
                warn!("Capability '{}' left disabled: {}", name, e);
                if let Err(e) = self.disable(&name).await {
                    warn!("Capability '{}' could not be disabled: {}", name, e);
                }
            } else {
                debug!("Capability '{}' initialized", name);
            }
        }
    }

    /// Run cleanup on every driver; failures are logged and swallowed
    pub async fn cleanup_all(&self) {
        for (name, driver) in self.snapshot().await {
            if let Err(e) = driver.cleanup().await {
                warn!("Cleanup of capability '{}' failed: {}", name, e);
            }
        }
    }

    /// Invoke `action` on the named capability. The registry lock is released
    /// before the driver runs.
    pub async fn invoke(&self, capability: &str, action: &str, params: &Params) -> Result<Value> {
        let driver = {
            let capabilities = self.capabilities.read().await;
            let entry = capabilities
                .get(capability)
                .ok_or_else(|| CapabilityError::NotFound {
                    name: capability.to_string(),
                })?;
            if !entry.enabled {
                return Err(CapabilityError::Disabled {
                    name: capability.to_string(),
                });
            }
            Arc::clone(&entry.driver)
        };

        debug!("Invoking {}.{}", capability, action);
        driver.invoke(action, params).await
    }

    async fn snapshot(&self) -> Vec<(String, Arc<dyn Capability>)> {
        let capabilities = self.capabilities.read().await;
        capabilities
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.driver)))
            .collect()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
