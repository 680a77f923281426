// Plugin Port
// In-process collectors, registered explicitly by name at startup.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin failed: {0}")]
    Failed(String),

    #[error("Plugin exceeded deadline of {0}ms")]
    DeadlineExceeded(i64),
}

/// A synchronous collector producing a structured value
///
/// `collect` runs on a blocking thread and may panic; panics are contained.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn collect(&self) -> Result<serde_json::Value, PluginError>;
}

/// Capability registry: plugin name -> implementation
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own name, replacing any previous one
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        self.plugins.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.plugins.keys().collect();
        names.sort();
        f.debug_struct("PluginRegistry").field("plugins", &names).finish()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::time::Duration;

    /// Mock plugin behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Return the value
        Value(serde_json::Value),
        /// Return an error
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Block the thread before returning the value
        Slow(Duration, serde_json::Value),
    }

    pub struct MockPlugin {
        name: String,
        behavior: MockBehavior,
    }

    impl MockPlugin {
        pub fn new(name: impl Into<String>, behavior: MockBehavior) -> Self {
            Self {
                name: name.into(),
                behavior,
            }
        }
    }

    impl Plugin for MockPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn collect(&self) -> Result<serde_json::Value, PluginError> {
            match &self.behavior {
                MockBehavior::Value(value) => Ok(value.clone()),
                MockBehavior::Fail(msg) => Err(PluginError::Failed(msg.clone())),
                MockBehavior::Panic(msg) => panic!("{}", msg),
                MockBehavior::Slow(delay, value) => {
                    std::thread::sleep(*delay);
                    Ok(value.clone())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::{MockBehavior, MockPlugin};
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(MockPlugin::new(
            "uptime",
            MockBehavior::Value(serde_json::json!(1)),
        )));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("uptime"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.get("uptime").unwrap().collect().unwrap(), serde_json::json!(1));
    }
}
