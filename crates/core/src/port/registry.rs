// Registry Port
// Source of activity definitions and environment variables pushed by the server

use crate::domain::Activity;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Current activity definitions
    async fn activities(&self) -> Result<Vec<Activity>>;

    /// Environment variables to export into the command shell
    async fn environment_variables(&self) -> Result<BTreeMap<String, String>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Registry backed by in-memory values, replaceable at runtime
    #[derive(Default)]
    pub struct StaticRegistry {
        activities: Mutex<Vec<Activity>>,
        env: Mutex<BTreeMap<String, String>>,
    }

    impl StaticRegistry {
        pub fn new(activities: Vec<Activity>) -> Self {
            Self {
                activities: Mutex::new(activities),
                env: Mutex::new(BTreeMap::new()),
            }
        }

        pub fn set_activities(&self, activities: Vec<Activity>) {
            *self.activities.lock().unwrap() = activities;
        }

        pub fn set_env(&self, env: BTreeMap<String, String>) {
            *self.env.lock().unwrap() = env;
        }
    }

    #[async_trait]
    impl Registry for StaticRegistry {
        async fn activities(&self) -> Result<Vec<Activity>> {
            Ok(self.activities.lock().unwrap().clone())
        }

        async fn environment_variables(&self) -> Result<BTreeMap<String, String>> {
            Ok(self.env.lock().unwrap().clone())
        }
    }
}
