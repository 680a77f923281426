// File Registry - activity definitions and env vars from a JSON document
//
// {
//   "activities": [{"id": "a1", "command": "uptime", "interval": 60}],
//   "env": {"REGION": "eu-west"}
// }
//
// The document is loaded into a snapshot; `reload` replaces it (on SIGHUP).

use async_trait::async_trait;
use outpost_core::domain::Activity;
use outpost_core::error::Result;
use outpost_core::port::Registry;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    activities: Vec<Activity>,
    #[serde(default, alias = "envVariables")]
    env: BTreeMap<String, String>,
}

pub struct FileRegistry {
    path: PathBuf,
    snapshot: Mutex<RegistryDocument>,
}

impl FileRegistry {
    /// Load the file; a missing file is an empty registry
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = read_document(&path).await?;
        Ok(Self {
            path,
            snapshot: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file; the previous snapshot is kept if it cannot be parsed
    pub async fn reload(&self) -> Result<usize> {
        let document = read_document(&self.path).await?;
        let count = document.activities.len();
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = document;
        info!(path = %self.path.display(), activities = count, "Registry reloaded");
        Ok(count)
    }

    fn snapshot(&self) -> RegistryDocument {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn read_document(path: &Path) -> Result<RegistryDocument> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "Registry file not found, starting empty");
            return Ok(RegistryDocument::default());
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl Registry for FileRegistry {
    async fn activities(&self) -> Result<Vec<Activity>> {
        Ok(self.snapshot().activities)
    }

    async fn environment_variables(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.snapshot().env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::domain::ActivityKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = FileRegistry::open(dir.path().join("absent.json")).await.unwrap();
        assert!(registry.activities().await.unwrap().is_empty());
        assert!(registry.environment_variables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parses_activities_and_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activities.json");
        std::fs::write(
            &path,
            r#"{
                "activities": [
                    {"_id": "a1", "name": "uptime", "command": "uptime", "interval": 60},
                    {"id": "p1", "command": "system_metrics", "interval": 30, "type": "plugin"}
                ],
                "envVariables": {"REGION": "eu"}
            }"#,
        )
        .unwrap();

        let registry = FileRegistry::open(&path).await.unwrap();
        let activities = registry.activities().await.unwrap();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].id, "a1");
        assert_eq!(activities[1].kind, ActivityKind::Plugin);
        assert_eq!(
            registry.environment_variables().await.unwrap().get("REGION"),
            Some(&"eu".to_string())
        );
    }

    #[tokio::test]
    async fn test_reload_keeps_snapshot_on_bad_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activities.json");
        std::fs::write(&path, r#"{"activities": [{"id": "a1", "command": "date", "interval": 5}]}"#)
            .unwrap();
        let registry = FileRegistry::open(&path).await.unwrap();

        std::fs::write(&path, "{not json").unwrap();
        assert!(registry.reload().await.is_err());
        assert_eq!(registry.activities().await.unwrap().len(), 1);

        std::fs::write(&path, r#"{"activities": []}"#).unwrap();
        assert_eq!(registry.reload().await.unwrap(), 0);
        assert!(registry.activities().await.unwrap().is_empty());
    }
}
