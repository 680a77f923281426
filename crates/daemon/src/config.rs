// Daemon configuration from OUTPOST_* environment variables

use anyhow::{Context, Result};
use outpost_core::application::AgentConfig;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.outpost/offline.db";
const DEFAULT_TEMP_DIR: &str = "~/.outpost/tmp";
const DEFAULT_ACTIVITIES_PATH: &str = "~/.outpost/activities.json";
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub activities_path: PathBuf,
    pub server_url: String,
    pub http_timeout: Duration,
    pub agent: AgentConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str, default: &str| -> PathBuf {
            let raw = lookup(key).unwrap_or_else(|| default.to_string());
            PathBuf::from(shellexpand::tilde(&raw).into_owned())
        };

        let mut agent = AgentConfig {
            temp_dir: path("OUTPOST_TEMP_DIR", DEFAULT_TEMP_DIR),
            ..AgentConfig::default()
        };

        if let Some(secs) = parse::<u64>(&lookup, "OUTPOST_COMMAND_TIMEOUT_SECS")? {
            agent.command_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = parse::<usize>(&lookup, "OUTPOST_MAX_CONSUMERS")? {
            agent.max_consumers = max;
        }
        if let Some(threshold) = parse::<u64>(&lookup, "OUTPOST_RECYCLE_THRESHOLD")? {
            agent.recycle_threshold = threshold;
        }
        if let Some(secs) = parse::<u64>(&lookup, "OUTPOST_METRIC_TIMEOUT_SECS")? {
            agent.metric_timeout = Duration::from_secs(secs);
        }
        if let Some(list) = lookup("OUTPOST_WHITELIST") {
            agent.whitelist = parse_whitelist(&list)?;
        }

        Ok(Self {
            db_path: path("OUTPOST_DB_PATH", DEFAULT_DB_PATH),
            activities_path: path("OUTPOST_ACTIVITIES_PATH", DEFAULT_ACTIVITIES_PATH),
            server_url: lookup("OUTPOST_SERVER_URL")
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            http_timeout: HTTP_TIMEOUT,
            agent,
        })
    }
}

/// A JSON array of patterns, or one pattern per line
///
/// Commas are regex syntax (`{1,3}`), so they never separate patterns.
fn parse_whitelist(raw: &str) -> Result<Vec<String>> {
    let patterns: Vec<String> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).context("OUTPOST_WHITELIST is not a JSON list of strings")?
    } else {
        raw.lines().map(String::from).collect()
    };

    Ok(patterns
        .into_iter()
        .map(|pattern| pattern.trim().to_string())
        .filter(|pattern| !pattern.is_empty())
        .collect())
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: {:?}", key, raw))
        })
        .transpose()
}
