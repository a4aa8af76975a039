//! Engine configuration file support.
//!
//! Loads configuration from ~/.skybit/config.toml (or `$SKYBIT_DIR`).

use crate::engine::{TriggerEngineConfig, WorkerPoolConfig};
use crate::error::{EngineError, Result};
use crate::paths;
use crate::runtime::{AgentBackend, ExecutionConfig, HttpAgentBackend, UnconfiguredBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const API_KEY_ENV: &str = "SKYBIT_API_KEY";
pub const DB_PATH_ENV: &str = "SKYBIT_DB_PATH";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SkybitConfig {
    /// Database file; defaults to ~/.skybit/skybit.db
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size.
    pub max_concurrent_runs: usize,
    /// Upper bound on the clock's sleep between evaluations.
    pub max_tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 20,
            max_tick_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionSettings {
    pub step_buffer: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self { step_buffer: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub sandbox_timeout_hours: u64,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.skybit.dev/v1".to_string(),
            sandbox_timeout_hours: 1,
            // Sandbox lifetime plus a little slack for the final event.
            request_timeout_secs: 3900,
        }
    }
}

/// Tuning knobs for the engine components.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub worker_pool: WorkerPoolConfig,
    pub trigger: TriggerEngineConfig,
    pub execution: ExecutionConfig,
}

impl SkybitConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; a file that does not parse is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => paths::config_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| EngineError::Config(format!("invalid config {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `SKYBIT_API_KEY` and `SKYBIT_DB_PATH` from the process
    /// environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.backend.api_key = Some(key);
        }
        if let Some(db_path) = lookup(DB_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            self.database_path = Some(PathBuf::from(db_path));
        }
        self
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => paths::database_path(),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            worker_pool: WorkerPoolConfig {
                worker_count: self.scheduler.max_concurrent_runs.max(1),
            },
            trigger: TriggerEngineConfig {
                max_tick: Duration::from_millis(self.scheduler.max_tick_ms.max(1)),
            },
            execution: ExecutionConfig {
                step_buffer: self.execution.step_buffer.max(1),
                sandbox_timeout: Duration::from_secs(
                    self.backend.sandbox_timeout_hours.max(1).saturating_mul(3600),
                ),
            },
        }
    }

    /// HTTP backend when an API key is configured, otherwise a backend that
    /// fails every run with a configuration error.
    pub fn build_backend(&self) -> Result<Arc<dyn AgentBackend>> {
        match self.backend.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {
                let backend = HttpAgentBackend::new(
                    key,
                    self.backend.base_url.clone(),
                    Duration::from_secs(self.backend.request_timeout_secs),
                )
                .map_err(|e| EngineError::Config(e.to_string()))?;
                info!(base_url = %self.backend.base_url, "Agent backend configured");
                Ok(Arc::new(backend))
            }
            _ => {
                warn!("No backend API key configured, task runs will fail until one is set");
                Ok(Arc::new(UnconfiguredBackend))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = SkybitConfig::load(Some(&temp_dir.path().join("config.toml"))).unwrap();
        assert_eq!(config, SkybitConfig::default());
        assert_eq!(config.scheduler.max_concurrent_runs, 20);
        assert_eq!(config.execution.step_buffer, 64);
        assert_eq!(config.backend.sandbox_timeout_hours, 1);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = SkybitConfig::parse(
            r#"
database_path = "/tmp/tasks.db"

[scheduler]
max_concurrent_runs = 4

[backend]
api_key = "sk-test"
"#,
        )
        .unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/tasks.db")));
        assert_eq!(config.scheduler.max_concurrent_runs, 4);
        assert_eq!(config.scheduler.max_tick_ms, 1000);
        assert_eq!(config.backend.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.backend.base_url, "https://api.skybit.dev/v1");
    }

    #[test]
    fn test_unparsable_file_is_config_error() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[scheduler\nmax_concurrent_runs = ").unwrap();

        let err = SkybitConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let config = SkybitConfig::default().with_overrides_from(|key| match key {
            API_KEY_ENV => Some("from-env".to_string()),
            DB_PATH_ENV => Some("/data/skybit.db".to_string()),
            _ => None,
        });
        assert_eq!(config.backend.api_key.as_deref(), Some("from-env"));
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/data/skybit.db")
        );
    }

    #[test]
    fn test_engine_options_follow_config() {
        let mut config = SkybitConfig::default();
        config.scheduler.max_concurrent_runs = 3;
        config.backend.sandbox_timeout_hours = 2;
        let options = config.engine_options();
        assert_eq!(options.worker_pool.worker_count, 3);
        assert_eq!(options.execution.sandbox_timeout, Duration::from_secs(7200));
    }

    #[test]
    fn test_huge_sandbox_timeout_saturates() {
        let mut config = SkybitConfig::default();
        config.backend.sandbox_timeout_hours = u64::MAX;
        let options = config.engine_options();
        assert_eq!(options.execution.sandbox_timeout, Duration::from_secs(u64::MAX));
    }
}
