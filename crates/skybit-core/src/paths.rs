use crate::error::{EngineError, Result};
use std::path::PathBuf;

const SKYBIT_DIR: &str = ".skybit";
const DB_FILE: &str = "skybit.db";
const CONFIG_FILE: &str = "config.toml";
const LOGS_DIR: &str = "logs";

/// Environment variable to override the Skybit directory.
pub const SKYBIT_DIR_ENV: &str = "SKYBIT_DIR";

/// Resolve the Skybit directory.
/// Priority: SKYBIT_DIR env var > ~/.skybit/
pub fn resolve_skybit_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(SKYBIT_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(SKYBIT_DIR))
        .ok_or_else(|| EngineError::Config("failed to determine home directory".to_string()))
}

/// Ensure the Skybit directory exists and return its path.
pub fn ensure_skybit_dir() -> Result<PathBuf> {
    let dir = resolve_skybit_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| {
        EngineError::Config(format!("failed to create {}: {e}", dir.display()))
    })?;
    Ok(dir)
}

/// Default database path: ~/.skybit/skybit.db
pub fn database_path() -> Result<PathBuf> {
    Ok(resolve_skybit_dir()?.join(DB_FILE))
}

/// Config file path: ~/.skybit/config.toml
pub fn config_path() -> Result<PathBuf> {
    Ok(resolve_skybit_dir()?.join(CONFIG_FILE))
}

/// Logs directory: ~/.skybit/logs/
pub fn logs_dir() -> Result<PathBuf> {
    let dir = ensure_skybit_dir()?.join(LOGS_DIR);
    std::fs::create_dir_all(&dir).map_err(|e| {
        EngineError::Config(format!("failed to create {}: {e}", dir.display()))
    })?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_live_in_skybit_dir() {
        let dir = resolve_skybit_dir().unwrap();
        assert_eq!(database_path().unwrap(), dir.join("skybit.db"));
        assert_eq!(config_path().unwrap(), dir.join("config.toml"));
    }
}
