use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Default for `--keep-package`.
    #[serde(default)]
    pub keep_package: bool,
    /// How long to wait for another import to finish; 0 rejects immediately.
    #[serde(default)]
    pub lock_timeout_secs: u64,
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            keep_package: false,
            lock_timeout_secs: 0,
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}

impl ImportConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

fn default_stale_lock_secs() -> u64 {
    6 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttachmentsConfig {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

fn default_max_parallel() -> usize {
    4
}

impl Config {
    /// A configuration with defaults for everything but the data root.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            data: DataConfig { root: root.into() },
            import: ImportConfig::default(),
            attachments: AttachmentsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.data.root.as_os_str().is_empty() {
        anyhow::bail!("data.root must not be empty");
    }

    if config.attachments.max_parallel == 0 {
        anyhow::bail!("attachments.max_parallel must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(content: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("harbor.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let (_tmp, path) = write("[data]\nroot = \"./data\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.data.root, PathBuf::from("./data"));
        assert!(!cfg.import.keep_package);
        assert_eq!(cfg.import.lock_timeout(), Duration::ZERO);
        assert_eq!(cfg.import.stale_lock_secs, 21600);
        assert_eq!(cfg.attachments.max_parallel, 4);
    }

    #[test]
    fn rejects_zero_parallelism() {
        let (_tmp, path) = write("[data]\nroot = \"d\"\n[attachments]\nmax_parallel = 0\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_parallel"));
    }

    #[test]
    fn data_root_is_required() {
        let (_tmp, path) = write("[import]\nkeep_package = true\n");
        assert!(load_config(&path).is_err());
    }
}
