use std::path::{Path, PathBuf};

use anyhow::Context;
use revlog_kernel::EngineConfig;
use revlog_persist::StoreConfig;
use serde::{Deserialize, Serialize};

/// Store directory used when neither `--store` nor the config file names one.
pub const DEFAULT_STORE_DIR: &str = ".revlog";

/// Contents of the optional YAML config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: Option<PathBuf>,
    pub engine: EngineConfig,
    pub storage: StoreConfig,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// `--store` wins over the config file.
    pub fn store_dir(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.store.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR))
    }
}
