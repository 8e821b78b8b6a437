//! Configuration Loading
//!
//! Reads `ManagerConfig` from JSON. A missing file means defaults.

use std::path::Path;

use tokio::fs;
use tracing::{debug, info};

use super::types::ManagerConfig;
use crate::error::Result;

impl ManagerConfig {
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: ManagerConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from disk; returns defaults when the file does not exist
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path).await {
            Ok(contents) => {
                let config = Self::from_json_str(&contents)?;
                info!("Loaded manager config from {:?}", path);
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).await?;
        Ok(())
    }
}
