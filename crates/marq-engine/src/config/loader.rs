use super::schema::MarqConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./marq.yaml
    /// 2. ~/.marq/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<MarqConfig, ConfigError> {
        let local_config = PathBuf::from("./marq.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".marq").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(MarqConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<MarqConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: MarqConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_from_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marq.yaml");
        std::fs::write(&path, "workflow:\n  max_iterations: 7\n").unwrap();

        let config = ConfigLoader::load_from(&path).await.unwrap();
        assert_eq!(config.workflow.max_iterations, 7);
    }

    #[tokio::test]
    async fn load_from_rejects_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marq.yaml");
        std::fs::write(&path, "workflow: [not a map").unwrap();

        assert!(matches!(
            ConfigLoader::load_from(&path).await,
            Err(ConfigError::Parse(_))
        ));
    }
}
