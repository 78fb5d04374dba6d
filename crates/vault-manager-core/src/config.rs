//! Configuration management
//!
//! Configuration file:
//! - ~/.config/ansible-vault-manager/config.yaml (or $VAULT_MANAGER_CONFIG)
//!
//! Every field is optional. A missing file means built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Backend parameters given as `key=value` pairs
pub type PluginParams = BTreeMap<String, String>;

/// Default name of the per-directory metadata sidecar
pub const DEFAULT_METADATA_FILE: &str = "_metadata.yml";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerConfig {
    /// Plugin used by `create` when `--plugin` is omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_plugin: Option<String>,

    /// Default parameters per plugin, overridden by `--plugin-param`
    #[serde(default)]
    pub plugin_params: BTreeMap<String, PluginParams>,

    /// External executables used by the backends
    #[serde(default)]
    pub binaries: Binaries,

    /// Name of the metadata sidecar file inside a vault directory
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
}

fn default_metadata_file() -> String {
    DEFAULT_METADATA_FILE.to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_plugin: None,
            plugin_params: BTreeMap::new(),
            binaries: Binaries::default(),
            metadata_file: default_metadata_file(),
        }
    }
}

/// External executables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Binaries {
    /// AWS CLI, used by the parameter-store backend
    #[serde(default = "default_aws")]
    pub aws: String,

    /// Bitwarden CLI, used by the password-manager backend
    #[serde(default = "default_bw")]
    pub bw: String,
}

fn default_aws() -> String {
    "aws".to_string()
}

fn default_bw() -> String {
    "bw".to_string()
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            aws: default_aws(),
            bw: default_bw(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        Ok(())
    }

    /// Configured defaults for a plugin with `explicit` layered on top
    pub fn params_for(&self, plugin: &str, explicit: &PluginParams) -> PluginParams {
        let mut params = self.plugin_params.get(plugin).cloned().unwrap_or_default();
        params.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = ManagerConfig::load_from(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.metadata_file, "_metadata.yml");
        assert_eq!(config.binaries.bw, "bw");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "default_plugin: local_fs\nplugin_params:\n  local_fs:\n    basepath: /srv/secrets\n",
        )
        .unwrap();

        let config = ManagerConfig::load_from(&path).unwrap();
        assert_eq!(config.default_plugin.as_deref(), Some("local_fs"));
        assert_eq!(config.binaries.aws, "aws");
        assert_eq!(
            config.plugin_params["local_fs"].get("basepath").map(String::as_str),
            Some("/srv/secrets")
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");
        let mut config = ManagerConfig::default();
        config.binaries.bw = "/opt/bw".to_string();

        config.save_to(&path).unwrap();
        assert_eq!(ManagerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_explicit_params_win() {
        let mut config = ManagerConfig::default();
        let mut defaults = PluginParams::new();
        defaults.insert("region".to_string(), "eu-west-1".to_string());
        defaults.insert("profile".to_string(), "dev".to_string());
        config.plugin_params.insert("aws_ssm".to_string(), defaults);

        let mut explicit = PluginParams::new();
        explicit.insert("region".to_string(), "us-east-1".to_string());

        let merged = config.params_for("aws_ssm", &explicit);
        assert_eq!(merged["region"], "us-east-1");
        assert_eq!(merged["profile"], "dev");
        assert!(config.params_for("bitwarden", &explicit).contains_key("region"));
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "plugin_params: [unclosed").unwrap();
        assert!(ManagerConfig::load_from(&path).is_err());
    }
}
