//! Standard paths used by ansible-vault-manager

use std::path::PathBuf;

/// Name of the per-user directory under the platform config dir
pub const APP_DIR: &str = "ansible-vault-manager";

/// Environment variable overriding the configuration file location
pub const CONFIG_ENV: &str = "VAULT_MANAGER_CONFIG";

/// Standard ansible-vault-manager paths
pub struct Paths {
    /// Config directory (~/.config/ansible-vault-manager)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join(APP_DIR);

        Self { config }
    }

    /// Location of the configuration file, honoring `VAULT_MANAGER_CONFIG`
    pub fn config_file(&self) -> PathBuf {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.config.join("config.yaml"),
        }
    }
}
