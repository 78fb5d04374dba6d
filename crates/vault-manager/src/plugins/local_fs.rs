//! Local versioned file keyring
//!
//! Id format: `<basepath>:<filename>[:<version>]`. Each version of a secret is
//! a separate file `<basepath>/<filename>.<version>`; versions are never
//! overwritten.

use crate::error::{Result, VaultError};
use crate::plugin::{param_or_ask, KeyringPlugin};
use crate::prompt::Prompter;
use crate::vault_id::{join_fields, join_with_version, parse_plugin_id};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;
use vault_manager_core::PluginParams;

pub const NAME: &str = "local_fs";

/// Decoded local file id
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSecretId {
    basepath: String,
    filename: String,
    version: Option<u32>,
}

impl FileSecretId {
    fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| VaultError::InvalidPluginId {
            plugin: NAME,
            id: raw.to_string(),
            reason: reason.to_string(),
        };

        let fields = parse_plugin_id(raw);
        if fields.len() < 2 || fields.len() > 3 {
            return Err(invalid("expected <basepath>:<filename>[:<version>]"));
        }
        if fields[1].is_empty() {
            return Err(invalid("empty filename"));
        }
        let version = match fields.get(2) {
            Some(v) => Some(v.parse::<u32>().map_err(|_| invalid("version is not a number"))?),
            None => None,
        };

        Ok(Self {
            basepath: fields[0].to_string(),
            filename: fields[1].to_string(),
            version,
        })
    }

    fn base(&self) -> String {
        join_fields(&[self.basepath.as_str(), self.filename.as_str()])
    }

    fn version_path(&self, version: u32) -> PathBuf {
        Path::new(&self.basepath).join(format!("{}.{}", self.filename, version))
    }

    /// Highest version present on disk
    fn latest_version(&self) -> Result<Option<u32>> {
        let dir = Path::new(&self.basepath);
        if !dir.exists() {
            return Ok(None);
        }

        let prefix = format!("{}.", self.filename);
        let mut latest = None;
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(version) = name.strip_prefix(&prefix).and_then(|v| v.parse::<u32>().ok()) {
                latest = latest.max(Some(version));
            }
        }
        Ok(latest)
    }
}

#[derive(Debug, Default)]
pub struct LocalFsPlugin {
    current: Option<FileSecretId>,
}

impl LocalFsPlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyringPlugin for LocalFsPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn generate_id(&mut self, params: &PluginParams, prompter: &mut dyn Prompter) -> Result<String> {
        let basepath = param_or_ask(
            params,
            &["basepath", "path"],
            "Base path (ex. /mnt/secrets/myproject/): ",
            prompter,
        )?;

        let id = FileSecretId {
            basepath,
            filename: Uuid::new_v4().to_string(),
            version: None,
        };
        let raw = id.base();
        self.current = Some(id);
        Ok(raw)
    }

    fn fetch(&mut self, plugin_id: &str) -> Result<String> {
        let id = FileSecretId::parse(plugin_id)?;
        let path = id.version_path(id.version.unwrap_or(1));

        let password = match fs::read_to_string(&path) {
            Ok(password) => password,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VaultError::SecretNotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        self.current = Some(id);
        Ok(password)
    }

    fn set_password(&mut self, plugin_id: &str, password: &str) -> Result<Option<String>> {
        let id = FileSecretId::parse(plugin_id)?;
        let current = match id.version {
            Some(version) => Some(version),
            None => id.latest_version()?,
        };
        let new_version = match current {
            Some(version) => version.checked_add(1).ok_or_else(|| VaultError::InvalidPluginId {
                plugin: NAME,
                id: plugin_id.to_string(),
                reason: format!("no version after {}", version),
            })?,
            None => 1,
        };

        let path = id.version_path(new_version);
        if path.exists() {
            return Err(VaultError::VersionConflict(path));
        }
        fs::create_dir_all(&id.basepath)?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = match options.open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(VaultError::VersionConflict(path))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(password.as_bytes())?;

        info!(path = %path.display(), version = new_version, "secret version written");
        self.current = Some(id);
        Ok(Some(new_version.to_string()))
    }

    fn append_id_version(&self, version: Option<&str>) -> Result<String> {
        let id = self.current.as_ref().ok_or(VaultError::IdNotGenerated(NAME))?;
        Ok(join_with_version(&id.base(), version.unwrap_or_default()))
    }
}
