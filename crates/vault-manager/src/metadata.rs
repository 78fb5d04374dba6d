//! Metadata sidecar
//!
//! Each vault directory carries a YAML file recording which vault ids protect
//! which files:
//!
//! ```yaml
//! vault_ids:
//!   - id: dev:us-east-1:/ansible/dev/7f0c...:1
//!     plugin: aws_ssm
//!     files: [secrets.yml]
//! include:
//!   - ../common/_metadata.yml
//! ```
//!
//! Includes are expanded on load: direct entries first, then each include's
//! entries in list order. Saving only ever writes the record it was given.

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vault_manager_core::config::DEFAULT_METADATA_FILE;

/// Mode of a sidecar created from scratch. It holds ids, not secrets.
#[cfg(unix)]
const NEW_FILE_MODE: u32 = 0o644;

/// One association between a vault id and the files it protects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultIdEntry {
    /// Plugin specific id
    pub id: String,
    /// Backend name (`client` in files written by older versions)
    #[serde(alias = "client")]
    pub plugin: String,
    /// Files encrypted with this id's secret
    #[serde(default)]
    pub files: Vec<String>,
}

/// Contents of one metadata file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default)]
    pub vault_ids: Vec<VaultIdEntry>,

    /// Other metadata files, absolute or relative to this file's directory
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<PathBuf>,
}

/// Reads and writes the metadata sidecar of vault directories
#[derive(Debug, Clone)]
pub struct MetadataStore {
    file_name: String,
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_FILE)
    }
}

impl MetadataStore {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Path of the sidecar inside `dir`
    pub fn file_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.file_name)
    }

    /// Load the record for `dir` with all includes merged into `vault_ids`.
    ///
    /// A directory without a sidecar yields an empty record.
    pub fn load(&self, dir: &Path) -> Result<MetadataRecord> {
        let path = self.file_path(dir);
        if !path.exists() {
            debug!(path = %path.display(), "no metadata file");
            return Ok(MetadataRecord::default());
        }

        let mut ancestors = HashSet::new();
        let vault_ids = self.expand(&path, &mut ancestors)?;
        Ok(MetadataRecord {
            vault_ids,
            include: Vec::new(),
        })
    }

    /// Load only the top-level record for `dir`, includes left untouched.
    ///
    /// This is the view to modify and hand back to [`MetadataStore::save`].
    pub fn load_raw(&self, dir: &Path) -> Result<MetadataRecord> {
        let path = self.file_path(dir);
        if !path.exists() {
            return Ok(MetadataRecord::default());
        }
        read_record(&path)
    }

    /// Overwrite the sidecar of `dir` with `record`.
    ///
    /// Written to a temporary file in the same directory and renamed over the
    /// target, so an interrupted write never leaves a truncated file. There is
    /// no locking: two concurrent writers race and the last rename wins.
    pub fn save(&self, record: &MetadataRecord, dir: &Path) -> Result<()> {
        let path = self.file_path(dir);
        let content = serde_yaml::to_string(record).map_err(std::io::Error::other)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;

        // Temp files are owner-only; keep whatever the sidecar had
        match fs::metadata(&path) {
            Ok(existing) => fs::set_permissions(tmp.path(), existing.permissions())?,
            Err(e) if e.kind() == ErrorKind::NotFound => set_new_file_mode(tmp.path())?,
            Err(e) => return Err(e.into()),
        }
        tmp.persist(&path).map_err(|e| e.error)?;

        info!(path = %path.display(), entries = record.vault_ids.len(), "metadata written");
        Ok(())
    }

    fn expand(&self, path: &Path, ancestors: &mut HashSet<PathBuf>) -> Result<Vec<VaultIdEntry>> {
        let canonical = fs::canonicalize(path)?;
        if !ancestors.insert(canonical.clone()) {
            return Err(VaultError::IncludeCycle(path.to_path_buf()));
        }

        let record = read_record(path)?;
        let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut entries = record.vault_ids;

        for include in &record.include {
            let target = self.resolve_include(&base, include)?;
            debug!(from = %path.display(), include = %target.display(), "expanding include");
            entries.extend(self.expand(&target, ancestors)?);
        }

        // Only the current chain counts as ancestors; siblings may share includes.
        ancestors.remove(&canonical);
        Ok(entries)
    }

    fn resolve_include(&self, base: &Path, include: &Path) -> Result<PathBuf> {
        let mut target = if include.is_absolute() {
            include.to_path_buf()
        } else {
            base.join(include)
        };
        if target.is_dir() {
            target = self.file_path(&target);
        }
        if !target.exists() {
            return Err(VaultError::IncludeNotFound(target));
        }
        Ok(target)
    }
}

fn read_record(path: &Path) -> Result<MetadataRecord> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(VaultError::IncludeNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(MetadataRecord::default());
    }

    serde_yaml::from_str(&content).map_err(|source| VaultError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn set_new_file_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(NEW_FILE_MODE))
}

#[cfg(not(unix))]
fn set_new_file_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
