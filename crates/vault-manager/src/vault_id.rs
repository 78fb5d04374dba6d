//! Vault id codec
//!
//! A vault id is `<plugin>%<plugin id>`. The plugin id belongs to the backend;
//! by convention it is a `:`-separated list of fields whose optional last
//! field is a version.

use crate::error::{Result, VaultError};
use std::fmt;

/// Separates the plugin name from the plugin specific id
pub const PLUGIN_SEPARATOR: char = '%';

/// Separates a vault id from the client script path in usable-id strings
pub const CLIENT_SEPARATOR: char = '@';

/// Separates the fields of a plugin specific id
pub const FIELD_SEPARATOR: char = ':';

/// A decoded vault id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultId {
    pub plugin: String,
    pub plugin_id: String,
}

impl VaultId {
    /// Split on the first `%`. Anything after it is kept verbatim.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(PLUGIN_SEPARATOR) {
            Some((plugin, plugin_id)) if !plugin.is_empty() => Ok(Self {
                plugin: plugin.to_string(),
                plugin_id: plugin_id.to_string(),
            }),
            _ => Err(VaultError::MalformedVaultId(raw.to_string())),
        }
    }

    pub fn new(plugin: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            plugin_id: plugin_id.into(),
        }
    }

    /// `plugin%id@client`, the form ansible expects from `get-usable-ids`
    pub fn with_client(&self, client: &str) -> String {
        format!("{}{}{}", self, CLIENT_SEPARATOR, client)
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.plugin, PLUGIN_SEPARATOR, self.plugin_id)
    }
}

impl std::str::FromStr for VaultId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a plugin specific id into its fields
pub fn parse_plugin_id(raw: &str) -> Vec<&str> {
    raw.split(FIELD_SEPARATOR).collect()
}

/// Join fields back into a plugin specific id
pub fn join_fields<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| f.as_ref())
        .collect::<Vec<&str>>()
        .join(&FIELD_SEPARATOR.to_string())
}

/// Append `:<version>` only when there is a version.
///
/// An unversioned id must stay byte-identical, so no trailing separator.
pub fn join_with_version(base: &str, version: &str) -> String {
    if version.is_empty() {
        base.to_string()
    } else {
        format!("{}{}{}", base, FIELD_SEPARATOR, version)
    }
}
