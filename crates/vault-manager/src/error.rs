//! Error kinds shared by the codec, metadata store, backends and engine

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Malformed vault id '{0}': expected <plugin>%<plugin id>")]
    MalformedVaultId(String),

    #[error("Keyring plugin '{0}' not found")]
    UnknownPlugin(String),

    #[error("Invalid id '{id}' for plugin {plugin}: {reason}")]
    InvalidPluginId {
        plugin: &'static str,
        id: String,
        reason: String,
    },

    #[error("Invalid plugin parameter '{0}': expected key=value")]
    InvalidPluginParam(String),

    #[error("No id generated or fetched yet by plugin {0}")]
    IdNotGenerated(&'static str),

    #[error("Corrupt metadata file {path:?}: {source}")]
    MetadataCorrupt {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Included metadata file not found: {0:?}")]
    IncludeNotFound(PathBuf),

    #[error("Metadata include cycle: {0:?} includes one of its ancestors")]
    IncludeCycle(PathBuf),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("You can't override an existing version ({0:?}). Remove it or increment version before")]
    VersionConflict(PathBuf),

    #[error("Passwords mismatch")]
    PasswordMismatch,

    #[error("Empty password not allowed")]
    EmptyPassword,

    #[error("This file already exists: {0:?}")]
    FileAlreadyExists(PathBuf),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
