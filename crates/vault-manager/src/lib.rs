//! ansible-vault-manager - vault id broker for Ansible
//!
//! Resolves vault ids (`<plugin>%<plugin id>`) into passwords through
//! pluggable keyrings: AWS SSM Parameter Store, Bitwarden, or a local
//! versioned file store. A YAML sidecar in each vault directory records which
//! vault ids protect which files, so `get-usable-ids` can tell ansible which
//! of them the current user is able to open.

pub mod cipher;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod plugin;
pub mod plugins;
pub mod prompt;
pub mod vault_id;

pub use cipher::{AnsibleVaultCipher, PayloadCipher};
pub use engine::{CreateRequest, Created, Engine, PasswordInput};
pub use error::{Result, VaultError};
pub use metadata::{MetadataRecord, MetadataStore, VaultIdEntry};
pub use plugin::{parse_plugin_params, KeyringPlugin, PluginRegistry};
pub use prompt::{Prompter, ScriptedPrompter, TerminalPrompter};
pub use vault_id::VaultId;
