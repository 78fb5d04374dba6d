//! Vault Manager Core - Shared functionality for the ansible-vault-manager tools
//!
//! Standard locations, the user configuration file, and the small amount of
//! subprocess plumbing the keyring backends share.

pub mod config;
pub mod paths;
pub mod process;

pub use config::{Binaries, ManagerConfig, PluginParams};
pub use paths::Paths;
