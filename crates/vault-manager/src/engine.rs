//! Operations: fetch, get-usable-ids, create
//!
//! Each operation is a single pass over the metadata and the backends it
//! names. Nothing is kept between operations.

use crate::cipher::{PayloadCipher, INITIAL_PAYLOAD};
use crate::error::{Result, VaultError};
use crate::metadata::{MetadataStore, VaultIdEntry};
use crate::plugin::PluginRegistry;
use crate::prompt::Prompter;
use crate::vault_id::VaultId;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use vault_manager_core::{ManagerConfig, PluginParams};

/// Where the new secret of `create` comes from
#[derive(Debug, Clone)]
pub enum PasswordInput {
    /// Ask twice on the terminal; both answers must match
    Interactive,
    /// Already read (e.g. from stdin); surrounding whitespace is dropped
    Provided(String),
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Vault directory holding the metadata sidecar
    pub vault_path: PathBuf,
    /// File to create, relative to `vault_path`; asked when missing
    pub file: Option<String>,
    /// Backend name; falls back to the configured default, then asked
    pub plugin: Option<String>,
    /// Explicit backend parameters
    pub params: PluginParams,
    pub password: PasswordInput,
}

/// Result of a successful `create`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub vault_id: VaultId,
    pub path: PathBuf,
}

pub struct Engine<'a> {
    config: &'a ManagerConfig,
    registry: &'a PluginRegistry,
    cipher: &'a dyn PayloadCipher,
    store: MetadataStore,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: &'a ManagerConfig,
        registry: &'a PluginRegistry,
        cipher: &'a dyn PayloadCipher,
    ) -> Self {
        Self {
            config,
            registry,
            cipher,
            store: MetadataStore::new(config.metadata_file.clone()),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Resolve a `plugin%id` vault id into its secret
    pub fn fetch(&self, raw: &str) -> Result<String> {
        let vault_id = VaultId::parse(raw)?;
        self.fetch_id(&vault_id)
    }

    fn fetch_id(&self, vault_id: &VaultId) -> Result<String> {
        let mut plugin = self.registry.create(&vault_id.plugin)?;
        plugin.fetch(&vault_id.plugin_id)
    }

    /// Vault ids of `dir` whose secret can be fetched right now, formatted as
    /// `plugin%id@client`, in metadata order.
    ///
    /// A failing entry is skipped, never fatal: callers usually hold
    /// credentials for only some of the backends.
    pub fn usable_ids(&self, dir: &Path, client: &str) -> Result<Vec<String>> {
        let record = self.store.load(dir)?;

        let mut usable = Vec::new();
        for entry in &record.vault_ids {
            let vault_id = VaultId::new(entry.plugin.as_str(), entry.id.as_str());
            match self.fetch_id(&vault_id) {
                Ok(secret) if !secret.is_empty() => usable.push(vault_id.with_client(client)),
                Ok(_) => debug!(vault_id = %vault_id, "empty secret, skipping"),
                Err(e) => debug!(vault_id = %vault_id, error = %e, "vault id not usable"),
            }
        }
        Ok(usable)
    }

    /// Create a new secret, seed `file` encrypted with it and record the
    /// association in the metadata of `vault_path`.
    ///
    /// The file's directory is checked before any secret is stored. A later
    /// failure to write the file still leaves the new secret in the backend
    /// with nothing pointing at it.
    ///
    /// The file is written before the metadata. If the metadata write fails
    /// the file is left behind unreferenced and the error is returned.
    /// Concurrent creates against one directory race on the metadata file.
    pub fn create(&self, request: CreateRequest, prompter: &mut dyn Prompter) -> Result<Created> {
        let file = match request.file {
            Some(file) => file,
            None => prompter.ask("File to create: ")?,
        };
        if file.is_empty() {
            return Err(VaultError::Prompt("a file name is required".to_string()));
        }

        let target = request.vault_path.join(&file);
        if target.exists() {
            return Err(VaultError::FileAlreadyExists(target));
        }
        if let Some(parent) = target.parent().filter(|p| !p.is_dir()) {
            return Err(VaultError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("directory does not exist: {}", parent.display()),
            )));
        }
        let mut metadata = self.store.load_raw(&request.vault_path)?;

        let requested = match request.plugin.or_else(|| self.config.default_plugin.clone()) {
            Some(name) => name,
            None => prompter.ask(&format!(
                "Keyring plugin name to use [{}]: ",
                self.registry.names().join(", ")
            ))?,
        };
        let plugin_name = self
            .registry
            .resolve(&requested)
            .ok_or_else(|| VaultError::UnknownPlugin(requested.clone()))?
            .to_string();
        let mut plugin = self.registry.create(&plugin_name)?;

        let params = self.config.params_for(&plugin_name, &request.params);
        let id = plugin.generate_id(&params, prompter)?;
        prompter.say(&format!("New ID to use: {}", id));

        let password = read_password(request.password, prompter)?;
        let version = plugin.set_password(&id, &password)?;
        let id = plugin.append_id_version(version.as_deref())?;

        let encrypted = self.cipher.encrypt(&password, INITIAL_PAYLOAD)?;
        write_new_file(&target, &encrypted)?;
        info!(file = %target.display(), "vault file created");

        metadata.vault_ids.push(VaultIdEntry {
            id: id.clone(),
            plugin: plugin_name.clone(),
            files: vec![file],
        });
        if let Err(e) = self.store.save(&metadata, &request.vault_path) {
            warn!(
                file = %target.display(),
                "metadata not updated; the file is not referenced by any vault id"
            );
            return Err(e);
        }

        Ok(Created {
            vault_id: VaultId::new(plugin_name, id),
            path: target,
        })
    }
}

fn read_password(input: PasswordInput, prompter: &mut dyn Prompter) -> Result<String> {
    let password = match input {
        PasswordInput::Provided(value) => value.trim().to_string(),
        PasswordInput::Interactive => {
            let password = prompter.ask_secret("New password: ")?;
            let confirm = prompter.ask_secret("Confirm password: ")?;
            if password != confirm {
                return Err(VaultError::PasswordMismatch);
            }
            password
        }
    };

    if password.trim().is_empty() {
        return Err(VaultError::EmptyPassword);
    }
    Ok(password)
}

fn write_new_file(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(VaultError::FileAlreadyExists(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(content)?;
    Ok(())
}
