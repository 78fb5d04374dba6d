//! Bitwarden keyring, through the `bw` CLI
//!
//! Id format: `<service>:<username>`. Bitwarden items have no version, so
//! [`KeyringPlugin::set_password`] creates a new item and returns no version.
//!
//! Session handling follows the CLI: an exported `BW_SESSION` is reused when
//! it still syncs, otherwise the vault is unlocked (or logged into, when no
//! account is known locally) and the returned session key is used.

use crate::error::{Result, VaultError};
use crate::plugin::KeyringPlugin;
use crate::prompt::Prompter;
use crate::vault_id::{join_fields, join_with_version, parse_plugin_id};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use vault_manager_core::process::{self, CommandOutput};
use vault_manager_core::PluginParams;

pub const NAME: &str = "bitwarden";

/// Username given to items created by this tool
pub const DEFAULT_USERNAME: &str = "ansible-vault";

/// Unlock attempts before a wrong master password becomes an error
const MAX_PASSWORD_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ItemId {
    service: String,
    username: String,
}

impl ItemId {
    fn parse(raw: &str) -> Result<Self> {
        let fields = parse_plugin_id(raw);
        if fields.len() != 2 || fields[0].is_empty() {
            return Err(VaultError::InvalidPluginId {
                plugin: NAME,
                id: raw.to_string(),
                reason: "expected <service>:<username>".to_string(),
            });
        }
        Ok(Self {
            service: fields[0].to_string(),
            username: fields[1].to_string(),
        })
    }

    fn to_id(&self) -> String {
        join_fields(&[self.service.as_str(), self.username.as_str()])
    }
}

pub struct BitwardenPlugin {
    cli: BwCli,
    current: Option<ItemId>,
}

impl BitwardenPlugin {
    /// Fails with `BackendUnavailable` when `binary` is not installed
    pub fn new(binary: &str) -> Result<Self> {
        if !process::is_installed(binary) {
            return Err(VaultError::BackendUnavailable(format!(
                "this plugin requires the bitwarden cli ({}): https://bitwarden.com/help/cli/",
                binary
            )));
        }
        Ok(Self {
            cli: BwCli {
                binary: binary.to_string(),
                exported_session: std::env::var("BW_SESSION").ok().filter(|s| !s.is_empty()),
            },
            current: None,
        })
    }
}

impl KeyringPlugin for BitwardenPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn generate_id(&mut self, params: &PluginParams, _prompter: &mut dyn Prompter) -> Result<String> {
        let prefix = params.get("service").map(String::as_str).unwrap_or("ansible-vault-");
        let username = params
            .get("username")
            .cloned()
            .unwrap_or_else(|| DEFAULT_USERNAME.to_string());

        let id = ItemId {
            service: format!("{}{}", prefix, Uuid::new_v4()),
            username,
        };
        let raw = id.to_id();
        self.current = Some(id);
        Ok(raw)
    }

    fn fetch(&mut self, plugin_id: &str) -> Result<String> {
        let id = ItemId::parse(plugin_id)?;
        let session = self.cli.session()?;

        self.cli.run(&["sync"], Some(&session))?;
        let password = self
            .cli
            .run(&["get", "password", id.service.as_str()], Some(&session))
            .map_err(|e| match e {
                VaultError::SecretNotFound(_) => {
                    VaultError::SecretNotFound(format!("{} in bitwarden", id.service))
                }
                other => other,
            })?;

        self.current = Some(id);
        Ok(password)
    }

    fn set_password(&mut self, plugin_id: &str, password: &str) -> Result<Option<String>> {
        let id = ItemId::parse(plugin_id)?;
        let session = self.cli.session()?;

        let template = self.cli.run(&["get", "template", "item"], Some(&session))?;
        let template: Value = serde_json::from_str(&template)
            .map_err(|e| VaultError::Backend(format!("invalid item template: {}", e)))?;
        let payload = STANDARD.encode(item_payload(template, &id, password).to_string());

        self.cli.run(&["create", "item", payload.as_str()], Some(&session))?;
        self.current = Some(id);
        Ok(None)
    }

    fn append_id_version(&self, version: Option<&str>) -> Result<String> {
        let id = self.current.as_ref().ok_or(VaultError::IdNotGenerated(NAME))?;
        Ok(join_with_version(&id.to_id(), version.unwrap_or_default()))
    }
}

/// Fill the CLI's item template with a login for `id`
fn item_payload(mut template: Value, id: &ItemId, password: &str) -> Value {
    if let Value::Object(map) = &mut template {
        map.insert("name".to_string(), json!(id.service));
        map.insert("notes".to_string(), Value::Null);
        map.insert(
            "login".to_string(),
            json!({
                "uris": [{"match": null, "uri": null}],
                "username": id.username,
                "password": password,
            }),
        );
    }
    template
}

struct BwCli {
    binary: String,
    /// `BW_SESSION` at startup
    exported_session: Option<String>,
}

impl BwCli {
    /// Run a non-interactive `bw` command. Returns trimmed stdout.
    fn run(&self, args: &[&str], session: Option<&str>) -> Result<String> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 2);
        if let Some(session) = session {
            full.extend_from_slice(&["--session", session]);
        }
        full.extend_from_slice(args);

        let output = process::capture(&self.binary, &full, None)
            .map_err(|e| VaultError::BackendUnavailable(format!("{}: {}", self.binary, e)))?;
        if output.success {
            return Ok(output.text().to_string());
        }
        Err(failure(&output))
    }

    /// Run `unlock` or `login` on the terminal so the CLI can ask for the
    /// master password, retrying while it reports a wrong one.
    fn prompt_session(&self, command: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            let output = process::capture_interactive(&self.binary, [command, "--raw"])
                .map_err(|e| VaultError::BackendUnavailable(format!("{}: {}", self.binary, e)))?;
            if output.success {
                return Ok(output.text().to_string());
            }

            if !is_wrong_password(&output) {
                return Err(failure(&output));
            }
            eprintln!("{}", output.combined());
            if attempt >= MAX_PASSWORD_ATTEMPTS {
                return Err(VaultError::BackendUnavailable(format!(
                    "bw {}: wrong master password after {} attempts",
                    command, attempt
                )));
            }
            attempt += 1;
        }
    }

    /// A usable session key, unlocking or logging in when needed
    fn session(&self) -> Result<String> {
        if let Some(session) = &self.exported_session {
            match self.run(&["sync"], Some(session)) {
                Ok(_) => return Ok(session.clone()),
                Err(e) => debug!(error = %e, "BW_SESSION rejected, asking for a new session"),
            }
        }

        let location = db_location(|key| std::env::var(key).ok(), std::env::consts::OS);
        let authenticated = logged_user(&location).is_some();
        let command = if authenticated { "unlock" } else { "login" };

        let session = self.prompt_session(command)?;
        if session.is_empty() {
            warn!("bw {} returned an empty session key", command);
        }
        Ok(session)
    }
}

fn is_wrong_password(output: &CommandOutput) -> bool {
    let message = output.combined();
    message.contains("Username or password is incorrect") || message.contains("Invalid master password")
}

/// Error kind for a failed `bw` command
fn failure(output: &CommandOutput) -> VaultError {
    let message = output.combined();
    if message.starts_with("Not found.") {
        VaultError::SecretNotFound(message)
    } else if is_wrong_password(output)
        || message.contains("You are not logged in")
        || message.contains("Vault is locked")
    {
        VaultError::BackendUnavailable(message)
    } else {
        VaultError::Backend(message)
    }
}

/// Location of the CLI's local data file
fn db_location<F>(env: F, os: &str) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));

    let dir = if let Some(dir) = env("BITWARDENCLI_APPDATA_DIR").filter(|d| !d.is_empty()) {
        PathBuf::from(shellexpand::tilde(&dir).to_string())
    } else if os == "macos" {
        home.join("Library/Application Support/Bitwarden CLI")
    } else if os == "windows" {
        env("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("AppData/Roaming"))
            .join("Bitwarden CLI")
    } else {
        let snap = home.join("snap/bw/current/.config/Bitwarden CLI");
        if snap.exists() {
            snap
        } else {
            home.join(".config/Bitwarden CLI")
        }
    };

    dir.join("data.json")
}

/// Email of the account known to the CLI, if any
fn logged_user(db: &Path) -> Option<String> {
    let content = std::fs::read_to_string(db).ok()?;
    let data: Value = serde_json::from_str(&content).ok()?;
    data.get("userEmail")?.as_str().map(str::to_string)
}
