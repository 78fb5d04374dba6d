//! ansible-vault-manager-client - vault id broker for Ansible
//!
//! Commands:
//! - fetch --vault-id <plugin%id>: Print the secret behind a vault id
//! - get-usable-ids --vault-path <dir>: List vault ids of a directory the
//!   current user can open
//! - create [FILE] --vault-path <dir>: New secret + new encrypted file
//! - list-plugins: Show registered keyring plugins
//! - config init|show: Manage the configuration file
//!
//! Without a subcommand, `--vault-id <id>` fetches, which is how ansible
//! calls vault password client scripts.

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use vault_manager::{
    parse_plugin_params, AnsibleVaultCipher, CreateRequest, Engine, PasswordInput, PluginRegistry,
    TerminalPrompter,
};
use vault_manager_core::{ManagerConfig, Paths};

#[derive(Parser)]
#[command(name = "ansible-vault-manager-client")]
#[command(about = "Manage and fetch ansible-vault secrets through pluggable keyrings")]
#[command(version)]
#[command(after_help = r#"VAULT IDS:
    <plugin>%<plugin id>, for example:
    - aws_ssm%dev:us-east-1:/ansible/dev/<uuid>:1
    - local_fs%/mnt/secrets/project:<uuid>:1
    - bitwarden%ansible-vault-<uuid>:ansible-vault

ANSIBLE:
    ansible-playbook --vault-id "$(ansible-vault-manager-client get-usable-ids --vault-path group_vars)""#)]
struct Cli {
    /// Vault id to fetch when no command is given (ansible client script mode)
    #[arg(long)]
    vault_id: Option<String>,

    /// Show diagnostics, including errors skipped while probing vault ids
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/ansible-vault-manager/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the secret behind a vault id
    Fetch {
        /// Vault id, <plugin>%<plugin id>
        #[arg(long)]
        vault_id: String,
    },

    /// Print the comma-separated vault ids of a directory that can be opened now
    GetUsableIds {
        /// Directory holding the vault files and their metadata
        #[arg(long)]
        vault_path: PathBuf,
    },

    /// Create a secret and a new vault file encrypted with it
    Create {
        /// File to create inside the vault path (asked if omitted)
        file: Option<String>,

        /// Directory holding the vault files and their metadata
        #[arg(long)]
        vault_path: PathBuf,

        /// Keyring plugin to store the secret in
        #[arg(long)]
        plugin: Option<String>,

        /// Plugin parameter, repeatable (e.g. region=us-east-1)
        #[arg(long = "plugin-param", value_name = "KEY=VALUE")]
        plugin_params: Vec<String>,

        /// Read the password from stdin instead of prompting
        #[arg(long)]
        stdin_pwd: bool,
    },

    /// List registered keyring plugins
    ListPlugins,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        std::process::exit(2);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(|| Paths::new().config_file());
    let config = ManagerConfig::load_from(&config_path)?;
    let registry = PluginRegistry::builtin(&config);
    let cipher = AnsibleVaultCipher;
    let engine = Engine::new(&config, &registry, &cipher);

    match cli.command {
        Some(Commands::Fetch { vault_id }) => cmd_fetch(&engine, &vault_id),
        Some(Commands::GetUsableIds { vault_path }) => cmd_usable_ids(&engine, &vault_path),
        Some(Commands::Create {
            file,
            vault_path,
            plugin,
            plugin_params,
            stdin_pwd,
        }) => cmd_create(&engine, file, vault_path, plugin, &plugin_params, stdin_pwd),
        Some(Commands::ListPlugins) => cmd_list_plugins(&registry),
        Some(Commands::Config { action }) => cmd_config(action, &config, &config_path),
        None => match cli.vault_id {
            Some(vault_id) => cmd_fetch(&engine, &vault_id),
            None => {
                eprintln!("vault-id is mandatory for fetch action\n");
                Cli::command().print_help()?;
                std::process::exit(2);
            }
        },
    }
}

/// Print a secret
fn cmd_fetch(engine: &Engine<'_>, vault_id: &str) -> Result<()> {
    let password = engine
        .fetch(vault_id)
        .with_context(|| format!("Failed to fetch {}", vault_id))?;
    println!("{}", password);
    Ok(())
}

/// Print usable vault ids, or nothing at all when none is usable
fn cmd_usable_ids(engine: &Engine<'_>, vault_path: &Path) -> Result<()> {
    let client = std::env::current_exe().context("Failed to locate the client executable")?;
    let usable = engine.usable_ids(vault_path, &client.to_string_lossy())?;

    if !usable.is_empty() {
        println!("{}", usable.join(","));
    }
    Ok(())
}

/// Create a secret and its vault file
fn cmd_create(
    engine: &Engine<'_>,
    file: Option<String>,
    vault_path: PathBuf,
    plugin: Option<String>,
    plugin_params: &[String],
    stdin_pwd: bool,
) -> Result<()> {
    if !vault_path.is_dir() {
        bail!("Vault path is not a directory: {}", vault_path.display());
    }

    let password = if stdin_pwd {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read password from stdin")?;
        PasswordInput::Provided(input)
    } else {
        PasswordInput::Interactive
    };

    let request = CreateRequest {
        vault_path,
        file,
        plugin,
        params: parse_plugin_params(plugin_params)?,
        password,
    };

    let created = engine.create(request, &mut TerminalPrompter)?;

    println!("success: {} created", created.path.display());
    println!("Vault id: {}", created.vault_id);
    Ok(())
}

/// List plugin names
fn cmd_list_plugins(registry: &PluginRegistry) -> Result<()> {
    for name in registry.names() {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, config: &ManagerConfig, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("Config already exists: {} (use --force to overwrite)", path.display());
            }
            ManagerConfig::default().save_to(path)?;
            println!("success: Config written to {}", path.display());
        }
        ConfigAction::Show => {
            print!("{}", serde_yaml::to_string(config)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["client", "fetch", "--vault-id", "local_fs%/s:k:1"]).unwrap();
        if let Some(Commands::Fetch { vault_id }) = cli.command {
            assert_eq!(vault_id, "local_fs%/s:k:1");
        } else {
            panic!("Expected Fetch command");
        }

        let cli = Cli::try_parse_from(["client", "-v", "get-usable-ids", "--vault-path", "vars"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::GetUsableIds { .. })));
    }

    #[test]
    fn test_ansible_client_mode() {
        let cli = Cli::try_parse_from(["client", "--vault-id", "aws_ssm%dev:eu-west-1:/k:1"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.vault_id.as_deref(), Some("aws_ssm%dev:eu-west-1:/k:1"));
    }

    #[test]
    fn test_cli_create() {
        let cli = Cli::try_parse_from([
            "client",
            "create",
            "secrets.yml",
            "--vault-path",
            "group_vars/all",
            "--plugin",
            "aws_ssm",
            "--plugin-param",
            "profile=dev",
            "--plugin-param",
            "region=us-east-1",
            "--stdin-pwd",
        ])
        .unwrap();

        if let Some(Commands::Create {
            file,
            vault_path,
            plugin,
            plugin_params,
            stdin_pwd,
        }) = cli.command
        {
            assert_eq!(file.as_deref(), Some("secrets.yml"));
            assert_eq!(vault_path, PathBuf::from("group_vars/all"));
            assert_eq!(plugin.as_deref(), Some("aws_ssm"));
            assert_eq!(plugin_params, vec!["profile=dev", "region=us-east-1"]);
            assert!(stdin_pwd);
        } else {
            panic!("Expected Create command");
        }
    }

    #[test]
    fn test_missing_required_flags_are_usage_errors() {
        let err = Cli::try_parse_from(["client", "fetch"]).err().unwrap();
        assert_eq!(err.exit_code(), 2);

        let err = Cli::try_parse_from(["client", "get-usable-ids"]).err().unwrap();
        assert_eq!(err.exit_code(), 2);
    }
}
