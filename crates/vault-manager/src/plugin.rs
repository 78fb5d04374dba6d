//! Keyring plugin contract and registry
//!
//! A keyring plugin turns a plugin specific id into a secret. Every backend is
//! built around the same idea: an id addresses a location, not a value. Fetch
//! and set resolve the same location, and versioning only ever adds.
//!
//! Backends are registered by name in a [`PluginRegistry`] at startup. Each
//! operation builds a fresh instance; instances only remember the last id they
//! generated or fetched.

use crate::error::{Result, VaultError};
use crate::plugins::{aws_ssm, bitwarden, local_fs};
use crate::prompt::Prompter;
use std::collections::BTreeMap;
use tracing::debug;
use vault_manager_core::{ManagerConfig, PluginParams};

pub trait KeyringPlugin {
    /// Registered name of the backend
    fn name(&self) -> &'static str;

    /// Build a fresh, unique id under the location described by `params`,
    /// asking for whatever is missing.
    fn generate_id(&mut self, params: &PluginParams, prompter: &mut dyn Prompter) -> Result<String>;

    /// Current secret stored at `plugin_id`
    fn fetch(&mut self, plugin_id: &str) -> Result<String>;

    /// Store a new secret at `plugin_id`, returning the new version if the
    /// backend has versions.
    fn set_password(&mut self, plugin_id: &str, password: &str) -> Result<Option<String>>;

    /// The last generated or fetched id, carrying `version` when there is one
    fn append_id_version(&self, version: Option<&str>) -> Result<String>;
}

type Factory = Box<dyn Fn() -> Result<Box<dyn KeyringPlugin>>>;

/// Maps backend names (and their aliases) to constructors
pub struct PluginRegistry {
    factories: BTreeMap<String, Factory>,
    aliases: BTreeMap<String, String>,
}

impl PluginRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// Registry with every shipped backend
    pub fn builtin(config: &ManagerConfig) -> Self {
        let mut registry = Self::new();

        let aws = config.binaries.aws.clone();
        registry.register(aws_ssm::NAME, &["parameter-store"], move || {
            Ok(Box::new(aws_ssm::AwsSsmPlugin::with_cli(&aws)))
        });

        let bw = config.binaries.bw.clone();
        registry.register(bitwarden::NAME, &["password-manager"], move || {
            Ok(Box::new(bitwarden::BitwardenPlugin::new(&bw)?))
        });

        registry.register(local_fs::NAME, &["local-file"], || {
            Ok(Box::new(local_fs::LocalFsPlugin::new()))
        });

        registry
    }

    pub fn register<F>(&mut self, name: &str, aliases: &[&str], factory: F)
    where
        F: Fn() -> Result<Box<dyn KeyringPlugin>> + 'static,
    {
        for alias in aliases {
            self.aliases.insert(alias.to_string(), name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Canonical name for `name`, following aliases
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.factories.get_key_value(name) {
            return Some(key.as_str());
        }
        self.aliases.get(name).map(String::as_str)
    }

    /// Build a new instance of the named backend
    pub fn create(&self, name: &str) -> Result<Box<dyn KeyringPlugin>> {
        debug!(plugin = name, "loading keyring plugin");
        let factory = self
            .resolve(name)
            .and_then(|canonical| self.factories.get(canonical))
            .ok_or_else(|| VaultError::UnknownPlugin(name.to_string()))?;
        factory()
    }

    /// Canonical names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `key=value` strings as given to `--plugin-param`
pub fn parse_plugin_params<S: AsRef<str>>(raw: &[S]) -> Result<PluginParams> {
    let mut params = PluginParams::new();
    for item in raw {
        let item = item.as_ref();
        match item.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                params.insert(key.trim().to_string(), value.to_string());
            }
            _ => return Err(VaultError::InvalidPluginParam(item.to_string())),
        }
    }
    Ok(params)
}

/// First present key among `keys`, else ask
pub(crate) fn param_or_ask(
    params: &PluginParams,
    keys: &[&str],
    question: &str,
    prompter: &mut dyn Prompter,
) -> Result<String> {
    match keys.iter().find_map(|k| params.get(*k)) {
        Some(value) => Ok(value.clone()),
        None => prompter.ask(question),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;

    struct Fixed;

    impl KeyringPlugin for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn generate_id(&mut self, _: &PluginParams, _: &mut dyn Prompter) -> Result<String> {
            Ok("id".to_string())
        }
        fn fetch(&mut self, _: &str) -> Result<String> {
            Ok("secret".to_string())
        }
        fn set_password(&mut self, _: &str, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn append_id_version(&self, _: Option<&str>) -> Result<String> {
            Ok("id".to_string())
        }
    }

    #[test]
    fn test_register_and_alias() {
        let mut registry = PluginRegistry::new();
        registry.register("fixed", &["constant"], || Ok(Box::new(Fixed)));

        assert_eq!(registry.resolve("constant"), Some("fixed"));
        assert_eq!(registry.create("constant").unwrap().name(), "fixed");
        assert_eq!(registry.create("fixed").unwrap().fetch("x").unwrap(), "secret");
        assert!(matches!(
            registry.create("nope"),
            Err(VaultError::UnknownPlugin(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_builtin_names() {
        let registry = PluginRegistry::builtin(&ManagerConfig::default());
        assert_eq!(registry.names(), vec!["aws_ssm", "bitwarden", "local_fs"]);
        assert_eq!(registry.resolve("parameter-store"), Some("aws_ssm"));
        assert_eq!(registry.resolve("password-manager"), Some("bitwarden"));
        assert_eq!(registry.resolve("local-file"), Some("local_fs"));
    }

    #[test]
    fn test_parse_plugin_params() {
        let params = parse_plugin_params(&["region=us-east-1", "path=/a=b"]).unwrap();
        assert_eq!(params["region"], "us-east-1");
        assert_eq!(params["path"], "/a=b");

        assert!(matches!(
            parse_plugin_params(&["novalue"]),
            Err(VaultError::InvalidPluginParam(_))
        ));
        assert!(parse_plugin_params(&["=x"]).is_err());
    }

    #[test]
    fn test_param_or_ask() {
        let mut params = PluginParams::new();
        params.insert("account".to_string(), "dev".to_string());
        let mut prompter = ScriptedPrompter::new(["eu-west-3"]);

        let profile = param_or_ask(&params, &["profile", "account"], "Profile: ", &mut prompter).unwrap();
        let region = param_or_ask(&params, &["region"], "Region: ", &mut prompter).unwrap();
        assert_eq!(profile, "dev");
        assert_eq!(region, "eu-west-3");
        assert_eq!(prompter.asked, vec!["Region: "]);
    }
}
