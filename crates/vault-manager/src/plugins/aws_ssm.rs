//! AWS SSM Parameter Store keyring
//!
//! Id format: `<profile>:<region>:<parameter name>[:<version>]`. Without a
//! version the latest value is returned; with one, the parameter history is
//! searched for it. Every put creates a new parameter version.
//!
//! The default transport is the `aws` CLI; anything implementing
//! [`SsmClient`] can stand in for it.

use crate::error::{Result, VaultError};
use crate::plugin::{param_or_ask, KeyringPlugin};
use crate::prompt::Prompter;
use crate::vault_id::{join_fields, join_with_version, parse_plugin_id};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use vault_manager_core::process::{self, CommandOutput};
use vault_manager_core::PluginParams;

pub const NAME: &str = "aws_ssm";

/// Decoded parameter store id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterId {
    pub profile: String,
    pub region: String,
    pub name: String,
    pub version: Option<String>,
}

impl ParameterId {
    pub fn parse(raw: &str) -> Result<Self> {
        let fields = parse_plugin_id(raw);
        if fields.len() < 3 || fields.len() > 4 {
            return Err(VaultError::InvalidPluginId {
                plugin: NAME,
                id: raw.to_string(),
                reason: "expected <profile>:<region>:<name>[:<version>]".to_string(),
            });
        }

        Ok(Self {
            profile: fields[0].to_string(),
            region: fields[1].to_string(),
            name: fields[2].to_string(),
            version: fields.get(3).map(|v| v.to_string()),
        })
    }

    /// The id without its version
    pub fn base(&self) -> String {
        join_fields(&[self.profile.as_str(), self.region.as_str(), self.name.as_str()])
    }
}

/// Access to one parameter store
pub trait SsmClient {
    /// Value of the parameter, at `id.version` when set. `None` when absent.
    fn get(&self, id: &ParameterId) -> Result<Option<String>>;

    /// Store `value` as a new version and return that version
    fn put(&self, id: &ParameterId, value: &str) -> Result<String>;
}

pub struct AwsSsmPlugin {
    client: Arc<dyn SsmClient>,
    current: Option<ParameterId>,
}

impl AwsSsmPlugin {
    pub fn new(client: Arc<dyn SsmClient>) -> Self {
        Self {
            client,
            current: None,
        }
    }

    /// Plugin backed by the `aws` executable at `binary`
    pub fn with_cli(binary: &str) -> Self {
        Self::new(Arc::new(AwsCli::new(binary)))
    }
}

impl KeyringPlugin for AwsSsmPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn generate_id(&mut self, params: &PluginParams, prompter: &mut dyn Prompter) -> Result<String> {
        let profile = param_or_ask(params, &["profile", "account"], "AWS Account profile: ", prompter)?;
        let region = param_or_ask(params, &["region"], "AWS Region: ", prompter)?;
        let mut scope = param_or_ask(
            params,
            &["path"],
            "Secret base path (ex. /ansible/dev/): ",
            prompter,
        )?;
        if !scope.ends_with('/') {
            scope.push('/');
        }

        let id = ParameterId {
            profile,
            region,
            name: format!("{}{}", scope, Uuid::new_v4()),
            version: None,
        };
        let raw = id.base();
        self.current = Some(id);
        Ok(raw)
    }

    fn fetch(&mut self, plugin_id: &str) -> Result<String> {
        let id = ParameterId::parse(plugin_id)?;
        let value = self
            .client
            .get(&id)?
            .ok_or_else(|| VaultError::SecretNotFound(format!("{} on SSM", plugin_id)))?;
        self.current = Some(id);
        Ok(value)
    }

    fn set_password(&mut self, plugin_id: &str, password: &str) -> Result<Option<String>> {
        let id = ParameterId::parse(plugin_id)?;
        let version = self.client.put(&id, password)?;
        tracing::info!(parameter = %id.name, version = %version, "parameter stored");
        self.current = Some(id);
        Ok(Some(version))
    }

    fn append_id_version(&self, version: Option<&str>) -> Result<String> {
        let id = self.current.as_ref().ok_or(VaultError::IdNotGenerated(NAME))?;
        Ok(join_with_version(&id.base(), version.unwrap_or_default()))
    }
}

/// [`SsmClient`] over the `aws ssm` CLI commands
pub struct AwsCli {
    binary: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterResponse {
    parameter: ParameterValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterHistoryResponse {
    #[serde(default)]
    parameters: Vec<ParameterValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterValue {
    value: String,
    version: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutParameterResponse {
    version: u64,
}

impl AwsCli {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    fn run(&self, id: &ParameterId, args: &[&str], input: Option<&str>) -> Result<CommandOutput> {
        let mut full: Vec<&str> = vec!["ssm"];
        full.extend_from_slice(args);
        full.extend_from_slice(&[
            "--profile",
            id.profile.as_str(),
            "--region",
            id.region.as_str(),
            "--output",
            "json",
        ]);

        process::capture(&self.binary, &full, input)
            .map_err(|e| VaultError::BackendUnavailable(format!("{}: {}", self.binary, e)))
    }
}

fn is_not_found(output: &CommandOutput) -> bool {
    output.stderr.contains("ParameterNotFound") || output.stderr.contains("ParameterVersionNotFound")
}

fn parse_json<T: serde::de::DeserializeOwned>(output: &CommandOutput) -> Result<T> {
    serde_json::from_str(output.text())
        .map_err(|e| VaultError::Backend(format!("unexpected aws output: {}", e)))
}

impl SsmClient for AwsCli {
    fn get(&self, id: &ParameterId) -> Result<Option<String>> {
        let output = match &id.version {
            None => self.run(id, &["get-parameter", "--name", id.name.as_str(), "--with-decryption"], None)?,
            Some(_) => self.run(
                id,
                &["get-parameter-history", "--name", id.name.as_str(), "--with-decryption"],
                None,
            )?,
        };

        if !output.success {
            if is_not_found(&output) {
                return Ok(None);
            }
            return Err(VaultError::BackendUnavailable(output.combined()));
        }

        match &id.version {
            None => Ok(Some(parse_json::<GetParameterResponse>(&output)?.parameter.value)),
            Some(version) => {
                let history: ParameterHistoryResponse = parse_json(&output)?;
                Ok(history
                    .parameters
                    .into_iter()
                    .filter(|p| p.version.to_string() == *version)
                    .map(|p| p.value)
                    .last())
            }
        }
    }

    fn put(&self, id: &ParameterId, value: &str) -> Result<String> {
        // Passed on stdin so the secret never shows up in the process list
        let input = serde_json::json!({
            "Name": id.name,
            "Value": value,
            "Type": "SecureString",
            "Overwrite": true,
        })
        .to_string();

        let output = self.run(
            id,
            &["put-parameter", "--cli-input-json", "file:///dev/stdin"],
            Some(&input),
        )?;
        if !output.success {
            return Err(VaultError::Backend(output.combined()));
        }

        Ok(parse_json::<PutParameterResponse>(&output)?.version.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySsm {
        history: Mutex<HashMap<String, Vec<String>>>,
    }

    impl SsmClient for MemorySsm {
        fn get(&self, id: &ParameterId) -> Result<Option<String>> {
            let history = self.history.lock().unwrap();
            let Some(values) = history.get(&id.name) else {
                return Ok(None);
            };
            Ok(match &id.version {
                None => values.last().cloned(),
                Some(v) => v
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| values.get(i).cloned()),
            })
        }

        fn put(&self, id: &ParameterId, value: &str) -> Result<String> {
            let mut history = self.history.lock().unwrap();
            let values = history.entry(id.name.clone()).or_default();
            values.push(value.to_string());
            Ok(values.len().to_string())
        }
    }

    #[test]
    fn test_parse_id() {
        let id = ParameterId::parse("dev:us-east-1:/ansible/dev/abc:2").unwrap();
        assert_eq!(id.profile, "dev");
        assert_eq!(id.region, "us-east-1");
        assert_eq!(id.name, "/ansible/dev/abc");
        assert_eq!(id.version.as_deref(), Some("2"));
        assert_eq!(id.base(), "dev:us-east-1:/ansible/dev/abc");

        assert!(ParameterId::parse("dev:us-east-1").is_err());
    }

    #[test]
    fn test_generate_id_prompts_for_missing() {
        let mut plugin = AwsSsmPlugin::new(Arc::new(MemorySsm::default()));
        let params = PluginParams::from([("account".to_string(), "dev".to_string())]);
        let mut prompter = ScriptedPrompter::new(["eu-west-1", "/ansible/dev"]);

        let id = plugin.generate_id(&params, &mut prompter).unwrap();
        assert!(id.starts_with("dev:eu-west-1:/ansible/dev/"));
        assert_eq!(prompter.asked.len(), 2);
        assert_eq!(plugin.append_id_version(None).unwrap(), id);
    }

    #[test]
    fn test_versions_stay_retrievable() {
        let mut plugin = AwsSsmPlugin::new(Arc::new(MemorySsm::default()));
        let id = "dev:us-east-1:/a/key";

        assert_eq!(plugin.set_password(id, "first").unwrap().as_deref(), Some("1"));
        assert_eq!(plugin.set_password(id, "second").unwrap().as_deref(), Some("2"));
        assert_eq!(plugin.append_id_version(Some("2")).unwrap(), "dev:us-east-1:/a/key:2");

        assert_eq!(plugin.fetch(id).unwrap(), "second");
        assert_eq!(plugin.fetch("dev:us-east-1:/a/key:1").unwrap(), "first");
        assert!(matches!(
            plugin.fetch("dev:us-east-1:/a/key:9"),
            Err(VaultError::SecretNotFound(_))
        ));
        assert!(matches!(
            plugin.fetch("dev:us-east-1:/other"),
            Err(VaultError::SecretNotFound(_))
        ));
    }

    #[test]
    fn test_cli_response_parsing() {
        let output = CommandOutput {
            success: true,
            code: Some(0),
            stdout: r#"{"Parameter": {"Name": "/a", "Type": "SecureString", "Value": "s3cret", "Version": 4}}"#
                .to_string(),
            stderr: String::new(),
        };
        let parsed: GetParameterResponse = parse_json(&output).unwrap();
        assert_eq!(parsed.parameter.value, "s3cret");
        assert_eq!(parsed.parameter.version, 4);

        let missing = CommandOutput {
            success: false,
            code: Some(254),
            stdout: String::new(),
            stderr: "An error occurred (ParameterNotFound) when calling the GetParameter operation"
                .to_string(),
        };
        assert!(is_not_found(&missing));
    }

    #[test]
    fn test_missing_cli_is_unavailable() {
        let client = AwsCli::new("definitely-not-an-aws-cli");
        let id = ParameterId::parse("dev:us-east-1:/a").unwrap();
        assert!(matches!(client.get(&id), Err(VaultError::BackendUnavailable(_))));
    }
}
