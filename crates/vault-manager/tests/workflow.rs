//! Create, list usable ids and fetch through the public API

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use vault_manager::cipher::INITIAL_PAYLOAD;
use vault_manager::plugins::aws_ssm::{AwsSsmPlugin, ParameterId, SsmClient};
use vault_manager::plugins::local_fs::LocalFsPlugin;
use vault_manager::{
    AnsibleVaultCipher, CreateRequest, Engine, PasswordInput, PayloadCipher, PluginRegistry, Result,
    ScriptedPrompter,
};
use vault_manager_core::{ManagerConfig, PluginParams};

/// Parameter store kept in memory, keyed by profile/region/name
#[derive(Default)]
struct FakeParameterStore {
    versions: Mutex<HashMap<(String, String, String), Vec<String>>>,
}

impl SsmClient for FakeParameterStore {
    fn get(&self, id: &ParameterId) -> Result<Option<String>> {
        let versions = self.versions.lock().unwrap();
        let key = (id.profile.clone(), id.region.clone(), id.name.clone());
        let Some(values) = versions.get(&key) else {
            return Ok(None);
        };
        Ok(match &id.version {
            None => values.last().cloned(),
            Some(v) => v
                .parse::<usize>()
                .ok()
                .and_then(|n| values.get(n.wrapping_sub(1)).cloned()),
        })
    }

    fn put(&self, id: &ParameterId, value: &str) -> Result<String> {
        let mut versions = self.versions.lock().unwrap();
        let key = (id.profile.clone(), id.region.clone(), id.name.clone());
        let values = versions.entry(key).or_default();
        values.push(value.to_string());
        Ok(values.len().to_string())
    }
}

fn registry(store: Arc<FakeParameterStore>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register("aws_ssm", &["parameter-store"], move || {
        Ok(Box::new(AwsSsmPlugin::new(store.clone())))
    });
    registry.register("local_fs", &["local-file"], || Ok(Box::new(LocalFsPlugin::new())));
    registry
}

#[test]
fn create_then_fetch_through_parameter_store() {
    let dir = tempdir().unwrap();
    let config = ManagerConfig::default();
    let registry = registry(Arc::new(FakeParameterStore::default()));
    let cipher = AnsibleVaultCipher;
    let engine = Engine::new(&config, &registry, &cipher);

    let created = engine
        .create(
            CreateRequest {
                vault_path: dir.path().to_path_buf(),
                file: Some("secrets.yml".to_string()),
                plugin: Some("parameter-store".to_string()),
                params: PluginParams::from([
                    ("account".to_string(), "dev".to_string()),
                    ("region".to_string(), "us-east-1".to_string()),
                ]),
                password: PasswordInput::Provided("p@ss".to_string()),
            },
            &mut ScriptedPrompter::new(["/ansible/dev"]),
        )
        .unwrap();

    assert_eq!(created.vault_id.plugin, "aws_ssm");
    let versioned = created.vault_id.plugin_id.clone();
    assert!(versioned.starts_with("dev:us-east-1:/ansible/dev/"));
    assert!(versioned.ends_with(":1"));

    let unversioned = versioned.trim_end_matches(":1");
    assert_eq!(
        engine.fetch(&format!("parameter-store%{}", unversioned)).unwrap(),
        "p@ss"
    );
    assert_eq!(engine.fetch(&created.vault_id.to_string()).unwrap(), "p@ss");

    let encrypted = std::fs::read(dir.path().join("secrets.yml")).unwrap();
    assert!(encrypted.starts_with(b"$ANSIBLE_VAULT;1.1;AES256\n"));
    assert_eq!(cipher.decrypt("p@ss", &encrypted).unwrap(), INITIAL_PAYLOAD);

    let usable = engine.usable_ids(dir.path(), "/opt/client").unwrap();
    assert_eq!(usable, vec![format!("{}@/opt/client", created.vault_id)]);
}

#[test]
fn usable_ids_only_lists_reachable_secrets() {
    let vault = tempdir().unwrap();
    let secrets = tempdir().unwrap();
    let config = ManagerConfig::default();
    let registry = registry(Arc::new(FakeParameterStore::default()));
    let cipher = AnsibleVaultCipher;
    let engine = Engine::new(&config, &registry, &cipher);

    let basepath = secrets.path().display().to_string();
    let first = engine
        .create(
            CreateRequest {
                vault_path: vault.path().to_path_buf(),
                file: Some("one.yml".to_string()),
                plugin: Some("local_fs".to_string()),
                params: PluginParams::from([("basepath".to_string(), basepath.clone())]),
                password: PasswordInput::Provided("first".to_string()),
            },
            &mut ScriptedPrompter::default(),
        )
        .unwrap();
    let second = engine
        .create(
            CreateRequest {
                vault_path: vault.path().to_path_buf(),
                file: Some("two.yml".to_string()),
                plugin: Some("local-file".to_string()),
                params: PluginParams::from([("basepath".to_string(), basepath)]),
                password: PasswordInput::Provided("second".to_string()),
            },
            &mut ScriptedPrompter::default(),
        )
        .unwrap();

    // Lose access to the first secret
    let first_file = first.vault_id.plugin_id.split(':').nth(1).unwrap().to_string();
    std::fs::remove_file(secrets.path().join(format!("{}.1", first_file))).unwrap();

    let usable = engine.usable_ids(vault.path(), "client").unwrap();
    assert_eq!(usable, vec![format!("{}@client", second.vault_id)]);

    let record = engine.store().load(vault.path()).unwrap();
    assert_eq!(record.vault_ids.len(), 2);
    assert_eq!(record.vault_ids[0].files, vec!["one.yml"]);
    assert_eq!(record.vault_ids[1].files, vec!["two.yml"]);
}
