//! Settings-driven secret resolution

use crate::config::{DEFAULT_FIELD, Settings, SettingsEntry};
use crate::error::{ReceiverError, Result};
use crate::provider::Provider;
use crate::provider::SecretRef;
use crate::provider::dotenv::{DotEnvConfig, DotEnvProvider};
use crate::provider::onepassword::{OnePasswordConfig, OnePasswordProvider};
use std::env;
use std::fmt;
use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{debug, error, info, warn};

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Source {
    Vault,
    Fallback,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Vault => write!(f, "vault"),
            Source::Fallback => write!(f, "fallback"),
        }
    }
}

/// The outcome of resolving one settings item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    /// Uppercased settings item name, also the fallback lookup key
    pub key: String,
    pub value: Option<String>,
    /// `None` when neither source had a value
    pub source: Option<Source>,
}

impl ResolvedSecret {
    fn found(key: String, value: String, source: Source) -> Self {
        Self {
            key,
            value: Some(value),
            source: Some(source),
        }
    }

    fn missing(key: String) -> Self {
        Self {
            key,
            value: None,
            source: None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }
}

/// Resolves settings items against a vault, falling back to a second
/// provider when the vault cannot answer.
///
/// # Example
///
/// ```no_run
/// use onepw_receiver::Receiver;
///
/// let receiver = Receiver::from_env("settings.toml").unwrap();
/// receiver
///     .set_environment_key("postgres", "database", "database_password")
///     .unwrap();
/// assert!(std::env::var("DATABASE_PASSWORD").is_ok());
/// ```
pub struct Receiver {
    settings: Settings,
    vault: Box<dyn Provider>,
    fallback: Box<dyn Provider>,
}

impl Receiver {
    pub fn new(settings: Settings, vault: Box<dyn Provider>, fallback: Box<dyn Provider>) -> Self {
        Self {
            settings,
            vault,
            fallback,
        }
    }

    /// Loads the settings file, then connects using `OP_CONNECT_HOST`,
    /// `OP_CONNECT_TOKEN` and `OP_VAULT`, falling back to the nearest `.env`.
    ///
    /// # Errors
    ///
    /// Fails with [`ReceiverError::SettingsNotFound`] before any provider is
    /// built if the settings file is missing.
    pub fn from_env(settings_path: impl AsRef<Path>) -> Result<Self> {
        let settings = Settings::load(settings_path)?;
        let vault = OnePasswordProvider::new(OnePasswordConfig::from_env()?)?;
        let fallback = DotEnvProvider::new(DotEnvConfig::default())?;
        Ok(Self::new(settings, Box::new(vault), Box::new(fallback)))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn vault_provider(&self) -> &dyn Provider {
        self.vault.as_ref()
    }

    pub fn fallback_provider(&self) -> &dyn Provider {
        self.fallback.as_ref()
    }

    /// Builds the provider lookup for `item` in `section`.
    ///
    /// `field` overrides the field named in the settings entry, which in turn
    /// overrides `credential`.
    pub fn secret_ref(&self, item: &str, section: &str, field: Option<&str>) -> Result<SecretRef> {
        let reference =
            self.settings
                .item(item, section)
                .ok_or_else(|| ReceiverError::ItemNotConfigured {
                    item: item.to_string(),
                    section: section.to_string(),
                })?;

        Ok(SecretRef {
            key: item.to_uppercase(),
            item: reference.item,
            field: field
                .map(str::to_string)
                .or(reference.field)
                .unwrap_or_else(|| DEFAULT_FIELD.to_string()),
            field_section: reference.field_section,
            vault: reference.vault,
        })
    }

    /// Resolves the `credential` field of `item` in `section`.
    pub fn fetch(&self, item: &str, section: &str) -> ResolvedSecret {
        self.fetch_field(item, section, None)
    }

    /// Resolves `item` in `section`, never failing.
    ///
    /// Any vault error, including an item missing from the settings file,
    /// is logged and the uppercased item name is looked up in the fallback
    /// provider instead. A vault that answers without a value for the field
    /// also defers to the fallback.
    pub fn fetch_field(&self, item: &str, section: &str, field: Option<&str>) -> ResolvedSecret {
        let key = item.to_uppercase();
        let lookup = self
            .secret_ref(item, section, field)
            .and_then(|secret| self.vault.get(&secret));

        match lookup {
            Ok(Some(value)) => {
                debug!("Resolved '{}' in section '{}' from {}", item, section, self.vault.name());
                return ResolvedSecret::found(key, value, Source::Vault);
            }
            Ok(None) => {
                warn!(
                    "{} has no value for '{}' in section '{}'",
                    self.vault.name(),
                    item,
                    section
                );
            }
            Err(e) => {
                error!(
                    item,
                    section,
                    field = field.unwrap_or(DEFAULT_FIELD),
                    "{}",
                    e
                );
                error!(
                    "There was an error retrieving the item from 1Password. Define the value in your environment file if the error persists."
                );
            }
        }

        self.fetch_fallback(key, item)
    }

    fn fetch_fallback(&self, key: String, item: &str) -> ResolvedSecret {
        info!("Retrieving value for '{}' from {}", key, self.fallback.name());
        match self.fallback.get(&SecretRef::new(key.clone(), item)) {
            Ok(Some(value)) => ResolvedSecret::found(key, value, Source::Fallback),
            Ok(None) => {
                debug!("{} has no value for '{}'", self.fallback.name(), key);
                ResolvedSecret::missing(key)
            }
            Err(e) => {
                error!("{}\nCould not read '{}' from {}", e, key, self.fallback.name());
                ResolvedSecret::missing(key)
            }
        }
    }

    /// Resolves `item` in `section` and exports it as `key`, uppercased.
    ///
    /// This mutates the process environment; do not call it while other
    /// threads read or write environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiverError::SecretUnavailable`] and leaves the variable
    /// unset when neither the vault nor the fallback has a value.
    pub fn set_environment_key(&self, item: &str, section: &str, key: &str) -> Result<ResolvedSecret> {
        debug!("Setting environment key");
        let resolved = self.fetch(item, section);
        let env_key = key.to_uppercase();

        match &resolved.value {
            Some(value) => {
                set_env(&env_key, value)?;
                info!("Environment Variable: '{}' has been set.", env_key);
                Ok(resolved)
            }
            None => {
                error!("Environment Variable: '{}' could not be set.", env_key);
                Err(ReceiverError::SecretUnavailable(env_key))
            }
        }
    }

    /// Resolves every item in the settings file.
    ///
    /// Each result is keyed by the uppercased item name.
    pub fn resolve_all(&self) -> Vec<(SettingsEntry, ResolvedSecret)> {
        self.settings
            .entries()
            .into_iter()
            .map(|entry| {
                let resolved = self.fetch(&entry.item, &entry.section);
                (entry, resolved)
            })
            .collect()
    }

    /// Builds a command with every resolvable settings item in its
    /// environment. Items with no value are left out.
    pub fn command(&self, command: &[String]) -> Result<Command> {
        let Some((program, args)) = command.split_first() else {
            return Err(ReceiverError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "No command specified. Usage: onepw-receiver run -- <command> [args...]",
            )));
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        for (entry, resolved) in self.resolve_all() {
            match resolved.value {
                Some(value) => {
                    cmd.env(&resolved.key, value);
                }
                None => warn!(
                    "Skipping '{}' in section '{}': no value available",
                    entry.item, entry.section
                ),
            }
        }
        Ok(cmd)
    }
}

fn set_env(key: &str, value: &str) -> Result<()> {
    if key.is_empty() || key.contains('=') || key.contains('\0') || value.contains('\0') {
        return Err(ReceiverError::InvalidEnvVar(key.to_string()));
    }
    // SAFETY: callers are documented to not touch the environment from other
    // threads while secrets are being exported.
    unsafe { env::set_var(key, value) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tests::MockProvider;
    use serial_test::serial;
    use std::ffi::OsStr;
    use std::fs;
    use std::str::FromStr;
    use tempfile::TempDir;

    const SETTINGS: &str = r#"
[database]
postgres = "hgsk2olqbnqyrpbesbtg4bvyme"
redis = { item = "Redis", field = "password" }

[api]
openai = "wz3ugqhjmjkrnzz3v4xfa4ojsi"
"#;

    fn dotenv(temp_dir: &TempDir, content: &str) -> Box<dyn Provider> {
        let path = temp_dir.path().join(".env");
        fs::write(&path, content).unwrap();
        Box::new(DotEnvProvider::new(DotEnvConfig::with_path(path)).unwrap())
    }

    fn receiver(vault: MockProvider, fallback: Box<dyn Provider>) -> Receiver {
        Receiver::new(
            Settings::from_str(SETTINGS).unwrap(),
            Box::new(vault),
            fallback,
        )
    }

    #[test]
    fn test_fetch_from_vault() {
        let temp_dir = TempDir::new().unwrap();
        let vault = MockProvider::new().with("hgsk2olqbnqyrpbesbtg4bvyme", Some("pg-secret"));
        let receiver = receiver(vault, dotenv(&temp_dir, "POSTGRES=from-env\n"));

        let resolved = receiver.fetch("postgres", "database");
        assert_eq!(resolved.key, "POSTGRES");
        assert_eq!(resolved.value.as_deref(), Some("pg-secret"));
        assert_eq!(resolved.source, Some(Source::Vault));
    }

    #[test]
    fn test_fetch_passes_field_and_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = receiver(
            MockProvider::new().with("Redis", Some("r")),
            dotenv(&temp_dir, ""),
        );

        let secret = receiver.secret_ref("postgres", "database", None).unwrap();
        assert_eq!(secret.field, "credential");
        assert_eq!(secret.key, "POSTGRES");

        let secret = receiver.secret_ref("redis", "database", None).unwrap();
        assert_eq!(secret.field, "password");

        let secret = receiver
            .secret_ref("redis", "database", Some("username"))
            .unwrap();
        assert_eq!(secret.field, "username");
    }

    #[test]
    fn test_unreachable_vault_uses_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = receiver(
            MockProvider::unreachable(),
            dotenv(&temp_dir, "POSTGRES=from-env\n"),
        );

        let resolved = receiver.fetch("postgres", "database");
        assert_eq!(resolved.value.as_deref(), Some("from-env"));
        assert_eq!(resolved.source, Some(Source::Fallback));
    }

    #[test]
    fn test_unreachable_vault_and_missing_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = receiver(MockProvider::unreachable(), dotenv(&temp_dir, "OTHER=1\n"));

        let resolved = receiver.fetch("postgres", "database");
        assert_eq!(resolved, ResolvedSecret::missing("POSTGRES".to_string()));
        assert!(!resolved.is_found());
    }

    #[test]
    fn test_unconfigured_item_uses_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let vault = MockProvider::new();
        let receiver = Receiver::new(
            Settings::from_str(SETTINGS).unwrap(),
            Box::new(vault),
            dotenv(&temp_dir, "MYSQL=from-env\n"),
        );

        let resolved = receiver.fetch("mysql", "database");
        assert_eq!(resolved.value.as_deref(), Some("from-env"));
        assert_eq!(resolved.source, Some(Source::Fallback));
    }

    #[test]
    fn test_vault_without_value_uses_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let vault = MockProvider::new().with("hgsk2olqbnqyrpbesbtg4bvyme", None);
        let receiver = receiver(vault, dotenv(&temp_dir, "POSTGRES=from-env\n"));

        let resolved = receiver.fetch("postgres", "database");
        assert_eq!(resolved.source, Some(Source::Fallback));
    }

    #[test]
    #[serial]
    fn test_set_environment_key_uppercases() {
        let temp_dir = TempDir::new().unwrap();
        let vault = MockProvider::new().with("hgsk2olqbnqyrpbesbtg4bvyme", Some("pg-secret"));
        let receiver = receiver(vault, dotenv(&temp_dir, ""));

        temp_env::with_var_unset("DATABASE_PASSWORD", || {
            let resolved = receiver
                .set_environment_key("postgres", "database", "database_password")
                .unwrap();
            assert_eq!(resolved.source, Some(Source::Vault));
            assert_eq!(env::var("DATABASE_PASSWORD").unwrap(), "pg-secret");
        });
    }

    #[test]
    #[serial]
    fn test_set_environment_key_leaves_unset_without_value() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = receiver(MockProvider::unreachable(), dotenv(&temp_dir, ""));

        temp_env::with_var_unset("OPENAI_KEY", || {
            match receiver.set_environment_key("openai", "api", "openai_key") {
                Err(ReceiverError::SecretUnavailable(key)) => assert_eq!(key, "OPENAI_KEY"),
                other => panic!("Expected SecretUnavailable, got {:?}", other),
            }
            assert!(env::var("OPENAI_KEY").is_err());
        });
    }

    #[test]
    fn test_set_environment_key_rejects_invalid_name() {
        let temp_dir = TempDir::new().unwrap();
        let vault = MockProvider::new().with("hgsk2olqbnqyrpbesbtg4bvyme", Some("pg-secret"));
        let receiver = receiver(vault, dotenv(&temp_dir, ""));

        let result = receiver.set_environment_key("postgres", "database", "A=B");
        assert!(matches!(result, Err(ReceiverError::InvalidEnvVar(_))));
    }

    #[test]
    fn test_resolve_all() {
        let temp_dir = TempDir::new().unwrap();
        let vault = MockProvider::new()
            .with("hgsk2olqbnqyrpbesbtg4bvyme", Some("pg-secret"))
            .with("Redis", Some("redis-secret"));
        let receiver = receiver(vault, dotenv(&temp_dir, "OPENAI=sk-local\n"));

        let mut resolved: Vec<(String, Option<String>, Option<Source>)> = receiver
            .resolve_all()
            .into_iter()
            .map(|(_, r)| (r.key, r.value, r.source))
            .collect();
        resolved.sort();

        assert_eq!(
            resolved,
            vec![
                ("OPENAI".to_string(), Some("sk-local".to_string()), Some(Source::Fallback)),
                ("POSTGRES".to_string(), Some("pg-secret".to_string()), Some(Source::Vault)),
                ("REDIS".to_string(), Some("redis-secret".to_string()), Some(Source::Vault)),
            ]
        );
    }

    #[test]
    fn test_command_injects_resolved_values() {
        let temp_dir = TempDir::new().unwrap();
        let vault = MockProvider::new().with("hgsk2olqbnqyrpbesbtg4bvyme", Some("pg-secret"));
        let receiver = receiver(vault, dotenv(&temp_dir, ""));

        let cmd = receiver
            .command(&["printenv".to_string(), "POSTGRES".to_string()])
            .unwrap();
        assert_eq!(cmd.get_program(), OsStr::new("printenv"));

        let envs: Vec<(&OsStr, Option<&OsStr>)> = cmd.get_envs().collect();
        assert_eq!(envs, vec![(OsStr::new("POSTGRES"), Some(OsStr::new("pg-secret")))]);
    }

    #[test]
    fn test_command_requires_program() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = receiver(MockProvider::new(), dotenv(&temp_dir, ""));
        assert!(matches!(receiver.command(&[]), Err(ReceiverError::Io(_))));
    }

    #[test]
    fn test_from_env_missing_settings() {
        let temp_dir = TempDir::new().unwrap();
        let result = Receiver::from_env(temp_dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ReceiverError::SettingsNotFound(_))));
    }
}
