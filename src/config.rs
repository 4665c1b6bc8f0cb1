//! # Settings and Global Configuration
//!
//! The settings file is a TOML document that maps logical setting names to
//! 1Password item identifiers. Sections may nest arbitrarily; a dotted section
//! name such as `services.db` walks through nested tables.
//!
//! ```toml
//! [database]
//! postgres = "hgsk2olqbnqyrpbesbtg4bvyme"
//!
//! [services.mail]
//! smtp = { item = "SMTP relay", field = "password", vault = "Infra" }
//! ```
//!
//! A plain string is an item ID or item title; the `credential` field of that
//! item is read from the default vault. The table form overrides the field,
//! the vault, or the item section the field lives in.

use crate::{ReceiverError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use toml::{Table, Value};
use tracing::{debug, warn};

/// Field read from an item when the settings entry does not name one.
pub const DEFAULT_FIELD: &str = "credential";

/// Settings file used when neither a flag, `ONEPW_SETTINGS`, nor the global
/// config names one.
pub const DEFAULT_SETTINGS_FILE: &str = "settings.toml";

/// A parsed settings file.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    path: Option<PathBuf>,
    content: Table,
}

impl Settings {
    /// Reads and parses the settings file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiverError::SettingsNotFound`] if the file does not exist.
    /// This check happens before anything else, so no vault request is ever
    /// made for a missing settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::error!("File not found: {}", path.display());
            return Err(ReceiverError::SettingsNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut settings = Self::from_str(&content)?;
        settings.path = Some(path.to_path_buf());
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Path the settings were loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the table for `name`.
    ///
    /// A literal top-level key wins; otherwise the name is split on `.` and
    /// each part is looked up in the previous table.
    pub fn section(&self, name: &str) -> Option<&Table> {
        if let Some(table) = self.content.get(name).and_then(Value::as_table) {
            return Some(table);
        }

        let mut table = &self.content;
        for part in name.split('.') {
            table = table.get(part)?.as_table()?;
        }
        Some(table)
    }

    /// Returns the item reference stored under `item` in `section`.
    pub fn item(&self, item: &str, section: &str) -> Option<ItemRef> {
        self.section(section)?.get(item).and_then(ItemRef::from_value)
    }

    /// Checks whether `section` holds an item reference named `item`.
    pub fn contains(&self, item: &str, section: &str) -> bool {
        self.item(item, section).is_some()
    }

    /// Lists every item reference in the file, depth first.
    ///
    /// Top-level values outside any section are ignored.
    pub fn entries(&self) -> Vec<SettingsEntry> {
        let mut entries = Vec::new();
        for (name, value) in &self.content {
            if let Some(table) = value.as_table() {
                collect_entries(name, table, &mut entries);
            }
        }
        entries
    }
}

fn collect_entries(section: &str, table: &Table, entries: &mut Vec<SettingsEntry>) {
    for (name, value) in table {
        if let Some(reference) = ItemRef::from_value(value) {
            entries.push(SettingsEntry {
                section: section.to_string(),
                item: name.clone(),
                reference,
            });
        } else if let Some(nested) = value.as_table() {
            collect_entries(&format!("{}.{}", section, name), nested, entries);
        }
    }
}

impl FromStr for Settings {
    type Err = ReceiverError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self {
            path: None,
            content: toml::from_str(s)?,
        })
    }
}

/// One item reference found in the settings file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsEntry {
    /// Dotted section path the item lives in
    pub section: String,
    /// Logical item name (the TOML key)
    pub item: String,
    pub reference: ItemRef,
}

/// Where a setting lives in 1Password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemRef {
    /// Item ID or item title
    pub item: String,
    /// Field label; `credential` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Vault name overriding the default vault
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<String>,
    /// Label of the item section the field belongs to
    #[serde(
        default,
        rename = "section",
        skip_serializing_if = "Option::is_none"
    )]
    pub field_section: Option<String>,
}

impl ItemRef {
    pub fn new(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            field: None,
            vault: None,
            field_section: None,
        }
    }

    /// A table without an `item` key is a nested section, not an entry.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(item) => Some(Self::new(item.as_str())),
            Value::Table(table) if table.contains_key("item") => {
                match value.clone().try_into() {
                    Ok(reference) => Some(reference),
                    Err(e) => {
                        warn!("Ignoring malformed settings entry {}: {}", value, e);
                        None
                    }
                }
            }
            _ => None,
        }
    }
}

/// Global user configuration.
///
/// Stored in the user's config directory, typically
/// `~/.config/onepw-receiver/config.toml` on Unix systems.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub defaults: GlobalDefaults,
}

/// Default settings in the global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalDefaults {
    /// Settings file to read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<PathBuf>,
    /// Vault used when a settings entry does not name one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault: Option<String>,
    /// Fallback provider URI, e.g. `dotenv:/srv/app/.env`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl GlobalConfig {
    /// Gets the path to the global configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined
    pub fn path() -> std::result::Result<PathBuf, io::Error> {
        use directories::ProjectDirs;
        let dirs = ProjectDirs::from("", "", "onepw-receiver").ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Could not find config directory")
        })?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Loads the global user configuration.
    ///
    /// Returns `Ok(None)` if the file doesn't exist.
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&Self::path()?)
    }

    /// Loads a global configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(toml::from_str(&content)?))
    }

    /// Saves the global configuration to disk, creating parent directories.
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    /// Saves the global configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
