//! Error types for onepw-receiver operations

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for onepw-receiver operations
///
/// Provider failures are usually caught by the [`Receiver`](crate::Receiver)
/// and turned into a fallback lookup, so most of these only reach callers
/// that talk to a provider directly.
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Dotenv error: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Settings file not found: {}", .0.display())]
    SettingsNotFound(PathBuf),
    #[error("Item '{item}' is not configured in section '{section}'")]
    ItemNotConfigured { item: String, section: String },
    #[error(
        "No vault configured.\n\nSet OP_VAULT, pass --vault, or add `vault = \"...\"` to the settings entry"
    )]
    NoVault,
    #[error("Vault '{0}' not found")]
    VaultNotFound(String),
    #[error("Item '{0}' not found in vault")]
    ItemNotFound(String),
    #[error("Found {count} items in vault with title '{title}'")]
    AmbiguousItem { title: String, count: usize },
    #[error("1Password Connect returned {status}: {message}")]
    ConnectApi { status: u16, message: String },
    #[error("{0} is not set")]
    MissingConnectSetting(&'static str),
    #[error("OP_CONNECT_HOST '{host}' is not a valid URL: {source}")]
    InvalidConnectHost {
        host: String,
        source: url::ParseError,
    },
    #[error("Provider backend '{0}' not found")]
    ProviderNotFound(String),
    #[error("Provider operation failed: {0}")]
    ProviderOperationFailed(String),
    #[error("Invalid environment variable '{0}'")]
    InvalidEnvVar(String),
    #[error("No value available for '{0}' from the vault or the environment file")]
    SecretUnavailable(String),
}

/// A type alias for `Result<T, ReceiverError>`
pub type Result<T> = std::result::Result<T, ReceiverError>;
