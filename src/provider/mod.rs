//! # Provider System
//!
//! Providers are the sources a secret can be read from. The receiver asks a
//! primary provider (the 1Password Connect server) first and consults a
//! fallback provider (a `.env` file by default) when that fails.
//!
//! ## Available Providers
//!
//! - [`OnePasswordProvider`](onepassword::OnePasswordProvider): 1Password Connect API
//! - [`DotEnvProvider`](dotenv::DotEnvProvider): `.env` file lookup
//!
//! ## URI-Based Configuration
//!
//! ```text
//! onepassword://localhost:8080/Private
//! onepassword+https://:token@connect.example.com/Infra
//! dotenv://
//! dotenv:/srv/app/.env
//! ```

use crate::{ReceiverError, Result};
use std::convert::TryFrom;
use url::Url;

pub mod dotenv;
pub mod onepassword;
#[macro_use]
pub mod macros;


/// Information about a secret provider.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    /// The canonical name of the provider (e.g., "onepassword", "dotenv").
    pub name: &'static str,
    /// A human-readable description of what the provider does.
    pub description: &'static str,
    /// Example URIs showing how to configure this provider.
    pub examples: &'static [&'static str],
}

impl ProviderInfo {
    /// Formats the provider information for display, including examples if available.
    pub fn display_with_examples(&self) -> String {
        if self.examples.is_empty() {
            format!("{}: {}", self.name, self.description)
        } else {
            format!(
                "{}: {} (e.g., {})",
                self.name,
                self.description,
                self.examples.join(", ")
            )
        }
    }
}

/// Macro support types
pub use macros::{PROVIDER_REGISTRY, ProviderRegistration};

/// Returns a list of all registered providers with their metadata.
pub fn providers() -> Vec<ProviderInfo> {
    PROVIDER_REGISTRY
        .iter()
        .map(|reg| reg.info.clone())
        .collect()
}

/// Everything a provider may need to look a secret up.
///
/// Vault providers use `item`, `field`, `field_section` and `vault`; flat
/// key/value providers such as dotenv only use `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    /// Flat lookup key, the uppercased settings item name
    pub key: String,
    /// 1Password item ID or title
    pub item: String,
    /// Field label inside the item
    pub field: String,
    /// Label of the item section holding the field
    pub field_section: Option<String>,
    /// Vault name; the provider's default vault when `None`
    pub vault: Option<String>,
}

impl SecretRef {
    /// A reference for the `credential` field of `item`, keyed by `key`.
    pub fn new(key: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            item: item.into(),
            field: crate::config::DEFAULT_FIELD.to_string(),
            field_section: None,
            vault: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn with_vault(mut self, vault: impl Into<String>) -> Self {
        self.vault = Some(vault.into());
        self
    }

    pub fn with_field_section(mut self, section: impl Into<String>) -> Self {
        self.field_section = Some(section.into());
        self
    }
}

/// Trait defining the interface for secret sources.
///
/// Providers are read-only; the receiver never writes back to a vault or to
/// the environment file.
///
/// # Thread Safety
///
/// Providers must be `Send + Sync` so a receiver can be shared.
pub trait Provider: Send + Sync {
    /// Retrieves a secret value from the provider.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` if the secret exists
    /// - `Ok(None)` if the source answered but holds no such value
    /// - `Err` if the source could not be reached or queried
    fn get(&self, secret: &SecretRef) -> Result<Option<String>>;

    /// Returns the name of this provider.
    ///
    /// This should match the name registered with the provider macro.
    fn name(&self) -> &'static str;
}

impl TryFrom<String> for Box<dyn Provider> {
    type Error = ReceiverError;

    fn try_from(s: String) -> Result<Self> {
        Self::try_from(&s as &str)
    }
}

impl TryFrom<&str> for Box<dyn Provider> {
    type Error = ReceiverError;

    /// Creates a provider instance from a URI string or a bare provider name.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let provider = Box::<dyn Provider>::try_from("dotenv")?;
    /// let provider = Box::<dyn Provider>::try_from("dotenv:/srv/app/.env")?;
    /// let provider = Box::<dyn Provider>::try_from("onepassword://localhost:8080/Private")?;
    /// ```
    fn try_from(s: &str) -> Result<Self> {
        let (scheme, rest) = match s.find(':') {
            Some(pos) => (&s[..pos], &s[pos + 1..]),
            None => (s, ""),
        };

        if scheme == "1password" {
            return Err(ReceiverError::ProviderOperationFailed(
                "Invalid scheme '1password'. Use 'onepassword' instead (e.g., onepassword://localhost:8080/Private)".to_string()
            ));
        }

        let is_valid_scheme = PROVIDER_REGISTRY
            .iter()
            .any(|reg| reg.schemes.contains(&scheme));

        if !is_valid_scheme {
            return Err(ReceiverError::ProviderNotFound(scheme.to_string()));
        }

        let url_string = match rest {
            "" | ":" => format!("{}://", scheme),
            s if s.starts_with("//") => format!("{}:{}", scheme, s),
            s if s.starts_with('/') => format!("{}://{}", scheme, s),
            s => format!("{}://{}", scheme, s),
        };

        let proper_url = Url::parse(&url_string).map_err(|e| {
            ReceiverError::ProviderOperationFailed(format!(
                "Invalid provider specification '{}': {}",
                s, e
            ))
        })?;

        Self::try_from(&proper_url)
    }
}

impl TryFrom<&Url> for Box<dyn Provider> {
    type Error = ReceiverError;

    fn try_from(url: &Url) -> Result<Self> {
        let scheme = url.scheme();

        let registration = PROVIDER_REGISTRY
            .iter()
            .find(|reg| reg.schemes.contains(&scheme))
            .ok_or_else(|| ReceiverError::ProviderNotFound(scheme.to_string()))?;

        (registration.factory)(url)
    }
}
