use crate::provider::{Provider, SecretRef};
use crate::{ReceiverError, Result};
use percent_encoding::percent_decode_str;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const HOST_ENV: &str = "OP_CONNECT_HOST";
pub const TOKEN_ENV: &str = "OP_CONNECT_TOKEN";
pub const VAULT_ENV: &str = "OP_VAULT";
pub const TIMEOUT_ENV: &str = "OP_CONNECT_TIMEOUT";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A vault as listed by `GET /v1/vaults`.
#[derive(Debug, Clone, Deserialize)]
pub struct Vault {
    pub id: String,
    pub name: String,
}

/// An item as returned by `GET /v1/vaults/{vault}/items/{item}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sections: Vec<ItemSection>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemSection {
    pub id: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Field {
    pub id: String,
    pub label: Option<String>,
    pub value: Option<String>,
    pub section: Option<FieldSection>,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSection {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct ItemSummary {
    id: String,
}

/// Error body sent by Connect on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ConnectErrorBody {
    message: String,
}

impl Item {
    /// Finds the first field labelled `label`.
    ///
    /// With `section`, only fields inside the item section labelled `section`
    /// are considered.
    pub fn field(&self, label: &str, section: Option<&str>) -> Option<&Field> {
        let section_ids: Option<Vec<&str>> = section.map(|wanted| {
            self.sections
                .iter()
                .filter(|s| s.label.as_deref() == Some(wanted))
                .map(|s| s.id.as_str())
                .collect()
        });

        self.fields.iter().find(|field| {
            if field.label.as_deref() != Some(label) {
                return false;
            }
            match &section_ids {
                None => true,
                Some(ids) => field
                    .section
                    .as_ref()
                    .is_some_and(|s| ids.contains(&s.id.as_str())),
            }
        })
    }
}

/// Returns whether `s` has the shape of a 1Password UUID.
///
/// Anything else is treated as an item title.
pub fn is_uuid(s: &str) -> bool {
    s.len() == 26
        && s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Connection settings for a 1Password Connect server.
///
/// Missing or malformed values are not an error until a lookup is attempted,
/// so a receiver without working Connect credentials still resolves
/// everything from its fallback.
#[derive(Debug)]
pub struct OnePasswordConfig {
    /// Base URL of the Connect server, e.g. `http://localhost:8080`.
    /// Parsed on each lookup.
    pub host: Option<String>,
    /// Connect access token
    pub token: Option<SecretString>,
    /// Vault used when a secret does not name one
    pub default_vault: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for OnePasswordConfig {
    fn default() -> Self {
        Self {
            host: None,
            token: None,
            default_vault: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl OnePasswordConfig {
    /// Reads `OP_CONNECT_HOST`, `OP_CONNECT_TOKEN`, `OP_VAULT` and
    /// `OP_CONNECT_TIMEOUT` from the process environment.
    pub fn from_env() -> Result<Self> {
        let timeout = match non_empty_var(TIMEOUT_ENV) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    warn!("Ignoring invalid {}={:?}", TIMEOUT_ENV, raw);
                    DEFAULT_TIMEOUT
                }
            },
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            host: non_empty_var(HOST_ENV),
            token: non_empty_var(TOKEN_ENV).map(SecretString::from),
            default_vault: non_empty_var(VAULT_ENV),
            timeout,
        })
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }

    pub fn with_default_vault(mut self, vault: impl Into<String>) -> Self {
        self.default_vault = Some(vault.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

impl TryFrom<&Url> for OnePasswordConfig {
    type Error = ReceiverError;

    /// Creates a `OnePasswordConfig` from a URL, starting from the environment.
    ///
    /// - `onepassword://` uses the environment as-is
    /// - `onepassword://localhost:8080/Private` talks plain HTTP to that host
    /// - `onepassword+https://:TOKEN@connect.example.com/Infra` uses TLS and an inline token
    fn try_from(url: &Url) -> std::result::Result<Self, Self::Error> {
        let http_scheme = match url.scheme() {
            "onepassword" => "http",
            "onepassword+https" => "https",
            other => {
                return Err(ReceiverError::ProviderOperationFailed(format!(
                    "Invalid scheme '{}' for onepassword provider",
                    other
                )));
            }
        };

        let mut config = Self::from_env()?;

        if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
            config.host = Some(match url.port() {
                Some(port) => format!("{}://{}:{}", http_scheme, host, port),
                None => format!("{}://{}", http_scheme, host),
            });
        }

        if let Some(token) = url.password().filter(|p| !p.is_empty()) {
            config.token = Some(SecretString::from(decode(token)));
        }

        let vault = url.path().trim_matches('/');
        if !vault.is_empty() {
            config.default_vault = Some(decode(vault));
        }

        Ok(config)
    }
}

/// Reads secrets from a 1Password Connect server.
///
/// The vault list is fetched once and kept in memory for the life of the
/// provider; items are fetched on every lookup.
pub struct OnePasswordProvider {
    config: OnePasswordConfig,
    client: Client,
    vaults: Mutex<Option<HashMap<String, String>>>,
}

crate::register_provider! {
    struct: OnePasswordProvider,
    config: OnePasswordConfig,
    name: "onepassword",
    description: "1Password Connect server",
    schemes: ["onepassword", "onepassword+https"],
    examples: ["onepassword://localhost:8080/Private", "onepassword+https://:token@connect.example.com/Infra"],
}

impl OnePasswordProvider {
    pub fn new(config: OnePasswordConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("onepw-receiver/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            client,
            vaults: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &OnePasswordConfig {
        &self.config
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or(ReceiverError::MissingConnectSetting(HOST_ENV))?;
        let mut url = Url::parse(host).map_err(|source| ReceiverError::InvalidConnectHost {
            host: host.to_string(),
            source,
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                ReceiverError::ProviderOperationFailed(format!(
                    "{} must be an http(s) URL",
                    HOST_ENV
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let token = self
            .config
            .token
            .as_ref()
            .ok_or(ReceiverError::MissingConnectSetting(TOKEN_ENV))?;

        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = match serde_json::from_str::<ConnectErrorBody>(&body) {
                Ok(err) => err.message,
                Err(_) if !body.trim().is_empty() => body,
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            };
            return Err(ReceiverError::ConnectApi {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json()?)
    }

    /// Returns a map of vault names to vault IDs.
    pub fn vaults(&self) -> Result<HashMap<String, String>> {
        let mut cache = self
            .vaults
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(vaults) = cache.as_ref() {
            return Ok(vaults.clone());
        }

        let list: Vec<Vault> = self.request(self.endpoint(&["v1", "vaults"])?)?;
        let vaults: HashMap<String, String> = list.into_iter().map(|v| (v.name, v.id)).collect();
        debug!("Found {} vaults", vaults.len());
        *cache = Some(vaults.clone());
        Ok(vaults)
    }

    /// Resolves a vault name to its ID.
    ///
    /// A string that is not a vault name but is an existing vault ID is
    /// returned unchanged.
    pub fn vault_id(&self, name: &str) -> Result<String> {
        let vaults = self.vaults()?;
        if let Some(id) = vaults.get(name) {
            return Ok(id.clone());
        }
        if vaults.values().any(|id| id == name) {
            return Ok(name.to_string());
        }
        Err(ReceiverError::VaultNotFound(name.to_string()))
    }

    /// Fetches an item by ID, or by title when `item` is not a UUID.
    pub fn item(&self, vault_id: &str, item: &str) -> Result<Item> {
        if is_uuid(item) {
            self.item_by_id(vault_id, item)
        } else {
            self.item_by_title(vault_id, item)
        }
    }

    fn item_by_id(&self, vault_id: &str, item_id: &str) -> Result<Item> {
        let url = self.endpoint(&["v1", "vaults", vault_id, "items", item_id])?;
        match self.request(url) {
            Err(ReceiverError::ConnectApi { status: 404, .. }) => {
                Err(ReceiverError::ItemNotFound(item_id.to_string()))
            }
            other => other,
        }
    }

    fn item_by_title(&self, vault_id: &str, title: &str) -> Result<Item> {
        let mut url = self.endpoint(&["v1", "vaults", vault_id, "items"])?;
        url.query_pairs_mut()
            .append_pair("filter", &title_filter(title));

        let matches: Vec<ItemSummary> = self.request(url)?;
        match matches.as_slice() {
            [] => Err(ReceiverError::ItemNotFound(title.to_string())),
            [only] => self.item_by_id(vault_id, &only.id),
            _ => Err(ReceiverError::AmbiguousItem {
                title: title.to_string(),
                count: matches.len(),
            }),
        }
    }
}

/// Builds a Connect `filter` expression matching `title` exactly.
fn title_filter(title: &str) -> String {
    let escaped = title.replace('\\', "\\\\").replace('"', "\\\"");
    format!("title eq \"{}\"", escaped)
}

impl Provider for OnePasswordProvider {
    fn name(&self) -> &'static str {
        Self::PROVIDER_NAME
    }

    fn get(&self, secret: &SecretRef) -> Result<Option<String>> {
        let vault = secret
            .vault
            .as_deref()
            .or(self.config.default_vault.as_deref())
            .ok_or(ReceiverError::NoVault)?;

        let vault_id = self.vault_id(vault)?;
        let item = self.item(&vault_id, &secret.item)?;

        match item.field(&secret.field, secret.field_section.as_deref()) {
            Some(field) => Ok(field.value.clone()),
            None => {
                debug!(
                    "Item '{}' has no field labelled '{}'",
                    item.title, secret.field
                );
                Ok(None)
            }
        }
    }
}
