use super::{Provider, SecretRef};
use crate::{ReceiverError, Result};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// File name searched for when no explicit path is configured.
pub const DOTENV_FILENAME: &str = ".env";

/// Configuration for the dotenv provider.
///
/// Without a path, the provider searches for `.env` in the current working
/// directory and then in each parent directory, using the first one found.
#[derive(Debug, Clone, Default)]
pub struct DotEnvConfig {
    /// Explicit path to the environment file
    pub path: Option<PathBuf>,
}

impl DotEnvConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl TryFrom<&Url> for DotEnvConfig {
    type Error = ReceiverError;

    /// Creates a `DotEnvConfig` from a URL.
    ///
    /// - `dotenv://` searches upwards from the working directory
    /// - `dotenv:///srv/app/.env` (or `dotenv:/srv/app/.env`) is absolute
    /// - `dotenv://config/.env.local` is relative to the working directory
    fn try_from(url: &Url) -> std::result::Result<Self, Self::Error> {
        if url.scheme() != "dotenv" {
            return Err(ReceiverError::ProviderOperationFailed(format!(
                "Invalid scheme '{}' for dotenv provider",
                url.scheme()
            )));
        }

        let path = match url.host_str() {
            Some(host) if !host.is_empty() && host != "localhost" => {
                format!("{}{}", host, url.path())
            }
            _ => url.path().to_string(),
        };

        if path.is_empty() || path == "/" {
            Ok(Self::default())
        } else {
            Ok(Self::with_path(path))
        }
    }
}

/// Reads secrets from a `.env` file.
///
/// Values are looked up by [`SecretRef::key`]. When a key appears more than
/// once, the last assignment wins.
pub struct DotEnvProvider {
    config: DotEnvConfig,
}

crate::register_provider! {
    struct: DotEnvProvider,
    config: DotEnvConfig,
    name: "dotenv",
    description: "Traditional .env files",
    schemes: ["dotenv"],
    examples: ["dotenv://", "dotenv:/path/to/.env"],
}

impl DotEnvProvider {
    pub fn new(config: DotEnvConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// The environment file this provider reads, if one can be found.
    pub fn dotenv_path(&self) -> Result<Option<PathBuf>> {
        match &self.config.path {
            Some(path) => Ok(Some(path.clone())),
            None => Ok(find_dotenv(&env::current_dir()?)),
        }
    }

    /// Parses the environment file into a map. A missing file is empty.
    pub fn load_env_vars(&self) -> Result<HashMap<String, String>> {
        let Some(path) = self.dotenv_path()? else {
            debug!("No {} file found", DOTENV_FILENAME);
            return Ok(HashMap::new());
        };
        if !path.exists() {
            debug!("Environment file {} does not exist", path.display());
            return Ok(HashMap::new());
        }

        debug!("dotenv found: {}", path.display());
        let mut vars = HashMap::new();
        for item in dotenvy::from_path_iter(&path)? {
            let (key, value) = item?;
            vars.insert(key, value);
        }
        Ok(vars)
    }
}

impl Provider for DotEnvProvider {
    fn name(&self) -> &'static str {
        Self::PROVIDER_NAME
    }

    fn get(&self, secret: &SecretRef) -> Result<Option<String>> {
        let vars = self.load_env_vars()?;
        Ok(vars.get(&secret.key).cloned())
    }
}

/// Searches `start` and its ancestors for a `.env` file.
pub fn find_dotenv(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(DOTENV_FILENAME))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn provider_for(path: &Path) -> DotEnvProvider {
        DotEnvProvider::new(DotEnvConfig::with_path(path)).unwrap()
    }

    #[test]
    fn test_get_existing_key() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".env");
        fs::write(&path, "POSTGRES=hunter2\nREDIS=\"quoted value\"\n").unwrap();

        let provider = provider_for(&path);
        let secret = SecretRef::new("POSTGRES", "unused");
        assert_eq!(provider.get(&secret).unwrap(), Some("hunter2".to_string()));

        let secret = SecretRef::new("REDIS", "unused");
        assert_eq!(
            provider.get(&secret).unwrap(),
            Some("quoted value".to_string())
        );
    }

    #[test]
    fn test_get_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".env");
        fs::write(&path, "POSTGRES=hunter2\n").unwrap();

        let provider = provider_for(&path);
        assert_eq!(provider.get(&SecretRef::new("MYSQL", "x")).unwrap(), None);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".env");
        fs::write(&path, "postgres=lower\n").unwrap();

        let provider = provider_for(&path);
        assert_eq!(provider.get(&SecretRef::new("POSTGRES", "x")).unwrap(), None);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider_for(&temp_dir.path().join(".env"));
        assert_eq!(provider.get(&SecretRef::new("POSTGRES", "x")).unwrap(), None);
    }

    #[test]
    fn test_last_assignment_wins() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".env");
        fs::write(&path, "TOKEN=first\nTOKEN=second\n").unwrap();

        let provider = provider_for(&path);
        assert_eq!(
            provider.get(&SecretRef::new("TOKEN", "x")).unwrap(),
            Some("second".to_string())
        );
    }

    #[test]
    fn test_find_dotenv_walks_up() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join(".env"), "X=1\n").unwrap();

        assert_eq!(
            find_dotenv(&nested),
            Some(temp_dir.path().join(".env"))
        );

        fs::write(nested.join(".env"), "X=2\n").unwrap();
        assert_eq!(find_dotenv(&nested), Some(nested.join(".env")));
    }

    #[test]
    fn test_config_from_url() {
        let url = Url::parse("dotenv://").unwrap();
        let config = DotEnvConfig::try_from(&url).unwrap();
        assert!(config.path.is_none());

        let url = Url::parse("dotenv:///srv/app/.env").unwrap();
        let config = DotEnvConfig::try_from(&url).unwrap();
        assert_eq!(config.path, Some(PathBuf::from("/srv/app/.env")));

        let url = Url::parse("dotenv://config/.env.local").unwrap();
        let config = DotEnvConfig::try_from(&url).unwrap();
        assert_eq!(config.path, Some(PathBuf::from("config/.env.local")));
    }

    #[test]
    fn test_config_rejects_other_scheme() {
        let url = Url::parse("onepassword://localhost").unwrap();
        assert!(DotEnvConfig::try_from(&url).is_err());
    }
}
