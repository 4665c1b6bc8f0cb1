#![allow(dead_code)]

use onepw_receiver::provider::Provider;
use onepw_receiver::provider::dotenv::{DotEnvConfig, DotEnvProvider};
use onepw_receiver::provider::onepassword::{OnePasswordConfig, OnePasswordProvider};
use onepw_receiver::{Receiver, Settings};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

pub const TOKEN: &str = "test-token";
pub const PRIVATE_ID: &str = "ytrpl6ivzxrclpbgcsuqavvwzy";
pub const WORK_ID: &str = "w0rkw0rkw0rkw0rkw0rkw0rkw0";
pub const POSTGRES_ID: &str = "hgsk2olqbnqyrpbesbtg4bvyme";
pub const OPENAI_ID: &str = "wz3ugqhjmjkrnzz3v4xfa4ojsi";
pub const REDIS_ID: &str = "r3d1sr3d1sr3d1sr3d1sr3d1s0";

pub const SETTINGS: &str = r#"
[database]
postgres = "hgsk2olqbnqyrpbesbtg4bvyme"
redis = { item = "Redis", field = "password" }

[api]
openai = { item = "wz3ugqhjmjkrnzz3v4xfa4ojsi", vault = "Work" }
"#;

/// Test helper for a temporary directory holding a settings file and a `.env`
pub struct TestFixture {
    _temp_dir: TempDir,
    pub base_path: PathBuf,
    pub settings_path: PathBuf,
    pub dotenv_path: PathBuf,
}

impl TestFixture {
    pub fn new(dotenv: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let base_path = temp_dir.path().to_path_buf();
        let settings_path = base_path.join("settings.toml");
        let dotenv_path = base_path.join(".env");
        fs::write(&settings_path, SETTINGS).unwrap();
        fs::write(&dotenv_path, dotenv).unwrap();
        Self {
            _temp_dir: temp_dir,
            base_path,
            settings_path,
            dotenv_path,
        }
    }

    pub fn fallback(&self) -> Box<dyn Provider> {
        Box::new(DotEnvProvider::new(DotEnvConfig::with_path(self.dotenv_path.clone())).unwrap())
    }

    pub fn receiver(&self, vault: OnePasswordProvider) -> Receiver {
        Receiver::new(
            Settings::load(&self.settings_path).unwrap(),
            Box::new(vault),
            self.fallback(),
        )
    }
}

/// A Connect provider for `host` using the test token and the `Private` vault
pub fn connect(host: &str) -> OnePasswordProvider {
    OnePasswordProvider::new(
        OnePasswordConfig::default()
            .with_host(host)
            .with_token(TOKEN)
            .with_default_vault("Private")
            .with_timeout(Duration::from_secs(2)),
    )
    .unwrap()
}

pub fn vaults_body() -> String {
    format!(
        r#"[
            {{"id": "{PRIVATE_ID}", "name": "Private", "type": "USER_CREATED"}},
            {{"id": "{WORK_ID}", "name": "Work", "type": "USER_CREATED"}}
        ]"#
    )
}

/// An item with a `username` field and one concealed field `label`
pub fn item_body(id: &str, title: &str, label: &str, value: &str) -> String {
    format!(
        r#"{{
            "id": "{id}",
            "title": "{title}",
            "category": "PASSWORD",
            "fields": [
                {{"id": "username", "type": "STRING", "purpose": "USERNAME", "label": "username", "value": "app"}},
                {{"id": "f1", "type": "CONCEALED", "label": "{label}", "value": "{value}"}}
            ]
        }}"#
    )
}
