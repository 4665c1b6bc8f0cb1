//! onepw-receiver - 1Password Connect secrets as environment variables
//!
//! A TOML settings file maps logical setting names to 1Password item
//! identifiers. The [`Receiver`] looks each one up on a 1Password Connect
//! server and exports it into the process environment. When the server cannot
//! be reached, the value is read from a local `.env` file instead.
//!
//! # Example
//!
//! ```no_run
//! use onepw_receiver::Receiver;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Uses OP_CONNECT_HOST, OP_CONNECT_TOKEN and OP_VAULT
//!     let receiver = Receiver::from_env("settings.toml")?;
//!
//!     // Reads [database] postgres = "<item id>" and sets POSTGRES_PASSWORD
//!     receiver.set_environment_key("postgres", "database", "postgres_password")?;
//!
//!     // Or just look at the value
//!     let resolved = receiver.fetch("openai", "api");
//!     println!("{:?} from {:?}", resolved.key, resolved.source);
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod receiver;

pub mod provider;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::{
    DEFAULT_FIELD, DEFAULT_SETTINGS_FILE, GlobalConfig, GlobalDefaults, ItemRef, Settings,
    SettingsEntry,
};
pub use error::{ReceiverError, Result};
pub use receiver::{Receiver, ResolvedSecret, Source};
