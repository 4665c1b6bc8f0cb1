use crate::provider::onepassword::{OnePasswordConfig, OnePasswordProvider};
use crate::provider::{Provider, providers};
use crate::{
    DEFAULT_SETTINGS_FILE, GlobalConfig, GlobalDefaults, Receiver, ReceiverError, Settings, Source,
};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use colored::Colorize;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::Url;

const DEFAULT_CONNECT: &str = "onepassword://";
const DEFAULT_FALLBACK: &str = "dotenv://";

/// Main CLI structure for the onepw-receiver application.
#[derive(Parser)]
#[command(name = "onepw-receiver")]
#[command(about = "Expose 1Password Connect secrets as environment variables", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file mapping sections and items to 1Password items
    #[arg(short, long, global = true, env = "ONEPW_SETTINGS")]
    settings: Option<PathBuf>,
    /// Vault used when a settings entry does not name one
    #[arg(long, global = true, env = "OP_VAULT")]
    vault: Option<String>,
    /// 1Password Connect provider URI (defaults to OP_CONNECT_HOST)
    #[arg(long, global = true, env = "ONEPW_CONNECT")]
    connect: Option<String>,
    /// Provider consulted when the vault cannot answer
    #[arg(long, global = true, env = "ONEPW_FALLBACK")]
    fallback: Option<String>,
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    /// The subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value of one settings item
    Get {
        /// Section of the settings file (dotted for nested tables)
        section: String,
        /// Item name within the section
        item: String,
        /// Field label to read instead of the configured one
        #[arg(short, long)]
        field: Option<String>,
    },
    /// Run a command with every settings item in its environment
    Run {
        /// Command and arguments to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Print KEY=value lines for every settings item
    Export,
    /// Check which settings items can be resolved
    Check,
    /// List the vaults visible to the Connect token
    Vaults,
    /// List the available providers
    Providers,
    /// Init or show ~/.config/onepw-receiver/config.toml
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Save the given --settings, --vault and --fallback as defaults
    Init,
    /// Show current configuration
    Show,
}

/// Effective options after merging flags, environment and global config.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Options {
    settings: PathBuf,
    vault: Option<String>,
    connect: String,
    fallback: String,
}

impl Options {
    fn resolve(cli: &Cli, global: Option<&GlobalConfig>) -> Self {
        let defaults = global.map(|g| &g.defaults);
        Self {
            settings: cli
                .settings
                .clone()
                .or_else(|| defaults.and_then(|d| d.settings.clone()))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE)),
            vault: cli
                .vault
                .clone()
                .or_else(|| defaults.and_then(|d| d.vault.clone())),
            connect: cli
                .connect
                .clone()
                .unwrap_or_else(|| DEFAULT_CONNECT.to_string()),
            fallback: cli
                .fallback
                .clone()
                .or_else(|| defaults.and_then(|d| d.fallback.clone()))
                .unwrap_or_else(|| DEFAULT_FALLBACK.to_string()),
        }
    }

    fn connect_provider(&self) -> crate::Result<OnePasswordProvider> {
        let url = Url::parse(&self.connect).map_err(|e| {
            ReceiverError::ProviderOperationFailed(format!(
                "Invalid connect URI '{}': {}",
                self.connect, e
            ))
        })?;
        let mut config = OnePasswordConfig::try_from(&url)?;
        if url.path().trim_matches('/').is_empty() {
            if let Some(vault) = &self.vault {
                config.default_vault = Some(vault.clone());
            }
        }
        OnePasswordProvider::new(config)
    }

    fn receiver(&self) -> crate::Result<Receiver> {
        // The settings file is checked before any provider exists
        let settings = Settings::load(&self.settings)?;
        let vault = self.connect_provider()?;
        let fallback = Box::<dyn Provider>::try_from(self.fallback.as_str())?;
        Ok(Receiver::new(settings, Box::new(vault), fallback))
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Formats a `KEY=value` line that dotenv parsers read back unchanged.
fn export_line(key: &str, value: &str) -> String {
    let is_plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.,:/@+%".contains(c));
    if is_plain {
        return format!("{}={}", key, value);
    }

    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '$' => escaped.push_str("\\$"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    format!("{}=\"{}\"", key, escaped)
}

/// Main entry point for the onepw-receiver CLI.
///
/// Loads `.env` into the process first (without overriding existing
/// variables) so `OP_CONNECT_HOST` and `OP_CONNECT_TOKEN` may live there.
pub fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dotenv {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => debug!("No .env file to load"),
        Err(e) => warn!("Could not load .env: {}", e),
    }

    let global = GlobalConfig::load().wrap_err("Failed to load global configuration")?;
    let options = Options::resolve(&cli, global.as_ref());
    debug!(?options, "Resolved options");

    match cli.command {
        Commands::Get {
            section,
            item,
            field,
        } => {
            let receiver = options
                .receiver()
                .wrap_err("Failed to load onepw-receiver configuration")?;
            let resolved = receiver.fetch_field(&item, &section, field.as_deref());
            match resolved.value {
                Some(value) => {
                    println!("{}", value);
                    Ok(())
                }
                None => Err(ReceiverError::SecretUnavailable(resolved.key))
                    .wrap_err("Failed to get secret"),
            }
        }
        Commands::Run { command } => {
            let receiver = options
                .receiver()
                .wrap_err("Failed to load onepw-receiver configuration")?;
            let mut cmd = receiver
                .command(&command)
                .wrap_err("Failed to prepare command")?;
            let status = cmd
                .status()
                .wrap_err_with(|| format!("Failed to run '{}'", command[0]))?;
            std::process::exit(status.code().unwrap_or(1));
        }
        Commands::Export => {
            let receiver = options
                .receiver()
                .wrap_err("Failed to load onepw-receiver configuration")?;
            for (entry, resolved) in receiver.resolve_all() {
                match resolved.value {
                    Some(value) => println!("{}", export_line(&resolved.key, &value)),
                    None => warn!(
                        "Skipping '{}' in section '{}': no value available",
                        entry.item, entry.section
                    ),
                }
            }
            Ok(())
        }
        Commands::Check => {
            let receiver = options
                .receiver()
                .wrap_err("Failed to load onepw-receiver configuration")?;

            println!(
                "Checking {} using {} (fallback: {})...\n",
                options.settings.display().to_string().bold(),
                receiver.vault_provider().name().blue(),
                receiver.fallback_provider().name().cyan()
            );

            let results = receiver.resolve_all();
            let mut missing = 0;
            for (entry, resolved) in &results {
                let label = format!("{}.{}", entry.section, entry.item);
                match resolved.source {
                    Some(Source::Vault) => println!("{} {} - {}", "✓".green(), label, resolved.key),
                    Some(Source::Fallback) => println!(
                        "{} {} - {} {}",
                        "○".yellow(),
                        label,
                        resolved.key,
                        "(fallback)".yellow()
                    ),
                    None => {
                        missing += 1;
                        println!(
                            "{} {} - {} {}",
                            "✗".red(),
                            label,
                            resolved.key,
                            "(missing)".red()
                        );
                    }
                }
            }

            println!(
                "\nSummary: {} found, {} missing",
                (results.len() - missing).to_string().green(),
                missing.to_string().red()
            );

            if missing > 0 {
                return Err(eyre!("{} settings items could not be resolved", missing));
            }
            Ok(())
        }
        Commands::Vaults => {
            let provider = options
                .connect_provider()
                .wrap_err("Failed to configure 1Password Connect")?;
            let mut vaults: Vec<(String, String)> = provider
                .vaults()
                .wrap_err("Failed to list vaults")?
                .into_iter()
                .collect();
            vaults.sort();
            for (name, id) in vaults {
                println!("{}  {}", id.dimmed(), name);
            }
            Ok(())
        }
        Commands::Providers => {
            for info in providers() {
                println!("{}", info.display_with_examples());
            }
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigAction::Init => {
                let config = GlobalConfig {
                    defaults: GlobalDefaults {
                        settings: cli.settings.map(|p| p.canonicalize().unwrap_or(p)),
                        vault: cli.vault,
                        fallback: cli.fallback,
                    },
                };
                let path = config.save().wrap_err("Failed to save configuration")?;
                println!("✓ Configuration saved to {}", path.display());
                Ok(())
            }
            ConfigAction::Show => {
                let path = GlobalConfig::path()?;
                match global {
                    Some(config) => {
                        println!("Configuration file: {}\n", path.display());
                        let show = |name: &str, value: Option<String>| match value {
                            Some(value) => println!("{:<9} {}", format!("{}:", name), value),
                            None => println!("{:<9} (none)", format!("{}:", name)),
                        };
                        show(
                            "Settings",
                            config.defaults.settings.map(|p| p.display().to_string()),
                        );
                        show("Vault", config.defaults.vault);
                        show("Fallback", config.defaults.fallback);
                    }
                    None => {
                        println!(
                            "No configuration found. Run 'onepw-receiver config init' to create one."
                        );
                    }
                }
                Ok(())
            }
        },
    }
}
