//! Toolshed storage administration CLI

mod dump;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use toolshed_core::{
    StorageAdapter, StorageConfig, StorageFactory, LARGE_PAYLOAD_CHAIN, SMALL_RECORD_CHAIN,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "toolshed-admin")]
#[command(author = "Toolshed Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Inspect and maintain Toolshed entity storage")]
struct Cli {
    /// Config file (JSON)
    #[arg(short, long, default_value = "toolshed.json")]
    config: PathBuf,

    /// Override the storage root directory
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Chain {
    /// Notes, chat sessions, audio
    Large,
    /// Small records
    Small,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration
    Config,

    #[command(flatten)]
    Store(StoreCommands),
}

/// Commands that open the configured adapters
#[derive(Subcommand, Debug)]
enum StoreCommands {
    /// Probe a fallback chain and show which adapter would be used
    Probe {
        #[arg(long, value_enum, default_value = "large")]
        chain: Chain,
    },

    /// List keys
    List {
        #[arg(short, long)]
        adapter: String,
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Print the value stored under a key
    Get {
        #[arg(short, long)]
        adapter: String,
        key: String,
    },

    /// Store a JSON value under a key
    Set {
        #[arg(short, long)]
        adapter: String,
        key: String,
        /// JSON text
        value: String,
    },

    /// Delete a key
    Delete {
        #[arg(short, long)]
        adapter: String,
        key: String,
    },

    /// Delete all keys, or those under a prefix
    Clear {
        #[arg(short, long)]
        adapter: String,
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Show usage of every registered adapter
    Stats,

    /// Export keys to a JSON dump
    Export {
        #[arg(short, long)]
        adapter: String,
        #[arg(short, long)]
        prefix: Option<String>,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a JSON dump
    Import {
        #[arg(short, long)]
        adapter: String,
        file: PathBuf,
    },
}

fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn lookup_adapter(factory: &StorageFactory, name: &str) -> Result<Arc<dyn StorageAdapter>> {
    factory.adapter(name).ok_or_else(|| {
        anyhow!(
            "Unknown adapter '{}' (registered: {})",
            name,
            factory.adapter_names().join(", ")
        )
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = StorageConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    if let Some(root) = cli.root {
        config.root_dir = root;
    }

    match cli.command {
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
        Commands::Store(command) => {
            let factory = StorageFactory::with_defaults(&config).await?;
            run(&factory, command).await?;
        }
    }

    Ok(())
}

async fn run(factory: &StorageFactory, command: StoreCommands) -> Result<()> {
    match command {
        StoreCommands::Probe { chain } => {
            let candidates = match chain {
                Chain::Large => LARGE_PAYLOAD_CHAIN,
                Chain::Small => SMALL_RECORD_CHAIN,
            };
            match factory.select(candidates).await {
                Ok(selection) => {
                    for probe in &selection.probes {
                        println!("  {}", probe);
                    }
                    println!("Selected: {}", selection.name);
                }
                Err(e) => println!("{}", e),
            }
        }

        StoreCommands::List { adapter: name, prefix } => {
            let adapter = lookup_adapter(factory, &name)?;
            let mut keys = adapter.list(prefix.as_deref()).await;
            keys.sort();
            for key in &keys {
                println!("{}", key);
            }
            tracing::info!("{} keys", keys.len());
        }

        StoreCommands::Get { adapter: name, key } => {
            let adapter = lookup_adapter(factory, &name)?;
            if let Some(value) = adapter.get(&key).await {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else if let Some(data) = adapter.get_bytes(&key).await {
                println!("<binary payload, {} bytes>", data.len());
            } else {
                return Err(anyhow!("Key not found: {}", key));
            }
        }

        StoreCommands::Set { adapter: name, key, value } => {
            let adapter = lookup_adapter(factory, &name)?;
            let value: serde_json::Value =
                serde_json::from_str(&value).context("Value must be valid JSON")?;
            adapter.set(&key, &value).await?;
            println!("Stored {}", key);
        }

        StoreCommands::Delete { adapter: name, key } => {
            lookup_adapter(factory, &name)?.delete(&key).await?;
            println!("Deleted {}", key);
        }

        StoreCommands::Clear { adapter: name, prefix } => {
            lookup_adapter(factory, &name)?.clear(prefix.as_deref()).await?;
            match prefix {
                Some(p) => println!("Cleared keys under '{}'", p),
                None => println!("Cleared all keys"),
            }
        }

        StoreCommands::Stats => {
            for name in factory.adapter_names() {
                let adapter = lookup_adapter(factory, &name)?;
                let supported = adapter.is_supported().await;
                println!(
                    "{:<14} supported={:<5} keys={:<6} used={}B available={}B",
                    name,
                    supported,
                    adapter.list(None).await.len(),
                    adapter.size().await,
                    adapter.available_space().await
                );
            }
        }

        StoreCommands::Export { adapter: name, prefix, output } => {
            let adapter = lookup_adapter(factory, &name)?;
            let dump = dump::export(adapter.as_ref(), prefix.as_deref()).await?;
            let text = serde_json::to_string_pretty(&dump)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Exported {} entries to {:?}", dump.entries.len(), path);
                }
                None => println!("{}", text),
            }
        }

        StoreCommands::Import { adapter: name, file } => {
            let adapter = lookup_adapter(factory, &name)?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let dump: dump::DumpFile = serde_json::from_str(&text).context("Invalid dump file")?;
            let written = dump::import(adapter.as_ref(), &dump).await?;
            println!("Imported {} entries into {}", written, name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_needs_no_adapters() {
        let cli = Cli::try_parse_from(["toolshed-admin", "--root", "/tmp/x", "config"]).unwrap();
        assert!(matches!(cli.command, Commands::Config));
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_store_commands_parse() {
        let cli = Cli::try_parse_from(["toolshed-admin", "list", "-a", "opfs", "-p", "notes:"]).unwrap();
        match cli.command {
            Commands::Store(StoreCommands::List { adapter, prefix }) => {
                assert_eq!(adapter, "opfs");
                assert_eq!(prefix.as_deref(), Some("notes:"));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["toolshed-admin", "probe", "--chain", "small"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Store(StoreCommands::Probe { chain: Chain::Small })
        ));
    }
}
