//! Shelf CLI
//!
//! Command-line interface for Shelf - a catalog of book files across vaults.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use shelf_core::{BookStatus, Catalog, CatalogService, Config, DisplayMode, StorageError};

mod commands;
mod output;

use commands::book::EditArgs;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "shelf")]
#[command(about = "Shelf - Catalog of book files across vaults")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the config file (default: SHELF_CONFIG or ~/.config/shelf/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan all vaults and report what changed
    Scan,
    /// Show the book tree of a vault
    Tree {
        /// Vault to show (defaults to the current vault)
        #[arg(long)]
        vault: Option<String>,
        /// Grouping: path, tag, author or year
        #[arg(long)]
        by: Option<DisplayMode>,
        /// Reverse every ordering
        #[arg(long)]
        desc: bool,
    },
    /// List books
    #[command(alias = "ls")]
    Books {
        /// Only books of this vault
        #[arg(long)]
        vault: Option<String>,
        /// Only books that are no longer on disk
        #[arg(long)]
        lost: bool,
    },
    /// Show a book (by id or vault:/path)
    Show { target: String },
    /// Assign a stable id to a book and store its record
    Track { target: String },
    /// Edit a book's metadata
    Edit {
        /// Book id or vault:/path
        target: String,
        /// Reading status (unread, reading, finished)
        #[arg(short, long)]
        status: Option<BookStatus>,
        /// Title (empty string clears it)
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// Replace all tags (comma separated)
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
        /// Add a tag
        #[arg(short = 't', long = "add-tag")]
        add_tag: Vec<String>,
        /// Remove a tag
        #[arg(long = "remove-tag")]
        remove_tag: Vec<String>,
        /// Set authors (repeat for several)
        #[arg(short, long = "author")]
        author: Vec<String>,
        /// Publication year
        #[arg(short, long, conflicts_with = "clear_year")]
        year: Option<i32>,
        /// Clear the publication year
        #[arg(long)]
        clear_year: bool,
    },
    /// Open a book with the default application
    Open { target: String },
    /// Manage vaults
    Vault {
        #[command(subcommand)]
        command: Option<VaultCommands>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum VaultCommands {
    /// List configured vaults
    #[command(alias = "ls")]
    List,
    /// Add a vault
    Add {
        /// Vault id (no ':')
        id: String,
        /// Root directory; '@' prefix is relative to base_dir
        path: String,
        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Remove a vault (its records are kept)
    #[command(alias = "rm")]
    Remove { id: String },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, base_dir, extensions, store, tree.mode, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Commands that only touch the config file
    match &cli.command {
        Commands::Config { command } => {
            return handle_config_command(command.clone(), config_path, &output);
        }
        Commands::Vault { command } => {
            return handle_vault_command(command.clone(), config_path, &output);
        }
        _ => {}
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    let mut catalog = Catalog::open(config)?;
    debug!("Using {} metadata store", catalog.store_description());
    if let Commands::Tree { vault, by, desc } = &cli.command {
        let mode = by.unwrap_or(catalog.view().mode);
        let ascending = if *desc { false } else { catalog.view().ascending };
        catalog.set_display(vault.clone(), mode, ascending);
    }
    let service = CatalogService::new(catalog);

    let result = match cli.command {
        Commands::Scan => commands::scan::scan(&service, &output).await,
        Commands::Tree { .. } => commands::tree::show(&service, &output).await,
        Commands::Books { vault, lost } => {
            commands::book::list(&service, vault, lost, &output).await
        }
        Commands::Show { target } => commands::book::show(&service, &target, &output).await,
        Commands::Track { target } => commands::book::track(&service, &target, &output).await,
        Commands::Edit {
            target,
            status,
            title,
            tags,
            add_tag,
            remove_tag,
            author,
            year,
            clear_year,
        } => {
            let args = EditArgs {
                status,
                title,
                tags,
                add_tags: add_tag,
                remove_tags: remove_tag,
                authors: author,
                year,
                clear_year,
            };
            commands::book::edit(&service, &target, args, &output).await
        }
        Commands::Open { target } => commands::book::open(&service, &target, &output).await,
        Commands::Config { .. } | Commands::Vault { .. } => Ok(()), // Handled above
    };

    if let Some(hint) = result.as_ref().err().and_then(storage_hint) {
        eprintln!("Hint: {}", hint);
    }
    result
}

/// Recovery advice for a failed metadata store operation anywhere in the chain
fn storage_hint(error: &anyhow::Error) -> Option<&'static str> {
    error
        .chain()
        .find_map(|e| e.downcast_ref::<StorageError>())
        .and_then(StorageError::recovery_suggestion)
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

fn handle_vault_command(
    command: Option<VaultCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(VaultCommands::List) | None => commands::vault::list(config_path, output),
        Some(VaultCommands::Add { id, path, name }) => {
            commands::vault::add(id, path, name, config_path, output)
        }
        Some(VaultCommands::Remove { id }) => commands::vault::remove(id, config_path, output),
    }
}

/// Initialize logging
///
/// Level comes from SHELF_LOG (default `warn`, `--verbose` forces `debug`).
/// Logs go to `log_file` when configured, stderr otherwise.
fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        std::env::var("SHELF_LOG").unwrap_or_else(|_| "warn".to_string())
    };
    let env_filter = EnvFilter::new(format!("shelf_core={},shelf={}", level, level));

    let log_file = config.log_file.as_ref().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                None
            }
        }
    });

    // Ignore the error if a subscriber is already installed
    let _ = match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(file)
            .try_init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init(),
    };
}
