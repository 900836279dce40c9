//! Vault command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use shelf_core::Config;

use crate::output::{Output, OutputFormat};

/// List configured vaults, base vault first
pub fn list(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let current = config.current_vault_id();

    let vaults: Vec<_> = config
        .vaults()
        .into_iter()
        .map(|v| {
            let root = config.resolve_root(&v.path);
            let reachable = root.is_dir();
            (v, root, reachable)
        })
        .collect();

    match output.format {
        OutputFormat::Json => {
            let json: Vec<_> = vaults
                .iter()
                .map(|(v, root, reachable)| {
                    serde_json::json!({
                        "id": v.id,
                        "name": v.name,
                        "path": v.path,
                        "root": root,
                        "reachable": reachable,
                        "current": current.as_deref() == Some(v.id.as_str())
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Quiet => {
            for (v, _, _) in &vaults {
                println!("{}", v.id);
            }
        }
        OutputFormat::Human => {
            if vaults.is_empty() {
                println!("No vaults configured.");
                println!("Add one with: shelf vault add <id> <path>");
                return Ok(());
            }
            for (v, root, reachable) in &vaults {
                let marker = if current.as_deref() == Some(v.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                let missing = if *reachable { "" } else { " (unreachable)" };
                match &v.name {
                    Some(name) => println!(
                        "{} {} ({}) -> {}{}",
                        marker,
                        v.id,
                        name,
                        root.display(),
                        missing
                    ),
                    None => println!("{} {} -> {}{}", marker, v.id, root.display(), missing),
                }
            }
            println!("\n{} vault(s)", vaults.len());
        }
    }

    Ok(())
}

/// Add a vault to the configuration
pub fn add(
    id: String,
    path: String,
    name: Option<String>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    config.add_vault(&id, &path, name)?;
    let root = config.resolve_root(&path);
    save(&config, config_path)?;

    output.success(&format!("Added vault {} -> {}", id, root.display()));
    if !root.is_dir() && !output.is_quiet() {
        eprintln!("⚠ {} does not exist yet", root.display());
    }
    Ok(())
}

/// Remove a vault from the configuration
///
/// Records of its books stay in the metadata store.
pub fn remove(id: String, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    if !config.remove_vault(&id) {
        bail!("No configured vault named '{}'", id);
    }
    save(&config, config_path)?;

    output.success(&format!("Removed vault {}", id));
    Ok(())
}

fn save(config: &Config, config_path: Option<&PathBuf>) -> Result<()> {
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")
}
