//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use shelf_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "base_dir": config.base_dir,
                    "include_base_vault": config.include_base_vault,
                    "extensions": config.extensions,
                    "store": config.store.to_string(),
                    "current_vault": config.current_vault,
                    "log_file": config.log_file,
                    "tree": {
                        "mode": config.tree.mode.as_str(),
                        "ascending": config.tree.ascending
                    },
                    "vaults": config.vaults
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:           {}", config.data_dir.display());
            println!("  base_dir:           {}", config.base_dir.display());
            println!("  include_base_vault: {}", config.include_base_vault);
            println!("  extensions:         {}", config.extensions.join(","));
            println!("  store:              {}", config.store);
            println!(
                "  current_vault:      {}",
                config.current_vault.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  log_file:           {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  tree.mode:          {}", config.tree.mode);
            println!("  tree.ascending:     {}", config.tree.ascending);
            println!("  vaults:             {}", config.vaults.len());
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    config.set_value(&key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
