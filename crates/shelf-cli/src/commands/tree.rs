//! Tree command handler

use anyhow::{bail, Result};

use shelf_core::CatalogService;

use crate::output::Output;

/// Print the display tree of the current (or requested) vault
///
/// The view itself is chosen before the service starts; see `main`.
pub async fn show(service: &CatalogService, output: &Output) -> Result<()> {
    let snapshot = service.ready().await?;

    if let Some(vid) = &snapshot.view.vault {
        if !snapshot.vaults.iter().any(|v| &v.id == vid) {
            bail!("Vault '{}' is not configured or could not be loaded", vid);
        }
    }

    output.print_tree(&snapshot.display, &snapshot.tree);
    Ok(())
}
