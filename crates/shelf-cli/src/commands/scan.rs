//! Scan command handler

use anyhow::Result;

use shelf_core::CatalogService;

use crate::output::Output;

/// Run a full pass over every vault and report what changed
pub async fn scan(service: &CatalogService, output: &Output) -> Result<()> {
    let snapshot = service.reload().await?;
    output.print_report(&snapshot.report);
    Ok(())
}
