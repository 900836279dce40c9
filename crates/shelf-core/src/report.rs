//! Outcome of a synchronization pass

use crate::error::SyncWarning;
use crate::tree::TreeStats;

/// What a full pass did, plus everything that went wrong along the way
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Vaults that were walked
    pub vaults_scanned: Vec<String>,
    /// Vaults excluded from this pass (their entries are kept as they were)
    pub vaults_skipped: Vec<String>,
    /// Entries created by the walk
    pub entries_added: usize,
    /// Untracked entries deleted because they vanished from disk
    pub entries_removed: usize,
    /// Records merged into the tree
    pub records_applied: usize,
    /// Records skipped with a warning
    pub records_skipped: usize,
    /// Tracked books whose folder chain was rebuilt
    pub books_relocated: usize,
    /// Tracked books that were lost and are back on disk
    pub books_recovered: usize,
    pub warnings: Vec<SyncWarning>,
    /// Tree counts after the pass
    pub stats: TreeStats,
}

impl SyncReport {
    pub fn warn(&mut self, warning: impl Into<SyncWarning>) {
        let warning = warning.into();
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
