//! Engine-wide constants
//!
//! Single source of truth for the scheduler timings and traversal limits.

/// Default values for engine configuration
pub mod defaults {
    /// Debounce before a scheduled reconciliation runs
    pub const DEBOUNCE_MS: u64 = 50;
    /// Grace period after a connection's metadata write
    ///
    /// The connection's own change notification is dropped during it.
    /// Endpoint changes are deferred until it ends.
    pub const COOLDOWN_MS: u64 = 100;
    /// Containment steps walked when looking for a pool
    pub const MAX_PARENT_DEPTH: usize = 10;
    /// Task names listed in an orphaned-unbinding warning
    pub const ORPHAN_PREVIEW_LIMIT: usize = 3;
}

/// User-facing text fragments
pub mod text {
    /// Appended when a task list is cut short
    pub const ELLIPSIS: &str = "…";
}
