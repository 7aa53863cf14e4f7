/// What one synchronization did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Distinct nodes in the resolved tree.
    pub visited: usize,
    /// Nodes pulled from the source.
    pub fetched: usize,
    /// Nodes found in the local store.
    pub reused: usize,
    /// The snapshot was already pinned; nothing was walked.
    pub whole_snapshot_hit: bool,
}

impl SyncReport {
    pub fn whole_snapshot_hit() -> Self {
        Self {
            whole_snapshot_hit: true,
            ..Default::default()
        }
    }
}
