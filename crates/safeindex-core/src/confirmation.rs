//! Reorg-depth confirmation policy.

use serde::{Deserialize, Serialize};

/// Decides whether a block is deep enough below the chain head to be final.
///
/// A block at height `n` is confirmed once `head - n >= reorg_depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    /// Number of blocks that must be built on top of a block before it is
    /// treated as immutable.
    pub reorg_depth: u64,
}

impl ConfirmationPolicy {
    pub fn new(reorg_depth: u64) -> Self {
        Self { reorg_depth }
    }

    /// Returns `true` if `head_number` is far enough ahead for `block_number` to be confirmed.
    ///
    /// Blocks above the reported head (a lagging node) count as zero-deep.
    pub fn is_confirmed(&self, block_number: u64, head_number: u64) -> bool {
        head_number.saturating_sub(block_number) >= self.reorg_depth
    }

    /// Highest block number that is confirmed at `head_number`, if any.
    pub fn confirmed_tip(&self, head_number: u64) -> Option<u64> {
        head_number.checked_sub(self.reorg_depth)
    }
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_REORG_DEPTH)
    }
}
