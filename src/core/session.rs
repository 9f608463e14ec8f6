// This module provides arena-based pass session management using the bumpalo crate. A
// CheckpointSession owns a borrowed arena for per-function analysis results (the dominator
// tree arrays live there) and tracks pass statistics in a RefCell so that shared references
// to the session can record events from anywhere in the pipeline. PassStats counts processed
// and unzipped functions, the size of each partition (stored, recomputed, inverted values),
// scalar slots and per-iteration arrays created, and pending uses resolved by the
// out-of-order cloner. The session is created once per batch of functions; pass-local state
// such as clone environments is never stored here.

//! Arena-based session for the checkpointing passes.

use bumpalo::Bump;
use std::cell::RefCell;
use std::fmt;

/// Pass session: arena plus statistics.
pub struct CheckpointSession<'arena> {
    /// Arena allocator for analysis results.
    arena: &'arena Bump,

    /// Statistics for debugging and tuning.
    stats: RefCell<PassStats>,

    /// Function currently being processed.
    current_function: RefCell<Option<String>>,
}

impl<'arena> CheckpointSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(PassStats::default()),
            current_function: RefCell::new(None),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Allocate a slice in the session arena.
    pub fn alloc_slice<T>(&self, slice: &[T]) -> &'arena [T]
    where
        T: Clone,
    {
        self.arena.alloc_slice_clone(slice)
    }

    pub fn set_current_function(&self, name: &str) {
        *self.current_function.borrow_mut() = Some(name.to_string());
    }

    pub fn current_function(&self) -> Option<String> {
        self.current_function.borrow().clone()
    }

    pub fn clear_function_state(&self) {
        *self.current_function.borrow_mut() = None;
    }

    pub fn record_function_unzipped(&self) {
        self.stats.borrow_mut().functions_unzipped += 1;
    }

    /// Record the partition produced for one function.
    pub fn record_function_processed(&self, stored: usize, recomputed: usize, inverted: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_processed += 1;
        stats.values_stored += stored;
        stats.values_recomputed += recomputed;
        stats.values_inverted += inverted;
    }

    pub fn record_slot_created(&self) {
        self.stats.borrow_mut().slots_created += 1;
    }

    pub fn record_pending_resolved(&self, count: usize) {
        self.stats.borrow_mut().pending_uses_resolved += count;
    }

    pub fn record_array_upgrades(&self, count: usize) {
        self.stats.borrow_mut().array_upgrades += count;
    }

    pub fn stats(&self) -> PassStats {
        self.stats.borrow().clone()
    }
}

/// Checkpointing statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassStats {
    pub functions_unzipped: usize,
    pub functions_processed: usize,
    pub values_stored: usize,
    pub values_recomputed: usize,
    pub values_inverted: usize,
    /// Scalar checkpoint slots allocated in the entry block.
    pub slots_created: usize,
    pub pending_uses_resolved: usize,
    /// Values moved to per-iteration array storage.
    pub array_upgrades: usize,
}

impl fmt::Display for PassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Checkpoint Statistics:")?;
        writeln!(f, "  Functions unzipped: {}", self.functions_unzipped)?;
        writeln!(f, "  Functions processed: {}", self.functions_processed)?;
        writeln!(f, "  Stored: {}", self.values_stored)?;
        writeln!(f, "  Recomputed: {}", self.values_recomputed)?;
        writeln!(f, "  Inverted: {}", self.values_inverted)?;
        writeln!(f, "  Slots created: {}", self.slots_created)?;
        writeln!(f, "  Pending uses resolved: {}", self.pending_uses_resolved)?;
        write!(f, "  Array upgrades: {}", self.array_upgrades)
    }
}
