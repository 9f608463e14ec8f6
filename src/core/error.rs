// This module defines error types for the checkpointing passes using the thiserror crate.
// CheckpointError is the single error enum for every fatal condition a pass can hit:
// a function that is not in the two-block form the unzip pass requires, a cross-boundary
// use no classification rule covered, an inversion requested for an instruction the
// applier cannot invert, uses still pending after all clones were registered, a
// materialized copy that would read a value placed after it, indexed
// regions without a differential counter, and failures of the reference evaluator.
// Each variant carries the handles involved so the offending instruction can be found
// in a printed function. CheckpointResult<T> is the Result alias used throughout.

//! Error types for the checkpointing passes.

use crate::ir::{BlockId, InstId};
use thiserror::Error;

/// Main error type for the unzip, classification and application passes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckpointError {
    #[error("Precondition violated in function {function}: {reason}")]
    Precondition {
        function: String,
        reason: String,
    },

    #[error("No checkpoint decision for operand {slot} of {user} (value {target})")]
    ClassificationGap {
        user: InstId,
        slot: u32,
        target: InstId,
    },

    #[error("Cannot invert {inst}: {reason}")]
    UnsupportedInversion {
        inst: InstId,
        reason: String,
    },

    #[error("{count} use(s) still reference un-cloned originals")]
    UnresolvedPendingUses {
        count: usize,
    },

    #[error("{user} reads {operand} before it is defined")]
    UseBeforeDefinition {
        user: InstId,
        operand: InstId,
    },

    #[error("Indexed block {block} has no differential counter")]
    MissingDiffCounter {
        block: BlockId,
    },

    #[error("Evaluation failed: {reason}")]
    Evaluation {
        reason: String,
    },
}

/// Result type alias for checkpointing operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;
