//! Reverse-mode checkpointing passes.
//!
//! The passes run in a fixed order on one function at a time:
//!
//! 1. [`unzip::DiffUnzipPass`] splits the fused body into a primal block and a
//!    differential block.
//! 2. [`policy::CheckpointClassifier`] decides, for every primal value the
//!    differential block reads, whether to store, recompute or invert it, and
//!    [`apply::apply_checkpoint_set`] rewrites the function accordingly.
//! 3. [`availability::ensure_primal_availability`] moves values defined in
//!    loop bodies to per-iteration storage where needed.
//!
//! [`checkpoint_function`] runs the whole pipeline with the default policy.

pub mod apply;
pub mod availability;
pub mod clone;
pub mod hoist;
pub mod policy;
pub mod unzip;

pub use apply::{apply_checkpoint_set, inverse_opcode};
pub use availability::{ensure_primal_availability, IndexTrackingInfo, IndexedBlockInfo};
pub use clone::{clone_inst, CloneEnv, OutOfOrderCloneContext};
pub use hoist::{BlockSplitInfo, CheckpointSetInfo, HoistMode, HoistResult, HoistedPrimalsInfo, InversionInfo};
pub use policy::{CheckpointClassifier, CheckpointPolicy, DefaultCheckpointPolicy};
pub use unzip::DiffUnzipPass;

use crate::core::config::CheckpointConfig;
use crate::core::error::CheckpointResult;
use crate::core::session::CheckpointSession;
use crate::ir::Function;

/// Result of running the pipeline on one function.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointOutcome {
    pub split: BlockSplitInfo,
    pub hoisted: HoistedPrimalsInfo,
}

/// Unzip `func` and checkpoint it with the default policy.
pub fn checkpoint_function(
    func: &mut Function,
    session: &CheckpointSession<'_>,
    config: &CheckpointConfig,
) -> CheckpointResult<CheckpointOutcome> {
    let split = DiffUnzipPass::new(session).unzip_diff_insts(func)?;
    let mut classifier = CheckpointClassifier::new(DefaultCheckpointPolicy::new(session, config.cost_model.clone()));
    let hoisted = classifier.process_func(func, &split, session)?;
    session.clear_function_state();
    Ok(CheckpointOutcome { split, hoisted })
}

/// Checkpoint an already split function and fix up its indexed blocks.
pub fn checkpoint_split_function<P: CheckpointPolicy>(
    func: &mut Function,
    split: &BlockSplitInfo,
    classifier: &mut CheckpointClassifier<P>,
    indexed: &IndexedBlockInfo,
    session: &CheckpointSession<'_>,
) -> CheckpointResult<HoistedPrimalsInfo> {
    let hoisted = classifier.process_func(func, split, session)?;
    let hoisted = if indexed.is_empty() {
        hoisted
    } else {
        ensure_primal_availability(&hoisted, func, indexed, session)?
    };
    session.clear_function_state();
    Ok(hoisted)
}
