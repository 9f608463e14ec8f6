//! adhoist - checkpointing for reverse-mode automatic differentiation.
//!
//! Given a function whose body interleaves primal instructions with the
//! differential (adjoint) instructions that consume them, adhoist splits the
//! body into a primal block and a differential block and decides, for every
//! primal value the differential block reads, whether to store it, recompute
//! it or reconstruct it by inverting a later computation.
//!
//! # Primary Usage
//!
//! ```ignore
//! use adhoist::autodiff::checkpoint_function;
//! use adhoist::core::{CheckpointConfig, CheckpointSession};
//! use adhoist::ir::Function;
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = CheckpointSession::new(&arena);
//!
//! let mut func = Function::parse(text)?;
//! let outcome = checkpoint_function(&mut func, &session, &CheckpointConfig::default())?;
//! println!("{}", outcome.hoisted.describe(&func));
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Instruction graph, text format and reference evaluator
//! - [`core`] - Shared infrastructure (session, dominators, config, errors)
//! - [`autodiff`] - Unzip, classification, application and availability passes

pub mod autodiff;
pub mod core;
pub mod ir;

pub use autodiff::{
    // Passes
    apply_checkpoint_set, checkpoint_function, checkpoint_split_function, ensure_primal_availability,
    CheckpointClassifier, CheckpointPolicy, DefaultCheckpointPolicy, DiffUnzipPass,
    // Decisions
    BlockSplitInfo, CheckpointOutcome, CheckpointSetInfo, HoistMode, HoistResult, HoistedPrimalsInfo,
    IndexTrackingInfo, IndexedBlockInfo, InversionInfo,
    // Cloning
    CloneEnv, OutOfOrderCloneContext,
};
pub use core::{CheckpointConfig, CheckpointError, CheckpointResult, CheckpointSession, CostModel, PassStats};
pub use ir::{BlockId, Function, InstId, Opcode, Use};
