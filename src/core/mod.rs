// This module serves as the hub for the shared infrastructure of the checkpointing passes:
// session management (arena allocation for analysis results and pass statistics), the
// dominator tree the default policy consults, the cost model and run configuration, and
// the error enum every pass returns. None of these components know about the autodiff
// passes themselves; they only depend on the instruction graph in `ir`.

//! Core infrastructure shared by the checkpointing passes.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena allocation using `bumpalo`
//! - Pass statistics
//!
//! ## Dominance (`dominators`)
//! - Reverse post-order numbering and immediate dominators
//! - Block and instruction dominance queries
//!
//! ## Configuration (`config`)
//! - Cost model for the default checkpoint policy
//!
//! ## Errors (`error`)
//! - `CheckpointError` and the `CheckpointResult` alias

pub mod config;
pub mod dominators;
pub mod error;
pub mod session;
pub mod test_utils;

pub use config::{CheckpointConfig, CostModel};
pub use dominators::DominatorTree;
pub use error::{CheckpointError, CheckpointResult};
pub use session::{CheckpointSession, PassStats};
