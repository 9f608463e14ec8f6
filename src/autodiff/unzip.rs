// This module implements the unzip pass that separates a fused function body into its
// primal and differential halves. Upstream lowering produces functions with a parameter
// block followed by a single body block in which primal and adjoint instructions are
// interleaved in dependency order. The pass scans that body once, left to right, and
// clones every instruction into one of two new blocks: a primal block, or a differential
// block tagged as adjoint-only. Differential instructions and the terminator go to the
// differential block, everything else to the primal block. Each original is replaced by
// its clone and deleted immediately, so later instructions in the scan already see the
// clones of their operands. The primal block ends with a branch to the differential block,
// which keeps the function's observable behaviour unchanged, and the parameter block is
// cloned last with its branch retargeted to the primal block through the clone
// environment. The new blocks replace the old ones in the function layout.

//! Block splitter separating primal and differential instructions.

use super::clone::{clone_inst, CloneEnv};
use super::hoist::BlockSplitInfo;
use crate::core::error::{CheckpointError, CheckpointResult};
use crate::core::session::CheckpointSession;
use crate::ir::{BlockId, Function, InsertPoint, Opcode};
use log::debug;

/// Splits the body of a two-block function into primal and differential blocks.
pub struct DiffUnzipPass<'s, 'arena> {
    session: &'s CheckpointSession<'arena>,
    clone_env: CloneEnv,
}

impl<'s, 'arena> DiffUnzipPass<'s, 'arena> {
    pub fn new(session: &'s CheckpointSession<'arena>) -> Self {
        Self {
            session,
            clone_env: CloneEnv::new(),
        }
    }

    /// Old→new mapping recorded by the last run.
    pub fn clone_env(&self) -> &CloneEnv {
        &self.clone_env
    }

    /// Unzip `func` in place and return the primal→differential block pairing.
    pub fn unzip_diff_insts(&mut self, func: &mut Function) -> CheckpointResult<BlockSplitInfo> {
        let (param_block, main_block) = check_two_block_form(func)?;
        self.session.set_current_function(func.name());
        self.clone_env = CloneEnv::new();

        let primal_name = func.block_name(main_block).unwrap_or("primal").to_string();
        let diff_name = format!("{}_diff", primal_name);
        let primal_block = func.add_block(Some(&primal_name));
        let diff_block = func.add_block(Some(&diff_name));
        func.mark_block_differential(diff_block);

        self.split_block(func, main_block, primal_block, diff_block);

        self.clone_env.insert_block(main_block, primal_block);
        let param_name = func.block_name(param_block).map(str::to_string);
        let new_param_block = func.add_block(param_name.as_deref());
        self.move_block(func, param_block, new_param_block);

        func.set_layout(vec![new_param_block, primal_block, diff_block]);

        debug!(
            "unzipped {}: {} primal, {} differential instruction(s)",
            func.name(),
            func.block_insts(primal_block).len(),
            func.block_insts(diff_block).len()
        );
        self.session.record_function_unzipped();

        let mut split = BlockSplitInfo::new();
        split.insert(primal_block, diff_block);
        Ok(split)
    }

    fn split_block(&mut self, func: &mut Function, main_block: BlockId, primal_block: BlockId, diff_block: BlockId) {
        for inst in func.block_insts(main_block).to_vec() {
            let to_diff = func.is_differential(inst) || func.opcode(inst).info().is_terminator;
            let target = if to_diff { diff_block } else { primal_block };
            let cloned = clone_inst(&mut self.clone_env, func, InsertPoint::End(target), inst);
            func.replace_uses_with(inst, cloned);
            func.remove_inst(inst);
        }

        debug_assert!(func.block_insts(main_block).is_empty());

        func.create_inst(InsertPoint::End(primal_block), Opcode::Br, Vec::new(), vec![diff_block]);
    }

    fn move_block(&mut self, func: &mut Function, from: BlockId, to: BlockId) {
        for inst in func.block_insts(from).to_vec() {
            let cloned = clone_inst(&mut self.clone_env, func, InsertPoint::End(to), inst);
            func.replace_uses_with(inst, cloned);
            func.remove_inst(inst);
        }
    }
}

/// Check that `func` is a parameter block branching to a single body block.
fn check_two_block_form(func: &Function) -> CheckpointResult<(BlockId, BlockId)> {
    let precondition = |reason: String| CheckpointError::Precondition {
        function: func.name().to_string(),
        reason,
    };

    let &[param_block, main_block] = func.layout() else {
        return Err(precondition(format!(
            "expected a parameter block and one body block, found {} block(s)",
            func.layout().len()
        )));
    };
    if func.successors(param_block) != [main_block] {
        return Err(precondition("parameter block does not branch to the body block".to_string()));
    }
    if func.terminator(main_block).is_none() {
        return Err(precondition("body block has no terminator".to_string()));
    }
    Ok((param_block, main_block))
}
