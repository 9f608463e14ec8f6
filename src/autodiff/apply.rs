// This module applies checkpoint decisions to the function. Every differential-side use of a
// primal value starts out pending in an out-of-order clone context; the applier then walks
// those uses in program order and materializes the value each one waits for right before
// the user. Stored values get a slot in the entry block, written immediately after the
// primal computation and loaded on the differential side. Recomputed values are cloned
// into the differential block; the clone's own operands become pending and are
// materialized recursively in front of it, so chains of recomputation come out in
// dependency order even though they are discovered consumer first. Inverted values are
// rebuilt from the later instruction that consumed them, using the inverse opcode and the
// required operands recorded in the inversion info. Registering each materialized value
// resolves every use still pending on it, and any use left pending at the end is an error.

//! Checkpoint application: slots, recompute clones and inverse chains.

use super::clone::OutOfOrderCloneContext;
use super::hoist::{BlockSplitInfo, CheckpointSetInfo, HoistMode, HoistedPrimalsInfo};
use crate::core::error::{CheckpointError, CheckpointResult};
use crate::core::session::CheckpointSession;
use crate::ir::{Function, InsertPoint, InstId, Opcode, Use};
use hashbrown::{HashMap, HashSet};
use log::{debug, trace};

/// Opcode that recovers operand `slot` of `op` from its result.
pub fn inverse_opcode(op: Opcode, slot: usize) -> Option<Opcode> {
    use Opcode::*;
    let inverse = match (op, slot) {
        (Add, 0 | 1) => Sub,
        (Sub, 0) => Add,
        (Sub, 1) => Sub,
        (Mul, 0 | 1) => Div,
        (Div, 0) => Mul,
        (Div, 1) => Div,
        (Neg, 0) => Neg,
        (Exp, 0) => Log,
        (Log, 0) => Exp,
        _ => return None,
    };
    Some(inverse)
}

/// `a - z` and `a / z` put the other operand first.
fn other_operand_first(op: Opcode, slot: usize) -> bool {
    matches!((op, slot), (Opcode::Sub, 1) | (Opcode::Div, 1))
}

/// Materialize `info` in `func`, rewriting every use in `pending_uses`.
pub fn apply_checkpoint_set(
    info: &CheckpointSetInfo,
    func: &mut Function,
    split: &BlockSplitInfo,
    pending_uses: HashSet<Use>,
    session: &CheckpointSession<'_>,
) -> CheckpointResult<HoistedPrimalsInfo> {
    let mut applier = Applier {
        func,
        split,
        info,
        ctx: OutOfOrderCloneContext::new(),
        slots: HashMap::new(),
        inverting: HashSet::new(),
        materialized: HashMap::new(),
    };

    let seeded = pending_uses.len();
    let mut edges: Vec<Use> = pending_uses.into_iter().collect();
    edges.sort();
    for edge in edges {
        applier.ctx.add_or_replace_pending_use(applier.func, edge);
    }

    let mut stores: Vec<InstId> = info.store_set.iter().copied().collect();
    stores.sort();
    for value in stores {
        applier.create_slot(value)?;
        session.record_slot_created();
    }

    let mut waiting = applier.ctx.pending_uses();
    waiting.sort_by_key(|(edge, _)| (applier.func.program_order_key(edge.user), edge.slot));
    for (edge, target) in waiting {
        if applier.ctx.is_pending_on(target, edge) {
            applier.materialize(target, InsertPoint::Before(edge.user), edge)?;
        }
    }

    let remaining = applier.ctx.pending_count();
    if remaining > 0 {
        return Err(CheckpointError::UnresolvedPendingUses { count: remaining });
    }
    session.record_pending_resolved(seeded);

    let mut hoisted = HoistedPrimalsInfo::from_checkpoint_set(info);
    hoisted.materialized = applier.materialized;
    debug_assert!(hoisted.is_disjoint());
    Ok(hoisted)
}

struct Applier<'a> {
    func: &'a mut Function,
    split: &'a BlockSplitInfo,
    info: &'a CheckpointSetInfo,
    ctx: OutOfOrderCloneContext,
    /// Stored value → its slot.
    slots: HashMap<InstId, InstId>,
    /// Values whose inverse is being built.
    inverting: HashSet<InstId>,
    materialized: HashMap<InstId, InstId>,
}

impl Applier<'_> {
    fn is_primal(&self, value: InstId) -> bool {
        self.func
            .block_of(value)
            .map_or(false, |b| self.split.is_primal_block(b))
    }

    /// Allocate a slot in the entry block and write `value` to it right after its definition.
    fn create_slot(&mut self, value: InstId) -> CheckpointResult<()> {
        let entry_term = self
            .func
            .entry_block()
            .and_then(|entry| self.func.terminator(entry))
            .ok_or_else(|| CheckpointError::Precondition {
                function: self.func.name().to_string(),
                reason: "entry block has no terminator".to_string(),
            })?;

        let slot = self
            .func
            .create_inst(InsertPoint::Before(entry_term), Opcode::Var, Vec::new(), Vec::new());
        if let Some(name) = self.func.name_hint(value).map(|n| format!("{}_slot", n)) {
            self.func.set_name_hint(slot, name);
        }
        self.func
            .create_inst(InsertPoint::After(value), Opcode::Store, vec![slot, value], Vec::new());
        self.slots.insert(value, slot);
        trace!("slot {} for {}", slot, value);
        Ok(())
    }

    fn copy_name(&mut self, from: InstId, to: InstId) {
        if let Some(name) = self.func.name_hint(from).map(str::to_string) {
            self.func.set_name_hint(to, name);
        }
    }

    /// Fail if `user` reads a value placed after it in the same block.
    fn check_defined_before(&self, user: InstId) -> CheckpointResult<()> {
        let Some(block) = self.func.block_of(user) else {
            return Ok(());
        };
        let position = self.func.position(user);
        for &operand in self.func.operands(user) {
            if self.func.block_of(operand) == Some(block) && self.func.position(operand) > position {
                return Err(CheckpointError::UseBeforeDefinition { user, operand });
            }
        }
        Ok(())
    }

    /// Make `value` available at `at` and register it so pending uses resolve.
    fn materialize(&mut self, value: InstId, at: InsertPoint, edge: Use) -> CheckpointResult<InstId> {
        if let Some(existing) = self.ctx.clone_env.get(value) {
            return Ok(existing);
        }
        if self.inverting.contains(&value) {
            return Err(CheckpointError::UnsupportedInversion {
                inst: value,
                reason: "inverse computation depends on its own result".to_string(),
            });
        }
        if !self.is_primal(value) {
            self.ctx.register_clone(self.func, value, value);
            return Ok(value);
        }

        let copy = match self.info.mode_of(value) {
            Some(HoistMode::Store) => {
                let slot = self.slots[&value];
                let load = self.func.create_inst(at, Opcode::Load, vec![slot], Vec::new());
                self.copy_name(value, load);
                self.ctx.register_clone(self.func, value, load);
                load
            }
            Some(HoistMode::Recompute) => {
                let clone = self.ctx.clone_inst_out_of_order(self.func, at, value);
                for (slot, operand) in self.func.operands(value).to_vec().into_iter().enumerate() {
                    let operand_edge = Use::new(clone, slot as u32);
                    if self.ctx.is_pending_on(operand, operand_edge) {
                        self.materialize(operand, InsertPoint::Before(clone), operand_edge)?;
                    }
                }
                self.check_defined_before(clone)?;
                clone
            }
            Some(HoistMode::Invert) => self.invert(value, at)?,
            None => {
                return Err(CheckpointError::ClassificationGap {
                    user: edge.user,
                    slot: edge.slot,
                    target: value,
                })
            }
        };

        debug!("materialized {} as {}", value, copy);
        self.materialized.insert(value, copy);
        Ok(copy)
    }

    fn invert(&mut self, value: InstId, at: InsertPoint) -> CheckpointResult<InstId> {
        let unsupported = |inst: InstId, reason: String| CheckpointError::UnsupportedInversion { inst, reason };
        let set = self.info;
        let info = set
            .inv_info_map
            .get(&value)
            .ok_or_else(|| unsupported(value, "no inversion info".to_string()))?;

        let source = info.inst_to_invert;
        if !self.func.is_live(source) {
            return Err(unsupported(source, "inverted instruction was removed".to_string()));
        }
        let op = self.func.opcode(source);
        let operands = self.func.operands(source).to_vec();
        let slot = operands
            .iter()
            .position(|&o| o == value)
            .ok_or_else(|| unsupported(source, format!("does not read {}", value)))?;
        let inverse = inverse_opcode(op, slot)
            .ok_or_else(|| unsupported(source, format!("no inverse for operand {} of {}", slot, op.info().name)))?;

        let other = (operands.len() == 2).then(|| operands[1 - slot]);
        let covered = info.required_operands.contains(&source)
            && other.map_or(true, |o| info.required_operands.contains(&o));
        if !covered {
            return Err(unsupported(
                source,
                "required operands do not cover the inverse computation".to_string(),
            ));
        }

        self.inverting.insert(value);
        let source_edge = Use::new(source, slot as u32);
        let result = self.materialize(source, at, source_edge)?;
        let inverse_operands = match other {
            Some(other) => {
                let other = self.materialize(other, at, Use::new(source, (1 - slot) as u32))?;
                if other_operand_first(op, slot) {
                    vec![other, result]
                } else {
                    vec![result, other]
                }
            }
            None => vec![result],
        };
        self.inverting.remove(&value);

        let inv = self.func.create_inst(at, inverse, inverse_operands, Vec::new());
        self.check_defined_before(inv)?;
        self.copy_name(value, inv);
        self.ctx.register_clone(self.func, value, inv);
        Ok(inv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_opcodes() {
        assert_eq!(inverse_opcode(Opcode::Add, 1), Some(Opcode::Sub));
        assert_eq!(inverse_opcode(Opcode::Sub, 0), Some(Opcode::Add));
        assert_eq!(inverse_opcode(Opcode::Div, 1), Some(Opcode::Div));
        assert_eq!(inverse_opcode(Opcode::Exp, 0), Some(Opcode::Log));
        assert_eq!(inverse_opcode(Opcode::Sin, 0), None);
        assert_eq!(inverse_opcode(Opcode::Neg, 1), None);
        assert!(other_operand_first(Opcode::Sub, 1));
        assert!(!other_operand_first(Opcode::Mul, 1));
    }
}
