// This module repairs checkpoint decisions for values defined inside loop bodies. A scalar
// slot only holds the value of the last iteration, and a recomputation in the differential
// loop only reproduces the right value when everything it reads can be reproduced for the
// iteration the differential loop is currently processing. Indexed blocks are described by
// their loop counters: the primal counter, the matching differential counter when the
// reversed loop has one, and the iteration bound. The fixup first rewires differential
// reads of primal counters to their differential counterparts. It then walks the recompute
// and invert members of indexed blocks in program order and upgrades to Store every member
// that is stateful or reads something that is not available per iteration. Finally every
// store member of an indexed block trades its scalar slot for an array indexed by the
// counters: written at the end of its primal block and read on the differential side at
// the current differential iteration. Differential copies made obsolete by these rewrites
// are removed. Values outside indexed blocks are left alone.

//! Per-iteration availability fixup for values defined in loop bodies.

use super::hoist::HoistedPrimalsInfo;
use crate::core::error::{CheckpointError, CheckpointResult};
use crate::core::session::CheckpointSession;
use crate::ir::{BlockId, Function, InsertPoint, InstId, Opcode};
use hashbrown::{HashMap, HashSet};
use log::debug;

/// Loop counter tracking for one nesting level of an indexed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTrackingInfo {
    /// Iteration index in the primal loop.
    pub primal_counter: InstId,
    /// Matching index in the differential loop, if it has one.
    pub diff_counter: Option<InstId>,
    /// Upper bound on the number of iterations.
    pub max_iters: u32,
}

impl IndexTrackingInfo {
    pub fn new(primal_counter: InstId, diff_counter: Option<InstId>, max_iters: u32) -> Self {
        Self {
            primal_counter,
            diff_counter,
            max_iters,
        }
    }
}

/// Indexed block → counters, outermost loop first.
pub type IndexedBlockInfo = HashMap<BlockId, Vec<IndexTrackingInfo>>;

/// Make every hoisted value defined in an indexed block available per iteration.
pub fn ensure_primal_availability(
    hoist: &HoistedPrimalsInfo,
    func: &mut Function,
    indexed: &IndexedBlockInfo,
    session: &CheckpointSession<'_>,
) -> CheckpointResult<HoistedPrimalsInfo> {
    let mut fixup = AvailabilityFixup {
        func,
        indexed,
        hoist: hoist.clone(),
        counters: HashMap::new(),
    };
    for levels in indexed.values() {
        for level in levels {
            fixup.counters.insert(level.primal_counter, level.diff_counter);
        }
    }

    fixup.rewire_counters();
    let upgraded = fixup.upgrade_unavailable();
    let arrays = fixup.convert_stores_to_arrays()?;

    debug!(
        "{}: {} value(s) upgraded to store, {} array(s) created",
        fixup.func.name(),
        upgraded,
        arrays
    );
    session.record_array_upgrades(arrays);
    debug_assert!(fixup.hoist.is_disjoint());
    Ok(fixup.hoist)
}

struct AvailabilityFixup<'a> {
    func: &'a mut Function,
    indexed: &'a IndexedBlockInfo,
    hoist: HoistedPrimalsInfo,
    /// Primal counter → differential counter.
    counters: HashMap<InstId, Option<InstId>>,
}

impl AvailabilityFixup<'_> {
    fn levels_of(&self, value: InstId) -> Option<&[IndexTrackingInfo]> {
        let block = self.func.block_of(value)?;
        self.indexed
            .get(&block)
            .map(Vec::as_slice)
            .filter(|levels| !levels.is_empty())
    }

    fn in_indexed_block(&self, value: InstId) -> bool {
        self.levels_of(value).is_some()
    }

    fn in_program_order(&self, set: Vec<InstId>) -> Vec<InstId> {
        let mut list: Vec<InstId> = set.into_iter().filter(|&v| self.in_indexed_block(v)).collect();
        list.sort_by_key(|&v| self.func.program_order_key(v));
        list
    }

    /// Differential reads of a primal counter use the differential counter instead.
    fn rewire_counters(&mut self) {
        let mut counters: Vec<(InstId, InstId)> = self
            .counters
            .iter()
            .filter_map(|(&primal, &diff)| diff.map(|d| (primal, d)))
            .collect();
        counters.sort();

        for (primal, diff) in counters {
            if !self.hoist.contains(primal) {
                continue;
            }
            if let Some(copy) = self.hoist.materialized.get(&primal).copied() {
                self.func.replace_uses_with(copy, diff);
                self.remove_dead_copies(copy);
            }
            remove_scalar_slot(self.func, primal);
            self.hoist.store_set.remove(&primal);
            self.hoist.recompute_set.remove(&primal);
            self.hoist.invert_set.remove(&primal);
            self.hoist.invert_info_map.remove(&primal);
            self.hoist.materialized.insert(primal, diff);
            debug!("differential reads of counter {} use {}", primal, diff);
        }
    }

    fn is_available(&self, input: InstId, available: &HashSet<InstId>) -> bool {
        if !self.in_indexed_block(input) {
            return true;
        }
        if let Some(diff) = self.counters.get(&input) {
            return diff.is_some();
        }
        self.hoist.store_set.contains(&input) || available.contains(&input)
    }

    /// Upgrade recompute and invert members that cannot be reproduced per iteration.
    fn upgrade_unavailable(&mut self) -> usize {
        let members = self.in_program_order(
            self.hoist
                .recompute_set
                .iter()
                .chain(self.hoist.invert_set.iter())
                .copied()
                .collect(),
        );

        let mut available = HashSet::new();
        let mut upgraded = 0;
        for value in members {
            let (stateful, inputs) = if self.hoist.recompute_set.contains(&value) {
                (
                    !self.func.opcode(value).is_pure(),
                    self.func.operands(value).to_vec(),
                )
            } else {
                let required = self
                    .hoist
                    .invert_info_map
                    .get(&value)
                    .map(|info| info.required_operands.clone())
                    .unwrap_or_default();
                (false, required)
            };

            let ok = !stateful && inputs.iter().all(|&i| self.is_available(i, &available));
            if ok {
                available.insert(value);
            } else {
                debug!("{} is not available per iteration; storing", value);
                self.hoist.make_store(value);
                upgraded += 1;
            }
        }
        upgraded
    }

    /// Replace the scalar storage of every indexed store member with an array.
    fn convert_stores_to_arrays(&mut self) -> CheckpointResult<usize> {
        let stores = self.in_program_order(self.hoist.store_set.iter().copied().collect());
        let entry_term = self
            .func
            .entry_block()
            .and_then(|entry| self.func.terminator(entry))
            .ok_or_else(|| CheckpointError::Precondition {
                function: self.func.name().to_string(),
                reason: "entry block has no terminator".to_string(),
            })?;

        let mut converted = 0;
        for value in stores {
            let (Some(block), Some(levels)) = (self.func.block_of(value), self.levels_of(value).map(<[_]>::to_vec)) else {
                continue;
            };

            let extent = levels
                .iter()
                .fold(1u32, |acc, level| acc.saturating_mul(level.max_iters.max(1)));
            let array = self.func.create_array(InsertPoint::Before(entry_term), extent);
            if let Some(name) = self.func.name_hint(value).map(|n| format!("{}_array", n)) {
                self.func.set_name_hint(array, name);
            }

            // Write at the end of the defining block, where every primal counter is defined.
            let write_at = self
                .func
                .terminator(block)
                .map(InsertPoint::Before)
                .unwrap_or(InsertPoint::End(block));
            let primal_index: Vec<(InstId, u32)> =
                levels.iter().map(|l| (l.primal_counter, l.max_iters)).collect();
            let index = emit_index(self.func, write_at, &primal_index);
            let addr = self
                .func
                .create_inst(write_at, Opcode::ElemAddr, vec![array, index], Vec::new());
            self.func
                .create_inst(write_at, Opcode::Store, vec![addr, value], Vec::new());

            if let Some(copy) = self.hoist.materialized.get(&value).copied() {
                let diff_index = levels
                    .iter()
                    .map(|l| {
                        l.diff_counter
                            .map(|d| (d, l.max_iters))
                            .ok_or(CheckpointError::MissingDiffCounter { block })
                    })
                    .collect::<CheckpointResult<Vec<_>>>()?;

                let read_at = InsertPoint::Before(copy);
                let index = emit_index(self.func, read_at, &diff_index);
                let addr = self
                    .func
                    .create_inst(read_at, Opcode::ElemAddr, vec![array, index], Vec::new());
                let load = self.func.create_inst(read_at, Opcode::Load, vec![addr], Vec::new());
                if let Some(name) = self.func.name_hint(value).map(str::to_string) {
                    self.func.set_name_hint(load, name);
                }
                self.func.replace_uses_with(copy, load);
                self.remove_dead_copies(copy);
                self.hoist.materialized.insert(value, load);
            }

            remove_scalar_slot(self.func, value);
            converted += 1;
        }
        Ok(converted)
    }

    /// Remove `copy` and every differential copy that only it used.
    fn remove_dead_copies(&mut self, copy: InstId) {
        let diff_counters: HashSet<InstId> = self.counters.values().flatten().copied().collect();
        let mut originals: HashMap<InstId, InstId> = self
            .hoist
            .materialized
            .iter()
            .filter(|(_, copy)| !diff_counters.contains(*copy))
            .map(|(&original, &copy)| (copy, original))
            .collect();

        let mut worklist = vec![copy];
        while let Some(inst) = worklist.pop() {
            let Some(original) = originals.remove(&inst) else {
                continue;
            };
            if !self.func.is_live(inst) || self.func.has_uses(inst) || original == inst {
                continue;
            }
            let operands = self.func.operands(inst).to_vec();
            self.func.remove_inst(inst);
            self.hoist.materialized.remove(&original);
            if self.hoist.recompute_set.remove(&original) {
                debug!("dropping dead recompute of {}", original);
            }
            worklist.extend(operands);
        }
    }
}

/// Linearize nested counters (outermost first) into one element index.
fn emit_index(func: &mut Function, at: InsertPoint, counters: &[(InstId, u32)]) -> InstId {
    let Some((&(first, _), rest)) = counters.split_first() else {
        return func.create_const(at, 0.0);
    };
    let mut index = first;
    for &(counter, bound) in rest {
        let scale = func.create_const(at, f64::from(bound));
        let scaled = func.create_inst(at, Opcode::Mul, vec![index, scale], Vec::new());
        index = func.create_inst(at, Opcode::Add, vec![scaled, counter], Vec::new());
    }
    index
}

/// Drop the scalar slot `value` was stored to, if any.
fn remove_scalar_slot(func: &mut Function, value: InstId) {
    let slot = func
        .uses(value)
        .iter()
        .filter(|u| u.slot == 1 && func.opcode(u.user) == Opcode::Store)
        .map(|u| func.operand(u.user, 0))
        .find(|&ptr| func.opcode(ptr) == Opcode::Var);
    let Some(slot) = slot else {
        return;
    };

    let users: Vec<InstId> = func.uses(slot).iter().map(|u| u.user).collect();
    for user in users {
        if func.opcode(user) == Opcode::Store && func.operand(user, 1) == value {
            func.remove_inst(user);
        }
    }
    if !func.has_uses(slot) {
        func.remove_inst(slot);
    }
}
