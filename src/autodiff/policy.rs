// This module implements checkpoint classification. The CheckpointPolicy trait is the seam
// for pluggable policies: prepare_policy computes whole-function state once, and
// classify_use returns the verdict for one use of a primal value by the differential
// phase. CheckpointClassifier wraps a policy with an override table keyed by use, which is
// consulted first, and drives process_func. That worklist starts from every cross-boundary
// use (a differential-block user reading a primal-block value) and classifies each value
// the first time one of its uses is seen. A Recompute decision pulls in the operand uses of
// the recomputed instruction, since those operands must in turn be available to the clone,
// and an Invert decision pulls in the values the inverse computation reads. The raw
// decisions are then handed to the applier. DefaultCheckpointPolicy recomputes pure values
// whose operand closure is cheap under the cost model and dominates the use, inverts values
// with a registered inversion when the inverse is cheaper than a store, and stores
// everything else.

//! Checkpoint classification: policy trait, override table and default policy.

use super::apply::{apply_checkpoint_set, inverse_opcode};
use super::hoist::{BlockSplitInfo, CheckpointSetInfo, HoistMode, HoistResult, HoistedPrimalsInfo, InversionInfo};
use crate::core::config::CostModel;
use crate::core::dominators::DominatorTree;
use crate::core::error::{CheckpointError, CheckpointResult};
use crate::core::session::CheckpointSession;
use crate::ir::{Function, InstId, Opcode, Use};
use hashbrown::{HashMap, HashSet};
use log::{debug, trace};
use std::collections::VecDeque;

/// Decides how the differential phase obtains a primal value.
pub trait CheckpointPolicy {
    /// Precompute whole-function state before any use is classified.
    fn prepare_policy(&mut self, func: &Function) -> CheckpointResult<()>;

    /// Verdict for `use_`, or `None` if no rule applies.
    fn classify_use(&mut self, func: &Function, use_: Use) -> Option<HoistResult>;
}

/// A policy plus per-use overrides, and the driver that classifies a whole function.
pub struct CheckpointClassifier<P: CheckpointPolicy> {
    policy: P,
    overrides: HashMap<Use, HoistResult>,
}

impl<P: CheckpointPolicy> CheckpointClassifier<P> {
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            overrides: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Force the verdict for one use.
    pub fn add_override(&mut self, use_: Use, result: HoistResult) {
        self.overrides.insert(use_, result);
    }

    pub fn prepare(&mut self, func: &Function) -> CheckpointResult<()> {
        self.policy.prepare_policy(func)
    }

    /// Classify one use; overrides are consulted before the policy.
    pub fn classify(&mut self, func: &Function, use_: Use) -> CheckpointResult<HoistResult> {
        if let Some(result) = self.overrides.get(&use_) {
            trace!("override for operand {} of {}: {}", use_.slot, use_.user, result.mode());
            return Ok(result.clone());
        }
        self.policy
            .classify_use(func, use_)
            .ok_or_else(|| CheckpointError::ClassificationGap {
                user: use_.user,
                slot: use_.slot,
                target: use_.get(func),
            })
    }

    /// Classify every primal value the differential blocks consume and apply the decisions.
    pub fn process_func(
        &mut self,
        func: &mut Function,
        split: &BlockSplitInfo,
        session: &CheckpointSession<'_>,
    ) -> CheckpointResult<HoistedPrimalsInfo> {
        session.set_current_function(func.name());
        self.prepare(func)?;

        let (set, pending_uses) = self.collect_checkpoint_set(func, split)?;
        debug!(
            "{}: {} stored, {} recomputed, {} inverted",
            func.name(),
            set.store_set.len(),
            set.recompute_set.len(),
            set.invert_set.len()
        );

        let hoisted = apply_checkpoint_set(&set, func, split, pending_uses, session)?;
        session.record_function_processed(
            hoisted.store_set.len(),
            hoisted.recompute_set.len(),
            hoisted.invert_set.len(),
        );
        Ok(hoisted)
    }

    /// Run the classification worklist without touching the function.
    ///
    /// Returns the decisions and the differential-side uses that must be
    /// rewritten once the decisions are applied.
    pub fn collect_checkpoint_set(
        &mut self,
        func: &Function,
        split: &BlockSplitInfo,
    ) -> CheckpointResult<(CheckpointSetInfo, HashSet<Use>)> {
        let in_primal = |inst: InstId| func.block_of(inst).map_or(false, |b| split.is_primal_block(b));

        let mut worklist: VecDeque<Use> = cross_boundary_uses(func, split).into();
        let mut pending_uses = HashSet::new();
        let mut set = CheckpointSetInfo::new();
        // Required operand → value whose inversion reads it.
        let mut required_by: HashMap<InstId, InstId> = HashMap::new();

        while let Some(use_) = worklist.pop_front() {
            let target = use_.get(func);
            if func.block_of(use_.user).map_or(false, |b| split.is_diff_block(func, b)) {
                pending_uses.insert(use_);
            }
            if set.is_decided(target) {
                continue;
            }

            let mut result = self.classify(func, use_)?;
            if matches!(result, HoistResult::Recompute(_)) {
                if let Some(&inverted) = required_by.get(&target) {
                    if depends_on(func, target, inverted) {
                        debug!("{} feeds the inversion of {} and depends on it; storing", target, inverted);
                        result = HoistResult::store(target);
                    }
                }
            }
            // A required operand already recomputed from the inverted value cannot feed its inverse.
            let cyclic = match &result {
                HoistResult::Invert(info) => info.required_operands.iter().copied().find(|&operand| {
                    set.mode_of(operand) == Some(HoistMode::Recompute) && depends_on(func, operand, target)
                }),
                _ => None,
            };
            if let Some(operand) = cyclic {
                debug!("{} is recomputed from {}; storing instead of inverting", operand, target);
                result = HoistResult::store(target);
            }
            trace!("{} → {}", target, result.mode());
            set.record(target, &result);

            match &result {
                HoistResult::Store(_) => {}
                HoistResult::Recompute(inst) => {
                    for (slot, &operand) in func.operands(*inst).iter().enumerate() {
                        if in_primal(operand) && !set.is_decided(operand) {
                            worklist.push_back(Use::new(*inst, slot as u32));
                        }
                    }
                }
                HoistResult::Invert(info) => {
                    for &extra in &info.target_insts {
                        if extra != target && in_primal(extra) {
                            set.record(extra, &result);
                        }
                    }
                    for &operand in &info.required_operands {
                        if !in_primal(operand) || set.is_decided(operand) {
                            continue;
                        }
                        required_by.insert(operand, target);
                        match func.uses(operand).first() {
                            Some(&first) => worklist.push_back(first),
                            None => {
                                set.record(operand, &HoistResult::store(operand));
                            }
                        }
                    }
                }
            }
        }

        debug_assert!(set.store_set.is_disjoint(&set.recompute_set));
        Ok((set, pending_uses))
    }
}

/// Uses by differential blocks of values defined in primal blocks, in program order.
pub fn cross_boundary_uses(func: &Function, split: &BlockSplitInfo) -> Vec<Use> {
    let mut uses = Vec::new();
    for &block in func.layout() {
        if !split.is_diff_block(func, block) {
            continue;
        }
        for &user in func.block_insts(block) {
            for (slot, &operand) in func.operands(user).iter().enumerate() {
                let defined_in_primal = func
                    .block_of(operand)
                    .map_or(false, |b| split.is_primal_block(b));
                if defined_in_primal {
                    uses.push(Use::new(user, slot as u32));
                }
            }
        }
    }
    uses
}

/// Whether `value` transitively reads `target`.
fn depends_on(func: &Function, value: InstId, target: InstId) -> bool {
    let mut stack = vec![value];
    let mut seen = HashSet::new();
    while let Some(inst) = stack.pop() {
        if inst == target {
            return true;
        }
        if !seen.insert(inst) {
            continue;
        }
        stack.extend(func.operands(inst).iter().copied());
    }
    false
}

/// Dominance- and cost-driven policy.
pub struct DefaultCheckpointPolicy<'s, 'arena> {
    session: &'s CheckpointSession<'arena>,
    cost_model: CostModel,
    dom_tree: Option<DominatorTree<'arena>>,
    inversions: HashMap<InstId, InversionInfo>,
    /// Recompute closure per value: total cost and every member plus leaf.
    closure_memo: HashMap<InstId, (u32, Vec<InstId>)>,
}

impl<'s, 'arena> DefaultCheckpointPolicy<'s, 'arena> {
    pub fn new(session: &'s CheckpointSession<'arena>, cost_model: CostModel) -> Self {
        Self {
            session,
            cost_model,
            dom_tree: None,
            inversions: HashMap::new(),
            closure_memo: HashMap::new(),
        }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    /// Make `value` eligible for inversion. Inversion is never inferred.
    pub fn register_inversion(&mut self, value: InstId, info: InversionInfo) {
        self.inversions.insert(value, info);
    }

    pub fn dom_tree(&self) -> Option<&DominatorTree<'arena>> {
        self.dom_tree.as_ref()
    }

    fn is_recomputable(func: &Function, inst: InstId) -> bool {
        let op = func.opcode(inst);
        op != Opcode::Param && op.is_pure()
    }

    /// Cost of cloning `value` and every recomputable value it reads,
    /// together with the instructions involved.
    fn recompute_closure(&mut self, func: &Function, value: InstId) -> (u32, Vec<InstId>) {
        if let Some(memo) = self.closure_memo.get(&value) {
            return memo.clone();
        }

        let mut cost = 0u32;
        let mut members = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![value];
        while let Some(inst) = stack.pop() {
            if !seen.insert(inst) {
                continue;
            }
            members.push(inst);
            if !Self::is_recomputable(func, inst) {
                // Leaf: read from wherever it is available.
                continue;
            }
            cost = cost.saturating_add(self.cost_model.op_cost(func.opcode(inst)));
            stack.extend(func.operands(inst).iter().copied());
        }

        self.closure_memo.insert(value, (cost, members.clone()));
        (cost, members)
    }

    fn can_recompute(&mut self, func: &Function, value: InstId, use_: Use) -> bool {
        if !Self::is_recomputable(func, value) {
            return false;
        }
        let (cost, members) = self.recompute_closure(func, value);
        if cost > self.cost_model.recompute_budget {
            trace!("{} costs {} > budget {}", value, cost, self.cost_model.recompute_budget);
            return false;
        }

        let (Some(dom), Some(use_block)) = (self.dom_tree.as_ref(), func.block_of(use_.user)) else {
            return false;
        };
        members.iter().all(|&m| {
            func.block_of(m)
                .map_or(false, |block| dom.dominates(block, use_block))
        })
    }

    fn inversion_for(&self, func: &Function, value: InstId) -> Option<InversionInfo> {
        let info = self.inversions.get(&value)?;
        if !func.is_live(info.inst_to_invert) {
            return None;
        }
        let slot = func.operands(info.inst_to_invert).iter().position(|&o| o == value)?;
        let inverse = inverse_opcode(func.opcode(info.inst_to_invert), slot)?;
        (self.cost_model.op_cost(inverse) < self.cost_model.store_cost).then(|| info.clone())
    }
}

impl CheckpointPolicy for DefaultCheckpointPolicy<'_, '_> {
    fn prepare_policy(&mut self, func: &Function) -> CheckpointResult<()> {
        self.dom_tree = Some(DominatorTree::compute(self.session, func));
        self.closure_memo.clear();
        Ok(())
    }

    fn classify_use(&mut self, func: &Function, use_: Use) -> Option<HoistResult> {
        if !func.is_live(use_.user) {
            return None;
        }
        let value = use_.get(func);
        if !func.is_live(value) {
            return None;
        }
        if self.dom_tree.is_none() {
            self.dom_tree = Some(DominatorTree::compute(self.session, func));
        }

        if self.can_recompute(func, value, use_) {
            return Some(HoistResult::recompute(value));
        }
        if let Some(info) = self.inversion_for(func, value) {
            return Some(HoistResult::invert(info));
        }
        Some(HoistResult::store(value))
    }
}
