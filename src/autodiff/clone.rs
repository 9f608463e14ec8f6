// This module implements instruction cloning for the autodiff passes. CloneEnv is the
// incrementally built old-to-new mapping (for instructions and blocks) that every operand
// substitution consults; clone_inst copies one instruction at an insertion point with its
// operands and branch targets remapped through the environment and registers the new pair.
// OutOfOrderCloneContext layers a two-phase edge table on top: when an instruction is cloned
// before some of its operands have clones, the affected operand slots are recorded as
// pending, keyed by the original operand they still point at. Registering a clone for that
// operand drains its pending edges and rewrites them, so each pending use is resolved exactly
// once, the moment its target becomes available. This lets the checkpoint applier clone
// recomputed values in differential dependency order rather than original program order.

//! Clone environment and the out-of-order cloner.

use crate::ir::{BlockId, Function, InsertPoint, InstId, Use};
use hashbrown::{HashMap, HashSet};

/// Old→new mapping built up while cloning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloneEnv {
    map_old_val_to_new: HashMap<InstId, InstId>,
    map_old_block_to_new: HashMap<BlockId, BlockId>,
}

impl CloneEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, old: InstId) -> Option<InstId> {
        self.map_old_val_to_new.get(&old).copied()
    }

    pub fn contains(&self, old: InstId) -> bool {
        self.map_old_val_to_new.contains_key(&old)
    }

    pub fn insert(&mut self, old: InstId, new: InstId) {
        self.map_old_val_to_new.insert(old, new);
    }

    pub fn get_block(&self, old: BlockId) -> Option<BlockId> {
        self.map_old_block_to_new.get(&old).copied()
    }

    pub fn insert_block(&mut self, old: BlockId, new: BlockId) {
        self.map_old_block_to_new.insert(old, new);
    }

    /// Substitute `old` if it has a clone, otherwise keep it.
    pub fn map_or_self(&self, old: InstId) -> InstId {
        self.get(old).unwrap_or(old)
    }

    pub fn len(&self) -> usize {
        self.map_old_val_to_new.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map_old_val_to_new.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstId, InstId)> + '_ {
        self.map_old_val_to_new.iter().map(|(&k, &v)| (k, v))
    }
}

/// Clone `inst` at `at`, remapping operands and targets through `env`, and
/// register the pair in `env`.
pub fn clone_inst(env: &mut CloneEnv, func: &mut Function, at: InsertPoint, inst: InstId) -> InstId {
    let mut data = func.inst(inst).clone();
    for operand in data.operands.iter_mut() {
        *operand = env.map_or_self(*operand);
    }
    for target in data.targets.iter_mut() {
        *target = env.get_block(*target).unwrap_or(*target);
    }
    let cloned = func.create_from(at, data);
    env.insert(inst, cloned);
    cloned
}

/// Cloning context that tolerates clones appearing before their operands.
#[derive(Debug, Default)]
pub struct OutOfOrderCloneContext {
    pub clone_env: CloneEnv,
    /// Pending edges keyed by the original they still reference.
    pending_uses: HashMap<InstId, HashSet<Use>>,
}

impl OutOfOrderCloneContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite `edge` now if its operand already has a clone, otherwise mark it pending.
    pub fn add_or_replace_pending_use(&mut self, func: &mut Function, edge: Use) {
        let operand = edge.get(func);
        match self.clone_env.get(operand) {
            Some(cloned) => func.set_operand(edge.user, edge.slot, cloned),
            None => {
                self.pending_uses.entry(operand).or_default().insert(edge);
            }
        }
    }

    /// Record `inst → cloned` and resolve every use pending on `inst`.
    ///
    /// Returns the number of uses resolved.
    pub fn register_clone(&mut self, func: &mut Function, inst: InstId, cloned: InstId) -> usize {
        self.clone_env.insert(inst, cloned);
        self.resolve_pending(func, inst, cloned)
    }

    /// Clone `inst` at `at`. Operand slots whose operand has no clone yet are
    /// left pointing at the original and marked pending; uses already pending
    /// on `inst` are resolved to the new clone.
    pub fn clone_inst_out_of_order(&mut self, func: &mut Function, at: InsertPoint, inst: InstId) -> InstId {
        let cloned = clone_inst(&mut self.clone_env, func, at, inst);

        for (slot, &old_operand) in func.operands(inst).to_vec().iter().enumerate() {
            if !self.clone_env.contains(old_operand) {
                self.pending_uses
                    .entry(old_operand)
                    .or_default()
                    .insert(Use::new(cloned, slot as u32));
            }
        }

        self.resolve_pending(func, inst, cloned);
        cloned
    }

    fn resolve_pending(&mut self, func: &mut Function, inst: InstId, cloned: InstId) -> usize {
        let Some(edges) = self.pending_uses.remove(&inst) else {
            return 0;
        };
        let mut edges: Vec<Use> = edges.into_iter().collect();
        edges.sort();
        let mut resolved = 0;
        for edge in edges {
            // The user may have been rewritten or removed since the edge was recorded.
            if func.is_live(edge.user) && edge.get(func) == inst {
                func.set_operand(edge.user, edge.slot, cloned);
                resolved += 1;
            }
        }
        log::trace!("resolved {} pending use(s) of {} to {}", resolved, inst, cloned);
        resolved
    }

    pub fn is_pending(&self, edge: Use) -> bool {
        self.pending_uses.values().any(|set| set.contains(&edge))
    }

    /// Whether `edge` is pending on `target`.
    pub fn is_pending_on(&self, target: InstId, edge: Use) -> bool {
        self.pending_uses
            .get(&target)
            .map_or(false, |set| set.contains(&edge))
    }

    pub fn pending_count(&self) -> usize {
        self.pending_uses.values().map(HashSet::len).sum()
    }

    /// Every pending edge with the original it waits on, sorted by user then slot.
    pub fn pending_uses(&self) -> Vec<(Use, InstId)> {
        let mut all: Vec<(Use, InstId)> = self
            .pending_uses
            .iter()
            .flat_map(|(&target, set)| set.iter().map(move |&edge| (edge, target)))
            .collect();
        all.sort();
        all
    }
}
