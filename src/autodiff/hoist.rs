// This module defines the data exchanged between the checkpointing passes. A HoistResult is
// the classifier's verdict for one cross-boundary value: Store it in the primal phase,
// Recompute it in the differential phase, or Invert it from a later value using the recorded
// InversionInfo. CheckpointSetInfo accumulates raw verdicts while the classifier runs, and
// HoistedPrimalsInfo is the applied outcome: three disjoint sets of primal values, the
// inversion records for the invert set, and the materialized map from each original value
// to the instruction the differential block reads in its place. Both HoistedPrimalsInfo and
// InversionInfo can be carried through a clone environment with apply_map, and two infos
// merge with the later decision taking precedence. BlockSplitInfo records the
// primal-to-differential block pairing produced by the unzip pass.

use super::clone::CloneEnv;
use crate::ir::{BlockId, Function, InstId};
use hashbrown::{HashMap, HashSet};
use std::fmt;

/// How to rebuild a value from a later result.
///
/// `inst_to_invert` consumes the reconstructed value; `required_operands`
/// lists the values the inverse reads (the result of `inst_to_invert` and
/// its other operands); `target_insts` are the values reconstructed.
#[derive(Debug, Clone, PartialEq)]
pub struct InversionInfo {
    pub inst_to_invert: InstId,
    pub required_operands: Vec<InstId>,
    pub target_insts: Vec<InstId>,
}

impl InversionInfo {
    pub fn new(inst_to_invert: InstId, required_operands: Vec<InstId>, target_insts: Vec<InstId>) -> Self {
        Self {
            inst_to_invert,
            required_operands,
            target_insts,
        }
    }

    /// Translate through `env`. An inverted instruction without a counterpart
    /// is kept as is; list entries without one are dropped.
    pub fn apply_map(&self, env: &CloneEnv) -> Self {
        let map_all = |list: &[InstId]| list.iter().filter_map(|&i| env.get(i)).collect();
        Self {
            inst_to_invert: env.map_or_self(self.inst_to_invert),
            required_operands: map_all(&self.required_operands),
            target_insts: map_all(&self.target_insts),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoistMode {
    Store,
    Recompute,
    Invert,
}

impl fmt::Display for HoistMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HoistMode::Store => "store",
            HoistMode::Recompute => "recompute",
            HoistMode::Invert => "invert",
        };
        f.write_str(name)
    }
}

/// Verdict for one primal value consumed by the differential phase.
#[derive(Debug, Clone, PartialEq)]
pub enum HoistResult {
    Store(InstId),
    Recompute(InstId),
    Invert(InversionInfo),
}

impl HoistResult {
    pub fn store(inst: InstId) -> Self {
        HoistResult::Store(inst)
    }

    pub fn recompute(inst: InstId) -> Self {
        HoistResult::Recompute(inst)
    }

    pub fn invert(info: InversionInfo) -> Self {
        HoistResult::Invert(info)
    }

    pub fn mode(&self) -> HoistMode {
        match self {
            HoistResult::Store(_) => HoistMode::Store,
            HoistResult::Recompute(_) => HoistMode::Recompute,
            HoistResult::Invert(_) => HoistMode::Invert,
        }
    }
}

fn sorted(set: &HashSet<InstId>) -> Vec<InstId> {
    let mut list: Vec<InstId> = set.iter().copied().collect();
    list.sort();
    list
}

/// Raw classifier decisions, before application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointSetInfo {
    pub store_set: HashSet<InstId>,
    pub recompute_set: HashSet<InstId>,
    pub invert_set: HashSet<InstId>,
    pub inv_info_map: HashMap<InstId, InversionInfo>,
}

impl CheckpointSetInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode_of(&self, value: InstId) -> Option<HoistMode> {
        if self.store_set.contains(&value) {
            Some(HoistMode::Store)
        } else if self.recompute_set.contains(&value) {
            Some(HoistMode::Recompute)
        } else if self.invert_set.contains(&value) {
            Some(HoistMode::Invert)
        } else {
            None
        }
    }

    pub fn is_decided(&self, value: InstId) -> bool {
        self.mode_of(value).is_some()
    }

    /// Record the decision for `value`. The first decision for a value wins;
    /// returns false if it was already decided.
    pub fn record(&mut self, value: InstId, result: &HoistResult) -> bool {
        if self.is_decided(value) {
            return false;
        }
        match result {
            HoistResult::Store(_) => {
                self.store_set.insert(value);
            }
            HoistResult::Recompute(_) => {
                self.recompute_set.insert(value);
            }
            HoistResult::Invert(info) => {
                self.invert_set.insert(value);
                self.inv_info_map.insert(value, info.clone());
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.store_set.len() + self.recompute_set.len() + self.invert_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applied checkpoint decisions for one function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HoistedPrimalsInfo {
    pub store_set: HashSet<InstId>,
    pub recompute_set: HashSet<InstId>,
    pub invert_set: HashSet<InstId>,
    pub invert_info_map: HashMap<InstId, InversionInfo>,
    /// Instructions some inversion reads its result from.
    pub insts_to_invert: HashSet<InstId>,
    /// Original value → instruction the differential block reads instead.
    pub materialized: HashMap<InstId, InstId>,
}

impl HoistedPrimalsInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_checkpoint_set(set: &CheckpointSetInfo) -> Self {
        Self {
            store_set: set.store_set.clone(),
            recompute_set: set.recompute_set.clone(),
            invert_set: set.invert_set.clone(),
            invert_info_map: set.inv_info_map.clone(),
            insts_to_invert: set.inv_info_map.values().map(|info| info.inst_to_invert).collect(),
            materialized: HashMap::new(),
        }
    }

    pub fn mode_of(&self, value: InstId) -> Option<HoistMode> {
        if self.store_set.contains(&value) {
            Some(HoistMode::Store)
        } else if self.recompute_set.contains(&value) {
            Some(HoistMode::Recompute)
        } else if self.invert_set.contains(&value) {
            Some(HoistMode::Invert)
        } else {
            None
        }
    }

    pub fn contains(&self, value: InstId) -> bool {
        self.mode_of(value).is_some()
    }

    pub fn stores(&self) -> Vec<InstId> {
        sorted(&self.store_set)
    }

    pub fn recomputes(&self) -> Vec<InstId> {
        sorted(&self.recompute_set)
    }

    pub fn inverts(&self) -> Vec<InstId> {
        sorted(&self.invert_set)
    }

    pub fn len(&self) -> usize {
        self.store_set.len() + self.recompute_set.len() + self.invert_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move `value` into the store set, dropping any other decision.
    pub fn make_store(&mut self, value: InstId) {
        self.recompute_set.remove(&value);
        self.invert_set.remove(&value);
        self.invert_info_map.remove(&value);
        self.store_set.insert(value);
    }

    pub fn is_disjoint(&self) -> bool {
        self.store_set.is_disjoint(&self.recompute_set)
            && self.store_set.is_disjoint(&self.invert_set)
            && self.recompute_set.is_disjoint(&self.invert_set)
    }

    /// Translate every member through `env`. Members without a counterpart
    /// are dropped.
    pub fn apply_map(&self, env: &CloneEnv) -> Self {
        let map_set = |set: &HashSet<InstId>| -> HashSet<InstId> {
            set.iter().filter_map(|&i| env.get(i)).collect()
        };

        let mut result = Self {
            store_set: map_set(&self.store_set),
            recompute_set: map_set(&self.recompute_set),
            invert_set: HashSet::new(),
            invert_info_map: HashMap::new(),
            insts_to_invert: map_set(&self.insts_to_invert),
            materialized: HashMap::new(),
        };

        for &value in &self.invert_set {
            let Some(new_value) = env.get(value) else { continue };
            result.invert_set.insert(new_value);
            if let Some(info) = self.invert_info_map.get(&value) {
                result.invert_info_map.insert(new_value, info.apply_map(env));
            }
        }

        for (&original, &copy) in &self.materialized {
            if let Some(new_original) = env.get(original) {
                result.materialized.insert(new_original, env.map_or_self(copy));
            }
        }
        result
    }

    /// Union with `other`. A value decided in both keeps `other`'s decision.
    pub fn merge(&mut self, other: &HoistedPrimalsInfo) {
        for &value in &other.store_set {
            self.make_store(value);
        }
        for &value in &other.recompute_set {
            self.store_set.remove(&value);
            self.invert_set.remove(&value);
            self.invert_info_map.remove(&value);
            self.recompute_set.insert(value);
        }
        for &value in &other.invert_set {
            self.store_set.remove(&value);
            self.recompute_set.remove(&value);
            self.invert_set.insert(value);
        }
        for (&value, info) in &other.invert_info_map {
            self.invert_info_map.insert(value, info.clone());
        }
        self.insts_to_invert.extend(other.insts_to_invert.iter().copied());
        for (&original, &copy) in &other.materialized {
            self.materialized.insert(original, copy);
        }
    }

    /// Human-readable partition, one line per set, using the function's names.
    pub fn describe(&self, func: &Function) -> String {
        let names = |list: Vec<InstId>| -> String {
            list.iter()
                .map(|&i| match func.name_hint(i) {
                    Some(name) => format!("%{}", name),
                    None => i.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "store: [{}]\nrecompute: [{}]\ninvert: [{}]",
            names(self.stores()),
            names(self.recomputes()),
            names(self.inverts())
        )
    }
}

/// Pairing of primal blocks with their differential blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockSplitInfo {
    pub diff_block_map: HashMap<BlockId, BlockId>,
}

impl BlockSplitInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, primal: BlockId, diff: BlockId) {
        self.diff_block_map.insert(primal, diff);
    }

    pub fn diff_block_for(&self, primal: BlockId) -> Option<BlockId> {
        self.diff_block_map.get(&primal).copied()
    }

    pub fn is_primal_block(&self, block: BlockId) -> bool {
        self.diff_block_map.contains_key(&block)
    }

    /// A block paired as a differential block, or one tagged differential.
    pub fn is_diff_block(&self, func: &Function, block: BlockId) -> bool {
        func.is_block_differential(block) || self.diff_block_map.values().any(|&b| b == block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> InstId {
        InstId(n)
    }

    #[test]
    fn test_record_first_decision_wins() {
        let mut set = CheckpointSetInfo::new();
        assert!(set.record(id(1), &HoistResult::recompute(id(1))));
        assert!(!set.record(id(1), &HoistResult::store(id(1))));
        assert_eq!(set.mode_of(id(1)), Some(HoistMode::Recompute));

        let info = InversionInfo::new(id(3), vec![id(3), id(4)], vec![id(2)]);
        assert!(set.record(id(2), &HoistResult::invert(info.clone())));
        assert_eq!(set.inv_info_map.get(&id(2)), Some(&info));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_inversion_apply_map() {
        let mut env = CloneEnv::new();
        env.insert(id(3), id(13));
        env.insert(id(2), id(12));
        let info = InversionInfo::new(id(3), vec![id(3), id(4)], vec![id(2)]);

        let mapped = info.apply_map(&env);
        assert_eq!(mapped.inst_to_invert, id(13));
        assert_eq!(mapped.required_operands, vec![id(13)]);
        assert_eq!(mapped.target_insts, vec![id(12)]);

        let unmapped = InversionInfo::new(id(9), vec![], vec![id(2)]);
        assert_eq!(unmapped.apply_map(&env).inst_to_invert, id(9));
    }

    #[test]
    fn test_make_store_keeps_sets_disjoint() {
        let mut info = HoistedPrimalsInfo::new();
        info.recompute_set.insert(id(1));
        info.invert_set.insert(id(2));
        info.invert_info_map.insert(id(2), InversionInfo::new(id(3), vec![id(3)], vec![id(2)]));

        info.make_store(id(1));
        info.make_store(id(2));
        assert!(info.is_disjoint());
        assert_eq!(info.stores(), vec![id(1), id(2)]);
        assert!(info.invert_info_map.is_empty());
    }

    #[test]
    fn test_block_split_info() {
        let mut func = Function::new("f");
        let params = func.add_block(Some("params"));
        let primal = func.add_block(Some("primal"));
        let diff = func.add_block(Some("diff"));

        let mut split = BlockSplitInfo::new();
        split.insert(primal, diff);
        assert!(split.is_primal_block(primal));
        assert_eq!(split.diff_block_for(primal), Some(diff));
        assert!(!split.is_primal_block(diff));
        assert!(split.is_diff_block(&func, diff));
        assert!(!split.is_diff_block(&func, params));

        func.mark_block_differential(params);
        assert!(split.is_diff_block(&func, params));
    }
}
