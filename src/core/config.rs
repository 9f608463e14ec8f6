//! Tunable parameters of the checkpointing passes.

use crate::ir::Opcode;
use hashbrown::HashMap;

/// Cost model consulted by the default checkpoint policy.
///
/// Recomputing a value costs the sum of the opcode costs of every
/// instruction that has to be cloned to reproduce it. A value is recomputed
/// only while that sum stays within `recompute_budget`; an inversion is
/// preferred over storing when the inverse opcode costs less than
/// `store_cost`.
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    pub recompute_budget: u32,
    pub store_cost: u32,
    overrides: HashMap<Opcode, u32>,
}

impl CostModel {
    pub const DEFAULT_RECOMPUTE_BUDGET: u32 = 8;
    pub const DEFAULT_STORE_COST: u32 = 4;

    pub fn new(recompute_budget: u32, store_cost: u32) -> Self {
        Self {
            recompute_budget,
            store_cost,
            overrides: HashMap::new(),
        }
    }

    /// Replace the cost of one opcode.
    pub fn with_op_cost(mut self, op: Opcode, cost: u32) -> Self {
        self.overrides.insert(op, cost);
        self
    }

    pub fn op_cost(&self, op: Opcode) -> u32 {
        if let Some(&cost) = self.overrides.get(&op) {
            return cost;
        }
        match op {
            Opcode::Param | Opcode::Const => 0,
            Opcode::Add | Opcode::Sub | Opcode::Neg | Opcode::Mul | Opcode::ElemAddr => 1,
            Opcode::Div => 2,
            Opcode::Sin | Opcode::Cos | Opcode::Exp | Opcode::Log => 4,
            _ => 1,
        }
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RECOMPUTE_BUDGET, Self::DEFAULT_STORE_COST)
    }
}

/// Configuration for a checkpointing run.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointConfig {
    pub cost_model: CostModel,
    /// Instruction budget for the reference evaluator.
    pub eval_step_limit: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            cost_model: CostModel::default(),
            eval_step_limit: crate::ir::Evaluator::DEFAULT_STEP_LIMIT,
        }
    }
}
