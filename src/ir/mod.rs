// This module implements the instruction graph the checkpointing passes operate on. A Function
// is an arena of instructions and blocks addressed by stable u32 handles (InstId, BlockId);
// removed instructions stay in the arena, marked dead, so handles are never reused. Operand
// edges are stored on the user, and the reverse direction (the use-list of every value) lives
// in a side index keyed by the target handle, so replacing an operand is O(uses) without raw
// back-pointers. Blocks hold an ordered instruction list ending in one terminator, and the
// function keeps a separate block layout so passes can build new blocks and swap the layout
// in one step. Instructions carry two decorations: an optional name hint and the
// "differential" tag that marks adjoint-phase code. The module also prints functions in the
// same text form the parser reads, which is what the tests and the trace tool use.

//! Instruction graph (IR) for the checkpointing passes.
//!
//! # Text Format
//!
//! ```text
//! ; Comments start with semicolon
//! square_sin(%x) {
//! entry:
//!     br ^body
//! body:
//!     %y = sin %x
//!     %z = mul %y, %y !diff
//!     ret %z
//! }
//! ```
//!
//! Parameters are declared in the header and live in the first block.
//! A trailing `!diff` tags an instruction (or, before the colon of a label,
//! a block) as differential.

use hashbrown::HashMap;
use std::fmt;

pub mod interp;
pub mod parser;

pub use interp::{evaluate, Evaluator, RtValue};

/// Stable handle of an instruction inside its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Stable handle of a block inside its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "^{}", self.0)
    }
}

/// One operand edge: operand `slot` of `user`.
///
/// Every use recorded on a value's use-list resolves, via [`Use::get`], to
/// that value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Use {
    pub user: InstId,
    pub slot: u32,
}

impl Use {
    pub fn new(user: InstId, slot: u32) -> Self {
        Self { user, slot }
    }

    /// Value this use currently refers to.
    pub fn get(self, func: &Function) -> InstId {
        func.operand(self.user, self.slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Void,
    Float,
    Ptr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Param,
    Const,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Sin,
    Cos,
    Exp,
    Log,
    Call,
    Var,
    Array,
    ElemAddr,
    Load,
    Store,
    Br,
    CondBr,
    Ret,
}

/// Operand count marker for opcodes taking any number of operands.
pub const VARIADIC: u32 = !0;

impl Opcode {
    pub const fn info(self) -> OpInfo {
        use Opcode::*;
        match self {
            Param => OpInfo { name: "param", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 0, succ_count: 0, result: Type::Float },
            Const => OpInfo { name: "const", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 0, succ_count: 0, result: Type::Float },
            Add => OpInfo { name: "add", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 2, succ_count: 0, result: Type::Float },
            Sub => OpInfo { name: "sub", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 2, succ_count: 0, result: Type::Float },
            Mul => OpInfo { name: "mul", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 2, succ_count: 0, result: Type::Float },
            Div => OpInfo { name: "div", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 2, succ_count: 0, result: Type::Float },
            Neg => OpInfo { name: "neg", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 1, succ_count: 0, result: Type::Float },
            Sin => OpInfo { name: "sin", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 1, succ_count: 0, result: Type::Float },
            Cos => OpInfo { name: "cos", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 1, succ_count: 0, result: Type::Float },
            Exp => OpInfo { name: "exp", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 1, succ_count: 0, result: Type::Float },
            Log => OpInfo { name: "log", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 1, succ_count: 0, result: Type::Float },
            Call => OpInfo { name: "call", is_terminator: false, has_side_effects: true, is_stateful: false, op_count: VARIADIC, succ_count: 0, result: Type::Float },
            Var => OpInfo { name: "var", is_terminator: false, has_side_effects: false, is_stateful: true, op_count: 0, succ_count: 0, result: Type::Ptr },
            Array => OpInfo { name: "array", is_terminator: false, has_side_effects: false, is_stateful: true, op_count: 0, succ_count: 0, result: Type::Ptr },
            ElemAddr => OpInfo { name: "elemaddr", is_terminator: false, has_side_effects: false, is_stateful: false, op_count: 2, succ_count: 0, result: Type::Ptr },
            Load => OpInfo { name: "load", is_terminator: false, has_side_effects: false, is_stateful: true, op_count: 1, succ_count: 0, result: Type::Float },
            Store => OpInfo { name: "store", is_terminator: false, has_side_effects: true, is_stateful: false, op_count: 2, succ_count: 0, result: Type::Void },
            Br => OpInfo { name: "br", is_terminator: true, has_side_effects: false, is_stateful: false, op_count: 0, succ_count: 1, result: Type::Void },
            CondBr => OpInfo { name: "condbr", is_terminator: true, has_side_effects: false, is_stateful: false, op_count: 1, succ_count: 2, result: Type::Void },
            Ret => OpInfo { name: "ret", is_terminator: true, has_side_effects: false, is_stateful: false, op_count: 1, succ_count: 0, result: Type::Void },
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        use Opcode::*;
        let op = match s {
            "const" => Const,
            "add" => Add,
            "sub" => Sub,
            "mul" => Mul,
            "div" => Div,
            "neg" => Neg,
            "sin" => Sin,
            "cos" => Cos,
            "exp" => Exp,
            "log" => Log,
            "call" => Call,
            "var" => Var,
            "array" => Array,
            "elemaddr" => ElemAddr,
            "load" => Load,
            "store" => Store,
            "br" => Br,
            "condbr" => CondBr,
            "ret" => Ret,
            _ => return None,
        };
        Some(op)
    }

    /// No side effects, no memory state, not control flow: safe to duplicate.
    pub const fn is_pure(self) -> bool {
        let info = self.info();
        !info.has_side_effects && !info.is_stateful && !info.is_terminator
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    pub is_terminator: bool,
    pub has_side_effects: bool,
    /// Reads or allocates memory, so a second execution may observe a different state.
    pub is_stateful: bool,
    pub op_count: u32,
    pub succ_count: u32,
    pub result: Type,
}

/// Arena entry for one instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct InstData {
    pub op: Opcode,
    pub operands: Vec<InstId>,
    pub targets: Vec<BlockId>,
    pub ty: Type,
    pub block: Option<BlockId>,
    /// Literal of `const`.
    pub constant: f64,
    /// Element count of `array`.
    pub extent: u32,
    /// Callee of `call`.
    pub callee: Option<String>,
    pub name: Option<String>,
    pub differential: bool,
    pub removed: bool,
}

impl InstData {
    fn new(op: Opcode, operands: Vec<InstId>, targets: Vec<BlockId>) -> Self {
        Self {
            op,
            operands,
            targets,
            ty: op.info().result,
            block: None,
            constant: 0.0,
            extent: 0,
            callee: None,
            name: None,
            differential: false,
            removed: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockData {
    pub name: Option<String>,
    pub insts: Vec<InstId>,
    pub differential: bool,
}

/// Where a new instruction goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    Start(BlockId),
    End(BlockId),
    Before(InstId),
    After(InstId),
}

/// A function: instruction and block arenas, block layout and use-lists.
#[derive(Debug, Clone, Default)]
pub struct Function {
    name: String,
    insts: Vec<InstData>,
    blocks: Vec<BlockData>,
    layout: Vec<BlockId>,
    uses: HashMap<InstId, Vec<Use>>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let mut funcs = parser::parse_module(text)?;
        match funcs.len() {
            1 => Ok(funcs.remove(0)),
            n => Err(format!("Expected exactly one function, found {}", n)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ----- blocks -----

    /// Create a block and append it to the layout.
    pub fn add_block(&mut self, name: Option<&str>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            name: name.map(str::to_string),
            ..BlockData::default()
        });
        self.layout.push(id);
        id
    }

    /// Blocks in layout order. Detached blocks stay in the arena but are not listed.
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn set_layout(&mut self, layout: Vec<BlockId>) {
        self.layout = layout;
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        &self.blocks[block.index()]
    }

    pub fn block_insts(&self, block: BlockId) -> &[InstId] {
        &self.blocks[block.index()].insts
    }

    pub fn block_name(&self, block: BlockId) -> Option<&str> {
        self.blocks[block.index()].name.as_deref()
    }

    pub fn mark_block_differential(&mut self, block: BlockId) {
        self.blocks[block.index()].differential = true;
    }

    pub fn is_block_differential(&self, block: BlockId) -> bool {
        self.blocks[block.index()].differential
    }

    /// Find a block in the layout by name.
    pub fn find_block(&self, name: &str) -> Option<BlockId> {
        self.layout
            .iter()
            .copied()
            .find(|&b| self.block_name(b) == Some(name))
    }

    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.block_insts(block).last()?;
        self.inst(last).op.info().is_terminator.then_some(last)
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|t| self.inst(t).targets.clone())
            .unwrap_or_default()
    }

    pub fn layout_index(&self, block: BlockId) -> Option<usize> {
        self.layout.iter().position(|&b| b == block)
    }

    // ----- instructions -----

    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst.index()]
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn is_live(&self, inst: InstId) -> bool {
        self.insts
            .get(inst.index())
            .map_or(false, |data| !data.removed && data.block.is_some())
    }

    pub fn opcode(&self, inst: InstId) -> Opcode {
        self.inst(inst).op
    }

    pub fn operand(&self, inst: InstId, slot: u32) -> InstId {
        self.inst(inst).operands[slot as usize]
    }

    pub fn operands(&self, inst: InstId) -> &[InstId] {
        &self.inst(inst).operands
    }

    pub fn block_of(&self, inst: InstId) -> Option<BlockId> {
        self.insts.get(inst.index()).and_then(|data| data.block)
    }

    pub fn position(&self, inst: InstId) -> Option<usize> {
        let block = self.block_of(inst)?;
        self.block_insts(block).iter().position(|&i| i == inst)
    }

    /// Sort key following layout order, then position inside the block.
    pub fn program_order_key(&self, inst: InstId) -> (usize, usize) {
        let block_idx = self
            .block_of(inst)
            .and_then(|b| self.layout_index(b))
            .unwrap_or(usize::MAX);
        (block_idx, self.position(inst).unwrap_or(usize::MAX))
    }

    pub fn next_inst(&self, inst: InstId) -> Option<InstId> {
        let block = self.block_of(inst)?;
        let pos = self.position(inst)?;
        self.block_insts(block).get(pos + 1).copied()
    }

    /// Parameters of the function, in declaration order.
    pub fn params(&self) -> Vec<InstId> {
        let Some(entry) = self.entry_block() else {
            return Vec::new();
        };
        self.block_insts(entry)
            .iter()
            .copied()
            .filter(|&i| self.opcode(i) == Opcode::Param)
            .collect()
    }

    /// All live instructions in layout order.
    pub fn live_insts(&self) -> impl Iterator<Item = InstId> + '_ {
        self.layout
            .iter()
            .flat_map(move |&b| self.block_insts(b).iter().copied())
    }

    pub fn name_hint(&self, inst: InstId) -> Option<&str> {
        self.inst(inst).name.as_deref()
    }

    pub fn set_name_hint(&mut self, inst: InstId, name: impl Into<String>) {
        self.insts[inst.index()].name = Some(name.into());
    }

    pub fn mark_differential(&mut self, inst: InstId) {
        self.insts[inst.index()].differential = true;
    }

    pub fn is_differential(&self, inst: InstId) -> bool {
        self.inst(inst).differential
    }

    /// First live instruction (layout order) whose name hint is `name`.
    pub fn find_inst(&self, name: &str) -> Option<InstId> {
        self.live_insts().find(|&i| self.name_hint(i) == Some(name))
    }

    /// Every live instruction whose name hint is `name`, in layout order.
    pub fn find_insts(&self, name: &str) -> Vec<InstId> {
        self.live_insts()
            .filter(|&i| self.name_hint(i) == Some(name))
            .collect()
    }

    // ----- creation and mutation -----

    /// Create an instruction at `at`; the result type follows the opcode.
    pub fn create_inst(
        &mut self,
        at: InsertPoint,
        op: Opcode,
        operands: Vec<InstId>,
        targets: Vec<BlockId>,
    ) -> InstId {
        self.create_from(at, InstData::new(op, operands, targets))
    }

    pub fn create_const(&mut self, at: InsertPoint, value: f64) -> InstId {
        let mut data = InstData::new(Opcode::Const, Vec::new(), Vec::new());
        data.constant = value;
        self.create_from(at, data)
    }

    pub fn create_array(&mut self, at: InsertPoint, extent: u32) -> InstId {
        let mut data = InstData::new(Opcode::Array, Vec::new(), Vec::new());
        data.extent = extent;
        self.create_from(at, data)
    }

    pub fn create_call(&mut self, at: InsertPoint, callee: &str, args: Vec<InstId>) -> InstId {
        let mut data = InstData::new(Opcode::Call, args, Vec::new());
        data.callee = Some(callee.to_string());
        self.create_from(at, data)
    }

    /// Create an instruction from a template. Operands are taken as given and
    /// registered on the targets' use-lists; `block` and `removed` are reset.
    pub fn create_from(&mut self, at: InsertPoint, mut data: InstData) -> InstId {
        let id = InstId(self.insts.len() as u32);
        for (slot, &operand) in data.operands.iter().enumerate() {
            self.uses
                .entry(operand)
                .or_default()
                .push(Use::new(id, slot as u32));
        }
        data.block = None;
        data.removed = false;
        self.insts.push(data);
        self.insert_at(at, id);
        id
    }

    fn insert_at(&mut self, at: InsertPoint, id: InstId) {
        let (block, index) = match at {
            InsertPoint::Start(block) => (block, 0),
            InsertPoint::End(block) => (block, self.block_insts(block).len()),
            InsertPoint::Before(anchor) | InsertPoint::After(anchor) => {
                let block = self
                    .block_of(anchor)
                    .unwrap_or_else(|| panic!("insertion anchor {} is detached", anchor));
                let pos = self.position(anchor).unwrap_or(0);
                let index = if matches!(at, InsertPoint::After(_)) { pos + 1 } else { pos };
                (block, index)
            }
        };
        self.blocks[block.index()].insts.insert(index, id);
        self.insts[id.index()].block = Some(block);
    }

    /// Rewrite operand `slot` of `user`, keeping both use-lists in sync.
    pub fn set_operand(&mut self, user: InstId, slot: u32, new: InstId) {
        let old = self.operand(user, slot);
        if old == new {
            return;
        }
        let edge = Use::new(user, slot);
        if let Some(list) = self.uses.get_mut(&old) {
            list.retain(|u| *u != edge);
        }
        self.uses.entry(new).or_default().push(edge);
        self.insts[user.index()].operands[slot as usize] = new;
    }

    pub fn set_target(&mut self, inst: InstId, index: usize, block: BlockId) {
        self.insts[inst.index()].targets[index] = block;
    }

    /// Uses of `inst`, in the order they were added.
    pub fn uses(&self, inst: InstId) -> &[Use] {
        self.uses.get(&inst).map_or(&[], Vec::as_slice)
    }

    pub fn has_uses(&self, inst: InstId) -> bool {
        !self.uses(inst).is_empty()
    }

    /// Redirect every use of `old` to `new`.
    pub fn replace_uses_with(&mut self, old: InstId, new: InstId) {
        if old == new {
            return;
        }
        for edge in self.uses(old).to_vec() {
            self.set_operand(edge.user, edge.slot, new);
        }
    }

    /// Detach `inst` from its block and drop its operand edges.
    ///
    /// The instruction must have no remaining uses.
    pub fn remove_inst(&mut self, inst: InstId) {
        debug_assert!(
            !self.has_uses(inst),
            "removing {} which still has {} use(s)",
            inst,
            self.uses(inst).len()
        );
        if let Some(block) = self.block_of(inst) {
            self.blocks[block.index()].insts.retain(|&i| i != inst);
        }
        let operands = std::mem::take(&mut self.insts[inst.index()].operands);
        for (slot, operand) in operands.iter().enumerate() {
            let edge = Use::new(inst, slot as u32);
            if let Some(list) = self.uses.get_mut(operand) {
                list.retain(|u| *u != edge);
            }
        }
        let data = &mut self.insts[inst.index()];
        data.operands = operands;
        data.block = None;
        data.removed = true;
    }

    // ----- printing -----

    /// Unique printable names for every live instruction and layout block.
    fn printable_names(&self) -> (HashMap<InstId, String>, HashMap<BlockId, String>) {
        let mut taken: HashMap<String, u32> = HashMap::new();
        let mut unique = |base: String| -> String {
            let count = taken.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{}.{}", base, *count - 1)
            }
        };

        let mut inst_names = HashMap::new();
        for inst in self.live_insts() {
            let base = self
                .name_hint(inst)
                .map(str::to_string)
                .unwrap_or_else(|| format!("v{}", inst.0));
            inst_names.insert(inst, unique(base));
        }

        let mut block_names = HashMap::new();
        for &block in &self.layout {
            let base = self
                .block_name(block)
                .map(str::to_string)
                .unwrap_or_else(|| format!("bb{}", block.0));
            block_names.insert(block, unique(base));
        }
        (inst_names, block_names)
    }

    pub fn print(&self) -> String {
        let (names, block_names) = self.printable_names();
        let value = |inst: &InstId| -> String {
            names
                .get(inst)
                .map(|n| format!("%{}", n))
                .unwrap_or_else(|| format!("%<dead{}>", inst.0))
        };

        let params: Vec<String> = self.params().iter().map(value).collect();
        let mut output = format!("{}({}) {{\n", self.name, params.join(", "));

        for &block in &self.layout {
            let label = &block_names[&block];
            if self.is_block_differential(block) {
                output.push_str(&format!("{} !diff:\n", label));
            } else {
                output.push_str(&format!("{}:\n", label));
            }

            for &inst in self.block_insts(block) {
                let data = self.inst(inst);
                if data.op == Opcode::Param {
                    continue;
                }
                let mut line = String::from("  ");
                if data.ty != Type::Void {
                    line.push_str(&format!("{} = ", value(&inst)));
                }
                line.push_str(data.op.info().name);

                let mut args: Vec<String> = Vec::new();
                match data.op {
                    Opcode::Const => args.push(format_float(data.constant)),
                    Opcode::Array => args.push(data.extent.to_string()),
                    _ => {}
                }
                args.extend(data.operands.iter().map(value));
                args.extend(data.targets.iter().map(|b| {
                    block_names
                        .get(b)
                        .map(|n| format!("^{}", n))
                        .unwrap_or_else(|| format!("^<detached{}>", b.0))
                }));

                if let Some(callee) = &data.callee {
                    line.push_str(&format!(" @{}", callee));
                }
                if !args.is_empty() {
                    line.push(' ');
                    line.push_str(&args.join(", "));
                }
                if data.differential {
                    line.push_str(" !diff");
                }
                output.push_str(&line);
                output.push('\n');
            }
        }
        output.push_str("}\n");
        output
    }
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.print())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Function {
        let mut func = Function::new("small");
        let entry = func.add_block(Some("entry"));
        let x = func.create_inst(InsertPoint::End(entry), Opcode::Param, vec![], vec![]);
        func.set_name_hint(x, "x");
        let y = func.create_inst(InsertPoint::End(entry), Opcode::Sin, vec![x], vec![]);
        func.set_name_hint(y, "y");
        func.create_inst(InsertPoint::End(entry), Opcode::Ret, vec![y], vec![]);
        func
    }

    #[test]
    fn test_use_lists_follow_operands() {
        let mut func = small();
        let x = func.find_inst("x").unwrap();
        let y = func.find_inst("y").unwrap();
        assert_eq!(func.uses(x), &[Use::new(y, 0)]);

        let c = func.create_const(InsertPoint::Before(y), 2.0);
        func.set_operand(y, 0, c);
        assert!(func.uses(x).is_empty());
        assert_eq!(func.uses(c), &[Use::new(y, 0)]);
        assert_eq!(Use::new(y, 0).get(&func), c);
    }

    #[test]
    fn test_replace_and_remove() {
        let mut func = small();
        let entry = func.entry_block().unwrap();
        let y = func.find_inst("y").unwrap();
        let x = func.find_inst("x").unwrap();
        let z = func.create_inst(InsertPoint::After(y), Opcode::Cos, vec![x], vec![]);

        func.replace_uses_with(y, z);
        assert!(!func.has_uses(y));
        func.remove_inst(y);

        assert!(!func.is_live(y));
        assert_eq!(func.block_insts(entry).len(), 3);
        assert_eq!(func.uses(x), &[Use::new(z, 0)]);
        assert_eq!(func.terminator(entry).map(|t| func.operand(t, 0)), Some(z));
    }

    #[test]
    fn test_insert_points() {
        let mut func = small();
        let entry = func.entry_block().unwrap();
        let y = func.find_inst("y").unwrap();
        let first = func.create_const(InsertPoint::Start(entry), 1.0);
        let before = func.create_const(InsertPoint::Before(y), 2.0);
        let after = func.create_const(InsertPoint::After(y), 3.0);

        let order = func.block_insts(entry);
        assert_eq!(order[0], first);
        assert_eq!(func.position(before).unwrap() + 1, func.position(y).unwrap());
        assert_eq!(func.position(y).unwrap() + 1, func.position(after).unwrap());
    }

    #[test]
    fn test_print_disambiguates_names() {
        let mut func = small();
        let y = func.find_inst("y").unwrap();
        let x = func.find_inst("x").unwrap();
        let again = func.create_inst(InsertPoint::After(y), Opcode::Sin, vec![x], vec![]);
        func.set_name_hint(again, "y");

        let output = func.print();
        assert!(output.contains("small(%x) {"));
        assert!(output.contains("%y = sin %x"));
        assert!(output.contains("%y.1 = sin %x"));
        assert!(output.contains("ret %y"));
    }
}
