//! Reference evaluator for the instruction graph.
//!
//! Executes a function on `f64` arguments. Memory is a flat vector of cells,
//! each holding a float or a pointer:
//! `var` allocates one cell, `array` allocates `extent` cells, and pointers
//! carry their allocation bounds so out-of-range element accesses are caught.
//! Used to check that the unzip and checkpoint passes preserve semantics.

use super::{Function, InstId, Opcode};
use crate::core::error::{CheckpointError, CheckpointResult};
use hashbrown::HashMap;

/// Runtime value of an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtValue {
    Float(f64),
    Ptr { base: usize, offset: usize, len: usize },
    Void,
}

/// Host implementation of a `call` target.
pub type Intrinsic = fn(&[f64]) -> f64;

pub struct Evaluator<'f> {
    func: &'f Function,
    intrinsics: HashMap<String, Intrinsic>,
    step_limit: usize,
}

fn fail(reason: impl Into<String>) -> CheckpointError {
    CheckpointError::Evaluation {
        reason: reason.into(),
    }
}

impl<'f> Evaluator<'f> {
    pub const DEFAULT_STEP_LIMIT: usize = 100_000;

    pub fn new(func: &'f Function) -> Self {
        Self {
            func,
            intrinsics: HashMap::new(),
            step_limit: Self::DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_intrinsic(mut self, name: &str, f: Intrinsic) -> Self {
        self.intrinsics.insert(name.to_string(), f);
        self
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Run the function and return the value passed to `ret`.
    pub fn run(&self, args: &[f64]) -> CheckpointResult<f64> {
        let func = self.func;
        let params = func.params();
        if params.len() != args.len() {
            return Err(fail(format!(
                "{} expects {} argument(s), got {}",
                func.name(),
                params.len(),
                args.len()
            )));
        }

        let mut values: HashMap<InstId, RtValue> = HashMap::new();
        for (&param, &arg) in params.iter().zip(args) {
            values.insert(param, RtValue::Float(arg));
        }
        let mut memory: Vec<RtValue> = Vec::new();

        let mut block = func.entry_block().ok_or_else(|| fail("function has no blocks"))?;
        let mut steps = 0usize;
        loop {
            let mut next = None;
            for &inst in func.block_insts(block) {
                steps += 1;
                if steps > self.step_limit {
                    return Err(fail(format!("step limit {} exceeded", self.step_limit)));
                }

                let data = func.inst(inst);
                let float = |i: usize| -> CheckpointResult<f64> {
                    match values.get(&data.operands[i]) {
                        Some(RtValue::Float(v)) => Ok(*v),
                        Some(other) => Err(fail(format!("{} expects a float, got {:?}", inst, other))),
                        None => Err(fail(format!("{} reads undefined value {}", inst, data.operands[i]))),
                    }
                };
                let pointer = |i: usize| -> CheckpointResult<(usize, usize, usize)> {
                    match values.get(&data.operands[i]) {
                        Some(RtValue::Ptr { base, offset, len }) => Ok((*base, *offset, *len)),
                        other => Err(fail(format!("{} expects a pointer, got {:?}", inst, other))),
                    }
                };

                let result = match data.op {
                    Opcode::Param => continue,
                    Opcode::Const => RtValue::Float(data.constant),
                    Opcode::Add => RtValue::Float(float(0)? + float(1)?),
                    Opcode::Sub => RtValue::Float(float(0)? - float(1)?),
                    Opcode::Mul => RtValue::Float(float(0)? * float(1)?),
                    Opcode::Div => RtValue::Float(float(0)? / float(1)?),
                    Opcode::Neg => RtValue::Float(-float(0)?),
                    Opcode::Sin => RtValue::Float(float(0)?.sin()),
                    Opcode::Cos => RtValue::Float(float(0)?.cos()),
                    Opcode::Exp => RtValue::Float(float(0)?.exp()),
                    Opcode::Log => RtValue::Float(float(0)?.ln()),
                    Opcode::Call => {
                        let callee = data.callee.as_deref().unwrap_or("");
                        let f = self
                            .intrinsics
                            .get(callee)
                            .ok_or_else(|| fail(format!("unknown callee @{}", callee)))?;
                        let args = (0..data.operands.len())
                            .map(&float)
                            .collect::<CheckpointResult<Vec<_>>>()?;
                        RtValue::Float(f(&args))
                    }
                    Opcode::Var | Opcode::Array => {
                        let len = if data.op == Opcode::Var { 1 } else { data.extent as usize };
                        let base = memory.len();
                        memory.resize(base + len, RtValue::Float(0.0));
                        RtValue::Ptr { base, offset: 0, len }
                    }
                    Opcode::ElemAddr => {
                        let (base, offset, len) = pointer(0)?;
                        let index = float(1)?;
                        if index < 0.0 || index.fract() != 0.0 || offset + index as usize >= len {
                            return Err(fail(format!("{} index {} out of bounds ({})", inst, index, len)));
                        }
                        RtValue::Ptr { base, offset: offset + index as usize, len }
                    }
                    Opcode::Load => {
                        let (base, offset, _) = pointer(0)?;
                        memory[base + offset]
                    }
                    Opcode::Store => {
                        let (base, offset, _) = pointer(0)?;
                        let stored = values
                            .get(&data.operands[1])
                            .copied()
                            .ok_or_else(|| fail(format!("{} stores undefined value {}", inst, data.operands[1])))?;
                        memory[base + offset] = stored;
                        RtValue::Void
                    }
                    Opcode::Br => {
                        next = Some(data.targets[0]);
                        break;
                    }
                    Opcode::CondBr => {
                        let taken = if float(0)? != 0.0 { 0 } else { 1 };
                        next = Some(data.targets[taken]);
                        break;
                    }
                    Opcode::Ret => return float(0),
                };
                values.insert(inst, result);
            }

            block = next.ok_or_else(|| fail(format!("block {} fell through", block)))?;
        }
    }
}

/// Evaluate `func` on `args` with no intrinsics registered.
pub fn evaluate(func: &Function, args: &[f64]) -> CheckpointResult<f64> {
    Evaluator::new(func).run(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_straight_line() {
        let func = Function::parse(
            r#"
f(%x, %y) {
entry:
  br ^body
body:
  %a = mul %x, %y
  %b = sin %a
  %c = add %b, %x
  ret %c
}
"#,
        )
        .unwrap();
        let result = evaluate(&func, &[0.5, 2.0]).unwrap();
        assert_eq!(result, (1.0f64).sin() + 0.5);
    }

    #[test]
    fn test_evaluate_loop_with_memory() {
        let func = Function::parse(
            r#"
count(%n) {
entry:
  %i = var
  %buf = array 4
  %zero = const 0
  %one = const 1
  store %i, %zero
  br ^loop
loop:
  %iv = load %i
  %slot = elemaddr %buf, %iv
  store %slot, %iv
  %next = add %iv, %one
  store %i, %next
  %left = sub %n, %next
  condbr %left, ^loop, ^done
done:
  %three = const 3
  %last = elemaddr %buf, %three
  %r = load %last
  ret %r
}
"#,
        )
        .unwrap();
        assert_eq!(evaluate(&func, &[4.0]).unwrap(), 3.0);
        assert!(evaluate(&func, &[6.0]).is_err());
    }

    #[test]
    fn test_evaluate_intrinsic_and_limits() {
        let func = Function::parse(
            r#"
g(%x) {
entry:
  %r = call @twice %x
  ret %r
}
"#,
        )
        .unwrap();
        assert!(evaluate(&func, &[1.0]).is_err());
        let r = Evaluator::new(&func)
            .with_intrinsic("twice", |args| args[0] * 2.0)
            .run(&[1.5])
            .unwrap();
        assert_eq!(r, 3.0);

        let spin = Function::parse("spin() {\nentry:\n  br ^entry\n}").unwrap();
        assert!(Evaluator::new(&spin).with_step_limit(10).run(&[]).is_err());
    }
}
