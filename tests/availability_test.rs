use adhoist::autodiff::{
    checkpoint_split_function, ensure_primal_availability, BlockSplitInfo, CheckpointClassifier,
    DefaultCheckpointPolicy, HoistMode, HoistResult, IndexTrackingInfo, IndexedBlockInfo,
};
use adhoist::core::{CheckpointError, CheckpointSession, CostModel};
use adhoist::ir::{evaluate, Function, Opcode, Use};
use bumpalo::Bump;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Three primal iterations (i = 0, 1, 2) followed by a differential loop
// that walks them backwards (j = 2, 1, 0) and reads w and u, both defined
// in the primal loop body.
const LOOPY: &str = r#"
f(%x) {
entry:
  %ivar = var
  %jvar = var
  %wvar = var
  %acc = var
  %zero = const 0
  %one = const 1
  %two = const 2
  %three = const 3
  store %ivar, %zero
  store %acc, %zero
  store %wvar, %x
  br ^pre
pre:
  %s = mul %x, %x
  %k = load %wvar
  br ^loop
loop:
  %i = load %ivar
  %w = load %wvar
  %u = mul %x, %i
  %w2 = mul %w, %two
  store %wvar, %w2
  %i2 = add %i, %one
  store %ivar, %i2
  %left = sub %three, %i2
  condbr %left, ^loop, ^dinit
dinit !diff:
  store %jvar, %two
  br ^dloop
dloop !diff:
  %j = load %jvar
  %dt = cos %w
  %du = sin %u
  %a0 = load %acc
  %a1 = add %a0, %dt
  %a2 = add %a1, %du
  store %acc, %a2
  %j2 = sub %j, %one
  store %jvar, %j2
  condbr %j, ^dloop, ^done
done !diff:
  %r = load %acc
  %ds = cos %s
  %dk = mul %ds, %k
  %out = add %r, %dk
  ret %out
}
"#;

/// Result when every differential iteration sees its own primal iteration.
fn per_iteration(x: f64) -> f64 {
    let mut acc = 0.0;
    for j in [2i32, 1, 0] {
        acc += (x * 2f64.powi(j)).cos();
        acc += (x * f64::from(j)).sin();
    }
    acc + (x * x).cos() * x
}

struct Fixture {
    func: Function,
    split: BlockSplitInfo,
    indexed: IndexedBlockInfo,
}

fn fixture(with_diff_counter: bool) -> Fixture {
    let func = Function::parse(LOOPY).unwrap();
    let block = |name| func.find_block(name).unwrap();

    let mut split = BlockSplitInfo::new();
    split.insert(block("pre"), block("done"));
    split.insert(block("loop"), block("dloop"));

    let i = func.find_inst("i").unwrap();
    let j = func.find_inst("j").unwrap();
    let mut indexed = IndexedBlockInfo::new();
    indexed.insert(
        block("loop"),
        vec![IndexTrackingInfo::new(i, with_diff_counter.then_some(j), 3)],
    );

    Fixture { func, split, indexed }
}

#[test]
fn test_scalar_checkpoint_keeps_last_iteration() {
    init();
    let arena = Bump::new();
    let session = CheckpointSession::new(&arena);
    let Fixture { mut func, split, .. } = fixture(true);
    let before = evaluate(&func, &[0.4]).unwrap();

    let mut classifier = CheckpointClassifier::new(DefaultCheckpointPolicy::new(&session, CostModel::default()));
    let hoisted = classifier.process_func(&mut func, &split, &session).unwrap();

    let w = func.find_inst("w").unwrap();
    let u = func.find_inst("u").unwrap();
    let i = func.find_inst("i").unwrap();
    assert_eq!(hoisted.mode_of(w), Some(HoistMode::Store));
    assert_eq!(hoisted.mode_of(u), Some(HoistMode::Recompute));
    assert_eq!(hoisted.mode_of(i), Some(HoistMode::Store));

    // Scalar slots reproduce the fused semantics exactly, last iteration only.
    assert_eq!(evaluate(&func, &[0.4]).unwrap(), before);
    assert!((before - per_iteration(0.4)).abs() > 1e-3);
}

#[test]
fn test_loop_values_become_per_iteration() {
    init();
    let arena = Bump::new();
    let session = CheckpointSession::new(&arena);
    let Fixture {
        mut func,
        split,
        indexed,
    } = fixture(true);

    let i = func.find_inst("i").unwrap();
    let j = func.find_inst("j").unwrap();
    let w = func.find_inst("w").unwrap();
    let u = func.find_inst("u").unwrap();

    let mut classifier = CheckpointClassifier::new(DefaultCheckpointPolicy::new(&session, CostModel::default()));
    let hoisted = checkpoint_split_function(&mut func, &split, &mut classifier, &indexed, &session).unwrap();

    // The primal counter is replaced by the differential one.
    assert!(!hoisted.contains(i));
    assert_eq!(hoisted.materialized.get(&i), Some(&j));
    assert!(func.find_inst("i_slot").is_none());
    let u_copy = hoisted.materialized[&u];
    assert_eq!(func.operand(u_copy, 1), j);
    assert_eq!(hoisted.mode_of(u), Some(HoistMode::Recompute));

    // w lives in an array written in the loop and read at j.
    assert_eq!(hoisted.mode_of(w), Some(HoistMode::Store));
    assert!(func.find_inst("w_slot").is_none());
    let array = func.find_inst("w_array").unwrap();
    assert_eq!(func.opcode(array), Opcode::Array);
    assert_eq!(func.inst(array).extent, 3);
    assert_eq!(func.block_of(array), func.entry_block());

    let read = hoisted.materialized[&w];
    assert_eq!(func.opcode(read), Opcode::Load);
    let addr = func.operand(read, 0);
    assert_eq!(func.opcode(addr), Opcode::ElemAddr);
    assert_eq!(func.operands(addr), &[array, j]);
    assert_eq!(func.operand(func.find_inst("dt").unwrap(), 0), read);

    assert!(hoisted.is_disjoint());
    assert_eq!(session.stats().array_upgrades, 1);

    let after = evaluate(&func, &[0.4]).unwrap();
    assert!((after - per_iteration(0.4)).abs() < 1e-12);
}

#[test]
fn test_stateful_recompute_is_upgraded() {
    init();
    let arena = Bump::new();
    let session = CheckpointSession::new(&arena);
    let Fixture {
        mut func,
        split,
        indexed,
    } = fixture(true);

    let w = func.find_inst("w").unwrap();
    let dt = func.find_inst("dt").unwrap();

    let mut classifier = CheckpointClassifier::new(DefaultCheckpointPolicy::new(&session, CostModel::default()));
    classifier.add_override(Use::new(dt, 0), HoistResult::recompute(w));
    let checkpointed = classifier.process_func(&mut func, &split, &session).unwrap();
    assert_eq!(checkpointed.mode_of(w), Some(HoistMode::Recompute));

    let hoisted = ensure_primal_availability(&checkpointed, &mut func, &indexed, &session).unwrap();
    assert_eq!(hoisted.mode_of(w), Some(HoistMode::Store));
    assert!(!hoisted.recompute_set.contains(&w));
    assert!(func.find_inst("w_array").is_some());

    let after = evaluate(&func, &[0.4]).unwrap();
    assert!((after - per_iteration(0.4)).abs() < 1e-12);
}

#[test]
fn test_values_outside_loops_are_untouched() {
    init();
    let arena = Bump::new();
    let session = CheckpointSession::new(&arena);

    let Fixture {
        mut func,
        split,
        indexed,
    } = fixture(true);
    let k = func.find_inst("k").unwrap();
    let mut classifier = CheckpointClassifier::new(DefaultCheckpointPolicy::new(&session, CostModel::default()));
    let hoisted = checkpoint_split_function(&mut func, &split, &mut classifier, &indexed, &session).unwrap();

    // k keeps its scalar slot.
    assert_eq!(hoisted.mode_of(k), Some(HoistMode::Store));
    let read = hoisted.materialized[&k];
    assert_eq!(func.opcode(read), Opcode::Load);
    let slot = func.operand(read, 0);
    assert_eq!(func.opcode(slot), Opcode::Var);
    assert_eq!(func.name_hint(slot), Some("k_slot"));

    // Even a stateful recompute stays as decided outside indexed blocks.
    let Fixture {
        mut func,
        split,
        indexed,
    } = fixture(true);
    let k = func.find_inst("k").unwrap();
    let dk = func.find_inst("dk").unwrap();
    let mut classifier = CheckpointClassifier::new(DefaultCheckpointPolicy::new(&session, CostModel::default()));
    classifier.add_override(Use::new(dk, 1), HoistResult::recompute(k));
    let hoisted = checkpoint_split_function(&mut func, &split, &mut classifier, &indexed, &session).unwrap();
    assert!(hoisted.recompute_set.contains(&k));
}

#[test]
fn test_missing_diff_counter() {
    init();
    let arena = Bump::new();
    let session = CheckpointSession::new(&arena);
    let Fixture {
        mut func,
        split,
        indexed,
    } = fixture(false);
    let lp = func.find_block("loop").unwrap();

    let mut classifier = CheckpointClassifier::new(DefaultCheckpointPolicy::new(&session, CostModel::default()));
    let err = checkpoint_split_function(&mut func, &split, &mut classifier, &indexed, &session).unwrap_err();
    assert_eq!(err, CheckpointError::MissingDiffCounter { block: lp });
}
