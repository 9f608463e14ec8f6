use adhoist::autodiff::OutOfOrderCloneContext;
use adhoist::ir::{Function, InsertPoint, InstId, Use};
use hashbrown::HashMap;

const DAG: &str = r#"
dag(%x) {
entry:
  %a = sin %x
  %b = mul %a, %x
  %c = add %b, %a
  %d = mul %c, %b
  br ^out
out:
  ret %x
}
"#;

fn permutations(items: &[InstId]) -> Vec<Vec<InstId>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut result = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            result.push(tail);
        }
    }
    result
}

#[test]
fn test_any_clone_order_resolves_every_use() {
    let _ = env_logger::builder().is_test(true).try_init();

    let template = Function::parse(DAG).unwrap();
    let names = ["a", "b", "c", "d"];
    let originals: Vec<InstId> = names.iter().map(|n| template.find_inst(n).unwrap()).collect();
    let orders = permutations(&originals);
    assert_eq!(orders.len(), 24);

    for order in orders {
        let mut func = template.clone();
        let x = func.find_inst("x").unwrap();
        let out = func.find_block("out").unwrap();
        let ret = func.terminator(out).unwrap();

        let mut ctx = OutOfOrderCloneContext::new();
        ctx.register_clone(&mut func, x, x);

        let mut clones: HashMap<InstId, InstId> = HashMap::new();
        for &inst in &order {
            let cloned = ctx.clone_inst_out_of_order(&mut func, InsertPoint::Before(ret), inst);
            clones.insert(inst, cloned);

            // Operands whose clone exists are already rewritten.
            for (slot, &operand) in func.operands(inst).iter().enumerate() {
                let edge = Use::new(cloned, slot as u32);
                match clones.get(&operand) {
                    Some(&c) => assert_eq!(func.operand(cloned, slot as u32), c),
                    None if operand == x => assert_eq!(func.operand(cloned, slot as u32), x),
                    None => assert!(ctx.is_pending_on(operand, edge)),
                }
            }
        }

        assert_eq!(ctx.pending_count(), 0, "order {:?}", order);
        for (&original, &cloned) in &clones {
            let expected: Vec<InstId> = func
                .operands(original)
                .iter()
                .map(|o| clones.get(o).copied().unwrap_or(*o))
                .collect();
            assert_eq!(func.operands(cloned), expected.as_slice(), "order {:?}", order);
            assert!(func.operands(cloned).iter().all(|o| !originals.contains(o)));
        }
    }
}

#[test]
fn test_pending_use_resolved_once() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut func = Function::parse(DAG).unwrap();
    let out = func.find_block("out").unwrap();
    let ret = func.terminator(out).unwrap();
    let a = func.find_inst("a").unwrap();
    let b = func.find_inst("b").unwrap();
    let x = func.find_inst("x").unwrap();

    let mut ctx = OutOfOrderCloneContext::new();
    let b2 = ctx.clone_inst_out_of_order(&mut func, InsertPoint::Before(ret), b);
    assert_eq!(ctx.pending_count(), 2);

    // First registration of a resolves b2's slot 0; later ones find nothing.
    let a2 = ctx.clone_inst_out_of_order(&mut func, InsertPoint::Before(b2), a);
    assert_eq!(func.operand(b2, 0), a2);
    assert!(!ctx.is_pending(Use::new(b2, 0)));
    assert_eq!(ctx.register_clone(&mut func, a, a2), 0);

    // a2 itself waits on x like b2 does.
    assert!(ctx.is_pending_on(x, Use::new(a2, 0)));
    assert!(ctx.is_pending_on(x, Use::new(b2, 1)));
    assert_eq!(ctx.register_clone(&mut func, x, x), 2);
    assert_eq!(ctx.pending_count(), 0);
}
