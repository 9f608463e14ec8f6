// This module computes the dominator tree the default checkpoint policy consults before it
// agrees to recompute a value on the differential side. It walks the function's blocks from
// the entry in reverse post-order (iterative depth-first search, the same traversal used for
// block layout), builds predecessor lists, and runs the iterative intersection algorithm of
// Cooper, Harvey and Kennedy until the immediate-dominator array stops changing. The
// resulting arrays are copied into the session arena, so a tree lives exactly as long as
// the pass that asked for it. Unreachable blocks are dominated by nothing and dominate
// nothing. Instruction-level dominance falls back to block order inside a single block.

//! Dominator tree over a function's block layout.

use super::session::CheckpointSession;
use crate::ir::{BlockId, Function, InstId};
use hashbrown::HashSet;

const UNREACHABLE: u32 = u32::MAX;

/// Immediate dominators and reverse post-order numbering for one function.
#[derive(Debug, Clone, Copy)]
pub struct DominatorTree<'arena> {
    order: &'arena [BlockId],
    rpo_number: &'arena [u32],
    idom: &'arena [u32],
}

impl<'arena> DominatorTree<'arena> {
    /// Build the tree for `func`, allocating its arrays in the session arena.
    pub fn compute(session: &CheckpointSession<'arena>, func: &Function) -> Self {
        let block_count = func
            .layout()
            .iter()
            .map(|b| b.index() + 1)
            .max()
            .unwrap_or(0);

        // -------- build RPO order ---------
        let mut post = Vec::new();
        if let Some(entry) = func.entry_block() {
            let mut stack = vec![(entry, false)];
            let mut visited = HashSet::new();
            while let Some((block, processed)) = stack.pop() {
                if processed {
                    post.push(block);
                    continue;
                }
                if !visited.insert(block) {
                    continue;
                }
                stack.push((block, true));
                for succ in func.successors(block).into_iter().rev() {
                    if !visited.contains(&succ) {
                        stack.push((succ, false));
                    }
                }
            }
        }
        post.reverse();
        let order = post;

        let mut rpo_number = vec![UNREACHABLE; block_count];
        for (idx, block) in order.iter().enumerate() {
            rpo_number[block.index()] = idx as u32;
        }

        let mut preds: Vec<Vec<u32>> = vec![Vec::new(); block_count];
        for &block in &order {
            for succ in func.successors(block) {
                if succ.index() < block_count {
                    preds[succ.index()].push(block.0);
                }
            }
        }

        // -------- iterate to a fixed point ---------
        let mut idom = vec![UNREACHABLE; block_count];
        if let Some(&entry) = order.first() {
            idom[entry.index()] = entry.0;
        }
        let mut changed = true;
        while changed {
            changed = false;
            for &block in order.iter().skip(1) {
                let mut new_idom = UNREACHABLE;
                for &pred in &preds[block.index()] {
                    if idom[pred as usize] == UNREACHABLE {
                        continue;
                    }
                    new_idom = if new_idom == UNREACHABLE {
                        pred
                    } else {
                        intersect(&idom, &rpo_number, pred, new_idom)
                    };
                }
                if new_idom != UNREACHABLE && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }

        log::trace!(
            "dominator tree for {}: {} reachable of {} blocks",
            func.name(),
            order.len(),
            func.layout().len()
        );

        Self {
            order: session.alloc_slice(&order),
            rpo_number: session.alloc_slice(&rpo_number),
            idom: session.alloc_slice(&idom),
        }
    }

    /// Reachable blocks in reverse post-order.
    pub fn reverse_post_order(&self) -> &'arena [BlockId] {
        self.order
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_number
            .get(block.index())
            .map_or(false, |&n| n != UNREACHABLE)
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        if !self.is_reachable(block) {
            return None;
        }
        let idom = self.idom[block.index()];
        (idom != block.0).then_some(BlockId(idom))
    }

    /// Whether every path from the entry to `b` passes through `a` (reflexive).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let target = self.rpo_number[a.index()];
        let mut cur = b.0;
        while self.rpo_number[cur as usize] > target {
            cur = self.idom[cur as usize];
        }
        cur == a.0
    }

    /// Whether `a` executes before `b` on every path reaching `b`.
    pub fn inst_dominates(&self, func: &Function, a: InstId, b: InstId) -> bool {
        let (Some(block_a), Some(block_b)) = (func.block_of(a), func.block_of(b)) else {
            return false;
        };
        if block_a == block_b {
            return func.position(a) < func.position(b);
        }
        self.dominates(block_a, block_b)
    }
}

fn intersect(idom: &[u32], rpo_number: &[u32], mut a: u32, mut b: u32) -> u32 {
    while a != b {
        while rpo_number[a as usize] > rpo_number[b as usize] {
            a = idom[a as usize];
        }
        while rpo_number[b as usize] > rpo_number[a as usize] {
            b = idom[b as usize];
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::with_test_context;

    const DIAMOND: &str = r#"
d(%c) {
entry:
  br ^head
head:
  condbr %c, ^left, ^right
left:
  br ^join
right:
  br ^join
join:
  condbr %c, ^head, ^exit
exit:
  ret %c
dead:
  br ^join
}
"#;

    #[test]
    fn test_diamond_with_back_edge() {
        let func = Function::parse(DIAMOND).unwrap();
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let tree = DominatorTree::compute(&session, &func);
            let b = |name| func.find_block(name).unwrap();

            assert_eq!(tree.reverse_post_order()[0], b("entry"));
            assert_eq!(tree.immediate_dominator(b("entry")), None);
            assert_eq!(tree.immediate_dominator(b("head")), Some(b("entry")));
            assert_eq!(tree.immediate_dominator(b("join")), Some(b("head")));
            assert_eq!(tree.immediate_dominator(b("exit")), Some(b("join")));

            assert!(tree.dominates(b("head"), b("left")));
            assert!(!tree.dominates(b("left"), b("join")));
            assert!(tree.dominates(b("join"), b("join")));

            assert!(!tree.is_reachable(b("dead")));
            assert!(!tree.dominates(b("dead"), b("join")));
            assert!(ctx.memory_used() > 0);
        });
    }

    #[test]
    fn test_inst_dominance_in_block() {
        let func = Function::parse(
            "f(%x) {\nentry:\n  %a = sin %x\n  %b = cos %a\n  ret %b\n}",
        )
        .unwrap();
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let tree = DominatorTree::compute(&session, &func);
            let a = func.find_inst("a").unwrap();
            let b = func.find_inst("b").unwrap();
            assert!(tree.inst_dominates(&func, a, b));
            assert!(!tree.inst_dominates(&func, b, a));
        });
    }
}
