//! Control-flow graph arena.
//!
//! Basic blocks reference each other by dense index into a single vector,
//! so the cyclic successor/predecessor/dominator structure needs no
//! pointers. Symmetric edges are registered through one `add_edge`
//! primitive; there is no way to grow only half an edge. Dominator and
//! dominance-frontier computation run after construction and annotate the
//! blocks in place.

use crate::ssa::{Phi, SsaInstr};

/// Dense index of a block in the arena.
pub type BlockId = usize;

/// One basic block: straight-line SSA instructions with a terminator,
/// phi nodes at the top, and the graph/dominator annotations.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Diagnostic name ("entry", "while.header", ...).
    pub label: String,
    /// Phi nodes; only ever present at control-flow join points.
    pub phis: Vec<Phi>,
    /// Instructions in order; the last is the terminator once sealed.
    pub instrs: Vec<SsaInstr>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
    /// Immediate dominator; `None` for the entry and unreachable blocks.
    pub idom: Option<BlockId>,
    pub dom_frontier: Vec<BlockId>,
}

impl BasicBlock {
    /// The terminator, if the block has been sealed with one.
    pub fn terminator(&self) -> Option<&SsaInstr> {
        self.instrs.last().filter(|i| i.is_terminator())
    }
}

/// The block arena with distinguished entry and exit blocks.
#[derive(Debug, Clone, Default)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    pub exit: BlockId,
}

impl Cfg {
    /// Appends an empty block and returns its id.
    pub fn add_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock {
            id,
            label: label.into(),
            ..Default::default()
        });
        id
    }

    /// Registers the edge `from -> to` on both endpoints.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from].succs.contains(&to) {
            self.blocks[from].succs.push(to);
        }
        if !self.blocks[to].preds.contains(&from) {
            self.blocks[to].preds.push(from);
        }
    }

    /// Blocks reachable from the entry, in reverse postorder.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut order = Vec::with_capacity(self.blocks.len());
        self.postorder_visit(self.entry, &mut visited, &mut order);
        order.reverse();
        order
    }

    fn postorder_visit(&self, id: BlockId, visited: &mut [bool], order: &mut Vec<BlockId>) {
        if visited[id] {
            return;
        }
        visited[id] = true;
        for &succ in &self.blocks[id].succs {
            self.postorder_visit(succ, visited, order);
        }
        order.push(id);
    }

    /// Computes immediate dominators by the iterative intersection
    /// algorithm over reverse postorder.
    pub fn compute_dominators(&mut self) {
        let rpo = self.reverse_postorder();
        let mut rpo_index = vec![usize::MAX; self.blocks.len()];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_index[b] = i;
        }

        for block in &mut self.blocks {
            block.idom = None;
        }
        self.blocks[self.entry].idom = Some(self.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom = None;
                for &p in &self.blocks[b].preds {
                    if self.blocks[p].idom.is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => self.intersect(p, cur, &rpo_index),
                    });
                }
                if let Some(idom) = new_idom {
                    if self.blocks[b].idom != Some(idom) {
                        self.blocks[b].idom = Some(idom);
                        changed = true;
                    }
                }
            }
        }

        // The entry dominates itself only implicitly; report None outward.
        self.blocks[self.entry].idom = None;
    }

    // Standard two-finger walk: climb the idom chain of whichever node is
    // later in reverse postorder until the fingers meet. Only nodes that
    // already carry an idom are walked, so the chain always reaches the
    // entry (whose idom is itself during computation).
    fn intersect(&self, mut a: BlockId, mut b: BlockId, rpo_index: &[usize]) -> BlockId {
        while a != b {
            while rpo_index[a] > rpo_index[b] {
                a = self.blocks[a].idom.expect("processed block without idom");
            }
            while rpo_index[b] > rpo_index[a] {
                b = self.blocks[b].idom.expect("processed block without idom");
            }
        }
        a
    }

    /// Computes dominance frontiers; requires dominators first.
    pub fn compute_dominance_frontiers(&mut self) {
        for block in &mut self.blocks {
            block.dom_frontier.clear();
        }
        let ids: Vec<BlockId> = (0..self.blocks.len()).collect();
        for &b in &ids {
            if self.blocks[b].preds.len() < 2 {
                continue;
            }
            let Some(idom_b) = self.blocks[b].idom else {
                continue;
            };
            for i in 0..self.blocks[b].preds.len() {
                let mut runner = self.blocks[b].preds[i];
                while runner != idom_b {
                    if !self.blocks[runner].dom_frontier.contains(&b) {
                        self.blocks[runner].dom_frontier.push(b);
                    }
                    runner = match self.blocks[runner].idom {
                        Some(d) => d,
                        None => break,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// entry -> {then, else} -> merge (a diamond).
    fn diamond() -> Cfg {
        let mut cfg = Cfg::default();
        let entry = cfg.add_block("entry");
        let then_b = cfg.add_block("then");
        let else_b = cfg.add_block("else");
        let merge = cfg.add_block("merge");
        cfg.entry = entry;
        cfg.exit = merge;
        cfg.add_edge(entry, then_b);
        cfg.add_edge(entry, else_b);
        cfg.add_edge(then_b, merge);
        cfg.add_edge(else_b, merge);
        cfg
    }

    #[test]
    fn edges_are_symmetric() {
        let cfg = diamond();
        assert_eq!(cfg.blocks[0].succs, vec![1, 2]);
        assert_eq!(cfg.blocks[3].preds, vec![1, 2]);
    }

    #[test]
    fn diamond_dominators() {
        let mut cfg = diamond();
        cfg.compute_dominators();
        assert_eq!(cfg.blocks[0].idom, None);
        assert_eq!(cfg.blocks[1].idom, Some(0));
        assert_eq!(cfg.blocks[2].idom, Some(0));
        // The merge is dominated by the entry, not either arm.
        assert_eq!(cfg.blocks[3].idom, Some(0));
    }

    #[test]
    fn diamond_frontiers() {
        let mut cfg = diamond();
        cfg.compute_dominators();
        cfg.compute_dominance_frontiers();
        assert_eq!(cfg.blocks[1].dom_frontier, vec![3]);
        assert_eq!(cfg.blocks[2].dom_frontier, vec![3]);
        assert!(cfg.blocks[0].dom_frontier.is_empty());
    }
}
