//! The loop hierarchy.
//!
//! Every backward jump confirmed as a true loop contributes one [`Loop`]
//! bounded by its `[target, jump]` address interval; nesting is derived
//! from interval containment and forms a forest rooted at the one outermost
//! loop of the synthesis window.

use crate::cfg::InstrId;

/// Index of a loop in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(u32);

impl LoopId {
    /// Raw index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One loop of the hierarchy.
#[derive(Debug, Clone)]
pub struct Loop {
    /// Address of the first instruction of the loop body.
    pub start: i32,
    /// Address of the backward jump closing the loop.
    pub stop: i32,
    /// The conditional deciding loop exit.
    pub controller: InstrId,
    /// Enclosing loop.
    pub parent: Option<LoopId>,
    /// Directly contained loops.
    pub children: Vec<LoopId>,
}

impl Loop {
    /// True when `addr` lies inside the half-open interval `[start, stop)`.
    #[must_use]
    pub fn contains(&self, addr: i32) -> bool {
        addr >= self.start && addr < self.stop
    }

    /// True for loops without contained loops.
    #[must_use]
    pub fn innermost(&self) -> bool {
        self.children.is_empty()
    }
}

/// Forest of properly nested loops.
#[derive(Debug, Default)]
pub struct LoopTree {
    loops: Vec<Loop>,
}

impl LoopTree {
    /// Creates an empty forest.
    #[must_use]
    pub fn new() -> Self {
        LoopTree::default()
    }

    /// Inserts a loop, maintaining containment nesting.
    ///
    /// The tightest existing enclosing interval becomes the parent; existing
    /// loops fully inside the new interval are adopted as children.
    pub fn insert(&mut self, start: i32, stop: i32, controller: InstrId) -> LoopId {
        let id = LoopId(self.loops.len() as u32);

        let parent = self
            .loops
            .iter()
            .enumerate()
            .filter(|(_, l)| l.start <= start && l.stop >= stop)
            .max_by_key(|(_, l)| l.start)
            .map(|(i, _)| LoopId(i as u32));

        let adopted: Vec<LoopId> = self
            .loops
            .iter()
            .enumerate()
            .filter(|(i, l)| {
                l.start >= start
                    && l.stop <= stop
                    && self.tighter(LoopId(*i as u32), start, stop)
            })
            .map(|(i, _)| LoopId(i as u32))
            .collect();

        for &child in &adopted {
            if let Some(old_parent) = self.loops[child.index()].parent {
                self.loops[old_parent.index()].children.retain(|&c| c != child);
            }
            self.loops[child.index()].parent = Some(id);
        }
        if let Some(p) = parent {
            self.loops[p.index()].children.push(id);
        }

        self.loops.push(Loop {
            start,
            stop,
            controller,
            parent,
            children: adopted,
        });
        id
    }

    /// True when the new interval `[start, stop]` is a tighter enclosure of
    /// `child` than the child's current parent.
    fn tighter(&self, child: LoopId, start: i32, stop: i32) -> bool {
        match self.loops[child.index()].parent {
            None => true,
            Some(p) => {
                let parent = &self.loops[p.index()];
                parent.start <= start && parent.stop >= stop
            }
        }
    }

    /// Shared access to a loop.
    #[must_use]
    pub fn get(&self, id: LoopId) -> &Loop {
        &self.loops[id.index()]
    }

    /// Number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// True when no loop was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// All loop ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = LoopId> {
        (0..self.loops.len() as u32).map(LoopId)
    }

    /// Roots of the forest, leftmost first.
    pub fn roots(&self) -> impl Iterator<Item = LoopId> + '_ {
        let mut roots: Vec<LoopId> = self
            .ids()
            .filter(|id| self.loops[id.index()].parent.is_none())
            .collect();
        roots.sort_by_key(|id| self.loops[id.index()].start);
        roots.into_iter()
    }

    /// The outermost loop of the window.
    #[must_use]
    pub fn outermost(&self) -> Option<LoopId> {
        self.roots().next()
    }

    /// The innermost loop containing `addr`, found by descending from the
    /// roots while a child interval still contains the address.
    #[must_use]
    pub fn loop_of(&self, addr: i32) -> Option<LoopId> {
        let mut current = self
            .roots()
            .find(|&id| self.loops[id.index()].contains(addr))?;
        loop {
            let next = self.loops[current.index()]
                .children
                .iter()
                .copied()
                .find(|&c| self.loops[c.index()].contains(addr));
            match next {
                Some(c) => current = c,
                None => return Some(current),
            }
        }
    }

    /// True when `addr` lies inside `lp`. An untracked address (outside
    /// every loop) is treated as the whole window.
    #[must_use]
    pub fn contains_addr(&self, lp: Option<LoopId>, addr: i32) -> bool {
        match lp {
            Some(lp) => self.get(lp).contains(addr),
            None => true,
        }
    }

    /// True when both addresses resolve to the same innermost loop.
    #[must_use]
    pub fn same_loop(&self, a: i32, b: i32) -> bool {
        self.loop_of(a) == self.loop_of(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;
    use crate::cfg::{InstrGraph, Instruction};

    fn controller(g: &mut InstrGraph) -> InstrId {
        g.fresh(Instruction::new(Opcode::IfIcmpge, 0))
    }

    #[test]
    fn test_nesting_by_containment() {
        let mut g = InstrGraph::new();
        let c = controller(&mut g);
        let mut tree = LoopTree::new();
        let outer = tree.insert(0, 100, c);
        let inner = tree.insert(10, 50, c);
        assert_eq!(tree.get(inner).parent, Some(outer));
        assert_eq!(tree.get(outer).children, vec![inner]);
        assert_eq!(tree.outermost(), Some(outer));
    }

    #[test]
    fn test_insertion_order_independent() {
        let mut g = InstrGraph::new();
        let c = controller(&mut g);
        let mut tree = LoopTree::new();
        let inner = tree.insert(10, 50, c);
        let outer = tree.insert(0, 100, c);
        assert_eq!(tree.get(inner).parent, Some(outer));
        assert_eq!(tree.get(outer).children, vec![inner]);
    }

    #[test]
    fn test_loop_of_descends_to_innermost() {
        let mut g = InstrGraph::new();
        let c = controller(&mut g);
        let mut tree = LoopTree::new();
        let outer = tree.insert(0, 100, c);
        let inner = tree.insert(10, 50, c);
        assert_eq!(tree.loop_of(20), Some(inner));
        assert_eq!(tree.loop_of(60), Some(outer));
        assert_eq!(tree.loop_of(120), None);
    }

    #[test]
    fn test_proper_nesting_no_partial_overlap() {
        let mut g = InstrGraph::new();
        let c = controller(&mut g);
        let mut tree = LoopTree::new();
        tree.insert(0, 100, c);
        tree.insert(10, 50, c);
        tree.insert(60, 90, c);
        for a in tree.ids() {
            for b in tree.ids() {
                if a == b {
                    continue;
                }
                let (la, lb) = (tree.get(a), tree.get(b));
                let disjoint = la.stop <= lb.start || lb.stop <= la.start;
                let contained = (la.start <= lb.start && la.stop >= lb.stop)
                    || (lb.start <= la.start && lb.stop >= la.stop);
                assert!(disjoint || contained);
            }
        }
    }
}
