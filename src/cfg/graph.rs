//! The restructured control-flow graph.
//!
//! Node insertion happens through the per-kind insert dispatch in
//! [`builder`](super::builder) and must not be done by hand; there is no way
//! to remove nodes other than the dedicated restructuring passes.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::bytecode::Opcode;
use crate::cfg::{InstrExt, InstrId, Instruction};

/// Control-flow graph over an instruction arena.
///
/// Two instructions with equal `(opcode, address)` are the same logical node
/// and intern to one arena entry on insertion, unless explicitly flagged as
/// duplicates. Confluences (nodes that accumulate more than one predecessor)
/// are recorded for the later branch-merging pass.
#[derive(Debug, Default)]
pub struct InstrGraph {
    arena: Vec<Instruction>,
    by_key: HashMap<(Opcode, i32), InstrId>,
    members: Vec<bool>,
    succ: HashMap<InstrId, Vec<InstrId>>,
    pred: HashMap<InstrId, Vec<InstrId>>,
    gotos: Vec<InstrId>,
    phis: Vec<InstrId>,
    merge_nodes: Vec<InstrId>,
}

impl InstrGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        InstrGraph::default()
    }

    /// Allocates a new arena node without inserting it into the graph.
    ///
    /// Off-graph nodes also serve as creators of synthetic data (argument
    /// spills, merge spill stores) that never join the control flow.
    pub fn fresh(&mut self, instr: Instruction) -> InstrId {
        let id = InstrId(self.arena.len() as u32);
        self.arena.push(instr);
        self.members.push(false);
        id
    }

    /// Shared access to a node.
    #[must_use]
    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.arena[id.index()]
    }

    /// Mutable access to a node.
    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.arena[id.index()]
    }

    /// Number of arena entries.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// True when the node is part of the graph.
    #[must_use]
    pub fn contains(&self, id: InstrId) -> bool {
        self.members[id.index()]
    }

    /// Resolves a node to the graph-resident entry with the same
    /// `(opcode, address)` identity, if one exists. Duplicates resolve to
    /// themselves.
    #[must_use]
    pub fn canonical(&self, id: InstrId) -> InstrId {
        let instr = self.instr(id);
        if instr.duplicate {
            return id;
        }
        self.by_key
            .get(&(instr.op, instr.addr))
            .copied()
            .unwrap_or(id)
    }

    fn enroll(&mut self, id: InstrId) -> InstrId {
        let id = self.canonical(id);
        if !self.members[id.index()] {
            self.members[id.index()] = true;
            let (op, addr, duplicate) = {
                let instr = self.instr(id);
                (instr.op, instr.addr, instr.duplicate)
            };
            if !duplicate {
                self.by_key.insert((op, addr), id);
            }
        }
        id
    }

    /// Inserts the traversal root.
    pub fn insert_root(&mut self, id: InstrId) -> InstrId {
        self.enroll(id)
    }

    /// Enrolls a node as a graph member without wiring an edge. Used by the
    /// restructuring passes for spliced merge nodes and duplicates.
    pub fn enroll_node(&mut self, id: InstrId) -> InstrId {
        self.enroll(id)
    }

    /// Inserts `id` connected after `pre`, interning by identity.
    ///
    /// Returns the graph-resident node, which need not be `id` when another
    /// instance of the same logical instruction was inserted before.
    pub fn insert(&mut self, pre: InstrId, id: InstrId) -> InstrId {
        let id = self.enroll(id);
        let pre = self.canonical(pre);
        self.add_edge(pre, id);
        id
    }

    /// Adds one control-flow edge without interning.
    pub fn add_edge(&mut self, from: InstrId, to: InstrId) {
        let succs = self.succ.entry(from).or_default();
        if !succs.contains(&to) {
            succs.push(to);
        }
        let preds = self.pred.entry(to).or_default();
        if !preds.contains(&from) {
            preds.push(from);
        }
        if preds.len() > 1 && !self.merge_nodes.contains(&to) {
            self.merge_nodes.push(to);
        }
    }

    /// Removes one control-flow edge.
    pub fn remove_edge(&mut self, from: InstrId, to: InstrId) {
        if let Some(succs) = self.succ.get_mut(&from) {
            succs.retain(|&s| s != to);
        }
        if let Some(preds) = self.pred.get_mut(&to) {
            preds.retain(|&p| p != from);
        }
    }

    /// Detaches a node from the graph entirely.
    pub fn remove_node(&mut self, id: InstrId) {
        for s in self.succ.remove(&id).unwrap_or_default() {
            if let Some(preds) = self.pred.get_mut(&s) {
                preds.retain(|&p| p != id);
            }
        }
        for p in self.pred.remove(&id).unwrap_or_default() {
            if let Some(succs) = self.succ.get_mut(&p) {
                succs.retain(|&s| s != id);
            }
        }
        self.members[id.index()] = false;
        self.gotos.retain(|&g| g != id);
    }

    /// Successors of a node.
    #[must_use]
    pub fn succs(&self, id: InstrId) -> &[InstrId] {
        self.succ.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Predecessors of a node.
    #[must_use]
    pub fn preds(&self, id: InstrId) -> &[InstrId] {
        self.pred.get(&id).map_or(&[], Vec::as_slice)
    }

    /// The single successor of a straight-line node.
    #[must_use]
    pub fn sole_succ(&self, id: InstrId) -> Option<InstrId> {
        match self.succs(id) {
            [s] => Some(*s),
            _ => None,
        }
    }

    /// Registers a goto for the restructuring pass.
    pub fn reg_goto(&mut self, id: InstrId) {
        if !self.gotos.contains(&id) {
            self.gotos.push(id);
        }
    }

    /// Registers a merge node for bookkeeping and later loop profiling.
    pub fn reg_phi(&mut self, id: InstrId) {
        if !self.phis.contains(&id) {
            self.phis.push(id);
        }
    }

    /// Registered gotos.
    #[must_use]
    pub fn gotos(&self) -> &[InstrId] {
        &self.gotos
    }

    /// Registered merge nodes.
    #[must_use]
    pub fn phis(&self) -> &[InstrId] {
        &self.phis
    }

    /// Confluence nodes accumulated during insertion, ordered by address.
    #[must_use]
    pub fn merge_candidates(&self) -> Vec<InstrId> {
        let mut nodes = self.merge_nodes.clone();
        nodes.sort_by_key(|&id| {
            let i = self.instr(id);
            (i.addr, i.op.byte().unwrap_or(0))
        });
        nodes
    }

    /// First graph-resident node at `addr`. Linear in the node count.
    #[must_use]
    pub fn by_addr(&self, addr: i32) -> Option<InstrId> {
        self.arena.iter().enumerate().find_map(|(idx, instr)| {
            let id = InstrId(idx as u32);
            (self.members[idx] && instr.addr == addr).then_some(id)
        })
    }

    /// All graph-resident node ids.
    pub fn members(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.members
            .iter()
            .enumerate()
            .filter_map(|(idx, &m)| m.then_some(InstrId(idx as u32)))
    }

    /// DOT rendering of the current graph, branch arms annotated.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph cfg {\n    node [shape=box, fontname=\"Courier\"];\n");
        for id in self.members() {
            let instr = self.instr(id);
            let dup = if instr.duplicate { "'" } else { "" };
            for &s in self.succs(id) {
                let succ = self.instr(s);
                let sdup = if succ.duplicate { "'" } else { "" };
                let _ = writeln!(
                    dot,
                    "    \"{}:{}{}\" -> \"{}:{}{}\";",
                    instr.addr, instr.op, dup, succ.addr, succ.op, sdup
                );
            }
        }
        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Instruction;

    #[test]
    fn test_insert_interns_by_identity() {
        let mut g = InstrGraph::new();
        let root = g.fresh(Instruction::new(Opcode::SynthStart, 0));
        g.insert_root(root);
        let a = g.fresh(Instruction::new(Opcode::Iload1, 4));
        let a = g.insert(root, a);
        let b = g.fresh(Instruction::new(Opcode::Iload1, 4));
        let b = g.insert(root, b);
        assert_eq!(a, b, "equal (opcode, address) interns to one node");
        assert_eq!(g.preds(a).len(), 1);
    }

    #[test]
    fn test_duplicates_bypass_interning() {
        let mut g = InstrGraph::new();
        let root = g.fresh(Instruction::new(Opcode::SynthStart, 0));
        g.insert_root(root);
        let a = g.fresh(Instruction::new(Opcode::Iadd, 4));
        let a = g.insert(root, a);
        let mut dup = Instruction::new(Opcode::Iadd, 4);
        dup.duplicate = true;
        let d = g.fresh(dup);
        let d = g.insert(root, d);
        assert_ne!(a, d, "duplicate gets its own arena entry");
    }

    #[test]
    fn test_merge_candidates_record_confluences() {
        let mut g = InstrGraph::new();
        let root = g.fresh(Instruction::new(Opcode::SynthStart, 0));
        g.insert_root(root);
        let a = g.fresh(Instruction::new(Opcode::Iconst0, 1));
        let a = g.insert(root, a);
        let b = g.fresh(Instruction::new(Opcode::Iconst1, 2));
        let b = g.insert(root, b);
        let join = g.fresh(Instruction::new(Opcode::Istore1, 3));
        let join = g.insert(a, join);
        g.insert(b, join);
        assert_eq!(g.merge_candidates(), vec![join]);
    }
}
