//! The value-dependency graph.
//!
//! Data edges record producer → (consumer, operand-slot) pairs; scheduling
//! edges record pure ordering constraints (memory dependences, branch
//! barriers) that carry no value. Constants are interned by value in two
//! pools (32- and 64-bit) so equal constants share one node.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::cfg::InstrGraph;
use crate::dfg::{Datum, DatumId, DatumKind};

/// One data edge: the node on the far side plus the operand slot it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DEdge {
    /// Far-side node.
    pub sink: DatumId,
    /// Operand slot on the consumer.
    pub slot: u8,
}

/// The data-flow graph built during symbolic replay.
#[derive(Debug, Default)]
pub struct DataGraph {
    arena: Vec<Datum>,
    nodes: Vec<DatumId>,
    membership: Vec<bool>,
    ops: Vec<DatumId>,
    op_membership: Vec<bool>,
    succ: HashMap<DatumId, Vec<DEdge>>,
    pred: HashMap<DatumId, Vec<DEdge>>,
    ssucc: HashMap<DatumId, Vec<DatumId>>,
    spred: HashMap<DatumId, Vec<DatumId>>,
    consts32: HashMap<i32, DatumId>,
    consts64: HashMap<i64, DatumId>,
    post_inc: HashMap<DatumId, DatumId>,
    tag_assumptions: HashMap<DatumId, u16>,
}

impl DataGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        DataGraph::default()
    }

    /// Allocates a datum without adding it to the node set.
    pub fn alloc(&mut self, datum: Datum) -> DatumId {
        let id = DatumId(self.arena.len() as u32);
        self.arena.push(datum);
        self.membership.push(false);
        self.op_membership.push(false);
        id
    }

    /// Shared access to a datum.
    #[must_use]
    pub fn datum(&self, id: DatumId) -> &Datum {
        &self.arena[id.index()]
    }

    /// Mutable access to a datum's bookkeeping flags.
    pub fn datum_mut(&mut self, id: DatumId) -> &mut Datum {
        &mut self.arena[id.index()]
    }

    /// Marks a local write as one that must materialize.
    pub fn mark_necessary(&mut self, id: DatumId) {
        if self.arena[id.index()].kind == DatumKind::LocalWrite {
            self.arena[id.index()].necessary = true;
        }
    }

    /// Clears the materialization mark again (both branch versions agree).
    pub fn mark_unnecessary(&mut self, id: DatumId) {
        if self.arena[id.index()].kind == DatumKind::LocalWrite {
            self.arena[id.index()].necessary = false;
        }
    }

    /// Adds a datum to the node set.
    pub fn add_node(&mut self, id: DatumId) {
        if !self.membership[id.index()] {
            self.membership[id.index()] = true;
            self.nodes.push(id);
        }
    }

    /// Adds a datum that also occupies a functional unit (an operation).
    pub fn add_op(&mut self, id: DatumId) {
        self.add_node(id);
        if !self.op_membership[id.index()] {
            self.op_membership[id.index()] = true;
            self.ops.push(id);
        }
    }

    /// Demotes an operation back to a plain node.
    pub fn remove_op(&mut self, id: DatumId) {
        if self.op_membership[id.index()] {
            self.op_membership[id.index()] = false;
            self.ops.retain(|&o| o != id);
        }
    }

    /// Removes a datum from the node set.
    pub fn remove_node(&mut self, id: DatumId) {
        if self.membership[id.index()] {
            self.membership[id.index()] = false;
            self.nodes.retain(|&n| n != id);
        }
        self.remove_op(id);
    }

    /// Node set in creation order.
    #[must_use]
    pub fn nodes(&self) -> &[DatumId] {
        &self.nodes
    }

    /// True when the datum is in the node set.
    #[must_use]
    pub fn contains(&self, id: DatumId) -> bool {
        self.membership[id.index()]
    }

    /// Operation set in creation order.
    #[must_use]
    pub fn ops(&self) -> &[DatumId] {
        &self.ops
    }

    /// Adds a data edge `pre → d` feeding operand slot `slot`.
    ///
    /// When the producer side has a registered post-increment couple, the
    /// consumer is ordered before the increment's store (the stack still
    /// holds the old value while the new one is already in the slot).
    pub fn add_edge(&mut self, pre: DatumId, d: DatumId, slot: u8) {
        let edge = DEdge { sink: d, slot };
        let succs = self.succ.entry(pre).or_default();
        if !succs.contains(&edge) {
            succs.push(edge);
        }
        let back = DEdge { sink: pre, slot };
        let preds = self.pred.entry(d).or_default();
        if !preds.contains(&back) {
            preds.push(back);
        }

        if let Some(inc_store) = self.post_inc.get(&pre).copied() {
            if !self.datum(d).is_merge_like() {
                self.add_sedge(d, inc_store);
            }
            self.post_inc.remove(&pre);
        }
    }

    /// Adds a scheduling (pure ordering) edge `pre → d`.
    pub fn add_sedge(&mut self, pre: DatumId, d: DatumId) {
        let succs = self.ssucc.entry(pre).or_default();
        if !succs.contains(&d) {
            succs.push(d);
        }
        let preds = self.spred.entry(d).or_default();
        if !preds.contains(&pre) {
            preds.push(pre);
        }
    }

    /// Removes a data edge.
    pub fn remove_edge(&mut self, pre: DatumId, d: DatumId) {
        if let Some(succs) = self.succ.get_mut(&pre) {
            succs.retain(|e| e.sink != d);
        }
        if let Some(preds) = self.pred.get_mut(&d) {
            preds.retain(|e| e.sink != pre);
        }
    }

    /// Removes a scheduling edge.
    pub fn remove_sedge(&mut self, pre: DatumId, d: DatumId) {
        if let Some(succs) = self.ssucc.get_mut(&pre) {
            succs.retain(|&s| s != d);
        }
        if let Some(preds) = self.spred.get_mut(&d) {
            preds.retain(|&p| p != pre);
        }
    }

    /// Data-edge predecessors (operands) of `d`.
    #[must_use]
    pub fn preds(&self, d: DatumId) -> &[DEdge] {
        self.pred.get(&d).map_or(&[], Vec::as_slice)
    }

    /// Data-edge successors (consumers) of `d`.
    #[must_use]
    pub fn succs(&self, d: DatumId) -> &[DEdge] {
        self.succ.get(&d).map_or(&[], Vec::as_slice)
    }

    /// Scheduling-edge predecessors of `d`.
    #[must_use]
    pub fn spreds(&self, d: DatumId) -> &[DatumId] {
        self.spred.get(&d).map_or(&[], Vec::as_slice)
    }

    /// Scheduling-edge successors of `d`.
    #[must_use]
    pub fn ssuccs(&self, d: DatumId) -> &[DatumId] {
        self.ssucc.get(&d).map_or(&[], Vec::as_slice)
    }

    /// Collects the non-merge leaves reachable through merge/pipe chains
    /// upstream of `d`.
    pub fn real_preds(&self, d: DatumId, out: &mut Vec<DatumId>) {
        for edge in self.preds(d).to_vec() {
            if self.datum(edge.sink).is_merge_like() {
                self.real_preds(edge.sink, out);
            } else if !out.contains(&edge.sink) {
                out.push(edge.sink);
            }
        }
    }

    /// Interns a constant datum: returns the existing pool entry for the
    /// value, or registers `id` as the pool entry.
    pub fn intern_const(&mut self, id: DatumId) -> DatumId {
        let (wide, value) = {
            let datum = self.datum(id);
            debug_assert_eq!(datum.kind, DatumKind::Const);
            (datum.wide, datum.value)
        };
        if wide {
            *self.consts64.entry(value).or_insert(id)
        } else {
            *self.consts32.entry(value as i32).or_insert(id)
        }
    }

    /// Registers a post-increment couple: `on_stack` still carries the old
    /// slot value while `inc_store` already wrote the new one, so consumers
    /// of `on_stack` must execute before the store.
    pub fn add_post_increment_couple(&mut self, inc_store: DatumId, on_stack: DatumId) {
        self.post_inc.insert(on_stack, inc_store);
    }

    /// Records the assumed dispatch tag for a receiver, one guard per
    /// receiver value.
    pub fn record_tag_assumption(&mut self, receiver: DatumId, tag: u16) {
        self.tag_assumptions.insert(receiver, tag);
    }

    /// Previously assumed dispatch tag for a receiver.
    #[must_use]
    pub fn tag_assumption(&self, receiver: DatumId) -> Option<u16> {
        self.tag_assumptions.get(&receiver).copied()
    }

    /// True when `second` is reachable from `first` through data or
    /// scheduling edges.
    #[must_use]
    pub fn are_dependent(&self, first: DatumId, second: DatumId) -> bool {
        let mut frontier: Vec<DatumId> = Vec::new();
        frontier.extend(self.ssuccs(first));
        frontier.extend(self.succs(first).iter().map(|e| e.sink));
        let mut seen = vec![false; self.arena.len()];
        while let Some(d) = frontier.pop() {
            if d == second {
                return true;
            }
            if std::mem::replace(&mut seen[d.index()], true) {
                continue;
            }
            frontier.extend(self.ssuccs(d));
            frontier.extend(self.succs(d).iter().map(|e| e.sink));
        }
        false
    }

    /// DOT rendering of the value graph; scheduling edges dashed.
    #[must_use]
    pub fn to_dot(&self, graph: &InstrGraph) -> String {
        let mut dot = String::from("digraph dfg {\n    node [fontname=\"Courier\"];\n");
        let label = |id: DatumId| {
            let d = self.datum(id);
            let creator = graph.instr(d.creator);
            format!("d{}:{:?} {}:{}", id.index(), d.kind, creator.addr, creator.op)
        };
        for &id in &self.nodes {
            for edge in self.succs(id) {
                let _ = writeln!(
                    dot,
                    "    \"{}\" -> \"{}\" [label=\"{}\"];",
                    label(id),
                    label(edge.sink),
                    edge.slot
                );
            }
            for &s in self.ssuccs(id) {
                let _ = writeln!(
                    dot,
                    "    \"{}\" -> \"{}\" [style=dashed];",
                    label(id),
                    label(s)
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
    use crate::bytecode::Opcode;
    use crate::cfg::Instruction;

    fn setup() -> (InstrGraph, DataGraph, crate::cfg::InstrId) {
        let mut g = InstrGraph::new();
        let creator = g.fresh(Instruction::new(Opcode::Iconst0, 0));
        (g, DataGraph::new(), creator)
    }

    #[test]
    fn test_constant_interning_by_value() {
        let (_, mut dg, creator) = setup();
        let a = dg.alloc(Datum::new(DatumKind::Const, 7, false, creator));
        let b = dg.alloc(Datum::new(DatumKind::Const, 7, false, creator));
        let a = dg.intern_const(a);
        let b = dg.intern_const(b);
        assert_eq!(a, b);
        // A wide constant of the same numeric value pools separately.
        let w = dg.alloc(Datum::new(DatumKind::Const, 7, true, creator));
        assert_ne!(dg.intern_const(w), a);
    }

    #[test]
    fn test_dependence_reachability() {
        let (_, mut dg, creator) = setup();
        let a = dg.alloc(Datum::new(DatumKind::Stack, 0, false, creator));
        let b = dg.alloc(Datum::new(DatumKind::Stack, 0, false, creator));
        let c = dg.alloc(Datum::new(DatumKind::Stack, 0, false, creator));
        dg.add_edge(a, b, 1);
        dg.add_sedge(b, c);
        assert!(dg.are_dependent(a, c));
        assert!(!dg.are_dependent(c, a));
    }

    #[test]
    fn test_post_increment_couple_orders_consumer_before_store() {
        let (_, mut dg, creator) = setup();
        let load = dg.alloc(Datum::new(DatumKind::LocalRead, 1, false, creator));
        let store = dg.alloc(Datum::new(DatumKind::LocalWrite, 1, false, creator));
        let user = dg.alloc(Datum::new(DatumKind::Stack, 0, false, creator));
        dg.add_post_increment_couple(store, load);
        dg.add_edge(load, user, 1);
        assert_eq!(dg.ssuccs(user), &[store]);
    }
}
