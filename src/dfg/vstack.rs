//! The virtual operand stack.
//!
//! Models the effect of stack pushes/pops and slot/field stores without
//! touching real memory. Each control-flow edge carries its own stack; a
//! conditional splits the stack into the two arms, and the merge node
//! unifies them again element by element.

use std::collections::HashMap;

use crate::cfg::InstrGraph;
use crate::dfg::{
    mem_class, AccessHistory, AliasCandidates, DataGraph, DatumId, LocalHistory, MemClass,
};
use crate::synth::AliasPolicy;

/// Symbolic operand stack plus the per-branch version histories.
///
/// 64-bit values occupy a single entry whose producing opcode is flagged
/// wide (they fill two conceptual slots of the modeled machine).
#[derive(Debug, Clone, Default)]
pub struct VStack {
    stack: Vec<DatumId>,
    locals: HashMap<i64, LocalHistory>,
    objects: HashMap<MemClass, AccessHistory>,
    statics: HashMap<i64, DatumId>,
    decision: bool,
}

impl VStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        VStack::default()
    }

    /// Splits the stack for one branch arm.
    ///
    /// Histories are cloned; the last write of every local slot crosses a
    /// branch boundary from here on and must materialize.
    #[must_use]
    pub fn split(&self, dfg: &mut DataGraph, decision: bool) -> VStack {
        let mut vs = self.clone();
        for hist in vs.locals.values() {
            if let Some(last) = hist.last() {
                dfg.mark_necessary(last);
            }
        }
        vs.decision = decision;
        vs
    }

    /// Arm of the governing conditional this stack flows along.
    #[must_use]
    pub fn decision(&self) -> bool {
        self.decision
    }

    /// Sets the arm tag.
    pub fn set_decision(&mut self, decision: bool) {
        self.decision = decision;
    }

    /// Pushes a produced value.
    pub fn push(&mut self, d: DatumId) {
        self.stack.push(d);
    }

    /// Pops the most recent value.
    ///
    /// # Panics
    ///
    /// Panics on an empty stack; the encoding guarantees balance inside a
    /// verified method, so an underflow is a front-end bug.
    pub fn pop(&mut self) -> DatumId {
        self.stack.pop().expect("operand stack underflow")
    }

    /// Number of values on the stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Values bottom-to-top.
    #[must_use]
    pub fn values(&self) -> &[DatumId] {
        &self.stack
    }

    /// Replaces the stack contents.
    pub fn set_values(&mut self, values: Vec<DatumId>) {
        self.stack = values;
    }

    /// Records a local-slot access under the datum's own slot id; returns
    /// the previous version.
    pub fn local_add(&mut self, dfg: &DataGraph, d: DatumId) -> Option<DatumId> {
        let slot = dfg.datum(d).value;
        self.locals.entry(slot).or_default().add(d)
    }

    /// Re-registers an existing datum under a different slot. Needed when an
    /// inlined callee receives a reference parameter: the caller's datum
    /// itself becomes the callee slot's current version.
    pub fn local_alias(&mut self, slot: i64, d: DatumId) {
        let mut hist = LocalHistory::default();
        hist.add(d);
        self.locals.insert(slot, hist);
    }

    /// Installs a merged version for a slot; returns the previous version.
    pub fn local_add_merged(
        &mut self,
        slot: i64,
        merger: DatumId,
        real_preds: Vec<DatumId>,
    ) -> Option<DatumId> {
        let old = self.locals.get(&slot).and_then(LocalHistory::last);
        self.locals
            .insert(slot, LocalHistory::merged(merger, real_preds));
        old
    }

    /// Non-merge predecessors of the slot `d` accesses, if tracked.
    #[must_use]
    pub fn real_preds_lv(&self, dfg: &DataGraph, d: DatumId) -> Option<Vec<DatumId>> {
        let slot = dfg.datum(d).value;
        self.locals.get(&slot).map(|h| h.real_preds().to_vec())
    }

    /// True when `d` is the most recent access of its slot.
    #[must_use]
    pub fn is_last_local_access(&self, dfg: &DataGraph, d: DatumId) -> bool {
        let slot = dfg.datum(d).value;
        self.locals.get(&slot).is_none_or(|h| h.is_last(d))
    }

    /// Per-slot local histories.
    #[must_use]
    pub fn locals(&self) -> &HashMap<i64, LocalHistory> {
        &self.locals
    }

    /// Records a heap access in the history of its storage class, wiring
    /// dependence edges and alias candidates.
    pub fn object_add(
        &mut self,
        graph: &mut InstrGraph,
        dfg: &mut DataGraph,
        policy: AliasPolicy,
        aliases: &mut AliasCandidates,
        d: DatumId,
    ) -> Option<DatumId> {
        let op = graph.instr(dfg.datum(d).creator).op;
        let class = mem_class(op)?;
        self.objects
            .entry(class)
            .or_default()
            .add(graph, dfg, policy, aliases, d)
    }

    /// The access-history generations relevant for `d`, newest first.
    #[must_use]
    pub fn heap_history(
        &self,
        graph: &InstrGraph,
        dfg: &DataGraph,
        d: DatumId,
    ) -> Option<&std::collections::VecDeque<Vec<DatumId>>> {
        let op = graph.instr(dfg.datum(d).creator).op;
        let class = mem_class(op)?;
        self.objects.get(&class).map(AccessHistory::generations)
    }

    /// Heap histories per storage class.
    #[must_use]
    pub fn heap_histories(&self) -> &HashMap<MemClass, AccessHistory> {
        &self.objects
    }

    /// Mutable heap histories, used by the merge node.
    pub fn heap_histories_mut(&mut self) -> &mut HashMap<MemClass, AccessHistory> {
        &mut self.objects
    }

    /// Records a static-field version; returns the previous one.
    pub fn static_add(&mut self, dfg: &DataGraph, d: DatumId) -> Option<DatumId> {
        let key = dfg.datum(d).value;
        self.statics.insert(key, d)
    }

    /// Static-field versions by field key.
    #[must_use]
    pub fn statics(&self) -> &HashMap<i64, DatumId> {
        &self.statics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;
    use crate::cfg::Instruction;
    use crate::dfg::{Datum, DatumKind};

    #[test]
    fn test_split_marks_pending_stores_necessary() {
        let mut g = InstrGraph::new();
        let c = g.fresh(Instruction::new(Opcode::Istore1, 0));
        let mut dfg = DataGraph::new();
        let w = dfg.alloc(Datum::new(DatumKind::LocalWrite, 1, false, c));
        let mut vs = VStack::new();
        vs.local_add(&dfg, w);
        assert!(!dfg.datum(w).necessary);
        let arm = vs.split(&mut dfg, true);
        assert!(arm.decision());
        assert!(dfg.datum(w).necessary);
    }

    #[test]
    fn test_stack_order() {
        let mut g = InstrGraph::new();
        let c = g.fresh(Instruction::new(Opcode::Iconst0, 0));
        let mut dfg = DataGraph::new();
        let a = dfg.alloc(Datum::new(DatumKind::Const, 0, false, c));
        let b = dfg.alloc(Datum::new(DatumKind::Const, 1, false, c));
        let mut vs = VStack::new();
        vs.push(a);
        vs.push(b);
        assert_eq!(vs.pop(), b);
        assert_eq!(vs.pop(), a);
    }
}
