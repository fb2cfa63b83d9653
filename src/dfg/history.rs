//! Per-branch access histories.
//!
//! The virtual stack tracks, per local slot and per heap storage class, which
//! data produced the current version and which earlier accesses a new access
//! must be ordered after. Keeping these histories on the stack (and cloning
//! them at branch splits) detects reuse and merge points without re-scanning
//! the whole value graph.

use std::collections::{BTreeMap, VecDeque};

use crate::bytecode::{Kind, Opcode};
use crate::cfg::InstrGraph;
use crate::dfg::{mem_class, value_class, DataGraph, Datum, DatumId, DatumKind};
use crate::synth::AliasPolicy;

/// Accesses too old to track individually are merged behind a pass-through
/// barrier once the history exceeds this many generations.
const HISTORY_LIMIT: usize = 1000;

/// History of one local-variable slot.
#[derive(Debug, Clone, Default)]
pub struct LocalHistory {
    last: Option<DatumId>,
    real_preds: Vec<DatumId>,
}

impl LocalHistory {
    /// History seeded by a merged version and the branch versions behind it.
    #[must_use]
    pub fn merged(merger: DatumId, real_preds: Vec<DatumId>) -> Self {
        LocalHistory {
            last: Some(merger),
            real_preds,
        }
    }

    /// Records a new access; returns the previous version.
    pub fn add(&mut self, d: DatumId) -> Option<DatumId> {
        let old = self.last.replace(d);
        self.real_preds = vec![d];
        old
    }

    /// The datum that accessed this slot last.
    #[must_use]
    pub fn last(&self) -> Option<DatumId> {
        self.last
    }

    /// Non-merge versions that must be ordered before the next write.
    #[must_use]
    pub fn real_preds(&self) -> &[DatumId] {
        &self.real_preds
    }

    /// True when `d` is the most recent access.
    #[must_use]
    pub fn is_last(&self, d: DatumId) -> bool {
        self.last == Some(d)
    }
}

/// The conservative pairwise alias-candidate set.
///
/// Maps an earlier heap access to the later accesses that may target the
/// same location; purely advisory, consumed by the external scheduler for
/// speculation decisions.
#[derive(Debug, Default)]
pub struct AliasCandidates {
    map: BTreeMap<DatumId, Vec<DatumId>>,
}

impl AliasCandidates {
    /// Records a candidate pair, ordered by creator address.
    pub fn record(&mut self, graph: &InstrGraph, dfg: &DataGraph, d1: DatumId, d2: DatumId) {
        let addr = |d: DatumId| graph.instr(dfg.datum(d).creator).addr;
        let (first, second) = if addr(d1) < addr(d2) { (d1, d2) } else { (d2, d1) };
        let seconds = self.map.entry(first).or_default();
        if !seconds.contains(&second) {
            seconds.push(second);
        }
    }

    /// The candidate map, keyed by the earlier access.
    #[must_use]
    pub fn map(&self) -> &BTreeMap<DatumId, Vec<DatumId>> {
        &self.map
    }

    /// Total number of recorded pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    /// True when no pair was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Base-reference provenance classes; accesses whose references come from
/// different provenance cannot be proven to share a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefOrigin {
    Const,
    Local,
    Field,
    Static,
    Array,
}

fn ref_origin(graph: &InstrGraph, dfg: &DataGraph, d: &Datum) -> Option<RefOrigin> {
    let reference = dfg.datum(d.reference?);
    Some(match reference.kind {
        DatumKind::LocalRead | DatumKind::LocalWrite => RefOrigin::Local,
        DatumKind::FieldRead | DatumKind::FieldWrite => RefOrigin::Field,
        DatumKind::Const => RefOrigin::Const,
        _ => {
            if graph.instr(reference.creator).op.kind() == Kind::StaticLd {
                RefOrigin::Static
            } else {
                RefOrigin::Array
            }
        }
    })
}

/// History of one heap storage class (arrays, object fields, static fields).
#[derive(Debug, Clone, Default)]
pub struct AccessHistory {
    history: VecDeque<Vec<DatumId>>,
    oldest: Option<DatumId>,
    latest: Option<DatumId>,
}

impl AccessHistory {
    /// Records a new heap access, wiring ordering edges against every
    /// history entry the access cannot be proven independent of, and
    /// recording alias candidates for speculated-independent pairs.
    ///
    /// Returns the access that fell off the far end of the history.
    pub fn add(
        &mut self,
        graph: &mut InstrGraph,
        dfg: &mut DataGraph,
        policy: AliasPolicy,
        aliases: &mut AliasCandidates,
        d: DatumId,
    ) -> Option<DatumId> {
        self.latest = Some(d);
        let ret = self.oldest;

        for generation in self.history.clone() {
            for old in generation {
                if dependent(graph, dfg, policy, aliases, d, old) {
                    dfg.add_sedge(old, d);
                }
            }
        }

        // Accesses beyond the window are conservatively assumed dependent
        // and merged behind one pass-through barrier.
        if self.history.len() >= HISTORY_LIMIT {
            let datum = dfg.datum(d);
            let creator_addr = graph.instr(datum.creator).addr;
            let reference = datum.reference;
            let value = datum.value;
            let nop = graph.fresh(crate::cfg::Instruction::new(Opcode::Nop, creator_addr));
            let mut pipe = Datum::new(DatumKind::Pipe, value, false, nop);
            pipe.reference = reference;
            let pipe = dfg.alloc(pipe);
            dfg.add_op(pipe);
            if let Some(oldest) = self.oldest {
                dfg.add_sedge(oldest, pipe);
            }
            for last in self.history.pop_back().unwrap_or_default() {
                dfg.add_sedge(last, pipe);
            }
            self.oldest = Some(pipe);
        }

        self.history.push_front(vec![d]);
        if let Some(oldest) = self.oldest {
            dfg.add_sedge(oldest, d);
        }
        ret
    }

    /// The recorded generations, newest first.
    #[must_use]
    pub fn generations(&self) -> &VecDeque<Vec<DatumId>> {
        &self.history
    }

    /// The most recent access.
    #[must_use]
    pub fn latest(&self) -> Option<DatumId> {
        self.latest
    }

    /// Merges the history of the other branch into this one.
    ///
    /// Generations are unioned index-aligned; when both branches carry an
    /// over-the-horizon barrier, a fresh pass-through joins them.
    pub fn merge(&mut self, graph: &mut InstrGraph, dfg: &mut DataGraph, other: &AccessHistory) {
        let (mut longer, shorter) = if self.history.len() >= other.history.len() {
            (self.history.clone(), &other.history)
        } else {
            (other.history.clone(), &self.history)
        };
        for (i, generation) in shorter.iter().enumerate() {
            for &d in generation {
                if !longer[i].contains(&d) {
                    longer[i].push(d);
                }
            }
        }
        self.history = longer;

        match (self.oldest, other.oldest) {
            (None, o) => self.oldest = o,
            (Some(mine), Some(theirs)) => {
                let datum = dfg.datum(mine);
                let creator_addr = graph.instr(datum.creator).addr;
                let reference = datum.reference;
                let value = datum.value;
                let nop = graph.fresh(crate::cfg::Instruction::new(Opcode::Nop, creator_addr));
                let mut pipe = Datum::new(DatumKind::Pipe, value, false, nop);
                pipe.reference = reference;
                let pipe = dfg.alloc(pipe);
                dfg.add_op(pipe);
                dfg.add_sedge(mine, pipe);
                dfg.add_sedge(theirs, pipe);
                self.oldest = Some(pipe);
            }
            (Some(_), None) => {}
        }
    }
}

/// Decides whether a new heap access depends on an older one.
///
/// Conservative: returns true unless independence can be shown from the
/// access shapes (read/read, disjoint storage classes, unequal field
/// offsets or constant indices, index arithmetic provably advancing past
/// the old index). When speculation is enabled and only the base references
/// differ, the pair is recorded as an alias candidate and treated as
/// independent; the runtime check is the collaborator's business.
fn dependent(
    graph: &InstrGraph,
    dfg: &mut DataGraph,
    policy: AliasPolicy,
    aliases: &mut AliasCandidates,
    new: DatumId,
    old: DatumId,
) -> bool {
    use crate::dfg::AccessType;

    let new_d = dfg.datum(new).clone();
    let old_d = dfg.datum(old).clone();

    if new_d.access_type() == AccessType::Read && old_d.access_type() == AccessType::Read {
        return false;
    }

    let new_op = graph.instr(new_d.creator).op;
    let old_op = graph.instr(old_d.creator).op;
    let (Some(new_class), Some(old_class)) = (mem_class(new_op), mem_class(old_op)) else {
        return true;
    };
    if new_class != old_class {
        return false;
    }
    if new_class != crate::dfg::MemClass::Array && new_d.value != old_d.value {
        return false;
    }

    if let (Some(mut new_index), Some(mut old_index)) = (new_d.index, old_d.index) {
        // Strip a shared local base from two index sums so the remaining
        // offsets can be compared.
        if creator_is(graph, dfg, new_index, Opcode::Iadd) && creator_is(graph, dfg, old_index, Opcode::Iadd) {
            let preds_new: Vec<DatumId> = dfg.preds(new_index).iter().map(|e| e.sink).collect();
            let preds_old: Vec<DatumId> = dfg.preds(old_index).iter().map(|e| e.sink).collect();
            let shared: Vec<DatumId> = preds_new
                .iter()
                .copied()
                .filter(|p| preds_old.contains(p))
                .collect();
            if shared.len() == 1 && dfg.datum(shared[0]).is_local() {
                if let (Some(n), Some(o)) = (
                    preds_new.iter().find(|&&p| p != shared[0]),
                    preds_old.iter().find(|&&p| p != shared[0]),
                ) {
                    new_index = *n;
                    old_index = *o;
                }
            }
        }

        let new_index_d = dfg.datum(new_index).clone();
        let old_index_d = dfg.datum(old_index).clone();

        if new_index_d.kind == DatumKind::Const
            && old_index_d.kind == DatumKind::Const
            && new_index_d.value != old_index_d.value
        {
            return false;
        }

        if value_class(old_op) != value_class(new_op) {
            return false;
        }

        if index_advances(graph, dfg, old_index, new_index)
            || index_advances(graph, dfg, new_index, old_index)
        {
            return false;
        }
    }

    let same_reference = match (new_d.reference, old_d.reference) {
        (Some(nr), Some(or)) => {
            dfg.datum(or).value == dfg.datum(nr).value
                && old_d.value == new_d.value
                && ref_origin(graph, dfg, &old_d) == ref_origin(graph, dfg, &new_d)
        }
        _ => false,
    };

    if policy.speculates() && !same_reference {
        if let Some(old_ref) = old_d.reference {
            dfg.add_sedge(old_ref, new);
        }
        aliases.record(graph, dfg, old, new);
        return false;
    }

    true
}

fn creator_is(graph: &InstrGraph, dfg: &DataGraph, d: DatumId, op: Opcode) -> bool {
    graph.instr(dfg.datum(d).creator).op == op
}

fn creator_is_inc(graph: &InstrGraph, dfg: &DataGraph, d: DatumId) -> bool {
    let op = graph.instr(dfg.datum(d).creator).op;
    op == Opcode::Iinc || op == Opcode::Iadd
}

/// True when `later` is provably `earlier` advanced by a non-zero constant:
/// either `later` consumes `earlier` through an increment, or both are
/// increment results over the same local base with distinct constant
/// offsets.
fn index_advances(
    graph: &InstrGraph,
    dfg: &DataGraph,
    earlier: DatumId,
    later: DatumId,
) -> bool {
    for edge in dfg.succs(earlier) {
        let succ = edge.sink;
        if succ == later && creator_is(graph, dfg, succ, Opcode::Iinc) {
            return true;
        }
        if succ == later && creator_is(graph, dfg, succ, Opcode::Iadd) {
            let mut op1 = None;
            let mut op2 = None;
            for e in dfg.preds(later) {
                match e.slot {
                    1 => op1 = Some(e.sink),
                    _ => op2 = Some(e.sink),
                }
            }
            let nonzero_const = |d: Option<DatumId>| {
                d.is_some_and(|d| {
                    dfg.datum(d).kind == DatumKind::Const && dfg.datum(d).value != 0
                })
            };
            if op1 == Some(earlier) && nonzero_const(op2) {
                return true;
            }
            if op2 == Some(earlier) && nonzero_const(op1) {
                return true;
            }
        }

        if creator_is_inc(graph, dfg, earlier) && creator_is_inc(graph, dfg, later) {
            // Independent when both load the same base but add different
            // constants.
            let mut independent = true;
            for e_new in dfg.preds(later) {
                for e_old in dfg.preds(earlier) {
                    if e_new.slot == 1 && e_old.slot == 1 && e_new.sink != e_old.sink {
                        independent = false;
                    }
                    if e_new.slot == 2 && e_old.slot == 2 {
                        let both_const = dfg.datum(e_new.sink).kind == DatumKind::Const
                            && dfg.datum(e_old.sink).kind == DatumKind::Const;
                        if e_new.sink == e_old.sink || !both_const {
                            independent = false;
                        }
                    }
                }
            }
            if independent && !dfg.preds(later).is_empty() && !dfg.preds(earlier).is_empty() {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Instruction;

    #[test]
    fn test_local_history_tracks_last() {
        let mut g = InstrGraph::new();
        let c = g.fresh(Instruction::new(Opcode::Istore1, 0));
        let mut dfg = DataGraph::new();
        let a = dfg.alloc(Datum::new(DatumKind::LocalWrite, 1, false, c));
        let b = dfg.alloc(Datum::new(DatumKind::LocalRead, 1, false, c));
        let mut hist = LocalHistory::default();
        assert_eq!(hist.add(a), None);
        assert_eq!(hist.add(b), Some(a));
        assert!(hist.is_last(b));
        assert_eq!(hist.real_preds(), &[b]);
    }

    #[test]
    fn test_reads_never_depend_on_reads() {
        let mut g = InstrGraph::new();
        let c1 = g.fresh(Instruction::new(Opcode::Iaload, 0));
        let c2 = g.fresh(Instruction::new(Opcode::Iaload, 4));
        let mut dfg = DataGraph::new();
        let r1 = dfg.alloc(Datum::new(DatumKind::ArrayRead, 9, false, c1));
        let r2 = dfg.alloc(Datum::new(DatumKind::ArrayRead, 9, false, c2));
        let mut aliases = AliasCandidates::default();
        assert!(!dependent(&g, &mut dfg, AliasPolicy::Off, &mut aliases, r2, r1));
        assert!(aliases.is_empty());
    }

    #[test]
    fn test_unequal_constant_indices_are_independent() {
        let mut g = InstrGraph::new();
        let load = g.fresh(Instruction::new(Opcode::Iaload, 0));
        let store = g.fresh(Instruction::new(Opcode::Iastore, 4));
        let cinstr = g.fresh(Instruction::new(Opcode::Iconst0, 0));
        let mut dfg = DataGraph::new();
        let handle = dfg.alloc(Datum::new(DatumKind::LocalRead, 0, false, cinstr));
        let i0 = dfg.alloc(Datum::new(DatumKind::Const, 0, false, cinstr));
        let i1 = dfg.alloc(Datum::new(DatumKind::Const, 1, false, cinstr));
        let mut rd = Datum::new(DatumKind::ArrayRead, handle.index() as i64, false, load);
        rd.reference = Some(handle);
        rd.index = Some(i0);
        let rd = dfg.alloc(rd);
        let mut wr = Datum::new(DatumKind::ArrayWrite, handle.index() as i64, false, store);
        wr.reference = Some(handle);
        wr.index = Some(i1);
        let wr = dfg.alloc(wr);
        let mut aliases = AliasCandidates::default();
        assert!(!dependent(&g, &mut dfg, AliasPolicy::Off, &mut aliases, wr, rd));
    }

    #[test]
    fn test_speculated_pairs_are_recorded_in_address_order() {
        let mut g = InstrGraph::new();
        let load = g.fresh(Instruction::new(Opcode::Iaload, 8));
        let store = g.fresh(Instruction::new(Opcode::Iastore, 2));
        let cinstr = g.fresh(Instruction::new(Opcode::Aload0, 0));
        let mut dfg = DataGraph::new();
        let h1 = dfg.alloc(Datum::new(DatumKind::LocalRead, 0, false, cinstr));
        let h2 = dfg.alloc(Datum::new(DatumKind::LocalRead, 1, false, cinstr));
        let mut wr = Datum::new(DatumKind::ArrayWrite, h2.index() as i64, false, store);
        wr.reference = Some(h2);
        let wr = dfg.alloc(wr);
        let mut rd = Datum::new(DatumKind::ArrayRead, h1.index() as i64, false, load);
        rd.reference = Some(h1);
        let rd = dfg.alloc(rd);
        let mut aliases = AliasCandidates::default();
        assert!(!dependent(
            &g,
            &mut dfg,
            AliasPolicy::ExactCheck,
            &mut aliases,
            rd,
            wr
        ));
        // Earlier access (the store at address 2) keys the pair.
        assert_eq!(aliases.map().get(&wr).map(Vec::as_slice), Some(&[rd][..]));
    }
}
