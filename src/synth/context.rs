//! The per-invocation synthesis session.
//!
//! Everything both graph-construction stages read and weld lives here:
//! the (already pre-processed) code buffer, the three graphs, the option
//! bundle and the bookkeeping registries. One context is constructed per
//! synthesis call and discarded at the end; there is no cross-call state.

use std::collections::{BTreeSet, HashMap};

use crate::bytecode::CodeBuffer;
use crate::cfg::{InstrGraph, InstrId, LoopTree};
use crate::dfg::{AliasCandidates, DataGraph, DatumId, VStack};
use crate::synth::{Intrinsics, MethodInfo, SynthesisConfig};

/// First synthetic local slot; merge spills and inlined-return carriers are
/// allocated upward from here, far above any real namespace.
const FIRST_FREE_SLOT: i64 = 8000;

/// One recorded array access, tagged by index kind.
#[derive(Debug, Clone, Copy)]
pub struct ArrayAccess {
    /// Identity of the handle datum.
    pub handle: DatumId,
    /// True when the index operand was a plain local load (`a[i]`, as
    /// opposed to computed `a[f(i)]`).
    pub direct: bool,
    /// Address of the accessing instruction.
    pub addr: i32,
    /// Slot id or constant behind the index operand.
    pub index_value: i64,
}

/// Session state of one synthesis invocation.
#[derive(Debug)]
pub struct SynthesisContext {
    /// The pre-processed code image.
    pub code: CodeBuffer,
    /// Window start address.
    pub start: i32,
    /// Window stop address (the canonical backward jump).
    pub stop: i32,
    /// The control-flow graph under construction.
    pub graph: InstrGraph,
    /// The value graph under construction.
    pub dfg: DataGraph,
    /// The loop hierarchy.
    pub loops: LoopTree,
    /// Option bundle.
    pub config: SynthesisConfig,
    /// Method table snapshot.
    pub methods: Vec<MethodInfo>,
    /// Fabric-native call table.
    pub intrinsics: Intrinsics,
    /// Local-namespace stride after inlining (one past the highest offset).
    pub namespace_stride: u16,
    /// Local-slot count of the containing method; only these slots transfer
    /// between the token machine and the fabric.
    pub root_locals: u16,
    /// The window-entry pseudo-instruction.
    pub start_instr: InstrId,
    /// The window-exit pseudo-instruction.
    pub stop_instr: InstrId,

    todo: Vec<InstrId>,
    /// Operand stacks in flight, keyed by the instruction about to consume
    /// them.
    pub vstacks: HashMap<InstrId, VStack>,
    /// Stacks parked at merge nodes awaiting their second predecessor.
    pub phi_parked: HashMap<InstrId, VStack>,

    /// Local slots read during replay.
    pub lvar_read: BTreeSet<i64>,
    /// Local slots written during replay.
    pub lvar_write: BTreeSet<i64>,
    /// Store count per slot, collected during control-flow construction;
    /// single-store slots allow constant propagation across loop levels.
    pub lv_store_count: HashMap<i64, u32>,
    /// Field-store count per field offset.
    pub put_field_count: HashMap<i64, u32>,
    /// Every local store created during replay, in creation order.
    pub all_lv_stores: Vec<DatumId>,
    /// Alias-candidate accumulator.
    pub aliases: AliasCandidates,
    /// Array-read access log.
    pub array_reads: Vec<ArrayAccess>,
    /// Array-write access log.
    pub array_writes: Vec<ArrayAccess>,

    /// Return instructions per callee namespace offset.
    pub returns: HashMap<u16, Vec<InstrId>>,
    /// The continuation each callee's final return jumps back to.
    pub final_returns: HashMap<u16, InstrId>,

    free_slot: i64,
}

impl SynthesisContext {
    /// Creates a fresh session over a pre-processed code buffer.
    pub fn new(
        code: CodeBuffer,
        start: i32,
        stop: i32,
        config: SynthesisConfig,
        methods: Vec<MethodInfo>,
        intrinsics: Intrinsics,
        namespace_stride: u16,
        root_locals: u16,
    ) -> Self {
        let mut graph = InstrGraph::new();
        let start_instr = graph.fresh(crate::cfg::Instruction::new(
            crate::bytecode::Opcode::SynthStart,
            start,
        ));
        graph.insert_root(start_instr);
        let stop_instr = graph.fresh(crate::cfg::Instruction::new(
            crate::bytecode::Opcode::SynthStop,
            stop,
        ));
        graph.insert_root(stop_instr);

        SynthesisContext {
            code,
            start,
            stop,
            graph,
            dfg: DataGraph::new(),
            loops: LoopTree::new(),
            config,
            methods,
            intrinsics,
            namespace_stride,
            root_locals,
            start_instr,
            stop_instr,
            todo: Vec::new(),
            vstacks: HashMap::new(),
            phi_parked: HashMap::new(),
            lvar_read: BTreeSet::new(),
            lvar_write: BTreeSet::new(),
            lv_store_count: HashMap::new(),
            put_field_count: HashMap::new(),
            all_lv_stores: Vec::new(),
            aliases: AliasCandidates::default(),
            array_reads: Vec::new(),
            array_writes: Vec::new(),
            returns: HashMap::new(),
            final_returns: HashMap::new(),
            free_slot: FIRST_FREE_SLOT,
        }
    }

    /// Schedules an instruction unless its logical node already joined the
    /// graph.
    pub fn push(&mut self, id: InstrId) {
        let id = self.graph.canonical(id);
        if !self.graph.contains(id) {
            self.todo.push(id);
        }
    }

    /// Schedules an instruction unconditionally (data-flow replay).
    pub fn pushd(&mut self, id: InstrId) {
        self.todo.push(id);
    }

    /// Next scheduled instruction, if any.
    pub fn next_scheduled(&mut self) -> Option<InstrId> {
        self.todo.pop()
    }

    /// Drops any pending work (between the two construction stages).
    pub fn clear_schedule(&mut self) {
        self.todo.clear();
    }

    /// Allocates a fresh synthetic local slot.
    pub fn next_free_slot(&mut self) -> i64 {
        let slot = self.free_slot;
        self.free_slot += 1;
        slot
    }

    /// Namespace offset in effect at `addr`; synthetic slots have none.
    #[must_use]
    pub fn slot_offset(&self, addr: i32) -> u16 {
        self.code.slot_offset(addr).unwrap_or(0)
    }

    /// Counts a local store seen during control-flow construction.
    pub fn count_lv_store(&mut self, slot: i64) {
        *self.lv_store_count.entry(slot).or_insert(0) += 1;
    }

    /// True when the slot is stored to at most once in the window.
    #[must_use]
    pub fn single_lv_store(&self, slot: i64) -> bool {
        self.lv_store_count.get(&slot).copied().unwrap_or(0) <= 1
    }

    /// Counts a field store seen during control-flow construction.
    pub fn count_put_field(&mut self, offset: i64) {
        *self.put_field_count.entry(offset).or_insert(0) += 1;
    }

    /// True when the field is stored to at most once in the window.
    #[must_use]
    pub fn single_put_field(&self, offset: i64) -> bool {
        self.put_field_count.get(&offset).copied().unwrap_or(0) <= 1
    }

    /// Registers a non-final return of the callee inlined at `offset`.
    pub fn add_return(&mut self, offset: u16, ret: InstrId) {
        self.returns.entry(offset).or_default().push(ret);
        if let Some(&continuation) = self.final_returns.get(&offset) {
            self.graph.add_edge(ret, continuation);
        }
    }

    /// Registers the final return of the callee inlined at `offset` and
    /// wires every recorded return to the continuation.
    pub fn add_final_return(&mut self, offset: u16, ret: InstrId, continuation: InstrId) {
        self.final_returns.insert(offset, continuation);
        let returns = self.returns.entry(offset).or_default();
        if !returns.contains(&ret) {
            returns.push(ret);
        }
        for r in returns.clone() {
            self.graph.add_edge(r, continuation);
        }
    }

    /// Number of returns recorded for the callee owning `addr`.
    #[must_use]
    pub fn return_count_at(&self, addr: i32) -> usize {
        let offset = self.slot_offset(addr);
        self.returns.get(&offset).map_or(0, Vec::len)
    }
}
