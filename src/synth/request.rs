//! External inputs of one synthesis invocation.
//!
//! The front end runs in line with the simulator's tick loop and sees the
//! virtual machine only through this snapshot: the method table, the raw
//! code section, the invocation history feeding speculative inlining, the
//! fabric's capability descriptor and the table of previously synthesized
//! kernels (needed to revert their bytecode patches before re-analysis).

use std::collections::{BTreeSet, HashMap};

use crate::bytecode::Opcode;
use crate::cdfg::Operator;
use crate::synth::patch::REPLACED_BYTES;
use crate::{Error, Result};

/// One method-table entry.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Fully qualified method name.
    pub name: String,
    /// Offset of the method code inside the code section.
    pub code_ref: usize,
    /// Length of the method code in bytes.
    pub code_len: usize,
    /// Number of argument slots (64-bit arguments count twice).
    pub arg_count: u16,
    /// Number of local-variable slots including arguments.
    pub max_locals: u16,
}

/// One record of the dynamic-dispatch history.
///
/// For dynamically dispatched call sites the resolved target depends on the
/// receiver; the front end assumes the most recently observed target will
/// recur and validates that assumption with a runtime type-tag check.
#[derive(Debug, Clone, Copy)]
pub struct Invocation {
    /// Absolute address of the call site in the code section.
    pub address: usize,
    /// Method-table index that was dispatched to.
    pub method_index: u16,
    /// Type tag of the receiver that produced that dispatch.
    pub type_tag: u16,
}

/// An operation the fabric executes natively in place of a call.
#[derive(Debug, Clone, Copy)]
pub struct Intrinsic {
    /// The pseudo-opcode standing in for the call during graph construction.
    pub opcode: Opcode,
    /// Number of stack operands the call consumes.
    pub operands: u8,
}

impl Intrinsic {
    /// The fabric operation this intrinsic maps to.
    #[must_use]
    pub fn operator(self) -> Option<Operator> {
        match self.opcode {
            Opcode::FSin => Some(Operator::Fsin),
            Opcode::FCos => Some(Operator::Fcos),
            _ => None,
        }
    }
}

/// Table of calls the fabric can execute natively, keyed by method index.
#[derive(Debug, Clone, Default)]
pub struct Intrinsics {
    entries: HashMap<u16, Intrinsic>,
}

impl Intrinsics {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Intrinsics::default()
    }

    /// Registers the well-known math intrinsics by method name.
    #[must_use]
    pub fn detect(methods: &[MethodInfo]) -> Self {
        let mut table = Intrinsics::new();
        for (index, method) in methods.iter().enumerate() {
            let op = if method.name.ends_with("/sin") {
                Some(Opcode::FSin)
            } else if method.name.ends_with("/cos") {
                Some(Opcode::FCos)
            } else {
                None
            };
            if let Some(opcode) = op {
                table.register(index as u16, Intrinsic { opcode, operands: 1 });
            }
        }
        table
    }

    /// Registers one intrinsic.
    pub fn register(&mut self, method_index: u16, intrinsic: Intrinsic) {
        self.entries.insert(method_index, intrinsic);
    }

    /// Removes one intrinsic, forcing the call to be inlined instead.
    pub fn remove(&mut self, method_index: u16) {
        self.entries.remove(&method_index);
    }

    /// Looks an intrinsic up by method index.
    #[must_use]
    pub fn get(&self, method_index: u16) -> Option<Intrinsic> {
        self.entries.get(&method_index).copied()
    }

    /// True when the method index names a known intrinsic.
    #[must_use]
    pub fn knows(&self, method_index: u16) -> bool {
        self.entries.contains_key(&method_index)
    }
}

/// Capability descriptor of the attached fabric.
#[derive(Debug, Clone)]
pub struct FabricCapabilities {
    supported: BTreeSet<Operator>,
}

impl FabricCapabilities {
    /// A fabric supporting the given operator set.
    #[must_use]
    pub fn new(supported: BTreeSet<Operator>) -> Self {
        FabricCapabilities { supported }
    }

    /// A fabric that supports every operator the projector can emit.
    #[must_use]
    pub fn full() -> Self {
        FabricCapabilities {
            supported: Operator::all().collect(),
        }
    }

    /// True when the fabric executes `op` natively.
    #[must_use]
    pub fn supports(&self, op: Operator) -> bool {
        self.supported.contains(&op)
    }
}

/// Bytes replaced by an earlier synthesis, kept for reversal.
pub type ReplacedBytes = [u8; REPLACED_BYTES];

/// Table of previously synthesized kernels, indexed by 8-bit kernel id.
#[derive(Debug, Clone, Default)]
pub struct KernelTable {
    slots: Vec<Option<ReplacedBytes>>,
}

impl KernelTable {
    /// Creates an empty table with the full 256-slot capacity.
    #[must_use]
    pub fn new() -> Self {
        KernelTable {
            slots: vec![None; 256],
        }
    }

    /// Records the bytes a deployed kernel replaced.
    pub fn deploy(&mut self, id: u8, replaced: ReplacedBytes) {
        self.slots[id as usize] = Some(replaced);
    }

    /// Original bytes replaced by kernel `id`.
    #[must_use]
    pub fn replaced(&self, id: u8) -> Option<ReplacedBytes> {
        self.slots.get(id as usize).copied().flatten()
    }

    /// Allocates the next free kernel identifier.
    ///
    /// # Errors
    ///
    /// [`Error::KernelTableFull`] when all 256 slots are taken.
    pub fn allocate(&self) -> Result<u8> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|i| i as u8)
            .ok_or(Error::KernelTableFull)
    }
}

/// Complete input snapshot of one synthesis invocation.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// The program's code section.
    pub code_section: Vec<u8>,
    /// Method table.
    pub methods: Vec<MethodInfo>,
    /// Index of the method containing the candidate loop.
    pub method_index: u16,
    /// Absolute address of the loop entry in the code section.
    pub start: usize,
    /// Absolute address of the loop's backward jump in the code section.
    pub stop: usize,
    /// Recent targets of dynamically dispatched call sites.
    pub invocation_history: Vec<Invocation>,
    /// Fabric capability descriptor.
    pub capabilities: FabricCapabilities,
    /// Fabric-native call table.
    pub intrinsics: Intrinsics,
    /// Previously synthesized kernels.
    pub kernels: KernelTable,
    /// Absolute code-section addresses excluded from synthesis: a window
    /// starting there, or a call targeting a method entry there, fails.
    pub blacklist: BTreeSet<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_table_allocation() {
        let mut table = KernelTable::new();
        assert_eq!(table.allocate().unwrap(), 0);
        table.deploy(0, [0; REPLACED_BYTES]);
        assert_eq!(table.allocate().unwrap(), 1);
    }

    #[test]
    fn test_kernel_table_exhaustion() {
        let mut table = KernelTable::new();
        for id in 0..=255u8 {
            table.deploy(id, [0; REPLACED_BYTES]);
        }
        assert!(matches!(table.allocate(), Err(Error::KernelTableFull)));
    }

    #[test]
    fn test_intrinsic_detection_by_name() {
        let methods = vec![
            MethodInfo {
                name: "java/lang/Math/sin".into(),
                code_ref: 0,
                code_len: 4,
                arg_count: 2,
                max_locals: 2,
            },
            MethodInfo {
                name: "app/Main/run".into(),
                code_ref: 4,
                code_len: 10,
                arg_count: 0,
                max_locals: 3,
            },
        ];
        let table = Intrinsics::detect(&methods);
        assert!(table.knows(0));
        assert!(!table.knows(1));
        assert_eq!(table.get(0).unwrap().opcode, Opcode::FSin);
    }
}
