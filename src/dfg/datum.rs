//! Value-graph nodes.
//!
//! A [`Datum`] is an immutable node of the value-dependency graph: one value
//! produced (or consumed, for sinks) during symbolic replay of the
//! restructured control flow. Folding never mutates a datum; it redirects
//! *references* to an equivalent existing datum instead.

use crate::bytecode::{Kind, Opcode};
use crate::cfg::InstrId;

/// Index of a datum in the value-graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatumId(pub(crate) u32);

impl DatumId {
    /// Raw arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a datum touches its storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    /// Reads an existing value.
    Read,
    /// Produces a new version.
    Write,
    /// Pushes an operation result onto the operand stack.
    Stack,
}

/// Storage class touched by a heap access, derived from the creating
/// instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemClass {
    /// Array element.
    Array,
    /// Object instance field.
    ObjectField,
    /// Static field.
    StaticField,
}

/// Variant of a value-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatumKind {
    /// Local-variable read; `value` is the slot id.
    LocalRead,
    /// Local-variable write; `value` is the slot id.
    LocalWrite,
    /// Array-element read (also models static reads through a constant
    /// handle); `value` is the handle datum's id.
    ArrayRead,
    /// Array-element write; `value` is the handle datum's id.
    ArrayWrite,
    /// Object-field read; `value` is the field offset.
    FieldRead,
    /// Object-field write; `value` is the field offset.
    FieldWrite,
    /// Constant; `value` is the constant (or pool index for indirect loads).
    Const,
    /// Operation result pushed onto the stack.
    Stack,
    /// Merge of two branch versions.
    Merge,
    /// No-op pass-through keeping dependency edges well-formed.
    Pipe,
    /// Consumed only for a control decision.
    Sink,
    /// Runtime-assumption guard of a speculatively inlined call.
    Checker,
}

/// One immutable node of the value graph.
#[derive(Debug, Clone)]
pub struct Datum {
    /// Variant.
    pub kind: DatumKind,
    /// Kind-dependent value (slot id, field offset, constant, handle id).
    pub value: i64,
    /// True when the value occupies two conceptual stack slots.
    pub wide: bool,
    /// The instruction that created this datum.
    pub creator: InstrId,
    /// The datum producing this access's base reference, if any.
    pub reference: Option<DatumId>,
    /// The index operand of an array access.
    pub index: Option<DatumId>,
    /// The stored value of a write, or a local write's forwarding source.
    pub stored: Option<DatumId>,
    /// For local writes: the store must materialize (it crosses a branch or
    /// loop boundary or feeds the controlling conditional).
    pub necessary: bool,
    /// For array accesses: the index operand came straight from a local
    /// load (a "direct" `a[i]` access, as opposed to `a[f(i)]`).
    pub direct_index: bool,
}

impl Datum {
    /// Creates a plain datum of `kind` with no operand links.
    #[must_use]
    pub fn new(kind: DatumKind, value: i64, wide: bool, creator: InstrId) -> Self {
        Datum {
            kind,
            value,
            wide,
            creator,
            reference: None,
            index: None,
            stored: None,
            necessary: false,
            direct_index: false,
        }
    }

    /// Access classification of this datum.
    #[must_use]
    pub fn access_type(&self) -> AccessType {
        match self.kind {
            DatumKind::LocalRead | DatumKind::ArrayRead | DatumKind::FieldRead => AccessType::Read,
            DatumKind::Stack => AccessType::Stack,
            _ => AccessType::Write,
        }
    }

    /// True for local-variable accesses.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.kind, DatumKind::LocalRead | DatumKind::LocalWrite)
    }

    /// True for heap accesses and merge values carrying references.
    #[must_use]
    pub fn is_heap(&self) -> bool {
        matches!(
            self.kind,
            DatumKind::ArrayRead
                | DatumKind::ArrayWrite
                | DatumKind::FieldRead
                | DatumKind::FieldWrite
        )
    }

    /// True for merge and pipe pass-through nodes.
    #[must_use]
    pub fn is_merge_like(&self) -> bool {
        matches!(self.kind, DatumKind::Merge | DatumKind::Pipe)
    }
}

/// Storage class of a heap access, derived from the creating opcode.
#[must_use]
pub fn mem_class(op: Opcode) -> Option<MemClass> {
    match op.kind() {
        Kind::ArrayLd | Kind::ArraySt | Kind::ArrayLen => Some(MemClass::Array),
        Kind::FieldLd | Kind::FieldSt => Some(MemClass::ObjectField),
        Kind::StaticLd | Kind::StaticSt => Some(MemClass::StaticField),
        _ => None,
    }
}

/// Element type moved by an array access; accesses of different element
/// types cannot target the same location.
#[must_use]
pub fn value_class(op: Opcode) -> Option<u8> {
    use Opcode::*;
    Some(match op {
        Iaload | Iastore => 0,
        Laload | Lastore => 1,
        Faload | Fastore => 2,
        Daload | Dastore => 3,
        Baload | Bastore => 4,
        Caload | Castore => 5,
        Saload | Sastore => 6,
        Aaload | Aastore | GetstaticAQuick => 7,
        _ => return None,
    })
}
