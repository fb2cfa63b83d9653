//! Target-agnostic graph nodes.

use strum::{Display, EnumIter, IntoEnumIterator};

/// Index of a node in the projected graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Raw index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operation tag of a projected node.
///
/// This is the fixed vocabulary the external scheduler maps onto fabric
/// processing elements; the projector translates every instruction into one
/// of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
#[allow(missing_docs)]
pub enum Operator {
    Iadd,
    Isub,
    Imul,
    Idiv,
    Irem,
    Ior,
    Iand,
    Ixor,
    Ishl,
    Ishr,
    Iushr,
    Ladd,
    Lsub,
    Lmul,
    Ldiv,
    Lrem,
    Lor,
    Land,
    Lxor,
    Lshl,
    Lshr,
    Lushr,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Dadd,
    Dsub,
    Dmul,
    Ddiv,
    Ineg,
    Lneg,
    Fneg,
    Dneg,
    I2b,
    I2c,
    I2s,
    I2l,
    I2f,
    I2d,
    L2i,
    L2f,
    L2d,
    F2i,
    F2l,
    F2d,
    D2i,
    D2l,
    D2f,
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,
    /// Local-variable read.
    Load,
    /// Local-variable write.
    Store,
    /// 64-bit local-variable read.
    Load64,
    /// 64-bit local-variable write.
    Store64,
    /// Heap read through the memory unit.
    DmaLoad,
    /// Heap write through the memory unit.
    DmaStore,
    /// 64-bit heap read.
    DmaLoad64,
    /// 64-bit heap write.
    DmaStore64,
    /// Branch-merge multiplexer.
    Mux,
    /// 32-bit constant.
    Const,
    /// 64-bit constant.
    Const64,
    Ifeq,
    Ifne,
    Iflt,
    Ifge,
    Ifgt,
    Ifle,
    /// Runtime dispatch-tag comparison guarding a speculative inline.
    TagCmp,
    /// Pass-through.
    Nop,
    /// Fabric-native sine.
    Fsin,
    /// Fabric-native cosine.
    Fcos,
}

impl Operator {
    /// Number of operand slots a node of this operation owns.
    #[must_use]
    pub fn operand_count(self) -> usize {
        use Operator::*;
        match self {
            Const | Const64 | Load | Load64 => 0,
            Ineg | Lneg | Fneg | Dneg | I2b | I2c | I2s | I2l | I2f | I2d | L2i | L2f | L2d
            | F2i | F2l | F2d | D2i | D2l | D2f | Store | Store64 | Nop | Fsin | Fcos => 1,
            DmaLoad | DmaLoad64 | Mux => 2,
            DmaStore | DmaStore64 => 3,
            _ => 2,
        }
    }

    /// Every operation the projector can emit.
    pub fn all() -> impl Iterator<Item = Operator> {
        Operator::iter()
    }
}

/// One node of the projected control/data-flow graph.
#[derive(Debug, Clone)]
pub struct CdfgNode {
    /// Address of the originating instruction.
    pub addr: i32,
    /// Operation tag.
    pub op: Operator,
    /// Slot id for local accesses and multiplexers, value (or pool index)
    /// for constants.
    pub value: Option<i64>,
    /// True for 64-bit values.
    pub wide: bool,
    /// Fixed-arity operand array, one slot per operand.
    pub predecessors: Vec<Option<NodeId>>,
    /// Controlling decision node and arm.
    pub controller: Option<(NodeId, bool)>,
    /// Constant resolved indirectly through the constant pool at run time.
    pub indirect_const: bool,
    /// Short-circuit controller of the true arm of this decision node.
    pub sce_true: Option<(NodeId, bool)>,
    /// Short-circuit controller of the false arm.
    pub sce_false: Option<(NodeId, bool)>,
}

impl CdfgNode {
    /// Creates a node with empty operand slots.
    #[must_use]
    pub fn new(addr: i32, op: Operator) -> Self {
        CdfgNode {
            addr,
            op,
            value: None,
            wide: false,
            predecessors: vec![None; op.operand_count()],
            controller: None,
            indirect_const: false,
            sce_true: None,
            sce_false: None,
        }
    }
}
