//! The closed instruction set of the token machine.
//!
//! Every opcode the interpreted encoding can contain is listed here, together
//! with its byte value, encoded length, dispatch [`Kind`] and attribute
//! [`OpFlags`]. The synthesis pseudo-opcodes (start/stop/phi/dummy markers,
//! the fabric enter/leave patch opcodes and the synthetic increment-store)
//! live in the same enum so both graph-construction stages dispatch over one
//! closed set.

use bitflags::bitflags;
use strum::{Display, EnumIter};

bitflags! {
    /// Attribute set of an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u8 {
        /// Operates on 64-bit data (the value occupies two conceptual
        /// operand-stack slots).
        const WIDE = 1;
        /// Produces an object or array reference.
        const REF = 1 << 1;
        /// Reads from the heap (array element, object field, static field).
        const MEM_READ = 1 << 2;
        /// Writes to the heap.
        const MEM_WRITE = 1 << 3;
    }
}

/// Dispatch class of an opcode.
///
/// The control-flow *insert* step and the data-flow *evaluate* step both
/// dispatch over this enum, which mirrors the closed set of behaviors the
/// token machine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// No observable effect on stack or graph.
    Nop,
    /// Pushes a constant (immediate, short form or constant-pool load).
    ConstLd,
    /// Local-variable load.
    LocalLd,
    /// Local-variable store.
    LocalSt,
    /// Array-element load.
    ArrayLd,
    /// Array-element store.
    ArraySt,
    /// Array-length query.
    ArrayLen,
    /// Object-field load (resolved form).
    FieldLd,
    /// Object-field store (resolved form).
    FieldSt,
    /// Static-field load (resolved form).
    StaticLd,
    /// Static-field store (resolved form).
    StaticSt,
    /// Discards one stack value (two slots for the paired form).
    Pop,
    /// Stack duplication family; the payload selects the exact shuffle.
    Dup(DupShape),
    /// Swaps the two top stack values.
    Swap,
    /// Binary ALU operation.
    AluBin,
    /// Unary ALU operation (including conversions).
    AluUn,
    /// Local-variable increment by immediate.
    Iinc,
    /// Conditional branch comparing one operand against zero.
    If,
    /// Conditional branch comparing two operands.
    IfCmp,
    /// Unconditional jump.
    Goto,
    /// Method return.
    Return,
    /// Statically bound call (resolved form).
    InvokeStatic,
    /// Dynamically dispatched call, resolved speculatively from the
    /// invocation history and guarded by a runtime type-tag check.
    InvokeVirtual,
    /// Non-virtual instance call (resolved form).
    InvokeSpecial,
    /// Synthesis start pseudo-instruction.
    Start,
    /// Synthesis stop pseudo-instruction.
    Stop,
    /// Control-flow merge pseudo-instruction.
    Phi,
    /// Branch-arm marker pseudo-instruction.
    Dummy,
    /// Known but not synthesizable: allocation, exceptions, threading,
    /// unresolved field/call forms, computed jumps.
    Unsupported,
}

/// Exact shuffle performed by a [`Kind::Dup`] opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DupShape {
    /// `.., a -> .., a, a`
    Dup,
    /// `.., b, a -> .., a, b, a`
    DupX1,
    /// `.., c, b, a -> .., a, c, b, a`
    DupX2,
    /// `.., b, a -> .., b, a, b, a` (or one wide value doubled)
    Dup2,
    /// `.., c, b, a -> .., b, a, c, b, a`
    Dup2X1,
    /// `.., d, c, b, a -> .., b, a, d, c, b, a`
    Dup2X2,
}

/// One opcode of the token-machine encoding.
///
/// Identity during graph construction is `(Opcode, address)`; the enum only
/// carries the static properties below. Mnemonics follow the interpreted
/// encoding and render via [`Display`](std::fmt::Display).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[allow(missing_docs)]
pub enum Opcode {
    Nop,
    AconstNull,
    IconstM1,
    Iconst0,
    Iconst1,
    Iconst2,
    Iconst3,
    Iconst4,
    Iconst5,
    Lconst0,
    Lconst1,
    Fconst0,
    Fconst1,
    Fconst2,
    Dconst0,
    Dconst1,
    Bipush,
    Sipush,
    Ldc,
    LdcW,
    Ldc2W,
    Iload,
    Lload,
    Fload,
    Dload,
    Aload,
    Iload0,
    Iload1,
    Iload2,
    Iload3,
    Lload0,
    Lload1,
    Lload2,
    Lload3,
    Fload0,
    Fload1,
    Fload2,
    Fload3,
    Dload0,
    Dload1,
    Dload2,
    Dload3,
    Aload0,
    Aload1,
    Aload2,
    Aload3,
    Iaload,
    Laload,
    Faload,
    Daload,
    Aaload,
    Baload,
    Caload,
    Saload,
    Istore,
    Lstore,
    Fstore,
    Dstore,
    Astore,
    Istore0,
    Istore1,
    Istore2,
    Istore3,
    Lstore0,
    Lstore1,
    Lstore2,
    Lstore3,
    Fstore0,
    Fstore1,
    Fstore2,
    Fstore3,
    Dstore0,
    Dstore1,
    Dstore2,
    Dstore3,
    Astore0,
    Astore1,
    Astore2,
    Astore3,
    Iastore,
    Lastore,
    Fastore,
    Dastore,
    Aastore,
    Bastore,
    Castore,
    Sastore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    Iadd,
    Ladd,
    Fadd,
    Dadd,
    Isub,
    Lsub,
    Fsub,
    Dsub,
    Imul,
    Lmul,
    Fmul,
    Dmul,
    Idiv,
    Ldiv,
    Fdiv,
    Ddiv,
    Irem,
    Lrem,
    Frem,
    Drem,
    Ineg,
    Lneg,
    Fneg,
    Dneg,
    Ishl,
    Lshl,
    Ishr,
    Lshr,
    Iushr,
    Lushr,
    Iand,
    Land,
    Ior,
    Lor,
    Ixor,
    Lxor,
    Iinc,
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
    I2b,
    I2c,
    I2s,
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,
    Ifeq,
    Ifne,
    Iflt,
    Ifge,
    Ifgt,
    Ifle,
    IfIcmpeq,
    IfIcmpne,
    IfIcmplt,
    IfIcmpge,
    IfIcmpgt,
    IfIcmple,
    IfAcmpeq,
    IfAcmpne,
    Goto,
    Jsr,
    Ret,
    Tableswitch,
    Lookupswitch,
    Ireturn,
    Lreturn,
    Freturn,
    Dreturn,
    Areturn,
    Return,
    Getstatic,
    Putstatic,
    Getfield,
    Putfield,
    Invokevirtual,
    Invokespecial,
    Invokestatic,
    Invokeinterface,
    New,
    Newarray,
    Anewarray,
    Arraylength,
    Athrow,
    Checkcast,
    Instanceof,
    Monitorenter,
    Monitorexit,
    Wide,
    Multianewarray,
    Ifnull,
    Ifnonnull,
    GotoW,
    JsrW,
    LdcWQuick,
    Ldc2WQuick,
    GetfieldQuick,
    GetfieldQuickArray,
    PutfieldQuick,
    PutfieldQuickArray,
    Getfield2Quick,
    Putfield2Quick,
    GetstaticQuick,
    PutstaticQuick,
    Getstatic2Quick,
    Putstatic2Quick,
    GetstaticAQuick,
    PutstaticAQuick,
    InvokevirtualQuick,
    InvokespecialQuick,
    InvokestaticQuick,
    InvokeinterfaceQuick,
    NewQuick,
    Newarray32,
    Newarray64,
    AnewarrayQuick,
    MultianewarrayQuick,
    CheckcastQuick,
    InstanceofQuick,
    InvokeNative,
    SwitchThread,
    SwitchCleanThread,
    /// Marks the start of an already-synthesized range; first patch byte.
    EnterFabric,
    /// Marks the resume point of an already-synthesized range.
    LeaveFabric,

    // Synthesis pseudo-opcodes. These never appear in the encoded stream.
    /// Window-entry marker seeding the control-flow traversal.
    SynthStart,
    /// Window-exit marker terminating every escaping path.
    SynthStop,
    /// Control-flow merge node.
    SynthPhi,
    /// Branch-arm marker inserted under every conditional.
    SynthDummy,
    /// Synthetic store half of a decomposed local increment.
    IincStore,
    /// Runtime type-tag comparison guarding a speculatively inlined call.
    TagCmp,
    /// Fabric-native sine intrinsic.
    FSin,
    /// Fabric-native cosine intrinsic.
    FCos,
}

impl Opcode {
    /// Decodes a raw byte into an opcode.
    ///
    /// Every byte decodes: values without an assigned operation come back as
    /// recognizable [`Kind::Unsupported`] opcodes so the caller can report
    /// the offending byte and position.
    #[must_use]
    pub fn decode(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x00 => Nop,
            0x01 => AconstNull,
            0x02 => IconstM1,
            0x03 => Iconst0,
            0x04 => Iconst1,
            0x05 => Iconst2,
            0x06 => Iconst3,
            0x07 => Iconst4,
            0x08 => Iconst5,
            0x09 => Lconst0,
            0x0a => Lconst1,
            0x0b => Fconst0,
            0x0c => Fconst1,
            0x0d => Fconst2,
            0x0e => Dconst0,
            0x0f => Dconst1,
            0x10 => Bipush,
            0x11 => Sipush,
            0x12 => Ldc,
            0x13 => LdcW,
            0x14 => Ldc2W,
            0x15 => Iload,
            0x16 => Lload,
            0x17 => Fload,
            0x18 => Dload,
            0x19 => Aload,
            0x1a => Iload0,
            0x1b => Iload1,
            0x1c => Iload2,
            0x1d => Iload3,
            0x1e => Lload0,
            0x1f => Lload1,
            0x20 => Lload2,
            0x21 => Lload3,
            0x22 => Fload0,
            0x23 => Fload1,
            0x24 => Fload2,
            0x25 => Fload3,
            0x26 => Dload0,
            0x27 => Dload1,
            0x28 => Dload2,
            0x29 => Dload3,
            0x2a => Aload0,
            0x2b => Aload1,
            0x2c => Aload2,
            0x2d => Aload3,
            0x2e => Iaload,
            0x2f => Laload,
            0x30 => Faload,
            0x31 => Daload,
            0x32 => Aaload,
            0x33 => Baload,
            0x34 => Caload,
            0x35 => Saload,
            0x36 => Istore,
            0x37 => Lstore,
            0x38 => Fstore,
            0x39 => Dstore,
            0x3a => Astore,
            0x3b => Istore0,
            0x3c => Istore1,
            0x3d => Istore2,
            0x3e => Istore3,
            0x3f => Lstore0,
            0x40 => Lstore1,
            0x41 => Lstore2,
            0x42 => Lstore3,
            0x43 => Fstore0,
            0x44 => Fstore1,
            0x45 => Fstore2,
            0x46 => Fstore3,
            0x47 => Dstore0,
            0x48 => Dstore1,
            0x49 => Dstore2,
            0x4a => Dstore3,
            0x4b => Astore0,
            0x4c => Astore1,
            0x4d => Astore2,
            0x4e => Astore3,
            0x4f => Iastore,
            0x50 => Lastore,
            0x51 => Fastore,
            0x52 => Dastore,
            0x53 => Aastore,
            0x54 => Bastore,
            0x55 => Castore,
            0x56 => Sastore,
            0x57 => Pop,
            0x58 => Pop2,
            0x59 => Dup,
            0x5a => DupX1,
            0x5b => DupX2,
            0x5c => Dup2,
            0x5d => Dup2X1,
            0x5e => Dup2X2,
            0x5f => Swap,
            0x60 => Iadd,
            0x61 => Ladd,
            0x62 => Fadd,
            0x63 => Dadd,
            0x64 => Isub,
            0x65 => Lsub,
            0x66 => Fsub,
            0x67 => Dsub,
            0x68 => Imul,
            0x69 => Lmul,
            0x6a => Fmul,
            0x6b => Dmul,
            0x6c => Idiv,
            0x6d => Ldiv,
            0x6e => Fdiv,
            0x6f => Ddiv,
            0x70 => Irem,
            0x71 => Lrem,
            0x72 => Frem,
            0x73 => Drem,
            0x74 => Ineg,
            0x75 => Lneg,
            0x76 => Fneg,
            0x77 => Dneg,
            0x78 => Ishl,
            0x79 => Lshl,
            0x7a => Ishr,
            0x7b => Lshr,
            0x7c => Iushr,
            0x7d => Lushr,
            0x7e => Iand,
            0x7f => Land,
            0x80 => Ior,
            0x81 => Lor,
            0x82 => Ixor,
            0x83 => Lxor,
            0x84 => Iinc,
            0x85 => I2l,
            0x86 => I2f,
            0x87 => I2d,
            0x88 => L2i,
            0x89 => L2f,
            0x8a => L2d,
            0x8b => F2i,
            0x8c => F2l,
            0x8d => F2d,
            0x8e => D2i,
            0x8f => D2l,
            0x90 => D2f,
            0x91 => I2b,
            0x92 => I2c,
            0x93 => I2s,
            0x94 => Lcmp,
            0x95 => Fcmpl,
            0x96 => Fcmpg,
            0x97 => Dcmpl,
            0x98 => Dcmpg,
            0x99 => Ifeq,
            0x9a => Ifne,
            0x9b => Iflt,
            0x9c => Ifge,
            0x9d => Ifgt,
            0x9e => Ifle,
            0x9f => IfIcmpeq,
            0xa0 => IfIcmpne,
            0xa1 => IfIcmplt,
            0xa2 => IfIcmpge,
            0xa3 => IfIcmpgt,
            0xa4 => IfIcmple,
            0xa5 => IfAcmpeq,
            0xa6 => IfAcmpne,
            0xa7 => Goto,
            0xa8 => Jsr,
            0xa9 => Ret,
            0xaa => Tableswitch,
            0xab => Lookupswitch,
            0xac => Ireturn,
            0xad => Lreturn,
            0xae => Freturn,
            0xaf => Dreturn,
            0xb0 => Areturn,
            0xb1 => Return,
            0xb2 => Getstatic,
            0xb3 => Putstatic,
            0xb4 => Getfield,
            0xb5 => Putfield,
            0xb6 => Invokevirtual,
            0xb7 => Invokespecial,
            0xb8 => Invokestatic,
            0xb9 => Invokeinterface,
            0xbb => New,
            0xbc => Newarray,
            0xbd => Anewarray,
            0xbe => Arraylength,
            0xbf => Athrow,
            0xc0 => Checkcast,
            0xc1 => Instanceof,
            0xc2 => Monitorenter,
            0xc3 => Monitorexit,
            0xc4 => Wide,
            0xc5 => Multianewarray,
            0xc6 => Ifnull,
            0xc7 => Ifnonnull,
            0xc8 => GotoW,
            0xc9 => JsrW,
            0xcc => LdcWQuick,
            0xcd => Ldc2WQuick,
            0xce => GetfieldQuick,
            0xcf => PutfieldQuick,
            0xd0 => Getfield2Quick,
            0xd1 => Putfield2Quick,
            0xd2 => GetstaticQuick,
            0xd3 => PutstaticQuick,
            0xd4 => Getstatic2Quick,
            0xd5 => Putstatic2Quick,
            0xd6 => InvokevirtualQuick,
            0xd7 => InvokespecialQuick,
            0xd9 => InvokestaticQuick,
            0xda => InvokeinterfaceQuick,
            0xdb => Newarray32,
            0xdc => Newarray64,
            0xdd => NewQuick,
            0xde => AnewarrayQuick,
            0xdf => MultianewarrayQuick,
            0xe1 => CheckcastQuick,
            0xe2 => InstanceofQuick,
            0xe4 => PutstaticAQuick,
            0xe6 => GetfieldQuickArray,
            0xe7 => GetstaticAQuick,
            0xed => PutfieldQuickArray,
            0xf4..=0xf7 | 0xf8 | 0xf9 | 0xfa => return None,
            0xfb => InvokeNative,
            0xfc => SwitchCleanThread,
            0xfd => SwitchThread,
            0xfe => EnterFabric,
            0xff => LeaveFabric,
            _ => return None,
        })
    }

    /// Encoded length of this instruction including operand bytes.
    #[must_use]
    pub fn len(self) -> usize {
        use Opcode::*;
        match self {
            SynthStart => 0,
            Bipush | Ldc | Iload | Lload | Fload | Dload | Aload | Istore | Lstore | Fstore
            | Dstore | Astore | IincStore => 2,
            Sipush | LdcW | Ldc2W | Iinc | Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle | IfIcmpeq
            | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple | IfAcmpeq | IfAcmpne
            | Goto | Getfield | LdcWQuick | Ldc2WQuick | GetfieldQuick | GetfieldQuickArray
            | PutfieldQuick | PutfieldQuickArray | Getfield2Quick | Putfield2Quick
            | GetstaticQuick | PutstaticQuick | Getstatic2Quick | Putstatic2Quick
            | GetstaticAQuick | PutstaticAQuick | InvokevirtualQuick | InvokespecialQuick
            | InvokestaticQuick | FSin | FCos => 3,
            InvokeinterfaceQuick => 5,
            _ => 1,
        }
    }

    /// The byte value this opcode encodes to, if it has one.
    ///
    /// Synthesis pseudo-opcodes have no encoding and return `None`.
    #[must_use]
    pub fn byte(self) -> Option<u8> {
        use Opcode::*;
        match self {
            SynthStart | SynthStop | SynthPhi | SynthDummy | IincStore | TagCmp | FSin | FCos => {
                None
            }
            _ => (0u8..=0xff).find(|&b| Opcode::decode(b) == Some(self)),
        }
    }

    /// Dispatch class of this opcode.
    #[must_use]
    pub fn kind(self) -> Kind {
        use Opcode::*;
        match self {
            Nop => Kind::Nop,
            AconstNull | IconstM1 | Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5
            | Lconst0 | Lconst1 | Fconst0 | Fconst1 | Fconst2 | Dconst0 | Dconst1 | Bipush
            | Sipush | Ldc | LdcW | Ldc2W | LdcWQuick | Ldc2WQuick => Kind::ConstLd,
            Iload | Lload | Fload | Dload | Aload | Iload0 | Iload1 | Iload2 | Iload3 | Lload0
            | Lload1 | Lload2 | Lload3 | Fload0 | Fload1 | Fload2 | Fload3 | Dload0 | Dload1
            | Dload2 | Dload3 | Aload0 | Aload1 | Aload2 | Aload3 => Kind::LocalLd,
            Istore | Lstore | Fstore | Dstore | Astore | Istore0 | Istore1 | Istore2 | Istore3
            | Lstore0 | Lstore1 | Lstore2 | Lstore3 | Fstore0 | Fstore1 | Fstore2 | Fstore3
            | Dstore0 | Dstore1 | Dstore2 | Dstore3 | Astore0 | Astore1 | Astore2 | Astore3
            | IincStore => Kind::LocalSt,
            Iaload | Laload | Faload | Daload | Aaload | Baload | Caload | Saload => Kind::ArrayLd,
            Iastore | Lastore | Fastore | Dastore | Aastore | Bastore | Castore | Sastore => {
                Kind::ArraySt
            }
            Arraylength => Kind::ArrayLen,
            GetfieldQuick | GetfieldQuickArray | Getfield2Quick => Kind::FieldLd,
            PutfieldQuick | Putfield2Quick => Kind::FieldSt,
            GetstaticQuick | Getstatic2Quick | GetstaticAQuick => Kind::StaticLd,
            PutstaticQuick | Putstatic2Quick => Kind::StaticSt,
            Pop | Pop2 => Kind::Pop,
            Dup => Kind::Dup(DupShape::Dup),
            DupX1 => Kind::Dup(DupShape::DupX1),
            DupX2 => Kind::Dup(DupShape::DupX2),
            Dup2 => Kind::Dup(DupShape::Dup2),
            Dup2X1 => Kind::Dup(DupShape::Dup2X1),
            Dup2X2 => Kind::Dup(DupShape::Dup2X2),
            Swap => Kind::Swap,
            Iadd | Ladd | Fadd | Dadd | Isub | Lsub | Fsub | Dsub | Imul | Lmul | Fmul | Dmul
            | Idiv | Ldiv | Fdiv | Ddiv | Irem | Lrem | Frem | Drem | Ishl | Lshl | Ishr
            | Lshr | Iushr | Lushr | Iand | Land | Ior | Lor | Ixor | Lxor | Lcmp | Fcmpl
            | Fcmpg | Dcmpl | Dcmpg => Kind::AluBin,
            Ineg | Lneg | Fneg | Dneg | I2l | I2f | I2d | L2i | L2f | L2d | F2i | F2l | F2d
            | D2i | D2l | D2f | I2b | I2c | I2s | FSin | FCos => Kind::AluUn,
            Iinc => Kind::Iinc,
            Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle => Kind::If,
            IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple | IfAcmpeq
            | IfAcmpne | TagCmp => Kind::IfCmp,
            Goto => Kind::Goto,
            Ireturn | Lreturn | Freturn | Dreturn | Areturn | Return => Kind::Return,
            InvokestaticQuick => Kind::InvokeStatic,
            InvokevirtualQuick | InvokeinterfaceQuick => Kind::InvokeVirtual,
            InvokespecialQuick => Kind::InvokeSpecial,
            SynthStart => Kind::Start,
            SynthStop => Kind::Stop,
            SynthPhi => Kind::Phi,
            SynthDummy => Kind::Dummy,
            _ => Kind::Unsupported,
        }
    }

    /// Attribute flags of this opcode.
    #[must_use]
    pub fn flags(self) -> OpFlags {
        use Opcode::*;
        let mut f = OpFlags::empty();
        if matches!(
            self,
            Lconst0
                | Lconst1
                | Dconst0
                | Dconst1
                | Ldc2W
                | Ldc2WQuick
                | Lload
                | Dload
                | Lload0
                | Lload1
                | Lload2
                | Lload3
                | Dload0
                | Dload1
                | Dload2
                | Dload3
                | Laload
                | Daload
                | Lstore
                | Dstore
                | Lstore0
                | Lstore1
                | Lstore2
                | Lstore3
                | Dstore0
                | Dstore1
                | Dstore2
                | Dstore3
                | Lastore
                | Dastore
                | Pop2
                | Ladd
                | Dadd
                | Lsub
                | Dsub
                | Lmul
                | Dmul
                | Ldiv
                | Ddiv
                | Lrem
                | Drem
                | Lneg
                | Dneg
                | Land
                | Lor
                | Lxor
                | I2l
                | I2d
                | F2l
                | F2d
                | D2l
                | Lcmp
                | Dcmpl
                | Dcmpg
                | Getfield2Quick
                | Putfield2Quick
                | Getstatic2Quick
                | Putstatic2Quick
        ) {
            f |= OpFlags::WIDE;
        }
        if matches!(
            self,
            Aload | Aload0 | Aload1 | Aload2 | Aload3 | Aaload | Astore | Astore0 | Astore1
                | Astore2 | Astore3 | GetfieldQuickArray | GetstaticAQuick
        ) {
            f |= OpFlags::REF;
        }
        if matches!(
            self,
            Iaload
                | Laload
                | Faload
                | Daload
                | Aaload
                | Baload
                | Caload
                | Saload
                | GetfieldQuick
                | GetfieldQuickArray
                | Getfield2Quick
                | GetstaticQuick
                | Getstatic2Quick
                | GetstaticAQuick
                | Arraylength
        ) {
            f |= OpFlags::MEM_READ;
        }
        if matches!(
            self,
            Iastore
                | Lastore
                | Fastore
                | Dastore
                | Aastore
                | Bastore
                | Castore
                | Sastore
                | PutfieldQuick
                | Putfield2Quick
                | PutstaticQuick
                | Putstatic2Quick
        ) {
            f |= OpFlags::MEM_WRITE;
        }
        f
    }

    /// Shorthand for the 64-bit-data flag.
    #[must_use]
    pub fn wide(self) -> bool {
        self.flags().contains(OpFlags::WIDE)
    }

    /// Shorthand for the produces-reference flag.
    #[must_use]
    pub fn creates_reference(self) -> bool {
        self.flags().contains(OpFlags::REF)
    }

    /// True for constant-pool loads whose node value is a pool index that the
    /// runtime resolves indirectly.
    #[must_use]
    pub fn indirect_const(self) -> bool {
        matches!(self, Opcode::LdcWQuick | Opcode::Ldc2WQuick)
    }

    /// True for every conditional-branch opcode.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(self.kind(), Kind::If | Kind::IfCmp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_decode_roundtrip() {
        for byte in 0u8..=0xff {
            if let Some(op) = Opcode::decode(byte) {
                assert_eq!(op.byte(), Some(byte), "{op} encodes back to its byte");
            }
        }
    }

    #[test]
    fn test_pseudo_ops_have_no_encoding() {
        assert_eq!(Opcode::SynthPhi.byte(), None);
        assert_eq!(Opcode::SynthStart.byte(), None);
        assert_eq!(Opcode::IincStore.byte(), None);
    }

    #[test]
    fn test_kinds_are_total() {
        // Every opcode dispatches somewhere; unsupported is an explicit kind.
        for op in Opcode::iter() {
            let _ = op.kind();
        }
    }

    #[test]
    fn test_wide_flags() {
        assert!(Opcode::Ladd.wide());
        assert!(Opcode::Dload2.wide());
        assert!(!Opcode::Iadd.wide());
        // Long shifts take a 32-bit shift amount and are not tagged wide.
        assert!(!Opcode::Lshl.wide());
    }

    #[test]
    fn test_branch_lengths() {
        assert_eq!(Opcode::IfIcmpge.len(), 3);
        assert_eq!(Opcode::Goto.len(), 3);
        assert_eq!(Opcode::Iload0.len(), 1);
        assert_eq!(Opcode::SynthStart.len(), 0);
    }
}
