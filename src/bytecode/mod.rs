//! Instruction model of the token machine.
//!
//! The synthesis front end operates on an already-compiled, resolved
//! ("quick") stack-machine encoding it cannot re-parse at the source level.
//! This module owns the closed [`Opcode`] set, the versioned [`CodeBuffer`]
//! the pre-passes rewrite, and a [`BytecodeAssembler`] for building fixture
//! windows in tests and benchmarks.

mod assembler;
mod buffer;
mod opcode;

pub use assembler::BytecodeAssembler;
pub use buffer::{CodeBuffer, JumpTables};
pub use opcode::{DupShape, Kind, OpFlags, Opcode};
