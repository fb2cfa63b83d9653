//! Common imports for working with the synthesis front end.
//!
//! ```rust
//! use loomsynth::prelude::*;
//! ```

pub use crate::bytecode::{BytecodeAssembler, CodeBuffer, Opcode};
pub use crate::cdfg::{Cdfg, CdfgNode, NodeId, Operator};
pub use crate::synth::{
    AliasPolicy, FabricCapabilities, Intrinsics, KernelHistogram, KernelPatch, KernelTable,
    MethodInfo, SynthesisConfig, SynthesisOutcome, SynthesisRequest, Synthesizer,
};
pub use crate::{Error, Result};
