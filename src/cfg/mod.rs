//! Control-flow reconstruction.
//!
//! The front end cannot rely on the source structure of the code it
//! synthesizes: it re-discovers control flow by walking the instruction
//! stream from the profiled loop entry, then restructures the discovered
//! graph until every confluence is closed by a merge node and every backward
//! jump is profiled into the loop hierarchy.

pub(crate) mod builder;
mod graph;
mod instruction;
mod loops;
pub(crate) mod merge;
pub(crate) mod restructure;

pub use builder::build_cfg;
pub use graph::InstrGraph;
pub use instruction::{IfInfo, InstrExt, InstrId, Instruction, PhiInfo, SceController};
pub use loops::{Loop, LoopId, LoopTree};
