//! Data-flow graph construction by symbolic execution.
//!
//! The restructured control-flow graph is replayed once per synthesis
//! window: each instruction's *evaluate* step pops and pushes symbolic
//! values on the [`VStack`] and accumulates the value-dependency graph with
//! constant pooling, common-subexpression folding, store-to-load forwarding
//! and the speculative-inlining bookkeeping the external scheduler checks at
//! run time.

pub(crate) mod alu;
mod datum;
pub(crate) mod eval;
pub(crate) mod fold;
mod graph;
mod history;
pub(crate) mod heap;
pub(crate) mod phi;
mod vstack;

pub use datum::{mem_class, value_class, AccessType, Datum, DatumId, DatumKind, MemClass};
pub use eval::{build_dfg, LENGTH_INDEX, TYPE_TAG_FIELD};
pub use graph::{DEdge, DataGraph};
pub use history::{AccessHistory, AliasCandidates, LocalHistory};
pub use vstack::VStack;
