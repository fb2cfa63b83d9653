//! # loomsynth
//!
//! `loomsynth` is the dynamic-synthesis front end of a cycle-accurate
//! token-machine simulator with an attached reconfigurable spatial array
//! (the *fabric*). While the simulated processor interprets its instruction
//! stream, a profiler identifies frequently taken loop bodies; this crate
//! compiles such a byte range into a target-independent control/data-flow
//! graph (CDFG), a loop hierarchy and an alias-candidate map, ready for the
//! external spatial scheduler, and patches the instruction stream with an
//! enter/leave-fabric stub.
//!
//! The result must be bit-exact with interpreted execution, while the front
//! end operates on a foreign, already-compiled stack-machine encoding it
//! cannot re-parse at the source level.
//!
//! # Pipeline
//!
//! 1. **Preparation** - revert earlier kernel patches inside the window,
//!    repair the encoding's while-loop defect, reject unsupported shapes.
//! 2. **Inlining** - splice every callee into the window with a disjoint
//!    local-slot namespace; dynamically dispatched targets are resolved
//!    speculatively from the invocation history and guarded at run time.
//! 3. **Unrolling** - replicate the innermost loop bodies, optionally with
//!    heuristic prefetch/fill copies.
//! 4. **Control flow** - rediscover and restructure the control-flow graph,
//!    one merge node per confluence, and profile the loop hierarchy.
//! 5. **Data flow** - symbolically replay the restructured graph into a
//!    value-dependency graph with constant pooling, store forwarding,
//!    common-subexpression folding and alias candidates.
//! 6. **Projection** - emit the target-agnostic CDFG and the 8-byte patch.
//!
//! # Examples
//!
//! ```rust
//! use loomsynth::bytecode::BytecodeAssembler;
//! use loomsynth::synth::{
//!     FabricCapabilities, Intrinsics, KernelTable, MethodInfo, SynthesisConfig,
//!     SynthesisRequest, Synthesizer,
//! };
//!
//! // for (i = ...; i < 10; i++) {}
//! let mut asm = BytecodeAssembler::new();
//! let head = asm.here();
//! asm.iload(1).bipush(10).if_icmpge_fwd("exit");
//! asm.iinc(1, 1);
//! let back = asm.goto_back(head);
//! asm.label("exit");
//! let code = asm.finish();
//!
//! let request = SynthesisRequest {
//!     methods: vec![MethodInfo {
//!         name: "hot/loop".into(),
//!         code_ref: 0,
//!         code_len: code.len(),
//!         arg_count: 0,
//!         max_locals: 4,
//!     }],
//!     code_section: code,
//!     method_index: 0,
//!     start: head as usize,
//!     stop: back as usize,
//!     invocation_history: Vec::new(),
//!     capabilities: FabricCapabilities::full(),
//!     intrinsics: Intrinsics::new(),
//!     kernels: KernelTable::new(),
//!     blacklist: Default::default(),
//! };
//! let outcome = Synthesizer::new(request, SynthesisConfig::default())
//!     .generate()
//!     .expect("loop is synthesizable");
//! assert!(!outcome.cdfg.is_empty());
//! assert_eq!(outcome.patch.bytes.len(), 8);
//! ```
//!
//! # Failure model
//!
//! Every failure is one closed taxonomy, [`Error`]: the caller treats any
//! variant as "leave this candidate interpreted". Nothing is retried
//! internally and no partial graph is ever returned.

#![warn(missing_docs)]

pub mod bytecode;
pub mod cdfg;
pub mod cfg;
pub mod dfg;
pub mod synth;

mod error;
pub mod prelude;

pub use error::Error;

/// Crate-wide result type carrying the not-synthesizable taxonomy.
pub type Result<T> = std::result::Result<T, Error>;
