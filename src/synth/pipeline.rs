//! The synthesis pipeline.
//!
//! One [`Synthesizer`] turns a profiled hot-loop window into everything the
//! runtime and the external scheduler need: preparation, inlining and
//! unrolling rewrite the code image; control-flow construction, data-flow
//! replay and projection build the CDFG; the patch module produces the
//! enter/leave-fabric stub. Every stage is a total function of the previous
//! stage's output, and any failure aborts the invocation with no partial
//! graph visible to the caller.

use tracing::debug;

use crate::bytecode::CodeBuffer;
use crate::cdfg::project::Projection;
use crate::cdfg::{Cdfg, CdfgLoopForest, NodeId};
use crate::cfg::build_cfg;
use crate::dfg::build_dfg;
use crate::synth::inline::MethodInliner;
use crate::synth::patch::KernelPatch;
use crate::synth::prepare::prepare;
use crate::synth::unroll::unroll_inner_loops;
use crate::synth::{SynthesisConfig, SynthesisContext, SynthesisRequest};
use crate::{Error, Result};

/// Everything a successful synthesis produces.
#[derive(Debug)]
pub struct SynthesisOutcome {
    /// The target-agnostic graph.
    pub cdfg: Cdfg,
    /// The projected loop forest.
    pub loops: CdfgLoopForest,
    /// Alias-candidate pairs, keyed by the earlier access.
    pub aliases: Vec<(NodeId, Vec<NodeId>)>,
    /// Local slots the fabric receives.
    pub locals_received: usize,
    /// Local slots the fabric sends back.
    pub locals_sent: usize,
    /// Directly transferred constants.
    pub direct_constants: usize,
    /// Pool-resolved constants.
    pub indirect_constants: usize,
    /// The bytecode patch for the runtime system.
    pub patch: KernelPatch,
    /// Length of the analyzed window after the pre-passes, for the caller's
    /// kernel-length histogram.
    pub kernel_length: usize,
}

/// One synthesis invocation.
#[derive(Debug)]
pub struct Synthesizer {
    request: SynthesisRequest,
    config: SynthesisConfig,
}

impl Synthesizer {
    /// Creates a synthesizer over one request.
    #[must_use]
    pub fn new(request: SynthesisRequest, config: SynthesisConfig) -> Self {
        Synthesizer { request, config }
    }

    /// Runs the full pipeline.
    ///
    /// # Errors
    ///
    /// Every condition of the not-synthesizable taxonomy; the caller leaves
    /// the candidate interpreted and records the failure against it.
    pub fn generate(&self) -> Result<SynthesisOutcome> {
        let request = &self.request;
        let method = request
            .methods
            .get(request.method_index as usize)
            .ok_or_else(|| {
                Error::NotSynthesizable(format!("unknown method {}", request.method_index))
            })?;

        let start = (request.start - method.code_ref) as i32;
        let stop = (request.stop - method.code_ref) as i32;
        if request.blacklist.contains(&request.start) {
            return Err(Error::Blacklisted { addr: start });
        }
        debug!(method = %method.name, start, stop, "synthesis requested");

        // Stage 1: normalize the window.
        let code = CodeBuffer::from_section(&request.code_section, method.code_ref, method.code_len);
        let prepared = prepare(
            code,
            start,
            stop,
            &request.kernels,
            &request.intrinsics,
            &request.capabilities,
            &self.config,
        )?;
        let resume = prepared.resume;

        // Stage 2: inline calls.
        let mut intrinsics = request.intrinsics.clone();
        let inliner = MethodInliner::new(
            &request.methods,
            &request.code_section,
            &request.invocation_history,
            &request.kernels,
            &mut intrinsics,
            &request.capabilities,
            &self.config,
            method.code_ref as i32,
        )
        .with_blacklist(&request.blacklist);
        let inlined = inliner.run(prepared.code, start, prepared.stop, method.max_locals)?;

        // Stage 3: unroll the innermost loops.
        let unrolled = unroll_inner_loops(
            inlined.code,
            start,
            inlined.stop,
            inlined.namespace_stride,
            &self.config,
        )?;

        // Stages 4-6: graphs and projection.
        let mut ctx = SynthesisContext::new(
            unrolled.code,
            start,
            unrolled.stop,
            self.config.clone(),
            request.methods.clone(),
            intrinsics,
            inlined.namespace_stride,
            method.max_locals,
        );
        build_cfg(&mut ctx)?;
        build_dfg(&mut ctx)?;
        let projection = crate::cdfg::project(&ctx)?;

        // Stage 7: the runtime patch.
        let kernel_id = request.kernels.allocate()?;
        let window = &request.code_section[request.start..request.start + 8];
        let replaced: [u8; 8] = window
            .try_into()
            .map_err(|_| Error::NotSynthesizable("window shorter than one patch".into()))?;
        let resume_offset = u16::try_from(resume - start)
            .map_err(|_| Error::JumpOffsetOverflow { offset: resume - start })?;
        let Projection {
            cdfg,
            loops,
            aliases,
            locals_received,
            locals_sent,
            direct_constants,
            indirect_constants,
        } = projection;
        let patch = KernelPatch::build(
            kernel_id,
            locals_received.min(u8::MAX as usize) as u8,
            locals_sent.min(u8::MAX as usize) as u8,
            resume_offset,
            replaced,
        );

        Ok(SynthesisOutcome {
            cdfg,
            loops,
            aliases,
            locals_received,
            locals_sent,
            direct_constants,
            indirect_constants,
            patch,
            kernel_length: (unrolled.stop - start) as usize,
        })
    }
}
