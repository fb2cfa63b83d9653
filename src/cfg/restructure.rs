//! Structural corrections and loop profiling.
//!
//! Two passes run after branch merging: the graph-level correction of the
//! encoding's while-loop defect (several backward jumps sharing one target
//! are collapsed into the single canonical backward jump), and the loop
//! profiling that turns every surviving backward jump into a [`Loop`] of the
//! hierarchy with its controlling conditional.
//!
//! [`Loop`]: crate::cfg::Loop

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::cfg::{InstrExt, InstrId};
use crate::synth::SynthesisContext;
use crate::Result;

/// Collapses duplicate backward jumps.
///
/// The bytecode compiler occasionally closes a loop with a second backward
/// jump to the same header instead of jumping forward to the loop's
/// canonical back jump. After branch merging such a pair shows up as two
/// registered backward gotos with one target; the earlier ("minor") jump is
/// excised and its path spliced through the shared merge node in front of
/// the canonical jump, with branch points along the path rewritten.
///
/// # Errors
///
/// Currently infallible; kept fallible for parity with the surrounding
/// restructuring stages.
pub fn correct_while_defect(ctx: &mut SynthesisContext) -> Result<()> {
    let mut canonical: HashMap<i32, InstrId> = HashMap::new();

    for gt in ctx.graph.gotos().to_vec() {
        if !ctx.graph.contains(gt) {
            continue;
        }
        let gt_addr = ctx.graph.instr(gt).addr;
        let target = ctx.code.jump_target(gt_addr);

        let Some(&known) = canonical.get(&target) else {
            canonical.insert(target, gt);
            continue;
        };
        if target >= gt_addr {
            continue;
        }

        let known_addr = ctx.graph.instr(known).addr;
        let (real, minor) = if known_addr < gt_addr {
            canonical.insert(target, gt);
            (gt, known)
        } else {
            (known, gt)
        };
        trace!(
            real = ctx.graph.instr(real).addr,
            minor = ctx.graph.instr(minor).addr,
            target,
            "collapsing duplicate backward jump"
        );

        // The minor jump's successor is the merge node the branch merger
        // spliced at the shared continuation.
        let Some(phi) = ctx.graph.sole_succ(minor) else {
            continue;
        };
        let Some(&dummy) = ctx.graph.preds(phi).iter().find(|&&p| p != minor) else {
            continue;
        };
        let (Some(minor_pred), Some(phi_succ), Some(real_pred)) = (
            ctx.graph.preds(minor).first().copied(),
            ctx.graph.sole_succ(phi),
            ctx.graph.preds(real).first().copied(),
        ) else {
            continue;
        };

        let minor_bp = ctx.graph.instr(minor).branchpoint;
        let minor_dec = ctx.graph.instr(minor).decision;

        ctx.graph.remove_edge(minor_pred, minor);
        ctx.graph.remove_edge(minor, phi);
        ctx.graph.add_edge(minor_pred, phi);
        ctx.graph.remove_node(minor);

        ctx.graph.remove_edge(dummy, phi);
        ctx.graph.remove_edge(phi, phi_succ);
        ctx.graph.add_edge(dummy, phi_succ);

        ctx.graph.remove_edge(real_pred, real);
        ctx.graph.add_edge(real_pred, phi);
        ctx.graph.add_edge(phi, real);

        // Between the splice point and the excised jump's origin the path
        // now belongs to the minor jump's branch region.
        let phi_succ_bp = ctx.graph.instr(phi_succ).branchpoint;
        let mut walk = real_pred;
        loop {
            if ctx.graph.instr(walk).branchpoint == phi_succ_bp {
                let node = ctx.graph.instr_mut(walk);
                node.decision = !minor_dec;
                node.branchpoint = minor_bp;
            }
            let Some(&up) = ctx.graph.preds(walk).first() else {
                break;
            };
            if up == dummy {
                break;
            }
            walk = up;
        }
    }
    Ok(())
}

/// Profiles every surviving backward jump into the loop hierarchy,
/// innermost jumps first, and marks the controlling conditionals.
pub fn profile_loops(ctx: &mut SynthesisContext) {
    let mut gotos: Vec<InstrId> = ctx
        .graph
        .gotos()
        .iter()
        .copied()
        .filter(|&g| ctx.graph.contains(g))
        .collect();
    gotos.sort_by_key(|&g| std::cmp::Reverse(ctx.graph.instr(g).addr));

    for gt in gotos {
        let instr = ctx.graph.instr(gt);
        if !matches!(instr.ext, InstrExt::Goto { loop_back: true }) {
            continue;
        }
        let stop = instr.addr;
        let start = ctx.code.jump_target(stop);

        let Some(controller) = instr
            .branchpoint
            .and_then(|phi| ctx.graph.instr(phi).phi_info().map(|i| i.if_instr))
        else {
            continue;
        };
        ctx.loops.insert(start, stop, controller);
        if let Some(info) = ctx.graph.instr_mut(controller).if_info_mut() {
            info.loop_controller = true;
        }
        debug!(start, stop, "loop profiled");

        // Conditionals inside the body whose taken arm lands just past the
        // backward jump also decide this loop's exit.
        for phi in ctx.graph.phis().to_vec() {
            let Some(if_instr) = ctx.graph.instr(phi).phi_info().map(|i| i.if_instr) else {
                continue;
            };
            let if_addr = ctx.graph.instr(if_instr).addr;
            if if_addr > start
                && if_addr < stop
                && ctx.code.jump_target(if_addr) - 3 == stop
            {
                if let Some(info) = ctx.graph.instr_mut(if_instr).if_info_mut() {
                    info.loop_controller = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bytecode::{BytecodeAssembler, CodeBuffer};
    use crate::cfg::builder::build_cfg;
    use crate::synth::{Intrinsics, SynthesisConfig, SynthesisContext};

    fn context_for(bytes: Vec<u8>, start: i32, stop: i32) -> SynthesisContext {
        SynthesisContext::new(
            CodeBuffer::from_bytes(bytes),
            start,
            stop,
            SynthesisConfig::default(),
            Vec::new(),
            Intrinsics::new(),
            4,
            4,
        )
    }

    #[test]
    fn test_nested_loops_profile_containment() {
        // for (i..) { for (j..) { body } }
        let mut asm = BytecodeAssembler::new();
        let outer = asm.here();
        asm.iload(1).bipush(8).if_icmpge_fwd("exit");
        let inner = asm.here();
        asm.iload(2).bipush(4).if_icmpge_fwd("outer_step");
        asm.iinc(2, 1);
        asm.goto_back(inner);
        asm.label("outer_step");
        asm.iinc(1, 1);
        let back = asm.goto_back(outer);
        asm.label("exit");

        let mut ctx = context_for(asm.finish(), outer, back);
        build_cfg(&mut ctx).unwrap();

        assert_eq!(ctx.loops.len(), 2);
        let outermost = ctx.loops.outermost().unwrap();
        let outer_loop = ctx.loops.get(outermost);
        assert_eq!(outer_loop.children.len(), 1);
        let inner_loop = ctx.loops.get(outer_loop.children[0]);
        assert!(outer_loop.start <= inner_loop.start && inner_loop.stop <= outer_loop.stop);
    }
}
