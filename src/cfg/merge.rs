//! Branch merging.
//!
//! After traversal every confluence (a node with more than one control-flow
//! predecessor) is resolved by splicing merge nodes in: predecessors that
//! share a governing conditional pair through that conditional's merge node;
//! predecessors whose branch points are related by dominance are split by
//! duplicating the node; the rest are paired repeatedly by latest governing
//! conditional address. A confluence that cannot be reduced to a single
//! predecessor makes the window not synthesizable.

use tracing::trace;

use crate::bytecode::Opcode;
use crate::cfg::{InstrExt, InstrId, SceController};
use crate::synth::SynthesisContext;
use crate::{Error, Result};

/// Resolves every recorded confluence.
///
/// # Errors
///
/// [`Error::IrreducibleBranches`] when a confluence keeps more than one
/// predecessor after exhausting mergeable pairs.
pub fn restructure_graph(ctx: &mut SynthesisContext) -> Result<()> {
    for mn in ctx.graph.merge_candidates() {
        split_short_circuit(ctx, mn);
    }
    for mn in ctx.graph.merge_candidates() {
        if !merge_branch(ctx, mn) {
            return Err(Error::IrreducibleBranches {
                start: ctx.start,
                stop: ctx.stop,
            });
        }
    }
    Ok(())
}

/// Governing merge node of a node's branch point chain, one level up.
fn bp_of(ctx: &SynthesisContext, id: InstrId) -> Option<InstrId> {
    ctx.graph.instr(id).branchpoint
}

/// Address of the conditional owning a merge node; nodes without a branch
/// point sort before everything.
fn if_addr(ctx: &SynthesisContext, phi: Option<InstrId>) -> i32 {
    phi.and_then(|p| ctx.graph.instr(p).phi_info().map(|i| i.if_instr))
        .map_or(i32::MIN, |i| ctx.graph.instr(i).addr)
}

/// True when `ancestor` appears in the branch-point chain above `phi`.
fn dominates(ctx: &SynthesisContext, ancestor: InstrId, phi: InstrId) -> bool {
    let mut current = ctx.graph.instr(phi).branchpoint;
    while let Some(p) = current {
        if p == ancestor {
            return true;
        }
        current = ctx.graph.instr(p).branchpoint;
    }
    false
}

/// Splits a confluence whose two predecessors carry dominance-related branch
/// points: the compiler's short-circuit evaluation reuses one join address
/// for paths with different branch ancestry, so the node is duplicated and
/// each copy keeps its own ancestry. The split cascades downstream until the
/// paths reach a regular merge point.
fn split_short_circuit(ctx: &mut SynthesisContext, mn: InstrId) {
    if ctx.graph.instr(mn).op == Opcode::SynthStop {
        return;
    }
    let preds = ctx.graph.preds(mn).to_vec();
    if preds.len() != 2 {
        return;
    }
    let (p1, p2) = (preds[0], preds[1]);
    let (bp1, bp2) = (bp_of(ctx, p1), bp_of(ctx, p2));
    if bp1 == bp2 {
        return;
    }
    let dummy1 = ctx.graph.instr(p1).op == Opcode::SynthDummy;
    let dummy2 = ctx.graph.instr(p2).op == Opcode::SynthDummy;
    if dummy1 != dummy2 {
        return;
    }
    let related = match (bp1, bp2) {
        (Some(a), Some(b)) => dominates(ctx, a, b) || dominates(ctx, b, a),
        _ => false,
    };
    if !related {
        return;
    }

    trace!(addr = ctx.graph.instr(mn).addr, "short-circuit split");
    let (p1_dec, p2_dec) = (ctx.graph.instr(p1).decision, ctx.graph.instr(p2).decision);
    {
        let node = ctx.graph.instr_mut(mn);
        node.branchpoint = bp1;
        node.decision = p1_dec;
    }
    let mut dup = ctx.graph.instr(mn).clone();
    dup.duplicate = true;
    dup.branchpoint = bp2;
    dup.decision = p2_dec;
    let dup = ctx.graph.fresh(dup);

    ctx.graph.enroll_node(dup);
    for succ in ctx.graph.succs(mn).to_vec() {
        ctx.graph.add_edge(dup, succ);
        split_short_circuit(ctx, succ);
    }
    ctx.graph.remove_edge(p2, mn);
    ctx.graph.add_edge(p2, dup);
}

/// Merges the branches converging on `mn`.
///
/// Returns true when the confluence reduced to exactly one predecessor.
fn merge_branch(ctx: &mut SynthesisContext, mn: InstrId) -> bool {
    loop {
        let preds = ctx.graph.preds(mn).to_vec();
        if preds.len() < 2 {
            break;
        }

        // Pair predecessors sharing a governing conditional through its
        // merge node.
        let mut paired = false;
        for i in 0..preds.len() {
            for j in i + 1..preds.len() {
                let (mp1, mp2) = (preds[i], preds[j]);
                let bp = bp_of(ctx, mp1);
                if bp.is_some() && bp == bp_of(ctx, mp2) {
                    let phi = bp.unwrap();
                    splice_phi(ctx, mn, mp1, mp2, phi);
                    let (phi_bp, phi_dec) = {
                        let p = ctx.graph.instr(phi);
                        (p.branchpoint, p.decision)
                    };
                    let node = ctx.graph.instr_mut(mn);
                    node.branchpoint = phi_bp;
                    node.decision = phi_dec;
                    paired = true;
                    break;
                }
            }
            if paired {
                break;
            }
        }
        if paired {
            continue;
        }

        // No direct pair: take the two predecessors with the latest
        // governing conditionals and close the later conditional's region,
        // recording the short-circuit controller on its conditional.
        let mut sorted = preds.clone();
        sorted.sort_by_key(|&p| std::cmp::Reverse(if_addr(ctx, bp_of(ctx, p))));
        let (mp1, mp2) = (sorted[0], sorted[1]);
        let (bp1, bp2) = (bp_of(ctx, mp1), bp_of(ctx, mp2));
        let (Some(bp1), Some(bp2)) = (bp1, bp2) else {
            return false;
        };
        let (dec1, dec2) = (ctx.graph.instr(mp1).decision, ctx.graph.instr(mp2).decision);
        let (phi_early, ctrl_dec, phi_late, mn_dec) = if if_addr(ctx, Some(bp1)) > if_addr(ctx, Some(bp2))
        {
            (bp2, dec2, bp1, dec1)
        } else {
            (bp1, dec1, bp2, dec2)
        };

        // The later conditional keeps executing its arm when the earlier
        // one already decided; the projector exports this as a
        // short-circuit controller pair.
        if let Some(late_if) = ctx.graph.instr(phi_late).phi_info().map(|i| i.if_instr) {
            let sce = SceController {
                controller_phi: phi_early,
                decision: ctrl_dec,
            };
            if let Some(info) = ctx.graph.instr_mut(late_if).if_info_mut() {
                if mn_dec {
                    info.sce_true = Some(sce);
                } else {
                    info.sce_false = Some(sce);
                }
            }
        }

        splice_phi(ctx, mn, mp1, mp2, phi_early);
        {
            let node = ctx.graph.instr_mut(mn);
            node.branchpoint = Some(phi_late);
            node.decision = mn_dec;
        }
        // The spliced merge node itself is now governed by the later
        // conditional's region.
        let early_old_bp = ctx.graph.instr(phi_early).branchpoint;
        let early_old_dec = ctx.graph.instr(phi_early).decision;
        raise_branchpoint(ctx, phi_late, early_old_bp, early_old_dec);
        {
            let node = ctx.graph.instr_mut(phi_early);
            node.branchpoint = Some(phi_late);
            node.decision = mn_dec;
        }
        propagate_bp(ctx, mn);
    }

    propagate_bp(ctx, mn);
    ctx.graph.preds(mn).len() == 1
}

/// Reassigns `phi`'s branch point to `bp` when `bp` governs an earlier
/// (wider) region than the current one.
fn raise_branchpoint(
    ctx: &mut SynthesisContext,
    phi: InstrId,
    bp: Option<InstrId>,
    decision: bool,
) {
    let Some(bp) = bp else { return };
    let current = ctx.graph.instr(phi).branchpoint;
    if if_addr(ctx, current) > if_addr(ctx, Some(bp)) {
        let node = ctx.graph.instr_mut(phi);
        node.branchpoint = Some(bp);
        node.decision = decision;
    }
}

/// Rewires `mp1 → mn` and `mp2 → mn` into `mp1, mp2 → phi → mn`.
fn splice_phi(ctx: &mut SynthesisContext, mn: InstrId, mp1: InstrId, mp2: InstrId, phi: InstrId) {
    ctx.graph.remove_edge(mp1, mn);
    ctx.graph.remove_edge(mp2, mn);
    ctx.graph.insert(mp1, phi);
    ctx.graph.insert(mp2, phi);
    ctx.graph.add_edge(phi, mn);
}

/// Propagates a node's branch point down the single-predecessor chain until
/// a node already carrying it, a conditional (whose merge node is updated
/// instead), or a confluence stops the walk.
pub fn propagate_bp(ctx: &mut SynthesisContext, id: InstrId) {
    let Some(mut s) = ctx.graph.succs(id).first().copied() else {
        return;
    };
    let (bp, dec) = {
        let i = ctx.graph.instr(id);
        (i.branchpoint, i.decision)
    };

    while ctx.graph.preds(s).len() == 1 {
        if ctx.graph.instr(s).branchpoint == bp {
            break;
        }
        {
            let node = ctx.graph.instr_mut(s);
            node.branchpoint = bp;
            node.decision = dec;
        }
        if ctx.graph.succs(s).len() != 1 {
            let phi = match &ctx.graph.instr(s).ext {
                InstrExt::If(info) => Some(info.phi),
                _ => None,
            };
            if let Some(phi) = phi {
                let node = ctx.graph.instr_mut(phi);
                node.branchpoint = bp;
                node.decision = dec;
            }
            break;
        }
        s = ctx.graph.succs(s)[0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BytecodeAssembler, CodeBuffer};
    use crate::cfg::builder::build_cfg;
    use crate::synth::{Intrinsics, SynthesisConfig};

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
    fn test_short_circuit_or_duplicates_the_shared_arm() {
        // while (i < n) { if (a != 0 || b != 0) { x = 1; } i++ }
        // The then-entry is reached under two dominance-related branch
        // points (taken arm of the first test, fall-through of the second);
        // the shared arm is duplicated so each copy keeps its ancestry.
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.iload(2).ifne_fwd("then");
        asm.iload(3).ifeq_fwd("skip");
        asm.label("then");
        asm.iconst(1).istore(0);
        asm.label("skip");
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        let mut ctx = context_for(asm.finish(), head, back);

        build_cfg(&mut ctx).unwrap();
        // Both joins resolved: non-merge nodes keep one pred.
        for id in ctx.graph.members().collect::<Vec<_>>() {
            if id == ctx.start_instr || ctx.graph.instr(id).op == Opcode::SynthPhi {
                continue;
            }
            assert!(ctx.graph.preds(id).len() <= 1);
        }
        assert!(
            ctx.graph
                .members()
                .any(|id| ctx.graph.instr(id).duplicate),
            "short-circuit split produced a duplicate node"
        );
    }

    #[test]
    fn test_short_circuit_and_merges_through_latest_pair() {
        // while (i < n) { if (a != 0 && b != 0) { x = 1; } i++ }
        // The skip join collects three predecessors; the two governed by
        // the inner test pair first, the remaining pair closes the outer.
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.iload(2).ifeq_fwd("skip");
        asm.iload(3).ifeq_fwd("skip");
        asm.iconst(1).istore(0);
        asm.label("skip");
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        let mut ctx = context_for(asm.finish(), head, back);

        build_cfg(&mut ctx).unwrap();
        for id in ctx.graph.members().collect::<Vec<_>>() {
            if id == ctx.start_instr || ctx.graph.instr(id).op == Opcode::SynthPhi {
                continue;
            }
            assert!(ctx.graph.preds(id).len() <= 1);
        }
    }

    #[test]
    fn test_nested_diamonds_merge_through_fit_pairs() {
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(20).if_icmpge_fwd("exit");
        asm.iload(2).ifeq_fwd("outer_else");
        asm.iload(3).ifeq_fwd("inner_else");
        asm.iconst(1).istore(0).goto_fwd("join");
        asm.label("inner_else");
        asm.iconst(2).istore(0);
        asm.goto_fwd("join");
        asm.label("outer_else");
        asm.iconst(3).istore(0);
        asm.label("join");
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        let mut ctx = context_for(asm.finish(), head, back);

        build_cfg(&mut ctx).unwrap();
        for id in ctx.graph.members().collect::<Vec<_>>() {
            if id == ctx.start_instr || ctx.graph.instr(id).op == Opcode::SynthPhi {
                continue;
            }
            assert!(ctx.graph.preds(id).len() <= 1);
        }
    }
}
