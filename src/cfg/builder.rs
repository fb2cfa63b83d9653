//! Control-flow graph construction.
//!
//! Depth-first worklist traversal seeded at the window entry. Each
//! instruction kind's *insert* step creates its control-flow successors:
//! conditionals spawn a merge node and one arm-marker per branch, gotos are
//! classified as forward, backward (loop) or window-escaping, and returns
//! are only admitted when control provably continues in the calling method.

use tracing::debug;

use crate::bytecode::{Kind, Opcode};
use crate::cfg::{IfInfo, InstrExt, InstrId, Instruction, PhiInfo};
use crate::synth::SynthesisContext;
use crate::{Error, Result};

/// Builds the control-flow graph of the window, including restructuring and
/// loop profiling.
///
/// # Errors
///
/// Any not-synthesizable condition discovered while walking the stream.
pub fn build_cfg(ctx: &mut SynthesisContext) -> Result<()> {
    debug!(start = ctx.start, stop = ctx.stop, "control-flow construction");
    let mut next = Some(ctx.start_instr);
    while let Some(id) = next {
        insert_step(ctx, id)?;
        next = ctx.next_scheduled();
    }
    super::merge::restructure_graph(ctx)?;
    super::restructure::correct_while_defect(ctx)?;
    super::restructure::profile_loops(ctx);
    debug!(
        nodes = ctx.graph.node_count(),
        loops = ctx.loops.len(),
        "control-flow graph restructured"
    );
    Ok(())
}

/// Decodes the instruction at `addr` into a fresh arena node.
///
/// Calls the fabric executes natively are substituted by their intrinsic
/// pseudo-opcode here, so both construction stages see them as plain ALU
/// operations.
pub fn decode_at(ctx: &mut SynthesisContext, addr: i32) -> Result<InstrId> {
    let mut op = ctx.code.opcode_at(addr)?;
    if op == Opcode::EnterFabric && addr == ctx.start {
        return Err(Error::UnsupportedInstruction {
            opcode: ctx.code.byte(addr),
            addr,
        });
    }
    if op == Opcode::InvokespecialQuick {
        let fid = ctx.code.read_u16(addr + 1);
        if let Some(intrinsic) = ctx.intrinsics.get(fid) {
            op = intrinsic.opcode;
        }
    }
    Ok(ctx.graph.fresh(Instruction::new(op, addr)))
}

/// Base slot id encoded by a local load/store, before namespace offsetting.
#[must_use]
pub fn base_slot(code: &crate::bytecode::CodeBuffer, op: Opcode, addr: i32) -> i64 {
    use Opcode::*;
    match op {
        Iload | Lload | Fload | Dload | Aload | Istore | Lstore | Fstore | Dstore | Astore
        | IincStore => i64::from(code.byte(addr + 1)),
        Iload0 | Lload0 | Fload0 | Dload0 | Aload0 | Istore0 | Lstore0 | Fstore0 | Dstore0
        | Astore0 => 0,
        Iload1 | Lload1 | Fload1 | Dload1 | Aload1 | Istore1 | Lstore1 | Fstore1 | Dstore1
        | Astore1 => 1,
        Iload2 | Lload2 | Fload2 | Dload2 | Aload2 | Istore2 | Lstore2 | Fstore2 | Dstore2
        | Astore2 => 2,
        Iload3 | Lload3 | Fload3 | Dload3 | Aload3 | Istore3 | Lstore3 | Fstore3 | Dstore3
        | Astore3 => 3,
        Iinc => i64::from(code.byte(addr + 1)),
        _ => 0,
    }
}

/// Local slot addressed at `addr`, including the namespace offset in effect
/// there.
#[must_use]
pub fn local_slot(ctx: &SynthesisContext, op: Opcode, addr: i32) -> i64 {
    base_slot(&ctx.code, op, addr) + i64::from(ctx.slot_offset(addr))
}

/// Constant pushed by a constant-load opcode at `addr`.
#[must_use]
pub fn const_param(code: &crate::bytecode::CodeBuffer, op: Opcode, addr: i32) -> i64 {
    use Opcode::*;
    match op {
        AconstNull | IconstM1 => -1,
        Iconst0 => 0,
        Iconst1 => 1,
        Iconst2 => 2,
        Iconst3 => 3,
        Iconst4 => 4,
        Iconst5 => 5,
        Lconst0 => 0,
        Lconst1 => 1,
        Fconst0 => i64::from(0.0f32.to_bits() as i32),
        Fconst1 => i64::from(1.0f32.to_bits() as i32),
        Fconst2 => i64::from(2.0f32.to_bits() as i32),
        Dconst0 => 0.0f64.to_bits() as i64,
        Dconst1 => 1.0f64.to_bits() as i64,
        Bipush => i64::from(code.byte(addr + 1) as i8),
        Sipush => i64::from(code.read_i16(addr + 1)),
        Ldc => i64::from(code.byte(addr + 1)),
        LdcW | Ldc2W | LdcWQuick | Ldc2WQuick => i64::from(code.read_u16(addr + 1)),
        _ => 0,
    }
}

fn inherit(ctx: &mut SynthesisContext, from: InstrId, to: InstrId) {
    let (bp, dec) = {
        let i = ctx.graph.instr(from);
        (i.branchpoint, i.decision)
    };
    let t = ctx.graph.instr_mut(to);
    t.branchpoint = bp;
    t.decision = dec;
}

/// Default linear insertion: one successor at the next address.
fn insert_linear(ctx: &mut SynthesisContext, id: InstrId) -> Result<()> {
    let (op, addr) = {
        let i = ctx.graph.instr(id);
        (i.op, i.addr)
    };
    let next = decode_at(ctx, addr + op.len() as i32)?;
    inherit(ctx, id, next);
    ctx.push(next);
    ctx.graph.insert(id, next);
    Ok(())
}

/// One *insert* step: extends the graph with the successors of `id` and
/// schedules them.
pub fn insert_step(ctx: &mut SynthesisContext, id: InstrId) -> Result<()> {
    let (op, addr) = {
        let i = ctx.graph.instr(id);
        (i.op, i.addr)
    };
    match op.kind() {
        Kind::Start => {
            let next = decode_at(ctx, addr)?;
            inherit(ctx, id, next);
            ctx.push(next);
            ctx.graph.insert(id, next);
            Ok(())
        }
        Kind::Stop | Kind::Phi | Kind::Dummy => Ok(()),
        Kind::If | Kind::IfCmp => insert_conditional(ctx, id, op, addr),
        Kind::Goto => insert_goto(ctx, id, addr),
        Kind::Return => insert_return(ctx, id, op, addr),
        Kind::LocalSt => {
            ctx.count_lv_store(local_slot(ctx, op, addr));
            insert_linear(ctx, id)
        }
        Kind::Iinc => {
            ctx.count_lv_store(local_slot(ctx, op, addr));
            insert_linear(ctx, id)
        }
        Kind::FieldSt => {
            ctx.count_put_field(i64::from(ctx.code.read_u16(addr + 1)));
            insert_linear(ctx, id)
        }
        Kind::Unsupported => Err(Error::UnsupportedInstruction {
            opcode: op.byte().unwrap_or(0),
            addr,
        }),
        _ => insert_linear(ctx, id),
    }
}

/// Conditional insertion: registers the merge node, spawns the two
/// arm markers, and seeds both arms. An arm whose target leaves the window
/// connects to the stop node instead.
fn insert_conditional(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
) -> Result<()> {
    let (bp, dec) = {
        let i = ctx.graph.instr(id);
        (i.branchpoint, i.decision)
    };

    let mut phi = Instruction::new(Opcode::SynthPhi, addr + ctx.stop);
    phi.branchpoint = bp;
    phi.decision = dec;
    phi.ext = InstrExt::Phi(PhiInfo {
        if_instr: id,
        if_datum: None,
    });
    let phi = ctx.graph.fresh(phi);
    ctx.graph.reg_phi(phi);
    ctx.graph.instr_mut(id).ext = InstrExt::If(IfInfo {
        phi,
        loop_controller: false,
        sce_true: None,
        sce_false: None,
    });

    let mut dummy = Instruction::new(Opcode::SynthDummy, addr + ctx.stop);
    dummy.branchpoint = Some(phi);
    dummy.decision = true;
    let dummy = ctx.graph.fresh(dummy);
    ctx.graph.insert(id, dummy);

    let mut dummy2 = Instruction::new(Opcode::SynthDummy, -(addr + ctx.stop));
    dummy2.branchpoint = Some(phi);
    dummy2.decision = false;
    let dummy2 = ctx.graph.fresh(dummy2);
    ctx.graph.insert(id, dummy2);

    // Fall-through arm.
    let else_i = decode_at(ctx, addr + op.len() as i32)?;
    {
        let i = ctx.graph.instr_mut(else_i);
        i.branchpoint = Some(phi);
        i.decision = false;
    }
    ctx.push(else_i);
    ctx.graph.insert(dummy2, else_i);

    // Taken arm.
    let target = ctx.code.jump_target(addr);
    if target <= ctx.stop {
        let then_i = decode_at(ctx, target)?;
        {
            let i = ctx.graph.instr_mut(then_i);
            i.branchpoint = Some(phi);
            i.decision = true;
        }
        ctx.push(then_i);
        ctx.graph.insert(dummy, then_i);
    } else {
        let stop = ctx.stop_instr;
        ctx.graph.insert(dummy, stop);
    }
    Ok(())
}

/// Goto insertion: forward jumps continue at the target, the loop-closing
/// backward jump continues past itself (the back edge is kept in the loop
/// hierarchy, not the graph), and a jump leaving the window is a break.
fn insert_goto(ctx: &mut SynthesisContext, id: InstrId, addr: i32) -> Result<()> {
    ctx.graph.reg_goto(id);
    let target = ctx.code.jump_target(addr);
    if target > ctx.stop {
        return Err(Error::BreakUnsupported { addr });
    }
    if target > addr {
        let next = decode_at(ctx, target)?;
        inherit(ctx, id, next);
        ctx.push(next);
        ctx.graph.insert(id, next);
        return Ok(());
    }

    ctx.graph.instr_mut(id).ext = InstrExt::Goto { loop_back: true };
    let next_addr = addr + Opcode::Goto.len() as i32;
    if next_addr < ctx.stop {
        // Control after the loop leaves the governing conditional's scope;
        // the continuation inherits the branch point one level up.
        let (bp, dec) = match ctx.graph.instr(id).branchpoint {
            Some(phi) => {
                let p = ctx.graph.instr(phi);
                (p.branchpoint, p.decision)
            }
            None => (None, false),
        };
        let next = decode_at(ctx, next_addr)?;
        {
            let i = ctx.graph.instr_mut(next);
            i.branchpoint = bp;
            i.decision = dec;
        }
        ctx.push(next);
        ctx.graph.insert(id, next);
    } else {
        let stop = ctx.stop_instr;
        ctx.graph.insert(id, stop);
    }
    Ok(())
}

/// Return insertion: legal only for inlined callees. The return whose next
/// instruction belongs to the calling namespace is the final one; every
/// other return of the same callee is wired to the final return's
/// continuation.
fn insert_return(ctx: &mut SynthesisContext, id: InstrId, op: Opcode, addr: i32) -> Result<()> {
    let cur_off = ctx.slot_offset(addr);
    let next_addr = addr + op.len() as i32;
    let Some(next_off) = ctx.code.slot_offset(next_addr) else {
        return Err(Error::ReturnInWindow { addr });
    };
    if next_off >= cur_off {
        ctx.add_return(cur_off, id);
        return Ok(());
    }

    let next = decode_at(ctx, next_addr)?;
    inherit(ctx, id, next);
    ctx.push(next);
    let next = ctx.graph.insert(id, next);
    ctx.graph.instr_mut(id).ext = InstrExt::Return { final_return: true };
    ctx.add_final_return(cur_off, id, next);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BytecodeAssembler, CodeBuffer};
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
    fn test_straight_loop_builds_and_profiles() {
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        let mut ctx = context_for(asm.finish(), head, back);

        build_cfg(&mut ctx).unwrap();
        assert_eq!(ctx.loops.len(), 1);
        let lp = ctx.loops.get(ctx.loops.outermost().unwrap());
        assert_eq!((lp.start, lp.stop), (0, 9));
        assert!(ctx.graph.instr(lp.controller).is_loop_controller());
    }

    #[test]
    fn test_break_is_rejected() {
        // goto jumping past the window stop
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.goto_fwd("past");
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        asm.nop();
        asm.label("past");
        let mut ctx = context_for(asm.finish(), head, back);

        let err = build_cfg(&mut ctx).unwrap_err();
        assert!(matches!(err, Error::BreakUnsupported { .. }));
    }

    #[test]
    fn test_unsupported_opcode_is_rejected() {
        // new (0xbb) inside the loop body
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.nop();
        let back = asm.goto_back(head);
        asm.label("exit");
        let mut bytes = asm.finish();
        bytes[6] = 0xbb;
        let mut ctx = context_for(bytes, head, back);

        let err = build_cfg(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedInstruction { opcode: 0xbb, .. }
        ));
    }

    #[test]
    fn test_merge_completeness_single_pred() {
        // if/else diamond inside a loop: after restructuring every reachable
        // node except the entry has exactly one predecessor.
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.iload(2).ifeq_fwd("else");
        asm.iconst(1).istore(3).goto_fwd("join");
        asm.label("else");
        asm.iconst(2).istore(3);
        asm.label("join");
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        let mut ctx = context_for(asm.finish(), head, back);

        build_cfg(&mut ctx).unwrap();
        let start = ctx.start_instr;
        for id in ctx.graph.members().collect::<Vec<_>>() {
            // Merge nodes are the resolution of a confluence and keep one
            // predecessor per merged arm.
            if id == start || ctx.graph.instr(id).op == Opcode::SynthPhi {
                continue;
            }
            let preds = ctx.graph.preds(id).len();
            assert!(
                preds <= 1,
                "node {}:{} kept {} predecessors",
                ctx.graph.instr(id).addr,
                ctx.graph.instr(id).op,
                preds
            );
        }
    }
}
