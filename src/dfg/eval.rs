//! Symbolic replay of the restructured control-flow graph.
//!
//! Each instruction kind's *evaluate* step replays the instruction's effect
//! on the virtual operand stack and extends the value graph. The walk starts
//! at the outermost loop entry and ends on the second arrival at the loop
//! controller's merge node: the loop body has then been replayed along every
//! path and the continuation after the loop stays outside the kernel.

use tracing::debug;

use crate::bytecode::{DupShape, Kind, Opcode};
use crate::cfg::builder::{const_param, local_slot};
use crate::cfg::{InstrExt, InstrId, Instruction};
use crate::dfg::{Datum, DatumId, DatumKind, VStack};
use crate::synth::{ArrayAccess, SynthesisContext};
use crate::{Error, Result};

/// Field offset standing for an object's dispatch type tag.
pub const TYPE_TAG_FIELD: i64 = (i32::MAX - 1) as i64;

/// Index constant standing for an array's length cell.
pub const LENGTH_INDEX: i64 = i32::MAX as i64;

/// Replays the restructured graph and builds the value graph.
///
/// # Errors
///
/// Any not-synthesizable condition discovered during replay.
pub fn build_dfg(ctx: &mut SynthesisContext) -> Result<()> {
    let outer = ctx
        .loops
        .outermost()
        .ok_or_else(|| Error::MalformedLoop("window contains no loop".into()))?;
    let (start_addr, controller) = {
        let lp = ctx.loops.get(outer);
        (lp.start, lp.controller)
    };
    let stop_phi = ctx.graph.instr(controller).phi_node();
    let first = ctx
        .graph
        .by_addr(start_addr)
        .ok_or_else(|| Error::MalformedLoop("loop entry not in graph".into()))?;

    debug!(start = start_addr, "data-flow replay");
    ctx.clear_schedule();
    ctx.vstacks.insert(first, VStack::new());

    let mut ran_once = false;
    let mut next = Some(first);
    while let Some(id) = next {
        eval_step(ctx, id)?;
        if id == stop_phi {
            if ran_once {
                break;
            }
            ran_once = true;
        }
        next = ctx.next_scheduled();
    }

    super::fold::fold_local_stores(ctx);
    super::fold::cleanup(ctx);
    if ctx.config.cse {
        super::fold::reorder_chains(ctx);
    }
    debug!(
        nodes = ctx.dfg.nodes().len(),
        aliases = ctx.aliases.len(),
        "value graph complete"
    );
    Ok(())
}

/// Hands the stack to the single successor and schedules it.
pub(crate) fn push_next(ctx: &mut SynthesisContext, id: InstrId, vs: VStack) {
    if let Some(next) = ctx.graph.succs(id).first().copied() {
        ctx.vstacks.insert(next, vs);
        ctx.pushd(next);
    }
}

/// The decision datum of the conditional governing `id`, if any.
pub(crate) fn governing_sink(ctx: &SynthesisContext, id: InstrId) -> Option<DatumId> {
    let bp = ctx.graph.instr(id).branchpoint?;
    ctx.graph.instr(bp).phi_info().and_then(|i| i.if_datum)
}

/// Orders `d` after the governing conditional's decision, if one exists.
pub(crate) fn barrier_edge(ctx: &mut SynthesisContext, id: InstrId, d: DatumId) {
    if let Some(sink) = governing_sink(ctx, id) {
        ctx.dfg.add_sedge(sink, d);
    }
}

/// Allocates an off-graph creator instruction for synthetic data.
pub(crate) fn fresh_creator(
    ctx: &mut SynthesisContext,
    op: Opcode,
    addr: i32,
    bp: Option<InstrId>,
    decision: bool,
) -> InstrId {
    let mut instr = Instruction::new(op, addr);
    instr.branchpoint = bp;
    instr.decision = decision;
    ctx.graph.fresh(instr)
}

/// True when the value produced under `(from_bp, from_dec)` is available on
/// the branch path that produced `(target_bp, target_dec)`: either the
/// target was produced outside any branch, or the walk up the governing
/// chain reaches the target's conditional on the same arm.
pub(crate) fn same_branch(
    ctx: &SynthesisContext,
    from_bp: Option<InstrId>,
    from_dec: bool,
    target_bp: Option<InstrId>,
    target_dec: bool,
) -> bool {
    if target_bp.is_none() {
        return true;
    }
    let mut bp = from_bp;
    let mut dec = from_dec;
    while let Some(p) = bp {
        if Some(p) == target_bp {
            return dec == target_dec;
        }
        let phi = ctx.graph.instr(p);
        dec = phi.decision;
        bp = phi
            .phi_info()
            .and_then(|i| ctx.graph.instr(i.if_instr).branchpoint);
    }
    false
}

/// True when no conditional shared by both governing chains was taken with
/// opposite decisions (the two positions can execute in one iteration).
pub(crate) fn compatible_branches(
    ctx: &SynthesisContext,
    a_bp: Option<InstrId>,
    a_dec: bool,
    b_bp: Option<InstrId>,
    b_dec: bool,
) -> bool {
    let mut chain = std::collections::HashMap::new();
    let mut bp = a_bp;
    let mut dec = a_dec;
    while let Some(p) = bp {
        chain.insert(p, dec);
        let phi = ctx.graph.instr(p);
        dec = phi.decision;
        bp = phi
            .phi_info()
            .and_then(|i| ctx.graph.instr(i.if_instr).branchpoint);
    }

    let mut bp = b_bp;
    let mut dec = b_dec;
    while let Some(p) = bp {
        if let Some(&other) = chain.get(&p) {
            if other != dec {
                return false;
            }
        }
        let phi = ctx.graph.instr(p);
        dec = phi.decision;
        bp = phi
            .phi_info()
            .and_then(|i| ctx.graph.instr(i.if_instr).branchpoint);
    }
    true
}

/// Branch point and decision of a datum's creator.
pub(crate) fn creator_branch(ctx: &SynthesisContext, d: DatumId) -> (Option<InstrId>, bool) {
    let creator = ctx.dfg.datum(d).creator;
    let instr = ctx.graph.instr(creator);
    (instr.branchpoint, instr.decision)
}

/// Address of a datum's creator.
pub(crate) fn creator_addr(ctx: &SynthesisContext, d: DatumId) -> i32 {
    ctx.graph.instr(ctx.dfg.datum(d).creator).addr
}

/// One *evaluate* step.
pub fn eval_step(ctx: &mut SynthesisContext, id: InstrId) -> Result<()> {
    let vs = ctx.vstacks.remove(&id).unwrap_or_default();
    let (op, addr) = {
        let i = ctx.graph.instr(id);
        (i.op, i.addr)
    };

    match op.kind() {
        Kind::Nop | Kind::Dummy | Kind::Goto | Kind::Start => {
            push_next(ctx, id, vs);
            Ok(())
        }
        Kind::Stop => {
            // The final stack stays parked for the store-folding pass.
            ctx.vstacks.insert(id, vs);
            Ok(())
        }
        Kind::ConstLd => eval_const(ctx, id, op, addr, vs),
        Kind::LocalLd => eval_local_ld(ctx, id, op, addr, vs),
        Kind::LocalSt => eval_local_st(ctx, id, op, addr, vs),
        Kind::Iinc => super::alu::eval_iinc(ctx, id, addr, vs),
        Kind::AluBin => super::alu::eval_alu_bin(ctx, id, op, addr, vs),
        Kind::AluUn => super::alu::eval_alu_un(ctx, id, op, vs),
        Kind::ArrayLd => super::heap::eval_array_ld(ctx, id, op, addr, vs),
        Kind::ArraySt => super::heap::eval_array_st(ctx, id, op, addr, vs),
        Kind::ArrayLen => super::heap::eval_array_len(ctx, id, addr, vs),
        Kind::FieldLd => super::heap::eval_field_ld(ctx, id, op, addr, vs),
        Kind::FieldSt => super::heap::eval_field_st(ctx, id, op, addr, vs),
        Kind::StaticLd => super::heap::eval_static_ld(ctx, id, op, addr, vs),
        Kind::StaticSt => super::heap::eval_static_st(ctx, id, op, addr, vs),
        Kind::Pop => {
            let mut vs = vs;
            let d = vs.pop();
            if op == Opcode::Pop2 && !ctx.dfg.datum(d).wide {
                vs.pop();
            }
            push_next(ctx, id, vs);
            Ok(())
        }
        Kind::Dup(shape) => eval_dup(ctx, id, shape, vs),
        Kind::Swap => {
            let mut vs = vs;
            let a = vs.pop();
            let b = vs.pop();
            vs.push(a);
            vs.push(b);
            push_next(ctx, id, vs);
            Ok(())
        }
        Kind::If => eval_if(ctx, id, vs, 1),
        Kind::IfCmp => eval_if(ctx, id, vs, 2),
        Kind::Phi => super::phi::eval_phi(ctx, id, vs),
        Kind::InvokeStatic | Kind::InvokeSpecial => eval_invoke_static(ctx, id, addr, vs),
        Kind::InvokeVirtual => eval_invoke_virtual(ctx, id, addr, vs),
        Kind::Return => eval_return(ctx, id, op, addr, vs),
        Kind::Unsupported => Err(Error::UnsupportedInstruction {
            opcode: op.byte().unwrap_or(0),
            addr,
        }),
    }
}

fn eval_const(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let value = const_param(&ctx.code, op, addr);
    let d = ctx.dfg.alloc(Datum::new(DatumKind::Const, value, op.wide(), id));
    let d = ctx.dfg.intern_const(d);
    ctx.dfg.add_node(d);
    vs.push(d);
    push_next(ctx, id, vs);
    Ok(())
}

fn eval_local_ld(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let slot = local_slot(ctx, op, addr);
    ctx.lvar_read.insert(slot);

    let mut d = ctx
        .dfg
        .alloc(Datum::new(DatumKind::LocalRead, slot, op.wide(), id));
    let real_preds = vs.real_preds_lv(&ctx.dfg, d);
    let prev = vs.local_add(&ctx.dfg, d);

    if let Some(df) = prev {
        // An inlined callee received a reference parameter: the slot holds
        // the caller's datum itself, keyed under a different value.
        if ctx.dfg.datum(df).value != slot {
            vs.push(df);
            vs.local_alias(slot, df);
            push_next(ctx, id, vs);
            return Ok(());
        }

        if ctx.dfg.datum(df).is_merge_like() {
            ctx.dfg.add_node(d);
            ctx.dfg.add_sedge(df, d);
        } else {
            // Store-to-load forwarding: reuse the previous access instead of
            // a fresh load, keeping its recorded predecessors.
            vs.local_add_merged(slot, df, real_preds.unwrap_or_default());
            d = df;
            if ctx.dfg.datum(df).kind == DatumKind::LocalWrite {
                let src = ctx.dfg.datum(df).stored;
                let (bp, dec) = {
                    let i = ctx.graph.instr(id);
                    (i.branchpoint, i.decision)
                };
                let (df_bp, df_dec) = creator_branch(ctx, df);
                let mut fold = same_branch(ctx, bp, dec, df_bp, df_dec);
                let this_loop = ctx.loops.loop_of(addr);
                let df_loop = ctx.loops.loop_of(creator_addr(ctx, df));
                if !ctx.single_lv_store(ctx.dfg.datum(df).value) && this_loop != df_loop {
                    fold = false;
                }
                if fold {
                    if let Some(src) = src {
                        if ctx.dfg.datum(src).kind == DatumKind::Const {
                            d = src;
                        }
                    }
                }
            }
        }
    } else {
        ctx.dfg.add_node(d);
    }

    vs.push(d);
    push_next(ctx, id, vs);
    Ok(())
}

fn eval_local_st(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let o = vs.pop();
    let slot = local_slot(ctx, op, addr);
    ctx.lvar_write.insert(slot);

    let mut datum = Datum::new(DatumKind::LocalWrite, slot, op.wide(), id);
    datum.stored = Some(o);
    let d = ctx.dfg.alloc(datum);
    ctx.dfg.add_op(d);
    ctx.dfg.add_edge(o, d, 1);
    barrier_edge(ctx, id, d);
    ctx.all_lv_stores.push(d);

    let real_preds = vs.real_preds_lv(&ctx.dfg, d);
    let prev = vs.local_add(&ctx.dfg, d);
    if let Some(prev) = prev {
        ctx.dfg.add_sedge(prev, d);
    }
    anti_dependences(ctx, id, d, real_preds.as_deref());

    push_next(ctx, id, vs);
    Ok(())
}

/// Orders every same-iteration consumer of a prior slot version before the
/// new store (write-after-read).
pub(crate) fn anti_dependences(
    ctx: &mut SynthesisContext,
    store_instr: InstrId,
    store: DatumId,
    real_preds: Option<&[DatumId]>,
) {
    let Some(real_preds) = real_preds else { return };
    let (bp, dec) = {
        let i = ctx.graph.instr(store_instr);
        (i.branchpoint, i.decision)
    };
    for &pred in real_preds {
        for edge in ctx.dfg.succs(pred).to_vec() {
            let consumer = edge.sink;
            if consumer == store {
                continue;
            }
            let (c_bp, c_dec) = creator_branch(ctx, consumer);
            if compatible_branches(ctx, bp, dec, c_bp, c_dec) {
                ctx.dfg.add_sedge(consumer, store);
            }
        }
    }
}

fn eval_dup(
    ctx: &mut SynthesisContext,
    id: InstrId,
    shape: DupShape,
    mut vs: VStack,
) -> Result<()> {
    let wide = |ctx: &SynthesisContext, d: DatumId| ctx.dfg.datum(d).wide;
    match shape {
        DupShape::Dup => {
            let a = vs.pop();
            vs.push(a);
            vs.push(a);
        }
        DupShape::DupX1 => {
            let a = vs.pop();
            let b = vs.pop();
            vs.push(a);
            vs.push(b);
            vs.push(a);
        }
        DupShape::DupX2 => {
            let a = vs.pop();
            let b = vs.pop();
            if wide(ctx, b) {
                vs.push(a);
                vs.push(b);
                vs.push(a);
            } else {
                let c = vs.pop();
                vs.push(a);
                vs.push(c);
                vs.push(b);
                vs.push(a);
            }
        }
        DupShape::Dup2 => {
            let a = vs.pop();
            if wide(ctx, a) {
                vs.push(a);
                vs.push(a);
            } else {
                let b = vs.pop();
                vs.push(b);
                vs.push(a);
                vs.push(b);
                vs.push(a);
            }
        }
        DupShape::Dup2X1 => {
            let a = vs.pop();
            if wide(ctx, a) {
                let b = vs.pop();
                vs.push(a);
                vs.push(b);
                vs.push(a);
            } else {
                let b = vs.pop();
                let c = vs.pop();
                vs.push(b);
                vs.push(a);
                vs.push(c);
                vs.push(b);
                vs.push(a);
            }
        }
        DupShape::Dup2X2 => {
            let a = vs.pop();
            if wide(ctx, a) {
                let b = vs.pop();
                if wide(ctx, b) {
                    vs.push(a);
                    vs.push(b);
                    vs.push(a);
                } else {
                    let c = vs.pop();
                    vs.push(a);
                    vs.push(c);
                    vs.push(b);
                    vs.push(a);
                }
            } else {
                let b = vs.pop();
                let c = vs.pop();
                if wide(ctx, c) {
                    vs.push(b);
                    vs.push(a);
                    vs.push(c);
                    vs.push(b);
                    vs.push(a);
                } else {
                    let d = vs.pop();
                    vs.push(b);
                    vs.push(a);
                    vs.push(d);
                    vs.push(c);
                    vs.push(b);
                    vs.push(a);
                }
            }
        }
    }
    push_next(ctx, id, vs);
    Ok(())
}

fn eval_if(ctx: &mut SynthesisContext, id: InstrId, mut vs: VStack, operands: u8) -> Result<()> {
    let loop_controller = ctx.graph.instr(id).is_loop_controller();

    let res = if operands == 2 {
        let op2 = vs.pop();
        let op1 = vs.pop();
        if loop_controller {
            ctx.dfg.mark_necessary(op1);
            ctx.dfg.mark_necessary(op2);
        }
        let value = ctx.dfg.datum(op2).value;
        let res = ctx.dfg.alloc(Datum::new(DatumKind::Sink, value, false, id));
        ctx.dfg.add_node(res);
        ctx.dfg.add_op(res);
        ctx.dfg.add_edge(op1, res, 1);
        ctx.dfg.add_edge(op2, res, 2);
        res
    } else {
        let op1 = vs.pop();
        if loop_controller {
            ctx.dfg.mark_necessary(op1);
        }
        let value = ctx.dfg.datum(op1).value;
        let res = ctx.dfg.alloc(Datum::new(DatumKind::Sink, value, false, id));
        ctx.dfg.add_node(res);
        ctx.dfg.add_op(res);
        ctx.dfg.add_edge(op1, res, 1);
        res
    };

    let phi = ctx.graph.instr(id).phi_node();
    if let Some(info) = ctx.graph.instr_mut(phi).phi_info_mut() {
        info.if_datum = Some(res);
    }
    barrier_edge(ctx, id, res);

    for succ in ctx.graph.succs(id).to_vec() {
        let decision = ctx.graph.instr(succ).decision;
        let arm = vs.split(&mut ctx.dfg, decision);
        ctx.vstacks.insert(succ, arm);
        ctx.pushd(succ);
    }
    Ok(())
}

fn eval_invoke_static(
    ctx: &mut SynthesisContext,
    id: InstrId,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let fid = ctx.code.read_u16(addr + 1);

    if let Some(intrinsic) = ctx.intrinsics.get(fid) {
        let op1 = vs.pop();
        let value = ctx.dfg.datum(op1).value;
        let res = ctx.dfg.alloc(Datum::new(DatumKind::Stack, value, false, id));
        ctx.dfg.add_op(res);
        barrier_edge(ctx, id, res);
        ctx.dfg.add_edge(op1, res, intrinsic.operands);
        for slot in (1..intrinsic.operands).rev() {
            let opn = vs.pop();
            ctx.dfg.add_edge(opn, res, slot);
        }
        vs.push(res);
        push_next(ctx, id, vs);
        return Ok(());
    }

    let arg_count = ctx
        .methods
        .get(fid as usize)
        .map(|m| u32::from(m.arg_count))
        .unwrap_or(0);
    spill_arguments(ctx, id, addr, &mut vs, arg_count)?;
    push_next(ctx, id, vs);
    Ok(())
}

/// Pops the call arguments into the callee's fresh local namespace.
///
/// Reference parameters reuse the caller's datum under the callee slot so
/// dependences resolve across the frames; everything else goes through a
/// synthetic store.
fn spill_arguments(
    ctx: &mut SynthesisContext,
    id: InstrId,
    addr: i32,
    vs: &mut VStack,
    arg_count: u32,
) -> Result<Option<DatumId>> {
    let (bp, dec) = {
        let i = ctx.graph.instr(id);
        (i.branchpoint, i.decision)
    };
    let callee_offset = i64::from(ctx.slot_offset(addr + 3));

    let mut last = None;
    let mut i = 0;
    while i < arg_count {
        let src = vs.pop();
        last = Some(src);
        let value = i64::from(arg_count - i - 1) + callee_offset;

        let src_op = ctx.graph.instr(ctx.dfg.datum(src).creator).op;
        if src_op.creates_reference() {
            vs.local_alias(value, src);
            i += 1;
            continue;
        }

        let wide = ctx.dfg.datum(src).wide;
        let (store_op, slot) = if wide {
            i += 1; // a wide argument fills two slots
            (Opcode::Lstore, value - 1)
        } else {
            (Opcode::Istore, value)
        };
        let creator = fresh_creator(ctx, store_op, addr, bp, dec);
        let mut datum = Datum::new(DatumKind::LocalWrite, slot, wide, creator);
        datum.stored = Some(src);
        let dest = ctx.dfg.alloc(datum);
        ctx.count_lv_store(slot);
        barrier_edge(ctx, id, dest);
        vs.local_add(&ctx.dfg, dest);
        ctx.all_lv_stores.push(dest);
        ctx.dfg.add_op(dest);
        ctx.dfg.add_edge(src, dest, 1);
        i += 1;
    }
    Ok(last)
}

fn eval_invoke_virtual(
    ctx: &mut SynthesisContext,
    id: InstrId,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let packed = u32::from(ctx.code.read_u16(addr + 1));
    let arg_count = packed >> 10;
    let assumed_tag = (packed & 0x3ff) as u16;

    let receiver = spill_arguments(ctx, id, addr, &mut vs, arg_count)?;
    let Some(receiver) = receiver else {
        return Err(Error::NotSynthesizable(format!(
            "dynamic dispatch without receiver at {addr}"
        )));
    };

    match ctx.dfg.tag_assumption(receiver) {
        None => {
            let (bp, dec) = {
                let i = ctx.graph.instr(id);
                (i.branchpoint, i.decision)
            };
            // Guard the speculation: load the receiver's type tag and
            // compare it against the historically observed one.
            let loader_creator = fresh_creator(ctx, Opcode::GetfieldQuick, addr, None, false);
            let mut loader = Datum::new(DatumKind::FieldRead, TYPE_TAG_FIELD, false, loader_creator);
            loader.reference = Some(receiver);
            let loader = ctx.dfg.alloc(loader);

            let const_creator = fresh_creator(ctx, Opcode::Sipush, addr, None, false);
            let assumption = ctx.dfg.alloc(Datum::new(
                DatumKind::Const,
                i64::from(assumed_tag),
                false,
                const_creator,
            ));
            let assumption = ctx.dfg.intern_const(assumption);

            let guard_creator = fresh_creator(ctx, Opcode::TagCmp, addr, bp, dec);
            let guard = ctx
                .dfg
                .alloc(Datum::new(DatumKind::Checker, 0, false, guard_creator));
            barrier_edge(ctx, id, guard);

            ctx.dfg.add_op(loader);
            ctx.dfg.add_op(assumption);
            ctx.dfg.add_op(guard);
            ctx.dfg.add_edge(receiver, loader, 1);
            ctx.dfg.add_edge(loader, guard, 1);
            ctx.dfg.add_edge(assumption, guard, 2);
            ctx.dfg.record_tag_assumption(receiver, assumed_tag);
        }
        Some(prev) if prev != assumed_tag => {
            return Err(Error::NotSynthesizable(format!(
                "conflicting dispatch assumptions for receiver at {addr}"
            )));
        }
        Some(_) => {}
    }

    push_next(ctx, id, vs);
    Ok(())
}

fn eval_return(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let final_return = matches!(ctx.graph.instr(id).ext, InstrExt::Return { final_return: true });

    if op != Opcode::Return && ctx.return_count_at(addr) > 1 {
        // Several returns merge through a synthetic slot: each stores its
        // result, the final return reloads it for the caller's stack.
        let carrier = ctx.next_free_slot();
        let (bp, dec) = {
            let i = ctx.graph.instr(id);
            (i.branchpoint, i.decision)
        };
        let o = vs.pop();
        let store_creator = fresh_creator(ctx, Opcode::Istore, addr, bp, dec);
        let mut datum = Datum::new(DatumKind::LocalWrite, carrier, false, store_creator);
        datum.stored = Some(o);
        let store = ctx.dfg.alloc(datum);
        ctx.dfg.add_op(store);
        ctx.dfg.add_edge(o, store, 1);
        ctx.all_lv_stores.push(store);
        let prev = vs.local_add(&ctx.dfg, store);
        if let Some(prev) = prev {
            ctx.dfg.add_sedge(prev, store);
        }
        barrier_edge(ctx, id, store);

        if final_return {
            let (load_bp, load_dec) = match bp {
                Some(phi) => {
                    let p = ctx.graph.instr(phi);
                    (p.branchpoint, p.decision)
                }
                None => (None, false),
            };
            let load_creator = fresh_creator(ctx, Opcode::Iload, addr, load_bp, load_dec);
            let load = ctx
                .dfg
                .alloc(Datum::new(DatumKind::LocalRead, carrier, false, load_creator));
            ctx.dfg.add_node(load);
            vs.local_add(&ctx.dfg, load);
            ctx.dfg.add_sedge(store, load);
            vs.push(load);
        }
    }

    push_next(ctx, id, vs);
    Ok(())
}

/// Records an array read in the access log.
pub(crate) fn log_array_read(ctx: &mut SynthesisContext, handle: DatumId, index: DatumId, addr: i32) {
    let direct = ctx.dfg.datum(index).is_local();
    let index_value = ctx.dfg.datum(index).value;
    ctx.array_reads.push(ArrayAccess {
        handle,
        direct,
        addr,
        index_value,
    });
}

/// Records an array write in the access log.
pub(crate) fn log_array_write(
    ctx: &mut SynthesisContext,
    handle: DatumId,
    index: DatumId,
    addr: i32,
) {
    let direct = ctx.dfg.datum(index).is_local();
    let index_value = ctx.dfg.datum(index).value;
    ctx.array_writes.push(ArrayAccess {
        handle,
        direct,
        addr,
        index_value,
    });
}
