//! Heap-access evaluation.
//!
//! Array elements, object fields and static fields all flow through the
//! per-class access histories: a new access folds into an equal earlier one
//! when its result is provably the same value on the same branch path,
//! forwards a matching earlier write's stored value, or otherwise joins the
//! history and picks up ordering edges and alias candidates.

use crate::bytecode::Opcode;
use crate::cfg::InstrId;
use crate::dfg::alu::fold_store_operand;
use crate::dfg::eval::{
    barrier_edge, creator_addr, creator_branch, fresh_creator, log_array_read, log_array_write,
    push_next, same_branch, LENGTH_INDEX,
};
use crate::dfg::{Datum, DatumId, DatumKind, VStack};
use crate::synth::SynthesisContext;
use crate::Result;

fn object_add(ctx: &mut SynthesisContext, vs: &mut VStack, d: DatumId) {
    let policy = ctx.config.aliasing;
    vs.object_add(&mut ctx.graph, &mut ctx.dfg, policy, &mut ctx.aliases, d);
}

/// Outcome of the history lookup for a read.
enum Folded {
    /// No equal earlier access; the read materializes.
    No,
    /// The read's value is already available as the carried datum.
    Value(DatumId),
}

/// Searches the access history for an earlier access that makes this read
/// redundant: a same-reference write with equal index (forwarding its
/// stored value) or an equal earlier read.
fn fold_indexed_read(
    ctx: &mut SynthesisContext,
    vs: &VStack,
    id: InstrId,
    addr: i32,
    reference: DatumId,
    index: DatumId,
    probe: DatumId,
) -> Folded {
    if !ctx.config.cse {
        return Folded::No;
    }
    let Some(history) = vs.heap_history(&ctx.graph, &ctx.dfg, probe).cloned() else {
        return Folded::No;
    };
    let (bp, dec) = {
        let i = ctx.graph.instr(id);
        (i.branchpoint, i.decision)
    };

    for generation in history {
        // Two competing versions mean a branch merge in between; nothing
        // beyond it can be proven equal.
        if generation.len() != 1 {
            break;
        }
        let d = generation[0];
        let datum = ctx.dfg.datum(d).clone();

        if datum.kind == DatumKind::ArrayWrite && datum.reference == Some(reference) {
            if datum.index == Some(index) && ctx.loops.same_loop(creator_addr(ctx, d), addr) {
                let (d_bp, d_dec) = creator_branch(ctx, d);
                if same_branch(ctx, bp, dec, d_bp, d_dec) {
                    if let Some(stored) = datum.stored {
                        return Folded::Value(stored);
                    }
                }
            }
            break;
        }

        if datum.index.is_some()
            && datum.index == Some(index)
            && datum.reference == Some(reference)
        {
            let (d_bp, d_dec) = creator_branch(ctx, d);
            if same_branch(ctx, bp, dec, d_bp, d_dec) {
                return Folded::Value(d);
            }
        }
    }
    Folded::No
}

pub(crate) fn eval_array_ld(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let mut index = vs.pop();
    fold_store_operand(ctx, id, addr, &mut index);
    let reference = vs.pop();
    log_array_read(ctx, reference, index, addr);

    let value = ctx.dfg.datum(reference).value;
    let mut datum = Datum::new(DatumKind::ArrayRead, value, op.wide(), id);
    datum.reference = Some(reference);
    datum.index = Some(index);
    datum.direct_index = ctx.dfg.datum(index).is_local();
    let res = ctx.dfg.alloc(datum);

    if let Folded::Value(existing) = fold_indexed_read(ctx, &vs, id, addr, reference, index, res) {
        vs.push(existing);
        push_next(ctx, id, vs);
        return Ok(());
    }

    ctx.dfg.add_op(res);
    barrier_edge(ctx, id, res);
    ctx.dfg.add_edge(index, res, 2);
    ctx.dfg.add_edge(reference, res, 1);
    vs.push(res);
    object_add(ctx, &mut vs, res);
    push_next(ctx, id, vs);
    Ok(())
}

pub(crate) fn eval_array_st(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let v = vs.pop();
    let mut index = vs.pop();
    fold_store_operand(ctx, id, addr, &mut index);
    let reference = vs.pop();
    log_array_write(ctx, reference, index, addr);

    let value = ctx.dfg.datum(reference).value;
    let mut datum = Datum::new(DatumKind::ArrayWrite, value, op.wide(), id);
    datum.reference = Some(reference);
    datum.index = Some(index);
    datum.stored = Some(v);
    datum.direct_index = ctx.dfg.datum(index).is_local();
    let res = ctx.dfg.alloc(datum);

    ctx.dfg.add_op(res);
    barrier_edge(ctx, id, res);
    ctx.dfg.add_edge(v, res, 3);
    ctx.dfg.add_edge(index, res, 2);
    ctx.dfg.add_edge(reference, res, 1);
    object_add(ctx, &mut vs, res);
    push_next(ctx, id, vs);
    Ok(())
}

pub(crate) fn eval_array_len(
    ctx: &mut SynthesisContext,
    id: InstrId,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    // The length cell is modeled as an element behind a reserved index.
    let index_creator = fresh_creator(ctx, Opcode::Sipush, addr, None, false);
    let index = ctx
        .dfg
        .alloc(Datum::new(DatumKind::Const, LENGTH_INDEX, false, index_creator));
    let index = ctx.dfg.intern_const(index);
    ctx.dfg.add_node(index);

    let reference = vs.pop();
    log_array_read(ctx, reference, index, addr);

    let value = ctx.dfg.datum(reference).value;
    let mut datum = Datum::new(DatumKind::ArrayRead, value, false, id);
    datum.reference = Some(reference);
    datum.index = Some(index);
    let res = ctx.dfg.alloc(datum);

    if let Folded::Value(existing) = fold_indexed_read(ctx, &vs, id, addr, reference, index, res) {
        vs.push(existing);
        push_next(ctx, id, vs);
        return Ok(());
    }

    ctx.dfg.add_op(res);
    barrier_edge(ctx, id, res);
    ctx.dfg.add_edge(index, res, 2);
    ctx.dfg.add_edge(reference, res, 1);
    vs.push(res);
    object_add(ctx, &mut vs, res);
    push_next(ctx, id, vs);
    Ok(())
}

pub(crate) fn eval_field_ld(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let op1 = vs.pop();
    let offset = i64::from(ctx.code.read_u16(addr + 1));
    let mut datum = Datum::new(DatumKind::FieldRead, offset, op.wide(), id);
    datum.reference = Some(op1);
    let res = ctx.dfg.alloc(datum);

    // Field forwarding: an earlier same-field access of the same object
    // makes this load redundant.
    if ctx.config.cse {
        if let Some(history) = vs.heap_history(&ctx.graph, &ctx.dfg, res).cloned() {
            let (bp, dec) = {
                let i = ctx.graph.instr(id);
                (i.branchpoint, i.decision)
            };
            for generation in history {
                if generation.len() != 1 {
                    break;
                }
                let d = generation[0];
                let d_datum = ctx.dfg.datum(d).clone();
                let is_field = matches!(
                    d_datum.kind,
                    DatumKind::FieldRead | DatumKind::FieldWrite
                );
                if d_datum.reference == Some(op1) {
                    if is_field && d_datum.value == offset {
                        let (d_bp, d_dec) = creator_branch(ctx, d);
                        let mut fold = same_branch(ctx, bp, dec, d_bp, d_dec);
                        if d_datum.kind == DatumKind::FieldWrite
                            && !ctx.single_put_field(d_datum.value)
                            && !ctx.loops.same_loop(addr, creator_addr(ctx, d))
                        {
                            fold = false;
                        }
                        if fold {
                            let result = if d_datum.kind == DatumKind::FieldWrite {
                                d_datum.stored.unwrap_or(d)
                            } else {
                                d
                            };
                            vs.push(result);
                            push_next(ctx, id, vs);
                            return Ok(());
                        }
                        // A prior read of an enclosing iteration level is
                        // hoisted out of the branch instead.
                        if d_datum.kind == DatumKind::FieldRead {
                            let d_loop = ctx.loops.loop_of(creator_addr(ctx, d));
                            if ctx.loops.contains_addr(d_loop, addr) {
                                let creator = ctx.dfg.datum(d).creator;
                                ctx.graph.instr_mut(creator).branchpoint = None;
                                vs.push(d);
                                push_next(ctx, id, vs);
                                return Ok(());
                            }
                        }
                    }
                } else if is_field {
                    break;
                }
            }
        }
    }

    object_add(ctx, &mut vs, res);
    ctx.dfg.add_op(res);
    ctx.dfg.add_edge(op1, res, 1);
    barrier_edge(ctx, id, res);
    vs.push(res);
    push_next(ctx, id, vs);
    Ok(())
}

pub(crate) fn eval_field_st(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let value = vs.pop();
    let reference = vs.pop();
    let offset = i64::from(ctx.code.read_u16(addr + 1));
    let mut datum = Datum::new(DatumKind::FieldWrite, offset, op.wide(), id);
    datum.reference = Some(reference);
    datum.stored = Some(value);
    let res = ctx.dfg.alloc(datum);

    ctx.dfg.add_op(res);
    ctx.dfg.add_edge(reference, res, 2);
    ctx.dfg.add_edge(value, res, 1);
    barrier_edge(ctx, id, res);
    object_add(ctx, &mut vs, res);
    push_next(ctx, id, vs);
    Ok(())
}

/// Materializes the constant handle/offset pair behind a static access.
fn static_handle(
    ctx: &mut SynthesisContext,
    addr: i32,
    offset: i64,
) -> (DatumId, DatumId) {
    let ref_creator = fresh_creator(ctx, Opcode::Bipush, addr, None, false);
    let reference = ctx
        .dfg
        .alloc(Datum::new(DatumKind::Const, 1, false, ref_creator));
    let reference = ctx.dfg.intern_const(reference);

    let index_creator = fresh_creator(ctx, Opcode::Sipush, addr, None, false);
    let index = ctx
        .dfg
        .alloc(Datum::new(DatumKind::Const, offset, false, index_creator));
    let index = ctx.dfg.intern_const(index);
    (reference, index)
}

pub(crate) fn eval_static_ld(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let offset = i64::from(ctx.code.read_u16(addr + 1));
    let (reference, index) = static_handle(ctx, addr, offset);
    log_array_read(ctx, reference, index, addr);

    let mut datum = Datum::new(DatumKind::ArrayRead, 1, op.wide(), id);
    datum.reference = Some(reference);
    datum.index = Some(index);
    let res = ctx.dfg.alloc(datum);

    ctx.dfg.add_op(res);
    ctx.dfg.add_node(reference);
    ctx.dfg.add_node(index);
    barrier_edge(ctx, id, res);
    ctx.dfg.add_edge(index, res, 2);
    ctx.dfg.add_edge(reference, res, 1);
    vs.push(res);
    object_add(ctx, &mut vs, res);
    push_next(ctx, id, vs);
    Ok(())
}

pub(crate) fn eval_static_st(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let v = vs.pop();
    let offset = i64::from(ctx.code.read_u16(addr + 1));
    let (reference, index) = static_handle(ctx, addr, offset);
    log_array_write(ctx, reference, index, addr);

    let mut datum = Datum::new(DatumKind::ArrayWrite, 1, op.wide(), id);
    datum.reference = Some(reference);
    datum.index = Some(index);
    datum.stored = Some(v);
    let res = ctx.dfg.alloc(datum);

    ctx.dfg.add_op(res);
    ctx.dfg.add_node(reference);
    ctx.dfg.add_node(index);
    barrier_edge(ctx, id, res);
    ctx.dfg.add_edge(v, res, 3);
    ctx.dfg.add_edge(index, res, 2);
    ctx.dfg.add_edge(reference, res, 1);
    object_add(ctx, &mut vs, res);
    push_next(ctx, id, vs);
    Ok(())
}
