//! ALU and increment evaluation.
//!
//! Carries the scalar optimizations the replay performs while building the
//! value graph: store-to-load forwarding of operands, constant folding and
//! re-association of add/sub chains, strength reduction of power-of-two
//! multiplies and divides, algebraic identities, and common-subexpression
//! folding against the already-built operation set.

use crate::bytecode::Opcode;
use crate::cfg::InstrId;
use crate::dfg::eval::{
    anti_dependences, barrier_edge, creator_addr, creator_branch, fresh_creator, push_next,
    same_branch,
};
use crate::dfg::{Datum, DatumId, DatumKind, VStack};
use crate::synth::SynthesisContext;
use crate::Result;

/// Forwards a local-store operand to its source value when the store
/// happened on the same branch path inside the current loop; otherwise the
/// store must materialize.
pub(crate) fn fold_store_operand(
    ctx: &mut SynthesisContext,
    instr: InstrId,
    addr: i32,
    operand: &mut DatumId,
) {
    let d = ctx.dfg.datum(*operand);
    if d.kind != DatumKind::LocalWrite {
        return;
    }
    let Some(src) = d.stored else { return };
    let src_d = ctx.dfg.datum(src);
    // A store whose source is another slot's access carries the blocking
    // assignment across slots and must not be bypassed.
    let cross_slot = src_d.is_local() && src_d.value != d.value;
    let this_loop = ctx.loops.loop_of(addr);
    if !ctx.loops.contains_addr(this_loop, creator_addr(ctx, *operand)) || cross_slot {
        return;
    }
    let (bp, dec) = {
        let i = ctx.graph.instr(instr);
        (i.branchpoint, i.decision)
    };
    let (s_bp, s_dec) = creator_branch(ctx, src);
    if same_branch(ctx, bp, dec, s_bp, s_dec) {
        *operand = src;
    } else {
        ctx.dfg.mark_necessary(*operand);
    }
}

fn creator_op(ctx: &SynthesisContext, d: DatumId) -> Opcode {
    ctx.graph.instr(ctx.dfg.datum(d).creator).op
}

fn is_const(ctx: &SynthesisContext, d: DatumId) -> bool {
    ctx.dfg.datum(d).kind == DatumKind::Const
}

fn is_direct_const(ctx: &SynthesisContext, d: DatumId) -> bool {
    is_const(ctx, d) && !creator_op(ctx, d).indirect_const()
}

fn const_val(ctx: &SynthesisContext, d: DatumId) -> i64 {
    ctx.dfg.datum(d).value
}

fn intern_new_const(ctx: &mut SynthesisContext, value: i64, creator: InstrId) -> DatumId {
    let d = ctx.dfg.alloc(Datum::new(DatumKind::Const, value, false, creator));
    ctx.dfg.intern_const(d)
}

/// Orders the folded result before any pending store of a slot whose value
/// one of its operands still carries on the stack.
fn bypassed_fixups(
    ctx: &mut SynthesisContext,
    bypassed: Option<DatumId>,
    operands: &[DatumId],
    res: DatumId,
) {
    let Some(bypassed) = bypassed else { return };
    for &op in operands {
        if !ctx.dfg.datum(op).is_local() {
            continue;
        }
        let op_value = ctx.dfg.datum(op).value;
        let mut succs: Vec<DatumId> = ctx.dfg.succs(bypassed).iter().map(|e| e.sink).collect();
        succs.extend(ctx.dfg.ssuccs(bypassed));
        for succ in succs {
            let s = ctx.dfg.datum(succ);
            if s.kind == DatumKind::LocalWrite && s.value == op_value {
                ctx.dfg.add_sedge(res, succ);
            }
        }
    }
}

/// Same as [`bypassed_fixups`] but for folded identities that leave an
/// operand on the stack: consumers of the operand must run before the
/// pending store (post-increment coupling).
fn bypassed_couples(ctx: &mut SynthesisContext, bypassed: Option<DatumId>, operand: DatumId) {
    let Some(bypassed) = bypassed else { return };
    if !ctx.dfg.datum(operand).is_local() {
        return;
    }
    let op_value = ctx.dfg.datum(operand).value;
    let mut succs: Vec<DatumId> = ctx.dfg.succs(bypassed).iter().map(|e| e.sink).collect();
    succs.extend(ctx.dfg.ssuccs(bypassed));
    for succ in succs {
        let s = ctx.dfg.datum(succ);
        if s.kind == DatumKind::LocalWrite && s.value == op_value {
            ctx.dfg.add_post_increment_couple(succ, operand);
        }
    }
}

/// Common-subexpression lookup: an equal operation over the same operands
/// in a loop that is guaranteed to have executed already.
fn cse_lookup(
    ctx: &SynthesisContext,
    res_op: Opcode,
    res_addr: i32,
    op1: DatumId,
    op2: DatumId,
) -> Option<DatumId> {
    if !ctx.config.cse {
        return None;
    }
    for &old in ctx.dfg.ops() {
        let old_op = creator_op(ctx, old);
        if !(old_op == res_op || (res_op == Opcode::Iadd && old_op == Opcode::Iinc)) {
            continue;
        }
        let old_loop = ctx.loops.loop_of(creator_addr(ctx, old));
        if !ctx.loops.contains_addr(old_loop, res_addr) {
            continue;
        }
        let preds = ctx.dfg.preds(old);
        if preds.len() < 2 {
            continue;
        }
        let (e1, e2) = (preds[0], preds[1]);
        if (e1.sink == op1 && e2.sink == op2 && e1.slot == 2)
            || (e1.sink == op2 && e2.sink == op1 && e1.slot == 1)
        {
            return Some(old);
        }
    }
    None
}

/// Evaluates a binary ALU operation.
pub(crate) fn eval_alu_bin(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let mut op1 = vs.pop();
    let mut op2 = vs.pop();
    fold_store_operand(ctx, id, addr, &mut op1);
    fold_store_operand(ctx, id, addr, &mut op2);

    let (bp, dec) = {
        let i = ctx.graph.instr(id);
        (i.branchpoint, i.decision)
    };
    let res_value = ctx.dfg.datum(op1).value;
    let mut res = ctx.dfg.alloc(Datum::new(DatumKind::Stack, res_value, op.wide(), id));
    let mut bypassed: Option<DatumId> = None;

    // Immediate constant folding of the int add/sub/shift family.
    if ctx.config.constant_folding && is_const(ctx, op1) && is_const(ctx, op2) {
        let folded = match op {
            Opcode::Ishl => Some((const_val(ctx, op2) as i32) << const_val(ctx, op1)),
            Opcode::Ishr => Some((const_val(ctx, op2) as i32) >> const_val(ctx, op1)),
            Opcode::Iushr => Some(((const_val(ctx, op2) as i32 as u32) >> const_val(ctx, op1)) as i32),
            Opcode::Isub => Some((const_val(ctx, op2) as i32).wrapping_sub(const_val(ctx, op1) as i32)),
            Opcode::Iadd => Some((const_val(ctx, op2) as i32).wrapping_add(const_val(ctx, op1) as i32)),
            _ => None,
        };
        if let Some(value) = folded {
            let creator = fresh_creator(ctx, Opcode::Sipush, addr, None, false);
            let folded = intern_new_const(ctx, i64::from(value), creator);
            ctx.dfg.add_op(folded);
            vs.push(folded);
            push_next(ctx, id, vs);
            return Ok(());
        }
    }

    // Power-of-two strength reduction.
    if (op == Opcode::Idiv || op == Opcode::Imul) && is_const(ctx, op1) {
        let value = const_val(ctx, op1);
        if matches!(value, 2 | 4 | 8 | 16 | 32) {
            let shift = value.trailing_zeros() as i64;
            let const_creator = ctx.dfg.datum(op1).creator;
            op1 = intern_new_const(ctx, shift, const_creator);
            ctx.dfg.add_node(op1);
            let shift_op = if op == Opcode::Idiv { Opcode::Ishr } else { Opcode::Ishl };
            let creator = fresh_creator(ctx, shift_op, addr, bp, dec);
            res = ctx.dfg.alloc(Datum::new(DatumKind::Stack, shift, false, creator));
        } else if value == 1 {
            vs.push(op2);
            push_next(ctx, id, vs);
            return Ok(());
        }
    } else if op == Opcode::Iadd && ctx.config.constant_folding {
        reassociate_add(ctx, id, addr, bp, dec, &mut op1, &mut op2, &mut res, &mut bypassed);
    } else if op == Opcode::Isub && ctx.config.constant_folding {
        reassociate_sub(ctx, id, addr, bp, dec, &mut op1, &mut op2, &mut res, &mut bypassed);
    }

    let res_op = creator_op(ctx, res);
    if let Some(old) = cse_lookup(ctx, res_op, creator_addr(ctx, res), op1, op2) {
        vs.push(old);
        push_next(ctx, id, vs);
        return Ok(());
    }

    // Algebraic identities of the int add/sub family.
    if matches!(res_op, Opcode::Iadd | Opcode::Isub)
        && is_const(ctx, op1)
        && const_val(ctx, op1) == 0
    {
        bypassed_couples(ctx, bypassed, op2);
        vs.push(op2);
        push_next(ctx, id, vs);
        return Ok(());
    }
    if res_op == Opcode::Iadd && is_const(ctx, op2) && const_val(ctx, op2) == 0 {
        bypassed_couples(ctx, bypassed, op1);
        vs.push(op1);
        push_next(ctx, id, vs);
        return Ok(());
    }

    bypassed_fixups(ctx, bypassed, &[op1, op2], res);

    ctx.dfg.add_op(res);
    ctx.dfg.add_edge(op1, res, 2);
    ctx.dfg.add_edge(op2, res, 1);
    vs.push(res);
    push_next(ctx, id, vs);
    Ok(())
}

/// Finds the direct-constant operand of an add/sub/increment chain result.
fn chain_const(ctx: &SynthesisContext, chain: DatumId) -> Option<(DatumId, u8)> {
    for edge in ctx.dfg.preds(chain) {
        if is_direct_const(ctx, edge.sink) {
            return Some((edge.sink, edge.slot));
        }
    }
    None
}

fn is_chain(ctx: &SynthesisContext, d: DatumId) -> bool {
    matches!(
        creator_op(ctx, d),
        Opcode::Iadd | Opcode::Iinc | Opcode::Isub
    )
}

/// Re-associates `(x ± k) + c` into `x ± k'`, folding the two constants.
#[allow(clippy::too_many_arguments)]
fn reassociate_add(
    ctx: &mut SynthesisContext,
    _id: InstrId,
    addr: i32,
    bp: Option<InstrId>,
    dec: bool,
    op1: &mut DatumId,
    op2: &mut DatumId,
    res: &mut DatumId,
    bypassed: &mut Option<DatumId>,
) {
    let (c, chain, chain_is_op2) = if is_const(ctx, *op1) && is_chain(ctx, *op2) {
        (*op1, *op2, true)
    } else if is_const(ctx, *op2) && is_chain(ctx, *op1) {
        (*op2, *op1, false)
    } else {
        return;
    };
    let Some((other_const, slot)) = chain_const(ctx, chain) else {
        return;
    };

    let chain_op = creator_op(ctx, chain);
    let new_value = if chain_op == Opcode::Isub && slot == 2 {
        const_val(ctx, other_const) - const_val(ctx, c)
    } else {
        const_val(ctx, c) + const_val(ctx, other_const)
    };
    let new_op = if chain_op == Opcode::Isub { Opcode::Isub } else { Opcode::Iadd };
    let creator = fresh_creator(ctx, new_op, addr, bp, dec);
    *res = ctx.dfg.alloc(Datum::new(
        DatumKind::Stack,
        const_val(ctx, other_const),
        false,
        creator,
    ));
    *bypassed = Some(chain);

    rewire_chain(ctx, chain, other_const, slot, new_value, op1, op2, chain_is_op2);
}

/// Re-associates `c - (x ± k)` and `(x ± k) - c` likewise.
#[allow(clippy::too_many_arguments)]
fn reassociate_sub(
    ctx: &mut SynthesisContext,
    _id: InstrId,
    addr: i32,
    bp: Option<InstrId>,
    dec: bool,
    op1: &mut DatumId,
    op2: &mut DatumId,
    res: &mut DatumId,
    bypassed: &mut Option<DatumId>,
) {
    if is_const(ctx, *op1) && is_chain(ctx, *op2) {
        // (x ± k) - c
        let c = *op1;
        let chain = *op2;
        let Some((other_const, slot)) = chain_const(ctx, chain) else {
            return;
        };
        let chain_op = creator_op(ctx, chain);
        let new_value = if chain_op == Opcode::Isub && slot == 2 {
            const_val(ctx, c) + const_val(ctx, other_const)
        } else {
            const_val(ctx, other_const) - const_val(ctx, c)
        };
        let new_op = if chain_op == Opcode::Isub { Opcode::Isub } else { Opcode::Iadd };
        let creator = fresh_creator(ctx, new_op, addr, bp, dec);
        *res = ctx.dfg.alloc(Datum::new(
            DatumKind::Stack,
            const_val(ctx, other_const),
            false,
            creator,
        ));
        *bypassed = Some(chain);
        rewire_chain(ctx, chain, other_const, slot, new_value, op1, op2, true);
    } else if is_const(ctx, *op2) && is_chain(ctx, *op1) {
        // c - (x ± k)
        let c = *op2;
        let chain = *op1;
        let Some((other_const, slot)) = chain_const(ctx, chain) else {
            return;
        };
        let chain_op = creator_op(ctx, chain);
        let new_value = if chain_op == Opcode::Isub && slot == 2 {
            const_val(ctx, other_const) + const_val(ctx, c)
        } else {
            const_val(ctx, c) - const_val(ctx, other_const)
        };
        let new_op = if chain_op == Opcode::Isub && slot == 1 {
            Opcode::Iadd
        } else {
            Opcode::Isub
        };
        let creator = fresh_creator(ctx, new_op, addr, bp, dec);
        *res = ctx.dfg.alloc(Datum::new(
            DatumKind::Stack,
            const_val(ctx, other_const),
            false,
            creator,
        ));
        *bypassed = Some(chain);

        let folded = {
            let creator = ctx.dfg.datum(other_const).creator;
            intern_new_const(ctx, new_value, creator)
        };
        ctx.dfg.add_node(folded);
        *op2 = folded;
        for edge in ctx.dfg.preds(chain).to_vec() {
            if edge.slot != slot {
                *op1 = edge.sink;
            }
        }
    }
}

/// Replaces the chain's constant by the folded one and redistributes the
/// chain's operands onto the rebuilt operation.
#[allow(clippy::too_many_arguments)]
fn rewire_chain(
    ctx: &mut SynthesisContext,
    chain: DatumId,
    other_const: DatumId,
    const_slot: u8,
    new_value: i64,
    op1: &mut DatumId,
    op2: &mut DatumId,
    _chain_is_op2: bool,
) {
    for edge in ctx.dfg.preds(chain).to_vec() {
        let new_operand = if edge.slot == const_slot {
            let creator = ctx.dfg.datum(other_const).creator;
            let folded = intern_new_const(ctx, new_value, creator);
            ctx.dfg.add_node(folded);
            folded
        } else {
            edge.sink
        };
        if edge.slot == 1 {
            *op2 = new_operand;
        } else {
            *op1 = new_operand;
        }
    }
}

/// Evaluates a unary ALU operation (negations, conversions, fabric-native
/// intrinsics).
pub(crate) fn eval_alu_un(
    ctx: &mut SynthesisContext,
    id: InstrId,
    op: Opcode,
    mut vs: VStack,
) -> Result<()> {
    let op1 = vs.pop();
    let value = ctx.dfg.datum(op1).value;
    let res = ctx.dfg.alloc(Datum::new(DatumKind::Stack, value, op.wide(), id));

    if ctx.config.cse {
        let existing = ctx.dfg.ops().iter().copied().find(|&old| {
            creator_op(ctx, old) == op
                && ctx.dfg.preds(old).first().is_some_and(|first| first.sink == op1)
        });
        if let Some(old) = existing {
            vs.push(old);
            push_next(ctx, id, vs);
            return Ok(());
        }
    }

    ctx.dfg.add_op(res);
    ctx.dfg.add_edge(op1, res, 1);
    vs.push(res);
    push_next(ctx, id, vs);
    Ok(())
}

/// Evaluates the local-increment instruction: a slot load, an addition of
/// the immediate, and a synthetic store back, each foldable on its own.
pub(crate) fn eval_iinc(
    ctx: &mut SynthesisContext,
    id: InstrId,
    addr: i32,
    mut vs: VStack,
) -> Result<()> {
    let slot = i64::from(ctx.code.byte(addr + 1)) + i64::from(ctx.slot_offset(addr));
    ctx.lvar_read.insert(slot);
    ctx.lvar_write.insert(slot);

    let (bp, dec) = {
        let i = ctx.graph.instr(id);
        (i.branchpoint, i.decision)
    };

    // Load half.
    let mut d = ctx
        .dfg
        .alloc(Datum::new(DatumKind::LocalRead, slot, false, id));
    let delta = i64::from(ctx.code.byte(addr + 2) as i8);
    let r_creator = ctx.dfg.datum(d).creator;
    let mut r = intern_new_const(ctx, delta, r_creator);

    let real_preds = vs.real_preds_lv(&ctx.dfg, d);
    let prev = vs.local_add(&ctx.dfg, d);
    if let Some(df) = prev {
        if ctx.dfg.datum(df).is_merge_like() {
            ctx.dfg.add_node(d);
            ctx.dfg.add_sedge(df, d);
        } else {
            vs.local_add_merged(slot, df, real_preds.clone().unwrap_or_default());
            d = df;
            if ctx.dfg.datum(df).kind == DatumKind::LocalWrite {
                let src = ctx.dfg.datum(df).stored;
                if let Some(src) = src {
                    let src_d = ctx.dfg.datum(src);
                    let cross_slot = src_d.is_local() && src_d.value != ctx.dfg.datum(df).value;
                    let this_loop = ctx.loops.loop_of(addr);
                    if ctx.loops.contains_addr(this_loop, creator_addr(ctx, df)) && !cross_slot {
                        let (s_bp, s_dec) = creator_branch(ctx, src);
                        if same_branch(ctx, bp, dec, s_bp, s_dec) {
                            d = src;
                        } else {
                            ctx.dfg.mark_necessary(df);
                        }
                    }
                }
            }
        }
    } else {
        ctx.dfg.add_node(d);
    }
    vs.push(d);

    // Add half.
    let mut op1 = vs.pop();
    let mut res = ctx.dfg.alloc(Datum::new(DatumKind::Stack, slot, false, id));
    let mut bypassed: Option<DatumId> = None;

    let op1_creator = creator_op(ctx, op1);
    let op1_is_chain = op1_creator == Opcode::Iadd
        || op1_creator == Opcode::Isub
        || (op1_creator == Opcode::Iinc && ctx.dfg.datum(op1).kind == DatumKind::Stack);
    if ctx.config.constant_folding && op1_is_chain {
        if let Some((other_const, const_slot)) = chain_const(ctx, op1) {
            let new_value = if op1_creator == Opcode::Isub && const_slot == 2 {
                const_val(ctx, other_const) - delta
            } else {
                delta + const_val(ctx, other_const)
            };
            let new_op = if op1_creator == Opcode::Isub {
                Opcode::Isub
            } else {
                Opcode::Iadd
            };
            let creator = fresh_creator(ctx, new_op, addr, bp, dec);
            bypassed = Some(op1);
            res = ctx.dfg.alloc(Datum::new(
                DatumKind::Stack,
                const_val(ctx, other_const),
                false,
                creator,
            ));
            for edge in ctx.dfg.preds(op1).to_vec() {
                let new_operand = if edge.slot == const_slot {
                    let c = ctx.dfg.datum(other_const).creator;
                    let folded = intern_new_const(ctx, new_value, c);
                    ctx.dfg.add_node(folded);
                    folded
                } else {
                    edge.sink
                };
                if edge.slot == 1 {
                    op1 = new_operand;
                } else {
                    r = new_operand;
                }
            }
        }
    }

    // Fold against an equal increment already in the graph.
    let mut folded = false;
    if ctx.config.cse {
        for &old in ctx.dfg.ops() {
            let old_op = creator_op(ctx, old);
            if !(old_op == Opcode::Iinc || old_op == Opcode::Iadd) {
                continue;
            }
            let old_loop = ctx.loops.loop_of(creator_addr(ctx, old));
            if !ctx.loops.contains_addr(old_loop, addr) {
                continue;
            }
            let preds = ctx.dfg.preds(old);
            if preds.len() < 2 {
                continue;
            }
            let (e1, e2) = (preds[0], preds[1]);
            if (e1.sink == r && e2.sink == op1 && e1.slot == 2)
                || (e1.sink == op1 && e2.sink == r && e1.slot == 1)
            {
                bypassed = None;
                res = old;
                folded = true;
                break;
            }
        }
    }
    if !folded {
        ctx.dfg.add_op(res);
        ctx.dfg.add_edge(op1, res, 1);
        ctx.dfg.add_node(r);
        ctx.dfg.add_edge(r, res, 2);
    }

    // Store half.
    let store_creator = fresh_creator(ctx, Opcode::IincStore, addr, bp, dec);
    let mut store_datum = Datum::new(DatumKind::LocalWrite, slot, false, store_creator);
    store_datum.stored = Some(res);
    let store = ctx.dfg.alloc(store_datum);
    ctx.dfg.add_op(store);
    ctx.dfg.add_edge(res, store, 1);
    barrier_edge(ctx, id, store);
    let prev = vs.local_add(&ctx.dfg, store);
    if let Some(prev) = prev {
        ctx.dfg.add_sedge(prev, store);
    }
    ctx.all_lv_stores.push(store);

    // The increment wrote the slot while older versions may still sit on
    // the stack: their consumers must execute before this store.
    for on_stack in vs.values().to_vec() {
        let datum = ctx.dfg.datum(on_stack);
        if datum.is_local() && datum.value == slot {
            ctx.dfg.add_post_increment_couple(store, on_stack);
        }
    }

    anti_dependences(ctx, id, store, real_preds.as_deref());

    if bypassed.is_some() && ctx.dfg.datum(op1).is_local() {
        bypassed_fixups(ctx, bypassed, &[op1], res);
    }

    push_next(ctx, id, vs);
    Ok(())
}
