//! Projection of the internal value graph onto the target-agnostic CDFG.
//!
//! Walks the completed value graph once, mapping each datum to a node with
//! an operation tag from the fixed instruction table, interning constants by
//! value, attaching controller/decision pairs propagated from the owning
//! instruction's branch point, and exporting the loop forest and the
//! alias-candidate map built during replay.

use std::collections::HashMap;

use tracing::debug;

use crate::bytecode::{Kind, Opcode};
use crate::cdfg::{Cdfg, CdfgLoop, CdfgLoopForest, CdfgNode, NodeId, Operator};
use crate::dfg::{DatumId, DatumKind};
use crate::synth::SynthesisContext;
use crate::{Error, Result};

/// Everything the external scheduler consumes.
#[derive(Debug)]
pub struct Projection {
    /// The projected graph.
    pub cdfg: Cdfg,
    /// The projected loop forest.
    pub loops: CdfgLoopForest,
    /// Alias-candidate pairs, keyed by the earlier access.
    pub aliases: Vec<(NodeId, Vec<NodeId>)>,
    /// Local slots the fabric receives from the token machine.
    pub locals_received: usize,
    /// Local slots the fabric sends back.
    pub locals_sent: usize,
    /// Constants transferred directly.
    pub direct_constants: usize,
    /// Constants resolved through the constant pool.
    pub indirect_constants: usize,
}

/// Operation tag of a datum.
fn operator_for(ctx: &SynthesisContext, d: DatumId) -> Result<Operator> {
    let datum = ctx.dfg.datum(d);
    if datum.kind == DatumKind::Merge {
        return Ok(Operator::Mux);
    }
    let op = ctx.graph.instr(datum.creator).op;

    // The increment instruction owns three datums with one address; the
    // datum kind selects the half.
    if op == Opcode::Iinc {
        return Ok(match datum.kind {
            DatumKind::Stack => Operator::Iadd,
            DatumKind::Const => {
                if datum.wide {
                    Operator::Const64
                } else {
                    Operator::Const
                }
            }
            _ => Operator::Load,
        });
    }

    map_opcode(op).ok_or_else(|| {
        Error::NotSynthesizable(format!("no fabric operation for {op} at {}", datum.value))
    })
}

/// The fixed instruction → operation table.
fn map_opcode(op: Opcode) -> Option<Operator> {
    use Opcode::*;
    Some(match op {
        Iadd => Operator::Iadd,
        Isub => Operator::Isub,
        Imul => Operator::Imul,
        Idiv => Operator::Idiv,
        Irem => Operator::Irem,
        Ior => Operator::Ior,
        Iand => Operator::Iand,
        Ixor => Operator::Ixor,
        Ishl => Operator::Ishl,
        Ishr => Operator::Ishr,
        Iushr => Operator::Iushr,
        Lor => Operator::Lor,
        Land => Operator::Land,
        Lxor => Operator::Lxor,
        Lshl => Operator::Lshl,
        Lshr => Operator::Lshr,
        Lushr => Operator::Lushr,
        Ladd => Operator::Ladd,
        Lsub => Operator::Lsub,
        Lmul => Operator::Lmul,
        Ldiv => Operator::Ldiv,
        Lrem => Operator::Lrem,
        Fadd => Operator::Fadd,
        Fsub => Operator::Fsub,
        Fmul => Operator::Fmul,
        Fdiv => Operator::Fdiv,
        Dadd => Operator::Dadd,
        Dsub => Operator::Dsub,
        Dmul => Operator::Dmul,
        Ddiv => Operator::Ddiv,
        Ineg => Operator::Ineg,
        Lneg => Operator::Lneg,
        Fneg => Operator::Fneg,
        Dneg => Operator::Dneg,
        I2b => Operator::I2b,
        I2c => Operator::I2c,
        I2s => Operator::I2s,
        I2l => Operator::I2l,
        I2f => Operator::I2f,
        I2d => Operator::I2d,
        L2i => Operator::L2i,
        L2f => Operator::L2f,
        L2d => Operator::L2d,
        F2i => Operator::F2i,
        F2l => Operator::F2l,
        F2d => Operator::F2d,
        D2i => Operator::D2i,
        D2l => Operator::D2l,
        D2f => Operator::D2f,
        Lcmp => Operator::Lcmp,
        Fcmpl => Operator::Fcmpl,
        Fcmpg => Operator::Fcmpg,
        Dcmpl => Operator::Dcmpl,
        Dcmpg => Operator::Dcmpg,
        Ifeq | IfIcmpeq | IfAcmpeq => Operator::Ifeq,
        Ifne | IfIcmpne | IfAcmpne => Operator::Ifne,
        Iflt | IfIcmplt => Operator::Iflt,
        Ifge | IfIcmpge => Operator::Ifge,
        Ifgt | IfIcmpgt => Operator::Ifgt,
        Ifle | IfIcmple => Operator::Ifle,
        TagCmp => Operator::TagCmp,
        Nop => Operator::Nop,
        FSin => Operator::Fsin,
        FCos => Operator::Fcos,
        _ => match op.kind() {
            Kind::LocalLd => {
                if op.wide() {
                    Operator::Load64
                } else {
                    Operator::Load
                }
            }
            Kind::LocalSt => {
                if op.wide() {
                    Operator::Store64
                } else {
                    Operator::Store
                }
            }
            Kind::ArrayLd | Kind::FieldLd | Kind::StaticLd | Kind::ArrayLen => {
                if op.wide() {
                    Operator::DmaLoad64
                } else {
                    Operator::DmaLoad
                }
            }
            Kind::ArraySt | Kind::FieldSt | Kind::StaticSt => {
                if op.wide() {
                    Operator::DmaStore64
                } else {
                    Operator::DmaStore
                }
            }
            Kind::ConstLd => {
                if op.wide() {
                    Operator::Const64
                } else {
                    Operator::Const
                }
            }
            _ => return None,
        },
    })
}

struct ConstPool {
    by32: HashMap<i32, NodeId>,
    by64: HashMap<i64, NodeId>,
}

impl ConstPool {
    fn intern(
        &mut self,
        cdfg: &mut Cdfg,
        addr: i32,
        value: i64,
        wide: bool,
        indirect: bool,
    ) -> NodeId {
        let existing = if wide {
            self.by64.get(&value).copied()
        } else {
            self.by32.get(&(value as i32)).copied()
        };
        if let Some(id) = existing {
            return id;
        }
        let mut node = CdfgNode::new(addr, if wide { Operator::Const64 } else { Operator::Const });
        node.value = Some(value);
        node.wide = wide;
        node.indirect_const = indirect;
        let id = cdfg.add_node(node);
        if wide {
            self.by64.insert(value, id);
        } else {
            self.by32.insert(value as i32, id);
        }
        id
    }
}

/// Projects the finished session onto the scheduler-facing graph.
///
/// # Errors
///
/// [`Error::NotSynthesizable`] when a datum has no fabric operation.
pub fn project(ctx: &SynthesisContext) -> Result<Projection> {
    let mut cdfg = Cdfg::default();
    let mut pool = ConstPool {
        by32: HashMap::new(),
        by64: HashMap::new(),
    };
    let mut mapping: HashMap<DatumId, NodeId> = HashMap::new();

    // Nodes.
    for &d in ctx.dfg.nodes() {
        let datum = ctx.dfg.datum(d);
        let creator = ctx.graph.instr(datum.creator);
        let op = operator_for(ctx, d)?;
        let id = match op {
            Operator::Const | Operator::Const64 => {
                let wide = op == Operator::Const64;
                pool.intern(
                    &mut cdfg,
                    creator.addr,
                    datum.value,
                    wide,
                    creator.op.indirect_const(),
                )
            }
            Operator::Load | Operator::Store | Operator::Load64 | Operator::Store64
            | Operator::Mux => {
                let mut node = CdfgNode::new(creator.addr, op);
                node.value = Some(datum.value);
                node.wide = datum.wide;
                cdfg.add_node(node)
            }
            _ => {
                let mut node = CdfgNode::new(creator.addr, op);
                node.wide = datum.wide;
                cdfg.add_node(node)
            }
        };
        mapping.insert(d, id);
    }

    let sink_node = |ctx: &SynthesisContext,
                     mapping: &HashMap<DatumId, NodeId>,
                     phi: crate::cfg::InstrId|
     -> Option<NodeId> {
        ctx.graph
            .instr(phi)
            .phi_info()
            .and_then(|i| i.if_datum)
            .and_then(|d| mapping.get(&d).copied())
    };

    // Controllers and short-circuit markers.
    for &d in ctx.dfg.nodes() {
        let Some(&node) = mapping.get(&d) else { continue };
        let creator_id = ctx.dfg.datum(d).creator;
        let creator = ctx.graph.instr(creator_id);

        if let Some(bp) = creator.branchpoint {
            if let Some(controller) = sink_node(ctx, &mapping, bp) {
                if controller != node {
                    cdfg.node_mut(node).controller = Some((controller, creator.decision));
                }
            }
        }

        if let Some(info) = creator.if_info() {
            if let Some(sce) = info.sce_true {
                if let Some(ctrl) = sink_node(ctx, &mapping, sce.controller_phi) {
                    cdfg.node_mut(node).sce_true = Some((ctrl, sce.decision));
                    cdfg.set_control_dependency(ctrl, node);
                }
            }
            if let Some(sce) = info.sce_false {
                if let Some(ctrl) = sink_node(ctx, &mapping, sce.controller_phi) {
                    cdfg.node_mut(node).sce_false = Some((ctrl, sce.decision));
                    cdfg.set_control_dependency(ctrl, node);
                }
            }
        }
    }

    // Dependencies and implicit constants.
    for &d in ctx.dfg.nodes() {
        let Some(&from) = mapping.get(&d) else { continue };

        for &succ in ctx.dfg.ssuccs(d) {
            if let Some(&to) = mapping.get(&succ) {
                cdfg.set_control_dependency(from, to);
            }
        }
        for edge in ctx.dfg.succs(d) {
            let Some(&to) = mapping.get(&edge.sink) else {
                continue;
            };
            let consumer = ctx.dfg.datum(edge.sink);
            if consumer.kind == DatumKind::FieldWrite {
                // A field write addresses through (reference, offset
                // constant, value); the offset operand is implicit in the
                // encoding and materialized here.
                let slot = if edge.slot == 1 { 2 } else { 0 };
                cdfg.set_data_dependency(from, to, slot);
                let addr = ctx.graph.instr(consumer.creator).addr;
                let offset = pool.intern(&mut cdfg, addr, consumer.value, false, false);
                cdfg.set_data_dependency(offset, to, 1);
            } else {
                cdfg.set_data_dependency(from, to, usize::from(edge.slot).saturating_sub(1));
            }
        }

        let datum = ctx.dfg.datum(d);
        let creator = ctx.graph.instr(datum.creator);
        if datum.kind == DatumKind::FieldRead {
            let offset = pool.intern(&mut cdfg, creator.addr, datum.value, creator.op.wide(), false);
            cdfg.set_data_dependency(offset, from, 1);
        }
        if datum.kind != DatumKind::Merge && creator.op.kind() == Kind::If {
            // Compare-to-zero branches carry their zero implicitly.
            let zero = pool.intern(&mut cdfg, creator.addr, 0, false, false);
            cdfg.set_data_dependency(zero, from, 1);
        }
    }

    // Loop forest.
    let mut loops = CdfgLoopForest::default();
    for lp_id in ctx.loops.ids() {
        let lp = ctx.loops.get(lp_id);
        loops.loops.push(CdfgLoop {
            start: lp.start,
            stop: lp.stop,
            controller: ctx
                .graph
                .instr(lp.controller)
                .if_info()
                .map(|i| i.phi)
                .and_then(|phi| sink_node(ctx, &mapping, phi)),
            parent: lp.parent.map(crate::cfg::LoopId::index),
            children: lp.children.iter().map(|c| c.index()).collect(),
        });
    }

    // Alias candidates.
    let mut aliases = Vec::new();
    for (&first, seconds) in ctx.aliases.map() {
        let Some(&first_node) = mapping.get(&first) else {
            continue;
        };
        let mapped: Vec<NodeId> = seconds
            .iter()
            .filter_map(|s| mapping.get(s).copied())
            .collect();
        if !mapped.is_empty() {
            aliases.push((first_node, mapped));
        }
    }

    // Transfer counts: only the containing method's slots move between the
    // token machine and the fabric.
    let root = i64::from(ctx.root_locals);
    let locals_received = ctx.lvar_read.iter().filter(|&&s| s < root).count();
    let locals_sent = ctx.lvar_write.iter().filter(|&&s| s < root).count();
    let direct_constants = cdfg
        .node_ids()
        .filter(|&n| {
            matches!(cdfg.node(n).op, Operator::Const | Operator::Const64)
                && !cdfg.node(n).indirect_const
        })
        .count();
    let indirect_constants = cdfg
        .node_ids()
        .filter(|&n| cdfg.node(n).indirect_const)
        .count();

    debug!(
        nodes = cdfg.len(),
        loops = loops.loops.len(),
        aliases = aliases.len(),
        "projection complete"
    );
    Ok(Projection {
        cdfg,
        loops,
        aliases,
        locals_received,
        locals_sent,
        direct_constants,
        indirect_constants,
    })
}
