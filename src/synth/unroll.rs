//! Prefetch-aware loop unrolling.
//!
//! Only the innermost backward jump of each nesting level is unrolled: the
//! body is replicated, per-copy exit jumps are retargeted at the shared
//! continuation, inlined namespaces are re-striped per copy, and the
//! canonical backward jump is rewritten to close the widened body. A
//! density heuristic optionally appends prefetch-only and latency-fill
//! copies, tagged in the buffer's prefetch tables; those copies overlap
//! memory latency and are never executed for their results.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::bytecode::{CodeBuffer, Kind};
use crate::synth::SynthesisConfig;
use crate::{Error, Result};

/// Memory-density bound above which prefetch copies stop paying off.
const DENSITY_HIGH_PERCENT: f64 = 40.0;
/// Density bound below which extra fill copies are appended.
const DENSITY_LOW_PERCENT: f64 = 7.0;
/// Fill copies appended below the low bound.
const LOW_DENSITY_FILL: u32 = 4;

/// Result of the unrolling pass.
#[derive(Debug)]
pub struct UnrolledWindow {
    /// The rewritten code image.
    pub code: CodeBuffer,
    /// Window stop after replication.
    pub stop: i32,
}

/// Unrolls every innermost loop of `[start, stop]`.
///
/// # Errors
///
/// [`Error::JumpOffsetOverflow`] when the widened body pushes the canonical
/// backward jump past the signed 16-bit range.
pub fn unroll_inner_loops(
    mut code: CodeBuffer,
    start: i32,
    mut stop: i32,
    namespace_stride: u16,
    config: &SynthesisConfig,
) -> Result<UnrolledWindow> {
    let tables = code.scan_jumps(start, stop)?;
    let mut forward = tables.forward;
    let mut backward: BTreeMap<i32, i32> = BTreeMap::new();

    // Several backward jumps sharing one head collapse into the latest
    // jump; the earlier ones become forward jumps to it.
    let mut heads: HashMap<i32, Vec<i32>> = HashMap::new();
    for (jump, offset) in tables.backward {
        let head = jump + offset;
        if let Some(earlier) = heads.get(&head) {
            for &orig in earlier.clone().iter() {
                let new_offset = jump - orig;
                code.write_i16(orig + 1, new_offset as i16);
                backward.remove(&orig);
                forward.insert(orig, new_offset);
            }
        }
        heads.entry(head).or_default().push(jump);
        backward.insert(jump, offset);
    }

    let mut last_goto = -1i32;
    while let Some((&jump, &offset)) = backward.iter().next() {
        backward.remove(&jump);
        if code.byte(jump) != 0xa7 {
            continue;
        }
        let head = jump + offset;
        let mut grown = 0;

        if head > last_goto {
            // Innermost loop of this nesting level.
            let body_len = jump - head;
            let factor = effective_factor(config.unroll, config.max_unroll_length, body_len);
            let (prefetch_copies, fill_copies) =
                prefetch_heuristic(&code, head, jump, config)?;
            let total = factor + prefetch_copies + fill_copies;

            if total > 1 {
                let unrolled = unroll_body(
                    code,
                    head,
                    jump,
                    factor,
                    prefetch_copies,
                    fill_copies,
                    namespace_stride,
                )?;
                code = unrolled;
                grown = (total as i32 - 1) * (body_len + 1);
                stop += grown;

                let mut new_forward = BTreeMap::new();
                for (j, o) in forward {
                    if j < head && j + o > jump {
                        let o = o + grown;
                        code.write_i16(j + 1, o as i16);
                        new_forward.insert(j, o);
                    } else if j > jump {
                        new_forward.insert(j + grown, o);
                    } else {
                        new_forward.insert(j, o);
                    }
                }
                forward = new_forward;
                let mut new_backward = BTreeMap::new();
                for (j, o) in backward {
                    let mut o = o;
                    if j + o < head {
                        o -= grown;
                        code.write_i16(j + grown + 1, o as i16);
                    }
                    new_backward.insert(j + grown, o);
                }
                backward = new_backward;
                debug!(head, jump, factor, prefetch_copies, fill_copies, "loop unrolled");
            }
        }
        last_goto = jump + grown;
    }

    Ok(UnrolledWindow { code, stop })
}

/// The requested factor clamped so the widened body stays inside the
/// configured length bound, never below one.
fn effective_factor(requested: u32, max_unroll_length: usize, body_len: i32) -> u32 {
    if body_len <= 0 {
        return 1;
    }
    let bound = (max_unroll_length as i32 / body_len).max(1) as u32;
    requested.clamp(1, bound)
}

/// Extra prefetch/fill copies from the body's memory-access density.
fn prefetch_heuristic(
    code: &CodeBuffer,
    head: i32,
    jump: i32,
    config: &SynthesisConfig,
) -> Result<(u32, u32)> {
    if !config.prefetch {
        return Ok((0, 0));
    }
    let mut mem_ops = 0usize;
    let mut total = 0usize;
    for addr in code.instruction_addrs(head, jump)? {
        let kind = code.opcode_at(addr)?.kind();
        if matches!(kind, Kind::ArrayLd | Kind::ArraySt) {
            mem_ops += 1;
        }
        total += 1;
    }
    let density = mem_ops as f64 * 100.0 / (total as f64 - 7.0).max(1.0);
    let mut prefetch = 1;
    let mut fill = 0;
    if density >= DENSITY_HIGH_PERCENT {
        prefetch = 0;
    } else if density < DENSITY_LOW_PERCENT {
        fill = LOW_DENSITY_FILL;
    }
    Ok((prefetch, fill))
}

/// Replicates the loop body `[head, jump)` so the region holds
/// `regular + fill + prefetch` copies followed by the rewritten backward
/// jump.
fn unroll_body(
    code: CodeBuffer,
    head: i32,
    jump: i32,
    regular: u32,
    prefetch: u32,
    fill: u32,
    namespace_stride: u16,
) -> Result<CodeBuffer> {
    let total = (regular + prefetch + fill) as i32;
    let body_len = jump - head;
    let grown = (total - 1) * (body_len + 1);

    let old_goto = i32::from(code.read_i16(jump + 1));
    let new_goto = old_goto - grown;
    if new_goto < i32::from(i16::MIN) || new_goto > 0 {
        return Err(Error::JumpOffsetOverflow { offset: new_goto });
    }

    // Exit jumps: conditionals whose taken arm lands just past the backward
    // jump leave the loop; every copy needs its own retargeted offset.
    let mut exits: HashMap<i32, i32> = HashMap::new();
    for addr in code.instruction_addrs(head, jump - 1)? {
        let op = code.opcode_at(addr)?;
        if op.is_branch() {
            let exit_val = i32::from(code.read_i16(addr + 1));
            if addr + exit_val - 3 == jump {
                exits.insert(addr - head, exit_val + grown);
            }
        }
    }

    let loop_namespace = code.slot_offset(head).unwrap_or(0);
    let old_bytes = code.bytes();
    let old_offsets = code.slot_offsets();

    let new_len = old_bytes.len() + grown as usize;
    let mut bytes = Vec::with_capacity(new_len);
    let mut offsets = Vec::with_capacity(new_len);
    let mut pre_tags = Vec::with_capacity(new_len);
    let mut fill_tags = Vec::with_capacity(new_len);

    // Untouched prefix.
    bytes.extend_from_slice(&old_bytes[..head as usize]);
    offsets.extend_from_slice(&old_offsets[..head as usize]);
    for addr in 0..head {
        pre_tags.push(code.is_prefetch(addr));
        fill_tags.push(code.is_prefetch_fill(addr));
    }

    // Body copies.
    let mut exit_state = exits.clone();
    for copy in 0..total {
        let is_fill = copy >= regular as i32 && copy < (regular + fill) as i32;
        let is_prefetch = copy >= (regular + fill) as i32;
        let mut rel = 0;
        while rel < body_len {
            let src = (head + rel) as usize;
            bytes.push(old_bytes[src]);
            let mut offset = old_offsets[src];
            if offset != loop_namespace {
                offset += namespace_stride * copy as u16;
            }
            offsets.push(offset);
            pre_tags.push(is_prefetch);
            fill_tags.push(is_fill);

            if let Some(exit_val) = exit_state.get_mut(&rel) {
                // The leading copy exits the loop directly; later copies
                // jump at the padding in front of the rewritten goto.
                let [hi, lo] = (*exit_val as i16).to_be_bytes();
                bytes.push(hi);
                bytes.push(lo);
                offsets.push(offset);
                offsets.push(offset);
                pre_tags.push(is_prefetch);
                pre_tags.push(is_prefetch);
                fill_tags.push(is_fill);
                fill_tags.push(is_fill);
                if copy == 0 {
                    *exit_val -= 3;
                }
                *exit_val -= body_len + 1;
                rel += 3;
                continue;
            }
            rel += 1;
        }
    }

    // Padding in front of the single rewritten backward jump.
    while bytes.len() < (head + body_len * total) as usize + (total - 1) as usize {
        bytes.push(0);
        offsets.push(loop_namespace);
        pre_tags.push(false);
        fill_tags.push(false);
    }

    // The canonical backward jump.
    bytes.push(0xa7);
    let [hi, lo] = (new_goto as i16).to_be_bytes();
    bytes.push(hi);
    bytes.push(lo);
    for _ in 0..3 {
        offsets.push(loop_namespace);
        pre_tags.push(false);
        fill_tags.push(false);
    }

    // Untouched suffix.
    bytes.extend_from_slice(&old_bytes[(jump + 3) as usize..]);
    offsets.extend_from_slice(&old_offsets[(jump + 3) as usize..]);
    for addr in jump + 3..old_bytes.len() as i32 {
        pre_tags.push(code.is_prefetch(addr));
        fill_tags.push(code.is_prefetch_fill(addr));
    }

    Ok(code.rebuilt(bytes, offsets, pre_tags, fill_tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::BytecodeAssembler;

    fn counting_loop() -> (Vec<u8>, i32, i32) {
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        (asm.finish(), head, back)
    }

    #[test]
    fn test_factor_one_is_identity() {
        let (bytes, start, stop) = counting_loop();
        let config = SynthesisConfig {
            unroll: 1,
            ..SynthesisConfig::default()
        };
        let out = unroll_inner_loops(
            CodeBuffer::from_bytes(bytes.clone()),
            start,
            stop,
            4,
            &config,
        )
        .unwrap();
        assert_eq!(out.stop, stop);
        assert_eq!(out.code.bytes(), &bytes[..]);
        assert_eq!(out.code.version(), 0);
    }

    #[test]
    fn test_factor_clamps_to_max_unroll_length() {
        let (bytes, start, stop) = counting_loop();
        // Body is 9 bytes; a 20-byte bound allows two copies at most.
        let config = SynthesisConfig {
            unroll: 8,
            max_unroll_length: 20,
            ..SynthesisConfig::default()
        };
        let out =
            unroll_inner_loops(CodeBuffer::from_bytes(bytes), start, stop, 4, &config).unwrap();
        // One extra copy of body+padding.
        assert_eq!(out.stop, stop + 10);
    }

    #[test]
    fn test_unrolled_loop_still_closes() {
        let (bytes, start, stop) = counting_loop();
        let config = SynthesisConfig {
            unroll: 3,
            max_unroll_length: 100,
            ..SynthesisConfig::default()
        };
        let out =
            unroll_inner_loops(CodeBuffer::from_bytes(bytes), start, stop, 4, &config).unwrap();
        let new_stop = out.stop;
        assert_eq!(out.code.byte(new_stop), 0xa7);
        assert_eq!(out.code.jump_target(new_stop), start);
        // Copy exits: the first copy leaves the loop, later copies land on
        // the padding before the backward jump.
        let exit0 = out.code.jump_target(3);
        assert_eq!(exit0, new_stop + 3);
    }

    #[test]
    fn test_overflowing_back_jump_is_rejected() {
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).sipush(10_000).if_icmpge_fwd("exit");
        for _ in 0..2000 {
            asm.nop();
        }
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        let config = SynthesisConfig {
            unroll: 20,
            max_unroll_length: 60_000,
            ..SynthesisConfig::default()
        };
        let err = unroll_inner_loops(
            CodeBuffer::from_bytes(asm.finish()),
            head,
            back,
            4,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, Error::JumpOffsetOverflow { .. }));
    }
}
