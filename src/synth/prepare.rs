//! Window preparation.
//!
//! Before any graph is built the raw window is normalized: patches of
//! previously synthesized inner kernels are reverted, the window is extended
//! when the profiler under-recorded the loop end, opcodes the pipeline can
//! never handle are rejected early, and while-style loops missing their
//! canonical backward jump get one inserted with all jump tables shifted.

use std::collections::BTreeMap;

use tracing::debug;

use crate::bytecode::CodeBuffer;
use crate::synth::{FabricCapabilities, Intrinsics, KernelTable, SynthesisConfig};
use crate::{Error, Result};

/// Result of the preparation pass.
#[derive(Debug)]
pub struct PreparedWindow {
    /// The normalized code image.
    pub code: CodeBuffer,
    /// Window start.
    pub start: i32,
    /// Window stop (canonical backward jump) in the normalized image.
    pub stop: i32,
    /// Address execution resumes at in the *unmodified* stream; the patch
    /// jump targets this.
    pub resume: i32,
}

/// Normalizes the synthesis window.
///
/// # Errors
///
/// Every §7 window-shape condition: returns inside the window, required but
/// disabled inlining, unsupported opcodes, unrepairable loop shapes.
pub fn prepare(
    mut code: CodeBuffer,
    start: i32,
    mut stop: i32,
    kernels: &KernelTable,
    intrinsics: &Intrinsics,
    capabilities: &FabricCapabilities,
    config: &SynthesisConfig,
) -> Result<PreparedWindow> {
    // Case 1 of the while-loop defect: the profiler recorded the backward
    // jump of the condition evaluation, not the loop's textual end. The
    // first conditional jumping past the recorded stop marks the true end.
    let mut addr = start;
    while addr < stop {
        let op = code.opcode_at(addr)?;
        if op.is_branch() {
            let target = code.jump_target(addr);
            if target >= stop + 3 {
                if code.byte(target - 3) == 0xa7 {
                    debug!(old = stop, new = target - 3, "extending under-recorded window");
                    stop = target - 3;
                }
                break;
            }
        }
        addr += op.len() as i32;
    }
    let resume = stop;

    // Revert earlier patches and reject unsupported shapes.
    let mut addr = start;
    while addr <= stop {
        if code.byte(addr) == 0xfe {
            let kernel_id = code.byte(addr + 1);
            let Some(replaced) = kernels.replaced(kernel_id) else {
                return Err(Error::NotSynthesizable(format!(
                    "patched kernel {kernel_id} has no replacement record"
                )));
            };
            for (i, &b) in replaced.iter().enumerate() {
                code.write_byte(addr + i as i32, b);
            }
        }

        let byte = code.byte(addr);
        if (0xac..=0xb1).contains(&byte) {
            return Err(Error::ReturnInWindow { addr });
        }
        if byte == 0xfb || byte == 0xdb {
            return Err(Error::UnsupportedInstruction { opcode: byte, addr });
        }

        if !config.inline {
            match byte {
                0xd6 | 0xd9 | 0xda => return Err(Error::InliningDisabled { addr }),
                0xd7 => {
                    let fid = code.read_u16(addr + 1);
                    let native = intrinsics
                        .get(fid)
                        .and_then(crate::synth::Intrinsic::operator)
                        .is_some_and(|op| capabilities.supports(op));
                    if !native {
                        return Err(Error::InliningDisabled { addr });
                    }
                }
                _ => {}
            }
        }

        addr += code.opcode_at(addr)?.len() as i32;
    }

    // Case 2: a backward conditional jump closes a loop that has no
    // canonical backward goto; insert one and shift every affected jump.
    let tables = code.scan_jumps(start, stop)?;
    let mut forward = tables.forward;
    let mut backward = tables.backward;

    if forward.is_empty() {
        return Err(Error::MalformedLoop(
            "window has no forward exit jump".into(),
        ));
    }

    while let Some((&jump, &offset)) = backward.iter().next() {
        backward.remove(&jump);
        if code.byte(jump) == 0xa7 {
            continue;
        }
        let target = jump + offset;

        // The forward jump leaving this loop bounds its textual end.
        let Some(end) = forward
            .iter()
            .find(|(&f, &o)| f > target && f < jump && f + o > jump)
            .map(|(&f, &o)| f + o)
        else {
            continue;
        };

        let closes_loop =
            i32::from(code.read_i16(end - 2)) + end - 3 == target && code.byte(end - 3) == 0xa7;
        if closes_loop {
            continue;
        }

        debug!(jump, target, end, "inserting canonical backward jump");
        // Redirect the conditional jump forward to the inserted goto.
        code.write_i16(jump + 1, i16::try_from(end - jump).map_err(|_| {
            Error::JumpOffsetOverflow { offset: end - jump }
        })?);

        // Splice `goto target` in front of the loop end.
        let back_offset = target - end;
        let goto_bytes = {
            let [hi, lo] = (back_offset as i16).to_be_bytes();
            [0xa7, hi, lo]
        };
        let slot_offset = code.slot_offset(end).unwrap_or(0);
        code = code.splice_after(end - 1, &goto_bytes, slot_offset);
        stop += 3;

        // Shift the jump tables across the insertion point.
        let at = end;
        let mut new_forward = BTreeMap::new();
        for (j, o) in forward {
            if j < at && j + o >= at {
                let o = o + 3;
                code.write_i16(j + 1, o as i16);
                new_forward.insert(j, o);
            } else if j >= at {
                new_forward.insert(j + 3, o);
            } else {
                new_forward.insert(j, o);
            }
        }
        forward = new_forward;
        let mut new_backward = BTreeMap::new();
        for (j, o) in backward {
            if j < at {
                new_backward.insert(j, o);
                continue;
            }
            let mut o = o;
            if j + o < at {
                o -= 3;
                code.write_i16(j + 3 + 1, o as i16);
            }
            new_backward.insert(j + 3, o);
        }
        backward = new_backward;
        // The redirected conditional is a forward jump from here on.
        forward.insert(jump, at - jump);
    }

    Ok(PreparedWindow {
        code,
        start,
        stop,
        resume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::BytecodeAssembler;

    fn simple_loop() -> (Vec<u8>, i32, i32) {
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        (asm.finish(), head, back)
    }

    #[test]
    fn test_well_formed_loop_passes_unchanged() {
        let (bytes, start, stop) = simple_loop();
        let prepared = prepare(
            CodeBuffer::from_bytes(bytes.clone()),
            start,
            stop,
            &KernelTable::new(),
            &Intrinsics::new(),
            &FabricCapabilities::full(),
            &SynthesisConfig::default(),
        )
        .unwrap();
        assert_eq!(prepared.stop, stop);
        assert_eq!(prepared.code.bytes(), &bytes[..]);
    }

    #[test]
    fn test_return_in_window_rejected() {
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.ireturn();
        let back = asm.goto_back(head);
        asm.label("exit");
        let err = prepare(
            CodeBuffer::from_bytes(asm.finish()),
            head,
            back,
            &KernelTable::new(),
            &Intrinsics::new(),
            &FabricCapabilities::full(),
            &SynthesisConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ReturnInWindow { .. }));
    }

    #[test]
    fn test_inlining_disabled_rejects_calls() {
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.invokestatic_quick(3);
        let back = asm.goto_back(head);
        asm.label("exit");
        let config = SynthesisConfig {
            inline: false,
            ..SynthesisConfig::default()
        };
        let err = prepare(
            CodeBuffer::from_bytes(asm.finish()),
            head,
            back,
            &KernelTable::new(),
            &Intrinsics::new(),
            &FabricCapabilities::full(),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InliningDisabled { .. }));
    }

    #[test]
    fn test_patched_kernel_is_reverted() {
        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        for _ in 0..8 {
            asm.nop();
        }
        let back = asm.goto_back(head);
        asm.label("exit");
        let (mut bytes, start, stop) = (asm.finish(), head, back);
        let original: [u8; 8] = bytes[6..14].try_into().unwrap();
        // Overwrite the body with an enter/leave-fabric patch for kernel 3.
        let patch = [0xfe, 3, 1, 0xff, 1, 0, 0, 6];
        bytes[6..14].copy_from_slice(&patch);
        let mut kernels = KernelTable::new();
        kernels.deploy(3, original);

        let prepared = prepare(
            CodeBuffer::from_bytes(bytes),
            start,
            stop,
            &kernels,
            &Intrinsics::new(),
            &FabricCapabilities::full(),
            &SynthesisConfig::default(),
        )
        .unwrap();
        assert_eq!(&prepared.code.bytes()[6..14], &original[..]);
    }
}
