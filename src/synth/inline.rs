//! Method inlining.
//!
//! Every call inside the synthesis window is rewritten into a copy of the
//! callee's instruction stream placed directly after the call. The call
//! instruction itself stays: during replay it spills the arguments into the
//! callee's slot namespace, which the per-address slot-offset table keeps
//! disjoint from every other frame. Dynamically dispatched calls resolve
//! their target speculatively from the invocation history; the assumed
//! receiver tag is patched into the operand bytes so the replay can emit
//! the runtime guard.

use std::collections::BTreeMap;

use tracing::debug;

use crate::bytecode::CodeBuffer;
use crate::synth::{FabricCapabilities, Intrinsics, Invocation, KernelTable, MethodInfo, SynthesisConfig};
use crate::{Error, Result};

/// Maximum forward jump offset after splicing.
const MAX_FORWARD_OFFSET: i32 = i16::MAX as i32;

/// Result of the inlining pass.
#[derive(Debug)]
pub struct InlinedWindow {
    /// The rewritten code image.
    pub code: CodeBuffer,
    /// Window stop after splicing.
    pub stop: i32,
    /// One past the highest local-slot namespace in use.
    pub namespace_stride: u16,
}

/// Context the pass carries across call sites.
pub struct MethodInliner<'a> {
    methods: &'a [MethodInfo],
    section: &'a [u8],
    history: &'a [Invocation],
    kernels: &'a KernelTable,
    intrinsics: &'a mut Intrinsics,
    capabilities: &'a FabricCapabilities,
    config: &'a SynthesisConfig,
    /// Maps each inlined namespace offset to the absolute address delta of
    /// its frame, for locating call sites in the invocation history.
    frame_base: BTreeMap<u16, i32>,
    method_code_ref: i32,
    blacklist: Option<&'a std::collections::BTreeSet<usize>>,
}

impl<'a> MethodInliner<'a> {
    /// Creates the pass over the method table and dispatch history.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        methods: &'a [MethodInfo],
        section: &'a [u8],
        history: &'a [Invocation],
        kernels: &'a KernelTable,
        intrinsics: &'a mut Intrinsics,
        capabilities: &'a FabricCapabilities,
        config: &'a SynthesisConfig,
        method_code_ref: i32,
    ) -> Self {
        MethodInliner {
            methods,
            section,
            history,
            kernels,
            intrinsics,
            capabilities,
            config,
            frame_base: BTreeMap::new(),
            method_code_ref,
            blacklist: None,
        }
    }

    /// Attaches the synthesis blacklist; a call targeting a blacklisted
    /// method entry aborts the invocation.
    #[must_use]
    pub fn with_blacklist(mut self, blacklist: &'a std::collections::BTreeSet<usize>) -> Self {
        self.blacklist = Some(blacklist);
        self
    }

    /// Runs the pass over `[start, stop]`.
    ///
    /// # Errors
    ///
    /// Recursion, oversized callees, unresolvable dispatch targets and jump
    /// offset overflows.
    pub fn run(
        mut self,
        mut code: CodeBuffer,
        start: i32,
        mut stop: i32,
        mut namespace_stride: u16,
    ) -> Result<InlinedWindow> {
        if !self.config.inline {
            return Ok(InlinedWindow {
                code,
                stop,
                namespace_stride,
            });
        }
        self.frame_base.insert(0, self.method_code_ref);

        let tables = code.scan_jumps(start, stop)?;
        let mut forward = tables.forward;
        let mut backward = tables.backward;

        let mut addr = start;
        while addr <= stop {
            let byte = code.byte(addr);
            let is_call = matches!(byte, 0xd6 | 0xd9 | 0xda)
                || (byte == 0xd7 && {
                    let fid = code.read_u16(addr + 1);
                    // Intrinsics the fabric cannot execute lose their table
                    // entry and inline like any other call.
                    let native = self
                        .intrinsics
                        .get(fid)
                        .and_then(crate::synth::Intrinsic::operator)
                        .is_some_and(|op| self.capabilities.supports(op));
                    if !native {
                        self.intrinsics.remove(fid);
                    }
                    !native
                });

            if is_call {
                let (method_index, frame_shift) = self.resolve_target(&mut code, addr)?;
                let callee = self
                    .methods
                    .get(method_index as usize)
                    .ok_or_else(|| {
                        Error::NotSynthesizable(format!(
                            "call to unknown method {method_index} at {addr}"
                        ))
                    })?
                    .clone();

                if self
                    .blacklist
                    .is_some_and(|b| b.contains(&callee.code_ref))
                {
                    return Err(Error::Blacklisted { addr });
                }
                if callee.code_len > self.config.max_inline_length {
                    return Err(Error::CalleeTooLarge {
                        len: callee.code_len,
                        max: self.config.max_inline_length,
                    });
                }

                let spliced = self.splice_callee(&code, addr, &callee, namespace_stride)?;
                code = spliced;
                let grown = callee.code_len as i32;
                stop += grown;

                // Every recorded frame is pushed right by the insertion.
                for base in self.frame_base.values_mut() {
                    *base -= grown;
                }
                self.frame_base
                    .insert(namespace_stride, callee.code_ref as i32 - (addr + frame_shift));
                namespace_stride += callee.max_locals;

                // Shift jump tables across the spliced range.
                let call_len = if byte == 0xda { 5 } else { 3 };
                let at = addr + call_len;
                let mut new_forward = BTreeMap::new();
                for (j, o) in forward {
                    if j < addr && j + o > addr {
                        let o = o + grown;
                        if o > MAX_FORWARD_OFFSET {
                            return Err(Error::JumpOffsetOverflow { offset: o });
                        }
                        code.write_i16(j + 1, o as i16);
                        new_forward.insert(j, o);
                    } else if j > addr {
                        new_forward.insert(j + grown, o);
                    } else {
                        new_forward.insert(j, o);
                    }
                }
                forward = new_forward;
                let mut new_backward = BTreeMap::new();
                for (j, o) in backward {
                    if j > addr && j + o < addr {
                        let o = o - grown;
                        code.write_i16(j + grown + 1, o as i16);
                        new_backward.insert(j + grown, o);
                    } else if j > addr {
                        new_backward.insert(j + grown, o);
                    } else {
                        new_backward.insert(j, o);
                    }
                }
                backward = new_backward;

                // Record the callee's own jumps and detect recursion: the
                // identical call bytes reappearing inside the spliced body.
                let mut j = at;
                while j < at + grown {
                    let jb = code.byte(j);
                    if (0x99..=0xa7).contains(&jb) {
                        let offset = i32::from(code.read_i16(j + 1));
                        if offset < 0 {
                            backward.insert(j, offset);
                        } else {
                            forward.insert(j, offset);
                        }
                    }
                    if jb == byte
                        && code.byte(j + 1) == code.byte(addr + 1)
                        && code.byte(j + 2) == code.byte(addr + 2)
                    {
                        return Err(Error::RecursiveInline { addr });
                    }
                    j += code.opcode_at(j)?.len() as i32;
                }
                debug!(
                    addr,
                    method = %callee.name,
                    len = callee.code_len,
                    "inlined call"
                );
            }

            addr += code.opcode_at(addr)?.len() as i32;
        }

        Ok(InlinedWindow {
            code,
            stop,
            namespace_stride,
        })
    }

    /// Resolves the call target; dynamically dispatched sites use the most
    /// recent observed target and get the assumed receiver tag patched into
    /// their operand bytes.
    fn resolve_target(&self, code: &mut CodeBuffer, addr: i32) -> Result<(u16, i32)> {
        let byte = code.byte(addr);
        if byte == 0xd6 || byte == 0xda {
            let offset = code.slot_offset(addr).unwrap_or(0);
            let base = self.frame_base.get(&offset).copied().unwrap_or(0);
            let absolute = addr + base;

            let observed = self
                .history
                .iter()
                .rev()
                .find(|inv| inv.address == absolute as usize)
                .ok_or_else(|| {
                    Error::NotSynthesizable(format!(
                        "no observed target for dynamic dispatch at {addr}"
                    ))
                })?;

            // Keep the packed argument count, replace the low bits with the
            // assumed type tag for the runtime guard.
            let hi = code.byte(addr + 1);
            code.write_byte(addr + 1, (hi & 0xfc) | ((observed.type_tag >> 8) as u8 & 0x03));
            code.write_byte(addr + 2, (observed.type_tag & 0xff) as u8);
            let shift = if byte == 0xda { 5 } else { 3 };
            Ok((observed.method_index, shift))
        } else {
            Ok((code.read_u16(addr + 1), 3))
        }
    }

    /// Splices the callee code after the call, reverting any synthesized
    /// patches inside it and assigning the fresh namespace offset.
    fn splice_callee(
        &self,
        code: &CodeBuffer,
        call_addr: i32,
        callee: &MethodInfo,
        namespace: u16,
    ) -> Result<CodeBuffer> {
        let mut body = self.section[callee.code_ref..callee.code_ref + callee.code_len].to_vec();

        let mut i = 0usize;
        while i < body.len() {
            if body[i] == 0xfe {
                let kernel_id = body[i + 1];
                let Some(replaced) = self.kernels.replaced(kernel_id) else {
                    return Err(Error::NotSynthesizable(format!(
                        "inlined kernel {kernel_id} has no replacement record"
                    )));
                };
                body[i..i + replaced.len()].copy_from_slice(&replaced);
            }
            if body[i] == 0xfb || body[i] == 0xdd {
                return Err(Error::UnsupportedInstruction {
                    opcode: body[i],
                    addr: call_addr,
                });
            }
            let op = crate::bytecode::Opcode::decode(body[i]).ok_or({
                Error::UnsupportedInstruction {
                    opcode: body[i],
                    addr: call_addr,
                }
            })?;
            i += op.len();
        }

        let call_len = code.opcode_at(call_addr)?.len() as i32;
        Ok(code.splice_after(call_addr + call_len - 1, &body, namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::BytecodeAssembler;

    /// A window calling method 1, whose body stores arg0 into its local 1.
    fn call_fixture() -> (Vec<u8>, Vec<u8>, i32, i32) {
        let mut callee = BytecodeAssembler::new();
        callee.iload(0).istore(1).vreturn();
        let callee_bytes = callee.finish();

        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.iload(2).invokestatic_quick(1);
        asm.iinc(1, 1);
        let back = asm.goto_back(head);
        asm.label("exit");
        (asm.finish(), callee_bytes, head, back)
    }

    #[test]
    fn test_inlining_splices_callee_with_fresh_namespace() {
        let (window, callee_bytes, start, stop) = call_fixture();
        let mut section = window.clone();
        let callee_ref = section.len();
        section.extend_from_slice(&callee_bytes);

        let methods = vec![
            MethodInfo {
                name: "root".into(),
                code_ref: 0,
                code_len: window.len(),
                arg_count: 0,
                max_locals: 4,
            },
            MethodInfo {
                name: "callee".into(),
                code_ref: callee_ref,
                code_len: callee_bytes.len(),
                arg_count: 1,
                max_locals: 2,
            },
        ];
        let config = SynthesisConfig::default();
        let mut intrinsics = Intrinsics::new();
        let kernels = KernelTable::new();
        let caps = FabricCapabilities::full();
        let inliner = MethodInliner::new(
            &methods,
            &section,
            &[],
            &kernels,
            &mut intrinsics,
            &caps,
            &config,
            0,
        );

        let code = CodeBuffer::from_bytes(window.clone());
        let inlined = inliner.run(code, start, stop, 4).unwrap();

        assert_eq!(inlined.stop, stop + callee_bytes.len() as i32);
        assert_eq!(inlined.namespace_stride, 6);
        // Callee bytes sit right after the 3-byte call at address 7.
        let call_at = 7;
        assert_eq!(
            &inlined.code.bytes()[call_at + 3..call_at + 3 + callee_bytes.len()],
            &callee_bytes[..]
        );
        // The spliced range carries the fresh namespace; caller code keeps 0.
        assert_eq!(inlined.code.slot_offset(call_at as i32), Some(0));
        assert_eq!(inlined.code.slot_offset(call_at as i32 + 3), Some(4));
        // The backward jump still targets the loop head.
        let new_back = inlined.stop;
        assert_eq!(inlined.code.jump_target(new_back), start);
    }

    #[test]
    fn test_recursive_call_is_rejected() {
        let mut callee = BytecodeAssembler::new();
        callee.invokestatic_quick(1).vreturn();
        let callee_bytes = callee.finish();

        let mut asm = BytecodeAssembler::new();
        let head = asm.here();
        asm.iload(1).bipush(10).if_icmpge_fwd("exit");
        asm.invokestatic_quick(1);
        let back = asm.goto_back(head);
        asm.label("exit");
        let window = asm.finish();

        let mut section = window.clone();
        let callee_ref = section.len();
        section.extend_from_slice(&callee_bytes);
        let methods = vec![
            MethodInfo {
                name: "root".into(),
                code_ref: 0,
                code_len: window.len(),
                arg_count: 0,
                max_locals: 4,
            },
            MethodInfo {
                name: "rec".into(),
                code_ref: callee_ref,
                code_len: callee_bytes.len(),
                arg_count: 0,
                max_locals: 1,
            },
        ];
        let config = SynthesisConfig::default();
        let mut intrinsics = Intrinsics::new();
        let kernels = KernelTable::new();
        let caps = FabricCapabilities::full();
        let inliner = MethodInliner::new(
            &methods,
            &section,
            &[],
            &kernels,
            &mut intrinsics,
            &caps,
            &config,
            0,
        );

        let err = inliner
            .run(CodeBuffer::from_bytes(window), head, back, 4)
            .unwrap_err();
        assert!(matches!(err, Error::RecursiveInline { .. }));
    }
}
