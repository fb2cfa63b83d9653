use thiserror::Error;

/// The closed "not synthesizable" taxonomy.
///
/// Every failure of the synthesis front end is reported through this enum and
/// surfaced synchronously to the invoking caller. The caller treats every
/// variant the same way: the candidate loop stays interpreted, the failure is
/// recorded against it, and no partial graph is ever emitted.
///
/// # Error Categories
///
/// ## Window shape
/// - [`Error::UnsupportedInstruction`] - opcode the front end cannot model
/// - [`Error::ReturnInWindow`] - return statement inside the synthesis window
/// - [`Error::BreakUnsupported`] - forward jump leaving the window
/// - [`Error::MalformedLoop`] - loop shape the preparation pass cannot repair
///
/// ## Graph construction
/// - [`Error::IrreducibleBranches`] - branch merging could not reduce a
///   confluence to a single predecessor
///
/// ## Pre-passes
/// - [`Error::RecursiveInline`] - the same call signature re-encountered
///   while inlining
/// - [`Error::InliningDisabled`] - a call must be inlined but inlining is off
/// - [`Error::CalleeTooLarge`] - callee length exceeds the configured maximum
/// - [`Error::JumpOffsetOverflow`] - a rewritten jump no longer fits the
///   signed 16-bit encoding
///
/// ## Resources & policy
/// - [`Error::Blacklisted`] - the method is excluded from synthesis at this
///   address
/// - [`Error::KernelTableFull`] - no free 8-bit kernel identifier
///
/// # Examples
///
/// ```rust,ignore
/// match synthesizer.generate() {
///     Ok(outcome) => deploy(outcome),
///     Err(e) => profiler.mark_not_synthesizable(start, e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An opcode the front end cannot model was found inside the window.
    ///
    /// Carries the raw byte value and the window-relative address so the
    /// profiler can attribute the failure to the offending instruction.
    #[error("unsupported instruction 0x{opcode:02x} at address {addr}")]
    UnsupportedInstruction {
        /// Raw opcode byte.
        opcode: u8,
        /// Window-relative address of the instruction.
        addr: i32,
    },

    /// A return statement terminates interpretation inside the window.
    ///
    /// Returns are only legal when they belong to an inlined callee and
    /// control continues in the calling method's code.
    #[error("sequence contains a return statement at address {addr}")]
    ReturnInWindow {
        /// Window-relative address of the return.
        addr: i32,
    },

    /// A forward jump leaves the synthesis window.
    ///
    /// Break statements out of the candidate loop are not supported; the
    /// window would need a second exit point.
    #[error("forward jump at address {addr} leaves the window (break not supported)")]
    BreakUnsupported {
        /// Window-relative address of the jump.
        addr: i32,
    },

    /// Branch merging failed to reduce a confluence to one predecessor.
    #[error("could not merge branches in window [{start}, {stop}]")]
    IrreducibleBranches {
        /// Window start address.
        start: i32,
        /// Window stop address.
        stop: i32,
    },

    /// The same call signature was re-encountered while inlining its body.
    #[error("recursive call at address {addr} cannot be inlined")]
    RecursiveInline {
        /// Window-relative address of the recursive call site.
        addr: i32,
    },

    /// A call the fabric cannot execute natively must be inlined, but
    /// inlining is disabled by configuration.
    #[error("method call at address {addr} requires inlining, which is disabled")]
    InliningDisabled {
        /// Window-relative address of the call site.
        addr: i32,
    },

    /// The callee is longer than the configured inlining maximum.
    #[error("callee of length {len} exceeds the inlining maximum of {max}")]
    CalleeTooLarge {
        /// Callee code length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A rewritten jump offset no longer fits the signed 16-bit encoding.
    ///
    /// Raised by the inliner when spliced code pushes a forward jump past
    /// +32767 and by the unroller when the replicated body pushes the
    /// canonical back jump past -32768.
    #[error("jump offset {offset} overflows the signed 16-bit encoding")]
    JumpOffsetOverflow {
        /// The offset that no longer fits.
        offset: i32,
    },

    /// The method is blacklisted from synthesis at this address.
    #[error("method is blacklisted from synthesis at address {addr}")]
    Blacklisted {
        /// Window-relative address of the blacklisted entry.
        addr: i32,
    },

    /// All 256 kernel-table slots are occupied.
    #[error("kernel table is full, no free kernel identifier")]
    KernelTableFull,

    /// The candidate loop has a shape the preparation pass cannot repair.
    ///
    /// Typically a while-style loop whose exit jump could not be located, so
    /// the missing canonical backward jump cannot be reconstructed.
    #[error("malformed loop: {0}")]
    MalformedLoop(String),

    /// Free-text catch-all for conditions outside the closed kinds above.
    #[error("{0}")]
    NotSynthesizable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_position() {
        let e = Error::UnsupportedInstruction {
            opcode: 0xbb,
            addr: 42,
        };
        assert!(e.to_string().contains("0xbb"));
        assert!(e.to_string().contains("42"));

        let e = Error::CalleeTooLarge {
            len: 20000,
            max: 10000,
        };
        assert!(e.to_string().contains("20000"));
    }
}
