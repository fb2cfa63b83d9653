//! Synthesis options.

/// How aliasing between heap accesses is speculated on and checked.
///
/// The front end only produces the conservative candidate set; the external
/// scheduler implements the chosen check. `Off` disables speculation
/// entirely: unprovably disjoint accesses stay ordered by scheduling edges
/// and no candidates are exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AliasPolicy {
    /// No speculation; conservative ordering edges only.
    Off,
    /// Compare the full effective addresses at run time.
    #[default]
    ExactCheck,
    /// Compare index provenance only.
    IndexCheck,
    /// Predicate the dependent operation on the disambiguation outcome.
    PredicationCheck,
    /// Speculate but re-execute pessimistically on any overlap.
    PessimisticCheck,
    /// Speculate without any runtime check.
    NoCheck,
}

impl AliasPolicy {
    /// True when alias candidates are recorded for the scheduler.
    #[must_use]
    pub fn speculates(self) -> bool {
        !matches!(self, AliasPolicy::Off)
    }
}

/// Option bundle of one synthesis invocation.
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Requested unroll factor for the innermost loop.
    pub unroll: u32,
    /// Upper bound on the unrolled body length in bytes; the effective
    /// factor is clamped to `max_unroll_length / body_len`, never below 1.
    pub max_unroll_length: usize,
    /// Common-subexpression folding during data-flow replay.
    pub cse: bool,
    /// Constant folding during data-flow replay.
    pub constant_folding: bool,
    /// Method inlining; when off, any call the fabric cannot execute
    /// natively fails synthesis.
    pub inline: bool,
    /// Upper bound on the length of a single inlined callee.
    pub max_inline_length: usize,
    /// Aliasing speculation mode.
    pub aliasing: AliasPolicy,
    /// Append heuristic prefetch/fill copies while unrolling.
    pub prefetch: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        SynthesisConfig {
            unroll: 1,
            max_unroll_length: 600,
            cse: true,
            constant_folding: true,
            inline: true,
            max_inline_length: 10_000,
            aliasing: AliasPolicy::ExactCheck,
            prefetch: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_policy_speculation() {
        assert!(!AliasPolicy::Off.speculates());
        assert!(AliasPolicy::NoCheck.speculates());
        assert!(SynthesisConfig::default().aliasing.speculates());
    }
}
