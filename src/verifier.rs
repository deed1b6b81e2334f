//! Return-value verification against registered expectations.
//!
//! An expectation subscribes to a call site and carries a sequence of
//! expected return values. Verification fans out: every expectation whose
//! site matches is checked on every observed return, newest registration
//! first. There is no first-match-wins shortcut; independent subscribers
//! to the same site all see every return.

use thiserror::Error;

use crate::value::Value;

/// Expected return values for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnExpectation {
    call_site_id: u64,
    raise_on_mismatch: bool,
    iterative: bool,
    expected: Vec<Value>,
    cursor: usize,
}

impl ReturnExpectation {
    /// Expectation in non-iterative mode: every observed return is
    /// compared against the first expected value.
    pub fn new(call_site_id: u64, expected: impl IntoIterator<Item = Value>) -> Self {
        Self {
            call_site_id,
            raise_on_mismatch: false,
            iterative: false,
            expected: expected.into_iter().collect(),
            cursor: 0,
        }
    }

    /// Escalate mismatches from warnings to session termination.
    pub fn raise_on_mismatch(mut self) -> Self {
        self.raise_on_mismatch = true;
        self
    }

    /// Walk the expected sequence: each verified return consumes one
    /// element. Once the sequence is exhausted, further returns report
    /// range exhaustion instead of comparing.
    pub fn iterative(mut self) -> Self {
        self.iterative = true;
        self
    }

    pub fn call_site_id(&self) -> u64 {
        self.call_site_id
    }

    /// Position of the next element an iterative expectation will check.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// Counters over all verification activity in a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VerifierStats {
    /// Expectation checks performed (one per matching expectation per
    /// observed return).
    pub checks: u64,
    pub matches: u64,
    pub mismatches: u64,
    /// Checks skipped because the expected sequence was exhausted.
    pub range_exceeded: u64,
}

/// One non-escalated mismatch, reported as a warning by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchDetail {
    pub call_site_id: u64,
    pub expected: String,
    pub observed: String,
}

/// Result of verifying one observed return against all subscribers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifySummary {
    /// Matching expectations checked.
    pub checked: usize,
    pub mismatches: Vec<MismatchDetail>,
    /// Matching expectations whose sequence was already exhausted.
    pub range_exceeded: usize,
}

/// An escalated mismatch. Terminates the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "return expectation violated at site {call_site_id}: expected {expected}, observed {observed}"
)]
pub struct ExpectationViolation {
    pub call_site_id: u64,
    pub expected: String,
    pub observed: String,
}

/// All registered expectations plus running counters.
#[derive(Debug, Default)]
pub struct ReturnVerifier {
    expectations: Vec<ReturnExpectation>,
    stats: VerifierStats,
}

impl ReturnVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, expectation: ReturnExpectation) {
        self.expectations.push(expectation);
    }

    pub fn len(&self) -> usize {
        self.expectations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expectations.is_empty()
    }

    pub fn clear(&mut self) {
        self.expectations.clear();
    }

    pub fn stats(&self) -> VerifierStats {
        self.stats
    }

    /// Check an observed return value against every expectation for its
    /// call site, newest registration first.
    ///
    /// Non-escalated mismatches and exhausted sequences are collected in
    /// the summary; an escalated mismatch returns immediately and later
    /// subscribers in the walk are not consulted.
    pub fn verify(
        &mut self,
        call_site_id: u64,
        observed: &Value,
    ) -> Result<VerifySummary, ExpectationViolation> {
        let mut summary = VerifySummary::default();
        for expectation in self.expectations.iter_mut().rev() {
            if expectation.call_site_id != call_site_id {
                continue;
            }
            self.stats.checks += 1;
            summary.checked += 1;

            if expectation.cursor >= expectation.expected.len() {
                // Covers empty sequences too: nothing left to compare.
                self.stats.range_exceeded += 1;
                summary.range_exceeded += 1;
                continue;
            }

            let expected = &expectation.expected[expectation.cursor];
            if expectation.iterative {
                expectation.cursor += 1;
            }

            if expected == observed {
                self.stats.matches += 1;
            } else {
                self.stats.mismatches += 1;
                if expectation.raise_on_mismatch {
                    return Err(ExpectationViolation {
                        call_site_id,
                        expected: expected.repr(),
                        observed: observed.repr(),
                    });
                }
                summary.mismatches.push(MismatchDetail {
                    call_site_id,
                    expected: expected.repr(),
                    observed: observed.repr(),
                });
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_iterative_pins_first_element() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(ReturnExpectation::new(42, [Value::Int(5)]));

        for observed in [Value::Int(5), Value::Int(5), Value::Int(6)] {
            let summary = verifier.verify(42, &observed).unwrap();
            assert_eq!(summary.checked, 1);
        }

        let stats = verifier.stats();
        assert_eq!(stats.checks, 3);
        assert_eq!(stats.matches, 2);
        assert_eq!(stats.mismatches, 1);
        assert_eq!(stats.range_exceeded, 0);
    }

    #[test]
    fn test_iterative_walks_then_exhausts() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(
            ReturnExpectation::new(7, [Value::Int(1), Value::Int(2), Value::Int(3)]).iterative(),
        );

        for expected in 1..=3 {
            let summary = verifier.verify(7, &Value::Int(expected)).unwrap();
            assert!(summary.mismatches.is_empty());
            assert_eq!(summary.range_exceeded, 0);
        }

        // Fourth return: sequence exhausted, no comparison at all.
        let summary = verifier.verify(7, &Value::Int(999)).unwrap();
        assert_eq!(summary.range_exceeded, 1);
        assert!(summary.mismatches.is_empty());

        let stats = verifier.stats();
        assert_eq!(stats.matches, 3);
        assert_eq!(stats.mismatches, 0);
        assert_eq!(stats.range_exceeded, 1);
    }

    #[test]
    fn test_iterative_cursor_advances_on_mismatch_too() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(ReturnExpectation::new(1, [Value::Int(1), Value::Int(2)]).iterative());

        verifier.verify(1, &Value::Int(9)).unwrap();
        let summary = verifier.verify(1, &Value::Int(2)).unwrap();
        assert!(summary.mismatches.is_empty());
    }

    #[test]
    fn test_empty_sequence_reports_exhaustion_immediately() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(ReturnExpectation::new(3, []));

        let summary = verifier.verify(3, &Value::Int(1)).unwrap();
        assert_eq!(summary.range_exceeded, 1);
        assert!(summary.mismatches.is_empty());
        assert_eq!(verifier.stats().mismatches, 0);
    }

    #[test]
    fn test_raise_on_mismatch_escalates() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(ReturnExpectation::new(5, [Value::Int(10)]).raise_on_mismatch());

        assert!(verifier.verify(5, &Value::Int(10)).is_ok());
        let violation = verifier.verify(5, &Value::Int(11)).unwrap_err();
        assert_eq!(violation.call_site_id, 5);
        assert_eq!(violation.expected, "10");
        assert_eq!(violation.observed, "11");
    }

    #[test]
    fn test_fanout_checks_every_subscriber() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(ReturnExpectation::new(9, [Value::Int(1)]));
        verifier.register(ReturnExpectation::new(9, [Value::Int(2)]));
        verifier.register(ReturnExpectation::new(8, [Value::Int(1)]));

        let summary = verifier.verify(9, &Value::Int(1)).unwrap();
        // Both site-9 subscribers checked, site-8 untouched.
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.mismatches.len(), 1);
        assert_eq!(verifier.stats().matches, 1);
    }

    #[test]
    fn test_newest_subscriber_checked_first() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(ReturnExpectation::new(2, [Value::Int(1)]).raise_on_mismatch());
        verifier.register(ReturnExpectation::new(2, [Value::Int(2)]).raise_on_mismatch());

        // Both mismatch; the newest one (expecting 2) must raise first.
        let violation = verifier.verify(2, &Value::Int(0)).unwrap_err();
        assert_eq!(violation.expected, "2");
    }

    #[test]
    fn test_unrelated_site_is_ignored() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(ReturnExpectation::new(1, [Value::Int(1)]));

        let summary = verifier.verify(99, &Value::Int(1)).unwrap();
        assert_eq!(summary.checked, 0);
        assert_eq!(verifier.stats().checks, 0);
    }

    #[test]
    fn test_clear_removes_subscribers_but_keeps_stats() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(ReturnExpectation::new(1, [Value::Int(1)]));
        verifier.verify(1, &Value::Int(1)).unwrap();
        verifier.clear();
        assert!(verifier.is_empty());

        let summary = verifier.verify(1, &Value::Int(1)).unwrap();
        assert_eq!(summary.checked, 0);
        assert_eq!(verifier.stats().matches, 1);
    }

    #[test]
    fn test_value_comparison_not_identity() {
        let mut verifier = ReturnVerifier::new();
        verifier.register(ReturnExpectation::new(
            4,
            [Value::Sequence(vec![Value::Int(1), Value::Int(2)])],
        ));

        // A freshly built equal sequence matches.
        let observed = Value::Sequence(vec![Value::Int(1), Value::Int(2)]);
        verifier.verify(4, &observed).unwrap();
        assert_eq!(verifier.stats().matches, 1);
    }
}
