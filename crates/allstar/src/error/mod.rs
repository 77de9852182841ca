//! # Error Types and Listeners
//!
//! Error kinds surfaced by the prediction engine, and the listener contract
//! through which it reports ambiguity and context sensitivity.
//!
//! ## Overview
//!
//! Prediction never fails on ambiguous input; ambiguity flows through
//! [`ErrorListener::report_ambiguity`] and the engine returns the minimum
//! viable alternative. A [`RecognitionError`] is produced only when no
//! alternative is viable, a uniquely predicted alternative fails its
//! predicate, or an internal invariant breaks (a frozen configuration set is
//! mutated, a loaded ATN is malformed).
//!
//! When the `diagnostics` feature is enabled, errors derive
//! [`miette::Diagnostic`] for rich reports.

use crate::bitset::BitSet;
use crate::config::set::AtnConfigSet;
use crate::interval::IntervalSet;
use crate::token::Token;
use thiserror::Error;

#[cfg(feature = "diagnostics")]
use miette::Diagnostic;

/// Errors produced by ATN loading, configuration-set maintenance, and
/// prediction.
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum RecognitionError {
    /// The input cannot continue from any configuration at a decision.
    #[error("no viable alternative at input {}", offending_display(offending_token))]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(allstar::no_viable_alt)))]
    NoViableAlt {
        decision: usize,
        start_index: usize,
        offending_token: Option<Token>,
        /// The configuration set that failed to advance.
        dead_end: Box<AtnConfigSet>,
    },

    /// A single token failed to match outside a decision.
    #[error("mismatched input {}, expecting {expecting}", offending_display(offending_token))]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(allstar::input_mismatch)))]
    InputMismatch {
        offending_token: Option<Token>,
        expecting: IntervalSet,
    },

    /// The uniquely predicted alternative's predicate evaluated false.
    #[error("rule {rule_index} failed predicate {pred_index}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(allstar::failed_predicate)))]
    FailedPredicate {
        rule_index: usize,
        pred_index: usize,
        predicted_alt: usize,
    },

    /// An index referenced data that does not exist (truncated serialized
    /// ATN, out-of-range state number).
    #[error("index {index} out of bounds for size {size}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(allstar::index_out_of_bounds)))]
    IndexOutOfBounds { index: usize, size: usize },

    /// The operation is not supported by this build or data version.
    #[error("unsupported operation: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(allstar::unsupported)))]
    UnsupportedOperation(String),

    /// An internal invariant was violated; the current decision cannot be
    /// recovered.
    #[error("illegal state: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(allstar::illegal_state)))]
    IllegalState(String),
}

fn offending_display(token: &Option<Token>) -> String {
    token
        .as_ref()
        .map_or_else(|| String::from("<unknown>"), |t| t.display_text().into())
}

impl RecognitionError {
    /// The token the failure points at, if any.
    #[must_use]
    pub fn offending_token(&self) -> Option<&Token> {
        match self {
            Self::NoViableAlt {
                offending_token, ..
            }
            | Self::InputMismatch {
                offending_token, ..
            } => offending_token.as_ref(),
            _ => None,
        }
    }
}

/// Receiver for syntax errors and prediction diagnostics.
///
/// All methods default to no-ops so listeners implement only what they
/// observe. `configs` is the configuration set the simulator held when the
/// condition was detected; `start_index..=stop_index` brackets the input
/// region the decision consumed.
pub trait ErrorListener {
    fn syntax_error(
        &mut self,
        offending_token: Option<&Token>,
        line: u32,
        column: u32,
        msg: &str,
        error: Option<&RecognitionError>,
    ) {
        let _ = (offending_token, line, column, msg, error);
    }

    /// An exact or approximate ambiguity was detected; `ambig_alts` holds the
    /// indistinguishable alternatives.
    fn report_ambiguity(
        &mut self,
        decision: usize,
        start_index: usize,
        stop_index: usize,
        exact: bool,
        ambig_alts: &BitSet,
        configs: &AtnConfigSet,
    ) {
        let _ = (decision, start_index, stop_index, exact, ambig_alts, configs);
    }

    /// SLL prediction hit a conflict and the simulator is restarting with
    /// full context.
    fn report_attempting_full_context(
        &mut self,
        decision: usize,
        start_index: usize,
        stop_index: usize,
        conflicting_alts: &BitSet,
        configs: &AtnConfigSet,
    ) {
        let _ = (
            decision,
            start_index,
            stop_index,
            conflicting_alts,
            configs,
        );
    }

    /// Full-context prediction resolved a decision SLL could not.
    fn report_context_sensitivity(
        &mut self,
        decision: usize,
        start_index: usize,
        stop_index: usize,
        prediction: usize,
        configs: &AtnConfigSet,
    ) {
        let _ = (decision, start_index, stop_index, prediction, configs);
    }
}

/// Listener that writes syntax errors to stderr and ignores prediction
/// diagnostics.
#[derive(Debug, Default)]
pub struct ConsoleErrorListener;

impl ErrorListener for ConsoleErrorListener {
    fn syntax_error(
        &mut self,
        _offending_token: Option<&Token>,
        line: u32,
        column: u32,
        msg: &str,
        _error: Option<&RecognitionError>,
    ) {
        eprintln!("line {line}:{column} {msg}");
    }
}

/// Listener that drops everything. Useful as a placeholder.
#[derive(Debug, Default)]
pub struct NullErrorListener;

impl ErrorListener for NullErrorListener {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_viable_alt_message() {
        let e = RecognitionError::NoViableAlt {
            decision: 0,
            start_index: 2,
            offending_token: Some(Token::of_type(7).with_text("world")),
            dead_end: Box::default(),
        };
        assert_eq!(e.to_string(), "no viable alternative at input world");
        assert!(e.offending_token().is_some());
    }

    #[test]
    fn test_input_mismatch_message() {
        let e = RecognitionError::InputMismatch {
            offending_token: None,
            expecting: IntervalSet::of_range(1, 3),
        };
        assert_eq!(
            e.to_string(),
            "mismatched input <unknown>, expecting {1..3}"
        );
    }

    #[test]
    fn test_illegal_state_message() {
        let e = RecognitionError::IllegalState("config set is read-only".into());
        assert!(e.to_string().contains("read-only"));
        assert!(e.offending_token().is_none());
    }
}
