//! ATN transition variants.
//!
//! A transition records its target state and a tagged payload. Epsilon-like
//! kinds (rule call, predicate, precedence, action) are traversed during
//! closure; consuming kinds (atom, range, set, wildcard) advance the input
//! and are handled by reach-set computation.

use crate::interval::IntervalSet;
use crate::token::TOKEN_EOF;

use super::state::StateNumber;

/// Payload of a [`Transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionKind {
    Epsilon {
        /// Rule index when this edge is the outermost return of a
        /// left-recursive rule; drives precedence filter suppression.
        outermost_precedence_return: Option<usize>,
    },
    /// Match exactly one token type.
    Atom { label: i32 },
    /// Match any token type in `start..=stop`.
    Range { start: i32, stop: i32 },
    /// Match any token type in the set.
    Set { set: IntervalSet },
    /// Match any token type in the vocabulary except the set.
    NotSet { set: IntervalSet },
    /// Match any single token.
    Wildcard,
    /// Invoke a rule: the target is the rule's start state, `follow_state`
    /// is where the caller resumes.
    Rule {
        rule_index: usize,
        precedence: u32,
        follow_state: StateNumber,
    },
    /// Gate on a semantic predicate.
    Predicate {
        rule_index: usize,
        pred_index: usize,
        is_ctx_dependent: bool,
    },
    /// Gate on the current operator precedence (left-recursive rules).
    Precedence { precedence: u32 },
    /// Run an embedded action; transparent to prediction.
    Action {
        rule_index: usize,
        action_index: usize,
        is_ctx_dependent: bool,
    },
}

/// A directed, labeled edge of the ATN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub target: StateNumber,
    pub kind: TransitionKind,
}

impl Transition {
    #[must_use]
    pub const fn new(target: StateNumber, kind: TransitionKind) -> Self {
        Self { target, kind }
    }

    /// A plain epsilon edge.
    #[must_use]
    pub const fn epsilon(target: StateNumber) -> Self {
        Self::new(
            target,
            TransitionKind::Epsilon {
                outermost_precedence_return: None,
            },
        )
    }

    /// True for edges traversed without consuming input.
    #[must_use]
    pub const fn is_epsilon(&self) -> bool {
        matches!(
            self.kind,
            TransitionKind::Epsilon { .. }
                | TransitionKind::Rule { .. }
                | TransitionKind::Predicate { .. }
                | TransitionKind::Precedence { .. }
                | TransitionKind::Action { .. }
        )
    }

    /// True when the edge consumes `symbol`, given the vocabulary bounds
    /// `min_vocab..=max_vocab`. Epsilon-like edges never match.
    #[must_use]
    pub fn matches(&self, symbol: i32, min_vocab: i32, max_vocab: i32) -> bool {
        match &self.kind {
            TransitionKind::Atom { label } => *label == symbol,
            TransitionKind::Range { start, stop } => *start <= symbol && symbol <= *stop,
            TransitionKind::Set { set } => set.contains(symbol),
            TransitionKind::NotSet { set } => {
                symbol >= min_vocab && symbol <= max_vocab && !set.contains(symbol)
            }
            TransitionKind::Wildcard => symbol >= min_vocab && symbol <= max_vocab,
            _ => false,
        }
    }

    /// The token types this edge can consume, if it is a consuming edge.
    /// `NotSet` is returned as the raw excluded set; callers complement it
    /// against the vocabulary.
    #[must_use]
    pub fn label(&self) -> Option<IntervalSet> {
        match &self.kind {
            TransitionKind::Atom { label } => Some(IntervalSet::of(*label)),
            TransitionKind::Range { start, stop } => Some(IntervalSet::of_range(*start, *stop)),
            TransitionKind::Set { set } | TransitionKind::NotSet { set } => Some(set.clone()),
            _ => None,
        }
    }

    /// True when the edge could match EOF; only explicit atom/range labels
    /// can, the wildcard cannot.
    #[must_use]
    pub fn matches_eof(&self) -> bool {
        match &self.kind {
            TransitionKind::Atom { label } => *label == TOKEN_EOF,
            TransitionKind::Range { start, stop } => *start <= TOKEN_EOF && TOKEN_EOF <= *stop,
            TransitionKind::Set { set } => set.contains(TOKEN_EOF),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsilon_classification() {
        assert!(Transition::epsilon(1).is_epsilon());
        assert!(
            Transition::new(
                1,
                TransitionKind::Rule {
                    rule_index: 0,
                    precedence: 0,
                    follow_state: 2
                }
            )
            .is_epsilon()
        );
        assert!(!Transition::new(1, TransitionKind::Atom { label: 3 }).is_epsilon());
        assert!(!Transition::new(1, TransitionKind::Wildcard).is_epsilon());
    }

    #[test]
    fn test_matches() {
        let atom = Transition::new(1, TransitionKind::Atom { label: 5 });
        assert!(atom.matches(5, 1, 10));
        assert!(!atom.matches(6, 1, 10));

        let range = Transition::new(1, TransitionKind::Range { start: 3, stop: 6 });
        assert!(range.matches(3, 1, 10));
        assert!(range.matches(6, 1, 10));
        assert!(!range.matches(7, 1, 10));

        let set = Transition::new(
            1,
            TransitionKind::Set {
                set: [2, 4].into_iter().collect(),
            },
        );
        assert!(set.matches(4, 1, 10));
        assert!(!set.matches(3, 1, 10));

        let not_set = Transition::new(
            1,
            TransitionKind::NotSet {
                set: [2, 4].into_iter().collect(),
            },
        );
        assert!(not_set.matches(3, 1, 10));
        assert!(!not_set.matches(4, 1, 10));
        assert!(!not_set.matches(11, 1, 10));

        let wild = Transition::new(1, TransitionKind::Wildcard);
        assert!(wild.matches(10, 1, 10));
        assert!(!wild.matches(TOKEN_EOF, 1, 10));
    }

    #[test]
    fn test_matches_eof() {
        let eof_atom = Transition::new(1, TransitionKind::Atom { label: TOKEN_EOF });
        assert!(eof_atom.matches_eof());
        assert!(!Transition::new(1, TransitionKind::Wildcard).matches_eof());
    }
}
