//! ATN state variants.
//!
//! States are closed at grammar-compile time: every state is created by the
//! deserializer (or a test fixture builder) and never mutated once the graph
//! is published.

use super::transition::Transition;
use smallvec::SmallVec;

/// Dense identifier of an ATN state within one [`super::Atn`].
pub type StateNumber = usize;

/// The role a state plays in the grammar graph.
///
/// Payload fields point at the partner states the role implies (a block
/// start knows its end, a star loop entry knows its loopback).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtnStateKind {
    Basic,
    /// Entry of a rule; `stop_state` is the rule's single exit.
    RuleStart {
        stop_state: StateNumber,
        is_left_recursive: bool,
    },
    /// Exit of a rule; prediction pops the context stack here.
    RuleStop,
    /// Start of an alternative block; decisions live here.
    BlockStart { end_state: StateNumber },
    /// Join point of an alternative block.
    BlockEnd { start_state: StateNumber },
    /// Block start of a `+` loop body.
    PlusBlockStart { loopback: StateNumber },
    /// Decision point re-entering a `+` loop.
    PlusLoopback,
    /// Block start inside a `*` loop.
    StarBlockStart,
    /// Decision point entering a `*` loop; left-recursive rules compile to
    /// precedence decisions here.
    StarLoopEntry {
        loopback: StateNumber,
        precedence_decision: bool,
    },
    /// Back-edge source of a `*` loop.
    StarLoopback,
    /// Join point at the bottom of a loop.
    LoopEnd { loopback: StateNumber },
    /// Entry of a lexer mode.
    TokenStart,
}

/// One node of the grammar graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtnState {
    pub number: StateNumber,
    pub rule_index: usize,
    pub kind: AtnStateKind,
    /// Decision index when this state heads a decision, dense per ATN.
    pub decision: Option<usize>,
    pub non_greedy: bool,
    pub transitions: SmallVec<[Transition; 2]>,
}

impl AtnState {
    #[must_use]
    pub fn new(number: StateNumber, rule_index: usize, kind: AtnStateKind) -> Self {
        Self {
            number,
            rule_index,
            kind,
            decision: None,
            non_greedy: false,
            transitions: SmallVec::new(),
        }
    }

    /// True when the state only leaves via epsilon-like transitions.
    #[must_use]
    pub fn only_has_epsilon_transitions(&self) -> bool {
        !self.transitions.is_empty() && self.transitions.iter().all(Transition::is_epsilon)
    }

    #[must_use]
    pub const fn is_rule_stop(&self) -> bool {
        matches!(self.kind, AtnStateKind::RuleStop)
    }

    #[must_use]
    pub const fn is_decision(&self) -> bool {
        self.decision.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atn::transition::TransitionKind;

    #[test]
    fn test_epsilon_only() {
        let mut s = AtnState::new(0, 0, AtnStateKind::Basic);
        assert!(!s.only_has_epsilon_transitions());
        s.transitions.push(Transition::epsilon(1));
        assert!(s.only_has_epsilon_transitions());
        s.transitions
            .push(Transition::new(2, TransitionKind::Atom { label: 5 }));
        assert!(!s.only_has_epsilon_transitions());
    }

    #[test]
    fn test_roles() {
        let stop = AtnState::new(3, 1, AtnStateKind::RuleStop);
        assert!(stop.is_rule_stop());
        let mut block = AtnState::new(4, 1, AtnStateKind::BlockStart { end_state: 9 });
        assert!(!block.is_decision());
        block.decision = Some(0);
        assert!(block.is_decision());
    }
}
