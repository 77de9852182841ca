//! # Augmented Transition Network
//!
//! The static grammar graph the simulators walk: numbered states with typed
//! transitions, rule start/stop tables, the decision map, and (for lexer
//! grammars) mode entry points and action definitions.
//!
//! ## Overview
//!
//! An [`Atn`] is produced by [`serial::deserialize`] from the serialized form
//! a grammar compiler emits, or assembled directly through [`Atn::add_state`]
//! by test fixtures. Once built it is immutable; every runtime structure
//! (configurations, DFAs) refers to states by [`StateNumber`].

pub mod serial;
pub mod state;
pub mod transition;

pub use state::{AtnState, AtnStateKind, StateNumber};
pub use transition::{Transition, TransitionKind};

use crate::bitset::BitSet;
use crate::interval::IntervalSet;
use crate::token::MIN_USER_TOKEN_TYPE;
use ahash::RandomState;
use hashbrown::HashSet;

/// Marker added to a FIRST set when the walk can leave the surrounding rule
/// without consuming a token.
pub const TOKEN_EPSILON: i32 = -2;

/// Whether an ATN was compiled from a lexer or a parser grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarKind {
    Lexer,
    Parser,
}

/// A grammar-static lexer command attached to an accepting lexer rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LexerAction {
    Skip,
    More,
    PopMode,
    Mode { mode: usize },
    PushMode { mode: usize },
    Channel { channel: usize },
    Type { token_type: i32 },
    /// Dispatch to user code through the lexer host.
    Custom { rule_index: usize, action_index: usize },
}

/// The immutable grammar graph.
#[derive(Debug, Clone)]
pub struct Atn {
    pub grammar_kind: GrammarKind,
    pub max_token_type: i32,
    states: Vec<AtnState>,
    /// Decision index to decision-heading state.
    pub decision_to_state: Vec<StateNumber>,
    pub rule_to_start_state: Vec<StateNumber>,
    pub rule_to_stop_state: Vec<StateNumber>,
    /// Lexer grammars: rule index to emitted token type.
    pub rule_to_token_type: Vec<i32>,
    /// Lexer grammars: mode index to its `TokenStart` state.
    pub mode_to_start_state: Vec<StateNumber>,
    pub lexer_actions: Vec<LexerAction>,
}

impl Atn {
    #[must_use]
    pub fn new(grammar_kind: GrammarKind, max_token_type: i32) -> Self {
        Self {
            grammar_kind,
            max_token_type,
            states: Vec::new(),
            decision_to_state: Vec::new(),
            rule_to_start_state: Vec::new(),
            rule_to_stop_state: Vec::new(),
            rule_to_token_type: Vec::new(),
            mode_to_start_state: Vec::new(),
            lexer_actions: Vec::new(),
        }
    }

    /// Append a state, assigning it the next state number.
    pub fn add_state(&mut self, rule_index: usize, kind: AtnStateKind) -> StateNumber {
        let number = self.states.len();
        self.states.push(AtnState::new(number, rule_index, kind));
        number
    }

    /// Register `state` as the head of the next decision and return the
    /// decision index.
    pub fn add_decision(&mut self, state: StateNumber) -> usize {
        let decision = self.decision_to_state.len();
        self.states[state].decision = Some(decision);
        self.decision_to_state.push(state);
        decision
    }

    /// Append a transition from `from`.
    pub fn add_transition(&mut self, from: StateNumber, transition: Transition) {
        self.states[from].transitions.push(transition);
    }

    #[must_use]
    pub fn state(&self, number: StateNumber) -> &AtnState {
        &self.states[number]
    }

    #[must_use]
    pub fn state_mut(&mut self, number: StateNumber) -> &mut AtnState {
        &mut self.states[number]
    }

    #[must_use]
    pub fn states(&self) -> &[AtnState] {
        &self.states
    }

    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// The state heading `decision`.
    #[must_use]
    pub fn decision_state(&self, decision: usize) -> StateNumber {
        self.decision_to_state[decision]
    }

    /// The full vocabulary as an interval set, EOF excluded.
    #[must_use]
    pub fn vocabulary(&self) -> IntervalSet {
        IntervalSet::of_range(MIN_USER_TOKEN_TYPE, self.max_token_type)
    }

    /// FIRST set of `state`: every token type that can be consumed next from
    /// it, following rule calls and returns. Contains [`TOKEN_EPSILON`] when
    /// the walk can fall off the end of the rule, and EOF when an explicit
    /// EOF edge is reachable. Used by error reporting.
    #[must_use]
    pub fn next_tokens(&self, state: StateNumber) -> IntervalSet {
        let mut look = IntervalSet::new();
        let mut busy: HashSet<(StateNumber, Vec<StateNumber>), RandomState> = HashSet::default();
        let mut called_rules = BitSet::new();
        self.look(state, &mut Vec::new(), &mut busy, &mut called_rules, &mut look);
        look
    }

    fn look(
        &self,
        s: StateNumber,
        stack: &mut Vec<StateNumber>,
        busy: &mut HashSet<(StateNumber, Vec<StateNumber>), RandomState>,
        called_rules: &mut BitSet,
        look: &mut IntervalSet,
    ) {
        if !busy.insert((s, stack.clone())) {
            return;
        }
        let state = &self.states[s];
        if state.is_rule_stop() {
            if let Some(follow) = stack.pop() {
                self.look(follow, stack, busy, called_rules, look);
                stack.push(follow);
            } else {
                look.add(TOKEN_EPSILON);
            }
            return;
        }
        for t in &state.transitions {
            match &t.kind {
                TransitionKind::Rule {
                    rule_index,
                    follow_state,
                    ..
                } => {
                    if called_rules.get(*rule_index) {
                        continue;
                    }
                    called_rules.set(*rule_index);
                    stack.push(*follow_state);
                    self.look(t.target, stack, busy, called_rules, look);
                    stack.pop();
                    called_rules.clear(*rule_index);
                }
                TransitionKind::Epsilon { .. }
                | TransitionKind::Predicate { .. }
                | TransitionKind::Precedence { .. }
                | TransitionKind::Action { .. } => {
                    self.look(t.target, stack, busy, called_rules, look);
                }
                TransitionKind::NotSet { set } => {
                    look.add_set(&set.complement(&self.vocabulary()));
                }
                TransitionKind::Wildcard => {
                    look.add_set(&self.vocabulary());
                }
                TransitionKind::Atom { .. } | TransitionKind::Range { .. } => {
                    if let Some(label) = t.label() {
                        look.add_set(&label);
                    }
                }
                TransitionKind::Set { set } => {
                    look.add_set(set);
                }
            }
        }
    }

    /// Install the derived return edges: for every rule invocation, an
    /// epsilon edge from the invoked rule's stop state back to the call
    /// site's follow state. These edges are what context-free closure chases
    /// when a configuration reaches a rule stop with no stack left.
    ///
    /// The edge out of a left-recursive rule's unguarded (precedence 0)
    /// invocation is tagged with the rule index, which is what suppresses
    /// the precedence filter for configurations that escaped through it.
    ///
    /// Called once, after every state and transition is in place; the
    /// deserializer and fixture builders both end with it.
    pub fn link_rule_stops(&mut self) {
        let mut links: Vec<(StateNumber, Transition)> = Vec::new();
        for state in &self.states {
            for t in &state.transitions {
                let TransitionKind::Rule {
                    rule_index,
                    precedence,
                    follow_state,
                } = &t.kind
                else {
                    continue;
                };
                let left_recursive = matches!(
                    self.states[self.rule_to_start_state[*rule_index]].kind,
                    AtnStateKind::RuleStart {
                        is_left_recursive: true,
                        ..
                    }
                );
                let outermost_precedence_return =
                    (left_recursive && *precedence == 0).then_some(*rule_index);
                links.push((
                    self.rule_to_stop_state[*rule_index],
                    Transition::new(
                        *follow_state,
                        TransitionKind::Epsilon {
                            outermost_precedence_return,
                        },
                    ),
                ));
            }
        }
        for (stop, transition) in links {
            self.states[stop].transitions.push(transition);
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TOKEN_EOF;

    fn linear_atn() -> Atn {
        // r: A B ;
        let mut atn = Atn::new(GrammarKind::Parser, 2);
        let start = atn.add_state(0, AtnStateKind::RuleStart {
            stop_state: 3,
            is_left_recursive: false,
        });
        let mid = atn.add_state(0, AtnStateKind::Basic);
        let end = atn.add_state(0, AtnStateKind::Basic);
        let stop = atn.add_state(0, AtnStateKind::RuleStop);
        atn.rule_to_start_state.push(start);
        atn.rule_to_stop_state.push(stop);
        atn.add_transition(start, Transition::new(mid, TransitionKind::Atom { label: 1 }));
        atn.add_transition(mid, Transition::new(end, TransitionKind::Atom { label: 2 }));
        atn.add_transition(end, Transition::epsilon(stop));
        atn
    }

    #[test]
    fn test_next_tokens_linear() {
        let atn = linear_atn();
        assert_eq!(atn.next_tokens(0), IntervalSet::of(1));
        assert_eq!(atn.next_tokens(1), IntervalSet::of(2));
        // At the last state the rule can only end.
        assert_eq!(atn.next_tokens(2), IntervalSet::of(TOKEN_EPSILON));
    }

    #[test]
    fn test_next_tokens_through_rule_call() {
        // r: s B ;  s: A ;
        let mut atn = Atn::new(GrammarKind::Parser, 2);
        let r_start = atn.add_state(0, AtnStateKind::RuleStart {
            stop_state: 2,
            is_left_recursive: false,
        });
        let r_mid = atn.add_state(0, AtnStateKind::Basic);
        let r_stop = atn.add_state(0, AtnStateKind::RuleStop);
        let s_start = atn.add_state(1, AtnStateKind::RuleStart {
            stop_state: 5,
            is_left_recursive: false,
        });
        let s_body = atn.add_state(1, AtnStateKind::Basic);
        let s_stop = atn.add_state(1, AtnStateKind::RuleStop);
        atn.rule_to_start_state.extend([r_start, s_start]);
        atn.rule_to_stop_state.extend([r_stop, s_stop]);
        atn.add_transition(
            r_start,
            Transition::new(
                s_start,
                TransitionKind::Rule {
                    rule_index: 1,
                    precedence: 0,
                    follow_state: r_mid,
                },
            ),
        );
        atn.add_transition(r_mid, Transition::new(r_stop, TransitionKind::Atom { label: 2 }));
        atn.add_transition(s_start, Transition::new(s_body, TransitionKind::Atom { label: 1 }));
        atn.add_transition(s_body, Transition::epsilon(s_stop));

        // FIRST(r) goes through the call to s.
        assert_eq!(atn.next_tokens(r_start), IntervalSet::of(1));
        // From inside s with no caller on the simulated stack, both the
        // return path (epsilon) is visible; FIRST(s_body end) is B via follow
        // only when called from r.
        let from_s = atn.next_tokens(s_start);
        assert!(from_s.contains(1));
    }

    #[test]
    fn test_decision_registration() {
        let mut atn = Atn::new(GrammarKind::Parser, 1);
        let s = atn.add_state(0, AtnStateKind::BlockStart { end_state: 0 });
        let d = atn.add_decision(s);
        assert_eq!(d, 0);
        assert_eq!(atn.decision_state(0), s);
        assert!(atn.state(s).is_decision());
    }

    #[test]
    fn test_vocabulary() {
        let atn = Atn::new(GrammarKind::Parser, 3);
        let v = atn.vocabulary();
        assert!(v.contains(1) && v.contains(3));
        assert!(!v.contains(TOKEN_EOF) && !v.contains(4));
    }
}
