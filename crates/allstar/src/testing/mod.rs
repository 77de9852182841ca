//! # Testing Utilities
//!
//! Hand-assembled ATN fixtures and a recording error listener, used by the
//! end-to-end prediction tests. The fixtures mirror the graph shapes a
//! grammar compiler emits for small grammars, so the simulators can be
//! exercised without a code generator in the loop.

use crate::atn::{Atn, AtnStateKind, GrammarKind, StateNumber, Transition, TransitionKind};
use crate::bitset::BitSet;
use crate::config::set::AtnConfigSet;
use crate::error::ErrorListener;

/// Listener that records every prediction diagnostic it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub ambiguities: Vec<(usize, bool, BitSet)>,
    pub full_context_attempts: Vec<(usize, BitSet)>,
    pub context_sensitivities: Vec<(usize, usize)>,
    pub syntax_errors: usize,
}

impl ErrorListener for RecordingListener {
    fn syntax_error(
        &mut self,
        _offending_token: Option<&crate::token::Token>,
        _line: u32,
        _column: u32,
        _msg: &str,
        _error: Option<&crate::error::RecognitionError>,
    ) {
        self.syntax_errors += 1;
    }

    fn report_ambiguity(
        &mut self,
        decision: usize,
        _start_index: usize,
        _stop_index: usize,
        exact: bool,
        ambig_alts: &BitSet,
        _configs: &AtnConfigSet,
    ) {
        self.ambiguities.push((decision, exact, ambig_alts.clone()));
    }

    fn report_attempting_full_context(
        &mut self,
        decision: usize,
        _start_index: usize,
        _stop_index: usize,
        conflicting_alts: &BitSet,
        _configs: &AtnConfigSet,
    ) {
        self.full_context_attempts
            .push((decision, conflicting_alts.clone()));
    }

    fn report_context_sensitivity(
        &mut self,
        decision: usize,
        _start_index: usize,
        _stop_index: usize,
        prediction: usize,
        _configs: &AtnConfigSet,
    ) {
        self.context_sensitivities.push((decision, prediction));
    }
}

/// Append one alternative `block -> t1 -> t2 -> ... -> block_end` matching
/// the given token types in sequence.
fn add_alt(atn: &mut Atn, rule: usize, block: StateNumber, end: StateNumber, tokens: &[i32]) {
    let mut prev = atn.add_state(rule, AtnStateKind::Basic);
    atn.add_transition(block, Transition::epsilon(prev));
    for &token in tokens {
        let next = atn.add_state(rule, AtnStateKind::Basic);
        atn.add_transition(prev, Transition::new(next, TransitionKind::Atom { label: token }));
        prev = next;
    }
    atn.add_transition(prev, Transition::epsilon(end));
}

/// One rule, one decision between alternatives that each match a token
/// sequence: `r: <alt1> | <alt2> | ... ;`
///
/// Token types are the caller's to choose; the decision index is 0.
#[must_use]
pub fn alternatives_grammar(alts: &[&[i32]], max_token_type: i32) -> Atn {
    let mut atn = Atn::new(GrammarKind::Parser, max_token_type);
    let start = atn.add_state(0, AtnStateKind::RuleStart {
        stop_state: 1,
        is_left_recursive: false,
    });
    let stop = atn.add_state(0, AtnStateKind::RuleStop);
    let block = atn.add_state(0, AtnStateKind::BlockStart { end_state: 3 });
    let end = atn.add_state(0, AtnStateKind::BlockEnd { start_state: block });
    debug_assert_eq!(end, 3);
    atn.rule_to_start_state.push(start);
    atn.rule_to_stop_state.push(stop);
    atn.add_decision(block);
    atn.add_transition(start, Transition::epsilon(block));
    atn.add_transition(end, Transition::epsilon(stop));
    for alt in alts {
        add_alt(&mut atn, 0, block, end, alt);
    }
    atn.link_rule_stops();
    atn
}

/// Token types of [`hello_grammar`].
pub mod hello_tokens {
    pub const HELLO: i32 = 1;
    pub const BYE: i32 = 2;
    pub const ID: i32 = 3;
}

/// `r: 'hello' ID | 'bye' ID ;` — a decision settled by one token.
#[must_use]
pub fn hello_grammar() -> Atn {
    use hello_tokens::{BYE, HELLO, ID};
    alternatives_grammar(&[&[HELLO, ID], &[BYE, ID]], ID)
}

/// Token types of [`ambiguous_ident_grammar`].
pub mod ambig_tokens {
    pub const ID: i32 = 1;
    pub const SEMI: i32 = 2;
}

/// `a: ID | ID | ID ';' ;` — alternatives 1 and 2 are indistinguishable;
/// SLL conflicts and full-context prediction reports the exact ambiguity.
#[must_use]
pub fn ambiguous_ident_grammar() -> Atn {
    use ambig_tokens::{ID, SEMI};
    alternatives_grammar(&[&[ID], &[ID], &[ID, SEMI]], SEMI)
}

/// Token types of [`left_recursive_expr_grammar`].
pub mod expr_tokens {
    pub const INT: i32 = 1;
    pub const PLUS: i32 = 2;
}

/// The precedence-climbing shape of `e : e '+' e | INT ;` after the
/// left-recursion transform, plus an entry rule `prog : e ;`:
///
/// ```text
/// e[_p] : INT ( {2 >= _p}? '+' e[3] )* ;
/// ```
///
/// Rule 0 is `e` (left-recursive), rule 1 is `prog`. Decision 0 is the
/// operator loop, a precedence decision.
#[must_use]
pub fn left_recursive_expr_grammar() -> Atn {
    use expr_tokens::{INT, PLUS};
    let mut atn = Atn::new(GrammarKind::Parser, PLUS);

    let e_start = atn.add_state(0, AtnStateKind::RuleStart {
        stop_state: 1,
        is_left_recursive: true,
    });
    let e_stop = atn.add_state(0, AtnStateKind::RuleStop);
    let primary = atn.add_state(0, AtnStateKind::Basic);
    let primary_done = atn.add_state(0, AtnStateKind::Basic);
    let loopback = atn.add_state(0, AtnStateKind::StarLoopback);
    let loop_entry = atn.add_state(
        0,
        AtnStateKind::StarLoopEntry {
            loopback,
            precedence_decision: true,
        },
    );
    let star_blk = atn.add_state(0, AtnStateKind::StarBlockStart);
    let guard_done = atn.add_state(0, AtnStateKind::Basic);
    let plus_done = atn.add_state(0, AtnStateKind::Basic);
    let call_done = atn.add_state(0, AtnStateKind::Basic);
    let blk_end = atn.add_state(0, AtnStateKind::BlockEnd { start_state: star_blk });
    let loop_end = atn.add_state(0, AtnStateKind::LoopEnd { loopback });

    let prog_start = atn.add_state(1, AtnStateKind::RuleStart {
        stop_state: 13,
        is_left_recursive: false,
    });
    let prog_stop = atn.add_state(1, AtnStateKind::RuleStop);
    let prog_mid = atn.add_state(1, AtnStateKind::Basic);

    atn.rule_to_start_state.extend([e_start, prog_start]);
    atn.rule_to_stop_state.extend([e_stop, prog_stop]);
    atn.add_decision(loop_entry);

    atn.add_transition(e_start, Transition::epsilon(primary));
    atn.add_transition(
        primary,
        Transition::new(primary_done, TransitionKind::Atom { label: INT }),
    );
    atn.add_transition(primary_done, Transition::epsilon(loop_entry));
    atn.add_transition(loop_entry, Transition::epsilon(star_blk));
    atn.add_transition(loop_entry, Transition::epsilon(loop_end));
    atn.add_transition(
        star_blk,
        Transition::new(guard_done, TransitionKind::Precedence { precedence: 2 }),
    );
    atn.add_transition(
        guard_done,
        Transition::new(plus_done, TransitionKind::Atom { label: PLUS }),
    );
    atn.add_transition(
        plus_done,
        Transition::new(
            e_start,
            TransitionKind::Rule {
                rule_index: 0,
                precedence: 3,
                follow_state: call_done,
            },
        ),
    );
    atn.add_transition(call_done, Transition::epsilon(blk_end));
    atn.add_transition(blk_end, Transition::epsilon(loopback));
    atn.add_transition(loopback, Transition::epsilon(loop_entry));
    atn.add_transition(loop_end, Transition::epsilon(e_stop));

    atn.add_transition(
        prog_start,
        Transition::new(
            e_start,
            TransitionKind::Rule {
                rule_index: 0,
                precedence: 0,
                follow_state: prog_mid,
            },
        ),
    );
    atn.add_transition(prog_mid, Transition::epsilon(prog_stop));

    atn.link_rule_stops();
    atn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::INVALID_ALT;
    use crate::error::RecognitionError;
    use crate::prediction::PredictionMode;
    use crate::semantic::AllTrueEvaluator;
    use crate::simulator::ParserAtnSimulator;
    use crate::token::{ListTokenStream, TokenStream};
    use std::sync::Arc;

    fn predict(
        sim: &ParserAtnSimulator,
        input: &mut ListTokenStream,
        listener: &mut RecordingListener,
    ) -> Result<usize, RecognitionError> {
        sim.adaptive_predict(input, 0, None, &mut AllTrueEvaluator, listener)
    }

    #[test]
    fn test_hello_predicts_first_alternative() {
        use hello_tokens::{HELLO, ID};
        let sim = ParserAtnSimulator::new(Arc::new(hello_grammar()));
        let mut listener = RecordingListener::default();
        let mut input = ListTokenStream::from_types(&[HELLO, ID]);

        let alt = predict(&sim, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 1);
        // Input restored and marks balanced.
        assert_eq!(input.index(), 0);
        assert_eq!(input.outstanding_marks(), 0);

        // The DFA memoized exactly one live edge out of the start state.
        let dfa = sim.dfa(0);
        let s0 = dfa.s0().unwrap();
        assert_eq!(dfa.edge_count(s0), 1);
        let accept = dfa.edge(s0, HELLO).unwrap();
        assert!(dfa.accept_info(accept).is_accept);
        assert_eq!(dfa.accept_info(accept).prediction, 1);
    }

    #[test]
    fn test_hello_second_call_uses_dfa_only() {
        use hello_tokens::{BYE, HELLO, ID};
        let sim = ParserAtnSimulator::new(Arc::new(hello_grammar()));
        let mut listener = RecordingListener::default();

        let mut input = ListTokenStream::from_types(&[HELLO, ID]);
        predict(&sim, &mut input, &mut listener).unwrap();
        let states = sim.dfa(0).state_count();

        // Same input shape: pure DFA walk, no new states.
        let mut input = ListTokenStream::from_types(&[HELLO, ID]);
        let alt = predict(&sim, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 1);
        assert_eq!(sim.dfa(0).state_count(), states);

        // The other alternative still simulates and adds its own path.
        let mut input = ListTokenStream::from_types(&[BYE, ID]);
        let alt = predict(&sim, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 2);
        assert!(sim.dfa(0).state_count() > states);
    }

    #[test]
    fn test_hello_no_viable_alternative() {
        use hello_tokens::ID;
        let sim = ParserAtnSimulator::new(Arc::new(hello_grammar()));
        let mut listener = RecordingListener::default();
        let mut input = ListTokenStream::from_types(&[ID]);

        let err = predict(&sim, &mut input, &mut listener).unwrap_err();
        match err {
            RecognitionError::NoViableAlt {
                decision,
                start_index,
                offending_token,
                dead_end,
            } => {
                assert_eq!(decision, 0);
                assert_eq!(start_index, 0);
                assert_eq!(offending_token.unwrap().token_type, ID);
                assert!(!dead_end.is_empty());
            }
            other => panic!("expected NoViableAlt, got {other:?}"),
        }
        assert_eq!(input.index(), 0);
    }

    #[test]
    fn test_ambiguity_escalates_and_resolves_to_min_alt() {
        use ambig_tokens::ID;
        let sim = ParserAtnSimulator::new(Arc::new(ambiguous_ident_grammar()));
        let mut listener = RecordingListener::default();
        let mut input = ListTokenStream::from_types(&[ID]);

        let alt = predict(&sim, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 1);
        // Input left positioned before the identifier.
        assert_eq!(input.index(), 0);

        // SLL conflicted on {1, 2} and escalated once.
        assert_eq!(listener.full_context_attempts.len(), 1);
        let (decision, conflicting) = &listener.full_context_attempts[0];
        assert_eq!(*decision, 0);
        assert_eq!(*conflicting, [1, 2].into_iter().collect());

        // LL confirmed the ambiguity and reported it once.
        assert_eq!(listener.ambiguities.len(), 1);
        let (_, _, ambig_alts) = &listener.ambiguities[0];
        assert_eq!(*ambig_alts, [1, 2].into_iter().collect());
        assert!(listener.context_sensitivities.is_empty());
    }

    #[test]
    fn test_exact_ambiguity_detection() {
        use ambig_tokens::ID;
        let mut sim = ParserAtnSimulator::new(Arc::new(ambiguous_ident_grammar()));
        sim.prediction_mode = PredictionMode::LlExactAmbigDetection;
        let mut listener = RecordingListener::default();
        let mut input = ListTokenStream::from_types(&[ID]);

        let alt = predict(&sim, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 1);
        assert_eq!(listener.ambiguities.len(), 1);
        let (decision, exact, ambig_alts) = &listener.ambiguities[0];
        assert_eq!(*decision, 0);
        assert!(*exact);
        assert_eq!(*ambig_alts, [1, 2].into_iter().collect());
    }

    #[test]
    fn test_pure_sll_resolves_conflict_silently() {
        use ambig_tokens::ID;
        let mut sim = ParserAtnSimulator::new(Arc::new(ambiguous_ident_grammar()));
        sim.prediction_mode = PredictionMode::Sll;
        let mut listener = RecordingListener::default();
        let mut input = ListTokenStream::from_types(&[ID]);

        let alt = predict(&sim, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 1);
        assert!(listener.full_context_attempts.is_empty());
        assert!(listener.ambiguities.is_empty());
    }

    #[test]
    fn test_unambiguous_alternative_of_ambiguous_grammar() {
        use ambig_tokens::{ID, SEMI};
        let sim = ParserAtnSimulator::new(Arc::new(ambiguous_ident_grammar()));
        let mut listener = RecordingListener::default();
        let mut input = ListTokenStream::from_types(&[ID, SEMI]);

        // The second lookahead token settles the decision without conflict.
        let alt = predict(&sim, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 3);
        assert_eq!(input.index(), 0);
    }

    #[test]
    fn test_left_recursive_loop_continues_on_operator() {
        use expr_tokens::{INT, PLUS};
        let sim = ParserAtnSimulator::new(Arc::new(left_recursive_expr_grammar()));
        let mut listener = RecordingListener::default();

        // Positioned after the first INT of `1 + 2`, the loop decision sees
        // '+' and takes the operator alternative.
        let mut input = ListTokenStream::from_types(&[PLUS, INT]);
        let alt = predict(&sim, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 1);

        let dfa = sim.dfa(0);
        assert!(dfa.is_precedence_dfa());
        assert!(dfa.precedence_start_state(0).is_some());
    }

    #[test]
    fn test_left_recursive_loop_exits_at_eof() {
        let sim = ParserAtnSimulator::new(Arc::new(left_recursive_expr_grammar()));
        let mut listener = RecordingListener::default();

        let mut input = ListTokenStream::from_types(&[]);
        let alt = predict(&sim, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 2);
    }

    #[test]
    fn test_precedence_gate_blocks_loop() {
        use expr_tokens::{INT, PLUS};

        struct AtPrecedence(u32);

        impl crate::semantic::PredicateEvaluator for AtPrecedence {
            fn sempred(&mut self, _rule_index: usize, _pred_index: usize) -> bool {
                true
            }

            fn precpred(&self, precedence: u32) -> bool {
                precedence >= self.0
            }

            fn current_precedence(&self) -> u32 {
                self.0
            }
        }

        let sim = ParserAtnSimulator::new(Arc::new(left_recursive_expr_grammar()));
        let mut listener = RecordingListener::default();

        // At precedence 3 the `{2 >= _p}?` guard fails: even with '+' in
        // the lookahead the loop must exit.
        let mut evaluator = AtPrecedence(3);
        let mut input = ListTokenStream::from_types(&[PLUS, INT]);
        let alt = sim
            .adaptive_predict(&mut input, 0, None, &mut evaluator, &mut listener)
            .unwrap();
        assert_eq!(alt, 2);

        // At precedence 2 the guard passes again, with its own start state.
        let mut evaluator = AtPrecedence(2);
        let mut input = ListTokenStream::from_types(&[PLUS, INT]);
        let alt = sim
            .adaptive_predict(&mut input, 0, None, &mut evaluator, &mut listener)
            .unwrap();
        assert_eq!(alt, 1);

        let dfa = sim.dfa(0);
        assert!(dfa.precedence_start_state(3).is_some());
        assert!(dfa.precedence_start_state(2).is_some());
    }

    #[test]
    fn test_shared_dfa_across_parser_instances() {
        use hello_tokens::{HELLO, ID};
        let atn = Arc::new(hello_grammar());
        let first = ParserAtnSimulator::new(Arc::clone(&atn));
        let mut listener = RecordingListener::default();

        let mut input = ListTokenStream::from_types(&[HELLO, ID]);
        predict(&first, &mut input, &mut listener).unwrap();
        let states = first.dfa(0).state_count();

        let second = ParserAtnSimulator::with_shared(
            atn,
            Arc::clone(first.decision_dfas()),
            Arc::clone(first.context_cache()),
        );
        let mut input = ListTokenStream::from_types(&[HELLO, ID]);
        let alt = predict(&second, &mut input, &mut listener).unwrap();
        assert_eq!(alt, 1);
        // The second instance rode the first one's DFA.
        assert_eq!(second.dfa(0).state_count(), states);
    }

    #[test]
    fn test_invalid_alt_is_zero() {
        assert_eq!(INVALID_ALT, 0);
    }

    #[test]
    fn test_fixture_round_trips_through_serialization() {
        let atn = left_recursive_expr_grammar();
        let data = crate::atn::serial::serialize(&atn).unwrap();
        let loaded = crate::atn::serial::deserialize(&data).unwrap();
        assert_eq!(loaded.states(), atn.states());
        assert_eq!(loaded.decision_to_state, atn.decision_to_state);

        use expr_tokens::{INT, PLUS};
        let sim = ParserAtnSimulator::new(Arc::new(loaded));
        let mut listener = RecordingListener::default();
        let mut input = ListTokenStream::from_types(&[PLUS, INT]);
        assert_eq!(predict(&sim, &mut input, &mut listener).unwrap(), 1);
    }
}
