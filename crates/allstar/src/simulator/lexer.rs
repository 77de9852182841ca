//! # Lexer ATN Simulator
//!
//! Token matching over the shared DFA-caching skeleton: one DFA per lexer
//! mode, longest-match semantics with rule order breaking ties, and lexer
//! commands (skip, more, mode and channel changes) attached to the winning
//! configuration and executed only for the match that is kept.
//!
//! Lexer closure uses the exact configuration discipline: two
//! configurations that differ only in context or pending actions must both
//! survive, or a lower-priority rule could steal an action list.

use crate::atn::{Atn, LexerAction, StateNumber, TransitionKind};
use crate::config::set::{AtnConfigSet, ExactKeys, LookupKeys};
use crate::config::{AtnConfig, INVALID_ALT};
use crate::context::{ContextStore, EMPTY_CONTEXT, EMPTY_RETURN_STATE, MergeCache};
use crate::dfa::{Dfa, DfaState, DfaStateId, ERROR_STATE};
use crate::error::RecognitionError;
use crate::token::{CharStream, TOKEN_EOF};
use std::sync::{Arc, Mutex};

/// Smallest code point a lexer edge can match.
pub const MIN_CHAR: i32 = 0;
/// Largest code point a lexer edge can match.
pub const MAX_CHAR: i32 = 0x10_ffff;

/// Host hooks a lexer implements: command targets and predicate dispatch.
pub trait LexerHost {
    fn skip(&mut self) {}
    fn more(&mut self) {}
    fn set_type(&mut self, token_type: i32) {
        let _ = token_type;
    }
    fn set_channel(&mut self, channel: usize) {
        let _ = channel;
    }
    fn set_mode(&mut self, mode: usize) {
        let _ = mode;
    }
    fn push_mode(&mut self, mode: usize) {
        let _ = mode;
    }
    fn pop_mode(&mut self) {}
    /// Custom embedded action.
    fn action(&mut self, rule_index: usize, action_index: usize) {
        let _ = (rule_index, action_index);
    }
    /// Lexer semantic predicate; `true` keeps the alternative.
    fn sempred(&mut self, rule_index: usize, pred_index: usize) -> bool {
        let _ = (rule_index, pred_index);
        true
    }
}

/// The ordered lexer commands of one matched rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LexerActionExecutor {
    actions: Vec<LexerAction>,
}

impl LexerActionExecutor {
    #[must_use]
    pub const fn new(actions: Vec<LexerAction>) -> Self {
        Self { actions }
    }

    /// Extend `previous` (possibly absent) with one more action.
    #[must_use]
    pub fn append(previous: Option<&Arc<Self>>, action: LexerAction) -> Arc<Self> {
        let mut actions = previous.map_or_else(Vec::new, |p| p.actions.clone());
        actions.push(action);
        Arc::new(Self::new(actions))
    }

    #[must_use]
    pub fn actions(&self) -> &[LexerAction] {
        &self.actions
    }

    /// Run every command against the host, in order.
    pub fn execute(&self, host: &mut dyn LexerHost) {
        for action in &self.actions {
            match action {
                LexerAction::Skip => host.skip(),
                LexerAction::More => host.more(),
                LexerAction::PopMode => host.pop_mode(),
                LexerAction::Mode { mode } => host.set_mode(*mode),
                LexerAction::PushMode { mode } => host.push_mode(*mode),
                LexerAction::Channel { channel } => host.set_channel(*channel),
                LexerAction::Type { token_type } => host.set_type(*token_type),
                LexerAction::Custom {
                    rule_index,
                    action_index,
                } => host.action(*rule_index, *action_index),
            }
        }
    }
}

/// Outcome of one token match.
#[derive(Debug, Clone)]
pub struct LexerMatch {
    pub token_type: i32,
    pub rule_index: usize,
    pub start_index: usize,
    /// Stream position after the matched text.
    pub stop_index: usize,
    /// Commands of the winning rule; run them through the host.
    pub executor: Option<Arc<LexerActionExecutor>>,
}

/// The token-matching engine over per-mode DFAs.
#[derive(Debug)]
pub struct LexerAtnSimulator {
    atn: Arc<Atn>,
    dfas: Arc<Vec<Dfa>>,
    context_cache: Arc<Mutex<ContextStore>>,
}

impl LexerAtnSimulator {
    #[must_use]
    pub fn new(atn: Arc<Atn>) -> Self {
        let dfas = atn
            .mode_to_start_state
            .iter()
            .enumerate()
            .map(|(mode, &state)| Dfa::new(mode, state, false))
            .collect();
        Self {
            atn,
            dfas: Arc::new(dfas),
            context_cache: Arc::new(Mutex::new(ContextStore::new())),
        }
    }

    #[must_use]
    pub fn with_shared(
        atn: Arc<Atn>,
        dfas: Arc<Vec<Dfa>>,
        context_cache: Arc<Mutex<ContextStore>>,
    ) -> Self {
        Self {
            atn,
            dfas,
            context_cache,
        }
    }

    #[must_use]
    pub fn mode_dfas(&self) -> &Arc<Vec<Dfa>> {
        &self.dfas
    }

    #[must_use]
    pub fn context_cache(&self) -> &Arc<Mutex<ContextStore>> {
        &self.context_cache
    }

    /// Match one token in `mode` starting at the current stream position.
    ///
    /// On success the stream is left after the matched text; on failure it
    /// is restored to the start position.
    ///
    /// # Errors
    ///
    /// `NoViableAlt` (keyed by mode) when no rule matches any prefix of the
    /// remaining input.
    pub fn match_token(
        &self,
        input: &mut dyn CharStream,
        mode: usize,
        host: &mut dyn LexerHost,
    ) -> Result<LexerMatch, RecognitionError> {
        let mut store = self
            .context_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let dfa = &self.dfas[mode];
        let start_index = input.index();
        let marker = input.mark();

        let mut session = TokenMatch {
            atn: &self.atn,
            dfa,
            store: &mut *store,
            merge_cache: MergeCache::default(),
            start_index,
        };
        let result = session.run(input, host, mode);
        if result.is_err() {
            input.seek(start_index);
        }
        input.release(marker);
        result
    }
}

struct TokenMatch<'a> {
    atn: &'a Atn,
    dfa: &'a Dfa,
    store: &'a mut ContextStore,
    merge_cache: MergeCache,
    start_index: usize,
}

impl TokenMatch<'_> {
    fn run(
        &mut self,
        input: &mut dyn CharStream,
        host: &mut dyn LexerHost,
        mode: usize,
    ) -> Result<LexerMatch, RecognitionError> {
        let s0 = match self.dfa.s0() {
            Some(s0) => s0,
            None => {
                let configs = self.compute_start_state(input, host, self.dfa.atn_start_state);
                let suppress = configs.has_semantic_context;
                let s0 = self.add_dfa_state(configs);
                if !suppress {
                    self.dfa.set_s0(s0);
                }
                s0
            }
        };

        let mut s = s0;
        let mut t = input.la(1);
        let mut last_accept: Option<(DfaStateId, usize)> = None;
        loop {
            let target = match self.dfa.edge(s, t) {
                Some(target) => target,
                None => self.compute_target_state(input, host, s, t),
            };
            if target.is_error() {
                break;
            }
            if t != TOKEN_EOF {
                input.consume();
            }
            if self.dfa.accept_info(target).is_accept {
                last_accept = Some((target, input.index()));
                if t == TOKEN_EOF {
                    break;
                }
            }
            t = input.la(1);
            s = target;
        }

        match last_accept {
            Some((d, index)) => {
                input.seek(index);
                let rule_index = self.dfa.accept_info(d).prediction;
                let token_type = self
                    .atn
                    .rule_to_token_type
                    .get(rule_index)
                    .copied()
                    .unwrap_or(TOKEN_EOF);
                Ok(LexerMatch {
                    token_type,
                    rule_index,
                    start_index: self.start_index,
                    stop_index: index,
                    executor: self.dfa.lexer_executor(d),
                })
            }
            None if t == TOKEN_EOF && input.index() == self.start_index => Ok(LexerMatch {
                token_type: TOKEN_EOF,
                rule_index: INVALID_ALT,
                start_index: self.start_index,
                stop_index: self.start_index,
                executor: None,
            }),
            None => Err(RecognitionError::NoViableAlt {
                decision: mode,
                start_index: self.start_index,
                offending_token: None,
                dead_end: Box::new(self.dfa.configs(s).as_ref().clone()),
            }),
        }
    }

    fn compute_start_state(
        &mut self,
        input: &mut dyn CharStream,
        host: &mut dyn LexerHost,
        start: StateNumber,
    ) -> AtnConfigSet<ExactKeys> {
        let mut configs = AtnConfigSet::new(false);
        let nalts = self.atn.state(start).transitions.len();
        for i in 0..nalts {
            let target = self.atn.state(start).transitions[i].target;
            let config = self.moved(&AtnConfig::new(start, i + 1, EMPTY_CONTEXT), target);
            self.closure(input, host, config, &mut configs, false, false, false);
        }
        configs
    }

    fn compute_target_state(
        &mut self,
        input: &mut dyn CharStream,
        host: &mut dyn LexerHost,
        s: DfaStateId,
        t: i32,
    ) -> DfaStateId {
        let closure_set = self.dfa.configs(s);
        let mut reach: AtnConfigSet<ExactKeys> = AtnConfigSet::new(false);

        // Rule priority: once an alternative reaches an accept state, later
        // configurations of the same alternative that crossed a non-greedy
        // decision are out of the running.
        let mut skip_alt = INVALID_ALT;
        for c in closure_set.iter() {
            let current_alt_reached_accept = c.alt == skip_alt;
            if current_alt_reached_accept && c.passed_through_non_greedy {
                continue;
            }
            let ntrans = self.atn.state(c.state).transitions.len();
            for i in 0..ntrans {
                let transition = &self.atn.state(c.state).transitions[i];
                if transition.matches(t, MIN_CHAR, MAX_CHAR) {
                    let moved = self.moved(c, transition.target);
                    if self.closure(
                        input,
                        host,
                        moved,
                        &mut reach,
                        current_alt_reached_accept,
                        true,
                        t == TOKEN_EOF,
                    ) {
                        skip_alt = c.alt;
                        break;
                    }
                }
            }
        }

        if reach.is_empty() {
            self.dfa.set_edge(s, t, ERROR_STATE);
            return ERROR_STATE;
        }
        let suppress = reach.has_semantic_context;
        let target = self.add_dfa_state(reach);
        if !suppress {
            self.dfa.set_edge(s, t, target);
        }
        target
    }

    /// Epsilon closure; returns `true` when the configuration's alternative
    /// reached an accept (rule stop) state.
    #[allow(clippy::too_many_arguments)]
    fn closure(
        &mut self,
        input: &mut dyn CharStream,
        host: &mut dyn LexerHost,
        config: AtnConfig,
        configs: &mut AtnConfigSet<ExactKeys>,
        mut current_alt_reached_accept: bool,
        speculative: bool,
        treat_eof_as_epsilon: bool,
    ) -> bool {
        if self.atn.state(config.state).is_rule_stop() {
            if config.context == EMPTY_CONTEXT {
                configs.add_unchecked(config, self.store, &mut self.merge_cache);
                return true;
            }
            if self.store.has_empty_path(config.context) {
                let c = config.moved_with_context(config.state, EMPTY_CONTEXT);
                configs.add_unchecked(c, self.store, &mut self.merge_cache);
                current_alt_reached_accept = true;
            }
            let arms = self.store.arm_count(config.context);
            for i in 0..arms {
                let return_state = self.store.return_state(config.context, i);
                if return_state == EMPTY_RETURN_STATE {
                    continue;
                }
                let parent = self.store.parent(config.context, i);
                let c = config.moved_with_context(return_state, parent);
                current_alt_reached_accept = self.closure(
                    input,
                    host,
                    c,
                    configs,
                    current_alt_reached_accept,
                    speculative,
                    treat_eof_as_epsilon,
                );
            }
            return current_alt_reached_accept;
        }

        if !self.atn.state(config.state).only_has_epsilon_transitions()
            && (!current_alt_reached_accept || !config.passed_through_non_greedy)
        {
            configs.add_unchecked(config.clone(), self.store, &mut self.merge_cache);
        }

        let ntrans = self.atn.state(config.state).transitions.len();
        for i in 0..ntrans {
            let transition = self.atn.state(config.state).transitions[i].clone();
            if let Some(c) = self.epsilon_target(
                input,
                host,
                &config,
                &transition,
                configs,
                speculative,
                treat_eof_as_epsilon,
            ) {
                current_alt_reached_accept = self.closure(
                    input,
                    host,
                    c,
                    configs,
                    current_alt_reached_accept,
                    speculative,
                    treat_eof_as_epsilon,
                );
            }
        }
        current_alt_reached_accept
    }

    #[allow(clippy::too_many_arguments)]
    fn epsilon_target(
        &mut self,
        input: &mut dyn CharStream,
        host: &mut dyn LexerHost,
        config: &AtnConfig,
        transition: &crate::atn::Transition,
        configs: &mut AtnConfigSet<ExactKeys>,
        speculative: bool,
        treat_eof_as_epsilon: bool,
    ) -> Option<AtnConfig> {
        match &transition.kind {
            TransitionKind::Rule { follow_state, .. } => {
                let new_context = self.store.singleton(config.context, *follow_state);
                let mut c = self.moved(config, transition.target);
                c.context = new_context;
                Some(c)
            }
            TransitionKind::Predicate {
                rule_index,
                pred_index,
                ..
            } => {
                // Predicates invalidate DFA caching for this edge; the flag
                // on the set suppresses the install.
                configs.has_semantic_context = true;
                self.evaluate_predicate(input, host, *rule_index, *pred_index, speculative)
                    .then(|| self.moved(config, transition.target))
            }
            TransitionKind::Action { action_index, .. } => {
                let executor = LexerActionExecutor::append(
                    config.lexer_executor.as_ref(),
                    self.atn
                        .lexer_actions
                        .get(*action_index)
                        .cloned()
                        .unwrap_or(LexerAction::Skip),
                );
                let mut c = self.moved(config, transition.target);
                c.lexer_executor = Some(executor);
                Some(c)
            }
            TransitionKind::Epsilon { .. } => Some(self.moved(config, transition.target)),
            TransitionKind::Atom { .. } | TransitionKind::Range { .. } | TransitionKind::Set { .. } => {
                (treat_eof_as_epsilon && transition.matches_eof())
                    .then(|| self.moved(config, transition.target))
            }
            TransitionKind::NotSet { .. } | TransitionKind::Wildcard => None,
            TransitionKind::Precedence { .. } => {
                unreachable!("precedence transitions only occur in parser ATNs")
            }
        }
    }

    /// Move a configuration to `target`, tracking non-greedy decisions it
    /// passes through.
    fn moved(&self, config: &AtnConfig, target: StateNumber) -> AtnConfig {
        let mut c = config.moved_to(target);
        if self.atn.state(target).non_greedy {
            c.passed_through_non_greedy = true;
        }
        c
    }

    fn evaluate_predicate(
        &mut self,
        input: &mut dyn CharStream,
        host: &mut dyn LexerHost,
        rule_index: usize,
        pred_index: usize,
        speculative: bool,
    ) -> bool {
        if !speculative {
            return host.sempred(rule_index, pred_index);
        }
        // Evaluate against the token start position, then restore.
        let index = input.index();
        input.seek(self.start_index);
        let result = host.sempred(rule_index, pred_index);
        input.seek(index);
        result
    }

    /// Intern a reach set; the first rule-stop configuration (rule order)
    /// decides the accept outcome.
    fn add_dfa_state(&mut self, configs: AtnConfigSet<ExactKeys>) -> DfaStateId {
        let winner = configs
            .iter()
            .find(|c| self.atn.state(c.state).is_rule_stop())
            .map(|c| (self.atn.state(c.state).rule_index, c.lexer_executor.clone()));
        let mut state = DfaState::new(configs.with_discipline::<LookupKeys>());
        if let Some((rule_index, executor)) = winner {
            state.is_accept = true;
            state.prediction = rule_index;
            state.lexer_executor = executor;
        }
        self.dfa.add_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atn::{Atn, AtnStateKind, GrammarKind, Transition};
    use crate::token::StringCharStream;

    #[derive(Default)]
    struct RecordingHost {
        skipped: bool,
        channel: Option<usize>,
        token_type: Option<i32>,
    }

    impl LexerHost for RecordingHost {
        fn skip(&mut self) {
            self.skipped = true;
        }

        fn set_channel(&mut self, channel: usize) {
            self.channel = Some(channel);
        }

        fn set_type(&mut self, token_type: i32) {
            self.token_type = Some(token_type);
        }
    }

    /// Two-rule lexer: `AB: 'ab';` and `ID: [a-z]+;`.
    fn two_rule_lexer() -> Atn {
        let mut atn = Atn::new(GrammarKind::Lexer, 2);
        let mode = atn.add_state(0, AtnStateKind::TokenStart);

        let r0_start = atn.add_state(0, AtnStateKind::RuleStart {
            stop_state: 0,
            is_left_recursive: false,
        });
        let r0_a = atn.add_state(0, AtnStateKind::Basic);
        let r0_b = atn.add_state(0, AtnStateKind::Basic);
        let r0_stop = atn.add_state(0, AtnStateKind::RuleStop);

        let r1_start = atn.add_state(1, AtnStateKind::RuleStart {
            stop_state: 0,
            is_left_recursive: false,
        });
        let r1_loop = atn.add_state(1, AtnStateKind::Basic);
        let r1_stop = atn.add_state(1, AtnStateKind::RuleStop);

        atn.rule_to_start_state.extend([r0_start, r1_start]);
        atn.rule_to_stop_state.extend([r0_stop, r1_stop]);
        atn.rule_to_token_type.extend([1, 2]);
        atn.mode_to_start_state.push(mode);

        atn.add_transition(mode, Transition::epsilon(r0_start));
        atn.add_transition(mode, Transition::epsilon(r1_start));

        atn.add_transition(
            r0_start,
            Transition::new(r0_a, TransitionKind::Atom { label: 'a' as i32 }),
        );
        atn.add_transition(
            r0_a,
            Transition::new(r0_b, TransitionKind::Atom { label: 'b' as i32 }),
        );
        atn.add_transition(r0_b, Transition::epsilon(r0_stop));

        let lower = TransitionKind::Range {
            start: 'a' as i32,
            stop: 'z' as i32,
        };
        atn.add_transition(r1_start, Transition::new(r1_loop, lower.clone()));
        atn.add_transition(r1_loop, Transition::new(r1_loop, lower));
        atn.add_transition(r1_loop, Transition::epsilon(r1_stop));

        atn.link_rule_stops();
        atn
    }

    #[test]
    fn test_rule_order_breaks_ties() {
        let sim = LexerAtnSimulator::new(Arc::new(two_rule_lexer()));
        let mut input = StringCharStream::new("ab");
        let mut host = RecordingHost::default();
        let m = sim.match_token(&mut input, 0, &mut host).unwrap();
        assert_eq!(m.token_type, 1);
        assert_eq!(m.rule_index, 0);
        assert_eq!(m.stop_index, 2);
    }

    #[test]
    fn test_longest_match_wins() {
        let sim = LexerAtnSimulator::new(Arc::new(two_rule_lexer()));
        let mut input = StringCharStream::new("abc");
        let mut host = RecordingHost::default();
        let m = sim.match_token(&mut input, 0, &mut host).unwrap();
        assert_eq!(m.token_type, 2);
        assert_eq!(m.stop_index, 3);
    }

    #[test]
    fn test_shorter_rule_still_matches() {
        let sim = LexerAtnSimulator::new(Arc::new(two_rule_lexer()));
        let mut input = StringCharStream::new("a b");
        let mut host = RecordingHost::default();
        let m = sim.match_token(&mut input, 0, &mut host).unwrap();
        assert_eq!(m.token_type, 2);
        assert_eq!(m.stop_index, 1);
    }

    #[test]
    fn test_no_viable_token() {
        let sim = LexerAtnSimulator::new(Arc::new(two_rule_lexer()));
        let mut input = StringCharStream::new("9");
        let mut host = RecordingHost::default();
        let err = sim.match_token(&mut input, 0, &mut host).unwrap_err();
        assert!(matches!(err, RecognitionError::NoViableAlt { .. }));
        // Restored to the start on failure.
        assert_eq!(input.index(), 0);
    }

    #[test]
    fn test_eof_is_a_match() {
        let sim = LexerAtnSimulator::new(Arc::new(two_rule_lexer()));
        let mut input = StringCharStream::new("");
        let mut host = RecordingHost::default();
        let m = sim.match_token(&mut input, 0, &mut host).unwrap();
        assert_eq!(m.token_type, TOKEN_EOF);
    }

    #[test]
    fn test_dfa_caches_second_match() {
        let sim = LexerAtnSimulator::new(Arc::new(two_rule_lexer()));
        let mut host = RecordingHost::default();

        let mut input = StringCharStream::new("ab");
        sim.match_token(&mut input, 0, &mut host).unwrap();
        let states_after_first = sim.mode_dfas()[0].state_count();

        let mut input = StringCharStream::new("ab");
        sim.match_token(&mut input, 0, &mut host).unwrap();
        assert_eq!(sim.mode_dfas()[0].state_count(), states_after_first);
    }

    #[test]
    fn test_executor_runs_commands() {
        let executor = LexerActionExecutor::new(vec![
            LexerAction::Skip,
            LexerAction::Channel { channel: 1 },
            LexerAction::Type { token_type: 42 },
        ]);
        let mut host = RecordingHost::default();
        executor.execute(&mut host);
        assert!(host.skipped);
        assert_eq!(host.channel, Some(1));
        assert_eq!(host.token_type, Some(42));
    }

    #[test]
    fn test_executor_append() {
        let base = LexerActionExecutor::append(None, LexerAction::Skip);
        let extended = LexerActionExecutor::append(Some(&base), LexerAction::PopMode);
        assert_eq!(base.actions().len(), 1);
        assert_eq!(
            extended.actions(),
            &[LexerAction::Skip, LexerAction::PopMode]
        );
    }
}
