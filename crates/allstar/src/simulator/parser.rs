//! # Parser ATN Simulator
//!
//! Adaptive LL(\*) prediction: the engine behind `adaptive_predict`.
//!
//! ## How a prediction runs
//!
//! The simulator walks the decision's DFA as long as edges exist, one token
//! per step. On a missing edge it computes the reach set of the current
//! configurations for the lookahead token, closes it, interns the result as
//! a new DFA state and installs the edge — so the next time this decision
//! sees the same input shape it runs at DFA speed.
//!
//! Prediction starts context-free (SLL). When conflict analysis shows the
//! configurations cannot be separated without the caller stack, the DFA
//! state is marked `requires_full_context` and the simulator restarts the
//! decision from the original input position with full (LL) context built
//! from the outer rule invocation chain. The escalation is a returned
//! discriminant on the DFA state, never an unwinding error.
//!
//! Ambiguity never fails a prediction: it is reported through the error
//! listener and resolved to the minimum alternative. Only a decision with
//! no viable alternative at all produces a [`RecognitionError`].
//!
//! ## Sharing
//!
//! The ATN, the DFA vector, and the context store may be shared by any
//! number of parser instances. A simulator locks the context store for the
//! duration of one prediction; DFA reads and installs synchronize
//! internally and are additive-only.

use crate::atn::{Atn, AtnStateKind, StateNumber, Transition, TransitionKind};
use crate::bitset::BitSet;
use crate::config::set::AtnConfigSet;
use crate::config::{AtnConfig, ConfigKey, INVALID_ALT};
use crate::context::{ContextId, ContextStore, EMPTY_CONTEXT, EMPTY_RETURN_STATE, MergeCache, RuleContext};
use crate::dfa::{Dfa, DfaState, DfaStateId, ERROR_STATE, PredPrediction};
use crate::error::{ErrorListener, RecognitionError};
use crate::interval::IntervalSet;
use crate::prediction::{
    self, PredictionMode, all_configs_in_rule_stop_states, conflicting_alt_subsets,
    has_config_in_rule_stop_state,
};
use crate::semantic::{PredicateEvaluator, SemanticContext};
use crate::token::{TOKEN_EOF, TokenStream};
use ahash::RandomState;
use hashbrown::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// The prediction engine for one parser, over possibly shared caches.
#[derive(Debug)]
pub struct ParserAtnSimulator {
    atn: Arc<Atn>,
    dfas: Arc<Vec<Dfa>>,
    context_cache: Arc<Mutex<ContextStore>>,
    pub prediction_mode: PredictionMode,
}

impl ParserAtnSimulator {
    /// Build a simulator with fresh caches.
    #[must_use]
    pub fn new(atn: Arc<Atn>) -> Self {
        let dfas = atn
            .decision_to_state
            .iter()
            .enumerate()
            .map(|(decision, &state)| {
                let precedence = matches!(
                    atn.state(state).kind,
                    AtnStateKind::StarLoopEntry {
                        precedence_decision: true,
                        ..
                    }
                );
                Dfa::new(decision, state, precedence)
            })
            .collect();
        Self {
            atn,
            dfas: Arc::new(dfas),
            context_cache: Arc::new(Mutex::new(ContextStore::new())),
            prediction_mode: PredictionMode::default(),
        }
    }

    /// Build a simulator over caches shared with another parser instance.
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
            prediction_mode: PredictionMode::default(),
        }
    }

    #[must_use]
    pub fn atn(&self) -> &Atn {
        &self.atn
    }

    /// The per-decision DFAs, for sharing and diagnostics.
    #[must_use]
    pub fn decision_dfas(&self) -> &Arc<Vec<Dfa>> {
        &self.dfas
    }

    #[must_use]
    pub fn context_cache(&self) -> &Arc<Mutex<ContextStore>> {
        &self.context_cache
    }

    #[must_use]
    pub fn dfa(&self, decision: usize) -> &Dfa {
        &self.dfas[decision]
    }

    /// Predict which alternative of `decision` the input selects.
    ///
    /// The input is advanced while simulating and restored to its entry
    /// position before returning, on every path; a stream mark brackets the
    /// whole call.
    ///
    /// # Errors
    ///
    /// `NoViableAlt` when no alternative can match, `FailedPredicate`-free:
    /// predicate failures silently eliminate their alternatives.
    pub fn adaptive_predict(
        &self,
        input: &mut dyn TokenStream,
        decision: usize,
        outer_context: Option<&RuleContext>,
        evaluator: &mut dyn PredicateEvaluator,
        listener: &mut dyn ErrorListener,
    ) -> Result<usize, RecognitionError> {
        let mut store = self
            .context_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let dfa = &self.dfas[decision];
        let marker = input.mark();
        let start_index = input.index();
        let mut session = Prediction {
            atn: &self.atn,
            dfa,
            store: &mut *store,
            merge_cache: MergeCache::default(),
            input: &mut *input,
            start_index,
            outer_context,
            evaluator,
            listener,
            mode: self.prediction_mode,
        };
        let result = session.run();
        input.seek(start_index);
        input.release(marker);
        result
    }
}

/// State of one `adaptive_predict` call.
struct Prediction<'a> {
    atn: &'a Atn,
    dfa: &'a Dfa,
    store: &'a mut ContextStore,
    merge_cache: MergeCache,
    input: &'a mut dyn TokenStream,
    start_index: usize,
    outer_context: Option<&'a RuleContext>,
    evaluator: &'a mut dyn PredicateEvaluator,
    listener: &'a mut dyn ErrorListener,
    mode: PredictionMode,
}

type BusySet = HashSet<ConfigKey, RandomState>;

impl Prediction<'_> {
    fn run(&mut self) -> Result<usize, RecognitionError> {
        let existing = if self.dfa.is_precedence_dfa() {
            self.dfa
                .precedence_start_state(self.evaluator.current_precedence())
        } else {
            self.dfa.s0()
        };
        let s0 = match existing {
            Some(s0) => s0,
            None => {
                // SLL start state: context-free, so the empty context.
                let s0_closure =
                    self.compute_start_state(self.dfa.atn_start_state, EMPTY_CONTEXT, false);
                if self.dfa.is_precedence_dfa() {
                    let filtered = self.apply_precedence_filter(&s0_closure);
                    let s0 = self.dfa.add_state(DfaState::new(filtered));
                    self.dfa
                        .set_precedence_start_state(self.evaluator.current_precedence(), s0);
                    s0
                } else {
                    let s0 = self.dfa.add_state(DfaState::new(s0_closure));
                    self.dfa.set_s0(s0);
                    s0
                }
            }
        };
        self.exec_atn(s0)
    }

    /// The SLL loop: follow DFA edges, computing and installing them on
    /// miss, until an accept state or dead end.
    fn exec_atn(&mut self, s0: DfaStateId) -> Result<usize, RecognitionError> {
        let mut previous = s0;
        let mut t = self.input.la(1);
        loop {
            let d = match self.dfa.edge(previous, t) {
                Some(d) => d,
                None => self.compute_target_state(previous, t)?,
            };
            if d.is_error() {
                // The DFA (and the ATN behind it) cannot advance on t.
                // Before failing, a configuration that already finished the
                // decision's entry rule still yields a valid prediction.
                let configs = self.dfa.configs(previous);
                let err = self.no_viable_alt(&configs);
                self.input.seek(self.start_index);
                let alt = self.syn_valid_or_sem_invalid_alt(&configs);
                if alt != INVALID_ALT {
                    return Ok(alt);
                }
                return Err(err);
            }

            let info = self.dfa.accept_info(d);
            if info.requires_full_context && self.mode != PredictionMode::Sll {
                let mut conflicting_alts = self
                    .dfa
                    .configs(d)
                    .conflicting_alts
                    .clone()
                    .unwrap_or_default();
                if let Some(predicates) = self.dfa.predicates(d) {
                    let conflict_index = self.input.index();
                    if conflict_index != self.start_index {
                        self.input.seek(self.start_index);
                    }
                    conflicting_alts = self.eval_semantic_context(&predicates, true);
                    if conflicting_alts.cardinality() == 1 {
                        return Ok(conflicting_alts.min().unwrap_or(INVALID_ALT));
                    }
                    if conflict_index != self.start_index {
                        self.input.seek(conflict_index);
                    }
                }
                let initial = self.store.from_rule_context(self.atn, self.outer_context);
                let s0_closure = self.compute_start_state(self.dfa.atn_start_state, initial, true);
                let stop_index = self.input.index();
                self.listener.report_attempting_full_context(
                    self.dfa.decision,
                    self.start_index,
                    stop_index,
                    &conflicting_alts,
                    &self.dfa.configs(d),
                );
                return self.exec_atn_with_full_context(s0_closure);
            }

            if info.is_accept {
                let Some(predicates) = self.dfa.predicates(d) else {
                    return Ok(info.prediction);
                };
                let stop_index = self.input.index();
                self.input.seek(self.start_index);
                let alts = self.eval_semantic_context(&predicates, true);
                return match alts.cardinality() {
                    0 => Err(self.no_viable_alt(&self.dfa.configs(d))),
                    1 => Ok(alts.min().unwrap_or(INVALID_ALT)),
                    _ => {
                        // Several alternatives survive their predicates:
                        // report and take the minimum.
                        let configs = self.dfa.configs(d);
                        self.listener.report_ambiguity(
                            self.dfa.decision,
                            self.start_index,
                            stop_index,
                            false,
                            &alts,
                            &configs,
                        );
                        Ok(alts.min().unwrap_or(INVALID_ALT))
                    }
                };
            }

            previous = d;
            if t != TOKEN_EOF {
                self.input.consume();
                t = self.input.la(1);
            }
        }
    }

    /// The LL loop: pure ATN simulation with full contexts, no DFA caching.
    fn exec_atn_with_full_context(
        &mut self,
        s0_closure: AtnConfigSet,
    ) -> Result<usize, RecognitionError> {
        let mut found_exact_ambig = false;
        let mut previous = s0_closure;
        self.input.seek(self.start_index);
        let mut t = self.input.la(1);
        let (predicted, reach) = loop {
            let Some(next) = self.compute_reach_set(&previous, t, true) else {
                let err = self.no_viable_alt(&previous);
                self.input.seek(self.start_index);
                let alt = self.syn_valid_or_sem_invalid_alt(&previous);
                if alt != INVALID_ALT {
                    return Ok(alt);
                }
                return Err(err);
            };

            let altsets = conflicting_alt_subsets(&next);
            if next.unique_alt != INVALID_ALT {
                break (next.unique_alt, next);
            }
            if self.mode == PredictionMode::LlExactAmbigDetection {
                if prediction::all_subsets_conflict(&altsets)
                    && prediction::all_subsets_equal(&altsets)
                {
                    found_exact_ambig = true;
                    let alt = prediction::get_alts(&altsets).min().unwrap_or(INVALID_ALT);
                    break (alt, next);
                }
            } else {
                let alt = prediction::resolves_to_just_one_viable_alt(&altsets);
                if alt != INVALID_ALT {
                    break (alt, next);
                }
            }

            previous = next;
            if t != TOKEN_EOF {
                self.input.consume();
                t = self.input.la(1);
            }
        };

        let stop_index = self.input.index();
        if reach.unique_alt != INVALID_ALT {
            self.listener.report_context_sensitivity(
                self.dfa.decision,
                self.start_index,
                stop_index,
                predicted,
                &reach,
            );
            return Ok(predicted);
        }
        self.listener.report_ambiguity(
            self.dfa.decision,
            self.start_index,
            stop_index,
            found_exact_ambig,
            &reach.alts(),
            &reach,
        );
        Ok(predicted)
    }

    /// Compute, intern, and install the DFA target of `previous` on `t`.
    fn compute_target_state(
        &mut self,
        previous: DfaStateId,
        t: i32,
    ) -> Result<DfaStateId, RecognitionError> {
        let closure = self.dfa.configs(previous);
        let Some(mut reach) = self.compute_reach_set(&closure, t, false) else {
            self.dfa.set_edge(previous, t, ERROR_STATE);
            return Ok(ERROR_STATE);
        };

        let predicted = reach.unique_alt;
        let mut is_accept = false;
        let mut prediction = INVALID_ALT;
        let mut requires_full_context = false;
        if predicted != INVALID_ALT {
            is_accept = true;
            prediction = predicted;
        } else if prediction::has_sll_conflict_terminating_prediction(
            self.mode, &reach, self.atn, self.store,
        ) {
            let conflicting = prediction::get_alts(&conflicting_alt_subsets(&reach));
            requires_full_context = true;
            is_accept = true;
            prediction = conflicting.min().unwrap_or(INVALID_ALT);
            reach.conflicting_alts = Some(conflicting);
        }

        let has_semantic = reach.has_semantic_context;
        let mut state = DfaState::new(reach);
        state.is_accept = is_accept;
        state.prediction = prediction;
        state.requires_full_context = requires_full_context;
        if is_accept && has_semantic {
            self.predicate_dfa_state(&mut state);
        }
        let d = self.dfa.add_state(state);
        self.dfa.set_edge(previous, t, d);
        Ok(d)
    }

    /// Attach predicate guards to an accept state whose configurations carry
    /// semantic context; prediction at that state then evaluates them.
    fn predicate_dfa_state(&mut self, state: &mut DfaState) {
        let decision_state = self.atn.state(self.dfa.atn_start_state);
        let nalts = decision_state.transitions.len();
        let alts = Self::conflicting_alts_or_unique_alt(&state.configs);
        let alt_to_pred = Self::preds_for_ambig_alts(&alts, &state.configs, nalts);
        state.predicates =
            alt_to_pred.and_then(|preds| Self::predicate_predictions(&alts, &preds));
        if state.predicates.is_some() {
            state.prediction = INVALID_ALT;
        } else {
            state.prediction = alts.min().unwrap_or(INVALID_ALT);
        }
    }

    fn conflicting_alts_or_unique_alt(configs: &AtnConfigSet) -> BitSet {
        if configs.unique_alt != INVALID_ALT {
            return BitSet::of(configs.unique_alt);
        }
        configs.conflicting_alts.clone().unwrap_or_default()
    }

    /// Per-alternative disjunction of the predicates guarding `ambig_alts`,
    /// or `None` when no real predicate is involved. Index 0 is unused.
    fn preds_for_ambig_alts(
        ambig_alts: &BitSet,
        configs: &AtnConfigSet,
        nalts: usize,
    ) -> Option<Vec<SemanticContext>> {
        let mut alt_to_pred: Vec<Option<SemanticContext>> = vec![None; nalts + 1];
        for c in configs {
            if ambig_alts.get(c.alt) {
                alt_to_pred[c.alt] = Some(match &alt_to_pred[c.alt] {
                    Some(existing) => SemanticContext::or(existing, &c.semantic_context),
                    None => c.semantic_context.clone(),
                });
            }
        }
        let mut n_pred_alts = 0;
        let resolved: Vec<SemanticContext> = alt_to_pred
            .into_iter()
            .map(|p| {
                let p = p.unwrap_or(SemanticContext::None);
                if !p.is_none() {
                    n_pred_alts += 1;
                }
                p
            })
            .collect();
        (n_pred_alts > 0).then_some(resolved)
    }

    fn predicate_predictions(
        ambig_alts: &BitSet,
        alt_to_pred: &[SemanticContext],
    ) -> Option<Vec<PredPrediction>> {
        let mut pairs = Vec::new();
        let mut contains_predicate = false;
        for (alt, pred) in alt_to_pred.iter().enumerate().skip(1) {
            if ambig_alts.get(alt) {
                if !pred.is_none() {
                    contains_predicate = true;
                }
                pairs.push(PredPrediction {
                    pred: pred.clone(),
                    alt,
                });
            }
        }
        contains_predicate.then_some(pairs)
    }

    /// Alternatives whose guards pass at the current input position. With
    /// `complete` unset the scan stops at the first survivor.
    fn eval_semantic_context(&mut self, predicates: &[PredPrediction], complete: bool) -> BitSet {
        let mut survivors = BitSet::new();
        for pair in predicates {
            if pair.pred.is_none() {
                survivors.set(pair.alt);
                if !complete {
                    break;
                }
                continue;
            }
            if pair.pred.eval(self.evaluator) {
                survivors.set(pair.alt);
                if !complete {
                    break;
                }
            }
        }
        survivors
    }

    /// Advance every configuration by one symbol and close the result.
    /// `None` when nothing can advance.
    fn compute_reach_set(
        &mut self,
        closure: &AtnConfigSet,
        t: i32,
        full_ctx: bool,
    ) -> Option<AtnConfigSet> {
        let mut intermediate = AtnConfigSet::new(full_ctx);
        let mut skipped_stop_states: Vec<AtnConfig> = Vec::new();

        for c in closure {
            if self.atn.state(c.state).is_rule_stop() {
                // Stopped configurations cannot consume; they only survive
                // into a reach set that ends the decision.
                if full_ctx || t == TOKEN_EOF {
                    skipped_stop_states.push(c.clone());
                }
                continue;
            }
            let ntrans = self.atn.state(c.state).transitions.len();
            for i in 0..ntrans {
                let transition = &self.atn.state(c.state).transitions[i];
                if let Some(target) = Self::reachable_target(transition, t, self.atn) {
                    intermediate.add_unchecked(
                        c.moved_to(target),
                        self.store,
                        &mut self.merge_cache,
                    );
                }
            }
        }

        // A single configuration or a unique alternative needs no closure:
        // the decision is already made.
        let mut reach = None;
        if skipped_stop_states.is_empty()
            && t != TOKEN_EOF
            && (intermediate.len() == 1 || intermediate.unique_alt != INVALID_ALT)
        {
            reach = Some(intermediate.clone());
        }

        let mut reach = match reach {
            Some(reach) => reach,
            None => {
                let mut closed = AtnConfigSet::new(full_ctx);
                let mut busy = BusySet::default();
                let treat_eof_as_epsilon = t == TOKEN_EOF;
                for c in intermediate.configs().to_vec() {
                    self.closure(c, &mut closed, &mut busy, false, full_ctx, treat_eof_as_epsilon);
                }
                closed
            }
        };

        if t == TOKEN_EOF {
            // At EOF only configurations that reached (or can reach) the end
            // of the decision's rule remain viable.
            reach = self.only_rule_stop_configs(&reach);
        }

        if !skipped_stop_states.is_empty()
            && (!full_ctx || !has_config_in_rule_stop_state(&reach, self.atn))
        {
            for c in skipped_stop_states {
                reach.add_unchecked(c, self.store, &mut self.merge_cache);
            }
        }

        if reach.is_empty() { None } else { Some(reach) }
    }

    /// Project a reach set at EOF onto its rule-stop configurations,
    /// completing configurations that can still epsilon their way to the
    /// end of their rule.
    fn only_rule_stop_configs(&mut self, configs: &AtnConfigSet) -> AtnConfigSet {
        if all_configs_in_rule_stop_states(configs, self.atn) {
            return configs.clone();
        }
        let mut result = AtnConfigSet::new(configs.full_ctx);
        for c in configs {
            if self.atn.state(c.state).is_rule_stop() {
                result.add_unchecked(c.clone(), self.store, &mut self.merge_cache);
                continue;
            }
            if self.atn.state(c.state).only_has_epsilon_transitions() {
                let next = self.atn.next_tokens(c.state);
                if next.contains(crate::atn::TOKEN_EPSILON) {
                    let stop = self.atn.rule_to_stop_state[self.atn.state(c.state).rule_index];
                    result.add_unchecked(c.moved_to(stop), self.store, &mut self.merge_cache);
                }
            }
        }
        result
    }

    fn reachable_target(transition: &Transition, t: i32, atn: &Atn) -> Option<StateNumber> {
        transition
            .matches(t, crate::token::MIN_USER_TOKEN_TYPE, atn.max_token_type)
            .then_some(transition.target)
    }

    /// Closure of the decision state's outgoing alternatives.
    fn compute_start_state(
        &mut self,
        p: StateNumber,
        initial_context: ContextId,
        full_ctx: bool,
    ) -> AtnConfigSet {
        let mut configs = AtnConfigSet::new(full_ctx);
        let nalts = self.atn.state(p).transitions.len();
        for i in 0..nalts {
            let target = self.atn.state(p).transitions[i].target;
            let config = AtnConfig::new(target, i + 1, initial_context);
            let mut busy = BusySet::default();
            self.closure(config, &mut configs, &mut busy, true, full_ctx, false);
        }
        configs
    }

    /// Left-recursion start-state transform: keep alternative 1 (the primary
    /// position) and drop higher alternatives that would re-enter the rule
    /// at the same state with the same context, unless suppressed by an
    /// outermost precedence return.
    fn apply_precedence_filter(&mut self, configs: &AtnConfigSet) -> AtnConfigSet {
        let mut states_from_alt1: HashMap<StateNumber, ContextId, RandomState> = HashMap::default();
        let mut result = AtnConfigSet::new(configs.full_ctx);
        for config in configs {
            if config.alt != 1 {
                continue;
            }
            let Some(updated) = config.semantic_context.eval_precedence(self.evaluator) else {
                continue;
            };
            states_from_alt1.insert(config.state, config.context);
            let c = if updated == config.semantic_context {
                config.clone()
            } else {
                config.with_semantic(updated)
            };
            result.add_unchecked(c, self.store, &mut self.merge_cache);
        }
        for config in configs {
            if config.alt == 1 {
                continue;
            }
            if !config.is_precedence_filter_suppressed()
                && states_from_alt1.get(&config.state) == Some(&config.context)
            {
                continue;
            }
            result.add_unchecked(config.clone(), self.store, &mut self.merge_cache);
        }
        result
    }

    fn closure(
        &mut self,
        config: AtnConfig,
        configs: &mut AtnConfigSet,
        busy: &mut BusySet,
        collect_predicates: bool,
        full_ctx: bool,
        treat_eof_as_epsilon: bool,
    ) {
        self.closure_checking_stop_state(
            config,
            configs,
            busy,
            collect_predicates,
            full_ctx,
            0,
            treat_eof_as_epsilon,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn closure_checking_stop_state(
        &mut self,
        config: AtnConfig,
        configs: &mut AtnConfigSet,
        busy: &mut BusySet,
        collect_predicates: bool,
        full_ctx: bool,
        depth: i32,
        treat_eof_as_epsilon: bool,
    ) {
        if self.atn.state(config.state).is_rule_stop() {
            if config.context != EMPTY_CONTEXT {
                // Pop each stacked return state and continue there.
                let arms = self.store.arm_count(config.context);
                for i in 0..arms {
                    let return_state = self.store.return_state(config.context, i);
                    if return_state == EMPTY_RETURN_STATE {
                        if full_ctx {
                            let c = config.moved_with_context(config.state, EMPTY_CONTEXT);
                            configs.add_unchecked(c, self.store, &mut self.merge_cache);
                        } else {
                            // Stack bottom without full context: chase the
                            // global follow links.
                            self.closure_work(
                                config.clone(),
                                configs,
                                busy,
                                collect_predicates,
                                full_ctx,
                                depth,
                                treat_eof_as_epsilon,
                            );
                        }
                        continue;
                    }
                    let parent = self.store.parent(config.context, i);
                    let c = config.moved_with_context(return_state, parent);
                    self.closure_checking_stop_state(
                        c,
                        configs,
                        busy,
                        collect_predicates,
                        full_ctx,
                        depth - 1,
                        treat_eof_as_epsilon,
                    );
                }
                return;
            }
            if full_ctx {
                // End of the start rule under full context: emit.
                configs.add_unchecked(config, self.store, &mut self.merge_cache);
                return;
            }
            // No context at all: fall through and chase follow links.
        }
        self.closure_work(
            config,
            configs,
            busy,
            collect_predicates,
            full_ctx,
            depth,
            treat_eof_as_epsilon,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn closure_work(
        &mut self,
        config: AtnConfig,
        configs: &mut AtnConfigSet,
        busy: &mut BusySet,
        collect_predicates: bool,
        full_ctx: bool,
        depth: i32,
        treat_eof_as_epsilon: bool,
    ) {
        let p = config.state;
        if !self.atn.state(p).only_has_epsilon_transitions() {
            configs.add_unchecked(config.clone(), self.store, &mut self.merge_cache);
        }
        let ntrans = self.atn.state(p).transitions.len();
        for i in 0..ntrans {
            let transition = self.atn.state(p).transitions[i].clone();
            let continue_collecting =
                collect_predicates && !matches!(transition.kind, TransitionKind::Action { .. });
            let Some(mut c) = self.epsilon_target(
                &config,
                &transition,
                continue_collecting,
                depth == 0,
                full_ctx,
                treat_eof_as_epsilon,
            ) else {
                continue;
            };

            let mut new_depth = depth;
            if self.atn.state(p).is_rule_stop() {
                // Fell off the end of a rule with no stack: the resulting
                // configuration now depends on the outer context.
                debug_assert!(!full_ctx);
                if self.dfa.is_precedence_dfa() {
                    if let TransitionKind::Epsilon {
                        outermost_precedence_return: Some(rule),
                    } = transition.kind
                    {
                        if rule == self.atn.state(self.dfa.atn_start_state).rule_index {
                            c.set_precedence_filter_suppressed(true);
                        }
                    }
                }
                c.increment_outer_context_depth();
                if !busy.insert(c.busy_key()) {
                    continue;
                }
                configs.dips_into_outer_context = true;
                new_depth -= 1;
            } else {
                if !transition.is_epsilon() && !busy.insert(c.busy_key()) {
                    continue;
                }
                if matches!(transition.kind, TransitionKind::Rule { .. }) && new_depth >= 0 {
                    new_depth += 1;
                }
            }

            self.closure_checking_stop_state(
                c,
                configs,
                busy,
                continue_collecting,
                full_ctx,
                new_depth,
                treat_eof_as_epsilon,
            );
        }
    }

    fn epsilon_target(
        &mut self,
        config: &AtnConfig,
        transition: &Transition,
        collect_predicates: bool,
        in_context: bool,
        full_ctx: bool,
        treat_eof_as_epsilon: bool,
    ) -> Option<AtnConfig> {
        match &transition.kind {
            TransitionKind::Rule { follow_state, .. } => {
                let new_context = self.store.singleton(config.context, *follow_state);
                Some(config.moved_with_context(transition.target, new_context))
            }
            TransitionKind::Precedence { precedence } => self.gated_transition(
                config,
                transition.target,
                &SemanticContext::Precedence {
                    precedence: *precedence,
                },
                collect_predicates && in_context,
                full_ctx,
            ),
            TransitionKind::Predicate {
                rule_index,
                pred_index,
                is_ctx_dependent,
            } => self.gated_transition(
                config,
                transition.target,
                &SemanticContext::Predicate {
                    rule_index: *rule_index,
                    pred_index: *pred_index,
                    is_ctx_dependent: *is_ctx_dependent,
                },
                collect_predicates && (!*is_ctx_dependent || in_context),
                full_ctx,
            ),
            TransitionKind::Action { .. } | TransitionKind::Epsilon { .. } => {
                Some(config.moved_to(transition.target))
            }
            TransitionKind::Atom { .. } | TransitionKind::Range { .. } | TransitionKind::Set { .. } => {
                // An explicit EOF edge acts like epsilon once the real EOF
                // has been consumed.
                (treat_eof_as_epsilon && transition.matches_eof())
                    .then(|| config.moved_to(transition.target))
            }
            TransitionKind::NotSet { .. } | TransitionKind::Wildcard => None,
        }
    }

    /// Predicate and precedence edges: evaluate now under full context (the
    /// stack tells us the predicate applies), otherwise carry the gate in
    /// the configuration.
    fn gated_transition(
        &mut self,
        config: &AtnConfig,
        target: StateNumber,
        gate: &SemanticContext,
        evaluate_or_collect: bool,
        full_ctx: bool,
    ) -> Option<AtnConfig> {
        if !evaluate_or_collect {
            return Some(config.moved_to(target));
        }
        if full_ctx {
            // Evaluate against the decision's entry position, then restore.
            let current = self.input.index();
            self.input.seek(self.start_index);
            let passes = gate.eval(self.evaluator);
            self.input.seek(current);
            return passes.then(|| config.moved_to(target));
        }
        let combined = SemanticContext::and(&config.semantic_context, gate);
        Some(config.moved_with_semantic(target, combined))
    }

    /// Best-effort recovery alternative for a dead end: a configuration
    /// that already matched the whole decision entry rule (syntactically
    /// valid), preferring ones whose predicates passed.
    fn syn_valid_or_sem_invalid_alt(&mut self, configs: &AtnConfigSet) -> usize {
        let (succeeded, failed) = self.split_by_semantic_validity(configs);
        let alt = self.alt_that_finished_decision_entry_rule(&succeeded);
        if alt != INVALID_ALT {
            return alt;
        }
        if !failed.is_empty() {
            let alt = self.alt_that_finished_decision_entry_rule(&failed);
            if alt != INVALID_ALT {
                return alt;
            }
        }
        INVALID_ALT
    }

    fn split_by_semantic_validity(
        &mut self,
        configs: &AtnConfigSet,
    ) -> (AtnConfigSet, AtnConfigSet) {
        let mut succeeded = AtnConfigSet::new(configs.full_ctx);
        let mut failed = AtnConfigSet::new(configs.full_ctx);
        for c in configs {
            if c.semantic_context.is_none() || c.semantic_context.eval(self.evaluator) {
                succeeded.add_unchecked(c.clone(), self.store, &mut self.merge_cache);
            } else {
                failed.add_unchecked(c.clone(), self.store, &mut self.merge_cache);
            }
        }
        (succeeded, failed)
    }

    fn alt_that_finished_decision_entry_rule(&self, configs: &AtnConfigSet) -> usize {
        let mut alts = IntervalSet::new();
        for c in configs {
            if c.outer_context_depth() > 0
                || (self.atn.state(c.state).is_rule_stop() && self.store.has_empty_path(c.context))
            {
                if let Ok(alt) = i32::try_from(c.alt) {
                    alts.add(alt);
                }
            }
        }
        alts.min_element()
            .and_then(|a| usize::try_from(a).ok())
            .unwrap_or(INVALID_ALT)
    }

    fn no_viable_alt(&mut self, dead_end: &AtnConfigSet) -> RecognitionError {
        RecognitionError::NoViableAlt {
            decision: self.dfa.decision,
            start_index: self.start_index,
            offending_token: self.input.lt(1).cloned(),
            dead_end: Box::new(dead_end.clone()),
        }
    }
}
