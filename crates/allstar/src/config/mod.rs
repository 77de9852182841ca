//! # ATN Configurations
//!
//! A configuration is one possible parse position: an ATN state, the
//! alternative being tracked, the call-stack context that got us there, and
//! the semantic predicate gate accumulated along the way.
//!
//! Lexer prediction reuses the same struct with two extra fields (the action
//! executor of the matched rule and the non-greedy marker); they default to
//! inert values for parser configurations.

pub mod set;

use crate::atn::StateNumber;
use crate::context::ContextId;
use crate::semantic::SemanticContext;
use crate::simulator::lexer::LexerActionExecutor;
use std::sync::Arc;

/// Alternative number meaning "no alternative" / "conflict".
pub const INVALID_ALT: usize = 0;

/// Bit of [`AtnConfig::outer_bits`] recording precedence-filter suppression;
/// the low bits count how far closure reached past the outermost context.
const SUPPRESS_PRECEDENCE_FILTER: u32 = 0x4000_0000;

/// One element of an [`set::AtnConfigSet`].
///
/// `state` and `alt` never change after creation; `context` is replaced
/// when a set merges an incoming duplicate into a stored entry.
#[derive(Debug, Clone)]
pub struct AtnConfig {
    pub state: StateNumber,
    pub alt: usize,
    pub context: ContextId,
    pub semantic_context: SemanticContext,
    outer_bits: u32,
    /// Lexer only: actions to run if this configuration wins the match.
    pub lexer_executor: Option<Arc<LexerActionExecutor>>,
    /// Lexer only: set when closure traversed a non-greedy decision.
    pub passed_through_non_greedy: bool,
}

impl AtnConfig {
    #[must_use]
    pub fn new(state: StateNumber, alt: usize, context: ContextId) -> Self {
        Self {
            state,
            alt,
            context,
            semantic_context: SemanticContext::None,
            outer_bits: 0,
            lexer_executor: None,
            passed_through_non_greedy: false,
        }
    }

    /// The same configuration at a different state (epsilon step).
    #[must_use]
    pub fn moved_to(&self, state: StateNumber) -> Self {
        let mut c = self.clone();
        c.state = state;
        c
    }

    /// Step to `state` replacing the context (rule call and return edges).
    #[must_use]
    pub fn moved_with_context(&self, state: StateNumber, context: ContextId) -> Self {
        let mut c = self.moved_to(state);
        c.context = context;
        c
    }

    /// Step to `state` replacing the predicate gate.
    #[must_use]
    pub fn moved_with_semantic(&self, state: StateNumber, semantic: SemanticContext) -> Self {
        let mut c = self.moved_to(state);
        c.semantic_context = semantic;
        c
    }

    #[must_use]
    pub fn with_semantic(&self, semantic: SemanticContext) -> Self {
        let mut c = self.clone();
        c.semantic_context = semantic;
        c
    }

    #[must_use]
    pub fn with_context(&self, context: ContextId) -> Self {
        let mut c = self.clone();
        c.context = context;
        c
    }

    /// How many rule-stop pops escaped the decision's own start context.
    #[must_use]
    pub const fn outer_context_depth(&self) -> u32 {
        self.outer_bits & !SUPPRESS_PRECEDENCE_FILTER
    }

    pub const fn increment_outer_context_depth(&mut self) {
        let suppress = self.outer_bits & SUPPRESS_PRECEDENCE_FILTER;
        self.outer_bits = suppress | (self.outer_context_depth() + 1);
    }

    pub(crate) const fn set_outer_context_depth(&mut self, depth: u32) {
        let suppress = self.outer_bits & SUPPRESS_PRECEDENCE_FILTER;
        self.outer_bits = suppress | depth;
    }

    #[must_use]
    pub const fn is_precedence_filter_suppressed(&self) -> bool {
        self.outer_bits & SUPPRESS_PRECEDENCE_FILTER != 0
    }

    pub const fn set_precedence_filter_suppressed(&mut self, suppressed: bool) {
        if suppressed {
            self.outer_bits |= SUPPRESS_PRECEDENCE_FILTER;
        } else {
            self.outer_bits &= !SUPPRESS_PRECEDENCE_FILTER;
        }
    }

    /// Key for closure busy-sets: the full identity of the configuration,
    /// outer-context depth excluded.
    #[must_use]
    pub fn busy_key(&self) -> ConfigKey {
        ConfigKey {
            state: self.state,
            alt: self.alt,
            context: self.context,
            semantic: self.semantic_context.clone(),
            precedence_filter_suppressed: self.is_precedence_filter_suppressed(),
            lexer_executor: self.lexer_executor.clone(),
            passed_through_non_greedy: self.passed_through_non_greedy,
        }
    }
}

/// Hashable full-tuple identity of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    pub state: StateNumber,
    pub alt: usize,
    pub context: ContextId,
    pub semantic: SemanticContext,
    pub precedence_filter_suppressed: bool,
    pub lexer_executor: Option<Arc<LexerActionExecutor>>,
    pub passed_through_non_greedy: bool,
}
