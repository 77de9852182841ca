//! # Allstar
//!
//! An adaptive LL(\*) prediction engine: the runtime core of a parser
//! generator's target library. Given a grammar compiled to an Augmented
//! Transition Network (ATN) and a stream of tokens, the engine decides at
//! each decision point which alternative production to take — memoizing
//! decisions into per-decision DFAs so hot paths run at automaton speed
//! while cold or ambiguous paths fall back to ATN simulation, escalating
//! from context-free SLL prediction to full context-sensitive LL prediction
//! when conflicts demand it.
//!
//! ## Overview
//!
//! The crate is layered leaves-first:
//!
//! - [`bitset`] / [`interval`] — alternative sets and token-type sets
//! - [`atn`] — the immutable grammar graph and its serialized form
//! - [`context`] — interned call-stack DAGs shared across configurations
//! - [`semantic`] — predicate and precedence gates
//! - [`config`] — configurations and the two-discipline configuration set
//! - [`dfa`] — the shared, additively grown per-decision DFA cache
//! - [`prediction`] — conflict and ambiguity analysis over alt subsets
//! - [`simulator`] — the parser and lexer engines tying it all together
//!
//! ## Quick start
//!
//! ```rust
//! use allstar::semantic::AllTrueEvaluator;
//! use allstar::simulator::ParserAtnSimulator;
//! use allstar::testing::{RecordingListener, hello_grammar, hello_tokens};
//! use allstar::token::ListTokenStream;
//! use std::sync::Arc;
//!
//! let sim = ParserAtnSimulator::new(Arc::new(hello_grammar()));
//! let mut input = ListTokenStream::from_types(&[hello_tokens::HELLO, hello_tokens::ID]);
//! let mut listener = RecordingListener::default();
//!
//! let alt = sim
//!     .adaptive_predict(&mut input, 0, None, &mut AllTrueEvaluator, &mut listener)
//!     .expect("decision 0 is viable on this input");
//! assert_eq!(alt, 1);
//! ```
//!
//! ## Sharing model
//!
//! A single parser runs sequentially, but any number of parser instances
//! may share one ATN, one context cache, and one set of decision DFAs (see
//! [`simulator::ParserAtnSimulator::with_shared`]). Shared structures grow
//! additively and are never mutated in place, so readers see a consistent
//! automaton without coordination beyond the internal locks.

pub mod atn;
pub mod bitset;
pub mod config;
pub mod context;
pub mod dfa;
pub mod error;
pub mod interval;
pub mod prediction;
pub mod semantic;
pub mod simulator;
pub mod testing;
pub mod token;

// Re-export the types most callers touch.
pub use atn::{Atn, AtnState, AtnStateKind, GrammarKind, Transition, TransitionKind};
pub use bitset::BitSet;
pub use config::set::{AtnConfigSet, ExactKeys, LookupKeys};
pub use config::{AtnConfig, INVALID_ALT};
pub use context::{ContextId, ContextStore, EMPTY_CONTEXT, RuleContext};
pub use dfa::{Dfa, DfaState, DfaStateId};
pub use error::{ConsoleErrorListener, ErrorListener, RecognitionError};
pub use interval::{Interval, IntervalSet};
pub use prediction::PredictionMode;
pub use semantic::{PredicateEvaluator, SemanticContext};
pub use simulator::{LexerAtnSimulator, ParserAtnSimulator};
pub use token::{CharStream, ListTokenStream, StringCharStream, Token, TokenStream};
