//! # ATN Simulators
//!
//! The engines that drive closure, reach, conflict detection, and DFA
//! caching: [`parser::ParserAtnSimulator`] for decision prediction and
//! [`lexer::LexerAtnSimulator`] for token matching.
//!
//! Both share the same skeleton: walk the decision's DFA as far as edges
//! exist, and on a miss compute the next configuration set by ATN
//! simulation, intern it as a DFA state, install the edge, and continue.
//! The shared pieces (the context store handle, config sets, the DFA cache)
//! live in their own modules; what differs is the closure discipline and
//! the accept condition.

pub mod lexer;
pub mod parser;

pub use lexer::{LexerAtnSimulator, LexerHost, LexerMatch};
pub use parser::ParserAtnSimulator;
