//! # Per-Decision DFA Cache
//!
//! The memoization layer that makes hot decisions fast: one lazily built
//! DFA per decision, with edge arrays indexed by token type so the hot path
//! never hashes.
//!
//! ## Sharing and mutation discipline
//!
//! Multiple parser instances may drive the same `Dfa` concurrently. All
//! mutation is additive: states and edges are installed but never changed
//! or removed, and an accept state's outcome is fixed before the state is
//! published. Internally a `RwLock` guards the state arena; simulators read
//! through short-lived read locks and install under the write lock, where a
//! racing insert resolves to the first entry.
//!
//! Edges are indexed by `token_type + 1` so EOF (−1) lands at slot 0.

use crate::atn::StateNumber;
use crate::config::set::AtnConfigSet;
use crate::semantic::SemanticContext;
use crate::simulator::lexer::LexerActionExecutor;
use ahash::RandomState;
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::sync::{Arc, RwLock};

/// Index of a state within one [`Dfa`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DfaStateId(u32);

/// Sentinel for the error sink: installed on edges that lead nowhere so the
/// miss is remembered too.
pub const ERROR_STATE: DfaStateId = DfaStateId(u32::MAX);

impl DfaStateId {
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.0 == u32::MAX
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A predicate guarding an alternative at an accept state.
#[derive(Debug, Clone)]
pub struct PredPrediction {
    pub pred: SemanticContext,
    pub alt: usize,
}

/// Outcome summary of a DFA state, cheap to copy out of the lock.
#[derive(Debug, Clone, Copy)]
pub struct AcceptInfo {
    pub is_accept: bool,
    pub prediction: usize,
    pub requires_full_context: bool,
    pub has_predicates: bool,
}

/// One memoized simulation state: a frozen configuration set plus the
/// decision outcome reached from it.
#[derive(Debug)]
pub struct DfaState {
    pub configs: Arc<AtnConfigSet>,
    edges: Vec<Option<DfaStateId>>,
    pub is_accept: bool,
    /// Predicted alternative at an accept state, [`crate::config::INVALID_ALT`]
    /// otherwise.
    pub prediction: usize,
    /// Present when several predicates guard this state; prediction then
    /// requires evaluating them against the current input position.
    pub predicates: Option<Vec<PredPrediction>>,
    pub requires_full_context: bool,
    /// Lexer accept states: the actions of the winning rule.
    pub lexer_executor: Option<Arc<LexerActionExecutor>>,
}

impl DfaState {
    #[must_use]
    pub fn new(configs: AtnConfigSet) -> Self {
        let mut configs = configs;
        configs.set_readonly(true);
        Self {
            configs: Arc::new(configs),
            edges: Vec::new(),
            is_accept: false,
            prediction: crate::config::INVALID_ALT,
            predicates: None,
            requires_full_context: false,
            lexer_executor: None,
        }
    }
}

#[derive(Debug, Default)]
struct DfaInner {
    states: Vec<DfaState>,
    /// Configs-hash to candidate ids; equality probe resolves collisions.
    table: HashMap<u64, SmallVec<[DfaStateId; 1]>, RandomState>,
    s0: Option<DfaStateId>,
    /// Precedence DFAs: one start state per precedence level.
    precedence_s0: Vec<Option<DfaStateId>>,
}

/// The DFA of a single decision.
#[derive(Debug)]
pub struct Dfa {
    pub decision: usize,
    pub atn_start_state: StateNumber,
    precedence_dfa: bool,
    inner: RwLock<DfaInner>,
}

impl Dfa {
    #[must_use]
    pub fn new(decision: usize, atn_start_state: StateNumber, precedence_dfa: bool) -> Self {
        Self {
            decision,
            atn_start_state,
            precedence_dfa,
            inner: RwLock::new(DfaInner::default()),
        }
    }

    #[must_use]
    pub const fn is_precedence_dfa(&self) -> bool {
        self.precedence_dfa
    }

    #[must_use]
    pub fn s0(&self) -> Option<DfaStateId> {
        self.read().s0
    }

    pub fn set_s0(&self, id: DfaStateId) {
        self.write().s0 = Some(id);
    }

    #[must_use]
    pub fn precedence_start_state(&self, precedence: u32) -> Option<DfaStateId> {
        debug_assert!(self.precedence_dfa);
        *self
            .read()
            .precedence_s0
            .get(precedence as usize)
            .unwrap_or(&None)
    }

    pub fn set_precedence_start_state(&self, precedence: u32, id: DfaStateId) {
        debug_assert!(self.precedence_dfa);
        let mut inner = self.write();
        let slot = precedence as usize;
        if inner.precedence_s0.len() <= slot {
            inner.precedence_s0.resize(slot + 1, None);
        }
        inner.precedence_s0[slot] = Some(id);
    }

    /// Intern `state` by its configuration set. A concurrent insert of an
    /// equal state wins and the argument is discarded.
    pub fn add_state(&self, state: DfaState) -> DfaStateId {
        let hash = state.configs.identity_hash();
        let mut inner = self.write();
        if let Some(bucket) = inner.table.get(&hash) {
            for &id in bucket {
                if *inner.states[id.index()].configs == *state.configs {
                    return id;
                }
            }
        }
        let id = DfaStateId(u32::try_from(inner.states.len()).expect("DFA arena overflow"));
        inner.states.push(state);
        inner.table.entry(hash).or_default().push(id);
        id
    }

    /// The target of `from` on `t`, if one was installed.
    #[must_use]
    pub fn edge(&self, from: DfaStateId, t: i32) -> Option<DfaStateId> {
        let slot = usize::try_from(t + 1).ok()?;
        let inner = self.read();
        *inner.states[from.index()].edges.get(slot)?
    }

    /// Install `from --t--> to`. Later installs of the same edge are no-ops,
    /// keeping the first published target.
    pub fn set_edge(&self, from: DfaStateId, t: i32, to: DfaStateId) {
        let Ok(slot) = usize::try_from(t + 1) else {
            return;
        };
        let mut inner = self.write();
        let edges = &mut inner.states[from.index()].edges;
        if edges.len() <= slot {
            edges.resize(slot + 1, None);
        }
        if edges[slot].is_none() {
            edges[slot] = Some(to);
        }
    }

    /// The frozen configuration set of a state.
    #[must_use]
    pub fn configs(&self, id: DfaStateId) -> Arc<AtnConfigSet> {
        Arc::clone(&self.read().states[id.index()].configs)
    }

    #[must_use]
    pub fn accept_info(&self, id: DfaStateId) -> AcceptInfo {
        let inner = self.read();
        let state = &inner.states[id.index()];
        AcceptInfo {
            is_accept: state.is_accept,
            prediction: state.prediction,
            requires_full_context: state.requires_full_context,
            has_predicates: state.predicates.is_some(),
        }
    }

    #[must_use]
    pub fn predicates(&self, id: DfaStateId) -> Option<Vec<PredPrediction>> {
        self.read().states[id.index()].predicates.clone()
    }

    #[must_use]
    pub fn lexer_executor(&self, id: DfaStateId) -> Option<Arc<LexerActionExecutor>> {
        self.read().states[id.index()].lexer_executor.clone()
    }

    #[must_use]
    pub fn state_count(&self) -> usize {
        self.read().states.len()
    }

    /// Number of installed (non-error) outgoing edges, for diagnostics.
    #[must_use]
    pub fn edge_count(&self, id: DfaStateId) -> usize {
        self.read().states[id.index()]
            .edges
            .iter()
            .filter(|e| e.is_some_and(|t| !t.is_error()))
            .count()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DfaInner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DfaInner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
