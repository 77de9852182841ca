//! # Prediction Modes and Conflict Analysis
//!
//! The three prediction strategies and the pure algorithms over
//! alternative-subset collections that decide when SLL must stop and when
//! LL has found a genuine ambiguity.
//!
//! ## Overview
//!
//! Conflict analysis projects a configuration set onto subsets of
//! alternatives keyed by `(state, context)`: configurations that agree on
//! both are indistinguishable by any further input, so their alternative
//! sets either resolve (some subset is a singleton) or conflict. Everything
//! here is a function of those `BitSet` collections, which keeps the
//! analysis independent of the simulator.

use crate::atn::Atn;
use crate::bitset::BitSet;
use crate::config::set::{AtnConfigSet, KeyDiscipline};
use crate::config::INVALID_ALT;
use crate::context::{ContextId, ContextStore};
use ahash::RandomState;
use hashbrown::HashMap;

/// How aggressively prediction trades certainty for speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredictionMode {
    /// Context-free prediction only; fastest, reports conflicts as errors
    /// that full LL might resolve.
    Sll,
    /// SLL with escalation to full-context prediction on conflict.
    #[default]
    Ll,
    /// Like `Ll`, but keeps simulating until ambiguities are exact: the
    /// reported set contains only truly ambiguous alternatives.
    LlExactAmbigDetection,
}

/// True when SLL simulation can stop at this configuration set: either
/// every configuration is stuck in a rule stop state, or the subsets
/// conflict with no state resolving to a single alternative.
///
/// Predicates are stripped before the subset projection so a pending gate
/// cannot mask a conflict.
pub fn has_sll_conflict_terminating_prediction<D: KeyDiscipline>(
    mode: PredictionMode,
    configs: &AtnConfigSet<D>,
    atn: &Atn,
    store: &mut ContextStore,
) -> bool {
    if all_configs_in_rule_stop_states(configs, atn) {
        return true;
    }
    let altsets;
    if mode == PredictionMode::Sll && configs.has_semantic_context {
        let stripped = configs.without_semantic_predicates(store);
        altsets = conflicting_alt_subsets(&stripped);
        return has_conflicting_alt_set(&altsets) && !has_state_associated_with_one_alt(&stripped);
    }
    altsets = conflicting_alt_subsets(configs);
    has_conflicting_alt_set(&altsets) && !has_state_associated_with_one_alt(configs)
}

/// True when any configuration sits in a rule stop state.
pub fn has_config_in_rule_stop_state<D: KeyDiscipline>(
    configs: &AtnConfigSet<D>,
    atn: &Atn,
) -> bool {
    configs.iter().any(|c| atn.state(c.state).is_rule_stop())
}

/// True when every configuration sits in a rule stop state.
pub fn all_configs_in_rule_stop_states<D: KeyDiscipline>(
    configs: &AtnConfigSet<D>,
    atn: &Atn,
) -> bool {
    configs.iter().all(|c| atn.state(c.state).is_rule_stop())
}

/// Project onto alternative subsets keyed by `(state, context)`.
pub fn conflicting_alt_subsets<D: KeyDiscipline>(configs: &AtnConfigSet<D>) -> Vec<BitSet> {
    let mut by_key: HashMap<(usize, ContextId), BitSet, RandomState> = HashMap::default();
    for c in configs {
        by_key
            .entry((c.state, c.context))
            .or_default()
            .set(c.alt);
    }
    by_key.into_values().collect()
}

/// Map each state to the alternatives predicted at it.
pub fn state_to_alt_map<D: KeyDiscipline>(
    configs: &AtnConfigSet<D>,
) -> HashMap<usize, BitSet, RandomState> {
    let mut map: HashMap<usize, BitSet, RandomState> = HashMap::default();
    for c in configs {
        map.entry(c.state).or_default().set(c.alt);
    }
    map
}

/// True when some state resolves to exactly one alternative.
pub fn has_state_associated_with_one_alt<D: KeyDiscipline>(configs: &AtnConfigSet<D>) -> bool {
    state_to_alt_map(configs)
        .values()
        .any(|alts| alts.cardinality() == 1)
}

/// Any subset with a single alternative?
#[must_use]
pub fn has_non_conflicting_alt_set(altsets: &[BitSet]) -> bool {
    altsets.iter().any(|alts| alts.cardinality() == 1)
}

/// Any subset with more than one alternative?
#[must_use]
pub fn has_conflicting_alt_set(altsets: &[BitSet]) -> bool {
    altsets.iter().any(|alts| alts.cardinality() > 1)
}

/// No subset resolves to a single alternative?
#[must_use]
pub fn all_subsets_conflict(altsets: &[BitSet]) -> bool {
    !has_non_conflicting_alt_set(altsets)
}

/// Every subset equal to the first?
#[must_use]
pub fn all_subsets_equal(altsets: &[BitSet]) -> bool {
    let mut iter = altsets.iter();
    let Some(first) = iter.next() else {
        return true;
    };
    iter.all(|alts| alts == first)
}

/// The union of all subsets.
#[must_use]
pub fn get_alts(altsets: &[BitSet]) -> BitSet {
    let mut all = BitSet::new();
    for alts in altsets {
        all.or(alts);
    }
    all
}

/// The lone alternative across every subset, or [`INVALID_ALT`].
#[must_use]
pub fn get_unique_alt(altsets: &[BitSet]) -> usize {
    let all = get_alts(altsets);
    if all.cardinality() == 1 {
        return all.min().unwrap_or(INVALID_ALT);
    }
    INVALID_ALT
}

/// Full-context termination test: take the minimum alternative of each
/// subset; if they all agree, that alternative is the prediction.
///
/// Every subset here is known to conflict (or be resolved), and the engine
/// always resolves conflicts to the minimum alternative, so once the minima
/// agree no amount of further lookahead changes the answer.
#[must_use]
pub fn resolves_to_just_one_viable_alt(altsets: &[BitSet]) -> usize {
    let mut viable = BitSet::new();
    for alts in altsets {
        if let Some(min) = alts.min() {
            viable.set(min);
        }
    }
    if viable.cardinality() == 1 {
        return viable.min().unwrap_or(INVALID_ALT);
    }
    INVALID_ALT
}
