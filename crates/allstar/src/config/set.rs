//! Configuration sets with pluggable equality.
//!
//! One container serves two disciplines. During closure the set merges
//! configurations that agree on `(state, alt, semantic_context)` by merging
//! their contexts ([`LookupKeys`]); for DFA-state identity every field
//! counts ([`ExactKeys`]). Parameterizing the set by discipline keeps the
//! two uses statically distinguishable instead of branching on a mode flag.

use super::{AtnConfig, INVALID_ALT};
use crate::bitset::BitSet;
use crate::context::{ContextStore, MergeCache};
use crate::error::RecognitionError;
use crate::semantic::SemanticContext;
use ahash::RandomState;
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::hash::{BuildHasher, Hash, Hasher};
use std::marker::PhantomData;

/// Deterministic hasher for config keys, stable across sets so frozen sets
/// can be compared and interned.
fn fixed_state() -> RandomState {
    RandomState::with_seeds(
        0x6a09_e667_f3bc_c908,
        0xbb67_ae85_84ca_a73b,
        0x3c6e_f372_fe94_f82b,
        0xa54f_f53a_5f1d_36f1,
    )
}

/// An equality/hash discipline over [`AtnConfig`].
pub trait KeyDiscipline {
    fn hash_config(config: &AtnConfig) -> u64;
    fn eq_config(a: &AtnConfig, b: &AtnConfig) -> bool;
}

/// Merge discipline: configurations are the same slot when state, alt, and
/// predicate gate agree; contexts of colliding adds are merged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupKeys;

impl KeyDiscipline for LookupKeys {
    fn hash_config(config: &AtnConfig) -> u64 {
        let mut h = fixed_state().build_hasher();
        config.state.hash(&mut h);
        config.alt.hash(&mut h);
        config.semantic_context.hash(&mut h);
        h.finish()
    }

    fn eq_config(a: &AtnConfig, b: &AtnConfig) -> bool {
        a.state == b.state && a.alt == b.alt && a.semantic_context == b.semantic_context
    }
}

/// Identity discipline: the full tuple, contexts and lexer payload included.
/// Used by the lexer simulator and for DFA-state equivalence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactKeys;

impl KeyDiscipline for ExactKeys {
    fn hash_config(config: &AtnConfig) -> u64 {
        let mut h = fixed_state().build_hasher();
        config.busy_key().hash(&mut h);
        h.finish()
    }

    fn eq_config(a: &AtnConfig, b: &AtnConfig) -> bool {
        a.busy_key() == b.busy_key()
    }
}

/// An insertion-ordered set of configurations under discipline `D`.
#[derive(Debug, Clone)]
pub struct AtnConfigSet<D: KeyDiscipline = LookupKeys> {
    configs: Vec<AtnConfig>,
    /// Discipline hash to indices of `configs`; collisions keep every entry
    /// so nothing is lost before the equality probe.
    lookup: HashMap<u64, SmallVec<[u32; 1]>, RandomState>,
    /// True when this set was built with full (LL) context.
    pub full_ctx: bool,
    read_only: bool,
    /// The single alternative of the set, or [`INVALID_ALT`].
    pub unique_alt: usize,
    /// Set by conflict analysis once computed.
    pub conflicting_alts: Option<BitSet>,
    pub has_semantic_context: bool,
    pub dips_into_outer_context: bool,
    _discipline: PhantomData<D>,
}

impl<D: KeyDiscipline> AtnConfigSet<D> {
    #[must_use]
    pub fn new(full_ctx: bool) -> Self {
        Self {
            configs: Vec::new(),
            lookup: HashMap::default(),
            full_ctx,
            read_only: false,
            unique_alt: INVALID_ALT,
            conflicting_alts: None,
            has_semantic_context: false,
            dips_into_outer_context: false,
            _discipline: PhantomData,
        }
    }

    /// Insert or merge a configuration.
    ///
    /// On a discipline hit the stored entry's context is merged with the
    /// incoming one (`root_is_wildcard = !full_ctx`), the outer-context
    /// depth is raised to the max of the two, and suppression flags are
    /// OR-ed; the call reports `false`. A fresh insert reports `true`.
    ///
    /// # Errors
    ///
    /// `IllegalState` when the set has been frozen by
    /// [`set_readonly`](Self::set_readonly).
    pub fn add(
        &mut self,
        config: AtnConfig,
        store: &mut ContextStore,
        merge_cache: &mut MergeCache,
    ) -> Result<bool, RecognitionError> {
        if self.read_only {
            return Err(RecognitionError::IllegalState(
                "cannot add a configuration to a read-only set".into(),
            ));
        }
        Ok(self.add_unchecked(config, store, merge_cache))
    }

    pub(crate) fn add_unchecked(
        &mut self,
        config: AtnConfig,
        store: &mut ContextStore,
        merge_cache: &mut MergeCache,
    ) -> bool {
        debug_assert!(!self.read_only);
        if !config.semantic_context.is_none() {
            self.has_semantic_context = true;
        }
        if config.outer_context_depth() > 0 {
            self.dips_into_outer_context = true;
        }
        let hash = D::hash_config(&config);
        if let Some(bucket) = self.lookup.get(&hash) {
            for &i in bucket {
                let existing = &self.configs[i as usize];
                if D::eq_config(existing, &config) {
                    let merged = store.merge(
                        existing.context,
                        config.context,
                        !self.full_ctx,
                        merge_cache,
                    );
                    let existing = &mut self.configs[i as usize];
                    let depth = existing
                        .outer_context_depth()
                        .max(config.outer_context_depth());
                    existing.set_outer_context_depth(depth);
                    if config.is_precedence_filter_suppressed() {
                        existing.set_precedence_filter_suppressed(true);
                    }
                    existing.context = merged;
                    return false;
                }
            }
        }
        if self.configs.is_empty() {
            self.unique_alt = config.alt;
        } else if self.unique_alt != config.alt {
            self.unique_alt = INVALID_ALT;
        }
        let index = u32::try_from(self.configs.len()).expect("config set overflow");
        self.lookup.entry(hash).or_default().push(index);
        self.configs.push(config);
        true
    }

    /// Add every configuration of `other`.
    ///
    /// # Errors
    ///
    /// `IllegalState` when the set is read-only.
    pub fn add_all(
        &mut self,
        other: &Self,
        store: &mut ContextStore,
        merge_cache: &mut MergeCache,
    ) -> Result<(), RecognitionError> {
        for c in &other.configs {
            self.add(c.clone(), store, merge_cache)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Configurations in insertion order.
    #[must_use]
    pub fn configs(&self) -> &[AtnConfig] {
        &self.configs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AtnConfig> {
        self.configs.iter()
    }

    /// The set of alternatives present.
    #[must_use]
    pub fn alts(&self) -> BitSet {
        self.configs.iter().map(|c| c.alt).collect()
    }

    /// The non-trivial predicate gates, one per configuration that has one.
    #[must_use]
    pub fn predicates(&self) -> Vec<SemanticContext> {
        self.configs
            .iter()
            .filter(|c| !c.semantic_context.is_none())
            .map(|c| c.semantic_context.clone())
            .collect()
    }

    /// A copy with every predicate gate stripped, for conflict analysis
    /// that must ignore predicates.
    #[must_use]
    pub fn without_semantic_predicates(&self, store: &mut ContextStore) -> Self {
        let mut dup = Self::new(self.full_ctx);
        let mut cache = MergeCache::default();
        for c in &self.configs {
            dup.add_unchecked(c.with_semantic(SemanticContext::None), store, &mut cache);
        }
        dup
    }

    /// Freeze (or thaw) the set. Freezing drops the lookup table; a frozen
    /// set rejects further adds.
    pub fn set_readonly(&mut self, read_only: bool) {
        self.read_only = read_only;
        if read_only {
            self.lookup = HashMap::default();
        }
    }

    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.read_only
    }

    /// Reinterpret the set under another discipline. Elements and flags
    /// carry over verbatim and the lookup table starts empty, so this is
    /// meant for sets whose add phase is over (lexer reach sets headed into
    /// the DFA cache).
    #[must_use]
    pub fn with_discipline<E: KeyDiscipline>(self) -> AtnConfigSet<E> {
        AtnConfigSet {
            configs: self.configs,
            lookup: HashMap::default(),
            full_ctx: self.full_ctx,
            read_only: self.read_only,
            unique_alt: self.unique_alt,
            conflicting_alts: self.conflicting_alts,
            has_semantic_context: self.has_semantic_context,
            dips_into_outer_context: self.dips_into_outer_context,
            _discipline: PhantomData,
        }
    }

    /// Discipline-independent hash of the element list, for interning frozen
    /// sets.
    #[must_use]
    pub fn identity_hash(&self) -> u64 {
        let state = fixed_state();
        let mut h = state.build_hasher();
        self.full_ctx.hash(&mut h);
        for c in &self.configs {
            ExactKeys::hash_config(c).hash(&mut h);
        }
        h.finish()
    }
}

impl<D: KeyDiscipline> Default for AtnConfigSet<D> {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Element-wise full-tuple equality in insertion order, plus the context
/// mode. This is the equivalence DFA-state interning uses.
impl<D: KeyDiscipline> PartialEq for AtnConfigSet<D> {
    fn eq(&self, other: &Self) -> bool {
        self.full_ctx == other.full_ctx
            && self.configs.len() == other.configs.len()
            && self
                .configs
                .iter()
                .zip(&other.configs)
                .all(|(a, b)| ExactKeys::eq_config(a, b))
    }
}

impl<D: KeyDiscipline> Eq for AtnConfigSet<D> {}

impl<'a, D: KeyDiscipline> IntoIterator for &'a AtnConfigSet<D> {
    type Item = &'a AtnConfig;
    type IntoIter = std::slice::Iter<'a, AtnConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.configs.iter()
    }
}
