//! # Prediction Contexts
//!
//! The call-stack representation shared across ATN configurations: a DAG of
//! return states with a process-wide `EMPTY` sentinel, unary chains, and
//! merged n-ary forks.
//!
//! ## Representation
//!
//! Nodes live in a [`ContextStore`] arena and refer to each other by
//! [`ContextId`] index, never by pointer. Every node is interned on
//! creation: children are always interned before their parents, so shallow
//! equality of a node's fields implies deep structural equality of the whole
//! stack set, and equal contexts share one id. That gives the two properties
//! the simulator leans on:
//!
//! - `merge(a, a) == a`, and `merge(a, b) == merge(b, a)`, as id equality;
//! - visited sets during closure can key on the id alone.
//!
//! The store is the shared prediction-context cache of the engine. A parser
//! locks it for the duration of one prediction (see
//! [`crate::simulator::parser`]); contexts are created and merged
//! monotonically and never mutated after publication.

use crate::atn::{Atn, StateNumber, TransitionKind};
use ahash::RandomState;
use hashbrown::HashMap;
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Return state marking the bottom of a stack (`$`); sorts after every real
/// state number.
pub const EMPTY_RETURN_STATE: usize = usize::MAX;

/// Arena index of an interned context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

/// The interned empty context (`$` / no known caller).
pub const EMPTY_CONTEXT: ContextId = ContextId(0);

impl ContextId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the context DAG.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ContextNode {
    Empty,
    Singleton {
        parent: ContextId,
        return_state: usize,
    },
    /// Parallel arms sorted by return state; `EMPTY_RETURN_STATE` last.
    /// Always at least two arms; a one-arm array is canonicalized to a
    /// singleton on creation.
    Array {
        parents: SmallVec<[ContextId; 2]>,
        return_states: SmallVec<[usize; 2]>,
    },
}

/// Memo table for [`ContextStore::merge`], keyed by operand pair.
pub type MergeCache = HashMap<(ContextId, ContextId), ContextId, RandomState>;

/// Minimal parser invocation context: the chain of rule calls that led to
/// the current decision. `invoking_state` is `None` at the outermost rule.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub parent: Option<Arc<RuleContext>>,
    pub invoking_state: Option<StateNumber>,
    pub rule_index: usize,
}

impl RuleContext {
    #[must_use]
    pub const fn root(rule_index: usize) -> Self {
        Self {
            parent: None,
            invoking_state: None,
            rule_index,
        }
    }

    #[must_use]
    pub fn child(parent: Arc<RuleContext>, invoking_state: StateNumber, rule_index: usize) -> Self {
        Self {
            parent: Some(parent),
            invoking_state: Some(invoking_state),
            rule_index,
        }
    }
}

/// Arena and intern table for prediction contexts.
///
/// This is the engine's shared context cache: all simulators that share a
/// DFA must also share its store, because configuration sets frozen into DFA
/// states hold ids into it.
#[derive(Debug)]
pub struct ContextStore {
    nodes: Vec<ContextNode>,
    table: HashMap<ContextNode, ContextId, RandomState>,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore {
    #[must_use]
    pub fn new() -> Self {
        let mut store = Self {
            nodes: Vec::with_capacity(64),
            table: HashMap::default(),
        };
        store.nodes.push(ContextNode::Empty);
        store.table.insert(ContextNode::Empty, EMPTY_CONTEXT);
        store
    }

    /// Number of interned contexts, the empty context included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false // the empty context is always present
    }

    fn intern(&mut self, node: ContextNode) -> ContextId {
        if let Some(&id) = self.table.get(&node) {
            return id;
        }
        let id = ContextId(u32::try_from(self.nodes.len()).expect("context arena overflow"));
        self.nodes.push(node.clone());
        self.table.insert(node, id);
        id
    }

    /// Intern a one-frame context. `(EMPTY, EMPTY_RETURN_STATE)` collapses
    /// to the empty context.
    pub fn singleton(&mut self, parent: ContextId, return_state: usize) -> ContextId {
        if return_state == EMPTY_RETURN_STATE && parent == EMPTY_CONTEXT {
            return EMPTY_CONTEXT;
        }
        self.intern(ContextNode::Singleton {
            parent,
            return_state,
        })
    }

    /// Intern an n-ary fork from `(parent, return_state)` arms sorted by
    /// return state. One-arm input canonicalizes to a singleton.
    fn array_from_arms(&mut self, arms: &[(ContextId, usize)]) -> ContextId {
        debug_assert!(
            arms.windows(2).all(|w| w[0].1 < w[1].1),
            "array arms must be strictly sorted by return state"
        );
        match arms {
            [] => EMPTY_CONTEXT,
            [(parent, return_state)] => self.singleton(*parent, *return_state),
            _ => self.intern(ContextNode::Array {
                parents: arms.iter().map(|a| a.0).collect(),
                return_states: arms.iter().map(|a| a.1).collect(),
            }),
        }
    }

    /// Number of parallel `(parent, return_state)` arms. The empty context
    /// reports one arm, its `$` arm.
    #[must_use]
    pub fn arm_count(&self, id: ContextId) -> usize {
        match &self.nodes[id.index()] {
            ContextNode::Empty | ContextNode::Singleton { .. } => 1,
            ContextNode::Array { return_states, .. } => return_states.len(),
        }
    }

    /// Return state of arm `i`.
    #[must_use]
    pub fn return_state(&self, id: ContextId, i: usize) -> usize {
        match &self.nodes[id.index()] {
            ContextNode::Empty => EMPTY_RETURN_STATE,
            ContextNode::Singleton { return_state, .. } => {
                debug_assert_eq!(i, 0);
                *return_state
            }
            ContextNode::Array { return_states, .. } => return_states[i],
        }
    }

    /// Parent of arm `i`. For the `$` arm this is the empty context and must
    /// not be popped further.
    #[must_use]
    pub fn parent(&self, id: ContextId, i: usize) -> ContextId {
        match &self.nodes[id.index()] {
            ContextNode::Empty => EMPTY_CONTEXT,
            ContextNode::Singleton { parent, .. } => {
                debug_assert_eq!(i, 0);
                *parent
            }
            ContextNode::Array { parents, .. } => parents[i],
        }
    }

    /// True when one of the represented stacks bottoms out here (`$`).
    #[must_use]
    pub fn has_empty_path(&self, id: ContextId) -> bool {
        let last = self.arm_count(id) - 1;
        self.return_state(id, last) == EMPTY_RETURN_STATE
    }

    fn arms(&self, id: ContextId) -> SmallVec<[(ContextId, usize); 2]> {
        match &self.nodes[id.index()] {
            ContextNode::Empty => smallvec![(EMPTY_CONTEXT, EMPTY_RETURN_STATE)],
            ContextNode::Singleton {
                parent,
                return_state,
            } => smallvec![(*parent, *return_state)],
            ContextNode::Array {
                parents,
                return_states,
            } => parents
                .iter()
                .copied()
                .zip(return_states.iter().copied())
                .collect(),
        }
    }

    fn is_singleton_like(&self, id: ContextId) -> bool {
        matches!(
            self.nodes[id.index()],
            ContextNode::Empty | ContextNode::Singleton { .. }
        )
    }

    /// Merge two contexts as stack sets.
    ///
    /// Under `root_is_wildcard` (SLL) the empty context absorbs everything;
    /// under full context (LL) it participates as the distinguished `$` arm
    /// that sorts last. The result is interned, so merging preserves id
    /// equality for structurally equal outcomes, and `merge(a, a)` is `a`
    /// without touching the cache.
    pub fn merge(
        &mut self,
        a: ContextId,
        b: ContextId,
        root_is_wildcard: bool,
        cache: &mut MergeCache,
    ) -> ContextId {
        if a == b {
            return a;
        }
        if let Some(&m) = cache.get(&(a, b)).or_else(|| cache.get(&(b, a))) {
            return m;
        }
        let merged = if self.is_singleton_like(a) && self.is_singleton_like(b) {
            self.merge_singletons(a, b, root_is_wildcard, cache)
        } else if root_is_wildcard && (a == EMPTY_CONTEXT || b == EMPTY_CONTEXT) {
            EMPTY_CONTEXT
        } else {
            self.merge_arrays(a, b, root_is_wildcard, cache)
        };
        cache.insert((a, b), merged);
        merged
    }

    fn merge_singletons(
        &mut self,
        a: ContextId,
        b: ContextId,
        root_is_wildcard: bool,
        cache: &mut MergeCache,
    ) -> ContextId {
        // Root handling first: the wildcard root absorbs, the full-context
        // root becomes an explicit `$` arm.
        if root_is_wildcard {
            if a == EMPTY_CONTEXT || b == EMPTY_CONTEXT {
                return EMPTY_CONTEXT;
            }
        } else if a == EMPTY_CONTEXT || b == EMPTY_CONTEXT {
            if a == EMPTY_CONTEXT && b == EMPTY_CONTEXT {
                return EMPTY_CONTEXT;
            }
            let other = if a == EMPTY_CONTEXT { b } else { a };
            let (parent, return_state) = self.arms(other)[0];
            if return_state == EMPTY_RETURN_STATE {
                return self.array_from_arms(&[(parent, EMPTY_RETURN_STATE)]);
            }
            return self.array_from_arms(&[
                (parent, return_state),
                (EMPTY_CONTEXT, EMPTY_RETURN_STATE),
            ]);
        }

        let (a_parent, a_return) = self.arms(a)[0];
        let (b_parent, b_return) = self.arms(b)[0];
        if a_return == b_return {
            let parent = self.merge(a_parent, b_parent, root_is_wildcard, cache);
            // Interning collapses "result equals an operand" to id reuse.
            return self.singleton(parent, a_return);
        }
        let arms = if a_return < b_return {
            [(a_parent, a_return), (b_parent, b_return)]
        } else {
            [(b_parent, b_return), (a_parent, a_return)]
        };
        self.array_from_arms(&arms)
    }

    fn merge_arrays(
        &mut self,
        a: ContextId,
        b: ContextId,
        root_is_wildcard: bool,
        cache: &mut MergeCache,
    ) -> ContextId {
        let left = self.arms(a);
        let right = self.arms(b);
        let mut merged: SmallVec<[(ContextId, usize); 4]> =
            SmallVec::with_capacity(left.len() + right.len());
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            let (a_parent, a_return) = left[i];
            let (b_parent, b_return) = right[j];
            if a_return == b_return {
                let parent = if a_parent == b_parent {
                    a_parent
                } else {
                    self.merge(a_parent, b_parent, root_is_wildcard, cache)
                };
                merged.push((parent, a_return));
                i += 1;
                j += 1;
            } else if a_return < b_return {
                merged.push((a_parent, a_return));
                i += 1;
            } else {
                merged.push((b_parent, b_return));
                j += 1;
            }
        }
        merged.extend_from_slice(&left[i..]);
        merged.extend_from_slice(&right[j..]);
        self.array_from_arms(&merged)
    }

    /// Build the context of a parser's current invocation chain, ending at
    /// the empty context.
    pub fn from_rule_context(&mut self, atn: &Atn, ctx: Option<&RuleContext>) -> ContextId {
        let Some(ctx) = ctx else {
            return EMPTY_CONTEXT;
        };
        let Some(invoking_state) = ctx.invoking_state else {
            return EMPTY_CONTEXT;
        };
        let parent = self.from_rule_context(atn, ctx.parent.as_deref());
        let state = atn.state(invoking_state);
        let follow = state
            .transitions
            .first()
            .and_then(|t| match &t.kind {
                TransitionKind::Rule { follow_state, .. } => Some(*follow_state),
                _ => None,
            })
            .unwrap_or(EMPTY_RETURN_STATE);
        self.singleton(parent, follow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atn::{AtnStateKind, GrammarKind, Transition};

    fn store() -> (ContextStore, MergeCache) {
        (ContextStore::new(), MergeCache::default())
    }

    #[test]
    fn test_singleton_canonicalizes_empty() {
        let (mut s, _) = store();
        assert_eq!(s.singleton(EMPTY_CONTEXT, EMPTY_RETURN_STATE), EMPTY_CONTEXT);
        assert_ne!(s.singleton(EMPTY_CONTEXT, 3), EMPTY_CONTEXT);
    }

    #[test]
    fn test_interning_shares_ids() {
        let (mut s, _) = store();
        let a = s.singleton(EMPTY_CONTEXT, 3);
        let b = s.singleton(EMPTY_CONTEXT, 3);
        assert_eq!(a, b);
        let c = s.singleton(a, 7);
        let d = s.singleton(b, 7);
        assert_eq!(c, d);
    }

    #[test]
    fn test_merge_identical_is_identity() {
        let (mut s, mut cache) = store();
        let a = s.singleton(EMPTY_CONTEXT, 3);
        assert_eq!(s.merge(a, a, true, &mut cache), a);
        assert_eq!(s.merge(a, a, false, &mut cache), a);
    }

    #[test]
    fn test_merge_distinct_returns_sorted_array() {
        let (mut s, mut cache) = store();
        let a = s.singleton(EMPTY_CONTEXT, 3);
        let b = s.singleton(EMPTY_CONTEXT, 4);
        let m = s.merge(a, b, true, &mut cache);
        assert_eq!(s.arm_count(m), 2);
        assert_eq!(s.return_state(m, 0), 3);
        assert_eq!(s.return_state(m, 1), 4);
        // Commutativity up to interning.
        let mut cache2 = MergeCache::default();
        assert_eq!(s.merge(b, a, true, &mut cache2), m);
    }

    #[test]
    fn test_merge_same_return_merges_parents() {
        let (mut s, mut cache) = store();
        let p1 = s.singleton(EMPTY_CONTEXT, 10);
        let p2 = s.singleton(EMPTY_CONTEXT, 11);
        let a = s.singleton(p1, 3);
        let b = s.singleton(p2, 3);
        let m = s.merge(a, b, true, &mut cache);
        assert_eq!(s.arm_count(m), 1);
        assert_eq!(s.return_state(m, 0), 3);
        let parent = s.parent(m, 0);
        assert_eq!(s.arm_count(parent), 2);
        assert_eq!(s.return_state(parent, 0), 10);
        assert_eq!(s.return_state(parent, 1), 11);
    }

    #[test]
    fn test_wildcard_root_absorbs() {
        let (mut s, mut cache) = store();
        let a = s.singleton(EMPTY_CONTEXT, 3);
        assert_eq!(s.merge(a, EMPTY_CONTEXT, true, &mut cache), EMPTY_CONTEXT);
        assert_eq!(s.merge(EMPTY_CONTEXT, a, true, &mut cache), EMPTY_CONTEXT);
    }

    #[test]
    fn test_full_context_root_keeps_empty_arm() {
        let (mut s, mut cache) = store();
        let a = s.singleton(EMPTY_CONTEXT, 3);
        let m = s.merge(a, EMPTY_CONTEXT, false, &mut cache);
        assert_eq!(s.arm_count(m), 2);
        assert_eq!(s.return_state(m, 0), 3);
        assert_eq!(s.return_state(m, 1), EMPTY_RETURN_STATE);
        assert!(s.has_empty_path(m));
        assert!(!s.has_empty_path(a));
    }

    #[test]
    fn test_array_merge_preserves_both_arms() {
        let (mut s, mut cache) = store();
        let a3 = s.singleton(EMPTY_CONTEXT, 3);
        let a4 = s.singleton(EMPTY_CONTEXT, 4);
        let a5 = s.singleton(EMPTY_CONTEXT, 5);
        let ab = s.merge(a3, a4, true, &mut cache);
        let bc = s.merge(a4, a5, true, &mut cache);
        let m = s.merge(ab, bc, true, &mut cache);
        assert_eq!(s.arm_count(m), 3);
        assert_eq!(
            (0..3).map(|i| s.return_state(m, i)).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
    }

    #[test]
    fn test_merge_associative_up_to_interning() {
        let (mut s, mut cache) = store();
        let a = s.singleton(EMPTY_CONTEXT, 1);
        let b = s.singleton(EMPTY_CONTEXT, 2);
        let c = s.singleton(EMPTY_CONTEXT, 3);
        let ab = s.merge(a, b, true, &mut cache);
        let ab_c = s.merge(ab, c, true, &mut cache);
        let bc = s.merge(b, c, true, &mut cache);
        let a_bc = s.merge(a, bc, true, &mut cache);
        assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn test_merge_cache_hit() {
        let (mut s, mut cache) = store();
        let a = s.singleton(EMPTY_CONTEXT, 1);
        let b = s.singleton(EMPTY_CONTEXT, 2);
        let m1 = s.merge(a, b, true, &mut cache);
        assert!(cache.contains_key(&(a, b)));
        let m2 = s.merge(b, a, true, &mut cache);
        assert_eq!(m1, m2);
    }

    #[test]
    fn test_from_rule_context() {
        // r: s ;  with the call site at state 0 returning to state 1.
        let mut atn = Atn::new(GrammarKind::Parser, 1);
        let call = atn.add_state(0, AtnStateKind::Basic);
        let follow = atn.add_state(0, AtnStateKind::Basic);
        let s_start = atn.add_state(1, AtnStateKind::RuleStart {
            stop_state: 3,
            is_left_recursive: false,
        });
        let _s_stop = atn.add_state(1, AtnStateKind::RuleStop);
        atn.add_transition(
            call,
            Transition::new(
                s_start,
                TransitionKind::Rule {
                    rule_index: 1,
                    precedence: 0,
                    follow_state: follow,
                },
            ),
        );

        let mut s = ContextStore::new();
        let root = Arc::new(RuleContext::root(0));
        let child = RuleContext::child(root.clone(), call, 1);

        assert_eq!(s.from_rule_context(&atn, Some(&root)), EMPTY_CONTEXT);
        let ctx = s.from_rule_context(&atn, Some(&child));
        assert_eq!(s.arm_count(ctx), 1);
        assert_eq!(s.return_state(ctx, 0), follow);
        assert_eq!(s.parent(ctx, 0), EMPTY_CONTEXT);
    }
}
