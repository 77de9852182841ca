//! # Semantic Contexts
//!
//! Boolean combinations of semantic predicates and precedence checks carried
//! by configurations during prediction.
//!
//! The `and`/`or` constructors keep the tree canonical (flattened, sorted,
//! deduplicated, identities stripped), so structural equality on
//! [`SemanticContext`] is meaningful and cheap enough for configuration
//! keys. Evaluation delegates to a [`PredicateEvaluator`], the hook a parser
//! implements over its generated `sempred`/`precpred` dispatch.

use smallvec::SmallVec;

/// Host hook for evaluating grammar predicates at prediction time.
///
/// Evaluation failures are represented as `false`: an alternative whose
/// predicate misbehaves is eliminated, never propagated as an error.
pub trait PredicateEvaluator {
    fn sempred(&mut self, rule_index: usize, pred_index: usize) -> bool;
    fn precpred(&self, precedence: u32) -> bool;

    /// The parser's current operator precedence, consulted when selecting
    /// the start state of a precedence DFA.
    fn current_precedence(&self) -> u32 {
        0
    }
}

/// Evaluator that accepts every predicate and any precedence. Useful for
/// grammars without predicates.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllTrueEvaluator;

impl PredicateEvaluator for AllTrueEvaluator {
    fn sempred(&mut self, _rule_index: usize, _pred_index: usize) -> bool {
        true
    }

    fn precpred(&self, _precedence: u32) -> bool {
        true
    }
}

/// A boolean formula over predicates and precedence checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SemanticContext {
    /// The always-true context; identity of `and`, absorbing for `or`.
    #[default]
    None,
    Predicate {
        rule_index: usize,
        pred_index: usize,
        is_ctx_dependent: bool,
    },
    /// `{precedence >= level}?` from a left-recursive rule.
    Precedence { precedence: u32 },
    And(Vec<SemanticContext>),
    Or(Vec<SemanticContext>),
}

impl SemanticContext {
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Conjunction with canonicalization: `None` is stripped, nested `And`s
    /// flatten, duplicates collapse, and among precedence checks only the
    /// weakest (minimum level) survives since it implies none of the others
    /// fail first.
    #[must_use]
    pub fn and(a: &Self, b: &Self) -> Self {
        if a.is_none() {
            return b.clone();
        }
        if b.is_none() {
            return a.clone();
        }
        let mut operands: Vec<Self> = Vec::new();
        let mut min_precedence: Option<u32> = None;
        for op in Self::flatten_and(a).chain(Self::flatten_and(b)) {
            match op {
                Self::Precedence { precedence } => {
                    min_precedence =
                        Some(min_precedence.map_or(*precedence, |m| m.min(*precedence)));
                }
                Self::None => {}
                other => operands.push(other.clone()),
            }
        }
        if let Some(precedence) = min_precedence {
            operands.push(Self::Precedence { precedence });
        }
        Self::normalized(operands, false)
    }

    /// Disjunction with canonicalization, dual to [`Self::and`]: `None`
    /// absorbs, and the strongest precedence check (maximum level) survives.
    #[must_use]
    pub fn or(a: &Self, b: &Self) -> Self {
        if a.is_none() || b.is_none() {
            return Self::None;
        }
        let mut operands: Vec<Self> = Vec::new();
        let mut max_precedence: Option<u32> = None;
        for op in Self::flatten_or(a).chain(Self::flatten_or(b)) {
            match op {
                Self::Precedence { precedence } => {
                    max_precedence =
                        Some(max_precedence.map_or(*precedence, |m| m.max(*precedence)));
                }
                Self::None => return Self::None,
                other => operands.push(other.clone()),
            }
        }
        if let Some(precedence) = max_precedence {
            operands.push(Self::Precedence { precedence });
        }
        Self::normalized(operands, true)
    }

    fn flatten_and(ctx: &Self) -> Box<dyn Iterator<Item = &Self> + '_> {
        match ctx {
            Self::And(ops) => Box::new(ops.iter()),
            other => Box::new(std::iter::once(other)),
        }
    }

    fn flatten_or(ctx: &Self) -> Box<dyn Iterator<Item = &Self> + '_> {
        match ctx {
            Self::Or(ops) => Box::new(ops.iter()),
            other => Box::new(std::iter::once(other)),
        }
    }

    fn normalized(mut operands: Vec<Self>, is_or: bool) -> Self {
        operands.sort();
        operands.dedup();
        match operands.len() {
            0 => Self::None,
            1 => operands.into_iter().next().unwrap_or(Self::None),
            _ if is_or => Self::Or(operands),
            _ => Self::And(operands),
        }
    }

    /// Evaluate against the host. Failures read as `false`.
    pub fn eval(&self, evaluator: &mut dyn PredicateEvaluator) -> bool {
        match self {
            Self::None => true,
            Self::Predicate {
                rule_index,
                pred_index,
                ..
            } => evaluator.sempred(*rule_index, *pred_index),
            Self::Precedence { precedence } => evaluator.precpred(*precedence),
            Self::And(ops) => ops.iter().all(|op| op.eval(evaluator)),
            Self::Or(ops) => ops.iter().any(|op| op.eval(evaluator)),
        }
    }

    /// Partially evaluate the precedence checks, leaving ordinary predicates
    /// in place. `None` means the whole context can never be true at the
    /// current precedence.
    #[must_use]
    pub fn eval_precedence(&self, evaluator: &dyn PredicateEvaluator) -> Option<Self> {
        match self {
            Self::None | Self::Predicate { .. } => Some(self.clone()),
            Self::Precedence { precedence } => {
                if evaluator.precpred(*precedence) {
                    Some(Self::None)
                } else {
                    None
                }
            }
            Self::And(ops) => {
                let mut evaluated: SmallVec<[Self; 4]> = SmallVec::new();
                let mut changed = false;
                for op in ops {
                    let e = op.eval_precedence(evaluator)?;
                    changed |= e != *op;
                    evaluated.push(e);
                }
                if !changed {
                    return Some(self.clone());
                }
                let mut result = Self::None;
                for e in evaluated {
                    result = Self::and(&result, &e);
                }
                Some(result)
            }
            Self::Or(ops) => {
                let mut evaluated: SmallVec<[Self; 4]> = SmallVec::new();
                let mut changed = false;
                for op in ops {
                    match op.eval_precedence(evaluator) {
                        Some(e) => {
                            changed |= e != *op;
                            evaluated.push(e);
                        }
                        None => changed = true,
                    }
                }
                if !changed {
                    return Some(self.clone());
                }
                if evaluated.is_empty() {
                    return None;
                }
                let mut iter = evaluated.into_iter();
                let mut result = iter.next().unwrap_or(Self::None);
                for e in iter {
                    result = Self::or(&result, &e);
                }
                Some(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(i: usize) -> SemanticContext {
        SemanticContext::Predicate {
            rule_index: 0,
            pred_index: i,
            is_ctx_dependent: false,
        }
    }

    struct OddPreds;

    impl PredicateEvaluator for OddPreds {
        fn sempred(&mut self, _rule_index: usize, pred_index: usize) -> bool {
            pred_index % 2 == 1
        }

        fn precpred(&self, precedence: u32) -> bool {
            precedence <= 2
        }
    }

    #[test]
    fn test_none_identity_and_absorption() {
        let p = pred(1);
        assert_eq!(SemanticContext::and(&SemanticContext::None, &p), p);
        assert_eq!(SemanticContext::and(&p, &SemanticContext::None), p);
        assert_eq!(
            SemanticContext::or(&p, &SemanticContext::None),
            SemanticContext::None
        );
    }

    #[test]
    fn test_and_flattens_and_dedupes() {
        let ab = SemanticContext::and(&pred(1), &pred(2));
        let abc = SemanticContext::and(&ab, &pred(3));
        match &abc {
            SemanticContext::And(ops) => assert_eq!(ops.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        assert_eq!(SemanticContext::and(&ab, &pred(1)), ab);
    }

    #[test]
    fn test_and_keeps_min_precedence() {
        let p1 = SemanticContext::Precedence { precedence: 1 };
        let p3 = SemanticContext::Precedence { precedence: 3 };
        assert_eq!(SemanticContext::and(&p1, &p3), p1);
        assert_eq!(SemanticContext::or(&p1, &p3), p3);
    }

    #[test]
    fn test_commutative() {
        let a = pred(1);
        let b = pred(2);
        assert_eq!(SemanticContext::and(&a, &b), SemanticContext::and(&b, &a));
        assert_eq!(SemanticContext::or(&a, &b), SemanticContext::or(&b, &a));
    }

    #[test]
    fn test_eval() {
        let mut host = OddPreds;
        assert!(SemanticContext::None.eval(&mut host));
        assert!(pred(1).eval(&mut host));
        assert!(!pred(2).eval(&mut host));
        assert!(!SemanticContext::and(&pred(1), &pred(2)).eval(&mut host));
        assert!(SemanticContext::or(&pred(1), &pred(2)).eval(&mut host));
        assert!(SemanticContext::Precedence { precedence: 2 }.eval(&mut host));
        assert!(!SemanticContext::Precedence { precedence: 3 }.eval(&mut host));
    }

    #[test]
    fn test_eval_precedence() {
        let host = OddPreds;
        let ok = SemanticContext::Precedence { precedence: 1 };
        let fail = SemanticContext::Precedence { precedence: 9 };
        assert_eq!(ok.eval_precedence(&host), Some(SemanticContext::None));
        assert_eq!(fail.eval_precedence(&host), None);

        // A guarded predicate keeps the predicate when the guard passes.
        let gated = SemanticContext::and(&ok, &pred(1));
        assert_eq!(gated.eval_precedence(&host), Some(pred(1)));
        // ... and dies with the guard.
        let dead = SemanticContext::and(&fail, &pred(1));
        assert_eq!(dead.eval_precedence(&host), None);
    }
}
