//! Rule ranking and indexing.
//!
//! This module holds the *static* side of the engine: the structures derived
//! from the loaded rules that make a turn fast and predictable.
//!
//! Matching is split into two phases:
//!
//! 1. **Compile/index rules** (this module, once per load): sort rules into
//!    rank order and pre-index them with coarse metadata.
//! 2. **Run** (see `matcher.rs`, once per turn): scan the input
//!    (`trigger.rs`), select candidate rules through the indexes, then align.
//!
//! The indexing supports:
//!
//! - **Anchors** (`RuleIndex::by_anchor`): a rule with at least one literal is
//!   filed under its first literal. A rule can only match if its anchor occurs
//!   in the input. Wildcard-only rules are `always_on`.
//! - **Buckets** (`BucketMask`): a rule with a `#` wildcard needs an all-digit
//!   input word; one with `_` needs an all-alphabetic word.
//! - **Literal counts** (on each `RuleMeta`): used by the matcher to reject a
//!   rule whose literal multiset is not contained in the input.
//!
//! ## Invariants
//!
//! - `RuleId` is an index into `CompiledRules::rules` and `CompiledRules::metas`.
//!   Those vectors stay aligned.
//! - `rules` is in rank order: descending specificity, then ascending
//!   definition order. The first rule that aligns is therefore the winner.

use crate::{Rule, WildcardKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Rule identifier (index into the ranked rules vector).
pub(crate) type RuleId = usize;

bitflags::bitflags! {
    /// Coarse buckets for fast input classification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BucketMask: u8 {
        const HAS_NUMERIC_WORD = 1 << 0;
        const HAS_ALPHA_WORD   = 1 << 1;
    }
}

/// Per-rule metadata used for gating.
#[derive(Clone, Debug)]
pub(crate) struct RuleMeta {
    pub anchor: Option<String>,
    pub buckets: BucketMask,
    /// Distinct literals and how many times each occurs in the trigger.
    pub literal_counts: Vec<(String, usize)>,
    /// Fewest input words the trigger can align with.
    pub min_words: usize,
}

impl RuleMeta {
    fn from_rule(rule: &Rule) -> Self {
        let mut buckets = BucketMask::empty();
        for kind in rule.trigger.wildcards() {
            match kind {
                WildcardKind::Numeric => buckets |= BucketMask::HAS_NUMERIC_WORD,
                WildcardKind::Alphabetic => buckets |= BucketMask::HAS_ALPHA_WORD,
                WildcardKind::Any => {}
            }
        }

        let mut literal_counts: Vec<(String, usize)> = Vec::new();
        for literal in rule.trigger.literals() {
            match literal_counts.iter_mut().find(|(word, _)| word == literal) {
                Some((_, count)) => *count += 1,
                None => literal_counts.push((literal.to_string(), 1)),
            }
        }

        RuleMeta {
            anchor: rule.trigger.literals().next().map(str::to_string),
            buckets,
            literal_counts,
            min_words: rule.trigger.tokens.len(),
        }
    }
}

#[derive(Default, Debug)]
pub(crate) struct RuleIndex {
    pub always_on: Vec<RuleId>,
    pub by_anchor: HashMap<String, Vec<RuleId>>,
}

/// Ranked rule set with metadata and indexes.
#[derive(Debug, Default)]
pub(crate) struct CompiledRules {
    pub rules: Vec<Arc<Rule>>,
    pub metas: Vec<RuleMeta>,
    pub index: RuleIndex,
}

impl CompiledRules {
    /// Rank `rules` (given in definition order) and build the indexes.
    pub fn new(mut rules: Vec<Arc<Rule>>) -> Self {
        rules.sort_by(|a, b| b.trigger.specificity.cmp(&a.trigger.specificity).then(a.order.cmp(&b.order)));

        let metas: Vec<RuleMeta> = rules.iter().map(|r| RuleMeta::from_rule(r)).collect();

        let mut index = RuleIndex::default();
        for (id, meta) in metas.iter().enumerate() {
            match &meta.anchor {
                Some(anchor) => index.by_anchor.entry(anchor.clone()).or_default().push(id),
                None => index.always_on.push(id),
            }
        }

        CompiledRules { rules, metas, index }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::parse_document;
    use crate::Options;

    fn compile(text: &str) -> CompiledRules {
        let doc = parse_document(text, &Options::default()).unwrap();
        let rules = doc.rules.into_iter().enumerate().map(|(i, mut r)| {
            r.order = i;
            Arc::new(r)
        });
        CompiledRules::new(rules.collect())
    }

    #[test]
    fn ranks_by_specificity_then_definition_order() {
        let compiled = compile("+ *\n- a\n+ hello *\n- b\n+ hello there\n- c\n+ hello *\n- d\n");
        let order: Vec<&str> = compiled.rules.iter().map(|r| r.responses[0].template.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn indexes_anchor_and_always_on() {
        let compiled = compile("+ *\n- a\n+ what is #\n- b\n");
        assert_eq!(compiled.index.always_on.len(), 1);
        let ids = &compiled.index.by_anchor["what"];
        assert_eq!(ids.len(), 1);
        assert_eq!(compiled.metas[ids[0]].buckets, BucketMask::HAS_NUMERIC_WORD);
        assert_eq!(compiled.metas[ids[0]].min_words, 3);
    }

    #[test]
    fn counts_repeated_literals() {
        let compiled = compile("+ no no *\n- a\n");
        assert_eq!(compiled.metas[0].literal_counts, vec![("no".to_string(), 2)]);
    }
}
