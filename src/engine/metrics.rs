//! Per-turn match metrics.
//!
//! Cheap counters collected on every turn and surfaced through
//! [`crate::Engine::reply_verbose`]. They show how much work each gating stage
//! saved, which is the first thing to look at when a large corpus gets slow.

use crate::MatchResult;
use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatchMetrics {
    /// Total elapsed time for gating + alignment.
    pub total: Duration,
    /// Rules in the snapshot.
    pub rules_total: usize,
    /// Rules selected by the anchor index (plus always-on rules).
    pub indexed: usize,
    /// Rules that also passed the bucket, length and literal-multiset checks.
    pub prefiltered: usize,
    /// Full alignments attempted before a winner was found.
    pub alignments: usize,
}

/// Matcher output bundled with its metrics.
#[derive(Debug, Clone)]
pub(crate) struct MatchRun {
    pub result: MatchResult,
    pub metrics: MatchMetrics,
}
