//! Matching, expansion and macro-dispatch engine.
//!
//! The public entry point is [`crate::Engine`] in `api.rs`; this module holds
//! the parts it is assembled from.
//!
//! ## How the parts work together
//!
//! ```text
//! corpus text ── parse_document (corpus.rs) ──┐
//!                                             │  Document { rules, macros, vars }
//!                                             v
//!                         CompiledRules::new  (compiled_rules.rs)
//!                         MacroRegistry::define (dispatch.rs)
//!                                             │  one immutable snapshot
//!                                             v
//! input ── Substitutions::apply (substitute.rs)
//!   ── TriggerInfo::scan ──── Matcher::run (matcher.rs)
//!         (trigger.rs)              - gate by anchor word + buckets
//!                                   - literal multiset prefilter
//!                                   - align in rank order, first hit wins
//!                                             │  MatchResult
//!                                             v
//!                               Expander::expand (expand.rs)
//!                                   - <star>, <get>, <set>, <bot>, <id>
//!                                   - {random}, {formal}, <add>, ...
//!                                   - {@...} ── a nested turn (api.rs)
//!                                   - <call> ── Dispatcher::invoke (dispatch.rs)
//!                                                   └─ MacroBackend / PreparedMacro
//!                                             │
//!                                             v
//!                                        reply text
//! ```
//!
//! ## Responsibilities by module
//!
//! - `corpus.rs`: line-oriented parser for the corpus text format.
//! - `compiled_rules.rs`: ranks rules by specificity and builds the gating
//!   indexes (anchor words, wildcard buckets).
//! - `trigger.rs`: input normalization and coarse classification.
//! - `matcher.rs`: candidate selection and wildcard alignment.
//! - `expand.rs`: response template expansion.
//! - `dispatch.rs`: macro registry, backend traits and dispatch.
//! - `native.rs`: the in-process backend for host-registered Rust functions.
//! - `session.rs`: per-user variable store.
//! - `substitute.rs`: `! sub` rewrites applied to the input before matching.
//! - `metrics.rs`: per-turn counters for debugging and profiling.
//!
//! ## Debugging
//!
//! Everything logs through `tracing`; run the `parley` binary with
//! `PARLEY_LOG=parley=debug` to see gating and dispatch traces.

#[path = "engine/compiled_rules.rs"]
mod compiled_rules;
#[path = "engine/corpus.rs"]
mod corpus;
#[path = "engine/dispatch.rs"]
mod dispatch;
#[path = "engine/expand.rs"]
mod expand;
#[path = "engine/matcher.rs"]
mod matcher;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/native.rs"]
mod native;
#[path = "engine/session.rs"]
mod session;
#[path = "engine/substitute.rs"]
mod substitute;
#[path = "engine/trigger.rs"]
mod trigger;


pub(crate) use compiled_rules::CompiledRules;
pub(crate) use corpus::{Document, parse_document};
pub(crate) use dispatch::{Backends, Dispatcher, MacroRegistry};
pub use dispatch::{BackendError, MacroBackend, MacroContext, MacroValue, PreparedMacro};
pub(crate) use expand::{Expander, ReplyHost};
pub(crate) use matcher::Matcher;
pub use metrics::MatchMetrics;
pub use native::NativeBackend;
pub(crate) use session::SessionStore;
pub use session::ThawAction;
pub(crate) use substitute::Substitutions;
