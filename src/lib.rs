//! A deterministic, rule-based conversational reply engine.
//!
//! A corpus of `+ trigger` / `- response` rules and `> object` macro blocks is
//! loaded into an immutable snapshot. Each turn normalizes the user's input,
//! picks the most specific trigger that aligns with it, and expands one of the
//! rule's response templates, filling `<star>` captures and dispatching
//! `<call>` tags to a pluggable macro backend.
//!
//! ```
//! use parley::Engine;
//!
//! let engine = Engine::new();
//! engine.load_corpus("! version = 2.0\n+ hello *\n- Hi, <star>!").unwrap();
//! assert_eq!(engine.reply("u1", "Hello there").unwrap(), "Hi, there!");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[macro_use]
mod macros;
mod api;
mod engine;
mod error;

pub use api::{Engine, EngineBuilder, Options, ReplyDetails};
pub use engine::{
    BackendError, MacroBackend, MacroContext, MacroValue, MatchMetrics, NativeBackend, PreparedMacro, ThawAction,
};
pub use error::{ExpansionError, LoadError, MacroError, ParseError, VersionError};

// --- Core types -------------------------------------------------------------

/// Character-class constraint of a trigger wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WildcardKind {
    /// `*`: one or more words of any kind.
    Any,
    /// `#`: one or more words made of ASCII digits only.
    Numeric,
    /// `_`: one or more words made of alphabetic characters only.
    Alphabetic,
}

impl WildcardKind {
    pub(crate) fn from_symbol(token: &str) -> Option<Self> {
        match token {
            "*" => Some(WildcardKind::Any),
            "#" => Some(WildcardKind::Numeric),
            "_" => Some(WildcardKind::Alphabetic),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            WildcardKind::Any => '*',
            WildcardKind::Numeric => '#',
            WildcardKind::Alphabetic => '_',
        }
    }

    /// Ranking weight of the class: lower is narrower.
    fn breadth(self) -> u32 {
        match self {
            WildcardKind::Alphabetic => 1,
            WildcardKind::Numeric => 2,
            WildcardKind::Any => 3,
        }
    }

    /// Whether a single normalized input word satisfies this class.
    pub(crate) fn accepts(self, word: &str) -> bool {
        match self {
            WildcardKind::Any => true,
            WildcardKind::Numeric => !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()),
            WildcardKind::Alphabetic => !word.is_empty() && word.chars().all(char::is_alphabetic),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerToken {
    /// A normalized literal word.
    Literal(String),
    Wildcard(WildcardKind),
}

/// Ranking key of a trigger. Greater means more specific.
///
/// Ordering: explicit `{weight}` first, then literal-word count, then fewer
/// wildcards, then narrower wildcards (`_` before `#` before `*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    pub weight: u32,
    pub literals: usize,
    pub wildcards: usize,
    pub breadth: u32,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .cmp(&other.weight)
            .then(self.literals.cmp(&other.literals))
            .then(other.wildcards.cmp(&self.wildcards))
            .then(other.breadth.cmp(&self.breadth))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed trigger pattern with its cached specificity.
#[derive(Debug, Clone)]
pub struct Trigger {
    /// Source text of the pattern, as written after `+`.
    pub pattern: String,
    pub tokens: Vec<TriggerToken>,
    pub specificity: Specificity,
}

impl Trigger {
    pub(crate) fn new(pattern: String, tokens: Vec<TriggerToken>, weight: u32) -> Self {
        let mut literals = 0;
        let mut wildcards = 0;
        let mut breadth = 0;
        for token in &tokens {
            match token {
                TriggerToken::Literal(_) => literals += 1,
                TriggerToken::Wildcard(kind) => {
                    wildcards += 1;
                    breadth += kind.breadth();
                }
            }
        }
        Trigger { pattern, tokens, specificity: Specificity { weight, literals, wildcards, breadth } }
    }

    pub fn literals(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            TriggerToken::Literal(word) => Some(word.as_str()),
            TriggerToken::Wildcard(_) => None,
        })
    }

    pub fn wildcards(&self) -> impl Iterator<Item = WildcardKind> + '_ {
        self.tokens.iter().filter_map(|t| match t {
            TriggerToken::Wildcard(kind) => Some(*kind),
            TriggerToken::Literal(_) => None,
        })
    }
}

/// The normalized form of the pattern: lowercase literals and wildcard
/// symbols, with the `{weight=N}` tag when the weight is set.
impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match token {
                TriggerToken::Literal(word) => f.write_str(word)?,
                TriggerToken::Wildcard(kind) => write!(f, "{}", kind.symbol())?,
            }
        }
        if self.specificity.weight > 0 {
            write!(f, " {{weight={}}}", self.specificity.weight)?;
        }
        Ok(())
    }
}

/// One candidate reply of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub template: String,
    /// Relative selection weight (at least 1).
    pub weight: u32,
}

/// A trigger and its candidate responses. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Definition order across everything loaded into the engine.
    pub order: usize,
    /// 1-based line of the `+` command in its document.
    pub line: usize,
    pub trigger: Trigger,
    pub responses: Vec<Response>,
}

/// An object macro as declared in the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefinition {
    pub name: String,
    /// Language tag used to pick the execution backend.
    pub language: String,
    /// Verbatim text between `> object` and `< object`.
    pub body: String,
    pub line: usize,
}

/// Outcome of matching one input against the loaded rules.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub rule: Option<Arc<Rule>>,
    /// One entry per trigger wildcard, in trigger order, as original-case input text.
    pub captures: Vec<String>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        MatchResult::default()
    }

    pub fn is_match(&self) -> bool {
        self.rule.is_some()
    }
}

/// Byte span in the original input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Range {
    /// Start byte index (inclusive).
    pub start: usize,
    /// End byte index (exclusive).
    pub end: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(pattern: &str, tokens: Vec<TriggerToken>) -> Trigger {
        Trigger::new(pattern.to_string(), tokens, 0)
    }

    #[test]
    fn more_literals_rank_higher() {
        let a = trigger("hello *", vec![TriggerToken::Literal("hello".into()), TriggerToken::Wildcard(WildcardKind::Any)]);
        let b = trigger("*", vec![TriggerToken::Wildcard(WildcardKind::Any)]);
        assert!(a.specificity > b.specificity);
    }

    #[test]
    fn narrower_wildcards_rank_higher() {
        let alpha = trigger("i am _", vec![
            TriggerToken::Literal("i".into()),
            TriggerToken::Literal("am".into()),
            TriggerToken::Wildcard(WildcardKind::Alphabetic),
        ]);
        let numeric = trigger("i am #", vec![
            TriggerToken::Literal("i".into()),
            TriggerToken::Literal("am".into()),
            TriggerToken::Wildcard(WildcardKind::Numeric),
        ]);
        let any = trigger("i am *", vec![
            TriggerToken::Literal("i".into()),
            TriggerToken::Literal("am".into()),
            TriggerToken::Wildcard(WildcardKind::Any),
        ]);
        assert!(alpha.specificity > numeric.specificity);
        assert!(numeric.specificity > any.specificity);
    }

    #[test]
    fn display_shows_normalized_pattern() {
        let plain = trigger("What is # plus _?", vec![
            TriggerToken::Literal("what".into()),
            TriggerToken::Literal("is".into()),
            TriggerToken::Wildcard(WildcardKind::Numeric),
            TriggerToken::Literal("plus".into()),
            TriggerToken::Wildcard(WildcardKind::Alphabetic),
        ]);
        assert_eq!(plain.to_string(), "what is # plus _");

        let weighted = Trigger::new("* {weight=5}".into(), vec![TriggerToken::Wildcard(WildcardKind::Any)], 5);
        assert_eq!(weighted.to_string(), "* {weight=5}");
    }

    #[test]
    fn weight_outranks_literals() {
        let weighted = Trigger::new("*".into(), vec![TriggerToken::Wildcard(WildcardKind::Any)], 10);
        let plain = trigger("a b c", vec![
            TriggerToken::Literal("a".into()),
            TriggerToken::Literal("b".into()),
            TriggerToken::Literal("c".into()),
        ]);
        assert!(weighted.specificity > plain.specificity);
    }

    #[test]
    fn wildcard_classes() {
        assert!(WildcardKind::Numeric.accepts("42"));
        assert!(!WildcardKind::Numeric.accepts("4a"));
        assert!(WildcardKind::Alphabetic.accepts("héllo"));
        assert!(!WildcardKind::Alphabetic.accepts("h3llo"));
        assert!(WildcardKind::Any.accepts("x9"));
    }
}
