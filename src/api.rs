use crate::engine::{
    Backends, CompiledRules, Dispatcher, Document, Expander, MacroBackend, MacroContext, MacroRegistry, Matcher,
    MatchMetrics, ReplyHost, SessionStore, Substitutions, ThawAction, parse_document,
};
use crate::error::{ExpansionError, LoadError, MacroError};
use crate::{MatchResult, Response, Rule};
use parking_lot::{Mutex, RwLock};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng, thread_rng};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reply used by [`Engine::reply`] when no trigger matches, unless overridden.
pub const DEFAULT_FALLBACK: &str = "[ERR: No reply matched]";

/// Options that affect loading and replying.
#[derive(Debug, Clone)]
pub struct Options {
    /// Reply returned when no trigger matches the input.
    pub fallback: String,
    /// Reject documents that define rules or macros before a `! version` line.
    pub require_version: bool,
    /// Text inserted in place of a failed `<call>`. `None` makes the failure an error.
    pub macro_error_text: Option<String>,
    /// Upper bound on a single macro invocation. `None` runs macros inline.
    ///
    /// With a limit each call runs on its own thread. A call that overruns is
    /// reported as [`MacroError::Timeout`] but its thread is not stopped: it
    /// runs to completion in the background and every further overrun adds
    /// another one. Use this for macros that may stall, not ones that never
    /// return.
    pub macro_timeout: Option<Duration>,
    /// Seed for weighted response selection and `{random}`. `None` uses the thread RNG.
    pub seed: Option<u64>,
    /// How many `{@...}` redirects may nest inside one reply.
    pub max_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            fallback: DEFAULT_FALLBACK.to_string(),
            require_version: false,
            macro_error_text: None,
            macro_timeout: None,
            seed: None,
            max_depth: 50,
        }
    }
}

/// Additional details returned by [`Engine::reply_verbose`].
///
/// Compact on purpose: enough to see which rule fired and how much gating
/// saved, without dumping the rule set.
#[derive(Debug, Clone)]
pub struct ReplyDetails {
    pub reply: String,
    /// Trigger pattern of the matched rule, `None` when the fallback was used.
    pub rule: Option<String>,
    /// Source line of the matched rule.
    pub line: Option<usize>,
    pub captures: Vec<String>,
    /// Generation of the snapshot the turn ran against.
    pub generation: u64,
    pub metrics: MatchMetrics,
}

/// One immutable load generation: ranked rules, macros, substitutions and bot variables.
#[derive(Debug, Default)]
struct Brain {
    generation: u64,
    rules: CompiledRules,
    /// All rules in definition order, kept for additive loads.
    defined: Vec<Arc<Rule>>,
    macros: MacroRegistry,
    subs: Substitutions,
    bot_vars: Arc<HashMap<String, String>>,
}

impl Brain {
    /// `base` plus `documents`, as the next generation.
    fn extend(base: &Brain, documents: Vec<Document>) -> Brain {
        let mut defined = base.defined.clone();
        let mut macros = base.macros.clone();
        let mut subs = base.subs.clone();
        let mut bot_vars = (*base.bot_vars).clone();

        for document in documents {
            let offset = defined.len();
            defined.extend(document.rules.into_iter().map(|mut rule| {
                rule.order += offset;
                Arc::new(rule)
            }));
            for definition in document.macros {
                macros.define(definition);
            }
            for (pattern, replacement) in document.subs {
                subs.define(&pattern, replacement.as_deref());
            }
            for (name, value) in document.bot_vars {
                match value {
                    Some(value) => bot_vars.insert(name, value),
                    None => bot_vars.remove(&name),
                };
            }
        }

        Brain {
            generation: base.generation + 1,
            rules: CompiledRules::new(defined.clone()),
            defined,
            macros,
            subs,
            bot_vars: Arc::new(bot_vars),
        }
    }

    /// `documents` alone, as the next generation after `base`.
    ///
    /// Macros whose definition did not change keep their prepared form.
    fn replace(base: &Brain, documents: Vec<Document>) -> Brain {
        let names: HashSet<String> =
            documents.iter().flat_map(|doc| doc.macros.iter().map(|m| m.name.clone())).collect();
        let empty = Brain { generation: base.generation, macros: base.macros.clone(), ..Brain::default() };
        let mut brain = Brain::extend(&empty, documents);
        brain.macros.retain(|name| names.contains(name));
        brain
    }
}

/// Builder for an [`Engine`] with macro backends and [`Options`].
///
/// ```
/// use parley::{Engine, NativeBackend, Options};
///
/// let upper = NativeBackend::new().with_function("upper", |_ctx, args| Ok(args.join(" ").to_uppercase()));
/// let engine = Engine::builder()
///     .backend("python", upper)
///     .options(Options { fallback: "Hmm?".into(), ..Options::default() })
///     .build();
/// engine
///     .load_corpus("+ shout *\n- <call>upper <star></call>!\n> object upper python\nreturn ' '.join(args).upper()\n< object")
///     .unwrap();
/// assert_eq!(engine.reply("u1", "shout hello you").unwrap(), "HELLO YOU!");
/// assert_eq!(engine.reply("u1", "whisper").unwrap(), "Hmm?");
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    backends: Backends,
    options: Options,
}

impl EngineBuilder {
    /// Route macros declared with language tag `language` (case-insensitive) to `backend`.
    pub fn backend(mut self, language: &str, backend: impl MacroBackend + 'static) -> Self {
        self.backends.insert(language, Arc::new(backend));
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Engine {
        let rng = self.options.seed.map(|seed| Mutex::new(StdRng::seed_from_u64(seed)));
        Engine {
            brain: RwLock::new(Arc::new(Brain::default())),
            writer: Mutex::new(()),
            sessions: Arc::new(SessionStore::default()),
            backends: self.backends,
            options: self.options,
            rng,
        }
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("languages", &self.backends.languages())
            .field("options", &self.options)
            .finish()
    }
}

/// The reply engine.
///
/// `Engine` is `Send + Sync`; share it behind an `Arc` and call it from any
/// number of threads. Every turn works on the snapshot that was current when
/// it started, so a concurrent load never changes a reply halfway through.
pub struct Engine {
    brain: RwLock<Arc<Brain>>,
    /// Serializes loads; readers never take it.
    writer: Mutex<()>,
    sessions: Arc<SessionStore>,
    backends: Backends,
    options: Options,
    rng: Option<Mutex<StdRng>>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let brain = self.snapshot();
        f.debug_struct("Engine")
            .field("generation", &brain.generation)
            .field("rules", &brain.rules.len())
            .field("macros", &brain.macros.names())
            .field("substitutions", &brain.subs.len())
            .field("languages", &self.backends.languages())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// An engine with default options and no macro backends.
    pub fn new() -> Self {
        EngineBuilder::default().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    fn snapshot(&self) -> Arc<Brain> {
        Arc::clone(&self.brain.read())
    }

    /// Parse `text` and add its rules, macros and variables to the loaded ones.
    ///
    /// Macros with a name already in use replace the earlier definition. On
    /// error nothing changes.
    pub fn load_corpus(&self, text: &str) -> Result<(), LoadError> {
        let _writer = self.writer.lock();
        let document = parse_document(text, &self.options)?;
        let brain = Brain::extend(&self.snapshot(), vec![document]);
        self.publish(brain);
        Ok(())
    }

    /// Replace everything loaded so far with `texts`, parsed in order.
    ///
    /// All documents must parse before the new snapshot is published; on error
    /// the current one keeps serving.
    pub fn reload(&self, texts: &[&str]) -> Result<(), LoadError> {
        let _writer = self.writer.lock();
        let documents =
            texts.iter().map(|text| parse_document(text, &self.options)).collect::<Result<Vec<_>, _>>()?;
        let brain = Brain::replace(&self.snapshot(), documents);
        self.publish(brain);
        Ok(())
    }

    fn publish(&self, brain: Brain) {
        debug!(
            generation = brain.generation,
            rules = brain.rules.len(),
            macros = brain.macros.names().len(),
            "corpus loaded"
        );
        *self.brain.write() = Arc::new(brain);
    }

    /// Generation of the current snapshot; 0 until the first successful load.
    pub fn current_generation(&self) -> u64 {
        self.snapshot().generation
    }

    pub fn rule_count(&self) -> usize {
        self.snapshot().rules.len()
    }

    /// Names of the defined object macros, sorted.
    pub fn macro_names(&self) -> Vec<String> {
        self.snapshot().macros.names().into_iter().map(str::to_string).collect()
    }

    /// Language tags with a registered backend, sorted.
    pub fn languages(&self) -> Vec<String> {
        self.backends.languages().into_iter().map(str::to_string).collect()
    }

    /// Select the rule that answers `input`, without expanding a reply.
    pub fn match_input(&self, input: &str) -> MatchResult {
        let brain = self.snapshot();
        Matcher::new(&brain.subs.apply(input), &brain.rules).run().result
    }

    /// Reply to `input` on behalf of `user`.
    ///
    /// Returns [`Options::fallback`] when no trigger matches.
    pub fn reply(&self, user: &str, input: &str) -> Result<String, ExpansionError> {
        self.reply_verbose(user, input).map(|details| details.reply)
    }

    /// Like [`Engine::reply`], with the matched rule, captures and metrics.
    pub fn reply_verbose(&self, user: &str, input: &str) -> Result<ReplyDetails, ExpansionError> {
        self.answer(&self.snapshot(), user, input, 0)
    }

    /// One turn against `brain`. `depth` counts the enclosing `{@...}` redirects.
    fn answer(&self, brain: &Brain, user: &str, input: &str, depth: usize) -> Result<ReplyDetails, ExpansionError> {
        if depth > self.options.max_depth {
            warn!(depth, input, "redirect limit reached");
            return Err(ExpansionError::DeepRecursion { limit: self.options.max_depth });
        }
        let input = brain.subs.apply(input);
        let run = Matcher::new(&input, &brain.rules).run();
        let MatchResult { rule, captures } = run.result;

        let reply = match rule.as_deref().and_then(|rule| self.choose(&rule.responses)) {
            Some(response) => {
                self.expand_with(brain, &response.template, &captures, user, depth)?.trim().to_string()
            }
            None => self.options.fallback.clone(),
        };

        Ok(ReplyDetails {
            reply,
            rule: rule.as_ref().map(|rule| rule.trigger.pattern.clone()),
            line: rule.as_ref().map(|rule| rule.line),
            captures,
            generation: brain.generation,
            metrics: run.metrics,
        })
    }

    /// Expand a response template with the given captures.
    pub fn expand(&self, template: &str, captures: &[String], user: &str) -> Result<String, ExpansionError> {
        self.expand_with(&self.snapshot(), template, captures, user, 0)
    }

    /// Call an object macro directly.
    pub fn invoke(&self, name: &str, args: &[String], user: &str) -> Result<String, MacroError> {
        let brain = self.snapshot();
        let ctx = self.context(&brain, user);
        Dispatcher::new(&brain.macros, &self.backends, self.options.macro_timeout).invoke(name, args, &ctx)
    }

    fn context(&self, brain: &Brain, user: &str) -> MacroContext {
        MacroContext::new(user, Arc::clone(&self.sessions), Arc::clone(&brain.bot_vars))
    }

    fn expand_with(
        &self,
        brain: &Brain,
        template: &str,
        captures: &[String],
        user: &str,
        depth: usize,
    ) -> Result<String, ExpansionError> {
        let ctx = self.context(brain, user);
        let dispatcher = Dispatcher::new(&brain.macros, &self.backends, self.options.macro_timeout);
        let turn = Turn { engine: self, brain, user, depth };
        Expander::new(captures, &ctx, &dispatcher, &turn)
            .macro_error_text(self.options.macro_error_text.as_deref())
            .expand(template)
    }

    /// Weighted random choice among a rule's responses.
    fn choose<'r>(&self, responses: &'r [Response]) -> Option<&'r Response> {
        if responses.len() < 2 {
            return responses.first();
        }
        let dist = match WeightedIndex::new(responses.iter().map(|r| u64::from(r.weight))) {
            Ok(dist) => dist,
            Err(err) => {
                warn!(error = %err, "invalid response weights, using the first response");
                return responses.first();
            }
        };
        responses.get(self.with_rng(|rng| dist.sample(rng)))
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut dyn RngCore) -> T) -> T {
        match &self.rng {
            Some(rng) => f(&mut *rng.lock()),
            None => f(&mut thread_rng()),
        }
    }

    // --- User variables -----------------------------------------------------

    pub fn get_uservar(&self, user: &str, name: &str) -> Option<String> {
        self.sessions.get(user, name)
    }

    pub fn set_uservar(&self, user: &str, name: &str, value: &str) {
        self.sessions.set(user, name, value);
    }

    /// All variables of `user`, or `None` if the user was never seen.
    pub fn get_uservars(&self, user: &str) -> Option<HashMap<String, String>> {
        self.sessions.get_all(user)
    }

    pub fn reset_user(&self, user: &str) {
        self.sessions.reset(user);
    }

    pub fn reset_all(&self) {
        self.sessions.reset_all();
    }

    /// Snapshot `user`'s variables for a later [`Engine::thaw_user`].
    pub fn freeze_user(&self, user: &str) -> bool {
        self.sessions.freeze(user)
    }

    pub fn thaw_user(&self, user: &str, action: ThawAction) -> bool {
        self.sessions.thaw(user, action)
    }
}

/// The expander's view of the turn it is expanding for.
struct Turn<'e> {
    engine: &'e Engine,
    brain: &'e Brain,
    user: &'e str,
    depth: usize,
}

impl ReplyHost for Turn<'_> {
    fn pick(&self, n: usize) -> usize {
        self.engine.with_rng(|rng| rng.gen_range(0..n))
    }

    fn redirect(&self, input: &str) -> Result<String, ExpansionError> {
        debug!(input, depth = self.depth + 1, "redirecting");
        self.engine.answer(self.brain, self.user, input, self.depth + 1).map(|details| details.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn empty_engine_uses_fallback() {
        let engine = Engine::new();
        assert_eq!(engine.current_generation(), 0);
        assert_eq!(engine.reply("u1", "hello").unwrap(), DEFAULT_FALLBACK);
        assert!(!engine.match_input("hello").is_match());
    }

    #[test]
    fn load_is_additive_and_bumps_generation() {
        let engine = Engine::new();
        engine.load_corpus("+ hello\n- hi\n").unwrap();
        engine.load_corpus("+ bye\n- see you\n").unwrap();
        assert_eq!(engine.current_generation(), 2);
        assert_eq!(engine.rule_count(), 2);
        assert_eq!(engine.reply("u1", "hello").unwrap(), "hi");
        assert_eq!(engine.reply("u1", "bye").unwrap(), "see you");
    }

    #[test]
    fn reload_replaces_rules_and_macros() {
        let engine = Engine::new();
        engine.load_corpus("+ hello\n- hi\n> object a python\nx\n< object\n").unwrap();
        engine.reload(&["+ bye\n- see you\n", "> object b python\ny\n< object\n"]).unwrap();
        assert_eq!(engine.rule_count(), 1);
        assert_eq!(engine.macro_names(), vec!["b"]);
        assert_eq!(engine.reply("u1", "hello").unwrap(), DEFAULT_FALLBACK);
        assert_eq!(engine.reply("u1", "bye").unwrap(), "see you");
    }

    #[test]
    fn failed_load_keeps_current_snapshot() {
        let engine = Engine::new();
        engine.load_corpus("+ hello\n- hi\n").unwrap();
        assert!(engine.load_corpus("+ good\n- fine\n+ broken\n").is_err());
        assert!(engine.reload(&["+ ok\n- ok\n", "- orphan\n"]).is_err());
        assert_eq!(engine.current_generation(), 1);
        assert_eq!(engine.reply("u1", "hello").unwrap(), "hi");
        assert_eq!(engine.reply("u1", "good").unwrap(), DEFAULT_FALLBACK);
    }

    #[test]
    fn seeded_choice_is_deterministic() {
        let corpus = "+ pick\n- a\n- b\n- c{weight=5}\n";
        let replies = |seed| {
            let engine = Engine::builder().options(Options { seed: Some(seed), ..Options::default() }).build();
            engine.load_corpus(corpus).unwrap();
            (0..20).map(|_| engine.reply("u1", "pick").unwrap()).collect::<Vec<_>>()
        };
        assert_eq!(replies(7), replies(7));
        assert!(replies(7).iter().all(|r| ["a", "b", "c"].contains(&r.as_str())));
    }

    #[test]
    fn huge_weights_do_not_overflow() {
        let corpus = "+ pick\n- a{weight=3000000000}\n- b{weight=3000000000}\n";
        for seed in [None, Some(3)] {
            let engine = Engine::builder().options(Options { seed, ..Options::default() }).build();
            engine.load_corpus(corpus).unwrap();
            for _ in 0..10 {
                let reply = engine.reply("u1", "pick").unwrap();
                assert!(reply == "a" || reply == "b", "unexpected reply {reply:?}");
            }
        }
    }

    #[test]
    fn substitutions_apply_before_matching() {
        let engine = Engine::new();
        engine.load_corpus("! sub what's = what is\n+ what is up\n- not much\n").unwrap();
        assert_eq!(engine.reply("u1", "What's up?").unwrap(), "not much");
        assert!(engine.match_input("what's up").is_match());

        engine.load_corpus("! sub what's = <undef>\n").unwrap();
        assert!(!engine.match_input("what's up").is_match());
    }

    #[test]
    fn reply_verbose_reports_rule_and_captures() {
        let engine = Engine::new();
        engine.load_corpus("+ my name is *\n- Nice to meet you, <star>.\n").unwrap();
        let details = engine.reply_verbose("u1", "My name is Ada Lovelace").unwrap();
        assert_eq!(details.reply, "Nice to meet you, Ada Lovelace.");
        assert_eq!(details.rule.as_deref(), Some("my name is *"));
        assert_eq!(details.line, Some(1));
        assert_eq!(details.captures, vec!["Ada Lovelace"]);
        assert_eq!(details.generation, 1);
        assert_eq!(details.metrics.rules_total, 1);
        assert_eq!(details.metrics.alignments, 1);
    }

    #[test]
    fn bot_vars_can_be_undefined_by_later_loads() {
        let engine = Engine::new();
        engine.load_corpus("! var name = Parley\n+ who are you\n- I am <bot name>.\n").unwrap();
        assert_eq!(engine.reply("u1", "who are you").unwrap(), "I am Parley.");
        engine.load_corpus("! var name = <undef>\n").unwrap();
        assert_eq!(engine.reply("u1", "who are you").unwrap(), "I am undefined.");
    }
}
