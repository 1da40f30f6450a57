//! Object-macro registry and dispatch.
//!
//! A macro is declared in the corpus (`> object NAME LANGUAGE`) and executed by
//! whichever [`MacroBackend`] is registered for its language tag. Backends are
//! a capability pair rather than a type hierarchy:
//!
//! - [`MacroBackend::prepare`] turns a definition into a [`PreparedMacro`]
//!   (compile, load, look up; whatever the runtime needs).
//! - [`PreparedMacro::invoke`] runs it for one call and returns a
//!   [`MacroValue`].
//!
//! Preparation happens lazily on the first call and is cached on the
//! registry entry, including failures. Entries live inside the engine
//! snapshot, so a turn that started before a reload keeps calling the
//! definition it saw, while later turns pick up the redefinition.
//!
//! Whatever the backend returns is coerced to text here; the rest of the
//! engine only ever sees strings.

use super::session::SessionStore;
use crate::MacroDefinition;
use crate::error::MacroError;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, warn};

/// Error type produced by backends. The dispatcher wraps it without inspecting it.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// A dynamically typed macro result.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl MacroValue {
    /// Coerce to the text inserted into the reply.
    pub fn into_text(self) -> String {
        match self {
            MacroValue::Text(s) => s,
            MacroValue::Integer(v) => v.to_string(),
            // Whole numbers print without a trailing ".0".
            MacroValue::Float(v) if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 => format!("{}", v as i64),
            MacroValue::Float(v) => v.to_string(),
            MacroValue::Bool(b) => b.to_string(),
            MacroValue::Null => String::new(),
        }
    }
}

impl From<String> for MacroValue {
    fn from(value: String) -> Self {
        MacroValue::Text(value)
    }
}

impl From<&str> for MacroValue {
    fn from(value: &str) -> Self {
        MacroValue::Text(value.to_string())
    }
}

impl From<i64> for MacroValue {
    fn from(value: i64) -> Self {
        MacroValue::Integer(value)
    }
}

impl From<i32> for MacroValue {
    fn from(value: i32) -> Self {
        MacroValue::Integer(value.into())
    }
}

impl From<f64> for MacroValue {
    fn from(value: f64) -> Self {
        MacroValue::Float(value)
    }
}

impl From<bool> for MacroValue {
    fn from(value: bool) -> Self {
        MacroValue::Bool(value)
    }
}

impl From<()> for MacroValue {
    fn from(_: ()) -> Self {
        MacroValue::Null
    }
}

impl<T: Into<MacroValue>> From<Option<T>> for MacroValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(MacroValue::Null)
    }
}

/// A macro ready to be invoked.
pub trait PreparedMacro: Send + Sync {
    fn invoke(&self, ctx: &MacroContext, args: &[String]) -> Result<MacroValue, BackendError>;
}

/// An execution backend for one or more macro languages.
pub trait MacroBackend: Send + Sync {
    fn prepare(&self, definition: &MacroDefinition) -> Result<Arc<dyn PreparedMacro>, BackendError>;
}

/// What a running macro can see: the calling user and the variable stores.
#[derive(Clone)]
pub struct MacroContext {
    user: String,
    sessions: Arc<SessionStore>,
    bot_vars: Arc<HashMap<String, String>>,
}

impl MacroContext {
    pub(crate) fn new(user: &str, sessions: Arc<SessionStore>, bot_vars: Arc<HashMap<String, String>>) -> Self {
        MacroContext { user: user.to_string(), sessions, bot_vars }
    }

    /// Id of the user whose turn triggered this call.
    pub fn current_user(&self) -> &str {
        &self.user
    }

    pub fn get_uservar(&self, user: &str, name: &str) -> Option<String> {
        self.sessions.get(user, name)
    }

    pub fn set_uservar(&self, user: &str, name: &str, value: &str) {
        self.sessions.set(user, name, value);
    }

    /// A `! var` value from the corpus.
    pub fn bot_var(&self, name: &str) -> Option<&str> {
        self.bot_vars.get(name).map(String::as_str)
    }
}

impl fmt::Debug for MacroContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroContext").field("user", &self.user).finish_non_exhaustive()
    }
}

/// A registered definition plus its lazily prepared form.
pub(crate) struct MacroEntry {
    pub definition: MacroDefinition,
    prepared: OnceCell<Result<Arc<dyn PreparedMacro>, String>>,
}

impl MacroEntry {
    fn new(definition: MacroDefinition) -> Self {
        MacroEntry { definition, prepared: OnceCell::new() }
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.get().is_some()
    }
}

impl fmt::Debug for MacroEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroEntry")
            .field("definition", &self.definition)
            .field("prepared", &self.is_prepared())
            .finish()
    }
}

/// Macro name to entry. Cloning shares the entries (and their caches).
#[derive(Debug, Clone, Default)]
pub(crate) struct MacroRegistry {
    entries: HashMap<String, Arc<MacroEntry>>,
}

impl MacroRegistry {
    /// Register `definition`, replacing any macro with the same name.
    ///
    /// Re-registering an identical definition keeps the existing entry so its
    /// prepared form survives a reload.
    pub fn define(&mut self, definition: MacroDefinition) {
        if let Some(existing) = self.entries.get(&definition.name) {
            if existing.definition.language == definition.language && existing.definition.body == definition.body {
                return;
            }
            debug!(object = %definition.name, "redefining object macro");
        }
        self.entries.insert(definition.name.clone(), Arc::new(MacroEntry::new(definition)));
    }

    /// Drop every macro for which `keep` returns false.
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.entries.retain(|name, _| keep(name));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<MacroEntry>> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Language tag to backend, fixed when the engine is built.
#[derive(Clone, Default)]
pub(crate) struct Backends {
    by_language: HashMap<String, Arc<dyn MacroBackend>>,
}

impl Backends {
    pub fn insert(&mut self, language: &str, backend: Arc<dyn MacroBackend>) {
        self.by_language.insert(language.to_lowercase(), backend);
    }

    fn get(&self, language: &str) -> Option<&Arc<dyn MacroBackend>> {
        self.by_language.get(language)
    }

    pub fn languages(&self) -> Vec<&str> {
        let mut langs: Vec<&str> = self.by_language.keys().map(String::as_str).collect();
        langs.sort_unstable();
        langs
    }
}

/// Routes a call to the backend of the macro's language.
pub(crate) struct Dispatcher<'a> {
    registry: &'a MacroRegistry,
    backends: &'a Backends,
    timeout: Option<Duration>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a MacroRegistry, backends: &'a Backends, timeout: Option<Duration>) -> Self {
        Dispatcher { registry, backends, timeout }
    }

    pub fn invoke(&self, name: &str, args: &[String], ctx: &MacroContext) -> Result<String, MacroError> {
        let entry = self.registry.get(name).ok_or_else(|| MacroError::NotFound(name.to_string()))?;
        let language = &entry.definition.language;
        let backend = self
            .backends
            .get(language)
            .ok_or_else(|| MacroError::NoBackend { name: name.to_string(), language: language.clone() })?;

        let prepared = entry.prepared.get_or_init(|| {
            debug!(object = name, language = %language, "preparing object macro");
            backend.prepare(&entry.definition).map_err(|err| {
                warn!(object = name, error = %err, "object macro failed to prepare");
                err.to_string()
            })
        });
        let prepared = match prepared {
            Ok(prepared) => Arc::clone(prepared),
            Err(message) => return Err(MacroError::Preparation { name: name.to_string(), message: message.clone() }),
        };

        debug!(object = name, args = args.len(), user = ctx.current_user(), "invoking object macro");
        let value = match self.timeout {
            None => prepared.invoke(ctx, args).map_err(|source| MacroError::Execution { name: name.to_string(), source }),
            Some(limit) => invoke_isolated(name, prepared, ctx.clone(), args.to_vec(), limit),
        }?;
        Ok(value.into_text())
    }
}

/// Run one invocation on its own thread and give up after `limit`.
///
/// A timed-out worker can't be cancelled. It keeps running until the macro
/// returns, holding its own clones of the prepared macro and context, and its
/// result is dropped. Nothing caps how many such workers exist at once.
fn invoke_isolated(
    name: &str,
    prepared: Arc<dyn PreparedMacro>,
    ctx: MacroContext,
    args: Vec<String>,
    limit: Duration,
) -> Result<MacroValue, MacroError> {
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name(format!("macro-{name}"))
        .spawn(move || {
            let _ = tx.send(prepared.invoke(&ctx, &args));
        })
        .map_err(|err| MacroError::Execution { name: name.to_string(), source: Box::new(err) })?;

    match rx.recv_timeout(limit) {
        Ok(result) => result.map_err(|source| MacroError::Execution { name: name.to_string(), source }),
        Err(RecvTimeoutError::Timeout) => {
            warn!(object = name, ?limit, "abandoning object macro after timeout");
            Err(MacroError::Timeout { name: name.to_string(), after: limit })
        }
        Err(RecvTimeoutError::Disconnected) => Err(MacroError::Execution {
            name: name.to_string(),
            source: "macro worker exited without a result".into(),
        }),
    }
}
