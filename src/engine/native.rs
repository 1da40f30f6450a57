//! In-process backend: macros implemented as Rust closures.
//!
//! The corpus still declares `> object NAME LANGUAGE`, but the body text is
//! not interpreted; the host registers a function under the same name and the
//! backend binds the two at preparation time. Register it for whatever
//! language tags the corpus uses.

use super::dispatch::{BackendError, MacroBackend, MacroContext, MacroValue, PreparedMacro};
use crate::MacroDefinition;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type NativeFn = dyn Fn(&MacroContext, &[String]) -> Result<MacroValue, BackendError> + Send + Sync;

#[derive(Clone, Default)]
pub struct NativeBackend {
    functions: HashMap<String, Arc<NativeFn>>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`NativeBackend::register`].
    pub fn with_function<F, V>(mut self, name: &str, function: F) -> Self
    where
        F: Fn(&MacroContext, &[String]) -> Result<V, BackendError> + Send + Sync + 'static,
        V: Into<MacroValue>,
    {
        self.register(name, function);
        self
    }

    /// Bind `function` to the macro called `name`, replacing any earlier binding.
    pub fn register<F, V>(&mut self, name: &str, function: F)
    where
        F: Fn(&MacroContext, &[String]) -> Result<V, BackendError> + Send + Sync + 'static,
        V: Into<MacroValue>,
    {
        let wrapped = move |ctx: &MacroContext, args: &[String]| function(ctx, args).map(Into::into);
        self.functions.insert(name.to_string(), Arc::new(wrapped));
    }
}

impl fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort_unstable();
        f.debug_struct("NativeBackend").field("functions", &names).finish()
    }
}

struct NativeMacro(Arc<NativeFn>);

impl PreparedMacro for NativeMacro {
    fn invoke(&self, ctx: &MacroContext, args: &[String]) -> Result<MacroValue, BackendError> {
        (self.0)(ctx, args)
    }
}

impl MacroBackend for NativeBackend {
    fn prepare(&self, definition: &MacroDefinition) -> Result<Arc<dyn PreparedMacro>, BackendError> {
        match self.functions.get(&definition.name) {
            Some(function) => Ok(Arc::new(NativeMacro(Arc::clone(function)))),
            None => Err(format!("no native function registered for '{}'", definition.name).into()),
        }
    }
}
