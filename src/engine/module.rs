//! Loader-agnostic view of user modules and their callables
//!
//! The engine never touches a script heap directly. A [`ModuleLoader`]
//! produces a [`LoadedModule`] whose exports are inspected once to select
//! the single [`UserFunction`] the process will serve.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use super::error::{InvokeError, LoadError, SelectionError};
use super::value::{InvocationRequest, Record, Returned};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Completion callback handed to two-parameter user functions
#[derive(Clone)]
pub struct Responder {
    inner: Arc<dyn Fn(Record) + Send + Sync>,
}

impl Responder {
    pub fn new(f: impl Fn(Record) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    pub fn respond(&self, record: Record) {
        (self.inner)(record);
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Responder")
    }
}

/// How a call came back
pub enum CallOutcome {
    /// Plain return value
    Ready(Returned),
    /// A deferred value (thenable); resolves or rejects later
    Deferred(BoxFuture<'static, Result<Returned, InvokeError>>),
}

pub trait UserFunction: Send + Sync {
    /// Declared parameter count
    fn arity(&self) -> usize;

    /// Start a call. `Err` means the function threw before returning.
    fn call(
        &self,
        request: InvocationRequest,
        responder: Option<Responder>,
    ) -> BoxFuture<'_, Result<CallOutcome, InvokeError>>;
}

impl fmt::Debug for dyn UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserFunction(arity = {})", self.arity())
    }
}

/// One entry of a module's export set. Nullish exports are never reported.
#[derive(Clone)]
pub enum Export {
    Function(Arc<dyn UserFunction>),
    Value,
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(func) => write!(f, "Function({func:?})"),
            Self::Value => f.write_str("Value"),
        }
    }
}

pub trait LoadedModule: Send {
    /// Top-level export by name (`"default"` included)
    fn export(&self, name: &str) -> Option<Export>;

    /// Property of the default export, looked up through its prototype chain
    fn default_member(&self, name: &str) -> Option<Export>;

    /// Every callable top-level export
    fn list_callables(&self) -> Vec<Arc<dyn UserFunction>>;
}

pub trait ModuleLoader: Send + Sync {
    fn load<'a>(&'a self, path: &'a Path)
        -> BoxFuture<'a, Result<Box<dyn LoadedModule>, LoadError>>;
}

/// Pick the callable to serve from a loaded module.
///
/// An explicit export name never falls back to the other rules.
pub fn select_export(
    module: &dyn LoadedModule,
    export_name: Option<&str>,
) -> Result<Arc<dyn UserFunction>, SelectionError> {
    if let Some(name) = export_name {
        return match module
            .export(name)
            .or_else(|| module.default_member(name))
        {
            Some(Export::Function(func)) => Ok(func),
            _ => Err(SelectionError::NamedExportMissing(name.to_string())),
        };
    }

    if let Some(Export::Function(func)) = module.export("default") {
        return Ok(func);
    }

    let mut callables = module.list_callables();
    if callables.len() == 1 {
        if let Some(func) = callables.pop() {
            return Ok(func);
        }
    }

    Err(SelectionError::NoCallableExport)
}
