//! In-process module implementation backed by Rust closures, for tests

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::error::{InvokeError, LoadError};
use super::module::{
    BoxFuture, CallOutcome, Export, LoadedModule, ModuleLoader, Responder, UserFunction,
};
use super::value::{InvocationRequest, Payload, Record, Returned};

type CallFn =
    dyn Fn(InvocationRequest, Option<Responder>) -> Result<CallOutcome, InvokeError> + Send + Sync;

pub struct FnFunction {
    arity: usize,
    body: Box<CallFn>,
}

impl FnFunction {
    pub fn new(
        arity: usize,
        body: impl Fn(InvocationRequest, Option<Responder>) -> Result<CallOutcome, InvokeError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<dyn UserFunction> {
        Arc::new(Self {
            arity,
            body: Box::new(body),
        })
    }
}

impl UserFunction for FnFunction {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(
        &self,
        request: InvocationRequest,
        responder: Option<Responder>,
    ) -> BoxFuture<'_, Result<CallOutcome, InvokeError>> {
        let outcome = (self.body)(request, responder);
        Box::pin(async move { outcome })
    }
}

pub fn text_record(status: f64, text: &str) -> Record {
    Record::new(status).with_body(Payload::Text(text.to_string()))
}

/// Function returning `{ status, body: text }` synchronously
pub fn record_fn(arity: usize, status: f64, text: &str) -> Arc<dyn UserFunction> {
    let record = text_record(status, text);
    FnFunction::new(arity, move |_, _| {
        Ok(CallOutcome::Ready(Returned::Record(record.clone())))
    })
}

/// Future that never completes
pub fn pending<T: Send + 'static>() -> BoxFuture<'static, T> {
    Box::pin(std::future::pending())
}

#[derive(Clone, Default)]
pub struct FnModule {
    exports: HashMap<String, Export>,
    default_members: HashMap<String, Export>,
}

impl FnModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(mut self, name: &str, func: Arc<dyn UserFunction>) -> Self {
        self.exports.insert(name.to_string(), Export::Function(func));
        self
    }

    pub fn value(mut self, name: &str) -> Self {
        self.exports.insert(name.to_string(), Export::Value);
        self
    }

    pub fn default_function(self, func: Arc<dyn UserFunction>) -> Self {
        self.function("default", func)
    }

    pub fn default_value(self) -> Self {
        self.value("default")
    }

    pub fn default_member(mut self, name: &str, func: Arc<dyn UserFunction>) -> Self {
        self.default_members
            .insert(name.to_string(), Export::Function(func));
        self
    }
}

impl LoadedModule for FnModule {
    fn export(&self, name: &str) -> Option<Export> {
        self.exports.get(name).cloned()
    }

    fn default_member(&self, name: &str) -> Option<Export> {
        self.default_members.get(name).cloned()
    }

    fn list_callables(&self) -> Vec<Arc<dyn UserFunction>> {
        self.exports
            .values()
            .filter_map(|export| match export {
                Export::Function(func) => Some(Arc::clone(func)),
                Export::Value => None,
            })
            .collect()
    }
}

/// Loader serving pre-registered modules by resolved path
#[derive(Default)]
pub struct FnLoader {
    modules: HashMap<PathBuf, FnModule>,
    loads: AtomicUsize,
}

impl FnLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, path: impl Into<PathBuf>, module: FnModule) -> Self {
        self.modules.insert(path.into(), module);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for FnLoader {
    fn load<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<Box<dyn LoadedModule>, LoadError>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.modules
                .get(path)
                .cloned()
                .map(|m| Box::new(m) as Box<dyn LoadedModule>)
                .ok_or_else(|| LoadError::Evaluate {
                    path: path.to_path_buf(),
                    message: "module not registered".to_string(),
                })
        })
    }
}
