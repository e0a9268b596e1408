//! Embedded JavaScript runtime for user functions
//!
//! [`ScriptHost`] is a cheap, cloneable handle to a dedicated thread that
//! owns a QuickJS runtime. It implements [`ModuleLoader`], so the engine can
//! load ES modules and call their exports without ever touching the heap.

mod convert;
mod host;
mod imports;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::engine::error::{InvokeError, LoadError};
use crate::engine::module::{
    BoxFuture, CallOutcome, Export, LoadedModule, ModuleLoader, Responder, UserFunction,
};
use crate::engine::value::InvocationRequest;
use host::{CallReply, Command, ExportEntry, ModuleSnapshot};

// Native frames on top of the JS stack budget.
const THREAD_STACK_HEADROOM: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Script host requires a Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error("Failed to spawn script host thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Failed to start script host: {0}")]
    Startup(String),
}

#[derive(Debug, Clone)]
pub struct ScriptOptions {
    /// Heap limit in bytes, 0 for none
    pub memory_limit: usize,
    pub max_stack_size: usize,
    /// Fallback directory for bare `import` specifiers
    pub shared_modules: PathBuf,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            memory_limit: 256 * 1024 * 1024,
            max_stack_size: 1024 * 1024,
            shared_modules: PathBuf::from("/app/node_modules"),
        }
    }
}

#[derive(Clone)]
pub struct ScriptHost {
    commands: mpsc::UnboundedSender<Command>,
}

impl ScriptHost {
    /// Spawn the runtime thread. Must be called from within a Tokio runtime;
    /// timers are scheduled on it.
    pub fn start(options: ScriptOptions) -> Result<Self, HostError> {
        let handle = Handle::try_current()?;
        let (commands, receiver) = mpsc::unbounded_channel();
        let timer_sender = commands.downgrade();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let stack_size = options.max_stack_size.saturating_add(THREAD_STACK_HEADROOM);
        std::thread::Builder::new()
            .name("script-host".to_string())
            .stack_size(stack_size)
            .spawn(move || host::run(options, handle, receiver, timer_sender, ready_tx))?;

        ready_rx
            .recv()
            .map_err(|_| HostError::Startup("host thread exited during startup".to_string()))?
            .map_err(HostError::Startup)?;

        tracing::debug!("Script host started");
        Ok(Self { commands })
    }
}

impl ModuleLoader for ScriptHost {
    fn load<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<Box<dyn LoadedModule>, LoadError>> {
        Box::pin(async move {
            let (reply, response) = oneshot::channel();
            self.commands
                .send(Command::Load {
                    path: path.to_path_buf(),
                    reply,
                })
                .map_err(|_| LoadError::HostUnavailable)?;
            let snapshot = response.await.map_err(|_| LoadError::HostUnavailable)??;
            Ok(Box::new(ScriptModule::new(snapshot, self)) as Box<dyn LoadedModule>)
        })
    }
}

struct ScriptModule {
    exports: HashMap<String, Export>,
    default_members: HashMap<String, Export>,
    callables: Vec<Arc<dyn UserFunction>>,
}

impl ScriptModule {
    fn new(snapshot: ModuleSnapshot, host: &ScriptHost) -> Self {
        let materialize = |entry: ExportEntry| match entry {
            ExportEntry::Function { id, arity } => Export::Function(Arc::new(ScriptFunction {
                id,
                arity,
                host: host.clone(),
            })),
            ExportEntry::Value => Export::Value,
        };

        let mut exports = HashMap::new();
        let mut callables = Vec::new();
        for (name, entry) in snapshot.exports {
            let export = materialize(entry);
            if let Export::Function(func) = &export {
                callables.push(Arc::clone(func));
            }
            exports.insert(name, export);
        }
        let default_members = snapshot
            .default_members
            .into_iter()
            .map(|(name, entry)| (name, materialize(entry)))
            .collect();

        Self {
            exports,
            default_members,
            callables,
        }
    }
}

impl LoadedModule for ScriptModule {
    fn export(&self, name: &str) -> Option<Export> {
        self.exports.get(name).cloned()
    }

    fn default_member(&self, name: &str) -> Option<Export> {
        self.default_members.get(name).cloned()
    }

    fn list_callables(&self) -> Vec<Arc<dyn UserFunction>> {
        self.callables.clone()
    }
}

/// A function living on the script heap, addressed by registration id
struct ScriptFunction {
    id: usize,
    arity: usize,
    host: ScriptHost,
}

impl UserFunction for ScriptFunction {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(
        &self,
        request: InvocationRequest,
        responder: Option<Responder>,
    ) -> BoxFuture<'_, Result<CallOutcome, InvokeError>> {
        Box::pin(async move {
            let (reply, response) = oneshot::channel();
            self.host
                .commands
                .send(Command::Call {
                    function: self.id,
                    request,
                    responder,
                    reply,
                })
                .map_err(|_| InvokeError::HostUnavailable)?;

            match response.await.map_err(|_| InvokeError::HostUnavailable)?? {
                CallReply::Ready(value) => Ok(CallOutcome::Ready(value)),
                CallReply::Deferred(settled) => Ok(CallOutcome::Deferred(Box::pin(async move {
                    match settled.await {
                        Ok(outcome) => outcome,
                        // The heap dropped a promise nobody can settle anymore.
                        Err(_) => std::future::pending().await,
                    }
                }))),
            }
        })
    }
}

// Unselected exports and failed specializations let go of their heap roots.
impl Drop for ScriptFunction {
    fn drop(&mut self) {
        let _ = self.host.commands.send(Command::Release { function: self.id });
    }
}
