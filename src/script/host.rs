//! The thread owning the QuickJS runtime
//!
//! Every touch of the JS heap happens here. The rest of the process talks
//! to it through [`Command`]s and gets plain Rust values back.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use rquickjs::prelude::Opt;
use rquickjs::promise::PromiseState;
use rquickjs::{Context, Ctx, Function, Module, Object, Persistent, Promise, Runtime, Value};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use super::convert;
use super::imports::{ImportLoader, ImportResolver};
use super::ScriptOptions;
use crate::engine::error::{InvokeError, LoadError};
use crate::engine::module::Responder;
use crate::engine::value::{InvocationRequest, Returned};

const PRELUDE: &str = include_str!("prelude.js");
const NATIVE_BINDINGS: &str = "__fissionNative";
const LOG_TARGET: &str = "userfunc";

// Browsers clamp timer delays to a signed 32-bit millisecond count.
const MAX_TIMER_DELAY_MS: f64 = 2_147_483_647.0;

pub(super) type Deferred = oneshot::Receiver<Result<Returned, InvokeError>>;

pub(super) enum Command {
    Load {
        path: PathBuf,
        reply: oneshot::Sender<Result<ModuleSnapshot, LoadError>>,
    },
    Call {
        function: usize,
        request: InvocationRequest,
        responder: Option<Responder>,
        reply: oneshot::Sender<Result<CallReply, InvokeError>>,
    },
    Timer {
        id: u32,
    },
    /// A registered function nobody can call anymore
    Release {
        function: usize,
    },
}

pub(super) enum CallReply {
    Ready(Returned),
    Deferred(Deferred),
}

#[derive(Debug, Clone, Copy)]
pub(super) enum ExportEntry {
    Function { id: usize, arity: usize },
    Value,
}

/// Exports of an evaluated module, with functions registered by id
#[derive(Debug, Default)]
pub(super) struct ModuleSnapshot {
    pub exports: Vec<(String, ExportEntry)>,
    pub default_members: Vec<(String, ExportEntry)>,
}

#[derive(Default)]
struct Timers {
    next_id: u32,
    pending: HashMap<u32, (Persistent<Function<'static>>, AbortHandle)>,
}

type SharedTimers = Rc<RefCell<Timers>>;

#[derive(Default)]
struct Registry {
    next_id: usize,
    functions: HashMap<usize, Persistent<Function<'static>>>,
}

impl Registry {
    fn register(&mut self, function: Persistent<Function<'static>>) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.functions.insert(id, function);
        id
    }

    /// Drop everything registered at or after `mark`
    fn rollback(&mut self, mark: usize) -> Vec<Persistent<Function<'static>>> {
        let ids: Vec<usize> = self.functions.keys().copied().filter(|id| *id >= mark).collect();
        ids.iter()
            .filter_map(|id| self.functions.remove(id))
            .collect()
    }
}

/// A module whose top-level await is still running
struct PendingEvaluation {
    namespace: Persistent<Object<'static>>,
    promise: Persistent<Promise<'static>>,
}

enum Evaluation {
    Done(ModuleSnapshot),
    Pending(PendingEvaluation),
}

struct Host {
    runtime: Runtime,
    context: Context,
    registry: Registry,
    timers: SharedTimers,
}

const UNSETTLED_AWAIT: &str = "Top-level await did not settle";

/// Thread body: report startup, then serve commands until every handle drops.
pub(super) fn run(
    options: ScriptOptions,
    handle: Handle,
    mut commands: mpsc::UnboundedReceiver<Command>,
    timer_sender: mpsc::WeakUnboundedSender<Command>,
    ready: std_mpsc::Sender<Result<(), String>>,
) {
    let mut host = match Host::new(&options, handle, timer_sender) {
        Ok(host) => {
            let _ = ready.send(Ok(()));
            host
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Commands that arrived while a module load was waiting on timers
    let mut backlog = VecDeque::new();

    loop {
        let command = match backlog.pop_front() {
            Some(command) => command,
            None => match commands.blocking_recv() {
                Some(command) => command,
                None => break,
            },
        };
        match command {
            Command::Load { path, reply } => {
                let loaded = host.load(&path, &mut commands, &mut backlog);
                let _ = reply.send(loaded);
            }
            Command::Call {
                function,
                request,
                responder,
                reply,
            } => {
                let _ = reply.send(host.call(function, &request, responder));
            }
            Command::Timer { id } => host.fire_timer(id),
            Command::Release { function } => host.release(function),
        }
        host.drain_jobs();
    }

    host.shutdown();
    tracing::debug!("Script host stopped");
}

impl Host {
    fn new(
        options: &ScriptOptions,
        handle: Handle,
        timer_sender: mpsc::WeakUnboundedSender<Command>,
    ) -> Result<Self, String> {
        let runtime = Runtime::new().map_err(|e| e.to_string())?;
        runtime.set_memory_limit(options.memory_limit);
        runtime.set_max_stack_size(options.max_stack_size);
        runtime.set_loader(
            ImportResolver::new(options.shared_modules.clone()),
            ImportLoader,
        );
        let context = Context::full(&runtime).map_err(|e| e.to_string())?;
        let timers = SharedTimers::default();

        context.with(|ctx| {
            install_natives(&ctx, &timers, handle, timer_sender)
                .and_then(|()| ctx.eval::<(), _>(PRELUDE))
                .map_err(|e| convert::describe_error(&ctx, e))
        })?;

        Ok(Self {
            runtime,
            context,
            registry: Registry::default(),
            timers,
        })
    }

    fn load(
        &mut self,
        path: &Path,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        backlog: &mut VecDeque<Command>,
    ) -> Result<ModuleSnapshot, LoadError> {
        let source = std::fs::read(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path.to_string_lossy().into_owned();
        let mark = self.registry.next_id;

        let registry = &mut self.registry;
        let evaluated = self
            .context
            .with(|ctx| evaluate_module(&ctx, name, source, registry));
        // Module bodies may queue work (top-level promise chains, timers).
        self.drain_jobs();

        let loaded = match evaluated {
            Ok(Evaluation::Done(snapshot)) => Ok(snapshot),
            Ok(Evaluation::Pending(pending)) => self.await_evaluation(&pending, commands, backlog),
            Err(message) => Err(message),
        };

        loaded.map_err(|message| {
            let stale = self.registry.rollback(mark);
            self.context.with(|_| drop(stale));
            LoadError::Evaluate {
                path: path.to_path_buf(),
                message,
            }
        })
    }

    /// Fire timers until a top-level await settles. Anything else that
    /// arrives meanwhile is queued for the main loop.
    fn await_evaluation(
        &mut self,
        pending: &PendingEvaluation,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        backlog: &mut VecDeque<Command>,
    ) -> Result<ModuleSnapshot, String> {
        loop {
            let registry = &mut self.registry;
            let settled = self
                .context
                .with(|ctx| finish_evaluation(&ctx, pending, registry));
            if let Some(settled) = settled {
                return settled;
            }
            if self.timers.borrow().pending.is_empty() {
                return Err(UNSETTLED_AWAIT.to_string());
            }
            match commands.blocking_recv() {
                Some(Command::Timer { id }) => self.fire_timer(id),
                Some(command) => backlog.push_back(command),
                None => return Err(UNSETTLED_AWAIT.to_string()),
            }
            self.drain_jobs();
        }
    }

    fn release(&mut self, function: usize) {
        if let Some(function) = self.registry.functions.remove(&function) {
            self.context.with(|_| drop(function));
        }
    }

    fn call(
        &self,
        function: usize,
        request: &InvocationRequest,
        responder: Option<Responder>,
    ) -> Result<CallReply, InvokeError> {
        let function = self
            .registry
            .functions
            .get(&function)
            .cloned()
            .ok_or(InvokeError::HostUnavailable)?;
        self.context
            .with(|ctx| call_function(&ctx, function, request, responder))
    }

    fn fire_timer(&self, id: u32) {
        let entry = self.timers.borrow_mut().pending.remove(&id);
        let Some((callback, _)) = entry else {
            return;
        };
        self.context.with(|ctx| {
            let fired = callback
                .restore(&ctx)
                .and_then(|callback| callback.call::<_, ()>(()));
            if let Err(e) = fired {
                let message = convert::describe_error(&ctx, e);
                tracing::error!(target: LOG_TARGET, error = %message, "Uncaught exception in timer");
            }
        });
    }

    fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::error!(target: LOG_TARGET, error = %e, "Uncaught exception in job");
                }
            }
        }
    }

    // Values rooted from Rust must be released before the runtime is freed.
    fn shutdown(self) {
        let Self {
            runtime,
            context,
            registry,
            timers,
        } = self;
        drop(registry);
        for (_, (callback, task)) in timers.borrow_mut().pending.drain() {
            task.abort();
            drop(callback);
        }
        drop(context);
        drop(runtime);
    }
}

fn install_natives<'js>(
    ctx: &Ctx<'js>,
    timers: &SharedTimers,
    handle: Handle,
    timer_sender: mpsc::WeakUnboundedSender<Command>,
) -> rquickjs::Result<()> {
    let native = Object::new(ctx.clone())?;

    native.set(
        "log",
        Function::new(ctx.clone(), |level: String, message: String| {
            match level.as_str() {
                "trace" => tracing::trace!(target: LOG_TARGET, "{message}"),
                "debug" => tracing::debug!(target: LOG_TARGET, "{message}"),
                "warn" => tracing::warn!(target: LOG_TARGET, "{message}"),
                "error" => tracing::error!(target: LOG_TARGET, "{message}"),
                _ => tracing::info!(target: LOG_TARGET, "{message}"),
            }
        })?,
    )?;

    let scheduled = Rc::clone(timers);
    native.set(
        "setTimeout",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, callback: Function<'js>, delay: Opt<f64>| -> u32 {
                let delay = delay.0.filter(|ms| ms.is_finite()).unwrap_or(0.0);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let delay = Duration::from_millis(delay.clamp(0.0, MAX_TIMER_DELAY_MS) as u64);

                let mut timers = scheduled.borrow_mut();
                timers.next_id = timers.next_id.wrapping_add(1).max(1);
                let id = timers.next_id;

                let sender = timer_sender.clone();
                let task = handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(sender) = sender.upgrade() {
                        let _ = sender.send(Command::Timer { id });
                    }
                });
                timers
                    .pending
                    .insert(id, (Persistent::save(&ctx, callback), task.abort_handle()));
                id
            },
        )?,
    )?;

    let cleared = Rc::clone(timers);
    native.set(
        "clearTimeout",
        Function::new(ctx.clone(), move |id: u32| {
            let entry = cleared.borrow_mut().pending.remove(&id);
            if let Some((_, task)) = entry {
                task.abort();
            }
        })?,
    )?;

    ctx.globals().set(NATIVE_BINDINGS, native)
}

fn evaluate_module<'js>(
    ctx: &Ctx<'js>,
    name: String,
    source: Vec<u8>,
    registry: &mut Registry,
) -> Result<Evaluation, String> {
    let describe = |e| convert::describe_error(ctx, e);

    let declared = Module::declare(ctx.clone(), name, source).map_err(describe)?;
    let (module, promise) = declared.eval().map_err(describe)?;
    let namespace = module.namespace().map_err(describe)?;
    match promise.finish::<()>() {
        Ok(()) => snapshot(ctx, &namespace, registry)
            .map(Evaluation::Done)
            .map_err(describe),
        // Waiting on something outside the job queue, most likely a timer.
        Err(rquickjs::Error::WouldBlock) => Ok(Evaluation::Pending(PendingEvaluation {
            namespace: Persistent::save(ctx, namespace),
            promise: Persistent::save(ctx, promise),
        })),
        Err(e) => Err(describe(e)),
    }
}

/// `None` while the evaluation promise is still pending
fn finish_evaluation<'js>(
    ctx: &Ctx<'js>,
    pending: &PendingEvaluation,
    registry: &mut Registry,
) -> Option<Result<ModuleSnapshot, String>> {
    let describe = |e| convert::describe_error(ctx, e);

    let promise = match pending.promise.clone().restore(ctx) {
        Ok(promise) => promise,
        Err(e) => return Some(Err(describe(e))),
    };
    if promise.state() == PromiseState::Pending {
        return None;
    }
    let settled = promise
        .result::<()>()
        .unwrap_or(Ok(()))
        .and_then(|()| pending.namespace.clone().restore(ctx))
        .and_then(|namespace| snapshot(ctx, &namespace, registry))
        .map_err(describe);
    Some(settled)
}

fn snapshot<'js>(
    ctx: &Ctx<'js>,
    namespace: &Object<'js>,
    registry: &mut Registry,
) -> rquickjs::Result<ModuleSnapshot> {
    let helpers = convert::host_helpers(ctx)?;
    let members: Function = helpers.get("members")?;
    let mut snapshot = ModuleSnapshot::default();

    for key in namespace.keys::<String>() {
        let key = key?;
        let value: Value = namespace.get(key.as_str())?;

        if key == "default" {
            if let Some(target) = value.as_object() {
                let names: Vec<String> = members.call((value.clone(),))?;
                for name in names {
                    // Accessors that throw are not members worth offering.
                    let Ok(member) = target.get::<_, Value>(name.as_str()) else {
                        let _ = ctx.catch();
                        continue;
                    };
                    if let Some(entry) = register(ctx, member, registry)? {
                        snapshot.default_members.push((name, entry));
                    }
                }
            }
        }

        if let Some(entry) = register(ctx, value, registry)? {
            snapshot.exports.push((key, entry));
        }
    }
    Ok(snapshot)
}

fn register<'js>(
    ctx: &Ctx<'js>,
    value: Value<'js>,
    registry: &mut Registry,
) -> rquickjs::Result<Option<ExportEntry>> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    let Some(function) = value.into_function() else {
        return Ok(Some(ExportEntry::Value));
    };

    let length: Value = function.get("length")?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let arity = length.as_number().unwrap_or(0.0).max(0.0) as usize;

    let id = registry.register(Persistent::save(ctx, function));
    Ok(Some(ExportEntry::Function { id, arity }))
}

fn call_function<'js>(
    ctx: &Ctx<'js>,
    function: Persistent<Function<'static>>,
    request: &InvocationRequest,
    responder: Option<Responder>,
) -> Result<CallReply, InvokeError> {
    let thrown = |e| InvokeError::Thrown(convert::describe_error(ctx, e));

    let function = function.restore(ctx).map_err(thrown)?;
    let helpers = convert::host_helpers(ctx).map_err(thrown)?;
    let context = convert::invocation_context(ctx, &helpers, request).map_err(thrown)?;

    let callback_mode = responder.is_some();
    let returned: Value = match responder {
        Some(responder) => {
            let callback = completion_callback(ctx, responder).map_err(thrown)?;
            function.call((context, callback))
        }
        None => function.call((context,)),
    }
    .map_err(thrown)?;

    if convert::is_thenable(&helpers, &returned).map_err(thrown)? {
        return attach_reactions(ctx, &helpers, returned)
            .map(CallReply::Deferred)
            .map_err(thrown);
    }
    if callback_mode {
        return Ok(CallReply::Ready(Returned::Undefined));
    }
    convert::to_returned(ctx, &helpers, returned)
        .map(CallReply::Ready)
        .map_err(|e| InvokeError::contract(convert::describe_error(ctx, e)))
}

/// The `callback(status, body, headers)` handed to two-parameter functions
fn completion_callback<'js>(
    ctx: &Ctx<'js>,
    responder: Responder,
) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>,
              status: Opt<Value<'js>>,
              body: Opt<Value<'js>>,
              headers: Opt<Value<'js>>|
              -> rquickjs::Result<()> {
            let helpers = convert::host_helpers(&ctx)?;
            let record = convert::to_record(&ctx, &helpers, status.0, body.0, headers.0)?;
            responder.respond(record);
            Ok(())
        },
    )
}

fn attach_reactions<'js>(
    ctx: &Ctx<'js>,
    helpers: &Object<'js>,
    thenable: Value<'js>,
) -> rquickjs::Result<Deferred> {
    let (sender, receiver) = oneshot::channel();
    let sender = Rc::new(RefCell::new(Some(sender)));

    let fulfilled = {
        let sender = Rc::clone(&sender);
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, value: Value<'js>| {
            let outcome = convert::host_helpers(&ctx)
                .and_then(|helpers| convert::to_returned(&ctx, &helpers, value))
                .map_err(|e| InvokeError::contract(convert::describe_error(&ctx, e)));
            if let Some(sender) = sender.borrow_mut().take() {
                let _ = sender.send(outcome);
            }
        })?
    };
    let rejected = Function::new(ctx.clone(), move |ctx: Ctx<'js>, reason: Value<'js>| {
        let reason = convert::describe_value(&ctx, reason);
        if let Some(sender) = sender.borrow_mut().take() {
            let _ = sender.send(Err(InvokeError::Rejected(reason)));
        }
    })?;

    let settle: Function = helpers.get("settle")?;
    settle.call::<_, ()>((thenable, fulfilled, rejected))?;
    Ok(receiver)
}
