//! Lifecycle of the script engine thread and the per-tick message pump.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::command::CommandId;
use crate::config::BridgeConfig;
use crate::engine::{
    EngineContext, EngineEnvironment, EngineFactory, InterpreterLock, InterpreterState, ScriptInfo,
};
use crate::error::{BridgeError, EngineError};
use crate::game::{CoreState, GameLock, GameMode, PauseMode};
use crate::instance::ScriptBridgeInstance;
use crate::message::{Flow, Message, EXIT_CODE_FAILED};
use crate::perf::PerfMeasurer;
use crate::queue::{LockedQueue, NotifyingQueue};

/// Result of [`TaskController::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// A previous engine was told to stop but its thread has not exited yet.
    StillStopping,
}

/// Last game and pause mode reported to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ObservedState {
    game_mode: GameMode,
    pause_mode: PauseMode,
}

impl ObservedState {
    fn new(game_mode: GameMode) -> Self {
        Self {
            game_mode,
            pause_mode: PauseMode::empty(),
        }
    }

    /// Notifications for every value that changed since the last call.
    fn track(&mut self, game_mode: GameMode, pause_mode: PauseMode) -> Vec<Message> {
        let mut edges = Vec::new();
        if game_mode != self.game_mode {
            self.game_mode = game_mode;
            edges.push(Message::ModeChanged { mode: game_mode });
        }
        if pause_mode != self.pause_mode {
            self.pause_mode = pause_mode;
            edges.push(Message::PauseChanged { mode: pause_mode });
        }
        edges
    }
}

/// One run of the engine thread together with its two queues.
pub(crate) struct Task {
    pub(crate) to_engine: NotifyingQueue<Message>,
    pub(crate) to_core: LockedQueue<Message>,
    pub(crate) interpreter: InterpreterLock,
    stopped: AtomicBool,
    observed: Mutex<ObservedState>,
    scripted_run: bool,
    run_ended: AtomicBool,
    failure: Mutex<Option<String>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    fn new(game_mode: GameMode, scripted_run: bool) -> Self {
        Self {
            to_engine: NotifyingQueue::new(),
            to_core: LockedQueue::new(),
            interpreter: Arc::new(Mutex::new(InterpreterState::default())),
            stopped: AtomicBool::new(false),
            observed: Mutex::new(ObservedState::new(game_mode)),
            scripted_run,
            run_ended: AtomicBool::new(false),
            failure: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Mark the task stopped and tell the engine, once.
    pub(crate) fn signal_stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.to_engine.send(Message::Stop);
        }
    }

    fn is_finished(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    fn join(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            tracing::warn!(target: "script_bridge::task", "engine.join=skipped_self");
            return;
        }
        if handle.join().is_err() {
            tracing::error!(target: "script_bridge::task", "engine.join=panicked");
        }
    }
}

/// Sends core-originated messages to whichever engine is currently running.
#[derive(Clone)]
pub struct TaskSender {
    controller: Weak<ControllerInner>,
}

impl TaskSender {
    /// A sender with no controller behind it; every send is dropped.
    pub(crate) fn detached() -> Self {
        Self {
            controller: Weak::new(),
        }
    }

    pub fn send(&self, message: Message) {
        match self.controller.upgrade() {
            Some(inner) => inner.send(message),
            None => tracing::trace!(
                target: "script_bridge::task",
                kind = message.kind(),
                "send.dropped=no_controller"
            ),
        }
    }
}

struct ControllerInner {
    config: Arc<BridgeConfig>,
    game: GameLock,
    factory: EngineFactory,
    instance: Arc<ScriptBridgeInstance>,
    current: Mutex<Option<Arc<Task>>>,
    lifecycle: Mutex<()>,
}

impl ControllerInner {
    fn running_task(&self) -> Option<Arc<Task>> {
        self.current
            .lock()
            .as_ref()
            .filter(|task| !task.is_stopped())
            .cloned()
    }

    fn send(&self, message: Message) {
        match self.running_task() {
            Some(task) => task.to_engine.send(message),
            None => tracing::trace!(
                target: "script_bridge::task",
                kind = message.kind(),
                "send.dropped=not_running"
            ),
        }
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if let Some(task) = self.current.get_mut().take() {
            task.signal_stop();
            task.join();
        }
    }
}

/// Owner of the script engine thread.
///
/// Cloning yields another handle to the same controller. The engine thread is
/// stopped and joined when the last handle goes away, so drop it without the
/// game lock held.
#[derive(Clone)]
pub struct TaskController {
    inner: Arc<ControllerInner>,
}

impl TaskController {
    /// Create the controller and register its bridge instance with the core as
    /// the receiver of command completions. Takes the game lock briefly.
    pub fn new(config: Arc<BridgeConfig>, game: GameLock, factory: EngineFactory) -> Self {
        let inner = Arc::new_cyclic(|controller| ControllerInner {
            config,
            game: game.clone(),
            factory,
            instance: Arc::new(ScriptBridgeInstance::new(TaskSender {
                controller: controller.clone(),
            })),
            current: Mutex::new(None),
            lifecycle: Mutex::new(()),
        });
        game.lock()
            .register_engine_instance(Arc::clone(&inner.instance) as _);
        Self { inner }
    }

    pub fn instance(&self) -> &Arc<ScriptBridgeInstance> {
        &self.inner.instance
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running_task().is_some()
    }

    /// Spawn the engine thread and queue the startup handshake: the current
    /// game mode, [`Message::Start`], then [`Message::CommandRunStarted`] when
    /// `entry_label` is non-empty.
    ///
    /// Called on the simulation thread with the game lock held. Never waits
    /// for a concurrent [`stop`](Self::stop): an engine being joined may need
    /// the game lock, so that case reports [`StartOutcome::StillStopping`].
    pub fn start(&self, core: &CoreState, entry_label: &str) -> Result<StartOutcome, BridgeError> {
        let Some(_lifecycle) = self.inner.lifecycle.try_lock() else {
            tracing::debug!(target: "script_bridge::task", "engine.start=lifecycle_busy");
            return Ok(StartOutcome::StillStopping);
        };
        let mut current = self.inner.current.lock();

        if let Some(task) = current.as_ref() {
            if !task.is_stopped() {
                tracing::debug!(target: "script_bridge::task", "engine.start=already_running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            if !task.is_finished() {
                tracing::debug!(target: "script_bridge::task", "engine.start=still_stopping");
                return Ok(StartOutcome::StillStopping);
            }
            task.join();
            *current = None;
        }

        self.inner.instance.discard_call_state();
        let task = Arc::new(Task::new(core.game_mode(), !entry_label.is_empty()));
        task.to_engine.send(Message::ModeChanged {
            mode: core.game_mode(),
        });
        task.to_engine.send(Message::Start);
        if !entry_label.is_empty() {
            task.to_engine.send(Message::CommandRunStarted {
                label: entry_label.to_string(),
            });
        }

        let handle = {
            let task = Arc::clone(&task);
            let game = self.inner.game.clone();
            let instance = Arc::clone(&self.inner.instance);
            let factory = Arc::clone(&self.inner.factory);
            let environment = self.inner.config.engine_environment();
            thread::Builder::new()
                .name(self.inner.config.thread_name().to_string())
                .spawn(move || engine_main(task, game, instance, factory, environment))
                .map_err(|err| BridgeError::Spawn(err.to_string()))?
        };
        *task.thread.lock() = Some(handle);
        *current = Some(task);

        tracing::info!(
            target: "script_bridge::task",
            label = %entry_label,
            "engine.start=spawned"
        );
        Ok(StartOutcome::Started)
    }

    /// Stop the engine and wait for its thread to exit. Does nothing when no
    /// engine exists. Must not be called with the game lock held.
    pub fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock();
        let Some(task) = self.inner.current.lock().take() else {
            return;
        };
        task.signal_stop();
        tracing::info!(target: "script_bridge::task", "engine.stop=joining");
        task.join();
        tracing::info!(target: "script_bridge::task", "engine.stop=joined");
    }

    /// Queue a message for the engine; dropped when it is not running.
    pub fn send(&self, message: Message) {
        self.inner.send(message);
    }

    /// Forward console tokens to the engine, or tell the user it is not there.
    pub fn console_command(&self, core: &mut CoreState, args: Vec<String>) {
        if self.is_running() {
            self.send(Message::ConsoleCommand { args });
        } else {
            core.print_console(self.inner.config.not_running_message());
        }
    }

    /// Per-tick pump, called on the simulation thread with the game lock held.
    ///
    /// Reports game/pause mode edges to the engine, then processes everything
    /// the engine queued, in order. A stopped engine is finalised here once
    /// its thread has exited.
    pub fn process_from_engine(&self, core: &mut CoreState) {
        let task = self.inner.current.lock().clone();
        let Some(task) = task else {
            core.perf().set_inactive();
            return;
        };
        if task.is_stopped() {
            core.perf().set_inactive();
            self.finalize(core, &task);
            return;
        }

        let _measure = PerfMeasurer::start(Arc::clone(core.perf()));
        let edges = task
            .observed
            .lock()
            .track(core.game_mode(), core.pause_mode());
        for edge in edges {
            task.to_engine.send(edge);
        }

        while !task.is_stopped() {
            let Some(message) = task.to_core.recv() else {
                break;
            };
            tracing::trace!(
                target: "script_bridge::task",
                kind = message.kind(),
                "core.process"
            );
            if matches!(message, Message::CommandRunEnded { .. }) {
                task.run_ended.store(true, Ordering::SeqCst);
            }
            if message.process(core) == Flow::StopRequested {
                task.signal_stop();
            }
        }
    }

    fn finalize(&self, core: &mut CoreState, task: &Arc<Task>) {
        if !task.is_finished() {
            return;
        }
        let Some(_lifecycle) = self.inner.lifecycle.try_lock() else {
            return;
        };
        {
            let mut current = self.inner.current.lock();
            if !current.as_ref().map_or(false, |c| Arc::ptr_eq(c, task)) {
                return;
            }
            *current = None;
        }
        task.join();

        if let Some(failure) = task.failure.lock().take() {
            core.print_console(&format!("Script engine stopped: {failure}"));
            let unfinished_run = task.scripted_run && !task.run_ended.load(Ordering::SeqCst);
            if unfinished_run && core.exit_request().is_none() {
                core.request_exit(EXIT_CODE_FAILED);
            }
        }
        tracing::info!(target: "script_bridge::task", "engine.finalized");
    }

    /// Whether the engine relayed `command` with `payload` and still awaits
    /// its result.
    pub fn check_pending(&self, command: CommandId, payload: &[u8]) -> bool {
        let Some(task) = self.inner.running_task() else {
            return false;
        };
        let state = task.interpreter.lock();
        !task.is_stopped() && state.is_pending(command, payload)
    }

    pub fn script_ids(&self) -> Vec<u32> {
        let Some(task) = self.inner.running_task() else {
            return Vec::new();
        };
        let state = task.interpreter.lock();
        if task.is_stopped() {
            return Vec::new();
        }
        state.script_ids()
    }

    pub fn script_info(&self, id: u32) -> Option<ScriptInfo> {
        let task = self.inner.running_task()?;
        let state = task.interpreter.lock();
        if task.is_stopped() {
            return None;
        }
        state.script(id).cloned()
    }
}

fn engine_main(
    task: Arc<Task>,
    game: GameLock,
    instance: Arc<ScriptBridgeInstance>,
    factory: EngineFactory,
    environment: EngineEnvironment,
) {
    let interpreter = Arc::clone(&task.interpreter);
    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<(), EngineError> {
        let mut engine = factory();
        let mut ctx = EngineContext::new(Arc::clone(&task), game, instance, &interpreter);
        engine.initialize(&environment)?;
        engine.run(&mut ctx)
    }));

    let failure = match outcome {
        Ok(Ok(())) => {
            tracing::info!(target: "script_bridge::task", "engine.exit=clean");
            None
        }
        Ok(Err(err)) => {
            tracing::error!(target: "script_bridge::task", error = %err, "engine.exit=error");
            Some(err.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(target: "script_bridge::task", panic = %message, "engine.exit=panic");
            Some(format!("panic: {message}"))
        }
    };
    *task.failure.lock() = failure;
    task.signal_stop();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
