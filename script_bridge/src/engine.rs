//! The engine side of the bridge: the trait a script runtime implements and
//! the primitives its event loop uses on the engine thread.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::command::{CapturedCommand, CommandId, CompanyId};
use crate::error::{BridgeError, EngineError};
use crate::game::GameLock;
use crate::instance::ScriptBridgeInstance;
use crate::lock_scope::{run_locked, CoreCall};
use crate::message::Message;
use crate::mode::TrialProbe;
use crate::queue::Generation;
use crate::script_api::ScriptApi;
use crate::storage::ScriptStorage;
use crate::task::Task;

/// Startup parameters forwarded to the engine before its run loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEnvironment {
    pub search_paths: Vec<PathBuf>,
    pub debug_level: u8,
}

/// A script runtime driven by the bridge on its own thread.
pub trait ScriptEngine {
    fn initialize(&mut self, environment: &EngineEnvironment) -> Result<(), EngineError>;

    /// The engine's event loop. Returning ends the engine thread.
    fn run(&mut self, ctx: &mut EngineContext<'_>) -> Result<(), EngineError>;
}

/// Builds a fresh engine on the engine thread each time the bridge starts.
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn ScriptEngine> + Send + Sync>;

/// A script registered by the engine, visible to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptInfo {
    pub id: u32,
    pub company: CompanyId,
    pub class_name: String,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingCommand {
    command: CommandId,
    payload: Vec<u8>,
}

/// Engine-side state guarded by the interpreter lock.
#[derive(Debug)]
pub struct InterpreterState {
    /// Whether the engine currently only estimates commands.
    pub estimating: bool,
    /// Storage used for the next locked call into the core.
    pub storage: Option<Arc<ScriptStorage>>,
    pending: Vec<PendingCommand>,
    scripts: BTreeMap<u32, ScriptInfo>,
}

impl Default for InterpreterState {
    fn default() -> Self {
        Self {
            estimating: true,
            storage: None,
            pending: Vec::new(),
            scripts: BTreeMap::new(),
        }
    }
}

impl InterpreterState {
    pub fn is_pending(&self, command: CommandId, payload: &[u8]) -> bool {
        self.pending
            .iter()
            .any(|pending| pending.command == command && pending.payload == payload)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn push_pending(&mut self, command: CommandId, payload: Vec<u8>) {
        self.pending.push(PendingCommand { command, payload });
    }

    fn clear_pending(&mut self, command: CommandId, payload: &[u8]) {
        if let Some(index) = self
            .pending
            .iter()
            .position(|pending| pending.command == command && pending.payload == payload)
        {
            self.pending.remove(index);
        }
    }

    pub fn register_script(&mut self, info: ScriptInfo) {
        self.scripts.insert(info.id, info);
    }

    pub fn unregister_script(&mut self, id: u32) -> Option<ScriptInfo> {
        self.scripts.remove(&id)
    }

    pub fn script_ids(&self) -> Vec<u32> {
        self.scripts.keys().copied().collect()
    }

    pub fn script(&self, id: u32) -> Option<&ScriptInfo> {
        self.scripts.get(&id)
    }
}

/// The engine thread's execution lock. The simulation thread takes it when it
/// queries engine state, so the engine releases it before blocking.
pub type InterpreterLock = Arc<Mutex<InterpreterState>>;

/// Handle the engine's run loop uses to talk to the bridge. Holds the
/// interpreter lock except while waiting or inside the core.
pub struct EngineContext<'a> {
    task: Arc<Task>,
    game: GameLock,
    instance: Arc<ScriptBridgeInstance>,
    interpreter: &'a InterpreterLock,
    state: MutexGuard<'a, InterpreterState>,
}

impl<'a> EngineContext<'a> {
    pub(crate) fn new(
        task: Arc<Task>,
        game: GameLock,
        instance: Arc<ScriptBridgeInstance>,
        interpreter: &'a InterpreterLock,
    ) -> Self {
        Self {
            task,
            game,
            instance,
            interpreter,
            state: interpreter.lock(),
        }
    }

    /// Generation of the inbound queue as of now.
    pub fn generation(&self) -> Generation {
        self.task.to_engine.generation()
    }

    /// Sleep until something was sent to the engine since `known`.
    pub fn wait(&mut self, known: Generation) -> Generation {
        let task = &self.task;
        MutexGuard::unlocked(&mut self.state, || task.to_engine.wait(known))
    }

    pub fn wait_timeout(&mut self, known: Generation, timeout: Duration) -> Generation {
        let task = &self.task;
        MutexGuard::unlocked(&mut self.state, || task.to_engine.wait_for(known, timeout))
    }

    /// Next message for the engine, if any.
    pub fn recv(&mut self) -> Option<Message> {
        let message = self.task.to_engine.recv()?;
        if let Message::CommandResult(result) = &message {
            self.state.clear_pending(result.command, &result.payload);
        }
        tracing::trace!(
            target: "script_bridge::task",
            kind = message.kind(),
            "engine.recv"
        );
        Some(message)
    }

    /// Queue a message for the simulation thread.
    pub fn send(&self, message: Message) {
        self.task.to_core.send(message);
    }

    /// Ask the controller to stop this engine.
    pub fn stop(&self) {
        self.task.signal_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_stopped()
    }

    pub fn state(&self) -> &InterpreterState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut InterpreterState {
        &mut self.state
    }

    pub fn interpreter(&self) -> &InterpreterLock {
        self.interpreter
    }

    /// Enter the core with the game lock held and the bridge instance active.
    ///
    /// The registered storage is read while the interpreter lock is held; the
    /// lock is then released for the whole locked call and re-taken after it.
    /// The engine never touches the game lock any other way, so the
    /// simulation thread may take the interpreter lock while holding it.
    pub fn call_core<R>(
        &mut self,
        f: impl FnOnce(&mut ScriptApi<'_>) -> R,
    ) -> Result<CoreCall<R>, BridgeError> {
        let storage = self.state.storage.clone().ok_or(BridgeError::NoStorage)?;
        let probe = self.trial_probe();
        let game = &self.game;
        let instance = &self.instance;

        Ok(MutexGuard::unlocked(&mut self.state, || {
            run_locked(game, instance, storage, probe, f)
        }))
    }

    /// Hand a captured command to the simulation thread for execution.
    pub fn relay(&mut self, captured: CapturedCommand) {
        let packet = captured.into_packet();
        self.state
            .push_pending(packet.command, packet.payload.clone());
        self.send(Message::CommandRelay(packet));
    }

    fn trial_probe(&self) -> TrialProbe {
        let interpreter = Arc::clone(self.interpreter);
        Arc::new(move || interpreter.lock().estimating)
    }
}
