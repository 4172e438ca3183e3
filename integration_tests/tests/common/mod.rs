#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use script_bridge::{
    BridgeConfig, CommandCost, CommandDescriptor, CommandId, CommandPacket, CompanyId,
    CoreBackend, CoreState, Dispatch, EngineContext, EngineEnvironment, EngineError,
    EngineFactory, GameLock, GameMode, Generation, Message, Money, ScriptEngine, ScriptStorage,
    StartOutcome, TaskController,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Commands with this id are forwarded elsewhere and complete later.
pub const CMD_RELAYED: CommandId = CommandId(900);
/// Commands with this id always fail their estimate.
pub const CMD_REJECTED: CommandId = CommandId(901);

#[derive(Clone, Default)]
pub struct BackendLog {
    pub executed: Arc<Mutex<Vec<CommandPacket>>>,
    pub console: Arc<Mutex<Vec<String>>>,
}

/// Costs every command at its payload length and executes it locally.
pub struct StubBackend {
    log: BackendLog,
}

impl CoreBackend for StubBackend {
    fn estimate(&mut self, command: &CommandDescriptor, _company: CompanyId) -> CommandCost {
        if command.command == CMD_REJECTED {
            CommandCost::failed("rejected by stub")
        } else {
            CommandCost::succeeded(Money(command.payload.len() as i64))
        }
    }

    fn execute(&mut self, packet: &CommandPacket) -> Dispatch {
        self.log.executed.lock().push(packet.clone());
        if packet.command == CMD_RELAYED {
            return Dispatch::Relayed;
        }
        Dispatch::Completed {
            cost: CommandCost::succeeded(Money(packet.payload.len() as i64)),
            data: vec![0xAB],
        }
    }

    fn print_console(&mut self, text: &str) {
        self.log.console.lock().push(text.to_string());
    }
}

pub fn stub_core() -> (CoreState, BackendLog) {
    let log = BackendLog::default();
    let core = CoreState::new(StubBackend { log: log.clone() })
        .with_game_mode(GameMode::Normal)
        .with_local_company(CompanyId(0));
    (core, log)
}

pub type Action = Box<dyn FnOnce(&mut EngineContext<'_>) + Send>;

/// Engine that reports every message it receives and runs closures the test
/// thread hands it, between waits.
pub struct RecordingEngine {
    observed: Sender<Message>,
    actions: Receiver<Action>,
}

impl ScriptEngine for RecordingEngine {
    fn initialize(&mut self, _environment: &EngineEnvironment) -> Result<(), EngineError> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut EngineContext<'_>) -> Result<(), EngineError> {
        let mut seen = Generation::INITIAL;
        loop {
            while let Some(message) = ctx.recv() {
                let stop = message == Message::Stop;
                let _ = self.observed.send(message);
                if stop {
                    return Ok(());
                }
            }
            while let Ok(action) = self.actions.try_recv() {
                action(ctx);
            }
            seen = ctx.wait_timeout(seen, Duration::from_millis(10));
        }
    }
}

/// A simulation core, a controller and a [`RecordingEngine`] wired together.
pub struct Harness {
    pub game: GameLock,
    pub controller: TaskController,
    pub log: BackendLog,
    observed: Receiver<Message>,
    actions: Sender<Action>,
}

impl Harness {
    pub fn new() -> Self {
        let (observed_tx, observed_rx) = crossbeam_channel::unbounded();
        let (actions_tx, actions_rx) = crossbeam_channel::unbounded::<Action>();
        let factory: EngineFactory = Arc::new(move || {
            Box::new(RecordingEngine {
                observed: observed_tx.clone(),
                actions: actions_rx.clone(),
            }) as Box<dyn ScriptEngine>
        });
        let mut harness = Self::with_factory(factory);
        harness.observed = observed_rx;
        harness.actions = actions_tx;
        harness
    }

    /// Harness around an arbitrary engine; the observation channels stay idle.
    pub fn with_factory(factory: EngineFactory) -> Self {
        let (core, log) = stub_core();
        let game = GameLock::new(core);
        let controller = TaskController::new(BridgeConfig::builtin(), game.clone(), factory);
        let (_, observed) = crossbeam_channel::unbounded();
        let (actions, _) = crossbeam_channel::unbounded();
        Self {
            game,
            controller,
            log,
            observed,
            actions,
        }
    }

    pub fn start(&self, label: &str) -> StartOutcome {
        self.controller
            .start(&self.game.lock(), label)
            .expect("engine thread spawns")
    }

    pub fn pump(&self) {
        let mut core = self.game.lock();
        self.controller.process_from_engine(&mut core);
    }

    /// Pump until `done` holds for the core, or give up after [`TIMEOUT`].
    pub fn pump_until(&self, mut done: impl FnMut(&CoreState) -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            {
                let mut core = self.game.lock();
                self.controller.process_from_engine(&mut core);
                if done(&*core) {
                    return true;
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    /// Queue `f` to run on the engine thread and hand back the channel its
    /// result arrives on.
    pub fn spawn_on_engine<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut EngineContext<'_>) -> R + Send + 'static,
    ) -> Receiver<R> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.actions
            .send(Box::new(move |ctx: &mut EngineContext<'_>| {
                let _ = reply_tx.send(f(ctx));
            }))
            .expect("engine action channel open");
        reply_rx
    }

    /// Run `f` on the engine thread with the engine context and return its
    /// result. The game lock must not be held by the caller if `f` enters the
    /// core.
    pub fn on_engine<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut EngineContext<'_>) -> R + Send + 'static,
    ) -> R {
        self.spawn_on_engine(f)
            .recv_timeout(TIMEOUT)
            .expect("engine ran the action in time")
    }

    /// Register storage for `company` on the engine side.
    pub fn install_storage(&self, company: CompanyId) -> Arc<ScriptStorage> {
        let storage = ScriptStorage::new(company);
        let installed = Arc::clone(&storage);
        self.on_engine(move |ctx| ctx.state_mut().storage = Some(installed));
        storage
    }

    pub fn next_observed(&self) -> Message {
        self.observed
            .recv_timeout(TIMEOUT)
            .expect("engine observed a message in time")
    }

    pub fn observed_nothing_within(&self, window: Duration) -> bool {
        self.observed.recv_timeout(window).is_err()
    }

    /// Everything the engine observes until it sees `sentinel`, exclusive.
    pub fn observed_until(&self, sentinel: &Message) -> Vec<Message> {
        let mut seen = Vec::new();
        loop {
            let message = self.next_observed();
            if &message == sentinel {
                return seen;
            }
            seen.push(message);
        }
    }

    /// Push a marker through the core-to-engine queue and collect what the
    /// engine saw before it.
    pub fn drain_observed(&self) -> Vec<Message> {
        let sentinel = Message::ConsoleText {
            text: "__sentinel__".to_string(),
        };
        self.controller.send(sentinel.clone());
        self.observed_until(&sentinel)
    }

    pub fn expect_handshake(&self, label: &str) {
        assert_eq!(
            self.next_observed(),
            Message::ModeChanged {
                mode: GameMode::Normal
            }
        );
        assert_eq!(self.next_observed(), Message::Start);
        if !label.is_empty() {
            assert_eq!(
                self.next_observed(),
                Message::CommandRunStarted {
                    label: label.to_string()
                }
            );
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.controller.stop();
    }
}

/// Engine whose run loop panics as soon as it starts.
pub struct PanickingEngine;

impl ScriptEngine for PanickingEngine {
    fn initialize(&mut self, _environment: &EngineEnvironment) -> Result<(), EngineError> {
        Ok(())
    }

    fn run(&mut self, _ctx: &mut EngineContext<'_>) -> Result<(), EngineError> {
        panic!("script engine exploded");
    }
}

/// Engine that never gets past initialisation.
pub struct BrokenStartupEngine;

impl ScriptEngine for BrokenStartupEngine {
    fn initialize(&mut self, _environment: &EngineEnvironment) -> Result<(), EngineError> {
        Err(EngineError::Startup("runtime missing".into()))
    }

    fn run(&mut self, _ctx: &mut EngineContext<'_>) -> Result<(), EngineError> {
        unreachable!("run without initialize")
    }
}

pub fn factory_of<E: ScriptEngine + 'static>(make: fn() -> E) -> EngineFactory {
    Arc::new(move || Box::new(make()) as Box<dyn ScriptEngine>)
}
