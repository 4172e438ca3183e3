//! Model of the simulation core as the bridge sees it: the process-wide state
//! behind the global game lock, plus the [`CoreBackend`] black box that
//! actually costs and executes commands.

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::command::{CommandCost, CommandDescriptor, CommandPacket, CompanyId, Dispatch};
use crate::instance::ScriptInstance;
use crate::mode::ModeBinding;
use crate::perf::PerfCounter;

/// Top-level state of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameMode {
    #[default]
    Menu,
    Normal,
    Editor,
    Bootstrap,
}

bitflags! {
    /// Reasons the simulation is currently paused. Empty means running.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PauseMode: u8 {
        const NORMAL = 1 << 0;
        const SAVELOAD = 1 << 1;
        const JOIN = 1 << 2;
        const ERROR = 1 << 3;
        const ACTIVE_CLIENTS = 1 << 4;
        const GAME_SCRIPT = 1 << 5;
        const LINK_GRAPH = 1 << 6;
    }
}

/// The part of the simulation that executes commands. Opaque to the bridge.
pub trait CoreBackend: Send {
    /// Validate and cost `command` for `company` without mutating anything.
    fn estimate(&mut self, command: &CommandDescriptor, company: CompanyId) -> CommandCost;

    /// Execute a relayed command for real.
    fn execute(&mut self, packet: &CommandPacket) -> Dispatch;

    /// Print a line on the host console.
    fn print_console(&mut self, text: &str);
}

/// Termination requested by a scripted top-level run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRequest {
    pub code: i32,
}

/// Process-wide script context consulted by the core's command path.
///
/// `active` is the single-slot registry of the instance generic hooks route
/// to; it is only ever filled for the duration of a locked call.
#[derive(Default)]
pub(crate) struct ScriptContext {
    pub(crate) active: Option<Arc<dyn ScriptInstance>>,
    pub(crate) mode: Option<ModeBinding>,
    pub(crate) engine_instance: Option<Arc<dyn ScriptInstance>>,
}

/// Everything guarded by the global game lock.
pub struct CoreState {
    game_mode: GameMode,
    pause_mode: PauseMode,
    tick: u64,
    pub(crate) current_company: CompanyId,
    local_company: CompanyId,
    exit: Option<ExitRequest>,
    pub(crate) script: ScriptContext,
    perf: Arc<PerfCounter>,
    pub(crate) backend: Box<dyn CoreBackend>,
}

impl CoreState {
    pub fn new(backend: impl CoreBackend + 'static) -> Self {
        Self {
            game_mode: GameMode::default(),
            pause_mode: PauseMode::empty(),
            tick: 0,
            current_company: CompanyId::FIRST,
            local_company: CompanyId::FIRST,
            exit: None,
            script: ScriptContext::default(),
            perf: Arc::new(PerfCounter::new("script")),
            backend: Box::new(backend),
        }
    }

    pub fn with_game_mode(mut self, mode: GameMode) -> Self {
        self.game_mode = mode;
        self
    }

    pub fn with_local_company(mut self, company: CompanyId) -> Self {
        self.local_company = company;
        self.current_company = company;
        self
    }

    pub fn game_mode(&self) -> GameMode {
        self.game_mode
    }

    pub fn set_game_mode(&mut self, mode: GameMode) {
        self.game_mode = mode;
    }

    pub fn pause_mode(&self) -> PauseMode {
        self.pause_mode
    }

    pub fn set_pause_mode(&mut self, mode: PauseMode) {
        self.pause_mode = mode;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn current_company(&self) -> CompanyId {
        self.current_company
    }

    pub fn local_company(&self) -> CompanyId {
        self.local_company
    }

    /// Performance counter for time spent on behalf of the script engine.
    pub fn perf(&self) -> &Arc<PerfCounter> {
        &self.perf
    }

    pub fn has_active_instance(&self) -> bool {
        self.script.active.is_some()
    }

    pub fn active_instance_name(&self) -> Option<&str> {
        self.script.active.as_deref().map(|instance| instance.name())
    }

    pub fn has_mode(&self) -> bool {
        self.script.mode.is_some()
    }

    /// Whether commands currently only get estimated. Without an installed
    /// mode the core commits.
    pub fn is_trial(&self) -> bool {
        self.script
            .mode
            .as_ref()
            .map_or(false, |binding| binding.is_trial())
    }

    pub fn print_console(&mut self, text: &str) {
        self.backend.print_console(text);
    }

    pub fn request_exit(&mut self, code: i32) {
        self.exit = Some(ExitRequest { code });
    }

    pub fn exit_request(&self) -> Option<ExitRequest> {
        self.exit
    }

    pub(crate) fn register_engine_instance(&mut self, instance: Arc<dyn ScriptInstance>) {
        self.script.engine_instance = Some(instance);
    }

    /// Execute a relayed command as its issuing company.
    pub fn run_command(&mut self, packet: CommandPacket) {
        self.current_company = packet.company;
        let dispatch = self.backend.execute(&packet);
        self.current_company = self.local_company;

        match dispatch {
            Dispatch::Completed { cost, data } => self.complete_command(&packet, cost, data),
            Dispatch::Relayed => {
                tracing::trace!(
                    target: "script_bridge::core",
                    command = ?packet.command,
                    company = %packet.company,
                    "command.dispatch=relayed"
                );
            }
        }
    }

    /// Report the completion of a command, whether it ran locally or came back
    /// from a relay.
    pub fn complete_command(&mut self, packet: &CommandPacket, cost: CommandCost, data: Vec<u8>) {
        match &self.script.engine_instance {
            Some(instance) => instance.done_command_hook(packet, &cost, &data),
            None => tracing::debug!(
                target: "script_bridge::core",
                command = ?packet.command,
                "command.completed=no_engine_instance"
            ),
        }
    }
}

/// The core's single global mutex. Cloning shares the same lock.
#[derive(Clone)]
pub struct GameLock {
    state: Arc<Mutex<CoreState>>,
}

impl GameLock {
    pub fn new(state: CoreState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock()
    }

    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, CoreState>> {
        self.state.try_lock_for(timeout)
    }

    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::command::{CommandId, Money};

    /// Backend that accepts everything and records what it saw.
    #[derive(Default)]
    pub(crate) struct NullBackend {
        pub(crate) executed: Arc<Mutex<Vec<(CommandPacket, CompanyId)>>>,
        pub(crate) console: Arc<Mutex<Vec<String>>>,
    }

    impl CoreBackend for NullBackend {
        fn estimate(&mut self, command: &CommandDescriptor, _company: CompanyId) -> CommandCost {
            CommandCost::succeeded(Money(command.payload.len() as i64))
        }

        fn execute(&mut self, packet: &CommandPacket) -> Dispatch {
            self.executed.lock().push((packet.clone(), packet.company));
            Dispatch::Completed {
                cost: CommandCost::succeeded(Money(1)),
                data: Vec::new(),
            }
        }

        fn print_console(&mut self, text: &str) {
            self.console.lock().push(text.to_string());
        }
    }

    #[test]
    fn run_command_resets_company_to_local() {
        let backend = NullBackend::default();
        let executed = Arc::clone(&backend.executed);
        let mut core = CoreState::new(backend).with_local_company(CompanyId(1));

        core.run_command(CommandPacket {
            command: CommandId(4),
            payload: vec![],
            company: CompanyId(6),
            callback: None,
            script_results: Vec::new(),
        });

        assert_eq!(executed.lock()[0].1, CompanyId(6));
        assert_eq!(core.current_company(), CompanyId(1));
    }

    #[test]
    fn commits_without_an_installed_mode() {
        let core = CoreState::new(NullBackend::default());
        assert!(!core.has_mode());
        assert!(!core.is_trial());
    }

    #[test]
    fn exit_request_is_recorded() {
        let mut core = CoreState::new(NullBackend::default());
        assert_eq!(core.exit_request(), None);
        core.request_exit(2);
        assert_eq!(core.exit_request(), Some(ExitRequest { code: 2 }));
    }
}
