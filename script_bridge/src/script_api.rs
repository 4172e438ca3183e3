//! What engine code can do to the core while it holds the game lock.

use std::sync::Arc;

use crate::command::{CommandCost, CommandDescriptor, CompanyId, ResultValue};
use crate::error::BridgeError;
use crate::game::{CoreState, GameMode, PauseMode};
use crate::storage::ScriptStorage;

/// Disposition of a [`ScriptApi::do_command`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The estimate failed; nothing was captured.
    Rejected(CommandCost),
    /// Trial mode: the estimate is the answer.
    Estimated(CommandCost),
    /// Captured for relay to the simulation thread.
    Queued(CommandCost),
}

impl CommandOutcome {
    pub fn cost(&self) -> &CommandCost {
        match self {
            CommandOutcome::Rejected(cost)
            | CommandOutcome::Estimated(cost)
            | CommandOutcome::Queued(cost) => cost,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, CommandOutcome::Queued(_))
    }
}

/// Generic scripting surface of the core, valid for one locked call.
pub struct ScriptApi<'a> {
    core: &'a mut CoreState,
}

impl<'a> ScriptApi<'a> {
    pub(crate) fn new(core: &'a mut CoreState) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &CoreState {
        self.core
    }

    pub fn company(&self) -> CompanyId {
        self.core.current_company()
    }

    pub fn game_mode(&self) -> GameMode {
        self.core.game_mode()
    }

    pub fn pause_mode(&self) -> PauseMode {
        self.core.pause_mode()
    }

    pub fn tick(&self) -> u64 {
        self.core.tick()
    }

    pub fn is_trial(&self) -> bool {
        self.core.is_trial()
    }

    pub fn storage(&self) -> Option<Arc<ScriptStorage>> {
        self.core.script.active.as_ref().and_then(|instance| instance.storage())
    }

    pub fn print(&mut self, text: &str) {
        self.core.print_console(text);
    }

    /// Cost `descriptor` as the current company; in commit mode also hand it to
    /// the active instance for relay.
    pub fn do_command(
        &mut self,
        descriptor: CommandDescriptor,
    ) -> Result<CommandOutcome, BridgeError> {
        let instance = self
            .core
            .script
            .active
            .clone()
            .ok_or(BridgeError::NoActiveInstance)?;
        let storage = instance.storage().ok_or(BridgeError::NoStorage)?;
        if !storage.allows_commands() {
            return Err(BridgeError::CommandsDisallowed(storage.company()));
        }

        let company = self.core.current_company();
        let cost = self.core.backend.estimate(&descriptor, company);
        storage.record(&cost);

        if !cost.success {
            tracing::debug!(
                target: "script_bridge::scope",
                command = ?descriptor.command,
                company = %company,
                error = cost.error.as_deref().unwrap_or_default(),
                "command.estimate=failed"
            );
            return Ok(CommandOutcome::Rejected(cost));
        }
        if self.core.is_trial() {
            return Ok(CommandOutcome::Estimated(cost));
        }

        instance.do_command_hook(descriptor)?;
        Ok(CommandOutcome::Queued(cost))
    }

    pub fn insert_result(&mut self, value: ResultValue) -> Result<(), BridgeError> {
        let instance = self
            .core
            .script
            .active
            .as_ref()
            .ok_or(BridgeError::NoActiveInstance)?;
        instance.insert_result(value);
        Ok(())
    }
}
