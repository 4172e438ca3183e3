//! The script instance the core's generic command path talks to.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::{CommandCost, CommandDescriptor, CommandPacket, CommandResult, ResultValue};
use crate::error::BridgeError;
use crate::message::Message;
use crate::storage::ScriptStorage;
use crate::task::TaskSender;

/// Interception points the core calls on the active script instance.
pub trait ScriptInstance: Send + Sync {
    fn name(&self) -> &str;

    /// Storage installed for the current locked call, if any.
    fn storage(&self) -> Option<Arc<ScriptStorage>>;

    /// A script asked to execute `descriptor` for real.
    fn do_command_hook(&self, descriptor: CommandDescriptor) -> Result<(), BridgeError>;

    /// A previously relayed command finished executing.
    fn done_command_hook(&self, packet: &CommandPacket, cost: &CommandCost, data: &[u8]);

    /// Append a value produced by a script-facing API call.
    fn insert_result(&self, value: ResultValue);
}

/// Adapter between the core and the engine thread. Holds at most one captured
/// command and the values inserted during the current locked call, and
/// forwards completions to the engine as [`Message::CommandResult`].
pub struct ScriptBridgeInstance {
    captured: Mutex<Option<CommandDescriptor>>,
    storage: Mutex<Option<Arc<ScriptStorage>>>,
    results: Mutex<Vec<ResultValue>>,
    outbox: TaskSender,
}

impl ScriptBridgeInstance {
    pub const NAME: &'static str = "script-bridge";

    pub(crate) fn new(outbox: TaskSender) -> Self {
        Self {
            captured: Mutex::new(None),
            storage: Mutex::new(None),
            results: Mutex::new(Vec::new()),
            outbox,
        }
    }

    pub(crate) fn set_storage(&self, storage: Option<Arc<ScriptStorage>>) {
        *self.storage.lock() = storage;
    }

    /// Hand over the captured command, leaving the slot empty.
    pub fn take_command(&self) -> Option<CommandDescriptor> {
        self.captured.lock().take()
    }

    pub fn has_captured_command(&self) -> bool {
        self.captured.lock().is_some()
    }

    /// Drain the accumulated result values.
    pub fn get_result(&self) -> Vec<ResultValue> {
        std::mem::take(&mut *self.results.lock())
    }

    /// Empty the command slot and the result buffer. Returns whether anything
    /// was left behind.
    pub(crate) fn discard_call_state(&self) -> bool {
        let command = self.take_command();
        let results = self.get_result();
        if command.is_none() && results.is_empty() {
            return false;
        }
        tracing::debug!(
            target: "script_bridge::scope",
            command = ?command.map(|descriptor| descriptor.command),
            results = results.len(),
            "call_state.discarded"
        );
        true
    }
}

impl ScriptInstance for ScriptBridgeInstance {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn storage(&self) -> Option<Arc<ScriptStorage>> {
        self.storage.lock().clone()
    }

    fn do_command_hook(&self, descriptor: CommandDescriptor) -> Result<(), BridgeError> {
        let mut captured = self.captured.lock();
        if let Some(pending) = captured.as_ref() {
            return Err(BridgeError::CommandPending {
                pending: pending.command,
                rejected: descriptor.command,
            });
        }
        tracing::trace!(
            target: "script_bridge::scope",
            command = ?descriptor.command,
            "command.captured"
        );
        *captured = Some(descriptor);
        Ok(())
    }

    fn done_command_hook(&self, packet: &CommandPacket, cost: &CommandCost, data: &[u8]) {
        let result = CommandResult {
            command: packet.command,
            payload: packet.payload.clone(),
            company: packet.company,
            cost: cost.clone(),
            data: data.to_vec(),
            script_results: packet.script_results.clone(),
        };
        self.outbox.send(Message::CommandResult(result));
    }

    fn insert_result(&self, value: ResultValue) {
        self.results.lock().push(value);
    }
}
