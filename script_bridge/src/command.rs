//! Command descriptors and results exchanged between the script engine and the
//! simulation core.
//!
//! The bridge treats argument buffers as opaque bytes: only the core backend
//! knows how to decode them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a game command understood by the core backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u16);

/// Acting company for a command or a script context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompanyId(pub u8);

impl CompanyId {
    pub const FIRST: CompanyId = CompanyId(0);
    /// Pseudo company used by game-wide scripts.
    pub const DEITY: CompanyId = CompanyId(0x12);
    pub const SPECTATOR: CompanyId = CompanyId(255);
}

impl Default for CompanyId {
    fn default() -> Self {
        CompanyId::FIRST
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CompanyId::DEITY => write!(f, "deity"),
            CompanyId::SPECTATOR => write!(f, "spectator"),
            CompanyId(id) => write!(f, "#{id}"),
        }
    }
}

/// Opaque reference to the completion callback a script attached to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackRef(pub u32);

/// Money amounts as reported by the core.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Money(pub i64);

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

/// A command a script asked the core to execute, as seen by the do-command hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub command: CommandId,
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackRef>,
}

impl CommandDescriptor {
    pub fn new(command: CommandId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            payload: payload.into(),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: CallbackRef) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Command captured during a locked call, together with the company it was
/// issued for and the values the same call inserted. Handed to the core as a
/// [`CommandPacket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCommand {
    pub descriptor: CommandDescriptor,
    pub company: CompanyId,
    pub script_results: Vec<ResultValue>,
}

impl CapturedCommand {
    pub fn into_packet(self) -> CommandPacket {
        CommandPacket {
            command: self.descriptor.command,
            payload: self.descriptor.payload,
            company: self.company,
            callback: self.descriptor.callback,
            script_results: self.script_results,
        }
    }
}

/// Self-contained request to execute a command on the simulation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPacket {
    pub command: CommandId,
    pub payload: Vec<u8>,
    pub company: CompanyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackRef>,
    /// Carried through execution and returned with the command's result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script_results: Vec<ResultValue>,
}

/// Outcome of estimating or executing a command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandCost {
    pub success: bool,
    pub cost: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandCost {
    pub fn succeeded(cost: Money) -> Self {
        Self {
            success: true,
            cost,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            cost: Money::default(),
            error: Some(error.into()),
        }
    }
}

/// How the core backend disposed of a relayed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Executed locally; the result is available immediately.
    Completed { cost: CommandCost, data: Vec<u8> },
    /// Forwarded elsewhere (e.g. to a network server); completion arrives later
    /// through [`crate::CoreState::complete_command`].
    Relayed,
}

/// Values a script-facing API call hands back while a command executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultValue {
    Bool(bool),
    Int(i64),
}

/// Completion notice for a relayed command, delivered to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: CommandId,
    pub payload: Vec<u8>,
    pub company: CompanyId,
    pub cost: CommandCost,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub script_results: Vec<ResultValue>,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        self.cost.success
    }
}
