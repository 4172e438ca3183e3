use thiserror::Error;

use crate::command::{CommandId, CompanyId};

/// Errors raised while a script engine call is routed into the simulation core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("command {rejected:?} captured while command {pending:?} is still pending")]
    CommandPending {
        pending: CommandId,
        rejected: CommandId,
    },
    #[error("no script storage registered for the calling context")]
    NoStorage,
    #[error("no active script instance installed")]
    NoActiveInstance,
    #[error("storage for company {0} does not allow commands")]
    CommandsDisallowed(CompanyId),
    #[error("failed to spawn script engine thread: {0}")]
    Spawn(String),
}

impl BridgeError {
    /// Violations of the bridge's sequencing invariants. These indicate a
    /// reentrancy bug on the engine side rather than a recoverable condition.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            BridgeError::CommandPending { .. }
                | BridgeError::NoStorage
                | BridgeError::NoActiveInstance
        )
    }
}

/// Failures reported by a [`crate::ScriptEngine`] implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine startup failed: {0}")]
    Startup(String),
    #[error("engine runtime error: {0}")]
    Runtime(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
