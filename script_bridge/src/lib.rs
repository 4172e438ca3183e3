//! Bridge between a single-threaded simulation core and a script engine that
//! runs on its own thread.
//!
//! The simulation thread owns the [`GameLock`] and calls
//! [`TaskController::process_from_engine`] once per tick. The engine thread
//! runs a [`ScriptEngine`] whose event loop waits on its inbound queue through
//! an [`EngineContext`], and enters the core with [`EngineContext::call_core`].
//! Commands captured there travel back to the simulation thread as
//! [`Message::CommandRelay`] and complete as [`Message::CommandResult`].

mod command;
mod config;
mod engine;
mod error;
mod game;
mod instance;
mod lock_scope;
mod message;
mod mode;
mod perf;
mod queue;
mod script_api;
mod storage;
mod task;

pub use command::{
    CallbackRef, CapturedCommand, CommandCost, CommandDescriptor, CommandId, CommandPacket,
    CommandResult, CompanyId, Dispatch, Money, ResultValue,
};
pub use config::{
    load_bridge_config_from_env, split_search_paths, BridgeConfig, BridgeConfigError,
    BridgeConfigMetadata, BUILTIN_BRIDGE_CONFIG,
};
pub use engine::{
    EngineContext, EngineEnvironment, EngineFactory, InterpreterLock, InterpreterState,
    ScriptEngine, ScriptInfo,
};
pub use error::{BridgeError, EngineError};
pub use game::{CoreBackend, CoreState, ExitRequest, GameLock, GameMode, PauseMode};
pub use instance::{ScriptBridgeInstance, ScriptInstance};
pub use lock_scope::{
    run_locked, ActiveInstanceGuard, CaptureGuard, CompanyGuard, CoreCall, ScopePhase,
    StorageGuard,
};
pub use message::{Message, EXIT_CODE_FAILED};
pub use mode::{ModeBinding, ModeToken, TrialModeGuard, TrialProbe};
pub use perf::{PerfCounter, PerfMeasurer};
pub use queue::{Generation, GenerationSignal, LockedQueue, NotifyingQueue};
pub use script_api::{CommandOutcome, ScriptApi};
pub use storage::{ScriptStorage, StorageAccounting};
pub use task::{StartOutcome, TaskController, TaskSender};
