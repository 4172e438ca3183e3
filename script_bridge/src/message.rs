//! The closed set of messages exchanged between the simulation thread and the
//! script engine thread.

use serde::{Deserialize, Serialize};

use crate::command::{CommandPacket, CommandResult};
use crate::game::{CoreState, GameMode, PauseMode};

/// Exit code reported when a scripted top-level run ends with an error.
pub const EXIT_CODE_FAILED: i32 = 2;

/// One unit of cross-thread communication. Ownership moves with the message:
/// a queue owns it until `recv` hands it to the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Start,
    Stop,
    ConsoleCommand { args: Vec<String> },
    ConsoleText { text: String },
    ModeChanged { mode: GameMode },
    PauseChanged { mode: PauseMode },
    CommandRelay(CommandPacket),
    CommandResult(CommandResult),
    CommandRunStarted { label: String },
    CommandRunEnded { exit_text: String },
}

/// What the tick pump should do after a message was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    StopRequested,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Start => "start",
            Message::Stop => "stop",
            Message::ConsoleCommand { .. } => "console_command",
            Message::ConsoleText { .. } => "console_text",
            Message::ModeChanged { .. } => "mode_changed",
            Message::PauseChanged { .. } => "pause_changed",
            Message::CommandRelay(_) => "command_relay",
            Message::CommandResult(_) => "command_result",
            Message::CommandRunStarted { .. } => "command_run_started",
            Message::CommandRunEnded { .. } => "command_run_ended",
        }
    }

    /// Handle a message that arrived from the engine, on the simulation
    /// thread with the game lock held.
    pub(crate) fn process(self, core: &mut CoreState) -> Flow {
        match self {
            Message::Stop => return Flow::StopRequested,
            Message::ConsoleText { text } => core.print_console(&text),
            Message::CommandRelay(packet) => core.run_command(packet),
            Message::CommandRunEnded { exit_text } => {
                if exit_text.is_empty() {
                    tracing::info!(target: "script_bridge::core", "command_run.ended=ok");
                    core.request_exit(0);
                } else {
                    tracing::error!(
                        target: "script_bridge::core",
                        exit_text = %exit_text,
                        "command_run.ended=failed"
                    );
                    core.request_exit(EXIT_CODE_FAILED);
                }
            }
            Message::Start => {}
            other @ (Message::ConsoleCommand { .. }
            | Message::ModeChanged { .. }
            | Message::PauseChanged { .. }
            | Message::CommandResult(_)
            | Message::CommandRunStarted { .. }) => {
                tracing::trace!(
                    target: "script_bridge::core",
                    kind = other.kind(),
                    "message.ignored=engine_bound"
                );
            }
        }
        Flow::Continue
    }
}
