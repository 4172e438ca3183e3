//! A script engine that replays a JSON plan instead of running a real
//! interpreter.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use script_bridge::{
    CommandOutcome, CommandResult, CompanyId, EngineContext, EngineEnvironment, EngineError,
    Generation, Message, ScriptEngine, ScriptInfo, ScriptStorage,
};
use serde::Deserialize;

use crate::ledger::BuyTile;

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    #[serde(default = "default_script_name")]
    pub name: String,
    pub steps: Vec<PlanStep>,
}

fn default_script_name() -> String {
    "plan".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PlanStep {
    Print { text: String },
    Estimate { tile: u32, price: i64 },
    Execute { tile: u32, price: i64 },
    Fail { reason: String },
}

impl Plan {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan at {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse plan JSON at {}", path.display()))
    }
}

/// Runs its plan whenever the host starts a scripted run.
pub struct PlanEngine {
    plan: Arc<Plan>,
    company: CompanyId,
}

impl PlanEngine {
    pub fn new(plan: Arc<Plan>, company: CompanyId) -> Self {
        Self { plan, company }
    }

    fn run_plan(&self, ctx: &mut EngineContext<'_>) -> Result<(), String> {
        for (index, step) in self.plan.steps.iter().enumerate() {
            tracing::debug!(target: "script_harness::plan", index, step = ?step, "plan.step");
            match step {
                PlanStep::Print { text } => ctx.send(Message::ConsoleText { text: text.clone() }),
                PlanStep::Estimate { tile, price } => {
                    let outcome = self.issue(ctx, *tile, *price, true)?;
                    ctx.send(Message::ConsoleText {
                        text: format!("estimate tile {tile}: {}", describe(&outcome)),
                    });
                }
                PlanStep::Execute { tile, price } => {
                    let outcome = self.issue(ctx, *tile, *price, false)?;
                    if !outcome.is_queued() {
                        return Err(format!("tile {tile} was not queued: {}", describe(&outcome)));
                    }
                    let result = await_result(ctx)?;
                    if !result.succeeded() {
                        return Err(format!(
                            "buying tile {tile} failed: {}",
                            result.cost.error.unwrap_or_default()
                        ));
                    }
                    let balance = result
                        .data
                        .as_slice()
                        .try_into()
                        .map(i64::from_le_bytes)
                        .unwrap_or_default();
                    ctx.send(Message::ConsoleText {
                        text: format!("bought tile {tile} for {price}, balance {balance}"),
                    });
                }
                PlanStep::Fail { reason } => return Err(reason.clone()),
            }
        }
        Ok(())
    }

    /// Cost (and in commit mode capture and relay) one purchase.
    fn issue(
        &self,
        ctx: &mut EngineContext<'_>,
        tile: u32,
        price: i64,
        estimating: bool,
    ) -> Result<CommandOutcome, String> {
        let descriptor = BuyTile { tile, price }
            .descriptor()
            .map_err(|err| err.to_string())?;
        ctx.state_mut().estimating = estimating;
        let call = ctx.call_core(|api| api.do_command(descriptor));
        ctx.state_mut().estimating = true;

        let call = call.map_err(|err| err.to_string())?;
        let outcome = call.value.map_err(|err| err.to_string())?;
        if let Some(command) = call.command {
            ctx.relay(command);
        }
        Ok(outcome)
    }
}

fn describe(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Rejected(cost) => {
            format!("rejected ({})", cost.error.as_deref().unwrap_or("no reason"))
        }
        CommandOutcome::Estimated(cost) => format!("would cost {}", cost.cost.0),
        CommandOutcome::Queued(cost) => format!("queued at {}", cost.cost.0),
    }
}

/// Block until the relayed command comes back.
fn await_result(ctx: &mut EngineContext<'_>) -> Result<CommandResult, String> {
    let mut seen = Generation::INITIAL;
    loop {
        while let Some(message) = ctx.recv() {
            match message {
                Message::CommandResult(result) => return Ok(result),
                Message::Stop => return Err("stopped while waiting for a command result".into()),
                other => tracing::trace!(
                    target: "script_harness::plan",
                    kind = other.kind(),
                    "plan.deferred"
                ),
            }
        }
        seen = ctx.wait(seen);
    }
}

impl ScriptEngine for PlanEngine {
    fn initialize(&mut self, environment: &EngineEnvironment) -> Result<(), EngineError> {
        tracing::info!(
            target: "script_harness::plan",
            search_paths = ?environment.search_paths,
            debug_level = environment.debug_level,
            steps = self.plan.steps.len(),
            "plan_engine.initialized"
        );
        Ok(())
    }

    fn run(&mut self, ctx: &mut EngineContext<'_>) -> Result<(), EngineError> {
        ctx.state_mut().storage = Some(ScriptStorage::new(self.company));
        ctx.state_mut().register_script(ScriptInfo {
            id: 0,
            company: self.company,
            class_name: "PlanEngine".to_string(),
            info: self.plan.name.clone(),
        });

        let mut seen = Generation::INITIAL;
        loop {
            seen = ctx.wait(seen);
            while let Some(message) = ctx.recv() {
                match message {
                    Message::Stop => return Ok(()),
                    Message::CommandRunStarted { label } => {
                        tracing::info!(target: "script_harness::plan", label = %label, "plan.run");
                        let exit_text = match self.run_plan(ctx) {
                            Ok(()) => String::new(),
                            Err(reason) => reason,
                        };
                        ctx.send(Message::CommandRunEnded { exit_text });
                        if ctx.is_stopped() {
                            return Ok(());
                        }
                    }
                    Message::ConsoleCommand { args } => ctx.send(Message::ConsoleText {
                        text: format!("plan engine ignores console input: {}", args.join(" ")),
                    }),
                    other => tracing::debug!(
                        target: "script_harness::plan",
                        message = ?other,
                        "plan.notification"
                    ),
                }
            }
        }
    }
}
