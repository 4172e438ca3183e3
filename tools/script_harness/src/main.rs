mod ledger;
mod plan;

use std::{path::PathBuf, process::ExitCode, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use script_bridge::{
    load_bridge_config_from_env, CompanyId, CoreState, EngineFactory, GameLock, GameMode, Money,
    PauseMode, ScriptEngine, StartOutcome, TaskController,
};

use crate::ledger::LedgerBackend;
use crate::plan::{Plan, PlanEngine};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless host for the script bridge", long_about = None)]
struct Args {
    /// Path to the plan JSON file the engine replays
    #[arg(long)]
    plan: PathBuf,

    /// Label of the scripted run; empty starts the engine without a run
    #[arg(long, default_value = "main")]
    label: String,

    /// Give up after this many ticks
    #[arg(long, default_value_t = 500)]
    max_ticks: u64,

    /// Wall-clock length of one tick (milliseconds)
    #[arg(long, default_value_t = 10)]
    tick_ms: u64,

    /// Starting funds of the scripted company
    #[arg(long, default_value_t = 1_000)]
    funds: i64,

    /// Company the script acts as
    #[arg(long, default_value_t = 0)]
    company: u8,

    /// Pause the simulation for one tick at this tick
    #[arg(long)]
    pause_at: Option<u64>,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let plan = Arc::new(Plan::from_file(&args.plan)?);
    let company = CompanyId(args.company);
    let (config, metadata) = load_bridge_config_from_env();
    tracing::debug!(
        target: "script_harness",
        config_path = ?metadata.path(),
        "bridge_config.ready"
    );

    let backend = LedgerBackend::new().with_funds(company, Money(args.funds));
    let game = GameLock::new(
        CoreState::new(backend)
            .with_game_mode(GameMode::Normal)
            .with_local_company(company),
    );

    let factory: EngineFactory = {
        let plan = Arc::clone(&plan);
        Arc::new(move || {
            Box::new(PlanEngine::new(Arc::clone(&plan), company)) as Box<dyn ScriptEngine>
        })
    };
    let controller = TaskController::new(config, game.clone(), factory);

    let outcome = controller
        .start(&game.lock(), &args.label)
        .with_context(|| "Failed to start the script engine")?;
    if outcome != StartOutcome::Started {
        anyhow::bail!("script engine did not start: {outcome:?}");
    }

    let exit = run_ticks(&args, &game, &controller);

    for id in controller.script_ids() {
        if let Some(info) = controller.script_info(id) {
            tracing::info!(
                target: "script_harness",
                id = info.id,
                class_name = %info.class_name,
                info = %info.info,
                "script.registered"
            );
        }
    }
    controller.stop();

    match exit {
        Some(code) => {
            tracing::info!(target: "script_harness", code, "harness.exit");
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        None => {
            tracing::error!(
                target: "script_harness",
                max_ticks = args.max_ticks,
                "harness.exit=tick_budget_exhausted"
            );
            Ok(ExitCode::from(1))
        }
    }
}

/// Tick the simulation until the scripted run asks to exit or the budget is
/// spent. Returns the requested exit code.
fn run_ticks(args: &Args, game: &GameLock, controller: &TaskController) -> Option<i32> {
    let tick_length = Duration::from_millis(args.tick_ms);
    for _ in 0..args.max_ticks {
        {
            let mut core = game.lock();
            let tick = core.advance_tick();
            let paused = args.pause_at == Some(tick);
            core.set_pause_mode(if paused {
                PauseMode::NORMAL
            } else {
                PauseMode::empty()
            });
            controller.process_from_engine(&mut core);
            if let Some(exit) = core.exit_request() {
                return Some(exit.code);
            }
        }
        thread::sleep(tick_length);
    }
    None
}
