//! Entry into the core on behalf of the engine thread.
//!
//! [`run_locked`] takes the game lock and installs the script context as a
//! stack of guards, each borrowing the core through the one before it:
//!
//! 1. game lock
//! 2. perf measurement
//! 3. active instance
//! 4. capture slot and result buffer
//! 5. storage on the instance
//! 6. trial mode
//! 7. acting company
//!
//! Locals drop in reverse, so teardown runs 7 to 1 on every exit path,
//! including unwinding, and the lock is released last. A command captured by
//! a call that unwinds is discarded with it.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::command::{CapturedCommand, CompanyId};
use crate::game::{CoreState, GameLock};
use crate::instance::{ScriptBridgeInstance, ScriptInstance};
use crate::mode::{TrialModeGuard, TrialProbe};
use crate::perf::PerfMeasurer;
use crate::script_api::ScriptApi;
use crate::storage::ScriptStorage;

/// Lifecycle of one locked call, as reported in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePhase {
    Unacquired,
    Acquiring,
    Active,
    Releasing,
    Released,
}

/// Routes the core's generic hooks to one instance for its lifetime.
pub struct ActiveInstanceGuard<'a> {
    core: &'a mut CoreState,
    previous: Option<Arc<dyn ScriptInstance>>,
}

impl<'a> ActiveInstanceGuard<'a> {
    pub fn install(core: &'a mut CoreState, instance: Arc<dyn ScriptInstance>) -> Self {
        let previous = core.script.active.replace(instance);
        Self { core, previous }
    }
}

impl Deref for ActiveInstanceGuard<'_> {
    type Target = CoreState;

    fn deref(&self) -> &CoreState {
        self.core
    }
}

impl DerefMut for ActiveInstanceGuard<'_> {
    fn deref_mut(&mut self) -> &mut CoreState {
        self.core
    }
}

impl Drop for ActiveInstanceGuard<'_> {
    fn drop(&mut self) {
        self.core.script.active = self.previous.take();
    }
}

/// Result of [`run_locked`].
#[derive(Debug)]
pub struct CoreCall<R> {
    pub value: R,
    /// Command captured during the call, still to be relayed.
    pub command: Option<CapturedCommand>,
}

/// Per-call capture state of the bridge instance. [`CaptureGuard::collect`]
/// hands over what the call captured; anything still there on drop is
/// discarded.
pub struct CaptureGuard<'i> {
    instance: &'i ScriptBridgeInstance,
}

impl<'i> CaptureGuard<'i> {
    pub fn arm(instance: &'i ScriptBridgeInstance) -> Self {
        if instance.discard_call_state() {
            tracing::warn!(target: "script_bridge::scope", "capture.arm=stale_state");
        }
        Self { instance }
    }

    /// Take the captured command together with every value inserted during
    /// the call. Values inserted by a call that captured nothing are dropped.
    pub fn collect(&self, company: CompanyId) -> Option<CapturedCommand> {
        let descriptor = self.instance.take_command();
        let script_results = self.instance.get_result();
        match descriptor {
            Some(descriptor) => Some(CapturedCommand {
                descriptor,
                company,
                script_results,
            }),
            None => {
                if !script_results.is_empty() {
                    tracing::trace!(
                        target: "script_bridge::scope",
                        results = script_results.len(),
                        "capture.results=dropped_without_command"
                    );
                }
                None
            }
        }
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.instance.discard_call_state();
    }
}

/// Storage installed on the bridge instance for one locked call.
pub struct StorageGuard<'i> {
    instance: &'i ScriptBridgeInstance,
    previous: Option<Arc<ScriptStorage>>,
}

impl<'i> StorageGuard<'i> {
    pub fn install(instance: &'i ScriptBridgeInstance, storage: Arc<ScriptStorage>) -> Self {
        let previous = instance.storage();
        instance.set_storage(Some(storage));
        Self { instance, previous }
    }
}

impl Drop for StorageGuard<'_> {
    fn drop(&mut self) {
        self.instance.set_storage(self.previous.take());
    }
}

/// Switches the core's acting company and switches it back on drop.
pub struct CompanyGuard<'a> {
    core: &'a mut CoreState,
    previous: CompanyId,
}

impl<'a> CompanyGuard<'a> {
    pub fn switch(core: &'a mut CoreState, company: CompanyId) -> Self {
        let previous = std::mem::replace(&mut core.current_company, company);
        Self { core, previous }
    }
}

impl Deref for CompanyGuard<'_> {
    type Target = CoreState;

    fn deref(&self) -> &CoreState {
        self.core
    }
}

impl DerefMut for CompanyGuard<'_> {
    fn deref_mut(&mut self) -> &mut CoreState {
        self.core
    }
}

impl Drop for CompanyGuard<'_> {
    fn drop(&mut self) {
        self.core.current_company = self.previous;
    }
}

fn trace_phase(phase: ScopePhase) {
    tracing::trace!(target: "script_bridge::scope", phase = ?phase, "scope.phase");
}

/// Run `f` inside the core with the bridge instance's context installed, and
/// collect the command it captured, if any.
///
/// Blocks until the game lock is available. The caller must not hold any lock
/// the simulation thread may take while it holds the game lock.
pub fn run_locked<R>(
    game: &GameLock,
    instance: &Arc<ScriptBridgeInstance>,
    storage: Arc<ScriptStorage>,
    probe: TrialProbe,
    f: impl FnOnce(&mut ScriptApi<'_>) -> R,
) -> CoreCall<R> {
    trace_phase(ScopePhase::Unacquired);
    let call = {
        trace_phase(ScopePhase::Acquiring);
        let mut core = game.lock();
        let _perf = PerfMeasurer::start(Arc::clone(core.perf()));
        let active_instance: Arc<dyn ScriptInstance> = Arc::clone(instance) as _;
        let mut active = ActiveInstanceGuard::install(&mut core, active_instance);
        let capture = CaptureGuard::arm(instance);
        let _storage = StorageGuard::install(instance, Arc::clone(&storage));
        let mut mode = TrialModeGuard::install(&mut active, probe);
        let mut company = CompanyGuard::switch(&mut mode, storage.company());

        trace_phase(ScopePhase::Active);
        let value = f(&mut ScriptApi::new(&mut company));
        trace_phase(ScopePhase::Releasing);
        CoreCall {
            value,
            command: capture.collect(storage.company()),
        }
    };
    trace_phase(ScopePhase::Released);
    call
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandDescriptor, CommandId, ResultValue};
    use crate::game::tests::NullBackend;
    use crate::script_api::CommandOutcome;
    use crate::task::TaskSender;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn fixture() -> (GameLock, Arc<ScriptBridgeInstance>) {
        let core = CoreState::new(NullBackend::default()).with_local_company(CompanyId(1));
        (
            GameLock::new(core),
            Arc::new(ScriptBridgeInstance::new(TaskSender::detached())),
        )
    }

    #[test]
    fn context_is_installed_inside_and_restored_after() {
        let (game, instance) = fixture();
        let storage = ScriptStorage::new(CompanyId(7));

        let call = run_locked(&game, &instance, storage, Arc::new(|| true), |api| {
            (
                api.company(),
                api.is_trial(),
                api.core().active_instance_name().map(str::to_owned),
                api.storage().map(|storage| storage.company()),
                api.core().perf().is_active(),
            )
        });

        assert_eq!(
            call.value,
            (
                CompanyId(7),
                true,
                Some(ScriptBridgeInstance::NAME.to_string()),
                Some(CompanyId(7)),
                true,
            )
        );
        assert!(call.command.is_none());

        let core = game.lock();
        assert_eq!(core.current_company(), CompanyId(1));
        assert!(!core.has_active_instance());
        assert!(!core.has_mode());
        assert!(instance.storage().is_none());
        assert_eq!(core.perf().samples(), 1);
    }

    #[test]
    fn commit_mode_captures_and_trial_mode_only_estimates() {
        let (game, instance) = fixture();
        let storage = ScriptStorage::new(CompanyId(2));

        let estimated = run_locked(&game, &instance, Arc::clone(&storage), Arc::new(|| true), |api| {
            api.do_command(CommandDescriptor::new(CommandId(9), vec![1, 2]))
        });
        assert!(matches!(estimated.value, Ok(CommandOutcome::Estimated(_))));
        assert!(estimated.command.is_none());

        let queued = run_locked(&game, &instance, Arc::clone(&storage), Arc::new(|| false), |api| {
            api.do_command(CommandDescriptor::new(CommandId(9), vec![1, 2]))
        });
        assert!(queued.value.map_or(false, |outcome| outcome.is_queued()));
        let captured = queued.command.expect("captured command");
        assert_eq!(captured.descriptor.command, CommandId(9));
        assert_eq!(captured.company, CompanyId(2));
        assert!(!instance.has_captured_command());
        assert_eq!(storage.accounting().commands_costed, 2);
    }

    #[test]
    fn inserted_values_travel_with_the_command_of_the_same_call() {
        let (game, instance) = fixture();
        let storage = ScriptStorage::new(CompanyId(2));

        let trial = run_locked(&game, &instance, Arc::clone(&storage), Arc::new(|| true), |api| {
            api.insert_result(ResultValue::Int(111))
        });
        assert_eq!(trial.value, Ok(()));
        assert!(trial.command.is_none());
        assert!(instance.get_result().is_empty());

        let commit = run_locked(&game, &instance, storage, Arc::new(|| false), |api| {
            api.insert_result(ResultValue::Bool(true))?;
            api.do_command(CommandDescriptor::new(CommandId(6), vec![]))
        });
        assert!(commit.value.is_ok());
        let captured = commit.command.expect("captured command");
        assert_eq!(captured.script_results, vec![ResultValue::Bool(true)]);
    }

    #[test]
    fn panic_inside_the_scope_unwinds_every_guard() {
        let (game, instance) = fixture();
        let storage = ScriptStorage::new(CompanyId(3));

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            run_locked(&game, &instance, storage, Arc::new(|| false), |api| {
                let _ = api.insert_result(ResultValue::Int(5));
                let _ = api.do_command(CommandDescriptor::new(CommandId(66), vec![]));
                panic!("script api blew up");
            })
        }));
        assert!(outcome.is_err());

        assert!(!game.is_locked());
        assert!(!instance.has_captured_command());
        assert!(instance.get_result().is_empty());
        let core = game.lock();
        assert_eq!(core.current_company(), CompanyId(1));
        assert!(!core.has_active_instance());
        assert!(!core.has_mode());
        assert!(instance.storage().is_none());
    }

    #[test]
    fn refuses_commands_when_storage_disallows() {
        let (game, instance) = fixture();
        let storage = ScriptStorage::new(CompanyId(4));
        storage.set_allow_do_command(false);

        let call = run_locked(&game, &instance, storage, Arc::new(|| false), |api| {
            api.do_command(CommandDescriptor::new(CommandId(1), vec![]))
        });
        assert_eq!(
            call.value,
            Err(crate::error::BridgeError::CommandsDisallowed(CompanyId(4)))
        );
        assert!(call.command.is_none());
    }
}
