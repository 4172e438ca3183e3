//! Trial/commit mode: a probe the core consults before mutating state.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::game::CoreState;

/// Returns `true` while commands should only be estimated.
pub type TrialProbe = Arc<dyn Fn() -> bool + Send + Sync>;

static NEXT_MODE_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identity of one installed mode, used to detect replacement mid-scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeToken(u64);

impl ModeToken {
    fn next() -> Self {
        ModeToken(NEXT_MODE_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// The mode currently installed in the core.
#[derive(Clone)]
pub struct ModeBinding {
    token: ModeToken,
    probe: TrialProbe,
}

impl ModeBinding {
    pub fn new(probe: TrialProbe) -> Self {
        Self {
            token: ModeToken::next(),
            probe,
        }
    }

    pub fn token(&self) -> ModeToken {
        self.token
    }

    pub fn is_trial(&self) -> bool {
        (self.probe)()
    }
}

impl fmt::Debug for ModeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeBinding")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Installs a [`ModeBinding`] for its lifetime and puts the previous one back
/// on drop, unless something else replaced it in the meantime.
pub struct TrialModeGuard<'a> {
    core: &'a mut CoreState,
    token: ModeToken,
    previous: Option<ModeBinding>,
}

impl<'a> TrialModeGuard<'a> {
    pub fn install(core: &'a mut CoreState, probe: TrialProbe) -> Self {
        let binding = ModeBinding::new(probe);
        let token = binding.token();
        let previous = core.script.mode.replace(binding);
        Self {
            core,
            token,
            previous,
        }
    }

    pub fn token(&self) -> ModeToken {
        self.token
    }
}

impl Deref for TrialModeGuard<'_> {
    type Target = CoreState;

    fn deref(&self) -> &CoreState {
        self.core
    }
}

impl DerefMut for TrialModeGuard<'_> {
    fn deref_mut(&mut self) -> &mut CoreState {
        self.core
    }
}

impl Drop for TrialModeGuard<'_> {
    fn drop(&mut self) {
        let still_current = self
            .core
            .script
            .mode
            .as_ref()
            .map_or(false, |binding| binding.token() == self.token);
        if still_current {
            self.core.script.mode = self.previous.take();
        } else {
            tracing::warn!(
                target: "script_bridge::scope",
                token = ?self.token,
                "mode.restore=skipped_replaced"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::NullBackend;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn probe_decides_trial_and_previous_mode_is_restored() {
        let mut core = CoreState::new(NullBackend::default());
        let estimating = Arc::new(AtomicBool::new(true));

        {
            let flag = Arc::clone(&estimating);
            let mut guard =
                TrialModeGuard::install(&mut core, Arc::new(move || flag.load(Ordering::SeqCst)));
            assert!(guard.is_trial());
            estimating.store(false, Ordering::SeqCst);
            assert!(!guard.is_trial());
            guard.set_game_mode(crate::game::GameMode::Normal);
        }

        assert!(!core.has_mode());
        assert_eq!(core.game_mode(), crate::game::GameMode::Normal);
    }

    #[test]
    fn nested_modes_unwind_in_order() {
        let mut core = CoreState::new(NullBackend::default());
        {
            let mut outer = TrialModeGuard::install(&mut core, Arc::new(|| false));
            let outer_token = outer.token();
            {
                let inner = TrialModeGuard::install(&mut outer, Arc::new(|| true));
                assert!(inner.is_trial());
            }
            assert_eq!(
                outer.script.mode.as_ref().map(ModeBinding::token),
                Some(outer_token)
            );
            assert!(!outer.is_trial());
        }
        assert!(!core.has_mode());
    }

    #[test]
    fn replaced_mode_is_not_clobbered() {
        let mut core = CoreState::new(NullBackend::default());
        let intruder = ModeBinding::new(Arc::new(|| true));
        let intruder_token = intruder.token();

        {
            let mut guard = TrialModeGuard::install(&mut core, Arc::new(|| false));
            guard.script.mode = Some(intruder);
        }

        assert_eq!(
            core.script.mode.as_ref().map(ModeBinding::token),
            Some(intruder_token)
        );
    }
}
