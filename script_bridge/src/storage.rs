use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::command::{CommandCost, CompanyId, Money};

/// Cost bookkeeping for every command a script context had costed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageAccounting {
    pub costs: Money,
    pub last_cost: Money,
    pub last_error: Option<String>,
    pub commands_costed: u32,
}

/// Per-script data the engine registers before entering the core. Carries the
/// company the script acts as while it holds the game lock.
#[derive(Debug)]
pub struct ScriptStorage {
    root_company: CompanyId,
    company: CompanyId,
    allow_do_command: AtomicBool,
    accounting: Mutex<StorageAccounting>,
}

impl ScriptStorage {
    pub fn new(company: CompanyId) -> Arc<Self> {
        Self::acting_as(company, company)
    }

    /// Storage owned by `root` that issues commands as `company`.
    pub fn acting_as(root: CompanyId, company: CompanyId) -> Arc<Self> {
        Arc::new(Self {
            root_company: root,
            company,
            allow_do_command: AtomicBool::new(true),
            accounting: Mutex::new(StorageAccounting::default()),
        })
    }

    pub fn company(&self) -> CompanyId {
        self.company
    }

    pub fn root_company(&self) -> CompanyId {
        self.root_company
    }

    pub fn allows_commands(&self) -> bool {
        self.allow_do_command.load(Ordering::Relaxed)
    }

    pub fn set_allow_do_command(&self, allow: bool) {
        self.allow_do_command.store(allow, Ordering::Relaxed);
    }

    pub fn accounting(&self) -> StorageAccounting {
        self.accounting.lock().clone()
    }

    pub(crate) fn record(&self, cost: &CommandCost) {
        let mut accounting = self.accounting.lock();
        accounting.commands_costed += 1;
        if cost.success {
            accounting.last_cost = cost.cost;
            accounting.costs += cost.cost;
            accounting.last_error = None;
        } else {
            accounting.last_error = cost.error.clone();
        }
    }
}
