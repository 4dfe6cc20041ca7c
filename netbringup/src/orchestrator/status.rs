//! Progress of one orchestration run, shared with external observers.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use serde::{Deserialize, Serialize};

/// The five sequential phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    LoadInventory,
    HostSetup,
    Routers,
    ApplianceWizard,
    ApplianceApi,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::LoadInventory,
        Phase::HostSetup,
        Phase::Routers,
        Phase::ApplianceWizard,
        Phase::ApplianceApi,
    ];

    /// Step id as reported in the status document.
    pub fn id(self) -> u32 {
        match self {
            Self::LoadInventory => 1,
            Self::HostSetup => 2,
            Self::Routers => 3,
            Self::ApplianceWizard => 4,
            Self::ApplianceApi => 5,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::LoadInventory => "Load testbed",
            Self::HostSetup => "Server interfaces",
            Self::Routers => "Router Configuration",
            Self::ApplianceWizard => "Appliance initial setup",
            Self::ApplianceApi => "Appliance API configuration",
        }
    }

    /// Key in the run summary.
    pub fn key(self) -> &'static str {
        match self {
            Self::LoadInventory => "load_testbed",
            Self::HostSetup => "server_setup",
            Self::Routers => "router_config",
            Self::ApplianceWizard => "appliance_initial",
            Self::ApplianceApi => "appliance_api",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationStep {
    pub id: u32,
    pub name: String,
    pub completed: bool,
    #[serde(rename = "inProgress")]
    pub in_progress: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationStatus {
    pub current_step: u32,
    pub steps: Vec<OrchestrationStep>,
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    pub error: Option<String>,
}

impl Default for OrchestrationStatus {
    fn default() -> Self {
        Self {
            current_step: 0,
            steps: Phase::ALL
                .iter()
                .map(|phase| OrchestrationStep {
                    id: phase.id(),
                    name: phase.title().to_string(),
                    completed: false,
                    in_progress: false,
                    message: String::new(),
                })
                .collect(),
            is_running: false,
            error: None,
        }
    }
}

impl OrchestrationStatus {
    pub fn step(&self, phase: Phase) -> Option<&OrchestrationStep> {
        self.steps.iter().find(|s| s.id == phase.id())
    }
}

/// Lock-guarded status document. Clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<OrchestrationStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OrchestrationStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite one step's fields. A completed step becomes the current one.
    ///
    /// Ignored unless a run is in flight, so a finished document stays as
    /// [`finish`](Self::finish) left it.
    pub fn update_status(&self, phase: Phase, completed: bool, in_progress: bool, message: &str) {
        let mut status = self.lock();
        if !status.is_running {
            debug!("status: dropping late update for step {}: {message:?}", phase.id());
            return;
        }
        if let Some(step) = status.steps.iter_mut().find(|s| s.id == phase.id()) {
            step.completed = completed;
            step.in_progress = in_progress;
            step.message = message.to_string();
        }
        if completed {
            status.current_step = phase.id();
        }
        debug!(
            "status: step {} completed={completed} inProgress={in_progress} {message:?}",
            phase.id()
        );
    }

    /// Mark a phase as running with a progress message.
    pub fn progress(&self, phase: Phase, message: &str) {
        self.update_status(phase, false, true, message);
    }

    /// Record a phase's final outcome.
    pub fn conclude(&self, phase: Phase, success: bool, message: &str) {
        self.update_status(phase, success, false, message);
    }

    pub fn snapshot(&self) -> OrchestrationStatus {
        self.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running
    }

    /// Start over with a fresh document. Refused while a run is in flight.
    pub fn reset(&self) -> bool {
        let mut status = self.lock();
        if status.is_running {
            return false;
        }
        *status = OrchestrationStatus::default();
        true
    }

    /// Reset and mark running in one step. `false` if a run is already in
    /// flight.
    pub fn try_begin(&self) -> bool {
        let mut status = self.lock();
        if status.is_running {
            return false;
        }
        *status = OrchestrationStatus {
            is_running: true,
            ..OrchestrationStatus::default()
        };
        true
    }

    /// Close the run. When every phase succeeded all steps are shown
    /// completed; otherwise `error` explains the failure.
    pub fn finish(&self, error: Option<String>) {
        let mut status = self.lock();
        status.is_running = false;
        match error {
            None => {
                for step in &mut status.steps {
                    step.completed = true;
                    step.in_progress = false;
                }
                status.error = None;
            }
            Some(error) => {
                for step in &mut status.steps {
                    step.in_progress = false;
                }
                status.error = Some(error);
            }
        }
    }
}
