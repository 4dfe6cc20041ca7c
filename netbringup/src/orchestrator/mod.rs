//! Phase sequencing and device fan-out.
//!
//! A run loads the inventory, sets up the host, configures every router
//! concurrently, then walks the appliance through its wizard and API
//! configuration. Only an inventory failure stops a run early. Progress is
//! published on a [`StatusBoard`].

mod status;
mod worker;

pub use status::{OrchestrationStatus, OrchestrationStep, Phase, StatusBoard};
pub use worker::{
    OutcomeSets, WorkerOutcome, appliance_api, appliance_wizard, bounded, configure_router,
    drive_router, drive_wizard, isolated,
};

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::stream::{self, StreamExt};
use indexmap::IndexMap;
use log::{info, warn};

use crate::appliance::{ApiConnector, FdmConnector};
use crate::config::Settings;
use crate::error::Error;
use crate::host::{HostNetwork, HostReport, HostSetup, configure_interfaces, configure_routes};
use crate::inventory::{DeviceKind, Inventory};
use worker::brief;

/// Error recorded on the status board when a phase after the inventory
/// load failed.
pub const PARTIAL_FAILURE: &str = "Some steps failed - check logs";

/// Per-phase results of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Phase key to success, in execution order.
    pub results: IndexMap<&'static str, bool>,
    /// Device outcomes of the phases that have devices.
    pub outcomes: IndexMap<&'static str, OutcomeSets>,
}

impl RunSummary {
    fn record(&mut self, phase: Phase, success: bool) {
        self.results.insert(phase.key(), success);
    }

    pub fn phase(&self, phase: Phase) -> Option<bool> {
        self.results.get(phase.key()).copied()
    }

    pub fn outcomes(&self, phase: Phase) -> Option<&OutcomeSets> {
        self.outcomes.get(phase.key())
    }

    /// Every phase ran and succeeded.
    pub fn success(&self) -> bool {
        self.results.len() == Phase::ALL.len() && self.results.values().all(|ok| *ok)
    }
}

/// Drives one orchestration run at a time.
pub struct Orchestrator<H = HostSetup, C = FdmConnector> {
    settings: Arc<Settings>,
    status: StatusBoard,
    host: H,
    connector: Arc<C>,
}

impl Orchestrator {
    /// Orchestrator with the host and API implementations the settings select.
    pub fn new(settings: Settings, status: StatusBoard) -> Self {
        let host = settings.host_setup();
        let connector = settings.api_connector();
        Self::with_parts(settings, status, host, connector)
    }
}

impl<H: HostNetwork, C: ApiConnector + 'static> Orchestrator<H, C> {
    pub fn with_parts(settings: Settings, status: StatusBoard, host: H, connector: C) -> Self {
        Self {
            settings: Arc::new(settings),
            status,
            host,
            connector: Arc::new(connector),
        }
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Start a run unless one is already in flight.
    pub async fn run(&self, testbed: impl AsRef<Path>) -> Option<RunSummary> {
        if !self.status.try_begin() {
            warn!("orchestration already running");
            return None;
        }
        Some(self.execute(testbed).await)
    }

    /// Run every phase. The caller has already marked the board running
    /// (see [`StatusBoard::try_begin`]); the board is finished on return.
    pub async fn execute(&self, testbed: impl AsRef<Path>) -> RunSummary {
        let mut summary = RunSummary::default();

        let inventory = match self.load_inventory(testbed.as_ref()).await {
            Ok(inventory) => Arc::new(inventory),
            Err(message) => {
                summary.record(Phase::LoadInventory, false);
                warn!("inventory load failed, stopping run");
                self.status.finish(Some(message));
                return summary;
            }
        };
        summary.record(Phase::LoadInventory, true);

        let host_ok = self.host_setup(&inventory).await;
        summary.record(Phase::HostSetup, host_ok);
        if !host_ok {
            warn!("host setup failed, continuing");
        }

        let routers = self.configure_routers(&inventory).await;
        let routers_ok = routers.failed().is_empty();
        summary.record(Phase::Routers, routers_ok);
        summary.outcomes.insert(Phase::Routers.key(), routers);
        if !routers_ok {
            warn!("router configuration had failures, continuing");
        }

        let wizard = self.appliance_wizard(&inventory).await;
        summary.record(Phase::ApplianceWizard, wizard.failed().is_empty() && !wizard.is_empty());
        summary.outcomes.insert(Phase::ApplianceWizard.key(), wizard);

        let api = self.appliance_api(&inventory).await;
        summary.record(Phase::ApplianceApi, api.failed().is_empty() && !api.is_empty());
        summary.outcomes.insert(Phase::ApplianceApi.key(), api);

        for (phase, ok) in &summary.results {
            info!("{phase:20}: {}", if *ok { "PASS" } else { "FAIL" });
        }
        self.status.finish(if summary.success() {
            None
        } else {
            Some(PARTIAL_FAILURE.to_string())
        });
        summary
    }

    async fn load_inventory(&self, path: &Path) -> Result<Inventory, String> {
        let phase = Phase::LoadInventory;
        self.status.progress(phase, "Loading testbed...");
        match Inventory::load(path).await {
            Ok(inventory) => {
                info!("loaded {} devices from {}", inventory.len(), path.display());
                self.status.conclude(phase, true, "Testbed loaded successfully");
                Ok(inventory)
            }
            Err(e) => {
                let message = format!("Testbed load error: {e}");
                self.status.conclude(phase, false, &message);
                Err(message)
            }
        }
    }

    async fn host_setup(&self, inventory: &Inventory) -> bool {
        let phase = Phase::HostSetup;
        let name = &self.settings.host.device;
        self.status.progress(phase, "Configuring server interfaces...");

        let Ok(device) = inventory.device(name) else {
            self.status
                .conclude(phase, false, &format!("{name} not found in testbed"));
            return false;
        };

        let mut report = HostReport::default();
        configure_interfaces(&self.host, device, &mut report).await;
        self.status.progress(phase, "Adding server routes...");
        configure_routes(&self.host, &self.settings.host.routes, &mut report).await;

        if report.is_clean() {
            self.status
                .conclude(phase, true, "Server interfaces and routes configured");
            true
        } else {
            let message = format!(
                "Server configuration failed: {}",
                brief(&report.errors.join("; "), 120)
            );
            self.status.conclude(phase, false, &message);
            false
        }
    }

    async fn configure_routers(&self, inventory: &Arc<Inventory>) -> OutcomeSets {
        let phase = Phase::Routers;
        self.status.progress(phase, "Starting router configuration...");

        let names: Vec<String> = inventory.routers().map(|d| d.name.clone()).collect();
        if names.is_empty() {
            self.status.conclude(phase, true, "No routers to configure");
            return OutcomeSets::default();
        }
        let total = names.len();
        let shared = Arc::new(Mutex::new(OutcomeSets::default()));

        let workers: Vec<_> = names
            .into_iter()
            .map(|name| self.spawn_router(Arc::clone(inventory), name, Arc::clone(&shared)))
            .collect();
        stream::iter(workers)
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let outcomes = shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let passed = outcomes.passed().len();
        if passed == total {
            self.status
                .conclude(phase, true, &format!("All {total} routers configured"));
        } else {
            self.status.conclude(
                phase,
                false,
                &format!("Only {passed}/{total} routers configured"),
            );
        }
        outcomes
    }

    /// One router worker on its own task. A panic inside it becomes a
    /// failed outcome like any other error.
    async fn spawn_router(
        &self,
        inventory: Arc<Inventory>,
        name: String,
        shared: Arc<Mutex<OutcomeSets>>,
    ) -> WorkerOutcome {
        let settings = Arc::clone(&self.settings);
        let status = self.status.clone();
        let result = {
            let name = name.clone();
            isolated(async move {
                status.progress(Phase::Routers, &format!("Configuring {name}..."));
                bounded(settings.worker_deadline(), async {
                    let device = inventory.device(&name).map_err(Error::from)?;
                    configure_router(device, &settings).await
                })
                .await
            })
            .await
        };

        let outcome = WorkerOutcome::from_result(&name, result);
        self.status.progress(Phase::Routers, &outcome.status_line());
        if outcome.success {
            info!("{} configured: {}", outcome.device, outcome.message);
        } else {
            warn!("{} failed: {}", outcome.device, outcome.message);
        }
        shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&outcome);
        outcome
    }

    async fn appliance_wizard(&self, inventory: &Arc<Inventory>) -> OutcomeSets {
        let phase = Phase::ApplianceWizard;
        let mut outcomes = OutcomeSets::default();
        self.status.progress(phase, "Starting appliance initial setup...");

        let Some(device) = inventory.first_of_kind(&DeviceKind::Appliance) else {
            self.status
                .conclude(phase, false, "No appliance device in inventory");
            return outcomes;
        };

        let result = {
            let settings = Arc::clone(&self.settings);
            let inventory = Arc::clone(inventory);
            let name = device.name.clone();
            isolated(async move {
                let device = inventory.device(&name).map_err(Error::from)?;
                bounded(settings.worker_deadline(), appliance_wizard(device, &settings)).await
            })
            .await
        };
        let outcome = match result {
            Ok(report) => {
                info!(
                    "{}: wizard completed in {}s",
                    device.name,
                    report.elapsed.as_secs()
                );
                self.status
                    .conclude(phase, true, "Appliance initial setup completed");
                WorkerOutcome::success(&device.name, "initial setup completed")
            }
            Err(Error::Deadline(_)) => {
                self.status.conclude(phase, false, "Appliance setup timed out");
                WorkerOutcome::failure(&device.name, "timed out")
            }
            Err(e) => {
                warn!("{}: initial setup failed: {e}", device.name);
                self.status
                    .conclude(phase, false, &format!("Appliance setup failed: {e}"));
                WorkerOutcome::failure(&device.name, e.to_string())
            }
        };
        if !outcome.success {
            warn!("appliance initial setup incomplete, trying API configuration anyway");
        }
        outcomes.record(&outcome);
        outcomes
    }

    async fn appliance_api(&self, inventory: &Arc<Inventory>) -> OutcomeSets {
        let phase = Phase::ApplianceApi;
        let mut outcomes = OutcomeSets::default();
        self.status.progress(phase, "Adding appliance IPs and gateway...");

        let Some(device) = inventory.first_of_kind(&DeviceKind::Appliance) else {
            self.status
                .conclude(phase, false, "No appliance device in inventory");
            return outcomes;
        };
        if let Ok(management) = device.management_interface() {
            self.status.progress(
                phase,
                &format!("Connecting to appliance at {}...", management.address),
            );
        }

        let result = {
            let settings = Arc::clone(&self.settings);
            let connector = Arc::clone(&self.connector);
            let inventory = Arc::clone(inventory);
            let name = device.name.clone();
            isolated(async move {
                let device = inventory.device(&name).map_err(Error::from)?;
                bounded(
                    settings.worker_deadline(),
                    appliance_api(connector.as_ref(), device, &settings),
                )
                .await
            })
            .await
        };
        let outcome = match result {
            Ok(report) => {
                let message = format!("Appliance: {}", report.summary());
                self.status.conclude(phase, report.success(), &message);
                if report.success() {
                    WorkerOutcome::success(&device.name, message)
                } else {
                    WorkerOutcome::failure(&device.name, message)
                }
            }
            Err(e) => {
                warn!("{}: API configuration failed: {e}", device.name);
                self.status.conclude(
                    phase,
                    false,
                    &format!("Appliance API configuration failed: {e}"),
                );
                WorkerOutcome::failure(&device.name, e.to_string())
            }
        };
        outcomes.record(&outcome);
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appliance::FdmClient;
    use crate::host::DryRunHost;
    use crate::inventory::Device;
    use std::io::Write;

    const TESTBED: &str = r#"
testbed:
  name: lab
devices:
  UbuntuServer:
    type: linux
    credentials:
      default: {username: ubuntu, password: ubuntu}
    connections:
      telnet: {ip: 127.0.0.1, port: 5000}
topology:
  UbuntuServer:
    interfaces:
      ens4:
        ipv4: 192.168.200.254/24
        link: management
"#;

    fn orchestrator() -> Orchestrator<DryRunHost, FdmConnector> {
        Orchestrator::with_parts(
            Settings::default(),
            StatusBoard::new(),
            DryRunHost::new(),
            FdmConnector::default(),
        )
    }

    #[tokio::test]
    async fn test_inventory_failure_stops_run() {
        let orchestrator = orchestrator();

        let summary = orchestrator
            .run("/nonexistent/testbed.yaml")
            .await
            .unwrap();

        assert_eq!(summary.phase(Phase::LoadInventory), Some(false));
        assert_eq!(summary.results.len(), 1);
        let status = orchestrator.status().snapshot();
        assert!(!status.is_running);
        assert!(status.error.unwrap().starts_with("Testbed load error"));
        assert!(!status.steps[1].in_progress && status.steps[1].message.is_empty());
        assert!(orchestrator.host().issued().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_is_refused_while_running() {
        let orchestrator = orchestrator();
        assert!(orchestrator.status().try_begin());
        assert!(orchestrator.run("/nonexistent/testbed.yaml").await.is_none());
        assert!(orchestrator.status().is_running());
    }

    #[tokio::test]
    async fn test_run_without_routers_or_appliance() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TESTBED.as_bytes()).unwrap();
        let orchestrator = orchestrator();

        let summary = orchestrator.run(file.path()).await.unwrap();

        assert_eq!(summary.phase(Phase::HostSetup), Some(true));
        assert_eq!(summary.phase(Phase::Routers), Some(true));
        assert_eq!(summary.phase(Phase::ApplianceWizard), Some(false));
        assert_eq!(summary.phase(Phase::ApplianceApi), Some(false));
        assert!(!summary.success());
        assert_eq!(orchestrator.host().issued().len(), 2 + 5);

        let status = orchestrator.status().snapshot();
        assert_eq!(status.error.as_deref(), Some(PARTIAL_FAILURE));
        assert_eq!(
            status.step(Phase::Routers).unwrap().message,
            "No routers to configure"
        );
        assert_eq!(
            status.step(Phase::ApplianceApi).unwrap().message,
            "No appliance device in inventory"
        );
    }

    struct PanickingConnector;

    impl ApiConnector for PanickingConnector {
        type Api = FdmClient;

        fn connect(&self, device: &Device) -> crate::Result<FdmClient> {
            panic!("no client for {}", device.name);
        }
    }

    #[tokio::test]
    async fn test_panicking_appliance_worker_is_a_failed_outcome() {
        let testbed = r#"
devices:
  UbuntuServer:
    type: linux
  FTD:
    type: ftd
    credentials:
      default: {username: admin, password: Cisco@135}
topology:
  UbuntuServer:
    interfaces:
      ens4:
        ipv4: 192.168.200.254/24
        link: management
  FTD:
    interfaces:
      Management1/1:
        ipv4: 192.168.200.4/24
        link: management
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(testbed.as_bytes()).unwrap();
        let orchestrator = Orchestrator::with_parts(
            Settings::default(),
            StatusBoard::new(),
            DryRunHost::new(),
            PanickingConnector,
        );

        let summary = orchestrator.run(file.path()).await.unwrap();

        assert_eq!(summary.phase(Phase::ApplianceWizard), Some(false));
        assert_eq!(summary.phase(Phase::ApplianceApi), Some(false));
        let api = summary.outcomes(Phase::ApplianceApi).unwrap();
        assert!(api.failed().contains("FTD"));

        let status = orchestrator.status().snapshot();
        assert!(!status.is_running);
        assert_eq!(status.error.as_deref(), Some(PARTIAL_FAILURE));
        let message = &status.step(Phase::ApplianceApi).unwrap().message;
        assert!(message.contains("Worker aborted"), "{message}");
    }
}
