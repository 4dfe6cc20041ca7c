//! Device workers: one device, one phase, one outcome.
//!
//! Workers return `Result`; the orchestrator turns every error into a failed
//! [`WorkerOutcome`] at this boundary.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};

use crate::appliance::{ApiConnector, ApiPlan, ApiReport, configure_appliance};
use crate::channel::Session;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::inventory::Device;
use crate::runner::{CommandRunner, PlannedCommand, RunReport, RunnerConfig, router_plan};
use crate::transport::Transport;
use crate::wizard::{Wizard, WizardConfig, WizardParams, WizardReport};

/// Pass/fail of one device in one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub device: String,
    pub success: bool,
    pub message: String,
}

impl WorkerOutcome {
    pub fn success(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            success: false,
            message: message.into(),
        }
    }

    pub fn from_result(device: &str, result: Result<String>) -> Self {
        match result {
            Ok(message) => Self::success(device, message),
            Err(e) => Self::failure(device, e.to_string()),
        }
    }

    /// One-line form for the status board.
    pub fn status_line(&self) -> String {
        if self.success {
            format!("{} configured", self.device)
        } else {
            format!("{} failed: {}", self.device, brief(&self.message, 50))
        }
    }
}

/// First `max` characters of `text`.
pub(crate) fn brief(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Devices that passed and failed in one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeSets {
    passed: BTreeSet<String>,
    failed: BTreeSet<String>,
}

impl OutcomeSets {
    /// File an outcome. A device is only ever in one of the two sets.
    pub fn record(&mut self, outcome: &WorkerOutcome) {
        let (into, from) = if outcome.success {
            (&mut self.passed, &mut self.failed)
        } else {
            (&mut self.failed, &mut self.passed)
        };
        from.remove(&outcome.device);
        into.insert(outcome.device.clone());
    }

    pub fn passed(&self) -> &BTreeSet<String> {
        &self.passed
    }

    pub fn failed(&self) -> &BTreeSet<String> {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.passed.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run `work` with a hard deadline.
pub async fn bounded<T, F>(deadline: Duration, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(deadline, work)
        .await
        .map_err(|_| Error::Deadline(deadline))?
}

/// Run `work` on its own task. A panic inside it comes back as
/// [`Error::Aborted`] instead of unwinding into the caller.
pub async fn isolated<T, F>(work: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(e) => Err(Error::Aborted(e.to_string())),
    }
}

/// Configure one router over telnet. Returns the run summary.
///
/// The command plan is built before connecting, so a template error never
/// touches the device. The session is closed whatever happens after it
/// opened.
pub async fn configure_router(device: &Device, settings: &Settings) -> Result<String> {
    let plan = router_plan(device, &settings.templates)?;
    let runner = settings.runner_config()?;
    let endpoint = device.telnet()?;

    let mut session = Session::connect(settings.telnet_config(&endpoint.host, endpoint.port)).await?;
    let result = drive_router(&mut session, &plan, &runner).await;
    close(&mut session).await;

    let report = result?;
    info!("{}: {}", device.name, report.summary());
    Ok(report.summary())
}

/// Wake the router and send its plan.
pub async fn drive_router<T: Transport>(
    session: &mut Session<T>,
    plan: &[PlannedCommand],
    config: &RunnerConfig,
) -> Result<RunReport> {
    let mut runner = CommandRunner::new(session, config);
    runner.wake().await?;
    runner.run(plan).await
}

/// Walk the appliance's first-boot wizard over telnet.
pub async fn appliance_wizard(device: &Device, settings: &Settings) -> Result<WizardReport> {
    let appliance = &settings.appliance;
    let params = WizardParams::for_device(
        device,
        &appliance.factory_password,
        appliance.gateway,
        appliance.dns.clone(),
    )?;
    let config = settings.wizard_config();
    let endpoint = device.telnet()?;

    let mut session = Session::connect(settings.telnet_config(&endpoint.host, endpoint.port)).await?;
    let result = drive_wizard(&mut session, &config, &params).await;
    close(&mut session).await;
    result
}

pub async fn drive_wizard<T: Transport>(
    session: &mut Session<T>,
    config: &WizardConfig,
    params: &WizardParams,
) -> Result<WizardReport> {
    Wizard::new(session, config, params).run().await
}

/// Configure the appliance through its management API.
pub async fn appliance_api<C: ApiConnector>(
    connector: &C,
    device: &Device,
    settings: &Settings,
) -> Result<ApiReport> {
    let api = connector.connect(device)?;
    let plan = ApiPlan::for_device(
        device,
        &settings.appliance.api_interfaces,
        settings.appliance.api_default_gateway,
    );
    if plan.targets.is_empty() {
        warn!("{}: none of the API target interfaces are in the inventory", device.name);
    }
    configure_appliance(&api, &plan, &settings.api_config()).await
}

async fn close<T: Transport>(session: &mut Session<T>) {
    if let Err(e) = session.close().await {
        debug!("{}: close failed: {e}", session.host());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, WizardError};
    use crate::inventory::{Credentials, DeviceKind, Interface};
    use crate::testing::ScriptedTransport;
    use crate::transport::TelnetConfig;
    use std::net::Ipv4Addr;

    fn router() -> Device {
        Device::new("R1", DeviceKind::Router)
            .with_credentials(Credentials::new("cisco", "cisco"))
            .with_telnet("127.0.0.1", 1)
            .with_interface(Interface {
                name: "GigabitEthernet0/1".into(),
                address: Ipv4Addr::new(192, 168, 10, 1),
                prefix_len: 24,
                link: Some("r1-r2".into()),
                alias: None,
            })
    }

    #[test]
    fn test_outcome_sets_stay_disjoint() {
        let mut sets = OutcomeSets::default();
        sets.record(&WorkerOutcome::failure("R1", "timeout"));
        sets.record(&WorkerOutcome::success("R2", "ok"));
        sets.record(&WorkerOutcome::success("R1", "ok on retry"));

        assert_eq!(sets.len(), 2);
        assert!(sets.failed().is_empty());
        assert!(sets.passed().contains("R1"));
    }

    #[test]
    fn test_status_line_truncates() {
        let long = "x".repeat(120);
        let line = WorkerOutcome::failure("R3", long).status_line();
        assert_eq!(line, format!("R3 failed: {}", "x".repeat(50)));
        assert_eq!(WorkerOutcome::success("R1", "").status_line(), "R1 configured");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_reports_deadline() {
        let err = bounded(Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Deadline(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_isolated_turns_panic_into_error() {
        let devices: Vec<String> = Vec::new();
        let err = isolated(async move { Ok(devices[0].len()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Aborted(_)));
        assert!(err.to_string().starts_with("Worker aborted"));
    }

    #[tokio::test]
    async fn test_isolated_passes_result_through() {
        assert_eq!(isolated(async { Ok(7) }).await.unwrap(), 7);
        let err = isolated::<(), _>(async { Err(Error::Deadline(Duration::from_secs(1))) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Deadline(_)));
    }

    #[tokio::test]
    async fn test_unreachable_router_is_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let device = Device::new("R9", DeviceKind::Router)
            .with_credentials(Credentials::new("cisco", "cisco"))
            .with_telnet("127.0.0.1", port);

        let err = configure_router(&device, &Settings::default()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_router_sends_plan_after_wake() {
        let settings = Settings::default();
        let plan = router_plan(&router(), &settings.templates).unwrap();
        let mut transport = ScriptedTransport::new();
        for command in &plan {
            transport = transport.on_line(&command.text, "\r\nR1(config)#");
        }
        let mut session = Session::new(transport, TelnetConfig::new("r1", 5001));
        let config = settings.runner_config().unwrap();

        let report = drive_router(&mut session, &plan, &config).await.unwrap();

        assert!(report.is_clean(), "{}", report.summary());
        assert_eq!(report.sent, plan.len());
        assert_eq!(session.transport().written[0], "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_wizard_surfaces_failure() {
        let device = Device::new("FTD", DeviceKind::Appliance)
            .with_credentials(Credentials::new("admin", "Cisco@135"))
            .with_interface(Interface {
                name: "Management1/1".into(),
                address: Ipv4Addr::new(192, 168, 200, 4),
                prefix_len: 24,
                link: Some("management".into()),
                alias: Some("initial".into()),
            });
        let params =
            WizardParams::for_device(&device, "Admin123", Ipv4Addr::new(192, 168, 200, 1), "8.8.8.8")
                .unwrap();
        let config = WizardConfig {
            attempt_budget: 3,
            attempt_timeout: Duration::from_secs(1),
            settle_delay: Duration::ZERO,
            ..WizardConfig::default()
        };
        let transport = ScriptedTransport::new().initial("booting, please wait");
        let mut session = Session::new(transport, TelnetConfig::new("ftd", 5013));

        let err = drive_wizard(&mut session, &config, &params).await.unwrap_err();
        assert!(matches!(err, Error::Wizard(WizardError::ProtocolMismatch { .. })));
    }
}
