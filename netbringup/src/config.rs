//! Run settings.
//!
//! Every field has a default so an absent or partial settings file works.
//! Durations are given in seconds, or milliseconds where sub-second pacing
//! matters.

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::appliance::{ApiConfig, FdmConnector};
use crate::channel::Pattern;
use crate::error::{ConfigError, Result};
use crate::host::{DryRunHost, HostRoute, HostSetup, IpCommandHost};
use crate::runner::{CommandTemplates, RunnerConfig};
use crate::transport::TelnetConfig;
use crate::wizard::WizardConfig;

/// How host network changes are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostMode {
    /// Run `ip` commands.
    Ip,
    /// Log the commands only.
    DryRun,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub mode: HostMode,
    /// Inventory device describing the orchestration host.
    pub device: String,
    pub sudo: bool,
    pub routes: Vec<HostRoute>,
}

impl Default for HostSettings {
    fn default() -> Self {
        let route = |net: &str, last: u8| HostRoute::new(net, Ipv4Addr::new(192, 168, 200, last));
        Self {
            mode: HostMode::Ip,
            device: "UbuntuServer".to_string(),
            sudo: true,
            routes: vec![
                route("192.168.10.0/24", 1),
                route("192.168.20.0/24", 1),
                route("192.168.30.0/24", 2),
                route("192.168.40.0/24", 3),
                route("192.168.50.0/24", 4),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplianceSettings {
    /// Password the appliance ships with.
    pub factory_password: String,
    /// Management gateway answered in the wizard.
    pub gateway: Ipv4Addr,
    pub dns: String,
    pub api_port: u16,
    /// Data interfaces addressed through the API.
    pub api_interfaces: Vec<String>,
    /// Next hop of the default route installed through the API.
    pub api_default_gateway: Ipv4Addr,
    pub api_ready_timeout_secs: u64,
    pub api_ready_interval_secs: u64,
    pub deploy_settle_secs: u64,
}

impl Default for ApplianceSettings {
    fn default() -> Self {
        Self {
            factory_password: "Admin123".to_string(),
            gateway: Ipv4Addr::new(192, 168, 200, 1),
            dns: "192.168.200.1".to_string(),
            api_port: 443,
            api_interfaces: vec![
                "GigabitEthernet0/2".to_string(),
                "GigabitEthernet0/3".to_string(),
            ],
            api_default_gateway: Ipv4Addr::new(192, 168, 200, 254),
            api_ready_timeout_secs: 60,
            api_ready_interval_secs: 10,
            deploy_settle_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelnetSettings {
    pub connect_timeout_secs: u64,
    pub write_grace_ms: u64,
    pub quiet_period_ms: u64,
    pub poll_interval_ms: u64,
    pub line_terminator: String,
    pub search_depth: usize,
}

impl Default for TelnetSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            write_grace_ms: 300,
            quiet_period_ms: 500,
            poll_interval_ms: 500,
            line_terminator: "\n".to_string(),
            search_depth: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WizardSettings {
    pub attempt_budget: u32,
    pub attempt_timeout_secs: u64,
    pub login_attempts: u32,
    pub eula_page_limit: u32,
    pub password_retries: u32,
    pub reply_budget: u32,
    pub settle_delay_secs: u64,
    pub verify: bool,
}

impl Default for WizardSettings {
    fn default() -> Self {
        let d = WizardConfig::default();
        Self {
            attempt_budget: d.attempt_budget,
            attempt_timeout_secs: d.attempt_timeout.as_secs(),
            login_attempts: d.login_attempts,
            eula_page_limit: d.eula_page_limit,
            password_retries: d.password_retries,
            reply_budget: d.reply_budget,
            settle_delay_secs: d.settle_delay.as_secs(),
            verify: d.verify,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub command_timeout_secs: u64,
    pub banner_timeout_secs: u64,
    /// Regex matched against the output tail.
    pub prompt: String,
    pub failed_when_contains: Vec<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        let d = RunnerConfig::default();
        Self {
            command_timeout_secs: d.command_timeout.as_secs(),
            banner_timeout_secs: d.banner_timeout.as_secs(),
            prompt: d.prompt.as_str().to_string(),
            failed_when_contains: d.failed_when_contains,
        }
    }
}

/// Everything an orchestration run can be tuned with.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Routers configured at the same time.
    pub concurrency: usize,
    /// Hard bound on one device worker.
    pub worker_deadline_secs: u64,
    pub host: HostSettings,
    pub appliance: ApplianceSettings,
    pub telnet: TelnetSettings,
    pub wizard: WizardSettings,
    pub runner: RunnerSettings,
    pub templates: CommandTemplates,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            worker_deadline_secs: 300,
            host: HostSettings::default(),
            appliance: ApplianceSettings::default(),
            telnet: TelnetSettings::default(),
            wizard: WizardSettings::default(),
            runner: RunnerSettings::default(),
            templates: CommandTemplates::default(),
        }
    }
}

impl Settings {
    /// Read a YAML settings file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(text).map_err(ConfigError::Parse)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });
        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".to_string());
        }
        if self.wizard.attempt_budget == 0 || self.wizard.attempt_timeout_secs == 0 {
            return invalid("wizard attempt budget and timeout must be non-zero".to_string());
        }
        if self.runner.command_timeout_secs == 0 {
            return invalid("runner command timeout must be non-zero".to_string());
        }
        if let Err(e) = Pattern::regex(&self.runner.prompt) {
            return invalid(format!("runner prompt {:?}: {e}", self.runner.prompt));
        }
        Ok(())
    }

    pub fn worker_deadline(&self) -> Duration {
        Duration::from_secs(self.worker_deadline_secs)
    }

    pub fn telnet_config(&self, host: &str, port: u16) -> TelnetConfig {
        let t = &self.telnet;
        let mut config = TelnetConfig::new(host, port)
            .with_connect_timeout(Duration::from_secs(t.connect_timeout_secs))
            .with_write_grace(Duration::from_millis(t.write_grace_ms));
        config.quiet_period = Duration::from_millis(t.quiet_period_ms);
        config.poll_interval = Duration::from_millis(t.poll_interval_ms);
        config.line_terminator = t.line_terminator.clone();
        config.search_depth = t.search_depth;
        config
    }

    pub fn wizard_config(&self) -> WizardConfig {
        let w = &self.wizard;
        WizardConfig {
            attempt_budget: w.attempt_budget,
            attempt_timeout: Duration::from_secs(w.attempt_timeout_secs),
            login_attempts: w.login_attempts,
            eula_page_limit: w.eula_page_limit,
            password_retries: w.password_retries,
            reply_budget: w.reply_budget,
            settle_delay: Duration::from_secs(w.settle_delay_secs),
            verify: w.verify,
        }
    }

    pub fn runner_config(&self) -> Result<RunnerConfig> {
        let r = &self.runner;
        let prompt = Pattern::regex(&r.prompt).map_err(|e| ConfigError::Invalid {
            message: format!("runner prompt {:?}: {e}", r.prompt),
        })?;
        Ok(RunnerConfig {
            command_timeout: Duration::from_secs(r.command_timeout_secs),
            banner_timeout: Duration::from_secs(r.banner_timeout_secs),
            prompt,
            failed_when_contains: r.failed_when_contains.clone(),
        })
    }

    pub fn api_config(&self) -> ApiConfig {
        let a = &self.appliance;
        ApiConfig {
            ready_timeout: Duration::from_secs(a.api_ready_timeout_secs),
            ready_interval: Duration::from_secs(a.api_ready_interval_secs),
            deploy_settle: Duration::from_secs(a.deploy_settle_secs),
        }
    }

    pub fn host_setup(&self) -> HostSetup {
        match self.host.mode {
            HostMode::Ip => HostSetup::Ip(IpCommandHost::new(self.host.sudo)),
            HostMode::DryRun => HostSetup::DryRun(DryRunHost::new()),
        }
    }

    pub fn api_connector(&self) -> FdmConnector {
        FdmConnector {
            port: self.appliance.api_port,
        }
    }
}
