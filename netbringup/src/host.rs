//! Network setup of the orchestration host itself.
//!
//! The host device in the inventory describes which local interfaces carry
//! which addresses; static routes toward the lab networks come from
//! settings. Existing addresses and routes are not an error.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use log::{debug, info, warn};
use serde::Deserialize;
use tokio::process::Command;

use crate::error::{HostError, Result};
use crate::inventory::Device;

/// A static route installed on the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostRoute {
    /// Destination in `a.b.c.d/len` form.
    pub network: String,
    pub gateway: Ipv4Addr,
}

impl HostRoute {
    pub fn new(network: impl Into<String>, gateway: Ipv4Addr) -> Self {
        Self {
            network: network.into(),
            gateway,
        }
    }
}

/// Host-side network mutations.
pub trait HostNetwork: Send + Sync {
    fn add_address(&self, interface: &str, cidr: &str) -> impl Future<Output = Result<()>> + Send;

    fn link_up(&self, interface: &str) -> impl Future<Output = Result<()>> + Send;

    fn add_route(&self, route: &HostRoute) -> impl Future<Output = Result<()>> + Send;
}

/// Runs `ip` commands, optionally through `sudo`.
#[derive(Debug, Clone)]
pub struct IpCommandHost {
    sudo: bool,
}

impl IpCommandHost {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    async fn ip(&self, args: &[&str]) -> Result<()> {
        let mut command = if self.sudo {
            let mut c = Command::new("sudo");
            c.arg("ip");
            c
        } else {
            Command::new("ip")
        };
        command.args(args);
        let display = format!("ip {}", args.join(" "));
        debug!("host: {display}");

        let output = command.output().await.map_err(|source| HostError::Spawn {
            command: display.clone(),
            source,
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() || stderr.contains("File exists") {
            Ok(())
        } else {
            Err(HostError::CommandFailed {
                command: display,
                stderr: stderr.trim().to_string(),
            }
            .into())
        }
    }
}

impl HostNetwork for IpCommandHost {
    async fn add_address(&self, interface: &str, cidr: &str) -> Result<()> {
        self.ip(&["address", "add", cidr, "dev", interface]).await
    }

    async fn link_up(&self, interface: &str) -> Result<()> {
        self.ip(&["link", "set", interface, "up"]).await
    }

    async fn add_route(&self, route: &HostRoute) -> Result<()> {
        let gateway = route.gateway.to_string();
        self.ip(&["route", "add", &route.network, "via", &gateway]).await
    }
}

/// Logs what would be done and records it.
#[derive(Debug, Default)]
pub struct DryRunHost {
    issued: Mutex<Vec<String>>,
}

impl DryRunHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands recorded so far.
    pub fn issued(&self) -> Vec<String> {
        self.issued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn record(&self, command: String) {
        info!("host (dry run): {command}");
        self.issued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(command);
    }
}

impl HostNetwork for DryRunHost {
    async fn add_address(&self, interface: &str, cidr: &str) -> Result<()> {
        self.record(format!("ip address add {cidr} dev {interface}"));
        Ok(())
    }

    async fn link_up(&self, interface: &str) -> Result<()> {
        self.record(format!("ip link set {interface} up"));
        Ok(())
    }

    async fn add_route(&self, route: &HostRoute) -> Result<()> {
        self.record(format!("ip route add {} via {}", route.network, route.gateway));
        Ok(())
    }
}

/// Host implementation selected by settings.
#[derive(Debug)]
pub enum HostSetup {
    Ip(IpCommandHost),
    DryRun(DryRunHost),
}

impl HostNetwork for HostSetup {
    async fn add_address(&self, interface: &str, cidr: &str) -> Result<()> {
        match self {
            Self::Ip(h) => h.add_address(interface, cidr).await,
            Self::DryRun(h) => h.add_address(interface, cidr).await,
        }
    }

    async fn link_up(&self, interface: &str) -> Result<()> {
        match self {
            Self::Ip(h) => h.link_up(interface).await,
            Self::DryRun(h) => h.link_up(interface).await,
        }
    }

    async fn add_route(&self, route: &HostRoute) -> Result<()> {
        match self {
            Self::Ip(h) => h.add_route(route).await,
            Self::DryRun(h) => h.add_route(route).await,
        }
    }
}

/// Result of a host setup pass.
#[derive(Debug, Default)]
pub struct HostReport {
    pub addresses: usize,
    pub routes: usize,
    /// One entry per command that failed.
    pub errors: Vec<String>,
}

impl HostReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Address every interface of `device` on the host and bring its links up.
/// Individual command failures are collected in `report`, not fatal.
pub async fn configure_interfaces<H: HostNetwork>(host: &H, device: &Device, report: &mut HostReport) {
    for iface in device.interfaces.values() {
        let cidr = iface.cidr();
        match host.add_address(&iface.name, &cidr).await {
            Ok(()) => report.addresses += 1,
            Err(e) => {
                warn!("host: address {cidr} on {}: {e}", iface.name);
                report.errors.push(e.to_string());
            }
        }
        if let Err(e) = host.link_up(&iface.name).await {
            warn!("host: link {} up: {e}", iface.name);
            report.errors.push(e.to_string());
        }
    }
}

/// Install `routes`, collecting failures in `report`.
pub async fn configure_routes<H: HostNetwork>(host: &H, routes: &[HostRoute], report: &mut HostReport) {
    for route in routes {
        match host.add_route(route).await {
            Ok(()) => report.routes += 1,
            Err(e) => {
                warn!("host: route {} via {}: {e}", route.network, route.gateway);
                report.errors.push(e.to_string());
            }
        }
    }
}
