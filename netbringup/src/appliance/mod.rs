//! Appliance configuration through its management API.
//!
//! Runs after the first-boot wizard: waits for the API to answer, addresses
//! the target data interfaces, installs a default route and deploys. The
//! API itself sits behind [`ApplianceApi`]; [`FdmClient`] talks to the real
//! device.

mod fdm;

pub use fdm::{FdmClient, FdmConnector};

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

use crate::error::{ApiError, Result};
use crate::inventory::{Device, Interface};

/// Name of the network object the default route points at.
pub const GATEWAY_OBJECT: &str = "default_gateway";

/// A physical interface as listed by the device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PhysicalInterface {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "hardwareName")]
    pub hardware_name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl PhysicalInterface {
    /// Edit body that puts the interface in routed mode with a static address.
    pub fn edit_body(&self, target: &Interface) -> Value {
        let address = target.address.to_string();
        let netmask = target.netmask().to_string();
        json!({
            "id": self.id,
            "version": self.version,
            "name": self.name.as_deref().unwrap_or(&self.hardware_name),
            "hardwareName": self.hardware_name,
            "type": self.kind,
            "mode": "ROUTED",
            "enabled": true,
            "managementOnly": false,
            "monitorInterface": false,
            "mtu": 1500,
            "linkState": "UP",
            "ipv4": {
                "type": "interfaceipv4",
                "ipType": "STATIC",
                "dhcp": false,
                "ipAddress": {
                    "type": "haipv4address",
                    "ipAddress": address,
                    "netmask": netmask,
                },
            },
            "securityLevel": 50,
            "description": format!("Configured for {address}/{netmask}"),
        })
    }
}

/// A named network object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Default route request, in the two schemas devices accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticRoute {
    /// Gateway given as a reference to a network object.
    Full { gateway_network_id: String },
    /// Gateway given inline.
    Simple { gateway: Ipv4Addr },
}

impl StaticRoute {
    pub fn body(&self) -> Value {
        match self {
            Self::Full { gateway_network_id } => json!({
                "type": "staticroute",
                "gateway": { "id": gateway_network_id, "type": "network" },
                "metricValue": 1,
                "selectedNetworks": [
                    { "type": "network", "id": "any-ipv4", "name": "any-ipv4" }
                ],
            }),
            Self::Simple { gateway } => json!({
                "type": "staticroute",
                "gateway": gateway.to_string(),
                "metricValue": 1,
                "selectedNetworks": ["any-ipv4"],
            }),
        }
    }
}

/// Management API of the appliance.
pub trait ApplianceApi: Send + Sync {
    /// The API answers at all. Authentication failures still count as ready.
    fn is_ready(&self) -> impl Future<Output = bool> + Send;

    fn authenticate(&self) -> impl Future<Output = Result<()>> + Send;

    fn physical_interfaces(&self) -> impl Future<Output = Result<Vec<PhysicalInterface>>> + Send;

    fn update_interface(
        &self,
        interface: &PhysicalInterface,
        target: &Interface,
    ) -> impl Future<Output = Result<()>> + Send;

    fn find_network(&self, name: &str) -> impl Future<Output = Result<Option<NetworkObject>>> + Send;

    fn create_network(
        &self,
        name: &str,
        value: &str,
    ) -> impl Future<Output = Result<NetworkObject>> + Send;

    fn add_static_route(&self, route: &StaticRoute) -> impl Future<Output = Result<()>> + Send;

    fn deploy(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Builds an API client for a device once its management address is up.
pub trait ApiConnector: Send + Sync {
    type Api: ApplianceApi;

    fn connect(&self, device: &Device) -> Result<Self::Api>;
}

/// Timing of the API phase.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Give up waiting for the API after this long.
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
    /// Pause after a deploy request is accepted.
    pub deploy_settle: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(60),
            ready_interval: Duration::from_secs(10),
            deploy_settle: Duration::from_secs(15),
        }
    }
}

/// What to configure on one appliance.
#[derive(Debug, Clone)]
pub struct ApiPlan {
    /// Requested interfaces that the inventory actually describes.
    pub targets: Vec<Interface>,
    /// Number of interfaces requested.
    pub requested: usize,
    pub gateway: Ipv4Addr,
}

impl ApiPlan {
    pub fn for_device<S: AsRef<str>>(device: &Device, targets: &[S], gateway: Ipv4Addr) -> Self {
        let found = targets
            .iter()
            .filter_map(|name| match device.interface(name.as_ref()) {
                Ok(iface) => Some(iface.clone()),
                Err(e) => {
                    warn!("{}: {e}", device.name);
                    None
                }
            })
            .collect();
        Self {
            targets: found,
            requested: targets.len(),
            gateway,
        }
    }

    fn target(&self, hardware_name: &str) -> Option<&Interface> {
        self.targets.iter().find(|i| i.name == hardware_name)
    }
}

/// Result of the API phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiReport {
    pub configured: usize,
    pub targets: usize,
    pub gateway_configured: bool,
    pub deployed: bool,
}

impl ApiReport {
    /// At least one interface took its address.
    pub fn success(&self) -> bool {
        self.configured >= 1
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} interfaces, gateway: {}",
            self.configured, self.targets, self.gateway_configured
        )
    }
}

/// Poll until the API answers or `config.ready_timeout` passes.
pub async fn wait_ready<A: ApplianceApi>(api: &A, config: &ApiConfig) -> Result<Duration> {
    let started = Instant::now();
    let deadline = started + config.ready_timeout;
    loop {
        if api.is_ready().await {
            let elapsed = started.elapsed();
            info!("appliance API ready after {}s", elapsed.as_secs());
            return Ok(elapsed);
        }
        if Instant::now() + config.ready_interval > deadline {
            return Err(ApiError::NotReady {
                timeout: config.ready_timeout,
            }
            .into());
        }
        debug!("appliance API not ready, {}s elapsed", started.elapsed().as_secs());
        sleep(config.ready_interval).await;
    }
}

/// Configure interfaces, default route and deploy.
///
/// Only an unreachable API or a failed login is an error. Individual
/// interface, route and deploy failures are logged and reflected in the
/// report.
pub async fn configure_appliance<A: ApplianceApi>(
    api: &A,
    plan: &ApiPlan,
    config: &ApiConfig,
) -> Result<ApiReport> {
    wait_ready(api, config).await?;
    api.authenticate().await?;

    let mut report = ApiReport {
        targets: plan.requested,
        ..ApiReport::default()
    };

    match api.physical_interfaces().await {
        Ok(interfaces) => {
            for iface in &interfaces {
                let Some(target) = plan.target(&iface.hardware_name) else {
                    continue;
                };
                match api.update_interface(iface, target).await {
                    Ok(()) => {
                        info!("configured {}: {}", iface.hardware_name, target.cidr());
                        report.configured += 1;
                    }
                    Err(e) => warn!("failed to configure {}: {e}", iface.hardware_name),
                }
            }
        }
        Err(e) => warn!("listing interfaces failed: {e}"),
    }

    report.gateway_configured = configure_gateway(api, plan.gateway).await;

    match api.deploy().await {
        Ok(()) => {
            info!("deployment requested");
            report.deployed = true;
            sleep(config.deploy_settle).await;
        }
        Err(e) => warn!("deployment failed: {e}; manual deployment required"),
    }

    info!("appliance API: {}", report.summary());
    Ok(report)
}

/// Default route through a gateway network object, falling back once to the
/// inline schema.
async fn configure_gateway<A: ApplianceApi>(api: &A, gateway: Ipv4Addr) -> bool {
    let full = async {
        let network = match api.find_network(GATEWAY_OBJECT).await? {
            Some(network) => network,
            None => {
                let network = api
                    .create_network(GATEWAY_OBJECT, &format!("{gateway}/32"))
                    .await?;
                info!("created network object {GATEWAY_OBJECT} for {gateway}");
                network
            }
        };
        api.add_static_route(&StaticRoute::Full {
            gateway_network_id: network.id,
        })
        .await
    };

    match full.await {
        Ok(()) => {
            info!("default route 0.0.0.0/0 via {gateway}");
            return true;
        }
        Err(e) => warn!("default route failed: {e}; retrying with simple schema"),
    }

    match api.add_static_route(&StaticRoute::Simple { gateway }).await {
        Ok(()) => {
            info!("default route via {gateway} (simple schema)");
            true
        }
        Err(e) => {
            warn!("simple default route failed: {e}");
            false
        }
    }
}
