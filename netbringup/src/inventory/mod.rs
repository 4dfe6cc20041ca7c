//! Device inventory loaded from a pyATS-style testbed file.
//!
//! The inventory is read once per run and shared read-only between device
//! workers. Lookups of keys a phase depends on fail with
//! [`InventoryError::NotFound`] instead of defaulting.

mod raw;

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{InventoryError, Result};

/// Role of a device in the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    Router,
    /// Security appliance provisioned through its first-boot wizard.
    Appliance,
    Host,
    Other(String),
}

impl DeviceKind {
    /// Map a testbed `type` value to a kind.
    pub fn from_type(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "router" => Self::Router,
            "ftd" | "asa" | "firewall" | "appliance" => Self::Appliance,
            "linux" | "server" | "host" => Self::Host,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Router => f.write_str("router"),
            Self::Appliance => f.write_str("appliance"),
            Self::Host => f.write_str("host"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// One addressed interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    /// Name of the link this interface attaches to.
    pub link: Option<String>,
    pub alias: Option<String>,
}

impl Interface {
    /// Dotted netmask for the prefix length.
    pub fn netmask(&self) -> Ipv4Addr {
        let bits = if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len))
        };
        Ipv4Addr::from(bits)
    }

    /// Network address of the attached subnet.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & u32::from(self.netmask()))
    }

    /// Management-plane interface, never reconfigured by command plans.
    pub fn is_management(&self) -> bool {
        self.link.as_deref() == Some("management") || self.alias.as_deref() == Some("initial")
    }

    /// `address/prefix` as used by `ip address add`.
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.address, self.prefix_len)
    }
}

/// Login credentials.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Remote shell endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// A device as described by the inventory.
#[derive(Debug)]
pub struct Device {
    pub name: String,
    pub kind: DeviceKind,
    pub interfaces: IndexMap<String, Interface>,
    credentials: Option<Credentials>,
    telnet: Option<Endpoint>,
}

impl Device {
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            interfaces: IndexMap::new(),
            credentials: None,
            telnet: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_telnet(mut self, host: impl Into<String>, port: u16) -> Self {
        self.telnet = Some(Endpoint {
            host: host.into(),
            port,
        });
        self
    }

    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interfaces.insert(interface.name.clone(), interface);
        self
    }

    /// `credentials.default`
    pub fn credentials(&self) -> std::result::Result<&Credentials, InventoryError> {
        self.credentials.as_ref().ok_or_else(|| self.missing("credentials.default"))
    }

    /// `connections.telnet`
    pub fn telnet(&self) -> std::result::Result<&Endpoint, InventoryError> {
        self.telnet.as_ref().ok_or_else(|| self.missing("connections.telnet"))
    }

    pub fn interface(&self, name: &str) -> std::result::Result<&Interface, InventoryError> {
        self.interfaces
            .get(name)
            .ok_or_else(|| self.missing(&format!("interfaces.{name}")))
    }

    /// The interface aliased `initial`, which carries the management address.
    pub fn management_interface(&self) -> std::result::Result<&Interface, InventoryError> {
        self.interfaces
            .values()
            .find(|i| i.alias.as_deref() == Some("initial"))
            .ok_or_else(|| self.missing("interfaces[alias=initial]"))
    }

    /// Interfaces a command plan is allowed to touch.
    pub fn data_interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values().filter(|i| !i.is_management())
    }

    fn missing(&self, key: &str) -> InventoryError {
        InventoryError::NotFound {
            device: self.name.clone(),
            key: key.to_string(),
        }
    }
}

/// The whole testbed, keyed by device name in file order.
#[derive(Debug, Default)]
pub struct Inventory {
    pub name: Option<String>,
    devices: IndexMap<String, Device>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.devices.insert(device.name.clone(), device);
        self
    }

    /// Read and parse a testbed file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| InventoryError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml_str(&text)
    }

    /// Parse a testbed document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let testbed: raw::Testbed = serde_yaml::from_str(text).map_err(InventoryError::Parse)?;
        Ok(testbed.resolve()?)
    }

    pub fn device(&self, name: &str) -> std::result::Result<&Device, InventoryError> {
        self.devices.get(name).ok_or_else(|| InventoryError::NotFound {
            device: name.to_string(),
            key: "devices".to_string(),
        })
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn of_kind<'a>(&'a self, kind: &'a DeviceKind) -> impl Iterator<Item = &'a Device> + 'a {
        self.devices.values().filter(move |d| &d.kind == kind)
    }

    pub fn routers(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| d.kind == DeviceKind::Router)
    }

    /// First device of the given kind, if any.
    pub fn first_of_kind(&self, kind: &DeviceKind) -> Option<&Device> {
        self.devices.values().find(|d| &d.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
