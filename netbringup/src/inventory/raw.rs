//! Serde shapes of the testbed document, resolved into [`Inventory`].

use std::net::Ipv4Addr;

use indexmap::IndexMap;
use serde::Deserialize;

use super::{Credentials, Device, DeviceKind, Interface, Inventory};
use crate::error::InventoryError;

#[derive(Debug, Deserialize)]
pub(super) struct Testbed {
    #[serde(default)]
    testbed: Option<Meta>,
    #[serde(default)]
    devices: IndexMap<String, RawDevice>,
    #[serde(default)]
    topology: IndexMap<String, RawTopology>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    credentials: IndexMap<String, RawCredential>,
    #[serde(default)]
    connections: IndexMap<String, RawConnection>,
    #[serde(default)]
    interfaces: IndexMap<String, RawInterface>,
}

#[derive(Debug, Deserialize)]
struct RawCredential {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    ip: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTopology {
    #[serde(default)]
    interfaces: IndexMap<String, RawInterface>,
}

#[derive(Debug, Deserialize)]
struct RawInterface {
    ipv4: Option<String>,
    link: Option<String>,
    alias: Option<String>,
}

impl Testbed {
    pub(super) fn resolve(mut self) -> Result<Inventory, InventoryError> {
        let mut inventory = Inventory {
            name: self.testbed.and_then(|m| m.name),
            ..Inventory::default()
        };

        for (name, raw) in self.devices {
            let kind = raw
                .kind
                .as_deref()
                .map(DeviceKind::from_type)
                .unwrap_or_else(|| DeviceKind::Other(String::new()));
            let mut device = Device::new(name.clone(), kind);

            if let Some(default) = raw.credentials.get("default") {
                if let (Some(user), Some(pass)) = (&default.username, &default.password) {
                    device = device.with_credentials(Credentials::new(user, pass));
                }
            }

            if let Some(telnet) = raw.connections.get("telnet") {
                if let (Some(host), Some(port)) =
                    (telnet.ip.as_ref().or(telnet.host.as_ref()), telnet.port)
                {
                    device = device.with_telnet(host, port);
                }
            }

            let topology = self.topology.swap_remove(&name).unwrap_or_default();
            for (if_name, iface) in raw.interfaces.into_iter().chain(topology.interfaces) {
                let Some(ipv4) = iface.ipv4 else {
                    continue;
                };
                let (address, prefix_len) = parse_cidr(&ipv4).ok_or_else(|| {
                    InventoryError::InvalidAddress {
                        device: name.clone(),
                        interface: if_name.clone(),
                        value: ipv4.clone(),
                    }
                })?;
                device = device.with_interface(Interface {
                    name: if_name,
                    address,
                    prefix_len,
                    link: iface.link,
                    alias: iface.alias,
                });
            }

            inventory = inventory.with_device(device);
        }

        Ok(inventory)
    }
}

/// Parse `a.b.c.d/len`.
fn parse_cidr(value: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, len) = value.trim().split_once('/')?;
    let address = addr.parse().ok()?;
    let prefix_len: u8 = len.parse().ok()?;
    (prefix_len <= 32).then_some((address, prefix_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr() {
        assert_eq!(
            parse_cidr("10.1.2.3/30"),
            Some((Ipv4Addr::new(10, 1, 2, 3), 30))
        );
        assert_eq!(parse_cidr("10.1.2.3"), None);
        assert_eq!(parse_cidr("10.1.2.3/33"), None);
    }
}
