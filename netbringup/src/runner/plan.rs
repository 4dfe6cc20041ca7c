//! Router command plans built from inventory facts.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use serde::Deserialize;

use super::template::{TemplateVars, expand};
use crate::error::{Result, TemplateError};
use crate::inventory::Device;

/// A fully expanded command ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub text: String,
    /// Contains a secret and must not be logged.
    pub hidden: bool,
}

impl PlannedCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hidden: false,
        }
    }

    /// Text safe to put in a log line.
    pub fn display(&self) -> &str {
        if self.hidden { "********" } else { &self.text }
    }
}

/// Command template tables for router bring-up.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    /// Sent once per data interface. Placeholders: `interface`, `ip`/`address`, `sm`/`netmask`.
    pub interface: Vec<String>,

    /// Sent once per device. Placeholders: `hostname`, `domain`, `username`, `password`.
    pub device: Vec<String>,

    /// Routing protocol header.
    pub rip: Vec<String>,

    /// Sent once per distinct data network. Placeholder: `network`.
    pub rip_network: String,

    /// Value of `{domain}`.
    pub domain: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        let lines = |l: &[&str]| l.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            interface: lines(&[
                "",
                "enable",
                "conf t",
                "int {interface}",
                "ip address {ip} {sm}",
                "no shutdown",
                "exit",
            ]),
            device: lines(&[
                "conf t",
                "hostname {hostname}",
                "ip domain name {domain}",
                "username {username} password {password}",
                "username {username} privilege 15",
                "crypto key generate rsa modulus 2048",
                "line vty 0 4",
                "login local",
                "transport input ssh",
                "exit",
                "ip ssh version 2",
                "restconf",
            ]),
            rip: lines(&["router rip", "version 2", "no auto-summary"]),
            rip_network: "network {network}".to_string(),
            domain: "example.com".to_string(),
        }
    }
}

fn expand_into(
    out: &mut Vec<PlannedCommand>,
    templates: &[String],
    vars: &TemplateVars,
) -> std::result::Result<(), TemplateError> {
    for template in templates {
        out.push(PlannedCommand {
            text: expand(template, vars)?,
            hidden: template.contains("{password}"),
        });
    }
    Ok(())
}

/// Build the full command list for one router.
///
/// Interface blocks come first, then device-wide settings, then RIP over
/// every data network. Any template error aborts the whole plan.
pub fn router_plan(device: &Device, templates: &CommandTemplates) -> Result<Vec<PlannedCommand>> {
    let mut plan = Vec::new();
    let mut networks: BTreeSet<Ipv4Addr> = BTreeSet::new();

    for iface in device.data_interfaces() {
        let address = iface.address.to_string();
        let netmask = iface.netmask().to_string();
        let vars = TemplateVars::new()
            .set("interface", iface.name.as_str())
            .set("ip", address.as_str())
            .set("address", address)
            .set("sm", netmask.as_str())
            .set("netmask", netmask);
        expand_into(&mut plan, &templates.interface, &vars)?;
        networks.insert(iface.network());
    }

    let credentials = device.credentials()?;
    let vars = TemplateVars::new()
        .set("hostname", device.name.as_str())
        .set("domain", templates.domain.as_str())
        .set("username", credentials.username.as_str())
        .set("password", credentials.password());
    expand_into(&mut plan, &templates.device, &vars)?;

    expand_into(&mut plan, &templates.rip, &TemplateVars::new())?;
    for network in networks {
        let vars = TemplateVars::new().set("network", network.to_string());
        expand_into(&mut plan, std::slice::from_ref(&templates.rip_network), &vars)?;
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Credentials, DeviceKind, Interface};

    fn router() -> Device {
        Device::new("R1", DeviceKind::Router)
            .with_credentials(Credentials::new("admin", "s3cret"))
            .with_interface(Interface {
                name: "Ethernet0/0".into(),
                address: Ipv4Addr::new(192, 168, 200, 1),
                prefix_len: 24,
                link: Some("management".into()),
                alias: Some("initial".into()),
            })
            .with_interface(Interface {
                name: "Ethernet0/2".into(),
                address: Ipv4Addr::new(192, 168, 30, 1),
                prefix_len: 24,
                link: Some("r1-r2".into()),
                alias: None,
            })
            .with_interface(Interface {
                name: "Ethernet0/1".into(),
                address: Ipv4Addr::new(192, 168, 20, 2),
                prefix_len: 24,
                link: Some("guest".into()),
                alias: None,
            })
    }

    #[test]
    fn test_router_plan_layout() {
        let plan = router_plan(&router(), &CommandTemplates::default()).unwrap();
        let texts: Vec<&str> = plan.iter().map(|c| c.text.as_str()).collect();

        // Management interface untouched.
        assert!(!texts.contains(&"int Ethernet0/0"));
        assert!(texts.contains(&"int Ethernet0/2"));
        assert!(texts.contains(&"ip address 192.168.30.1 255.255.255.0"));
        assert!(texts.contains(&"hostname R1"));
        assert!(texts.contains(&"ip domain name example.com"));

        let tail = &texts[texts.len() - 5..];
        assert_eq!(
            tail,
            &[
                "router rip",
                "version 2",
                "no auto-summary",
                "network 192.168.20.0",
                "network 192.168.30.0",
            ]
        );
    }

    #[test]
    fn test_password_lines_are_hidden() {
        let plan = router_plan(&router(), &CommandTemplates::default()).unwrap();
        let secret = plan
            .iter()
            .find(|c| c.text == "username admin password s3cret")
            .unwrap();
        assert!(secret.hidden);
        assert_eq!(secret.display(), "********");
        assert!(plan.iter().filter(|c| c.hidden).count() == 1);
    }

    #[test]
    fn test_unknown_placeholder_fails_whole_plan() {
        let mut templates = CommandTemplates::default();
        templates.device.push("snmp-server community {community}".into());
        let err = router_plan(&router(), &templates).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Template(TemplateError::MissingValue { ref placeholder, .. })
                if placeholder == "community"
        ));
    }

    #[test]
    fn test_missing_credentials() {
        let device = Device::new("R9", DeviceKind::Router);
        assert!(router_plan(&device, &CommandTemplates::default()).is_err());
    }
}
