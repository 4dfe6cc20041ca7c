//! HTTPS client for the appliance's on-box device manager API.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::{debug, trace};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{ApiConnector, ApplianceApi, NetworkObject, PhysicalInterface, StaticRoute};
use crate::error::{ApiError, Result};
use crate::inventory::{Credentials, Device, Interface};

const API_ROOT: &str = "/api/fdm/latest";

#[derive(Deserialize)]
struct Items<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
struct Token {
    access_token: String,
}

#[derive(Deserialize)]
struct Identified {
    id: String,
}

/// Device manager client bound to one appliance.
#[derive(Debug)]
pub struct FdmClient {
    http: Client,
    base: String,
    credentials: Credentials,
    token: Mutex<Option<String>>,
}

impl FdmClient {
    /// Client for `https://{host}:{port}`. Self-signed certificates are
    /// accepted.
    pub fn new(host: &str, port: u16, credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ApiError::from)?;
        Ok(Self {
            http,
            base: format!("https://{host}:{port}"),
            credentials,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_ROOT}{path}", self.base)
    }

    fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = self.token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        trace!("fdm: {method} {path}");

        let response = request.send().await.map_err(ApiError::from)?;
        let status = response.status();
        let text = response.text().await.map_err(ApiError::from)?;
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                body: text,
            }
            .into());
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| decode(path, e))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.call(Method::GET, path, None).await?;
        serde_json::from_value(value).map_err(|e| decode(path, e))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let value = self.call(Method::POST, path, Some(body)).await?;
        serde_json::from_value(value).map_err(|e| decode(path, e))
    }

    async fn virtual_router(&self) -> Result<String> {
        let path = "/devices/default/routing/virtualrouters";
        let routers: Items<Identified> = self.get(path).await?;
        routers
            .items
            .into_iter()
            .next()
            .map(|r| r.id)
            .ok_or_else(|| {
                ApiError::Decode {
                    endpoint: path.to_string(),
                    message: "no virtual router".to_string(),
                }
                .into()
            })
    }
}

fn decode(endpoint: &str, err: serde_json::Error) -> crate::Error {
    ApiError::Decode {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    }
    .into()
}

impl ApplianceApi for FdmClient {
    async fn is_ready(&self) -> bool {
        let probe = self
            .http
            .get(format!("{}/api/versions", self.base))
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match probe {
            Ok(response) => matches!(
                response.status(),
                StatusCode::OK | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ),
            Err(e) => {
                debug!("fdm: {} not answering: {e}", self.base);
                false
            }
        }
    }

    async fn authenticate(&self) -> Result<()> {
        let body = json!({
            "grant_type": "password",
            "username": self.credentials.username,
            "password": self.credentials.password(),
        });
        let token: Token = self.post("/fdm/token", &body).await?;
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.access_token);
        debug!("fdm: authenticated as {}", self.credentials.username);
        Ok(())
    }

    async fn physical_interfaces(&self) -> Result<Vec<PhysicalInterface>> {
        let list: Items<PhysicalInterface> = self.get("/devices/default/interfaces").await?;
        Ok(list.items)
    }

    async fn update_interface(&self, interface: &PhysicalInterface, target: &Interface) -> Result<()> {
        let path = format!("/devices/default/interfaces/{}", interface.id);
        self.call(Method::PUT, &path, Some(&interface.edit_body(target)))
            .await
            .map(drop)
    }

    async fn find_network(&self, name: &str) -> Result<Option<NetworkObject>> {
        let list: Items<NetworkObject> = self
            .get(&format!("/object/networks?filter=name:{name}"))
            .await?;
        Ok(list.items.into_iter().find(|n| n.name == name))
    }

    async fn create_network(&self, name: &str, value: &str) -> Result<NetworkObject> {
        let body = json!({ "name": name, "value": value, "type": "network" });
        self.post("/object/networks", &body).await
    }

    async fn add_static_route(&self, route: &StaticRoute) -> Result<()> {
        let router = self.virtual_router().await?;
        let path = format!("/devices/default/routing/virtualrouters/{router}/staticrouteentries");
        self.call(Method::POST, &path, Some(&route.body()))
            .await
            .map(drop)
    }

    async fn deploy(&self) -> Result<()> {
        let body = json!({
            "type": "deploymentrequest",
            "forceDeploy": true,
            "ignoreWarning": true,
        });
        self.call(Method::POST, "/operational/deploy", Some(&body))
            .await
            .map(drop)
    }
}

/// Connects to the management address of the appliance with its inventory
/// credential (the one the wizard installed).
#[derive(Debug, Clone)]
pub struct FdmConnector {
    pub port: u16,
}

impl Default for FdmConnector {
    fn default() -> Self {
        Self { port: 443 }
    }
}

impl ApiConnector for FdmConnector {
    type Api = FdmClient;

    fn connect(&self, device: &Device) -> Result<FdmClient> {
        let address = device.management_interface()?.address;
        let credentials = device.credentials()?;
        FdmClient::new(
            &address.to_string(),
            self.port,
            Credentials::new(credentials.username.clone(), credentials.password()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::DeviceKind;
    use std::net::Ipv4Addr;

    #[test]
    fn test_connector_uses_management_address() {
        let device = Device::new("FTD", DeviceKind::Appliance)
            .with_credentials(Credentials::new("admin", "Cisco@135"))
            .with_interface(Interface {
                name: "Management1/1".into(),
                address: Ipv4Addr::new(192, 168, 200, 4),
                prefix_len: 24,
                link: Some("management".into()),
                alias: Some("initial".into()),
            });
        let client = FdmConnector::default().connect(&device).unwrap();
        assert_eq!(
            client.url("/devices/default/interfaces"),
            "https://192.168.200.4:443/api/fdm/latest/devices/default/interfaces"
        );
    }

    #[test]
    fn test_connector_requires_management_interface() {
        let device = Device::new("FTD", DeviceKind::Appliance)
            .with_credentials(Credentials::new("admin", "Cisco@135"));
        assert!(FdmConnector::default().connect(&device).is_err());
    }

    #[test]
    fn test_interface_list_decodes() {
        let list: Items<PhysicalInterface> = serde_json::from_value(json!({
            "items": [{
                "id": "8d6c41df",
                "version": "kfbm3huxp4b2l",
                "name": "",
                "hardwareName": "GigabitEthernet0/2",
                "type": "physicalinterface",
                "mtu": 1500
            }]
        }))
        .unwrap();
        assert_eq!(list.items[0].hardware_name, "GigabitEthernet0/2");
        assert_eq!(list.items[0].kind, "physicalinterface");
    }
}
