/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! reqwest-backed [`RedfishClient`]
//!
//! Speaks the standard Redfish resource tree: ServiceRoot, Managers,
//! Systems, Bios (+Settings), attribute registries, UpdateService
//! SimpleUpdate and the task monitor. BMC attributes follow the
//! iDRAC-style `Managers/{id}/Attributes` layout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::attribute::{AttributeMap, narrow_map};
use crate::error::RedfishError;
use crate::task::{TaskHealth, TaskState, TaskStatus};
use crate::{
    BmcEndpoint, ClientFactory, FirmwareUpdateParams, Manager, PowerState, RedfishClient,
    ResetType, SystemInfo,
};

const SERVICE_ROOT: &str = "/redfish/v1/";
const REGISTRY_COLLECTION: &str = "/redfish/v1/Registries";
const DEFAULT_PORT: u16 = 443;

#[derive(Clone, Debug)]
pub struct HttpClientFactory {
    /// BMCs ship self-signed certificates; verification is opt-in.
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self {
            accept_invalid_certs: true,
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait::async_trait]
impl ClientFactory for HttpClientFactory {
    async fn connect(
        &self,
        endpoint: &BmcEndpoint,
    ) -> Result<Arc<dyn RedfishClient>, RedfishError> {
        let base = format!(
            "https://{}:{}/",
            endpoint.address,
            endpoint.port.unwrap_or(DEFAULT_PORT)
        );
        let base = Url::parse(&base).map_err(|err| RedfishError::Transport {
            url: base.clone(),
            message: err.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .timeout(self.timeout)
            .build()
            .map_err(|err| RedfishError::Transport {
                url: base.to_string(),
                message: err.to_string(),
            })?;

        let client = HttpRedfishClient {
            http,
            base,
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            manager_uri: String::new(),
            systems_uri: String::new(),
            update_service_uri: None,
        };

        let root: ServiceRoot = client.get(SERVICE_ROOT).await?;
        let managers_uri = root
            .managers
            .ok_or_else(|| RedfishError::NotFound("Managers collection".to_string()))?
            .odata_id;
        let systems_uri = root
            .systems
            .ok_or_else(|| RedfishError::NotFound("Systems collection".to_string()))?
            .odata_id;
        let managers: Collection = client.get(&managers_uri).await?;
        let manager_uri = managers
            .members
            .first()
            .ok_or_else(|| RedfishError::NotFound("Manager resource".to_string()))?
            .odata_id
            .clone();

        let client = Arc::new(HttpRedfishClient {
            manager_uri,
            systems_uri,
            update_service_uri: root.update_service.map(|r| r.odata_id),
            ..client
        });
        // The initial Manager probe; connecting fails if the BMC cannot
        // answer it.
        client.manager().await?;
        Ok(client)
    }
}

#[derive(Clone, Debug)]
struct HttpRedfishClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: String,
    manager_uri: String,
    systems_uri: String,
    update_service_uri: Option<String>,
}

impl HttpRedfishClient {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, RedfishError> {
        let url = self.base.join(path).map_err(|err| RedfishError::Transport {
            url: path.to_string(),
            message: err.to_string(),
        })?;
        let mut request = self
            .http
            .request(method, url.clone())
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|err| RedfishError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RedfishError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RedfishError::Http {
                status: status.as_u16(),
                url: url.to_string(),
                message: message.chars().take(512).collect(),
            });
        }
        Ok(response)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, RedfishError> {
        let response = self.send(Method::GET, path, None).await?;
        let url = response.url().to_string();
        response
            .json()
            .await
            .map_err(|err| RedfishError::Payload {
                url,
                message: err.to_string(),
            })
    }

    async fn bios_resource(&self, system_uri: &str) -> Result<AttributesResource, RedfishError> {
        self.get(&format!("{}/Bios", system_uri.trim_end_matches('/'))).await
    }

    /// Fetches the attribute registry document named by a resource's
    /// `AttributeRegistry` field.
    async fn registry(&self, registry_name: &str) -> Result<Vec<RegistryAttribute>, RedfishError> {
        // "BiosAttributeRegistry.v1_0_0" is looked up by its unversioned
        // base name in the registry collection.
        let base_name = registry_name.split(".v").next().unwrap_or(registry_name);
        let collection: Collection = self.get(REGISTRY_COLLECTION).await?;
        let member = collection
            .members
            .iter()
            .find(|m| {
                m.odata_id
                    .rsplit('/')
                    .next()
                    .is_some_and(|segment| segment == base_name || segment == registry_name)
            })
            .ok_or_else(|| RedfishError::NotFound(format!("registry {registry_name}")))?;
        let file: RegistryFile = self.get(&member.odata_id).await?;
        let location = file
            .location
            .iter()
            .find_map(|l| l.uri.clone())
            .ok_or_else(|| RedfishError::NotFound(format!("registry file {registry_name}")))?;
        let doc: RegistryDoc = self.get(&location).await?;
        Ok(doc.registry_entries.attributes)
    }

    /// Registry-driven validation shared by the BIOS and BMC paths.
    /// Returns whether any of the settings needs a reboot.
    async fn check_against_registry(
        &self,
        resource: &AttributesResource,
        settings: &BTreeMap<String, String>,
        bios: bool,
    ) -> Result<bool, RedfishError> {
        let Some(registry_name) = &resource.attribute_registry else {
            // No registry to validate against; assume the safe path.
            tracing::debug!("no attribute registry advertised, assuming reboot required");
            return Ok(true);
        };
        let registry = self.registry(registry_name).await?;
        let mut invalid = Vec::new();
        let mut reboot_required = false;
        for (key, value) in settings {
            match registry.iter().find(|a| &a.attribute_name == key) {
                None => invalid.push(key.clone()),
                Some(attribute) => {
                    if attribute.read_only.unwrap_or(false) {
                        invalid.push(key.clone());
                        continue;
                    }
                    if matches!(attribute.type_.as_deref(), Some("Integer"))
                        && value.parse::<i64>().is_err()
                    {
                        invalid.push(key.clone());
                        continue;
                    }
                    reboot_required |= attribute.reset_required.unwrap_or(false);
                }
            }
        }
        if !invalid.is_empty() {
            return Err(if bios {
                RedfishError::InvalidBiosSettings(invalid)
            } else {
                RedfishError::InvalidBmcSettings(invalid)
            });
        }
        Ok(reboot_required)
    }

    /// Converts string-typed desired values to the wire types the
    /// registry declares. Without a registry everything goes as strings.
    async fn coerce_settings(
        &self,
        resource: &AttributesResource,
        settings: &BTreeMap<String, String>,
    ) -> Result<serde_json::Map<String, serde_json::Value>, RedfishError> {
        let registry = match &resource.attribute_registry {
            Some(name) => self.registry(name).await?,
            None => Vec::new(),
        };
        let mut wire = serde_json::Map::new();
        for (key, value) in settings {
            let type_ = registry
                .iter()
                .find(|a| &a.attribute_name == key)
                .and_then(|a| a.type_.as_deref());
            let json_value = match type_ {
                Some("Integer") => value
                    .parse::<i64>()
                    .map(serde_json::Value::from)
                    .unwrap_or_else(|_| serde_json::Value::from(value.clone())),
                _ => serde_json::Value::from(value.clone()),
            };
            wire.insert(key.clone(), json_value);
        }
        Ok(wire)
    }

    fn manager_attributes_uri(&self) -> String {
        format!("{}/Attributes", self.manager_uri.trim_end_matches('/'))
    }

    fn filter_keys(map: AttributeMap, keys: &[String]) -> AttributeMap {
        if keys.is_empty() {
            map
        } else {
            map.into_iter().filter(|(k, _)| keys.contains(k)).collect()
        }
    }
}

#[async_trait::async_trait]
impl RedfishClient for HttpRedfishClient {
    async fn manager(&self) -> Result<Manager, RedfishError> {
        let resource: ManagerResource = self.get(&self.manager_uri).await?;
        Ok(Manager {
            uuid: resource.uuid,
            manufacturer: resource.manufacturer,
            model: resource.model,
            sku: resource.sku,
            serial_number: resource.serial_number,
            firmware_version: resource.firmware_version,
            power_state: resource.power_state.as_deref().and_then(parse_power),
        })
    }

    async fn systems(&self) -> Result<Vec<SystemInfo>, RedfishError> {
        let collection: Collection = self.get(&self.systems_uri).await?;
        let mut systems = Vec::with_capacity(collection.members.len());
        for member in &collection.members {
            let resource: SystemResource = self.get(&member.odata_id).await?;
            systems.push(SystemInfo {
                uri: member.odata_id.clone(),
                uuid: resource.uuid.unwrap_or_default(),
                power_state: resource.power_state.as_deref().and_then(parse_power),
            });
        }
        Ok(systems)
    }

    async fn bios_version(&self, system_uri: &str) -> Result<String, RedfishError> {
        let resource: SystemResource = self.get(system_uri).await?;
        resource
            .bios_version
            .ok_or_else(|| RedfishError::NotFound(format!("{system_uri} BiosVersion")))
    }

    async fn bios_attribute_values(
        &self,
        system_uri: &str,
        keys: &[String],
    ) -> Result<AttributeMap, RedfishError> {
        let resource = self.bios_resource(system_uri).await?;
        Ok(Self::filter_keys(narrow_map(&resource.attributes)?, keys))
    }

    async fn bios_pending_attribute_values(
        &self,
        system_uri: &str,
    ) -> Result<AttributeMap, RedfishError> {
        let path = format!("{}/Bios/Settings", system_uri.trim_end_matches('/'));
        match self.get::<AttributesResource>(&path).await {
            Ok(resource) => narrow_map(&resource.attributes),
            // A BMC without a staging resource has nothing pending.
            Err(RedfishError::NotFound(_)) => Ok(AttributeMap::new()),
            Err(err) => Err(err),
        }
    }

    async fn set_bios_attributes_on_reset(
        &self,
        system_uri: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), RedfishError> {
        let resource = self.bios_resource(system_uri).await?;
        let wire = self.coerce_settings(&resource, settings).await?;
        let path = format!("{}/Bios/Settings", system_uri.trim_end_matches('/'));
        let body = serde_json::json!({ "Attributes": wire });
        self.send(Method::PATCH, &path, Some(&body)).await?;
        Ok(())
    }

    async fn check_bios_attributes(
        &self,
        system_uri: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<bool, RedfishError> {
        let resource = self.bios_resource(system_uri).await?;
        self.check_against_registry(&resource, settings, true).await
    }

    async fn upgrade_bios_version(
        &self,
        manufacturer: &str,
        params: &FirmwareUpdateParams,
    ) -> Result<String, RedfishError> {
        let update_service = self
            .update_service_uri
            .as_deref()
            .ok_or_else(|| RedfishError::NotFound("UpdateService".to_string()))?;
        let path = format!(
            "{}/Actions/UpdateService.SimpleUpdate",
            update_service.trim_end_matches('/')
        );
        let mut body = serde_json::json!({
            "ImageURI": params.image_uri,
            "ForceUpdate": params.force_update,
        });
        if let Some(protocol) = &params.transfer_protocol {
            body["TransferProtocol"] = serde_json::Value::from(protocol.clone());
        }
        if let Some(username) = &params.username {
            body["Username"] = serde_json::Value::from(username.clone());
        }
        if let Some(password) = &params.password {
            body["Password"] = serde_json::Value::from(password.clone());
        }
        tracing::debug!(manufacturer, image = %params.image_uri, "issuing SimpleUpdate");

        let response = match self.send(Method::POST, &path, Some(&body)).await {
            Ok(response) => response,
            // A 4xx on the action means the firmware refused the update;
            // that is terminal rather than retryable.
            Err(RedfishError::Http { status, message, .. }) if (400..500).contains(&status) => {
                return Err(RedfishError::UpdateRejected(format!("HTTP {status}: {message}")));
            }
            Err(err) => return Err(err),
        };

        if let Some(location) = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            return Ok(location.to_string());
        }
        let url = response.url().to_string();
        let task: ODataRef = response.json().await.map_err(|err| RedfishError::Payload {
            url,
            message: format!("SimpleUpdate returned no task: {err}"),
        })?;
        Ok(task.odata_id)
    }

    async fn bios_upgrade_task(
        &self,
        _manufacturer: &str,
        task_uri: &str,
    ) -> Result<TaskStatus, RedfishError> {
        let resource: TaskResource = self.get(task_uri).await?;
        Ok(TaskStatus {
            state: resource.task_state.unwrap_or_default(),
            health: resource.task_status.unwrap_or_default(),
            percent_complete: resource.percent_complete,
            messages: resource
                .messages
                .into_iter()
                .filter_map(|m| m.message)
                .collect(),
        })
    }

    async fn reset_manager(&self, reset_type: ResetType) -> Result<(), RedfishError> {
        let path = format!(
            "{}/Actions/Manager.Reset",
            self.manager_uri.trim_end_matches('/')
        );
        let body = serde_json::json!({ "ResetType": reset_type.to_string() });
        self.send(Method::POST, &path, Some(&body)).await?;
        Ok(())
    }

    async fn bmc_version(&self) -> Result<String, RedfishError> {
        self.manager()
            .await?
            .firmware_version
            .ok_or_else(|| RedfishError::NotFound("Manager FirmwareVersion".to_string()))
    }

    async fn bmc_attribute_values(&self, keys: &[String]) -> Result<AttributeMap, RedfishError> {
        let resource: AttributesResource = self.get(&self.manager_attributes_uri()).await?;
        Ok(Self::filter_keys(narrow_map(&resource.attributes)?, keys))
    }

    async fn bmc_pending_attribute_values(&self) -> Result<AttributeMap, RedfishError> {
        let path = format!("{}/Settings", self.manager_attributes_uri());
        match self.get::<AttributesResource>(&path).await {
            Ok(resource) => narrow_map(&resource.attributes),
            Err(RedfishError::NotFound(_)) => Ok(AttributeMap::new()),
            Err(err) => Err(err),
        }
    }

    async fn set_bmc_attributes_immediately(
        &self,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), RedfishError> {
        let path = self.manager_attributes_uri();
        let resource: AttributesResource = self.get(&path).await?;
        let wire = self.coerce_settings(&resource, settings).await?;
        let body = serde_json::json!({ "Attributes": wire });
        self.send(Method::PATCH, &path, Some(&body)).await?;
        Ok(())
    }

    async fn check_bmc_attributes(
        &self,
        settings: &BTreeMap<String, String>,
    ) -> Result<bool, RedfishError> {
        let resource: AttributesResource = self.get(&self.manager_attributes_uri()).await?;
        self.check_against_registry(&resource, settings, false).await
    }
}

fn parse_power(raw: &str) -> Option<PowerState> {
    match raw {
        "On" => Some(PowerState::On),
        "Off" => Some(PowerState::Off),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ODataRef {
    #[serde(rename = "@odata.id")]
    odata_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceRoot {
    managers: Option<ODataRef>,
    systems: Option<ODataRef>,
    update_service: Option<ODataRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Collection {
    #[serde(default)]
    members: Vec<ODataRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManagerResource {
    #[serde(rename = "UUID")]
    uuid: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    #[serde(rename = "SKU")]
    sku: Option<String>,
    serial_number: Option<String>,
    firmware_version: Option<String>,
    power_state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SystemResource {
    #[serde(rename = "UUID")]
    uuid: Option<String>,
    power_state: Option<String>,
    bios_version: Option<String>,
}

/// Shape shared by `Bios` and `Managers/{id}/Attributes` resources.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttributesResource {
    attribute_registry: Option<String>,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegistryFile {
    #[serde(default)]
    location: Vec<RegistryLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegistryLocation {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegistryDoc {
    registry_entries: RegistryEntries,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegistryEntries {
    #[serde(default)]
    attributes: Vec<RegistryAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegistryAttribute {
    attribute_name: String,
    #[serde(rename = "Type")]
    type_: Option<String>,
    reset_required: Option<bool>,
    read_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskResource {
    task_state: Option<TaskState>,
    task_status: Option<TaskHealth>,
    percent_complete: Option<i64>,
    #[serde(default)]
    messages: Vec<TaskMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskMessage {
    message: Option<String>,
}
