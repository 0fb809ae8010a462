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

//! In-memory mock BMC
//!
//! Behaves like a small Redfish service: staged BIOS settings that apply
//! on reboot, immediate BMC attribute writes, SimpleUpdate tasks that the
//! test advances by hand, and failure injection for the supervisor's
//! error-classification paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::attribute::{AttributeMap, AttributeValue};
use crate::error::RedfishError;
use crate::task::{TaskHealth, TaskState, TaskStatus};
use crate::{
    BmcEndpoint, ClientFactory, FirmwareUpdateParams, Manager, PowerState, RedfishClient,
    ResetType, SystemInfo,
};

/// Registry metadata for one mock attribute.
#[derive(Clone, Debug, Default)]
pub struct AttributeMeta {
    pub integer: bool,
    pub reset_required: bool,
    pub read_only: bool,
}

impl AttributeMeta {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn on_reset() -> Self {
        Self {
            reset_required: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct MockBmcState {
    pub manager: Manager,
    pub systems: Vec<SystemInfo>,
    pub bios_version: String,
    /// Version the next reboot will bring up, once an upgrade task has
    /// run to completion.
    pub staged_bios_version: Option<String>,
    pub bios_attributes: AttributeMap,
    pub bios_pending: AttributeMap,
    pub bios_registry: BTreeMap<String, AttributeMeta>,
    pub bmc_attributes: AttributeMap,
    pub bmc_pending: AttributeMap,
    pub bmc_registry: BTreeMap<String, AttributeMeta>,
    pub tasks: BTreeMap<String, TaskStatus>,
    pub upgrade_requests: Vec<FirmwareUpdateParams>,
    pub reset_count: u32,
    /// Fail every call with this HTTP status.
    pub fail_status: Option<u16>,
    /// Fail every call at the transport layer.
    pub unreachable: bool,
    next_task_id: u32,
}

#[derive(Clone, Debug)]
pub struct MockBmc {
    state: Arc<Mutex<MockBmcState>>,
}

impl MockBmc {
    pub fn new(bios_version: &str, bmc_version: &str) -> Self {
        let state = MockBmcState {
            manager: Manager {
                uuid: Some("aaaaaaaa-0000-0000-0000-000000000001".to_string()),
                manufacturer: Some("Contoso".to_string()),
                model: Some("CS-9000".to_string()),
                sku: Some("CS9K".to_string()),
                serial_number: Some("SN-0001".to_string()),
                firmware_version: Some(bmc_version.to_string()),
                power_state: Some(PowerState::On),
            },
            systems: vec![SystemInfo {
                uri: "/redfish/v1/Systems/System-1".to_string(),
                uuid: "bbbbbbbb-0000-0000-0000-000000000001".to_string(),
                power_state: Some(PowerState::On),
            }],
            bios_version: bios_version.to_string(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockBmcState> {
        self.state.lock().expect("mock BMC lock poisoned")
    }

    pub fn set_bios_attribute(&self, key: &str, value: AttributeValue, meta: AttributeMeta) {
        let mut state = self.state();
        state.bios_attributes.insert(key.to_string(), value);
        state.bios_registry.insert(key.to_string(), meta);
    }

    pub fn set_bmc_attribute(&self, key: &str, value: AttributeValue, meta: AttributeMeta) {
        let mut state = self.state();
        state.bmc_attributes.insert(key.to_string(), value);
        state.bmc_registry.insert(key.to_string(), meta);
    }

    /// What a power cycle does to the machine: staged BIOS settings and a
    /// staged firmware version take effect.
    pub fn complete_reboot(&self) {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.bios_pending);
        state.bios_attributes.extend(pending);
        if let Some(version) = state.staged_bios_version.take() {
            state.bios_version = version;
        }
    }

    pub fn finish_task(&self, task_uri: &str, state_value: TaskState, health: TaskHealth) {
        let mut state = self.state();
        if let Some(task) = state.tasks.get_mut(task_uri) {
            task.state = state_value;
            task.health = health;
            task.percent_complete = Some(100);
        }
    }

    pub fn set_task_progress(&self, task_uri: &str, percent: i64) {
        let mut state = self.state();
        if let Some(task) = state.tasks.get_mut(task_uri) {
            task.percent_complete = Some(percent);
        }
    }

    fn guard(&self) -> Result<MutexGuard<'_, MockBmcState>, RedfishError> {
        let state = self.state();
        if state.unreachable {
            return Err(RedfishError::Transport {
                url: "mock://bmc".to_string(),
                message: "connection refused".to_string(),
            });
        }
        if let Some(status) = state.fail_status {
            return Err(RedfishError::Http {
                status,
                url: "mock://bmc".to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(state)
    }

    fn check(
        registry: &BTreeMap<String, AttributeMeta>,
        settings: &BTreeMap<String, String>,
        bios: bool,
    ) -> Result<bool, RedfishError> {
        let mut invalid = Vec::new();
        let mut reboot_required = false;
        for (key, value) in settings {
            match registry.get(key) {
                None => invalid.push(key.clone()),
                Some(meta) if meta.read_only => invalid.push(key.clone()),
                Some(meta) if meta.integer && value.parse::<i64>().is_err() => {
                    invalid.push(key.clone())
                }
                Some(meta) => reboot_required |= meta.reset_required,
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

    fn typed(registry: &BTreeMap<String, AttributeMeta>, key: &str, value: &str) -> AttributeValue {
        let integer = registry.get(key).is_some_and(|meta| meta.integer);
        if integer {
            value
                .parse::<i64>()
                .map(AttributeValue::Int)
                .unwrap_or_else(|_| AttributeValue::Str(value.to_string()))
        } else {
            AttributeValue::Str(value.to_string())
        }
    }
}

#[async_trait::async_trait]
impl RedfishClient for MockBmc {
    async fn manager(&self) -> Result<Manager, RedfishError> {
        Ok(self.guard()?.manager.clone())
    }

    async fn systems(&self) -> Result<Vec<SystemInfo>, RedfishError> {
        Ok(self.guard()?.systems.clone())
    }

    async fn bios_version(&self, _system_uri: &str) -> Result<String, RedfishError> {
        Ok(self.guard()?.bios_version.clone())
    }

    async fn bios_attribute_values(
        &self,
        _system_uri: &str,
        keys: &[String],
    ) -> Result<AttributeMap, RedfishError> {
        let state = self.guard()?;
        Ok(filter_keys(&state.bios_attributes, keys))
    }

    async fn bios_pending_attribute_values(
        &self,
        _system_uri: &str,
    ) -> Result<AttributeMap, RedfishError> {
        Ok(self.guard()?.bios_pending.clone())
    }

    async fn set_bios_attributes_on_reset(
        &self,
        _system_uri: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), RedfishError> {
        let mut state = self.guard()?;
        for (key, value) in settings {
            let typed = Self::typed(&state.bios_registry, key, value);
            if state.bios_registry.get(key).is_some_and(|meta| meta.reset_required) {
                state.bios_pending.insert(key.clone(), typed);
            } else {
                // Attributes that need no reset apply straight away.
                state.bios_attributes.insert(key.clone(), typed);
            }
        }
        Ok(())
    }

    async fn check_bios_attributes(
        &self,
        _system_uri: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<bool, RedfishError> {
        let state = self.guard()?;
        Self::check(&state.bios_registry, settings, true)
    }

    async fn upgrade_bios_version(
        &self,
        _manufacturer: &str,
        params: &FirmwareUpdateParams,
    ) -> Result<String, RedfishError> {
        let mut state = self.guard()?;
        state.next_task_id += 1;
        let uri = format!("/redfish/v1/TaskService/Tasks/{}", state.next_task_id);
        state.tasks.insert(
            uri.clone(),
            TaskStatus {
                state: TaskState::Running,
                health: TaskHealth::OK,
                percent_complete: Some(0),
                messages: vec![],
            },
        );
        state.upgrade_requests.push(params.clone());
        Ok(uri)
    }

    async fn bios_upgrade_task(
        &self,
        _manufacturer: &str,
        task_uri: &str,
    ) -> Result<TaskStatus, RedfishError> {
        let state = self.guard()?;
        state
            .tasks
            .get(task_uri)
            .cloned()
            .ok_or_else(|| RedfishError::NotFound(task_uri.to_string()))
    }

    async fn reset_manager(&self, _reset_type: ResetType) -> Result<(), RedfishError> {
        self.guard()?.reset_count += 1;
        Ok(())
    }

    async fn bmc_version(&self) -> Result<String, RedfishError> {
        self.guard()?
            .manager
            .firmware_version
            .clone()
            .ok_or_else(|| RedfishError::NotFound("Manager FirmwareVersion".to_string()))
    }

    async fn bmc_attribute_values(&self, keys: &[String]) -> Result<AttributeMap, RedfishError> {
        let state = self.guard()?;
        Ok(filter_keys(&state.bmc_attributes, keys))
    }

    async fn bmc_pending_attribute_values(&self) -> Result<AttributeMap, RedfishError> {
        Ok(self.guard()?.bmc_pending.clone())
    }

    async fn set_bmc_attributes_immediately(
        &self,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), RedfishError> {
        let mut state = self.guard()?;
        for (key, value) in settings {
            let typed = Self::typed(&state.bmc_registry, key, value);
            state.bmc_attributes.insert(key.clone(), typed);
        }
        Ok(())
    }

    async fn check_bmc_attributes(
        &self,
        settings: &BTreeMap<String, String>,
    ) -> Result<bool, RedfishError> {
        let state = self.guard()?;
        Self::check(&state.bmc_registry, settings, false)
    }
}

fn filter_keys(map: &AttributeMap, keys: &[String]) -> AttributeMap {
    if keys.is_empty() {
        map.clone()
    } else {
        map.iter()
            .filter(|(k, _)| keys.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Hands out [`MockBmc`]s by endpoint address.
#[derive(Clone, Debug, Default)]
pub struct MockClientFactory {
    bmcs: Arc<Mutex<BTreeMap<String, MockBmc>>>,
}

impl MockClientFactory {
    pub fn register(&self, address: &str, bmc: MockBmc) {
        self.bmcs
            .lock()
            .expect("mock factory lock poisoned")
            .insert(address.to_string(), bmc);
    }

    pub fn get(&self, address: &str) -> Option<MockBmc> {
        self.bmcs
            .lock()
            .expect("mock factory lock poisoned")
            .get(address)
            .cloned()
    }
}

#[async_trait::async_trait]
impl ClientFactory for MockClientFactory {
    async fn connect(
        &self,
        endpoint: &BmcEndpoint,
    ) -> Result<Arc<dyn RedfishClient>, RedfishError> {
        let bmc = self.get(&endpoint.address).ok_or_else(|| RedfishError::Transport {
            url: format!("mock://{}", endpoint.address),
            message: "no such BMC".to_string(),
        })?;
        // Connecting probes the manager, like the HTTP factory does.
        bmc.manager().await?;
        Ok(Arc::new(bmc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_settings_apply_on_reboot() {
        let bmc = MockBmc::new("1.0", "7.10");
        bmc.set_bios_attribute("BootMode", AttributeValue::Str("Legacy".into()), AttributeMeta::on_reset());
        bmc.set_bios_attribute("Turbo", AttributeValue::Str("Off".into()), AttributeMeta::immediate());

        let settings = BTreeMap::from([
            ("BootMode".to_string(), "Uefi".to_string()),
            ("Turbo".to_string(), "On".to_string()),
        ]);
        assert!(bmc.check_bios_attributes("sys", &settings).await.unwrap());
        bmc.set_bios_attributes_on_reset("sys", &settings).await.unwrap();

        let live = bmc.bios_attribute_values("sys", &[]).await.unwrap();
        assert_eq!(live.get("Turbo"), Some(&AttributeValue::Str("On".into())));
        assert_eq!(live.get("BootMode"), Some(&AttributeValue::Str("Legacy".into())));
        let pending = bmc.bios_pending_attribute_values("sys").await.unwrap();
        assert_eq!(pending.get("BootMode"), Some(&AttributeValue::Str("Uefi".into())));

        bmc.complete_reboot();
        let live = bmc.bios_attribute_values("sys", &[]).await.unwrap();
        assert_eq!(live.get("BootMode"), Some(&AttributeValue::Str("Uefi".into())));
        assert!(bmc.bios_pending_attribute_values("sys").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_attribute_is_invalid() {
        let bmc = MockBmc::new("1.0", "7.10");
        let settings = BTreeMap::from([("NoSuchKey".to_string(), "1".to_string())]);
        match bmc.check_bios_attributes("sys", &settings).await {
            Err(RedfishError::InvalidBiosSettings(keys)) => {
                assert_eq!(keys, vec!["NoSuchKey".to_string()])
            }
            other => panic!("expected invalid settings, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let bmc = MockBmc::new("1.0", "7.10");
        bmc.state().fail_status = Some(503);
        assert_eq!(bmc.manager().await.unwrap_err().status(), Some(503));
        bmc.state().fail_status = None;
        bmc.state().unreachable = true;
        assert!(bmc.manager().await.unwrap_err().is_transient());
    }
}
