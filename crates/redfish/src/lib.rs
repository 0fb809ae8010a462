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

//! Redfish client seam for the firmware controllers
//!
//! [`RedfishClient`] is the only way controllers talk to a BMC. Every call
//! maps to one or more HTTP round trips against the BMC's Redfish service;
//! the controllers stay agnostic of the wire shapes.

use std::collections::BTreeMap;
use std::sync::Arc;

pub mod attribute;
pub mod error;
pub mod http;
pub mod mock;
pub mod task;

pub use attribute::{AttributeMap, AttributeValue, diff, matches_desired};
pub use error::RedfishError;
pub use task::{TaskHealth, TaskState, TaskStatus};

/// Identity and health details of the managed BMC (the Redfish Manager
/// resource), as observed over the wire.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Manager {
    pub uuid: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sku: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    /// Power state as reported; `None` when the BMC does not report one.
    pub power_state: Option<PowerState>,
}

/// One computer system behind the BMC.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SystemInfo {
    /// Redfish resource URI, e.g. `/redfish/v1/Systems/System-1`.
    pub uri: String,
    pub uuid: String,
    pub power_state: Option<PowerState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum PowerState {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum ResetType {
    GracefulRestart,
    ForceRestart,
}

/// Parameters for a SimpleUpdate firmware push.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FirmwareUpdateParams {
    pub image_uri: String,
    pub transfer_protocol: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub force_update: bool,
}

/// Interface to one BMC's Redfish service.
///
/// Attribute values arrive untyped over the wire and are narrowed to
/// [`AttributeValue`] by the implementation; anything outside
/// int/string/float is a structural error, not a silent coercion.
#[async_trait::async_trait]
pub trait RedfishClient: Send + Sync {
    /// Query the Manager resource. A successful call is the liveness
    /// criterion the supervisor keys Ready off of.
    async fn manager(&self) -> Result<Manager, RedfishError>;

    async fn systems(&self) -> Result<Vec<SystemInfo>, RedfishError>;

    async fn bios_version(&self, system_uri: &str) -> Result<String, RedfishError>;

    /// Current BIOS attribute values. An empty `keys` slice fetches all.
    async fn bios_attribute_values(
        &self,
        system_uri: &str,
        keys: &[String],
    ) -> Result<AttributeMap, RedfishError>;

    /// The BIOS-side staging area: changes that take effect on next reboot.
    async fn bios_pending_attribute_values(
        &self,
        system_uri: &str,
    ) -> Result<AttributeMap, RedfishError>;

    async fn set_bios_attributes_on_reset(
        &self,
        system_uri: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), RedfishError>;

    /// Validates `settings` against the BIOS attribute registry and
    /// reports whether applying them requires a reboot. Structurally
    /// invalid settings surface as [`RedfishError::InvalidBiosSettings`].
    async fn check_bios_attributes(
        &self,
        system_uri: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<bool, RedfishError>;

    /// Issues a SimpleUpdate and returns the URI of the task monitoring
    /// it. `manufacturer` selects OEM-specific handling where a platform
    /// needs it.
    async fn upgrade_bios_version(
        &self,
        manufacturer: &str,
        params: &FirmwareUpdateParams,
    ) -> Result<String, RedfishError>;

    async fn bios_upgrade_task(
        &self,
        manufacturer: &str,
        task_uri: &str,
    ) -> Result<TaskStatus, RedfishError>;

    async fn reset_manager(&self, reset_type: ResetType) -> Result<(), RedfishError>;

    async fn bmc_version(&self) -> Result<String, RedfishError>;

    async fn bmc_attribute_values(&self, keys: &[String]) -> Result<AttributeMap, RedfishError>;

    async fn bmc_pending_attribute_values(&self) -> Result<AttributeMap, RedfishError>;

    async fn set_bmc_attributes_immediately(
        &self,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), RedfishError>;

    async fn check_bmc_attributes(
        &self,
        settings: &BTreeMap<String, String>,
    ) -> Result<bool, RedfishError>;
}

/// Network location and credentials of a BMC's Redfish service.
#[derive(Clone, Debug)]
pub struct BmcEndpoint {
    pub address: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
}

/// Builds [`RedfishClient`]s for BMC endpoints. Connecting performs the
/// initial Manager probe, so a returned client is known-live at that
/// moment.
#[async_trait::async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, endpoint: &BmcEndpoint)
    -> Result<Arc<dyn RedfishClient>, RedfishError>;
}
