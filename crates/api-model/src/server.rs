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

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::reference::{MaintenanceReference, ObjectReference};

/// A physical system behind a BMC. Created by the BMC supervisor on
/// discovery and owned by the BMC; its lifecycle controller is external to
/// this operator. Firmware reconcilers only read it and patch reference
/// fields on its spec.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "Server",
    plural = "servers",
    status = "ServerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// System UUID reported by the BMC.
    pub uuid: String,
    /// Redfish resource URI of the computer system on its BMC.
    pub system_uri: String,
    pub bmc_ref: ObjectReference,
    /// The currently granted maintenance lease, if any. Written by the
    /// Server controller when a lease is granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_maintenance_ref: Option<MaintenanceReference>,
    /// The newest BIOSSettings claiming this server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios_settings_ref: Option<ObjectReference>,
    /// Desired power, applied by the Server controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<Power>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    #[serde(default)]
    pub state: ServerState,
    #[serde(default)]
    pub power_state: ServerPowerState,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, strum_macros::Display,
)]
pub enum ServerState {
    #[default]
    Initial,
    Discovery,
    Available,
    Reserved,
    Maintenance,
    Tainted,
    Error,
}

/// Desired power for a server or a maintenance lease.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, strum_macros::Display,
)]
pub enum Power {
    #[default]
    On,
    Off,
}

/// Power state observed on the BMC. An unknown report is surfaced as
/// `Unknown`, never omitted.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, strum_macros::Display,
)]
pub enum ServerPowerState {
    On,
    Off,
    #[default]
    Unknown,
}

impl Server {
    /// Whether the given lease is the one this server is currently granted.
    pub fn maintained_by(&self, lease: &MaintenanceReference) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        if status.state != ServerState::Maintenance {
            return false;
        }
        self.spec
            .server_maintenance_ref
            .as_ref()
            .is_some_and(|granted| granted.name == lease.name && granted.uid == lease.uid)
    }
}
