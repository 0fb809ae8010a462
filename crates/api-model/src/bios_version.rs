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

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::reference::{MaintenanceReference, ObjectReference};
use crate::server_maintenance::MaintenancePolicy;

/// Desired BIOS firmware version for one server, plus the image to reach
/// it with. Version comparison against the live system is a raw string
/// equality until a version scheme is chosen.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "BIOSVersion",
    plural = "biosversions",
    status = "BIOSVersionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BIOSVersionSpec {
    pub version: String,
    pub image: FirmwareImage,
    pub server_ref: ObjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_maintenance_ref: Option<MaintenanceReference>,
    #[serde(default)]
    pub server_maintenance_policy: MaintenancePolicy,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareImage {
    /// Location the BMC pulls the image from.
    pub uri: String,
    /// Credentials for the image location, if it is protected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_protocol: Option<String>,
    #[serde(default)]
    pub force_update: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BIOSVersionStatus {
    #[serde(default)]
    pub state: FirmwareState,
    /// Set exactly when an upgrade has been issued and the task is
    /// observable on the BMC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_task: Option<UpgradeTask>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Projection of the Redfish task driving the upgrade.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTask {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Top-level state of a version upgrade object.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, strum_macros::Display,
)]
pub enum FirmwareState {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}
