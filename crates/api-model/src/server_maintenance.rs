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

use crate::reference::ObjectReference;
use crate::server::Power;

/// Exclusive-access lease on one Server. Firmware reconcilers create these
/// (controller-owned), request power changes through them, and release them
/// by deletion; the Server controller grants them and applies the power.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "ServerMaintenance",
    plural = "servermaintenances",
    status = "ServerMaintenanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServerMaintenanceSpec {
    #[serde(default)]
    pub policy: MaintenancePolicy,
    pub server_ref: ObjectReference,
    /// Desired power while the lease is held.
    #[serde(default)]
    pub server_power: Power,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerMaintenanceStatus {
    #[serde(default)]
    pub state: MaintenanceState,
}

/// How a maintenance request may take effect on a server that is in use.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, strum_macros::Display,
)]
pub enum MaintenancePolicy {
    /// The lease waits for the server owner to approve it.
    #[default]
    OwnerApproval,
    /// The lease is granted regardless of the server's current use.
    Enforced,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, strum_macros::Display,
)]
pub enum MaintenanceState {
    #[default]
    Pending,
    InMaintenance,
    Failed,
}
