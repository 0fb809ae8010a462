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

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::bios_settings::SettingsState;
use crate::reference::{MaintenanceReference, ObjectReference};
use crate::server_maintenance::MaintenancePolicy;

/// Attribute changes at the BMC layer. Because a BMC-level change can
/// disrupt every server it manages, the reconciler leases all of them
/// before touching anything.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "BMCSettings",
    plural = "bmcsettings",
    status = "BMCSettingsStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BMCSettingsSpec {
    /// BMC firmware version the settings are written against.
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
    pub bmc_ref: ObjectReference,
    /// One lease per server behind the BMC, aggregated as they are
    /// created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_maintenance_refs: Vec<MaintenanceReference>,
    #[serde(default)]
    pub server_maintenance_policy: MaintenancePolicy,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BMCSettingsStatus {
    #[serde(default)]
    pub state: SettingsState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
