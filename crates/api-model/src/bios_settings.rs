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
use std::collections::btree_map::Entry;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::reference::{MaintenanceReference, ObjectReference};
use crate::server_maintenance::MaintenancePolicy;

/// An ordered set of BIOS attribute groups for one server. Groups apply in
/// ascending priority; each one is an independently reboot-gated
/// transaction that must verify before the next may start.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "BIOSSettings",
    plural = "biossettings",
    status = "BIOSSettingsStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BIOSSettingsSpec {
    /// BIOS version the settings are written against. Groups stay blocked
    /// until the live firmware reports exactly this version.
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub settings_flow: Vec<SettingsGroup>,
    pub server_ref: ObjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_maintenance_ref: Option<MaintenanceReference>,
    #[serde(default)]
    pub server_maintenance_policy: MaintenancePolicy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsGroup {
    pub name: String,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BIOSSettingsStatus {
    #[serde(default)]
    pub state: SettingsState,
    /// Per-group progress, keyed by (name, priority) so spec edits are
    /// forgiving.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flow_state: Vec<FlowState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_time: Option<Time>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub name: String,
    pub priority: i32,
    #[serde(default)]
    pub state: SettingsState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_time: Option<Time>,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, strum_macros::Display,
)]
pub enum SettingsState {
    #[default]
    Pending,
    InProgress,
    Applied,
    Failed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FlowValidationError {
    #[error("duplicate group name {0:?} in settings flow")]
    DuplicateGroupName(String),
    #[error("setting key {key:?} appears in groups {first:?} and {second:?}")]
    DuplicateSettingKey {
        key: String,
        first: String,
        second: String,
    },
}

impl BIOSSettingsSpec {
    /// Group names must be unique within the spec and setting keys unique
    /// across the whole flow.
    pub fn validate_flow(&self) -> Result<(), FlowValidationError> {
        let mut names = BTreeMap::new();
        let mut keys: BTreeMap<&str, &str> = BTreeMap::new();
        for group in &self.settings_flow {
            if names.insert(group.name.as_str(), ()).is_some() {
                return Err(FlowValidationError::DuplicateGroupName(group.name.clone()));
            }
            for key in group.settings.keys() {
                match keys.entry(key.as_str()) {
                    Entry::Vacant(slot) => {
                        slot.insert(group.name.as_str());
                    }
                    Entry::Occupied(owner) => {
                        return Err(FlowValidationError::DuplicateSettingKey {
                            key: key.clone(),
                            first: owner.get().to_string(),
                            second: group.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The flow in application order: a sorted copy, ascending by priority
    /// with name as tie-breaker. The spec itself is never reordered.
    pub fn sorted_flow(&self) -> Vec<SettingsGroup> {
        let mut flow = self.settings_flow.clone();
        flow.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        flow
    }

    /// All settings of the flow flattened into one map. Only meaningful on
    /// a validated flow.
    pub fn flattened_settings(&self) -> BTreeMap<String, String> {
        self.settings_flow
            .iter()
            .flat_map(|group| group.settings.clone())
            .collect()
    }
}

impl BIOSSettingsStatus {
    pub fn flow_entry(&self, name: &str, priority: i32) -> Option<&FlowState> {
        self.flow_state
            .iter()
            .find(|f| f.name == name && f.priority == priority)
    }

    pub fn flow_entry_mut(&mut self, name: &str, priority: i32) -> Option<&mut FlowState> {
        self.flow_state
            .iter_mut()
            .find(|f| f.name == name && f.priority == priority)
    }

    /// Drops flow-state entries whose (name, priority) pair no longer
    /// matches any spec group. Returns whether anything was pruned.
    pub fn prune_stale_flow_state(&mut self, flow: &[SettingsGroup]) -> bool {
        let before = self.flow_state.len();
        self.flow_state
            .retain(|f| flow.iter().any(|g| g.name == f.name && g.priority == f.priority));
        self.flow_state.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, priority: i32, settings: &[(&str, &str)]) -> SettingsGroup {
        SettingsGroup {
            name: name.to_string(),
            priority,
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn validate_rejects_duplicate_group_names() {
        let spec = BIOSSettingsSpec {
            settings_flow: vec![group("boot", 10, &[("X", "1")]), group("boot", 20, &[("Y", "2")])],
            ..Default::default()
        };
        assert_eq!(
            spec.validate_flow(),
            Err(FlowValidationError::DuplicateGroupName("boot".to_string()))
        );
    }

    #[test]
    fn validate_rejects_duplicate_keys_across_groups() {
        let spec = BIOSSettingsSpec {
            settings_flow: vec![group("a", 10, &[("X", "1")]), group("b", 20, &[("X", "2")])],
            ..Default::default()
        };
        assert_eq!(
            spec.validate_flow(),
            Err(FlowValidationError::DuplicateSettingKey {
                key: "X".to_string(),
                first: "a".to_string(),
                second: "b".to_string(),
            })
        );
    }

    #[test]
    fn sorted_flow_leaves_spec_untouched() {
        let spec = BIOSSettingsSpec {
            settings_flow: vec![group("late", 20, &[]), group("early", 10, &[])],
            ..Default::default()
        };
        let sorted = spec.sorted_flow();
        assert_eq!(sorted[0].name, "early");
        assert_eq!(sorted[1].name, "late");
        assert_eq!(spec.settings_flow[0].name, "late");
    }

    #[test]
    fn prune_drops_renamed_and_reprioritized_entries() {
        let mut status = BIOSSettingsStatus {
            flow_state: vec![
                FlowState {
                    name: "keep".to_string(),
                    priority: 10,
                    ..Default::default()
                },
                FlowState {
                    name: "renamed".to_string(),
                    priority: 20,
                    ..Default::default()
                },
                FlowState {
                    name: "keep".to_string(),
                    priority: 30,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let flow = vec![group("keep", 10, &[])];
        assert!(status.prune_stale_flow_state(&flow));
        assert_eq!(status.flow_state.len(), 1);
        assert_eq!(status.flow_state[0].priority, 10);
    }
}
