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

use model::bios_settings::SettingsState;
use model::bmc_settings::{BMCSettings, BMCSettingsSpec};
use model::condition::{self, reason};
use model::reference::ObjectReference;
use redfish::AttributeValue;
use redfish::mock::AttributeMeta;

use crate::store::Store;
use crate::tests::common::TestEnv;

async fn create_bmc_settings(
    env: &TestEnv,
    name: &str,
    bmc: &str,
    version: &str,
    settings: &[(&str, &str)],
) {
    let object = BMCSettings::new(
        name,
        BMCSettingsSpec {
            version: version.to_string(),
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            bmc_ref: ObjectReference::new(bmc),
            ..Default::default()
        },
    );
    env.store.create(&object).await.unwrap();
}

#[tokio::test]
async fn applies_bmc_attributes_across_all_servers() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bmc_attribute(
        "FanMode",
        AttributeValue::Str("Quiet".to_string()),
        AttributeMeta::on_reset(),
    );
    create_bmc_settings(&env, "bmc-tune", "bmc-1", "7.10", &[("FanMode", "Max")]).await;

    let object = env
        .drive_bmc_settings_until("bmc-tune", "bmc-1", 30, |o| {
            o.status.as_ref().is_some_and(|s| s.state == SettingsState::Applied)
        })
        .await;
    let status = object.status.unwrap();

    assert!(condition::is_true(&status.conditions, condition::SERVER_MAINTENANCE_CREATED));
    assert!(condition::is_true(&status.conditions, condition::SERVER_MAINTENANCE_DELETED));
    assert!(condition::is_true(&status.conditions, condition::SETTINGS_UPDATE_ISSUED));
    assert!(condition::is_true(&status.conditions, condition::VERIFY_SETTINGS_POST_UPDATE));
    let reset = condition::find(&status.conditions, condition::BMC_RESET_ISSUED).expect("reset");
    // The reboot-gated attribute forces the second reset.
    assert_eq!(reset.reason, "PostApplyResetComplete");

    assert_eq!(
        mock.state().bmc_attributes.get("FanMode"),
        Some(&AttributeValue::Str("Max".to_string()))
    );
    // Every lease is released again.
    assert!(env.maintenances().await.is_empty());
    assert!(object.spec.server_maintenance_refs.is_empty());
}

#[tokio::test]
async fn immediate_bmc_attribute_needs_one_reset_only() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bmc_attribute(
        "NtpServer",
        AttributeValue::Str("old.ntp".to_string()),
        AttributeMeta::immediate(),
    );
    create_bmc_settings(&env, "bmc-tune", "bmc-1", "7.10", &[("NtpServer", "pool.ntp")]).await;

    let object = env
        .drive_bmc_settings_until("bmc-tune", "bmc-1", 30, |o| {
            o.status.as_ref().is_some_and(|s| s.state == SettingsState::Applied)
        })
        .await;
    let status = object.status.unwrap();
    let reset = condition::find(&status.conditions, condition::BMC_RESET_ISSUED).expect("reset");
    assert_eq!(reset.reason, "InitialResetComplete");
}

#[tokio::test]
async fn bmc_version_mismatch_blocks_in_pending() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.00").await;
    mock.set_bmc_attribute(
        "FanMode",
        AttributeValue::Str("Quiet".to_string()),
        AttributeMeta::immediate(),
    );
    create_bmc_settings(&env, "bmc-tune", "bmc-1", "7.10", &[("FanMode", "Max")]).await;

    env.step_bmc_settings("bmc-tune", "bmc-1").await;
    let object = env.get_bmc_settings("bmc-tune").await;
    let status = object.status.unwrap();
    assert_eq!(status.state, SettingsState::Pending);
    let gate = condition::find(&status.conditions, condition::BIOS_VERSION_UPDATE_PENDING)
        .expect("version gate");
    assert_eq!(gate.reason, reason::BMC_VERSION_NEEDS_UPGRADE);
    assert!(env.maintenances().await.is_empty());
}

#[tokio::test]
async fn invalid_bmc_settings_are_terminal() {
    let env = TestEnv::new();
    env.create_bmc("bmc-1", "2.1", "7.10").await;
    create_bmc_settings(&env, "bmc-tune", "bmc-1", "7.10", &[("NoSuchAttribute", "1")]).await;

    let object = env
        .drive_bmc_settings_until("bmc-tune", "bmc-1", 30, |o| {
            o.status.as_ref().is_some_and(|s| s.state == SettingsState::Failed)
        })
        .await;
    let status = object.status.unwrap();
    let invalid = condition::find(&status.conditions, condition::SETTINGS_PROVIDED_NOT_VALID)
        .expect("invalid settings condition");
    assert_eq!(invalid.reason, reason::SETTINGS_PROVIDED_ARE_NOT_VALID);
}

#[tokio::test]
async fn matching_attributes_apply_without_leases() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bmc_attribute(
        "FanMode",
        AttributeValue::Str("Max".to_string()),
        AttributeMeta::immediate(),
    );
    create_bmc_settings(&env, "bmc-tune", "bmc-1", "7.10", &[("FanMode", "Max")]).await;

    env.step_bmc_settings("bmc-tune", "bmc-1").await;
    let object = env.get_bmc_settings("bmc-tune").await;
    assert_eq!(object.status.unwrap().state, SettingsState::Applied);
    assert!(env.maintenances().await.is_empty());
    assert!(object.spec.server_maintenance_refs.is_empty());
}

#[tokio::test]
async fn drifted_bmc_attributes_restart_the_flow() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bmc_attribute(
        "FanMode",
        AttributeValue::Str("Max".to_string()),
        AttributeMeta::immediate(),
    );
    create_bmc_settings(&env, "bmc-tune", "bmc-1", "7.10", &[("FanMode", "Max")]).await;
    env.step_bmc_settings("bmc-tune", "bmc-1").await;
    assert_eq!(
        env.get_bmc_settings("bmc-tune").await.status.unwrap().state,
        SettingsState::Applied
    );

    mock.set_bmc_attribute(
        "FanMode",
        AttributeValue::Str("Quiet".to_string()),
        AttributeMeta::immediate(),
    );
    env.step_bmc_settings("bmc-tune", "bmc-1").await;
    let object = env.get_bmc_settings("bmc-tune").await;
    assert_eq!(object.status.unwrap().state, SettingsState::Pending);

    // And the flow converges again.
    let object = env
        .drive_bmc_settings_until("bmc-tune", "bmc-1", 30, |o| {
            o.status.as_ref().is_some_and(|s| s.state == SettingsState::Applied)
        })
        .await;
    assert_eq!(object.status.unwrap().state, SettingsState::Applied);
}
