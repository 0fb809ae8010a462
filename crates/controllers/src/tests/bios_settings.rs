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

use model::annotations::{OPERATION, OPERATION_RETRY_ON_FAILURE};
use model::bios_settings::{BIOSSettings, BIOSSettingsSpec, SettingsGroup, SettingsState};
use model::condition::{self, reason};
use model::reference::ObjectReference;
use redfish::AttributeValue;
use redfish::mock::AttributeMeta;

use crate::store::Store;
use crate::tests::common::TestEnv;

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

async fn create_settings(
    env: &TestEnv,
    name: &str,
    bmc: &str,
    version: &str,
    flow: Vec<SettingsGroup>,
) {
    let server = env.server_of(bmc).await;
    let object = BIOSSettings::new(
        name,
        BIOSSettingsSpec {
            version: version.to_string(),
            settings_flow: flow,
            server_ref: ObjectReference::new(server.metadata.name.clone().unwrap()),
            ..Default::default()
        },
    );
    env.store.create(&object).await.unwrap();
}

#[tokio::test]
async fn empty_flow_at_matching_version_goes_straight_to_applied() {
    let env = TestEnv::new();
    env.create_bmc("bmc-1", "2.1", "7.10").await;
    create_settings(&env, "settings", "bmc-1", "2.1", vec![]).await;

    env.step_bios_settings("settings", "bmc-1").await;
    let object = env.get_bios_settings("settings").await;
    let status = object.status.unwrap();
    assert_eq!(status.state, SettingsState::Applied);
    let verify = condition::find(&status.conditions, condition::VERIFY_SETTINGS_POST_UPDATE)
        .expect("verification condition");
    assert_eq!(verify.status, condition::STATUS_TRUE);
    assert_eq!(verify.reason, reason::VERIFICATION_COMPLETED);
    assert!(env.maintenances().await.is_empty());
}

#[tokio::test]
async fn settings_already_in_place_apply_without_maintenance() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bios_attribute("X", AttributeValue::Str("1".to_string()), AttributeMeta::on_reset());
    create_settings(&env, "settings", "bmc-1", "2.1", vec![group("A", 10, &[("X", "1")])]).await;

    env.step_bios_settings("settings", "bmc-1").await;
    let object = env.get_bios_settings("settings").await;
    assert_eq!(object.status.unwrap().state, SettingsState::Applied);
    assert!(env.maintenances().await.is_empty());
}

#[tokio::test]
async fn reboot_required_group_walks_all_phases() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bios_attribute(
        "BootMode",
        AttributeValue::Str("Legacy".to_string()),
        AttributeMeta::on_reset(),
    );
    create_settings(
        &env,
        "settings",
        "bmc-1",
        "2.1",
        vec![group("boot", 10, &[("BootMode", "Uefi")])],
    )
    .await;

    let object = env
        .drive_bios_settings_until("settings", "bmc-1", 30, |o| {
            o.status.as_ref().is_some_and(|s| s.state == SettingsState::Applied)
        })
        .await;
    let status = object.status.unwrap();

    assert!(condition::is_true(&status.conditions, condition::SERVER_MAINTENANCE_CREATED));
    assert!(condition::is_true(&status.conditions, condition::SERVER_MAINTENANCE_DELETED));

    let entry = status.flow_entry("boot", 10).expect("flow state entry");
    assert_eq!(entry.state, SettingsState::Applied);
    assert!(entry.last_applied_time.is_some());
    for condition_type in [
        condition::SERVER_POWER_ON,
        condition::BMC_RESET_ISSUED,
        condition::SERVER_REBOOT_POST_UPDATE,
        condition::SETTINGS_UPDATE_ISSUED,
        condition::REBOOT_POWER_OFF,
        condition::REBOOT_POWER_ON,
        condition::VERIFY_SETTINGS_POST_UPDATE,
    ] {
        assert!(
            condition::is_true(&entry.conditions, condition_type),
            "{condition_type} should be True; conditions: {:?}",
            entry.conditions
        );
    }
    let decision = condition::find(&entry.conditions, condition::SERVER_REBOOT_POST_UPDATE).unwrap();
    assert_eq!(decision.reason, reason::REBOOT_REQUIRED);

    // The value is live and the lease is released.
    let live = mock.state().bios_attributes.clone();
    assert_eq!(live.get("BootMode"), Some(&AttributeValue::Str("Uefi".to_string())));
    assert!(env.maintenances().await.is_empty());
    let server = env.server_of("bmc-1").await;
    assert!(server.spec.server_maintenance_ref.is_none());
}

#[tokio::test]
async fn immediate_attribute_skips_the_reboot() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bios_attribute(
        "Turbo",
        AttributeValue::Str("Off".to_string()),
        AttributeMeta::immediate(),
    );
    create_settings(&env, "settings", "bmc-1", "2.1", vec![group("perf", 10, &[("Turbo", "On")])])
        .await;

    let object = env
        .drive_bios_settings_until("settings", "bmc-1", 30, |o| {
            o.status.as_ref().is_some_and(|s| s.state == SettingsState::Applied)
        })
        .await;
    let status = object.status.unwrap();
    let entry = status.flow_entry("perf", 10).expect("flow state entry");
    let decision = condition::find(&entry.conditions, condition::SERVER_REBOOT_POST_UPDATE).unwrap();
    assert_eq!(decision.reason, reason::REBOOT_SKIPPED);
    assert!(!condition::exists(&entry.conditions, condition::REBOOT_POWER_OFF));
    assert!(!condition::exists(&entry.conditions, condition::REBOOT_POWER_ON));
}

#[tokio::test]
async fn version_mismatch_blocks_in_pending() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "1.0", "7.10").await;
    mock.set_bios_attribute("X", AttributeValue::Str("old".to_string()), AttributeMeta::on_reset());
    create_settings(&env, "settings", "bmc-1", "2.0", vec![group("A", 10, &[("X", "new")])]).await;

    for _ in 0..3 {
        env.step_bios_settings("settings", "bmc-1").await;
    }
    let object = env.get_bios_settings("settings").await;
    let status = object.status.as_ref().unwrap();
    assert_eq!(status.state, SettingsState::Pending);
    let gate = condition::find(&status.conditions, condition::BIOS_VERSION_UPDATE_PENDING)
        .expect("version gate condition");
    assert_eq!(gate.status, condition::STATUS_TRUE);
    assert_eq!(gate.reason, reason::BIOS_VERSION_NEEDS_UPGRADE);
    assert!(env.maintenances().await.is_empty());

    // The firmware reaches the right version (the BIOSVersion reconciler
    // in the real system); settings proceed.
    mock.state().bios_version = "2.0".to_string();
    env.step_bios_settings("settings", "bmc-1").await;
    let object = env.get_bios_settings("settings").await;
    assert_eq!(object.status.unwrap().state, SettingsState::InProgress);
}

#[tokio::test]
async fn duplicate_keys_fail_and_retry_does_not_clear_them() {
    let env = TestEnv::new();
    env.create_bmc("bmc-1", "2.1", "7.10").await;
    create_settings(
        &env,
        "settings",
        "bmc-1",
        "2.1",
        vec![group("a", 10, &[("X", "1")]), group("b", 20, &[("X", "2")])],
    )
    .await;

    env.step_bios_settings("settings", "bmc-1").await;
    let object = env.get_bios_settings("settings").await;
    let status = object.status.as_ref().unwrap();
    assert_eq!(status.state, SettingsState::Failed);
    let duplicate = condition::find(&status.conditions, condition::BIOS_SETTINGS_DUPLICATE_KEYS)
        .expect("duplicate keys condition");
    assert_eq!(duplicate.status, condition::STATUS_TRUE);
    assert_eq!(duplicate.reason, reason::BIOS_SETTINGS_DUPLICATE_KEYS_FOUND);

    // Retrying without fixing the spec lands back in Failed.
    let mut object = object;
    object
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(OPERATION.to_string(), OPERATION_RETRY_ON_FAILURE.to_string());
    env.store.update(&object).await.unwrap();
    env.step_bios_settings("settings", "bmc-1").await;
    env.step_bios_settings("settings", "bmc-1").await;
    let object = env.get_bios_settings("settings").await;
    assert_eq!(object.status.unwrap().state, SettingsState::Failed);
}

#[tokio::test]
async fn preexisting_pending_settings_fail_the_object() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bios_attribute("X", AttributeValue::Str("old".to_string()), AttributeMeta::on_reset());
    mock.state()
        .bios_pending
        .insert("Y".to_string(), AttributeValue::Str("stale".to_string()));
    create_settings(&env, "settings", "bmc-1", "2.1", vec![group("A", 10, &[("X", "new")])]).await;

    env.step_bios_settings("settings", "bmc-1").await;
    let object = env.get_bios_settings("settings").await;
    let status = object.status.unwrap();
    assert_eq!(status.state, SettingsState::Failed);
    let check = condition::find(&status.conditions, condition::BIOS_SETTINGS_CHECK_PENDING_SETTINGS)
        .expect("pending check condition");
    assert_eq!(check.reason, reason::BIOS_PENDING_SETTINGS_FOUND);
}

#[tokio::test]
async fn invalid_settings_are_terminal() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bios_attribute("X", AttributeValue::Str("old".to_string()), AttributeMeta::on_reset());
    // "Mystery" is not in the attribute registry at all.
    create_settings(
        &env,
        "settings",
        "bmc-1",
        "2.1",
        vec![group("A", 10, &[("X", "new"), ("Mystery", "1")])],
    )
    .await;

    let object = env
        .drive_bios_settings_until("settings", "bmc-1", 30, |o| {
            o.status.as_ref().is_some_and(|s| s.state == SettingsState::Failed)
        })
        .await;
    let status = object.status.unwrap();
    let entry = status.flow_entry("A", 10).expect("flow entry");
    assert_eq!(entry.state, SettingsState::Failed);
    let invalid = condition::find(&entry.conditions, condition::SETTINGS_PROVIDED_NOT_VALID)
        .expect("invalid settings condition");
    assert_eq!(invalid.reason, reason::SETTINGS_PROVIDED_ARE_NOT_VALID);
}

#[tokio::test]
async fn groups_apply_in_priority_order() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bios_attribute("A1", AttributeValue::Str("0".to_string()), AttributeMeta::immediate());
    mock.set_bios_attribute("B1", AttributeValue::Str("0".to_string()), AttributeMeta::immediate());
    // Spec order deliberately reversed; priorities decide.
    create_settings(
        &env,
        "settings",
        "bmc-1",
        "2.1",
        vec![group("second", 20, &[("B1", "2")]), group("first", 10, &[("A1", "1")])],
    )
    .await;

    let object = env
        .drive_bios_settings_until("settings", "bmc-1", 40, |o| {
            o.status.as_ref().is_some_and(|s| s.state == SettingsState::Applied)
        })
        .await;
    let status = object.status.unwrap();
    let first = status.flow_entry("first", 10).expect("first entry");
    let second = status.flow_entry("second", 20).expect("second entry");
    assert_eq!(first.state, SettingsState::Applied);
    assert_eq!(second.state, SettingsState::Applied);
    let first_applied = first.last_applied_time.clone().expect("first applied time");
    let second_applied = second.last_applied_time.clone().expect("second applied time");
    assert!(
        first_applied.0 <= second_applied.0,
        "lower priority applies first"
    );
}

#[tokio::test]
async fn applied_object_restarts_on_drift() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bios_attribute("X", AttributeValue::Str("1".to_string()), AttributeMeta::immediate());
    create_settings(&env, "settings", "bmc-1", "2.1", vec![group("A", 10, &[("X", "1")])]).await;

    env.step_bios_settings("settings", "bmc-1").await;
    assert_eq!(
        env.get_bios_settings("settings").await.status.unwrap().state,
        SettingsState::Applied
    );

    // Out-of-band change; the Applied object notices and restarts.
    mock.set_bios_attribute("X", AttributeValue::Str("9".to_string()), AttributeMeta::immediate());
    env.step_bios_settings("settings", "bmc-1").await;
    let object = env.get_bios_settings("settings").await;
    let status = object.status.unwrap();
    assert_eq!(status.state, SettingsState::Pending);
    assert!(status.conditions.is_empty(), "conditions cleared on restart");
    assert!(status.flow_state.is_empty(), "flow state cleared on restart");
}

#[tokio::test]
async fn applied_object_reconcile_is_idempotent() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bios_attribute("X", AttributeValue::Str("1".to_string()), AttributeMeta::immediate());
    create_settings(&env, "settings", "bmc-1", "2.1", vec![group("A", 10, &[("X", "1")])]).await;

    env.step_bios_settings("settings", "bmc-1").await;
    let first = env.get_bios_settings("settings").await;
    env.bios_settings_reconciler()
        .reconcile("settings")
        .await
        .unwrap();
    let second = env.get_bios_settings("settings").await;
    assert_eq!(
        serde_json::to_value(&first.status).unwrap(),
        serde_json::to_value(&second.status).unwrap()
    );
}

#[tokio::test]
async fn newer_settings_take_over_the_server_claim() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "2.1", "7.10").await;
    mock.set_bios_attribute("X", AttributeValue::Str("1".to_string()), AttributeMeta::immediate());

    create_settings(&env, "settings-v1", "bmc-1", "2.1", vec![group("A", 10, &[("X", "1")])])
        .await;
    env.step_bios_settings("settings-v1", "bmc-1").await;
    let server = env.server_of("bmc-1").await;
    assert_eq!(
        server.spec.bios_settings_ref.as_ref().map(|r| r.name.as_str()),
        Some("settings-v1")
    );

    // A newer version claims the server; the old claimant backs off.
    create_settings(&env, "settings-v2", "bmc-1", "3.0", vec![group("A", 10, &[("X", "1")])])
        .await;
    env.step_bios_settings("settings-v2", "bmc-1").await;
    let server = env.server_of("bmc-1").await;
    assert_eq!(
        server.spec.bios_settings_ref.as_ref().map(|r| r.name.as_str()),
        Some("settings-v2")
    );

    // The older object observes the claim mismatch and leaves it alone.
    env.step_bios_settings("settings-v1", "bmc-1").await;
    let server = env.server_of("bmc-1").await;
    assert_eq!(
        server.spec.bios_settings_ref.as_ref().map(|r| r.name.as_str()),
        Some("settings-v2")
    );
}
