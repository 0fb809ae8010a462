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

use model::annotations::{OPERATION, OPERATION_GRACEFUL_RESTART_BMC};
use model::bmc::BMCState;
use model::condition::{self, reason};
use model::server::ServerPowerState;

use crate::store::Store;
use crate::tests::common::TestEnv;

#[tokio::test]
async fn probe_publishes_ready_and_discovers_servers() {
    let env = TestEnv::new();
    env.create_bmc("bmc-1", "1.0", "7.10").await;

    let bmc = env.get_bmc("bmc-1").await;
    let status = bmc.status.expect("status written");
    assert_eq!(status.state, BMCState::Enabled);
    assert!(condition::is_true(&status.conditions, condition::READY));
    let reset = condition::find(&status.conditions, condition::RESET).expect("reset condition");
    assert_eq!(reset.status, condition::STATUS_FALSE);
    assert_eq!(reset.reason, reason::RESET_COMPLETE);
    assert_eq!(status.manufacturer.as_deref(), Some("Contoso"));
    assert_eq!(status.firmware_version.as_deref(), Some("7.10"));
    assert_eq!(status.power_state, ServerPowerState::On);
    assert_eq!(status.ip.as_deref(), Some("bmc-1"));

    let server = env.server_of("bmc-1").await;
    assert_eq!(server.spec.bmc_ref.name, "bmc-1");
    assert!(server.spec.system_uri.starts_with("/redfish/v1/Systems/"));
    assert!(
        server
            .metadata
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.controller == Some(true))),
        "server is controller-owned by its BMC"
    );

    // A second probe discovers nothing new.
    env.supervisor().reconcile("bmc-1").await.unwrap();
    let servers: Vec<model::server::Server> = env.store.list().await.unwrap();
    assert_eq!(servers.len(), 1);
}

#[tokio::test]
async fn probe_failures_classify_by_http_status() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "1.0", "7.10").await;

    for (status_code, expected_reason) in [
        (401, reason::AUTHENTICATION_FAILED),
        (500, reason::INTERNAL_SERVER_ERROR),
        (503, reason::CONNECTION_FAILED),
        (418, reason::UNKNOWN_ERROR),
    ] {
        mock.state().fail_status = Some(status_code);
        env.supervisor().reconcile("bmc-1").await.unwrap();
        let bmc = env.get_bmc("bmc-1").await;
        let status = bmc.status.expect("status");
        assert_eq!(status.state, BMCState::Pending);
        let ready = condition::find(&status.conditions, condition::READY).expect("ready");
        assert_eq!(ready.status, condition::STATUS_FALSE);
        assert_eq!(ready.reason, expected_reason, "status {status_code}");
    }

    // Recovery flips Ready back.
    mock.state().fail_status = None;
    env.supervisor().reconcile("bmc-1").await.unwrap();
    let bmc = env.get_bmc("bmc-1").await;
    assert!(condition::is_true(&bmc.status.unwrap().conditions, condition::READY));
}

#[tokio::test]
async fn sustained_connection_failure_triggers_auto_reset() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "1.0", "7.10").await;

    mock.state().unreachable = true;
    env.supervisor().reconcile("bmc-1").await.unwrap();
    let bmc = env.get_bmc("bmc-1").await;
    let ready = condition::find(&bmc.status.as_ref().unwrap().conditions, condition::READY)
        .expect("ready condition")
        .clone();
    assert_eq!(ready.reason, reason::CONNECTION_FAILED);

    // Not broken for long enough yet: no reset.
    env.supervisor().reconcile("bmc-1").await.unwrap();
    let bmc = env.get_bmc("bmc-1").await;
    let reset = condition::find(&bmc.status.as_ref().unwrap().conditions, condition::RESET);
    assert!(reset.is_none_or(|r| r.status != condition::STATUS_TRUE));

    // Broken past the delay: the next reconcile auto-resets.
    let delay = env.ctx.cfg.bmc_failure_reset_delay.as_secs() as i64;
    env.backdate_bmc_condition("bmc-1", condition::READY, delay + 60).await;
    env.supervisor().reconcile("bmc-1").await.unwrap();
    let bmc = env.get_bmc("bmc-1").await;
    let status = bmc.status.expect("status");
    let reset = condition::find(&status.conditions, condition::RESET).expect("reset condition");
    assert_eq!(reset.status, condition::STATUS_TRUE);
    assert_eq!(reset.reason, reason::AUTO_RESETTING);
    assert!(status.last_reset_time.is_some());
    let stamped = reset.last_transition_time.clone();

    // Within the reset wait window nothing touches the Reset condition.
    env.supervisor().reconcile("bmc-1").await.unwrap();
    env.supervisor().reconcile("bmc-1").await.unwrap();
    let bmc = env.get_bmc("bmc-1").await;
    let reset = condition::find(&bmc.status.as_ref().unwrap().conditions, condition::RESET)
        .expect("reset condition")
        .clone();
    assert_eq!(reset.status, condition::STATUS_TRUE);
    assert_eq!(reset.last_transition_time, stamped);

    // Once the window elapsed and the BMC recovered, Reset resolves.
    mock.state().unreachable = false;
    env.expire_reset_window("bmc-1").await;
    env.supervisor().reconcile("bmc-1").await.unwrap();
    let bmc = env.get_bmc("bmc-1").await;
    let status = bmc.status.expect("status");
    assert!(condition::is_true(&status.conditions, condition::READY));
    let reset = condition::find(&status.conditions, condition::RESET).expect("reset");
    assert_eq!(reset.reason, reason::RESET_COMPLETE);
}

#[tokio::test]
async fn user_requested_reset_is_consumed_and_executed() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "1.0", "7.10").await;

    let mut bmc = env.get_bmc("bmc-1").await;
    bmc.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(OPERATION.to_string(), OPERATION_GRACEFUL_RESTART_BMC.to_string());
    env.store.update(&bmc).await.unwrap();

    env.supervisor().reconcile("bmc-1").await.unwrap();
    let bmc = env.get_bmc("bmc-1").await;
    assert!(
        model::annotations::Operation::from_meta(&bmc.metadata).is_none(),
        "annotation consumed"
    );
    let status = bmc.status.expect("status");
    let reset = condition::find(&status.conditions, condition::RESET).expect("reset");
    assert_eq!(reset.status, condition::STATUS_TRUE);
    assert_eq!(reset.reason, reason::USER_RESET_REQUESTED);
    assert_eq!(mock.state().reset_count, 1);
}

#[tokio::test]
async fn reset_requests_inside_the_wait_window_are_discarded() {
    let env = TestEnv::new();
    let mock = env.create_bmc("bmc-1", "1.0", "7.10").await;

    // First reset request goes through.
    let mut bmc = env.get_bmc("bmc-1").await;
    bmc.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(OPERATION.to_string(), OPERATION_GRACEFUL_RESTART_BMC.to_string());
    env.store.update(&bmc).await.unwrap();
    env.supervisor().reconcile("bmc-1").await.unwrap();
    assert_eq!(mock.state().reset_count, 1);

    // A second request while the first is still in flight is dropped
    // without a second reset.
    let mut bmc = env.get_bmc("bmc-1").await;
    bmc.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(OPERATION.to_string(), OPERATION_GRACEFUL_RESTART_BMC.to_string());
    env.store.update(&bmc).await.unwrap();
    env.supervisor().reconcile("bmc-1").await.unwrap();

    let bmc = env.get_bmc("bmc-1").await;
    assert!(model::annotations::Operation::from_meta(&bmc.metadata).is_none());
    assert_eq!(mock.state().reset_count, 1);
}

#[tokio::test]
async fn reconcile_is_idempotent_on_a_healthy_bmc() {
    let env = TestEnv::new();
    env.create_bmc("bmc-1", "1.0", "7.10").await;

    env.supervisor().reconcile("bmc-1").await.unwrap();
    let first = env.get_bmc("bmc-1").await;
    env.supervisor().reconcile("bmc-1").await.unwrap();
    let second = env.get_bmc("bmc-1").await;

    assert_eq!(
        serde_json::to_value(first.status).unwrap(),
        serde_json::to_value(second.status).unwrap()
    );
}
