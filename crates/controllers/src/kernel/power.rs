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

//! Condition-driven server power phase
//!
//! Power is never written to a Server directly; the desired state goes
//! onto the maintenance lease and the Server controller applies it. The
//! phase condition records that the request was placed, and flips True
//! once the observed power state matches.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use model::condition;
use model::reference::MaintenanceReference;
use model::server::{Power, Server, ServerPowerState};

use crate::errors::ReconcileError;
use crate::kernel::maintenance;
use crate::store::Store;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerPhase {
    AlreadyComplete,
    JustCompleted,
    Requested,
    Waiting,
}

pub async fn advance<S: Store>(
    store: &S,
    lease: &MaintenanceReference,
    server: &Server,
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    power: Power,
) -> Result<PowerPhase, ReconcileError> {
    if condition::is_true(conditions, condition_type) {
        return Ok(PowerPhase::AlreadyComplete);
    }
    if !condition::exists(conditions, condition_type) {
        maintenance::request_power(store, lease, power).await?;
        condition::set(
            conditions,
            condition_type,
            condition::STATUS_FALSE,
            "PowerChangeRequested",
            &format!("requested server power {power}"),
        );
        return Ok(PowerPhase::Requested);
    }

    let target = match power {
        Power::On => ServerPowerState::On,
        Power::Off => ServerPowerState::Off,
    };
    let observed = server
        .status
        .as_ref()
        .map(|s| s.power_state)
        .unwrap_or_default();
    if observed == target {
        condition::set(
            conditions,
            condition_type,
            condition::STATUS_TRUE,
            "PowerChangeObserved",
            "",
        );
        return Ok(PowerPhase::JustCompleted);
    }
    Ok(PowerPhase::Waiting)
}
