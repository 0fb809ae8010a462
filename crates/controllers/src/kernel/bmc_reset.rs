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

//! Condition-driven BMC reset sub-phase
//!
//! Some BMCs lock up mid-operation unless they are restarted right before
//! long firmware actions. The firmware reconcilers do not reset a BMC
//! directly; they set the graceful-restart annotation and wait for the
//! supervisor to act on it. Progress is tracked on the caller's own
//! condition list so the phase survives restarts and re-entry.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use model::annotations::{OPERATION, OPERATION_GRACEFUL_RESTART_BMC, Operation};
use model::bmc::BMC;
use model::condition;

use crate::errors::ReconcileError;
use crate::store::Store;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetPhase {
    /// The reset was already confirmed earlier; nothing written.
    AlreadyComplete,
    /// The confirmation was just recorded; the caller persists and can
    /// continue immediately.
    JustCompleted,
    /// The restart request was just placed; the caller persists and
    /// waits.
    Requested,
    /// Waiting for the supervisor to pick up or finish the reset.
    Waiting,
}

/// Advances the reset sub-phase recorded as `condition_type` with the
/// given reason pair. A condition carrying any other reason (or none at
/// all) starts a fresh request cycle, which is how a second reset under
/// the same condition type is expressed.
pub async fn advance<S: Store>(
    store: &S,
    bmc: &BMC,
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    request_reason: &str,
    complete_reason: &str,
) -> Result<ResetPhase, ReconcileError> {
    let current = condition::find(conditions, condition_type);
    if current.is_some_and(|c| c.status == condition::STATUS_TRUE && c.reason == complete_reason) {
        return Ok(ResetPhase::AlreadyComplete);
    }

    if current.is_none_or(|c| c.reason != request_reason) {
        request_restart(store, bmc).await?;
        condition::set(
            conditions,
            condition_type,
            condition::STATUS_FALSE,
            request_reason,
            "",
        );
        return Ok(ResetPhase::Requested);
    }

    // Request is out; confirmed once the supervisor has consumed the
    // annotation and certifies the BMC healthy with no reset in flight.
    let annotation_consumed =
        !matches!(Operation::from_meta(&bmc.metadata), Some(Operation::GracefulRestartBmc));
    let bmc_settled = bmc.status.as_ref().is_some_and(|status| {
        condition::is_true(&status.conditions, condition::READY)
            && condition::find(&status.conditions, condition::RESET)
                .is_some_and(|reset| reset.status == condition::STATUS_FALSE)
    });
    if annotation_consumed && bmc_settled {
        condition::set(
            conditions,
            condition_type,
            condition::STATUS_TRUE,
            complete_reason,
            "",
        );
        return Ok(ResetPhase::JustCompleted);
    }
    Ok(ResetPhase::Waiting)
}

async fn request_restart<S: Store>(store: &S, bmc: &BMC) -> Result<(), ReconcileError> {
    let name = bmc.metadata.name.clone().unwrap_or_default();
    // Work on a fresh copy; the caller's view of the BMC may be stale.
    let Some(mut bmc) = store.get::<BMC>(&name).await? else {
        return Err(ReconcileError::MissingReference(format!("BMC/{name}")));
    };
    let annotations = bmc.metadata.annotations.get_or_insert_with(Default::default);
    let previous = annotations.insert(
        OPERATION.to_string(),
        OPERATION_GRACEFUL_RESTART_BMC.to_string(),
    );
    if previous.as_deref() != Some(OPERATION_GRACEFUL_RESTART_BMC) {
        store.update(&bmc).await?;
        tracing::info!(bmc = %name, "requested BMC restart before firmware operation");
    }
    Ok(())
}
