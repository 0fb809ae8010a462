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

//! BIOSVersion reconciler
//!
//! Drives one server's BIOS firmware to the spec'd version: maintenance
//! lease, BMC stabilization reset, SimpleUpdate, task polling with stall
//! detection, power cycle, verification. Version comparison is a raw
//! string equality until a version scheme is chosen.

use std::sync::Arc;

use model::annotations::{self, Operation};
use model::bios_version::{BIOSVersion, BIOSVersionStatus, FirmwareState, UpgradeTask};
use model::bmc::BMC;
use model::bmc_secret::BMCSecret;
use model::condition::{self, reason};
use model::server::{Power, Server};
use redfish::{FirmwareUpdateParams, RedfishClient};

use crate::Context;
use crate::errors::{ReconcileError, ReconcileResult};
use crate::kernel::bmc_reset::{self, ResetPhase};
use crate::kernel::power::{self, PowerPhase};
use crate::kernel::{self, Checkpoint, Reconciled, client, maintenance};
use crate::store::Store;

const MAINTENANCE_REASON: &str = "BIOS version upgrade";

pub struct BiosVersionReconciler<S> {
    ctx: Arc<Context<S>>,
}

impl<S: Store> BiosVersionReconciler<S> {
    pub fn new(ctx: Arc<Context<S>>) -> Self {
        Self { ctx }
    }

    pub async fn reconcile(&self, name: &str) -> ReconcileResult {
        let Some(object) = self.ctx.store.get::<BIOSVersion>(name).await? else {
            return Ok(Reconciled::done());
        };
        if let Some(Operation::Ignore) = Operation::from_meta(&object.metadata) {
            tracing::debug!(bios_version = name, "reconciliation ignored by annotation");
            return Ok(Reconciled::done());
        }

        let state = object.status.as_ref().map(|s| s.state).unwrap_or_default();
        // In-flight firmware operations postpone deletion until they
        // terminate.
        if object.metadata.deletion_timestamp.is_some() && state != FirmwareState::InProgress {
            return self.finalize(object).await;
        }

        if let Some(Operation::RetryOnFailure) = Operation::from_meta(&object.metadata) {
            if state == FirmwareState::Failed {
                return self.retry(object).await;
            }
            let mut object = object;
            annotations::clear_operation(&mut object.metadata);
            self.ctx.store.update(&object).await?;
            return Ok(Reconciled::requeue_now());
        }
        if state == FirmwareState::Failed {
            return Ok(Reconciled::done());
        }

        let (server, bmc) = client::server_and_bmc(&self.ctx.store, &object.spec.server_ref.name).await?;
        if !client::bmc_ready(&bmc) {
            return Ok(Reconciled::done());
        }
        let redfish = client::connect(&self.ctx.store, &self.ctx.clients, &bmc).await?;

        match state {
            FirmwareState::Pending => self.pending(object, &server, redfish.as_ref()).await,
            FirmwareState::InProgress => self.in_progress(object, &server, &bmc, redfish.as_ref()).await,
            FirmwareState::Completed => self.completed_drift(object, &server, redfish.as_ref()).await,
            FirmwareState::Failed => Ok(Reconciled::done()),
        }
    }

    async fn pending(
        &self,
        mut object: BIOSVersion,
        server: &Server,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        if kernel::ensure_finalizer(&mut object.metadata) {
            object = self.ctx.store.update(&object).await?;
        }
        let live = redfish.bios_version(&server.spec.system_uri).await?;
        let mut status = object.status.clone().unwrap_or_default();
        if live == object.spec.version {
            status.state = FirmwareState::Completed;
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::requeue_after(self.ctx.cfg.resync_interval));
        }
        tracing::info!(
            bios_version = object.metadata.name.as_deref().unwrap_or_default(),
            %live,
            desired = %object.spec.version,
            "starting BIOS upgrade"
        );
        status.state = FirmwareState::InProgress;
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        Ok(Reconciled::requeue_now())
    }

    async fn in_progress(
        &self,
        mut object: BIOSVersion,
        server: &Server,
        bmc: &BMC,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        if kernel::ensure_finalizer(&mut object.metadata) {
            object = self.ctx.store.update(&object).await?;
        }

        // Maintenance lease first; everything below power-cycles the
        // machine.
        let Some(lease) = object.spec.server_maintenance_ref.clone() else {
            return self.request_maintenance(object).await;
        };
        if !maintenance::granted(server, &lease) {
            return Ok(Reconciled::done());
        }

        let conditions = object
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();

        if !condition::is_true(&conditions, condition::BMC_RESET_ISSUED) {
            return self.stabilization_reset(object, bmc).await;
        }
        if !condition::is_true(&conditions, condition::BIOS_UPGRADE_ISSUED) {
            return self.issue_upgrade(object, bmc, redfish).await;
        }
        if !condition::is_true(&conditions, condition::BIOS_UPGRADE_COMPLETED) {
            return self.poll_task(object, bmc, redfish).await;
        }
        if !condition::is_true(&conditions, condition::BIOS_UPGRADE_POWER_OFF) {
            return self
                .power_phase(object, server, condition::BIOS_UPGRADE_POWER_OFF, Power::Off)
                .await;
        }
        if !condition::is_true(&conditions, condition::BIOS_UPGRADE_POWER_ON) {
            return self
                .power_phase(object, server, condition::BIOS_UPGRADE_POWER_ON, Power::On)
                .await;
        }
        self.verify(object, server, redfish).await
    }

    async fn request_maintenance(&self, mut object: BIOSVersion) -> ReconcileResult {
        let lease = maintenance::create_lease(
            &self.ctx.store,
            &object,
            &object.spec.server_ref.name,
            object.spec.server_maintenance_policy,
            Power::On,
            MAINTENANCE_REASON,
        )
        .await?;
        let lease_name = lease.name.clone();
        object.spec.server_maintenance_ref = Some(lease);
        let mut object = self.ctx.store.update(&object).await?;

        let mut status = object.status.clone().unwrap_or_default();
        condition::set(
            &mut status.conditions,
            condition::SERVER_MAINTENANCE_CREATED,
            condition::STATUS_TRUE,
            "MaintenanceRequested",
            &format!("created ServerMaintenance/{lease_name}"),
        );
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        // Wait for the Server controller to grant the lease.
        Ok(Reconciled::done())
    }

    async fn stabilization_reset(&self, mut object: BIOSVersion, bmc: &BMC) -> ReconcileResult {
        let mut status = object.status.clone().unwrap_or_default();
        let phase = bmc_reset::advance(
            &self.ctx.store,
            bmc,
            &mut status.conditions,
            condition::BMC_RESET_ISSUED,
            "ResetRequested",
            reason::RESET_COMPLETE,
        )
        .await?;
        match phase {
            ResetPhase::Requested => {
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                Ok(Reconciled::done())
            }
            ResetPhase::JustCompleted => {
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                Ok(Reconciled::requeue_now())
            }
            ResetPhase::AlreadyComplete => Ok(Reconciled::requeue_now()),
            ResetPhase::Waiting => Ok(Reconciled::done()),
        }
    }

    async fn issue_upgrade(
        &self,
        mut object: BIOSVersion,
        bmc: &BMC,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        let manufacturer = bmc
            .status
            .as_ref()
            .and_then(|s| s.manufacturer.clone())
            .unwrap_or_default();
        let (username, password) = match &object.spec.image.secret_ref {
            Some(secret_ref) => {
                let secret: BMCSecret = self
                    .ctx
                    .store
                    .get(&secret_ref.name)
                    .await?
                    .ok_or_else(|| {
                        ReconcileError::MissingReference(format!("BMCSecret/{}", secret_ref.name))
                    })?;
                (Some(secret.spec.username), Some(secret.spec.password))
            }
            None => (None, None),
        };
        let params = FirmwareUpdateParams {
            image_uri: object.spec.image.uri.clone(),
            transfer_protocol: object.spec.image.transfer_protocol.clone(),
            username,
            password,
            force_update: object.spec.image.force_update,
        };

        let mut status = object.status.clone().unwrap_or_default();
        match redfish.upgrade_bios_version(&manufacturer, &params).await {
            Ok(task_uri) => {
                status.upgrade_task = Some(UpgradeTask {
                    uri: task_uri,
                    ..Default::default()
                });
                condition::set(
                    &mut status.conditions,
                    condition::BIOS_UPGRADE_ISSUED,
                    condition::STATUS_TRUE,
                    "UpgradeRequested",
                    "",
                );
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                Ok(Reconciled::requeue_after(self.ctx.cfg.task_poll_interval))
            }
            Err(err) if err.is_fatal() => {
                // The request was refused, but some firmwares apply the
                // image anyway; the message keeps that possibility
                // visible for the operator.
                condition::set(
                    &mut status.conditions,
                    condition::BIOS_UPGRADE_ISSUED,
                    condition::STATUS_TRUE,
                    "UpgradeRequestFailed",
                    &format!("SimpleUpdate failed; the upgrade may still have been applied: {err}"),
                );
                status.state = FirmwareState::Failed;
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                Ok(Reconciled::done())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn poll_task(
        &self,
        mut object: BIOSVersion,
        bmc: &BMC,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        let mut status = object.status.clone().unwrap_or_default();
        let Some(mut upgrade_task) = status.upgrade_task.clone() else {
            return Err(ReconcileError::InvalidObject(
                "upgrade issued but no task recorded".to_string(),
            ));
        };
        let manufacturer = bmc
            .status
            .as_ref()
            .and_then(|s| s.manufacturer.clone())
            .unwrap_or_default();
        let task = redfish.bios_upgrade_task(&manufacturer, &upgrade_task.uri).await?;

        upgrade_task.state = Some(task.state.to_string());
        upgrade_task.health = Some(task.health.to_string());
        upgrade_task.percent_complete = task.percent_complete.or(upgrade_task.percent_complete);
        upgrade_task.message = task.messages.last().cloned().or(upgrade_task.message);
        status.upgrade_task = Some(upgrade_task);

        if task.failed() {
            // The phase terminated, so the condition flips True even
            // though the task itself failed.
            condition::set(
                &mut status.conditions,
                condition::BIOS_UPGRADE_COMPLETED,
                condition::STATUS_TRUE,
                reason::UPGRADE_TASK_FAILED,
                &format!("task ended in state {} ({})", task.state, task.health),
            );
            status.state = FirmwareState::Failed;
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::done());
        }
        if task.completed() {
            condition::set(
                &mut status.conditions,
                condition::BIOS_UPGRADE_COMPLETED,
                condition::STATUS_TRUE,
                reason::UPGRADE_TASK_COMPLETED,
                "",
            );
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::requeue_now());
        }

        let checkpoint = condition::find(&status.conditions, condition::BIOS_UPGRADE_COMPLETED)
            .map(Checkpoint::of);
        condition::set(
            &mut status.conditions,
            condition::BIOS_UPGRADE_COMPLETED,
            condition::STATUS_FALSE,
            "UpgradeTaskRunning",
            &format!("task {} at {}%", task.state, task.percent_complete.unwrap_or(0)),
        );
        let stalled = checkpoint.is_some_and(|checkpoint| {
            condition::find(&status.conditions, condition::BIOS_UPGRADE_COMPLETED)
                .is_some_and(|current| !checkpoint.changed(current))
        });
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        Ok(Reconciled::requeue_after(if stalled {
            self.ctx.cfg.task_stall_backoff
        } else {
            self.ctx.cfg.task_poll_interval
        }))
    }

    async fn power_phase(
        &self,
        mut object: BIOSVersion,
        server: &Server,
        condition_type: &str,
        power: Power,
    ) -> ReconcileResult {
        let Some(lease) = object.spec.server_maintenance_ref.clone() else {
            return Err(ReconcileError::InvalidObject(
                "power phase without a maintenance lease".to_string(),
            ));
        };
        let mut status = object.status.clone().unwrap_or_default();
        let phase = power::advance(
            &self.ctx.store,
            &lease,
            server,
            &mut status.conditions,
            condition_type,
            power,
        )
        .await?;
        match phase {
            PowerPhase::Requested | PowerPhase::JustCompleted => {
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                Ok(if phase == PowerPhase::Requested {
                    Reconciled::requeue_after(self.ctx.cfg.power_wait_interval)
                } else {
                    Reconciled::requeue_now()
                })
            }
            PowerPhase::AlreadyComplete => Ok(Reconciled::requeue_now()),
            PowerPhase::Waiting => Ok(Reconciled::requeue_after(self.ctx.cfg.power_wait_interval)),
        }
    }

    async fn verify(
        &self,
        mut object: BIOSVersion,
        server: &Server,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        let live = redfish.bios_version(&server.spec.system_uri).await?;
        let mut status = object.status.clone().unwrap_or_default();
        if live != object.spec.version {
            condition::set(
                &mut status.conditions,
                condition::BIOS_UPGRADE_VERIFICATION,
                condition::STATUS_FALSE,
                "AwaitingVersionReport",
                "waiting for BIOS to reflect new version",
            );
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::requeue_after(self.ctx.cfg.power_wait_interval));
        }

        if let Some(lease) = object.spec.server_maintenance_ref.clone() {
            let owner_uid = object.metadata.uid.clone().unwrap_or_default();
            let deleted = maintenance::release(
                &self.ctx.store,
                &owner_uid,
                &lease,
                &object.spec.server_ref.name,
            )
            .await?;
            object.spec.server_maintenance_ref = None;
            object = self.ctx.store.update(&object).await?;
            status = object.status.clone().unwrap_or_default();
            if deleted {
                condition::set(
                    &mut status.conditions,
                    condition::SERVER_MAINTENANCE_DELETED,
                    condition::STATUS_TRUE,
                    "MaintenanceReleased",
                    "",
                );
            }
        }
        condition::set(
            &mut status.conditions,
            condition::BIOS_UPGRADE_VERIFICATION,
            condition::STATUS_TRUE,
            reason::VERIFICATION_COMPLETED,
            "",
        );
        status.state = FirmwareState::Completed;
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        tracing::info!(
            bios_version = object.metadata.name.as_deref().unwrap_or_default(),
            version = %object.spec.version,
            "BIOS upgrade verified"
        );
        Ok(Reconciled::requeue_after(self.ctx.cfg.resync_interval))
    }

    async fn completed_drift(
        &self,
        mut object: BIOSVersion,
        server: &Server,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        let live = redfish.bios_version(&server.spec.system_uri).await?;
        if live == object.spec.version {
            return Ok(Reconciled::requeue_after(self.ctx.cfg.resync_interval));
        }
        tracing::info!(
            bios_version = object.metadata.name.as_deref().unwrap_or_default(),
            %live,
            desired = %object.spec.version,
            "BIOS version drifted, restarting"
        );
        object.status = Some(BIOSVersionStatus::default());
        self.ctx.store.update_status(&object).await?;
        Ok(Reconciled::requeue_now())
    }

    async fn retry(&self, mut object: BIOSVersion) -> ReconcileResult {
        object.status = Some(BIOSVersionStatus::default());
        let mut object = self.ctx.store.update_status(&object).await?;
        annotations::clear_operation(&mut object.metadata);
        self.ctx.store.update(&object).await?;
        tracing::info!(
            bios_version = object.metadata.name.as_deref().unwrap_or_default(),
            "retrying after failure"
        );
        Ok(Reconciled::requeue_now())
    }

    async fn finalize(&self, mut object: BIOSVersion) -> ReconcileResult {
        if !kernel::has_finalizer(&object.metadata) {
            return Ok(Reconciled::done());
        }
        if let Some(lease) = object.spec.server_maintenance_ref.clone() {
            let owner_uid = object.metadata.uid.clone().unwrap_or_default();
            maintenance::release(
                &self.ctx.store,
                &owner_uid,
                &lease,
                &object.spec.server_ref.name,
            )
            .await?;
        }
        kernel::remove_finalizer(&mut object.metadata);
        self.ctx.store.update(&object).await?;
        Ok(Reconciled::done())
    }
}
