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

//! BMCSettings reconciler
//!
//! BMC-level attribute changes can disrupt every server behind the BMC,
//! so the reconciler leases all of them before touching anything: one
//! ServerMaintenance per server, a stabilization reset, the immediate
//! attribute write, optionally a second reset, then verification.

use std::collections::BTreeSet;
use std::sync::Arc;

use model::annotations::{self, Operation};
use model::bios_settings::SettingsState;
use model::bmc::BMC;
use model::bmc_settings::{BMCSettings, BMCSettingsStatus};
use model::condition::{self, reason};
use model::server::{Power, Server};
use model::server_maintenance::ServerMaintenance;
use redfish::{RedfishClient, RedfishError, diff};

use crate::Context;
use crate::errors::{ReconcileError, ReconcileResult};
use crate::kernel::bmc_reset::{self, ResetPhase};
use crate::kernel::{self, Reconciled, client, maintenance};
use crate::store::Store;

const MAINTENANCE_REASON: &str = "BMC settings update";

const INITIAL_RESET_ISSUED: &str = "InitialResetIssued";
const INITIAL_RESET_COMPLETE: &str = "InitialResetComplete";
const POST_APPLY_RESET_ISSUED: &str = "PostApplyResetIssued";
const POST_APPLY_RESET_COMPLETE: &str = "PostApplyResetComplete";

const UPDATE_ISSUED: &str = "UpdateIssued";
const UPDATE_ISSUED_RESET_REQUIRED: &str = "UpdateIssuedResetRequired";

pub struct BmcSettingsReconciler<S> {
    ctx: Arc<Context<S>>,
}

impl<S: Store> BmcSettingsReconciler<S> {
    pub fn new(ctx: Arc<Context<S>>) -> Self {
        Self { ctx }
    }

    pub async fn reconcile(&self, name: &str) -> ReconcileResult {
        let Some(object) = self.ctx.store.get::<BMCSettings>(name).await? else {
            return Ok(Reconciled::done());
        };
        if let Some(Operation::Ignore) = Operation::from_meta(&object.metadata) {
            tracing::debug!(bmc_settings = name, "reconciliation ignored by annotation");
            return Ok(Reconciled::done());
        }

        let state = object.status.as_ref().map(|s| s.state).unwrap_or_default();
        if object.metadata.deletion_timestamp.is_some() && state != SettingsState::InProgress {
            return self.finalize(object).await;
        }

        if let Some(Operation::RetryOnFailure) = Operation::from_meta(&object.metadata) {
            if state == SettingsState::Failed {
                return self.retry(object).await;
            }
            let mut object = object;
            annotations::clear_operation(&mut object.metadata);
            self.ctx.store.update(&object).await?;
            return Ok(Reconciled::requeue_now());
        }
        if state == SettingsState::Failed {
            return Ok(Reconciled::done());
        }

        let bmc_name = &object.spec.bmc_ref.name;
        let bmc: BMC = self
            .ctx
            .store
            .get(bmc_name)
            .await?
            .ok_or_else(|| ReconcileError::MissingReference(format!("BMC/{bmc_name}")))?;
        if !client::bmc_ready(&bmc) {
            return Ok(Reconciled::done());
        }
        let redfish = client::connect(&self.ctx.store, &self.ctx.clients, &bmc).await?;

        match state {
            SettingsState::Pending => self.pending(object, redfish.as_ref()).await,
            SettingsState::InProgress => self.in_progress(object, &bmc, redfish.as_ref()).await,
            SettingsState::Applied => self.applied_drift(object, redfish.as_ref()).await,
            SettingsState::Failed => Ok(Reconciled::done()),
        }
    }

    async fn pending(&self, mut object: BMCSettings, redfish: &dyn RedfishClient) -> ReconcileResult {
        if kernel::ensure_finalizer(&mut object.metadata) {
            object = self.ctx.store.update(&object).await?;
        }
        let mut status = object.status.clone().unwrap_or_default();

        // Same version guard as BIOS settings, one layer down: the
        // attributes are written against one BMC firmware version.
        let live_version = redfish.bmc_version().await?;
        if live_version != object.spec.version {
            condition::set(
                &mut status.conditions,
                condition::BIOS_VERSION_UPDATE_PENDING,
                condition::STATUS_TRUE,
                reason::BMC_VERSION_NEEDS_UPGRADE,
                &format!("BMC runs {live_version}, settings need {}", object.spec.version),
            );
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::done());
        }

        let keys: Vec<String> = object.spec.settings.keys().cloned().collect();
        let live = redfish.bmc_attribute_values(&keys).await?;
        if diff(&object.spec.settings, &live).is_empty() {
            condition::set(
                &mut status.conditions,
                condition::VERIFY_SETTINGS_POST_UPDATE,
                condition::STATUS_TRUE,
                reason::VERIFICATION_COMPLETED,
                "",
            );
            status.state = SettingsState::Applied;
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::done());
        }

        status.state = SettingsState::InProgress;
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        Ok(Reconciled::requeue_now())
    }

    async fn in_progress(
        &self,
        mut object: BMCSettings,
        bmc: &BMC,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        if kernel::ensure_finalizer(&mut object.metadata) {
            object = self.ctx.store.update(&object).await?;
        }

        // Every server behind this BMC needs a granted lease before the
        // BMC is touched.
        let servers = self.servers_behind(&object, redfish).await?;
        if let Some(outcome) = self.ensure_leases(&mut object, &servers).await? {
            return Ok(outcome);
        }
        if !self.all_granted(&object).await? {
            return Ok(Reconciled::done());
        }

        let mut status = object.status.clone().unwrap_or_default();
        let issued = condition::find(&status.conditions, condition::SETTINGS_UPDATE_ISSUED)
            .map(|c| c.reason.clone());

        match issued {
            None => {
                // Stabilization reset before the first write.
                let phase = bmc_reset::advance(
                    &self.ctx.store,
                    bmc,
                    &mut status.conditions,
                    condition::BMC_RESET_ISSUED,
                    INITIAL_RESET_ISSUED,
                    INITIAL_RESET_COMPLETE,
                )
                .await?;
                match phase {
                    ResetPhase::Requested | ResetPhase::JustCompleted => {
                        object.status = Some(status);
                        self.ctx.store.update_status(&object).await?;
                        return Ok(if phase == ResetPhase::Requested {
                            Reconciled::done()
                        } else {
                            Reconciled::requeue_now()
                        });
                    }
                    ResetPhase::Waiting => return Ok(Reconciled::done()),
                    ResetPhase::AlreadyComplete => {}
                }
                self.apply_settings(object, status, redfish).await
            }
            Some(issue_reason) => {
                if issue_reason == UPDATE_ISSUED_RESET_REQUIRED {
                    let phase = bmc_reset::advance(
                        &self.ctx.store,
                        bmc,
                        &mut status.conditions,
                        condition::BMC_RESET_ISSUED,
                        POST_APPLY_RESET_ISSUED,
                        POST_APPLY_RESET_COMPLETE,
                    )
                    .await?;
                    match phase {
                        ResetPhase::Requested | ResetPhase::JustCompleted => {
                            object.status = Some(status);
                            self.ctx.store.update_status(&object).await?;
                            return Ok(if phase == ResetPhase::Requested {
                                Reconciled::done()
                            } else {
                                Reconciled::requeue_now()
                            });
                        }
                        ResetPhase::Waiting => return Ok(Reconciled::done()),
                        ResetPhase::AlreadyComplete => {}
                    }
                }
                self.verify(object, status, redfish).await
            }
        }
    }

    /// Systems reported by the BMC joined to Server objects on their
    /// system URI.
    async fn servers_behind(
        &self,
        object: &BMCSettings,
        redfish: &dyn RedfishClient,
    ) -> Result<Vec<Server>, ReconcileError> {
        let bmc_name = &object.spec.bmc_ref.name;
        let systems = redfish.systems().await?;
        let uris: BTreeSet<&str> = systems.iter().map(|s| s.uri.as_str()).collect();
        let servers: Vec<Server> = self.ctx.store.list().await?;
        Ok(servers
            .into_iter()
            .filter(|server| {
                server.spec.bmc_ref.name == *bmc_name
                    && uris.contains(server.spec.system_uri.as_str())
            })
            .collect())
    }

    /// Creates leases for servers not yet covered. Returns an outcome
    /// when the reconcile should suspend (new leases were created).
    async fn ensure_leases(
        &self,
        object: &mut BMCSettings,
        servers: &[Server],
    ) -> Result<Option<Reconciled>, ReconcileError> {
        let mut covered = BTreeSet::new();
        for lease_ref in &object.spec.server_maintenance_refs {
            if let Some(lease) = self
                .ctx
                .store
                .get::<ServerMaintenance>(&lease_ref.name)
                .await?
            {
                covered.insert(lease.spec.server_ref.name.clone());
            }
        }

        let mut created = 0usize;
        for server in servers {
            let server_name = server.metadata.name.clone().unwrap_or_default();
            if covered.contains(&server_name) {
                continue;
            }
            let lease = maintenance::create_lease(
                &self.ctx.store,
                object,
                &server_name,
                object.spec.server_maintenance_policy,
                Power::On,
                MAINTENANCE_REASON,
            )
            .await?;
            object.spec.server_maintenance_refs.push(lease);
            created += 1;
        }
        if created == 0 {
            return Ok(None);
        }

        *object = self.ctx.store.update(object).await?;
        let mut status = object.status.clone().unwrap_or_default();
        condition::set(
            &mut status.conditions,
            condition::SERVER_MAINTENANCE_CREATED,
            condition::STATUS_TRUE,
            "MaintenanceRequested",
            &format!(
                "requested maintenance on {} servers",
                object.spec.server_maintenance_refs.len()
            ),
        );
        object.status = Some(status);
        *object = self.ctx.store.update_status(object).await?;
        Ok(Some(Reconciled::done()))
    }

    async fn all_granted(&self, object: &BMCSettings) -> Result<bool, ReconcileError> {
        for lease_ref in &object.spec.server_maintenance_refs {
            let Some(lease) = self
                .ctx
                .store
                .get::<ServerMaintenance>(&lease_ref.name)
                .await?
            else {
                return Ok(false);
            };
            let server_name = &lease.spec.server_ref.name;
            let Some(server) = self.ctx.store.get::<Server>(server_name).await? else {
                return Ok(false);
            };
            if !maintenance::granted(&server, lease_ref) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply_settings(
        &self,
        mut object: BMCSettings,
        mut status: BMCSettingsStatus,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        let pending = redfish.bmc_pending_attribute_values().await?;
        if !pending.is_empty() {
            let keys: Vec<&str> = pending.keys().map(String::as_str).collect();
            condition::set(
                &mut status.conditions,
                condition::UNKNOWN_PENDING_SETTING_STATE,
                condition::STATUS_TRUE,
                reason::UNEXPECTED_PENDING_SETTINGS,
                &format!("BMC has pending attributes: {}", keys.join(", ")),
            );
            status.state = SettingsState::Failed;
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::done());
        }

        let reboot_required = match redfish.check_bmc_attributes(&object.spec.settings).await {
            Ok(required) => required,
            Err(RedfishError::InvalidBmcSettings(keys)) => {
                condition::set(
                    &mut status.conditions,
                    condition::SETTINGS_PROVIDED_NOT_VALID,
                    condition::STATUS_TRUE,
                    reason::SETTINGS_PROVIDED_ARE_NOT_VALID,
                    &format!("invalid settings: {}", keys.join(", ")),
                );
                status.state = SettingsState::Failed;
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                return Ok(Reconciled::done());
            }
            Err(err) => return Err(err.into()),
        };

        redfish
            .set_bmc_attributes_immediately(&object.spec.settings)
            .await?;
        condition::set(
            &mut status.conditions,
            condition::SETTINGS_UPDATE_ISSUED,
            condition::STATUS_TRUE,
            if reboot_required {
                UPDATE_ISSUED_RESET_REQUIRED
            } else {
                UPDATE_ISSUED
            },
            "",
        );
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        Ok(Reconciled::requeue_now())
    }

    async fn verify(
        &self,
        mut object: BMCSettings,
        mut status: BMCSettingsStatus,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        let keys: Vec<String> = object.spec.settings.keys().cloned().collect();
        let live = redfish.bmc_attribute_values(&keys).await?;
        let remaining = diff(&object.spec.settings, &live);
        if !remaining.is_empty() {
            return Ok(Reconciled::requeue_after(self.ctx.cfg.bmc_client_retry_interval));
        }

        // Release every lease before settling.
        let owner_uid = object.metadata.uid.clone().unwrap_or_default();
        let mut released = false;
        for lease_ref in object.spec.server_maintenance_refs.clone() {
            if let Some(lease) = self
                .ctx
                .store
                .get::<ServerMaintenance>(&lease_ref.name)
                .await?
            {
                released |= maintenance::release(
                    &self.ctx.store,
                    &owner_uid,
                    &lease_ref,
                    &lease.spec.server_ref.name,
                )
                .await?;
            }
        }
        object.spec.server_maintenance_refs.clear();
        object = self.ctx.store.update(&object).await?;

        if released {
            condition::set(
                &mut status.conditions,
                condition::SERVER_MAINTENANCE_DELETED,
                condition::STATUS_TRUE,
                "MaintenanceReleased",
                "",
            );
        }
        condition::set(
            &mut status.conditions,
            condition::VERIFY_SETTINGS_POST_UPDATE,
            condition::STATUS_TRUE,
            reason::VERIFICATION_COMPLETED,
            "",
        );
        status.state = SettingsState::Applied;
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        tracing::info!(
            bmc_settings = object.metadata.name.as_deref().unwrap_or_default(),
            "BMC settings applied"
        );
        Ok(Reconciled::requeue_after(self.ctx.cfg.resync_interval))
    }

    async fn applied_drift(
        &self,
        mut object: BMCSettings,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        let keys: Vec<String> = object.spec.settings.keys().cloned().collect();
        let live = redfish.bmc_attribute_values(&keys).await?;
        if diff(&object.spec.settings, &live).is_empty() {
            return Ok(Reconciled::requeue_after(self.ctx.cfg.resync_interval));
        }
        tracing::info!(
            bmc_settings = object.metadata.name.as_deref().unwrap_or_default(),
            "BMC settings drifted, restarting"
        );
        object.status = Some(BMCSettingsStatus::default());
        self.ctx.store.update_status(&object).await?;
        Ok(Reconciled::requeue_now())
    }

    async fn retry(&self, mut object: BMCSettings) -> ReconcileResult {
        object.status = Some(BMCSettingsStatus::default());
        let mut object = self.ctx.store.update_status(&object).await?;
        annotations::clear_operation(&mut object.metadata);
        self.ctx.store.update(&object).await?;
        tracing::info!(
            bmc_settings = object.metadata.name.as_deref().unwrap_or_default(),
            "retrying after failure"
        );
        Ok(Reconciled::requeue_now())
    }

    async fn finalize(&self, mut object: BMCSettings) -> ReconcileResult {
        if !kernel::has_finalizer(&object.metadata) {
            return Ok(Reconciled::done());
        }
        let owner_uid = object.metadata.uid.clone().unwrap_or_default();
        for lease_ref in object.spec.server_maintenance_refs.clone() {
            if let Some(lease) = self
                .ctx
                .store
                .get::<ServerMaintenance>(&lease_ref.name)
                .await?
            {
                maintenance::release(
                    &self.ctx.store,
                    &owner_uid,
                    &lease_ref,
                    &lease.spec.server_ref.name,
                )
                .await?;
            }
        }
        kernel::remove_finalizer(&mut object.metadata);
        self.ctx.store.update(&object).await?;
        Ok(Reconciled::done())
    }
}
