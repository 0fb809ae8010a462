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

//! BIOSSettings reconciler
//!
//! Applies a SettingsFlow: attribute groups in ascending priority, each an
//! independently reboot-gated transaction verified before the next group
//! starts. A lower-priority group re-running invalidates in-progress work
//! of later groups.

use std::collections::BTreeMap;

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use model::annotations::{self, Operation};
use model::bios_settings::{
    BIOSSettings, BIOSSettingsStatus, FlowState, SettingsGroup, SettingsState,
};
use model::bmc::BMC;
use model::condition::{self, reason};
use model::reference::ObjectReference;
use model::server::{Power, Server};
use redfish::{AttributeMap, RedfishClient, RedfishError, diff, matches_desired};

use crate::Context;
use crate::errors::{ReconcileError, ReconcileResult};
use crate::kernel::bmc_reset::{self, ResetPhase};
use crate::kernel::power::{self, PowerPhase};
use crate::kernel::{self, Reconciled, client, maintenance};
use crate::store::Store;

const MAINTENANCE_REASON: &str = "BIOS settings update";

/// How the server-side pending set relates to the diff we want applied.
#[derive(Debug, PartialEq, Eq)]
enum PendingCoverage {
    Empty,
    /// Every diff key is staged with the requested value.
    Covered,
    /// Some diff keys are not staged (yet); nothing contradicts us.
    Partial,
    /// At least one diff key is staged with a different value.
    Mismatched(Vec<String>),
}

fn pending_coverage(wanted: &BTreeMap<String, String>, pending: &AttributeMap) -> PendingCoverage {
    if pending.is_empty() {
        return PendingCoverage::Empty;
    }
    let mut mismatched = Vec::new();
    let mut missing = 0usize;
    for (key, value) in wanted {
        match pending.get(key) {
            None => missing += 1,
            Some(staged) if matches_desired(staged, value) => {}
            Some(_) => mismatched.push(key.clone()),
        }
    }
    if !mismatched.is_empty() {
        PendingCoverage::Mismatched(mismatched)
    } else if missing == 0 {
        PendingCoverage::Covered
    } else {
        PendingCoverage::Partial
    }
}

pub struct BiosSettingsReconciler<S> {
    ctx: Arc<Context<S>>,
}

impl<S: Store> BiosSettingsReconciler<S> {
    pub fn new(ctx: Arc<Context<S>>) -> Self {
        Self { ctx }
    }

    pub async fn reconcile(&self, name: &str) -> ReconcileResult {
        let Some(object) = self.ctx.store.get::<BIOSSettings>(name).await? else {
            return Ok(Reconciled::done());
        };
        if let Some(Operation::Ignore) = Operation::from_meta(&object.metadata) {
            tracing::debug!(bios_settings = name, "reconciliation ignored by annotation");
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

        let (server, bmc) =
            client::server_and_bmc(&self.ctx.store, &object.spec.server_ref.name).await?;
        if !self.ensure_claim(&object, &server).await? {
            // A newer BIOSSettings claims this server; we back off until
            // the claim changes.
            return Ok(Reconciled::done());
        }
        if !client::bmc_ready(&bmc) {
            return Ok(Reconciled::done());
        }
        let redfish = client::connect(&self.ctx.store, &self.ctx.clients, &bmc).await?;

        match state {
            SettingsState::Pending => self.pending(object, &server, redfish.as_ref()).await,
            SettingsState::InProgress => {
                self.in_progress(object, &server, &bmc, redfish.as_ref()).await
            }
            SettingsState::Applied => self.applied_drift(object, &server, redfish.as_ref()).await,
            SettingsState::Failed => Ok(Reconciled::done()),
        }
    }

    /// `Server.spec.biosSettingsRef` points at the newest claimant by
    /// version; older claimants observe the mismatch and back off.
    async fn ensure_claim(
        &self,
        object: &BIOSSettings,
        server: &Server,
    ) -> Result<bool, ReconcileError> {
        let my_name = object.metadata.name.clone().unwrap_or_default();
        match &server.spec.bios_settings_ref {
            Some(current) if current.name == my_name => Ok(true),
            Some(current) => {
                let newer = match self.ctx.store.get::<BIOSSettings>(&current.name).await? {
                    None => true,
                    Some(other) => {
                        version_compare::compare(&object.spec.version, &other.spec.version)
                            == Ok(version_compare::Cmp::Gt)
                    }
                };
                if !newer {
                    tracing::debug!(
                        bios_settings = %my_name,
                        claimed_by = %current.name,
                        "server claimed by newer settings, backing off"
                    );
                    return Ok(false);
                }
                self.claim(server, &my_name).await?;
                Ok(true)
            }
            None => {
                self.claim(server, &my_name).await?;
                Ok(true)
            }
        }
    }

    async fn claim(&self, server: &Server, name: &str) -> Result<(), ReconcileError> {
        let mut server = server.clone();
        server.spec.bios_settings_ref = Some(ObjectReference::new(name));
        self.ctx.store.update(&server).await?;
        Ok(())
    }

    async fn pending(
        &self,
        mut object: BIOSSettings,
        server: &Server,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        if kernel::ensure_finalizer(&mut object.metadata) {
            object = self.ctx.store.update(&object).await?;
        }
        let name = object.metadata.name.clone().unwrap_or_default();
        let mut status = object.status.clone().unwrap_or_default();

        // Out-of-band staged changes mean the machine is not in a state
        // we can reason about.
        let pending = redfish
            .bios_pending_attribute_values(&server.spec.system_uri)
            .await?;
        if !pending.is_empty() {
            let keys: Vec<&str> = pending.keys().map(String::as_str).collect();
            condition::set(
                &mut status.conditions,
                condition::BIOS_SETTINGS_CHECK_PENDING_SETTINGS,
                condition::STATUS_TRUE,
                reason::BIOS_PENDING_SETTINGS_FOUND,
                &format!("BIOS already has pending settings: {}", keys.join(", ")),
            );
            status.state = SettingsState::Failed;
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::done());
        }

        if let Err(validation) = object.spec.validate_flow() {
            condition::set(
                &mut status.conditions,
                condition::BIOS_SETTINGS_DUPLICATE_KEYS,
                condition::STATUS_TRUE,
                reason::BIOS_SETTINGS_DUPLICATE_KEYS_FOUND,
                &validation.to_string(),
            );
            status.state = SettingsState::Failed;
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::done());
        }

        // Settings are written against one firmware version; block until
        // the machine runs it. The BIOSVersion cross-watch re-triggers us.
        let live_version = redfish.bios_version(&server.spec.system_uri).await?;
        if live_version != object.spec.version {
            condition::set(
                &mut status.conditions,
                condition::BIOS_VERSION_UPDATE_PENDING,
                condition::STATUS_TRUE,
                reason::BIOS_VERSION_NEEDS_UPGRADE,
                &format!("BIOS runs {live_version}, settings need {}", object.spec.version),
            );
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::done());
        }

        let flattened = object.spec.flattened_settings();
        let keys: Vec<String> = flattened.keys().cloned().collect();
        let live = redfish
            .bios_attribute_values(&server.spec.system_uri, &keys)
            .await?;
        if diff(&flattened, &live).is_empty() {
            condition::set(
                &mut status.conditions,
                condition::VERIFY_SETTINGS_POST_UPDATE,
                condition::STATUS_TRUE,
                reason::VERIFICATION_COMPLETED,
                "",
            );
            status.state = SettingsState::Applied;
            status.last_applied_time = Some(Time(Utc::now()));
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            tracing::info!(bios_settings = %name, "all settings already in place");
            return Ok(Reconciled::done());
        }

        status.state = SettingsState::InProgress;
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        Ok(Reconciled::requeue_now())
    }

    async fn in_progress(
        &self,
        mut object: BIOSSettings,
        server: &Server,
        bmc: &BMC,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        if kernel::ensure_finalizer(&mut object.metadata) {
            object = self.ctx.store.update(&object).await?;
        }
        let flow = object.spec.sorted_flow();
        let mut status = object.status.clone().unwrap_or_default();

        let mut dirty = status.prune_stale_flow_state(&flow);
        for group in &flow {
            if status.flow_entry(&group.name, group.priority).is_none() {
                status.flow_state.push(FlowState {
                    name: group.name.clone(),
                    priority: group.priority,
                    ..Default::default()
                });
                dirty = true;
            }
        }

        let all_keys: Vec<String> = flow
            .iter()
            .flat_map(|group| group.settings.keys().cloned())
            .collect();
        let live = redfish
            .bios_attribute_values(&server.spec.system_uri, &all_keys)
            .await?;

        dirty |= reset_drifted_groups(&flow, &mut status, &live);

        if dirty {
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::requeue_now());
        }

        let Some(group) = flow.iter().find(|group| {
            status
                .flow_entry(&group.name, group.priority)
                .is_some_and(|entry| entry.state != SettingsState::Applied)
        }) else {
            return self.finish(object).await;
        };
        let group = group.clone();
        let group_diff = diff(&group.settings, &live);
        self.advance_group(object, server, bmc, redfish, &group, group_diff).await
    }

    /// One bounded step of the current group's transaction.
    async fn advance_group(
        &self,
        mut object: BIOSSettings,
        server: &Server,
        bmc: &BMC,
        redfish: &dyn RedfishClient,
        group: &SettingsGroup,
        group_diff: BTreeMap<String, String>,
    ) -> ReconcileResult {
        let mut status = object.status.clone().unwrap_or_default();

        // Group turns InProgress as its first persisted step.
        {
            let entry = entry_mut(&mut status, group)?;
            if entry.state == SettingsState::Pending {
                entry.state = SettingsState::InProgress;
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                return Ok(Reconciled::requeue_now());
            }
        }

        // Nothing to change and nothing issued yet: the group verifies as
        // it stands. Once an update is in flight the full phase chain
        // runs so the reboot sequence concludes properly.
        let issuing_started = entry_exists(&status, group, condition::SETTINGS_UPDATE_ISSUED)?;
        if group_diff.is_empty() && !issuing_started {
            let entry = entry_mut(&mut status, group)?;
            condition::set(
                &mut entry.conditions,
                condition::VERIFY_SETTINGS_POST_UPDATE,
                condition::STATUS_TRUE,
                reason::VERIFICATION_COMPLETED,
                "",
            );
            entry.state = SettingsState::Applied;
            entry.last_applied_time = Some(Time(Utc::now()));
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            tracing::info!(
                bios_settings = object.metadata.name.as_deref().unwrap_or_default(),
                group = %group.name,
                "settings group applied"
            );
            return Ok(Reconciled::requeue_now());
        }

        // The wall-clock budget for this group starts with its first
        // actionable diff and survives restarts as a condition.
        {
            let entry = entry_mut(&mut status, group)?;
            if !condition::exists(&entry.conditions, condition::BIOS_SETTING_UPDATE_START_TIME) {
                condition::set(
                    &mut entry.conditions,
                    condition::BIOS_SETTING_UPDATE_START_TIME,
                    condition::STATUS_TRUE,
                    "UpdateStarted",
                    "",
                );
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                return Ok(Reconciled::requeue_now());
            }
            let started = condition::find(&entry.conditions, condition::BIOS_SETTING_UPDATE_START_TIME)
                .map(|c| c.last_transition_time.0)
                .unwrap_or_else(Utc::now);
            let budget = chrono::Duration::from_std(self.ctx.cfg.settings_update_timeout)
                .unwrap_or(chrono::Duration::MAX);
            if Utc::now().signed_duration_since(started) > budget {
                condition::set(
                    &mut entry.conditions,
                    condition::BIOS_SETTINGS_TIMED_OUT,
                    condition::STATUS_TRUE,
                    reason::BIOS_SETTINGS_TIMED_OUT_DURING_UPDATE,
                    &format!("group {} exceeded the update timeout", group.name),
                );
                entry.state = SettingsState::Failed;
                status.state = SettingsState::Failed;
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                return Ok(Reconciled::done());
            }
        }

        // Maintenance lease, then power on through it.
        let Some(lease) = object.spec.server_maintenance_ref.clone() else {
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
            return Ok(Reconciled::done());
        };
        if !maintenance::granted(server, &lease) {
            return Ok(Reconciled::done());
        }

        {
            let entry = entry_mut(&mut status, group)?;
            if !condition::is_true(&entry.conditions, condition::SERVER_POWER_ON) {
                let phase = power::advance(
                    &self.ctx.store,
                    &lease,
                    server,
                    &mut entry.conditions,
                    condition::SERVER_POWER_ON,
                    Power::On,
                )
                .await?;
                let outcome = power_outcome(phase, self.ctx.cfg.power_wait_interval);
                return self.conclude_sub_phase(object, status, outcome).await;
            }
        }

        // Stabilization reset against BMCs that lock up mid-operation.
        {
            let entry = entry_mut(&mut status, group)?;
            if !condition::is_true(&entry.conditions, condition::BMC_RESET_ISSUED) {
                let phase = bmc_reset::advance(
                    &self.ctx.store,
                    bmc,
                    &mut entry.conditions,
                    condition::BMC_RESET_ISSUED,
                    "ResetRequested",
                    reason::RESET_COMPLETE,
                )
                .await?;
                return self.conclude_sub_phase(object, status, reset_outcome(phase)).await;
            }
        }

        // Decide whether this diff needs a reboot; structurally invalid
        // settings are terminal.
        let reboot_required = {
            let entry = entry_mut(&mut status, group)?;
            match condition::find(&entry.conditions, condition::SERVER_REBOOT_POST_UPDATE) {
                Some(decision) => decision.reason == reason::REBOOT_REQUIRED,
                None => {
                    match redfish
                        .check_bios_attributes(&server.spec.system_uri, &group_diff)
                        .await
                    {
                        Ok(required) => {
                            condition::set(
                                &mut entry.conditions,
                                condition::SERVER_REBOOT_POST_UPDATE,
                                condition::STATUS_TRUE,
                                if required {
                                    reason::REBOOT_REQUIRED
                                } else {
                                    reason::REBOOT_SKIPPED
                                },
                                "",
                            );
                            object.status = Some(status);
                            self.ctx.store.update_status(&object).await?;
                            return Ok(Reconciled::requeue_now());
                        }
                        Err(RedfishError::InvalidBiosSettings(keys)) => {
                            condition::set(
                                &mut entry.conditions,
                                condition::SETTINGS_PROVIDED_NOT_VALID,
                                condition::STATUS_TRUE,
                                reason::SETTINGS_PROVIDED_ARE_NOT_VALID,
                                &format!("invalid settings: {}", keys.join(", ")),
                            );
                            entry.state = SettingsState::Failed;
                            status.state = SettingsState::Failed;
                            object.status = Some(status);
                            self.ctx.store.update_status(&object).await?;
                            return Ok(Reconciled::done());
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        };

        if !entry_is_true(&status, group, condition::SETTINGS_UPDATE_ISSUED)? {
            return self
                .issue_settings(object, status, server, redfish, group, &group_diff)
                .await;
        }

        if reboot_required {
            for (condition_type, power) in [
                (condition::REBOOT_POWER_OFF, Power::Off),
                (condition::REBOOT_POWER_ON, Power::On),
            ] {
                let entry = entry_mut(&mut status, group)?;
                if !condition::is_true(&entry.conditions, condition_type) {
                    let phase = power::advance(
                        &self.ctx.store,
                        &lease,
                        server,
                        &mut entry.conditions,
                        condition_type,
                        power,
                    )
                    .await?;
                    let outcome = power_outcome(phase, self.ctx.cfg.power_wait_interval);
                    return self.conclude_sub_phase(object, status, outcome).await;
                }
            }
        }

        // Verify against a fresh read; the values above predate the
        // reboot.
        let keys: Vec<String> = group.settings.keys().cloned().collect();
        let live = redfish
            .bios_attribute_values(&server.spec.system_uri, &keys)
            .await?;
        let remaining = diff(&group.settings, &live);
        let entry = entry_mut(&mut status, group)?;
        if remaining.is_empty() {
            condition::set(
                &mut entry.conditions,
                condition::VERIFY_SETTINGS_POST_UPDATE,
                condition::STATUS_TRUE,
                reason::VERIFICATION_COMPLETED,
                "",
            );
            entry.state = SettingsState::Applied;
            entry.last_applied_time = Some(Time(Utc::now()));
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            tracing::info!(
                bios_settings = object.metadata.name.as_deref().unwrap_or_default(),
                group = %group.name,
                "settings group applied"
            );
            return Ok(Reconciled::requeue_now());
        }
        condition::set(
            &mut entry.conditions,
            condition::VERIFY_SETTINGS_POST_UPDATE,
            condition::STATUS_FALSE,
            "SettingsNotYetReflected",
            &format!("still differing: {}", remaining.keys().cloned().collect::<Vec<_>>().join(", ")),
        );
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        Ok(Reconciled::requeue_after(self.ctx.cfg.power_wait_interval))
    }

    /// Persists the status mutated by a sub-phase helper and turns the
    /// phase outcome into a requeue decision.
    async fn conclude_sub_phase(
        &self,
        mut object: BIOSSettings,
        status: BIOSSettingsStatus,
        outcome: SubPhaseOutcome,
    ) -> ReconcileResult {
        match outcome {
            SubPhaseOutcome::Persist(next) => {
                object.status = Some(status);
                self.ctx.store.update_status(&object).await?;
                Ok(next)
            }
            SubPhaseOutcome::Skip(next) => Ok(next),
        }
    }

    async fn issue_settings(
        &self,
        mut object: BIOSSettings,
        mut status: BIOSSettingsStatus,
        server: &Server,
        redfish: &dyn RedfishClient,
        group: &SettingsGroup,
        group_diff: &BTreeMap<String, String>,
    ) -> ReconcileResult {
        let pending = redfish
            .bios_pending_attribute_values(&server.spec.system_uri)
            .await?;
        let coverage = pending_coverage(group_diff, &pending);
        let issued = entry_exists(&status, group, condition::SETTINGS_UPDATE_ISSUED)?;
        let entry = entry_mut(&mut status, group)?;

        if let PendingCoverage::Mismatched(keys) = &coverage {
            condition::set(
                &mut entry.conditions,
                condition::UNKNOWN_PENDING_SETTING_STATE,
                condition::STATUS_TRUE,
                reason::UNEXPECTED_PENDING_SETTINGS,
                &format!("pending settings hold unexpected values for: {}", keys.join(", ")),
            );
            entry.state = SettingsState::Failed;
            status.state = SettingsState::Failed;
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::done());
        }

        if !issued {
            match coverage {
                PendingCoverage::Empty => {
                    redfish
                        .set_bios_attributes_on_reset(&server.spec.system_uri, group_diff)
                        .await?;
                    condition::set(
                        &mut entry.conditions,
                        condition::SETTINGS_UPDATE_ISSUED,
                        condition::STATUS_FALSE,
                        "UpdateIssued",
                        "",
                    );
                }
                PendingCoverage::Covered => {
                    // A prior invocation issued this and crashed before
                    // recording it; do not submit twice.
                    condition::set(
                        &mut entry.conditions,
                        condition::SETTINGS_UPDATE_ISSUED,
                        condition::STATUS_FALSE,
                        "UpdateIssued",
                        "found matching pending settings from an earlier attempt",
                    );
                }
                PendingCoverage::Partial => {
                    condition::set(
                        &mut entry.conditions,
                        condition::UNKNOWN_PENDING_SETTING_STATE,
                        condition::STATUS_TRUE,
                        reason::UNEXPECTED_PENDING_SETTINGS,
                        "pending settings unrelated to this update are present",
                    );
                    entry.state = SettingsState::Failed;
                    status.state = SettingsState::Failed;
                    object.status = Some(status);
                    self.ctx.store.update_status(&object).await?;
                    return Ok(Reconciled::done());
                }
                PendingCoverage::Mismatched(_) => unreachable!("handled above"),
            }
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::requeue_now());
        }

        // Issued earlier; confirm the BMC took it. Every key must either
        // be staged with the requested value (reboot-gated attributes) or
        // already live (immediate ones).
        let keys: Vec<String> = group.settings.keys().cloned().collect();
        let live = redfish
            .bios_attribute_values(&server.spec.system_uri, &keys)
            .await?;
        let confirmed = group_diff.iter().all(|(key, value)| {
            pending
                .get(key)
                .is_some_and(|staged| matches_desired(staged, value))
                || live
                    .get(key)
                    .is_some_and(|current| matches_desired(current, value))
        });
        if confirmed {
            condition::set(
                &mut entry.conditions,
                condition::SETTINGS_UPDATE_ISSUED,
                condition::STATUS_TRUE,
                "UpdateConfirmed",
                "",
            );
            object.status = Some(status);
            self.ctx.store.update_status(&object).await?;
            return Ok(Reconciled::requeue_now());
        }
        Ok(Reconciled::requeue_after(self.ctx.cfg.power_wait_interval))
    }

    /// All groups verified: release the lease and settle the object.
    async fn finish(&self, mut object: BIOSSettings) -> ReconcileResult {
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
            if deleted {
                let mut status = object.status.clone().unwrap_or_default();
                condition::set(
                    &mut status.conditions,
                    condition::SERVER_MAINTENANCE_DELETED,
                    condition::STATUS_TRUE,
                    "MaintenanceReleased",
                    "",
                );
                object.status = Some(status);
            }
        }
        let mut status = object.status.clone().unwrap_or_default();
        condition::set(
            &mut status.conditions,
            condition::VERIFY_SETTINGS_POST_UPDATE,
            condition::STATUS_TRUE,
            reason::VERIFICATION_COMPLETED,
            "",
        );
        status.state = SettingsState::Applied;
        status.last_applied_time = Some(Time(Utc::now()));
        object.status = Some(status);
        self.ctx.store.update_status(&object).await?;
        tracing::info!(
            bios_settings = object.metadata.name.as_deref().unwrap_or_default(),
            "settings flow applied"
        );
        Ok(Reconciled::requeue_after(self.ctx.cfg.resync_interval))
    }

    /// Applied objects re-check the live values; drift restarts the flow
    /// from scratch.
    async fn applied_drift(
        &self,
        mut object: BIOSSettings,
        server: &Server,
        redfish: &dyn RedfishClient,
    ) -> ReconcileResult {
        let flattened = object.spec.flattened_settings();
        let keys: Vec<String> = flattened.keys().cloned().collect();
        let live = redfish
            .bios_attribute_values(&server.spec.system_uri, &keys)
            .await?;
        if diff(&flattened, &live).is_empty() {
            return Ok(Reconciled::requeue_after(self.ctx.cfg.resync_interval));
        }
        tracing::info!(
            bios_settings = object.metadata.name.as_deref().unwrap_or_default(),
            "settings drifted, restarting flow"
        );
        object.status = Some(BIOSSettingsStatus::default());
        self.ctx.store.update_status(&object).await?;
        Ok(Reconciled::requeue_now())
    }

    async fn retry(&self, mut object: BIOSSettings) -> ReconcileResult {
        // Both the top-level state and the per-group flow state reset.
        object.status = Some(BIOSSettingsStatus::default());
        let mut object = self.ctx.store.update_status(&object).await?;
        annotations::clear_operation(&mut object.metadata);
        self.ctx.store.update(&object).await?;
        tracing::info!(
            bios_settings = object.metadata.name.as_deref().unwrap_or_default(),
            "retrying after failure"
        );
        Ok(Reconciled::requeue_now())
    }

    async fn finalize(&self, mut object: BIOSSettings) -> ReconcileResult {
        if !kernel::has_finalizer(&object.metadata) {
            return Ok(Reconciled::done());
        }
        let owner_uid = object.metadata.uid.clone().unwrap_or_default();
        if let Some(lease) = object.spec.server_maintenance_ref.clone() {
            maintenance::release(
                &self.ctx.store,
                &owner_uid,
                &lease,
                &object.spec.server_ref.name,
            )
            .await?;
        }
        // Drop the claim if it is ours.
        if let Some(mut server) = self
            .ctx
            .store
            .get::<Server>(&object.spec.server_ref.name)
            .await?
        {
            let my_name = object.metadata.name.clone().unwrap_or_default();
            if server
                .spec
                .bios_settings_ref
                .as_ref()
                .is_some_and(|r| r.name == my_name)
            {
                server.spec.bios_settings_ref = None;
                self.ctx.store.update(&server).await?;
            }
        }
        kernel::remove_finalizer(&mut object.metadata);
        self.ctx.store.update(&object).await?;
        Ok(Reconciled::done())
    }
}

enum SubPhaseOutcome {
    /// Write the mutated status, then suspend with the given outcome.
    Persist(Reconciled),
    /// Nothing changed; suspend without writing.
    Skip(Reconciled),
}

fn power_outcome(phase: PowerPhase, wait: std::time::Duration) -> SubPhaseOutcome {
    match phase {
        PowerPhase::Requested => SubPhaseOutcome::Persist(Reconciled::RequeueAfter(wait)),
        PowerPhase::JustCompleted => SubPhaseOutcome::Persist(Reconciled::requeue_now()),
        PowerPhase::AlreadyComplete => SubPhaseOutcome::Skip(Reconciled::requeue_now()),
        PowerPhase::Waiting => SubPhaseOutcome::Skip(Reconciled::RequeueAfter(wait)),
    }
}

fn reset_outcome(phase: ResetPhase) -> SubPhaseOutcome {
    match phase {
        ResetPhase::Requested => SubPhaseOutcome::Persist(Reconciled::Done),
        ResetPhase::JustCompleted => SubPhaseOutcome::Persist(Reconciled::requeue_now()),
        ResetPhase::AlreadyComplete => SubPhaseOutcome::Skip(Reconciled::requeue_now()),
        ResetPhase::Waiting => SubPhaseOutcome::Skip(Reconciled::Done),
    }
}

fn entry_mut<'a>(
    status: &'a mut BIOSSettingsStatus,
    group: &SettingsGroup,
) -> Result<&'a mut FlowState, ReconcileError> {
    status
        .flow_entry_mut(&group.name, group.priority)
        .ok_or_else(|| {
            ReconcileError::InvalidObject(format!("no flow state for group {}", group.name))
        })
}

fn entry_is_true(
    status: &BIOSSettingsStatus,
    group: &SettingsGroup,
    condition_type: &str,
) -> Result<bool, ReconcileError> {
    let entry = status.flow_entry(&group.name, group.priority).ok_or_else(|| {
        ReconcileError::InvalidObject(format!("no flow state for group {}", group.name))
    })?;
    Ok(condition::is_true(&entry.conditions, condition_type))
}

fn entry_exists(
    status: &BIOSSettingsStatus,
    group: &SettingsGroup,
    condition_type: &str,
) -> Result<bool, ReconcileError> {
    let entry = status.flow_entry(&group.name, group.priority).ok_or_else(|| {
        ReconcileError::InvalidObject(format!("no flow state for group {}", group.name))
    })?;
    Ok(condition::exists(&entry.conditions, condition_type))
}

/// A group that verified earlier but whose values differ again re-runs,
/// and every later group that was already in progress falls back to
/// Pending: lower-priority work re-running invalidates what came after
/// it.
fn reset_drifted_groups(
    flow: &[SettingsGroup],
    status: &mut BIOSSettingsStatus,
    live: &AttributeMap,
) -> bool {
    let drifted = flow.iter().position(|group| {
        status
            .flow_entry(&group.name, group.priority)
            .is_some_and(|entry| entry.state == SettingsState::Applied)
            && !diff(&group.settings, live).is_empty()
    });
    let Some(index) = drifted else {
        return false;
    };

    for (position, group) in flow.iter().enumerate().skip(index) {
        let Some(entry) = status.flow_entry_mut(&group.name, group.priority) else {
            continue;
        };
        if position == index {
            entry.state = SettingsState::InProgress;
            entry.conditions.clear();
            entry.last_applied_time = None;
        } else if entry.state == SettingsState::InProgress {
            entry.state = SettingsState::Pending;
            entry.conditions.clear();
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use redfish::AttributeValue;

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

    fn entry(name: &str, priority: i32, state: SettingsState) -> FlowState {
        FlowState {
            name: name.to_string(),
            priority,
            state,
            ..Default::default()
        }
    }

    #[test]
    fn pending_coverage_classification() {
        let wanted = BTreeMap::from([("X".to_string(), "1".to_string())]);
        assert_eq!(pending_coverage(&wanted, &AttributeMap::new()), PendingCoverage::Empty);

        let covered = AttributeMap::from([("X".to_string(), AttributeValue::Int(1))]);
        assert_eq!(pending_coverage(&wanted, &covered), PendingCoverage::Covered);

        let unrelated = AttributeMap::from([("Y".to_string(), AttributeValue::Int(2))]);
        assert_eq!(pending_coverage(&wanted, &unrelated), PendingCoverage::Partial);

        let wrong = AttributeMap::from([("X".to_string(), AttributeValue::Int(9))]);
        assert_eq!(
            pending_coverage(&wanted, &wrong),
            PendingCoverage::Mismatched(vec!["X".to_string()])
        );
    }

    #[test]
    fn drift_in_applied_group_resets_later_in_progress_groups() {
        let flow = vec![
            group("base", 10, &[("X", "1")]),
            group("tuning", 20, &[("Y", "2")]),
            group("later", 30, &[("Z", "3")]),
        ];
        let mut status = BIOSSettingsStatus {
            flow_state: vec![
                entry("base", 10, SettingsState::Applied),
                entry("tuning", 20, SettingsState::InProgress),
                entry("later", 30, SettingsState::Pending),
            ],
            ..Default::default()
        };
        // X drifted away from its applied value.
        let live = AttributeMap::from([
            ("X".to_string(), AttributeValue::Str("0".to_string())),
            ("Y".to_string(), AttributeValue::Str("2".to_string())),
        ]);
        assert!(reset_drifted_groups(&flow, &mut status, &live));
        assert_eq!(status.flow_entry("base", 10).unwrap().state, SettingsState::InProgress);
        assert_eq!(status.flow_entry("tuning", 20).unwrap().state, SettingsState::Pending);
        assert_eq!(status.flow_entry("later", 30).unwrap().state, SettingsState::Pending);
    }

    #[test]
    fn no_reset_when_applied_groups_hold() {
        let flow = vec![group("base", 10, &[("X", "1")])];
        let mut status = BIOSSettingsStatus {
            flow_state: vec![entry("base", 10, SettingsState::Applied)],
            ..Default::default()
        };
        let live = AttributeMap::from([("X".to_string(), AttributeValue::Int(1))]);
        assert!(!reset_drifted_groups(&flow, &mut status, &live));
    }
}
