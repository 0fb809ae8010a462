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

//! BMC supervisor
//!
//! Keeps the Ready and Reset conditions of every BMC current, refreshes
//! observed hardware identity, discovers the systems behind a healthy BMC
//! as Server objects, and resets BMCs that stay broken for too long. All
//! other reconcilers gate on the Ready condition published here.

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;
use model::annotations::{self, Operation};
use model::bmc::{BMC, BMCState};
use model::condition::{self, reason};
use model::reference::ObjectReference;
use model::server::{Server, ServerPowerState, ServerSpec};
use redfish::{Manager, PowerState, RedfishClient, RedfishError, ResetType};

use crate::errors::{ReconcileError, ReconcileResult};
use crate::kernel::{Reconciled, client};
use crate::store::{Store, StoreError};
use crate::Context;

/// Hook for resetting BMCs that cannot be reached over Redfish at all
/// (e.g. via the BMC's serial console or SSH). No in-tree implementation
/// yet; platforms plug their own.
#[async_trait::async_trait]
pub trait ResetFallback: Send + Sync {
    async fn reset(&self, bmc: &BMC) -> Result<(), ReconcileError>;
}

pub struct BmcSupervisor<S> {
    ctx: Arc<Context<S>>,
    fallback: Option<Arc<dyn ResetFallback>>,
}

impl<S: Store> BmcSupervisor<S> {
    pub fn new(ctx: Arc<Context<S>>) -> Self {
        Self { ctx, fallback: None }
    }

    pub fn with_fallback(ctx: Arc<Context<S>>, fallback: Arc<dyn ResetFallback>) -> Self {
        Self {
            ctx,
            fallback: Some(fallback),
        }
    }

    pub async fn reconcile(&self, name: &str) -> ReconcileResult {
        let Some(bmc) = self.ctx.store.get::<BMC>(name).await? else {
            return Ok(Reconciled::done());
        };
        if let Some(Operation::Ignore) = Operation::from_meta(&bmc.metadata) {
            tracing::debug!(bmc = name, "reconciliation ignored by annotation");
            return Ok(Reconciled::done());
        }
        // Owned Servers are cascade-deleted by the store; nothing else to
        // clean up.
        if bmc.metadata.deletion_timestamp.is_some() {
            return Ok(Reconciled::done());
        }

        if let Some(outcome) = self.within_reset_window(&bmc).await? {
            return Ok(outcome);
        }

        let client = match client::connect(&self.ctx.store, &self.ctx.clients, &bmc).await {
            Ok(client) => client,
            Err(ReconcileError::Redfish(err)) => return self.probe_failed(bmc, err).await,
            Err(other) => return Err(other),
        };
        match client.manager().await {
            Ok(manager) => self.probe_succeeded(bmc, client, manager).await,
            Err(err) => self.probe_failed(bmc, err).await,
        }
    }

    /// While a reset is assumed in flight, skip probing entirely. A user
    /// asking for another reset inside the window is discarded so resets
    /// cannot storm.
    async fn within_reset_window(&self, bmc: &BMC) -> Result<Option<Reconciled>, ReconcileError> {
        let Some(status) = &bmc.status else {
            return Ok(None);
        };
        let Some(reset) = condition::find(&status.conditions, condition::RESET) else {
            return Ok(None);
        };
        if reset.status != condition::STATUS_TRUE {
            return Ok(None);
        }
        let wait = chrono::Duration::from_std(self.ctx.cfg.bmc_reset_wait_time)
            .unwrap_or(chrono::Duration::MAX);
        let elapsed = Utc::now().signed_duration_since(reset.last_transition_time.0);
        if elapsed >= wait {
            return Ok(None);
        }

        if let Some(Operation::GracefulRestartBmc) = Operation::from_meta(&bmc.metadata) {
            let mut bmc = bmc.clone();
            annotations::clear_operation(&mut bmc.metadata);
            self.ctx.store.update(&bmc).await?;
            tracing::debug!(
                bmc = bmc.metadata.name.as_deref().unwrap_or_default(),
                "discarding reset request while a reset is already in flight"
            );
        }
        Ok(Some(Reconciled::requeue_after(
            self.ctx.cfg.bmc_client_retry_interval,
        )))
    }

    async fn probe_succeeded(
        &self,
        mut bmc: BMC,
        client: Arc<dyn RedfishClient>,
        manager: Manager,
    ) -> ReconcileResult {
        let name = bmc.metadata.name.clone().unwrap_or_default();
        let mut status = bmc.status.clone().unwrap_or_default();

        condition::set(
            &mut status.conditions,
            condition::RESET,
            condition::STATUS_FALSE,
            reason::RESET_COMPLETE,
            "",
        );
        condition::set(
            &mut status.conditions,
            condition::READY,
            condition::STATUS_TRUE,
            "ManagerQuerySucceeded",
            "",
        );
        status.state = BMCState::Enabled;
        status.manufacturer = manager.manufacturer;
        status.model = manager.model;
        status.sku = manager.sku;
        status.serial_number = manager.serial_number;
        status.firmware_version = manager.firmware_version;
        status.power_state = match manager.power_state {
            Some(PowerState::On) => ServerPowerState::On,
            Some(PowerState::Off) => ServerPowerState::Off,
            None => ServerPowerState::Unknown,
        };
        self.resolve_addresses(&bmc, &mut status).await?;

        bmc.status = Some(status);
        let bmc = self.ctx.store.update_status(&bmc).await?;

        self.ensure_servers(&bmc, client.as_ref()).await?;

        if let Some(Operation::GracefulRestartBmc) = Operation::from_meta(&bmc.metadata) {
            tracing::info!(bmc = %name, "user requested BMC restart");
            return self
                .initiate_reset(bmc, Some(client), reason::USER_RESET_REQUESTED, true)
                .await;
        }
        Ok(Reconciled::requeue_after(self.ctx.cfg.resync_interval))
    }

    async fn resolve_addresses(
        &self,
        bmc: &BMC,
        status: &mut model::bmc::BMCStatus,
    ) -> Result<(), ReconcileError> {
        if let Some(access) = &bmc.spec.access {
            status.ip = Some(access.address.clone());
            status.mac_address = access.mac_address.clone();
        } else if let Some(endpoint_ref) = &bmc.spec.endpoint_ref {
            if let Some(endpoint) = self
                .ctx
                .store
                .get::<model::endpoint::Endpoint>(&endpoint_ref.name)
                .await?
            {
                status.ip = Some(endpoint.spec.ip);
                status.mac_address = Some(endpoint.spec.mac_address);
            }
        }
        Ok(())
    }

    /// One Server object per system URI discovered behind the BMC, owned
    /// by it.
    async fn ensure_servers(&self, bmc: &BMC, client: &dyn RedfishClient) -> Result<(), ReconcileError> {
        let bmc_name = bmc.metadata.name.clone().unwrap_or_default();
        let systems = client.systems().await?;
        let servers: Vec<Server> = self.ctx.store.list().await?;

        for system in &systems {
            let known = servers
                .iter()
                .any(|s| s.spec.bmc_ref.name == bmc_name && s.spec.system_uri == system.uri);
            if known {
                continue;
            }
            let uuid = system.uuid.to_lowercase();
            let suffix: String = uuid.chars().take(8).collect();
            let server_name = format!("{bmc_name}-{suffix}");
            let mut server = Server::new(
                &server_name,
                ServerSpec {
                    uuid,
                    system_uri: system.uri.clone(),
                    bmc_ref: ObjectReference::new(&bmc_name),
                    ..Default::default()
                },
            );
            server.metadata.owner_references = bmc.controller_owner_ref(&()).map(|r| vec![r]);
            match self.ctx.store.create(&server).await {
                Ok(_) => {
                    tracing::info!(bmc = %bmc_name, server = %server_name, "discovered system")
                }
                // Lost a race against a parallel discovery; the object is
                // there, which is all we need.
                Err(StoreError::Api(message)) if message.contains("already exists") => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn probe_failed(&self, mut bmc: BMC, err: RedfishError) -> ReconcileResult {
        let name = bmc.metadata.name.clone().unwrap_or_default();
        let failure_reason = match err.status() {
            Some(401) => reason::AUTHENTICATION_FAILED,
            Some(500) => reason::INTERNAL_SERVER_ERROR,
            Some(503) => reason::CONNECTION_FAILED,
            Some(_) => reason::UNKNOWN_ERROR,
            None => match &err {
                RedfishError::Transport { .. } => reason::CONNECTION_FAILED,
                // Structural errors say nothing about the BMC's liveness;
                // Ready keeps whatever it said before.
                _ => {
                    tracing::warn!(bmc = %name, error = %err, "probe failed structurally");
                    return Ok(Reconciled::requeue_after(self.ctx.cfg.bmc_client_retry_interval));
                }
            },
        };

        let mut status = bmc.status.clone().unwrap_or_default();
        condition::set(
            &mut status.conditions,
            condition::READY,
            condition::STATUS_FALSE,
            failure_reason,
            &err.to_string(),
        );
        status.state = BMCState::Pending;

        // Sustained server-side failure triggers an automatic reset. The
        // Ready transition time is stable across repeated failures, so it
        // measures how long the BMC has been broken.
        let sustained = condition::find(&status.conditions, condition::READY)
            .filter(|ready| {
                ready.reason == reason::INTERNAL_SERVER_ERROR
                    || ready.reason == reason::CONNECTION_FAILED
            })
            .map(|ready| Utc::now().signed_duration_since(ready.last_transition_time.0))
            .zip(chrono::Duration::from_std(self.ctx.cfg.bmc_failure_reset_delay).ok())
            .is_some_and(|(elapsed, delay)| elapsed > delay);

        bmc.status = Some(status);
        let bmc = self.ctx.store.update_status(&bmc).await?;

        if sustained {
            tracing::warn!(bmc = %name, reason = failure_reason, "sustained failure, auto-resetting");
            return self.initiate_reset(bmc, None, reason::AUTO_RESETTING, false).await;
        }
        Ok(Reconciled::requeue_after(self.ctx.cfg.bmc_client_retry_interval))
    }

    /// Marks the reset in flight, then attempts a GracefulRestart. A
    /// server-side or transport failure leaves the reset pending on the
    /// assumption the controller accepted it; a structural failure keeps
    /// the BMC Pending and surfaces the error.
    async fn initiate_reset(
        &self,
        mut bmc: BMC,
        client: Option<Arc<dyn RedfishClient>>,
        trigger: &str,
        consume_annotation: bool,
    ) -> ReconcileResult {
        let mut status = bmc.status.clone().unwrap_or_default();
        condition::set(
            &mut status.conditions,
            condition::RESET,
            condition::STATUS_TRUE,
            trigger,
            "",
        );
        status.state = BMCState::Pending;
        status.last_reset_time = Some(Time(Utc::now()));
        bmc.status = Some(status);
        let mut bmc = self.ctx.store.update_status(&bmc).await?;

        if consume_annotation && annotations::clear_operation(&mut bmc.metadata) {
            bmc = self.ctx.store.update(&bmc).await?;
        }

        let result = match client {
            Some(client) => client.reset_manager(ResetType::GracefulRestart).await,
            None => match client::connect(&self.ctx.store, &self.ctx.clients, &bmc).await {
                Ok(client) => client.reset_manager(ResetType::GracefulRestart).await,
                Err(ReconcileError::Redfish(err)) => Err(err),
                Err(other) => return Err(other),
            },
        };

        match result {
            Ok(()) => Ok(Reconciled::requeue_after(self.ctx.cfg.bmc_client_retry_interval)),
            Err(err) if err.is_transient() => {
                // The BMC is already half-dead; if a platform fallback is
                // wired, it gets a chance now.
                if let Some(fallback) = &self.fallback {
                    fallback.reset(&bmc).await?;
                } else {
                    tracing::debug!(
                        bmc = bmc.metadata.name.as_deref().unwrap_or_default(),
                        error = %err,
                        "reset not confirmed, leaving it pending"
                    );
                }
                Ok(Reconciled::requeue_after(self.ctx.cfg.bmc_client_retry_interval))
            }
            Err(err) => Err(err.into()),
        }
    }
}
