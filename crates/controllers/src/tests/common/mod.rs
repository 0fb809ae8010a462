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

//! Test fixtures
//!
//! A [`TestEnv`] wires the four reconcilers to an in-memory store and
//! mock BMCs, and emulates the external Server controller (lease
//! granting, power application) so the firmware state machines can be
//! driven end to end without a cluster.

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use model::bios_settings::BIOSSettings;
use model::bios_version::BIOSVersion;
use model::bmc::{BMC, BMCSpec, InlineEndpoint};
use model::bmc_secret::{BMCSecret, BMCSecretSpec};
use model::bmc_settings::BMCSettings;
use model::condition;
use model::reference::{MaintenanceReference, ObjectReference};
use model::server::{Power, Server, ServerPowerState, ServerState};
use model::server_maintenance::{MaintenanceState, ServerMaintenance, ServerMaintenanceStatus};
use redfish::mock::{MockBmc, MockClientFactory};

use crate::Context;
use crate::bios_settings::BiosSettingsReconciler;
use crate::bios_version::BiosVersionReconciler;
use crate::bmc::BmcSupervisor;
use crate::bmc_settings::BmcSettingsReconciler;
use crate::cfg::ControllerConfig;
use crate::store::{MemoryStore, Store};

pub struct TestEnv {
    pub store: MemoryStore,
    pub redfish: MockClientFactory,
    pub ctx: Arc<Context<MemoryStore>>,
}

impl TestEnv {
    pub fn new() -> Self {
        let store = MemoryStore::default();
        let redfish = MockClientFactory::default();
        let ctx = Arc::new(Context {
            store: store.clone(),
            clients: Arc::new(redfish.clone()),
            cfg: ControllerConfig::default(),
        });
        Self { store, redfish, ctx }
    }

    pub fn supervisor(&self) -> BmcSupervisor<MemoryStore> {
        BmcSupervisor::new(self.ctx.clone())
    }

    pub fn bios_version_reconciler(&self) -> BiosVersionReconciler<MemoryStore> {
        BiosVersionReconciler::new(self.ctx.clone())
    }

    pub fn bios_settings_reconciler(&self) -> BiosSettingsReconciler<MemoryStore> {
        BiosSettingsReconciler::new(self.ctx.clone())
    }

    pub fn bmc_settings_reconciler(&self) -> BmcSettingsReconciler<MemoryStore> {
        BmcSettingsReconciler::new(self.ctx.clone())
    }

    /// Registers a mock BMC, creates its secret and BMC object, and runs
    /// the supervisor once so Ready is published and the server behind it
    /// is discovered.
    pub async fn create_bmc(&self, name: &str, bios_version: &str, bmc_version: &str) -> MockBmc {
        let mock = MockBmc::new(bios_version, bmc_version);
        self.redfish.register(name, mock.clone());

        let secret = BMCSecret::new(
            &format!("{name}-secret"),
            BMCSecretSpec {
                username: "admin".to_string(),
                password: "redfish-password".to_string(),
            },
        );
        self.store.create(&secret).await.unwrap();

        let bmc = BMC::new(
            name,
            BMCSpec {
                access: Some(InlineEndpoint {
                    address: name.to_string(),
                    port: None,
                    mac_address: None,
                }),
                bmc_secret_ref: ObjectReference::new(format!("{name}-secret")),
                endpoint_ref: None,
                console_protocol: None,
            },
        );
        self.store.create(&bmc).await.unwrap();
        self.supervisor().reconcile(name).await.unwrap();
        mock
    }

    pub async fn get_bmc(&self, name: &str) -> BMC {
        self.store.get(name).await.unwrap().expect("BMC exists")
    }

    pub async fn get_bios_version(&self, name: &str) -> BIOSVersion {
        self.store.get(name).await.unwrap().expect("BIOSVersion exists")
    }

    pub async fn get_bios_settings(&self, name: &str) -> BIOSSettings {
        self.store.get(name).await.unwrap().expect("BIOSSettings exists")
    }

    pub async fn get_bmc_settings(&self, name: &str) -> BMCSettings {
        self.store.get(name).await.unwrap().expect("BMCSettings exists")
    }

    /// The Server the supervisor discovered behind the given BMC.
    pub async fn server_of(&self, bmc_name: &str) -> Server {
        self.store
            .list::<Server>()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.spec.bmc_ref.name == bmc_name)
            .expect("server discovered behind BMC")
    }

    pub async fn maintenances(&self) -> Vec<ServerMaintenance> {
        self.store.list().await.unwrap()
    }

    /// Backdates a BMC status condition so wall-clock windows (reset
    /// wait, sustained failure) elapse without sleeping.
    pub async fn backdate_bmc_condition(&self, bmc_name: &str, condition_type: &str, seconds: i64) {
        let mut bmc = self.get_bmc(bmc_name).await;
        let Some(status) = bmc.status.as_mut() else {
            return;
        };
        if let Some(cond) = status
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition_type)
        {
            cond.last_transition_time = Time(Utc::now() - chrono::Duration::seconds(seconds));
            self.store.update_status(&bmc).await.unwrap();
        }
    }

    /// Expires any in-flight reset window so the supervisor's next probe
    /// can conclude it.
    pub async fn expire_reset_window(&self, bmc_name: &str) {
        let wait = self.ctx.cfg.bmc_reset_wait_time.as_secs() as i64;
        self.backdate_bmc_condition(bmc_name, condition::RESET, wait + 5).await;
    }

    /// Emulates the Server controller: grants pending leases, applies
    /// requested power through the mock BMC (staged BIOS changes take
    /// effect on every off→on edge), and returns released servers to
    /// Available.
    pub async fn run_server_controller(&self) {
        let leases: Vec<ServerMaintenance> = self.store.list().await.unwrap();
        for lease in &leases {
            if lease.metadata.deletion_timestamp.is_some() {
                continue;
            }
            let Some(server) = self
                .store
                .get::<Server>(&lease.spec.server_ref.name)
                .await
                .unwrap()
            else {
                continue;
            };
            let lease_ref = MaintenanceReference {
                name: lease.metadata.name.clone().unwrap_or_default(),
                uid: lease.metadata.uid.clone(),
            };

            let current = server.spec.server_maintenance_ref.clone();
            match current {
                None => self.grant(server, lease, &lease_ref).await,
                Some(current) if current == lease_ref => {
                    self.apply_power(&server, lease.spec.server_power).await;
                }
                // Another lease holds the server; this one waits.
                Some(_) => {}
            }
        }

        // Servers whose granting lease is gone leave maintenance.
        let servers: Vec<Server> = self.store.list().await.unwrap();
        for mut server in servers {
            let in_maintenance = server
                .status
                .as_ref()
                .is_some_and(|s| s.state == ServerState::Maintenance);
            if !in_maintenance {
                continue;
            }
            let lease_alive = match &server.spec.server_maintenance_ref {
                Some(r) => self
                    .store
                    .get::<ServerMaintenance>(&r.name)
                    .await
                    .unwrap()
                    .is_some(),
                None => false,
            };
            if !lease_alive {
                server.spec.server_maintenance_ref = None;
                let mut server = self.store.update(&server).await.unwrap();
                let mut status = server.status.clone().unwrap_or_default();
                status.state = ServerState::Available;
                server.status = Some(status);
                self.store.update_status(&server).await.unwrap();
            }
        }
    }

    async fn grant(&self, server: Server, lease: &ServerMaintenance, lease_ref: &MaintenanceReference) {
        let mut server = server;
        server.spec.server_maintenance_ref = Some(lease_ref.clone());
        let mut server = self.store.update(&server).await.unwrap();
        let mut status = server.status.clone().unwrap_or_default();
        status.state = ServerState::Maintenance;
        server.status = Some(status);
        let server = self.store.update_status(&server).await.unwrap();

        let mut lease = lease.clone();
        lease.status = Some(ServerMaintenanceStatus {
            state: MaintenanceState::InMaintenance,
        });
        self.store.update_status(&lease).await.unwrap();

        self.apply_power(&server, lease.spec.server_power).await;
    }

    async fn apply_power(&self, server: &Server, desired: Power) {
        let target = match desired {
            Power::On => ServerPowerState::On,
            Power::Off => ServerPowerState::Off,
        };
        let current = server
            .status
            .as_ref()
            .map(|s| s.power_state)
            .unwrap_or_default();
        if current == target {
            return;
        }
        if target == ServerPowerState::On {
            // Power-on edge: staged BIOS settings and firmware take
            // effect now.
            if let Some(mock) = self.redfish.get(&server.spec.bmc_ref.name) {
                mock.complete_reboot();
            }
        }
        let mut server = server.clone();
        let mut status = server.status.clone().unwrap_or_default();
        status.power_state = target;
        server.status = Some(status);
        self.store.update_status(&server).await.unwrap();
    }

    /// One scheduling round: the reconciler under test, then the
    /// supervisor (twice, with the reset window expired in between so
    /// annotation-driven resets conclude), then the Server controller.
    pub async fn step_bios_settings(&self, name: &str, bmc: &str) {
        self.bios_settings_reconciler().reconcile(name).await.unwrap();
        self.settle_bmc(bmc).await;
        self.run_server_controller().await;
    }

    pub async fn step_bios_version(&self, name: &str, bmc: &str) {
        self.bios_version_reconciler().reconcile(name).await.unwrap();
        self.settle_bmc(bmc).await;
        self.run_server_controller().await;
    }

    pub async fn step_bmc_settings(&self, name: &str, bmc: &str) {
        self.bmc_settings_reconciler().reconcile(name).await.unwrap();
        self.settle_bmc(bmc).await;
        self.run_server_controller().await;
    }

    async fn settle_bmc(&self, bmc: &str) {
        self.supervisor().reconcile(bmc).await.unwrap();
        self.expire_reset_window(bmc).await;
        self.supervisor().reconcile(bmc).await.unwrap();
    }

    pub async fn drive_bios_settings_until<F>(
        &self,
        name: &str,
        bmc: &str,
        steps: usize,
        predicate: F,
    ) -> BIOSSettings
    where
        F: Fn(&BIOSSettings) -> bool,
    {
        for _ in 0..steps {
            let object = self.get_bios_settings(name).await;
            if predicate(&object) {
                return object;
            }
            self.step_bios_settings(name, bmc).await;
        }
        let object = self.get_bios_settings(name).await;
        assert!(
            predicate(&object),
            "BIOSSettings did not reach the expected state; status: {:?}",
            object.status
        );
        object
    }

    pub async fn drive_bios_version_until<F>(
        &self,
        name: &str,
        bmc: &str,
        steps: usize,
        predicate: F,
    ) -> BIOSVersion
    where
        F: Fn(&BIOSVersion) -> bool,
    {
        for _ in 0..steps {
            let object = self.get_bios_version(name).await;
            if predicate(&object) {
                return object;
            }
            self.step_bios_version(name, bmc).await;
        }
        let object = self.get_bios_version(name).await;
        assert!(
            predicate(&object),
            "BIOSVersion did not reach the expected state; status: {:?}",
            object.status
        );
        object
    }

    pub async fn drive_bmc_settings_until<F>(
        &self,
        name: &str,
        bmc: &str,
        steps: usize,
        predicate: F,
    ) -> BMCSettings
    where
        F: Fn(&BMCSettings) -> bool,
    {
        for _ in 0..steps {
            let object = self.get_bmc_settings(name).await;
            if predicate(&object) {
                return object;
            }
            self.step_bmc_settings(name, bmc).await;
        }
        let object = self.get_bmc_settings(name).await;
        assert!(
            predicate(&object),
            "BMCSettings did not reach the expected state; status: {:?}",
            object.status
        );
        object
    }
}
