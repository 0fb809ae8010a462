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

//! Cross-resource watch mappers
//!
//! Each reconciler registers triggers on objects it does not own. The
//! mappers run on every watch event, so they are cheap lookups against
//! reflector stores, and they drop events that cannot affect an in-flight
//! reconcile: quiescent servers produce no enqueues, and settled firmware
//! objects (Applied, Completed, Failed) are not re-triggered by their
//! collaborators — their drift checks ride on periodic requeues instead.

use kube::runtime::reflector::{ObjectRef, Store};
use model::bios_settings::{BIOSSettings, SettingsState};
use model::bios_version::{BIOSVersion, FirmwareState};
use model::bmc::BMC;
use model::bmc_secret::BMCSecret;
use model::bmc_settings::BMCSettings;
use model::endpoint::Endpoint;
use model::server::{Server, ServerState};

/// Server states that cannot unblock any firmware phase.
fn server_quiescent(server: &Server) -> bool {
    matches!(
        server.status.as_ref().map(|s| s.state),
        None | Some(ServerState::Initial) | Some(ServerState::Discovery) | Some(ServerState::Error)
    )
}

fn settings_active(settings: &BIOSSettings) -> bool {
    !matches!(
        settings.status.as_ref().map(|s| s.state),
        Some(SettingsState::Applied) | Some(SettingsState::Failed)
    )
}

fn bmc_settings_active(settings: &BMCSettings) -> bool {
    !matches!(
        settings.status.as_ref().map(|s| s.state),
        Some(SettingsState::Applied) | Some(SettingsState::Failed)
    )
}

fn version_active(version: &BIOSVersion) -> bool {
    !matches!(
        version.status.as_ref().map(|s| s.state),
        Some(FirmwareState::Completed) | Some(FirmwareState::Failed)
    )
}

/// Server changes (maintenance granted, power observed) re-trigger the
/// BIOSSettings claiming it.
pub fn bios_settings_for_server(
    bios_settings: &Store<BIOSSettings>,
    server: &Server,
) -> Vec<ObjectRef<BIOSSettings>> {
    if server_quiescent(server) {
        return Vec::new();
    }
    server
        .spec
        .bios_settings_ref
        .iter()
        .map(|r| ObjectRef::new(&r.name))
        .filter(|r| bios_settings.get(r).is_none_or(|s| settings_active(&s)))
        .collect()
}

/// BMC changes (reset finished, Ready flipped) re-trigger the settings of
/// every claimed server behind it.
pub fn bios_settings_for_bmc(
    servers: &Store<Server>,
    bios_settings: &Store<BIOSSettings>,
    bmc: &BMC,
) -> Vec<ObjectRef<BIOSSettings>> {
    let Some(bmc_name) = bmc.metadata.name.as_deref() else {
        return Vec::new();
    };
    servers
        .state()
        .iter()
        .filter(|server| server.spec.bmc_ref.name == bmc_name && !server_quiescent(server))
        .flat_map(|server| server.spec.bios_settings_ref.clone())
        .map(|r| ObjectRef::new(&r.name))
        .filter(|r| bios_settings.get(r).is_none_or(|s| settings_active(&s)))
        .collect()
}

/// A completed BIOS upgrade unblocks the settings waiting on the version
/// gate.
pub fn bios_settings_for_bios_version(
    servers: &Store<Server>,
    bios_settings: &Store<BIOSSettings>,
    bios_version: &BIOSVersion,
) -> Vec<ObjectRef<BIOSSettings>> {
    let server_ref = ObjectRef::new(&bios_version.spec.server_ref.name);
    servers
        .get(&server_ref)
        .into_iter()
        .filter(|server| !server_quiescent(server))
        .flat_map(|server| server.spec.bios_settings_ref.clone())
        .map(|r| ObjectRef::new(&r.name))
        .filter(|r| bios_settings.get(r).is_none_or(|s| settings_active(&s)))
        .collect()
}

/// Server changes re-trigger the upgrades targeting it.
pub fn bios_versions_for_server(
    bios_versions: &Store<BIOSVersion>,
    server: &Server,
) -> Vec<ObjectRef<BIOSVersion>> {
    let Some(server_name) = server.metadata.name.as_deref() else {
        return Vec::new();
    };
    if server_quiescent(server) {
        return Vec::new();
    }
    bios_versions
        .state()
        .iter()
        .filter(|v| v.spec.server_ref.name == server_name && version_active(v))
        .filter_map(|v| v.metadata.name.as_deref().map(ObjectRef::new))
        .collect()
}

pub fn bios_versions_for_bmc(
    servers: &Store<Server>,
    bios_versions: &Store<BIOSVersion>,
    bmc: &BMC,
) -> Vec<ObjectRef<BIOSVersion>> {
    let Some(bmc_name) = bmc.metadata.name.as_deref() else {
        return Vec::new();
    };
    let behind: Vec<String> = servers
        .state()
        .iter()
        .filter(|server| server.spec.bmc_ref.name == bmc_name && !server_quiescent(server))
        .filter_map(|server| server.metadata.name.clone())
        .collect();
    bios_versions
        .state()
        .iter()
        .filter(|v| behind.iter().any(|s| *s == v.spec.server_ref.name) && version_active(v))
        .filter_map(|v| v.metadata.name.as_deref().map(ObjectRef::new))
        .collect()
}

/// BMC changes carry both readiness and the observed BMC firmware
/// version, so they cover the BMC-level version gate as well.
pub fn bmc_settings_for_bmc(
    bmc_settings: &Store<BMCSettings>,
    bmc: &BMC,
) -> Vec<ObjectRef<BMCSettings>> {
    let Some(bmc_name) = bmc.metadata.name.as_deref() else {
        return Vec::new();
    };
    bmc_settings
        .state()
        .iter()
        .filter(|s| s.spec.bmc_ref.name == bmc_name && bmc_settings_active(s))
        .filter_map(|s| s.metadata.name.as_deref().map(ObjectRef::new))
        .collect()
}

pub fn bmc_settings_for_server(
    bmc_settings: &Store<BMCSettings>,
    server: &Server,
) -> Vec<ObjectRef<BMCSettings>> {
    if server_quiescent(server) {
        return Vec::new();
    }
    let bmc_name = server.spec.bmc_ref.name.clone();
    bmc_settings
        .state()
        .iter()
        .filter(|s| s.spec.bmc_ref.name == bmc_name && bmc_settings_active(s))
        .filter_map(|s| s.metadata.name.as_deref().map(ObjectRef::new))
        .collect()
}

pub fn bmcs_for_endpoint(bmcs: &Store<BMC>, endpoint: &Endpoint) -> Vec<ObjectRef<BMC>> {
    let Some(endpoint_name) = endpoint.metadata.name.as_deref() else {
        return Vec::new();
    };
    bmcs.state()
        .iter()
        .filter(|bmc| {
            bmc.spec
                .endpoint_ref
                .as_ref()
                .is_some_and(|r| r.name == endpoint_name)
        })
        .filter_map(|bmc| bmc.metadata.name.as_deref().map(ObjectRef::new))
        .collect()
}

pub fn bmcs_for_secret(bmcs: &Store<BMC>, secret: &BMCSecret) -> Vec<ObjectRef<BMC>> {
    let Some(secret_name) = secret.metadata.name.as_deref() else {
        return Vec::new();
    };
    bmcs.state()
        .iter()
        .filter(|bmc| bmc.spec.bmc_secret_ref.name == secret_name)
        .filter_map(|bmc| bmc.metadata.name.as_deref().map(ObjectRef::new))
        .collect()
}
