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

//! ServerMaintenance lease handling
//!
//! Firmware reconcilers never write power onto a Server. They create a
//! controller-owned lease, patch the desired power onto it, and let the
//! Server controller grant the lease and apply the power. Releasing is
//! deleting the lease and clearing the server's back-reference.

use kube::Resource;
use model::reference::{MaintenanceReference, ObjectReference};
use model::server::{Power, Server};
use model::server_maintenance::{MaintenancePolicy, ServerMaintenance, ServerMaintenanceSpec};

use crate::errors::ReconcileError;
use crate::store::Store;

/// Creates a lease owned by `owner` and returns its reference for the
/// owner's spec.
pub async fn create_lease<S, K>(
    store: &S,
    owner: &K,
    server_name: &str,
    policy: MaintenancePolicy,
    power: Power,
    reason: &str,
) -> Result<MaintenanceReference, ReconcileError>
where
    S: Store,
    K: Resource<DynamicType = ()>,
{
    let owner_name = owner.meta().name.clone().unwrap_or_default();
    let mut lease = ServerMaintenance::new(
        "",
        ServerMaintenanceSpec {
            policy,
            server_ref: ObjectReference::new(server_name),
            server_power: power,
            reason: Some(reason.to_string()),
        },
    );
    lease.metadata.name = None;
    lease.metadata.generate_name = Some(format!("{owner_name}-"));
    lease.metadata.owner_references = owner.controller_owner_ref(&()).map(|r| vec![r]);

    let created = store.create(&lease).await?;
    Ok(MaintenanceReference {
        name: created.metadata.name.unwrap_or_default(),
        uid: created.metadata.uid,
    })
}

/// Whether the server is in maintenance under exactly this lease.
pub fn granted(server: &Server, lease: &MaintenanceReference) -> bool {
    server.maintained_by(lease)
}

/// Patches the lease's desired power if it differs.
pub async fn request_power<S: Store>(
    store: &S,
    lease: &MaintenanceReference,
    power: Power,
) -> Result<(), ReconcileError> {
    let mut object: ServerMaintenance = store
        .get(&lease.name)
        .await?
        .ok_or_else(|| ReconcileError::MissingReference(format!("ServerMaintenance/{}", lease.name)))?;
    if object.spec.server_power != power {
        object.spec.server_power = power;
        store.update(&object).await?;
    }
    Ok(())
}

/// Deletes the lease if `owner_uid` controls it and clears the server's
/// back-reference. A lease the user provided (not controller-owned by us)
/// is left alone. Returns whether the lease was deleted.
pub async fn release<S: Store>(
    store: &S,
    owner_uid: &str,
    lease: &MaintenanceReference,
    server_name: &str,
) -> Result<bool, ReconcileError> {
    let mut deleted = false;
    if let Some(object) = store.get::<ServerMaintenance>(&lease.name).await? {
        let owned = object.metadata.owner_references.as_ref().is_some_and(|refs| {
            refs.iter()
                .any(|r| r.uid == owner_uid && r.controller.unwrap_or(false))
        });
        if owned {
            store.delete::<ServerMaintenance>(&lease.name).await?;
            deleted = true;
        }
    }

    if let Some(mut server) = store.get::<Server>(server_name).await? {
        let matches = server
            .spec
            .server_maintenance_ref
            .as_ref()
            .is_some_and(|current| current.name == lease.name);
        if matches && deleted {
            server.spec.server_maintenance_ref = None;
            store.update(&server).await?;
        }
    }
    Ok(deleted)
}
