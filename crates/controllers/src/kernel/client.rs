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

//! Redfish client resolution for a BMC object

use std::sync::Arc;

use model::bmc::BMC;
use model::bmc_secret::BMCSecret;
use model::condition;
use model::endpoint::Endpoint;
use model::server::Server;
use redfish::{BmcEndpoint, ClientFactory, RedfishClient};

use crate::errors::ReconcileError;
use crate::store::Store;

/// Resolves a BMC's network endpoint and credentials from its references.
pub async fn bmc_endpoint<S: Store>(store: &S, bmc: &BMC) -> Result<BmcEndpoint, ReconcileError> {
    let bmc_name = bmc.metadata.name.as_deref().unwrap_or_default();
    let (address, port) = if let Some(access) = &bmc.spec.access {
        (access.address.clone(), access.port)
    } else if let Some(endpoint_ref) = &bmc.spec.endpoint_ref {
        let endpoint: Endpoint = store
            .get(&endpoint_ref.name)
            .await?
            .ok_or_else(|| ReconcileError::MissingReference(format!("Endpoint/{}", endpoint_ref.name)))?;
        (endpoint.spec.ip, None)
    } else {
        return Err(ReconcileError::InvalidObject(format!(
            "BMC/{bmc_name} has neither endpointRef nor access"
        )));
    };

    let secret_name = &bmc.spec.bmc_secret_ref.name;
    let secret: BMCSecret = store
        .get(secret_name)
        .await?
        .ok_or_else(|| ReconcileError::MissingReference(format!("BMCSecret/{secret_name}")))?;

    Ok(BmcEndpoint {
        address,
        port,
        username: secret.spec.username,
        password: secret.spec.password,
    })
}

/// Builds a connected client for a BMC.
pub async fn connect<S: Store>(
    store: &S,
    clients: &Arc<dyn ClientFactory>,
    bmc: &BMC,
) -> Result<Arc<dyn RedfishClient>, ReconcileError> {
    let endpoint = bmc_endpoint(store, bmc).await?;
    Ok(clients.connect(&endpoint).await?)
}

/// Whether the supervisor currently certifies this BMC as usable.
pub fn bmc_ready(bmc: &BMC) -> bool {
    bmc.status
        .as_ref()
        .is_some_and(|status| condition::is_true(&status.conditions, condition::READY))
}

/// Resolves a firmware object's server reference and the BMC behind it.
pub async fn server_and_bmc<S: Store>(
    store: &S,
    server_name: &str,
) -> Result<(Server, BMC), ReconcileError> {
    let server: Server = store
        .get(server_name)
        .await?
        .ok_or_else(|| ReconcileError::MissingReference(format!("Server/{server_name}")))?;
    let bmc_name = &server.spec.bmc_ref.name;
    let bmc: BMC = store
        .get(bmc_name)
        .await?
        .ok_or_else(|| ReconcileError::MissingReference(format!("BMC/{bmc_name}")))?;
    Ok((server, bmc))
}
