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

//! Controller wiring
//!
//! One cluster client, four controllers, shared context. Reverse lookups
//! for the cross-watch mappers come from reflector stores driven next to
//! the controllers.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::ResourceExt;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::reflector::Store as ReflectorStore;
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use model::bios_settings::BIOSSettings;
use model::bios_version::BIOSVersion;
use model::bmc::BMC;
use model::bmc_secret::BMCSecret;
use model::bmc_settings::BMCSettings;
use model::endpoint::Endpoint;
use model::server::Server;

use crate::bios_settings::BiosSettingsReconciler;
use crate::bios_version::BiosVersionReconciler;
use crate::bmc::BmcSupervisor;
use crate::bmc_settings::BmcSettingsReconciler;
use crate::cfg::ControllerConfig;
use crate::errors::ReconcileError;
use crate::kernel::Reconciled;
use crate::store::KubeStore;
use crate::{Context, watches};

type Ctx = Arc<Context<KubeStore>>;

pub async fn run(cfg: ControllerConfig) -> eyre::Result<()> {
    let client = kube::Client::try_default().await?;
    let clients: Arc<dyn redfish::ClientFactory> = Arc::new(redfish::http::HttpClientFactory {
        accept_invalid_certs: cfg.accept_invalid_certs,
        timeout: cfg.redfish_timeout,
    });
    let ctx: Ctx = Arc::new(Context {
        store: KubeStore::new(client.clone()),
        clients,
        cfg,
    });

    let servers = spawn_reflector::<Server>(client.clone());
    let bios_versions = spawn_reflector::<BIOSVersion>(client.clone());
    let bios_settings = spawn_reflector::<BIOSSettings>(client.clone());
    let bmc_settings = spawn_reflector::<BMCSettings>(client.clone());
    let bmcs = spawn_reflector::<BMC>(client.clone());

    let bmc_controller = {
        let bmcs_for_endpoints = bmcs.clone();
        let bmcs_for_secrets = bmcs;
        Controller::new(Api::<BMC>::all(client.clone()), watcher::Config::default())
            .watches(
                Api::<Endpoint>::all(client.clone()),
                watcher::Config::default(),
                move |endpoint| watches::bmcs_for_endpoint(&bmcs_for_endpoints, &endpoint),
            )
            .watches(
                Api::<BMCSecret>::all(client.clone()),
                watcher::Config::default(),
                move |secret| watches::bmcs_for_secret(&bmcs_for_secrets, &secret),
            )
            .shutdown_on_signal()
            .run(reconcile_bmc, error_policy, ctx.clone())
            .for_each(log_outcome)
    };

    let bios_version_controller = {
        let bios_versions_for_servers = bios_versions.clone();
        let servers_for_bmcs = servers.clone();
        let bios_versions_for_bmcs = bios_versions.clone();
        Controller::new(Api::<BIOSVersion>::all(client.clone()), watcher::Config::default())
            .watches(
                Api::<Server>::all(client.clone()),
                watcher::Config::default(),
                move |server| {
                    watches::bios_versions_for_server(&bios_versions_for_servers, &server)
                },
            )
            .watches(
                Api::<BMC>::all(client.clone()),
                watcher::Config::default(),
                move |bmc| {
                    watches::bios_versions_for_bmc(&servers_for_bmcs, &bios_versions_for_bmcs, &bmc)
                },
            )
            .shutdown_on_signal()
            .run(reconcile_bios_version, error_policy, ctx.clone())
            .for_each(log_outcome)
    };

    let bios_settings_controller = {
        let settings_for_servers = bios_settings.clone();
        let servers_for_bmcs = servers.clone();
        let settings_for_bmcs = bios_settings.clone();
        let servers_for_versions = servers.clone();
        let settings_for_versions = bios_settings;
        Controller::new(Api::<BIOSSettings>::all(client.clone()), watcher::Config::default())
            .watches(
                Api::<Server>::all(client.clone()),
                watcher::Config::default(),
                move |server| {
                    watches::bios_settings_for_server(&settings_for_servers, &server)
                },
            )
            .watches(
                Api::<BMC>::all(client.clone()),
                watcher::Config::default(),
                move |bmc| {
                    watches::bios_settings_for_bmc(&servers_for_bmcs, &settings_for_bmcs, &bmc)
                },
            )
            .watches(
                Api::<BIOSVersion>::all(client.clone()),
                watcher::Config::default(),
                move |version| {
                    watches::bios_settings_for_bios_version(
                        &servers_for_versions,
                        &settings_for_versions,
                        &version,
                    )
                },
            )
            .shutdown_on_signal()
            .run(reconcile_bios_settings, error_policy, ctx.clone())
            .for_each(log_outcome)
    };

    let bmc_settings_controller = {
        let settings_for_servers = bmc_settings.clone();
        let settings_for_bmcs = bmc_settings;
        Controller::new(Api::<BMCSettings>::all(client.clone()), watcher::Config::default())
            .watches(
                Api::<Server>::all(client.clone()),
                watcher::Config::default(),
                move |server| watches::bmc_settings_for_server(&settings_for_servers, &server),
            )
            .watches(
                Api::<BMC>::all(client.clone()),
                watcher::Config::default(),
                move |bmc| watches::bmc_settings_for_bmc(&settings_for_bmcs, &bmc),
            )
            .shutdown_on_signal()
            .run(reconcile_bmc_settings, error_policy, ctx.clone())
            .for_each(log_outcome)
    };

    tracing::info!("starting firmware controllers");
    tokio::join!(
        bmc_controller,
        bios_version_controller,
        bios_settings_controller,
        bmc_settings_controller,
    );
    Ok(())
}

fn spawn_reflector<K>(client: kube::Client) -> ReflectorStore<K>
where
    K: kube::Resource<DynamicType = (), Scope = k8s_openapi::ClusterResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
{
    let api = Api::<K>::all(client);
    let (reader, writer) = reflector::store();
    tokio::spawn(async move {
        let stream = reflector::reflector(
            writer,
            watcher(api, watcher::Config::default()).default_backoff(),
        )
        .touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            if let Err(err) = event {
                tracing::warn!(error = %err, "reflector stream error");
            }
        }
    });
    reader
}

async fn reconcile_bmc(object: Arc<BMC>, ctx: Ctx) -> Result<Action, ReconcileError> {
    let outcome = BmcSupervisor::new(ctx).reconcile(&object.name_any()).await?;
    Ok(to_action(outcome))
}

async fn reconcile_bios_version(
    object: Arc<BIOSVersion>,
    ctx: Ctx,
) -> Result<Action, ReconcileError> {
    let outcome = BiosVersionReconciler::new(ctx)
        .reconcile(&object.name_any())
        .await?;
    Ok(to_action(outcome))
}

async fn reconcile_bios_settings(
    object: Arc<BIOSSettings>,
    ctx: Ctx,
) -> Result<Action, ReconcileError> {
    let outcome = BiosSettingsReconciler::new(ctx)
        .reconcile(&object.name_any())
        .await?;
    Ok(to_action(outcome))
}

async fn reconcile_bmc_settings(
    object: Arc<BMCSettings>,
    ctx: Ctx,
) -> Result<Action, ReconcileError> {
    let outcome = BmcSettingsReconciler::new(ctx)
        .reconcile(&object.name_any())
        .await?;
    Ok(to_action(outcome))
}

fn to_action(outcome: Reconciled) -> Action {
    match outcome {
        Reconciled::Done => Action::await_change(),
        Reconciled::RequeueAfter(delay) => Action::requeue(delay),
    }
}

fn error_policy<K>(object: Arc<K>, error: &ReconcileError, _ctx: Ctx) -> Action
where
    K: kube::Resource<DynamicType = ()>,
{
    tracing::warn!(
        object = %object.name_any(),
        error = %error,
        "reconcile failed, requeueing"
    );
    Action::requeue(Duration::from_secs(30))
}

async fn log_outcome<K, E>(result: Result<(kube::runtime::reflector::ObjectRef<K>, Action), E>)
where
    K: kube::Resource,
    E: std::fmt::Display,
{
    match result {
        Ok((object, _)) => tracing::trace!(object = %object.name, "reconciled"),
        Err(err) => tracing::warn!(error = %err, "reconciliation error"),
    }
}
