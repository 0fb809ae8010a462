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

//! Object-store seam
//!
//! The trait defines how reconcilers load and persist objects; the
//! production implementation sits on the cluster API, the in-memory one
//! backs the test suite. All writes are compare-and-set on the object's
//! resourceVersion; a lost race surfaces as [`StoreError::Conflict`] and
//! is retried through the normal requeue path.

mod kube_store;
mod memory;

use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// Marker for kinds the store can hold: statically typed, cluster-scoped
/// resources.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = k8s_openapi::ClusterResourceScope>
    + Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = k8s_openapi::ClusterResourceScope>
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

pub(crate) fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).into_owned()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind}/{name} not found")]
    NotFound { kind: String, name: String },

    /// The write lost an optimistic-concurrency race.
    #[error("conflict writing {kind}/{name}")]
    Conflict { kind: String, name: String },

    #[error("object has no name")]
    MissingName,

    #[error("store error: {0}")]
    Api(String),
}

#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get<K: StoreObject>(&self, name: &str) -> Result<Option<K>, StoreError>;

    async fn list<K: StoreObject>(&self) -> Result<Vec<K>, StoreError>;

    /// Creates the object, honoring `metadata.generateName` when no name
    /// is set. Returns the stored object with name, uid and
    /// resourceVersion populated.
    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Replaces spec and metadata. Status is governed by the status
    /// subresource and is not touched by this call.
    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Replaces the status subresource only.
    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Requests deletion. Idempotent: deleting an absent object is `Ok`.
    /// Objects holding finalizers get a deletion timestamp and stay until
    /// the finalizers clear.
    async fn delete<K: StoreObject>(&self, name: &str) -> Result<(), StoreError>;
}
