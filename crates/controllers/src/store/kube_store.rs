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

use kube::api::{Api, DeleteParams, ListParams, PostParams};

use super::{Store, StoreError, StoreObject, kind_of};

/// [`Store`] over the cluster API. Replace semantics give us
/// resourceVersion compare-and-set on every write.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self) -> Api<K> {
        Api::all(self.client.clone())
    }
}

fn map_err<K: StoreObject>(name: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            kind: kind_of::<K>(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            kind: kind_of::<K>(),
            name: name.to_string(),
        },
        other => StoreError::Api(other.to_string()),
    }
}

fn name_of<K: StoreObject>(object: &K) -> Result<String, StoreError> {
    object.meta().name.clone().ok_or(StoreError::MissingName)
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get<K: StoreObject>(&self, name: &str) -> Result<Option<K>, StoreError> {
        self.api::<K>()
            .get_opt(name)
            .await
            .map_err(|err| map_err::<K>(name, err))
    }

    async fn list<K: StoreObject>(&self) -> Result<Vec<K>, StoreError> {
        let list = self
            .api::<K>()
            .list(&ListParams::default())
            .await
            .map_err(|err| map_err::<K>("*", err))?;
        Ok(list.items)
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        self.api::<K>()
            .create(&PostParams::default(), object)
            .await
            .map_err(|err| map_err::<K>(object.meta().name.as_deref().unwrap_or("<generated>"), err))
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let name = name_of(object)?;
        self.api::<K>()
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|err| map_err::<K>(&name, err))
    }

    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let name = name_of(object)?;
        let data = serde_json::to_vec(object)
            .map_err(|err| StoreError::Api(format!("serializing {}: {err}", kind_of::<K>())))?;
        self.api::<K>()
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|err| map_err::<K>(&name, err))
    }

    async fn delete<K: StoreObject>(&self, name: &str) -> Result<(), StoreError> {
        match self.api::<K>().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) => match map_err::<K>(name, err) {
                StoreError::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}
