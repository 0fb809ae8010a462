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

//! In-memory [`Store`] for the test suite
//!
//! Emulates the cluster behaviors the reconcilers depend on: optimistic
//! concurrency, generateName, the status subresource split,
//! finalizer-gated deletion and controller-owner cascade deletion.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::{Store, StoreError, StoreObject, kind_of};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, String), serde_json::Value>,
    revision: u64,
    generated: u64,
}

impl Inner {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn remove_and_cascade(&mut self, key: &(String, String)) {
        let Some(removed) = self.objects.remove(key) else {
            return;
        };
        let Some(uid) = removed["metadata"]["uid"].as_str().map(str::to_string) else {
            return;
        };
        // Controller-owned dependents go down with their owner.
        let owned: Vec<(String, String)> = self
            .objects
            .iter()
            .filter(|(_, value)| {
                value["metadata"]["ownerReferences"]
                    .as_array()
                    .is_some_and(|refs| {
                        refs.iter().any(|r| {
                            r["uid"].as_str() == Some(&uid)
                                && r["controller"].as_bool().unwrap_or(false)
                        })
                    })
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in owned {
            self.delete_value(&key);
        }
    }

    fn delete_value(&mut self, key: &(String, String)) {
        let Some(value) = self.objects.get_mut(key) else {
            return;
        };
        let has_finalizers = value["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            if value["metadata"]["deletionTimestamp"].is_null() {
                value["metadata"]["deletionTimestamp"] =
                    serde_json::Value::from(Utc::now().to_rfc3339());
                let revision = self.next_revision();
                self.objects.get_mut(key).expect("object present")["metadata"]
                    ["resourceVersion"] = serde_json::Value::from(revision);
            }
        } else {
            self.remove_and_cascade(key);
        }
    }
}

impl MemoryStore {
    fn key<K: StoreObject>(name: &str) -> (String, String) {
        (kind_of::<K>(), name.to_string())
    }

    fn to_value<K: StoreObject>(object: &K) -> Result<serde_json::Value, StoreError> {
        serde_json::to_value(object).map_err(|err| StoreError::Api(err.to_string()))
    }

    fn from_value<K: StoreObject>(value: serde_json::Value) -> Result<K, StoreError> {
        serde_json::from_value(value).map_err(|err| StoreError::Api(err.to_string()))
    }

    fn check_revision<K: StoreObject>(
        name: &str,
        incoming: &serde_json::Value,
        stored: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let incoming_revision = incoming["metadata"]["resourceVersion"].as_str();
        let stored_revision = stored["metadata"]["resourceVersion"].as_str();
        match incoming_revision {
            None => Ok(()),
            Some(revision) if Some(revision) == stored_revision => Ok(()),
            Some(_) => Err(StoreError::Conflict {
                kind: kind_of::<K>(),
                name: name.to_string(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get<K: StoreObject>(&self, name: &str) -> Result<Option<K>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        inner
            .objects
            .get(&Self::key::<K>(name))
            .cloned()
            .map(Self::from_value)
            .transpose()
    }

    async fn list<K: StoreObject>(&self) -> Result<Vec<K>, StoreError> {
        let kind = kind_of::<K>();
        let inner = self.inner.lock().expect("memory store lock poisoned");
        inner
            .objects
            .iter()
            .filter(|((stored_kind, _), _)| *stored_kind == kind)
            .map(|(_, value)| Self::from_value(value.clone()))
            .collect()
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let mut value = Self::to_value(object)?;
        let mut inner = self.inner.lock().expect("memory store lock poisoned");

        let name = match value["metadata"]["name"].as_str() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => match value["metadata"]["generateName"].as_str() {
                Some(prefix) if !prefix.is_empty() => {
                    inner.generated += 1;
                    format!("{prefix}{:05}", inner.generated)
                }
                _ => return Err(StoreError::MissingName),
            },
        };
        let key = (kind_of::<K>(), name.clone());
        if inner.objects.contains_key(&key) {
            return Err(StoreError::Api(format!("{}/{name} already exists", key.0)));
        }

        value["metadata"]["name"] = serde_json::Value::from(name);
        value["metadata"]["uid"] = serde_json::Value::from(uuid::Uuid::new_v4().to_string());
        value["metadata"]["creationTimestamp"] = serde_json::Value::from(Utc::now().to_rfc3339());
        let revision = inner.next_revision();
        value["metadata"]["resourceVersion"] = serde_json::Value::from(revision);

        inner.objects.insert(key, value.clone());
        Self::from_value(value)
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let incoming = Self::to_value(object)?;
        let name = incoming["metadata"]["name"]
            .as_str()
            .ok_or(StoreError::MissingName)?
            .to_string();
        let key = Self::key::<K>(&name);
        let mut inner = self.inner.lock().expect("memory store lock poisoned");

        let stored = inner.objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound {
            kind: kind_of::<K>(),
            name: name.clone(),
        })?;
        Self::check_revision::<K>(&name, &incoming, &stored)?;

        let mut value = incoming;
        // The status subresource is not writable through the main
        // resource, and identity/deletion fields are immutable.
        value["status"] = stored["status"].clone();
        value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        value["metadata"]["creationTimestamp"] = stored["metadata"]["creationTimestamp"].clone();
        value["metadata"]["deletionTimestamp"] = stored["metadata"]["deletionTimestamp"].clone();
        let revision = inner.next_revision();
        value["metadata"]["resourceVersion"] = serde_json::Value::from(revision);

        inner.objects.insert(key.clone(), value.clone());

        // Clearing the last finalizer on a deleting object completes the
        // deletion.
        let deleting = !value["metadata"]["deletionTimestamp"].is_null();
        let has_finalizers = value["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|f| !f.is_empty());
        if deleting && !has_finalizers {
            inner.remove_and_cascade(&key);
        }
        Self::from_value(value)
    }

    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let incoming = Self::to_value(object)?;
        let name = incoming["metadata"]["name"]
            .as_str()
            .ok_or(StoreError::MissingName)?
            .to_string();
        let key = Self::key::<K>(&name);
        let mut inner = self.inner.lock().expect("memory store lock poisoned");

        let stored = inner.objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound {
            kind: kind_of::<K>(),
            name: name.clone(),
        })?;
        Self::check_revision::<K>(&name, &incoming, &stored)?;

        let mut value = stored;
        value["status"] = incoming["status"].clone();
        let revision = inner.next_revision();
        value["metadata"]["resourceVersion"] = serde_json::Value::from(revision);
        inner.objects.insert(key, value.clone());
        Self::from_value(value)
    }

    async fn delete<K: StoreObject>(&self, name: &str) -> Result<(), StoreError> {
        let key = Self::key::<K>(name);
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.delete_value(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use model::server_maintenance::{ServerMaintenance, ServerMaintenanceSpec};

    use super::*;

    fn lease(name: &str) -> ServerMaintenance {
        ServerMaintenance::new(name, ServerMaintenanceSpec::default())
    }

    #[tokio::test]
    async fn create_assigns_identity() {
        let store = MemoryStore::default();
        let created = store.create(&lease("window")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        let fetched: Option<ServerMaintenance> = store.get("window").await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn generate_name_produces_distinct_names() {
        let store = MemoryStore::default();
        let mut template = lease("");
        template.metadata.name = None;
        template.metadata.generate_name = Some("upgrade-".to_string());
        let first = store.create(&template).await.unwrap();
        let second = store.create(&template).await.unwrap();
        assert_ne!(first.metadata.name, second.metadata.name);
        assert!(first.metadata.name.unwrap().starts_with("upgrade-"));
    }

    #[tokio::test]
    async fn stale_write_conflicts() {
        let store = MemoryStore::default();
        let created = store.create(&lease("window")).await.unwrap();
        let mut fresh = created.clone();
        fresh.spec.reason = Some("first".to_string());
        store.update(&fresh).await.unwrap();

        let mut stale = created;
        stale.spec.reason = Some("second".to_string());
        match store.update(&stale).await {
            Err(StoreError::Conflict { .. }) => {}
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finalizer_gates_deletion() {
        let store = MemoryStore::default();
        let mut object = lease("gated");
        object.metadata.finalizers = Some(vec!["metal.ironcore.dev/test".to_string()]);
        store.create(&object).await.unwrap();

        store.delete::<ServerMaintenance>("gated").await.unwrap();
        let deleting: ServerMaintenance = store.get("gated").await.unwrap().expect("still present");
        assert!(deleting.metadata.deletion_timestamp.is_some());

        let mut cleared = deleting;
        cleared.metadata.finalizers = Some(vec![]);
        store.update(&cleared).await.unwrap();
        assert!(store.get::<ServerMaintenance>("gated").await.unwrap().is_none());
    }
}
