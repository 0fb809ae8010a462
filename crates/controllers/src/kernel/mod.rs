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

//! Shared reconciliation substrate

pub mod bmc_reset;
pub mod checkpoint;
pub mod client;
pub mod maintenance;
pub mod power;

use std::time::Duration;

pub use checkpoint::Checkpoint;

/// How a reconcile invocation suspends. `Done` waits for the next watch
/// event; `RequeueAfter` schedules a re-invocation. These are the only two
/// ways to wait; no in-process timer outlasts an invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciled {
    Done,
    RequeueAfter(Duration),
}

impl Reconciled {
    pub fn done() -> Self {
        Reconciled::Done
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Reconciled::RequeueAfter(delay)
    }

    /// Re-enter as soon as the queue allows; used after a persisted state
    /// transition whose next phase can run immediately.
    pub fn requeue_now() -> Self {
        Reconciled::RequeueAfter(Duration::ZERO)
    }
}

/// Adds the firmware finalizer if absent, through the given update
/// closure's object. Returns whether the metadata changed.
pub fn ensure_finalizer(meta: &mut kube::core::ObjectMeta) -> bool {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if finalizers.iter().any(|f| f == model::FIRMWARE_FINALIZER) {
        false
    } else {
        finalizers.push(model::FIRMWARE_FINALIZER.to_string());
        true
    }
}

/// Removes the firmware finalizer. Returns whether it was present.
pub fn remove_finalizer(meta: &mut kube::core::ObjectMeta) -> bool {
    match meta.finalizers.as_mut() {
        Some(finalizers) => {
            let before = finalizers.len();
            finalizers.retain(|f| f != model::FIRMWARE_FINALIZER);
            finalizers.len() != before
        }
        None => false,
    }
}

pub fn has_finalizer(meta: &kube::core::ObjectMeta) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == model::FIRMWARE_FINALIZER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizer_round_trip() {
        let mut meta = kube::core::ObjectMeta::default();
        assert!(!has_finalizer(&meta));
        assert!(ensure_finalizer(&mut meta));
        assert!(!ensure_finalizer(&mut meta));
        assert!(has_finalizer(&meta));
        assert!(remove_finalizer(&mut meta));
        assert!(!remove_finalizer(&mut meta));
        assert!(!has_finalizer(&meta));
    }
}
