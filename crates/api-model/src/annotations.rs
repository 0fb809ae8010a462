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

//! Operator-facing annotation surface

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// The single annotation key through which operators steer reconciliation.
pub const OPERATION: &str = "metal.ironcore.dev/operation";

pub const OPERATION_IGNORE: &str = "ignore";
pub const OPERATION_RETRY_ON_FAILURE: &str = "retry-on-failure";
pub const OPERATION_GRACEFUL_RESTART_BMC: &str = "graceful-restart-bmc";

/// A recognized `metal.ironcore.dev/operation` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Skip reconciliation of this object entirely.
    Ignore,
    /// On objects in state Failed, reset to Pending and consume the
    /// annotation.
    RetryOnFailure,
    /// On BMC objects, trigger a graceful restart; consumed by the
    /// supervisor.
    GracefulRestartBmc,
}

impl Operation {
    pub fn from_meta(meta: &ObjectMeta) -> Option<Operation> {
        let value = meta.annotations.as_ref()?.get(OPERATION)?;
        match value.as_str() {
            OPERATION_IGNORE => Some(Operation::Ignore),
            OPERATION_RETRY_ON_FAILURE => Some(Operation::RetryOnFailure),
            OPERATION_GRACEFUL_RESTART_BMC => Some(Operation::GracefulRestartBmc),
            // Unrecognized values are operator typos; reconcilers treat
            // them as absent and log at the call site.
            _ => None,
        }
    }
}

/// Removes the operation annotation. Returns whether it was present.
pub fn clear_operation(meta: &mut ObjectMeta) -> bool {
    meta.annotations
        .as_mut()
        .is_some_and(|annotations| annotations.remove(OPERATION).is_some())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn meta_with(value: &str) -> ObjectMeta {
        ObjectMeta {
            annotations: Some(BTreeMap::from([(OPERATION.to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn recognizes_operations() {
        assert_eq!(Operation::from_meta(&meta_with("ignore")), Some(Operation::Ignore));
        assert_eq!(
            Operation::from_meta(&meta_with("retry-on-failure")),
            Some(Operation::RetryOnFailure)
        );
        assert_eq!(
            Operation::from_meta(&meta_with("graceful-restart-bmc")),
            Some(Operation::GracefulRestartBmc)
        );
        assert_eq!(Operation::from_meta(&meta_with("restart")), None);
        assert_eq!(Operation::from_meta(&ObjectMeta::default()), None);
    }

    #[test]
    fn clear_removes_annotation() {
        let mut meta = meta_with("ignore");
        assert!(clear_operation(&mut meta));
        assert_eq!(Operation::from_meta(&meta), None);
        assert!(!clear_operation(&mut meta));
    }
}
