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

use crate::kernel::Reconciled;
use crate::store::StoreError;

/// Errors a reconcile invocation can return. Returning one requeues the
/// key with exponential backoff; terminal failures are written to the
/// object's status instead and return `Ok`.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Redfish(#[from] redfish::RedfishError),

    /// A cross-reference names an object that does not exist. Reported,
    /// not guessed at.
    #[error("missing reference: {0}")]
    MissingReference(String),

    /// The object violates an assumption that a watch cannot fix (e.g. a
    /// phase condition without its prerequisite data).
    #[error("invalid object state: {0}")]
    InvalidObject(String),
}

pub type ReconcileResult = Result<Reconciled, ReconcileError>;
