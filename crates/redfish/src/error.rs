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

/// Errors surfaced by a [`crate::RedfishClient`].
///
/// Controllers branch on two projections only: [`status`](Self::status)
/// for HTTP classification and [`is_fatal`](Self::is_fatal) for the
/// transient/fatal split. Everything not fatal is retried with backoff.
#[derive(Debug, thiserror::Error)]
pub enum RedfishError {
    /// The BMC answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}: {message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },

    /// The request never produced an HTTP response (refused, timed out,
    /// TLS failure).
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// The BMC answered 2xx but the payload did not parse into the
    /// expected shape.
    #[error("unexpected payload from {url}: {message}")]
    Payload { url: String, message: String },

    /// An attribute value outside the int/string/float vocabulary.
    #[error("attribute {key:?} has unsupported type: {value}")]
    UnsupportedAttributeType {
        key: String,
        value: serde_json::Value,
    },

    /// Settings rejected against the attribute registry; the payload
    /// carries the offending keys.
    #[error("invalid BIOS settings: {0:?}")]
    InvalidBiosSettings(Vec<String>),

    #[error("invalid BMC settings: {0:?}")]
    InvalidBmcSettings(Vec<String>),

    /// The firmware refused the update outright (as opposed to failing
    /// it later through the task).
    #[error("firmware update rejected: {0}")]
    UpdateRejected(String),

    #[error("resource not found: {0}")]
    NotFound(String),
}

impl RedfishError {
    /// The HTTP status of the failure, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RedfishError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Fatal errors terminate the operation; the user resumes via the
    /// retry annotation. Everything else is requeued.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RedfishError::InvalidBiosSettings(_)
                | RedfishError::InvalidBmcSettings(_)
                | RedfishError::UpdateRejected(_)
                | RedfishError::UnsupportedAttributeType { .. }
        )
    }

    /// Transient errors: transport failures and server-side HTTP errors.
    pub fn is_transient(&self) -> bool {
        match self {
            RedfishError::Transport { .. } => true,
            RedfishError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
