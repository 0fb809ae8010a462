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

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// Snapshot of a condition's observable fields at one point in time.
///
/// Long-poll phases record a checkpoint before refreshing a condition and
/// compare afterwards: an unchanged checkpoint across a poll means the
/// external operation made no measurable progress and the requeue backs
/// off. Store-durable by construction, so stall detection survives a
/// controller restart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    status: String,
    reason: String,
    message: String,
}

impl Checkpoint {
    pub fn of(condition: &Condition) -> Self {
        Self {
            status: condition.status.clone(),
            reason: condition.reason.clone(),
            message: condition.message.clone(),
        }
    }

    /// Whether any of (status, reason, message) differs from the snapshot.
    pub fn changed(&self, condition: &Condition) -> bool {
        self.status != condition.status
            || self.reason != condition.reason
            || self.message != condition.message
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use super::*;

    fn condition(message: &str) -> Condition {
        Condition {
            type_: "BIOSUpgradeCompleted".to_string(),
            status: "False".to_string(),
            reason: "UpgradeTaskRunning".to_string(),
            message: message.to_string(),
            last_transition_time: Time(chrono::Utc::now()),
            observed_generation: None,
        }
    }

    #[test]
    fn detects_progress_through_message_changes() {
        let at_40 = condition("task Running at 40%");
        let checkpoint = Checkpoint::of(&at_40);
        assert!(!checkpoint.changed(&at_40));
        assert!(checkpoint.changed(&condition("task Running at 55%")));
    }
}
