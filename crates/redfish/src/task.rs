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

//! Projection of Redfish Task resources

use serde::{Deserialize, Serialize};

/// Redfish TaskState values.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, Default,
)]
pub enum TaskState {
    New,
    Starting,
    Running,
    Suspended,
    Interrupted,
    Pending,
    Stopping,
    Completed,
    Killed,
    Exception,
    Cancelled,
    Service,
    #[serde(other)]
    #[default]
    Unknown,
}

/// Redfish health rollup as reported in a task's `TaskStatus` field.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, Default,
)]
pub enum TaskHealth {
    OK,
    Warning,
    Critical,
    #[serde(other)]
    #[default]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub health: TaskHealth,
    pub percent_complete: Option<i64>,
    pub messages: Vec<String>,
}

impl TaskStatus {
    /// Terminal failure: the task was aborted, or it finished with a
    /// non-OK health rollup.
    pub fn failed(&self) -> bool {
        matches!(
            self.state,
            TaskState::Killed | TaskState::Exception | TaskState::Cancelled
        ) || (self.state == TaskState::Completed && self.health != TaskHealth::OK)
    }

    pub fn completed(&self) -> bool {
        self.state == TaskState::Completed && self.health == TaskHealth::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        let mut task = TaskStatus {
            state: TaskState::Running,
            health: TaskHealth::OK,
            percent_complete: Some(40),
            messages: vec![],
        };
        assert!(!task.failed());
        assert!(!task.completed());

        task.state = TaskState::Exception;
        assert!(task.failed());

        task.state = TaskState::Completed;
        assert!(task.completed());

        task.health = TaskHealth::Critical;
        assert!(task.failed());
        assert!(!task.completed());
    }
}
