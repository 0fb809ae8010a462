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

//! Condition vocabulary and accessors
//!
//! Each reconciler phase is recorded as a typed condition on the object's
//! status (or on a per-group flow state). The type strings below are
//! externally observable and must not change.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

// Shared by all firmware reconcilers.
pub const SERVER_MAINTENANCE_CREATED: &str = "ServerMaintenanceCreated";
pub const SERVER_MAINTENANCE_DELETED: &str = "ServerMaintenanceDeleted";
pub const SERVER_POWER_ON: &str = "ServerPowerOnCondition";
pub const BMC_RESET_ISSUED: &str = "BMCResetIssued";
pub const REBOOT_POWER_OFF: &str = "RebootPowerOff";
pub const REBOOT_POWER_ON: &str = "RebootPowerOn";

// BIOS / BMC settings.
pub const BIOS_VERSION_UPDATE_PENDING: &str = "BIOSVersionUpdatePending";
pub const BIOS_SETTINGS_CHECK_PENDING_SETTINGS: &str = "BIOSSettingsCheckPendingSettings";
pub const BIOS_SETTINGS_DUPLICATE_KEYS: &str = "BIOSSettingsDuplicateKeys";
pub const BIOS_SETTING_UPDATE_START_TIME: &str = "BIOSSettingUpdateStartTime";
pub const BIOS_SETTINGS_TIMED_OUT: &str = "BIOSSettingsTimedOut";
pub const SETTINGS_UPDATE_ISSUED: &str = "SettingsUpdateIssued";
pub const UNKNOWN_PENDING_SETTING_STATE: &str = "UnknownPendingSettingState";
pub const SERVER_REBOOT_POST_UPDATE: &str = "ServerRebootPostUpdateHasBeenIssued";
pub const VERIFY_SETTINGS_POST_UPDATE: &str = "VerifySettingsPostUpdate";
pub const SETTINGS_PROVIDED_NOT_VALID: &str = "SettingsProvidedNotValid";

// BIOS version upgrade.
pub const BIOS_UPGRADE_ISSUED: &str = "BIOSUpgradeIssued";
pub const BIOS_UPGRADE_COMPLETED: &str = "BIOSUpgradeCompleted";
pub const BIOS_UPGRADE_POWER_ON: &str = "BIOSUpgradePowerOn";
pub const BIOS_UPGRADE_POWER_OFF: &str = "BIOSUpgradePowerOff";
pub const BIOS_UPGRADE_VERIFICATION: &str = "BIOSUpgradeVerification";

// BMC supervisor.
pub const RESET: &str = "Reset";
pub const READY: &str = "Ready";

pub mod reason {
    //! Reasons with externally observable literals.
    //!
    //! `BIOS_VERSION_NEEDS_UPGRADE` carries a historical typo that clients
    //! already match on; it stays as-is.

    pub const BIOS_PENDING_SETTINGS_FOUND: &str = "BIOSPendingSettingsFound";
    pub const BIOS_SETTINGS_DUPLICATE_KEYS_FOUND: &str = "BIOSSettingsDuplicateKeysFound";
    pub const BIOS_VERSION_NEEDS_UPGRADE: &str = "BIOSVersionNeedsTObeUpgraded";
    pub const BMC_VERSION_NEEDS_UPGRADE: &str = "BMCVersionNeedsToBeUpgraded";
    pub const BIOS_SETTINGS_TIMED_OUT_DURING_UPDATE: &str = "BIOSSettingsTimedOutDuringUpdate";
    pub const SETTINGS_PROVIDED_ARE_NOT_VALID: &str = "SettingsProvidedAreNotValid";
    pub const UNEXPECTED_PENDING_SETTINGS: &str = "UnexpectedPendingSettingsPostUpdateHasBeenIssued";
    pub const VERIFICATION_COMPLETED: &str = "VerificationCompleted";
    pub const REBOOT_REQUIRED: &str = "RebootRequired";
    pub const REBOOT_SKIPPED: &str = "RebootSkipped";

    pub const RESET_COMPLETE: &str = "ResetComplete";
    pub const AUTO_RESETTING: &str = "AutoResetting";
    pub const USER_RESET_REQUESTED: &str = "UserResetRequested";
    pub const AUTHENTICATION_FAILED: &str = "AuthenticationFailed";
    pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
    pub const CONNECTION_FAILED: &str = "ConnectionFailed";
    pub const UNKNOWN_ERROR: &str = "UnknownError";

    pub const UPGRADE_TASK_FAILED: &str = "UpgradeTaskFailed";
    pub const UPGRADE_TASK_COMPLETED: &str = "UpgradeTaskCompleted";
}

/// Looks up a condition by type.
pub fn find<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == condition_type)
}

/// Whether a condition exists with Status=True.
pub fn is_true(conditions: &[Condition], condition_type: &str) -> bool {
    find(conditions, condition_type).is_some_and(|c| c.status == STATUS_TRUE)
}

/// Whether a condition exists at all, regardless of status.
///
/// Phases use this to distinguish "never started" from "started but not
/// complete" (a condition created with Status=False).
pub fn exists(conditions: &[Condition], condition_type: &str) -> bool {
    find(conditions, condition_type).is_some()
}

/// Creates or updates a condition in place.
///
/// `last_transition_time` is only moved when the status value actually
/// transitions; updating reason or message alone keeps the original
/// timestamp so wall-clock phase timers stay anchored to the transition.
/// Returns whether anything changed.
pub fn set(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition_type) {
        Some(existing) => {
            if existing.status == status && existing.reason == reason && existing.message == message
            {
                return false;
            }
            if existing.status != status {
                existing.last_transition_time = Time(Utc::now());
            }
            existing.status = status.to_string();
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            true
        }
        None => {
            conditions.push(Condition {
                type_: condition_type.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Time(Utc::now()),
                observed_generation: None,
            });
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_preserves_transition_time_for_message_updates() {
        let mut conditions = Vec::new();
        assert!(set(&mut conditions, RESET, STATUS_TRUE, "Testing", "first"));
        let stamped = find(&conditions, RESET).unwrap().last_transition_time.clone();

        assert!(set(&mut conditions, RESET, STATUS_TRUE, "Testing", "second"));
        let unchanged = find(&conditions, RESET).unwrap();
        assert_eq!(unchanged.last_transition_time, stamped);
        assert_eq!(unchanged.message, "second");

        // No-op writes report no change.
        assert!(!set(&mut conditions, RESET, STATUS_TRUE, "Testing", "second"));
    }

    #[test]
    fn set_moves_transition_time_on_status_flip() {
        let mut conditions = Vec::new();
        set(&mut conditions, READY, STATUS_FALSE, "Probing", "");
        let first = find(&conditions, READY).unwrap().last_transition_time.clone();
        set(&mut conditions, READY, STATUS_TRUE, "Probing", "");
        let second = find(&conditions, READY).unwrap().last_transition_time.clone();
        assert!(second.0 >= first.0);
        assert!(is_true(&conditions, READY));
    }
}
