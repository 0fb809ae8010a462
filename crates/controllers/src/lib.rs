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

//!
//! Firmware reconciliation controllers.
//!
//! Four reconcilers share one object store and one Redfish client factory:
//! the BMC supervisor, BIOSVersion, BIOSSettings and BMCSettings. Each is a
//! single-key, idempotent control function; every wait is a condition on
//! the object plus a watch, never an in-memory sleep.
//!

use std::sync::Arc;

pub mod bios_settings;
pub mod bios_version;
pub mod bmc;
pub mod bmc_settings;
pub mod cfg;
mod errors;
pub mod kernel;
pub mod logging;
pub mod run;
pub mod store;
#[cfg(test)]
mod tests;
pub mod watches;

pub use errors::{ReconcileError, ReconcileResult};

use crate::cfg::ControllerConfig;

/// Everything a reconciler needs: the object store, the Redfish client
/// factory and the timing knobs. One instance is shared by all four
/// controllers.
pub struct Context<S> {
    pub store: S,
    pub clients: Arc<dyn redfish::ClientFactory>,
    pub cfg: ControllerConfig,
}
