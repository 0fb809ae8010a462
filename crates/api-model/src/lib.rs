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

//! Describes the firmware operator's persistent data model
//!
//! Every type in this crate is stored in the cluster object store and is
//! therefore part of the operator's external interface. Data defined here
//! needs to be backward compatible with previous versions of the operator
//! that are deployed.
//!
//! The crate should only contain data definitions and associated helper
//! functions, but no actual business logic.

pub mod annotations;
pub mod bios_settings;
pub mod bios_version;
pub mod bmc;
pub mod bmc_secret;
pub mod bmc_settings;
pub mod condition;
pub mod endpoint;
pub mod reference;
pub mod server;
pub mod server_maintenance;

/// API group shared by all kinds managed by the operator.
pub const API_GROUP: &str = "metal.ironcore.dev";

/// Finalizer placed on firmware objects before their first external side
/// effect. Removal is gated on the object leaving `InProgress`.
pub const FIRMWARE_FINALIZER: &str = "metal.ironcore.dev/firmware-operator";
