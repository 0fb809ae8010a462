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

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::WrapErr;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

/// Command line of the operator binary.
#[derive(Debug, clap::Parser)]
#[command(name = "metal-operator", about = "Firmware reconciliation controllers")]
pub struct Options {
    /// Path to the TOML configuration file.
    #[arg(long, env = "METAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-d: debug, -dd: trace).
    #[arg(short = 'd', action = clap::ArgAction::Count)]
    pub debug: u8,
}

/// Timing knobs for the controllers. Every wait here is expressed as a
/// requeue delay; none of them is an in-process timer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// How long a BMC reset is assumed to be in flight. While the Reset
    /// condition is younger than this, the supervisor skips probing and
    /// discards new reset requests.
    #[serde(with = "humantime_serde")]
    pub bmc_reset_wait_time: Duration,

    /// How long Ready may stay False with a server-side reason before the
    /// supervisor auto-initiates a reset.
    #[serde(with = "humantime_serde")]
    pub bmc_failure_reset_delay: Duration,

    /// Requeue delay after a failed probe.
    #[serde(with = "humantime_serde")]
    pub bmc_client_retry_interval: Duration,

    /// Wall-clock budget for applying one BIOS settings group, measured
    /// from its start-time condition.
    #[serde(with = "humantime_serde")]
    pub settings_update_timeout: Duration,

    /// Poll cadence for Redfish upgrade tasks that are making progress.
    #[serde(with = "humantime_serde")]
    pub task_poll_interval: Duration,

    /// Poll cadence once a task checkpoint stops moving.
    #[serde(with = "humantime_serde")]
    pub task_stall_backoff: Duration,

    /// Requeue delay while waiting for a power state change to be
    /// observed on the server.
    #[serde(with = "humantime_serde")]
    pub power_wait_interval: Duration,

    /// Periodic re-probe cadence for healthy BMCs and drift detection on
    /// settled firmware objects.
    #[serde(with = "humantime_serde")]
    pub resync_interval: Duration,

    /// Accept self-signed BMC certificates.
    pub accept_invalid_certs: bool,

    /// Redfish HTTP timeout.
    #[serde(with = "humantime_serde")]
    pub redfish_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bmc_reset_wait_time: Duration::from_secs(5 * 60),
            bmc_failure_reset_delay: Duration::from_secs(10 * 60),
            bmc_client_retry_interval: Duration::from_secs(30),
            settings_update_timeout: Duration::from_secs(20 * 60),
            task_poll_interval: Duration::from_secs(30),
            task_stall_backoff: Duration::from_secs(2 * 60),
            power_wait_interval: Duration::from_secs(10),
            resync_interval: Duration::from_secs(10 * 60),
            accept_invalid_certs: true,
            redfish_timeout: Duration::from_secs(30),
        }
    }
}

/// Loads configuration: defaults, then the TOML file, then `METAL_*`
/// environment overrides.
pub fn load(path: Option<&Path>) -> eyre::Result<ControllerConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("METAL_"))
        .extract::<PartialConfig>()
        .map(PartialConfig::into_config)
        .wrap_err("loading controller configuration")
}

/// Figment needs every field optional to layer providers over defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialConfig {
    #[serde(with = "humantime_serde")]
    bmc_reset_wait_time: Option<Duration>,
    #[serde(with = "humantime_serde")]
    bmc_failure_reset_delay: Option<Duration>,
    #[serde(with = "humantime_serde")]
    bmc_client_retry_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    settings_update_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    task_poll_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    task_stall_backoff: Option<Duration>,
    #[serde(with = "humantime_serde")]
    power_wait_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    resync_interval: Option<Duration>,
    accept_invalid_certs: Option<bool>,
    #[serde(with = "humantime_serde")]
    redfish_timeout: Option<Duration>,
}

impl PartialConfig {
    fn into_config(self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        ControllerConfig {
            bmc_reset_wait_time: self.bmc_reset_wait_time.unwrap_or(defaults.bmc_reset_wait_time),
            bmc_failure_reset_delay: self
                .bmc_failure_reset_delay
                .unwrap_or(defaults.bmc_failure_reset_delay),
            bmc_client_retry_interval: self
                .bmc_client_retry_interval
                .unwrap_or(defaults.bmc_client_retry_interval),
            settings_update_timeout: self
                .settings_update_timeout
                .unwrap_or(defaults.settings_update_timeout),
            task_poll_interval: self.task_poll_interval.unwrap_or(defaults.task_poll_interval),
            task_stall_backoff: self.task_stall_backoff.unwrap_or(defaults.task_stall_backoff),
            power_wait_interval: self.power_wait_interval.unwrap_or(defaults.power_wait_interval),
            resync_interval: self.resync_interval.unwrap_or(defaults.resync_interval),
            accept_invalid_certs: self
                .accept_invalid_certs
                .unwrap_or(defaults.accept_invalid_certs),
            redfish_timeout: self.redfish_timeout.unwrap_or(defaults.redfish_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let config = load(None).unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn environment_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("METAL_BMC_RESET_WAIT_TIME", "90s");
            jail.set_env("METAL_ACCEPT_INVALID_CERTS", "false");
            let config = load(None).expect("config loads");
            assert_eq!(config.bmc_reset_wait_time, Duration::from_secs(90));
            assert!(!config.accept_invalid_certs);
            Ok(())
        });
    }
}
