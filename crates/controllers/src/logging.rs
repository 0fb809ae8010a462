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

use eyre::WrapErr;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

/// Filters out spans and events from 3rd party frameworks that are noise
/// at our default levels.
fn dep_log_filter(env_filter: EnvFilter) -> EnvFilter {
    [
        "hyper=error",
        "rustls=warn",
        "reqwest=warn",
        "h2=warn",
        "tower=warn",
        "kube_client=info",
    ]
    .iter()
    .fold(env_filter, |filter, directive| {
        filter.add_directive(
            directive
                .parse()
                .unwrap_or_else(|err| panic!("{directive} must be parsed; error: {err}")),
        )
    })
}

/// Sets up the global tracing subscriber. The command line's `-d` count
/// picks the default level; `RUST_LOG` still overrides per target.
pub fn setup_logging(debug: u8) -> eyre::Result<()> {
    let log_level = match debug {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let log_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env()?;
    let log_filter = dep_log_filter(log_filter);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(log_filter))
        .try_init()
        .wrap_err("tracing subscriber try_init()")?;

    tracing::info!("current log level: {}", LevelFilter::current());
    Ok(())
}
