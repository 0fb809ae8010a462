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

use clap::Parser;
use controllers::cfg::{self, Options};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let options = Options::parse();
    controllers::logging::setup_logging(options.debug)?;
    let config = cfg::load(options.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");
    controllers::run::run(config).await
}
