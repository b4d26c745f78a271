// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use certbot_to_acm::ProvisioningEvent;
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
pub struct Opts {
    /// Path of the event document, or `-` for stdin.
    #[clap(long, default_value = "-")]
    event: String,
}

pub fn main(opts: Opts) -> Result<()> {
    let event: ProvisioningEvent = serde_json::from_value(super::read_event(&opts.event)?)?;
    let request = event.validate()?;
    info!(
        domains = ?request.domains,
        config_store = %request.config_store,
        endpoint = %request.endpoint,
        "Event is valid"
    );
    Ok(())
}
