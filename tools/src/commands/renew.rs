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

use crate::runtime::aws_runtime;
use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
pub struct Opts {
    /// Path of the event document, or `-` for stdin.
    #[clap(long, default_value = "-")]
    event: String,
    /// The certbot executable, with the dns-route53 plugin installed.
    #[clap(long, default_value = "certbot")]
    certbot: String,
}

pub async fn main(opts: Opts) -> Result<()> {
    let event = super::read_event(&opts.event)?;
    let runtime = aws_runtime(&opts.certbot).await;
    let response = certbot_to_acm::handle_event(&runtime, event).await?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
