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

use anyhow::{anyhow, Error, Result};
use async_trait::async_trait;
use certbot_to_acm::issuer::{IssuanceArgs, Issuer};
use tokio::process::Command;
use tracing::info;

/// An [`Issuer`] that runs the certbot executable.
pub struct CertbotIssuer {
    program: String,
}

impl CertbotIssuer {
    pub fn new(program: impl ToString) -> Self {
        CertbotIssuer {
            program: program.to_string(),
        }
    }
}

#[async_trait]
impl Issuer for CertbotIssuer {
    async fn issue(&self, args: &IssuanceArgs) -> Result<i32> {
        let argv = args.to_argv();
        info!(program = %self.program, ?argv, "Running certbot");
        let status = Command::new(&self.program)
            .args(&argv)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::new(e).context(format!("Failed to execute {}", self.program)))?;
        status
            .code()
            .ok_or_else(|| anyhow!("{} was terminated by a signal", self.program))
    }
}
