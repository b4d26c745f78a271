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

pub mod mock_issuer;

use anyhow::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;

pub const USER_AGENT_COMMENT: &str = concat!("certbot-to-acm/", env!("CARGO_PKG_VERSION"));

/// Everything certbot needs for one `certonly` run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IssuanceArgs {
    pub config_dir: PathBuf,
    pub work_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub endpoint: String,
    pub email: Option<String>,
    pub rsa_key_size: u32,
    pub domains: Vec<String>,
}

impl IssuanceArgs {
    /// The certbot argument vector, without the program name.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv: Vec<String> = [
            "certonly",
            "--non-interactive",
            "--preferred-challenges",
            "dns",
            "--user-agent-comment",
            USER_AGENT_COMMENT,
            "--agree-tos",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        for (flag, dir) in [
            ("--config-dir", &self.config_dir),
            ("--work-dir", &self.work_dir),
            ("--logs-dir", &self.logs_dir),
        ] {
            argv.push(flag.to_string());
            argv.push(dir.to_string_lossy().into_owned());
        }
        argv.push("--server".to_string());
        argv.push(self.endpoint.clone());
        argv.push("--dns-route53".to_string());
        argv.push("--rsa-key-size".to_string());
        argv.push(self.rsa_key_size.to_string());
        match &self.email {
            Some(email) => {
                argv.push("--email".to_string());
                argv.push(email.clone());
            }
            None => argv.push("--register-unsafely-without-email".to_string()),
        }
        for domain in &self.domains {
            argv.push("--domain".to_string());
            argv.push(domain.clone());
        }
        argv
    }
}

/// Runs the ACME client.
#[async_trait]
pub trait Issuer: Send + Sync {
    /// Returns the client's exit status; anything but 0 is a failed issuance.
    async fn issue(&self, args: &IssuanceArgs) -> Result<i32>;
}

pub struct NullIssuer;

#[async_trait]
impl Issuer for NullIssuer {
    async fn issue(&self, _args: &IssuanceArgs) -> Result<i32> {
        Err(Error::msg("No issuer is configured"))
    }
}
