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

//! An [`Issuer`] that writes a certbot-shaped lineage instead of talking to
//! an ACME server, to be used in unit testing.

use super::{IssuanceArgs, Issuer};
use crate::pattern::ArtifactRole;
use anyhow::{Context, Error, Result};
use async_trait::async_trait;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct MockIssuer {
    exit_code: i32,
    omitted: Vec<ArtifactRole>,
    lineage: Option<String>,
    calls: Arc<Mutex<Vec<IssuanceArgs>>>,
}

impl MockIssuer {
    /// Issues a full new generation on every call.
    pub fn new() -> Self {
        MockIssuer {
            exit_code: 0,
            omitted: vec![],
            lineage: None,
            calls: Arc::new(Mutex::new(vec![])),
        }
    }
    /// Exits with `exit_code` without writing anything.
    pub fn failing(exit_code: i32) -> Self {
        MockIssuer {
            exit_code,
            ..Self::new()
        }
    }
    /// Issues a generation that lacks `role`.
    pub fn omitting(role: ArtifactRole) -> Self {
        MockIssuer {
            omitted: vec![role],
            ..Self::new()
        }
    }
    /// Writes into the lineage directory `lineage` instead of one named after
    /// the first domain, as certbot does once the domain set of a lineage
    /// changes.
    pub fn with_lineage(lineage: &str) -> Self {
        MockIssuer {
            lineage: Some(lineage.to_string()),
            ..Self::new()
        }
    }
    pub async fn calls(&self) -> Vec<IssuanceArgs> {
        self.calls.lock().await.clone()
    }
}

impl Default for MockIssuer {
    fn default() -> Self {
        Self::new()
    }
}

/// Fake PEM text for `role` of generation `version`; distinct per generation.
pub fn fake_pem(lineage: &str, role: ArtifactRole, version: u32) -> String {
    let block = |tag: &str, what: &str| {
        pem::encode(&pem::Pem {
            tag: tag.to_string(),
            contents: format!("{} {} {}", lineage, what, version).into_bytes(),
        })
    };
    match role {
        ArtifactRole::Certificate => block("CERTIFICATE", "leaf"),
        ArtifactRole::Chain => block("CERTIFICATE", "intermediate"),
        ArtifactRole::FullChain => {
            block("CERTIFICATE", "leaf") + &block("CERTIFICATE", "intermediate")
        }
        ArtifactRole::PrivateKey => block("PRIVATE KEY", "key"),
    }
}

fn next_version(archive_dir: &Path) -> Result<u32> {
    let mut version = 0;
    if archive_dir.is_dir() {
        for entry in fs::read_dir(archive_dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(n) = name
                .strip_prefix("cert")
                .and_then(|rest| rest.strip_suffix(".pem"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                version = version.max(n);
            }
        }
    }
    Ok(version + 1)
}

fn write_generation(
    args: &IssuanceArgs,
    lineage: Option<&str>,
    omitted: &[ArtifactRole],
) -> Result<()> {
    let lineage = match lineage {
        Some(lineage) => lineage,
        None => args
            .domains
            .first()
            .ok_or_else(|| Error::msg("No domain requested"))?
            .trim_start_matches("*."),
    };
    let archive_dir = args.config_dir.join("archive").join(lineage);
    let live_dir = args.config_dir.join("live").join(lineage);
    fs::create_dir_all(&archive_dir)?;
    fs::create_dir_all(&live_dir)?;
    let version = next_version(&archive_dir)?;
    for role in ArtifactRole::ALL {
        if omitted.contains(&role) {
            continue;
        }
        let file_name = format!("{}{}.pem", role.file_stem(), version);
        let archived = archive_dir.join(&file_name);
        fs::write(&archived, fake_pem(lineage, role, version))?;
        if role == ArtifactRole::PrivateKey {
            fs::set_permissions(&archived, fs::Permissions::from_mode(0o600))?;
        }
        let link = live_dir.join(format!("{}.pem", role.file_stem()));
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link)?;
        }
        symlink(format!("../../archive/{}/{}", lineage, file_name), &link)?;
    }
    let renewal_dir = args.config_dir.join("renewal");
    fs::create_dir_all(&renewal_dir)?;
    fs::write(
        renewal_dir.join(format!("{}.conf", lineage)),
        format!("version = mock\narchive_dir = archive/{}\n", lineage),
    )?;
    Ok(())
}

#[async_trait]
impl Issuer for MockIssuer {
    async fn issue(&self, args: &IssuanceArgs) -> Result<i32> {
        self.calls.lock().await.push(args.clone());
        if self.exit_code != 0 {
            return Ok(self.exit_code);
        }
        write_generation(args, self.lineage.as_deref(), &self.omitted)
            .context("Mock issuer failed to write lineage")?;
        Ok(0)
    }
}
