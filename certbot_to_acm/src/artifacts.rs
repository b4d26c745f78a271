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

//! Collects the current certificate generation out of a certbot config
//! directory.

use crate::error::ProvisionError;
use crate::pattern::{ArtifactRole, PatternMatcher};
use anyhow::{anyhow, Error};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

/// All four artifacts of one lineage. Never partially populated.
#[derive(Clone, Eq, PartialEq)]
pub struct CertificateArtifacts {
    pub lineage: String,
    pub certificate: Vec<u8>,
    pub chain: Vec<u8>,
    pub full_chain: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl CertificateArtifacts {
    pub fn get(&self, role: ArtifactRole) -> &[u8] {
        match role {
            ArtifactRole::Certificate => &self.certificate,
            ArtifactRole::Chain => &self.chain,
            ArtifactRole::FullChain => &self.full_chain,
            ArtifactRole::PrivateKey => &self.private_key,
        }
    }
}

impl fmt::Debug for CertificateArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateArtifacts")
            .field("lineage", &self.lineage)
            .field("certificate", &self.certificate.len())
            .field("chain", &self.chain.len())
            .field("full_chain", &self.full_chain.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Default)]
struct Partial {
    found: BTreeMap<ArtifactRole, Vec<u8>>,
    newest: Option<SystemTime>,
}

impl Partial {
    fn first_missing(&self) -> Option<ArtifactRole> {
        ArtifactRole::ALL
            .iter()
            .copied()
            .find(|role| !self.found.contains_key(role))
    }
    fn complete(mut self, lineage: String) -> Option<CertificateArtifacts> {
        Some(CertificateArtifacts {
            lineage,
            certificate: self.found.remove(&ArtifactRole::Certificate)?,
            chain: self.found.remove(&ArtifactRole::Chain)?,
            full_chain: self.found.remove(&ArtifactRole::FullChain)?,
            private_key: self.found.remove(&ArtifactRole::PrivateKey)?,
        })
    }
}

fn check_pem(role: ArtifactRole, bytes: &[u8]) -> Result<(), ProvisionError> {
    let invalid = |source: Error| ProvisionError::InvalidArtifact { role, source };
    let blocks = pem::parse_many(bytes).map_err(|e| invalid(Error::new(e)))?;
    let accepted = |tag: &str| match role {
        ArtifactRole::PrivateKey => tag.ends_with("PRIVATE KEY"),
        _ => tag == "CERTIFICATE",
    };
    if blocks.is_empty() {
        return Err(invalid(anyhow!("No PEM block found")));
    }
    if let Some(block) = blocks.iter().find(|block| !accepted(&block.tag)) {
        return Err(invalid(anyhow!("Unexpected PEM block {:?}", block.tag)));
    }
    Ok(())
}

// Certbot names a lineage after the first domain and appends `-NNNN` when
// that name is taken by a lineage with a different domain set.
fn is_numbered_variant(name: &str, base: &str) -> bool {
    name.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('-'))
        .map_or(false, |n| n.len() == 4 && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Walks `config_dir` and returns the artifacts of one complete lineage.
/// Within a lineage the first file matching a role wins.
///
/// With `preferred_lineage` set, the candidates are that lineage and its
/// numbered variants, and the one holding the most recently written artifact
/// is used. It must be complete; another lineage is only considered when no
/// candidate exists.
pub fn extract(
    config_dir: &Path,
    preferred_lineage: Option<&str>,
) -> Result<CertificateArtifacts, ProvisionError> {
    let matcher = PatternMatcher::new().map_err(ProvisionError::Workspace)?;
    let mut lineages: BTreeMap<String, Partial> = BTreeMap::new();
    for entry in WalkDir::new(config_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ProvisionError::Workspace(Error::new(e)))?;
        let relpath = match entry.path().strip_prefix(config_dir) {
            Ok(relpath) => relpath.to_string_lossy().into_owned(),
            Err(_) => continue,
        };
        let (role, lineage) = match matcher.classify(&relpath) {
            Some(classified) => classified,
            None => continue,
        };
        // `live/` entries are normally symlinks into `archive/`.
        if !entry.path().is_file() {
            continue;
        }
        let partial = lineages.entry(lineage.to_string()).or_default();
        if partial.found.contains_key(&role) {
            continue;
        }
        let bytes = fs::read(entry.path()).map_err(|e| {
            ProvisionError::Workspace(Error::new(e).context(format!("Failed to read {}", relpath)))
        })?;
        let modified = entry
            .path()
            .metadata()
            .and_then(|metadata| metadata.modified())
            .ok();
        debug!(path = %relpath, ?role, "Found artifact");
        partial.found.insert(role, bytes);
        partial.newest = partial.newest.max(modified);
    }

    let missing = |role| ProvisionError::MissingArtifact {
        role,
        dir: config_dir.to_path_buf(),
    };
    let candidate = preferred_lineage.and_then(|preferred| {
        lineages
            .iter()
            .filter(|(name, _)| *name == preferred || is_numbered_variant(name, preferred))
            .max_by(|(a_name, a), (b_name, b)| (a.newest, a_name).cmp(&(b.newest, b_name)))
            .map(|(name, _)| name.clone())
    });
    let chosen = match candidate {
        Some(name) => name,
        None => lineages
            .iter()
            .find(|(_, partial)| partial.first_missing().is_none())
            .map(|(name, _)| name.clone())
            .ok_or_else(|| {
                missing(
                    lineages
                        .values()
                        .next()
                        .and_then(Partial::first_missing)
                        .unwrap_or(ArtifactRole::Certificate),
                )
            })?,
    };
    let partial = lineages
        .remove(&chosen)
        .ok_or_else(|| missing(ArtifactRole::Certificate))?;
    if let Some(role) = partial.first_missing() {
        return Err(missing(role));
    }
    if preferred_lineage.map_or(false, |preferred| preferred != chosen) {
        info!(lineage = %chosen, "Using renamed lineage");
    }
    let artifacts = partial
        .complete(chosen)
        .ok_or_else(|| missing(ArtifactRole::Certificate))?;
    for role in ArtifactRole::ALL {
        check_pem(role, artifacts.get(role))?;
    }
    Ok(artifacts)
}
