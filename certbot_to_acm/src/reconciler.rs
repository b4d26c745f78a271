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

//! Writes certificate artifacts to the secret store, skipping every value
//! that is already stored unchanged.

use crate::artifacts::CertificateArtifacts;
use crate::error::ProvisionError;
use crate::pattern::ArtifactRole;
use crate::request::SecretsTarget;
use crate::secrets::{SecretEncryption, SecretEntry, SecretStore};
use anyhow::Error;
use tracing::info;

fn secret_name(role: ArtifactRole) -> &'static str {
    match role {
        ArtifactRole::Certificate => "cert",
        ArtifactRole::Chain => "chain",
        ArtifactRole::FullChain => "fullchain",
        ArtifactRole::PrivateKey => "key",
    }
}

fn description(role: ArtifactRole, domains: &str) -> String {
    let what = match role {
        ArtifactRole::Certificate => "certificate",
        ArtifactRole::Chain => "intermediate",
        ArtifactRole::FullChain => "fullchain",
        ArtifactRole::PrivateKey => "key",
    };
    format!("TLS {} for {}", what, domains)
}

/// The four entries to store under `target.prefix`. Only the private key is
/// encrypted.
pub fn desired_entries(
    target: &SecretsTarget,
    artifacts: &CertificateArtifacts,
    domains: &[String],
) -> Result<Vec<SecretEntry>, ProvisionError> {
    let domains = domains.join(" ");
    ArtifactRole::ALL
        .iter()
        .map(|&role| {
            let value = String::from_utf8(artifacts.get(role).to_vec()).map_err(|e| {
                ProvisionError::InvalidArtifact {
                    role,
                    source: Error::new(e).context("Artifact is not valid UTF-8"),
                }
            })?;
            let encryption = match role {
                ArtifactRole::PrivateKey => SecretEncryption::Encrypted {
                    kms_key_id: target.kms_key_id.clone(),
                },
                _ => SecretEncryption::Plain,
            };
            Ok(SecretEntry {
                name: format!("{}{}", target.prefix, secret_name(role)),
                value,
                description: description(role, &domains),
                encryption,
                tier: target.tier,
            })
        })
        .collect()
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecretChange {
    pub name: String,
    pub written: bool,
}

/// Stores each entry whose current value differs from the desired one.
/// Entries are independent; a failure leaves earlier writes in place.
pub async fn reconcile(
    store: &dyn SecretStore,
    entries: &[SecretEntry],
) -> Result<Vec<SecretChange>, ProvisionError> {
    let mut changes = Vec::with_capacity(entries.len());
    for entry in entries {
        let current = store
            .get_secret(&entry.name)
            .await
            .map_err(|source| ProvisionError::Reconciliation {
                name: entry.name.clone(),
                source,
            })?;
        let written = current.as_deref().map(str::as_bytes) != Some(entry.value.as_bytes());
        if written {
            info!(name = %entry.name, existed = current.is_some(), "Updating parameter");
            store
                .put_secret(entry)
                .await
                .map_err(|source| ProvisionError::Reconciliation {
                    name: entry.name.clone(),
                    source,
                })?;
        } else {
            info!(name = %entry.name, "Parameter is up to date");
        }
        changes.push(SecretChange {
            name: entry.name.clone(),
            written,
        });
    }
    Ok(changes)
}
