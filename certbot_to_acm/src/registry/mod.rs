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

//! The managed certificate registry (ACM).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A certificate known to the registry. Only ever referenced, never mutated
/// in place by this crate except through [`CertificateRegistry::import_certificate`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CertificateIdentity {
    pub arn: String,
    pub domain_name: Option<String>,
    pub status: Option<String>,
    pub key_type: Option<String>,
    pub certificate_type: Option<String>,
    pub key_usages: Vec<String>,
    pub extended_key_usages: Vec<String>,
}

/// The predicates the registry can evaluate server-side. Empty lists do not
/// constrain the listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListQuery {
    pub statuses: Vec<String>,
    pub key_types: Vec<String>,
    pub key_usages: Vec<String>,
    pub extended_key_usages: Vec<String>,
}

impl ListQuery {
    fn matches(&self, identity: &CertificateIdentity) -> bool {
        fn contains(allowed: &[String], value: &Option<String>) -> bool {
            allowed.is_empty() || value.as_ref().map_or(false, |v| allowed.contains(v))
        }
        fn overlaps(allowed: &[String], values: &[String]) -> bool {
            allowed.is_empty() || values.iter().any(|v| allowed.contains(v))
        }
        contains(&self.statuses, &identity.status)
            && contains(&self.key_types, &identity.key_type)
            && overlaps(&self.key_usages, &identity.key_usages)
            && overlaps(&self.extended_key_usages, &identity.extended_key_usages)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CertificatePage {
    pub identities: Vec<CertificateIdentity>,
    pub next_token: Option<String>,
}

/// Certificate material to import. `arn` selects an existing certificate to
/// replace; `None` creates a new one.
#[derive(Clone, Eq, PartialEq)]
pub struct ImportCertificate {
    pub certificate: Vec<u8>,
    pub chain: Vec<u8>,
    pub private_key: Vec<u8>,
    pub arn: Option<String>,
}

impl fmt::Debug for ImportCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportCertificate")
            .field("certificate", &self.certificate.len())
            .field("chain", &self.chain.len())
            .field("private_key", &"<redacted>")
            .field("arn", &self.arn)
            .finish()
    }
}

#[async_trait]
pub trait CertificateRegistry: Send + Sync {
    /// Returns `None` if no certificate has this ARN.
    async fn get_certificate(&self, arn: &str) -> Result<Option<CertificateIdentity>>;
    async fn list_certificates(
        &self,
        query: &ListQuery,
        next_token: Option<&str>,
    ) -> Result<CertificatePage>;
    /// Returns the ARN of the imported certificate.
    async fn import_certificate(&self, request: ImportCertificate) -> Result<String>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImportRecord {
    pub requested_arn: Option<String>,
    pub arn: String,
    pub certificate: Vec<u8>,
}

#[derive(Default)]
struct Registry {
    identities: Vec<CertificateIdentity>,
    imports: Vec<ImportRecord>,
    list_calls: usize,
}

/// A registry held in memory, paging its listing `page_size` entries at a
/// time. Clones share state.
#[derive(Clone)]
pub struct InMemoryRegistry {
    inner: Arc<RwLock<Registry>>,
    page_size: usize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::with_identities(vec![])
    }
    pub fn with_identities(identities: Vec<CertificateIdentity>) -> Self {
        InMemoryRegistry {
            inner: Arc::new(RwLock::new(Registry {
                identities,
                ..Default::default()
            })),
            page_size: 100,
        }
    }
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
    pub async fn imports(&self) -> Vec<ImportRecord> {
        self.inner.read().await.imports.clone()
    }
    pub async fn list_calls(&self) -> usize {
        self.inner.read().await.list_calls
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CertificateRegistry for InMemoryRegistry {
    async fn get_certificate(&self, arn: &str) -> Result<Option<CertificateIdentity>> {
        let guard = self.inner.read().await;
        Ok(guard.identities.iter().find(|i| i.arn == arn).cloned())
    }
    async fn list_certificates(
        &self,
        query: &ListQuery,
        next_token: Option<&str>,
    ) -> Result<CertificatePage> {
        let mut guard = self.inner.write().await;
        guard.list_calls += 1;
        let start = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| anyhow!("Invalid next token {:?}", token))?,
            None => 0,
        };
        let matching: Vec<_> = guard
            .identities
            .iter()
            .filter(|i| query.matches(i))
            .cloned()
            .collect();
        let end = std::cmp::min(start + self.page_size, matching.len());
        let identities = matching.get(start..end).unwrap_or_default().to_vec();
        let next_token = if end < matching.len() {
            Some(end.to_string())
        } else {
            None
        };
        Ok(CertificatePage {
            identities,
            next_token,
        })
    }
    async fn import_certificate(&self, request: ImportCertificate) -> Result<String> {
        let mut guard = self.inner.write().await;
        let arn = match &request.arn {
            Some(arn) => {
                let identity = guard
                    .identities
                    .iter_mut()
                    .find(|i| &i.arn == arn)
                    .ok_or_else(|| anyhow!("Certificate {} not found", arn))?;
                identity.status = Some("ISSUED".to_string());
                arn.clone()
            }
            None => {
                let arn = format!(
                    "arn:aws:acm:us-east-1:123456789012:certificate/{:08}",
                    guard.imports.len() + 1
                );
                guard.identities.push(CertificateIdentity {
                    arn: arn.clone(),
                    status: Some("ISSUED".to_string()),
                    certificate_type: Some("IMPORTED".to_string()),
                    ..Default::default()
                });
                arn
            }
        };
        guard.imports.push(ImportRecord {
            requested_arn: request.arn,
            arn: arn.clone(),
            certificate: request.certificate,
        });
        Ok(arn)
    }
}
