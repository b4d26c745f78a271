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

//! Finds the existing registry certificate a renewal should be imported into.

use crate::error::ProvisionError;
use crate::registry::{CertificateIdentity, CertificateRegistry, ListQuery};
use serde::Deserialize;
use tracing::{debug, info};

/// The `acm-certificate-filters` object of the event.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CertificateFilters {
    #[serde(default, deserialize_with = "crate::serde_helpers::one_or_many::deserialize")]
    pub status: Vec<String>,
    #[serde(
        default,
        alias = "key_type",
        deserialize_with = "crate::serde_helpers::one_or_many::deserialize"
    )]
    pub key_type: Vec<String>,
    #[serde(
        default,
        alias = "key_usage",
        deserialize_with = "crate::serde_helpers::one_or_many::deserialize"
    )]
    pub key_usage: Vec<String>,
    #[serde(
        default,
        alias = "extended_key_usage",
        deserialize_with = "crate::serde_helpers::one_or_many::deserialize"
    )]
    pub extended_key_usage: Vec<String>,
    #[serde(
        default,
        rename = "type",
        deserialize_with = "crate::serde_helpers::one_or_many::deserialize"
    )]
    pub certificate_type: Vec<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl CertificateFilters {
    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
            && self.key_type.is_empty()
            && self.key_usage.is_empty()
            && self.extended_key_usage.is_empty()
            && self.certificate_type.is_empty()
            && self.domain.as_deref().map_or(true, str::is_empty)
    }
    fn list_query(&self) -> ListQuery {
        ListQuery {
            statuses: self.status.clone(),
            key_types: self.key_type.clone(),
            key_usages: self.key_usage.clone(),
            extended_key_usages: self.extended_key_usage.clone(),
        }
    }
    // The registry cannot filter on these, so they run after every page has
    // been fetched.
    fn matches_client_side(&self, identity: &CertificateIdentity) -> bool {
        let domain_ok = match self.domain.as_deref() {
            Some(domain) if !domain.is_empty() => {
                identity.domain_name.as_deref() == Some(domain)
            }
            _ => true,
        };
        let type_ok = self.certificate_type.is_empty()
            || identity
                .certificate_type
                .as_ref()
                .map_or(false, |t| self.certificate_type.contains(t));
        domain_ok && type_ok
    }
}

/// How the certificate to update is chosen.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IdentitySelector {
    Explicit(String),
    Filtered(CertificateFilters),
    /// Import as a brand new certificate.
    New,
}

/// Returns the certificate to update, or `None` when a new one should be
/// created. Never picks among several matches.
pub async fn resolve(
    registry: &dyn CertificateRegistry,
    selector: &IdentitySelector,
) -> Result<Option<CertificateIdentity>, ProvisionError> {
    match selector {
        IdentitySelector::New => Ok(None),
        IdentitySelector::Explicit(arn) => match registry.get_certificate(arn).await {
            Ok(Some(identity)) => Ok(Some(identity)),
            Ok(None) => Err(ProvisionError::InvalidIdentifier {
                arn: arn.clone(),
                reason: "certificate not found".to_string(),
            }),
            Err(e) => Err(ProvisionError::InvalidIdentifier {
                arn: arn.clone(),
                reason: format!("{:#}", e),
            }),
        },
        IdentitySelector::Filtered(filters) => {
            let query = filters.list_query();
            let mut candidates = vec![];
            let mut next_token: Option<String> = None;
            loop {
                info!(?query, next_token = ?next_token, "Listing certificates");
                let page = registry
                    .list_certificates(&query, next_token.as_deref())
                    .await
                    .map_err(ProvisionError::Registry)?;
                debug!(count = page.identities.len(), "Received certificate page");
                candidates.extend(page.identities);
                match page.next_token {
                    Some(token) => next_token = Some(token),
                    None => break,
                }
            }
            candidates.retain(|identity| filters.matches_client_side(identity));
            match candidates.len() {
                0 => Ok(None),
                1 => Ok(candidates.pop()),
                _ => Err(ProvisionError::MultipleIdentities(
                    candidates.into_iter().map(|identity| identity.arn).collect(),
                )),
            }
        }
    }
}
