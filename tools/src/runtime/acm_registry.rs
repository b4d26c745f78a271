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
use aws_sdk_acm::primitives::Blob;
use aws_sdk_acm::types::{
    CertificateDetail, CertificateStatus, CertificateSummary, ExtendedKeyUsageName, Filters,
    KeyAlgorithm, KeyUsageName,
};
use aws_sdk_acm::Client;
use certbot_to_acm::registry::{
    CertificateIdentity, CertificatePage, CertificateRegistry, ImportCertificate, ListQuery,
};

/// A [`CertificateRegistry`] implemented by AWS Certificate Manager.
pub struct AcmRegistry {
    client: Client,
}

impl AcmRegistry {
    pub fn new(client: Client) -> Self {
        AcmRegistry { client }
    }
}

fn strings<T, F: Fn(&T) -> &str>(values: &[T], as_str: F) -> Vec<String> {
    values.iter().map(|v| as_str(v).to_string()).collect()
}

fn identity_from_summary(summary: &CertificateSummary) -> Option<CertificateIdentity> {
    Some(CertificateIdentity {
        arn: summary.certificate_arn()?.to_string(),
        domain_name: summary.domain_name().map(str::to_string),
        status: summary.status().map(|s| s.as_str().to_string()),
        key_type: summary.key_algorithm().map(|k| k.as_str().to_string()),
        certificate_type: summary.r#type().map(|t| t.as_str().to_string()),
        key_usages: strings(summary.key_usages(), KeyUsageName::as_str),
        extended_key_usages: strings(summary.extended_key_usages(), ExtendedKeyUsageName::as_str),
    })
}

fn identity_from_detail(detail: &CertificateDetail) -> Option<CertificateIdentity> {
    Some(CertificateIdentity {
        arn: detail.certificate_arn()?.to_string(),
        domain_name: detail.domain_name().map(str::to_string),
        status: detail.status().map(|s| s.as_str().to_string()),
        key_type: detail.key_algorithm().map(|k| k.as_str().to_string()),
        certificate_type: detail.r#type().map(|t| t.as_str().to_string()),
        key_usages: detail
            .key_usages()
            .iter()
            .filter_map(|usage| usage.name())
            .map(|name| name.as_str().to_string())
            .collect(),
        extended_key_usages: detail
            .extended_key_usages()
            .iter()
            .filter_map(|usage| usage.name())
            .map(|name| name.as_str().to_string())
            .collect(),
    })
}

fn optional<T>(values: Vec<T>) -> Option<Vec<T>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

// ACM only lists RSA_2048 certificates unless key types are given.
fn filters(query: &ListQuery) -> Filters {
    Filters::builder()
        .set_key_types(optional(
            query.key_types.iter().map(|k| KeyAlgorithm::from(k.as_str())).collect(),
        ))
        .set_key_usage(optional(
            query.key_usages.iter().map(|k| KeyUsageName::from(k.as_str())).collect(),
        ))
        .set_extended_key_usage(optional(
            query
                .extended_key_usages
                .iter()
                .map(|k| ExtendedKeyUsageName::from(k.as_str()))
                .collect(),
        ))
        .build()
}

#[async_trait]
impl CertificateRegistry for AcmRegistry {
    async fn get_certificate(&self, arn: &str) -> Result<Option<CertificateIdentity>> {
        let output = match self
            .client
            .describe_certificate()
            .certificate_arn(arn)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let e = e.into_service_error();
                if e.is_resource_not_found_exception() {
                    return Ok(None);
                }
                return Err(Error::new(e).context("DescribeCertificate failed"));
            }
        };
        Ok(output.certificate().and_then(identity_from_detail))
    }
    async fn list_certificates(
        &self,
        query: &ListQuery,
        next_token: Option<&str>,
    ) -> Result<CertificatePage> {
        let output = self
            .client
            .list_certificates()
            .set_certificate_statuses(optional(
                query
                    .statuses
                    .iter()
                    .map(|s| CertificateStatus::from(s.as_str()))
                    .collect(),
            ))
            .includes(filters(query))
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| Error::new(e.into_service_error()).context("ListCertificates failed"))?;
        Ok(CertificatePage {
            identities: output
                .certificate_summary_list()
                .iter()
                .filter_map(identity_from_summary)
                .collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }
    async fn import_certificate(&self, request: ImportCertificate) -> Result<String> {
        let output = self
            .client
            .import_certificate()
            .certificate(Blob::new(request.certificate))
            .certificate_chain(Blob::new(request.chain))
            .private_key(Blob::new(request.private_key))
            .set_certificate_arn(request.arn)
            .send()
            .await
            .map_err(|e| Error::new(e.into_service_error()).context("ImportCertificate failed"))?;
        output
            .certificate_arn()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("ImportCertificate returned no ARN"))
    }
}
