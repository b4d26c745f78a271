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

use crate::error::ProvisionError;
use crate::identity::{CertificateFilters, IdentitySelector};
use crate::secrets::SecretTier;
use crate::serde_helpers::lenient::Lenient;
use crate::serde_helpers::one_or_many::OneOrMany;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use tracing::warn;
use url::Url;

pub const STAGING_ENDPOINT: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
pub const PRODUCTION_ENDPOINT: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const DEFAULT_ENDPOINT: &str = STAGING_ENDPOINT;
pub const DEFAULT_CONFIG_STORE_KMS_KEY: &str = "alias/aws/s3";
pub const DEFAULT_SSM_KMS_KEY: &str = "alias/aws/ssm";

const LABEL: &str = "(?:[0-9a-z][-0-9a-z]*[0-9a-z]|[0-9a-z])";

lazy_static! {
    static ref DOMAIN_NAME: Regex =
        Regex::new(&format!(r"^(?:\*\.)?{label}(?:\.{label})*$", label = LABEL)).unwrap();
    static ref S3_URL: Regex = Regex::new(r"^s3://([a-z0-9][-.a-z0-9]*)/(.+)$").unwrap();
}

/// The invocation event, as received. Unknown fields are ignored; values of
/// the wrong type are kept and reported by [`ProvisioningEvent::validate`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProvisioningEvent {
    pub acm_certificate_arn: Option<Lenient<String>>,
    pub acm_certificate_filters: Option<Lenient<CertificateFilters>>,
    pub agree_tos: Option<Lenient<bool>>,
    pub config_store_url: Option<Lenient<String>>,
    pub config_store_kms_key: Option<Lenient<String>>,
    pub domains: Option<Lenient<OneOrMany>>,
    pub email: Option<Lenient<String>>,
    pub endpoint: Option<Lenient<String>>,
    pub rsa_key_size: Option<Lenient<i64>>,
    pub ssm_parameter_prefix: Option<Lenient<String>>,
    pub ssm_kms_key: Option<Lenient<String>>,
    pub ssm_tier: Option<Lenient<String>>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RsaKeySize {
    #[default]
    Rsa2048,
    Rsa3072,
    Rsa4096,
}

impl RsaKeySize {
    pub const PERMITTED: [u32; 3] = [2048, 3072, 4096];
    pub fn bits(self) -> u32 {
        match self {
            RsaKeySize::Rsa2048 => 2048,
            RsaKeySize::Rsa3072 => 3072,
            RsaKeySize::Rsa4096 => 4096,
        }
    }
}

fn unsupported_key_size(value: impl fmt::Display) -> String {
    let permitted: Vec<String> = RsaKeySize::PERMITTED.iter().map(|b| b.to_string()).collect();
    format!("rsa-key-size must be one of {}: {}", permitted.join(", "), value)
}

impl TryFrom<i64> for RsaKeySize {
    type Error = String;
    fn try_from(bits: i64) -> Result<Self, String> {
        match bits {
            2048 => Ok(RsaKeySize::Rsa2048),
            3072 => Ok(RsaKeySize::Rsa3072),
            4096 => Ok(RsaKeySize::Rsa4096),
            _ => Err(unsupported_key_size(bits)),
        }
    }
}

/// Where the certbot config archive lives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigStoreLocation {
    pub bucket: String,
    pub key: String,
}

impl ConfigStoreLocation {
    pub fn parse(url: &str) -> Option<Self> {
        let captures = S3_URL.captures(url)?;
        Some(ConfigStoreLocation {
            bucket: captures[1].to_string(),
            key: captures[2].to_string(),
        })
    }
}

impl fmt::Display for ConfigStoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Where and how the artifacts are written to the parameter store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecretsTarget {
    /// Always begins and ends with `/`.
    pub prefix: String,
    pub kms_key_id: String,
    pub tier: SecretTier,
}

pub fn normalize_prefix(prefix: &str) -> String {
    let mut normalized = String::with_capacity(prefix.len() + 2);
    if !prefix.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(prefix);
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= 253
        && DOMAIN_NAME.is_match(domain)
        && domain.split('.').all(|label| label.len() <= 63)
}

/// A validated event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningRequest {
    /// Lower-cased, non-empty.
    pub domains: Vec<String>,
    pub email: Option<String>,
    pub endpoint: Url,
    pub rsa_key_size: RsaKeySize,
    pub config_store: ConfigStoreLocation,
    pub config_store_kms_key: String,
    pub identity: IdentitySelector,
    pub secrets: Option<SecretsTarget>,
}

impl ProvisioningRequest {
    /// The directory name certbot gives the lineage of these domains.
    pub fn lineage_name(&self) -> &str {
        self.domains[0].trim_start_matches("*.")
    }
}

// An optional string field; a value of another type is reported and dropped.
fn optional_string(
    field: Option<Lenient<String>>,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match field? {
        Lenient::Valid(value) => Some(value),
        Lenient::Invalid(value) => {
            errors.push(format!("{} must be a string: {}", name, value));
            None
        }
    }
}

impl ProvisioningEvent {
    /// Checks every field and reports all problems at once.
    pub fn validate(self) -> Result<ProvisioningRequest, ProvisionError> {
        let mut errors = vec![];

        if !matches!(self.agree_tos, Some(Lenient::Valid(true))) {
            errors.push("agree-tos must be specified and set to true".to_string());
        }

        let config_store = match self.config_store_url {
            Some(Lenient::Valid(url)) if !url.is_empty() => {
                let location = ConfigStoreLocation::parse(&url);
                if location.is_none() {
                    errors.push("config-store-url is not a valid s3:// url".to_string());
                }
                location
            }
            Some(Lenient::Invalid(value)) => {
                errors.push(format!("config-store-url is not a valid s3:// url: {}", value));
                None
            }
            _ => {
                errors.push("config-store-url must be specified".to_string());
                None
            }
        };

        let domains: Vec<String> = match self.domains {
            Some(Lenient::Invalid(value)) => {
                errors.push(format!(
                    "domains must be a DNS name or a list of DNS names: {}",
                    value
                ));
                vec![]
            }
            domains => {
                let domains: Vec<String> = domains
                    .map(|d| match d {
                        Lenient::Valid(d) => d.into_vec(),
                        Lenient::Invalid(_) => vec![],
                    })
                    .unwrap_or_default()
                    .iter()
                    .map(|d| d.trim().to_ascii_lowercase())
                    .collect();
                if domains.is_empty() {
                    errors.push("domains not specified or is empty".to_string());
                }
                for domain in &domains {
                    if !is_valid_domain(domain) {
                        errors.push(format!("domain is not a valid DNS name: {:?}", domain));
                    }
                }
                domains
            }
        };

        let rsa_key_size = match self.rsa_key_size {
            None => Some(RsaKeySize::default()),
            Some(Lenient::Valid(bits)) => match RsaKeySize::try_from(bits) {
                Ok(size) => Some(size),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            Some(Lenient::Invalid(value)) => {
                errors.push(unsupported_key_size(value));
                None
            }
        };

        let endpoint = match self.endpoint {
            None => Url::parse(DEFAULT_ENDPOINT).ok(),
            Some(Lenient::Valid(endpoint)) => match Url::parse(&endpoint) {
                Ok(url) if url.scheme() == "https" || url.scheme() == "http" => Some(url),
                Ok(url) => {
                    errors.push(format!("endpoint must be an http(s) URL: {}", url));
                    None
                }
                Err(e) => {
                    errors.push(format!("endpoint is not a valid URL: {}", e));
                    None
                }
            },
            Some(Lenient::Invalid(value)) => {
                errors.push(format!("endpoint must be an http(s) URL: {}", value));
                None
            }
        };

        let email = match self.email {
            Some(Lenient::Invalid(value)) => {
                errors.push(format!("email is not a valid address: {}", value));
                None
            }
            Some(Lenient::Valid(email)) => {
                Some(email.trim().to_string()).filter(|e| !e.is_empty())
            }
            None => None,
        };
        if let Some(email) = &email {
            if !email.contains('@') {
                errors.push(format!("email is not a valid address: {}", email));
            }
        }

        let tier = match self.ssm_tier {
            None => Some(SecretTier::default()),
            Some(Lenient::Valid(tier)) => match tier.parse::<SecretTier>() {
                Ok(tier) => Some(tier),
                Err(e) => {
                    errors.push(e.to_string());
                    None
                }
            },
            Some(Lenient::Invalid(value)) => {
                errors.push(format!(
                    "ssm-tier must be one of Standard, Advanced, Intelligent-Tiering: {}",
                    value
                ));
                None
            }
        };

        let config_store_kms_key =
            optional_string(self.config_store_kms_key, "config-store-kms-key", &mut errors);
        let arn = optional_string(self.acm_certificate_arn, "acm-certificate-arn", &mut errors);
        let filters = match self.acm_certificate_filters {
            Some(Lenient::Valid(filters)) => Some(filters).filter(|f| !f.is_empty()),
            Some(Lenient::Invalid(value)) => {
                errors.push(format!(
                    "acm-certificate-filters is not a valid filter object: {}",
                    value
                ));
                None
            }
            None => None,
        };
        let prefix = optional_string(self.ssm_parameter_prefix, "ssm-parameter-prefix", &mut errors);
        let ssm_kms_key = optional_string(self.ssm_kms_key, "ssm-kms-key", &mut errors);

        let identity = match arn.filter(|arn| !arn.is_empty()) {
            Some(arn) => {
                if filters.is_some() {
                    warn!(%arn, "acm-certificate-filters ignored because acm-certificate-arn is set");
                }
                IdentitySelector::Explicit(arn)
            }
            None => match filters {
                Some(filters) => IdentitySelector::Filtered(filters),
                None => IdentitySelector::New,
            },
        };

        match (config_store, rsa_key_size, endpoint, tier) {
            (Some(config_store), Some(rsa_key_size), Some(endpoint), Some(tier))
                if errors.is_empty() =>
            {
                let secrets = prefix.filter(|p| !p.is_empty()).map(|prefix| SecretsTarget {
                    prefix: normalize_prefix(&prefix),
                    kms_key_id: ssm_kms_key.unwrap_or_else(|| DEFAULT_SSM_KMS_KEY.to_string()),
                    tier,
                });
                Ok(ProvisioningRequest {
                    domains,
                    email,
                    endpoint,
                    rsa_key_size,
                    config_store,
                    config_store_kms_key: config_store_kms_key
                        .unwrap_or_else(|| DEFAULT_CONFIG_STORE_KMS_KEY.to_string()),
                    identity,
                    secrets,
                })
            }
            _ => Err(ProvisionError::Validation(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn event(json: &str) -> ProvisioningEvent {
        serde_json::from_str(json).unwrap()
    }
    fn errors(json: &str) -> Vec<String> {
        match event(json).validate() {
            Err(ProvisionError::Validation(errors)) => errors,
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
    #[test]
    fn minimal_event_gets_defaults() {
        let request = event(
            r#"{"domains": ["A.example.com"], "agree-tos": true, "rsa-key-size": 2048,
                "config-store-url": "s3://b/k", "extra-field": [1, 2]}"#,
        )
        .validate()
        .unwrap();
        assert_eq!(request.domains, vec!["a.example.com"]);
        assert_eq!(request.endpoint.as_str(), STAGING_ENDPOINT);
        assert_eq!(request.rsa_key_size, RsaKeySize::Rsa2048);
        assert_eq!(
            request.config_store,
            ConfigStoreLocation {
                bucket: "b".to_string(),
                key: "k".to_string()
            }
        );
        assert_eq!(request.config_store_kms_key, DEFAULT_CONFIG_STORE_KMS_KEY);
        assert_eq!(request.identity, IdentitySelector::New);
        assert_eq!(request.secrets, None);
        assert_eq!(request.email, None);
    }
    #[test]
    fn reports_all_errors_together() {
        let errors = errors(r#"{"agree-tos": false, "domains": []}"#);
        assert!(errors.contains(&"agree-tos must be specified and set to true".to_string()));
        assert!(errors.contains(&"domains not specified or is empty".to_string()));
        assert!(errors.contains(&"config-store-url must be specified".to_string()));
        let message = event(r#"{"agree-tos": false, "domains": []}"#)
            .validate()
            .unwrap_err()
            .to_string();
        assert!(message.starts_with("Invalid event: "));
        assert!(message.contains(
            "agree-tos must be specified and set to true\nconfig-store-url must be specified\ndomains not specified or is empty"
        ));
    }
    #[test]
    fn rejects_unsupported_key_size() {
        let errors = errors(
            r#"{"domains": "a.example.com", "agree-tos": true, "rsa-key-size": 1024,
                "config-store-url": "s3://b/k"}"#,
        );
        assert_eq!(errors, vec!["rsa-key-size must be one of 2048, 3072, 4096: 1024"]);
    }
    #[test]
    fn mistyped_fields_are_reported_with_other_errors() {
        let errors = errors(r#"{"agree-tos": "yes", "domains": [], "rsa-key-size": "1024"}"#);
        assert_eq!(
            errors,
            vec![
                "agree-tos must be specified and set to true".to_string(),
                "config-store-url must be specified".to_string(),
                "domains not specified or is empty".to_string(),
                "rsa-key-size must be one of 2048, 3072, 4096: \"1024\"".to_string(),
            ]
        );
    }
    #[test]
    fn mistyped_optional_fields_are_reported() {
        let errors = errors(
            r#"{"domains": ["a.example.com", 7], "agree-tos": true, "config-store-url": 5,
                "email": false, "ssm-parameter-prefix": ["tls"], "acm-certificate-filters": "all"}"#,
        );
        assert_eq!(
            errors,
            vec![
                "config-store-url is not a valid s3:// url: 5".to_string(),
                "domains must be a DNS name or a list of DNS names: [\"a.example.com\",7]"
                    .to_string(),
                "email is not a valid address: false".to_string(),
                "acm-certificate-filters is not a valid filter object: \"all\"".to_string(),
                "ssm-parameter-prefix must be a string: [\"tls\"]".to_string(),
            ]
        );
    }
    #[test]
    fn rejects_bad_urls_and_names() {
        let errors = errors(
            r#"{"domains": ["ok.example.com", "-bad.example.com", "a..b"], "agree-tos": true,
                "config-store-url": "https://b/k", "endpoint": "mailto:ops@example.com", "ssm-tier": "Gold"}"#,
        );
        assert_eq!(
            errors,
            vec![
                "config-store-url is not a valid s3:// url".to_string(),
                "domain is not a valid DNS name: \"-bad.example.com\"".to_string(),
                "domain is not a valid DNS name: \"a..b\"".to_string(),
                "endpoint must be an http(s) URL: mailto:ops@example.com".to_string(),
                "ssm-tier must be one of Standard, Advanced, Intelligent-Tiering: Gold".to_string(),
            ]
        );
    }
    #[test]
    fn accepts_wildcards_and_rejects_long_labels() {
        assert!(is_valid_domain("*.example.com"));
        assert!(is_valid_domain("a"));
        assert!(!is_valid_domain("a.*.example.com"));
        assert!(!is_valid_domain(&format!("{}.com", "a".repeat(64))));
        assert!(is_valid_domain(&format!("{}.com", "a".repeat(63))));
    }
    #[test]
    fn explicit_arn_wins_over_filters() {
        let request = event(
            r#"{"domains": ["a.example.com"], "agree-tos": true, "config-store-url": "s3://b/k",
                "acm-certificate-arn": "arn:1", "acm-certificate-filters": {"domain": "a.example.com"}}"#,
        )
        .validate()
        .unwrap();
        assert_eq!(request.identity, IdentitySelector::Explicit("arn:1".to_string()));
    }
    #[test]
    fn empty_filters_mean_new_certificate() {
        let request = event(
            r#"{"domains": ["a.example.com"], "agree-tos": true, "config-store-url": "s3://b/k",
                "acm-certificate-filters": {"status": []}}"#,
        )
        .validate()
        .unwrap();
        assert_eq!(request.identity, IdentitySelector::New);
    }
    #[test]
    fn secrets_target_uses_defaults_and_normalized_prefix() {
        let request = event(
            r#"{"domains": ["*.example.com"], "agree-tos": true, "config-store-url": "s3://b/k",
                "ssm-parameter-prefix": "tls/example", "email": " ops@example.com "}"#,
        )
        .validate()
        .unwrap();
        assert_eq!(
            request.secrets,
            Some(SecretsTarget {
                prefix: "/tls/example/".to_string(),
                kms_key_id: DEFAULT_SSM_KMS_KEY.to_string(),
                tier: SecretTier::Standard,
            })
        );
        assert_eq!(request.email.as_deref(), Some("ops@example.com"));
        assert_eq!(request.lineage_name(), "example.com");
        assert_eq!(request.rsa_key_size, RsaKeySize::default());
        assert_eq!(RsaKeySize::default().bits(), 2048);
    }
    #[test]
    fn normalizes_prefixes() {
        assert_eq!(normalize_prefix("a"), "/a/");
        assert_eq!(normalize_prefix("/a/"), "/a/");
        assert_eq!(normalize_prefix("/a/b"), "/a/b/");
        assert_eq!(normalize_prefix("/"), "/");
    }
}
