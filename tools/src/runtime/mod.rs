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

pub mod acm_registry;
pub mod certbot_issuer;
pub mod s3_object_store;
pub mod ssm_secret_store;

use acm_registry::AcmRegistry;
use aws_config::BehaviorVersion;
use certbot_issuer::CertbotIssuer;
use certbot_to_acm::Runtime;
use s3_object_store::S3ObjectStore;
use ssm_secret_store::SsmSecretStore;
use std::sync::Arc;

/// A [`Runtime`] backed by AWS, with credentials and region from the default
/// provider chain.
pub async fn aws_runtime(certbot: &str) -> Runtime {
    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    Runtime {
        object_store: Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&config))),
        registry: Arc::new(AcmRegistry::new(aws_sdk_acm::Client::new(&config))),
        secret_store: Arc::new(SsmSecretStore::new(aws_sdk_ssm::Client::new(&config))),
        issuer: Arc::new(CertbotIssuer::new(certbot)),
    }
}
