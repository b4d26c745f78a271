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
use aws_sdk_ssm::types::{ParameterTier, ParameterType};
use aws_sdk_ssm::Client;
use certbot_to_acm::secrets::{SecretEncryption, SecretEntry, SecretStore};

/// A [`SecretStore`] implemented by the SSM parameter store.
pub struct SsmSecretStore {
    client: Client,
}

impl SsmSecretStore {
    pub fn new(client: Client) -> Self {
        SsmSecretStore { client }
    }
}

fn parameter_type(encryption: &SecretEncryption) -> (ParameterType, Option<String>) {
    match encryption {
        SecretEncryption::Plain => (ParameterType::String, None),
        SecretEncryption::Encrypted { kms_key_id } => {
            (ParameterType::SecureString, Some(kms_key_id.clone()))
        }
    }
}

#[async_trait]
impl SecretStore for SsmSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        let output = match self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let e = e.into_service_error();
                if e.is_parameter_not_found() {
                    return Ok(None);
                }
                return Err(Error::new(e).context(format!("GetParameter {} failed", name)));
            }
        };
        let value = output
            .parameter()
            .and_then(|parameter| parameter.value())
            .ok_or_else(|| anyhow!("Parameter {} has no value", name))?;
        Ok(Some(value.to_string()))
    }
    async fn put_secret(&self, entry: &SecretEntry) -> Result<()> {
        let (r#type, key_id) = parameter_type(&entry.encryption);
        self.client
            .put_parameter()
            .name(&entry.name)
            .value(&entry.value)
            .description(&entry.description)
            .r#type(r#type)
            .set_key_id(key_id)
            .tier(ParameterTier::from(entry.tier.as_str()))
            .overwrite(true)
            .send()
            .await
            .map_err(|e| {
                Error::new(e.into_service_error())
                    .context(format!("PutParameter {} failed", entry.name))
            })?;
        Ok(())
    }
}
