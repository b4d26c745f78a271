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

use anyhow::{Context, Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ObjectCannedAcl, ServerSideEncryption};
use aws_sdk_s3::Client;
use certbot_to_acm::archive::{ObjectStore, PutObject};

/// An [`ObjectStore`] implemented by the S3 SDK.
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        S3ObjectStore { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) => {
                let e = e.into_service_error();
                if e.is_no_such_key() {
                    return Ok(None);
                }
                return Err(Error::new(e).context("GetObject failed"));
            }
        };
        let body = output
            .body
            .collect()
            .await
            .context("Failed to read object body")?;
        Ok(Some(body.into_bytes().to_vec()))
    }
    async fn put_object(&self, object: PutObject) -> Result<()> {
        self.client
            .put_object()
            .bucket(object.bucket)
            .key(object.key)
            .body(ByteStream::from(object.body))
            .acl(ObjectCannedAcl::Private)
            .server_side_encryption(ServerSideEncryption::AwsKms)
            .ssekms_key_id(object.kms_key_id)
            .send()
            .await
            .map_err(|e| Error::new(e.into_service_error()).context("PutObject failed"))?;
        Ok(())
    }
}
