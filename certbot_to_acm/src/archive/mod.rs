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

//! Keeps the certbot config directory in object storage as a tar.gz archive.

pub mod fixup;

use crate::error::ProvisionError;
use crate::request::ConfigStoreLocation;
use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PutObject {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    /// Server-side encryption key.
    pub kms_key_id: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns `None` if the object does not exist; every other failure is an
    /// error.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put_object(&self, object: PutObject) -> Result<()>;
}

#[derive(Default)]
struct Objects {
    objects: HashMap<(String, String), PutObject>,
    puts: usize,
}

/// Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore(Arc<RwLock<Objects>>);

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub async fn object(&self, bucket: &str, key: &str) -> Option<PutObject> {
        let guard = self.0.read().await;
        guard
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
    pub async fn put_count(&self) -> usize {
        self.0.read().await.puts
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.object(bucket, key).await.map(|o| o.body))
    }
    async fn put_object(&self, object: PutObject) -> Result<()> {
        let mut guard = self.0.write().await;
        guard.puts += 1;
        guard
            .objects
            .insert((object.bucket.clone(), object.key.clone()), object);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RestoreOutcome {
    Restored,
    /// Nothing stored yet; certbot starts from an empty config.
    Absent,
    /// Something is stored but it is not a tar.gz archive. Treated like
    /// `Absent`.
    Incompatible,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Downloads the archive at `location` and unpacks it into `config_dir`,
/// which must be empty.
pub async fn restore(
    store: &dyn ObjectStore,
    location: &ConfigStoreLocation,
    config_dir: &Path,
) -> Result<RestoreOutcome, ProvisionError> {
    let storage_error = |action, source| ProvisionError::Storage {
        action,
        bucket: location.bucket.clone(),
        key: location.key.clone(),
        source,
    };
    let body = match store
        .get_object(&location.bucket, &location.key)
        .await
        .map_err(|e| storage_error("Failed to download config archive from", e))?
    {
        Some(body) => body,
        None => {
            info!(%location, "No config archive stored yet");
            return Ok(RestoreOutcome::Absent);
        }
    };
    if body.starts_with(&ZIP_MAGIC) {
        warn!(%location, "Ignoring legacy ZIP config archive");
        return Ok(RestoreOutcome::Incompatible);
    }
    if !body.starts_with(&GZIP_MAGIC) {
        warn!(%location, "Ignoring config archive with unknown format");
        return Ok(RestoreOutcome::Incompatible);
    }
    let size = body.len();
    unpack(body, config_dir)
        .await
        .map_err(|e| storage_error("Failed to extract config archive from", e))?;
    info!(%location, size, "Restored config archive");
    Ok(RestoreOutcome::Restored)
}

async fn unpack(body: Vec<u8>, dest: &Path) -> Result<()> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(body)));
        archive.set_preserve_permissions(true);
        archive
            .unpack(&dest)
            .context("Failed to unpack config archive")
    })
    .await
    .context("Config archive extraction task panicked")?
}

/// Serializes every regular file and symlink under `config_dir`, in sorted
/// path order, into a tar.gz archive. Symlinks are stored as links.
pub fn pack(config_dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.follow_symlinks(false);
    for entry in WalkDir::new(config_dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();
        if !file_type.is_file() && !file_type.is_symlink() {
            continue;
        }
        let relpath = entry.path().strip_prefix(config_dir)?;
        debug!(path = %relpath.display(), "Adding to config archive");
        builder
            .append_path_with_name(entry.path(), relpath)
            .with_context(|| format!("Failed to add {} to archive", relpath.display()))?;
    }
    let encoder = builder.into_inner().context("Failed to finish tar archive")?;
    encoder.finish().context("Failed to finish gzip compression")
}

/// Uploads `config_dir` as the new archive at `location`, replacing the old
/// one.
pub async fn persist(
    store: &dyn ObjectStore,
    config_dir: &Path,
    location: &ConfigStoreLocation,
    kms_key_id: &str,
) -> Result<(), ProvisionError> {
    let dir = config_dir.to_path_buf();
    let body = tokio::task::spawn_blocking(move || pack(&dir))
        .await
        .context("Config archive packing task panicked")
        .and_then(|packed| packed)
        .map_err(ProvisionError::Workspace)?;
    let size = body.len();
    store
        .put_object(PutObject {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            body,
            kms_key_id: kms_key_id.to_string(),
        })
        .await
        .map_err(|source| ProvisionError::Storage {
            action: "Failed to upload config archive to",
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            source,
        })?;
    info!(%location, size, "Stored config archive");
    Ok(())
}
