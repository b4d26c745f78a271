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

//! The secret/parameter store (SSM Parameter Store).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SecretTier {
    #[default]
    Standard,
    Advanced,
    IntelligentTiering,
}

impl SecretTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SecretTier::Standard => "Standard",
            SecretTier::Advanced => "Advanced",
            SecretTier::IntelligentTiering => "Intelligent-Tiering",
        }
    }
}

impl FromStr for SecretTier {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Standard" => Ok(SecretTier::Standard),
            "Advanced" => Ok(SecretTier::Advanced),
            "Intelligent-Tiering" => Ok(SecretTier::IntelligentTiering),
            _ => Err(anyhow!(
                "ssm-tier must be one of Standard, Advanced, Intelligent-Tiering: {}",
                s
            )),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SecretEncryption {
    Plain,
    Encrypted { kms_key_id: String },
}

/// A value to be stored under `name`.
#[derive(Clone, Eq, PartialEq)]
pub struct SecretEntry {
    pub name: String,
    pub value: String,
    pub description: String,
    pub encryption: SecretEncryption,
    pub tier: SecretTier,
}

impl fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretEntry")
            .field("name", &self.name)
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .field("description", &self.description)
            .field("encryption", &self.encryption)
            .field("tier", &self.tier)
            .finish()
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns `None` if nothing is stored under `name`.
    async fn get_secret(&self, name: &str) -> Result<Option<String>>;
    /// Stores `entry`, overwriting any previous value.
    async fn put_secret(&self, entry: &SecretEntry) -> Result<()>;
}

#[derive(Default)]
struct Secrets {
    entries: HashMap<String, SecretEntry>,
    writes: Vec<String>,
}

/// Clones share state.
#[derive(Clone, Default)]
pub struct InMemorySecretStore(Arc<RwLock<Secrets>>);

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub async fn entry(&self, name: &str) -> Option<SecretEntry> {
        self.0.read().await.entries.get(name).cloned()
    }
    /// Names of every write, in order.
    pub async fn writes(&self) -> Vec<String> {
        self.0.read().await.writes.clone()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        let guard = self.0.read().await;
        Ok(guard.entries.get(name).map(|e| e.value.clone()))
    }
    async fn put_secret(&self, entry: &SecretEntry) -> Result<()> {
        let mut guard = self.0.write().await;
        guard.writes.push(entry.name.clone());
        guard.entries.insert(entry.name.clone(), entry.clone());
        Ok(())
    }
}
