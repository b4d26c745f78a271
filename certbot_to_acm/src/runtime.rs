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

use crate::archive::{InMemoryObjectStore, ObjectStore};
use crate::issuer::{Issuer, NullIssuer};
use crate::registry::{CertificateRegistry, InMemoryRegistry};
use crate::secrets::{InMemorySecretStore, SecretStore};
use std::sync::Arc;

/// The external systems a provisioning run talks to.
pub struct Runtime {
    pub object_store: Arc<dyn ObjectStore>,
    pub registry: Arc<dyn CertificateRegistry>,
    pub secret_store: Arc<dyn SecretStore>,
    pub issuer: Arc<dyn Issuer>,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime {
            object_store: Arc::new(InMemoryObjectStore::default()),
            registry: Arc::new(InMemoryRegistry::default()),
            secret_store: Arc::new(InMemorySecretStore::default()),
            issuer: Arc::new(NullIssuer),
        }
    }
}
