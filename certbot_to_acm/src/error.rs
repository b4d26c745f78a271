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

use crate::pattern::ArtifactRole;
use std::path::PathBuf;
use thiserror::Error;

/// Every way a provisioning run can fail.
///
/// `Validation`, `InvalidIdentifier` and `MultipleIdentities` are raised
/// before anything external is modified. The remaining variants can leave
/// earlier steps applied; re-running with the same event converges.
///
/// An archive with an unexpected container format is not an error at all, it
/// is reported as [`crate::archive::RestoreOutcome::Incompatible`].
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid event: {}", .0.join("\n"))]
    Validation(Vec<String>),
    #[error("Invalid certificate ARN: {arn} ({reason})")]
    InvalidIdentifier { arn: String, reason: String },
    #[error("Multiple certificates found: {}", .0.join(" "))]
    MultipleIdentities(Vec<String>),
    #[error("Failed to list certificates")]
    Registry(#[source] anyhow::Error),
    #[error("{action} s3://{bucket}/{key}")]
    Storage {
        action: &'static str,
        bucket: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Did not find {role} in {}", .dir.display())]
    MissingArtifact { role: ArtifactRole, dir: PathBuf },
    #[error("The {role} is not usable")]
    InvalidArtifact {
        role: ArtifactRole,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to run certbot")]
    IssuerUnavailable(#[source] anyhow::Error),
    #[error("certbot command exited with exit code {0}")]
    Issuance(i32),
    #[error("Failed to import certificate")]
    Import(#[source] anyhow::Error),
    #[error("Failed to reconcile parameter {name}")]
    Reconciliation {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to prepare the certbot working directory")]
    Workspace(#[source] anyhow::Error),
}

impl ProvisionError {
    /// Whether the failure happened before any external system was modified.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            ProvisionError::Validation(_)
                | ProvisionError::InvalidIdentifier { .. }
                | ProvisionError::MultipleIdentities(_)
                | ProvisionError::Registry(_)
        )
    }
}
