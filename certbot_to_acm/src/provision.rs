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

//! Drives one provisioning run from event to distributed certificate.

use crate::archive::{self, fixup::fixup_config_dir, RestoreOutcome};
use crate::artifacts;
use crate::error::ProvisionError;
use crate::identity;
use crate::issuer::IssuanceArgs;
use crate::reconciler::{self, SecretChange};
use crate::registry::{CertificateIdentity, ImportCertificate};
use crate::request::{ProvisioningEvent, ProvisioningRequest};
use crate::runtime::Runtime;
use anyhow::Context;
use serde_json::{json, Value};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::{error, info};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Validating,
    ResolvingIdentity,
    RestoringConfig,
    Issuing,
    ExtractingArtifacts,
    PersistingConfig,
    UpdatingIdentity,
    ReconcilingSecrets,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::ResolvingIdentity => "resolving-identity",
            Stage::RestoringConfig => "restoring-config",
            Stage::Issuing => "issuing",
            Stage::ExtractingArtifacts => "extracting-artifacts",
            Stage::PersistingConfig => "persisting-config",
            Stage::UpdatingIdentity => "updating-identity",
            Stage::ReconcilingSecrets => "reconciling-secrets",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful run did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionReport {
    pub stages: Vec<Stage>,
    pub restore: RestoreOutcome,
    /// The certificate that was updated, `None` if a new one was created.
    pub existing_identity: Option<CertificateIdentity>,
    pub certificate_arn: String,
    /// Empty when no parameter prefix was requested.
    pub secrets: Vec<SecretChange>,
}

// Private scratch space for one certbot run; removed on drop.
struct Workspace {
    _root: TempDir,
    config_dir: PathBuf,
    work_dir: PathBuf,
    logs_dir: PathBuf,
}

impl Workspace {
    fn new() -> anyhow::Result<Self> {
        let root = tempfile::Builder::new()
            .prefix("certbot")
            .tempdir()
            .context("Failed to create temporary directory")?;
        let config_dir = root.path().join("config");
        let work_dir = root.path().join("work");
        let logs_dir = root.path().join("log");
        for dir in [&config_dir, &work_dir, &logs_dir] {
            fs::create_dir(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(Workspace {
            _root: root,
            config_dir,
            work_dir,
            logs_dir,
        })
    }
}

struct Progress {
    stages: Vec<Stage>,
}

impl Progress {
    fn enter(&mut self, stage: Stage) {
        info!(%stage, "Entering stage");
        self.stages.push(stage);
    }
    fn current(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Validating)
    }
}

fn error_chain(e: &ProvisionError) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Runs every stage in order. A failure stops the run; stages already
/// completed are not undone.
pub async fn provision(
    runtime: &Runtime,
    event: ProvisioningEvent,
) -> Result<ProvisionReport, ProvisionError> {
    let mut progress = Progress { stages: vec![] };
    match run(runtime, event, &mut progress).await {
        Ok(report) => Ok(report),
        Err(e) => {
            error!(stage = %progress.current(), error = %error_chain(&e), "Provisioning failed");
            progress.enter(Stage::Failed);
            Err(e)
        }
    }
}

async fn run(
    runtime: &Runtime,
    event: ProvisioningEvent,
    progress: &mut Progress,
) -> Result<ProvisionReport, ProvisionError> {
    progress.enter(Stage::Validating);
    let request = event.validate()?;
    info!(domains = ?request.domains, config_store = %request.config_store, "Validated event");

    progress.enter(Stage::ResolvingIdentity);
    let existing_identity =
        identity::resolve(runtime.registry.as_ref(), &request.identity).await?;
    match &existing_identity {
        Some(identity) => info!(arn = %identity.arn, "Updating existing certificate"),
        None => info!("A new certificate will be imported"),
    }

    progress.enter(Stage::RestoringConfig);
    let workspace = Workspace::new().map_err(ProvisionError::Workspace)?;
    let restore = archive::restore(
        runtime.object_store.as_ref(),
        &request.config_store,
        &workspace.config_dir,
    )
    .await?;
    if restore == RestoreOutcome::Restored {
        let repaired = fixup_config_dir(&workspace.config_dir).map_err(ProvisionError::Workspace)?;
        if !repaired.removed.is_empty() || !repaired.relinked.is_empty() {
            info!(
                removed = repaired.removed.len(),
                relinked = repaired.relinked.len(),
                "Repaired restored config"
            );
        }
    }

    progress.enter(Stage::Issuing);
    issue(runtime, &request, &workspace).await?;

    progress.enter(Stage::ExtractingArtifacts);
    let artifacts = artifacts::extract(&workspace.config_dir, Some(request.lineage_name()))?;
    info!(lineage = %artifacts.lineage, "Extracted certificate artifacts");

    progress.enter(Stage::PersistingConfig);
    archive::persist(
        runtime.object_store.as_ref(),
        &workspace.config_dir,
        &request.config_store,
        &request.config_store_kms_key,
    )
    .await?;

    progress.enter(Stage::UpdatingIdentity);
    let certificate_arn = runtime
        .registry
        .import_certificate(ImportCertificate {
            certificate: artifacts.certificate.clone(),
            chain: artifacts.chain.clone(),
            private_key: artifacts.private_key.clone(),
            arn: existing_identity.as_ref().map(|identity| identity.arn.clone()),
        })
        .await
        .map_err(ProvisionError::Import)?;
    info!(arn = %certificate_arn, "Imported certificate");

    let mut secrets = vec![];
    if let Some(target) = &request.secrets {
        progress.enter(Stage::ReconcilingSecrets);
        let entries = reconciler::desired_entries(target, &artifacts, &request.domains)?;
        secrets = reconciler::reconcile(runtime.secret_store.as_ref(), &entries).await?;
    }

    progress.enter(Stage::Done);
    Ok(ProvisionReport {
        stages: progress.stages.clone(),
        restore,
        existing_identity,
        certificate_arn,
        secrets,
    })
}

async fn issue(
    runtime: &Runtime,
    request: &ProvisioningRequest,
    workspace: &Workspace,
) -> Result<(), ProvisionError> {
    let args = IssuanceArgs {
        config_dir: workspace.config_dir.clone(),
        work_dir: workspace.work_dir.clone(),
        logs_dir: workspace.logs_dir.clone(),
        endpoint: request.endpoint.to_string(),
        email: request.email.clone(),
        rsa_key_size: request.rsa_key_size.bits(),
        domains: request.domains.clone(),
    };
    let status = runtime
        .issuer
        .issue(&args)
        .await
        .map_err(ProvisionError::IssuerUnavailable)?;
    if status != 0 {
        return Err(ProvisionError::Issuance(status));
    }
    info!("certbot finished");
    Ok(())
}

/// Entry point for a raw invocation event. Returns an empty object on
/// success.
pub async fn handle_event(runtime: &Runtime, event: Value) -> Result<Value, ProvisionError> {
    let event: ProvisioningEvent = serde_json::from_value(event)
        .map_err(|e| ProvisionError::Validation(vec![e.to_string()]))?;
    provision(runtime, event).await?;
    Ok(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryObjectStore;
    use crate::issuer::mock_issuer::{fake_pem, MockIssuer};
    use crate::pattern::ArtifactRole;
    use crate::registry::InMemoryRegistry;
    use crate::secrets::{InMemorySecretStore, SecretEncryption};
    use std::sync::Arc;

    struct Doubles {
        objects: InMemoryObjectStore,
        registry: InMemoryRegistry,
        secrets: InMemorySecretStore,
        issuer: MockIssuer,
    }

    impl Doubles {
        fn new(issuer: MockIssuer) -> Self {
            Self::with_registry(issuer, InMemoryRegistry::new())
        }
        fn with_registry(issuer: MockIssuer, registry: InMemoryRegistry) -> Self {
            Doubles {
                objects: InMemoryObjectStore::new(),
                registry,
                secrets: InMemorySecretStore::new(),
                issuer,
            }
        }
        fn runtime(&self) -> Runtime {
            Runtime {
                object_store: Arc::new(self.objects.clone()),
                registry: Arc::new(self.registry.clone()),
                secret_store: Arc::new(self.secrets.clone()),
                issuer: Arc::new(self.issuer.clone()),
            }
        }
        async fn nothing_mutated(&self) -> bool {
            self.objects.put_count().await == 0
                && self.registry.imports().await.is_empty()
                && self.secrets.writes().await.is_empty()
        }
    }

    fn event(value: Value) -> ProvisioningEvent {
        serde_json::from_value(value).unwrap()
    }

    fn minimal() -> Value {
        json!({
            "domains": ["a.example.com"],
            "agree-tos": true,
            "rsa-key-size": 2048,
            "config-store-url": "s3://b/k",
        })
    }

    #[tokio::test]
    async fn first_run_creates_a_new_certificate() {
        let doubles = Doubles::new(MockIssuer::new());
        let report = provision(&doubles.runtime(), event(minimal())).await.unwrap();
        assert_eq!(
            report.stages,
            vec![
                Stage::Validating,
                Stage::ResolvingIdentity,
                Stage::RestoringConfig,
                Stage::Issuing,
                Stage::ExtractingArtifacts,
                Stage::PersistingConfig,
                Stage::UpdatingIdentity,
                Stage::Done,
            ]
        );
        assert_eq!(report.restore, RestoreOutcome::Absent);
        assert_eq!(report.existing_identity, None);

        let imports = doubles.registry.imports().await;
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].requested_arn, None);
        assert_eq!(imports[0].arn, report.certificate_arn);
        assert_eq!(
            imports[0].certificate,
            fake_pem("a.example.com", ArtifactRole::Certificate, 1).into_bytes()
        );

        let stored = doubles.objects.object("b", "k").await.unwrap();
        assert_eq!(stored.kms_key_id, "alias/aws/s3");
        assert!(doubles.secrets.writes().await.is_empty());

        let calls = doubles.issuer.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].domains, vec!["a.example.com"]);
        assert_eq!(calls[0].rsa_key_size, 2048);
        assert!(!calls[0].config_dir.exists());
    }

    #[tokio::test]
    async fn second_run_renews_into_the_same_certificate() {
        let doubles = Doubles::new(MockIssuer::new());
        let first = provision(&doubles.runtime(), event(minimal())).await.unwrap();

        let mut renewal = minimal();
        renewal["acm-certificate-arn"] = json!(first.certificate_arn.clone());
        renewal["ssm-parameter-prefix"] = json!("tls/a");
        let second = provision(&doubles.runtime(), event(renewal)).await.unwrap();
        assert_eq!(second.restore, RestoreOutcome::Restored);
        assert_eq!(second.certificate_arn, first.certificate_arn);
        assert_eq!(second.stages[second.stages.len() - 2], Stage::ReconcilingSecrets);

        let imports = doubles.registry.imports().await;
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[1].requested_arn, Some(first.certificate_arn));
        assert_eq!(
            imports[1].certificate,
            fake_pem("a.example.com", ArtifactRole::Certificate, 2).into_bytes()
        );

        assert!(second.secrets.iter().all(|change| change.written));
        let key = doubles.secrets.entry("/tls/a/key").await.unwrap();
        assert_eq!(
            key.encryption,
            SecretEncryption::Encrypted {
                kms_key_id: "alias/aws/ssm".to_string()
            }
        );
        assert_eq!(
            key.value,
            fake_pem("a.example.com", ArtifactRole::PrivateKey, 2)
        );
        assert_eq!(doubles.objects.put_count().await, 2);
    }

    #[tokio::test]
    async fn incomplete_lineage_is_not_replaced_by_another_domain() {
        let doubles = Doubles::new(MockIssuer::new());
        let mut other = minimal();
        other["domains"] = json!(["b.example.com"]);
        provision(&doubles.runtime(), event(other)).await.unwrap();

        let runtime = Runtime {
            issuer: Arc::new(MockIssuer::omitting(ArtifactRole::PrivateKey)),
            ..doubles.runtime()
        };
        let err = provision(&runtime, event(minimal())).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::MissingArtifact {
                role: ArtifactRole::PrivateKey,
                ..
            }
        ));
        assert_eq!(doubles.registry.imports().await.len(), 1);
        assert_eq!(doubles.objects.put_count().await, 1);
    }

    #[tokio::test]
    async fn renamed_lineage_is_imported_and_kept() {
        let doubles = Doubles::new(MockIssuer::new());
        provision(&doubles.runtime(), event(minimal())).await.unwrap();

        let mut widened = minimal();
        widened["domains"] = json!(["a.example.com", "www.a.example.com"]);
        let runtime = Runtime {
            issuer: Arc::new(MockIssuer::with_lineage("a.example.com-0001")),
            ..doubles.runtime()
        };
        provision(&runtime, event(widened.clone())).await.unwrap();
        provision(&runtime, event(widened)).await.unwrap();

        let imports = doubles.registry.imports().await;
        assert_eq!(imports.len(), 3);
        assert_eq!(
            imports[1].certificate,
            fake_pem("a.example.com-0001", ArtifactRole::Certificate, 1).into_bytes()
        );
        assert_eq!(
            imports[2].certificate,
            fake_pem("a.example.com-0001", ArtifactRole::Certificate, 2).into_bytes()
        );
    }

    #[tokio::test]
    async fn filters_select_the_imported_certificate() {
        let doubles = Doubles::new(MockIssuer::new());
        let first = provision(&doubles.runtime(), event(minimal())).await.unwrap();

        let mut renewal = minimal();
        renewal["acm-certificate-filters"] = json!({"status": "ISSUED", "type": "IMPORTED"});
        let second = provision(&doubles.runtime(), event(renewal)).await.unwrap();
        assert_eq!(
            second.existing_identity.map(|identity| identity.arn),
            Some(first.certificate_arn)
        );
    }

    #[tokio::test]
    async fn invalid_event_makes_no_external_calls() {
        let doubles = Doubles::new(MockIssuer::new());
        let err = provision(
            &doubles.runtime(),
            event(json!({"agree-tos": false, "domains": []})),
        )
        .await
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("agree-tos must be specified and set to true"));
        assert!(message.contains("domains not specified or is empty"));
        assert!(err.is_pre_mutation());
        assert!(doubles.issuer.calls().await.is_empty());
        assert_eq!(doubles.registry.list_calls().await, 0);
        assert!(doubles.nothing_mutated().await);
    }

    #[tokio::test]
    async fn ambiguous_filters_stop_before_issuance() {
        let identity = |arn: &str| CertificateIdentity {
            arn: arn.to_string(),
            status: Some("ISSUED".to_string()),
            ..Default::default()
        };
        let registry = InMemoryRegistry::with_identities(vec![identity("arn:1"), identity("arn:2")]);
        let doubles = Doubles::with_registry(MockIssuer::new(), registry);
        let mut value = minimal();
        value["acm-certificate-filters"] = json!({"status": ["ISSUED"]});
        let err = provision(&doubles.runtime(), event(value)).await.unwrap_err();
        assert_eq!(err.to_string(), "Multiple certificates found: arn:1 arn:2");
        assert!(doubles.issuer.calls().await.is_empty());
        assert!(doubles.nothing_mutated().await);
    }

    #[tokio::test]
    async fn unknown_arn_is_rejected() {
        let doubles = Doubles::new(MockIssuer::new());
        let mut value = minimal();
        value["acm-certificate-arn"] = json!("arn:missing");
        let err = provision(&doubles.runtime(), event(value)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidIdentifier { .. }));
        assert!(doubles.issuer.calls().await.is_empty());
    }

    #[tokio::test]
    async fn missing_artifact_stops_all_later_stages() {
        for role in ArtifactRole::ALL {
            let doubles = Doubles::new(MockIssuer::omitting(role));
            let mut value = minimal();
            value["ssm-parameter-prefix"] = json!("/tls/");
            let err = provision(&doubles.runtime(), event(value)).await.unwrap_err();
            match err {
                ProvisionError::MissingArtifact { role: missing, .. } => assert_eq!(missing, role),
                other => panic!("expected missing {:?}, got {:?}", role, other),
            }
            assert!(doubles.nothing_mutated().await);
        }
    }

    #[tokio::test]
    async fn failed_issuance_surfaces_the_exit_code() {
        let doubles = Doubles::new(MockIssuer::failing(1));
        let err = provision(&doubles.runtime(), event(minimal())).await.unwrap_err();
        assert_eq!(err.to_string(), "certbot command exited with exit code 1");
        assert!(doubles.nothing_mutated().await);
    }

    #[tokio::test]
    async fn unconfigured_issuer_is_unavailable() {
        let err = provision(&Runtime::default(), event(minimal())).await.unwrap_err();
        assert!(matches!(err, ProvisionError::IssuerUnavailable(_)));
    }

    #[tokio::test]
    async fn handle_event_returns_an_empty_object() {
        let doubles = Doubles::new(MockIssuer::new());
        let response = handle_event(&doubles.runtime(), minimal()).await.unwrap();
        assert_eq!(response, json!({}));
    }

    #[tokio::test]
    async fn handle_event_reports_malformed_fields() {
        let doubles = Doubles::new(MockIssuer::new());
        let err = handle_event(
            &doubles.runtime(),
            json!({"agree-tos": "yes", "domains": [], "rsa-key-size": "1024"}),
        )
        .await
        .unwrap_err();
        match &err {
            ProvisionError::Validation(errors) => assert_eq!(
                errors,
                &vec![
                    "agree-tos must be specified and set to true".to_string(),
                    "config-store-url must be specified".to_string(),
                    "domains not specified or is empty".to_string(),
                    "rsa-key-size must be one of 2048, 3072, 4096: \"1024\"".to_string(),
                ]
            ),
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert!(err.to_string().starts_with("Invalid event: "));
        assert!(doubles.nothing_mutated().await);
    }
    #[tokio::test]
    async fn handle_event_rejects_non_object_events() {
        let doubles = Doubles::new(MockIssuer::new());
        let err = handle_event(&doubles.runtime(), json!(["a.example.com"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }
}
