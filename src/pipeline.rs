//! One pipeline run: retrieve → parse → build → publish.
//!
//! Every [`PipelineError`] is caught here at the run boundary and recorded
//! in the run record; nothing propagates to readers. A run that finds the
//! artifact already loaded ends as `FAILED_NO_DATA` without touching the
//! store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use snapshot_relay_core::models::{KnownArtifact, RunOutcome, RunRecord, SnapshotArtifact, Trigger};

use crate::catalog::StoreCatalog;
use crate::decompress::parse_artifact;
use crate::error::PipelineError;
use crate::loader::StoreBuilder;
use crate::readiness::ReadinessState;
use crate::retrieve::{ArtifactSource, FetchOutcome};
use crate::scheduler::RunExecutor;
use crate::swap::StoreSwapper;

pub struct Pipeline {
    source: Arc<dyn ArtifactSource>,
    builder: StoreBuilder,
    catalog: StoreCatalog,
    swapper: Arc<StoreSwapper>,
    readiness: Arc<ReadinessState>,
    known: Mutex<Option<KnownArtifact>>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        catalog: StoreCatalog,
        swapper: Arc<StoreSwapper>,
        readiness: Arc<ReadinessState>,
    ) -> Self {
        Self {
            source,
            builder: StoreBuilder::new(catalog.clone()),
            catalog,
            swapper,
            readiness,
            known: Mutex::new(None),
        }
    }

    /// Identity of the artifact behind the current store, if any.
    pub fn known(&self) -> Option<KnownArtifact> {
        self.known.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_known(&self, known: KnownArtifact) {
        *self.known.lock().unwrap_or_else(|e| e.into_inner()) = Some(known);
    }

    /// Republish the store recorded in the catalog and sweep stray files.
    ///
    /// Returns true if a store was restored (readiness is then `READY`).
    pub async fn restore(&self) -> bool {
        let restored = self.catalog.restore().await;
        let keep = restored.as_ref().map(|s| s.manifest().file.clone());

        let swept = self.catalog.sweep_orphans(keep.as_deref());
        if swept > 0 {
            tracing::info!(swept, "removed unreferenced store files");
        }

        match restored {
            Some(store) => {
                self.set_known(KnownArtifact {
                    fingerprint: store.fingerprint().clone(),
                    message_key: store.manifest().message_key.clone(),
                });
                self.swapper.publish(store);
                self.readiness.mark_ready();
                true
            }
            None => false,
        }
    }

    /// Execute one full run and record it.
    #[tracing::instrument(skip(self), fields(source = self.source.name()))]
    pub async fn run(&self, trigger: Trigger) -> RunRecord {
        let mut run = RunRecord::start(trigger);
        self.readiness.run_started(&run);
        tracing::info!(run_id = %run.id, "run started");

        let outcome = match self.attempt(&mut run).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(run_id = %run.id, kind = e.kind(), error = %e, "run failed");
                RunOutcome::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        };

        run.finish(outcome);
        tracing::info!(
            run_id = %run.id,
            state = ?run.state(),
            duration_ms = run.duration_ms(),
            "run finished"
        );
        self.readiness.run_finished(run.clone());
        run
    }

    async fn attempt(&self, run: &mut RunRecord) -> Result<RunOutcome, PipelineError> {
        match self.source.fetch(self.known()).await? {
            FetchOutcome::NoNewData(known) => {
                tracing::info!(fingerprint = %known.fingerprint.short(), "no new data");
                run.fingerprint = Some(known.fingerprint.clone());
                self.set_known(known);
                Ok(RunOutcome::NoNewData)
            }
            FetchOutcome::NewArtifact(artifact) => {
                tracing::info!(
                    file = %artifact.file_name,
                    bytes = artifact.bytes.len(),
                    fingerprint = %artifact.fingerprint.short(),
                    "retrieved new artifact"
                );
                run.fingerprint = Some(artifact.fingerprint.clone());
                self.readiness.update_active(run);
                self.ingest(artifact).await
            }
        }
    }

    /// Parse, build and publish one artifact.
    pub async fn ingest(&self, artifact: SnapshotArtifact) -> Result<RunOutcome, PipelineError> {
        let known = artifact.known();
        let SnapshotArtifact {
            file_name, bytes, ..
        } = artifact;

        let document = tokio::task::spawn_blocking(move || parse_artifact(&file_name, &bytes))
            .await
            .map_err(|e| PipelineError::CorruptArtifact(format!("parse task failed: {}", e)))??;

        let store = self.builder.build(&document, &known).await?;
        drop(document);

        let tables = store.tables().len();
        let rows = store.total_rows();

        if let Err(e) = self.catalog.write_current(store.manifest()) {
            store.retire();
            return Err(e);
        }

        self.swapper.publish(store);
        self.set_known(known);
        self.readiness.mark_ready();

        Ok(RunOutcome::Succeeded { tables, rows })
    }

    /// Ingest a local artifact file, bypassing the mailbox.
    pub async fn ingest_file(&self, path: &Path) -> anyhow::Result<RunOutcome> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let artifact = SnapshotArtifact::new(file_name, bytes, None);
        Ok(self.ingest(artifact).await?)
    }
}

#[async_trait]
impl RunExecutor for Pipeline {
    async fn execute(&self, trigger: Trigger) -> RunRecord {
        self.run(trigger).await
    }
}
