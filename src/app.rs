//! Wiring: builds the long-lived components from a [`Config`].

use std::sync::Arc;

use crate::catalog::StoreCatalog;
use crate::config::Config;
use crate::imap_client::ImapMailbox;
use crate::pipeline::Pipeline;
use crate::query::ReadService;
use crate::readiness::ReadinessState;
use crate::retrieve::{ArtifactSource, MailRetriever};
use crate::scheduler::RunCoordinator;
use crate::swap::StoreSwapper;

pub struct App {
    pub catalog: StoreCatalog,
    pub swapper: Arc<StoreSwapper>,
    pub readiness: Arc<ReadinessState>,
    pub pipeline: Arc<Pipeline>,
    pub coordinator: Arc<RunCoordinator>,
    pub read: Arc<ReadService>,
}

impl App {
    /// Components backed by the configured IMAP mailbox.
    pub fn new(config: &Config) -> Self {
        let mailbox = Arc::new(ImapMailbox::from_config(&config.mailbox));
        let source = Arc::new(MailRetriever::new(
            mailbox,
            config.mailbox.subject.clone(),
            config.mailbox.timeout(),
        ));
        Self::with_source(config, source)
    }

    /// Components backed by an arbitrary artifact source.
    pub fn with_source(config: &Config, source: Arc<dyn ArtifactSource>) -> Self {
        let catalog = StoreCatalog::new(config.store.dir.clone());
        let swapper = Arc::new(StoreSwapper::new());
        let readiness = Arc::new(ReadinessState::new(config.store.history_size));
        let pipeline = Arc::new(Pipeline::new(
            source,
            catalog.clone(),
            swapper.clone(),
            readiness.clone(),
        ));
        let coordinator = Arc::new(RunCoordinator::new(pipeline.clone()));
        let read = Arc::new(ReadService::new(
            swapper.clone(),
            readiness.clone(),
            config.query.clone(),
        ));

        Self {
            catalog,
            swapper,
            readiness,
            pipeline,
            coordinator,
            read,
        }
    }

    /// Reload the published store for reading only. Unlike
    /// [`Pipeline::restore`] this never sweeps files, so it is safe next to
    /// a running server.
    pub async fn open_current(&self) -> bool {
        match self.catalog.restore().await {
            Some(store) => {
                self.swapper.publish(store);
                self.readiness.mark_ready();
                true
            }
            None => false,
        }
    }
}
