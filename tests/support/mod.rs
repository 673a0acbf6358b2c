#![allow(dead_code)]

use autorip::cd::toc::Disc;
use autorip::rip::{DriveToken, RipJob, RipOrchestrator, RipSettings, StatusHandle, StatusPublisher};
use autorip::test_support::{MockChecksumDb, MockEncoder, MockExtractor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Mocks wired into one orchestrator
pub struct Harness {
    pub extractor: Arc<MockExtractor>,
    pub encoder: Arc<MockEncoder>,
    pub database: Option<Arc<MockChecksumDb>>,
    pub settings: RipSettings,
}

impl Harness {
    pub fn new(extractor: MockExtractor, database: Option<MockChecksumDb>, settings: RipSettings) -> Self {
        Self {
            extractor: Arc::new(extractor),
            encoder: Arc::new(MockEncoder::new()),
            database: database.map(Arc::new),
            settings,
        }
    }

    pub fn with_encoder(mut self, encoder: MockEncoder) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    pub fn orchestrator(&self) -> RipOrchestrator {
        let orchestrator = RipOrchestrator::new(
            self.extractor.clone(),
            self.encoder.clone(),
            DriveToken::new(),
            self.settings.clone(),
        );
        match &self.database {
            Some(database) => orchestrator.with_database(database.clone()),
            None => orchestrator,
        }
    }

    /// Run one job to completion, returning it with the final status
    pub async fn rip(&self, disc: Disc) -> (RipJob, StatusHandle) {
        let orchestrator = self.orchestrator();
        let total = orchestrator.plan(&disc).tracks.len();
        let (publisher, status) = StatusPublisher::new(total);
        let job = RipJob::new(&disc.id);
        let job = orchestrator
            .run(job, Arc::new(disc), CancellationToken::new(), publisher)
            .await;
        (job, status)
    }
}
