//! Process-wide rip service
//!
//! Holds the single active job slot. A disc offered while a job is running
//! is rejected, not queued. Finished jobs are archived as JSON next to the
//! output library.

use crate::cd::toc::Disc;
use crate::rip::job::RipJob;
use crate::rip::orchestrator::RipOrchestrator;
use crate::rip::status::{RipStatus, StatusHandle, StatusPublisher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("A rip job is already active ({0})")]
    Busy(Uuid),
    #[error("Rip task failed: {0}")]
    Join(String),
}

struct ActiveJob {
    disc_id: String,
    cancel: CancellationToken,
    status: StatusHandle,
}

#[derive(Default)]
struct Slots {
    active: Option<ActiveJob>,
    last: Option<StatusHandle>,
}

/// Single-job gate in front of the orchestrator
#[derive(Clone)]
pub struct RipService {
    orchestrator: Arc<RipOrchestrator>,
    archive_dir: Option<PathBuf>,
    slots: Arc<Mutex<Slots>>,
}

/// Caller's view of an accepted job
pub struct JobHandle {
    pub job_id: Uuid,
    status: StatusHandle,
    cancel: CancellationToken,
    task: JoinHandle<RipJob>,
}

impl JobHandle {
    pub fn status(&self) -> RipStatus {
        self.status.snapshot()
    }

    pub fn subscribe(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job to reach a terminal state
    pub async fn wait(self) -> Result<RipJob, ServiceError> {
        self.task
            .await
            .map_err(|e| ServiceError::Join(e.to_string()))
    }
}

/// Frees the active slot when the job task ends, including on panic
struct SlotRelease {
    slots: Arc<Mutex<Slots>>,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        if let Some(active) = slots.active.take() {
            slots.last = Some(active.status);
        }
    }
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RipService {
    pub fn new(orchestrator: RipOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            archive_dir: None,
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// Archive every finished job under `dir`
    pub fn with_archive_dir(mut self, dir: PathBuf) -> Self {
        self.archive_dir = Some(dir);
        self
    }

    /// Start ripping `disc`, or reject it if a job is already active
    pub fn accept(&self, disc: Disc) -> Result<JobHandle, ServiceError> {
        let mut slots = lock(&self.slots);
        if let Some(active) = &slots.active {
            let job_id = active.status.snapshot().job_id.unwrap_or_default();
            warn!(
                "Rejecting disc {}: job {} for disc {} is still active",
                disc.id, job_id, active.disc_id
            );
            return Err(ServiceError::Busy(job_id));
        }

        let plan = self.orchestrator.plan(&disc);
        let job = RipJob::new(&disc.id);
        let job_id = job.id;
        let (publisher, status) = StatusPublisher::new(plan.tracks.len());
        publisher.publish(&job);
        let cancel = CancellationToken::new();
        slots.active = Some(ActiveJob {
            disc_id: disc.id.clone(),
            cancel: cancel.clone(),
            status: status.clone(),
        });
        drop(slots);

        let release = SlotRelease {
            slots: self.slots.clone(),
        };
        let orchestrator = self.orchestrator.clone();
        let archive_dir = self.archive_dir.clone();
        let job_cancel = cancel.clone();
        let archive_status = publisher.subscribe();
        let disc_id = disc.id.clone();
        let disc = Arc::new(disc);

        let task = tokio::spawn(async move {
            let _release = release;
            let job = orchestrator.run(job, disc, job_cancel, publisher).await;
            if let Some(dir) = archive_dir {
                if let Err(e) = archive(&dir, &job, &archive_status.snapshot()).await {
                    warn!("Failed to archive job {}: {}", job.id, e);
                }
            }
            job
        });

        info!(%job_id, "Accepted disc {}", disc_id);
        Ok(JobHandle {
            job_id,
            status,
            cancel,
            task,
        })
    }

    /// Request cancellation of the active job. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match &lock(&self.slots).active {
            Some(active) => {
                info!("Cancellation requested for disc {}", active.disc_id);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.slots).active.is_some()
    }

    /// Snapshot of the active job, else of the last finished one
    pub fn status(&self) -> RipStatus {
        let slots = lock(&self.slots);
        slots
            .active
            .as_ref()
            .map(|a| &a.status)
            .or(slots.last.as_ref())
            .map(StatusHandle::snapshot)
            .unwrap_or_else(RipStatus::idle)
    }
}

async fn archive(dir: &Path, job: &RipJob, status: &RipStatus) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let document = serde_json::json!({
        "status": status,
        "job": job,
    });
    let bytes = serde_json::to_vec_pretty(&document).map_err(std::io::Error::other)?;
    let path = dir.join(format!("{}.json", job.id));
    tokio::fs::write(&path, bytes).await?;
    info!("Archived job {} to {}", job.id, path.display());
    Ok(())
}
