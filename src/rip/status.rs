//! Polled status snapshots of the active rip job
//!
//! The orchestrator publishes a fresh snapshot after every step through a
//! watch channel; readers clone the latest value and never wait on the
//! extraction path.

use crate::accuraterip::VerificationOutcome;
use crate::cd::paranoia::ExtractionMethod;
use crate::rip::error::Stage;
use crate::rip::job::RipJob;
use crate::rip::state::RipState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackStatus {
    pub track: u8,
    pub method: ExtractionMethod,
    pub outcome: VerificationOutcome,
    pub retries: u32,
    pub encoded: bool,
    pub read_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub stage: Option<Stage>,
    pub track: Option<u8>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RipStatus {
    pub job_id: Option<Uuid>,
    pub disc_id: Option<String>,
    pub state: String,
    pub tracks: Vec<TrackStatus>,
    /// 0.0 to 1.0
    pub progress: f32,
    pub error: Option<ErrorDetail>,
    pub cancellable: bool,
    pub residual_mismatches: usize,
    pub reextracted: Vec<u8>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RipStatus {
    pub fn idle() -> Self {
        Self {
            job_id: None,
            disc_id: None,
            state: RipState::Idle.name().to_string(),
            tracks: vec![],
            progress: 0.0,
            error: None,
            cancellable: false,
            residual_mismatches: 0,
            reextracted: vec![],
            started_at: None,
            finished_at: None,
        }
    }

    /// Snapshot `job`; `total_tracks` is the number of tracks being ripped
    pub fn from_job(job: &RipJob, total_tracks: usize, previous_progress: f32) -> Self {
        let total = total_tracks.max(1) as f32;
        let progress = match &job.state {
            RipState::Idle => 0.0,
            RipState::ExtractingFast { .. } => 0.6 * job.tracks.len() as f32 / total,
            RipState::Verifying { .. } => 0.65,
            RipState::SelectiveReExtract {
                remaining,
                extracted,
                ..
            } => {
                let done = extracted.len() as f32;
                0.7 + 0.1 * done / (done + remaining.len() as f32 + 1.0)
            }
            RipState::ReVerifying { .. } => 0.8,
            RipState::Finalizing { .. } => {
                let encoded = job.tracks.values().filter(|t| t.encoded.is_some()).count();
                0.8 + 0.2 * encoded as f32 / total
            }
            RipState::Completed { .. } => 1.0,
            RipState::Failed { .. } | RipState::Cancelled => previous_progress,
        };

        let error = job.error.as_ref().map(|e| ErrorDetail {
            kind: e.kind().to_string(),
            stage: e.stage(),
            track: e.track(),
            message: e.to_string(),
        });

        Self {
            job_id: Some(job.id),
            disc_id: Some(job.disc_id.clone()),
            state: job.state.name().to_string(),
            tracks: job
                .tracks
                .values()
                .map(|t| TrackStatus {
                    track: t.track,
                    method: t.method,
                    outcome: t.outcome,
                    retries: t.retries,
                    encoded: t.encoded.is_some(),
                    read_error: t.read_error.clone(),
                })
                .collect(),
            progress: progress.clamp(0.0, 1.0),
            error,
            cancellable: !job.state.is_terminal() && !job.cancel_requested,
            residual_mismatches: job.residual_mismatches(),
            reextracted: job.reextracted.clone(),
            started_at: Some(job.started_at),
            finished_at: job.finished_at,
        }
    }
}

/// Write side, owned by the orchestrator
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<RipStatus>,
    total_tracks: usize,
}

/// Read side, cheap to clone
#[derive(Debug, Clone)]
pub struct StatusHandle {
    rx: watch::Receiver<RipStatus>,
}

impl StatusPublisher {
    pub fn new(total_tracks: usize) -> (Self, StatusHandle) {
        let (tx, rx) = watch::channel(RipStatus::idle());
        (Self { tx, total_tracks }, StatusHandle { rx })
    }

    pub fn publish(&self, job: &RipJob) {
        let previous = self.tx.borrow().progress;
        let status = RipStatus::from_job(job, self.total_tracks, previous);
        self.tx.send_replace(status);
    }

    pub fn subscribe(&self) -> StatusHandle {
        StatusHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl StatusHandle {
    pub fn snapshot(&self) -> RipStatus {
        self.rx.borrow().clone()
    }

    /// Wait for the next published snapshot; `None` once the job is gone
    pub async fn changed(&mut self) -> Option<RipStatus> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rip::job::TrackResult;

    #[test]
    fn test_snapshot_reflects_job() {
        let (publisher, handle) = StatusPublisher::new(4);
        assert_eq!(handle.snapshot().state, "Idle");

        let mut job = RipJob::new("disc");
        job.state = RipState::ExtractingFast {
            current: 3,
            remaining: vec![4],
            exhausted: vec![],
        };
        job.tracks.insert(1, TrackResult::new(1, ExtractionMethod::Fast));
        job.tracks.insert(2, TrackResult::new(2, ExtractionMethod::Fast));
        publisher.publish(&job);

        let status = handle.snapshot();
        assert_eq!(status.state, "ExtractingFast");
        assert_eq!(status.tracks.len(), 2);
        assert!((status.progress - 0.3).abs() < 1e-6);
        assert!(status.cancellable);
    }

    #[test]
    fn test_cancelled_keeps_progress_and_is_not_cancellable() {
        let (publisher, handle) = StatusPublisher::new(2);
        let mut job = RipJob::new("disc");
        job.state = RipState::Verifying {
            pending: vec![1, 2],
            exhausted: vec![],
        };
        publisher.publish(&job);

        job.state = RipState::Cancelled;
        publisher.publish(&job);
        let status = handle.snapshot();
        assert_eq!(status.state, "Cancelled");
        assert!((status.progress - 0.65).abs() < 1e-6);
        assert!(!status.cancellable);
    }
}
