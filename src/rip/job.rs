//! Rip job records

use crate::accuraterip::{ChecksumPair, VerificationOutcome};
use crate::cd::paranoia::ExtractionMethod;
use crate::rip::error::RipError;
use crate::rip::state::RipState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Per-track result, created on extraction and finalized once
/// verification completes or is skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackResult {
    pub track: u8,
    pub method: ExtractionMethod,
    /// Raw PCM artifact of the extraction kept for finalizing
    pub artifact: Option<PathBuf>,
    /// Encoded file, set in finalizing
    pub encoded: Option<PathBuf>,
    pub checksums: Option<ChecksumPair>,
    pub outcome: VerificationOutcome,
    pub retries: u32,
    pub copy_crc: Option<u32>,
    /// Read failure that degraded this track, if any
    pub read_error: Option<String>,
}

impl TrackResult {
    pub fn new(track: u8, method: ExtractionMethod) -> Self {
        Self {
            track,
            method,
            artifact: None,
            encoded: None,
            checksums: None,
            outcome: VerificationOutcome::NotChecked,
            retries: 0,
            copy_crc: None,
            read_error: None,
        }
    }
}

/// The unit of work for one disc
#[derive(Debug, Clone, Serialize)]
pub struct RipJob {
    pub id: Uuid,
    pub disc_id: String,
    pub state: RipState,
    pub tracks: BTreeMap<u8, TrackResult>,
    /// Re-extractions performed with the thorough method
    pub reextracted: Vec<u8>,
    pub error: Option<RipError>,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RipJob {
    pub fn new(disc_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            disc_id: disc_id.to_string(),
            state: RipState::Idle,
            tracks: BTreeMap::new(),
            reextracted: Vec::new(),
            error: None,
            cancel_requested: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Tracks still failing verification
    pub fn residual_mismatches(&self) -> usize {
        self.tracks
            .values()
            .filter(|t| t.outcome.is_mismatch())
            .count()
    }
}
