//! AccurateRip verification
//!
//! Checksum computation and database lookup for verifying extracted tracks.

pub mod checksum;
pub mod client;

pub use checksum::{checksum_track, ChecksumPair, TrackPosition};
pub use client::{
    compare, AccurateRipClient, ChecksumDatabase, DatabaseEntry, LookupError, RemoteTrack,
    TrackChecksum,
};

use serde::Serialize;

/// Why a track was judged a bad rip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    /// Checksum differs from every pressing in the database
    Checksum,
    /// Extraction exhausted its retry budget
    ExtractionFailed,
}

/// Why a track could not be verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    NotInDatabase,
    TrackCountMismatch,
    LookupFailed,
    Timeout,
    /// The database holds no checksums for this region (hidden track)
    NotCovered,
}

/// Verification state of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Match { confidence: u8 },
    Mismatch(MismatchReason),
    Unavailable(UnavailableReason),
    NotChecked,
}

impl VerificationOutcome {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, VerificationOutcome::Mismatch(_))
    }

    pub fn is_match(&self) -> bool {
        matches!(self, VerificationOutcome::Match { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            VerificationOutcome::Match { .. } => "match",
            VerificationOutcome::Mismatch(_) => "mismatch",
            VerificationOutcome::Unavailable(_) => "unavailable",
            VerificationOutcome::NotChecked => "not-checked",
        }
    }
}
