//! Job-level error kinds

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TocAnalysis,
    FastExtraction,
    Verification,
    ThoroughExtraction,
    ReVerification,
    Metadata,
    Encoding,
    CueWriting,
    LogWriting,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::TocAnalysis => "TOC analysis",
            Stage::FastExtraction => "fast extraction",
            Stage::Verification => "verification",
            Stage::ThoroughExtraction => "thorough extraction",
            Stage::ReVerification => "re-verification",
            Stage::Metadata => "metadata lookup",
            Stage::Encoding => "encoding",
            Stage::CueWriting => "CUE writing",
            Stage::LogWriting => "log writing",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RipError {
    #[error("TOC unreadable: {message}")]
    TocUnreadable { message: String },
    #[error("Sector read error on track {track}: {message}")]
    SectorRead { track: u8, message: String },
    #[error("Verification unavailable: {message}")]
    VerificationUnavailable { message: String },
    #[error("Track count mismatch: database lists {remote} tracks, disc has {local}")]
    TrackCountMismatch { remote: usize, local: usize },
    #[error("Encode error on track {track}: {message}")]
    Encode { track: u8, message: String },
    #[error("{stage} timed out after {timeout:?}")]
    StageTimeout {
        stage: Stage,
        track: Option<u8>,
        timeout: Duration,
    },
    #[error("Storage error during {stage}: {message}")]
    Storage {
        stage: Stage,
        track: Option<u8>,
        message: String,
    },
    #[error("Extractor unavailable: {message}")]
    ExtractorUnavailable { stage: Stage, message: String },
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RipError {
    /// Track the error affects, if any
    pub fn track(&self) -> Option<u8> {
        match self {
            RipError::SectorRead { track, .. } | RipError::Encode { track, .. } => Some(*track),
            RipError::StageTimeout { track, .. } | RipError::Storage { track, .. } => *track,
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            RipError::TocUnreadable { .. } => Some(Stage::TocAnalysis),
            RipError::Encode { .. } => Some(Stage::Encoding),
            RipError::StageTimeout { stage, .. }
            | RipError::Storage { stage, .. }
            | RipError::ExtractorUnavailable { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RipError::TocUnreadable { .. } => "TocUnreadable",
            RipError::SectorRead { .. } => "SectorReadError",
            RipError::VerificationUnavailable { .. } => "VerificationUnavailable",
            RipError::TrackCountMismatch { .. } => "TrackCountMismatch",
            RipError::Encode { .. } => "EncodeError",
            RipError::StageTimeout { .. } => "StageTimeout",
            RipError::Storage { .. } => "StorageError",
            RipError::ExtractorUnavailable { .. } => "ExtractorUnavailable",
            RipError::Internal { .. } => "Internal",
        }
    }

    /// Whether the job cannot continue past this error
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RipError::SectorRead { .. }
                | RipError::VerificationUnavailable { .. }
                | RipError::TrackCountMismatch { .. }
        )
    }
}
