//! AccurateRip database lookup and comparison
//!
//! Lookups never mutate rip state: the client returns database entries or
//! a [`LookupError`], and [`compare`] turns either into per-track outcomes.

use crate::accuraterip::checksum::ChecksumPair;
use crate::accuraterip::{MismatchReason, UnavailableReason, VerificationOutcome};
use crate::cd::disc_id::AccurateRipIds;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "http://www.accuraterip.com/accuraterip/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Disc not found in AccurateRip database")]
    NotFound,
    #[error("AccurateRip request failed: {0}")]
    Http(String),
    #[error("Malformed AccurateRip response: {0}")]
    Malformed(String),
    #[error("AccurateRip lookup timed out")]
    Timeout,
}

/// One track of one pressing as stored in the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoteTrack {
    pub confidence: u8,
    pub crc: u32,
    pub frame450_crc: u32,
}

/// One pressing's checksums for a disc
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseEntry {
    pub track_count: u8,
    pub id1: u32,
    pub id2: u32,
    pub cddb: u32,
    pub tracks: Vec<RemoteTrack>,
}

/// Remote checksum database capability
#[async_trait::async_trait]
pub trait ChecksumDatabase: Send + Sync {
    /// Fetch every known pressing of the disc identified by `ids`
    async fn lookup(&self, ids: &AccurateRipIds) -> Result<Vec<DatabaseEntry>, LookupError>;
}

/// HTTP client for the public AccurateRip database
pub struct AccurateRipClient {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl AccurateRipClient {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self, LookupError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| LookupError::Http(format!("Failed to parse base URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }
}

#[async_trait::async_trait]
impl ChecksumDatabase for AccurateRipClient {
    async fn lookup(&self, ids: &AccurateRipIds) -> Result<Vec<DatabaseEntry>, LookupError> {
        let url = self
            .base_url
            .join(&ids.url_path())
            .map_err(|e| LookupError::Http(format!("Failed to construct URL: {}", e)))?;
        info!("AccurateRip: looking up {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout
            } else {
                LookupError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            info!("AccurateRip: disc not in database");
            return Err(LookupError::NotFound);
        }
        if !status.is_success() {
            warn!("AccurateRip returned status {}", status);
            return Err(LookupError::Http(format!("status {}", status)));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout
            } else {
                LookupError::Http(e.to_string())
            }
        })?;
        let entries = parse_response(&body)?;
        debug!("AccurateRip: {} pressing(s) in response", entries.len());
        Ok(entries)
    }
}

/// Parse a `dBAR` file: repeated chunks of a 13-byte header (track count,
/// id1, id2, cddb id) followed by 9 bytes per track (confidence, CRC,
/// frame-450 CRC). Integers are little-endian.
pub fn parse_response(body: &[u8]) -> Result<Vec<DatabaseEntry>, LookupError> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    let read_u32 = |at: usize| u32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);

    while pos < body.len() {
        if body.len() - pos < 13 {
            return Err(LookupError::Malformed(format!(
                "truncated header at byte {}",
                pos
            )));
        }
        let track_count = body[pos];
        let (id1, id2, cddb) = (read_u32(pos + 1), read_u32(pos + 5), read_u32(pos + 9));
        pos += 13;

        let needed = track_count as usize * 9;
        if body.len() - pos < needed {
            return Err(LookupError::Malformed(format!(
                "chunk declares {} tracks but only {} bytes remain",
                track_count,
                body.len() - pos
            )));
        }
        let tracks = (0..track_count as usize)
            .map(|i| {
                let at = pos + i * 9;
                RemoteTrack {
                    confidence: body[at],
                    crc: read_u32(at + 1),
                    frame450_crc: read_u32(at + 5),
                }
            })
            .collect();
        pos += needed;

        entries.push(DatabaseEntry {
            track_count,
            id1,
            id2,
            cddb,
            tracks,
        });
    }

    Ok(entries)
}

/// A locally computed checksum pair for one audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackChecksum {
    pub track: u8,
    /// 0-based position among the disc's audio tracks
    pub index: usize,
    pub sums: ChecksumPair,
}

/// Compare local checksums against a lookup result.
///
/// Any failed lookup makes every submitted track `Unavailable`. Entries for
/// a different track count are never compared: they point at a TOC
/// misparse, not a bad read.
pub fn compare(
    track_count: usize,
    local: &[TrackChecksum],
    remote: &Result<Vec<DatabaseEntry>, LookupError>,
) -> Vec<(u8, VerificationOutcome)> {
    let all = |reason: UnavailableReason| -> Vec<(u8, VerificationOutcome)> {
        local
            .iter()
            .map(|t| (t.track, VerificationOutcome::Unavailable(reason)))
            .collect()
    };

    let entries = match remote {
        Ok(entries) => entries,
        Err(LookupError::NotFound) => return all(UnavailableReason::NotInDatabase),
        Err(LookupError::Timeout) => return all(UnavailableReason::Timeout),
        Err(_) => return all(UnavailableReason::LookupFailed),
    };
    if entries.is_empty() {
        return all(UnavailableReason::NotInDatabase);
    }

    let pressings: Vec<&DatabaseEntry> = entries
        .iter()
        .filter(|e| e.track_count as usize == track_count)
        .collect();
    if pressings.is_empty() {
        warn!(
            "AccurateRip entries cover {} track(s), disc has {}",
            entries[0].track_count, track_count
        );
        return all(UnavailableReason::TrackCountMismatch);
    }

    local
        .iter()
        .map(|t| {
            let confidence = pressings
                .iter()
                .filter_map(|p| p.tracks.get(t.index))
                .filter(|remote| remote.crc != 0 && t.sums.matches(remote.crc))
                .map(|remote| remote.confidence)
                .max();
            let outcome = match confidence {
                Some(confidence) => VerificationOutcome::Match { confidence },
                None => VerificationOutcome::Mismatch(MismatchReason::Checksum),
            };
            (t.track, outcome)
        })
        .collect()
}
