//! AccurateRip v1/v2 track checksums

use crate::cd::audio::{PcmAudio, SAMPLES_PER_SECTOR};
use serde::Serialize;

/// Frames skipped at the start of the first track and the end of the last
/// track: five sectors, matching the database's convention.
pub const EDGE_SKIP_FRAMES: u64 = 5 * SAMPLES_PER_SECTOR as u64;

/// Where a track sits on the disc; only the outermost audio tracks get
/// their edges excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackPosition {
    pub first: bool,
    pub last: bool,
}

impl TrackPosition {
    pub fn of(number: u8, first_audio: u8, last_audio: u8) -> Self {
        Self {
            first: number == first_audio,
            last: number == last_audio,
        }
    }
}

/// Legacy (v1) and revised (v2) checksum of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecksumPair {
    pub v1: u32,
    pub v2: u32,
}

impl ChecksumPair {
    pub fn matches(&self, crc: u32) -> bool {
        self.v1 == crc || self.v2 == crc
    }
}

/// Compute both checksums over a track's frames.
///
/// Each frame is the little-endian 32-bit word `L | R << 16`, weighted by
/// its 1-based position in the track. v1 keeps the low 32 bits of each
/// product; v2 folds the high 32 bits back in.
pub fn checksum_track(audio: &PcmAudio, position: TrackPosition) -> ChecksumPair {
    let frames = audio.frame_count();
    let check_from = if position.first { EDGE_SKIP_FRAMES } else { 0 };
    let check_to = if position.last {
        frames.saturating_sub(EDGE_SKIP_FRAMES)
    } else {
        frames
    };

    let mut v1: u32 = 0;
    let mut v2: u32 = 0;
    for (idx, frame) in audio.frames().enumerate() {
        let multiplier = idx as u64 + 1;
        if multiplier < check_from || multiplier > check_to {
            continue;
        }
        let product = (multiplier as u32 as u64) * frame as u64;
        v1 = v1.wrapping_add(product as u32);
        v2 = v2
            .wrapping_add(product as u32)
            .wrapping_add((product >> 32) as u32);
    }

    ChecksumPair { v1, v2 }
}

/// EAC-style copy CRC: plain CRC32 over the track's PCM bytes
pub fn copy_crc(audio: &PcmAudio) -> u32 {
    crc32fast::hash(audio.as_bytes())
}
