//! Disc identifiers derived from a TOC
//!
//! All offsets passed in here are LBAs (no lead-in); the functions add the
//! 150-sector lead-in where the respective algorithm expects MSF-style
//! absolute addresses.

use crate::cd::audio::{LEAD_IN_SECTORS, SECTORS_PER_SECOND};
use base64::Engine;
use serde::Serialize;
use sha1::{Digest, Sha1};

/// Identifiers the AccurateRip database files are keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccurateRipIds {
    /// Number of audio tracks
    pub track_count: u8,
    pub id1: u32,
    pub id2: u32,
    pub cddb: u32,
}

impl AccurateRipIds {
    /// `offsets` are the LBAs of every track on the disc in order,
    /// `leadout` the LBA one past the end of the last track.
    pub fn compute(offsets: &[u32], leadout: u32, audio_tracks: u8) -> Self {
        let mut id1: u32 = 0;
        let mut id2: u32 = 0;
        for (idx, &offset) in offsets.iter().enumerate() {
            let number = idx as u32 + 1;
            id1 = id1.wrapping_add(offset);
            id2 = id2.wrapping_add(offset.max(1).wrapping_mul(number));
        }
        id1 = id1.wrapping_add(leadout);
        id2 = id2.wrapping_add(leadout.wrapping_mul(offsets.len() as u32 + 1));

        Self {
            track_count: audio_tracks,
            id1,
            id2,
            cddb: freedb_disc_id(offsets, leadout),
        }
    }

    /// Path of the database file below the service root, e.g.
    /// `c/4/d/dBAR-003-00001d4c-0000639d-10003503.bin`
    pub fn url_path(&self) -> String {
        format!(
            "{:x}/{:x}/{:x}/dBAR-{:03}-{:08x}-{:08x}-{:08x}.bin",
            self.id1 & 0xF,
            (self.id1 >> 4) & 0xF,
            (self.id1 >> 8) & 0xF,
            self.track_count,
            self.id1,
            self.id2,
            self.cddb
        )
    }
}

/// FreeDB/CDDB disc id
pub fn freedb_disc_id(offsets: &[u32], leadout: u32) -> u32 {
    let seconds = |lba: u32| (lba + LEAD_IN_SECTORS) / SECTORS_PER_SECOND;

    let digit_sum: u32 = offsets
        .iter()
        .map(|&offset| {
            let mut secs = seconds(offset);
            let mut sum = 0;
            while secs > 0 {
                sum += secs % 10;
                secs /= 10;
            }
            sum
        })
        .sum();

    let first = offsets.first().copied().unwrap_or(0);
    let total = seconds(leadout).saturating_sub(seconds(first));

    ((digit_sum % 0xFF) << 24) | (total << 8) | offsets.len() as u32
}

/// MusicBrainz Disc ID: base64 (with `._-` substitutions) of the SHA-1 over
/// the hex-formatted first/last track numbers, lead-out and 99 offset slots.
pub fn musicbrainz_disc_id(first_track: u8, last_track: u8, leadout: u32, offsets: &[u32]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{:02X}", first_track));
    hasher.update(format!("{:02X}", last_track));
    hasher.update(format!("{:08X}", leadout + LEAD_IN_SECTORS));
    for slot in 0..99 {
        let value = offsets
            .get(slot)
            .map(|offset| offset + LEAD_IN_SECTORS)
            .unwrap_or(0);
        hasher.update(format!("{:08X}", value));
    }

    base64::engine::general_purpose::STANDARD
        .encode(hasher.finalize())
        .replace('+', ".")
        .replace('/', "_")
        .replace('=', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    // 22-track reference disc used by libdiscid's own test-suite
    const REFERENCE_OFFSETS: [u32; 22] = [
        150, 9700, 25887, 39297, 53795, 63735, 77517, 94877, 107270, 123552, 135522, 148422,
        161197, 174790, 192022, 205545, 218010, 228700, 239590, 255470, 266932, 288750,
    ];
    const REFERENCE_LEADOUT: u32 = 303602;

    fn reference_lbas() -> Vec<u32> {
        REFERENCE_OFFSETS.iter().map(|o| o - 150).collect()
    }

    #[test]
    fn test_musicbrainz_disc_id_reference() {
        let id = musicbrainz_disc_id(1, 22, REFERENCE_LEADOUT - 150, &reference_lbas());
        assert_eq!(id, "xUp1F2NkfP8s8jaeFn_Av3jNEI4-");
    }

    #[test]
    fn test_freedb_disc_id_reference() {
        let id = freedb_disc_id(&reference_lbas(), REFERENCE_LEADOUT - 150);
        assert_eq!(format!("{:08x}", id), "370fce16");
    }

    #[test]
    fn test_accuraterip_ids_and_path() {
        let ids = AccurateRipIds::compute(&[0, 1000, 2500], 4000, 3);
        assert_eq!(ids.id1, 7500);
        assert_eq!(ids.id2, 1 + 2000 + 7500 + 16000);
        assert_eq!(ids.cddb, 0x1000_3503);
        assert_eq!(
            ids.url_path(),
            "c/4/d/dBAR-003-00001d4c-0000639d-10003503.bin"
        );
    }
}
