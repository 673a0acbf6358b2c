//! Red Book audio constants and the PCM buffer type passed between
//! extraction, checksumming and encoding

use serde::Serialize;

/// Stereo sample frames per CD sector
pub const SAMPLES_PER_SECTOR: u32 = 588;

/// Bytes per stereo sample frame (2 channels x 16 bit)
pub const BYTES_PER_SAMPLE: u32 = 4;

/// Raw audio bytes per CD sector
pub const BYTES_PER_SECTOR: u32 = SAMPLES_PER_SECTOR * BYTES_PER_SAMPLE;

/// Sectors per second of audio
pub const SECTORS_PER_SECOND: u32 = 75;

/// Lead-in sectors preceding LBA 0 (the 2 second MSF offset)
pub const LEAD_IN_SECTORS: u32 = 150;

pub const SAMPLE_RATE: u32 = 44_100;
pub const CHANNELS: u32 = 2;
pub const BITS_PER_SAMPLE: u32 = 16;

/// A contiguous run of stereo sample frames, in offset-corrected disc
/// sample space. `start` may be negative for a drive with a positive read
/// offset reading the very first sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleSpan {
    pub start: i64,
    pub frames: u64,
}

impl SampleSpan {
    /// Span covering `sectors` sectors starting at `sector`, shifted by a
    /// drive read offset given in sample frames.
    pub fn from_sectors(sector: u32, sectors: u32, read_offset: i32) -> Self {
        Self {
            start: sector as i64 * SAMPLES_PER_SECTOR as i64 + read_offset as i64,
            frames: sectors as u64 * SAMPLES_PER_SECTOR as u64,
        }
    }

    pub fn end(&self) -> i64 {
        self.start + self.frames as i64
    }

    pub fn overlaps(&self, other: &SampleSpan) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    pub fn byte_len(&self) -> usize {
        self.frames as usize * BYTES_PER_SAMPLE as usize
    }
}

/// Interleaved little-endian 16-bit stereo PCM, as delivered by the drive.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct PcmAudio {
    bytes: Vec<u8>,
}

impl PcmAudio {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Silence of the given length
    pub fn silence(frames: u64) -> Self {
        Self {
            bytes: vec![0u8; frames as usize * BYTES_PER_SAMPLE as usize],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn frame_count(&self) -> u64 {
        (self.bytes.len() / BYTES_PER_SAMPLE as usize) as u64
    }

    /// Whole frames as packed 32-bit words, left channel in the low half.
    /// A trailing partial frame is ignored.
    pub fn frames(&self) -> impl Iterator<Item = u32> + '_ {
        self.bytes
            .chunks_exact(BYTES_PER_SAMPLE as usize)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Interleaved signed samples, the layout flacenc's `MemSource` expects
    pub fn interleaved_samples(&self) -> Vec<i32> {
        self.bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
            .collect()
    }

    /// Pad with silence or truncate to exactly `frames` frames
    pub fn fit_to(&mut self, frames: u64) {
        self.bytes
            .resize(frames as usize * BYTES_PER_SAMPLE as usize, 0);
    }
}

impl std::fmt::Debug for PcmAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmAudio")
            .field("frames", &self.frame_count())
            .finish()
    }
}
