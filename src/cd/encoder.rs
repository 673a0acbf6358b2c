//! FLAC encoding of extracted tracks

use crate::cd::audio::{PcmAudio, BITS_PER_SAMPLE, CHANNELS, SAMPLE_RATE};
use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::config;
use flacenc::error::Verify;
use flacenc::source::MemSource;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("FLAC encoding error: {0}")]
    Flac(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encoding capability
#[async_trait::async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        audio: &PcmAudio,
        target: &Path,
        compression_level: u8,
    ) -> Result<(), EncodeError>;
}

/// Pure-Rust FLAC encoder
#[derive(Debug, Default, Clone)]
pub struct FlacEncoder;

impl FlacEncoder {
    /// Block size used for a compression level (0-8)
    pub fn block_size(compression_level: u8) -> usize {
        match compression_level {
            0..=2 => 1152,
            3..=5 => 4096,
            _ => 4608,
        }
    }

    /// Encode interleaved 16-bit stereo PCM into a FLAC stream in memory
    pub fn encode_to_flac(audio: &PcmAudio, compression_level: u8) -> Result<Vec<u8>, EncodeError> {
        let samples = audio.interleaved_samples();
        let source = MemSource::from_samples(
            &samples,
            CHANNELS as usize,
            BITS_PER_SAMPLE as usize,
            SAMPLE_RATE as usize,
        );

        let config = config::Encoder::default();
        let config = config
            .into_verified()
            .map_err(|(_, e)| EncodeError::Flac(format!("Failed to verify encoder config: {:?}", e)))?;

        let flac_stream = flacenc::encode_with_fixed_block_size(
            &config,
            source,
            Self::block_size(compression_level),
        )
        .map_err(|e| EncodeError::Flac(format!("Failed to encode FLAC: {:?}", e)))?;

        let mut sink = ByteSink::new();
        flac_stream
            .write(&mut sink)
            .map_err(|e| EncodeError::Flac(format!("Failed to write stream to sink: {:?}", e)))?;

        Ok(sink.as_slice().to_vec())
    }
}

#[async_trait::async_trait]
impl Encoder for FlacEncoder {
    async fn encode(
        &self,
        audio: &PcmAudio,
        target: &Path,
        compression_level: u8,
    ) -> Result<(), EncodeError> {
        let audio = audio.clone();
        let flac_data = tokio::task::spawn_blocking(move || {
            Self::encode_to_flac(&audio, compression_level)
        })
        .await
        .map_err(|e| EncodeError::Flac(format!("Encoder task failed: {}", e)))??;

        tokio::fs::write(target, &flac_data).await?;
        info!(
            "Encoded {} ({} bytes)",
            target.display(),
            flac_data.len()
        );
        Ok(())
    }
}
