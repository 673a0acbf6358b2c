//! CD ripping module
//!
//! Drive access, TOC analysis, extraction through cd-paranoia, FLAC
//! encoding and the CUE/log artifacts written next to the ripped files.

pub mod audio;
pub mod cue_generator;
pub mod disc_id;
pub mod drive;
pub mod encoder;
pub mod log_generator;
pub mod paranoia;
pub mod toc;

pub use audio::{PcmAudio, SampleSpan};
pub use cue_generator::CueGenerator;
pub use drive::CdDrive;
pub use encoder::{EncodeError, Encoder, FlacEncoder};
pub use log_generator::LogGenerator;
pub use paranoia::{ExtractError, ExtractRequest, ExtractedAudio, ExtractionMethod, Extractor, ParanoiaExtractor};
pub use toc::{analyze, AnalyzerSettings, Disc, RawToc, Track, TocError};
