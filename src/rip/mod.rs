//! Rip orchestration
//!
//! A job moves through fast extraction, verification and selective thorough
//! re-extraction before its tracks are encoded. Decisions live in the pure
//! [`state`] machine; [`orchestrator`] performs the I/O.

pub mod drive_token;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod service;
pub mod state;
pub mod status;

pub use drive_token::DriveToken;
pub use error::{RipError, Stage};
pub use job::{RipJob, TrackResult};
pub use orchestrator::{sanitize_filename, RipOrchestrator, RipSettings, StageTimeouts};
pub use service::{JobHandle, RipService, ServiceError};
pub use state::{transition, RipCommand, RipEvent, RipPlan, RipState};
pub use status::{RipStatus, StatusHandle, StatusPublisher};
