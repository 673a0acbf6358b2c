use crate::rip::orchestrator::{RipSettings, StageTimeouts};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("No output directory configured and no home directory found")]
    NoOutputDir,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriveConfig {
    /// Device path; detected when unset
    pub device: Option<PathBuf>,
    /// Read offset correction in samples
    pub read_offset: i32,
    pub eject_after_rip: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// FLAC compression level, 0-8
    pub compression_level: u8,
    pub create_cue: bool,
    pub create_log: bool,
    pub preserve_hidden_track: bool,
    pub keep_scratch: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RippingConfig {
    pub accuraterip: bool,
    pub selective_rerip: bool,
    pub fast_retry_budget: u32,
    pub thorough_retry_budget: u32,
    pub gap_detection: bool,
    pub hidden_track_min_sectors: u32,
    pub accuraterip_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub toc_read: Duration,
    pub stages: StageTimeouts,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataConfig {
    pub enabled: bool,
    pub server: String,
    pub user_agent: String,
}

/// Application configuration
/// In debug builds: loads .env first, then reads AUTORIP_* variables
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub drive: DriveConfig,
    pub output: OutputConfig,
    pub ripping: RippingConfig,
    pub timeouts: TimeoutConfig,
    pub metadata: MetadataConfig,
}

impl Config {
    /// Load configuration based on build mode
    pub fn load() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                info!("Config: loaded .env file");
            }
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let dir = match env.get("AUTORIP_OUTPUT_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or(ConfigError::NoOutputDir)?
                .join("Music")
                .join("autorip"),
        };

        let compression_level: u8 = env.parse("AUTORIP_COMPRESSION_LEVEL", 5)?;
        if compression_level > 8 {
            return Err(ConfigError::Invalid {
                key: "AUTORIP_COMPRESSION_LEVEL".to_string(),
                value: compression_level.to_string(),
                reason: "must be between 0 and 8".to_string(),
            });
        }

        let contact = env.get("AUTORIP_CONTACT");
        let user_agent = env.get("AUTORIP_USER_AGENT").unwrap_or_else(|| {
            let base = format!("autorip/{}", env!("CARGO_PKG_VERSION"));
            match &contact {
                Some(contact) => format!("{} ( {} )", base, contact),
                None => base,
            }
        });

        let config = Self {
            drive: DriveConfig {
                device: env.get("AUTORIP_DEVICE").map(PathBuf::from),
                read_offset: env.parse("AUTORIP_READ_OFFSET", 0)?,
                eject_after_rip: env.flag("AUTORIP_EJECT", true)?,
            },
            output: OutputConfig {
                dir,
                compression_level,
                create_cue: env.flag("AUTORIP_CREATE_CUE", true)?,
                create_log: env.flag("AUTORIP_CREATE_LOG", true)?,
                preserve_hidden_track: env.flag("AUTORIP_PRESERVE_HTOA", true)?,
                keep_scratch: env.flag("AUTORIP_KEEP_SCRATCH", false)?,
            },
            ripping: RippingConfig {
                accuraterip: env.flag("AUTORIP_ACCURATERIP", true)?,
                selective_rerip: env.flag("AUTORIP_SELECTIVE_RERIP", true)?,
                fast_retry_budget: env.parse("AUTORIP_FAST_RETRIES", 3)?,
                thorough_retry_budget: env.parse("AUTORIP_THOROUGH_RETRIES", 20)?,
                gap_detection: env.flag("AUTORIP_GAP_DETECTION", true)?,
                hidden_track_min_sectors: env.parse("AUTORIP_HTOA_MIN_SECTORS", 75)?,
                accuraterip_url: env
                    .get("AUTORIP_ACCURATERIP_URL")
                    .unwrap_or_else(|| crate::accuraterip::client::DEFAULT_BASE_URL.to_string()),
            },
            timeouts: TimeoutConfig {
                toc_read: env.seconds("AUTORIP_TOC_TIMEOUT", 60)?,
                stages: StageTimeouts {
                    fast_extraction: env.seconds("AUTORIP_FAST_TIMEOUT", 15 * 60)?,
                    thorough_extraction: env.seconds("AUTORIP_THOROUGH_TIMEOUT", 60 * 60)?,
                    encode: env.seconds("AUTORIP_ENCODE_TIMEOUT", 5 * 60)?,
                    lookup: env.seconds("AUTORIP_LOOKUP_TIMEOUT", 30)?,
                    metadata: env.seconds("AUTORIP_METADATA_TIMEOUT", 30)?,
                },
            },
            metadata: MetadataConfig {
                enabled: env.flag("AUTORIP_MUSICBRAINZ", true)?,
                server: env
                    .get("AUTORIP_MUSICBRAINZ_SERVER")
                    .unwrap_or_else(|| crate::musicbrainz::DEFAULT_SERVER.to_string()),
                user_agent,
            },
        };

        info!("Config: output directory {}", config.output.dir.display());
        Ok(config)
    }

    /// Scratch space for raw extraction artifacts
    pub fn scratch_dir(&self) -> PathBuf {
        self.output.dir.join(".autorip").join("scratch")
    }

    /// Where finished jobs are archived
    pub fn archive_dir(&self) -> PathBuf {
        self.output.dir.join(".autorip").join("jobs")
    }

    pub fn to_rip_settings(&self, drive_name: &str) -> RipSettings {
        RipSettings {
            verify: self.ripping.accuraterip,
            reextract: self.ripping.selective_rerip,
            fast_retry_budget: self.ripping.fast_retry_budget,
            thorough_retry_budget: self.ripping.thorough_retry_budget,
            preserve_hidden_track: self.output.preserve_hidden_track,
            compression_level: self.output.compression_level,
            output_dir: self.output.dir.clone(),
            scratch_dir: self.scratch_dir(),
            keep_scratch: self.output.keep_scratch,
            create_cue: self.output.create_cue,
            create_log: self.output.create_log,
            drive_name: drive_name.to_string(),
            timeouts: self.timeouts.stages.clone(),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::Invalid {
                key: key.to_string(),
                value,
                reason: "expected true or false".to_string(),
            }),
        }
    }

    fn seconds(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("AUTORIP_OUTPUT_DIR", "/tmp/rips")]).unwrap();
        assert_eq!(config.output.dir, PathBuf::from("/tmp/rips"));
        assert_eq!(config.output.compression_level, 5);
        assert!(config.ripping.accuraterip);
        assert!(config.ripping.selective_rerip);
        assert_eq!(config.ripping.hidden_track_min_sectors, 75);
        assert_eq!(config.timeouts.stages.lookup, Duration::from_secs(30));
        assert_eq!(config.archive_dir(), PathBuf::from("/tmp/rips/.autorip/jobs"));
        assert!(config.metadata.user_agent.starts_with("autorip/"));
    }

    #[test]
    fn test_overrides_flow_into_rip_settings() {
        let config = config(&[
            ("AUTORIP_OUTPUT_DIR", "/tmp/rips"),
            ("AUTORIP_ACCURATERIP", "off"),
            ("AUTORIP_THOROUGH_RETRIES", "40"),
            ("AUTORIP_ENCODE_TIMEOUT", "12"),
            ("AUTORIP_READ_OFFSET", "-6"),
            ("AUTORIP_CONTACT", "me@example.org"),
        ])
        .unwrap();
        assert_eq!(config.drive.read_offset, -6);
        assert!(config.metadata.user_agent.ends_with("( me@example.org )"));

        let settings = config.to_rip_settings("sr0");
        assert!(!settings.verify);
        assert_eq!(settings.thorough_retry_budget, 40);
        assert_eq!(settings.timeouts.encode, Duration::from_secs(12));
        assert_eq!(settings.scratch_dir, PathBuf::from("/tmp/rips/.autorip/scratch"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = config(&[
            ("AUTORIP_OUTPUT_DIR", "/tmp/rips"),
            ("AUTORIP_COMPRESSION_LEVEL", "11"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = config(&[("AUTORIP_OUTPUT_DIR", "/tmp/rips"), ("AUTORIP_EJECT", "maybe")])
            .unwrap_err();
        assert!(err.to_string().contains("AUTORIP_EJECT"));
    }
}
