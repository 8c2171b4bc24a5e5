//! Audio parameters shared by the capture and playback sides.

use std::env;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::types::audio::{DEFAULT_SAMPLE_RATE_HZ, DEFAULT_SAMPLE_WIDTH};

/// Bytes per chunk handed to the request encoder (100 ms at 16 kHz).
pub const DEFAULT_ITER_SIZE: usize = 3200;
/// Bytes per device callback block.
pub const DEFAULT_BLOCK_SIZE: usize = 6400;
/// Bytes of playback buffered before the device is expected to drain.
pub const DEFAULT_FLUSH_SIZE: usize = 25600;

const SAMPLE_RATE_VAR: &str = "ASSISTANT_AUDIO_SAMPLE_RATE";
const SAMPLE_WIDTH_VAR: &str = "ASSISTANT_AUDIO_SAMPLE_WIDTH";
const ITER_SIZE_VAR: &str = "ASSISTANT_AUDIO_ITER_SIZE";
const BLOCK_SIZE_VAR: &str = "ASSISTANT_AUDIO_BLOCK_SIZE";
const FLUSH_SIZE_VAR: &str = "ASSISTANT_AUDIO_FLUSH_SIZE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSettings {
    pub sample_rate: u32,
    /// Bytes per sample. Only 2 (LINEAR16) is supported on the wire.
    pub sample_width: u16,
    pub iter_size: usize,
    pub block_size: usize,
    pub flush_size: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE_HZ,
            sample_width: DEFAULT_SAMPLE_WIDTH,
            iter_size: DEFAULT_ITER_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            flush_size: DEFAULT_FLUSH_SIZE,
        }
    }
}

impl AudioSettings {
    /// Defaults overridden by any `ASSISTANT_AUDIO_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            sample_rate: read_var(SAMPLE_RATE_VAR)?.unwrap_or(defaults.sample_rate),
            sample_width: read_var(SAMPLE_WIDTH_VAR)?.unwrap_or(defaults.sample_width),
            iter_size: read_var(ITER_SIZE_VAR)?.unwrap_or(defaults.iter_size),
            block_size: read_var(BLOCK_SIZE_VAR)?.unwrap_or(defaults.block_size),
            flush_size: read_var(FLUSH_SIZE_VAR)?.unwrap_or(defaults.flush_size),
        }
        .validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidValue(SAMPLE_RATE_VAR.into(), "must be positive".into()));
        }
        if self.sample_width != DEFAULT_SAMPLE_WIDTH {
            return Err(ConfigError::InvalidValue(
                SAMPLE_WIDTH_VAR.into(),
                format!("only {DEFAULT_SAMPLE_WIDTH}-byte samples are supported"),
            ));
        }
        for (name, size) in [
            (ITER_SIZE_VAR, self.iter_size),
            (BLOCK_SIZE_VAR, self.block_size),
            (FLUSH_SIZE_VAR, self.flush_size),
        ] {
            if size == 0 || size % usize::from(self.sample_width) != 0 {
                return Err(ConfigError::InvalidValue(
                    name.into(),
                    format!("{size} is not a positive multiple of the sample width"),
                ));
            }
        }
        Ok(self)
    }
}

fn read_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), value)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_linear16_at_16khz() {
        let settings = AudioSettings::default().validate().unwrap();
        assert_eq!(settings.sample_rate, 16000);
        assert_eq!(settings.iter_size, 3200);
    }

    #[test]
    fn rejects_odd_chunk_sizes() {
        let settings = AudioSettings {
            iter_size: 3201,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidValue(name, _)) if name == ITER_SIZE_VAR));
    }

    #[test]
    fn rejects_other_sample_widths() {
        let settings = AudioSettings {
            sample_width: 4,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
