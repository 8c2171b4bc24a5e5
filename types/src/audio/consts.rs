use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Sample rate the assistant service expects for both directions.
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16000;
/// Bytes per sample for LINEAR16.
pub const DEFAULT_SAMPLE_WIDTH: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AudioEncoding {
    /// Uncompressed 16-bit signed little-endian samples.
    #[default]
    Linear16,
    Custom(String),
}

impl AudioEncoding {
    pub fn as_str(&self) -> &str {
        match self {
            AudioEncoding::Linear16 => "LINEAR16",
            AudioEncoding::Custom(s) => s,
        }
    }
}

impl Serialize for AudioEncoding {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for AudioEncoding {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "LINEAR16" => AudioEncoding::Linear16,
            _ => AudioEncoding::Custom(s.to_string()),
        })
    }
}

impl<'de> Deserialize<'de> for AudioEncoding {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(AudioEncoding::from_str(&s).unwrap_or_else(|never| match never {}))
    }
}
