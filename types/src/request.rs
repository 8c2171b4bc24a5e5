use crate::audio::{AudioEncoding, Base64EncodedAudioBytes, DEFAULT_SAMPLE_RATE_HZ};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioInConfig {
    /// Encoding of the audio sent in `audio_in`. Always "LINEAR16" for this client.
    encoding: AudioEncoding,
    sample_rate_hertz: u32,
}

impl AudioInConfig {
    pub fn new(sample_rate_hertz: u32) -> Self {
        Self {
            encoding: AudioEncoding::Linear16,
            sample_rate_hertz,
        }
    }

    pub fn encoding(&self) -> &AudioEncoding {
        &self.encoding
    }

    pub fn sample_rate_hertz(&self) -> u32 {
        self.sample_rate_hertz
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioOutConfig {
    encoding: AudioEncoding,
    sample_rate_hertz: u32,
    /// Current playback volume, 0-100.
    volume_percentage: u8,
}

impl AudioOutConfig {
    pub fn new(sample_rate_hertz: u32, volume_percentage: u8) -> Self {
        Self {
            encoding: AudioEncoding::Linear16,
            sample_rate_hertz,
            volume_percentage,
        }
    }

    pub fn encoding(&self) -> &AudioEncoding {
        &self.encoding
    }

    pub fn sample_rate_hertz(&self) -> u32 {
        self.sample_rate_hertz
    }

    pub fn volume_percentage(&self) -> u8 {
        self.volume_percentage
    }
}

/// Dialogue context handed back to the service on the next call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConverseState {
    /// Opaque blob, base64 encoded.
    conversation_state: String,
}

impl ConverseState {
    pub fn new(conversation_state: String) -> Self {
        Self { conversation_state }
    }

    pub fn conversation_state(&self) -> &str {
        &self.conversation_state
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConverseConfig {
    audio_in_config: AudioInConfig,
    audio_out_config: AudioOutConfig,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    converse_state: Option<ConverseState>,
}

impl ConverseConfig {
    pub fn builder() -> ConverseConfigBuilder {
        ConverseConfigBuilder::new()
    }

    pub fn audio_in_config(&self) -> &AudioInConfig {
        &self.audio_in_config
    }

    pub fn audio_out_config(&self) -> &AudioOutConfig {
        &self.audio_out_config
    }

    pub fn converse_state(&self) -> Option<&ConverseState> {
        self.converse_state.as_ref()
    }
}

pub struct ConverseConfigBuilder {
    config: ConverseConfig,
}

impl ConverseConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ConverseConfig {
                audio_in_config: AudioInConfig::new(DEFAULT_SAMPLE_RATE_HZ),
                audio_out_config: AudioOutConfig::new(DEFAULT_SAMPLE_RATE_HZ, 50),
                converse_state: None,
            },
        }
    }

    pub fn with_sample_rate_in(mut self, sample_rate_hertz: u32) -> Self {
        self.config.audio_in_config.sample_rate_hertz = sample_rate_hertz;
        self
    }

    pub fn with_sample_rate_out(mut self, sample_rate_hertz: u32) -> Self {
        self.config.audio_out_config.sample_rate_hertz = sample_rate_hertz;
        self
    }

    pub fn with_volume_percentage(mut self, volume_percentage: u8) -> Self {
        self.config.audio_out_config.volume_percentage = volume_percentage;
        self
    }

    pub fn with_converse_state(mut self, conversation_state: String) -> Self {
        self.config.converse_state = Some(ConverseState::new(conversation_state));
        self
    }

    pub fn build(self) -> ConverseConfig {
        self.config
    }
}

impl Default for ConverseConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One request on the outbound half of a converse call.
///
/// The first request of a call carries only `config`; every later one only `audio_in`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConverseRequest {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    config: Option<ConverseConfig>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    audio_in: Option<Base64EncodedAudioBytes>,
}

impl ConverseRequest {
    pub fn config(config: ConverseConfig) -> Self {
        Self {
            config: Some(config),
            audio_in: None,
        }
    }

    pub fn audio_in(audio: Base64EncodedAudioBytes) -> Self {
        Self {
            config: None,
            audio_in: Some(audio),
        }
    }

    pub fn get_config(&self) -> Option<&ConverseConfig> {
        self.config.as_ref()
    }

    pub fn get_audio_in(&self) -> Option<&str> {
        self.audio_in.as_deref()
    }
}
