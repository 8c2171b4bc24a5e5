//! Domain view of the converse call.
//!
//! The session works in terms of [`OutboundMessage`] and [`InboundMessage`];
//! this module maps them to and from the wire frames in [`crate::types`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::audio::AudioChunk;
use crate::error::ConverseError;
use crate::types::response::{
    CLOSE_MICROPHONE, DIALOG_FOLLOW_ON, END_OF_UTTERANCE, EVENT_TYPE_UNSPECIFIED,
    MICROPHONE_MODE_UNSPECIFIED,
};
use crate::types::{AudioOut, Code, ConverseConfig, ConverseRequest, ConverseResponse, ConverseResult, RpcError};

/// Continuation token for the service's dialogue context. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversationState(Vec<u8>);

impl ConversationState {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for ConversationState {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophoneMode {
    /// The service expects a follow-on query; the next turn starts without a trigger.
    FollowOn,
    CloseMicrophone,
}

impl MicrophoneMode {
    /// `Ok(None)` for the unspecified value, an error for values outside the enum.
    pub fn from_wire(value: i32) -> Result<Option<Self>, ConverseError> {
        match value {
            MICROPHONE_MODE_UNSPECIFIED => Ok(None),
            DIALOG_FOLLOW_ON => Ok(Some(MicrophoneMode::FollowOn)),
            CLOSE_MICROPHONE => Ok(Some(MicrophoneMode::CloseMicrophone)),
            other => Err(ConverseError::MalformedResponse(format!(
                "unknown microphone mode {other}"
            ))),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            MicrophoneMode::FollowOn => DIALOG_FOLLOW_ON,
            MicrophoneMode::CloseMicrophone => CLOSE_MICROPHONE,
        }
    }
}

/// Parameters of the leading request of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub sample_rate_in: u32,
    pub sample_rate_out: u32,
    pub volume_percentage: u8,
    pub conversation_state: Option<ConversationState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Config(SessionConfig),
    Audio(AudioChunk),
}

impl OutboundMessage {
    pub fn is_audio(&self) -> bool {
        matches!(self, OutboundMessage::Audio(_))
    }

    pub fn into_request(self) -> ConverseRequest {
        match self {
            OutboundMessage::Config(config) => {
                let mut builder = ConverseConfig::builder()
                    .with_sample_rate_in(config.sample_rate_in)
                    .with_sample_rate_out(config.sample_rate_out)
                    .with_volume_percentage(config.volume_percentage);
                if let Some(state) = config.conversation_state.filter(|s| !s.is_empty()) {
                    builder = builder.with_converse_state(STANDARD.encode(state.as_bytes()));
                }
                ConverseRequest::config(builder.build())
            }
            OutboundMessage::Audio(chunk) => ConverseRequest::audio_in(STANDARD.encode(chunk.as_bytes())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultUpdate {
    pub spoken_request_text: Option<String>,
    pub spoken_response_text: Option<String>,
    pub conversation_state: Option<ConversationState>,
    /// Clamped to 1..=100. `None` when the frame carried zero or a negative value.
    pub volume_percentage: Option<u8>,
    pub microphone_mode: Option<MicrophoneMode>,
}

impl ResultUpdate {
    fn is_empty(&self) -> bool {
        self == &ResultUpdate::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    EndOfUtterance,
    Error { code: Code, message: String },
    ResultUpdate(ResultUpdate),
    AudioOut(Vec<u8>),
}

impl InboundMessage {
    /// Splits one response frame into messages, in the order they must be acted on.
    ///
    /// A frame carrying a non-OK error yields only the error.
    pub fn from_response(response: &ConverseResponse) -> Result<Vec<InboundMessage>, ConverseError> {
        if let Some(error) = response.error().filter(|e| !e.code().is_ok()) {
            return Ok(vec![InboundMessage::Error {
                code: error.code(),
                message: error.message().to_string(),
            }]);
        }

        let mut messages = Vec::new();
        match response.event_type() {
            END_OF_UTTERANCE => messages.push(InboundMessage::EndOfUtterance),
            EVENT_TYPE_UNSPECIFIED => {}
            other => tracing::warn!("ignoring unknown event type {}", other),
        }

        if let Some(result) = response.result() {
            let update = decode_result(result)?;
            if !update.is_empty() {
                messages.push(InboundMessage::ResultUpdate(update));
            }
        }

        if let Some(audio_out) = response.audio_out() {
            let data = decode_base64(audio_out.audio_data(), "audio_out")?;
            if !data.is_empty() {
                messages.push(InboundMessage::AudioOut(data));
            }
        }
        Ok(messages)
    }

    /// Wire form of a single message. Used by in-process servers and tests.
    pub fn into_response(self) -> ConverseResponse {
        match self {
            InboundMessage::EndOfUtterance => ConverseResponse::new().with_event_type(END_OF_UTTERANCE),
            InboundMessage::Error { code, message } => {
                ConverseResponse::new().with_error(RpcError::new(code, &message))
            }
            InboundMessage::ResultUpdate(update) => {
                let mut result = ConverseResult::new();
                if let Some(text) = update.spoken_request_text {
                    result = result.with_spoken_request_text(&text);
                }
                if let Some(text) = update.spoken_response_text {
                    result = result.with_spoken_response_text(&text);
                }
                if let Some(state) = update.conversation_state {
                    result = result.with_conversation_state(&STANDARD.encode(state.as_bytes()));
                }
                if let Some(volume) = update.volume_percentage {
                    result = result.with_volume_percentage(i32::from(volume));
                }
                if let Some(mode) = update.microphone_mode {
                    result = result.with_microphone_mode(mode.to_wire());
                }
                ConverseResponse::new().with_result(result)
            }
            InboundMessage::AudioOut(data) => {
                ConverseResponse::new().with_audio_out(AudioOut::new(STANDARD.encode(data)))
            }
        }
    }
}

fn decode_result(result: &ConverseResult) -> Result<ResultUpdate, ConverseError> {
    let non_empty = |text: &str| (!text.is_empty()).then(|| text.to_string());
    let conversation_state = match result.conversation_state() {
        "" => None,
        encoded => Some(ConversationState::new(decode_base64(encoded, "conversation_state")?)),
    };
    // Zero and negative values carry no volume change.
    let volume_percentage = match result.volume_percentage() {
        volume if volume <= 0 => None,
        volume => Some(volume.min(100) as u8),
    };
    Ok(ResultUpdate {
        spoken_request_text: non_empty(result.spoken_request_text()),
        spoken_response_text: non_empty(result.spoken_response_text()),
        conversation_state,
        volume_percentage,
        microphone_mode: MicrophoneMode::from_wire(result.microphone_mode())?,
    })
}

fn decode_base64(encoded: &str, field: &str) -> Result<Vec<u8>, ConverseError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| ConverseError::MalformedResponse(format!("{field} is not valid base64: {e}")))
}
