use crate::audio::Base64EncodedAudioBytes;
use crate::status::RpcStatus;

pub const EVENT_TYPE_UNSPECIFIED: i32 = 0;
/// The service detected the end of the user's speech; no more audio will be processed.
pub const END_OF_UTTERANCE: i32 = 1;

pub const MICROPHONE_MODE_UNSPECIFIED: i32 = 0;
/// The service does not expect a follow-on question.
pub const CLOSE_MICROPHONE: i32 = 1;
/// The service expects the user to answer a follow-on question.
pub const DIALOG_FOLLOW_ON: i32 = 2;

/// In-stream application error. Shares its shape with the terminal status.
pub type RpcError = RpcStatus;

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ConverseResult {
    #[serde(default)]
    spoken_request_text: String,
    #[serde(default)]
    spoken_response_text: String,
    /// Opaque dialogue state, base64 encoded. Empty when unchanged.
    #[serde(default)]
    conversation_state: String,
    #[serde(default)]
    microphone_mode: i32,
    #[serde(default)]
    volume_percentage: i32,
}

impl ConverseResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken_request_text(&self) -> &str {
        &self.spoken_request_text
    }

    pub fn spoken_response_text(&self) -> &str {
        &self.spoken_response_text
    }

    pub fn conversation_state(&self) -> &str {
        &self.conversation_state
    }

    pub fn microphone_mode(&self) -> i32 {
        self.microphone_mode
    }

    pub fn volume_percentage(&self) -> i32 {
        self.volume_percentage
    }

    pub fn with_spoken_request_text(mut self, text: &str) -> Self {
        self.spoken_request_text = text.to_string();
        self
    }

    pub fn with_spoken_response_text(mut self, text: &str) -> Self {
        self.spoken_response_text = text.to_string();
        self
    }

    pub fn with_conversation_state(mut self, state: &str) -> Self {
        self.conversation_state = state.to_string();
        self
    }

    pub fn with_microphone_mode(mut self, mode: i32) -> Self {
        self.microphone_mode = mode;
        self
    }

    pub fn with_volume_percentage(mut self, volume: i32) -> Self {
        self.volume_percentage = volume;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct AudioOut {
    #[serde(default)]
    audio_data: Base64EncodedAudioBytes,
}

impl AudioOut {
    pub fn new(audio_data: Base64EncodedAudioBytes) -> Self {
        Self { audio_data }
    }

    pub fn audio_data(&self) -> &str {
        &self.audio_data
    }
}

/// One response frame on the inbound half of a converse call.
///
/// Any combination of the fields may be set in a single frame.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ConverseResponse {
    #[serde(default)]
    event_type: i32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    error: Option<RpcError>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    result: Option<ConverseResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    audio_out: Option<AudioOut>,
}

impl ConverseResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(&self) -> i32 {
        self.event_type
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    pub fn result(&self) -> Option<&ConverseResult> {
        self.result.as_ref()
    }

    pub fn audio_out(&self) -> Option<&AudioOut> {
        self.audio_out.as_ref()
    }

    pub fn with_event_type(mut self, event_type: i32) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_error(mut self, error: RpcError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_result(mut self, result: ConverseResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_audio_out(mut self, audio_out: AudioOut) -> Self {
        self.audio_out = Some(audio_out);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    #[test]
    fn sparse_frame_fills_defaults() {
        let response: ConverseResponse =
            serde_json::from_str(r#"{"result": {"microphone_mode": 2}}"#).unwrap();
        assert_eq!(response.event_type(), EVENT_TYPE_UNSPECIFIED);
        assert!(response.error().is_none());
        let result = response.result().unwrap();
        assert_eq!(result.microphone_mode(), DIALOG_FOLLOW_ON);
        assert_eq!(result.conversation_state(), "");
        assert_eq!(result.volume_percentage(), 0);
    }

    #[test]
    fn error_frame_carries_code() {
        let response: ConverseResponse = serde_json::from_str(
            r#"{"error": {"code": 13, "message": "x"}, "audio_out": {"audio_data": "AQI="}}"#,
        )
        .unwrap();
        let error = response.error().unwrap();
        assert_eq!(error.code(), Code::Internal);
        assert_eq!(error.message(), "x");
        assert_eq!(response.audio_out().unwrap().audio_data(), "AQI=");
    }
}
