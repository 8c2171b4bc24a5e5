use crate::audio::AudioSink;
use crate::error::ConverseError;
use crate::protocol::{ConversationState, InboundMessage, MicrophoneMode, ResultUpdate};
use crate::session::state::{SessionState, TurnGate};
use crate::transcript::TranscriptSink;
use crate::types::ConverseResponse;

/// What a turn changed, applied by the loop only if the turn succeeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnUpdate {
    pub continue_conversation: bool,
    pub conversation_state: Option<ConversationState>,
    pub volume_percentage: Option<u8>,
    pub bytes_played: usize,
}

/// Consumes the inbound messages of one call in arrival order.
pub struct ResponseProcessor<'a, K: AudioSink + ?Sized> {
    sink: &'a mut K,
    gate: &'a TurnGate,
    transcript: &'a dyn TranscriptSink,
    update: TurnUpdate,
    playback_started: bool,
}

impl<'a, K: AudioSink + ?Sized> ResponseProcessor<'a, K> {
    pub fn new(sink: &'a mut K, gate: &'a TurnGate, transcript: &'a dyn TranscriptSink) -> Self {
        Self {
            sink,
            gate,
            transcript,
            update: TurnUpdate::default(),
            playback_started: false,
        }
    }

    /// Decodes one wire frame and acts on each message it carries.
    pub async fn process(&mut self, response: &ConverseResponse) -> Result<(), ConverseError> {
        log_frame(response);
        let messages = match InboundMessage::from_response(response) {
            Ok(messages) => messages,
            Err(e) => {
                self.gate.advance(SessionState::Error).await;
                return Err(e);
            }
        };
        for message in messages {
            self.handle(message).await?;
        }
        Ok(())
    }

    pub async fn handle(&mut self, message: InboundMessage) -> Result<(), ConverseError> {
        if self.gate.current().is_terminal() {
            tracing::debug!("dropping message after the turn ended");
            return Ok(());
        }

        let result = match message {
            InboundMessage::EndOfUtterance => {
                tracing::info!("End of audio request detected");
                self.gate.advance(SessionState::AwaitingResult).await;
                Ok(())
            }
            InboundMessage::Error { code, message } => {
                tracing::error!("Server error ({}): {}", code, message);
                Err(ConverseError::Server { code, message })
            }
            InboundMessage::ResultUpdate(update) => {
                self.apply_result(update);
                Ok(())
            }
            InboundMessage::AudioOut(data) => self.play(&data).await,
        };

        if result.is_err() {
            self.gate.advance(SessionState::Error).await;
        }
        result
    }

    fn apply_result(&mut self, update: ResultUpdate) {
        if let Some(text) = update.spoken_request_text {
            self.transcript.user_said(&text);
        }
        if let Some(text) = update.spoken_response_text {
            self.transcript.assistant_said(&text);
        }
        if let Some(state) = update.conversation_state {
            self.update.conversation_state = Some(state);
        }
        if let Some(volume) = update.volume_percentage {
            tracing::info!("Volume should be set to {}%", volume);
            self.sink.set_volume_percentage(volume);
            self.update.volume_percentage = Some(volume);
        }
        match update.microphone_mode {
            Some(MicrophoneMode::FollowOn) => {
                tracing::info!("Expecting follow-on query from user.");
                self.update.continue_conversation = true;
            }
            Some(MicrophoneMode::CloseMicrophone) => self.update.continue_conversation = false,
            None => {}
        }
    }

    async fn play(&mut self, data: &[u8]) -> Result<(), ConverseError> {
        if data.is_empty() {
            return Ok(());
        }
        self.gate.advance(SessionState::Playing).await;
        if !self.playback_started {
            tracing::info!("Playing assistant response.");
            self.sink.start_playback();
            self.playback_started = true;
        }
        self.sink.write(data).await?;
        self.update.bytes_played += data.len();
        Ok(())
    }

    /// Waits for queued audio to play out.
    pub async fn drain(&mut self) -> Result<(), ConverseError> {
        if self.playback_started {
            self.sink.flush().await?;
        }
        Ok(())
    }

    pub fn finish(self) -> TurnUpdate {
        self.update
    }
}

fn log_frame(response: &ConverseResponse) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let audio_len = response.audio_out().map(|a| a.audio_data().len()).unwrap_or(0);
    tracing::debug!(
        event_type = response.event_type(),
        has_error = response.error().is_some(),
        has_result = response.result().is_some(),
        audio_out_b64_len = audio_len,
        "ConverseResponse"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemorySink;
    use crate::transcript::MockTranscriptSink;
    use crate::types::{Code, ConverseResult};

    async fn recording_gate() -> TurnGate {
        let gate = TurnGate::new();
        gate.advance(SessionState::Recording).await;
        gate
    }

    fn quiet_transcript() -> MockTranscriptSink {
        let mut transcript = MockTranscriptSink::new();
        transcript.expect_user_said().return_const(());
        transcript.expect_assistant_said().return_const(());
        transcript
    }

    #[tokio::test]
    async fn walks_the_turn_states() {
        let gate = recording_gate().await;
        let transcript = quiet_transcript();
        let mut sink = MemorySink::new(50);
        let mut processor = ResponseProcessor::new(&mut sink, &gate, &transcript);

        processor.handle(InboundMessage::EndOfUtterance).await.unwrap();
        assert_eq!(gate.current(), SessionState::AwaitingResult);
        processor.handle(InboundMessage::AudioOut(vec![1, 2])).await.unwrap();
        assert_eq!(gate.current(), SessionState::Playing);
        processor.handle(InboundMessage::AudioOut(vec![3])).await.unwrap();
        assert_eq!(processor.finish().bytes_played, 3);

        assert_eq!(sink.written(), vec![1, 2, 3]);
        assert_eq!(sink.playback_starts(), 1);
    }

    #[tokio::test]
    async fn last_microphone_mode_wins() {
        let gate = recording_gate().await;
        let transcript = quiet_transcript();
        let mut sink = MemorySink::new(50);
        let mut processor = ResponseProcessor::new(&mut sink, &gate, &transcript);

        for mode in [MicrophoneMode::FollowOn, MicrophoneMode::CloseMicrophone] {
            let update = ResultUpdate {
                microphone_mode: Some(mode),
                ..Default::default()
            };
            processor.handle(InboundMessage::ResultUpdate(update)).await.unwrap();
        }
        assert!(!processor.finish().continue_conversation);
    }

    #[tokio::test]
    async fn volume_applies_before_the_next_write() {
        let gate = recording_gate().await;
        let transcript = quiet_transcript();
        let mut sink = MemorySink::new(50);
        {
            let mut processor = ResponseProcessor::new(&mut sink, &gate, &transcript);
            let update = ResultUpdate {
                volume_percentage: Some(80),
                ..Default::default()
            };
            processor.handle(InboundMessage::ResultUpdate(update)).await.unwrap();
            processor.handle(InboundMessage::AudioOut(vec![9])).await.unwrap();
            assert_eq!(processor.finish().volume_percentage, Some(80));
        }
        assert_eq!(sink.volume_at_writes(), vec![80]);
    }

    #[tokio::test]
    async fn transcripts_are_forwarded() {
        let gate = recording_gate().await;
        let mut transcript = MockTranscriptSink::new();
        transcript
            .expect_user_said()
            .withf(|text| text == "what time is it")
            .times(1)
            .return_const(());
        transcript
            .expect_assistant_said()
            .withf(|text| text == "it is noon")
            .times(1)
            .return_const(());
        let mut sink = MemorySink::new(50);
        let mut processor = ResponseProcessor::new(&mut sink, &gate, &transcript);

        let update = ResultUpdate {
            spoken_request_text: Some("what time is it".into()),
            spoken_response_text: Some("it is noon".into()),
            ..Default::default()
        };
        processor.handle(InboundMessage::ResultUpdate(update)).await.unwrap();
    }

    #[tokio::test]
    async fn error_stops_everything_after_it() {
        let gate = recording_gate().await;
        let transcript = quiet_transcript();
        let mut sink = MemorySink::new(50);
        let mut processor = ResponseProcessor::new(&mut sink, &gate, &transcript);

        let error = processor
            .handle(InboundMessage::Error {
                code: Code::Internal,
                message: "x".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(error.code(), Code::Internal);
        assert_eq!(gate.current(), SessionState::Error);

        processor.handle(InboundMessage::AudioOut(vec![1])).await.unwrap();
        assert!(sink.written().is_empty());
    }

    #[tokio::test]
    async fn unknown_microphone_mode_fails_the_turn() {
        let gate = recording_gate().await;
        let transcript = quiet_transcript();
        let mut sink = MemorySink::new(50);
        let mut processor = ResponseProcessor::new(&mut sink, &gate, &transcript);

        let frame = ConverseResponse::new().with_result(ConverseResult::new().with_microphone_mode(7));
        let error = processor.process(&frame).await.unwrap_err();
        assert!(matches!(error, ConverseError::MalformedResponse(_)));
        assert_eq!(gate.current(), SessionState::Error);
    }
}
