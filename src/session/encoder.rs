use crate::audio::AudioSource;
use crate::error::ConverseError;
use crate::protocol::{OutboundMessage, SessionConfig};
use crate::session::state::TurnGate;

/// Pull-based producer of the outbound messages of one call.
///
/// Yields the `Config` message first, then one `Audio` message per chunk
/// pulled from the source, until the source runs dry or the session stops
/// recording. Holds no audio beyond the chunk it is returning.
pub struct RequestEncoder<'a, S: AudioSource + ?Sized> {
    source: &'a mut S,
    gate: &'a TurnGate,
    config: Option<SessionConfig>,
    finished: bool,
}

impl<'a, S: AudioSource + ?Sized> RequestEncoder<'a, S> {
    pub fn new(source: &'a mut S, gate: &'a TurnGate, config: SessionConfig) -> Self {
        Self {
            source,
            gate,
            config: Some(config),
            finished: false,
        }
    }

    pub fn has_next(&self) -> bool {
        self.config.is_some() || (!self.finished && self.gate.is_recording())
    }

    pub async fn next(&mut self) -> Result<Option<OutboundMessage>, ConverseError> {
        if let Some(config) = self.config.take() {
            return Ok(Some(OutboundMessage::Config(config)));
        }
        if !self.has_next() {
            self.finished = true;
            return Ok(None);
        }

        let chunk = tokio::select! {
            biased;
            _ = self.gate.left_recording() => None,
            chunk = self.source.next_chunk() => chunk?,
        };

        match chunk {
            Some(chunk) if self.gate.is_recording() => Ok(Some(OutboundMessage::Audio(chunk))),
            // Either the source is exhausted or the utterance ended while we waited.
            _ => {
                self.finished = true;
                Ok(None)
            }
        }
    }
}
