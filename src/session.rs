use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tokio::time::Instant;

use crate::audio::{AudioSink, AudioSource};
use crate::client::{Requests, Responses, Transport};
use crate::error::ConverseError;
use crate::protocol::{ConversationState, OutboundMessage, SessionConfig};
use crate::transcript::TranscriptSink;
use crate::types::{Code, RpcStatus};

mod encoder;
mod processor;
mod state;

pub use encoder::RequestEncoder;
pub use processor::{ResponseProcessor, TurnUpdate};
pub use state::{SessionState, TurnGate};

/// Default per-call deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(185);

/// The externally visible result of a completed turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    pub continue_conversation: bool,
}

/// Loop-owned state handed to a session by value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnContext {
    pub conversation_state: Option<ConversationState>,
    pub volume_percentage: u8,
}

/// Everything a successful turn produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Replacement for the loop's conversation state, if the service sent one.
    pub conversation_state: Option<ConversationState>,
    pub volume_percentage: Option<u8>,
    pub chunks_sent: usize,
    pub bytes_played: usize,
}

/// One full duplex call: sends the user's utterance while playing back the answer.
pub struct ConversationSession<'a, S: ?Sized, K: ?Sized> {
    transport: &'a dyn Transport,
    source: &'a mut S,
    sink: &'a mut K,
    transcript: &'a dyn TranscriptSink,
    deadline: Duration,
    gate: TurnGate,
}

impl<'a, S, K> ConversationSession<'a, S, K>
where
    S: AudioSource + ?Sized,
    K: AudioSink + ?Sized,
{
    pub fn new(
        transport: &'a dyn Transport,
        source: &'a mut S,
        sink: &'a mut K,
        transcript: &'a dyn TranscriptSink,
    ) -> Self {
        Self {
            transport,
            source,
            sink,
            transcript,
            deadline: DEFAULT_DEADLINE,
            gate: TurnGate::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> SessionState {
        self.gate.current()
    }

    /// Runs the call to completion.
    ///
    /// Recording and playback are stopped on every exit path. On failure the
    /// session is left in [`SessionState::Error`] unless the call never opened.
    pub async fn run(&mut self, context: &TurnContext) -> Result<TurnReport, ConverseError> {
        // One deadline covers opening the call and the whole exchange.
        let deadline = Instant::now() + self.deadline;
        let call = tokio::time::timeout_at(deadline, self.transport.open())
            .await
            .map_err(|_| deadline_exceeded())??;
        let (requests, mut responses, _call) = call.split();

        let config = SessionConfig {
            sample_rate_in: self.source.sample_rate(),
            sample_rate_out: self.sink.sample_rate(),
            volume_percentage: context.volume_percentage,
            conversation_state: context.conversation_state.clone(),
        };
        self.sink.set_volume_percentage(context.volume_percentage);

        let gate = &self.gate;
        let transcript = self.transcript;
        gate.advance(SessionState::Recording).await;
        tracing::info!("Recording audio request.");
        let mut source = Recording::start(&mut *self.source);
        let mut sink = Playback::new(&mut *self.sink);

        let result = {
            let encoder = RequestEncoder::new(&mut *source, gate, config);
            let mut processor = ResponseProcessor::new(&mut *sink, gate, transcript);
            let exchange = async {
                let (chunks_sent, ()) = tokio::try_join!(
                    send_requests(encoder, requests, gate),
                    receive_responses(&mut processor, &mut responses, gate),
                )?;
                Ok::<_, ConverseError>(chunks_sent)
            };
            let finished = tokio::time::timeout_at(deadline, exchange).await;
            match finished {
                Ok(Ok(chunks_sent)) => Ok((chunks_sent, processor.finish())),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(deadline_exceeded()),
            }
        };
        source.stop();
        sink.stop();

        match result {
            Ok((chunks_sent, update)) => Ok(TurnReport {
                outcome: TurnOutcome {
                    continue_conversation: update.continue_conversation,
                },
                conversation_state: update.conversation_state,
                volume_percentage: update.volume_percentage,
                chunks_sent,
                bytes_played: update.bytes_played,
            }),
            Err(e) => {
                self.gate.advance(SessionState::Error).await;
                Err(e)
            }
        }
    }
}

fn deadline_exceeded() -> ConverseError {
    RpcStatus::new(Code::DeadlineExceeded, "converse call timed out").into()
}

/// Producer half: writes the encoder's messages until it runs dry, then half-closes.
async fn send_requests<S: AudioSource + ?Sized>(
    mut encoder: RequestEncoder<'_, S>,
    requests: Requests,
    gate: &TurnGate,
) -> Result<usize, ConverseError> {
    let mut chunks_sent = 0;
    while let Some(message) = encoder.next().await? {
        let _permit = gate.emission_permit().await;
        if message.is_audio() && !gate.is_recording() {
            break;
        }
        if let OutboundMessage::Config(config) = &message {
            tracing::debug!(
                sample_rate_in = config.sample_rate_in,
                sample_rate_out = config.sample_rate_out,
                volume_percentage = config.volume_percentage,
                has_conversation_state = config.conversation_state.is_some(),
                "ConverseRequest config"
            );
        }
        let is_audio = message.is_audio();
        if let Err(status) = requests.send(message.into_request()).await {
            // The call is over; the response side reports how it ended.
            tracing::debug!("request stream closed early: {}", status);
            break;
        }
        if is_audio {
            chunks_sent += 1;
        }
    }
    drop(requests);
    Ok(chunks_sent)
}

/// Consumer half: drains the response stream.
async fn receive_responses<K: AudioSink + ?Sized>(
    processor: &mut ResponseProcessor<'_, K>,
    responses: &mut Responses,
    gate: &TurnGate,
) -> Result<(), ConverseError> {
    loop {
        match responses.message().await {
            Ok(Some(response)) => processor.process(&response).await?,
            Ok(None) => {
                processor.drain().await?;
                gate.advance(SessionState::Completed).await;
                return Ok(());
            }
            Err(status) => {
                tracing::error!("converse call failed: {}", status);
                gate.advance(SessionState::Error).await;
                return Err(status.into());
            }
        }
    }
}

/// Keeps the source recording until stopped or dropped.
struct Recording<'a, S: AudioSource + ?Sized> {
    source: &'a mut S,
    active: bool,
}

impl<'a, S: AudioSource + ?Sized> Recording<'a, S> {
    fn start(source: &'a mut S) -> Self {
        source.start_recording();
        Self { source, active: true }
    }

    fn stop(&mut self) {
        if std::mem::take(&mut self.active) {
            self.source.stop_recording();
        }
    }
}

impl<S: AudioSource + ?Sized> Deref for Recording<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &*self.source
    }
}

impl<S: AudioSource + ?Sized> DerefMut for Recording<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut *self.source
    }
}

impl<S: AudioSource + ?Sized> Drop for Recording<'_, S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stops playback when dropped, however the turn ended.
struct Playback<'a, K: AudioSink + ?Sized> {
    sink: &'a mut K,
    stopped: bool,
}

impl<'a, K: AudioSink + ?Sized> Playback<'a, K> {
    fn new(sink: &'a mut K) -> Self {
        Self { sink, stopped: false }
    }

    fn stop(&mut self) {
        if !std::mem::replace(&mut self.stopped, true) {
            self.sink.stop_playback();
        }
    }
}

impl<K: AudioSink + ?Sized> Deref for Playback<'_, K> {
    type Target = K;

    fn deref(&self) -> &K {
        &*self.sink
    }
}

impl<K: AudioSink + ?Sized> DerefMut for Playback<'_, K> {
    fn deref_mut(&mut self) -> &mut K {
        &mut *self.sink
    }
}

impl<K: AudioSink + ?Sized> Drop for Playback<'_, K> {
    fn drop(&mut self) {
        self.stop();
    }
}
