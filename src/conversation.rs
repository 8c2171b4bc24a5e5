use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::audio::{AudioSink, AudioSource};
use crate::client::Transport;
use crate::error::ConverseError;
use crate::protocol::ConversationState;
use crate::retry::RetryPolicy;
use crate::session::{ConversationSession, TurnContext, TurnOutcome, TurnReport, DEFAULT_DEADLINE};
use crate::transcript::{LogTranscript, TranscriptSink};

mod stats;

pub use stats::Stats;

const COMMAND_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopCommand {
    Start,
    Stop,
    Reset,
}

/// External control of a [`ConversationLoop`]. Commands take effect between turns.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    tx: mpsc::Sender<LoopCommand>,
}

impl LoopHandle {
    /// Starts the next turn, e.g. after a wake word or button press.
    pub async fn start(&self) -> Result<(), ConverseError> {
        self.send(LoopCommand::Start).await
    }

    /// Ends the loop once the current turn, if any, has finished.
    pub async fn stop(&self) -> Result<(), ConverseError> {
        self.send(LoopCommand::Stop).await
    }

    /// Forgets the conversation state and restores the initial volume.
    pub async fn reset(&self) -> Result<(), ConverseError> {
        self.send(LoopCommand::Reset).await
    }

    async fn send(&self, command: LoopCommand) -> Result<(), ConverseError> {
        self.tx.send(command).await.map_err(|_| ConverseError::LoopClosed)
    }
}

/// Runs turns one after another, chaining follow-on turns without a new start.
pub struct ConversationLoop<S, K> {
    transport: Arc<dyn Transport>,
    source: S,
    sink: K,
    transcript: Arc<dyn TranscriptSink>,
    retry: RetryPolicy,
    deadline: Duration,
    initial_volume: u8,
    context: TurnContext,
    commands: mpsc::Receiver<LoopCommand>,
    stats: Stats,
}

impl<S: AudioSource, K: AudioSink> ConversationLoop<S, K> {
    /// The loop runs until stopped or until every handle is dropped while it idles.
    ///
    /// Each call gets the transport's deadline, or the default one if it has none.
    pub fn new(transport: Arc<dyn Transport>, source: S, sink: K) -> (Self, LoopHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let initial_volume = sink.volume_percentage();
        let deadline = transport.deadline().unwrap_or(DEFAULT_DEADLINE);
        let conversation = Self {
            transport,
            source,
            sink,
            transcript: Arc::new(LogTranscript),
            retry: RetryPolicy::default(),
            deadline,
            initial_volume,
            context: TurnContext {
                conversation_state: None,
                volume_percentage: initial_volume,
            },
            commands,
            stats: Stats::new(),
        };
        (conversation, LoopHandle { tx })
    }

    pub fn with_transcript(mut self, transcript: Arc<dyn TranscriptSink>) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_initial_volume(mut self, volume_percentage: u8) -> Self {
        self.initial_volume = volume_percentage.min(100);
        self.context.volume_percentage = self.initial_volume;
        self
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn conversation_state(&self) -> Option<&ConversationState> {
        self.context.conversation_state.as_ref()
    }

    pub fn volume_percentage(&self) -> u8 {
        self.context.volume_percentage
    }

    /// Processes start, stop and reset requests until stopped.
    ///
    /// Only fatal failures end the loop with an error; any other failed turn
    /// is reported to the transcript and the loop waits for the next start.
    pub async fn run(&mut self) -> Result<(), ConverseError> {
        let mut follow_on = false;
        loop {
            let mut start = follow_on;
            loop {
                match self.commands.try_recv() {
                    Ok(LoopCommand::Start) => start = true,
                    Ok(LoopCommand::Stop) => {
                        tracing::info!("Conversation stopped.");
                        return Ok(());
                    }
                    Ok(LoopCommand::Reset) => self.reset(),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }

            if !start {
                tracing::debug!("waiting for a start request");
                match self.commands.recv().await {
                    Some(LoopCommand::Start) => {}
                    Some(LoopCommand::Reset) => {
                        self.reset();
                        continue;
                    }
                    Some(LoopCommand::Stop) | None => {
                        tracing::info!("Conversation stopped.");
                        return Ok(());
                    }
                }
            }

            if follow_on {
                self.stats.record_follow_on();
            }
            follow_on = match self.run_turn().await {
                Ok(outcome) => outcome.continue_conversation,
                Err(e) if e.is_fatal() => {
                    self.transcript.turn_failed(&e);
                    return Err(e);
                }
                Err(e) => {
                    self.transcript.turn_failed(&e);
                    false
                }
            };
        }
    }

    /// Runs one turn with retries and applies its updates if it succeeds.
    pub async fn run_turn(&mut self) -> Result<TurnOutcome, ConverseError> {
        let retry = self.retry;
        let mut turn = Turn {
            transport: &*self.transport,
            source: &mut self.source,
            sink: &mut self.sink,
            transcript: &*self.transcript,
            context: &self.context,
            deadline: self.deadline,
            attempts: 0,
        };
        let result = retry
            .run(&mut turn, |turn, number| Box::pin(turn.attempt(number)))
            .await;
        let attempts = turn.attempts;
        self.stats.record_attempts(attempts);

        match result {
            Ok(report) => {
                self.stats.record_turn(&report);
                self.apply(&report);
                Ok(report.outcome)
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }

    fn apply(&mut self, report: &TurnReport) {
        if let Some(state) = &report.conversation_state {
            self.context.conversation_state = Some(state.clone());
        }
        if let Some(volume) = report.volume_percentage {
            self.context.volume_percentage = volume;
        }
    }

    fn reset(&mut self) {
        tracing::info!("Resetting conversation state.");
        self.context = TurnContext {
            conversation_state: None,
            volume_percentage: self.initial_volume,
        };
    }
}

/// Borrowed pieces of the loop that one attempt needs.
struct Turn<'a, S, K> {
    transport: &'a dyn Transport,
    source: &'a mut S,
    sink: &'a mut K,
    transcript: &'a dyn TranscriptSink,
    context: &'a TurnContext,
    deadline: Duration,
    attempts: u32,
}

impl<S: AudioSource, K: AudioSink> Turn<'_, S, K> {
    async fn attempt(&mut self, number: u32) -> Result<TurnReport, ConverseError> {
        self.attempts += 1;
        if number > 1 {
            tracing::info!("Retrying turn, attempt {}", number);
        }
        ConversationSession::new(self.transport, &mut *self.source, &mut *self.sink, self.transcript)
            .with_deadline(self.deadline)
            .run(self.context)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{respond, Attempt, MemorySink, ScriptedSource, ScriptedTransport, Step};
    use crate::protocol::{InboundMessage, MicrophoneMode, ResultUpdate};
    use crate::transcript::MockTranscriptSink;
    use crate::types::{Code, RpcStatus};
    use tokio::sync::Notify;

    fn result(update: ResultUpdate) -> Step {
        respond(InboundMessage::ResultUpdate(update))
    }

    fn mode(mode: MicrophoneMode) -> ResultUpdate {
        ResultUpdate {
            microphone_mode: Some(mode),
            ..Default::default()
        }
    }

    fn conversation(
        transport: &Arc<ScriptedTransport>,
    ) -> (ConversationLoop<ScriptedSource, MemorySink>, LoopHandle) {
        ConversationLoop::new(
            transport.clone(),
            ScriptedSource::new(vec![vec![0; 4]]),
            MemorySink::new(40),
        )
    }

    async fn wait_for_calls(transport: &ScriptedTransport, calls: usize) {
        while transport.opened() < calls {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn follow_on_starts_next_turn_without_trigger() {
        let first = ResultUpdate {
            conversation_state: Some(ConversationState::from(&b"abc"[..])),
            volume_percentage: Some(80),
            microphone_mode: Some(MicrophoneMode::FollowOn),
            ..Default::default()
        };
        let transport = Arc::new(ScriptedTransport::new(vec![
            Attempt::Serve(vec![
                Step::Expect(1),
                result(first),
                respond(InboundMessage::AudioOut(vec![0x01, 0x02])),
            ]),
            Attempt::Serve(vec![Step::Expect(1), result(mode(MicrophoneMode::CloseMicrophone))]),
        ]));
        let (mut conversation, handle) = conversation(&transport);

        handle.start().await.unwrap();
        drop(handle);
        conversation.run().await.unwrap();

        // The second turn needed no start; after CloseMicrophone the loop idled.
        assert_eq!(transport.opened(), 2);
        let stats = conversation.stats();
        assert_eq!(stats.turns(), 2);
        assert_eq!(stats.follow_on_turns(), 1);
        assert_eq!(stats.audio_bytes_played(), 2);

        let second = transport.requests(1).await;
        let config = second[0].get_config().unwrap();
        assert_eq!(config.converse_state().unwrap().conversation_state(), "YWJj");
        assert_eq!(config.audio_out_config().volume_percentage(), 80);
        assert_eq!(conversation.conversation_state().unwrap().as_bytes(), b"abc");
    }

    #[tokio::test]
    async fn state_survives_turns_without_a_new_one() {
        let with_state = ResultUpdate {
            conversation_state: Some(ConversationState::from(&b"abc"[..])),
            microphone_mode: Some(MicrophoneMode::FollowOn),
            ..Default::default()
        };
        let transport = Arc::new(ScriptedTransport::new(vec![
            Attempt::Serve(vec![Step::Expect(1), result(with_state)]),
            Attempt::Serve(vec![Step::Expect(1), result(mode(MicrophoneMode::CloseMicrophone))]),
        ]));
        let (mut conversation, handle) = conversation(&transport);
        handle.start().await.unwrap();
        drop(handle);
        conversation.run().await.unwrap();

        assert_eq!(conversation.conversation_state().unwrap().as_bytes(), b"abc");
        assert_eq!(conversation.volume_percentage(), 40);
    }

    #[tokio::test]
    async fn stop_waits_for_the_turn_boundary() {
        let release = Arc::new(Notify::new());
        let transport = Arc::new(ScriptedTransport::new(vec![Attempt::Serve(vec![
            Step::Expect(1),
            result(mode(MicrophoneMode::FollowOn)),
            Step::Hold(release.clone()),
        ])]));
        let (mut conversation, handle) = conversation(&transport);

        let running = tokio::spawn(async move {
            let result = conversation.run().await;
            (result, conversation)
        });
        handle.start().await.unwrap();
        wait_for_calls(&transport, 1).await;
        handle.stop().await.unwrap();
        release.notify_one();

        let (result, conversation) = running.await.unwrap();
        result.unwrap();
        // The turn in flight finished; the follow-on it asked for never started.
        assert_eq!(conversation.stats().turns(), 1);
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn reset_clears_state_for_the_next_turn() {
        let release = Arc::new(Notify::new());
        let with_state = ResultUpdate {
            conversation_state: Some(ConversationState::from(&b"abc"[..])),
            volume_percentage: Some(90),
            ..Default::default()
        };
        let transport = Arc::new(ScriptedTransport::new(vec![
            Attempt::Serve(vec![Step::Expect(1), result(with_state), Step::Hold(release.clone())]),
            Attempt::Serve(vec![Step::Expect(1)]),
        ]));
        let (mut conversation, handle) = conversation(&transport);

        let running = tokio::spawn(async move {
            let result = conversation.run().await;
            (result, conversation)
        });
        handle.start().await.unwrap();
        wait_for_calls(&transport, 1).await;
        handle.reset().await.unwrap();
        handle.start().await.unwrap();
        drop(handle);
        release.notify_one();

        let (result, conversation) = running.await.unwrap();
        result.unwrap();
        assert_eq!(transport.opened(), 2);
        let second = transport.requests(1).await;
        let config = second[0].get_config().unwrap();
        assert!(config.converse_state().is_none());
        assert_eq!(config.audio_out_config().volume_percentage(), 40);
        assert!(conversation.conversation_state().is_none());
    }

    #[tokio::test]
    async fn authentication_failure_stops_the_loop() {
        let transport = Arc::new(ScriptedTransport::new(vec![Attempt::Refuse(
            Code::Unauthenticated,
            "bad token".into(),
        )]));
        let mut transcript = MockTranscriptSink::new();
        transcript
            .expect_turn_failed()
            .withf(|e| matches!(e, ConverseError::Authentication { .. }))
            .times(1)
            .return_const(());
        let (conversation, handle) = conversation(&transport);
        let mut conversation = conversation.with_transcript(Arc::new(transcript));

        handle.start().await.unwrap();
        let error = conversation.run().await.unwrap_err();
        assert!(matches!(error, ConverseError::Authentication { .. }));
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_turn_and_idle() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Attempt::unavailable(),
            Attempt::unavailable(),
            Attempt::unavailable(),
        ]));
        let mut transcript = MockTranscriptSink::new();
        transcript
            .expect_turn_failed()
            .withf(|e| e.is_transient())
            .times(1)
            .return_const(());
        let (conversation, handle) = conversation(&transport);
        let mut conversation = conversation.with_transcript(Arc::new(transcript));

        handle.start().await.unwrap();
        drop(handle);
        conversation.run().await.unwrap();

        assert_eq!(transport.opened(), 3);
        assert_eq!(conversation.stats().attempts(), 3);
        assert_eq!(conversation.stats().failed_turns(), 1);
        assert_eq!(conversation.stats().turns(), 0);
    }

    #[tokio::test]
    async fn transient_failure_then_success_is_one_turn() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Attempt::unavailable(),
            Attempt::Serve(vec![Step::Expect(1)]),
        ]));
        let (mut conversation, _handle) = conversation(&transport);

        let outcome = conversation.run_turn().await.unwrap();
        assert!(!outcome.continue_conversation);
        assert_eq!(conversation.stats().attempts(), 2);
        assert_eq!(conversation.stats().turns(), 1);
    }

    #[tokio::test]
    async fn failed_turn_leaves_state_untouched() {
        let with_state = ResultUpdate {
            conversation_state: Some(ConversationState::from(&b"abc"[..])),
            ..Default::default()
        };
        let transport = Arc::new(ScriptedTransport::new(vec![Attempt::Serve(vec![
            Step::Expect(1),
            result(with_state),
            Step::Finish(RpcStatus::new(Code::Internal, "backend failure")),
        ])]));
        let (mut conversation, _handle) = conversation(&transport);

        let error = conversation.run_turn().await.unwrap_err();
        assert_eq!(error.code(), Code::Internal);
        assert!(conversation.conversation_state().is_none());
        assert_eq!(conversation.stats().failed_turns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_deadline_bounds_each_call() {
        let transport = Arc::new(ScriptedTransport::new(vec![Attempt::Stall]).with_deadline(Duration::from_secs(3)));
        let (mut conversation, _handle) = conversation(&transport);
        let started = tokio::time::Instant::now();

        let error = conversation.run_turn().await.unwrap_err();
        assert_eq!(error.code(), Code::DeadlineExceeded);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn closed_loop_rejects_commands() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let (conversation, handle) = conversation(&transport);
        drop(conversation);
        assert!(matches!(handle.start().await, Err(ConverseError::LoopClosed)));
    }
}
