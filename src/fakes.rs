//! In-memory collaborators for driving sessions in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::audio::{AudioChunk, AudioSink, AudioSource};
use crate::client::{Call, Transport};
use crate::error::{AudioError, ConverseError};
use crate::protocol::InboundMessage;
use crate::types::{Code, ConverseRequest, ConverseResponse, RpcStatus};

pub struct ScriptedSource {
    chunks: VecDeque<Vec<u8>>,
    repeat: Option<Vec<u8>>,
    silent: bool,
    fail: bool,
    pulled: usize,
    starts: usize,
    stops: usize,
}

impl ScriptedSource {
    /// Yields `chunks` and then reports exhaustion.
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            repeat: None,
            silent: false,
            fail: false,
            pulled: 0,
            starts: 0,
            stops: 0,
        }
    }

    /// Yields `chunk` forever.
    pub fn endless(chunk: Vec<u8>) -> Self {
        Self {
            repeat: Some(chunk),
            ..Self::new(Vec::new())
        }
    }

    /// Never yields anything.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::new(Vec::new())
        }
    }

    /// Fails on the first pull.
    pub fn broken() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn pulled(&self) -> usize {
        self.pulled
    }

    pub fn starts(&self) -> usize {
        self.starts
    }

    pub fn stops(&self) -> usize {
        self.stops
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn sample_width(&self) -> u16 {
        2
    }

    fn start_recording(&mut self) {
        self.starts += 1;
    }

    fn stop_recording(&mut self) {
        self.stops += 1;
    }

    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>, AudioError> {
        if self.fail {
            return Err(AudioError::Source("microphone unplugged".into()));
        }
        if self.silent {
            std::future::pending::<()>().await;
        }
        if let Some(chunk) = self.chunks.pop_front() {
            self.pulled += 1;
            return Ok(Some(chunk.into()));
        }
        match &self.repeat {
            Some(chunk) => {
                // Give the other half of the session a chance to run.
                tokio::task::yield_now().await;
                self.pulled += 1;
                Ok(Some(chunk.clone().into()))
            }
            None => Ok(None),
        }
    }
}

#[derive(Default)]
pub struct MemorySink {
    volume: u8,
    written: Vec<u8>,
    volume_at_writes: Vec<u8>,
    playback_starts: usize,
    playback_stops: usize,
    flushes: usize,
}

impl MemorySink {
    pub fn new(volume: u8) -> Self {
        Self {
            volume,
            ..Default::default()
        }
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.clone()
    }

    pub fn volume_at_writes(&self) -> Vec<u8> {
        self.volume_at_writes.clone()
    }

    pub fn playback_starts(&self) -> usize {
        self.playback_starts
    }

    pub fn playback_stops(&self) -> usize {
        self.playback_stops
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

#[async_trait]
impl AudioSink for MemorySink {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn volume_percentage(&self) -> u8 {
        self.volume
    }

    fn set_volume_percentage(&mut self, volume_percentage: u8) {
        self.volume = volume_percentage;
    }

    fn start_playback(&mut self) {
        self.playback_starts += 1;
    }

    fn stop_playback(&mut self) {
        self.playback_stops += 1;
    }

    async fn write(&mut self, pcm16: &[u8]) -> Result<(), AudioError> {
        self.written.extend_from_slice(pcm16);
        self.volume_at_writes.push(self.volume);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), AudioError> {
        self.flushes += 1;
        Ok(())
    }
}

/// One server-side action of a scripted call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Wait until the client has sent at least this many requests.
    Expect(usize),
    /// Wait until the client half-closes.
    AwaitHalfClose,
    Send(ConverseResponse),
    /// Keep the call open until notified.
    Hold(Arc<Notify>),
    /// End the call with this status instead of a clean close.
    Finish(RpcStatus),
}

pub fn respond(message: InboundMessage) -> Step {
    Step::Send(message.into_response())
}

/// How the transport answers one `open`.
#[derive(Debug, Clone)]
pub enum Attempt {
    Refuse(Code, String),
    /// `open` never resolves, like a handshake the server never answers.
    Stall,
    Serve(Vec<Step>),
}

impl Attempt {
    pub fn unavailable() -> Self {
        Attempt::Refuse(Code::Unavailable, "service unavailable".into())
    }
}

struct CallLog {
    requests: Arc<Mutex<Vec<ConverseRequest>>>,
    reader: Option<JoinHandle<()>>,
}

/// Plays back one [`Attempt`] per opened call and records what the client sent.
#[derive(Default)]
pub struct ScriptedTransport {
    attempts: Mutex<VecDeque<Attempt>>,
    calls: Mutex<Vec<CallLog>>,
    opened: AtomicUsize,
    deadline: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(attempts: Vec<Attempt>) -> Self {
        Self {
            attempts: Mutex::new(attempts.into()),
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Everything the client sent on the `index`-th served call, once it half-closed.
    pub async fn requests(&self, index: usize) -> Vec<ConverseRequest> {
        let (requests, reader) = {
            let mut calls = self.calls.lock().unwrap();
            let call = &mut calls[index];
            (call.requests.clone(), call.reader.take())
        };
        if let Some(reader) = reader {
            reader.await.unwrap();
        }
        let requests = requests.lock().unwrap();
        requests.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    async fn open(&self) -> Result<Call, ConverseError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let attempt = self.attempts.lock().unwrap().pop_front();
        let steps = match attempt {
            Some(Attempt::Serve(steps)) => steps,
            Some(Attempt::Stall) => std::future::pending().await,
            Some(Attempt::Refuse(code, message)) => {
                return Err(RpcStatus::new(code, &message).into());
            }
            None => {
                return Err(RpcStatus::new(Code::Unimplemented, "no more scripted calls").into());
            }
        };

        let (c_tx, mut c_rx) = mpsc::channel::<ConverseRequest>(16);
        let (s_tx, s_rx) = mpsc::channel(16);
        let (progress_tx, mut progress_rx) = watch::channel((0usize, false));

        let log = Arc::new(Mutex::new(Vec::new()));
        let reader = {
            let log = log.clone();
            tokio::spawn(async move {
                while let Some(request) = c_rx.recv().await {
                    log.lock().unwrap().push(request);
                    progress_tx.send_modify(|(count, _)| *count += 1);
                }
                progress_tx.send_modify(|(_, closed)| *closed = true);
            })
        };

        tokio::spawn(async move {
            for step in steps {
                match step {
                    Step::Expect(n) => {
                        if progress_rx.wait_for(|(count, _)| *count >= n).await.is_err() {
                            return;
                        }
                    }
                    Step::AwaitHalfClose => {
                        if progress_rx.wait_for(|(_, closed)| *closed).await.is_err() {
                            return;
                        }
                    }
                    Step::Send(response) => {
                        if s_tx.send(Ok(response)).await.is_err() {
                            return;
                        }
                    }
                    Step::Hold(release) => release.notified().await,
                    Step::Finish(status) => {
                        if !status.code().is_ok() {
                            let _ = s_tx.send(Err(status)).await;
                        }
                        return;
                    }
                }
            }
        });

        self.calls.lock().unwrap().push(CallLog {
            requests: log,
            reader: Some(reader),
        });
        Ok(Call::new(c_tx, s_rx))
    }
}
