use async_trait::async_trait;

use crate::error::AudioError;

/// A bounded piece of captured LINEAR16 audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk(Vec<u8>);

impl AudioChunk {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Where the user's speech comes from.
#[async_trait]
pub trait AudioSource: Send {
    fn sample_rate(&self) -> u32;

    /// Bytes per sample.
    fn sample_width(&self) -> u16;

    fn start_recording(&mut self);

    fn stop_recording(&mut self);

    /// Next captured chunk, or `None` once the source is exhausted.
    ///
    /// Must be cancel safe: a call abandoned before it resolves loses no
    /// audio that a later call would have returned.
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>, AudioError>;
}

/// Where the assistant's answer is played.
#[async_trait]
pub trait AudioSink: Send {
    fn sample_rate(&self) -> u32;

    fn volume_percentage(&self) -> u8;

    fn set_volume_percentage(&mut self, volume_percentage: u8);

    fn start_playback(&mut self);

    /// Discards anything not yet played and stops output.
    fn stop_playback(&mut self);

    /// Queues LINEAR16 bytes, waiting while the device buffer is full.
    async fn write(&mut self, pcm16: &[u8]) -> Result<(), AudioError>;

    /// Waits until everything written so far has been played.
    async fn flush(&mut self) -> Result<(), AudioError>;
}
