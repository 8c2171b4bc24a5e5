mod audio;
pub mod client;
mod conversation;
mod error;
pub mod protocol;
mod retry;
pub mod session;
mod settings;
mod transcript;

#[cfg(feature = "utils")]
mod device;

#[cfg(test)]
mod fakes;

pub use assistant_converse_types as types;
pub use audio::{AudioChunk, AudioSink, AudioSource};
pub use client::{connect, Config, ConfigBuilder, CredentialProvider, StaticCredentials, Transport, WsTransport};
pub use conversation::{ConversationLoop, LoopHandle, Stats};
pub use error::{AudioError, ConfigError, ConverseError};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use session::{ConversationSession, SessionState, TurnContext, TurnOutcome, TurnReport};
pub use settings::AudioSettings;
pub use transcript::{LogTranscript, TranscriptSink};

#[cfg(feature = "utils")]
pub use device::{DeviceSink, DeviceSource};

#[cfg(feature = "utils")]
pub use assistant_converse_utils as utils;
