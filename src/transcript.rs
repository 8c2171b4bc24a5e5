use crate::error::ConverseError;

/// Receives the text side of each turn, e.g. for a chat display.
#[cfg_attr(test, mockall::automock)]
pub trait TranscriptSink: Send + Sync {
    fn user_said(&self, text: &str);

    fn assistant_said(&self, text: &str);

    fn turn_failed(&self, error: &ConverseError);
}

/// Writes transcripts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTranscript;

impl TranscriptSink for LogTranscript {
    fn user_said(&self, text: &str) {
        tracing::info!("Transcript of user request: \"{}\".", text);
    }

    fn assistant_said(&self, text: &str) {
        tracing::info!("Transcript of assistant response: \"{}\".", text);
    }

    fn turn_failed(&self, error: &ConverseError) {
        tracing::error!("Turn failed: {}", error);
    }
}
