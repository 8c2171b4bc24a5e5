use crate::session::TurnReport;

/// Counters for one conversation loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    turns: u64,
    follow_on_turns: u64,
    failed_turns: u64,
    attempts: u64,
    audio_chunks_sent: u64,
    audio_bytes_played: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempts(&mut self, attempts: u32) {
        self.attempts += u64::from(attempts);
    }

    pub(crate) fn record_turn(&mut self, report: &TurnReport) {
        self.turns += 1;
        self.audio_chunks_sent += report.chunks_sent as u64;
        self.audio_bytes_played += report.bytes_played as u64;
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_turns += 1;
    }

    pub(crate) fn record_follow_on(&mut self) {
        self.follow_on_turns += 1;
    }

    /// Completed turns.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Turns started by the service's follow-on signal rather than a start request.
    pub fn follow_on_turns(&self) -> u64 {
        self.follow_on_turns
    }

    pub fn failed_turns(&self) -> u64 {
        self.failed_turns
    }

    /// Calls opened, retries included.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn audio_chunks_sent(&self) -> u64 {
        self.audio_chunks_sent
    }

    pub fn audio_bytes_played(&self) -> u64 {
        self.audio_bytes_played
    }
}
