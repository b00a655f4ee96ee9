//! Events and states of the streaming voice loop

use std::fmt;

/// One event pushed to a streaming voice client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Calibration finished; the loop is listening
    Ready,
    /// A transcribed utterance
    Heard(String),
    /// The reply to the last utterance
    Assistant(String),
    /// Heartbeat
    Listening,
    /// Processing of one utterance failed; the loop continues
    Error(String),
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("Ready"),
            Self::Heard(text) => write!(f, "Heard: {text}"),
            Self::Assistant(text) => write!(f, "Assistant: {text}"),
            Self::Listening => f.write_str("Listening..."),
            Self::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Lifecycle of a voice loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No capture device held
    Idle,
    /// Sampling ambient noise
    Calibrating,
    /// Waiting for the next utterance
    Listening,
    /// At least one utterance is being answered
    Processing,
    /// Capture released
    Stopped,
}

impl LoopState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Calibrating => "calibrating",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the loop still owns the capture device
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Calibrating | Self::Listening | Self::Processing)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_rendering() {
        assert_eq!(StreamEvent::Ready.to_string(), "Ready");
        assert_eq!(StreamEvent::Heard("hi".into()).to_string(), "Heard: hi");
        assert_eq!(
            StreamEvent::Assistant("Save more.".into()).to_string(),
            "Assistant: Save more."
        );
        assert_eq!(StreamEvent::Listening.to_string(), "Listening...");
        assert_eq!(StreamEvent::Error("boom".into()).to_string(), "Error: boom");
    }

    #[test]
    fn test_active_states() {
        assert!(!LoopState::Idle.is_active());
        assert!(LoopState::Listening.is_active());
        assert!(LoopState::Processing.is_active());
        assert!(!LoopState::Stopped.is_active());
    }
}
