use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{LessonId, ProgressRecord};

// =============================================================================
// Playback
// =============================================================================

/// Why a line's audio is being played.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackReason {
    /// Played automatically when a line becomes active.
    AutoAdvance,
    /// The learner pressed replay.
    Replay,
}

/// Context captured when a playback is requested, echoed back in events so
/// consumers can discard completions that belong to an older line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackTag {
    pub line: usize,
    pub generation: u64,
    pub reason: PlaybackReason,
}

/// Lifecycle events emitted by the playback controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PlaybackEvent {
    Started(PlaybackTag),
    /// Playback ran to its natural end and the controller is idle again.
    Ended(PlaybackTag),
    Failed { tag: PlaybackTag, reason: String },
}

// =============================================================================
// Session
// =============================================================================

/// Why a dictation session handed control back to the lesson catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The content collaborator had no such lesson, or it had no lines.
    NotFound,
    /// The lesson fetch failed or timed out.
    LoadFailed,
    /// The learner backed out.
    UserExit,
    /// The last line was finished.
    Completed,
}

/// Events emitted by a dictation room for the presentation layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SessionEvent {
    LessonLoaded {
        session_id: Uuid,
        lesson_id: LessonId,
        lines: usize,
    },
    /// The learner acknowledged the activation step.
    Activated { session_id: Uuid },
    LineStarted { line: usize, words: usize },
    WordCorrect { line: usize, slot: usize },
    LineCompleted { line: usize },
    Checkpointed {
        lesson_id: LessonId,
        record: ProgressRecord,
    },
    HintsToggled { visible: bool },
    Exited { session_id: Uuid, reason: ExitReason },
}
