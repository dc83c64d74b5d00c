use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Identifier of a lesson as understood by the content collaborator
/// (e.g. `"007"`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LessonId(pub String);

impl LessonId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LessonId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for LessonId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Lesson content
// =============================================================================

/// One line of dialogue to be dictated.
///
/// Everything except the audio payload is fixed once the line is loaded. The
/// payload starts absent and may be filled exactly once, either by the
/// prefetch queue or by an on-demand fetch; readers on other tasks observe
/// either no payload or the complete one.
#[derive(Clone, Default)]
pub struct DialogueLine {
    pub speaker: String,
    pub text: String,
    /// Translations keyed by normalized word.
    pub word_meanings: HashMap<String, String>,
    audio: OnceLock<Vec<u8>>,
}

impl DialogueLine {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            word_meanings: HashMap::new(),
            audio: OnceLock::new(),
        }
    }

    /// Attach a pre-recorded payload at load time.
    pub fn with_audio(self, payload: Vec<u8>) -> Self {
        let _ = self.audio.set(payload);
        self
    }

    pub fn with_meanings(mut self, meanings: HashMap<String, String>) -> Self {
        self.word_meanings = meanings;
        self
    }

    /// Encoded audio for this line, if it has been loaded or fetched.
    pub fn audio_payload(&self) -> Option<&[u8]> {
        self.audio.get().map(Vec::as_slice)
    }

    pub fn has_audio(&self) -> bool {
        self.audio.get().is_some()
    }

    /// Fill the payload if it is still absent.
    ///
    /// Returns `false` when another writer got there first; the existing
    /// payload is never replaced.
    pub fn fill_audio(&self, payload: Vec<u8>) -> bool {
        self.audio.set(payload).is_ok()
    }

    /// Translation for an already-normalized word.
    pub fn meaning(&self, normalized_word: &str) -> Option<&str> {
        self.word_meanings.get(normalized_word).map(String::as_str)
    }
}

impl fmt::Debug for DialogueLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogueLine")
            .field("speaker", &self.speaker)
            .field("text", &self.text)
            .field("word_meanings", &self.word_meanings.len())
            .field("audio_bytes", &self.audio.get().map(Vec::len))
            .finish()
    }
}

/// A lesson: an ordered sequence of dialogue lines.
#[derive(Debug, Clone)]
pub struct Lesson {
    pub id: LessonId,
    pub lines: Vec<DialogueLine>,
}

impl Lesson {
    pub fn new(id: impl Into<LessonId>, lines: Vec<DialogueLine>) -> Self {
        Self {
            id: id.into(),
            lines,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, index: usize) -> Option<&DialogueLine> {
        self.lines.get(index)
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Stored progress for a single lesson.
///
/// `percentage` never decreases and `is_completed` never reverts once set;
/// `current_index` is simply the last line checkpointed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub current_index: usize,
    pub percentage: u8,
    pub is_completed: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// Progress after finishing line `index` of a `total`-line lesson.
    ///
    /// Returns `None` for an empty lesson.
    pub fn at_line(index: usize, total: usize) -> Option<Self> {
        if total == 0 {
            return None;
        }
        let ratio = (index as f64 + 1.0) / total as f64;
        let percentage = (ratio * 100.0).round().clamp(0.0, 100.0) as u8;
        Some(Self {
            current_index: index,
            percentage,
            is_completed: index + 1 >= total,
            updated_at: Some(Utc::now()),
        })
    }

    /// A record marking a `total`-line lesson finished, positioned on its
    /// last line.
    pub fn completed(total: usize) -> Self {
        Self {
            current_index: total.saturating_sub(1),
            percentage: 100,
            is_completed: true,
            updated_at: Some(Utc::now()),
        }
    }

    /// Combine a fresh record with what was stored before.
    pub fn merged_with(self, previous: Option<&ProgressRecord>) -> Self {
        match previous {
            Some(prev) => Self {
                current_index: self.current_index,
                percentage: self.percentage.max(prev.percentage),
                is_completed: self.is_completed || prev.is_completed,
                updated_at: self.updated_at,
            },
            None => self,
        }
    }
}

/// All stored progress, keyed by lesson id.
pub type ProgressMap = BTreeMap<String, ProgressRecord>;

// =============================================================================
// Tests
// =============================================================================
