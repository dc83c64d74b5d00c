//! Lesson source backed by a JSON data file.
//!
//! The file maps zero-padded lesson ids to their lines:
//!
//! ```json
//! { "001": [ { "speaker": "Анна", "text": "Привет!", "audioBase64": "..." } ] }
//! ```
//!
//! The whole file is parsed on first use and kept for the life of the source.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use diktant_core::error::{DiktantError, Result};
use diktant_core::types::{DialogueLine, Lesson, LessonId};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::LessonSource;

/// Speaker name used when a line does not carry one.
pub const UNKNOWN_SPEAKER: &str = "Người nói";

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default, rename = "audioBase64")]
    audio_base64: Option<String>,
    #[serde(default, rename = "wordMeanings")]
    word_meanings: HashMap<String, String>,
}

type LessonFile = HashMap<String, Vec<RawLine>>;

pub struct JsonLessonSource {
    path: PathBuf,
    data: OnceCell<LessonFile>,
}

impl JsonLessonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn data(&self) -> Result<&LessonFile> {
        self.data
            .get_or_try_init(|| async {
                let content = tokio::fs::read_to_string(&self.path).await?;
                let parsed: LessonFile = serde_json::from_str(&content)?;
                info!(
                    path = %self.path.display(),
                    lessons = parsed.len(),
                    "Lesson data loaded"
                );
                Ok::<_, DiktantError>(parsed)
            })
            .await
    }
}

/// Lesson ids are stored zero-padded to three digits ("7" -> "007").
fn storage_id(id: &LessonId) -> String {
    format!("{:0>3}", id.as_str())
}

fn decode_audio(lesson_id: &str, index: usize, encoded: Option<&str>) -> Option<Vec<u8>> {
    let encoded = encoded.map(str::trim).filter(|s| !s.is_empty())?;
    match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            warn!(lesson_id, line = index, error = %e, "Invalid audio payload, treating as absent");
            None
        }
    }
}

fn to_line(lesson_id: &str, index: usize, raw: &RawLine) -> DialogueLine {
    let speaker = raw
        .speaker
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(UNKNOWN_SPEAKER);
    let line = DialogueLine::new(speaker, raw.text.clone()).with_meanings(raw.word_meanings.clone());
    match decode_audio(lesson_id, index, raw.audio_base64.as_deref()) {
        Some(bytes) => line.with_audio(bytes),
        None => line,
    }
}

impl LessonSource for JsonLessonSource {
    async fn fetch_lesson(&self, id: &LessonId) -> Result<Option<Lesson>> {
        let data = self.data().await?;
        let key = storage_id(id);

        let Some(raw_lines) = data.get(&key) else {
            debug!(lesson_id = %id, "Lesson not present in data file");
            return Ok(None);
        };

        let lines = raw_lines
            .iter()
            .enumerate()
            .map(|(index, raw)| to_line(&key, index, raw))
            .collect();
        Ok(Some(Lesson::new(id.clone(), lines)))
    }
}
