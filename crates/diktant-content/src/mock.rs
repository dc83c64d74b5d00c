//! In-memory collaborators for tests and offline runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use diktant_core::error::{DiktantError, Result};
use diktant_core::types::{Lesson, LessonId};
use tracing::debug;

use crate::{LessonSource, SpeechSynthesizer};

// =============================================================================
// Lessons
// =============================================================================

/// Serves lessons from a map. Clones share the fetch counter.
#[derive(Debug, Clone, Default)]
pub struct MockLessonSource {
    lessons: HashMap<LessonId, Lesson>,
    fail: bool,
    delay: Duration,
    fetches: Arc<AtomicUsize>,
}

impl MockLessonSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lesson(mut self, lesson: Lesson) -> Self {
        self.lessons.insert(lesson.id.clone(), lesson);
        self
    }

    /// Make every fetch fail as an unreachable backend would.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl LessonSource for MockLessonSource {
    async fn fetch_lesson(&self, id: &LessonId) -> Result<Option<Lesson>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(DiktantError::Content("Mock content backend unavailable".into()));
        }
        debug!(lesson_id = %id, "Mock lesson fetch");
        Ok(self.lessons.get(id).cloned())
    }
}

// =============================================================================
// Speech
// =============================================================================

/// Synthesizes a short tone per character and records every request.
#[derive(Debug, Clone, Default)]
pub struct MockSpeechSynthesizer {
    calls: Arc<Mutex<Vec<String>>>,
    failing_texts: HashSet<String>,
    delay: Duration,
}

impl MockSpeechSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail whenever `text` is requested.
    pub fn fail_on(mut self, text: impl Into<String>) -> Self {
        self.failing_texts.insert(text.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Texts requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl SpeechSynthesizer for MockSpeechSynthesizer {
    async fn synthesize(&self, text: &str, speaker_hint: &str) -> Result<Vec<u8>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing_texts.contains(text) {
            return Err(DiktantError::Synthesis(format!(
                "Mock synthesis refused '{}'",
                text
            )));
        }
        debug!(speaker = speaker_hint, chars = text.chars().count(), "Mock synthesis");
        Ok(tone_for(text))
    }
}

/// 16-bit PCM square wave, 10 ms per character.
fn tone_for(text: &str) -> Vec<u8> {
    const SAMPLES_PER_CHAR: usize = 240;
    const AMPLITUDE: i16 = 4096;
    let samples = text.chars().count().max(1) * SAMPLES_PER_CHAR;
    (0..samples)
        .flat_map(|i| {
            let value = if (i / 30) % 2 == 0 { AMPLITUDE } else { -AMPLITUDE };
            value.to_le_bytes()
        })
        .collect()
}

/// Synthesizer for setups with no speech backend configured. Every request
/// fails, so lines without recorded audio stay silent.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSynthesizer;

impl SpeechSynthesizer for UnavailableSynthesizer {
    async fn synthesize(&self, _text: &str, _speaker_hint: &str) -> Result<Vec<u8>> {
        Err(DiktantError::Synthesis(
            "No speech synthesis backend configured".into(),
        ))
    }
}
