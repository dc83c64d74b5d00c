//! Diktant Content crate - lesson and speech collaborators.
//!
//! The dictation engine treats both lesson content and speech synthesis as
//! opaque collaborators. This crate defines their trait seams, a JSON file
//! backed lesson source, a bounded synthesis cache, and mock implementations
//! for tests.

use std::future::Future;
use std::time::Duration;

use diktant_core::error::{DiktantError, Result};
use diktant_core::types::{Lesson, LessonId};

pub mod cache;
pub mod json;
pub mod mock;

pub use cache::{CacheStats, CachedSynthesizer};
pub use json::JsonLessonSource;
pub use mock::{MockLessonSource, MockSpeechSynthesizer, UnavailableSynthesizer};

// =============================================================================
// Traits
// =============================================================================

/// Where lessons come from.
pub trait LessonSource: Send + Sync {
    /// Fetch a lesson by id. `Ok(None)` means the lesson does not exist.
    fn fetch_lesson(
        &self,
        id: &LessonId,
    ) -> impl Future<Output = Result<Option<Lesson>>> + Send;
}

/// Turns text into an encoded audio payload.
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`, optionally in the voice suggested by `speaker_hint`.
    fn synthesize(
        &self,
        text: &str,
        speaker_hint: &str,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

// =============================================================================
// Helpers
// =============================================================================

/// Bound a collaborator call, mapping expiry to [`DiktantError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(what, secs = limit.as_secs(), "Collaborator call timed out");
            Err(DiktantError::Timeout {
                what: what.to_string(),
                secs: limit.as_secs(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout(Duration::from_secs(12), "lesson fetch", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        match result {
            Err(DiktantError::Timeout { what, secs }) => {
                assert_eq!(what, "lesson fetch");
                assert_eq!(secs, 12);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let value = with_timeout(Duration::from_secs(1), "synthesis", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err: Result<()> = with_timeout(Duration::from_secs(1), "synthesis", async {
            Err(DiktantError::Synthesis("backend down".into()))
        })
        .await;
        assert!(matches!(err, Err(DiktantError::Synthesis(_))));
    }
}
