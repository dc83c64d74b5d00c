//! Background audio prefetch for upcoming lines.
//!
//! A single worker task drains a FIFO of line indices, synthesizing one
//! line at a time and filling its payload in place. The worker exists only
//! while there is work; it is spawned on demand by `enqueue`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use diktant_content::{with_timeout, SpeechSynthesizer};
use diktant_core::types::Lesson;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct QueueState {
    queued: VecDeque<usize>,
    in_flight: Option<usize>,
    running: bool,
}

struct Inner<S> {
    lesson: Arc<Lesson>,
    synthesizer: Arc<S>,
    state: Mutex<QueueState>,
    idle: Notify,
    cancel: CancellationToken,
    timeout: Duration,
    fetches: AtomicUsize,
}

impl<S> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Sequential, de-duplicating audio fetcher bound to one lesson.
pub struct AudioPrefetchQueue<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for AudioPrefetchQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SpeechSynthesizer + 'static> AudioPrefetchQueue<S> {
    pub fn new(lesson: Arc<Lesson>, synthesizer: Arc<S>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lesson,
                synthesizer,
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
                cancel: CancellationToken::new(),
                timeout,
                fetches: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue `line` for fetching.
    ///
    /// Returns `false` without queueing when the line does not exist, already
    /// has audio, is queued or in flight, or the queue was cancelled.
    pub fn enqueue(&self, line: usize) -> bool {
        if self.inner.cancel.is_cancelled() {
            return false;
        }
        let Some(dialogue) = self.inner.lesson.line(line) else {
            return false;
        };
        if dialogue.has_audio() {
            return false;
        }

        let mut state = self.inner.lock();
        if state.in_flight == Some(line) || state.queued.contains(&line) {
            return false;
        }
        state.queued.push_back(line);
        debug!(line, queued = state.queued.len(), "Prefetch queued");

        if !state.running {
            state.running = true;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(run_worker(inner));
        }
        true
    }

    /// Queue the `lookahead` lines following `current`.
    pub fn enqueue_ahead(&self, current: usize, lookahead: usize) {
        for line in (current + 1)..=(current + lookahead) {
            self.enqueue(line);
        }
    }
}

impl<S> AudioPrefetchQueue<S> {
    /// Drop queued work and make any in-flight completion a no-op.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        let mut state = self.inner.lock();
        let dropped = state.queued.len();
        state.queued.clear();
        if dropped > 0 {
            debug!(dropped, "Prefetch queue cancelled");
        }
    }

    /// Resolves once the worker has nothing left to do.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.inner.lock().running {
                return;
            }
            notified.await;
        }
    }

    /// Number of synthesis requests issued so far.
    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        let state = self.inner.lock();
        state.queued.len() + usize::from(state.in_flight.is_some())
    }
}

async fn run_worker<S: SpeechSynthesizer>(inner: Arc<Inner<S>>) {
    loop {
        let next = {
            let mut state = inner.lock();
            state.in_flight = None;
            let next = if inner.cancel.is_cancelled() {
                state.queued.clear();
                None
            } else {
                state.queued.pop_front()
            };
            match next {
                Some(line) => {
                    state.in_flight = Some(line);
                    line
                }
                None => {
                    state.running = false;
                    drop(state);
                    inner.idle.notify_waiters();
                    return;
                }
            }
        };

        let Some(line) = inner.lesson.line(next) else {
            continue;
        };
        if line.has_audio() {
            continue;
        }

        inner.fetches.fetch_add(1, Ordering::SeqCst);
        let request = with_timeout(
            inner.timeout,
            "audio prefetch",
            inner.synthesizer.synthesize(&line.text, &line.speaker),
        );
        let result = tokio::select! {
            _ = inner.cancel.cancelled() => {
                debug!(line = next, "Prefetch abandoned after cancel");
                continue;
            }
            result = request => result,
        };

        match result {
            Ok(payload) if inner.cancel.is_cancelled() => {
                debug!(line = next, bytes = payload.len(), "Discarding late prefetch result");
            }
            Ok(payload) => {
                let bytes = payload.len();
                if line.fill_audio(payload) {
                    debug!(line = next, bytes, "Prefetched line audio");
                }
            }
            Err(e) => {
                warn!(line = next, error = %e, "Prefetch failed, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diktant_content::MockSpeechSynthesizer;
    use diktant_core::types::DialogueLine;

    fn lesson(lines: usize) -> Arc<Lesson> {
        Arc::new(Lesson::new(
            "001",
            (0..lines)
                .map(|i| DialogueLine::new("Анна", format!("строка {}", i)))
                .collect(),
        ))
    }

    fn queue(
        lesson: Arc<Lesson>,
        synth: MockSpeechSynthesizer,
    ) -> AudioPrefetchQueue<MockSpeechSynthesizer> {
        AudioPrefetchQueue::new(lesson, Arc::new(synth), Duration::from_secs(12))
    }

    #[tokio::test]
    async fn test_duplicates_fetched_once() {
        let synth = MockSpeechSynthesizer::new();
        let lesson = lesson(5);
        let q = queue(lesson.clone(), synth.clone());

        assert!(q.enqueue(2));
        assert!(!q.enqueue(2));
        assert!(q.enqueue(3));
        q.wait_idle().await;

        assert_eq!(q.fetch_count(), 2);
        assert_eq!(synth.calls(), vec!["строка 2", "строка 3"]);
        assert!(lesson.lines[2].has_audio());
        assert!(lesson.lines[3].has_audio());
        assert!(!lesson.lines[4].has_audio());
    }

    #[tokio::test]
    async fn test_in_flight_line_is_not_requeued() {
        let synth = MockSpeechSynthesizer::new().with_delay(Duration::from_millis(50));
        let q = queue(lesson(3), synth.clone());

        assert!(q.enqueue(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(q.pending(), 1);
        assert!(!q.enqueue(1));
        q.wait_idle().await;
        assert_eq!(synth.call_count(), 1);
    }

    #[tokio::test]
    async fn test_lines_with_audio_are_skipped() {
        let lesson = Arc::new(Lesson::new(
            "001",
            vec![
                DialogueLine::new("Анна", "Да").with_audio(vec![0, 0]),
                DialogueLine::new("Борис", "Нет"),
            ],
        ));
        let synth = MockSpeechSynthesizer::new();
        let q = queue(lesson, synth.clone());

        assert!(!q.enqueue(0));
        assert!(!q.enqueue(7));
        assert!(q.enqueue(1));
        q.wait_idle().await;
        assert!(!q.enqueue(1));
        assert_eq!(synth.calls(), vec!["Нет"]);
    }

    #[tokio::test]
    async fn test_processed_in_fifo_order_one_at_a_time() {
        let synth = MockSpeechSynthesizer::new().with_delay(Duration::from_millis(5));
        let q = queue(lesson(6), synth.clone());

        for line in [4, 1, 3] {
            q.enqueue(line);
        }
        q.wait_idle().await;
        assert_eq!(synth.calls(), vec!["строка 4", "строка 1", "строка 3"]);
    }

    #[tokio::test]
    async fn test_failure_is_dropped_not_retried() {
        let synth = MockSpeechSynthesizer::new().fail_on("строка 1");
        let lesson = lesson(3);
        let q = queue(lesson.clone(), synth.clone());

        q.enqueue(1);
        q.enqueue(2);
        q.wait_idle().await;

        assert!(!lesson.lines[1].has_audio());
        assert!(lesson.lines[2].has_audio());
        assert_eq!(synth.call_count(), 2);

        // A later request for the failed line is accepted again.
        assert!(q.enqueue(1));
        q.wait_idle().await;
        assert_eq!(synth.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cancel_discards_queue_and_late_results() {
        let synth = MockSpeechSynthesizer::new().with_delay(Duration::from_millis(30));
        let lesson = lesson(4);
        let q = queue(lesson.clone(), synth.clone());

        q.enqueue(1);
        q.enqueue(2);
        tokio::time::sleep(Duration::from_millis(5)).await;
        q.cancel();
        q.wait_idle().await;

        assert!(lesson.lines.iter().all(|l| !l.has_audio()));
        assert_eq!(synth.call_count(), 1);
        assert!(!q.enqueue(3));
    }

    #[tokio::test]
    async fn test_enqueue_ahead_respects_lesson_end() {
        let synth = MockSpeechSynthesizer::new();
        let q = queue(lesson(3), synth.clone());
        q.enqueue_ahead(1, 2);
        q.wait_idle().await;
        assert_eq!(synth.calls(), vec!["строка 2"]);
    }

    #[tokio::test]
    async fn test_wait_idle_without_work_returns() {
        let q = queue(lesson(1), MockSpeechSynthesizer::new());
        q.wait_idle().await;
        assert_eq!(q.pending(), 0);
    }
}
