//! Single-flight playback of line audio.
//!
//! The controller owns the one audio output context of a session. It refuses
//! to play until the learner has activated audio, drops any request that
//! arrives while a line is still audible, and reports every playback through
//! a broadcast channel of [`PlaybackEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use diktant_core::events::{PlaybackEvent, PlaybackTag};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::decoder::{AudioDecoder, Pcm16Decoder};
use crate::AudioOutput;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What a call to [`PlaybackController::play`] ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The buffer played to its end.
    Played,
    /// Another playback was in flight; this request was dropped.
    AlreadyPlaying,
    /// Audio has not been activated for this session yet.
    NotActivated,
    /// The payload decoded to nothing.
    Empty,
    /// The output failed mid-playback.
    Failed(String),
}

/// Resets the playing flag when playback finishes, however it finishes.
struct PlayingGuard<'a>(&'a AtomicBool);

impl Drop for PlayingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Plays at most one line at a time through an [`AudioOutput`].
pub struct PlaybackController<O: AudioOutput> {
    output: O,
    decoder: Arc<dyn AudioDecoder>,
    activated: AtomicBool,
    playing: AtomicBool,
    events: broadcast::Sender<PlaybackEvent>,
}

impl<O: AudioOutput> PlaybackController<O> {
    pub fn new(output: O) -> Self {
        Self::with_decoder(output, Arc::new(Pcm16Decoder))
    }

    pub fn with_decoder(output: O, decoder: Arc<dyn AudioDecoder>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            output,
            decoder,
            activated: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            events,
        }
    }

    /// Record the learner's activation gesture. Until this is called every
    /// `play` returns [`PlayOutcome::NotActivated`].
    pub fn activate(&self) {
        if !self.activated.swap(true, Ordering::SeqCst) {
            info!("Audio playback activated");
        }
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Decode and play `payload`, resolving once playback has finished.
    ///
    /// A request made while another is in flight is dropped, not queued.
    /// The playing flag is cleared before `Ended` is sent, so a subscriber
    /// reacting to `Ended` may start the next playback immediately.
    pub async fn play(&self, payload: &[u8], tag: PlaybackTag) -> PlayOutcome {
        if !self.is_activated() {
            debug!(line = tag.line, "Playback requested before activation");
            return PlayOutcome::NotActivated;
        }

        if self
            .playing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(line = tag.line, "Playback already in flight, dropping request");
            return PlayOutcome::AlreadyPlaying;
        }
        let guard = PlayingGuard(&self.playing);

        let buffer = self.decoder.decode(payload);
        if buffer.is_empty() {
            debug!(line = tag.line, "Nothing to play");
            return PlayOutcome::Empty;
        }

        if let Err(e) = self.output.open() {
            warn!(line = tag.line, error = %e, "Failed to open audio output");
            drop(guard);
            let _ = self.events.send(PlaybackEvent::Failed {
                tag,
                reason: e.to_string(),
            });
            return PlayOutcome::Failed(e.to_string());
        }

        debug!(
            line = tag.line,
            generation = tag.generation,
            samples = buffer.len(),
            "Playback started"
        );
        let _ = self.events.send(PlaybackEvent::Started(tag));

        let result = self.output.render(buffer).await;
        drop(guard);

        match result {
            Ok(()) => {
                debug!(line = tag.line, "Playback ended");
                let _ = self.events.send(PlaybackEvent::Ended(tag));
                PlayOutcome::Played
            }
            Err(e) => {
                warn!(line = tag.line, error = %e, "Playback failed");
                let _ = self.events.send(PlaybackEvent::Failed {
                    tag,
                    reason: e.to_string(),
                });
                PlayOutcome::Failed(e.to_string())
            }
        }
    }

    /// Release the output context. Activation is kept; the context is
    /// recreated lazily by the next playback.
    pub fn release(&self) {
        self.output.release();
        self.playing.store(false, Ordering::SeqCst);
        info!("Audio output released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{encode_pcm16, PcmBuffer};
    use crate::MockAudioOutput;
    use diktant_core::events::PlaybackReason;
    use std::time::Duration;

    fn tag(line: usize) -> PlaybackTag {
        PlaybackTag {
            line,
            generation: 1,
            reason: PlaybackReason::Replay,
        }
    }

    fn tone() -> Vec<u8> {
        encode_pcm16(&[0.1, 0.2, 0.3, 0.2, 0.1])
    }

    #[tokio::test]
    async fn test_play_requires_activation() {
        let controller = PlaybackController::new(MockAudioOutput::new());
        assert_eq!(controller.play(&tone(), tag(0)).await, PlayOutcome::NotActivated);
        assert!(!controller.output().is_open());

        controller.activate();
        assert_eq!(controller.play(&tone(), tag(0)).await, PlayOutcome::Played);
        assert_eq!(controller.output().rendered(), vec![5]);
    }

    #[tokio::test]
    async fn test_output_opened_lazily_once() {
        let output = MockAudioOutput::new();
        let controller = PlaybackController::new(output.clone());
        controller.activate();
        assert_eq!(output.open_count(), 0);

        controller.play(&tone(), tag(0)).await;
        controller.play(&tone(), tag(1)).await;
        assert_eq!(output.open_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_silent_noop() {
        let controller = PlaybackController::new(MockAudioOutput::new());
        controller.activate();
        let mut events = controller.subscribe();

        assert_eq!(controller.play(&[1, 2, 3], tag(0)).await, PlayOutcome::Empty);
        assert!(!controller.is_playing());
        assert!(events.try_recv().is_err());
        assert!(controller.output().rendered().is_empty());
    }

    struct StereoDecoder;

    impl AudioDecoder for StereoDecoder {
        fn decode(&self, payload: &[u8]) -> PcmBuffer {
            PcmBuffer::new(vec![0.0; payload.len() * 2], 48_000, 2)
        }
    }

    #[tokio::test]
    async fn test_custom_decoder_feeds_output() {
        let controller =
            PlaybackController::with_decoder(MockAudioOutput::new(), Arc::new(StereoDecoder));
        controller.activate();
        assert_eq!(controller.play(&[7; 3], tag(0)).await, PlayOutcome::Played);
        assert_eq!(controller.output().rendered(), vec![6]);
    }

    #[tokio::test]
    async fn test_concurrent_play_fires_single_completion() {
        let output = MockAudioOutput::new().with_render_delay(Duration::from_millis(50));
        let controller = PlaybackController::new(output.clone());
        controller.activate();
        let mut events = controller.subscribe();

        let payload = tone();
        let (first, second) = tokio::join!(
            controller.play(&payload, tag(0)),
            controller.play(&payload, tag(0))
        );

        let outcomes = [first, second];
        assert_eq!(
            outcomes.iter().filter(|o| **o == PlayOutcome::Played).count(),
            1
        );
        assert!(outcomes.contains(&PlayOutcome::AlreadyPlaying));

        let mut ended = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PlaybackEvent::Ended(_)) {
                ended += 1;
            }
        }
        assert_eq!(ended, 1);
        assert_eq!(output.rendered().len(), 1);
    }

    #[tokio::test]
    async fn test_idle_after_completion_allows_next_play() {
        let controller = PlaybackController::new(MockAudioOutput::new());
        controller.activate();
        assert_eq!(controller.play(&tone(), tag(0)).await, PlayOutcome::Played);
        assert!(!controller.is_playing());
        assert_eq!(controller.play(&tone(), tag(0)).await, PlayOutcome::Played);
    }

    #[tokio::test]
    async fn test_events_carry_tag() {
        let controller = PlaybackController::new(MockAudioOutput::new());
        controller.activate();
        let mut events = controller.subscribe();

        controller.play(&tone(), tag(4)).await;
        assert_eq!(events.try_recv().unwrap(), PlaybackEvent::Started(tag(4)));
        assert_eq!(events.try_recv().unwrap(), PlaybackEvent::Ended(tag(4)));
    }

    #[tokio::test]
    async fn test_render_failure_reports_and_returns_to_idle() {
        let controller = PlaybackController::new(MockAudioOutput::new().failing());
        controller.activate();
        let mut events = controller.subscribe();

        let outcome = controller.play(&tone(), tag(0)).await;
        assert!(matches!(outcome, PlayOutcome::Failed(_)));
        assert!(!controller.is_playing());

        assert!(matches!(events.try_recv().unwrap(), PlaybackEvent::Started(_)));
        assert!(matches!(
            events.try_recv().unwrap(),
            PlaybackEvent::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_release_closes_output_and_keeps_activation() {
        let output = MockAudioOutput::new();
        let controller = PlaybackController::new(output.clone());
        controller.activate();
        controller.play(&tone(), tag(0)).await;

        controller.release();
        assert!(!output.is_open());
        assert_eq!(output.release_count(), 1);
        assert!(controller.is_activated());

        controller.play(&tone(), tag(1)).await;
        assert_eq!(output.open_count(), 2);
    }
}
