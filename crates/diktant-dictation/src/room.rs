//! The interactive dictation session.
//!
//! `DictationRoom` loads a lesson, waits for the learner to activate audio,
//! then walks the lines one by one. Keystrokes are handled synchronously on
//! the caller's task; audio fetch and playback run on spawned tasks that
//! carry the line generation they were started for and give up quietly once
//! it is no longer current.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use diktant_audio::{AudioOutput, PlayOutcome, PlaybackController};
use diktant_content::{with_timeout, LessonSource, SpeechSynthesizer};
use diktant_core::config::DiktantConfig;
use diktant_core::error::{DiktantError, Result};
use diktant_core::events::{ExitReason, PlaybackEvent, PlaybackReason, PlaybackTag, SessionEvent};
use diktant_core::types::{Lesson, LessonId};
use diktant_storage::ProgressStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::focus::{find_target, navigate, FocusMode, FocusRequest, NavAction, NavKey};
use crate::matcher::meaning_key;
use crate::prefetch::AudioPrefetchQueue;
use crate::state::{DictationSessionState, InputEvent};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    /// Lesson loaded; waiting for the learner's start gesture.
    ActivationPending,
    LineActive(usize),
    LessonDone,
    /// Left before finishing, or the lesson could not be loaded.
    Exited,
}

/// What the audio side of the current line is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStatus {
    Idle,
    /// Synthesizing the current line on demand.
    Fetching,
    Playing,
}

/// The lesson catalog the session hands control back to.
pub trait CatalogNavigator: Send + Sync {
    fn return_to_catalog(&self, lesson_id: &LessonId, reason: ExitReason);
}

#[derive(Debug, Clone)]
pub struct RoomOptions {
    pub fetch_timeout: Duration,
    pub synthesis_timeout: Duration,
    pub prefetch_enabled: bool,
    pub lookahead: usize,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(12),
            synthesis_timeout: Duration::from_secs(12),
            prefetch_enabled: true,
            lookahead: 2,
        }
    }
}

impl RoomOptions {
    pub fn from_config(config: &DiktantConfig) -> Self {
        Self {
            fetch_timeout: config.content.fetch_timeout(),
            synthesis_timeout: config.synthesis.timeout(),
            prefetch_enabled: config.prefetch.enabled,
            lookahead: config.prefetch.lookahead,
        }
    }
}

/// Everything a room talks to.
pub struct Collaborators<L, S, O: AudioOutput> {
    pub lessons: Arc<L>,
    pub synthesizer: Arc<S>,
    pub playback: Arc<PlaybackController<O>>,
    pub progress: Arc<ProgressStore>,
    pub navigator: Arc<dyn CatalogNavigator>,
}

pub struct DictationRoom<L, S, O: AudioOutput> {
    session_id: Uuid,
    lesson_id: LessonId,
    deps: Collaborators<L, S, O>,
    options: RoomOptions,
    phase: SessionPhase,
    lesson: Option<Arc<Lesson>>,
    state: DictationSessionState,
    show_hints: bool,
    /// Bumped on every line change and on teardown.
    generation: Arc<AtomicU64>,
    /// Generation whose line audio is being fetched on demand, 0 if none.
    fetching: Arc<AtomicU64>,
    session_token: CancellationToken,
    /// Cancelled when the line changes; child of `session_token`.
    line_token: CancellationToken,
    prefetch: Option<AudioPrefetchQueue<S>>,
    play_tasks: Vec<JoinHandle<()>>,
    playback_events: broadcast::Receiver<PlaybackEvent>,
    pending_focus: Option<FocusRequest>,
    events: broadcast::Sender<SessionEvent>,
}

impl<L, S, O> DictationRoom<L, S, O>
where
    L: LessonSource,
    S: SpeechSynthesizer + 'static,
    O: AudioOutput + 'static,
{
    pub fn new(lesson_id: impl Into<LessonId>, deps: Collaborators<L, S, O>, options: RoomOptions) -> Self {
        let playback_events = deps.playback.subscribe();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let session_token = CancellationToken::new();
        let line_token = session_token.child_token();
        Self {
            session_id: Uuid::new_v4(),
            lesson_id: lesson_id.into(),
            deps,
            options,
            phase: SessionPhase::Loading,
            lesson: None,
            state: DictationSessionState::default(),
            show_hints: false,
            generation: Arc::new(AtomicU64::new(0)),
            fetching: Arc::new(AtomicU64::new(0)),
            session_token,
            line_token,
            prefetch: None,
            play_tasks: Vec::new(),
            playback_events,
            pending_focus: None,
            events,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn lesson_id(&self) -> &LessonId {
        &self.lesson_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn lesson(&self) -> Option<&Arc<Lesson>> {
        self.lesson.as_ref()
    }

    /// State of the line on screen.
    pub fn state(&self) -> &DictationSessionState {
        &self.state
    }

    pub fn current_line(&self) -> Option<usize> {
        match self.phase {
            SessionPhase::LineActive(line) => Some(line),
            _ => None,
        }
    }

    pub fn show_hints(&self) -> bool {
        self.show_hints
    }

    pub fn audio_status(&self) -> AudioStatus {
        if self.deps.playback.is_playing() {
            AudioStatus::Playing
        } else if self.is_fetching_current() {
            AudioStatus::Fetching
        } else {
            AudioStatus::Idle
        }
    }

    fn is_fetching_current(&self) -> bool {
        let fetching = self.fetching.load(Ordering::SeqCst);
        fetching != 0 && fetching == self.generation.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The word to reveal above `slot` and its translation, if any.
    pub fn hint(&self, slot: usize) -> Option<(&str, Option<&str>)> {
        let word = self.state.hint(slot, self.show_hints)?;
        let line = self.lesson.as_ref()?.line(self.current_line()?)?;
        Some((word, line.meaning(&meaning_key(word))))
    }

    /// Next focus move for the presentation layer, if one is pending.
    pub fn take_focus_request(&mut self) -> Option<FocusRequest> {
        self.pending_focus.take()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Fetch the lesson. A missing, empty or unreachable lesson sends the
    /// learner back to the catalog instead of entering the session.
    pub async fn open(&mut self) -> SessionPhase {
        if self.phase != SessionPhase::Loading {
            return self.phase;
        }

        let fetched = with_timeout(
            self.options.fetch_timeout,
            "lesson fetch",
            self.deps.lessons.fetch_lesson(&self.lesson_id),
        )
        .await;

        let lesson = match fetched {
            Ok(Some(lesson)) if !lesson.is_empty() => Arc::new(lesson),
            Ok(_) => {
                info!(lesson_id = %self.lesson_id, "Lesson not found or empty");
                self.leave(ExitReason::NotFound);
                return self.phase;
            }
            Err(e) => {
                warn!(lesson_id = %self.lesson_id, error = %e, "Failed to load lesson");
                self.leave(ExitReason::LoadFailed);
                return self.phase;
            }
        };

        info!(
            lesson_id = %self.lesson_id,
            session_id = %self.session_id,
            lines = lesson.len(),
            "Lesson loaded"
        );
        if self.options.prefetch_enabled {
            self.prefetch = Some(AudioPrefetchQueue::new(
                Arc::clone(&lesson),
                Arc::clone(&self.deps.synthesizer),
                self.options.synthesis_timeout,
            ));
        }
        self.emit(SessionEvent::LessonLoaded {
            session_id: self.session_id,
            lesson_id: self.lesson_id.clone(),
            lines: lesson.len(),
        });
        self.lesson = Some(lesson);
        self.phase = SessionPhase::ActivationPending;
        self.phase
    }

    /// The learner's start gesture: activates audio and shows the first line,
    /// or the line recorded in stored progress.
    pub fn start(&mut self) -> Result<usize> {
        if self.phase != SessionPhase::ActivationPending {
            return Err(DiktantError::Session(format!(
                "Cannot start from {:?}",
                self.phase
            )));
        }
        let total = self.lesson.as_ref().map_or(0, |l| l.len());

        self.deps.playback.activate();
        self.emit(SessionEvent::Activated {
            session_id: self.session_id,
        });

        let line = self
            .deps
            .progress
            .read(&self.lesson_id)
            .map(|record| record.current_index.min(total.saturating_sub(1)))
            .unwrap_or(0);
        if line > 0 {
            info!(lesson_id = %self.lesson_id, line, "Resuming from stored progress");
        }
        self.enter_line(line);
        Ok(line)
    }

    /// Finish the current line: checkpoint it and show the next one, or
    /// complete the lesson on the last line. Does nothing unless the line is
    /// complete.
    pub fn advance(&mut self) -> SessionPhase {
        let Some(line) = self.current_line() else {
            return self.phase;
        };
        if !self.state.is_line_complete() {
            debug!(line, "Advance ignored, line incomplete");
            return self.phase;
        }
        let total = self.lesson.as_ref().map_or(0, |l| l.len());

        if line + 1 < total {
            if let Some(record) = self.deps.progress.checkpoint(&self.lesson_id, line, total) {
                self.emit(SessionEvent::Checkpointed {
                    lesson_id: self.lesson_id.clone(),
                    record,
                });
            }
            self.enter_line(line + 1);
        } else {
            let record = self.deps.progress.complete(&self.lesson_id, total);
            self.emit(SessionEvent::Checkpointed {
                lesson_id: self.lesson_id.clone(),
                record,
            });
            self.teardown();
            self.phase = SessionPhase::LessonDone;
            self.hand_back(ExitReason::Completed);
        }
        self.phase
    }

    /// Back out to the catalog from any state.
    pub fn exit(&mut self) {
        if matches!(self.phase, SessionPhase::Exited | SessionPhase::LessonDone) {
            return;
        }
        self.leave(ExitReason::UserExit);
    }

    fn leave(&mut self, reason: ExitReason) {
        self.teardown();
        self.phase = SessionPhase::Exited;
        self.hand_back(reason);
    }

    fn hand_back(&self, reason: ExitReason) {
        info!(lesson_id = %self.lesson_id, ?reason, "Returning to catalog");
        self.emit(SessionEvent::Exited {
            session_id: self.session_id,
            reason,
        });
        self.deps.navigator.return_to_catalog(&self.lesson_id, reason);
    }

    /// Stop everything that could still touch this lesson.
    fn teardown(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.session_token.cancel();
        if let Some(prefetch) = &self.prefetch {
            debug!(
                fetched = prefetch.fetch_count(),
                pending = prefetch.pending(),
                "Stopping prefetch"
            );
            prefetch.cancel();
        }
        for task in self.play_tasks.drain(..) {
            task.abort();
        }
        self.fetching.store(0, Ordering::SeqCst);
        self.pending_focus = None;
        self.deps.playback.release();
    }

    fn enter_line(&mut self, line: usize) {
        let Some(lesson) = self.lesson.clone() else {
            return;
        };
        let Some(dialogue) = lesson.line(line) else {
            return;
        };

        self.state = DictationSessionState::init_line(line, dialogue);
        self.phase = SessionPhase::LineActive(line);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.line_token.cancel();
        self.line_token = self.session_token.child_token();
        self.pending_focus = (self.state.slot_count() > 0).then(|| FocusRequest {
            line,
            slot: find_target(&self.state, FocusMode::LineStart),
        });

        debug!(line, words = self.state.slot_count(), "Line started");
        self.emit(SessionEvent::LineStarted {
            line,
            words: self.state.slot_count(),
        });

        self.start_playback(PlaybackReason::AutoAdvance);
        if let Some(prefetch) = &self.prefetch {
            prefetch.enqueue_ahead(line, self.options.lookahead);
        }
    }

    // =========================================================================
    // Input
    // =========================================================================

    /// New text in `slot` of `line`. Input for a line that is no longer on
    /// screen is dropped.
    pub fn set_input(&mut self, line: usize, slot: usize, value: &str) -> Option<InputEvent> {
        if self.current_line() != Some(line) {
            debug!(line, slot, "Dropping input for stale line");
            return None;
        }

        let was_correct = self.state.is_correct(slot);
        let was_complete = self.state.is_line_complete();
        let event = self.state.set_input(slot, value);

        if !was_correct && self.state.is_correct(slot) {
            self.emit(SessionEvent::WordCorrect { line, slot });
        }
        if !was_complete && self.state.is_line_complete() {
            self.emit(SessionEvent::LineCompleted { line });
        }
        if let Some(InputEvent::AdvanceFocus { to }) = event {
            self.pending_focus = Some(FocusRequest { line, slot: to });
        }
        event
    }

    pub fn mark_visited(&mut self, line: usize, slot: usize) {
        if self.current_line() == Some(line) {
            self.state.mark_visited(slot);
        }
    }

    /// A navigation key pressed in `slot` of `line`.
    pub fn handle_key(&mut self, line: usize, slot: usize, key: NavKey) -> NavAction {
        if self.current_line() != Some(line) {
            return NavAction::Stay;
        }
        let action = navigate(&self.state, slot, key);
        match action {
            NavAction::Focus(target) => {
                self.pending_focus = Some(FocusRequest { line, slot: target });
            }
            NavAction::Advance => {
                self.advance();
            }
            NavAction::Stay => {}
        }
        action
    }

    pub fn toggle_hints(&mut self) -> bool {
        self.show_hints = !self.show_hints;
        self.emit(SessionEvent::HintsToggled {
            visible: self.show_hints,
        });
        self.show_hints
    }

    // =========================================================================
    // Audio
    // =========================================================================

    /// Replay the current line. Ignored while audio is fetching or playing.
    pub fn replay(&mut self) -> bool {
        self.start_playback(PlaybackReason::Replay)
    }

    fn start_playback(&mut self, reason: PlaybackReason) -> bool {
        let (Some(line), Some(lesson)) = (self.current_line(), self.lesson.clone()) else {
            return false;
        };
        if self.deps.playback.is_playing() {
            debug!(line, ?reason, "Playback in flight, request dropped");
            return false;
        }
        let Some(dialogue) = lesson.line(line) else {
            return false;
        };
        let generation = self.generation.load(Ordering::SeqCst);
        let needs_fetch = !dialogue.has_audio();
        if needs_fetch {
            match self
                .fetching
                .compare_exchange(0, generation, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {}
                Err(current) if current == generation => {
                    debug!(line, "Audio fetch in flight, request dropped");
                    return false;
                }
                // A fetch for an earlier line is being cancelled; take over.
                Err(_) => self.fetching.store(generation, Ordering::SeqCst),
            }
        }

        let tag = PlaybackTag {
            line,
            generation,
            reason,
        };
        let task = PlayTask {
            lesson,
            tag,
            needs_fetch,
            synthesizer: Arc::clone(&self.deps.synthesizer),
            playback: Arc::clone(&self.deps.playback),
            generation: Arc::clone(&self.generation),
            fetching: Arc::clone(&self.fetching),
            session_token: self.session_token.clone(),
            line_token: self.line_token.clone(),
            timeout: self.options.synthesis_timeout,
        };

        self.play_tasks.retain(|handle| !handle.is_finished());
        self.play_tasks.push(tokio::spawn(task.run()));
        true
    }

    /// Process playback events received so far. A replay that ran to its end
    /// on the current line queues a focus move to the first unmatched slot.
    pub fn drain_playback_events(&mut self) {
        loop {
            match self.playback_events.try_recv() {
                Ok(PlaybackEvent::Ended(tag)) => self.on_playback_ended(tag),
                Ok(PlaybackEvent::Failed { tag, reason }) => {
                    debug!(line = tag.line, %reason, "Playback failed");
                }
                Ok(PlaybackEvent::Started(_)) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Playback events lagged");
                }
                Err(_) => break,
            }
        }
    }

    fn on_playback_ended(&mut self, tag: PlaybackTag) {
        let current = self.generation.load(Ordering::SeqCst);
        if tag.generation != current || self.current_line() != Some(tag.line) {
            debug!(line = tag.line, "Ignoring stale playback completion");
            return;
        }
        if tag.reason == PlaybackReason::Replay && self.state.slot_count() > 0 {
            self.pending_focus = Some(FocusRequest {
                line: tag.line,
                slot: find_target(&self.state, FocusMode::Resume),
            });
        }
    }

    /// Wait for spawned fetch/playback tasks to finish, then process their
    /// events.
    pub async fn wait_for_audio(&mut self) {
        for task in std::mem::take(&mut self.play_tasks) {
            let _ = task.await;
        }
        self.drain_playback_events();
    }

    /// Wait for background prefetching to go idle.
    pub async fn wait_for_prefetch(&self) {
        if let Some(prefetch) = &self.prefetch {
            prefetch.wait_idle().await;
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl<L, S, O: AudioOutput> Drop for DictationRoom<L, S, O> {
    fn drop(&mut self) {
        self.session_token.cancel();
        for task in self.play_tasks.drain(..) {
            task.abort();
        }
        if let Some(prefetch) = &self.prefetch {
            prefetch.cancel();
        }
        if self.deps.playback.output().is_open() {
            self.deps.playback.release();
        }
    }
}

/// Fetch-then-play for one line, run on its own task.
struct PlayTask<S, O: AudioOutput> {
    lesson: Arc<Lesson>,
    tag: PlaybackTag,
    needs_fetch: bool,
    synthesizer: Arc<S>,
    playback: Arc<PlaybackController<O>>,
    generation: Arc<AtomicU64>,
    fetching: Arc<AtomicU64>,
    session_token: CancellationToken,
    line_token: CancellationToken,
    timeout: Duration,
}

impl<S: SpeechSynthesizer, O: AudioOutput> PlayTask<S, O> {
    async fn run(self) {
        let line = self.tag.line;
        let Some(dialogue) = self.lesson.line(line) else {
            return;
        };

        if self.needs_fetch {
            let request = with_timeout(
                self.timeout,
                "audio fetch",
                self.synthesizer.synthesize(&dialogue.text, &dialogue.speaker),
            );
            let result = tokio::select! {
                _ = self.line_token.cancelled() => None,
                result = request => Some(result),
            };
            let _ = self.fetching.compare_exchange(
                self.tag.generation,
                0,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            let Some(result) = result else {
                debug!(line, "Line changed during audio fetch");
                return;
            };

            if self.session_token.is_cancelled() {
                debug!(line, "Session closed during audio fetch");
                return;
            }
            match result {
                Ok(payload) => {
                    dialogue.fill_audio(payload);
                }
                Err(e) => {
                    warn!(line, error = %e, "Audio fetch failed");
                    return;
                }
            }
        }

        if self.generation.load(Ordering::SeqCst) != self.tag.generation {
            debug!(line, "Line changed before playback, skipping");
            return;
        }
        let Some(payload) = dialogue.audio_payload() else {
            return;
        };
        match self.playback.play(payload, self.tag).await {
            PlayOutcome::Played => {}
            outcome => debug!(line, ?outcome, "Line audio not played"),
        }
    }
}
