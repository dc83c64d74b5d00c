//! Terminal front end for a dictation session.
//!
//! One prompt per turn: the learner types one or more words, which fill the
//! slots starting at the focused one. Commands start with `:`.

use std::io::Write;

use diktant_audio::AudioOutput;
use diktant_content::{LessonSource, SpeechSynthesizer};
use diktant_core::error::Result;
use diktant_core::events::ExitReason;
use diktant_core::types::LessonId;
use diktant_dictation::focus::apply;
use diktant_dictation::{
    CatalogNavigator, DictationRoom, DictationSessionState, FocusRegistry, NavAction, NavKey,
    SessionPhase,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Hands control back to the shell with a one-line message.
pub struct TerminalNavigator;

impl CatalogNavigator for TerminalNavigator {
    fn return_to_catalog(&self, lesson_id: &LessonId, reason: ExitReason) {
        match reason {
            ExitReason::NotFound => println!("Lesson {} was not found.", lesson_id),
            ExitReason::LoadFailed => println!("Lesson {} could not be loaded.", lesson_id),
            ExitReason::UserExit => println!("Leaving lesson {}.", lesson_id),
            ExitReason::Completed => println!("Lesson {} complete. Молодец!", lesson_id),
        }
    }
}

/// Cursor over the word slots of the line on screen.
#[derive(Debug, Default)]
pub struct TerminalFocus {
    slots: usize,
    cursor: usize,
}

impl TerminalFocus {
    fn reset(&mut self, slots: usize) {
        self.slots = slots;
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl FocusRegistry for TerminalFocus {
    fn focus(&mut self, slot: usize) -> bool {
        if slot < self.slots {
            self.cursor = slot;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PromptInput {
    Replay,
    ToggleHints,
    Quit,
    Submit,
    Words(Vec<String>),
}

pub fn parse_input(raw: &str) -> PromptInput {
    match raw.trim() {
        "" => PromptInput::Submit,
        ":r" => PromptInput::Replay,
        ":h" => PromptInput::ToggleHints,
        ":q" => PromptInput::Quit,
        text => PromptInput::Words(text.split_whitespace().map(str::to_string).collect()),
    }
}

/// One cell per slot: the revealed word, the typed text (marked when wrong),
/// or a blank the length of the hidden word. The focused slot is bracketed.
pub fn render_slots(state: &DictationSessionState, show_hints: bool, cursor: usize) -> String {
    state
        .target_words()
        .iter()
        .enumerate()
        .map(|(slot, target)| {
            let typed = state.input(slot).unwrap_or_default().trim();
            let cell = match state.hint(slot, show_hints) {
                Some(word) if state.is_correct(slot) || typed.is_empty() => word.to_string(),
                _ if !typed.is_empty() && state.shows_error(slot) => format!("{}✗", typed),
                _ if !typed.is_empty() => typed.to_string(),
                _ => "_".repeat(target.chars().count()),
            };
            if slot == cursor {
                format!("[{}]", cell)
            } else {
                cell
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drive `room` from stdin until the lesson ends or the learner leaves.
pub async fn run_session<L, S, O>(room: &mut DictationRoom<L, S, O>) -> Result<()>
where
    L: LessonSource,
    S: SpeechSynthesizer + 'static,
    O: AudioOutput + 'static,
{
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    if room.open().await != SessionPhase::ActivationPending {
        return Ok(());
    }
    let total = room.lesson().map_or(0, |l| l.len());
    println!(
        "Lesson {}: {} lines. Press Enter to start the audio.",
        room.lesson_id(),
        total
    );
    if stdin.next_line().await?.is_none() {
        room.exit();
        return Ok(());
    }
    room.start()?;

    let mut focus = TerminalFocus::default();
    let mut shown = None;
    while let Some(line) = room.current_line() {
        if shown != Some(line) {
            focus.reset(room.state().slot_count());
            shown = Some(line);
            let speaker = room
                .lesson()
                .and_then(|l| l.line(line))
                .map(|l| l.speaker.clone())
                .unwrap_or_default();
            println!();
            println!(
                "Line {}/{} ({}), {} words",
                line + 1,
                total,
                speaker,
                room.state().slot_count()
            );
        }

        room.drain_playback_events();
        if let Some(request) = room.take_focus_request() {
            apply(request, line, &mut focus);
        }
        println!("{}", render_slots(room.state(), room.show_hints(), focus.cursor()));
        for slot in 0..room.state().slot_count() {
            if let Some((word, Some(meaning))) = room.hint(slot) {
                println!("  {} = {}", word, meaning);
            }
        }
        print!("> ");
        std::io::stdout().flush()?;

        let Some(raw) = stdin.next_line().await? else {
            room.exit();
            break;
        };
        match parse_input(&raw) {
            PromptInput::Quit => room.exit(),
            PromptInput::Replay => {
                if !room.replay() {
                    println!("Audio is busy.");
                }
            }
            PromptInput::ToggleHints => {
                room.toggle_hints();
            }
            PromptInput::Submit => {
                if room.handle_key(line, focus.cursor(), NavKey::Submit) == NavAction::Stay {
                    println!("Not quite yet.");
                }
            }
            PromptInput::Words(words) => {
                let start = focus.cursor();
                for (offset, word) in words.iter().enumerate() {
                    let slot = start + offset;
                    if slot >= room.state().slot_count() {
                        debug!(extra = words.len() - offset, "Ignoring words past line end");
                        break;
                    }
                    room.mark_visited(line, slot);
                    room.set_input(line, slot, &format!("{} ", word));
                }
                if room.state().is_line_complete() {
                    room.advance();
                }
            }
        }
    }
    Ok(())
}
