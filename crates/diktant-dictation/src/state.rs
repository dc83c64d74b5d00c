//! Per-line dictation state.
//!
//! One `DictationSessionState` exists for the line currently on screen and is
//! replaced wholesale on every line change, so the per-slot vectors always
//! have the same length as the line's target words.

use diktant_core::types::DialogueLine;

use crate::matcher::{matches, tokenize};

/// Signal produced by an input change for the focus layer to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// The slot just matched and the learner typed the word separator.
    AdvanceFocus { to: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictationSessionState {
    line_index: usize,
    target_words: Vec<String>,
    user_input: Vec<String>,
    is_correct: Vec<bool>,
    has_visited: Vec<bool>,
}

impl DictationSessionState {
    /// Fresh state for line `line_index`: one empty, unvisited slot per word.
    pub fn init_line(line_index: usize, line: &DialogueLine) -> Self {
        let target_words = tokenize(&line.text);
        let slots = target_words.len();
        Self {
            line_index,
            target_words,
            user_input: vec![String::new(); slots],
            is_correct: vec![false; slots],
            has_visited: vec![false; slots],
        }
    }

    pub fn line_index(&self) -> usize {
        self.line_index
    }

    pub fn slot_count(&self) -> usize {
        self.target_words.len()
    }

    pub fn target_words(&self) -> &[String] {
        &self.target_words
    }

    pub fn input(&self, slot: usize) -> Option<&str> {
        self.user_input.get(slot).map(String::as_str)
    }

    /// Store `value` in `slot` and re-evaluate it.
    ///
    /// A correct slot becomes incorrect again if edited away from the
    /// target. Out-of-range slots are ignored.
    pub fn set_input(&mut self, slot: usize, value: &str) -> Option<InputEvent> {
        let target = self.target_words.get(slot)?;
        let correct = matches(value, target);

        self.user_input[slot] = value.to_string();
        self.is_correct[slot] = correct;

        let next = slot + 1;
        if correct && value.ends_with(' ') && next < self.slot_count() {
            Some(InputEvent::AdvanceFocus { to: next })
        } else {
            None
        }
    }

    /// Remember that the learner has been in `slot`. Idempotent.
    pub fn mark_visited(&mut self, slot: usize) {
        if let Some(visited) = self.has_visited.get_mut(slot) {
            *visited = true;
        }
    }

    pub fn is_correct(&self, slot: usize) -> bool {
        self.is_correct.get(slot).copied().unwrap_or(false)
    }

    pub fn is_visited(&self, slot: usize) -> bool {
        self.has_visited.get(slot).copied().unwrap_or(false)
    }

    /// Whether every slot currently matches its word.
    ///
    /// Recomputed from the inputs rather than read from the cached flags. A
    /// line without words has nothing to type and is complete as shown.
    pub fn is_line_complete(&self) -> bool {
        self.target_words
            .iter()
            .zip(&self.user_input)
            .all(|(target, typed)| matches(typed, target))
    }

    /// First slot whose input does not match, if any.
    pub fn first_unmatched(&self) -> Option<usize> {
        self.target_words
            .iter()
            .zip(&self.user_input)
            .position(|(target, typed)| !matches(typed, target))
    }

    /// Whether `slot` should be rendered as an error: visited and wrong.
    pub fn shows_error(&self, slot: usize) -> bool {
        self.is_visited(slot) && !self.is_correct(slot)
    }

    /// The target word to reveal above `slot`, if hints are on or the
    /// learner already got it right.
    pub fn hint(&self, slot: usize, show_hints: bool) -> Option<&str> {
        let word = self.target_words.get(slot)?;
        (show_hints || self.is_correct(slot)).then_some(word.as_str())
    }
}
