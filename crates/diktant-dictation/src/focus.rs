//! Focus sequencing across the word slots of a line.
//!
//! The sequencer only ever decides an index. Applying focus to a rendered
//! input is left to a [`FocusRegistry`] owned by the presentation layer,
//! which may do so after its inputs exist.

use crate::state::DictationSessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    /// A new line was just shown.
    LineStart,
    /// The learner replayed the line and should land on the word they are
    /// stuck on.
    Resume,
}

/// Which slot should receive focus.
pub fn find_target(state: &DictationSessionState, mode: FocusMode) -> usize {
    match mode {
        FocusMode::LineStart => 0,
        FocusMode::Resume => state.first_unmatched().unwrap_or(0),
    }
}

/// Keys with navigation meaning inside a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    /// Word separator (space).
    Separator,
    Backspace,
    /// Line submit (enter).
    Submit,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavAction {
    Focus(usize),
    /// Move to the next line, or finish the lesson on the last one.
    Advance,
    Stay,
}

/// Keyboard navigation for a key pressed in `slot`.
///
/// Submit only looks at the line, so it also works on a line with no slots.
pub fn navigate(state: &DictationSessionState, slot: usize, key: NavKey) -> NavAction {
    if key == NavKey::Submit {
        return if state.is_line_complete() {
            NavAction::Advance
        } else {
            NavAction::Stay
        };
    }
    if slot >= state.slot_count() {
        return NavAction::Stay;
    }
    match key {
        NavKey::Separator if state.is_correct(slot) && slot + 1 < state.slot_count() => {
            NavAction::Focus(slot + 1)
        }
        NavKey::Backspace if slot > 0 && state.input(slot).is_some_and(str::is_empty) => {
            NavAction::Focus(slot - 1)
        }
        _ => NavAction::Stay,
    }
}

/// A focus request for the presentation layer, tagged with the line it was
/// computed for so a late request can be discarded after a line change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusRequest {
    pub line: usize,
    pub slot: usize,
}

/// Rendered inputs addressable by slot index.
pub trait FocusRegistry {
    /// Move keyboard focus to `slot`. Returns `false` if that input does not
    /// exist (yet).
    fn focus(&mut self, slot: usize) -> bool;
}

/// Apply `request` if it still belongs to `current_line`.
pub fn apply(request: FocusRequest, current_line: usize, registry: &mut dyn FocusRegistry) -> bool {
    request.line == current_line && registry.focus(request.slot)
}
