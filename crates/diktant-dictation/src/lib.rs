//! Diktant Dictation crate - the dictation exercise engine.
//!
//! Word matching, per-line session state, focus sequencing, background audio
//! prefetch, and the `DictationRoom` that ties them to lesson content,
//! playback and progress storage. The room walks a strict lifecycle:
//! Loading -> ActivationPending -> LineActive(i) -> ... -> LessonDone.

pub mod focus;
pub mod matcher;
pub mod prefetch;
pub mod room;
pub mod state;

pub use focus::{find_target, navigate, FocusMode, FocusRegistry, FocusRequest, NavAction, NavKey};
pub use matcher::{matches, normalize};
pub use prefetch::AudioPrefetchQueue;
pub use room::{AudioStatus, CatalogNavigator, Collaborators, DictationRoom, RoomOptions, SessionPhase};
pub use state::{DictationSessionState, InputEvent};
