pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::DiktantConfig;
pub use error::{DiktantError, Result};
pub use events::{ExitReason, PlaybackEvent, PlaybackReason, PlaybackTag, SessionEvent};
pub use types::*;
