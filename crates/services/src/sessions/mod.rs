mod controller;
mod runner;
mod view;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use controller::{SessionController, SubmitOutcome, SubmitPrompt, TickOutcome};
pub use runner::{SessionCommand, SessionHandle, SessionRunner};
pub use view::{
    LOW_TIME_THRESHOLD_SECS, NavigatorItem, QuestionView, SessionSnapshot, format_remaining,
};
