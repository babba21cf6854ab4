use std::fmt::{self, Write as _};

use exam_core::model::SessionPhase;
use services::{SessionCommand, SessionSnapshot};

/// One line typed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Choose option `n` (1-based) for the current question.
    Answer(u32),
    Next,
    Previous,
    /// Jump to question `n` (1-based).
    Goto(usize),
    Flag,
    Submit,
    Confirm,
    Cancel,
    Retry,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCommandError {
    Empty,
    Unknown(String),
    MissingNumber(&'static str),
    InvalidNumber(String),
}

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCommandError::Empty => write!(f, "type a command, or h for help"),
            ParseCommandError::Unknown(raw) => write!(f, "unknown command: {raw}"),
            ParseCommandError::MissingNumber(cmd) => write!(f, "{cmd} needs a number"),
            ParseCommandError::InvalidNumber(raw) => write!(f, "not a positive number: {raw}"),
        }
    }
}

impl std::error::Error for ParseCommandError {}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ParseCommandError> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err(ParseCommandError::Empty);
        };
        let command = match head {
            "a" => Self::Answer(positive(words.next(), "a")?),
            "n" => Self::Next,
            "p" => Self::Previous,
            "g" => Self::Goto(positive(words.next(), "g")?),
            "f" => Self::Flag,
            "s" => Self::Submit,
            "y" => Self::Confirm,
            "c" => Self::Cancel,
            "r" => Self::Retry,
            "h" | "?" => Self::Help,
            "q" => Self::Quit,
            other => return Err(ParseCommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }

    /// Translate into a runner command against the screen the user is looking at.
    ///
    /// Returns `None` for commands handled by the console itself.
    pub fn to_session(self, snapshot: &SessionSnapshot) -> Option<SessionCommand> {
        let command = match self {
            Self::Answer(n) => SessionCommand::SelectAnswer {
                question_id: snapshot.current.id,
                option: n - 1,
            },
            Self::Next => SessionCommand::Next,
            Self::Previous => SessionCommand::Previous,
            Self::Goto(n) => SessionCommand::Navigate(n - 1),
            Self::Flag => SessionCommand::ToggleCurrentFlag,
            Self::Submit => SessionCommand::RequestSubmit,
            Self::Confirm => SessionCommand::ConfirmSubmit,
            Self::Cancel => SessionCommand::CancelSubmit,
            Self::Retry => SessionCommand::Retry,
            Self::Help | Self::Quit => return None,
        };
        Some(command)
    }
}

fn positive<T>(raw: Option<&str>, command: &'static str) -> Result<T, ParseCommandError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    let raw = raw.ok_or(ParseCommandError::MissingNumber(command))?;
    match raw.parse::<T>() {
        Ok(value) if value >= T::from(1) => Ok(value),
        _ => Err(ParseCommandError::InvalidNumber(raw.to_string())),
    }
}

pub const HELP: &str = "\
commands:
  a <n>   choose option n
  n / p   next / previous question
  g <n>   go to question n
  f       flag or unflag for review
  s       submit
  y / c   confirm / cancel a submit prompt
  r       retry after a failed submission
  q       quit (progress is kept)";

// ─── Rendering ─────────────────────────────────────────────────────────────────

/// Full screen for the current question.
pub fn render(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let low = if snapshot.is_low_time() { " (!)" } else { "" };
    let _ = writeln!(
        out,
        "{} | {}{} | {}/{} answered | {:.0}%",
        snapshot.title,
        snapshot.time_label(),
        low,
        snapshot.answered_count,
        snapshot.question_count,
        snapshot.progress_percent()
    );

    let question = &snapshot.current;
    let flag = if question.flagged { " [flagged]" } else { "" };
    let _ = writeln!(
        out,
        "\nQuestion {} of {}{}",
        question.number, snapshot.question_count, flag
    );
    let _ = writeln!(out, "{}", question.prompt);
    for (idx, option) in question.options.iter().enumerate() {
        let marker = match question.selected {
            Some(selected) if usize::try_from(selected).is_ok_and(|s| s == idx) => "*",
            _ => " ",
        };
        let _ = writeln!(out, " {marker} {}. {option}", idx + 1);
    }

    out.push('\n');
    out.push_str(&render_navigator(snapshot));
    if let Some(prompt) = render_prompt(snapshot) {
        out.push('\n');
        out.push_str(&prompt);
    }
    out
}

/// One cell per question: `[ ]` open, `[x]` answered, `?` flagged, `>` current.
pub fn render_navigator(snapshot: &SessionSnapshot) -> String {
    snapshot
        .navigator
        .iter()
        .map(|item| {
            let cursor = if item.current { ">" } else { " " };
            let mark = if item.answered { "x" } else { " " };
            let flag = if item.flagged { "?" } else { "" };
            format!("{cursor}{}[{mark}]{flag}", item.number)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Message for phases that are waiting on the user or on the grading service.
pub fn render_prompt(snapshot: &SessionSnapshot) -> Option<String> {
    match snapshot.phase {
        SessionPhase::AwaitingConfirmation => Some(
            "Submit now? Answers cannot be changed afterwards. (y/c)".to_string(),
        ),
        SessionPhase::AwaitingUnansweredWarning => Some(format!(
            "{} question(s) unanswered. Submit anyway? (y/c)",
            snapshot.pending_unanswered.unwrap_or(snapshot.unanswered_count)
        )),
        SessionPhase::Submitting => Some("Submitting...".to_string()),
        SessionPhase::Failed => Some(format!(
            "Submission failed: {}. Type r to retry.",
            snapshot.last_error.as_deref().unwrap_or("unknown error")
        )),
        SessionPhase::Submitted => Some(match snapshot.result_id {
            Some(id) => format!("Submitted. Result id {id}."),
            None => "Submitted.".to_string(),
        }),
        SessionPhase::Loading | SessionPhase::Active => None,
    }
}
