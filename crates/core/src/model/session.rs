use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::exam::Exam;
use crate::model::ids::{ExamId, QuestionId};
use crate::model::submission::{AnswerSlot, SubmissionRecord, SubmittedAnswer};
use crate::time::elapsed_seconds;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("question {0} is not part of this exam")]
    UnknownQuestion(QuestionId),

    #[error("option {option} is out of range for question {question} ({count} options)")]
    OptionOutOfRange {
        question: QuestionId,
        option: u32,
        count: usize,
    },

    #[error("question index {index} is out of range (exam has {count} questions)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },
}

//
// ─── PHASE ─────────────────────────────────────────────────────────────────────
//

/// Discrete state of an attempt; gates which operations are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    Active,
    AwaitingConfirmation,
    AwaitingUnansweredWarning,
    Submitting,
    Submitted,
    Failed,
}

impl SessionPhase {
    /// Whether the state machine has an edge from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::{
            Active, AwaitingConfirmation, AwaitingUnansweredWarning, Failed, Loading, Submitted,
            Submitting,
        };
        matches!(
            (self, next),
            (Loading, Active | Submitting)
                | (
                    Active,
                    AwaitingConfirmation | AwaitingUnansweredWarning | Submitting
                )
                | (AwaitingConfirmation | AwaitingUnansweredWarning, Active | Submitting)
                | (Submitting, Submitted | Failed)
                | (Failed, Active | Submitting)
        )
    }

    /// Waiting on the user to confirm or cancel a submit request.
    #[must_use]
    pub fn is_awaiting_confirmation(self) -> bool {
        matches!(
            self,
            SessionPhase::AwaitingConfirmation | SessionPhase::AwaitingUnansweredWarning
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Submitted)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Loading => "loading",
            SessionPhase::Active => "active",
            SessionPhase::AwaitingConfirmation => "awaiting_confirmation",
            SessionPhase::AwaitingUnansweredWarning => "awaiting_unanswered_warning",
            SessionPhase::Submitting => "submitting",
            SessionPhase::Submitted => "submitted",
            SessionPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── FRAGMENT ──────────────────────────────────────────────────────────────────
//

/// Durable subset of a session, as written to the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFragment {
    pub current_index: usize,
    pub answers: BTreeMap<QuestionId, u32>,
    pub flagged: BTreeSet<QuestionId>,
    pub remaining_seconds: u32,
    pub last_tick_at: DateTime<Utc>,
}

/// What had to be adjusted while rebuilding a session from a fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub elapsed_seconds: u64,
    pub dropped_answers: Vec<QuestionId>,
    pub dropped_flags: Vec<QuestionId>,
    pub clamped_index: bool,
}

impl RestoreReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.dropped_answers.is_empty() && self.dropped_flags.is_empty() && !self.clamped_index
    }
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// In-memory model of one exam attempt.
///
/// Every mutator validates against the exam it was built for, so the
/// invariants on `current_index`, `answers` and `flagged` hold after any
/// sequence of calls, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    exam_id: ExamId,
    question_count: usize,
    current_index: usize,
    answers: BTreeMap<QuestionId, u32>,
    flagged: BTreeSet<QuestionId>,
    remaining_seconds: u32,
    last_tick_at: DateTime<Utc>,
    phase: SessionPhase,
}

impl SessionState {
    /// A never-started attempt with the full time allowance.
    #[must_use]
    pub fn fresh(exam: &Exam, now: DateTime<Utc>) -> Self {
        Self {
            exam_id: exam.id(),
            question_count: exam.question_count(),
            current_index: 0,
            answers: BTreeMap::new(),
            flagged: BTreeSet::new(),
            remaining_seconds: exam.duration_seconds(),
            last_tick_at: now,
            phase: SessionPhase::Loading,
        }
    }

    /// Rebuild an attempt from a persisted fragment.
    ///
    /// Remaining time is reduced by the whole seconds between the fragment's
    /// last tick and `now` (floored at zero). Entries that no longer match the
    /// exam are dropped and reported rather than rejected. `last_tick_at` is
    /// set to `now`.
    #[must_use]
    pub fn restore(exam: &Exam, fragment: SessionFragment, now: DateTime<Utc>) -> (Self, RestoreReport) {
        let elapsed = elapsed_seconds(fragment.last_tick_at, now);
        let remaining = u64::from(fragment.remaining_seconds).saturating_sub(elapsed);
        let remaining_seconds = u32::try_from(remaining).unwrap_or(0);

        let mut report = RestoreReport {
            elapsed_seconds: elapsed,
            ..RestoreReport::default()
        };

        let mut answers = BTreeMap::new();
        for (question_id, option) in fragment.answers {
            match exam.question(question_id) {
                Some(question) if question.accepts(option) => {
                    answers.insert(question_id, option);
                }
                _ => report.dropped_answers.push(question_id),
            }
        }

        let mut flagged = BTreeSet::new();
        for question_id in fragment.flagged {
            if exam.question(question_id).is_some() {
                flagged.insert(question_id);
            } else {
                report.dropped_flags.push(question_id);
            }
        }

        let last = exam.question_count().saturating_sub(1);
        let current_index = if fragment.current_index > last {
            report.clamped_index = true;
            last
        } else {
            fragment.current_index
        };

        let state = Self {
            exam_id: exam.id(),
            question_count: exam.question_count(),
            current_index,
            answers,
            flagged,
            remaining_seconds,
            last_tick_at: now,
            phase: SessionPhase::Loading,
        };
        (state, report)
    }

    #[must_use]
    pub fn exam_id(&self) -> ExamId {
        self.exam_id
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<QuestionId, u32> {
        &self.answers
    }

    #[must_use]
    pub fn answer(&self, question_id: QuestionId) -> Option<u32> {
        self.answers.get(&question_id).copied()
    }

    #[must_use]
    pub fn flagged(&self) -> &BTreeSet<QuestionId> {
        &self.flagged
    }

    #[must_use]
    pub fn is_flagged(&self, question_id: QuestionId) -> bool {
        self.flagged.contains(&question_id)
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    #[must_use]
    pub fn last_tick_at(&self) -> DateTime<Utc> {
        self.last_tick_at
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining_seconds == 0
    }

    /// Move along one edge of the state machine.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidTransition` if no such edge exists.
    pub fn transition(&mut self, next: SessionPhase) -> Result<(), SessionStateError> {
        if !self.phase.can_transition_to(next) {
            return Err(SessionStateError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Record `option` as the answer to `question_id`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::UnknownQuestion` or `OptionOutOfRange`;
    /// the state is left untouched in both cases.
    pub fn select_answer(
        &mut self,
        exam: &Exam,
        question_id: QuestionId,
        option: u32,
    ) -> Result<(), SessionStateError> {
        let question = exam
            .question(question_id)
            .ok_or(SessionStateError::UnknownQuestion(question_id))?;
        if !question.accepts(option) {
            return Err(SessionStateError::OptionOutOfRange {
                question: question_id,
                option,
                count: question.option_count(),
            });
        }
        self.answers.insert(question_id, option);
        Ok(())
    }

    /// Flip review-flag membership; returns whether the question is now flagged.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::UnknownQuestion` for ids outside the exam.
    pub fn toggle_flag(
        &mut self,
        exam: &Exam,
        question_id: QuestionId,
    ) -> Result<bool, SessionStateError> {
        if exam.question(question_id).is_none() {
            return Err(SessionStateError::UnknownQuestion(question_id));
        }
        if self.flagged.remove(&question_id) {
            Ok(false)
        } else {
            self.flagged.insert(question_id);
            Ok(true)
        }
    }

    /// # Errors
    ///
    /// Returns `SessionStateError::IndexOutOfRange` if `index` is past the last question.
    pub fn navigate(&mut self, index: usize) -> Result<(), SessionStateError> {
        if index >= self.question_count {
            return Err(SessionStateError::IndexOutOfRange {
                index,
                count: self.question_count,
            });
        }
        self.current_index = index;
        Ok(())
    }

    /// Consume one second and stamp the tick time. Returns the new remaining time.
    pub fn tick(&mut self, now: DateTime<Utc>) -> u32 {
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        self.last_tick_at = now;
        self.remaining_seconds
    }

    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.last_tick_at = now;
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn unanswered_count(&self, exam: &Exam) -> usize {
        exam.questions()
            .iter()
            .filter(|q| !self.answers.contains_key(&q.id()))
            .count()
    }

    #[must_use]
    pub fn fragment(&self) -> SessionFragment {
        SessionFragment {
            current_index: self.current_index,
            answers: self.answers.clone(),
            flagged: self.flagged.clone(),
            remaining_seconds: self.remaining_seconds,
            last_tick_at: self.last_tick_at,
        }
    }

    /// One entry per exam question, in exam order, unanswered ones as the sentinel.
    #[must_use]
    pub fn submission_record(&self, exam: &Exam) -> SubmissionRecord {
        let answers = exam
            .questions()
            .iter()
            .map(|q| SubmittedAnswer {
                question_id: q.id(),
                selected: self
                    .answers
                    .get(&q.id())
                    .map_or(AnswerSlot::Unanswered, |&option| AnswerSlot::Selected(option)),
            })
            .collect();
        SubmissionRecord::new(exam.id(), answers)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
