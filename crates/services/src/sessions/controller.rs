use std::fmt;
use std::sync::Arc;

use exam_core::Clock;
use exam_core::model::{
    Exam, ExamId, QuestionId, ResultId, SessionPhase, SessionState, SubmissionRecord,
};
use storage::repository::SessionStore;

use super::view::SessionSnapshot;
use crate::api::{ExamSource, SubmissionClient};
use crate::error::{SessionError, SubmissionError};

/// What the user has to acknowledge before a manual submission goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPrompt {
    /// Every question is answered; confirm that the attempt cannot be edited afterwards.
    Confirm,
    /// Some questions are still unanswered.
    UnansweredWarning { unanswered: usize },
}

/// Result of driving the submit path to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted(ResultId),
    /// The grading service rejected the attempt; answers are kept for a retry.
    Failed,
}

/// Result of a single timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining_seconds: u32 },
    /// Time ran out and the attempt was submitted without confirmation.
    Expired(SubmitOutcome),
    /// The timer does not run in this phase.
    Idle(SessionPhase),
}

/// Sole owner and mutator of one exam attempt.
///
/// Every user change is written to the session store before it becomes
/// visible in memory, so a failed write leaves the controller unchanged.
/// Timer ticks are the exception: they always apply, so a broken store
/// cannot hold off the timeout.
/// Operations take `&mut self`; callers that share a controller with a timer
/// should go through `SessionRunner`.
pub struct SessionController {
    exam: Exam,
    state: SessionState,
    clock: Clock,
    store: Arc<dyn SessionStore>,
    submitter: Arc<dyn SubmissionClient>,
    pending_unanswered: Option<usize>,
    result_id: Option<ResultId>,
    last_error: Option<SubmissionError>,
    last_record: Option<SubmissionRecord>,
}

impl SessionController {
    /// Fetch the exam and then start or resume the attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Load` if the exam cannot be fetched, or
    /// `SessionError::Storage` if the initial fragment cannot be written.
    pub async fn load(
        exam_id: ExamId,
        source: &dyn ExamSource,
        clock: Clock,
        store: Arc<dyn SessionStore>,
        submitter: Arc<dyn SubmissionClient>,
    ) -> Result<Self, SessionError> {
        let exam = source.fetch_exam(exam_id).await.map_err(|err| {
            tracing::error!(%exam_id, error = %err, "failed to load exam");
            SessionError::Load(err)
        })?;
        Self::start(exam, clock, store, submitter).await
    }

    /// Start a new attempt or resume a persisted one.
    ///
    /// A persisted fragment has its remaining time reduced by the wall-clock
    /// time since its last tick. An unreadable fragment is discarded and a
    /// fresh attempt begins. If no time is left the attempt is submitted
    /// immediately, as on a timeout.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the starting fragment cannot be written.
    pub async fn start(
        exam: Exam,
        clock: Clock,
        store: Arc<dyn SessionStore>,
        submitter: Arc<dyn SubmissionClient>,
    ) -> Result<Self, SessionError> {
        let exam_id = exam.id();
        let now = clock.now();

        let persisted = match store.read(exam_id).await {
            Ok(fragment) => fragment,
            Err(err) => {
                tracing::warn!(%exam_id, error = %err, "discarding unreadable session fragment");
                if let Err(clear_err) = store.clear(exam_id).await {
                    tracing::warn!(%exam_id, error = %clear_err, "failed to clear unreadable fragment");
                }
                None
            }
        };

        let state = match persisted {
            Some(fragment) => {
                let persisted_remaining = fragment.remaining_seconds;
                let (state, report) = SessionState::restore(&exam, fragment, now);
                if !report.is_clean() {
                    tracing::warn!(
                        %exam_id,
                        dropped_answers = report.dropped_answers.len(),
                        dropped_flags = report.dropped_flags.len(),
                        clamped_index = report.clamped_index,
                        "restored session did not match exam"
                    );
                }
                tracing::info!(
                    %exam_id,
                    persisted_remaining,
                    elapsed = report.elapsed_seconds,
                    remaining = state.remaining_seconds(),
                    "resumed exam session"
                );
                state
            }
            None => {
                tracing::info!(%exam_id, remaining = exam.duration_seconds(), "started exam session");
                SessionState::fresh(&exam, now)
            }
        };

        store.write(exam_id, &state.fragment()).await?;

        let mut controller = Self {
            exam,
            state,
            clock,
            store,
            submitter,
            pending_unanswered: None,
            result_id: None,
            last_error: None,
            last_record: None,
        };

        if controller.state.is_expired() {
            tracing::info!(%exam_id, "session expired while away, submitting");
            controller.state.transition(SessionPhase::Submitting)?;
            controller.submit().await?;
        } else {
            controller.state.transition(SessionPhase::Active)?;
        }

        Ok(controller)
    }

    #[must_use]
    pub fn exam(&self) -> &Exam {
        &self.exam
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> u32 {
        self.state.remaining_seconds()
    }

    /// Unanswered count disclosed by the pending warning prompt.
    #[must_use]
    pub fn pending_unanswered(&self) -> Option<usize> {
        self.pending_unanswered
    }

    #[must_use]
    pub fn result_id(&self) -> Option<ResultId> {
        self.result_id
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&SubmissionError> {
        self.last_error.as_ref()
    }

    /// The most recent record handed to the submission client.
    #[must_use]
    pub fn last_record(&self) -> Option<&SubmissionRecord> {
        self.last_record.as_ref()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(self)
    }

    /// Advance the timer by one second.
    ///
    /// Only runs while `Active`. Reaching zero submits the attempt straight
    /// away, skipping both confirmation prompts. The countdown never waits on
    /// the store: a failed write is logged and the next tick writes again.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Validation` only if the phase machine refuses
    /// the move to `Submitting`.
    pub async fn tick(&mut self) -> Result<TickOutcome, SessionError> {
        if self.phase() != SessionPhase::Active {
            return Ok(TickOutcome::Idle(self.phase()));
        }

        let exam_id = self.exam.id();
        let remaining_seconds = self.state.tick(self.clock.now());
        if let Err(err) = self.store.write(exam_id, &self.state.fragment()).await {
            tracing::warn!(%exam_id, remaining_seconds, error = %err, "failed to persist tick");
        }
        tracing::debug!(%exam_id, remaining_seconds, "tick");

        if remaining_seconds > 0 {
            return Ok(TickOutcome::Running { remaining_seconds });
        }

        tracing::info!(%exam_id, "time is up, submitting");
        self.state.transition(SessionPhase::Submitting)?;
        let outcome = self.submit().await?;
        Ok(TickOutcome::Expired(outcome))
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidPhase` outside `Active`,
    /// `SessionError::Validation` for unknown questions or options, or
    /// `SessionError::Storage` if the change cannot be persisted.
    pub async fn select_answer(
        &mut self,
        question_id: QuestionId,
        option: u32,
    ) -> Result<(), SessionError> {
        self.ensure_active("select_answer")?;
        let mut next = self.state.clone();
        next.select_answer(&self.exam, question_id, option)?;
        self.commit(next).await
    }

    /// Flip the review flag of a question; returns whether it is now flagged.
    ///
    /// # Errors
    ///
    /// Same as `select_answer`.
    pub async fn toggle_flag(&mut self, question_id: QuestionId) -> Result<bool, SessionError> {
        self.ensure_active("toggle_flag")?;
        let mut next = self.state.clone();
        let flagged = next.toggle_flag(&self.exam, question_id)?;
        self.commit(next).await?;
        Ok(flagged)
    }

    /// Flip the review flag of the question currently shown.
    ///
    /// # Errors
    ///
    /// Same as `select_answer`.
    pub async fn toggle_current_flag(&mut self) -> Result<bool, SessionError> {
        self.ensure_active("toggle_flag")?;
        let question_id = self.current_question_id();
        self.toggle_flag(question_id).await
    }

    /// Jump to any question. Never requires the current one to be answered.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Validation` if `index` is out of range, plus
    /// the phase and storage errors of `select_answer`.
    pub async fn navigate(&mut self, index: usize) -> Result<(), SessionError> {
        self.ensure_active("navigate")?;
        let mut next = self.state.clone();
        next.navigate(index)?;
        self.commit(next).await
    }

    /// Move one question forward, staying on the last one.
    ///
    /// # Errors
    ///
    /// Same as `navigate`.
    pub async fn next(&mut self) -> Result<(), SessionError> {
        let last = self.exam.question_count().saturating_sub(1);
        let target = (self.state.current_index() + 1).min(last);
        self.navigate(target).await
    }

    /// Move one question back, staying on the first one.
    ///
    /// # Errors
    ///
    /// Same as `navigate`.
    pub async fn previous(&mut self) -> Result<(), SessionError> {
        let target = self.state.current_index().saturating_sub(1);
        self.navigate(target).await
    }

    /// Ask to submit. Never submits by itself; see `confirm_submit`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPhase` outside `Active`.
    pub fn request_submit(&mut self) -> Result<SubmitPrompt, SessionError> {
        self.ensure_active("request_submit")?;
        let unanswered = self.state.unanswered_count(&self.exam);
        if unanswered > 0 {
            self.state
                .transition(SessionPhase::AwaitingUnansweredWarning)?;
            self.pending_unanswered = Some(unanswered);
            Ok(SubmitPrompt::UnansweredWarning { unanswered })
        } else {
            self.state.transition(SessionPhase::AwaitingConfirmation)?;
            self.pending_unanswered = None;
            Ok(SubmitPrompt::Confirm)
        }
    }

    /// Dismiss a pending prompt and go back to answering.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPhase` unless a prompt is pending.
    pub fn cancel_submit(&mut self) -> Result<(), SessionError> {
        self.ensure_awaiting("cancel_submit")?;
        self.state.transition(SessionPhase::Active)?;
        self.pending_unanswered = None;
        Ok(())
    }

    /// Accept a pending prompt and submit.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPhase` unless a prompt is pending.
    /// A rejected submission is not an error; it yields `SubmitOutcome::Failed`.
    pub async fn confirm_submit(&mut self) -> Result<SubmitOutcome, SessionError> {
        self.ensure_awaiting("confirm_submit")?;
        self.pending_unanswered = None;
        self.state.transition(SessionPhase::Submitting)?;
        self.submit().await
    }

    /// Leave `Failed` after a rejected submission.
    ///
    /// With time left the attempt becomes `Active` again and the timer
    /// resumes. With no time left nothing can be edited, so the attempt is
    /// resubmitted right away.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPhase` outside `Failed`, or
    /// `SessionError::Storage` if the resumed fragment cannot be written.
    pub async fn retry(&mut self) -> Result<Option<SubmitOutcome>, SessionError> {
        if self.phase() != SessionPhase::Failed {
            return Err(self.invalid_phase("retry"));
        }
        self.last_error = None;

        if self.state.is_expired() {
            self.state.transition(SessionPhase::Submitting)?;
            return self.submit().await.map(Some);
        }

        let mut next = self.state.clone();
        next.stamp(self.clock.now());
        self.commit(next).await?;
        self.state.transition(SessionPhase::Active)?;
        tracing::info!(exam_id = %self.exam.id(), "resumed after failed submission");
        Ok(None)
    }

    /// Build the record, call the grading service, and settle the phase.
    ///
    /// Expects `Submitting`. On success the persisted fragment is cleared; on
    /// failure it is left exactly as last written.
    async fn submit(&mut self) -> Result<SubmitOutcome, SessionError> {
        debug_assert_eq!(self.phase(), SessionPhase::Submitting);
        let exam_id = self.exam.id();
        let record = self.state.submission_record(&self.exam);
        tracing::info!(
            %exam_id,
            unanswered = record.unanswered_count(),
            "submitting exam"
        );

        let result = self.submitter.submit(&record).await;
        self.last_record = Some(record);

        match result {
            Ok(result_id) => {
                self.state.transition(SessionPhase::Submitted)?;
                self.result_id = Some(result_id);
                if let Err(err) = self.store.clear(exam_id).await {
                    tracing::error!(%exam_id, error = %err, "submitted but failed to clear session fragment");
                }
                tracing::info!(%exam_id, %result_id, "exam submitted");
                Ok(SubmitOutcome::Submitted(result_id))
            }
            Err(err) => {
                tracing::warn!(%exam_id, error = %err, "submission failed");
                self.state.transition(SessionPhase::Failed)?;
                self.last_error = Some(err);
                Ok(SubmitOutcome::Failed)
            }
        }
    }

    async fn commit(&mut self, next: SessionState) -> Result<(), SessionError> {
        self.store.write(self.exam.id(), &next.fragment()).await?;
        self.state = next;
        Ok(())
    }

    fn current_question_id(&self) -> QuestionId {
        // `current_index` is always within range of a non-empty exam.
        self.exam
            .question_at(self.state.current_index())
            .or_else(|| self.exam.questions().first())
            .map_or_else(|| QuestionId::new(0), |q| q.id())
    }

    fn ensure_active(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.phase() == SessionPhase::Active {
            Ok(())
        } else {
            Err(self.invalid_phase(operation))
        }
    }

    fn ensure_awaiting(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.phase().is_awaiting_confirmation() {
            Ok(())
        } else {
            Err(self.invalid_phase(operation))
        }
    }

    fn invalid_phase(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidPhase {
            operation,
            phase: self.phase(),
        }
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("exam_id", &self.exam.id())
            .field("phase", &self.phase())
            .field("current_index", &self.state.current_index())
            .field("answered", &self.state.answered_count())
            .field("remaining_seconds", &self.state.remaining_seconds())
            .field("result_id", &self.result_id)
            .finish_non_exhaustive()
    }
}
