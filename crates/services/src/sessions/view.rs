use exam_core::model::{ExamId, QuestionId, ResultId, SessionPhase};

use super::controller::SessionController;

/// Below this many seconds the timer is shown as running low.
pub const LOW_TIME_THRESHOLD_SECS: u32 = 300;

/// Format remaining time as `m:ss`.
#[must_use]
pub fn format_remaining(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// The question currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub id: QuestionId,
    /// 1-based position in the exam.
    pub number: usize,
    pub prompt: String,
    pub options: Vec<String>,
    pub selected: Option<u32>,
    pub flagged: bool,
}

/// One button of the question navigator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigatorItem {
    pub question_id: QuestionId,
    pub number: usize,
    pub answered: bool,
    pub flagged: bool,
    pub current: bool,
}

/// Read-only picture of a session, detached from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub exam_id: ExamId,
    pub title: String,
    pub phase: SessionPhase,
    pub current_index: usize,
    pub question_count: usize,
    pub current: QuestionView,
    pub navigator: Vec<NavigatorItem>,
    pub answered_count: usize,
    pub unanswered_count: usize,
    pub remaining_seconds: u32,
    pub pending_unanswered: Option<usize>,
    pub result_id: Option<ResultId>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub(crate) fn capture(controller: &SessionController) -> Self {
        let exam = controller.exam();
        let state = controller.state();
        let current_index = state.current_index();

        let navigator = exam
            .questions()
            .iter()
            .enumerate()
            .map(|(idx, q)| NavigatorItem {
                question_id: q.id(),
                number: idx + 1,
                answered: state.answer(q.id()).is_some(),
                flagged: state.is_flagged(q.id()),
                current: idx == current_index,
            })
            .collect();

        let current = exam
            .question_at(current_index)
            .map(|q| QuestionView {
                id: q.id(),
                number: current_index + 1,
                prompt: q.prompt().to_string(),
                options: q.options().to_vec(),
                selected: state.answer(q.id()),
                flagged: state.is_flagged(q.id()),
            })
            .unwrap_or_else(|| QuestionView {
                id: QuestionId::new(0),
                number: 0,
                prompt: String::new(),
                options: Vec::new(),
                selected: None,
                flagged: false,
            });

        Self {
            exam_id: exam.id(),
            title: exam.title().to_string(),
            phase: state.phase(),
            current_index,
            question_count: exam.question_count(),
            current,
            navigator,
            answered_count: state.answered_count(),
            unanswered_count: state.unanswered_count(exam),
            remaining_seconds: state.remaining_seconds(),
            pending_unanswered: controller.pending_unanswered(),
            result_id: controller.result_id(),
            last_error: controller.last_error().map(ToString::to_string),
        }
    }

    /// Position through the exam, `(current + 1) / count * 100`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> f64 {
        if self.question_count == 0 {
            return 0.0;
        }
        (self.current_index + 1) as f64 / self.question_count as f64 * 100.0
    }

    #[must_use]
    pub fn time_label(&self) -> String {
        format_remaining(self.remaining_seconds)
    }

    #[must_use]
    pub fn is_low_time(&self) -> bool {
        self.remaining_seconds < LOW_TIME_THRESHOLD_SECS
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.current_index + 1 >= self.question_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_padded_seconds() {
        assert_eq!(format_remaining(0), "0:00");
        assert_eq!(format_remaining(59), "0:59");
        assert_eq!(format_remaining(61), "1:01");
        assert_eq!(format_remaining(1800), "30:00");
    }
}
