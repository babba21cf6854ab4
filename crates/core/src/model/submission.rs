use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::ids::{ExamId, QuestionId};

/// Wire value the grading service reads as "no answer selected".
pub const UNANSWERED_SENTINEL: i64 = -1;

/// Either a selected option index or the unanswered sentinel.
///
/// Serializes as a bare integer: the option index, or `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnswerSlot {
    Selected(u32),
    Unanswered,
}

impl AnswerSlot {
    #[must_use]
    pub fn to_wire(self) -> i64 {
        match self {
            AnswerSlot::Selected(option) => i64::from(option),
            AnswerSlot::Unanswered => UNANSWERED_SENTINEL,
        }
    }

    /// Negative values all decode as unanswered; values past `u32` are rejected.
    #[must_use]
    pub fn from_wire(raw: i64) -> Option<Self> {
        if raw < 0 {
            return Some(AnswerSlot::Unanswered);
        }
        u32::try_from(raw).ok().map(AnswerSlot::Selected)
    }
}

impl Serialize for AnswerSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_wire())
    }
}

impl<'de> Deserialize<'de> for AnswerSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        AnswerSlot::from_wire(raw)
            .ok_or_else(|| serde::de::Error::custom(format!("answer index {raw} out of range")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: QuestionId,
    #[serde(rename = "selected_answer")]
    pub selected: AnswerSlot,
}

/// Immutable, total encoding of a finished attempt.
///
/// Holds exactly one entry per exam question, in exam order. Review flags
/// are never part of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    exam_id: ExamId,
    answers: Vec<SubmittedAnswer>,
}

impl SubmissionRecord {
    #[must_use]
    pub fn new(exam_id: ExamId, answers: Vec<SubmittedAnswer>) -> Self {
        Self { exam_id, answers }
    }

    #[must_use]
    pub fn exam_id(&self) -> ExamId {
        self.exam_id
    }

    #[must_use]
    pub fn answers(&self) -> &[SubmittedAnswer] {
        &self.answers
    }

    /// Answer slots in exam order, as the grading service sees them.
    #[must_use]
    pub fn wire_answers(&self) -> Vec<i64> {
        self.answers.iter().map(|a| a.selected.to_wire()).collect()
    }

    #[must_use]
    pub fn unanswered_count(&self) -> usize {
        self.answers
            .iter()
            .filter(|a| a.selected == AnswerSlot::Unanswered)
            .count()
    }

    /// Canonical JSON body for the results endpoint.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
