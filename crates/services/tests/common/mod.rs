#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use exam_core::model::{
    Exam, ExamId, Question, QuestionId, ResultId, SessionFragment, SubmissionRecord,
};
use services::{ExamSource, ExamSourceError, SubmissionClient, SubmissionError};
use storage::repository::{InMemorySessionStore, SessionStore, StorageError};

/// Exam 1 with questions 101..=100+count, each with four options.
pub fn build_exam(count: u64, minutes: u32) -> Exam {
    let questions = (1..=count)
        .map(|n| {
            Question::new(
                QuestionId::new(100 + n),
                format!("Question {n}"),
                vec!["A".into(), "B".into(), "C".into(), "D".into()],
            )
        })
        .collect();
    Exam::new(ExamId::new(1), "Sample exam", minutes, questions).unwrap()
}

pub fn qid(n: u64) -> QuestionId {
    QuestionId::new(100 + n)
}

/// Submission client that replays scripted responses and records every request.
#[derive(Default)]
pub struct ScriptedSubmitter {
    responses: Mutex<VecDeque<Result<ResultId, SubmissionError>>>,
    records: Mutex<Vec<SubmissionRecord>>,
}

impl ScriptedSubmitter {
    /// Accepts every submission with result id 1 unless a response is queued.
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting_once() -> Arc<Self> {
        let submitter = Self::default();
        submitter.push_failure("grading service unavailable");
        Arc::new(submitter)
    }

    pub fn push_failure(&self, reason: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(SubmissionError::Rejected(reason.to_string())));
    }

    pub fn push_success(&self, id: u64) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(ResultId::new(id)));
    }

    pub fn records(&self) -> Vec<SubmissionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl SubmissionClient for ScriptedSubmitter {
    async fn submit(&self, record: &SubmissionRecord) -> Result<ResultId, SubmissionError> {
        self.records.lock().unwrap().push(record.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ResultId::new(1)))
    }
}

/// Store wrapper whose writes can be made to fail on demand.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: InMemorySessionStore,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: InMemorySessionStore) -> Self {
        Self {
            inner,
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn read(&self, exam_id: ExamId) -> Result<Option<SessionFragment>, StorageError> {
        self.inner.read(exam_id).await
    }

    async fn write(&self, exam_id: ExamId, fragment: &SessionFragment) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("disk full".into()));
        }
        self.inner.write(exam_id, fragment).await
    }

    async fn clear(&self, exam_id: ExamId) -> Result<(), StorageError> {
        self.inner.clear(exam_id).await
    }
}

/// Exam source backed by a fixed list.
pub struct StaticExams(pub Vec<Exam>);

#[async_trait]
impl ExamSource for StaticExams {
    async fn fetch_exam(&self, exam_id: ExamId) -> Result<Exam, ExamSourceError> {
        self.0
            .iter()
            .find(|exam| exam.id() == exam_id)
            .cloned()
            .ok_or(ExamSourceError::NotFound(exam_id))
    }
}
