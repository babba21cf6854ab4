use std::env;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use exam_core::model::{Exam, ExamId, Question, QuestionId, ResultId, SubmissionRecord};

use crate::api::{ExamSource, SubmissionClient};
use crate::error::{ConfigError, ExamSourceError, SubmissionError};

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

#[derive(Clone, Debug)]
pub struct ExamApiConfig {
    base_url: Url,
}

impl ExamApiConfig {
    /// Parse and normalize the API base url.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `raw` is not an absolute http(s)-style url.
    pub fn new(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let mut base_url = Url::parse(trimmed).map_err(|source| ConfigError::InvalidUrl {
            raw: trimmed.to_string(),
            source,
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::NotABase(trimmed.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { base_url })
    }

    /// Read `EXAM_API_URL`, falling back to the local development server.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the variable is set to an unusable url.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var("EXAM_API_URL") {
            Ok(raw) if !raw.trim().is_empty() => Self::new(&raw),
            _ => Self::new(DEFAULT_API_URL),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Url {
        // `path` is a fixed relative segment, so joining onto a base url cannot fail.
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }
}

/// REST adapter for the exams and results endpoints.
#[derive(Clone)]
pub struct HttpExamApi {
    client: Client,
    config: ExamApiConfig,
}

impl HttpExamApi {
    #[must_use]
    pub fn new(config: ExamApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExamApiConfig {
        &self.config
    }
}

#[async_trait]
impl ExamSource for HttpExamApi {
    #[instrument(skip_all, fields(exam_id = %exam_id))]
    async fn fetch_exam(&self, exam_id: ExamId) -> Result<Exam, ExamSourceError> {
        let url = self.config.endpoint(&format!("exams/{exam_id}"));
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(ExamSourceError::NotFound(exam_id)),
            status if !status.is_success() => return Err(ExamSourceError::HttpStatus(status)),
            _ => {}
        }

        let body: ExamPayload = response.json().await?;
        Ok(body.into_exam()?)
    }
}

#[async_trait]
impl SubmissionClient for HttpExamApi {
    #[instrument(skip_all, fields(exam_id = %record.exam_id(), answers = record.answers().len()))]
    async fn submit(&self, record: &SubmissionRecord) -> Result<ResultId, SubmissionError> {
        let url = self.config.endpoint("results/");
        let response = self.client.post(url).json(record).send().await?;

        if !response.status().is_success() {
            return Err(SubmissionError::HttpStatus(response.status()));
        }

        let body: ResultPayload = response.json().await?;
        Ok(ResultId::new(body.id))
    }
}

#[derive(Debug, Deserialize)]
struct ExamPayload {
    id: u64,
    title: String,
    #[serde(default = "default_duration")]
    duration_minutes: u32,
    #[serde(default)]
    questions: Vec<QuestionPayload>,
}

fn default_duration() -> u32 {
    30
}

impl ExamPayload {
    fn into_exam(self) -> Result<Exam, exam_core::model::ExamError> {
        let questions = self
            .questions
            .into_iter()
            .map(|q| Question::new(QuestionId::new(q.id), q.question, q.options))
            .collect();
        Exam::new(ExamId::new(self.id), self.title, self.duration_minutes, questions)
    }
}

#[derive(Debug, Deserialize)]
struct QuestionPayload {
    id: u64,
    question: String,
    options: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    id: u64,
}
