//! Quiz session lifecycle
//!
//! A session is a fixed, replayable unit of work: the queue is built once at
//! creation and never changes. The state machine is pure; the async functions
//! below wrap it with persistence, one optimistic-concurrency round-trip per
//! transition. Answer submission is fully transactional: grading, concept
//! progress, the audit record and the session counters land together or not
//! at all.
//!
//! Elapsed time is caller-reported and stored verbatim. The server never
//! measures wall-clock time for a session, so time-mode expiry is enforced by
//! the client and only surfaces here through `pause`/`end` payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::operations::{curriculum, progress, sessions};
use crate::db::DatabaseProxy;
use crate::services::grading::{self, QuestionType};
use crate::services::mastery::{self, DifficultyLevel, MasteryError};
use crate::services::proficiency::{self, TopicProficiency};
use crate::services::selector::{self, QuestionRef, SelectorError, Strategy};

pub const MAX_QUESTION_COUNT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(SessionStatus::Created),
            "active" => Some(SessionStatus::Active),
            "paused" => Some(SessionStatus::Paused),
            "completed" => Some(SessionStatus::Completed),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeMode {
    #[serde(rename = "unlimited")]
    Unlimited,
    #[serde(rename = "10min")]
    TenMinutes,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "3min")]
    ThreeMinutes,
}

impl TimeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeMode::Unlimited => "unlimited",
            TimeMode::TenMinutes => "10min",
            TimeMode::FiveMinutes => "5min",
            TimeMode::ThreeMinutes => "3min",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unlimited" => Some(TimeMode::Unlimited),
            "10min" => Some(TimeMode::TenMinutes),
            "5min" => Some(TimeMode::FiveMinutes),
            "3min" => Some(TimeMode::ThreeMinutes),
            _ => None,
        }
    }

    pub fn time_limit_ms(self) -> Option<i64> {
        match self {
            TimeMode::Unlimited => None,
            TimeMode::TenMinutes => Some(10 * 60 * 1000),
            TimeMode::FiveMinutes => Some(5 * 60 * 1000),
            TimeMode::ThreeMinutes => Some(3 * 60 * 1000),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
    pub id: String,
    pub user_id: String,
    pub curriculum_id: String,
    pub topic_id: String,
    pub status: SessionStatus,
    pub time_mode: TimeMode,
    pub strategy: Strategy,
    pub question_queue: Vec<QuestionRef>,
    pub current_question_index: i64,
    pub questions_answered: i64,
    pub questions_correct: i64,
    pub questions_skipped: i64,
    pub xp_earned: i64,
    pub time_elapsed_ms: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub version: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("topic not found in curriculum")]
    TopicNotFound,
    #[error("question not found")]
    QuestionNotFound,
    #[error("concept not found in curriculum")]
    ConceptNotFound,
    #[error("session belongs to another user")]
    Forbidden,
    #[error("operation not allowed while session is {}", .0.as_str())]
    InvalidState(SessionStatus),
    #[error("question queue is exhausted")]
    QueueExhausted,
    #[error("concurrent session update lost")]
    Conflict,
    #[error("{0}")]
    Validation(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl From<MasteryError> for SessionError {
    fn from(err: MasteryError) -> Self {
        match err {
            MasteryError::ConceptNotFound => SessionError::ConceptNotFound,
            MasteryError::Conflict => SessionError::Conflict,
            MasteryError::Sql(err) => SessionError::Sql(err),
        }
    }
}

impl QuizSession {
    pub fn new(
        user_id: &str,
        curriculum_id: &str,
        topic_id: &str,
        time_mode: TimeMode,
        strategy: Strategy,
        question_queue: Vec<QuestionRef>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            curriculum_id: curriculum_id.to_string(),
            topic_id: topic_id.to_string(),
            status: SessionStatus::Created,
            time_mode,
            strategy,
            question_queue,
            current_question_index: 0,
            questions_answered: 0,
            questions_correct: 0,
            questions_skipped: 0,
            xp_earned: 0,
            time_elapsed_ms: 0,
            started_at: None,
            ended_at: None,
            created_at: Utc::now(),
            version: 0,
        }
    }

    pub fn time_limit_ms(&self) -> Option<i64> {
        self.time_mode.time_limit_ms()
    }

    pub fn current_question(&self) -> Option<&QuestionRef> {
        self.question_queue.get(self.current_question_index as usize)
    }

    pub fn queue_exhausted(&self) -> bool {
        self.current_question_index as usize >= self.question_queue.len()
    }

    fn require_status(&self, expected: SessionStatus) -> Result<(), SessionError> {
        if self.status != expected {
            return Err(SessionError::InvalidState(self.status));
        }
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        self.require_status(SessionStatus::Created)?;
        self.status = SessionStatus::Active;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn record_answer(&mut self, is_correct: bool, xp_earned: i64) -> Result<(), SessionError> {
        self.require_status(SessionStatus::Active)?;
        if self.queue_exhausted() {
            return Err(SessionError::QueueExhausted);
        }
        self.questions_answered += 1;
        if is_correct {
            self.questions_correct += 1;
        }
        self.xp_earned += xp_earned;
        self.current_question_index += 1;
        Ok(())
    }

    /// A skip is not an attempt: concept progress stays untouched.
    pub fn record_skip(&mut self) -> Result<(), SessionError> {
        self.require_status(SessionStatus::Active)?;
        if self.queue_exhausted() {
            return Err(SessionError::QueueExhausted);
        }
        self.questions_skipped += 1;
        self.current_question_index += 1;
        Ok(())
    }

    pub fn pause(&mut self, elapsed_ms: i64) -> Result<(), SessionError> {
        self.require_status(SessionStatus::Active)?;
        if elapsed_ms < 0 {
            return Err(SessionError::Validation(
                "elapsedMs must not be negative".to_string(),
            ));
        }
        self.status = SessionStatus::Paused;
        self.time_elapsed_ms = elapsed_ms;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.require_status(SessionStatus::Paused)?;
        self.status = SessionStatus::Active;
        Ok(())
    }

    /// Terminal transition; the machine never completes a session on its own,
    /// even with the queue exhausted, so the client can show a final screen.
    pub fn finish(
        &mut self,
        completed: bool,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if !matches!(self.status, SessionStatus::Active | SessionStatus::Paused) {
            return Err(SessionError::InvalidState(self.status));
        }
        if elapsed_ms < 0 {
            return Err(SessionError::Validation(
                "elapsedMs must not be negative".to_string(),
            ));
        }
        self.status = if completed {
            SessionStatus::Completed
        } else {
            SessionStatus::Abandoned
        };
        self.time_elapsed_ms = elapsed_ms;
        self.ended_at = Some(now);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionInput {
    pub curriculum_id: String,
    pub topic_id: String,
    pub time_mode: TimeMode,
    pub strategy: Strategy,
    pub question_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentQuestion {
    pub index: usize,
    pub total: usize,
    pub question_id: String,
    pub concept_id: String,
    pub difficulty: DifficultyLevel,
    pub question_type: QuestionType,
    pub prompt: String,
    pub options: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResult {
    pub is_correct: bool,
    pub xp_earned: i64,
    pub mastery_achieved: bool,
    pub new_difficulty: DifficultyLevel,
    pub queue_exhausted: bool,
}

async fn load_owned(
    executor: impl sqlx::PgExecutor<'_>,
    session_id: &str,
    user_id: &str,
) -> Result<QuizSession, SessionError> {
    let session = sessions::get_session(executor, session_id)
        .await?
        .ok_or(SessionError::NotFound)?;
    if session.user_id != user_id {
        return Err(SessionError::Forbidden);
    }
    Ok(session)
}

async fn save(
    executor: impl sqlx::PgExecutor<'_>,
    session: &mut QuizSession,
) -> Result<(), SessionError> {
    let saved = sessions::update_session(executor, session).await?;
    if !saved {
        return Err(SessionError::Conflict);
    }
    session.version += 1;
    Ok(())
}

/// Validate the topic, build the queue, persist the session in `created`.
/// The clock does not start here.
pub async fn create_session(
    proxy: &DatabaseProxy,
    user_id: &str,
    input: CreateSessionInput,
) -> Result<QuizSession, SessionError> {
    if input.question_count == 0 || input.question_count > MAX_QUESTION_COUNT {
        return Err(SessionError::Validation(format!(
            "questionCount must be between 1 and {MAX_QUESTION_COUNT}"
        )));
    }

    let pool = proxy.pool();
    let topic = curriculum::get_topic(pool, &input.curriculum_id, &input.topic_id)
        .await?
        .ok_or(SessionError::TopicNotFound)?;

    let concepts = curriculum::list_topic_concepts(pool, &topic.id).await?;
    let questions = curriculum::list_topic_questions(pool, &topic.id).await?;
    let concept_ids: Vec<String> = concepts.iter().map(|c| c.id.clone()).collect();
    let records =
        progress::list_concept_progress(pool, user_id, &input.curriculum_id, &concept_ids).await?;

    // ThreadRng is not Send; keep it out of scope before the next await.
    let queue = {
        let mut rng = rand::rng();
        match selector::build_queue(
            &concepts,
            &questions,
            input.strategy,
            input.question_count,
            &records,
            &mut rng,
        ) {
            Ok(queue) => queue,
            // Recovered locally: shrink the request to what the pool can serve.
            Err(SelectorError::InsufficientQuestions {
                available,
                requested,
            }) => {
                if available == 0 {
                    let reason = match input.strategy {
                        Strategy::Review => "no concepts in this topic need review yet",
                        _ => "topic has no questions",
                    };
                    return Err(SessionError::Validation(reason.to_string()));
                }
                tracing::debug!(
                    topic_id = %topic.id,
                    requested,
                    available,
                    "question pool smaller than requested, capping"
                );
                selector::build_queue(
                    &concepts,
                    &questions,
                    input.strategy,
                    available,
                    &records,
                    &mut rng,
                )
                .map_err(|_| SessionError::Validation("topic has no questions".to_string()))?
            }
        }
    };

    let session = QuizSession::new(
        user_id,
        &input.curriculum_id,
        &topic.id,
        input.time_mode,
        input.strategy,
        queue,
    );
    sessions::insert_session(pool, &session).await?;

    tracing::info!(
        session_id = %session.id,
        user_id,
        topic_id = %topic.id,
        strategy = input.strategy.as_str(),
        queue_len = session.question_queue.len(),
        "quiz session created"
    );
    Ok(session)
}

pub async fn start_session(
    proxy: &DatabaseProxy,
    user_id: &str,
    session_id: &str,
) -> Result<QuizSession, SessionError> {
    let pool = proxy.pool();
    let mut session = load_owned(pool, session_id, user_id).await?;
    session.start(Utc::now())?;
    save(pool, &mut session).await?;
    Ok(session)
}

/// Current queue entry with its display content, `None` once the queue is
/// exhausted. The canonical answer never leaves the server.
pub async fn current_question(
    proxy: &DatabaseProxy,
    user_id: &str,
    session_id: &str,
) -> Result<(QuizSession, Option<CurrentQuestion>), SessionError> {
    let pool = proxy.pool();
    let session = load_owned(pool, session_id, user_id).await?;
    if session.status.is_terminal() {
        return Err(SessionError::InvalidState(session.status));
    }

    let Some(current) = session.current_question() else {
        return Ok((session, None));
    };

    let question = curriculum::get_question(pool, &current.question_id)
        .await?
        .ok_or(SessionError::QuestionNotFound)?;

    let dto = CurrentQuestion {
        index: session.current_question_index as usize,
        total: session.question_queue.len(),
        question_id: question.id,
        concept_id: question.concept_id,
        difficulty: question.difficulty,
        question_type: question.question_type,
        prompt: question.prompt,
        options: question.options,
    };
    Ok((session, Some(dto)))
}

/// Grade the current question, feed the result into mastery tracking, and
/// advance the session, all in one transaction. A failure in any step leaves
/// no partial XP, no audit record and no index advancement behind.
pub async fn submit_answer(
    proxy: &DatabaseProxy,
    user_id: &str,
    session_id: &str,
    answer: &Value,
    time_taken_ms: Option<i64>,
) -> Result<(QuizSession, AnswerResult), SessionError> {
    let mut tx = proxy.pool().begin().await?;

    let mut session = load_owned(&mut *tx, session_id, user_id).await?;
    session.require_status(SessionStatus::Active)?;
    let current = session
        .current_question()
        .cloned()
        .ok_or(SessionError::QueueExhausted)?;

    let question = curriculum::get_question(&mut *tx, &current.question_id)
        .await?
        .ok_or(SessionError::QuestionNotFound)?;

    let is_correct = grading::grade(question.question_type, &question.correct_answer, answer)
        .map_err(|err| SessionError::Validation(err.to_string()))?;

    let (outcome, _progress) = mastery::record_attempt(
        &mut tx,
        mastery::RecordAttemptInput {
            user_id,
            curriculum_id: &session.curriculum_id,
            concept_id: &current.concept_id,
            question_id: &current.question_id,
            session_id: Some(&session.id),
            question_difficulty: current.difficulty,
            is_correct,
            time_taken_ms,
        },
    )
    .await?;

    session.record_answer(is_correct, outcome.xp_earned)?;
    save(&mut *tx, &mut session).await?;

    tx.commit().await?;

    let result = AnswerResult {
        is_correct,
        xp_earned: outcome.xp_earned,
        mastery_achieved: outcome.mastery_achieved,
        new_difficulty: outcome.new_difficulty,
        queue_exhausted: session.queue_exhausted(),
    };
    Ok((session, result))
}

pub async fn skip_question(
    proxy: &DatabaseProxy,
    user_id: &str,
    session_id: &str,
) -> Result<QuizSession, SessionError> {
    let pool = proxy.pool();
    let mut session = load_owned(pool, session_id, user_id).await?;
    session.record_skip()?;
    save(pool, &mut session).await?;
    Ok(session)
}

pub async fn pause_session(
    proxy: &DatabaseProxy,
    user_id: &str,
    session_id: &str,
    elapsed_ms: i64,
) -> Result<QuizSession, SessionError> {
    let pool = proxy.pool();
    let mut session = load_owned(pool, session_id, user_id).await?;
    session.pause(elapsed_ms)?;
    save(pool, &mut session).await?;
    Ok(session)
}

pub async fn resume_session(
    proxy: &DatabaseProxy,
    user_id: &str,
    session_id: &str,
) -> Result<QuizSession, SessionError> {
    let pool = proxy.pool();
    let mut session = load_owned(pool, session_id, user_id).await?;
    session.resume()?;
    save(pool, &mut session).await?;
    Ok(session)
}

/// Terminal transition plus a fresh proficiency read for the session's topic.
pub async fn end_session(
    proxy: &DatabaseProxy,
    user_id: &str,
    session_id: &str,
    completed: bool,
    elapsed_ms: i64,
) -> Result<(QuizSession, TopicProficiency), SessionError> {
    let pool = proxy.pool();
    let mut session = load_owned(pool, session_id, user_id).await?;
    session.finish(completed, elapsed_ms, Utc::now())?;
    save(pool, &mut session).await?;

    let concepts = curriculum::list_topic_concepts(pool, &session.topic_id).await?;
    let concept_ids: Vec<String> = concepts.iter().map(|c| c.id.clone()).collect();
    let records =
        progress::list_concept_progress(pool, user_id, &session.curriculum_id, &concept_ids)
            .await?;
    let proficiency = proficiency::compute_topic_proficiency(&concepts, &records);

    tracing::info!(
        session_id = %session.id,
        user_id,
        completed,
        questions_answered = session.questions_answered,
        band = ?proficiency.band,
        "quiz session ended"
    );
    Ok((session, proficiency))
}

pub async fn get_session(
    proxy: &DatabaseProxy,
    user_id: &str,
    session_id: &str,
) -> Result<QuizSession, SessionError> {
    load_owned(proxy.pool(), session_id, user_id).await
}

pub async fn list_sessions(
    proxy: &DatabaseProxy,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<(Vec<QuizSession>, i64), SessionError> {
    let pool = proxy.pool();
    let total = sessions::count_sessions(pool, user_id).await?;
    let items = sessions::list_sessions(pool, user_id, limit, offset).await?;
    Ok((items, total))
}
