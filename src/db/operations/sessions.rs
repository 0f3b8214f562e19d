//! Quiz session rows. Same optimistic-concurrency discipline as concept
//! progress: every update checks the loaded version, so two racing
//! `submitAnswer` calls can never both advance the same index.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};

use crate::db::operations::decode_err;
use crate::services::selector::{QuestionRef, Strategy};
use crate::services::session::{QuizSession, SessionStatus, TimeMode};

fn map_session(row: &PgRow) -> Result<QuizSession, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = SessionStatus::parse(&status)
        .ok_or_else(|| decode_err(format!("unknown session status {status}")))?;

    let time_mode: String = row.try_get("timeMode")?;
    let time_mode = TimeMode::parse(&time_mode)
        .ok_or_else(|| decode_err(format!("unknown time mode {time_mode}")))?;

    let strategy: String = row.try_get("strategy")?;
    let strategy = Strategy::parse(&strategy)
        .ok_or_else(|| decode_err(format!("unknown strategy {strategy}")))?;

    let queue: serde_json::Value = row.try_get("questionQueue")?;
    let question_queue: Vec<QuestionRef> = serde_json::from_value(queue)
        .map_err(|err| decode_err(format!("questionQueue: {err}")))?;

    Ok(QuizSession {
        id: row.try_get("id")?,
        user_id: row.try_get("userId")?,
        curriculum_id: row.try_get("curriculumId")?,
        topic_id: row.try_get("topicId")?,
        status,
        time_mode,
        strategy,
        question_queue,
        current_question_index: row.try_get("currentQuestionIndex")?,
        questions_answered: row.try_get("questionsAnswered")?,
        questions_correct: row.try_get("questionsCorrect")?,
        questions_skipped: row.try_get("questionsSkipped")?,
        xp_earned: row.try_get("xpEarned")?,
        time_elapsed_ms: row.try_get("timeElapsedMs")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("startedAt")?,
        ended_at: row.try_get::<Option<DateTime<Utc>>, _>("endedAt")?,
        created_at: row.try_get("createdAt")?,
        version: row.try_get("version")?,
    })
}

fn queue_json(session: &QuizSession) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(&session.question_queue)
        .map_err(|err| decode_err(format!("questionQueue: {err}")))
}

const SESSION_COLUMNS: &str = r#""id","userId","curriculumId","topicId","status","timeMode","strategy","questionQueue","currentQuestionIndex","questionsAnswered","questionsCorrect","questionsSkipped","xpEarned","timeElapsedMs","startedAt","endedAt","createdAt","version""#;

pub async fn insert_session(
    executor: impl PgExecutor<'_>,
    session: &QuizSession,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "quiz_sessions"
          ("id","userId","curriculumId","topicId","status","timeMode","timeLimitMs","strategy","questionQueue","currentQuestionIndex","questionsAnswered","questionsCorrect","questionsSkipped","xpEarned","timeElapsedMs","startedAt","endedAt","version","createdAt","updatedAt")
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$19)
        "#,
    )
    .bind(&session.id)
    .bind(&session.user_id)
    .bind(&session.curriculum_id)
    .bind(&session.topic_id)
    .bind(session.status.as_str())
    .bind(session.time_mode.as_str())
    .bind(session.time_limit_ms())
    .bind(session.strategy.as_str())
    .bind(queue_json(session)?)
    .bind(session.current_question_index)
    .bind(session.questions_answered)
    .bind(session.questions_correct)
    .bind(session.questions_skipped)
    .bind(session.xp_earned)
    .bind(session.time_elapsed_ms)
    .bind(session.started_at)
    .bind(session.ended_at)
    .bind(session.version)
    .bind(session.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_session(
    executor: impl PgExecutor<'_>,
    session_id: &str,
) -> Result<Option<QuizSession>, sqlx::Error> {
    let sql = format!(r#"SELECT {SESSION_COLUMNS} FROM "quiz_sessions" WHERE "id" = $1"#);
    let row = sqlx::query(&sql)
        .bind(session_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(map_session).transpose()
}

/// The queue itself is immutable after creation and deliberately not part of
/// the update set. Returns false when the version check fails.
pub async fn update_session(
    executor: impl PgExecutor<'_>,
    session: &QuizSession,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE "quiz_sessions"
        SET "status" = $3,
            "currentQuestionIndex" = $4,
            "questionsAnswered" = $5,
            "questionsCorrect" = $6,
            "questionsSkipped" = $7,
            "xpEarned" = $8,
            "timeElapsedMs" = $9,
            "startedAt" = $10,
            "endedAt" = $11,
            "version" = "version" + 1,
            "updatedAt" = $12
        WHERE "id" = $1 AND "version" = $2
        "#,
    )
    .bind(&session.id)
    .bind(session.version)
    .bind(session.status.as_str())
    .bind(session.current_question_index)
    .bind(session.questions_answered)
    .bind(session.questions_correct)
    .bind(session.questions_skipped)
    .bind(session.xp_earned)
    .bind(session.time_elapsed_ms)
    .bind(session.started_at)
    .bind(session.ended_at)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_sessions(
    executor: impl PgExecutor<'_>,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<QuizSession>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {SESSION_COLUMNS} FROM "quiz_sessions" WHERE "userId" = $1 ORDER BY "createdAt" DESC LIMIT $2 OFFSET $3"#
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await?;

    rows.iter().map(map_session).collect()
}

pub async fn count_sessions(
    executor: impl PgExecutor<'_>,
    user_id: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(r#"SELECT COUNT(*) AS "count" FROM "quiz_sessions" WHERE "userId" = $1"#)
        .bind(user_id)
        .fetch_one(executor)
        .await?;
    row.try_get("count")
}
