//! Concept progress and the attempt audit trail.
//!
//! Progress rows carry a version counter; every update is conditional on the
//! version the caller loaded, so a lost race surfaces as zero affected rows
//! instead of silently overwriting a concurrent attempt. `attempt_records` is
//! append-only and never updated.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};

use crate::db::operations::decode_err;
use crate::services::mastery::{ConceptProgress, DifficultyLevel, MasteryByDifficulty};

fn map_progress(row: &PgRow) -> Result<ConceptProgress, sqlx::Error> {
    let current: String = row.try_get("currentDifficulty")?;
    let current_difficulty = DifficultyLevel::parse(&current)
        .ok_or_else(|| decode_err(format!("unknown difficulty {current}")))?;

    let buckets: serde_json::Value = row.try_get("masteryByDifficulty")?;
    let mastery_by_difficulty: MasteryByDifficulty = serde_json::from_value(buckets)
        .map_err(|err| decode_err(format!("masteryByDifficulty: {err}")))?;

    Ok(ConceptProgress {
        id: row.try_get("id")?,
        user_id: row.try_get("userId")?,
        curriculum_id: row.try_get("curriculumId")?,
        concept_id: row.try_get("conceptId")?,
        current_difficulty,
        total_attempts: row.try_get("totalAttempts")?,
        total_correct: row.try_get("totalCorrect")?,
        xp_earned: row.try_get("xpEarned")?,
        mastery_by_difficulty,
        last_attempted_at: row.try_get::<Option<DateTime<Utc>>, _>("lastAttemptedAt")?,
        version: row.try_get("version")?,
    })
}

fn buckets_json(record: &ConceptProgress) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(&record.mastery_by_difficulty)
        .map_err(|err| decode_err(format!("masteryByDifficulty: {err}")))
}

const PROGRESS_COLUMNS: &str = r#""id","userId","curriculumId","conceptId","currentDifficulty","totalAttempts","totalCorrect","xpEarned","masteryByDifficulty","lastAttemptedAt","version""#;

pub async fn get_concept_progress(
    executor: impl PgExecutor<'_>,
    user_id: &str,
    curriculum_id: &str,
    concept_id: &str,
) -> Result<Option<ConceptProgress>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {PROGRESS_COLUMNS} FROM "concept_progress" WHERE "userId" = $1 AND "curriculumId" = $2 AND "conceptId" = $3"#
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(curriculum_id)
        .bind(concept_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(map_progress).transpose()
}

/// Progress records for the given concepts, keyed by concept id. Concepts
/// without a record are simply absent.
pub async fn list_concept_progress(
    executor: impl PgExecutor<'_>,
    user_id: &str,
    curriculum_id: &str,
    concept_ids: &[String],
) -> Result<HashMap<String, ConceptProgress>, sqlx::Error> {
    if concept_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let sql = format!(
        r#"SELECT {PROGRESS_COLUMNS} FROM "concept_progress" WHERE "userId" = $1 AND "curriculumId" = $2 AND "conceptId" = ANY($3)"#
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(curriculum_id)
        .bind(concept_ids)
        .fetch_all(executor)
        .await?;

    let mut records = HashMap::with_capacity(rows.len());
    for row in &rows {
        let record = map_progress(row)?;
        records.insert(record.concept_id.clone(), record);
    }
    Ok(records)
}

pub async fn list_user_progress(
    executor: impl PgExecutor<'_>,
    user_id: &str,
    curriculum_id: &str,
) -> Result<Vec<ConceptProgress>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {PROGRESS_COLUMNS} FROM "concept_progress" WHERE "userId" = $1 AND "curriculumId" = $2"#
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(curriculum_id)
        .fetch_all(executor)
        .await?;

    rows.iter().map(map_progress).collect()
}

pub async fn insert_concept_progress(
    executor: impl PgExecutor<'_>,
    record: &ConceptProgress,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO "concept_progress"
          ("id","userId","curriculumId","conceptId","currentDifficulty","totalAttempts","totalCorrect","xpEarned","masteryByDifficulty","lastAttemptedAt","version","createdAt","updatedAt")
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$12)
        "#,
    )
    .bind(&record.id)
    .bind(&record.user_id)
    .bind(&record.curriculum_id)
    .bind(&record.concept_id)
    .bind(record.current_difficulty.as_str())
    .bind(record.total_attempts)
    .bind(record.total_correct)
    .bind(record.xp_earned)
    .bind(buckets_json(record)?)
    .bind(record.last_attempted_at)
    .bind(record.version)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Conditional on the version the caller loaded. Returns false when a
/// concurrent writer got there first.
pub async fn update_concept_progress(
    executor: impl PgExecutor<'_>,
    record: &ConceptProgress,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE "concept_progress"
        SET "currentDifficulty" = $3,
            "totalAttempts" = $4,
            "totalCorrect" = $5,
            "xpEarned" = $6,
            "masteryByDifficulty" = $7,
            "lastAttemptedAt" = $8,
            "version" = "version" + 1,
            "updatedAt" = $9
        WHERE "id" = $1 AND "version" = $2
        "#,
    )
    .bind(&record.id)
    .bind(record.version)
    .bind(record.current_difficulty.as_str())
    .bind(record.total_attempts)
    .bind(record.total_correct)
    .bind(record.xp_earned)
    .bind(buckets_json(record)?)
    .bind(record.last_attempted_at)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone)]
pub struct NewAttemptRecord<'a> {
    pub user_id: &'a str,
    pub curriculum_id: &'a str,
    pub concept_id: &'a str,
    pub question_id: &'a str,
    pub session_id: Option<&'a str>,
    pub difficulty: DifficultyLevel,
    pub is_correct: bool,
    pub time_taken_ms: Option<i64>,
    pub xp_earned: i64,
}

pub async fn insert_attempt_record(
    executor: impl PgExecutor<'_>,
    record: &NewAttemptRecord<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "attempt_records"
          ("id","userId","curriculumId","conceptId","questionId","sessionId","difficulty","isCorrect","timeTakenMs","xpEarned","createdAt")
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(record.user_id)
    .bind(record.curriculum_id)
    .bind(record.concept_id)
    .bind(record.question_id)
    .bind(record.session_id)
    .bind(record.difficulty.as_str())
    .bind(record.is_correct)
    .bind(record.time_taken_ms)
    .bind(record.xp_earned)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}
