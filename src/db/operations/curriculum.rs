//! Read-only access to the curriculum catalogue (curricula, topics, concepts,
//! question pools). The schema is owned by the content pipeline; this module
//! only ever selects from it.

use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};

use crate::db::operations::decode_err;
use crate::services::grading::QuestionType;
use crate::services::mastery::DifficultyLevel;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRow {
    pub id: String,
    pub curriculum_id: String,
    pub name: String,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptRow {
    pub id: String,
    pub topic_id: String,
    pub name: String,
    pub position: i32,
    pub difficulty_levels: Vec<DifficultyLevel>,
}

#[derive(Debug, Clone)]
pub struct QuestionRow {
    pub id: String,
    pub concept_id: String,
    pub difficulty: DifficultyLevel,
    pub question_type: QuestionType,
    pub prompt: String,
    pub options: serde_json::Value,
    pub correct_answer: serde_json::Value,
    pub position: i32,
}

fn map_topic(row: &PgRow) -> Result<TopicRow, sqlx::Error> {
    Ok(TopicRow {
        id: row.try_get("id")?,
        curriculum_id: row.try_get("curriculumId")?,
        name: row.try_get("name")?,
        position: row.try_get("position")?,
    })
}

fn map_concept(row: &PgRow) -> Result<ConceptRow, sqlx::Error> {
    let levels: serde_json::Value = row.try_get("difficultyLevels")?;
    let difficulty_levels: Vec<DifficultyLevel> = serde_json::from_value(levels)
        .map_err(|err| decode_err(format!("difficultyLevels: {err}")))?;

    Ok(ConceptRow {
        id: row.try_get("id")?,
        topic_id: row.try_get("topicId")?,
        name: row.try_get("name")?,
        position: row.try_get("position")?,
        difficulty_levels,
    })
}

fn map_question(row: &PgRow) -> Result<QuestionRow, sqlx::Error> {
    let difficulty: String = row.try_get("difficulty")?;
    let difficulty = DifficultyLevel::parse(&difficulty)
        .ok_or_else(|| decode_err(format!("unknown difficulty {difficulty}")))?;

    let question_type: String = row.try_get("questionType")?;
    let question_type = QuestionType::parse(&question_type)
        .ok_or_else(|| decode_err(format!("unknown question type {question_type}")))?;

    Ok(QuestionRow {
        id: row.try_get("id")?,
        concept_id: row.try_get("conceptId")?,
        difficulty,
        question_type,
        prompt: row.try_get("prompt")?,
        options: row.try_get("options")?,
        correct_answer: row.try_get("correctAnswer")?,
        position: row.try_get("position")?,
    })
}

pub async fn get_topic(
    executor: impl PgExecutor<'_>,
    curriculum_id: &str,
    topic_id: &str,
) -> Result<Option<TopicRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT "id","curriculumId","name","position" FROM "topics" WHERE "id" = $1 AND "curriculumId" = $2"#,
    )
    .bind(topic_id)
    .bind(curriculum_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(map_topic).transpose()
}

pub async fn list_curriculum_topics(
    executor: impl PgExecutor<'_>,
    curriculum_id: &str,
) -> Result<Vec<TopicRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "id","curriculumId","name","position" FROM "topics" WHERE "curriculumId" = $1 ORDER BY "position" ASC"#,
    )
    .bind(curriculum_id)
    .fetch_all(executor)
    .await?;

    rows.iter().map(map_topic).collect()
}

/// Concepts in catalogue order; the order is load-bearing for sequential
/// question selection.
pub async fn list_topic_concepts(
    executor: impl PgExecutor<'_>,
    topic_id: &str,
) -> Result<Vec<ConceptRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "id","topicId","name","position","difficultyLevels" FROM "concepts" WHERE "topicId" = $1 ORDER BY "position" ASC"#,
    )
    .bind(topic_id)
    .fetch_all(executor)
    .await?;

    rows.iter().map(map_concept).collect()
}

pub async fn list_topic_questions(
    executor: impl PgExecutor<'_>,
    topic_id: &str,
) -> Result<Vec<QuestionRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT q."id", q."conceptId", q."difficulty", q."questionType", q."prompt",
               q."options", q."correctAnswer", q."position"
        FROM "questions" q
        JOIN "concepts" c ON c."id" = q."conceptId"
        WHERE c."topicId" = $1
        ORDER BY c."position" ASC, q."position" ASC
        "#,
    )
    .bind(topic_id)
    .fetch_all(executor)
    .await?;

    rows.iter().map(map_question).collect()
}

pub async fn get_question(
    executor: impl PgExecutor<'_>,
    question_id: &str,
) -> Result<Option<QuestionRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT "id","conceptId","difficulty","questionType","prompt","options","correctAnswer","position"
        FROM "questions" WHERE "id" = $1
        "#,
    )
    .bind(question_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(map_question).transpose()
}

pub async fn concept_in_curriculum(
    executor: impl PgExecutor<'_>,
    curriculum_id: &str,
    concept_id: &str,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT 1 AS "one"
        FROM "concepts" c
        JOIN "topics" t ON t."id" = c."topicId"
        WHERE c."id" = $1 AND t."curriculumId" = $2
        "#,
    )
    .bind(concept_id)
    .bind(curriculum_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}
