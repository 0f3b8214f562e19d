use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::operations::{curriculum, progress};
use crate::response::{json_error, AppError};
use crate::routes::sessions::require_user;
use crate::services::proficiency::{self, TopicProficiency};
use crate::state::AppState;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurriculumQuery {
    curriculum_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TopicProficiencyResponse {
    topic_id: String,
    topic_name: String,
    proficiency: TopicProficiency,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TopicOverview {
    topic_id: String,
    topic_name: String,
    proficiency: TopicProficiency,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserProgressResponse {
    curriculum_id: String,
    total_xp: i64,
    concepts_started: usize,
    concepts_mastered: usize,
    topics: Vec<TopicOverview>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(user_progress))
        .route("/topics/:topicId", get(topic_proficiency))
}

async fn topic_proficiency(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(topic_id): Path<String>,
    Query(query): Query<CurriculumQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;
    let pool = proxy.pool();

    let topic = curriculum::get_topic(pool, &query.curriculum_id, &topic_id)
        .await
        .map_err(map_sql_err)?
        .ok_or_else(|| AppError::not_found("topic not found in curriculum"))?;

    let concepts = curriculum::list_topic_concepts(pool, &topic.id)
        .await
        .map_err(map_sql_err)?;
    let concept_ids: Vec<String> = concepts.iter().map(|c| c.id.clone()).collect();
    let records =
        progress::list_concept_progress(pool, &user.id, &query.curriculum_id, &concept_ids)
            .await
            .map_err(map_sql_err)?;

    let result = proficiency::compute_topic_proficiency(&concepts, &records);

    Ok(Json(SuccessResponse {
        success: true,
        data: TopicProficiencyResponse {
            topic_id: topic.id,
            topic_name: topic.name,
            proficiency: result,
        },
    }))
}

async fn user_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CurriculumQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;
    let pool = proxy.pool();

    let topics = curriculum::list_curriculum_topics(pool, &query.curriculum_id)
        .await
        .map_err(map_sql_err)?;
    if topics.is_empty() {
        return Err(AppError::not_found("curriculum not found or empty"));
    }

    let all_records = progress::list_user_progress(pool, &user.id, &query.curriculum_id)
        .await
        .map_err(map_sql_err)?;
    let total_xp: i64 = all_records.iter().map(|r| r.xp_earned).sum();
    let by_concept: HashMap<String, _> = all_records
        .into_iter()
        .map(|r| (r.concept_id.clone(), r))
        .collect();

    let mut concepts_started = 0;
    let mut concepts_mastered = 0;
    let mut overviews = Vec::with_capacity(topics.len());
    for topic in topics {
        let concepts = curriculum::list_topic_concepts(pool, &topic.id)
            .await
            .map_err(map_sql_err)?;
        let records: HashMap<String, _> = concepts
            .iter()
            .filter_map(|c| by_concept.get(&c.id).map(|r| (c.id.clone(), r.clone())))
            .collect();

        let result = proficiency::compute_topic_proficiency(&concepts, &records);
        if let Some(stats) = &result.stats {
            concepts_started += stats.concepts_started;
            concepts_mastered += stats.concepts_mastered;
        }
        overviews.push(TopicOverview {
            topic_id: topic.id,
            topic_name: topic.name,
            proficiency: result,
        });
    }

    Ok(Json(SuccessResponse {
        success: true,
        data: UserProgressResponse {
            curriculum_id: query.curriculum_id,
            total_xp,
            concepts_started,
            concepts_mastered,
            topics: overviews,
        },
    }))
}

fn map_sql_err(err: sqlx::Error) -> AppError {
    tracing::error!(error = %err, "progress database operation failed");
    json_error(StatusCode::BAD_GATEWAY, "DB_ERROR", "database operation failed")
}
