use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::response::{json_error, AppError};
use crate::services::proficiency::TopicProficiency;
use crate::services::selector::Strategy;
use crate::services::session::{
    self, AnswerResult, CreateSessionInput, CurrentQuestion, QuizSession, SessionError, TimeMode,
};
use crate::state::AppState;

const DEFAULT_QUESTION_COUNT: usize = 10;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct SuccessResponseWithPagination<T, P> {
    success: bool,
    data: T,
    pagination: P,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    curriculum_id: String,
    topic_id: String,
    time_mode: Option<String>,
    strategy: Option<String>,
    question_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerRequest {
    answer: serde_json::Value,
    time_taken_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PauseRequest {
    elapsed_ms: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndRequest {
    completed: bool,
    elapsed_ms: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSessionsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LimitOffsetPagination {
    limit: i64,
    offset: i64,
    total: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionDto {
    id: String,
    curriculum_id: String,
    topic_id: String,
    status: &'static str,
    time_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_limit_ms: Option<i64>,
    strategy: &'static str,
    question_count: usize,
    current_question_index: i64,
    questions_answered: i64,
    questions_correct: i64,
    questions_skipped: i64,
    xp_earned: i64,
    time_elapsed_ms: i64,
    started_at: Option<String>,
    ended_at: Option<String>,
    created_at: String,
}

impl SessionDto {
    fn from_session(session: &QuizSession) -> Self {
        Self {
            id: session.id.clone(),
            curriculum_id: session.curriculum_id.clone(),
            topic_id: session.topic_id.clone(),
            status: session.status.as_str(),
            time_mode: session.time_mode.as_str(),
            time_limit_ms: session.time_limit_ms(),
            strategy: session.strategy.as_str(),
            question_count: session.question_queue.len(),
            current_question_index: session.current_question_index,
            questions_answered: session.questions_answered,
            questions_correct: session.questions_correct,
            questions_skipped: session.questions_skipped,
            xp_earned: session.xp_earned,
            time_elapsed_ms: session.time_elapsed_ms,
            started_at: session.started_at.map(iso),
            ended_at: session.ended_at.map(iso),
            created_at: iso(session.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CurrentQuestionResponse {
    session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    question: Option<CurrentQuestion>,
    queue_exhausted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnswerResponse {
    session: SessionDto,
    result: AnswerResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndSessionResponse {
    session: SessionDto,
    proficiency: TopicProficiency,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/:sessionId", get(get_session))
        .route("/:sessionId/start", post(start_session))
        .route("/:sessionId/question", get(current_question))
        .route("/:sessionId/answer", post(submit_answer))
        .route("/:sessionId/skip", post(skip_question))
        .route("/:sessionId/pause", post(pause_session))
        .route("/:sessionId/resume", post(resume_session))
        .route("/:sessionId/end", post(end_session))
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let time_mode = match payload.time_mode.as_deref() {
        None => TimeMode::Unlimited,
        Some(raw) => TimeMode::parse(raw)
            .ok_or_else(|| AppError::validation(format!("unknown timeMode {raw}")))?,
    };
    let strategy = match payload.strategy.as_deref() {
        None => Strategy::Adaptive,
        Some(raw) => Strategy::parse(raw)
            .ok_or_else(|| AppError::validation(format!("unknown strategy {raw}")))?,
    };

    let session = session::create_session(
        proxy.as_ref(),
        &user.id,
        CreateSessionInput {
            curriculum_id: payload.curriculum_id,
            topic_id: payload.topic_id,
            time_mode,
            strategy,
            question_count: payload.question_count.unwrap_or(DEFAULT_QUESTION_COUNT),
        },
    )
    .await
    .map_err(map_session_err)?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse {
            success: true,
            data: SessionDto::from_session(&session),
        }),
    ))
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListSessionsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let (sessions, total) = session::list_sessions(proxy.as_ref(), &user.id, limit, offset)
        .await
        .map_err(map_session_err)?;

    Ok(Json(SuccessResponseWithPagination {
        success: true,
        data: sessions
            .iter()
            .map(SessionDto::from_session)
            .collect::<Vec<_>>(),
        pagination: LimitOffsetPagination {
            limit,
            offset,
            total,
        },
    }))
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let session = session::get_session(proxy.as_ref(), &user.id, &session_id)
        .await
        .map_err(map_session_err)?;

    Ok(Json(SuccessResponse {
        success: true,
        data: SessionDto::from_session(&session),
    }))
}

async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let session = session::start_session(proxy.as_ref(), &user.id, &session_id)
        .await
        .map_err(map_session_err)?;

    Ok(Json(SuccessResponse {
        success: true,
        data: SessionDto::from_session(&session),
    }))
}

async fn current_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let (session, question) = session::current_question(proxy.as_ref(), &user.id, &session_id)
        .await
        .map_err(map_session_err)?;

    Ok(Json(SuccessResponse {
        success: true,
        data: CurrentQuestionResponse {
            session_id: session.id.clone(),
            queue_exhausted: question.is_none(),
            question,
        },
    }))
}

async fn submit_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<AnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let (session, result) = session::submit_answer(
        proxy.as_ref(),
        &user.id,
        &session_id,
        &payload.answer,
        payload.time_taken_ms,
    )
    .await
    .map_err(map_session_err)?;

    Ok(Json(SuccessResponse {
        success: true,
        data: AnswerResponse {
            session: SessionDto::from_session(&session),
            result,
        },
    }))
}

async fn skip_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let session = session::skip_question(proxy.as_ref(), &user.id, &session_id)
        .await
        .map_err(map_session_err)?;

    Ok(Json(SuccessResponse {
        success: true,
        data: SessionDto::from_session(&session),
    }))
}

async fn pause_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<PauseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let session = session::pause_session(proxy.as_ref(), &user.id, &session_id, payload.elapsed_ms)
        .await
        .map_err(map_session_err)?;

    Ok(Json(SuccessResponse {
        success: true,
        data: SessionDto::from_session(&session),
    }))
}

async fn resume_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let session = session::resume_session(proxy.as_ref(), &user.id, &session_id)
        .await
        .map_err(map_session_err)?;

    Ok(Json(SuccessResponse {
        success: true,
        data: SessionDto::from_session(&session),
    }))
}

async fn end_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<EndRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (proxy, user) = require_user(&state, &headers).await?;

    let (session, proficiency) = session::end_session(
        proxy.as_ref(),
        &user.id,
        &session_id,
        payload.completed,
        payload.elapsed_ms,
    )
    .await
    .map_err(map_session_err)?;

    Ok(Json(SuccessResponse {
        success: true,
        data: EndSessionResponse {
            session: SessionDto::from_session(&session),
            proficiency,
        },
    }))
}

pub(super) async fn require_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<
    (
        std::sync::Arc<crate::db::DatabaseProxy>,
        crate::auth::AuthUser,
    ),
    AppError,
> {
    let token = crate::auth::extract_token(headers)
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "missing token"))?;

    let proxy = state.db_proxy().ok_or_else(|| {
        json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "database unavailable",
        )
    })?;

    let user = crate::auth::verify_request_token(proxy.as_ref(), &token)
        .await
        .map_err(|_| {
            json_error(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "invalid or expired token",
            )
        })?;

    Ok((proxy, user))
}

fn map_session_err(err: SessionError) -> AppError {
    match err {
        SessionError::NotFound => AppError::not_found("session not found"),
        SessionError::TopicNotFound => AppError::not_found("topic not found in curriculum"),
        SessionError::QuestionNotFound => AppError::not_found("question not found"),
        SessionError::ConceptNotFound => AppError::not_found("concept not found in curriculum"),
        SessionError::Forbidden => AppError::forbidden("session belongs to another user"),
        SessionError::InvalidState(status) => AppError::invalid_state(format!(
            "operation not allowed while session is {}",
            status.as_str()
        )),
        SessionError::QueueExhausted => AppError::invalid_state("question queue is exhausted"),
        SessionError::Conflict => AppError::conflict("session was updated concurrently"),
        SessionError::Validation(message) => AppError::validation(message),
        SessionError::Sql(err) => {
            tracing::error!(error = %err, "session database operation failed");
            json_error(StatusCode::BAD_GATEWAY, "DB_ERROR", "database operation failed")
        }
    }
}

fn iso(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
