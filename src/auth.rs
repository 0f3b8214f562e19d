//! Request authentication. Token issuance lives in the account service; this
//! side only verifies: the presented token is hashed and looked up in the
//! `sessions` table with its expiry.

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;
use thiserror::Error;

use crate::db::DatabaseProxy;

const AUTH_COOKIE_NAME: &str = "auth_token";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub username: String,
    pub role: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("database error: {0}")]
    Database(String),
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = get_cookie(headers, AUTH_COOKIE_NAME) {
        return Some(token);
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;

    auth_header
        .strip_prefix("Bearer ")
        .map(|value| value.to_string())
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn verify_request_token(
    proxy: &DatabaseProxy,
    token: &str,
) -> Result<AuthUser, AuthError> {
    let token_hash = hash_token(token);

    let row = sqlx::query(
        r#"
        SELECT u."id", u."email", u."username", u."role", s."expiresAt"
        FROM "sessions" s
        JOIN "users" u ON u."id" = s."userId"
        WHERE s."token" = $1
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(proxy.pool())
    .await
    .map_err(|err| AuthError::Database(err.to_string()))?;

    let Some(row) = row else {
        return Err(AuthError::InvalidToken);
    };

    let expires_at: DateTime<Utc> = row
        .try_get("expiresAt")
        .map_err(|err| AuthError::Database(err.to_string()))?;
    if expires_at <= Utc::now() {
        return Err(AuthError::InvalidToken);
    }

    Ok(AuthUser {
        id: row
            .try_get("id")
            .map_err(|err| AuthError::Database(err.to_string()))?,
        email: row
            .try_get("email")
            .map_err(|err| AuthError::Database(err.to_string()))?,
        username: row
            .try_get("username")
            .map_err(|err| AuthError::Database(err.to_string()))?,
        role: row
            .try_get("role")
            .map_err(|err| AuthError::Database(err.to_string()))?,
    })
}

fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        if key == name {
            return parts.next().map(|value| value.trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(extract_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_cookie_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth_token=cookie-token"),
        );
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );
        assert_eq!(extract_token(&headers), Some("cookie-token".to_string()));
    }

    #[test]
    fn test_missing_token() {
        assert_eq!(extract_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(hash_token("abc").len(), 64);
    }
}
