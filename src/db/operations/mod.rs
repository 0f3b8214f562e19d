pub mod curriculum;
pub mod progress;
pub mod sessions;

/// Row-decoding failure surfaced as a sqlx error.
pub(crate) fn decode_err(detail: impl Into<String>) -> sqlx::Error {
    let detail: String = detail.into();
    sqlx::Error::Decode(detail.into())
}
