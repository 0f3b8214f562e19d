//! Answer grading
//!
//! Exact-match semantics per question type. Normalization choices:
//! fill-in-the-blank compares trimmed, lowercased strings; ordering compares
//! trimmed elements in order; matching compares trimmed (left, right) pairs
//! without regard to pair order. Option ids and booleans compare verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Mcq,
    TrueFalse,
    FillBlank,
    Ordering,
    Match,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Mcq => "mcq",
            QuestionType::TrueFalse => "true_false",
            QuestionType::FillBlank => "fill_blank",
            QuestionType::Ordering => "ordering",
            QuestionType::Match => "match",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mcq" => Some(QuestionType::Mcq),
            "true_false" => Some(QuestionType::TrueFalse),
            "fill_blank" => Some(QuestionType::FillBlank),
            "ordering" => Some(QuestionType::Ordering),
            "match" => Some(QuestionType::Match),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    #[error("answer does not match question type {expected}: {detail}")]
    Shape {
        expected: &'static str,
        detail: String,
    },
}

impl GradingError {
    fn shape(question_type: QuestionType, detail: impl Into<String>) -> Self {
        GradingError::Shape {
            expected: question_type.as_str(),
            detail: detail.into(),
        }
    }
}

fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

fn as_str(
    value: &Value,
    question_type: QuestionType,
    what: &str,
) -> Result<String, GradingError> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| GradingError::shape(question_type, format!("{what} must be a string")))
}

fn as_bool(value: &Value, question_type: QuestionType, what: &str) -> Result<bool, GradingError> {
    value
        .as_bool()
        .ok_or_else(|| GradingError::shape(question_type, format!("{what} must be a boolean")))
}

fn as_str_array(
    value: &Value,
    question_type: QuestionType,
    what: &str,
) -> Result<Vec<String>, GradingError> {
    let items = value
        .as_array()
        .ok_or_else(|| GradingError::shape(question_type, format!("{what} must be an array")))?;
    items
        .iter()
        .map(|item| as_str(item, question_type, what))
        .collect()
}

fn as_pairing(
    value: &Value,
    question_type: QuestionType,
    what: &str,
) -> Result<BTreeMap<String, String>, GradingError> {
    let object = value
        .as_object()
        .ok_or_else(|| GradingError::shape(question_type, format!("{what} must be an object")))?;

    let mut pairs = BTreeMap::new();
    for (key, val) in object {
        let left = key.trim().to_string();
        let right = as_str(val, question_type, what)?.trim().to_string();
        if pairs.insert(left, right).is_some() {
            return Err(GradingError::shape(
                question_type,
                format!("{what} has duplicate keys after trimming"),
            ));
        }
    }
    Ok(pairs)
}

/// Grade a submitted answer against the canonical one.
pub fn grade(
    question_type: QuestionType,
    correct: &Value,
    given: &Value,
) -> Result<bool, GradingError> {
    match question_type {
        QuestionType::Mcq => {
            let expected = as_str(correct, question_type, "canonical answer")?;
            let actual = as_str(given, question_type, "answer")?;
            Ok(expected == actual)
        }
        QuestionType::TrueFalse => {
            let expected = as_bool(correct, question_type, "canonical answer")?;
            let actual = as_bool(given, question_type, "answer")?;
            Ok(expected == actual)
        }
        QuestionType::FillBlank => {
            let expected = as_str(correct, question_type, "canonical answer")?;
            let actual = as_str(given, question_type, "answer")?;
            Ok(normalize_text(&expected) == normalize_text(&actual))
        }
        QuestionType::Ordering => {
            let expected = as_str_array(correct, question_type, "canonical answer")?;
            let actual = as_str_array(given, question_type, "answer")?;
            Ok(expected.len() == actual.len()
                && expected
                    .iter()
                    .zip(actual.iter())
                    .all(|(a, b)| a.trim() == b.trim()))
        }
        QuestionType::Match => {
            let expected = as_pairing(correct, question_type, "canonical answer")?;
            let actual = as_pairing(given, question_type, "answer")?;
            Ok(expected == actual)
        }
    }
}
