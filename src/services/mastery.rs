//! Concept mastery tracking
//!
//! Each (user, curriculum, concept) triple owns one progress record with a
//! per-difficulty rolling accuracy window. A difficulty is mastered the first
//! time its window holds 5 attempts with at least 4 correct; mastery is a
//! latch and never clears. Mastering a difficulty advances the concept's
//! working difficulty one step along the fixed order.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};

use crate::db::operations::{curriculum, progress};

pub const MASTERY_WINDOW: usize = 5;
pub const MASTERY_REQUIRED_CORRECT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Familiarity,
    Application,
    ExamStyle,
}

impl DifficultyLevel {
    pub const ORDER: [DifficultyLevel; 3] = [
        DifficultyLevel::Familiarity,
        DifficultyLevel::Application,
        DifficultyLevel::ExamStyle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DifficultyLevel::Familiarity => "familiarity",
            DifficultyLevel::Application => "application",
            DifficultyLevel::ExamStyle => "exam_style",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "familiarity" => Some(DifficultyLevel::Familiarity),
            "application" => Some(DifficultyLevel::Application),
            "exam_style" => Some(DifficultyLevel::ExamStyle),
            _ => None,
        }
    }

    pub fn next(self) -> Option<Self> {
        let idx = self.index();
        Self::ORDER.get(idx + 1).copied()
    }

    /// Distance along the fixed order, used for selection weighting.
    pub fn distance(self, other: Self) -> usize {
        self.index().abs_diff(other.index())
    }

    /// XP awarded for a correct answer at this difficulty.
    pub fn xp(self) -> i64 {
        match self {
            DifficultyLevel::Familiarity => 10,
            DifficultyLevel::Application => 20,
            DifficultyLevel::ExamStyle => 30,
        }
    }

    fn index(self) -> usize {
        match self {
            DifficultyLevel::Familiarity => 0,
            DifficultyLevel::Application => 1,
            DifficultyLevel::ExamStyle => 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyProgress {
    pub attempts: i64,
    pub correct: i64,
    pub streak: i64,
    pub mastered: bool,
    pub mastered_at: Option<DateTime<Utc>>,
    /// Bounded FIFO of recent results, most recent last.
    pub recent_attempts: VecDeque<bool>,
}

impl DifficultyProgress {
    pub fn started(&self) -> bool {
        self.attempts > 0
    }

    fn window_correct(&self) -> usize {
        self.recent_attempts.iter().filter(|c| **c).count()
    }
}

/// All three buckets are always present, whether or not the concept's
/// catalogue entry declares the level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryByDifficulty {
    pub familiarity: DifficultyProgress,
    pub application: DifficultyProgress,
    pub exam_style: DifficultyProgress,
}

impl MasteryByDifficulty {
    pub fn bucket(&self, level: DifficultyLevel) -> &DifficultyProgress {
        match level {
            DifficultyLevel::Familiarity => &self.familiarity,
            DifficultyLevel::Application => &self.application,
            DifficultyLevel::ExamStyle => &self.exam_style,
        }
    }

    pub fn bucket_mut(&mut self, level: DifficultyLevel) -> &mut DifficultyProgress {
        match level {
            DifficultyLevel::Familiarity => &mut self.familiarity,
            DifficultyLevel::Application => &mut self.application,
            DifficultyLevel::ExamStyle => &mut self.exam_style,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptProgress {
    pub id: String,
    pub user_id: String,
    pub curriculum_id: String,
    pub concept_id: String,
    pub current_difficulty: DifficultyLevel,
    pub total_attempts: i64,
    pub total_correct: i64,
    pub xp_earned: i64,
    pub mastery_by_difficulty: MasteryByDifficulty,
    pub last_attempted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub version: i64,
}

impl ConceptProgress {
    /// Fresh record for a concept attempted for the first time.
    pub fn new(user_id: &str, curriculum_id: &str, concept_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            curriculum_id: curriculum_id.to_string(),
            concept_id: concept_id.to_string(),
            current_difficulty: DifficultyLevel::Familiarity,
            total_attempts: 0,
            total_correct: 0,
            xp_earned: 0,
            mastery_by_difficulty: MasteryByDifficulty::default(),
            last_attempted_at: None,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    pub xp_earned: i64,
    /// True only when this attempt flipped the bucket to mastered.
    pub mastery_achieved: bool,
    pub new_difficulty: DifficultyLevel,
}

#[derive(Debug, thiserror::Error)]
pub enum MasteryError {
    #[error("concept not found in curriculum")]
    ConceptNotFound,
    #[error("concurrent progress update lost")]
    Conflict,
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Apply one graded attempt to the progress record in memory.
pub fn apply_attempt(
    record: &mut ConceptProgress,
    difficulty: DifficultyLevel,
    is_correct: bool,
    now: DateTime<Utc>,
) -> AttemptOutcome {
    record.total_attempts += 1;
    if is_correct {
        record.total_correct += 1;
    }
    record.last_attempted_at = Some(now);

    let bucket = record.mastery_by_difficulty.bucket_mut(difficulty);
    bucket.attempts += 1;
    if is_correct {
        bucket.correct += 1;
        bucket.streak += 1;
    } else {
        bucket.streak = 0;
    }

    bucket.recent_attempts.push_back(is_correct);
    while bucket.recent_attempts.len() > MASTERY_WINDOW {
        bucket.recent_attempts.pop_front();
    }

    // Already-mastered buckets are never re-evaluated.
    let mut mastery_achieved = false;
    if !bucket.mastered
        && bucket.recent_attempts.len() == MASTERY_WINDOW
        && bucket.window_correct() >= MASTERY_REQUIRED_CORRECT
    {
        bucket.mastered = true;
        bucket.mastered_at = Some(now);
        mastery_achieved = true;
    }

    if mastery_achieved {
        if let Some(next) = record.current_difficulty.next() {
            record.current_difficulty = next;
        }
    }

    let xp = if is_correct { difficulty.xp() } else { 0 };
    record.xp_earned += xp;

    AttemptOutcome {
        xp_earned: xp,
        mastery_achieved,
        new_difficulty: record.current_difficulty,
    }
}

#[derive(Debug, Clone)]
pub struct RecordAttemptInput<'a> {
    pub user_id: &'a str,
    pub curriculum_id: &'a str,
    pub concept_id: &'a str,
    pub question_id: &'a str,
    pub session_id: Option<&'a str>,
    pub question_difficulty: DifficultyLevel,
    pub is_correct: bool,
    pub time_taken_ms: Option<i64>,
}

/// Record one attempt inside the caller's transaction: fetch or lazily create
/// the progress row, apply the attempt, save with a version check, and append
/// the audit record. Nothing is persisted if any step fails.
pub async fn record_attempt(
    tx: &mut Transaction<'_, Postgres>,
    input: RecordAttemptInput<'_>,
) -> Result<(AttemptOutcome, ConceptProgress), MasteryError> {
    let known =
        curriculum::concept_in_curriculum(&mut **tx, input.curriculum_id, input.concept_id).await?;
    if !known {
        return Err(MasteryError::ConceptNotFound);
    }

    let existing = progress::get_concept_progress(
        &mut **tx,
        input.user_id,
        input.curriculum_id,
        input.concept_id,
    )
    .await?;

    let now = Utc::now();
    let (mut record, is_new) = match existing {
        Some(record) => (record, false),
        None => (
            ConceptProgress::new(input.user_id, input.curriculum_id, input.concept_id),
            true,
        ),
    };

    let outcome = apply_attempt(
        &mut record,
        input.question_difficulty,
        input.is_correct,
        now,
    );

    if is_new {
        progress::insert_concept_progress(&mut **tx, &record).await?;
    } else {
        let saved = progress::update_concept_progress(&mut **tx, &record).await?;
        if !saved {
            return Err(MasteryError::Conflict);
        }
        record.version += 1;
    }

    progress::insert_attempt_record(
        &mut **tx,
        &progress::NewAttemptRecord {
            user_id: input.user_id,
            curriculum_id: input.curriculum_id,
            concept_id: input.concept_id,
            question_id: input.question_id,
            session_id: input.session_id,
            difficulty: input.question_difficulty,
            is_correct: input.is_correct,
            time_taken_ms: input.time_taken_ms,
            xp_earned: outcome.xp_earned,
        },
    )
    .await?;

    tracing::debug!(
        user_id = input.user_id,
        concept_id = input.concept_id,
        difficulty = input.question_difficulty.as_str(),
        is_correct = input.is_correct,
        mastery_achieved = outcome.mastery_achieved,
        "attempt recorded"
    );

    Ok((outcome, record))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> ConceptProgress {
        ConceptProgress::new("u1", "c1", "concept-1")
    }

    fn attempt(record: &mut ConceptProgress, level: DifficultyLevel, correct: bool) -> AttemptOutcome {
        apply_attempt(record, level, correct, Utc::now())
    }

    #[test]
    fn test_xp_table() {
        let mut record = fresh();
        assert_eq!(
            attempt(&mut record, DifficultyLevel::Familiarity, true).xp_earned,
            10
        );
        assert_eq!(
            attempt(&mut record, DifficultyLevel::Application, true).xp_earned,
            20
        );
        assert_eq!(
            attempt(&mut record, DifficultyLevel::ExamStyle, true).xp_earned,
            30
        );
        assert_eq!(
            attempt(&mut record, DifficultyLevel::ExamStyle, false).xp_earned,
            0
        );
    }

    #[test]
    fn test_window_never_exceeds_five() {
        let mut record = fresh();
        for i in 0..20 {
            attempt(&mut record, DifficultyLevel::Familiarity, i % 3 == 0);
            assert!(
                record
                    .mastery_by_difficulty
                    .familiarity
                    .recent_attempts
                    .len()
                    <= MASTERY_WINDOW
            );
        }
    }

    #[test]
    fn test_mastery_triggers_on_fifth_attempt() {
        let mut record = fresh();
        for _ in 0..4 {
            let outcome = attempt(&mut record, DifficultyLevel::Familiarity, true);
            assert!(!outcome.mastery_achieved);
        }
        let outcome = attempt(&mut record, DifficultyLevel::Familiarity, true);
        assert!(outcome.mastery_achieved);
        assert!(record.mastery_by_difficulty.familiarity.mastered);
        assert!(record.mastery_by_difficulty.familiarity.mastered_at.is_some());
    }

    #[test]
    fn test_four_of_five_is_enough() {
        let mut record = fresh();
        let pattern = [true, false, true, true, true];
        let mut achieved = false;
        for correct in pattern {
            achieved = attempt(&mut record, DifficultyLevel::Application, correct).mastery_achieved;
        }
        assert!(achieved);
    }

    #[test]
    fn test_three_of_five_is_not_enough() {
        let mut record = fresh();
        for correct in [true, false, true, false, true] {
            let outcome = attempt(&mut record, DifficultyLevel::Familiarity, correct);
            assert!(!outcome.mastery_achieved);
        }
        assert!(!record.mastery_by_difficulty.familiarity.mastered);
    }

    #[test]
    fn test_mastery_is_a_latch() {
        let mut record = fresh();
        for _ in 0..5 {
            attempt(&mut record, DifficultyLevel::Familiarity, true);
        }
        assert!(record.mastery_by_difficulty.familiarity.mastered);
        let mastered_at = record.mastery_by_difficulty.familiarity.mastered_at;

        // A run of failures afterwards never clears the latch.
        for _ in 0..10 {
            let outcome = attempt(&mut record, DifficultyLevel::Familiarity, false);
            assert!(!outcome.mastery_achieved);
        }
        assert!(record.mastery_by_difficulty.familiarity.mastered);
        assert_eq!(record.mastery_by_difficulty.familiarity.mastered_at, mastered_at);
    }

    #[test]
    fn test_streak_resets_on_incorrect() {
        let mut record = fresh();
        attempt(&mut record, DifficultyLevel::Familiarity, true);
        attempt(&mut record, DifficultyLevel::Familiarity, true);
        assert_eq!(record.mastery_by_difficulty.familiarity.streak, 2);
        attempt(&mut record, DifficultyLevel::Familiarity, false);
        assert_eq!(record.mastery_by_difficulty.familiarity.streak, 0);
    }

    #[test]
    fn test_advancement_on_mastery() {
        let mut record = fresh();
        for _ in 0..5 {
            attempt(&mut record, DifficultyLevel::Familiarity, true);
        }
        assert_eq!(record.current_difficulty, DifficultyLevel::Application);

        for _ in 0..5 {
            attempt(&mut record, DifficultyLevel::Application, true);
        }
        assert_eq!(record.current_difficulty, DifficultyLevel::ExamStyle);

        // Stays at the top of the order.
        for _ in 0..5 {
            attempt(&mut record, DifficultyLevel::ExamStyle, true);
        }
        assert_eq!(record.current_difficulty, DifficultyLevel::ExamStyle);
    }

    #[test]
    fn test_difficulty_never_moves_backward() {
        let mut record = fresh();
        for _ in 0..5 {
            attempt(&mut record, DifficultyLevel::Familiarity, true);
        }
        let advanced = record.current_difficulty;
        for _ in 0..10 {
            attempt(&mut record, DifficultyLevel::Familiarity, false);
            assert!(record.current_difficulty >= advanced);
        }
    }

    #[test]
    fn test_counters_are_monotonic() {
        let mut record = fresh();
        let mut last = (0, 0, 0);
        for i in 0..30 {
            attempt(&mut record, DifficultyLevel::Application, i % 2 == 0);
            let next = (record.total_attempts, record.total_correct, record.xp_earned);
            assert!(next.0 > last.0);
            assert!(next.1 >= last.1);
            assert!(next.2 >= last.2);
            last = next;
        }
    }
}
