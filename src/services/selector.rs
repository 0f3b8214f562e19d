//! Question queue building
//!
//! Turns a topic's question pool into the fixed, ordered queue a session
//! works through. Four strategies: sequential (catalogue order), random
//! (uniform shuffle), adaptive (weight mass on each concept's working
//! difficulty, weaker concepts drawn more often), review (only concepts with
//! a recorded mistake). The queue never changes once built; progress made
//! mid-session influences the next session's selection, not this one's.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::db::operations::curriculum::{ConceptRow, QuestionRow};
use crate::services::mastery::{ConceptProgress, DifficultyLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sequential,
    Random,
    Adaptive,
    Review,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Random => "random",
            Strategy::Adaptive => "adaptive",
            Strategy::Review => "review",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sequential" => Some(Strategy::Sequential),
            "random" => Some(Strategy::Random),
            "adaptive" => Some(Strategy::Adaptive),
            "review" => Some(Strategy::Review),
            _ => None,
        }
    }
}

/// One queue entry. Only references; question content is looked up when the
/// session serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRef {
    pub question_id: String,
    pub concept_id: String,
    pub difficulty: DifficultyLevel,
}

impl QuestionRef {
    fn from_question(question: &QuestionRow) -> Self {
        Self {
            question_id: question.id.clone(),
            concept_id: question.concept_id.clone(),
            difficulty: question.difficulty,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("question pool holds {available} questions, {requested} requested")]
    InsufficientQuestions { requested: usize, available: usize },
}

// Affinity of a question's difficulty to the concept's working difficulty.
// Mastered material keeps a small review presence instead of vanishing.
const AFFINITY_CURRENT: f64 = 1.0;
const AFFINITY_ADJACENT: f64 = 0.25;
const AFFINITY_FAR: f64 = 0.05;

fn difficulty_affinity(current: DifficultyLevel, question: DifficultyLevel) -> f64 {
    match current.distance(question) {
        0 => AFFINITY_CURRENT,
        1 => AFFINITY_ADJACENT,
        _ => AFFINITY_FAR,
    }
}

// Concepts with fewer mastered levels weigh more, so weaker concepts receive
// more questions. An untouched concept carries the maximum weight.
fn concept_weakness(concept: &ConceptRow, record: Option<&ConceptProgress>) -> f64 {
    let supported = concept.difficulty_levels.len();
    let mastered = record
        .map(|r| {
            concept
                .difficulty_levels
                .iter()
                .filter(|level| r.mastery_by_difficulty.bucket(**level).mastered)
                .count()
        })
        .unwrap_or(0);
    (supported - mastered + 1) as f64
}

fn current_difficulty(record: Option<&ConceptProgress>) -> DifficultyLevel {
    record
        .map(|r| r.current_difficulty)
        .unwrap_or(DifficultyLevel::Familiarity)
}

/// Weighted sample of `count` distinct questions (Efraimidis-Spirakis keys:
/// each candidate gets key u^(1/w), the top keys win).
fn weighted_sample(
    candidates: Vec<(QuestionRef, f64)>,
    count: usize,
    rng: &mut impl Rng,
) -> Vec<QuestionRef> {
    let mut keyed: Vec<(f64, QuestionRef)> = candidates
        .into_iter()
        .map(|(question, weight)| {
            let u: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
            (u.powf(1.0 / weight.max(f64::MIN_POSITIVE)), question)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    keyed
        .into_iter()
        .take(count)
        .map(|(_, question)| question)
        .collect()
}

/// Build a session queue of exactly `question_count` refs.
///
/// The concept list must come in catalogue order; `progress_by_concept` is
/// keyed by concept id and may be sparse. Fails with `InsufficientQuestions`
/// when the strategy's eligible pool is smaller than the requested count;
/// callers cap the count to the pool size rather than surfacing the error.
pub fn build_queue(
    concepts: &[ConceptRow],
    pool: &[QuestionRow],
    strategy: Strategy,
    question_count: usize,
    progress_by_concept: &HashMap<String, ConceptProgress>,
    rng: &mut impl Rng,
) -> Result<Vec<QuestionRef>, SelectorError> {
    match strategy {
        Strategy::Sequential => {
            if pool.len() < question_count {
                return Err(SelectorError::InsufficientQuestions {
                    requested: question_count,
                    available: pool.len(),
                });
            }

            let mut queue = Vec::with_capacity(question_count);
            'outer: for concept in concepts {
                for level in &concept.difficulty_levels {
                    let mut questions: Vec<&QuestionRow> = pool
                        .iter()
                        .filter(|q| q.concept_id == concept.id && q.difficulty == *level)
                        .collect();
                    questions.sort_by_key(|q| q.position);
                    for question in questions {
                        queue.push(QuestionRef::from_question(question));
                        if queue.len() == question_count {
                            break 'outer;
                        }
                    }
                }
            }
            Ok(queue)
        }
        Strategy::Random => {
            if pool.len() < question_count {
                return Err(SelectorError::InsufficientQuestions {
                    requested: question_count,
                    available: pool.len(),
                });
            }

            let mut refs: Vec<QuestionRef> = pool.iter().map(QuestionRef::from_question).collect();
            refs.shuffle(rng);
            refs.truncate(question_count);
            Ok(refs)
        }
        Strategy::Adaptive => {
            if pool.len() < question_count {
                return Err(SelectorError::InsufficientQuestions {
                    requested: question_count,
                    available: pool.len(),
                });
            }

            let concepts_by_id: HashMap<&str, &ConceptRow> =
                concepts.iter().map(|c| (c.id.as_str(), c)).collect();
            let candidates: Vec<(QuestionRef, f64)> = pool
                .iter()
                .filter_map(|question| {
                    let concept = concepts_by_id.get(question.concept_id.as_str())?;
                    let record = progress_by_concept.get(&question.concept_id);
                    let weight = concept_weakness(concept, record)
                        * difficulty_affinity(current_difficulty(record), question.difficulty);
                    Some((QuestionRef::from_question(question), weight))
                })
                .collect();
            Ok(weighted_sample(candidates, question_count, rng))
        }
        Strategy::Review => {
            let needs_review: Vec<&QuestionRow> = pool
                .iter()
                .filter(|question| {
                    progress_by_concept
                        .get(&question.concept_id)
                        .map(|r| r.total_attempts > r.total_correct)
                        .unwrap_or(false)
                })
                .collect();
            if needs_review.len() < question_count {
                return Err(SelectorError::InsufficientQuestions {
                    requested: question_count,
                    available: needs_review.len(),
                });
            }

            let candidates: Vec<(QuestionRef, f64)> = needs_review
                .into_iter()
                .map(|question| {
                    let record = progress_by_concept.get(&question.concept_id);
                    let weight =
                        difficulty_affinity(current_difficulty(record), question.difficulty);
                    (QuestionRef::from_question(question), weight)
                })
                .collect();
            Ok(weighted_sample(candidates, question_count, rng))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mastery::apply_attempt;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn concept(id: &str, position: i32) -> ConceptRow {
        ConceptRow {
            id: id.to_string(),
            topic_id: "t1".to_string(),
            name: id.to_string(),
            position,
            difficulty_levels: DifficultyLevel::ORDER.to_vec(),
        }
    }

    fn question(id: &str, concept_id: &str, difficulty: DifficultyLevel, position: i32) -> QuestionRow {
        QuestionRow {
            id: id.to_string(),
            concept_id: concept_id.to_string(),
            difficulty,
            question_type: crate::services::grading::QuestionType::Mcq,
            prompt: format!("prompt {id}"),
            options: serde_json::json!([]),
            correct_answer: serde_json::json!("a"),
            position,
        }
    }

    fn fixture() -> (Vec<ConceptRow>, Vec<QuestionRow>) {
        let concepts = vec![concept("alpha", 0), concept("beta", 1)];
        let mut pool = Vec::new();
        for concept_id in ["alpha", "beta"] {
            for (li, level) in DifficultyLevel::ORDER.iter().enumerate() {
                for qi in 0..3 {
                    pool.push(question(
                        &format!("{concept_id}-{li}-{qi}"),
                        concept_id,
                        *level,
                        qi,
                    ));
                }
            }
        }
        (concepts, pool)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_sequential_follows_catalogue_order() {
        let (concepts, pool) = fixture();
        let queue = build_queue(
            &concepts,
            &pool,
            Strategy::Sequential,
            5,
            &HashMap::new(),
            &mut rng(),
        )
        .unwrap();

        let ids: Vec<&str> = queue.iter().map(|r| r.question_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["alpha-0-0", "alpha-0-1", "alpha-0-2", "alpha-1-0", "alpha-1-1"]
        );
    }

    #[test]
    fn test_random_draws_from_pool_without_repeats() {
        let (concepts, pool) = fixture();
        let queue = build_queue(
            &concepts,
            &pool,
            Strategy::Random,
            10,
            &HashMap::new(),
            &mut rng(),
        )
        .unwrap();

        assert_eq!(queue.len(), 10);
        let mut ids: Vec<&str> = queue.iter().map(|r| r.question_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_insufficient_pool_is_an_error() {
        let (concepts, pool) = fixture();
        let result = build_queue(
            &concepts,
            &pool,
            Strategy::Random,
            pool.len() + 1,
            &HashMap::new(),
            &mut rng(),
        );
        assert!(matches!(
            result,
            Err(SelectorError::InsufficientQuestions { available, .. }) if available == pool.len()
        ));
    }

    #[test]
    fn test_adaptive_prefers_weak_concepts_at_their_level() {
        let (concepts, pool) = fixture();

        // alpha fully mastered, beta untouched.
        let mut mastered = ConceptProgress::new("u1", "c1", "alpha");
        for level in DifficultyLevel::ORDER {
            for _ in 0..5 {
                apply_attempt(&mut mastered, level, true, Utc::now());
            }
        }
        let mut records = HashMap::new();
        records.insert("alpha".to_string(), mastered);

        let mut beta_hits = 0;
        let mut familiarity_beta_hits = 0;
        let mut seeded = rng();
        for _ in 0..50 {
            let queue = build_queue(&concepts, &pool, Strategy::Adaptive, 6, &records, &mut seeded)
                .unwrap();
            for item in &queue {
                if item.concept_id == "beta" {
                    beta_hits += 1;
                    if item.difficulty == DifficultyLevel::Familiarity {
                        familiarity_beta_hits += 1;
                    }
                }
            }
        }

        // Weak concept dominates the draw, concentrated on its working level.
        assert!(beta_hits > 150);
        assert!(familiarity_beta_hits > beta_hits / 3);
    }

    #[test]
    fn test_adaptive_keeps_mastered_material_in_light_review() {
        let (concepts, pool) = fixture();
        let mut records = HashMap::new();
        for concept_id in ["alpha", "beta"] {
            let mut record = ConceptProgress::new("u1", "c1", concept_id);
            for level in DifficultyLevel::ORDER {
                for _ in 0..5 {
                    apply_attempt(&mut record, level, true, Utc::now());
                }
            }
            records.insert(concept_id.to_string(), record);
        }

        let mut seeded = rng();
        let mut non_exam = 0;
        for _ in 0..50 {
            let queue =
                build_queue(&concepts, &pool, Strategy::Adaptive, 6, &records, &mut seeded).unwrap();
            non_exam += queue
                .iter()
                .filter(|r| r.difficulty != DifficultyLevel::ExamStyle)
                .count();
        }
        assert!(non_exam > 0);
    }

    #[test]
    fn test_review_restricts_to_concepts_with_mistakes() {
        let (concepts, pool) = fixture();

        let mut missed = ConceptProgress::new("u1", "c1", "beta");
        apply_attempt(&mut missed, DifficultyLevel::Familiarity, false, Utc::now());
        let mut clean = ConceptProgress::new("u1", "c1", "alpha");
        apply_attempt(&mut clean, DifficultyLevel::Familiarity, true, Utc::now());

        let mut records = HashMap::new();
        records.insert("beta".to_string(), missed);
        records.insert("alpha".to_string(), clean);

        let queue = build_queue(&concepts, &pool, Strategy::Review, 4, &records, &mut rng())
            .unwrap();
        assert_eq!(queue.len(), 4);
        assert!(queue.iter().all(|r| r.concept_id == "beta"));
    }

    #[test]
    fn test_review_with_no_mistakes_reports_empty_pool() {
        let (concepts, pool) = fixture();
        let result = build_queue(
            &concepts,
            &pool,
            Strategy::Review,
            4,
            &HashMap::new(),
            &mut rng(),
        );
        assert!(matches!(
            result,
            Err(SelectorError::InsufficientQuestions { available: 0, .. })
        ));
    }
}
