//! Property-based tests for the mastery and proficiency invariants:
//! - the rolling window never exceeds its bound
//! - mastered flags and the working difficulty never move backwards
//! - XP per attempt is always a table value
//! - the topic band never decreases as progress accumulates

use std::collections::HashMap;

use chrono::Utc;
use proptest::prelude::*;

use quizdeck_backend_rust::db::operations::curriculum::ConceptRow;
use quizdeck_backend_rust::services::mastery::{
    apply_attempt, ConceptProgress, DifficultyLevel, MASTERY_WINDOW,
};
use quizdeck_backend_rust::services::proficiency::compute_topic_proficiency;

fn arb_difficulty() -> impl Strategy<Value = DifficultyLevel> {
    prop_oneof![
        Just(DifficultyLevel::Familiarity),
        Just(DifficultyLevel::Application),
        Just(DifficultyLevel::ExamStyle),
    ]
}

fn arb_attempts() -> impl Strategy<Value = Vec<(DifficultyLevel, bool)>> {
    prop::collection::vec((arb_difficulty(), any::<bool>()), 0..80)
}

fn concept(id: &str) -> ConceptRow {
    ConceptRow {
        id: id.to_string(),
        topic_id: "t1".to_string(),
        name: id.to_string(),
        position: 0,
        difficulty_levels: DifficultyLevel::ORDER.to_vec(),
    }
}

proptest! {
    #[test]
    fn prop_window_never_exceeds_bound(attempts in arb_attempts()) {
        let mut record = ConceptProgress::new("u1", "c1", "concept");
        for (difficulty, is_correct) in attempts {
            apply_attempt(&mut record, difficulty, is_correct, Utc::now());
            for level in DifficultyLevel::ORDER {
                prop_assert!(
                    record.mastery_by_difficulty.bucket(level).recent_attempts.len()
                        <= MASTERY_WINDOW
                );
            }
        }
    }

    #[test]
    fn prop_mastery_and_difficulty_never_regress(attempts in arb_attempts()) {
        let mut record = ConceptProgress::new("u1", "c1", "concept");
        let mut seen_mastered = [false; 3];
        let mut last_difficulty = record.current_difficulty;

        for (difficulty, is_correct) in attempts {
            apply_attempt(&mut record, difficulty, is_correct, Utc::now());

            for (idx, level) in DifficultyLevel::ORDER.iter().enumerate() {
                let mastered = record.mastery_by_difficulty.bucket(*level).mastered;
                prop_assert!(!(seen_mastered[idx] && !mastered));
                seen_mastered[idx] = mastered;
            }

            prop_assert!(record.current_difficulty >= last_difficulty);
            last_difficulty = record.current_difficulty;
        }
    }

    #[test]
    fn prop_xp_is_always_a_table_value(attempts in arb_attempts()) {
        let mut record = ConceptProgress::new("u1", "c1", "concept");
        for (difficulty, is_correct) in attempts {
            let outcome = apply_attempt(&mut record, difficulty, is_correct, Utc::now());
            if is_correct {
                prop_assert_eq!(outcome.xp_earned, difficulty.xp());
            } else {
                prop_assert_eq!(outcome.xp_earned, 0);
            }
        }
    }

    #[test]
    fn prop_counters_are_monotonic(attempts in arb_attempts()) {
        let mut record = ConceptProgress::new("u1", "c1", "concept");
        let mut last = (0i64, 0i64, 0i64);
        for (difficulty, is_correct) in attempts {
            apply_attempt(&mut record, difficulty, is_correct, Utc::now());
            let next = (record.total_attempts, record.total_correct, record.xp_earned);
            prop_assert!(next.0 > last.0);
            prop_assert!(next.1 >= last.1);
            prop_assert!(next.2 >= last.2);
            last = next;
        }
    }

    #[test]
    fn prop_band_never_decreases(
        attempts in prop::collection::vec(
            ((0usize..3), arb_difficulty(), any::<bool>()),
            0..120,
        )
    ) {
        let concepts = vec![concept("a"), concept("b"), concept("c")];
        let mut records: HashMap<String, ConceptProgress> = HashMap::new();

        let mut last_level = compute_topic_proficiency(&concepts, &records).level;
        for (concept_idx, difficulty, is_correct) in attempts {
            let concept_id = concepts[concept_idx].id.clone();
            let record = records
                .entry(concept_id.clone())
                .or_insert_with(|| ConceptProgress::new("u1", "cur", &concept_id));
            apply_attempt(record, difficulty, is_correct, Utc::now());

            let level = compute_topic_proficiency(&concepts, &records).level;
            prop_assert!(level >= last_level);
            last_level = level;
        }
    }
}
