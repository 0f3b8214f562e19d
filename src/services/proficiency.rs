//! Topic proficiency banding
//!
//! Rolls a topic's concept-mastery records up into one of five child-facing
//! bands. The band is a label, never a score: the numbers below feed the
//! decision and the dashboard aggregates, but the band object itself carries
//! only its ordinal and fixed copy.
//!
//! Pure and idempotent; the caller recomputes after every attempt in the
//! topic rather than persisting the result authoritatively.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::operations::curriculum::ConceptRow;
use crate::services::mastery::{ConceptProgress, DifficultyLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProficiencyBand {
    NotStarted,
    BuildingFamiliarity,
    GrowingConfidence,
    ConsistentUnderstanding,
    ExamReady,
}

impl ProficiencyBand {
    pub fn level(self) -> u8 {
        match self {
            ProficiencyBand::NotStarted => 0,
            ProficiencyBand::BuildingFamiliarity => 1,
            ProficiencyBand::GrowingConfidence => 2,
            ProficiencyBand::ConsistentUnderstanding => 3,
            ProficiencyBand::ExamReady => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProficiencyBand::NotStarted => "Not started yet",
            ProficiencyBand::BuildingFamiliarity => "Building familiarity",
            ProficiencyBand::GrowingConfidence => "Growing confidence",
            ProficiencyBand::ConsistentUnderstanding => "Consistent understanding",
            ProficiencyBand::ExamReady => "Exam ready",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ProficiencyBand::NotStarted => "Jump in whenever you're ready!",
            ProficiencyBand::BuildingFamiliarity => {
                "You're getting to know this topic. Keep exploring!"
            }
            ProficiencyBand::GrowingConfidence => {
                "Nice progress! The ideas are starting to stick."
            }
            ProficiencyBand::ConsistentUnderstanding => {
                "You understand this topic well. Time to stretch yourself!"
            }
            ProficiencyBand::ExamReady => "Fantastic! You're ready for anything on this topic.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStats {
    pub concepts_total: usize,
    pub concepts_started: usize,
    pub concepts_mastered: usize,
    pub familiarity_mastered_pct: u32,
    pub application_mastered_pct: u32,
    pub application_started_pct: u32,
    pub exam_style_mastered_pct: u32,
    pub exam_style_started_pct: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicProficiency {
    pub band: ProficiencyBand,
    pub level: u8,
    pub label: &'static str,
    pub message: &'static str,
    pub stats: Option<TopicStats>,
}

impl TopicProficiency {
    fn from_band(band: ProficiencyBand, stats: Option<TopicStats>) -> Self {
        Self {
            band,
            level: band.level(),
            label: band.label(),
            message: band.message(),
            stats,
        }
    }
}

fn pct(numerator: usize, denominator: usize) -> u32 {
    if denominator == 0 {
        return 0;
    }
    (100.0 * numerator as f64 / denominator as f64).round() as u32
}

/// Compute the topic band from the catalogue's concepts and whatever progress
/// records exist for them. Concepts without a record simply have not been
/// started. Evaluated highest band first; the first match wins.
pub fn compute_topic_proficiency(
    concepts: &[ConceptRow],
    progress_by_concept: &HashMap<String, ConceptProgress>,
) -> TopicProficiency {
    if concepts.is_empty() {
        return TopicProficiency::from_band(ProficiencyBand::NotStarted, None);
    }

    let mut concepts_started = 0;
    let mut concepts_mastered = 0;

    // Denominators: how many concepts declare each difficulty at all.
    let mut supports = [0usize; 3];
    let mut mastered = [0usize; 3];
    let mut started = [0usize; 3];

    for concept in concepts {
        let record = progress_by_concept.get(&concept.id);
        if record.map(|r| r.total_attempts > 0).unwrap_or(false) {
            concepts_started += 1;
        }

        let mut all_supported_mastered = !concept.difficulty_levels.is_empty();
        for (idx, level) in DifficultyLevel::ORDER.iter().enumerate() {
            if !concept.difficulty_levels.contains(level) {
                continue;
            }
            supports[idx] += 1;

            let bucket = record.map(|r| r.mastery_by_difficulty.bucket(*level));
            if bucket.map(|b| b.mastered).unwrap_or(false) {
                mastered[idx] += 1;
            } else {
                all_supported_mastered = false;
            }
            if bucket.map(|b| b.started()).unwrap_or(false) {
                started[idx] += 1;
            }
        }
        if all_supported_mastered {
            concepts_mastered += 1;
        }
    }

    let stats = TopicStats {
        concepts_total: concepts.len(),
        concepts_started,
        concepts_mastered,
        familiarity_mastered_pct: pct(mastered[0], supports[0]),
        application_mastered_pct: pct(mastered[1], supports[1]),
        application_started_pct: pct(started[1], supports[1]),
        exam_style_mastered_pct: pct(mastered[2], supports[2]),
        exam_style_started_pct: pct(started[2], supports[2]),
    };

    let band = if stats.familiarity_mastered_pct >= 100
        && stats.application_mastered_pct >= 100
        && stats.exam_style_mastered_pct >= 100
    {
        ProficiencyBand::ExamReady
    } else if stats.familiarity_mastered_pct >= 100
        && stats.application_mastered_pct >= 75
        && stats.exam_style_started_pct >= 25
    {
        ProficiencyBand::ConsistentUnderstanding
    } else if stats.familiarity_mastered_pct >= 50 && stats.application_started_pct >= 25 {
        ProficiencyBand::GrowingConfidence
    } else if stats.concepts_started >= 1 {
        ProficiencyBand::BuildingFamiliarity
    } else {
        ProficiencyBand::NotStarted
    };

    TopicProficiency::from_band(band, Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mastery::apply_attempt;
    use chrono::Utc;

    fn concept(id: &str, levels: &[DifficultyLevel]) -> ConceptRow {
        ConceptRow {
            id: id.to_string(),
            topic_id: "t1".to_string(),
            name: id.to_string(),
            position: 0,
            difficulty_levels: levels.to_vec(),
        }
    }

    fn all_levels() -> Vec<DifficultyLevel> {
        DifficultyLevel::ORDER.to_vec()
    }

    fn progress_with(
        concept_id: &str,
        mastered: &[DifficultyLevel],
        started: &[DifficultyLevel],
    ) -> ConceptProgress {
        let mut record = ConceptProgress::new("u1", "c1", concept_id);
        for level in started {
            apply_attempt(&mut record, *level, false, Utc::now());
        }
        for level in mastered {
            for _ in 0..5 {
                apply_attempt(&mut record, *level, true, Utc::now());
            }
        }
        record
    }

    fn index(records: Vec<ConceptProgress>) -> HashMap<String, ConceptProgress> {
        records
            .into_iter()
            .map(|r| (r.concept_id.clone(), r))
            .collect()
    }

    #[test]
    fn test_empty_topic_is_not_started() {
        let result = compute_topic_proficiency(&[], &HashMap::new());
        assert_eq!(result.band, ProficiencyBand::NotStarted);
        assert!(result.stats.is_none());
    }

    #[test]
    fn test_no_progress_is_not_started() {
        let concepts = vec![concept("a", &all_levels()), concept("b", &all_levels())];
        let result = compute_topic_proficiency(&concepts, &HashMap::new());
        assert_eq!(result.band, ProficiencyBand::NotStarted);
        let stats = result.stats.unwrap();
        assert_eq!(stats.concepts_started, 0);
        assert_eq!(stats.familiarity_mastered_pct, 0);
    }

    #[test]
    fn test_single_started_concept_is_building_familiarity() {
        let concepts = vec![concept("a", &all_levels()), concept("b", &all_levels())];
        let records = index(vec![progress_with(
            "a",
            &[],
            &[DifficultyLevel::Familiarity],
        )]);
        let result = compute_topic_proficiency(&concepts, &records);
        assert_eq!(result.band, ProficiencyBand::BuildingFamiliarity);
    }

    #[test]
    fn test_growing_confidence_thresholds() {
        // 2 of 4 familiarity mastered (50%), 1 of 4 application started (25%).
        let concepts: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| concept(id, &all_levels()))
            .collect();
        let records = index(vec![
            progress_with(
                "a",
                &[DifficultyLevel::Familiarity],
                &[DifficultyLevel::Application],
            ),
            progress_with("b", &[DifficultyLevel::Familiarity], &[]),
        ]);
        let result = compute_topic_proficiency(&concepts, &records);
        assert_eq!(result.band, ProficiencyBand::GrowingConfidence);
    }

    #[test]
    fn test_consistent_understanding_worked_example() {
        // 4 concepts, all three levels supported: 4/4 familiarity mastered,
        // 3/4 application mastered, 1/4 with exam-style attempts.
        let concepts: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| concept(id, &all_levels()))
            .collect();
        let records = index(vec![
            progress_with(
                "a",
                &[DifficultyLevel::Familiarity, DifficultyLevel::Application],
                &[DifficultyLevel::ExamStyle],
            ),
            progress_with(
                "b",
                &[DifficultyLevel::Familiarity, DifficultyLevel::Application],
                &[],
            ),
            progress_with(
                "c",
                &[DifficultyLevel::Familiarity, DifficultyLevel::Application],
                &[],
            ),
            progress_with("d", &[DifficultyLevel::Familiarity], &[]),
        ]);
        let result = compute_topic_proficiency(&concepts, &records);
        assert_eq!(result.band, ProficiencyBand::ConsistentUnderstanding);
        let stats = result.stats.unwrap();
        assert_eq!(stats.familiarity_mastered_pct, 100);
        assert_eq!(stats.application_mastered_pct, 75);
        assert_eq!(stats.exam_style_started_pct, 25);
    }

    #[test]
    fn test_exam_ready_requires_everything_mastered() {
        let concepts: Vec<_> = ["a", "b"]
            .iter()
            .map(|id| concept(id, &all_levels()))
            .collect();
        let records = index(vec![
            progress_with("a", &all_levels(), &[]),
            progress_with("b", &all_levels(), &[]),
        ]);
        let result = compute_topic_proficiency(&concepts, &records);
        assert_eq!(result.band, ProficiencyBand::ExamReady);
        assert_eq!(result.level, 4);
        assert_eq!(result.stats.unwrap().concepts_mastered, 2);
    }

    #[test]
    fn test_unsupported_levels_are_excluded_from_denominators() {
        // Concept "b" only supports familiarity, so exam-style percentages
        // are computed over concept "a" alone.
        let concepts = vec![
            concept("a", &all_levels()),
            concept("b", &[DifficultyLevel::Familiarity]),
        ];
        let records = index(vec![
            progress_with("a", &all_levels(), &[]),
            progress_with("b", &[DifficultyLevel::Familiarity], &[]),
        ]);
        let result = compute_topic_proficiency(&concepts, &records);
        assert_eq!(result.band, ProficiencyBand::ExamReady);
    }

    #[test]
    fn test_band_is_monotone_in_progress() {
        let concepts: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| concept(id, &all_levels()))
            .collect();

        // Successively better snapshots of the same topic.
        let snapshots = vec![
            index(vec![]),
            index(vec![progress_with("a", &[], &[DifficultyLevel::Familiarity])]),
            index(vec![
                progress_with(
                    "a",
                    &[DifficultyLevel::Familiarity],
                    &[DifficultyLevel::Application],
                ),
                progress_with("b", &[DifficultyLevel::Familiarity], &[]),
            ]),
            index(vec![
                progress_with(
                    "a",
                    &[DifficultyLevel::Familiarity, DifficultyLevel::Application],
                    &[DifficultyLevel::ExamStyle],
                ),
                progress_with(
                    "b",
                    &[DifficultyLevel::Familiarity, DifficultyLevel::Application],
                    &[],
                ),
                progress_with(
                    "c",
                    &[DifficultyLevel::Familiarity, DifficultyLevel::Application],
                    &[],
                ),
                progress_with("d", &[DifficultyLevel::Familiarity], &[]),
            ]),
            index(vec![
                progress_with("a", &all_levels(), &[]),
                progress_with("b", &all_levels(), &[]),
                progress_with("c", &all_levels(), &[]),
                progress_with("d", &all_levels(), &[]),
            ]),
        ];

        let mut last_level = 0;
        for snapshot in snapshots {
            let result = compute_topic_proficiency(&concepts, &snapshot);
            assert!(result.level >= last_level);
            last_level = result.level;
        }
        assert_eq!(last_level, 4);
    }
}
