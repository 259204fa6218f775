//! Three-dimension skill scoring (§4.7 step 3, §8 P7/P8/B4): pure
//! functions ported 1:1 from the original's scoring module, since the
//! original is the authority for the exact constants.

use serde::Deserialize;
use serde::Serialize;

/// One blind-test task's outcome, as produced by a validation sandbox run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvaluation {
    pub raw_score: i32,
    pub correct_skill_used: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub completion_score: f64,
    pub trigger_score: f64,
    pub offline_score: f64,
    pub overall: f64,
}

/// `(raw_score - 1) * 25`, clamped to `[0, 100]` for out-of-range input.
pub fn convert_raw_score(raw_score: i32) -> i32 {
    if raw_score < 1 {
        0
    } else if raw_score > 5 {
        100
    } else {
        (raw_score - 1) * 25
    }
}

/// Mean of `convert_raw_score` over all evaluations, rounded to one
/// decimal place. `0.0` for an empty evaluation set.
pub fn completion_score(evaluations: &[TaskEvaluation]) -> f64 {
    if evaluations.is_empty() {
        return 0.0;
    }
    let sum: i32 = evaluations.iter().map(|e| convert_raw_score(e.raw_score)).sum();
    round1(sum as f64 / evaluations.len() as f64)
}

/// Fraction of evaluations with `correct_skill_used`, as a 0-100 score.
pub fn trigger_score(evaluations: &[TaskEvaluation]) -> f64 {
    if evaluations.is_empty() {
        return 0.0;
    }
    let correct = evaluations.iter().filter(|e| e.correct_skill_used).count();
    round1((correct as f64 / evaluations.len() as f64) * 100.0)
}

/// 100 for a clean offline run, 70 for 1-2 blocked calls, 0 for 3 or more.
pub fn offline_score(blocked_network_calls: u32) -> i32 {
    match blocked_network_calls {
        0 => 100,
        1 | 2 => 70,
        _ => 0,
    }
}

const COMPLETION_WEIGHT: f64 = 0.50;
const TRIGGER_WEIGHT: f64 = 0.35;
const OFFLINE_WEIGHT: f64 = 0.15;

pub fn overall_score(completion: f64, trigger: f64, offline: f64) -> ScoreBreakdown {
    let overall = completion * COMPLETION_WEIGHT + trigger * TRIGGER_WEIGHT + offline * OFFLINE_WEIGHT;
    ScoreBreakdown {
        completion_score: round1(completion),
        trigger_score: round1(trigger),
        offline_score: offline,
        overall: round1(overall),
    }
}

const PASS_THRESHOLD: f64 = 70.0;
const MIN_RAW_SCORE: i32 = 3;

/// `overall >= 70` AND every evaluation's `raw_score >= 3` (§8 B4).
pub fn is_passing(overall: f64, evaluations: &[TaskEvaluation]) -> bool {
    overall >= PASS_THRESHOLD && evaluations.iter().all(|e| e.raw_score >= MIN_RAW_SCORE)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(raw_score: i32, correct: bool) -> TaskEvaluation {
        TaskEvaluation { raw_score, correct_skill_used: correct }
    }

    #[test]
    fn raw_score_conversion_matches_the_five_point_table() {
        assert_eq!(convert_raw_score(1), 0);
        assert_eq!(convert_raw_score(2), 25);
        assert_eq!(convert_raw_score(3), 50);
        assert_eq!(convert_raw_score(4), 75);
        assert_eq!(convert_raw_score(5), 100);
    }

    #[test]
    fn raw_score_conversion_clamps_out_of_range() {
        assert_eq!(convert_raw_score(0), 0);
        assert_eq!(convert_raw_score(-3), 0);
        assert_eq!(convert_raw_score(9), 100);
    }

    #[test]
    fn completion_score_averages_converted_scores() {
        let evals = vec![eval(5, true), eval(3, true), eval(1, false)];
        // (100 + 50 + 0) / 3 = 50.0
        assert_eq!(completion_score(&evals), 50.0);
    }

    #[test]
    fn trigger_score_is_fraction_correct_times_100() {
        let evals = vec![eval(5, true), eval(5, false), eval(5, true), eval(5, false)];
        assert_eq!(trigger_score(&evals), 50.0);
    }

    #[test]
    fn offline_score_thresholds() {
        assert_eq!(offline_score(0), 100);
        assert_eq!(offline_score(1), 70);
        assert_eq!(offline_score(2), 70);
        assert_eq!(offline_score(3), 0);
        assert_eq!(offline_score(9), 0);
    }

    #[test]
    fn overall_score_is_the_weighted_sum() {
        // P8: 0.50*80 + 0.35*60 + 0.15*100 = 40 + 21 + 15 = 76
        let breakdown = overall_score(80.0, 60.0, 100.0);
        assert_eq!(breakdown.overall, 76.0);
    }

    #[test]
    fn pass_boundary_is_exactly_seventy() {
        // B4: overall = 70.0 exactly passes; 69.9 fails, given every raw_score >= 3.
        let evals = vec![eval(3, true)];
        assert!(is_passing(70.0, &evals));
        assert!(!is_passing(69.9, &evals));
    }

    #[test]
    fn pass_requires_every_raw_score_at_least_three_even_if_overall_is_high() {
        let evals = vec![eval(5, true), eval(2, true)];
        assert!(!is_passing(90.0, &evals));
    }
}
