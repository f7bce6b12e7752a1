//! Score computation for a single answer.

use crate::state::room::Rules;

const BASE_SCORE: i64 = 100;
const MAX_TIME_BONUS: i64 = 50;

/// Points awarded for one answer and the combo multiplier that produced them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreDelta {
    pub score: u32,
    pub multiplier: f64,
}

impl ScoreDelta {
    const ZERO: Self = Self {
        score: 0,
        multiplier: 1.0,
    };
}

/// Combo multiplier for `streak` consecutive correct answers before this one.
pub fn streak_multiplier(streak: u32) -> f64 {
    match streak {
        s if s >= 10 => 3.0,
        s if s >= 7 => 2.5,
        s if s >= 5 => 2.0,
        s if s >= 3 => 1.5,
        _ => 1.0,
    }
}

/// Linear time bonus: 50 points for an instant answer, 0 at the deadline.
fn time_bonus(elapsed_ms: i64, answer_ms: i64) -> i64 {
    if answer_ms <= 0 {
        return 0;
    }

    let remaining = (answer_ms - elapsed_ms.max(0)).clamp(0, answer_ms);
    // ceil(remaining * 50 / answer_ms) without floats
    (remaining * MAX_TIME_BONUS + answer_ms - 1) / answer_ms
}

/// Score an answer. `streak` is the participant's streak before this answer.
pub fn compute_score_delta(
    is_correct: bool,
    elapsed_ms: i64,
    rules: &Rules,
    streak: u32,
) -> ScoreDelta {
    if !is_correct {
        return ScoreDelta::ZERO;
    }

    let answer_ms = i64::from(rules.answer_seconds) * 1_000;
    let base = BASE_SCORE + time_bonus(elapsed_ms, answer_ms);
    let multiplier = streak_multiplier(streak);

    ScoreDelta {
        score: (base as f64 * multiplier).round() as u32,
        multiplier,
    }
}
