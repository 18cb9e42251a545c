//! Prompt strength: a display heuristic in `[0, 1]` for how well an answer
//! was backed by the caller's own data. Never used to gate an answer.

use crate::frames::ContextUsed;

const BASE: f64 = 0.3;
const OWNED_ENTITY_BONUS: f64 = 0.1;
const PER_RELATED_RECORD: f64 = 0.02;
const RELATED_RECORD_CAP: f64 = 0.4;
const PER_TOOL_CALL: f64 = 0.1;
const TOOL_CALL_CAP: f64 = 0.2;

/// Score an answer from the context it used and the tool calls behind it.
///
/// Monotonic in both the related-record count and `tool_calls`.
pub fn strength(context: &ContextUsed, tool_calls: u32) -> f64 {
    let mut score = BASE;
    if context.students > 0 {
        score += OWNED_ENTITY_BONUS;
    }
    score += (f64::from(context.related_records()) * PER_RELATED_RECORD).min(RELATED_RECORD_CAP);
    score += (f64::from(tool_calls) * PER_TOOL_CALL).min(TOOL_CALL_CAP);
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_context_scores_base() {
        assert!(approx(strength(&ContextUsed::default(), 0), 0.3));
    }

    #[test]
    fn saturated_inputs_reach_one() {
        let ctx = ContextUsed {
            students: 2,
            grades: 500,
            ..Default::default()
        };
        assert!(approx(strength(&ctx, 9), 1.0));
    }

    #[test]
    fn partial_credit_adds_up() {
        let ctx = ContextUsed {
            students: 1,
            grades: 5,
            subjects: 5,
            ..Default::default()
        };
        // 0.3 + 0.1 + 10 * 0.02 + 1 * 0.1
        assert!(approx(strength(&ctx, 1), 0.7));
    }

    #[test]
    fn monotonic_in_related_records() {
        for calls in 0..4 {
            let mut prev = 0.0;
            for grades in 0..40 {
                let ctx = ContextUsed {
                    grades,
                    ..Default::default()
                };
                let s = strength(&ctx, calls);
                assert!(s >= prev, "score dropped at grades={grades} calls={calls}");
                assert!((0.0..=1.0).contains(&s));
                prev = s;
            }
        }
    }

    #[test]
    fn monotonic_in_tool_calls() {
        let ctx = ContextUsed {
            students: 1,
            feedback: 3,
            ..Default::default()
        };
        let mut prev = 0.0;
        for calls in 0..10 {
            let s = strength(&ctx, calls);
            assert!(s >= prev);
            prev = s;
        }
    }
}
