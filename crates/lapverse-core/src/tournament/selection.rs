//! Champion selection and the evolution rule. Pure functions, no I/O.

use std::cmp::Ordering;

use crate::domain::Variant;

/// Ranking order: score descending, then cost ascending, then name ascending.
pub fn compare(a: &Variant, b: &Variant) -> Ordering {
    let score = |v: &Variant| v.score.unwrap_or(0.0);
    score(b)
        .total_cmp(&score(a))
        .then_with(|| a.cost.cmp(&b.cost))
        .then_with(|| a.name.cmp(&b.name))
}

/// Completed variants, best first.
pub fn rank(variants: &[Variant]) -> Vec<&Variant> {
    let mut ranked: Vec<&Variant> = variants.iter().filter(|v| v.completed()).collect();
    ranked.sort_by(|a, b| compare(a, b));
    ranked
}

pub fn select_champion(variants: &[Variant]) -> Option<&Variant> {
    rank(variants).into_iter().next()
}

/// `(champion − previous) / max(previous, 1)`, or 0 without a prior champion.
pub fn win_rate_delta(champion_score: f64, previous: Option<f64>) -> f64 {
    match previous {
        Some(prev) => (champion_score - prev) / prev.max(1.0),
        None => 0.0,
    }
}

/// Evolution fires only while the error budget is healthy and the champion
/// beats the previous one by more than `threshold`.
pub fn should_evolve(burn_rate: f64, delta: f64, threshold: f64) -> bool {
    burn_rate < 1.0 && delta > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Usd, VariantOutcome};
    use rstest::rstest;
    use serde_json::json;

    fn scored(name: &str, score: f64, cost: f64) -> Variant {
        let mut v = Variant::new(name, json!({}));
        v.score = Some(score);
        v.cost = Usd::from_dollars(cost);
        v.outcome = VariantOutcome::Succeeded;
        v
    }

    #[test]
    fn highest_score_wins_and_triggers_evolution() {
        let variants = vec![
            scored("aggressive", 10.0, 0.1),
            scored("conservative", 20.0, 0.1),
            scored("balanced", 15.0, 0.1),
            scored("experimental", 5.0, 0.1),
        ];
        let champion = select_champion(&variants).unwrap();
        assert_eq!(champion.name, "conservative");

        let delta = win_rate_delta(20.0, Some(18.0));
        assert!((delta - 0.1111).abs() < 1e-3);
        assert!(should_evolve(0.5, delta, 0.05));
    }

    #[test]
    fn ties_break_on_cost_then_name() {
        let variants = vec![
            scored("zeta", 50.0, 0.30),
            scored("beta", 50.0, 0.20),
            scored("alpha", 50.0, 0.20),
        ];
        let names: Vec<_> = rank(&variants).iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "zeta"]);
    }

    #[test]
    fn failed_variants_are_not_ranked() {
        let mut failed = scored("aggressive", 99.0, 0.1);
        failed.outcome = VariantOutcome::Failed {
            reason: "timeout".into(),
        };
        let variants = vec![failed, scored("balanced", 1.0, 0.1)];
        assert_eq!(select_champion(&variants).unwrap().name, "balanced");
    }

    #[rstest]
    #[case::no_prior(20.0, None, 0.0)]
    #[case::prior_below_one(3.0, Some(0.5), 2.5)]
    #[case::regression(9.0, Some(10.0), -0.1)]
    fn delta_cases(#[case] champion: f64, #[case] previous: Option<f64>, #[case] expected: f64) {
        assert!((win_rate_delta(champion, previous) - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case::healthy_and_better(0.5, 0.06, true)]
    #[case::exactly_five_percent(0.5, 0.05, false)]
    #[case::budget_spent(1.0, 0.5, false)]
    fn evolution_rule(#[case] burn: f64, #[case] delta: f64, #[case] expected: bool) {
        assert_eq!(should_evolve(burn, delta, 0.05), expected);
    }
}
