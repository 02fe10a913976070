//! Target selection: from the eligible, priority-ordered targets, find all
//! whose conditions match the context and pick exactly one, with weighted
//! A/B tie-break among co-equal-priority matches.

use crate::filter::EligibleTarget;
use crate::matcher::target_matches;
use crate::{ClickContext, MatchedConditions, Target, WeightSampler};

/// The winning target together with its declaration index and the record of
/// satisfied condition categories.
#[derive(Clone, Copy, Debug)]
pub struct Selected<'a> {
    pub target: &'a Target,
    pub index: usize,
    pub matched: MatchedConditions,
}

/// Select one target from the eligible set, or `None` if nothing matches
/// (the caller then falls back to the configured default target).
///
/// The selection pool is every matching target at the lowest priority value
/// represented among matches — a single higher-priority match short-circuits
/// lower tiers, while co-equal matches can split traffic by weight. With no
/// declared weights the first pool member in declaration order wins, so
/// non-A/B configurations stay fully deterministic.
pub fn select_target<'a>(
    eligible: &[EligibleTarget<'a>],
    context: &ClickContext,
    sampler: &dyn WeightSampler,
) -> Option<Selected<'a>> {
    let matches: Vec<Selected<'a>> = eligible
        .iter()
        .filter_map(|e| {
            target_matches(e.target, context).map(|matched| Selected {
                target: e.target,
                index: e.index,
                matched,
            })
        })
        .collect();

    let first = matches.first()?;
    // `eligible` is priority-ordered, so the first match carries the lowest
    // represented priority.
    let tier = first.target.effective_priority();
    let pool: Vec<&Selected<'a>> = matches
        .iter()
        .take_while(|s| s.target.effective_priority() == tier)
        .collect();

    if pool.len() == 1 {
        return Some(*pool[0]);
    }
    Some(*select_by_weight(&pool, sampler))
}

fn select_by_weight<'s, 'a>(
    pool: &[&'s Selected<'a>],
    sampler: &dyn WeightSampler,
) -> &'s Selected<'a> {
    let has_weights = pool.iter().any(|s| s.target.weight.is_some());
    if !has_weights {
        // No A/B configuration in this tier: declaration order decides.
        return pool[0];
    }

    let weighted: Vec<(&Selected<'a>, f64)> = pool
        .iter()
        .map(|s| (*s, s.target.weight.unwrap_or(1.0)))
        .filter(|(_, w)| *w > 0.0)
        .collect();

    match weighted.len() {
        // All weights normalized to zero: fall back to the first pool
        // member. A lone zero-weight match therefore still gets selected.
        0 => pool[0],
        1 => weighted[0].0,
        _ => {
            let total: f64 = weighted.iter().map(|(_, w)| w).sum();
            let draw = sampler.draw(total);
            let mut cumulative = 0.0;
            for (selected, weight) in &weighted {
                cumulative += weight;
                if draw < cumulative {
                    return selected;
                }
            }
            // Rounding edge: the draw landed on the upper bound.
            weighted[weighted.len() - 1].0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::eligible_targets;
    use crate::{Conditions, Constraint, Target, UniformSampler, UtmParams};
    use std::collections::BTreeMap;
    use std::time::SystemTime;

    /// Sampler returning a fixed fraction of the total weight, so weighted
    /// selection becomes assertable.
    struct FractionSampler(f64);

    impl WeightSampler for FractionSampler {
        fn draw(&self, total: f64) -> f64 {
            self.0 * total
        }
    }

    fn ctx_de() -> ClickContext {
        ClickContext {
            country: Some("DE".into()),
            language: None,
            device: None,
            utm: UtmParams::default(),
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    fn de_target(id: &str, priority: i64, weight: Option<f64>) -> Target {
        let mut t = Target::new(id, format!("https://example.com/{id}"));
        t.priority = Some(priority);
        t.weight = weight;
        t.conditions = Some(Conditions {
            country: Some(Constraint::One("DE".into())),
            ..Conditions::default()
        });
        t
    }

    fn select_id(targets: &[Target], context: &ClickContext, sampler: &dyn WeightSampler) -> Option<String> {
        let eligible = eligible_targets(targets, context.timestamp);
        select_target(&eligible, context, sampler).map(|s| s.target.target_id.clone())
    }

    #[test]
    fn no_match_returns_none() {
        let targets = vec![de_target("de", 10, None)];
        let mut context = ctx_de();
        context.country = Some("FR".into());
        assert_eq!(select_id(&targets, &context, &UniformSampler), None);
    }

    #[test]
    fn higher_priority_match_short_circuits_lower_tiers() {
        let targets = vec![
            de_target("low", 100, Some(50.0)),
            de_target("high", 10, None),
            de_target("mid", 50, Some(50.0)),
        ];
        assert_eq!(
            select_id(&targets, &ctx_de(), &UniformSampler),
            Some("high".into())
        );
    }

    #[test]
    fn unweighted_tie_picks_declaration_order() {
        let targets = vec![
            de_target("first", 10, None),
            de_target("second", 10, None),
        ];
        // No declared weights anywhere in the tier: deterministic.
        for _ in 0..20 {
            assert_eq!(
                select_id(&targets, &ctx_de(), &UniformSampler),
                Some("first".into())
            );
        }
    }

    #[test]
    fn weighted_tie_respects_cumulative_intervals() {
        let targets = vec![
            de_target("a", 10, Some(1.0)),
            de_target("b", 10, Some(3.0)),
            de_target("c", 10, Some(6.0)),
        ];
        // total = 10; intervals: a [0,1), b [1,4), c [4,10)
        assert_eq!(
            select_id(&targets, &ctx_de(), &FractionSampler(0.05)),
            Some("a".into())
        );
        assert_eq!(
            select_id(&targets, &ctx_de(), &FractionSampler(0.2)),
            Some("b".into())
        );
        assert_eq!(
            select_id(&targets, &ctx_de(), &FractionSampler(0.9)),
            Some("c".into())
        );
    }

    #[test]
    fn undeclared_weight_defaults_to_one() {
        let targets = vec![
            de_target("declared", 10, Some(9.0)),
            de_target("defaulted", 10, None),
        ];
        // total = 10; declared [0,9), defaulted [9,10)
        assert_eq!(
            select_id(&targets, &ctx_de(), &FractionSampler(0.95)),
            Some("defaulted".into())
        );
    }

    #[test]
    fn zero_weight_is_never_chosen_while_positive_candidates_exist() {
        let targets = vec![
            de_target("never", 10, Some(0.0)),
            de_target("always", 10, Some(1.0)),
        ];
        for trial in 0..50 {
            let fraction = trial as f64 / 50.0;
            assert_eq!(
                select_id(&targets, &ctx_de(), &FractionSampler(fraction)),
                Some("always".into())
            );
        }
    }

    #[test]
    fn all_zero_weights_fall_back_to_first_pool_member() {
        let targets = vec![
            de_target("first_zero", 10, Some(0.0)),
            de_target("second_zero", 10, Some(0.0)),
        ];
        assert_eq!(
            select_id(&targets, &ctx_de(), &UniformSampler),
            Some("first_zero".into())
        );
    }

    #[test]
    fn lone_zero_weight_match_is_still_selected() {
        let targets = vec![de_target("only", 10, Some(0.0))];
        assert_eq!(
            select_id(&targets, &ctx_de(), &UniformSampler),
            Some("only".into())
        );
    }

    #[test]
    fn weighted_distribution_roughly_follows_weights() {
        let targets = vec![
            de_target("w1", 10, Some(1.0)),
            de_target("w3", 10, Some(3.0)),
            de_target("w6", 10, Some(6.0)),
        ];
        let context = ctx_de();
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for _ in 0..1000 {
            let id = select_id(&targets, &context, &UniformSampler).expect("selected");
            *counts.entry(id).or_insert(0) += 1;
        }
        // Everyone shows up at least once...
        assert!(counts.len() == 3, "all three targets appear: {counts:?}");
        // ...and the heaviest target takes the largest share, around 60%.
        let w6 = counts["w6"] as f64 / 1000.0;
        assert!((0.5..=0.7).contains(&w6), "w6 share {w6} outside 60%±10pt");
        assert!(counts["w6"] > counts["w3"]);
        assert!(counts["w3"] > counts["w1"]);
    }
}
