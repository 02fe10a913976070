//! Condition matching: one declared constraint against one observed
//! context attribute, and full-target matching across all declared fields.

use crate::{ClickContext, Conditions, Constraint, MatchedConditions, Target, UtmConditions};

/// Check whether an observed attribute satisfies a declared constraint.
///
/// An absent or empty observed value never matches. Comparison is
/// case-insensitive exact equality; a set constraint matches if any member
/// does (OR within the field).
pub fn matches_constraint(observed: Option<&str>, constraint: &Constraint) -> bool {
    let observed = match observed {
        Some(v) if !v.is_empty() => v,
        _ => return false,
    };
    match constraint {
        Constraint::One(accepted) => observed.eq_ignore_ascii_case(accepted),
        Constraint::AnyOf(accepted) => accepted.iter().any(|a| observed.eq_ignore_ascii_case(a)),
    }
}

fn utm_matches(declared: &UtmConditions, context: &ClickContext) -> Option<bool> {
    let utm = &context.utm;
    let mut any_declared = false;

    let fields: [(&Option<Constraint>, Option<&str>); 5] = [
        (&declared.source, utm.source.as_deref()),
        (&declared.medium, utm.medium.as_deref()),
        (&declared.campaign, utm.campaign.as_deref()),
        (&declared.term, utm.term.as_deref()),
        (&declared.content, utm.content.as_deref()),
    ];
    for (constraint, observed) in fields {
        if let Some(c) = constraint {
            any_declared = true;
            if !matches_constraint(observed, c) {
                return None;
            }
        }
    }
    Some(any_declared)
}

/// Evaluate every declared condition field of a target against the context.
///
/// Returns `None` if any declared field fails; otherwise the per-field
/// record of which categories were declared and satisfied. A target with
/// absent or empty conditions matches unconditionally (the typical
/// catch-all/default target).
pub fn target_matches(target: &Target, context: &ClickContext) -> Option<MatchedConditions> {
    let conditions = match &target.conditions {
        Some(c) => c,
        None => return Some(MatchedConditions::default()),
    };
    conditions_match(conditions, context)
}

/// Same as [`target_matches`] but over a bare condition set.
pub fn conditions_match(
    conditions: &Conditions,
    context: &ClickContext,
) -> Option<MatchedConditions> {
    let mut matched = MatchedConditions::default();

    if let Some(c) = &conditions.country {
        if !matches_constraint(context.country.as_deref(), c) {
            return None;
        }
        matched.country = true;
    }
    if let Some(c) = &conditions.language {
        if !matches_constraint(context.language.as_deref(), c) {
            return None;
        }
        matched.language = true;
    }
    if let Some(c) = &conditions.device {
        if !matches_constraint(context.device.as_deref(), c) {
            return None;
        }
        matched.device = true;
    }
    if let Some(declared) = &conditions.utm {
        match utm_matches(declared, context) {
            None => return None,
            Some(any_declared) => matched.utm = any_declared,
        }
    }

    Some(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UtmParams;
    use std::time::SystemTime;

    fn ctx(country: Option<&str>, device: Option<&str>) -> ClickContext {
        ClickContext {
            country: country.map(String::from),
            language: None,
            device: device.map(String::from),
            utm: UtmParams::default(),
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn scalar_constraint_is_case_insensitive() {
        let c = Constraint::One("DE".into());
        assert!(matches_constraint(Some("de"), &c));
        assert!(matches_constraint(Some("DE"), &c));
        assert!(matches_constraint(Some("De"), &c));
        assert!(!matches_constraint(Some("FR"), &c));
    }

    #[test]
    fn set_constraint_matches_any_member() {
        let c = Constraint::AnyOf(vec!["DE".into(), "AT".into(), "CH".into()]);
        assert!(matches_constraint(Some("at"), &c));
        assert!(matches_constraint(Some("CH"), &c));
        assert!(!matches_constraint(Some("FR"), &c));
    }

    #[test]
    fn absent_or_empty_observed_never_matches() {
        let c = Constraint::One("DE".into());
        assert!(!matches_constraint(None, &c));
        assert!(!matches_constraint(Some(""), &c));
    }

    #[test]
    fn absent_conditions_match_any_context() {
        let target = Target::new("t", "https://example.com");
        assert!(target_matches(&target, &ctx(None, None)).is_some());
        assert!(target_matches(&target, &ctx(Some("FR"), Some("mobile"))).is_some());
    }

    #[test]
    fn empty_conditions_object_matches_unconditionally() {
        let mut target = Target::new("t", "https://example.com");
        target.conditions = Some(Conditions::default());
        let matched = target_matches(&target, &ctx(None, None)).expect("matches");
        assert_eq!(matched, MatchedConditions::default());
    }

    #[test]
    fn all_declared_fields_must_match() {
        let mut target = Target::new("t", "https://example.com");
        target.conditions = Some(Conditions {
            country: Some(Constraint::One("DE".into())),
            device: Some(Constraint::One("mobile".into())),
            ..Conditions::default()
        });

        // country matches but device is absent from the context
        assert!(target_matches(&target, &ctx(Some("DE"), None)).is_none());
        // both match
        let matched = target_matches(&target, &ctx(Some("DE"), Some("mobile"))).expect("matches");
        assert!(matched.country && matched.device);
        assert!(!matched.language && !matched.utm);
    }

    #[test]
    fn every_declared_utm_field_must_match() {
        let mut target = Target::new("t", "https://example.com");
        target.conditions = Some(Conditions {
            utm: Some(UtmConditions {
                source: Some(Constraint::One("email".into())),
                campaign: Some(Constraint::One("spring_2026".into())),
                ..UtmConditions::default()
            }),
            ..Conditions::default()
        });

        let mut context = ctx(None, None);
        context.utm.source = Some("email".into());
        // campaign missing
        assert!(target_matches(&target, &context).is_none());

        context.utm.campaign = Some("SPRING_2026".into());
        let matched = target_matches(&target, &context).expect("matches");
        assert!(matched.utm);
    }

    #[test]
    fn undeclared_fields_are_unconstrained() {
        let mut target = Target::new("t", "https://example.com");
        target.conditions = Some(Conditions {
            country: Some(Constraint::One("DE".into())),
            ..Conditions::default()
        });
        // device/utm present in the context but undeclared on the target
        let mut context = ctx(Some("DE"), Some("desktop"));
        context.utm.source = Some("tiktok".into());
        assert!(target_matches(&target, &context).is_some());
    }
}
