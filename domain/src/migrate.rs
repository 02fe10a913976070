//! Conversion of first-generation rule sets into the current configuration
//! shape. Rule sets expressed targets as an ordered `rules` list with a
//! separate `fallback_target` URL; the current shape folds the fallback into
//! the target list as an explicit default target.

use std::time::SystemTime;

use crate::validate::validate_config;
use crate::{Conditions, CoreError, LinkConfig, LinkId, LinkStatus, Target};

/// Identifier given to the synthesized fallback target.
pub const FALLBACK_TARGET_ID: &str = "fallback";

/// Priority assigned to the synthesized fallback so it sorts after any
/// sensibly configured rule.
pub const FALLBACK_PRIORITY: i64 = 9999;

/// One redirect rule from a first-generation rule set.
#[derive(Clone, Debug, Default)]
pub struct LegacyRule {
    pub id: Option<String>,
    pub label: Option<String>,
    pub priority: Option<i64>,
    /// Absent means enabled.
    pub enabled: Option<bool>,
    pub valid_from: Option<SystemTime>,
    pub valid_until: Option<SystemTime>,
    pub weight: Option<f64>,
    pub when: Conditions,
    /// Destination URL.
    pub target: String,
}

/// A complete first-generation rule set.
#[derive(Clone, Debug)]
pub struct LegacyRuleSet {
    pub link_id: String,
    pub purpose: Option<String>,
    pub status: String,
    pub rules: Vec<LegacyRule>,
    pub fallback_target: String,
}

/// Convert a legacy rule set into a validated link configuration.
///
/// Rules become targets in declaration order; a rule without an id gets a
/// positional one. Unless a rule already covers the fallback (by id or by
/// URL), a catch-all fallback target is appended and wired up as the
/// default.
pub fn migrate_rule_set(legacy: &LegacyRuleSet) -> Result<LinkConfig, CoreError> {
    let link_id = LinkId::new(legacy.link_id.clone())?;

    // The first generation had no paused state; anything unrecognized is
    // treated as active, matching how the old resolver behaved.
    let status = match legacy.status.as_str() {
        "draft" => LinkStatus::Draft,
        "archived" => LinkStatus::Archived,
        _ => LinkStatus::Active,
    };

    let mut targets: Vec<Target> = legacy
        .rules
        .iter()
        .enumerate()
        .map(|(index, rule)| Target {
            target_id: rule
                .id
                .clone()
                .unwrap_or_else(|| format!("target_{index}")),
            url: rule.target.clone(),
            label: rule.label.clone(),
            conditions: Some(rule.when.clone()),
            priority: rule.priority,
            enabled: rule.enabled != Some(false),
            valid_from: rule.valid_from,
            valid_until: rule.valid_until,
            weight: rule.weight,
        })
        .collect();

    // A rule may already cover the fallback, either by carrying the
    // reserved id or by pointing at the same URL. Only synthesize one when
    // neither is the case, and always wire the default to a real target id.
    let default_target_id = match targets
        .iter()
        .find(|t| t.target_id == FALLBACK_TARGET_ID || t.url == legacy.fallback_target)
    {
        Some(existing) => existing.target_id.clone(),
        None => {
            targets.push(Target {
                target_id: FALLBACK_TARGET_ID.into(),
                url: legacy.fallback_target.clone(),
                label: Some("Fallback".into()),
                conditions: Some(Conditions::default()),
                priority: Some(FALLBACK_PRIORITY),
                enabled: true,
                valid_from: None,
                valid_until: None,
                weight: None,
            });
            FALLBACK_TARGET_ID.into()
        }
    };

    let config = LinkConfig {
        link_id,
        name: legacy.purpose.clone(),
        description: None,
        status,
        targets,
        default_target_id,
        valid_from: None,
        valid_until: None,
    };
    validate_config(&config)?;
    Ok(config)
}
