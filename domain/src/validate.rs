//! Lightweight configuration validation helpers. Keep logic minimal and
//! deterministic.

use std::collections::BTreeSet;

use crate::{CoreError, LinkConfig, Target};

/// Validate a target URL. We keep this intentionally light to avoid heavy
/// parsing crates: ensure http/https scheme and a reasonable length.
pub fn validate_target_url(s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidUrl("empty".into()));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(CoreError::InvalidUrl("must start with http:// or https://".into()));
    }
    if trimmed.len() > 2048 {
        return Err(CoreError::InvalidUrl("too long".into()));
    }
    Ok(())
}

fn validate_target(target: &Target) -> Result<(), CoreError> {
    if target.target_id.is_empty() {
        return Err(CoreError::InvalidConfig("target id must not be empty".into()));
    }
    validate_target_url(&target.url)?;
    if let Some(weight) = target.weight {
        if !weight.is_finite() || weight < 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "target {} has invalid weight",
                target.target_id
            )));
        }
    }
    if let (Some(from), Some(until)) = (target.valid_from, target.valid_until) {
        if from > until {
            return Err(CoreError::InvalidConfig(format!(
                "target {} window ends before it starts",
                target.target_id
            )));
        }
    }
    Ok(())
}

/// Validate a full link configuration before it is persisted.
///
/// An empty target list is accepted: such a configuration resolves to
/// NO_MATCH on every click, which is a legitimate (if unusual) state while
/// a link is being set up.
pub fn validate_config(config: &LinkConfig) -> Result<(), CoreError> {
    let mut seen = BTreeSet::new();
    for target in &config.targets {
        validate_target(target)?;
        if !seen.insert(target.target_id.as_str()) {
            return Err(CoreError::InvalidConfig(format!(
                "duplicate target id: {}",
                target.target_id
            )));
        }
    }

    if !config.targets.is_empty()
        && !config
            .targets
            .iter()
            .any(|t| t.target_id == config.default_target_id)
    {
        return Err(CoreError::InvalidConfig(format!(
            "default target {} not found among targets",
            config.default_target_id
        )));
    }

    if let (Some(from), Some(until)) = (config.valid_from, config.valid_until) {
        if from > until {
            return Err(CoreError::InvalidConfig(
                "link window ends before it starts".into(),
            ));
        }
    }
    Ok(())
}
