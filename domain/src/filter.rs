//! Candidate filtering: which targets are eligible at evaluation time,
//! ordered by priority. Pure and deterministic for a fixed `now`.

use std::time::SystemTime;

use crate::Target;

/// An eligible target together with its original declaration index.
#[derive(Clone, Copy, Debug)]
pub struct EligibleTarget<'a> {
    pub target: &'a Target,
    pub index: usize,
}

/// Whether a single target is eligible: enabled and within its inclusive
/// `[valid_from, valid_until]` window. An absent bound is unbounded on
/// that side.
pub fn is_eligible(target: &Target, now: SystemTime) -> bool {
    if !target.enabled {
        return false;
    }
    if let Some(from) = target.valid_from {
        if now < from {
            return false;
        }
    }
    if let Some(until) = target.valid_until {
        if now > until {
            return false;
        }
    }
    true
}

/// Filter out disabled and out-of-window targets and sort the rest
/// ascending by effective priority. The sort is stable, so targets with
/// equal priority keep their original declaration order — this ordering
/// decides which priority tier is considered first, not the final
/// selection among ties.
pub fn eligible_targets(targets: &[Target], now: SystemTime) -> Vec<EligibleTarget<'_>> {
    let mut eligible: Vec<EligibleTarget<'_>> = targets
        .iter()
        .enumerate()
        .filter(|(_, t)| is_eligible(t, now))
        .map(|(index, target)| EligibleTarget { target, index })
        .collect();
    eligible.sort_by_key(|e| e.target.effective_priority());
    eligible
}
