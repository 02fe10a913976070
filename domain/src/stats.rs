//! Statistics aggregation over recorded resolution episodes.
//!
//! Pure functions: the repository hands over episodes, this module filters,
//! groups and summarizes them into a report. Peripheral to resolution and
//! deliberately kept out of the hot path.

use std::collections::BTreeMap;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{Episode, LinkId, Outcome};

/// Grouping dimensions for stats rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupBy {
    TargetId,
    Country,
    Device,
    UtmSource,
    UtmCampaign,
    Outcome,
    Hour,
    Day,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::TargetId => "target_id",
            GroupBy::Country => "country",
            GroupBy::Device => "device",
            GroupBy::UtmSource => "utm_source",
            GroupBy::UtmCampaign => "utm_campaign",
            GroupBy::Outcome => "outcome",
            GroupBy::Hour => "hour",
            GroupBy::Day => "day",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "target_id" => Some(GroupBy::TargetId),
            "country" => Some(GroupBy::Country),
            "device" => Some(GroupBy::Device),
            "utm_source" => Some(GroupBy::UtmSource),
            "utm_campaign" => Some(GroupBy::UtmCampaign),
            "outcome" => Some(GroupBy::Outcome),
            "hour" => Some(GroupBy::Hour),
            "day" => Some(GroupBy::Day),
            _ => None,
        }
    }
}

/// Inclusive time range over episode timestamps.
#[derive(Clone, Copy, Debug)]
pub struct TimeRange {
    pub from: SystemTime,
    pub to: SystemTime,
}

/// Row-level filters. An empty list leaves that field unconstrained;
/// string comparisons are case-insensitive, like condition matching.
#[derive(Clone, Debug, Default)]
pub struct StatsFilters {
    pub target_id: Vec<String>,
    pub country: Vec<String>,
    pub device: Vec<String>,
    pub outcome: Vec<Outcome>,
}

/// A stats query: which episodes to consider and how to slice them.
#[derive(Clone, Debug, Default)]
pub struct StatsQuery {
    pub link_id: Option<LinkId>,
    pub time_range: Option<TimeRange>,
    pub group_by: Vec<GroupBy>,
    pub filters: StatsFilters,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSummary {
    pub total_clicks: usize,
    /// OK and DEFAULT_USED both count as a successful redirect.
    pub successful_redirects: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsRow {
    /// Dimension name to value, e.g. `{"country": "DE"}`. Empty when the
    /// query has no grouping.
    pub dimensions: BTreeMap<String, String>,
    pub clicks: usize,
    pub successful_redirects: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatsReport {
    pub summary: StatsSummary,
    pub rows: Vec<StatsRow>,
    /// Group count before offset/limit pagination.
    pub total_rows: usize,
    pub query_latency_ms: f64,
}

/// Build a report over the given episodes.
pub fn build_report(episodes: &[Episode], query: &StatsQuery) -> StatsReport {
    let started = Instant::now();

    let filtered: Vec<&Episode> = episodes
        .iter()
        .filter(|ep| episode_selected(ep, query))
        .collect();

    let summary = summarize(&filtered);

    let mut rows = if query.group_by.is_empty() {
        vec![StatsRow {
            dimensions: BTreeMap::new(),
            clicks: summary.total_clicks,
            successful_redirects: summary.successful_redirects,
            errors: summary.errors,
            avg_latency_ms: summary.avg_latency_ms,
        }]
    } else {
        grouped_rows(&filtered, query)
    };

    // Count groups before pagination so callers can page through them.
    let total_rows = rows.len();
    if query.offset > 0 {
        rows.drain(..query.offset.min(rows.len()));
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }

    StatsReport {
        summary,
        total_rows,
        rows,
        query_latency_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}

fn episode_selected(episode: &Episode, query: &StatsQuery) -> bool {
    if let Some(link_id) = &query.link_id {
        if episode.link_id != link_id.as_str() {
            return false;
        }
    }
    if let Some(range) = &query.time_range {
        if episode.timestamp < range.from || episode.timestamp > range.to {
            return false;
        }
    }

    let filters = &query.filters;
    if !filters.target_id.is_empty() {
        let hit = episode
            .decision
            .target_id
            .as_deref()
            .map(|id| filters.target_id.iter().any(|f| f.eq_ignore_ascii_case(id)))
            .unwrap_or(false);
        if !hit {
            return false;
        }
    }
    if !value_allowed(episode.context.country.as_deref(), &filters.country) {
        return false;
    }
    if !value_allowed(episode.context.device.as_deref(), &filters.device) {
        return false;
    }
    if !filters.outcome.is_empty() && !filters.outcome.contains(&episode.decision.outcome) {
        return false;
    }
    true
}

fn value_allowed(observed: Option<&str>, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    observed
        .map(|v| allowed.iter().any(|a| a.eq_ignore_ascii_case(v)))
        .unwrap_or(false)
}

fn summarize(episodes: &[&Episode]) -> StatsSummary {
    let successful = episodes
        .iter()
        .filter(|ep| {
            matches!(
                ep.decision.outcome,
                Outcome::Ok | Outcome::DefaultUsed
            )
        })
        .count();
    let errors = episodes
        .iter()
        .filter(|ep| ep.decision.outcome == Outcome::Error)
        .count();
    StatsSummary {
        total_clicks: episodes.len(),
        successful_redirects: successful,
        errors,
        avg_latency_ms: avg_latency(episodes),
    }
}

fn avg_latency(episodes: &[&Episode]) -> Option<f64> {
    if episodes.is_empty() {
        return None;
    }
    let total: f64 = episodes
        .iter()
        .map(|ep| ep.decision.latency.as_secs_f64() * 1000.0)
        .sum();
    Some(total / episodes.len() as f64)
}

fn grouped_rows(episodes: &[&Episode], query: &StatsQuery) -> Vec<StatsRow> {
    // BTreeMap keeps group iteration deterministic, so rows with equal
    // click counts come out in a stable order.
    let mut groups: BTreeMap<Vec<String>, Vec<&Episode>> = BTreeMap::new();
    for episode in episodes {
        let key: Vec<String> = query
            .group_by
            .iter()
            .map(|dim| dimension_value(episode, *dim))
            .collect();
        groups.entry(key).or_default().push(episode);
    }

    let mut rows: Vec<StatsRow> = groups
        .into_iter()
        .map(|(key, members)| {
            let dimensions = query
                .group_by
                .iter()
                .zip(key)
                .map(|(dim, value)| (dim.as_str().to_string(), value))
                .collect();
            let summary = summarize(&members);
            StatsRow {
                dimensions,
                clicks: summary.total_clicks,
                successful_redirects: summary.successful_redirects,
                errors: summary.errors,
                avg_latency_ms: summary.avg_latency_ms,
            }
        })
        .collect();

    rows.sort_by(|a, b| b.clicks.cmp(&a.clicks));
    rows
}

fn dimension_value(episode: &Episode, dimension: GroupBy) -> String {
    const UNKNOWN: &str = "unknown";
    match dimension {
        GroupBy::TargetId => episode
            .decision
            .target_id
            .clone()
            .unwrap_or_else(|| UNKNOWN.into()),
        GroupBy::Country => episode
            .context
            .country
            .clone()
            .unwrap_or_else(|| UNKNOWN.into()),
        GroupBy::Device => episode
            .context
            .device
            .clone()
            .unwrap_or_else(|| UNKNOWN.into()),
        GroupBy::UtmSource => episode
            .context
            .utm
            .source
            .clone()
            .unwrap_or_else(|| UNKNOWN.into()),
        GroupBy::UtmCampaign => episode
            .context
            .utm
            .campaign
            .clone()
            .unwrap_or_else(|| UNKNOWN.into()),
        GroupBy::Outcome => episode.decision.outcome.as_str().to_string(),
        GroupBy::Hour => {
            let dt: DateTime<Utc> = episode.timestamp.into();
            dt.format("%Y-%m-%dT%H:00:00Z").to_string()
        }
        GroupBy::Day => {
            let dt: DateTime<Utc> = episode.timestamp.into();
            dt.format("%Y-%m-%d").to_string()
        }
    }
}
