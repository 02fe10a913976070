//! Domain library for the Smartlink service.
//!
//! This crate holds the domain types, the resolution engine, ports (traits),
//! and error definitions. It performs no I/O: configuration lookup, episode
//! persistence, and HTTP concerns live in adapter crates. Keep them out of
//! this crate.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Identifier of a smartlink, used as the storage lookup key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(String);

impl LinkId {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.is_empty() {
            return Err(CoreError::InvalidLinkId("empty".into()));
        }
        if val.len() > 128 {
            return Err(CoreError::InvalidLinkId("too long".into()));
        }
        if !val
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        {
            return Err(CoreError::InvalidLinkId("invalid characters".into()));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a smartlink. Only `Active` permits resolution; the
/// engine treats every other status as a terminal "not currently serving"
/// state (outcome `Expired`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Draft => "draft",
            LinkStatus::Active => "active",
            LinkStatus::Paused => "paused",
            LinkStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(LinkStatus::Draft),
            "active" => Some(LinkStatus::Active),
            "paused" => Some(LinkStatus::Paused),
            "archived" => Some(LinkStatus::Archived),
            _ => None,
        }
    }
}

/// A single condition value on a target: one accepted string, or a set of
/// accepted strings (logical OR within the field). Matching is
/// case-insensitive exact equality; no wildcards or ranges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constraint {
    One(String),
    AnyOf(Vec<String>),
}

/// Constraints on UTM campaign tags. Each declared field must match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Constraint>,
}

impl UtmConditions {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.medium.is_none()
            && self.campaign.is_none()
            && self.term.is_none()
            && self.content.is_none()
    }
}

/// Declared conditions on a target. All declared fields must match the click
/// context (AND across fields); an empty set matches any context.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm: Option<UtmConditions>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.language.is_none()
            && self.device.is_none()
            && self.utm.as_ref().map(|u| u.is_empty()).unwrap_or(true)
    }
}

/// Priority assigned to targets that declare none, so that explicitly
/// prioritized targets always come first.
pub const DEFAULT_PRIORITY: i64 = 1000;

/// One candidate destination within a smartlink configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    /// Unique within the configuration.
    pub target_id: String,
    pub url: String,
    /// Display only; never affects matching.
    pub label: Option<String>,
    /// Absent conditions means "matches any context".
    pub conditions: Option<Conditions>,
    /// Lower value = evaluated first. Absent defaults to [`DEFAULT_PRIORITY`].
    pub priority: Option<i64>,
    /// `false` removes the target from consideration entirely.
    pub enabled: bool,
    /// Inclusive eligibility window; absent bound = unbounded on that side.
    pub valid_from: Option<SystemTime>,
    pub valid_until: Option<SystemTime>,
    /// Non-negative A/B weight among tied matches. Absent defaults to 1;
    /// zero means "never chosen by weighting while a positive-weight
    /// candidate exists".
    pub weight: Option<f64>,
}

impl Target {
    /// Create a target with default enablement and no conditions, window,
    /// priority, or weight.
    pub fn new<S: Into<String>, U: Into<String>>(target_id: S, url: U) -> Self {
        Self {
            target_id: target_id.into(),
            url: url.into(),
            label: None,
            conditions: None,
            priority: None,
            enabled: true,
            valid_from: None,
            valid_until: None,
            weight: None,
        }
    }

    pub fn effective_priority(&self) -> i64 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

/// A named routing configuration: ordered conditional targets plus a default.
///
/// Mutated only by the administrative surface (full replace-on-save); the
/// resolution path never writes it.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkConfig {
    pub link_id: LinkId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: LinkStatus,
    pub targets: Vec<Target>,
    /// Used when no target's conditions match. Must reference a configured
    /// target; a dangling reference surfaces as `Outcome::Error`.
    pub default_target_id: String,
    /// Link-level validity window, independent of any target-level window.
    pub valid_from: Option<SystemTime>,
    pub valid_until: Option<SystemTime>,
}

/// UTM campaign tags observed on one click.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UtmParams {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub term: Option<String>,
    pub content: Option<String>,
}

/// Normalized attributes of one resolution request. Constructed fresh per
/// request and never stored as-is; only the decision is durably recorded.
/// An absent attribute can never satisfy a constraint that requires it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClickContext {
    pub country: Option<String>,
    pub language: Option<String>,
    pub device: Option<String>,
    pub utm: UtmParams,
    /// Authoritative evaluation time unless the caller overrides it.
    pub timestamp: SystemTime,
}

impl ClickContext {
    pub fn at(timestamp: SystemTime) -> Self {
        Self {
            country: None,
            language: None,
            device: None,
            utm: UtmParams::default(),
            timestamp,
        }
    }
}

/// Outcome classification of one resolution.
///
/// `RateLimit` and `Disabled` are reserved for collaborators outside the
/// engine (e.g. an upstream throttle); the engine itself never produces them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A non-default target matched.
    Ok,
    /// Fell through to the default target (or the default matched).
    DefaultUsed,
    /// No eligible targets at all.
    NoMatch,
    /// Link inactive or outside its own validity window.
    Expired,
    /// Configuration inconsistency, e.g. dangling default target id.
    Error,
    RateLimit,
    Disabled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "OK",
            Outcome::DefaultUsed => "DEFAULT_USED",
            Outcome::NoMatch => "NO_MATCH",
            Outcome::Expired => "EXPIRED",
            Outcome::Error => "ERROR",
            Outcome::RateLimit => "RATE_LIMIT",
            Outcome::Disabled => "DISABLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Outcome::Ok),
            "DEFAULT_USED" => Some(Outcome::DefaultUsed),
            "NO_MATCH" => Some(Outcome::NoMatch),
            "EXPIRED" => Some(Outcome::Expired),
            "ERROR" => Some(Outcome::Error),
            "RATE_LIMIT" => Some(Outcome::RateLimit),
            "DISABLED" => Some(Outcome::Disabled),
            _ => None,
        }
    }

    /// Whether this outcome produces a redirect at the HTTP layer.
    pub fn is_redirect(&self) -> bool {
        matches!(self, Outcome::Ok | Outcome::DefaultUsed)
    }
}

/// Per-field record of which condition categories were declared and
/// satisfied on the winning target. Observability only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatchedConditions {
    pub country: bool,
    pub language: bool,
    pub device: bool,
    pub utm: bool,
}

/// The engine's output: immutable once produced, and the sole artifact
/// consumed downstream (HTTP redirect or durable episode record).
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub link_id: String,
    pub target_id: Option<String>,
    pub resolved_url: Option<String>,
    pub outcome: Outcome,
    pub reason: String,
    pub matched_conditions: Option<MatchedConditions>,
    /// Wall-clock evaluation latency. Timing instrumentation, not a
    /// correctness concern.
    pub latency: Duration,
}

/// Durable record of one resolution, used for analytics only.
#[derive(Clone, Debug, PartialEq)]
pub struct Episode {
    pub episode_id: String,
    pub link_id: String,
    pub timestamp: SystemTime,
    pub context: ClickContext,
    pub decision: Decision,
}

/// Persistence-owned metadata for a stored configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigMeta {
    /// Monotonic save counter; bumped by the repository on each put.
    pub version: u64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// A configuration together with its persistence metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredConfig {
    pub config: LinkConfig,
    pub meta: ConfigMeta,
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Source of the uniform variate used for weighted A/B selection.
///
/// Injectable so tests can supply a deterministic draw and assert exact
/// selection outcomes. Does not need to be cryptographically secure.
pub trait WeightSampler: Send + Sync {
    /// Draw a value uniformly in `[0, total)`. `total` is always positive.
    fn draw(&self, total: f64) -> f64;
}

/// Default sampler backed by the thread-local generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformSampler;

impl WeightSampler for UniformSampler {
    fn draw(&self, total: f64) -> f64 {
        use rand::Rng;
        rand::thread_rng().gen_range(0.0..total)
    }
}

/// Repository port for persisting and loading smartlink configurations.
/// Last write wins; no stronger consistency is assumed.
pub trait ConfigRepository: Send + Sync {
    fn get(&self, link_id: &LinkId) -> Result<Option<StoredConfig>, CoreError>;
    /// Create-or-replace. Bumps the version counter and returns the stored
    /// configuration with its metadata.
    fn put(&self, config: LinkConfig, now: SystemTime) -> Result<StoredConfig, CoreError>;
    fn list(&self, limit: usize) -> Result<Vec<StoredConfig>, CoreError>;
    fn delete(&self, link_id: &LinkId) -> Result<(), CoreError>;
}

/// Repository port for resolution episodes (the analytics read side).
pub trait EpisodeRepository: Send + Sync {
    fn record(&self, episode: Episode) -> Result<(), CoreError>;
    /// Most recent first.
    fn list_for_link(&self, link_id: &LinkId, limit: usize) -> Result<Vec<Episode>, CoreError>;
}

/// Core domain errors (no external error crates to keep the core lean).
#[derive(Debug)]
pub enum CoreError {
    InvalidLinkId(String),
    InvalidUrl(String),
    InvalidConfig(String),
    NotFound,
    Repository(String),
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidLinkId(msg) => write!(f, "invalid link id: {}", msg),
            CoreError::InvalidUrl(msg) => write!(f, "invalid url: {}", msg),
            CoreError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            CoreError::NotFound => write!(f, "not found"),
            CoreError::Repository(msg) => write!(f, "repository error: {}", msg),
        }
    }
}

impl Error for CoreError {}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    // Use env! at compile time; fallback literals kept minimal.
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{} — domain library loaded", pkg, ver)
}

pub mod adapters;
pub mod engine;
pub mod filter;
pub mod matcher;
pub mod migrate;
pub mod selector;
pub mod stats;
pub mod validate;
