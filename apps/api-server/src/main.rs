//! api-server — HTTP API for the Smartlink workspace.
//!
//! Provides the public redirect endpoint and the admin API with:
//! - Auth: static bearer token or disabled (dev) mode via AUTH_MODE.
//! - Storage: In-memory or SQLite (file) when the `sqlite` feature is enabled.
//! - CORS: Configurable via CORS_ALLOW_ORIGIN (origin string) for admin frontend.
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! cargo run -p api-server
//!
//! # in-memory storage, token-gated admin API
//! STORAGE_PROVIDER=memory AUTH_MODE=token ADMIN_TOKEN=secret \
//!   cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.

mod config;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderValue;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use domain::adapters::memory_repo::{InMemoryConfigRepo, InMemoryEpisodeRepo};
use domain::engine::ResolutionEngine;
use domain::migrate::{migrate_rule_set, LegacyRule, LegacyRuleSet};
use domain::stats::{build_report, GroupBy, StatsFilters, StatsQuery, TimeRange};
use domain::validate::validate_config;
use domain::{
    ClickContext, Clock, Conditions, ConfigRepository, CoreError, Decision, Episode,
    EpisodeRepository, LinkConfig, LinkId, LinkStatus, Outcome, StoredConfig, Target,
    UtmConditions, UtmParams,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Cap on episodes scanned per stats query; keeps the aggregation bounded
/// for very busy links.
const STATS_EPISODE_SCAN_LIMIT: usize = 10_000;

// Local repo abstraction supporting memory or sqlite (feature-gated).
enum RepoKind {
    Memory(InMemoryConfigRepo, InMemoryEpisodeRepo),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_adapter::SqliteRepo),
}

#[derive(Clone)]
struct AnyRepo {
    kind: Arc<RepoKind>,
}

impl AnyRepo {
    fn memory() -> Self {
        Self {
            kind: Arc::new(RepoKind::Memory(
                InMemoryConfigRepo::new(),
                InMemoryEpisodeRepo::new(),
            )),
        }
    }

    #[cfg(feature = "sqlite")]
    fn sqlite_from_env() -> Result<Self, CoreError> {
        Ok(Self {
            kind: Arc::new(RepoKind::Sqlite(sqlite_adapter::SqliteRepo::from_env()?)),
        })
    }

    fn get(&self, link_id: &LinkId) -> Result<Option<StoredConfig>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(c, _) => c.get(link_id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.get(link_id),
        }
    }

    fn put(&self, config: LinkConfig, now: SystemTime) -> Result<StoredConfig, CoreError> {
        match &*self.kind {
            RepoKind::Memory(c, _) => c.put(config, now),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.put(config, now),
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<StoredConfig>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(c, _) => c.list(limit),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.list(limit),
        }
    }

    fn delete(&self, link_id: &LinkId) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(c, _) => c.delete(link_id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.delete(link_id),
        }
    }

    fn record_episode(&self, episode: Episode) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(_, e) => e.record(episode),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.record(episode),
        }
    }

    fn list_episodes(&self, link_id: &LinkId, limit: usize) -> Result<Vec<Episode>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(_, e) => e.list_for_link(link_id, limit),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.list_for_link(link_id, limit),
        }
    }
}

#[derive(Clone)]
struct AppState {
    repo: AnyRepo,
    engine: ResolutionEngine,
    clock: StdClock,
    auth_mode: config::AuthMode,
    admin_token: Option<String>,
}

#[derive(Clone)]
struct StdClock;
impl Clock for StdClock {
    fn now(&self) -> std::time::SystemTime {
        std::time::SystemTime::now()
    }
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_insecure();

    let repo = build_repo_from_env(&cfg);
    let state = AppState {
        repo,
        engine: ResolutionEngine::new(),
        clock: StdClock,
        auth_mode: cfg.auth_mode.clone(),
        admin_token: cfg.admin_token.clone(),
    };

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = Router::new()
        .route("/:link_id", get(resolve_click))
        .route("/api/links", post(create_link).get(list_links))
        .route(
            "/api/links/:link_id",
            get(get_link).put(put_link).delete(delete_link),
        )
        .route("/api/links/:link_id/stats", get(link_stats))
        .route("/api/resolve", post(resolve_api))
        .route("/api/migrate", post(migrate_rules))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .with_state(state);

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin]))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(%addr, "api-server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind port");
    axum::serve(listener, app).await.expect("server error");
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// Construct a repository instance based on config and feature flags.
fn build_repo_from_env(cfg: &config::Config) -> AnyRepo {
    match cfg.storage_provider {
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => match AnyRepo::sqlite_from_env() {
            Ok(r) => r,
            Err(e) => {
                eprintln!("failed to init SqliteRepo from env: {e}");
                AnyRepo::memory()
            }
        },
        _ => AnyRepo::memory(),
    }
}

// ============================================================================
// Auth
// ============================================================================

fn authorized(headers: &HeaderMap, state: &AppState) -> bool {
    match state.auth_mode {
        config::AuthMode::None => true,
        config::AuthMode::Token => {
            let expected = match state.admin_token.as_deref() {
                Some(t) => t,
                None => return false,
            };
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t == expected)
                .unwrap_or(false)
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(http_common::json_err("unauthorized")),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(http_common::json_error_with_message("bad_request", message)),
    )
        .into_response()
}

fn internal_error(err: &CoreError) -> Response {
    error!(err = %err, "repository error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(http_common::json_err("error")),
    )
        .into_response()
}

// ============================================================================
// DTOs
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_status() -> String {
    "active".to_string()
}

#[derive(Serialize, Deserialize)]
struct TargetDto {
    target_id: String,
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conditions: Option<Conditions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<i64>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    valid_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    weight: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct LinkConfigDto {
    link_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default)]
    targets: Vec<TargetDto>,
    default_target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    valid_until: Option<String>,
}

#[derive(Serialize)]
struct LinkOut {
    config: LinkConfigDto,
    version: u64,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize)]
struct ListOut {
    links: Vec<LinkOut>,
    total: usize,
}

#[derive(Deserialize, Default)]
struct UtmDto {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    medium: Option<String>,
    #[serde(default)]
    campaign: Option<String>,
    #[serde(default)]
    term: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ContextDto {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    utm: UtmDto,
}

#[derive(Deserialize)]
struct ResolveReq {
    #[serde(default)]
    link_id: Option<String>,
    #[serde(default)]
    config: Option<LinkConfigDto>,
    #[serde(default)]
    context: ContextDto,
    /// Evaluation time override, RFC3339. Defaults to the server clock.
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct MatchedOut {
    country: bool,
    language: bool,
    device: bool,
    utm: bool,
}

#[derive(Serialize)]
struct DecisionOut {
    link_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved_url: Option<String>,
    outcome: String,
    reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched_conditions: Option<MatchedOut>,
    latency_ms: f64,
}

#[derive(Deserialize, Default)]
struct LegacyWhenDto {
    #[serde(default)]
    country: Option<domain::Constraint>,
    #[serde(default, rename = "lang")]
    language: Option<domain::Constraint>,
    #[serde(default)]
    device: Option<domain::Constraint>,
    #[serde(default)]
    utm: Option<UtmConditions>,
}

#[derive(Deserialize)]
struct LegacyRuleDto {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    start_at: Option<String>,
    #[serde(default)]
    end_at: Option<String>,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    when: LegacyWhenDto,
    target: String,
}

#[derive(Deserialize)]
struct LegacyRuleSetDto {
    link_id: String,
    #[serde(default)]
    purpose: Option<String>,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default)]
    rules: Vec<LegacyRuleDto>,
    fallback_target: String,
}

#[derive(Serialize)]
struct MigrateOut {
    config: LinkConfigDto,
    stored: bool,
}

// ============================================================================
// DTO conversions
// ============================================================================

fn parse_opt_time(value: &Option<String>) -> Result<Option<SystemTime>, String> {
    match value {
        Some(s) => http_common::parse_rfc3339(s)
            .map(Some)
            .map_err(|e| format!("invalid timestamp '{}': {}", s, e)),
        None => Ok(None),
    }
}

fn dto_to_target(dto: &TargetDto) -> Result<Target, String> {
    Ok(Target {
        target_id: dto.target_id.clone(),
        url: dto.url.clone(),
        label: dto.label.clone(),
        conditions: dto.conditions.clone(),
        priority: dto.priority,
        enabled: dto.enabled,
        valid_from: parse_opt_time(&dto.valid_from)?,
        valid_until: parse_opt_time(&dto.valid_until)?,
        weight: dto.weight,
    })
}

fn dto_to_config(dto: &LinkConfigDto) -> Result<LinkConfig, String> {
    let link_id = LinkId::new(dto.link_id.clone()).map_err(|e| e.to_string())?;
    let status = LinkStatus::parse(&dto.status)
        .ok_or_else(|| format!("unknown status: {}", dto.status))?;
    let targets = dto
        .targets
        .iter()
        .map(dto_to_target)
        .collect::<Result<Vec<_>, String>>()?;
    Ok(LinkConfig {
        link_id,
        name: dto.name.clone(),
        description: dto.description.clone(),
        status,
        targets,
        default_target_id: dto.default_target_id.clone(),
        valid_from: parse_opt_time(&dto.valid_from)?,
        valid_until: parse_opt_time(&dto.valid_until)?,
    })
}

fn target_to_dto(target: &Target) -> TargetDto {
    TargetDto {
        target_id: target.target_id.clone(),
        url: target.url.clone(),
        label: target.label.clone(),
        conditions: target.conditions.clone(),
        priority: target.priority,
        enabled: target.enabled,
        valid_from: target.valid_from.map(http_common::system_time_to_rfc3339),
        valid_until: target.valid_until.map(http_common::system_time_to_rfc3339),
        weight: target.weight,
    }
}

fn config_to_dto(config: &LinkConfig) -> LinkConfigDto {
    LinkConfigDto {
        link_id: config.link_id.as_str().to_string(),
        name: config.name.clone(),
        description: config.description.clone(),
        status: config.status.as_str().to_string(),
        targets: config.targets.iter().map(target_to_dto).collect(),
        default_target_id: config.default_target_id.clone(),
        valid_from: config.valid_from.map(http_common::system_time_to_rfc3339),
        valid_until: config.valid_until.map(http_common::system_time_to_rfc3339),
    }
}

fn stored_to_out(stored: &StoredConfig) -> LinkOut {
    LinkOut {
        config: config_to_dto(&stored.config),
        version: stored.meta.version,
        created_at: http_common::system_time_to_rfc3339(stored.meta.created_at),
        updated_at: http_common::system_time_to_rfc3339(stored.meta.updated_at),
    }
}

fn decision_to_out(decision: &Decision) -> DecisionOut {
    DecisionOut {
        link_id: decision.link_id.clone(),
        target_id: decision.target_id.clone(),
        resolved_url: decision.resolved_url.clone(),
        outcome: decision.outcome.as_str().to_string(),
        reason: decision.reason.clone(),
        matched_conditions: decision.matched_conditions.map(|m| MatchedOut {
            country: m.country,
            language: m.language,
            device: m.device,
            utm: m.utm,
        }),
        latency_ms: decision.latency.as_secs_f64() * 1000.0,
    }
}

fn context_from_dto(dto: &ContextDto, timestamp: SystemTime) -> ClickContext {
    ClickContext {
        country: dto.country.clone(),
        language: dto.language.clone(),
        device: dto.device.clone(),
        utm: UtmParams {
            source: dto.utm.source.clone(),
            medium: dto.utm.medium.clone(),
            campaign: dto.utm.campaign.clone(),
            term: dto.utm.term.clone(),
            content: dto.utm.content.clone(),
        },
        timestamp,
    }
}

// ============================================================================
// Handlers: public redirect
// ============================================================================

/// Build a click context from the incoming request: geo header set by the
/// edge/proxy, user agent classification, primary Accept-Language tag, and
/// utm_* query parameters.
fn context_from_request(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    timestamp: SystemTime,
) -> ClickContext {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    ClickContext {
        country: header_str("x-country"),
        language: http_common::parse_language(
            headers
                .get(header::ACCEPT_LANGUAGE)
                .and_then(|v| v.to_str().ok()),
        ),
        device: Some(http_common::parse_device(
            headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()),
        )),
        utm: UtmParams {
            source: params.get("utm_source").cloned(),
            medium: params.get("utm_medium").cloned(),
            campaign: params.get("utm_campaign").cloned(),
            term: params.get("utm_term").cloned(),
            content: params.get("utm_content").cloned(),
        },
        timestamp,
    }
}

/// Persist an episode for analytics. Recording failures never affect the
/// response already decided for the click.
fn record_episode(state: &AppState, context: ClickContext, decision: Decision) {
    let episode = Episode {
        episode_id: http_common::generate_id(),
        link_id: decision.link_id.clone(),
        timestamp: context.timestamp,
        context,
        decision,
    };
    if let Err(e) = state.repo.record_episode(episode) {
        warn!(err = %e, "failed to record episode");
    }
}

fn decision_response(decision: &Decision) -> Response {
    match decision.outcome {
        Outcome::Ok | Outcome::DefaultUsed => match &decision.resolved_url {
            Some(url) => {
                // Temporary redirect: the destination is re-evaluated per click.
                (StatusCode::FOUND, [(header::LOCATION, url.clone())]).into_response()
            }
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(http_common::json_err("error")),
            )
                .into_response(),
        },
        Outcome::Expired => (
            StatusCode::GONE,
            Json(http_common::json_err("expired")),
        )
            .into_response(),
        Outcome::NoMatch => (
            StatusCode::NOT_FOUND,
            Json(http_common::json_err("no_match")),
        )
            .into_response(),
        Outcome::Error => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(http_common::json_error_with_message("error", &decision.reason)),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(http_common::json_err("error")),
        )
            .into_response(),
    }
}

async fn resolve_click(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let id = match LinkId::new(link_id) {
        Ok(id) => id,
        Err(_) => {
            warn!("bad link id in path");
            return (
                StatusCode::BAD_REQUEST,
                Json(http_common::json_err("invalid_link_id")),
            )
                .into_response();
        }
    };

    let stored = match state.repo.get(&id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            warn!(link_id = %id.as_str(), "resolve 404");
            return (
                StatusCode::NOT_FOUND,
                Json(http_common::json_err("not_found")),
            )
                .into_response();
        }
        Err(e) => return internal_error(&e),
    };

    let context = context_from_request(&headers, &params, state.clock.now());
    let decision = state.engine.resolve(&stored.config, &context, None);
    info!(
        link_id = %id.as_str(),
        outcome = %decision.outcome.as_str(),
        target = decision.target_id.as_deref().unwrap_or("-"),
        "resolved click"
    );

    let response = decision_response(&decision);
    record_episode(&state, context, decision);
    response
}

// ============================================================================
// Handlers: admin API
// ============================================================================

async fn create_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LinkConfigDto>,
) -> Response {
    if !authorized(&headers, &state) {
        return unauthorized();
    }
    let config = match dto_to_config(&body) {
        Ok(c) => c,
        Err(msg) => return bad_request(&msg),
    };
    if let Err(e) = validate_config(&config) {
        return bad_request(&e.to_string());
    }
    match state.repo.get(&config.link_id) {
        Ok(Some(_)) => {
            return (
                StatusCode::CONFLICT,
                Json(http_common::json_error_with_message(
                    "conflict",
                    "Link already exists",
                )),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => return internal_error(&e),
    }
    match state.repo.put(config, state.clock.now()) {
        Ok(stored) => {
            info!(link_id = %stored.config.link_id.as_str(), "link created");
            (StatusCode::CREATED, Json(stored_to_out(&stored))).into_response()
        }
        Err(e) => internal_error(&e),
    }
}

async fn list_links(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers, &state) {
        return unauthorized();
    }
    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| (1..=500).contains(n))
        .unwrap_or(50);
    match state.repo.list(limit) {
        Ok(stored) => {
            let links: Vec<LinkOut> = stored.iter().map(stored_to_out).collect();
            let total = links.len();
            Json(ListOut { links, total }).into_response()
        }
        Err(e) => internal_error(&e),
    }
}

async fn get_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(link_id): Path<String>,
) -> Response {
    if !authorized(&headers, &state) {
        return unauthorized();
    }
    let id = match LinkId::new(link_id) {
        Ok(id) => id,
        Err(e) => return bad_request(&e.to_string()),
    };
    match state.repo.get(&id) {
        Ok(Some(stored)) => Json(stored_to_out(&stored)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(http_common::json_err("not_found")),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}

/// Full replace-on-save: the body is the complete new configuration, no
/// field-level merging.
async fn put_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(link_id): Path<String>,
    Json(body): Json<LinkConfigDto>,
) -> Response {
    if !authorized(&headers, &state) {
        return unauthorized();
    }
    if body.link_id != link_id {
        return bad_request("link_id in body does not match path");
    }
    let config = match dto_to_config(&body) {
        Ok(c) => c,
        Err(msg) => return bad_request(&msg),
    };
    if let Err(e) = validate_config(&config) {
        return bad_request(&e.to_string());
    }
    match state.repo.put(config, state.clock.now()) {
        Ok(stored) => {
            info!(
                link_id = %stored.config.link_id.as_str(),
                version = stored.meta.version,
                "link updated"
            );
            Json(stored_to_out(&stored)).into_response()
        }
        Err(e) => internal_error(&e),
    }
}

async fn delete_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(link_id): Path<String>,
) -> Response {
    if !authorized(&headers, &state) {
        return unauthorized();
    }
    let id = match LinkId::new(link_id) {
        Ok(id) => id,
        Err(e) => return bad_request(&e.to_string()),
    };
    match state.repo.delete(&id) {
        Ok(()) => {
            info!(link_id = %id.as_str(), "link deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(CoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(http_common::json_err("not_found")),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}

/// Resolve against a stored link or an inline configuration without issuing
/// a redirect. Inline configurations are never persisted and leave no
/// episode behind; stored links record one like a real click.
async fn resolve_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ResolveReq>,
) -> Response {
    if !authorized(&headers, &state) {
        return unauthorized();
    }
    let timestamp = match &body.timestamp {
        Some(s) => match http_common::parse_rfc3339(s) {
            Ok(t) => t,
            Err(e) => return bad_request(&format!("invalid timestamp '{}': {}", s, e)),
        },
        None => state.clock.now(),
    };
    let context = context_from_dto(&body.context, timestamp);

    if let Some(dto) = &body.config {
        let config = match dto_to_config(dto) {
            Ok(c) => c,
            Err(msg) => return bad_request(&msg),
        };
        let decision = state.engine.resolve(&config, &context, None);
        return Json(decision_to_out(&decision)).into_response();
    }

    let link_id = match &body.link_id {
        Some(raw) => match LinkId::new(raw.clone()) {
            Ok(id) => id,
            Err(e) => return bad_request(&e.to_string()),
        },
        None => return bad_request("either link_id or config is required"),
    };
    let stored = match state.repo.get(&link_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(http_common::json_err("not_found")),
            )
                .into_response()
        }
        Err(e) => return internal_error(&e),
    };
    let decision = state.engine.resolve(&stored.config, &context, None);
    let out = decision_to_out(&decision);
    record_episode(&state, context, decision);
    Json(out).into_response()
}

fn csv_values(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

async fn link_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(link_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers, &state) {
        return unauthorized();
    }
    let id = match LinkId::new(link_id) {
        Ok(id) => id,
        Err(e) => return bad_request(&e.to_string()),
    };

    let mut group_by = Vec::new();
    if let Some(raw) = params.get("group_by") {
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match GroupBy::parse(part) {
                Some(g) => group_by.push(g),
                None => return bad_request(&format!("unknown group_by dimension: {}", part)),
            }
        }
    }

    let from = match params.get("from") {
        Some(s) => match http_common::parse_rfc3339(s) {
            Ok(t) => Some(t),
            Err(e) => return bad_request(&format!("invalid 'from' timestamp: {}", e)),
        },
        None => None,
    };
    let to = match params.get("to") {
        Some(s) => match http_common::parse_rfc3339(s) {
            Ok(t) => Some(t),
            Err(e) => return bad_request(&format!("invalid 'to' timestamp: {}", e)),
        },
        None => None,
    };
    let time_range = match (from, to) {
        (None, None) => None,
        (f, t) => Some(TimeRange {
            from: f.unwrap_or(UNIX_EPOCH),
            to: t.unwrap_or_else(|| state.clock.now()),
        }),
    };

    let mut outcome = Vec::new();
    if let Some(raw) = params.get("outcome") {
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match Outcome::parse(part) {
                Some(o) => outcome.push(o),
                None => return bad_request(&format!("unknown outcome: {}", part)),
            }
        }
    }

    let query = StatsQuery {
        link_id: Some(id.clone()),
        time_range,
        group_by,
        filters: StatsFilters {
            target_id: params.get("target_id").map(|v| csv_values(v)).unwrap_or_default(),
            country: params.get("country").map(|v| csv_values(v)).unwrap_or_default(),
            device: params.get("device").map(|v| csv_values(v)).unwrap_or_default(),
            outcome,
        },
        limit: params.get("limit").and_then(|v| v.parse().ok()),
        offset: params
            .get("offset")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    };

    let episodes = match state.repo.list_episodes(&id, STATS_EPISODE_SCAN_LIMIT) {
        Ok(eps) => eps,
        Err(e) => return internal_error(&e),
    };
    Json(build_report(&episodes, &query)).into_response()
}

/// Convert a first-generation rule set into the current configuration shape.
/// Pass `?store=true` to also persist the result.
async fn migrate_rules(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<LegacyRuleSetDto>,
) -> Response {
    if !authorized(&headers, &state) {
        return unauthorized();
    }

    let mut rules = Vec::with_capacity(body.rules.len());
    for dto in &body.rules {
        let valid_from = match parse_opt_time(&dto.start_at) {
            Ok(t) => t,
            Err(msg) => return bad_request(&msg),
        };
        let valid_until = match parse_opt_time(&dto.end_at) {
            Ok(t) => t,
            Err(msg) => return bad_request(&msg),
        };
        rules.push(LegacyRule {
            id: dto.id.clone(),
            label: dto.label.clone(),
            priority: dto.priority,
            enabled: dto.enabled,
            valid_from,
            valid_until,
            weight: dto.weight,
            when: Conditions {
                country: dto.when.country.clone(),
                language: dto.when.language.clone(),
                device: dto.when.device.clone(),
                utm: dto.when.utm.clone(),
            },
            target: dto.target.clone(),
        });
    }
    let legacy = LegacyRuleSet {
        link_id: body.link_id.clone(),
        purpose: body.purpose.clone(),
        status: body.status.clone(),
        rules,
        fallback_target: body.fallback_target.clone(),
    };

    let config = match migrate_rule_set(&legacy) {
        Ok(c) => c,
        Err(e) => return bad_request(&e.to_string()),
    };

    let store = params
        .get("store")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if store {
        match state.repo.put(config.clone(), state.clock.now()) {
            Ok(stored) => {
                info!(link_id = %stored.config.link_id.as_str(), "migrated rule set stored");
            }
            Err(e) => return internal_error(&e),
        }
    }

    Json(MigrateOut {
        config: config_to_dto(&config),
        stored: store,
    })
    .into_response()
}
