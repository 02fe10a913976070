//! sqlite-adapter — SQLite implementation of the repository ports for local/dev.
//!
//! Purpose
//! - Provide a lightweight, file-based store to run the system locally
//!   without external dependencies.
//! - Implements the `ConfigRepository` and `EpisodeRepository` traits from
//!   the `domain` crate.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - Stores timestamps as seconds since UNIX_EPOCH; resolution latency as
//!   microseconds.
//! - Target conditions are stored as a JSON column; they are opaque to SQL.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{
    ClickContext, Conditions, ConfigMeta, ConfigRepository, CoreError, Decision, Episode,
    EpisodeRepository, LinkConfig, LinkId, LinkStatus, MatchedConditions, Outcome, StoredConfig,
    Target, UtmParams,
};
use rusqlite::{params, Connection};

/// SQLite-backed repository for local development.
pub struct SqliteRepo {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteRepo {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(map_sqerr)?;
        init_schema(&conn)?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    /// Construct from env var `DB_PATH` (defaults to `./data/smartlinks.db`).
    pub fn from_env() -> Result<Self, CoreError> {
        let path = std::env::var("DB_PATH").unwrap_or_else(|_| "./data/smartlinks.db".to_string());
        // Ensure directory exists
        if let Some(dir) = std::path::Path::new(&path).parent() { let _ = std::fs::create_dir_all(dir); }
        Self::new(path)
    }
}

fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            link_id TEXT PRIMARY KEY,
            name TEXT,
            description TEXT,
            status TEXT NOT NULL,
            default_target_id TEXT NOT NULL,
            valid_from INTEGER,
            valid_until INTEGER,
            version INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS link_targets (
            link_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            target_id TEXT NOT NULL,
            url TEXT NOT NULL,
            label TEXT,
            conditions TEXT,
            priority INTEGER,
            enabled INTEGER NOT NULL DEFAULT 1,
            valid_from INTEGER,
            valid_until INTEGER,
            weight REAL,
            PRIMARY KEY (link_id, idx)
        );
        CREATE TABLE IF NOT EXISTS episodes (
            episode_id TEXT PRIMARY KEY,
            link_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            country TEXT,
            language TEXT,
            device TEXT,
            utm_source TEXT,
            utm_medium TEXT,
            utm_campaign TEXT,
            utm_term TEXT,
            utm_content TEXT,
            target_id TEXT,
            resolved_url TEXT,
            outcome TEXT NOT NULL,
            reason TEXT NOT NULL,
            matched_country INTEGER,
            matched_language INTEGER,
            matched_device INTEGER,
            matched_utm INTEGER,
            latency_us INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_link ON episodes(link_id);
        CREATE INDEX IF NOT EXISTS idx_episodes_timestamp ON episodes(timestamp);
        "#
    ).map_err(map_sqerr)?;
    Ok(())
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> CoreError { CoreError::Repository(format!("sqlite error: {e}")) }

fn system_time_to_secs(t: SystemTime) -> u64 { t.duration_since(UNIX_EPOCH).unwrap_or(Duration::from_secs(0)).as_secs() }
fn secs_to_system_time(secs: u64) -> SystemTime { UNIX_EPOCH + Duration::from_secs(secs) }

fn conditions_to_json(conditions: &Option<Conditions>) -> Result<Option<String>, CoreError> {
    match conditions {
        Some(c) => serde_json::to_string(c)
            .map(Some)
            .map_err(|e| CoreError::Repository(format!("conditions encode: {e}"))),
        None => Ok(None),
    }
}

fn conditions_from_json(raw: Option<String>) -> Result<Option<Conditions>, CoreError> {
    match raw {
        Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| CoreError::Repository(format!("bad conditions in db: {e}"))),
        None => Ok(None),
    }
}

fn row_to_target(row: &rusqlite::Row) -> Result<Target, CoreError> {
    let target_id: String = row.get(0).map_err(map_sqerr)?;
    let url: String = row.get(1).map_err(map_sqerr)?;
    let label: Option<String> = row.get(2).map_err(map_sqerr)?;
    let conditions_raw: Option<String> = row.get(3).map_err(map_sqerr)?;
    let priority: Option<i64> = row.get(4).map_err(map_sqerr)?;
    let enabled: i64 = row.get(5).map_err(map_sqerr)?;
    let valid_from: Option<i64> = row.get(6).map_err(map_sqerr)?;
    let valid_until: Option<i64> = row.get(7).map_err(map_sqerr)?;
    let weight: Option<f64> = row.get(8).map_err(map_sqerr)?;

    Ok(Target {
        target_id,
        url,
        label,
        conditions: conditions_from_json(conditions_raw)?,
        priority,
        enabled: enabled != 0,
        valid_from: valid_from.map(|t| secs_to_system_time(t as u64)),
        valid_until: valid_until.map(|t| secs_to_system_time(t as u64)),
        weight,
    })
}

impl SqliteRepo {
    fn load_targets(&self, conn: &Connection, link_id: &str) -> Result<Vec<Target>, CoreError> {
        let mut stmt = conn.prepare(
            "SELECT target_id, url, label, conditions, priority, enabled, valid_from, valid_until, weight
             FROM link_targets WHERE link_id = ?1 ORDER BY idx"
        ).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![link_id]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_target(row)?);
        }
        Ok(out)
    }

    fn row_to_stored(&self, conn: &Connection, row: &rusqlite::Row) -> Result<StoredConfig, CoreError> {
        let link_id_str: String = row.get(0).map_err(map_sqerr)?;
        let name: Option<String> = row.get(1).map_err(map_sqerr)?;
        let description: Option<String> = row.get(2).map_err(map_sqerr)?;
        let status_str: String = row.get(3).map_err(map_sqerr)?;
        let default_target_id: String = row.get(4).map_err(map_sqerr)?;
        let valid_from: Option<i64> = row.get(5).map_err(map_sqerr)?;
        let valid_until: Option<i64> = row.get(6).map_err(map_sqerr)?;
        let version: i64 = row.get(7).map_err(map_sqerr)?;
        let created_at: i64 = row.get(8).map_err(map_sqerr)?;
        let updated_at: i64 = row.get(9).map_err(map_sqerr)?;

        let targets = self.load_targets(conn, &link_id_str)?;
        let link_id = LinkId::new(link_id_str)
            .map_err(|e| CoreError::Repository(format!("bad link id in db: {e}")))?;
        let status = LinkStatus::parse(&status_str)
            .ok_or_else(|| CoreError::Repository(format!("bad status in db: {status_str}")))?;

        Ok(StoredConfig {
            config: LinkConfig {
                link_id,
                name,
                description,
                status,
                targets,
                default_target_id,
                valid_from: valid_from.map(|t| secs_to_system_time(t as u64)),
                valid_until: valid_until.map(|t| secs_to_system_time(t as u64)),
            },
            meta: ConfigMeta {
                version: version as u64,
                created_at: secs_to_system_time(created_at as u64),
                updated_at: secs_to_system_time(updated_at as u64),
            },
        })
    }
}

const LINK_COLUMNS: &str =
    "link_id, name, description, status, default_target_id, valid_from, valid_until, version, created_at, updated_at";

impl ConfigRepository for SqliteRepo {
    fn get(&self, link_id: &LinkId) -> Result<Option<StoredConfig>, CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE link_id = ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![link_id.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(self.row_to_stored(&conn, row)?))
        } else {
            Ok(None)
        }
    }

    fn put(&self, config: LinkConfig, now: SystemTime) -> Result<StoredConfig, CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;

        // Replace-on-save: carry the previous version and creation time
        // forward when the link already exists.
        let existing: Option<(i64, i64)> = {
            let mut stmt = tx
                .prepare("SELECT version, created_at FROM links WHERE link_id = ?1")
                .map_err(map_sqerr)?;
            let mut rows = stmt.query(params![config.link_id.as_str()]).map_err(map_sqerr)?;
            match rows.next().map_err(map_sqerr)? {
                Some(row) => Some((row.get(0).map_err(map_sqerr)?, row.get(1).map_err(map_sqerr)?)),
                None => None,
            }
        };
        let now_secs = system_time_to_secs(now) as i64;
        let (version, created_at) = match existing {
            Some((v, c)) => (v + 1, c),
            None => (1, now_secs),
        };

        tx.execute(
            "INSERT OR REPLACE INTO links(link_id, name, description, status, default_target_id, valid_from, valid_until, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                config.link_id.as_str(),
                config.name,
                config.description,
                config.status.as_str(),
                config.default_target_id,
                config.valid_from.map(|t| system_time_to_secs(t) as i64),
                config.valid_until.map(|t| system_time_to_secs(t) as i64),
                version,
                created_at,
                now_secs,
            ],
        ).map_err(map_sqerr)?;

        tx.execute("DELETE FROM link_targets WHERE link_id = ?1", params![config.link_id.as_str()])
            .map_err(map_sqerr)?;
        for (idx, target) in config.targets.iter().enumerate() {
            tx.execute(
                "INSERT INTO link_targets(link_id, idx, target_id, url, label, conditions, priority, enabled, valid_from, valid_until, weight)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    config.link_id.as_str(),
                    idx as i64,
                    target.target_id,
                    target.url,
                    target.label,
                    conditions_to_json(&target.conditions)?,
                    target.priority,
                    target.enabled as i64,
                    target.valid_from.map(|t| system_time_to_secs(t) as i64),
                    target.valid_until.map(|t| system_time_to_secs(t) as i64),
                    target.weight,
                ],
            ).map_err(map_sqerr)?;
        }
        tx.commit().map_err(map_sqerr)?;

        Ok(StoredConfig {
            config,
            meta: ConfigMeta {
                version: version as u64,
                created_at: secs_to_system_time(created_at as u64),
                updated_at: now,
            },
        })
    }

    fn list(&self, limit: usize) -> Result<Vec<StoredConfig>, CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!("SELECT {LINK_COLUMNS} FROM links ORDER BY link_id LIMIT ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![limit as i64]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(self.row_to_stored(&conn, row)?);
        }
        Ok(out)
    }

    fn delete(&self, link_id: &LinkId) -> Result<(), CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        tx.execute("DELETE FROM link_targets WHERE link_id = ?1", params![link_id.as_str()])
            .map_err(map_sqerr)?;
        let changed = tx
            .execute("DELETE FROM links WHERE link_id = ?1", params![link_id.as_str()])
            .map_err(map_sqerr)?;
        tx.commit().map_err(map_sqerr)?;
        if changed == 0 { Err(CoreError::NotFound) } else { Ok(()) }
    }
}

impl EpisodeRepository for SqliteRepo {
    fn record(&self, episode: Episode) -> Result<(), CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let matched = episode.decision.matched_conditions;
        conn.execute(
            "INSERT INTO episodes(episode_id, link_id, timestamp, country, language, device, utm_source, utm_medium, utm_campaign, utm_term, utm_content, target_id, resolved_url, outcome, reason, matched_country, matched_language, matched_device, matched_utm, latency_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                episode.episode_id,
                episode.link_id,
                system_time_to_secs(episode.timestamp) as i64,
                episode.context.country,
                episode.context.language,
                episode.context.device,
                episode.context.utm.source,
                episode.context.utm.medium,
                episode.context.utm.campaign,
                episode.context.utm.term,
                episode.context.utm.content,
                episode.decision.target_id,
                episode.decision.resolved_url,
                episode.decision.outcome.as_str(),
                episode.decision.reason,
                matched.map(|m| m.country as i64),
                matched.map(|m| m.language as i64),
                matched.map(|m| m.device as i64),
                matched.map(|m| m.utm as i64),
                episode.decision.latency.as_micros() as i64,
            ],
        ).map_err(map_sqerr)?;
        Ok(())
    }

    fn list_for_link(&self, link_id: &LinkId, limit: usize) -> Result<Vec<Episode>, CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let mut stmt = conn.prepare(
            "SELECT episode_id, link_id, timestamp, country, language, device, utm_source, utm_medium, utm_campaign, utm_term, utm_content, target_id, resolved_url, outcome, reason, matched_country, matched_language, matched_device, matched_utm, latency_us
             FROM episodes WHERE link_id = ?1 ORDER BY timestamp DESC LIMIT ?2"
        ).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![link_id.as_str(), limit as i64]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_episode(row)?);
        }
        Ok(out)
    }
}

fn row_to_episode(row: &rusqlite::Row) -> Result<Episode, CoreError> {
    let episode_id: String = row.get(0).map_err(map_sqerr)?;
    let link_id: String = row.get(1).map_err(map_sqerr)?;
    let timestamp: i64 = row.get(2).map_err(map_sqerr)?;
    let country: Option<String> = row.get(3).map_err(map_sqerr)?;
    let language: Option<String> = row.get(4).map_err(map_sqerr)?;
    let device: Option<String> = row.get(5).map_err(map_sqerr)?;
    let utm_source: Option<String> = row.get(6).map_err(map_sqerr)?;
    let utm_medium: Option<String> = row.get(7).map_err(map_sqerr)?;
    let utm_campaign: Option<String> = row.get(8).map_err(map_sqerr)?;
    let utm_term: Option<String> = row.get(9).map_err(map_sqerr)?;
    let utm_content: Option<String> = row.get(10).map_err(map_sqerr)?;
    let target_id: Option<String> = row.get(11).map_err(map_sqerr)?;
    let resolved_url: Option<String> = row.get(12).map_err(map_sqerr)?;
    let outcome_str: String = row.get(13).map_err(map_sqerr)?;
    let reason: String = row.get(14).map_err(map_sqerr)?;
    let matched_country: Option<i64> = row.get(15).map_err(map_sqerr)?;
    let matched_language: Option<i64> = row.get(16).map_err(map_sqerr)?;
    let matched_device: Option<i64> = row.get(17).map_err(map_sqerr)?;
    let matched_utm: Option<i64> = row.get(18).map_err(map_sqerr)?;
    let latency_us: i64 = row.get(19).map_err(map_sqerr)?;

    let outcome = Outcome::parse(&outcome_str)
        .ok_or_else(|| CoreError::Repository(format!("bad outcome in db: {outcome_str}")))?;
    let matched_conditions = match (matched_country, matched_language, matched_device, matched_utm) {
        (Some(c), Some(l), Some(d), Some(u)) => Some(MatchedConditions {
            country: c != 0,
            language: l != 0,
            device: d != 0,
            utm: u != 0,
        }),
        _ => None,
    };

    let at = secs_to_system_time(timestamp as u64);
    Ok(Episode {
        episode_id,
        link_id: link_id.clone(),
        timestamp: at,
        context: ClickContext {
            country,
            language,
            device,
            utm: UtmParams {
                source: utm_source,
                medium: utm_medium,
                campaign: utm_campaign,
                term: utm_term,
                content: utm_content,
            },
            timestamp: at,
        },
        decision: Decision {
            link_id,
            target_id,
            resolved_url,
            outcome,
            reason,
            matched_conditions,
            latency: Duration::from_micros(latency_us as u64),
        },
    })
}
