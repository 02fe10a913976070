use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::{
    ConfigMeta, ConfigRepository, CoreError, Episode, EpisodeRepository, LinkConfig, LinkId,
    StoredConfig,
};

/// Simple in-memory configuration repository for tests and single-node
/// deployments. Not thread-safe for high concurrency beyond the internal
/// mutex guarding the map.
pub struct InMemoryConfigRepo {
    inner: Mutex<BTreeMap<String, StoredConfig>>,
}

/// In-memory episode repository for tests and demos.
pub struct InMemoryEpisodeRepo {
    episodes: Mutex<Vec<Episode>>,
}

impl InMemoryConfigRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryConfigRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigRepository for InMemoryConfigRepo {
    fn get(&self, link_id: &LinkId) -> Result<Option<StoredConfig>, CoreError> {
        let map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        Ok(map.get(link_id.as_str()).cloned())
    }

    fn put(&self, config: LinkConfig, now: SystemTime) -> Result<StoredConfig, CoreError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let key = config.link_id.as_str().to_string();
        let meta = match map.get(&key) {
            Some(existing) => ConfigMeta {
                version: existing.meta.version + 1,
                created_at: existing.meta.created_at,
                updated_at: now,
            },
            None => ConfigMeta {
                version: 1,
                created_at: now,
                updated_at: now,
            },
        };
        let stored = StoredConfig { config, meta };
        map.insert(key, stored.clone());
        Ok(stored)
    }

    fn list(&self, limit: usize) -> Result<Vec<StoredConfig>, CoreError> {
        let map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        Ok(map.values().take(limit).cloned().collect())
    }

    fn delete(&self, link_id: &LinkId) -> Result<(), CoreError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        match map.remove(link_id.as_str()) {
            Some(_) => Ok(()),
            None => Err(CoreError::NotFound),
        }
    }
}

impl InMemoryEpisodeRepo {
    pub fn new() -> Self {
        Self {
            episodes: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryEpisodeRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl EpisodeRepository for InMemoryEpisodeRepo {
    fn record(&self, episode: Episode) -> Result<(), CoreError> {
        let mut episodes = self
            .episodes
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        episodes.push(episode);
        Ok(())
    }

    fn list_for_link(&self, link_id: &LinkId, limit: usize) -> Result<Vec<Episode>, CoreError> {
        let episodes = self
            .episodes
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let mut matching: Vec<_> = episodes
            .iter()
            .filter(|ep| ep.link_id == link_id.as_str())
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matching.into_iter().take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClickContext, Decision, LinkStatus, Outcome, Target, UtmParams};
    use std::time::Duration;

    fn mk_config(id: &str) -> LinkConfig {
        LinkConfig {
            link_id: LinkId::new(id).unwrap(),
            name: None,
            description: None,
            status: LinkStatus::Active,
            targets: vec![Target::new("main", "https://example.com")],
            default_target_id: "main".into(),
            valid_from: None,
            valid_until: None,
        }
    }

    fn mk_episode(link_id: &str, at: SystemTime) -> Episode {
        Episode {
            episode_id: "ep".into(),
            link_id: link_id.into(),
            timestamp: at,
            context: ClickContext {
                country: None,
                language: None,
                device: None,
                utm: UtmParams::default(),
                timestamp: at,
            },
            decision: Decision {
                link_id: link_id.into(),
                target_id: Some("main".into()),
                resolved_url: Some("https://example.com".into()),
                outcome: Outcome::DefaultUsed,
                reason: String::new(),
                matched_conditions: None,
                latency: Duration::from_micros(50),
            },
        }
    }

    #[test]
    fn put_get_roundtrip() {
        let repo = InMemoryConfigRepo::new();
        let stored = repo
            .put(mk_config("promo"), SystemTime::UNIX_EPOCH)
            .unwrap();
        assert_eq!(stored.meta.version, 1);
        let got = repo
            .get(&LinkId::new("promo").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(got.config.default_target_id, "main");
    }

    #[test]
    fn put_bumps_version_and_keeps_created_at() {
        let repo = InMemoryConfigRepo::new();
        let t0 = SystemTime::UNIX_EPOCH;
        let t1 = t0 + Duration::from_secs(60);
        repo.put(mk_config("promo"), t0).unwrap();
        let stored = repo.put(mk_config("promo"), t1).unwrap();
        assert_eq!(stored.meta.version, 2);
        assert_eq!(stored.meta.created_at, t0);
        assert_eq!(stored.meta.updated_at, t1);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let repo = InMemoryConfigRepo::new();
        let err = repo.delete(&LinkId::new("ghost").unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }

    #[test]
    fn list_honors_limit() {
        let repo = InMemoryConfigRepo::new();
        for i in 0..10 {
            repo.put(mk_config(&format!("link{i}")), SystemTime::UNIX_EPOCH)
                .unwrap();
        }
        assert_eq!(repo.list(5).unwrap().len(), 5);
    }

    #[test]
    fn episodes_come_back_most_recent_first() {
        let repo = InMemoryEpisodeRepo::new();
        let t0 = SystemTime::UNIX_EPOCH;
        repo.record(mk_episode("promo", t0)).unwrap();
        repo.record(mk_episode("promo", t0 + Duration::from_secs(10)))
            .unwrap();
        repo.record(mk_episode("other", t0 + Duration::from_secs(20)))
            .unwrap();

        let got = repo
            .list_for_link(&LinkId::new("promo").unwrap(), 10)
            .unwrap();
        assert_eq!(got.len(), 2);
        assert!(got[0].timestamp > got[1].timestamp);
    }
}
