// Time-bounded memo of search results keyed by query and limit.
use super::*;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    records: Vec<VideoRecord>,
    stored_at: Instant,
}

/// A zero TTL disables caching entirely.
#[derive(Debug, Clone)]
pub struct SearchCache {
    ttl: Duration,
    entries: HashMap<(String, u32), CacheEntry>,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn key(query: &str, limit: u32) -> (String, u32) {
        (query.to_lowercase(), limit)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) < self.ttl
    }

    pub fn get(&mut self, query: &str, limit: u32, now: Instant) -> Option<Vec<VideoRecord>> {
        let key = Self::key(query, limit);
        let fresh = self
            .entries
            .get(&key)
            .map(|entry| self.is_fresh(entry, now))?;
        if !fresh {
            self.entries.remove(&key);
            return None;
        }
        self.entries.get(&key).map(|entry| entry.records.clone())
    }

    /// Demonstration records are never stored.
    pub fn insert(&mut self, query: &str, limit: u32, records: Vec<VideoRecord>, now: Instant) {
        if self.ttl.is_zero() || records.is_empty() || records.iter().any(|record| record.is_demo) {
            return;
        }
        self.entries.insert(
            Self::key(query, limit),
            CacheEntry {
                records,
                stored_at: now,
            },
        );
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> VideoRecord {
        VideoRecord {
            id: id.to_string(),
            title: format!("Video {id}"),
            url: format!("https://www.youtube.com/watch?v={id}"),
            channel_name: "Channel".to_string(),
            duration_seconds: Some(60),
            view_count: Some(10),
            thumbnail_url: None,
            upload_date: None,
            description: None,
            is_demo: false,
        }
    }

    #[test]
    fn entries_expire_after_ttl() {
        let start = Instant::now();
        let mut cache = SearchCache::new(Duration::from_secs(60));
        cache.insert("Lofi", 20, vec![record("aaaaaaaaaaa")], start);

        let hit = cache.get("lofi", 20, start + Duration::from_secs(59));
        assert_eq!(hit.map(|records| records.len()), Some(1));
        assert!(cache.get("lofi", 10, start).is_none());

        assert!(cache.get("lofi", 20, start + Duration::from_secs(60)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn demonstration_and_empty_results_are_not_cached() {
        let now = Instant::now();
        let mut cache = SearchCache::new(Duration::from_secs(60));
        let mut demo = record("bbbbbbbbbbb");
        demo.is_demo = true;
        cache.insert("q", 5, vec![demo], now);
        cache.insert("q", 6, Vec::new(), now);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let now = Instant::now();
        let mut cache = SearchCache::new(Duration::ZERO);
        cache.insert("q", 5, vec![record("ccccccccccc")], now);
        assert!(cache.get("q", 5, now).is_none());
    }

    #[test]
    fn purge_drops_only_stale_entries() {
        let start = Instant::now();
        let mut cache = SearchCache::new(Duration::from_secs(10));
        cache.insert("old", 5, vec![record("ddddddddddd")], start);
        cache.insert("new", 5, vec![record("eeeeeeeeeee")], start + Duration::from_secs(8));
        assert_eq!(cache.purge_expired(start + Duration::from_secs(12)), 1);
        assert_eq!(cache.len(), 1);
    }
}
