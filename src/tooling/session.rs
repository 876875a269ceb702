// Per-session state owned by the presentation layer and passed into each service call.
use super::*;

pub const DEFAULT_PAGE_SIZE: usize = 3;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SessionContext {
    clock: Arc<dyn Clock>,
    transcoder: Mutex<Option<ExternalToolStatus>>,
    search_cache: Mutex<SearchCache>,
    last_results: Mutex<Option<SearchOutcome>>,
    selected: Mutex<Option<VideoRecord>>,
    download_in_flight: AtomicBool,
}

impl SessionContext {
    pub fn new(settings: &RuntimeSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: &RuntimeSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            transcoder: Mutex::new(None),
            search_cache: Mutex::new(SearchCache::new(Duration::from_secs(
                settings.search_cache_ttl_secs,
            ))),
            last_results: Mutex::new(None),
            selected: Mutex::new(None),
            download_in_flight: AtomicBool::new(false),
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn cached_transcoder(&self) -> Option<ExternalToolStatus> {
        lock(&self.transcoder).clone()
    }

    pub(super) fn store_transcoder(&self, status: ExternalToolStatus) {
        *lock(&self.transcoder) = Some(status);
    }

    pub(super) fn cached_search(&self, query: &str, limit: u32) -> Option<Vec<VideoRecord>> {
        let now = self.now();
        lock(&self.search_cache).get(query, limit, now)
    }

    pub(super) fn store_search(&self, query: &str, limit: u32, records: Vec<VideoRecord>) {
        let now = self.now();
        let mut cache = lock(&self.search_cache);
        cache.purge_expired(now);
        cache.insert(query, limit, records, now);
    }

    pub fn cached_search_count(&self) -> usize {
        lock(&self.search_cache).len()
    }

    pub(super) fn record_results(&self, outcome: &SearchOutcome) {
        *lock(&self.last_results) = Some(outcome.clone());
        let mut selected = lock(&self.selected);
        let still_listed = selected
            .as_ref()
            .map(|record| outcome.records.iter().any(|candidate| candidate.id == record.id))
            .unwrap_or(false);
        if !still_listed {
            *selected = None;
        }
    }

    pub fn last_results(&self) -> Option<SearchOutcome> {
        lock(&self.last_results).clone()
    }

    /// Select one record of the last result set by id.
    pub fn select(&self, video_id: &str) -> StreamResult<VideoRecord> {
        let record = lock(&self.last_results)
            .as_ref()
            .and_then(|outcome| {
                outcome
                    .records
                    .iter()
                    .find(|record| record.id == video_id)
                    .cloned()
            })
            .ok_or_else(|| StreamError::validation(format!("No listed result with id {video_id}.")))?;
        *lock(&self.selected) = Some(record.clone());
        Ok(record)
    }

    pub fn selected(&self) -> Option<VideoRecord> {
        lock(&self.selected).clone()
    }

    pub fn is_download_in_flight(&self) -> bool {
        self.download_in_flight.load(Ordering::SeqCst)
    }

    /// Claim the single download slot. Rejected, not queued, while another
    /// download holds it.
    pub fn try_begin_download(&self) -> StreamResult<DownloadGuard<'_>> {
        self.download_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| StreamError::DownloadInProgress)?;
        Ok(DownloadGuard {
            flag: &self.download_in_flight,
        })
    }
}

/// Releases the download slot when dropped, on every exit path.
#[derive(Debug)]
pub struct DownloadGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for DownloadGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<'a, T> {
    pub items: &'a [T],
    /// Zero-based, after clamping.
    pub page: usize,
    pub page_count: usize,
}

/// One page of `records`; out-of-range pages clamp to the last one.
pub fn paginate<T>(records: &[T], page: usize, per_page: usize) -> Page<'_, T> {
    let per_page = per_page.max(1);
    let page_count = records.len().div_ceil(per_page).max(1);
    let page = page.min(page_count - 1);
    let start = (page * per_page).min(records.len());
    let end = (start + per_page).min(records.len());
    Page {
        items: &records[start..end],
        page,
        page_count,
    }
}
