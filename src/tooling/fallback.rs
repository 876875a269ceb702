// Ordered fallback steps per operation, the HTML scrape strategy and
// demonstration records.
use super::*;

pub(super) const SEARCH_PAGE_URL: &str = "https://www.youtube.com/results";
pub(super) const SCRAPE_HOSTS: [&str; 1] = ["youtube.com"];
pub(super) const SCRAPE_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const SCRAPE_BODY_LIMIT: u64 = 8 * 1024 * 1024;

const SCRAPE_ID_PATTERNS: [&str; 2] = [
    r#""videoId":"([A-Za-z0-9_-]{11})""#,
    r"/watch\?v=([A-Za-z0-9_-]{11})",
];

static SCRAPE_ID_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Search,
    Metadata,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStep {
    Primary,
    /// Same command again after a short backoff.
    TimeoutRetry,
    /// Scrape the public results page and resolve each id.
    HtmlScrape,
    /// Download again with format constraints dropped.
    RelaxedFormat,
    /// Canned records, flagged as such.
    Demonstration,
}

/// How one step ended, as far as the plan cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Produced,
    /// Ran fine but yielded nothing usable.
    Empty,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPlan {
    operation: Operation,
    html_scrape: bool,
}

impl FallbackPlan {
    pub fn for_search(html_scrape: bool) -> Self {
        Self {
            operation: Operation::Search,
            html_scrape,
        }
    }

    pub fn for_metadata() -> Self {
        Self {
            operation: Operation::Metadata,
            html_scrape: false,
        }
    }

    pub fn for_download() -> Self {
        Self {
            operation: Operation::Download,
            html_scrape: false,
        }
    }

    pub fn first_step(&self) -> FallbackStep {
        FallbackStep::Primary
    }

    /// The step to run after `step` ended with `result`, or `None` when the
    /// request is finished, either successfully or for good.
    pub fn next_step(&self, step: FallbackStep, result: AttemptResult) -> Option<FallbackStep> {
        if result == AttemptResult::Produced {
            return None;
        }
        match (self.operation, step) {
            (Operation::Search, FallbackStep::Primary) if self.html_scrape => {
                Some(FallbackStep::HtmlScrape)
            }
            (Operation::Search, FallbackStep::Primary | FallbackStep::HtmlScrape) => {
                Some(FallbackStep::Demonstration)
            }
            (Operation::Metadata, FallbackStep::Primary) if result == AttemptResult::TimedOut => {
                Some(FallbackStep::TimeoutRetry)
            }
            (Operation::Download, FallbackStep::Primary)
                if matches!(result, AttemptResult::Failed | AttemptResult::TimedOut) =>
            {
                Some(FallbackStep::RelaxedFormat)
            }
            _ => None,
        }
    }
}

/// One executed step: how it ended, and what it produced or why it failed.
#[derive(Debug)]
pub(super) struct Attempt<T> {
    pub(super) result: AttemptResult,
    pub(super) value: Option<T>,
    pub(super) error: Option<StreamError>,
}

impl<T> Attempt<T> {
    pub(super) fn produced(value: T) -> Self {
        Self {
            result: AttemptResult::Produced,
            value: Some(value),
            error: None,
        }
    }

    pub(super) fn empty(error: Option<StreamError>) -> Self {
        Self {
            result: AttemptResult::Empty,
            value: None,
            error,
        }
    }

    pub(super) fn failed(error: StreamError) -> Self {
        let result = match &error {
            StreamError::ExternalTimeout(_) => AttemptResult::TimedOut,
            _ => AttemptResult::Failed,
        };
        Self {
            result,
            value: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultOrigin {
    Live,
    Scraped,
    Demonstration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub query: String,
    pub records: Vec<VideoRecord>,
    pub origin: ResultOrigin,
    pub from_cache: bool,
}

impl SearchOutcome {
    pub fn is_demonstration(&self) -> bool {
        self.origin == ResultOrigin::Demonstration
    }
}

pub trait PageFetcher: Send + Sync {
    fn fetch(&self, url: &str, timeout: Duration) -> StreamResult<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UreqPageFetcher;

impl PageFetcher for UreqPageFetcher {
    fn fetch(&self, url: &str, timeout: Duration) -> StreamResult<String> {
        let parsed = ensure_trusted_https_url(url, &SCRAPE_HOSTS)?;
        debug!("Fetching {parsed}");
        let response = ureq::get(parsed.as_str())
            .timeout(timeout)
            .set("User-Agent", SCRAPE_USER_AGENT)
            .set("Accept-Language", "en-US,en;q=0.8")
            .call()
            .map_err(|error| StreamError::http(format!("Failed to fetch results page: {error}")))?;
        let mut body = Vec::new();
        response
            .into_reader()
            .take(SCRAPE_BODY_LIMIT)
            .read_to_end(&mut body)
            .map_err(|error| StreamError::http(format!("Failed to read results page: {error}")))?;
        Ok(String::from_utf8_lossy(&body).to_string())
    }
}

pub(super) fn search_page_url(query: &str) -> StreamResult<String> {
    Url::parse_with_params(SEARCH_PAGE_URL, &[("search_query", query)])
        .map(|url| url.to_string())
        .map_err(|error| StreamError::http(format!("Failed to build search URL: {error}")))
}

fn scrape_id_regexes() -> &'static [Regex] {
    SCRAPE_ID_REGEXES.get_or_init(|| {
        SCRAPE_ID_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Video ids in document order, deduplicated, at most `limit`.
pub(super) fn extract_video_ids(html: &str, limit: usize) -> Vec<String> {
    let mut found: Vec<(usize, String)> = scrape_id_regexes()
        .iter()
        .flat_map(|regex| {
            regex
                .captures_iter(html)
                .filter_map(|captures| captures.get(1))
                .map(|id| (id.start(), id.as_str().to_string()))
                .collect::<Vec<_>>()
        })
        .collect();
    found.sort_by_key(|(offset, _)| *offset);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, id)| id)
        .filter(|id| seen.insert(id.clone()))
        .take(limit)
        .collect()
}

const DEMONSTRATION_SEEDS: [(&str, &str, u64, u64); 3] = [
    ("dQw4w9WgXcQ", "Demo Channel", 225, 1_234_567),
    ("kJQP7kiw5Fk", "Test Channel", 260, 987_654),
    ("9bZkp7q19f0", "Sample Channel", 252, 2_345_678),
];

/// Fixed placeholder records for when every real strategy came up empty.
pub fn demonstration_records(query: &str) -> Vec<VideoRecord> {
    DEMONSTRATION_SEEDS
        .iter()
        .enumerate()
        .map(|(index, (id, channel, duration, views))| VideoRecord {
            id: (*id).to_string(),
            title: format!("[DEMO] Result for \"{query}\" - Example {}", index + 1),
            url: watch_url(id),
            channel_name: (*channel).to_string(),
            duration_seconds: Some(*duration),
            view_count: Some(*views),
            thumbnail_url: Some(format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")),
            upload_date: None,
            description: Some("Placeholder shown because no live results were available.".to_string()),
            is_demo: true,
        })
        .collect()
}
