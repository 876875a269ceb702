// Canonical video records and normalization of yt-dlp JSON output.
use super::*;

pub const UNTITLED_PLACEHOLDER: &str = "Untitled video";
pub const UNKNOWN_CHANNEL_PLACEHOLDER: &str = "Unknown channel";
pub const MISSING_VALUE_TEXT: &str = "N/A";
pub(super) const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
pub(super) const EMBED_URL_PREFIX: &str = "https://www.youtube.com/embed/";

// Ordered; the first pattern that matches wins.
const VIDEO_ID_PATTERNS: [&str; 3] = [
    r"youtube(?:-nocookie)?\.com/(?:watch\?(?:[^#]*&)?v=|embed/|v/|shorts/|live/)([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
    r"youtu\.be/([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
    r"^([A-Za-z0-9_-]{11})$",
];

static VIDEO_ID_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();

fn video_id_regexes() -> &'static [Regex] {
    VIDEO_ID_REGEXES.get_or_init(|| {
        VIDEO_ID_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub channel_name: String,
    pub duration_seconds: Option<u64>,
    pub view_count: Option<u64>,
    pub thumbnail_url: Option<String>,
    pub upload_date: Option<String>,
    pub description: Option<String>,
    /// Canned placeholder data, never a real search hit.
    #[serde(default)]
    pub is_demo: bool,
}

impl VideoRecord {
    pub fn duration_text(&self) -> String {
        duration_text(self.duration_seconds)
    }

    pub fn view_count_text(&self, style: ViewCountStyle) -> String {
        format_view_count(self.view_count, style)
    }

    pub fn embed_url(&self) -> String {
        format!("{EMBED_URL_PREFIX}{}", self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewCountStyle {
    /// `1,234,567`
    #[default]
    Grouped,
    /// `1.2M`
    Compact,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct YtdlpThumbnail {
    pub(super) url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct YtdlpEntry {
    pub(super) id: Option<String>,
    pub(super) title: Option<String>,
    pub(super) webpage_url: Option<String>,
    pub(super) original_url: Option<String>,
    pub(super) uploader: Option<String>,
    pub(super) channel: Option<String>,
    pub(super) duration: Option<serde_json::Value>,
    pub(super) view_count: Option<serde_json::Value>,
    pub(super) thumbnail: Option<String>,
    pub(super) thumbnails: Option<Vec<YtdlpThumbnail>>,
    pub(super) upload_date: Option<String>,
    pub(super) description: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

/// Seconds from a JSON number or numeric string. Negative and non-finite
/// values are treated as absent.
pub fn parse_seconds_value(value: &serde_json::Value) -> Option<u64> {
    let seconds = match value {
        serde_json::Value::Number(number) => number.as_f64()?,
        serde_json::Value::String(raw) => raw.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(seconds.trunc() as u64)
}

/// `M:SS` below one hour, `H:MM:SS` above; the leading unit is never padded.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return MISSING_VALUE_TEXT.to_string();
    }
    let total = seconds.trunc() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub fn duration_text(seconds: Option<u64>) -> String {
    seconds
        .map(|value| format_duration(value as f64))
        .unwrap_or_else(|| MISSING_VALUE_TEXT.to_string())
}

pub(super) fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

pub fn format_view_count(count: Option<u64>, style: ViewCountStyle) -> String {
    let Some(count) = count else {
        return MISSING_VALUE_TEXT.to_string();
    };
    match style {
        ViewCountStyle::Grouped => group_thousands(count),
        ViewCountStyle::Compact => {
            let thousands = count as f64 / 1_000.0;
            let millions = count as f64 / 1_000_000.0;
            if count < 1_000 {
                count.to_string()
            } else if (thousands * 10.0).round() / 10.0 < 1_000.0 {
                format!("{thousands:.1}K")
            } else {
                format!("{millions:.1}M")
            }
        }
    }
}

fn is_platform_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    ["youtube.com", "youtu.be", "youtube-nocookie.com"]
        .iter()
        .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
}

fn looks_like_url(input: &str) -> bool {
    input.contains("://") || input.contains('/') || input.starts_with("www.")
}

/// Extract the 11-character video identifier from any accepted form:
/// watch, short-link, embed, shorts/live links, or a bare identifier.
pub fn extract_video_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if looks_like_url(trimmed) {
        let absolute = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };
        let parsed = Url::parse(&absolute).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        if !parsed.host_str().map(is_platform_host).unwrap_or(false) {
            return None;
        }
    }
    video_id_regexes()
        .iter()
        .find_map(|regex| regex.captures(trimmed))
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_string())
}

pub(super) fn watch_url(video_id: &str) -> String {
    format!("{WATCH_URL_PREFIX}{video_id}")
}

/// Reduce any accepted URL form to the single canonical watch URL.
pub fn canonicalize_url(input: &str) -> StreamResult<String> {
    extract_video_id(input)
        .map(|video_id| watch_url(&video_id))
        .ok_or_else(|| StreamError::validation("Unrecognized YouTube link or video id."))
}

fn format_upload_date(raw: String) -> String {
    if raw.len() == 8 && raw.chars().all(|ch| ch.is_ascii_digit()) {
        format!("{}-{}-{}", &raw[0..4], &raw[4..6], &raw[6..8])
    } else {
        raw
    }
}

pub(super) fn normalize_entry(entry: YtdlpEntry) -> Option<VideoRecord> {
    let page_url = non_empty(entry.webpage_url).or_else(|| non_empty(entry.original_url));
    // Entries that cannot be keyed on a platform video id have no canonical
    // watch URL and are dropped.
    let id = non_empty(entry.id)
        .as_deref()
        .and_then(extract_video_id)
        .or_else(|| page_url.as_deref().and_then(extract_video_id))?;
    let url = watch_url(&id);

    let thumbnail_url = non_empty(entry.thumbnail).or_else(|| {
        entry
            .thumbnails
            .unwrap_or_default()
            .into_iter()
            .rev()
            .find_map(|thumbnail| non_empty(thumbnail.url))
    });

    Some(VideoRecord {
        id,
        title: non_empty(entry.title).unwrap_or_else(|| UNTITLED_PLACEHOLDER.to_string()),
        url,
        channel_name: non_empty(entry.uploader)
            .or_else(|| non_empty(entry.channel))
            .unwrap_or_else(|| UNKNOWN_CHANNEL_PLACEHOLDER.to_string()),
        duration_seconds: entry.duration.as_ref().and_then(parse_seconds_value),
        view_count: entry.view_count.as_ref().and_then(parse_seconds_value),
        thumbnail_url,
        upload_date: non_empty(entry.upload_date).map(format_upload_date),
        description: non_empty(entry.description),
        is_demo: false,
    })
}

/// Parse newline-delimited yt-dlp JSON. Malformed lines, entries without an
/// identifier and repeated identifiers are skipped; order is preserved.
pub fn parse_search_output(raw_stdout: &str) -> Vec<VideoRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::new();
    for (index, line) in raw_stdout.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: YtdlpEntry = match serde_json::from_str(trimmed) {
            Ok(entry) => entry,
            Err(error) => {
                warn!("Skipping malformed yt-dlp line {}: {error}", index + 1);
                continue;
            }
        };
        let Some(record) = normalize_entry(entry) else {
            warn!("Skipping yt-dlp line {} without a video id", index + 1);
            continue;
        };
        if seen.insert(record.id.clone()) {
            records.push(record);
        }
    }
    records
}

/// Parse a single-video document; falls back to the first usable line when
/// the tool printed line-delimited output instead.
pub fn parse_metadata_output(raw_stdout: &str) -> Option<VideoRecord> {
    serde_json::from_str::<YtdlpEntry>(raw_stdout.trim())
        .ok()
        .and_then(normalize_entry)
        .or_else(|| parse_search_output(raw_stdout).into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duration_formatting_uses_unpadded_leading_unit() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(61.0), "1:01");
        assert_eq!(format_duration(599.9), "9:59");
        assert_eq!(format_duration(3661.0), "1:01:01");
        assert_eq!(format_duration(36_000.0), "10:00:00");
        assert_eq!(format_duration(-1.0), "N/A");
        assert_eq!(format_duration(f64::NAN), "N/A");
        assert_eq!(duration_text(None), "N/A");
    }

    #[test]
    fn seconds_value_rejects_non_numeric_input() {
        assert_eq!(parse_seconds_value(&json!(212.6)), Some(212));
        assert_eq!(parse_seconds_value(&json!("45")), Some(45));
        assert_eq!(parse_seconds_value(&json!(-3)), None);
        assert_eq!(parse_seconds_value(&json!("soon")), None);
        assert_eq!(parse_seconds_value(&json!(null)), None);
    }

    #[test]
    fn view_counts_render_grouped_and_compact() {
        assert_eq!(format_view_count(Some(0), ViewCountStyle::Grouped), "0");
        assert_eq!(format_view_count(Some(999), ViewCountStyle::Grouped), "999");
        assert_eq!(
            format_view_count(Some(1_234_567), ViewCountStyle::Grouped),
            "1,234,567"
        );
        assert_eq!(format_view_count(Some(999), ViewCountStyle::Compact), "999");
        assert_eq!(format_view_count(Some(1_500), ViewCountStyle::Compact), "1.5K");
        assert_eq!(
            format_view_count(Some(2_345_678), ViewCountStyle::Compact),
            "2.3M"
        );
        assert_eq!(
            format_view_count(Some(999_960), ViewCountStyle::Compact),
            "1.0M"
        );
        assert_eq!(format_view_count(None, ViewCountStyle::Compact), "N/A");
    }

    #[test]
    fn every_accepted_url_form_canonicalizes_identically() {
        let expected = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        for input in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&list=PL123&index=4",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "http://m.youtube.com/watch?v=dQw4w9WgXcQ#t=30",
            "https://youtu.be/dQw4w9WgXcQ?si=tracking",
            "youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ?autoplay=1",
            "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "  dQw4w9WgXcQ  ",
        ] {
            assert_eq!(canonicalize_url(input).unwrap(), expected, "input: {input}");
        }
    }

    #[test]
    fn unrecognized_urls_are_validation_errors() {
        for input in [
            "",
            "https://example.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=short",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQQ",
            "dQw4w9WgXcQQ",
            "ftp://youtube.com/watch?v=dQw4w9WgXcQ",
        ] {
            assert!(
                matches!(canonicalize_url(input), Err(StreamError::Validation(_))),
                "input: {input}"
            );
        }
    }

    #[test]
    fn malformed_line_is_skipped_and_order_preserved() {
        let stdout = [
            r#"{"id":"aaaaaaaaaaa","title":"First","uploader":"One","duration":61,"view_count":10}"#,
            r#"{"id":"bbbbbbbbbbb","title": broken"#,
            r#"{"id":"ccccccccccc","title":"Third","channel":"Three","duration":3661}"#,
        ]
        .join("\n");
        let records = parse_search_output(&stdout);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "aaaaaaaaaaa");
        assert_eq!(records[0].duration_text(), "1:01");
        assert_eq!(records[1].id, "ccccccccccc");
        assert_eq!(records[1].channel_name, "Three");
        assert_eq!(records[1].duration_text(), "1:01:01");
    }

    #[test]
    fn missing_fields_get_placeholders() {
        let records = parse_search_output(r#"{"id":"aaaaaaaaaaa","title":"  ","view_count":null}"#);
        let record = &records[0];
        assert_eq!(record.title, UNTITLED_PLACEHOLDER);
        assert_eq!(record.channel_name, UNKNOWN_CHANNEL_PLACEHOLDER);
        assert_eq!(record.duration_text(), "N/A");
        assert_eq!(record.view_count, None);
        assert_eq!(record.url, "https://www.youtube.com/watch?v=aaaaaaaaaaa");
        assert!(!record.is_demo);
    }

    #[test]
    fn entries_without_id_fall_back_to_page_url_or_are_dropped() {
        let stdout = [
            r#"{"title":"From url","webpage_url":"https://youtu.be/ddddddddddd"}"#,
            r#"{"title":"Nothing to key on"}"#,
            r#"{"id":"ddddddddddd","title":"Duplicate"}"#,
        ]
        .join("\n");
        let records = parse_search_output(&stdout);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "ddddddddddd");
        assert_eq!(records[0].title, "From url");
    }

    #[test]
    fn urls_are_always_canonical_watch_links() {
        let stdout = [
            r#"{"id":"clip-42","title":"Elsewhere","webpage_url":"https://vimeo.com/42"}"#,
            r#"{"id":"clip-43","title":"Keyed by page","webpage_url":"https://www.youtube.com/shorts/eeeeeeeeeee"}"#,
            r#"{"id":"fffffffffff","title":"Tracking","webpage_url":"https://www.youtube.com/watch?v=fffffffffff&list=PL1"}"#,
        ]
        .join("\n");
        let records = parse_search_output(&stdout);
        let ids: Vec<&str> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["eeeeeeeeeee", "fffffffffff"]);
        for record in &records {
            assert_eq!(record.url, watch_url(&record.id));
            assert_eq!(canonicalize_url(&record.url).unwrap(), record.url);
        }
    }

    #[test]
    fn metadata_output_accepts_document_and_extras() {
        let document = json!({
            "id": "dQw4w9WgXcQ",
            "title": "Song",
            "uploader": "Artist",
            "duration": 213,
            "view_count": 1_500_000_000u64,
            "thumbnails": [{"url": "https://i.ytimg.com/small.jpg"}, {"url": "https://i.ytimg.com/large.jpg"}],
            "upload_date": "20091025",
            "description": "Official video",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ&pp=abc"
        });
        let record = parse_metadata_output(&serde_json::to_string_pretty(&document).unwrap()).unwrap();
        assert_eq!(record.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(record.thumbnail_url.as_deref(), Some("https://i.ytimg.com/large.jpg"));
        assert_eq!(record.upload_date.as_deref(), Some("2009-10-25"));
        assert_eq!(record.view_count_text(ViewCountStyle::Compact), "1500.0M");
        assert_eq!(record.embed_url(), "https://www.youtube.com/embed/dQw4w9WgXcQ");
        assert!(parse_metadata_output("not json").is_none());
    }
}
