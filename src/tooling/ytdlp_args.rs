// yt-dlp argument vectors for search, metadata and download.
use super::*;

pub const MAX_QUERY_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Mp4,
    Mp3,
}

impl MediaFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mp3 => "mp3",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Mp3 => "audio/mpeg",
        }
    }

    /// Extensions a download for this format may legitimately produce.
    pub fn accepted_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Mp4 => &["mp4", "mkv", "webm", "mov", "m4v"],
            Self::Mp3 => &["mp3", "m4a", "webm", "opus", "ogg", "aac", "wav", "flac"],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Mp4 => "MP4 (video)",
            Self::Mp3 => "MP3 (audio)",
        }
    }
}

impl std::str::FromStr for MediaFormat {
    type Err = StreamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mp4" | "video" => Ok(Self::Mp4),
            "mp3" | "audio" => Ok(Self::Mp3),
            other => Err(StreamError::validation(format!(
                "Unsupported format: {other}. Use mp4 or mp3."
            ))),
        }
    }
}

fn is_query_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch.is_whitespace()
}

/// Drop characters outside `[A-Za-z0-9_-]` and whitespace, collapse runs of
/// whitespace, then cap the length. Idempotent.
pub fn sanitize_query(raw: &str) -> String {
    let kept: String = raw.chars().filter(|ch| is_query_char(*ch)).collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .take(MAX_QUERY_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

pub fn validate_query(raw: &str) -> StreamResult<String> {
    let sanitized = sanitize_query(raw);
    if sanitized.is_empty() {
        return Err(StreamError::validation(
            "Search query is empty after removing unsupported characters.",
        ));
    }
    Ok(sanitized)
}

/// Builds invocations for one resolved yt-dlp binary under one settings snapshot.
pub struct CommandBuilder<'a> {
    extractor: &'a Path,
    settings: &'a RuntimeSettings,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(extractor: &'a Path, settings: &'a RuntimeSettings) -> Self {
        Self {
            extractor,
            settings,
        }
    }

    fn base(&self) -> Invocation {
        Invocation::new(self.extractor)
    }

    fn network_args(&self) -> [String; 4] {
        [
            "--socket-timeout".to_string(),
            self.settings.socket_timeout_secs.to_string(),
            "--retries".to_string(),
            self.settings.external_retries.to_string(),
        ]
    }

    /// `query` must already be sanitized.
    pub fn search(&self, query: &str, limit: u32) -> Invocation {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        self.base()
            .args(["--dump-json", "--no-warnings", "--quiet", "--ignore-errors"])
            .args(self.network_args())
            .arg(format!("ytsearch{limit}:{query}"))
    }

    pub fn metadata(&self, canonical_url: &str) -> Invocation {
        self.base()
            .args([
                "--dump-json",
                "--no-playlist",
                "--skip-download",
                "--no-warnings",
                "--quiet",
            ])
            .args(self.network_args())
            .arg("--")
            .arg(canonical_url)
    }

    fn download_base(&self, out_dir: &Path, transcoder: &ExternalToolStatus) -> Invocation {
        let template = out_dir.join("%(title).120B-%(id)s.%(ext)s");
        let mut invocation = self
            .base()
            .args(["--no-playlist", "--newline", "--no-warnings", "--restrict-filenames"])
            .args(self.network_args())
            .arg("-o")
            .arg(template.to_string_lossy());
        if let Some(path) = transcoder.available_path() {
            invocation = invocation
                .arg("--ffmpeg-location")
                .arg(path.to_string_lossy());
        }
        invocation
    }

    pub fn download(
        &self,
        canonical_url: &str,
        format: MediaFormat,
        transcoder: &ExternalToolStatus,
        out_dir: &Path,
    ) -> Invocation {
        let height = self.settings.max_video_height;
        let invocation = self.download_base(out_dir, transcoder);
        let invocation = match (format, transcoder.available) {
            (MediaFormat::Mp4, true) => invocation
                .arg("-f")
                .arg("bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio/best")
                .args(["--merge-output-format", "mp4"]),
            (MediaFormat::Mp4, false) => invocation
                .arg("-f")
                .arg(format!("best[height<={height}][ext=mp4]/best[height<={height}]"))
                .args(["--merge-output-format", "mp4"]),
            (MediaFormat::Mp3, true) => invocation
                .args(["-f", "bestaudio/best", "-x", "--audio-format", "mp3"])
                .arg("--audio-quality")
                .arg(self.settings.mp3_quality.as_str()),
            (MediaFormat::Mp3, false) => invocation.args(["-f", "bestaudio[ext=m4a]/bestaudio"]),
        };
        invocation.arg("--").arg(canonical_url)
    }

    /// Second download attempt with format constraints dropped.
    pub fn relaxed_download(
        &self,
        canonical_url: &str,
        format: MediaFormat,
        transcoder: &ExternalToolStatus,
        out_dir: &Path,
    ) -> Invocation {
        let selector = match format {
            MediaFormat::Mp4 => "best",
            MediaFormat::Mp3 => "bestaudio/best",
        };
        self.download_base(out_dir, transcoder)
            .args(["-f", selector])
            .arg("--")
            .arg(canonical_url)
    }
}
