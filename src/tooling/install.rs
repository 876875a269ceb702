// Managed installation of yt-dlp and ffmpeg into the application tools directory.
use super::*;

pub(super) const YTDLP_SHA256SUMS_URL: &str =
    "https://github.com/yt-dlp/yt-dlp/releases/latest/download/SHA2-256SUMS";
pub(super) const FFMPEG_WINDOWS_ESSENTIALS_URL: &str =
    "https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip";
pub(super) const FFMPEG_WINDOWS_ESSENTIALS_SHA256_URL: &str =
    "https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip.sha256";
pub(super) const FFMPEG_WINDOWS_FALLBACK_URL: &str =
    "https://github.com/BtbN/FFmpeg-Builds/releases/latest/download/ffmpeg-master-latest-win64-gpl.zip";
pub(super) const FFMPEG_WINDOWS_FALLBACK_SHA256_URL: &str =
    "https://github.com/BtbN/FFmpeg-Builds/releases/latest/download/checksums.sha256";
pub(super) const TRUSTED_DOWNLOAD_HOSTS: [&str; 4] = [
    "github.com",
    "objects.githubusercontent.com",
    "www.gyan.dev",
    "gyan.dev",
];
const MIN_ARTIFACT_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagedTool {
    YtDlp,
    Ffmpeg,
}

impl ManagedTool {
    pub fn binary_name(self) -> &'static str {
        match self {
            Self::YtDlp => EXTRACTOR_NAME,
            Self::Ffmpeg => TRANSCODER_NAME,
        }
    }
}

impl std::str::FromStr for ManagedTool {
    type Err = StreamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yt-dlp" | "ytdlp" => Ok(Self::YtDlp),
            "ffmpeg" => Ok(Self::Ffmpeg),
            other => Err(StreamError::validation(format!(
                "Unknown tool: {other}. Use yt-dlp or ffmpeg."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStage {
    Progress,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallProgress {
    pub tool: ManagedTool,
    pub stage: InstallStage,
    pub message: String,
    pub detail: Option<String>,
    pub progress: Option<f32>,
}

pub type ProgressCallback<'a> = &'a dyn Fn(&InstallProgress);

struct ProgressReporter<'a> {
    tool: ManagedTool,
    callback: ProgressCallback<'a>,
}

impl ProgressReporter<'_> {
    fn emit(&self, stage: InstallStage, message: &str, detail: Option<String>, progress: Option<f32>) {
        match stage {
            InstallStage::Error => warn!("[{}] {message}", self.tool.binary_name()),
            _ => debug!("[{}] {message}", self.tool.binary_name()),
        }
        (self.callback)(&InstallProgress {
            tool: self.tool,
            stage,
            message: message.to_string(),
            detail,
            progress,
        });
    }

    fn progress(&self, message: &str, progress: f32) {
        self.emit(InstallStage::Progress, message, None, Some(progress));
    }
}

pub(super) fn ytdlp_download_url() -> &'static str {
    if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
    }
}

pub(super) fn ytdlp_asset_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

fn http_agent(settings: &RuntimeSettings) -> ureq::Agent {
    let socket_timeout = Duration::from_secs(settings.socket_timeout_secs);
    ureq::AgentBuilder::new()
        .timeout_connect(socket_timeout)
        .timeout_read(socket_timeout)
        .build()
}

pub(super) fn download_text(agent: &ureq::Agent, url: &str) -> StreamResult<String> {
    let parsed = ensure_trusted_https_url(url, &TRUSTED_DOWNLOAD_HOSTS)?;
    let response = agent
        .get(parsed.as_str())
        .call()
        .map_err(|error| StreamError::http(format!("Failed to fetch checksum: {error}")))?;
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|error| StreamError::http(format!("Failed to read checksum: {error}")))?;
    String::from_utf8(body).map_err(|_| StreamError::http("Checksum response was not valid UTF-8."))
}

pub(super) fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|ch| ch.is_ascii_hexdigit())
}

/// First 64-digit hex token anywhere in `value`.
pub(super) fn parse_sha256_token(value: &str) -> Option<String> {
    value
        .split_whitespace()
        .find(|token| is_sha256_hex(token))
        .map(|token| token.to_ascii_lowercase())
}

/// Hash for `asset_name` in a `sha256sum`-style manifest.
pub(super) fn parse_sha256_for_asset(manifest: &str, asset_name: &str) -> Option<String> {
    manifest
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find_map(|line| {
            let normalized = line.replace('*', " ");
            let mut parts = normalized.split_whitespace();
            let hash = parts.next()?;
            let file_name = parts.next_back()?;
            let matches_asset = file_name
                .trim_start_matches("./")
                .eq_ignore_ascii_case(asset_name);
            (matches_asset && is_sha256_hex(hash)).then(|| hash.to_ascii_lowercase())
        })
}

pub(super) fn sha256_of_file(path: &Path) -> StreamResult<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub(super) fn verify_download_checksum(path: &Path, expected_sha256: &str) -> StreamResult<()> {
    let expected = expected_sha256.trim().to_ascii_lowercase();
    if !is_sha256_hex(&expected) {
        return Err(StreamError::install("Invalid expected SHA256 format."));
    }
    let actual = sha256_of_file(path)?;
    if actual != expected {
        return Err(StreamError::install(format!(
            "Checksum mismatch. Expected {expected}, got {actual}."
        )));
    }
    Ok(())
}

fn download_to_path_with_progress(
    agent: &ureq::Agent,
    reporter: &ProgressReporter<'_>,
    source_url: &str,
    destination_path: &Path,
    start_progress: f32,
    end_progress: f32,
) -> StreamResult<()> {
    let parsed_url = ensure_trusted_https_url(source_url, &TRUSTED_DOWNLOAD_HOSTS)?;
    let source_host = parsed_url.host_str().unwrap_or("unknown source").to_string();
    reporter.emit(
        InstallStage::Progress,
        "Connecting to source...",
        Some(source_host.clone()),
        Some(start_progress),
    );

    let response = agent
        .get(parsed_url.as_str())
        .call()
        .map_err(|error| StreamError::http(format!("Failed to download file: {error}")))?;
    let total_size = response
        .header("content-length")
        .and_then(|value| value.parse::<u64>().ok());

    let mut reader = response.into_reader();
    let mut file = fs::File::create(destination_path)?;
    let mut downloaded = 0_u64;
    let mut last_percent = -1_i32;
    let mut last_emit = Instant::now();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|error| StreamError::http(format!("Failed to read download stream: {error}")))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])?;
        downloaded += read as u64;

        let Some(total) = total_size.filter(|total| *total > 0) else {
            continue;
        };
        let ratio = (downloaded as f64 / total as f64).clamp(0.0, 1.0);
        let percent = (ratio * 100.0).round() as i32;
        if percent != last_percent && (last_emit.elapsed().as_millis() > 140 || percent >= 100) {
            last_percent = percent;
            last_emit = Instant::now();
            reporter.emit(
                InstallStage::Progress,
                &format!("Downloading: {percent}%"),
                Some(format!(
                    "{:.1}/{:.1} MB from {source_host}",
                    downloaded as f64 / (1024.0 * 1024.0),
                    total as f64 / (1024.0 * 1024.0)
                )),
                Some(start_progress + (end_progress - start_progress) * ratio as f32),
            );
        }
    }
    file.flush()?;

    if downloaded < MIN_ARTIFACT_BYTES {
        return Err(StreamError::install(
            "Downloaded file is too small and may be corrupted.",
        ));
    }
    Ok(())
}

fn install_ytdlp_into(
    agent: &ureq::Agent,
    tools_dir: &Path,
    reporter: &ProgressReporter<'_>,
) -> StreamResult<ExternalToolStatus> {
    reporter.progress("Fetching yt-dlp release checksums...", 0.04);
    let manifest = download_text(agent, YTDLP_SHA256SUMS_URL)?;
    let expected_sha256 = parse_sha256_for_asset(&manifest, ytdlp_asset_name())
        .ok_or_else(|| StreamError::install("Failed to find SHA256 for the yt-dlp binary."))?;

    let target_path = tools_dir.join(platform_bin(EXTRACTOR_NAME));
    let temp_path = target_path.with_extension("tmp");
    let downloaded = download_to_path_with_progress(
        agent,
        reporter,
        ytdlp_download_url(),
        &temp_path,
        0.08,
        0.88,
    )
    .and_then(|_| {
        reporter.progress("Verifying download integrity...", 0.91);
        verify_download_checksum(&temp_path, &expected_sha256)
    });
    if let Err(error) = downloaded {
        let _ = fs::remove_file(&temp_path);
        return Err(error);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o755))?;
    }
    fs::rename(&temp_path, &target_path)?;
    info!("Installed yt-dlp to {}", target_path.display());

    Ok(ToolLocator::default()
        .with_managed_dir(Some(tools_dir.to_path_buf()))
        .locate(EXTRACTOR_NAME))
}

pub(super) fn extract_ffmpeg_windows_binaries(
    archive_path: &Path,
    ffmpeg_out_path: &Path,
    ffprobe_out_path: &Path,
) -> StreamResult<()> {
    let file = fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|error| StreamError::install(format!("Failed to read ffmpeg archive: {error}")))?;

    let mut ffmpeg_found = false;
    let mut ffprobe_found = false;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|error| {
            StreamError::install(format!("Failed to read ffmpeg archive entry: {error}"))
        })?;
        if !entry.is_file() {
            continue;
        }
        let normalized_name = entry.name().replace('\\', "/").to_lowercase();
        let target = if normalized_name.ends_with("/bin/ffmpeg.exe") {
            ffmpeg_found = true;
            ffmpeg_out_path
        } else if normalized_name.ends_with("/bin/ffprobe.exe") {
            ffprobe_found = true;
            ffprobe_out_path
        } else {
            continue;
        };
        let mut output = fs::File::create(target)?;
        std::io::copy(&mut entry, &mut output)?;
    }

    if !ffmpeg_found || !ffprobe_found {
        return Err(StreamError::install(
            "ffmpeg.exe and ffprobe.exe were not found in the archive.",
        ));
    }
    Ok(())
}

fn expected_ffmpeg_sha256(agent: &ureq::Agent, candidate_url: &str) -> StreamResult<String> {
    if candidate_url == FFMPEG_WINDOWS_ESSENTIALS_URL {
        let payload = download_text(agent, FFMPEG_WINDOWS_ESSENTIALS_SHA256_URL)?;
        return parse_sha256_token(&payload)
            .ok_or_else(|| StreamError::install("Failed to read SHA256 for the essentials build."));
    }
    let manifest = download_text(agent, FFMPEG_WINDOWS_FALLBACK_SHA256_URL)?;
    let file_name = Url::parse(candidate_url)
        .ok()
        .and_then(|url| url.path_segments().and_then(|mut segments| segments.next_back().map(str::to_string)))
        .ok_or_else(|| StreamError::install("Failed to determine archive file name."))?;
    parse_sha256_for_asset(&manifest, &file_name)
        .ok_or_else(|| StreamError::install(format!("Failed to find SHA256 for {file_name}.")))
}

fn install_ffmpeg_into(
    agent: &ureq::Agent,
    tools_dir: &Path,
    reporter: &ProgressReporter<'_>,
) -> StreamResult<ExternalToolStatus> {
    let ffmpeg_target = tools_dir.join(platform_bin(TRANSCODER_NAME));
    let ffprobe_target = tools_dir.join(platform_bin("ffprobe"));
    let package_path = tools_dir.join("ffmpeg-package.tmp.zip");
    let ffmpeg_temp = ffmpeg_target.with_extension("tmp");
    let ffprobe_temp = ffprobe_target.with_extension("tmp");

    let mut last_error: Option<StreamError> = None;
    let mut downloaded = false;
    for candidate_url in [FFMPEG_WINDOWS_ESSENTIALS_URL, FFMPEG_WINDOWS_FALLBACK_URL] {
        reporter.emit(
            InstallStage::Progress,
            "Fetching archive checksum...",
            Some(candidate_url.to_string()),
            Some(0.06),
        );
        let attempt = expected_ffmpeg_sha256(agent, candidate_url).and_then(|expected| {
            download_to_path_with_progress(agent, reporter, candidate_url, &package_path, 0.08, 0.78)?;
            verify_download_checksum(&package_path, &expected)
        });
        match attempt {
            Ok(()) => {
                downloaded = true;
                break;
            }
            Err(error) => {
                warn!("FFmpeg source {candidate_url} failed: {error}");
                let _ = fs::remove_file(&package_path);
                last_error = Some(error);
            }
        }
    }
    if !downloaded {
        return Err(last_error.unwrap_or_else(|| StreamError::install("Failed to download FFmpeg.")));
    }

    reporter.progress("Extracting FFmpeg...", 0.84);
    let extracted = extract_ffmpeg_windows_binaries(&package_path, &ffmpeg_temp, &ffprobe_temp);
    let _ = fs::remove_file(&package_path);
    extracted?;

    reporter.progress("Applying FFmpeg binaries...", 0.93);
    fs::rename(&ffmpeg_temp, &ffmpeg_target)?;
    fs::rename(&ffprobe_temp, &ffprobe_target)?;
    info!("Installed ffmpeg to {}", ffmpeg_target.display());

    Ok(ToolLocator::default()
        .with_managed_dir(Some(tools_dir.to_path_buf()))
        .locate(TRANSCODER_NAME))
}

/// Download, verify and install `tool` into the managed tools directory.
pub fn install_managed_tool(
    tool: ManagedTool,
    settings: &RuntimeSettings,
    progress: ProgressCallback<'_>,
) -> StreamResult<ExternalToolStatus> {
    let reporter = ProgressReporter {
        tool,
        callback: progress,
    };
    reporter.progress("Preparing setup...", 0.02);

    if tool == ManagedTool::Ffmpeg && !cfg!(target_os = "windows") {
        let error = StreamError::install(
            "Managed FFmpeg setup is only supported on Windows. Install ffmpeg with your system package manager.",
        );
        reporter.emit(InstallStage::Error, &error.to_string(), None, None);
        return Err(error);
    }

    let result = ensure_managed_tools_dir().and_then(|tools_dir| {
        let agent = http_agent(settings);
        match tool {
            ManagedTool::YtDlp => install_ytdlp_into(&agent, &tools_dir, &reporter),
            ManagedTool::Ffmpeg => install_ffmpeg_into(&agent, &tools_dir, &reporter),
        }
    });
    match &result {
        Ok(_) => reporter.emit(InstallStage::Success, "Installed successfully.", None, Some(1.0)),
        Err(error) => reporter.emit(InstallStage::Error, &error.to_string(), None, None),
    }
    result
}

pub fn install_managed_ytdlp(
    settings: &RuntimeSettings,
    progress: ProgressCallback<'_>,
) -> StreamResult<ExternalToolStatus> {
    install_managed_tool(ManagedTool::YtDlp, settings, progress)
}

pub fn install_managed_ffmpeg(
    settings: &RuntimeSettings,
    progress: ProgressCallback<'_>,
) -> StreamResult<ExternalToolStatus> {
    install_managed_tool(ManagedTool::Ffmpeg, settings, progress)
}
