// Runtime settings, well-known paths, process primitives and external tool discovery.
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fs;
#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use url::Url;

use super::error::{StreamError, StreamResult};
use super::process::{Invocation, ProcessOutcome, ProcessRunner};

pub(super) const APP_DIR_NAME: &str = "cyber-stream";
pub(super) const SETTINGS_FILE_NAME: &str = "runtime-tools.json";
pub const TRANSCODER_NAME: &str = "ffmpeg";
pub const EXTRACTOR_NAME: &str = "yt-dlp";
pub(super) const MAX_SEARCH_LIMIT: u32 = 50;
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
#[cfg(target_os = "windows")]
pub(super) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub(super) fn hidden_command(program: impl AsRef<OsStr>) -> Command {
    let mut command = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    pub ytdlp_mode: String,
    pub ytdlp_custom_path: Option<String>,
    pub ffmpeg_custom_path: Option<String>,
    pub prefer_bundled_ffmpeg: bool,
    pub search_limit: u32,
    pub search_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub socket_timeout_secs: u64,
    pub external_retries: u32,
    pub metadata_retry_backoff_ms: u64,
    pub max_video_height: u32,
    pub mp3_quality: String,
    pub search_cache_ttl_secs: u64,
    pub html_fallback_enabled: bool,
    pub html_fallback_max_resolve: u32,
    pub scratch_root: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            ytdlp_mode: "managed".to_string(),
            ytdlp_custom_path: None,
            ffmpeg_custom_path: None,
            prefer_bundled_ffmpeg: false,
            search_limit: 20,
            search_timeout_secs: 60,
            metadata_timeout_secs: 30,
            download_timeout_secs: 300,
            socket_timeout_secs: 20,
            external_retries: 3,
            metadata_retry_backoff_ms: 2000,
            max_video_height: 720,
            mp3_quality: "0".to_string(),
            search_cache_ttl_secs: 3600,
            html_fallback_enabled: true,
            html_fallback_max_resolve: 5,
            scratch_root: None,
        }
    }
}

pub(super) fn sanitize_optional_path(value: Option<String>) -> StreamResult<Option<String>> {
    match value {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if trimmed.len() > 512 {
                return Err(StreamError::settings("Path is too long."));
            }
            if trimmed.chars().any(|ch| ch.is_control()) {
                return Err(StreamError::settings(
                    "Path contains invalid control characters.",
                ));
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

fn is_valid_audio_quality(value: &str) -> bool {
    // yt-dlp accepts a VBR level 0-10 or an explicit bitrate such as 192K.
    if let Ok(level) = value.parse::<u8>() {
        return level <= 10;
    }
    value
        .strip_suffix(['K', 'k'])
        .map(|digits| !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()))
        .unwrap_or(false)
}

pub fn normalize_settings(mut settings: RuntimeSettings) -> StreamResult<RuntimeSettings> {
    settings.ytdlp_mode = settings.ytdlp_mode.trim().to_lowercase();
    if settings.ytdlp_mode != "managed"
        && settings.ytdlp_mode != "custom"
        && settings.ytdlp_mode != "system"
    {
        settings.ytdlp_mode = "managed".to_string();
    }
    settings.ytdlp_custom_path = sanitize_optional_path(settings.ytdlp_custom_path)?;
    settings.ffmpeg_custom_path = sanitize_optional_path(settings.ffmpeg_custom_path)?;
    settings.scratch_root = sanitize_optional_path(settings.scratch_root)?;

    settings.search_limit = settings.search_limit.clamp(1, MAX_SEARCH_LIMIT);
    settings.search_timeout_secs = settings.search_timeout_secs.clamp(5, 600);
    settings.metadata_timeout_secs = settings.metadata_timeout_secs.clamp(5, 600);
    settings.download_timeout_secs = settings.download_timeout_secs.clamp(30, 3600);
    settings.socket_timeout_secs = settings.socket_timeout_secs.clamp(5, 120);
    settings.external_retries = settings.external_retries.min(10);
    settings.metadata_retry_backoff_ms = settings.metadata_retry_backoff_ms.min(30_000);
    settings.max_video_height = settings.max_video_height.clamp(144, 4320);
    settings.search_cache_ttl_secs = settings.search_cache_ttl_secs.min(86_400);
    settings.html_fallback_max_resolve = settings.html_fallback_max_resolve.min(MAX_SEARCH_LIMIT);

    settings.mp3_quality = settings.mp3_quality.trim().to_string();
    if !is_valid_audio_quality(&settings.mp3_quality) {
        settings.mp3_quality = "0".to_string();
    }
    Ok(settings)
}

pub fn settings_file_path() -> StreamResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| StreamError::settings("Failed to resolve the user config directory."))?;
    Ok(config_dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings(path: &Path) -> StreamResult<RuntimeSettings> {
    if !path.exists() {
        debug!("No settings at {}, using defaults", path.display());
        return Ok(RuntimeSettings::default());
    }

    let raw = fs::read_to_string(path)
        .map_err(|error| StreamError::settings(format!("Failed to read settings: {error}")))?;
    let parsed: RuntimeSettings = serde_json::from_str(&raw)
        .map_err(|error| StreamError::settings(format!("Failed to parse settings: {error}")))?;
    normalize_settings(parsed)
}

pub fn save_settings(path: &Path, settings: RuntimeSettings) -> StreamResult<RuntimeSettings> {
    let normalized = normalize_settings(settings)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            StreamError::settings(format!("Failed to create config dir: {error}"))
        })?;
    }
    let payload = serde_json::to_string_pretty(&normalized)?;
    fs::write(path, payload)
        .map_err(|error| StreamError::settings(format!("Failed to save settings: {error}")))?;
    Ok(normalized)
}

/// Directory holding tools installed by the install action. Not created here.
pub fn managed_tools_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME).join("tools"))
}

pub(super) fn ensure_managed_tools_dir() -> StreamResult<PathBuf> {
    let tools_dir = managed_tools_dir()
        .ok_or_else(|| StreamError::install("Failed to resolve the user data directory."))?;
    fs::create_dir_all(&tools_dir)
        .map_err(|error| StreamError::install(format!("Failed to create tools dir: {error}")))?;
    Ok(tools_dir)
}

pub(super) fn platform_bin(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

pub(super) fn run_version(runner: &dyn ProcessRunner, binary: &Path, arg: &str) -> Option<String> {
    let invocation = Invocation::new(binary).arg(arg);
    match runner.run(&invocation, VERSION_CHECK_TIMEOUT) {
        Ok(ProcessOutcome::Success(output)) => output
            .stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string()),
        Ok(ProcessOutcome::TimedOut { after }) => {
            warn!("{} did not report a version within {after:?}", binary.display());
            None
        }
        Ok(ProcessOutcome::Failure(_)) => None,
        Err(error) => {
            debug!("Version check for {} failed: {error}", binary.display());
            None
        }
    }
}

pub(super) fn trusted_host_match(host: &str, allowed_host: &str) -> bool {
    host.eq_ignore_ascii_case(allowed_host)
        || host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", allowed_host.to_ascii_lowercase()))
}

pub(super) fn ensure_trusted_https_url(url: &str, allowed_hosts: &[&str]) -> StreamResult<Url> {
    let parsed = Url::parse(url).map_err(|_| StreamError::http("Invalid source URL."))?;
    if parsed.scheme() != "https" {
        return Err(StreamError::http("Only HTTPS sources are allowed."));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(StreamError::http("Source URL must not include credentials."));
    }
    if parsed.port().is_some() {
        return Err(StreamError::http("Source URL must not include a custom port."));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| StreamError::http("Failed to resolve source domain."))?;
    if allowed_hosts
        .iter()
        .any(|allowed| trusted_host_match(host, allowed))
    {
        return Ok(parsed);
    }
    Err(StreamError::http(format!("Untrusted source: {host}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    /// Path configured explicitly in settings.
    Custom,
    /// Found on the executable search path.
    System,
    /// Installed into the managed tools directory by the install action.
    Managed,
    /// Shipped next to the running executable.
    Bundled,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalToolStatus {
    pub name: String,
    pub available: bool,
    pub path: Option<PathBuf>,
    pub source: ToolSource,
    pub version: Option<String>,
}

impl ExternalToolStatus {
    pub fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: false,
            path: None,
            source: ToolSource::Missing,
            version: None,
        }
    }

    fn found(name: &str, path: PathBuf, source: ToolSource) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            path: Some(path),
            source,
            version: None,
        }
    }

    /// Ask the binary for its version string. ffmpeg spells the flag `-version`.
    pub fn with_version(mut self, runner: &dyn ProcessRunner) -> Self {
        if let Some(path) = self.path.as_ref() {
            let arg = if self.name == TRANSCODER_NAME {
                "-version"
            } else {
                "--version"
            };
            self.version = run_version(runner, path, arg);
        }
        self
    }

    pub fn available_path(&self) -> Option<&Path> {
        if self.available {
            self.path.as_deref()
        } else {
            None
        }
    }
}

pub(super) fn ensure_custom_binary(path: &str) -> Option<PathBuf> {
    let parsed = PathBuf::from(path);
    if !parsed.exists() {
        return None;
    }
    let canonical = fs::canonicalize(&parsed).ok()?;
    if canonical.is_file() {
        Some(canonical)
    } else {
        None
    }
}

/// Default places a tool may ship with the application.
pub(super) fn bundled_binary_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(parent) = exe_path.parent() {
            dirs.push(parent.to_path_buf());
            dirs.push(parent.join("resources"));
            dirs.push(parent.join("resources").join("bin"));
        }
    }
    dirs
}

/// Finds an external binary: configured path, executable search path, then
/// managed and bundled directories. Never fails; an unresolvable tool is
/// reported as [`ToolSource::Missing`].
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
    custom_path: Option<String>,
    use_search_path: bool,
    search_path: Option<OsString>,
    managed_dir: Option<PathBuf>,
    bundled_dirs: Vec<PathBuf>,
    prefer_local: bool,
}

impl ToolLocator {
    pub fn for_transcoder(settings: &RuntimeSettings) -> Self {
        Self {
            custom_path: settings.ffmpeg_custom_path.clone(),
            use_search_path: true,
            search_path: None,
            managed_dir: managed_tools_dir(),
            bundled_dirs: bundled_binary_dirs(),
            prefer_local: settings.prefer_bundled_ffmpeg,
        }
    }

    pub fn for_extractor(settings: &RuntimeSettings) -> Self {
        match settings.ytdlp_mode.as_str() {
            "custom" => Self::custom_only(settings.ytdlp_custom_path.clone()),
            "system" => Self {
                use_search_path: true,
                ..Self::default()
            },
            _ => Self {
                custom_path: None,
                use_search_path: true,
                search_path: None,
                managed_dir: managed_tools_dir(),
                bundled_dirs: bundled_binary_dirs(),
                prefer_local: true,
            },
        }
    }

    /// Only the given path is considered.
    pub fn custom_only(path: Option<String>) -> Self {
        Self {
            custom_path: path,
            ..Self::default()
        }
    }

    /// Look up tools in `search_path` instead of the process `PATH`.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.use_search_path = true;
        self.search_path = Some(search_path.into());
        self
    }

    pub fn with_managed_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.managed_dir = dir;
        self
    }

    pub fn with_bundled_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.bundled_dirs = dirs;
        self
    }

    fn find_on_search_path(&self, name: &str) -> Option<PathBuf> {
        if !self.use_search_path {
            return None;
        }
        let found = match self.search_path.as_ref() {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(name, Some(paths), cwd).ok()
            }
            None => which::which(name).ok(),
        };
        found.filter(|path| path.exists())
    }

    fn find_local(&self, name: &str) -> Option<(PathBuf, ToolSource)> {
        let executable = platform_bin(name);
        if let Some(managed) = self.managed_dir.as_ref() {
            let candidate = managed.join(&executable);
            if candidate.is_file() {
                return Some((candidate, ToolSource::Managed));
            }
        }
        self.bundled_dirs
            .iter()
            .map(|dir| dir.join(&executable))
            .find(|candidate| candidate.is_file())
            .map(|path| (path, ToolSource::Bundled))
    }

    pub fn locate(&self, name: &str) -> ExternalToolStatus {
        if let Some(custom) = self
            .custom_path
            .as_deref()
            .and_then(ensure_custom_binary)
        {
            return ExternalToolStatus::found(name, custom, ToolSource::Custom);
        }

        if self.prefer_local {
            if let Some((path, source)) = self.find_local(name) {
                return ExternalToolStatus::found(name, path, source);
            }
        }

        if let Some(system) = self.find_on_search_path(name) {
            return ExternalToolStatus::found(name, system, ToolSource::System);
        }

        if let Some((path, source)) = self.find_local(name) {
            return ExternalToolStatus::found(name, path, source);
        }

        debug!("{name} was not found by any lookup method");
        ExternalToolStatus::missing(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeToolsStatus {
    pub settings: RuntimeSettings,
    pub transcoder: ExternalToolStatus,
    pub extractor: ExternalToolStatus,
    pub managed_tools_dir: Option<PathBuf>,
}
