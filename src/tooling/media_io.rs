// Scratch directories and post-download file discovery and reconciliation.
use super::*;

pub(super) const SCRATCH_PREFIX: &str = "cyber-stream-";

/// Per-download scratch directory, removed when dropped or closed.
pub(super) fn create_scratch_dir(root: Option<&Path>) -> StreamResult<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(SCRATCH_PREFIX);
    let scratch = match root {
        Some(root) => {
            fs::create_dir_all(root)?;
            builder.tempdir_in(root)?
        }
        None => builder.tempdir()?,
    };
    debug!("Created scratch directory {}", scratch.path().display());
    Ok(scratch)
}

pub(super) fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_lowercase())
        .filter(|value| !value.is_empty())
}

pub(super) fn is_accepted_media_file(path: &Path, format: MediaFormat) -> bool {
    lowercase_extension(path)
        .map(|value| format.accepted_extensions().contains(&value.as_str()))
        .unwrap_or(false)
}

/// Accepted files for `format`, sorted by name for a stable pick.
pub(super) fn list_media_files(path: &Path, format: MediaFormat) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(path) else {
        return files;
    };
    for entry in entries.flatten() {
        let candidate = entry.path();
        if !candidate.is_file() || !is_accepted_media_file(&candidate, format) {
            continue;
        }
        files.push(candidate);
    }
    files.sort();
    files
}

/// The requested extension wins over other accepted containers.
pub(super) fn find_downloaded_file(path: &Path, format: MediaFormat) -> Option<PathBuf> {
    let files = list_media_files(path, format);
    files
        .iter()
        .find(|candidate| lowercase_extension(candidate).as_deref() == Some(format.extension()))
        .or_else(|| files.first())
        .cloned()
}

/// Remove leftovers of a failed attempt so the retry starts clean.
pub(super) fn clear_directory(path: &Path) -> StreamResult<()> {
    for entry in fs::read_dir(path)?.flatten() {
        let candidate = entry.path();
        if candidate.is_dir() {
            fs::remove_dir_all(&candidate)?;
        } else {
            fs::remove_file(&candidate)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaConversion {
    /// The tool produced the requested container directly.
    Native,
    /// Re-encoded by the transcoder.
    Transcoded,
    /// Only the extension was changed; the codec is the native one.
    ExtensionOnly,
}

impl MediaConversion {
    pub fn is_true_conversion(self) -> bool {
        !matches!(self, Self::ExtensionOnly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ReconciledFile {
    pub(super) path: PathBuf,
    pub(super) conversion: MediaConversion,
    pub(super) native_extension: Option<String>,
}

/// Force the located file's extension to the requested format and record
/// whether a real conversion took place.
pub(super) fn reconcile_download(
    located: &Path,
    format: MediaFormat,
    transcoder_available: bool,
) -> StreamResult<ReconciledFile> {
    let native_extension = lowercase_extension(located);
    let has_requested_extension = native_extension.as_deref() == Some(format.extension());
    let conversion = match (format, has_requested_extension, transcoder_available) {
        (MediaFormat::Mp3, true, true) => MediaConversion::Transcoded,
        (MediaFormat::Mp3, _, _) => MediaConversion::ExtensionOnly,
        (MediaFormat::Mp4, true, _) => MediaConversion::Native,
        (MediaFormat::Mp4, false, _) => MediaConversion::ExtensionOnly,
    };

    let path = if has_requested_extension {
        located.to_path_buf()
    } else {
        let renamed = located.with_extension(format.extension());
        fs::rename(located, &renamed)?;
        warn!(
            "Renamed {} to .{} without transcoding",
            located.display(),
            format.extension()
        );
        renamed
    };

    Ok(ReconciledFile {
        path,
        conversion,
        native_extension,
    })
}

/// A finished download, already read into memory. The scratch directory it
/// came from no longer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub file_name: String,
    pub mime_type: String,
    pub format: MediaFormat,
    pub data: Vec<u8>,
    pub conversion: MediaConversion,
    pub native_extension: Option<String>,
    pub used_relaxed_format: bool,
}

impl DownloadResult {
    pub fn is_true_conversion(&self) -> bool {
        self.conversion.is_true_conversion()
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

pub(super) fn sanitize_file_stem(value: &str) -> String {
    let trimmed = value.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    for ch in trimmed.chars().take(120) {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            normalized.push(ch);
        } else if ch.is_whitespace() {
            normalized.push('-');
        }
    }
    while normalized.contains("--") {
        normalized = normalized.replace("--", "-");
    }
    let normalized = normalized.trim_matches(|ch| ch == '-' || ch == '.').to_string();
    if normalized.is_empty() {
        "download".to_string()
    } else {
        normalized
    }
}

/// Write a finished download into `dir` without overwriting existing files.
pub fn save_download(result: &DownloadResult, dir: &Path) -> StreamResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let extension = result.format.extension();
    let stem = Path::new(&result.file_name)
        .file_stem()
        .and_then(|value| value.to_str())
        .map(sanitize_file_stem)
        .unwrap_or_else(|| "download".to_string());

    let mut target = dir.join(format!("{stem}.{extension}"));
    let mut index = 2_u32;
    while target.exists() {
        target = dir.join(format!("{stem}-{index}.{extension}"));
        index += 1;
    }
    fs::write(&target, &result.data)?;
    info!("Saved {} ({} bytes)", target.display(), result.data.len());
    Ok(target)
}
