use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use url::Url;
use zip::ZipArchive;

mod catalog;
mod commands;
mod error;
mod fallback;
mod install;
mod media_io;
mod process;
mod runtime;
mod search_cache;
mod session;
mod ytdlp_args;

use catalog::*;
use error::*;
use fallback::*;
use install::*;
use media_io::*;
use process::*;
use runtime::*;
use search_cache::*;
use session::*;
use ytdlp_args::*;

pub use catalog::{
    canonicalize_url, duration_text, extract_video_id, format_duration, format_view_count,
    parse_metadata_output, parse_search_output, VideoRecord, ViewCountStyle, MISSING_VALUE_TEXT,
};
pub use commands::*;
pub use error::{StreamError, StreamResult};
pub use fallback::{
    demonstration_records, AttemptResult, FallbackPlan, FallbackStep, Operation, PageFetcher,
    ResultOrigin, SearchOutcome, UreqPageFetcher,
};
pub use install::{
    install_managed_ffmpeg, install_managed_tool, install_managed_ytdlp, InstallProgress,
    InstallStage, ManagedTool, ProgressCallback,
};
pub use media_io::{save_download, DownloadResult, MediaConversion};
pub use process::{CapturedOutput, Invocation, ProcessOutcome, ProcessRunner, SystemProcessRunner};
pub use runtime::{
    load_settings, managed_tools_dir, normalize_settings, save_settings, settings_file_path,
    ExternalToolStatus, RuntimeSettings, RuntimeToolsStatus, ToolLocator, ToolSource,
    EXTRACTOR_NAME, TRANSCODER_NAME,
};
pub use search_cache::{Clock, SearchCache, SystemClock};
pub use session::{paginate, DownloadGuard, Page, SessionContext, DEFAULT_PAGE_SIZE};
pub use ytdlp_args::{sanitize_query, validate_query, CommandBuilder, MediaFormat, MAX_QUERY_CHARS};
