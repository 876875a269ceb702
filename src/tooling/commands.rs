// Public search, metadata, download and tool management entry points.
use super::*;

const STDERR_TAIL_LINES: usize = 4;

/// Service facade over the external tools. Holds no per-session state; that
/// lives in [`SessionContext`].
pub struct RuntimeTools {
    settings: RuntimeSettings,
    runner: Arc<dyn ProcessRunner>,
    fetcher: Arc<dyn PageFetcher>,
    transcoder_locator: ToolLocator,
    extractor_locator: ToolLocator,
}

impl RuntimeTools {
    pub fn new(settings: RuntimeSettings) -> StreamResult<Self> {
        let settings = normalize_settings(settings)?;
        Ok(Self {
            transcoder_locator: ToolLocator::for_transcoder(&settings),
            extractor_locator: ToolLocator::for_extractor(&settings),
            runner: Arc::new(SystemProcessRunner),
            fetcher: Arc::new(UreqPageFetcher),
            settings,
        })
    }

    pub fn from_settings_file(path: &Path) -> StreamResult<Self> {
        Self::new(load_settings(path)?)
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_transcoder_locator(mut self, locator: ToolLocator) -> Self {
        self.transcoder_locator = locator;
        self
    }

    pub fn with_extractor_locator(mut self, locator: ToolLocator) -> Self {
        self.extractor_locator = locator;
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn new_session(&self) -> SessionContext {
        SessionContext::new(&self.settings)
    }

    fn require_extractor(&self) -> StreamResult<PathBuf> {
        self.extractor_locator
            .locate(EXTRACTOR_NAME)
            .path
            .ok_or_else(|| {
                StreamError::tool_unavailable(format!(
                    "{EXTRACTOR_NAME} was not found (mode: {}). Install it or set a custom path.",
                    self.settings.ytdlp_mode
                ))
            })
    }

    /// Locate the transcoder again and replace the session's cached status.
    pub fn refresh_transcoder(&self, session: &SessionContext) -> ExternalToolStatus {
        let status = self.transcoder_locator.locate(TRANSCODER_NAME);
        if !status.available {
            debug!("{TRANSCODER_NAME} is unavailable, downloads run in degraded mode");
        }
        session.store_transcoder(status.clone());
        status
    }

    /// Cached transcoder status, computed on first use.
    pub fn transcoder_status(&self, session: &SessionContext) -> ExternalToolStatus {
        session
            .cached_transcoder()
            .unwrap_or_else(|| self.refresh_transcoder(session))
    }

    pub fn tool_status(&self, session: &SessionContext, refresh: bool) -> RuntimeToolsStatus {
        let transcoder = if refresh {
            self.refresh_transcoder(session)
        } else {
            self.transcoder_status(session)
        };
        RuntimeToolsStatus {
            settings: self.settings.clone(),
            transcoder: transcoder.with_version(self.runner.as_ref()),
            extractor: self
                .extractor_locator
                .locate(EXTRACTOR_NAME)
                .with_version(self.runner.as_ref()),
            managed_tools_dir: managed_tools_dir(),
        }
    }

    fn run_tool(&self, invocation: &Invocation, timeout_secs: u64) -> StreamResult<ProcessOutcome> {
        self.runner.run(invocation, Duration::from_secs(timeout_secs))
    }

    fn search_primary(&self, query: &str, limit: u32) -> Attempt<Vec<VideoRecord>> {
        let extractor = match self.require_extractor() {
            Ok(path) => path,
            Err(error) => return Attempt::failed(error),
        };
        let invocation = CommandBuilder::new(&extractor, &self.settings).search(query, limit);
        let timeout_secs = self.settings.search_timeout_secs;
        match self.run_tool(&invocation, timeout_secs) {
            Ok(ProcessOutcome::Success(output)) => {
                let records = parse_search_output(&output.stdout);
                if records.is_empty() {
                    Attempt::empty(None)
                } else {
                    Attempt::produced(records)
                }
            }
            Ok(ProcessOutcome::Failure(output)) => {
                let records = parse_search_output(&output.stdout);
                if records.is_empty() {
                    Attempt::failed(StreamError::external_failure(
                        "yt-dlp search failed.",
                        output.stderr_tail(STDERR_TAIL_LINES),
                    ))
                } else {
                    warn!(
                        "yt-dlp search exited with {:?}, keeping {} parsed results",
                        output.exit_code,
                        records.len()
                    );
                    Attempt::produced(records)
                }
            }
            Ok(ProcessOutcome::TimedOut { .. }) => {
                Attempt::failed(StreamError::ExternalTimeout(timeout_secs))
            }
            Err(error) => Attempt::failed(error),
        }
    }

    fn search_scrape(&self, query: &str, limit: u32) -> Attempt<Vec<VideoRecord>> {
        let html = match search_page_url(query).and_then(|url| {
            self.fetcher
                .fetch(&url, Duration::from_secs(self.settings.search_timeout_secs))
        }) {
            Ok(html) => html,
            Err(error) => return Attempt::failed(error),
        };
        let resolve_limit = limit.min(self.settings.html_fallback_max_resolve) as usize;
        let ids = extract_video_ids(&html, resolve_limit);
        debug!("Results page yielded {} video ids", ids.len());

        let mut last_error = None;
        let mut records = Vec::new();
        for id in ids {
            match self.fetch_video_metadata(&watch_url(&id)) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!("Failed to resolve scraped video {id}: {error}");
                    last_error = Some(error);
                }
            }
        }
        if records.is_empty() {
            Attempt::empty(last_error)
        } else {
            Attempt::produced(records)
        }
    }

    /// Search with the primary tool, then the results page, then canned
    /// demonstration records. Never returns an empty result list.
    pub fn search_videos(
        &self,
        session: &SessionContext,
        query: &str,
        limit: Option<u32>,
    ) -> StreamResult<SearchOutcome> {
        let query = validate_query(query)?;
        let limit = limit
            .unwrap_or(self.settings.search_limit)
            .clamp(1, MAX_SEARCH_LIMIT);

        if let Some(records) = session.cached_search(&query, limit) {
            debug!("Search cache hit for {query:?} (limit {limit})");
            let outcome = SearchOutcome {
                query,
                records,
                origin: ResultOrigin::Live,
                from_cache: true,
            };
            session.record_results(&outcome);
            return Ok(outcome);
        }

        let plan = FallbackPlan::for_search(self.settings.html_fallback_enabled);
        let mut step = Some(plan.first_step());
        let mut last_error = None;
        while let Some(current) = step {
            let (attempt, origin) = match current {
                FallbackStep::Primary => (self.search_primary(&query, limit), ResultOrigin::Live),
                FallbackStep::HtmlScrape => {
                    (self.search_scrape(&query, limit), ResultOrigin::Scraped)
                }
                FallbackStep::Demonstration => (
                    Attempt::produced(demonstration_records(&query)),
                    ResultOrigin::Demonstration,
                ),
                FallbackStep::TimeoutRetry | FallbackStep::RelaxedFormat => break,
            };
            if let Some(records) = attempt.value {
                if origin == ResultOrigin::Live {
                    session.store_search(&query, limit, records.clone());
                } else {
                    warn!("Search for {query:?} answered by {origin:?} fallback");
                }
                let outcome = SearchOutcome {
                    query,
                    records,
                    origin,
                    from_cache: false,
                };
                session.record_results(&outcome);
                return Ok(outcome);
            }
            if let Some(error) = attempt.error {
                warn!("Search step {current:?} failed: {error}");
                last_error = Some(error);
            }
            step = plan.next_step(current, attempt.result);
        }
        Err(last_error.unwrap_or_else(|| StreamError::external_failure("Search failed.", None)))
    }

    fn metadata_attempt(&self, invocation: &Invocation) -> Attempt<VideoRecord> {
        let timeout_secs = self.settings.metadata_timeout_secs;
        match self.run_tool(invocation, timeout_secs) {
            Ok(ProcessOutcome::Success(output)) => match parse_metadata_output(&output.stdout) {
                Some(record) => Attempt::produced(record),
                None => Attempt::failed(StreamError::MalformedOutput(
                    "yt-dlp returned no readable video metadata.".to_string(),
                )),
            },
            Ok(ProcessOutcome::Failure(output)) => match parse_metadata_output(&output.stdout) {
                Some(record) => {
                    warn!("yt-dlp exited with {:?} but printed usable metadata", output.exit_code);
                    Attempt::produced(record)
                }
                None => Attempt::failed(StreamError::external_failure(
                    "yt-dlp could not read this video.",
                    output.stderr_tail(STDERR_TAIL_LINES),
                )),
            },
            Ok(ProcessOutcome::TimedOut { .. }) => {
                Attempt::failed(StreamError::ExternalTimeout(timeout_secs))
            }
            Err(error) => Attempt::failed(error),
        }
    }

    /// Full metadata for one video. A timeout is retried once after a short
    /// backoff; other failures are final.
    pub fn fetch_video_metadata(&self, url: &str) -> StreamResult<VideoRecord> {
        let canonical = canonicalize_url(url)?;
        let extractor = self.require_extractor()?;
        let invocation = CommandBuilder::new(&extractor, &self.settings).metadata(&canonical);

        let plan = FallbackPlan::for_metadata();
        let mut step = Some(plan.first_step());
        let mut last_error = None;
        while let Some(current) = step {
            if current == FallbackStep::TimeoutRetry {
                warn!("Metadata request for {canonical} timed out, retrying once");
                thread::sleep(Duration::from_millis(self.settings.metadata_retry_backoff_ms));
            }
            let attempt = self.metadata_attempt(&invocation);
            if let Some(record) = attempt.value {
                return Ok(record);
            }
            last_error = attempt.error;
            step = plan.next_step(current, attempt.result);
        }
        Err(last_error.unwrap_or_else(|| {
            StreamError::external_failure("yt-dlp could not read this video.", None)
        }))
    }

    fn download_attempt(
        &self,
        invocation: &Invocation,
        scratch_dir: &Path,
        format: MediaFormat,
    ) -> Attempt<PathBuf> {
        let timeout_secs = self.settings.download_timeout_secs;
        match self.run_tool(invocation, timeout_secs) {
            Ok(ProcessOutcome::Success(output)) => match find_downloaded_file(scratch_dir, format) {
                Some(path) => Attempt::produced(path),
                None => Attempt::empty(Some(StreamError::FileNotFound {
                    stderr: output.stderr_tail(STDERR_TAIL_LINES),
                })),
            },
            Ok(ProcessOutcome::Failure(output)) => Attempt::failed(StreamError::external_failure(
                "yt-dlp download failed.",
                output.stderr_tail(STDERR_TAIL_LINES),
            )),
            Ok(ProcessOutcome::TimedOut { .. }) => {
                Attempt::failed(StreamError::ExternalTimeout(timeout_secs))
            }
            Err(error) => Attempt::failed(error),
        }
    }

    fn download_into(
        &self,
        scratch_dir: &Path,
        extractor: &Path,
        canonical_url: &str,
        format: MediaFormat,
        transcoder: &ExternalToolStatus,
    ) -> StreamResult<DownloadResult> {
        let builder = CommandBuilder::new(extractor, &self.settings);
        let plan = FallbackPlan::for_download();
        let mut step = Some(plan.first_step());
        let mut last_error = None;
        while let Some(current) = step {
            let invocation = match current {
                FallbackStep::Primary => {
                    builder.download(canonical_url, format, transcoder, scratch_dir)
                }
                FallbackStep::RelaxedFormat => {
                    warn!("Retrying {canonical_url} with a relaxed format selector");
                    clear_directory(scratch_dir)?;
                    builder.relaxed_download(canonical_url, format, transcoder, scratch_dir)
                }
                _ => break,
            };
            let attempt = self.download_attempt(&invocation, scratch_dir, format);
            if let Some(located) = attempt.value {
                let reconciled = reconcile_download(&located, format, transcoder.available)?;
                let data = fs::read(&reconciled.path)?;
                let file_name = reconciled
                    .path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| format!("download.{}", format.extension()));
                return Ok(DownloadResult {
                    file_name,
                    mime_type: format.mime_type().to_string(),
                    format,
                    data,
                    conversion: reconciled.conversion,
                    native_extension: reconciled.native_extension,
                    used_relaxed_format: current == FallbackStep::RelaxedFormat,
                });
            }
            if let Some(error) = attempt.error.as_ref() {
                warn!("Download step {current:?} failed: {error}");
            }
            last_error = attempt.error;
            step = plan.next_step(current, attempt.result);
        }
        Err(last_error.unwrap_or(StreamError::FileNotFound { stderr: None }))
    }

    /// Download one video as MP4 or MP3. At most one download runs per
    /// session, and the scratch directory is gone when this returns.
    pub fn download_media(
        &self,
        session: &SessionContext,
        url: &str,
        format: MediaFormat,
    ) -> StreamResult<DownloadResult> {
        let _guard = session.try_begin_download()?;
        let canonical = canonicalize_url(url)?;
        let extractor = self.require_extractor()?;
        let transcoder = self.refresh_transcoder(session);
        if format == MediaFormat::Mp3 && !transcoder.available {
            warn!("{TRANSCODER_NAME} is unavailable; the MP3 will keep its native audio codec");
        }

        let scratch = create_scratch_dir(self.settings.scratch_root.as_deref().map(Path::new))?;
        let result = self.download_into(scratch.path(), &extractor, &canonical, format, &transcoder);
        let scratch_path = scratch.path().to_path_buf();
        if let Err(error) = scratch.close() {
            warn!(
                "Failed to remove scratch directory {}: {error}",
                scratch_path.display()
            );
        }
        let result = result?;
        info!(
            "Downloaded {} ({} bytes, {:?})",
            result.file_name,
            result.data.len(),
            result.conversion
        );
        Ok(result)
    }

    /// Run the install action and recompute the session's transcoder status.
    pub fn install(
        &self,
        session: &SessionContext,
        tool: ManagedTool,
        progress: ProgressCallback<'_>,
    ) -> StreamResult<ExternalToolStatus> {
        let installed = install_managed_tool(tool, &self.settings, progress)?;
        self.refresh_transcoder(session);
        Ok(installed.with_version(self.runner.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    const VIDEO_URL: &str = "https://youtu.be/dQw4w9WgXcQ?si=share";

    enum Scripted {
        Stdout(String),
        Failure { stdout: String, stderr: String },
        TimedOut,
        /// Write a file into the `-o` directory, then exit 0.
        Produce(&'static str),
    }

    struct ScriptedRunner {
        script: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl ScriptedRunner {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for ScriptedRunner {
        fn run(&self, invocation: &Invocation, _timeout: Duration) -> StreamResult<ProcessOutcome> {
            self.calls.lock().unwrap().push(invocation.clone());
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Scripted::Stdout(String::new()));
            let success = |stdout: String| {
                ProcessOutcome::Success(CapturedOutput {
                    stdout,
                    stderr: String::new(),
                    exit_code: Some(0),
                })
            };
            Ok(match next {
                Scripted::Stdout(stdout) => success(stdout),
                Scripted::Failure { stdout, stderr } => ProcessOutcome::Failure(CapturedOutput {
                    stdout,
                    stderr,
                    exit_code: Some(1),
                }),
                Scripted::TimedOut => ProcessOutcome::TimedOut {
                    after: Duration::from_secs(1),
                },
                Scripted::Produce(name) => {
                    let template = invocation.flag_value("-o").unwrap();
                    let dir = Path::new(template).parent().unwrap();
                    fs::write(dir.join(name), b"media-bytes").unwrap();
                    success(String::new())
                }
            })
        }
    }

    struct CannedFetcher(StreamResult<String>);

    impl PageFetcher for CannedFetcher {
        fn fetch(&self, _url: &str, _timeout: Duration) -> StreamResult<String> {
            match &self.0 {
                Ok(html) => Ok(html.clone()),
                Err(_) => Err(StreamError::http("offline")),
            }
        }
    }

    struct Fixture {
        _bin_dir: TempDir,
        scratch_root: TempDir,
        ffmpeg_path: String,
        tools: RuntimeTools,
        runner: Arc<ScriptedRunner>,
    }

    fn fixture(script: Vec<Scripted>, configure: impl FnOnce(&mut RuntimeSettings)) -> Fixture {
        let bin_dir = tempfile::tempdir().unwrap();
        let scratch_root = tempfile::tempdir().unwrap();
        let ytdlp_path = bin_dir.path().join("yt-dlp");
        let ffmpeg_path = bin_dir.path().join("ffmpeg");
        fs::write(&ytdlp_path, b"#!/bin/sh\n").unwrap();
        fs::write(&ffmpeg_path, b"#!/bin/sh\n").unwrap();

        let mut settings = RuntimeSettings {
            scratch_root: Some(scratch_root.path().to_string_lossy().to_string()),
            html_fallback_enabled: false,
            metadata_retry_backoff_ms: 0,
            ..RuntimeSettings::default()
        };
        configure(&mut settings);

        let runner = ScriptedRunner::new(script);
        let tools = RuntimeTools::new(settings)
            .unwrap()
            .with_runner(runner.clone())
            .with_fetcher(Arc::new(CannedFetcher(Err(StreamError::http("offline")))))
            .with_extractor_locator(ToolLocator::custom_only(Some(
                ytdlp_path.to_string_lossy().to_string(),
            )))
            .with_transcoder_locator(ToolLocator::default());
        Fixture {
            _bin_dir: bin_dir,
            scratch_root,
            ffmpeg_path: ffmpeg_path.to_string_lossy().to_string(),
            tools,
            runner,
        }
    }

    fn json_line(id: &str, title: &str) -> String {
        format!(r#"{{"id":"{id}","title":"{title}","uploader":"Channel","duration":125,"view_count":4200}}"#)
    }

    fn scratch_is_empty(fixture: &Fixture) -> bool {
        fs::read_dir(fixture.scratch_root.path()).unwrap().count() == 0
    }

    #[test]
    fn live_search_is_parsed_and_cached() {
        let stdout = [json_line("aaaaaaaaaaa", "One"), json_line("bbbbbbbbbbb", "Two")].join("\n");
        let fixture = fixture(vec![Scripted::Stdout(stdout)], |_| {});
        let session = fixture.tools.new_session();

        let first = fixture.tools.search_videos(&session, "lofi!! beats", Some(5)).unwrap();
        assert_eq!(first.query, "lofi beats");
        assert_eq!(first.origin, ResultOrigin::Live);
        assert_eq!(first.records.len(), 2);
        assert!(!first.from_cache);
        assert_eq!(
            fixture.runner.calls()[0].args.last().map(String::as_str),
            Some("ytsearch5:lofi beats")
        );

        let second = fixture.tools.search_videos(&session, "lofi beats", Some(5)).unwrap();
        assert!(second.from_cache);
        assert_eq!(second.records, first.records);
        assert_eq!(fixture.runner.calls().len(), 1);
        assert_eq!(session.last_results(), Some(second));
    }

    #[test]
    fn empty_primary_search_falls_back_to_flagged_demonstration() {
        let fixture = fixture(vec![Scripted::Stdout(String::new())], |_| {});
        let session = fixture.tools.new_session();
        let outcome = fixture.tools.search_videos(&session, "synthwave", None).unwrap();
        assert!(outcome.is_demonstration());
        assert!(!outcome.records.is_empty());
        assert!(outcome.records.iter().all(|record| record.is_demo));
        assert_eq!(session.cached_search_count(), 0);
    }

    #[test]
    fn failed_search_keeps_partial_stdout() {
        let fixture = fixture(
            vec![Scripted::Failure {
                stdout: json_line("aaaaaaaaaaa", "Survivor"),
                stderr: "ERROR: [youtube] zzz: Video unavailable".to_string(),
            }],
            |_| {},
        );
        let session = fixture.tools.new_session();
        let outcome = fixture.tools.search_videos(&session, "mix", Some(3)).unwrap();
        assert_eq!(outcome.origin, ResultOrigin::Live);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].title, "Survivor");
    }

    #[test]
    fn timed_out_search_uses_results_page_and_metadata() {
        let html = r#"{"videoId":"ccccccccccc"} <a href="/watch?v=ddddddddddd">x</a>"#;
        let fixture = fixture(
            vec![
                Scripted::TimedOut,
                Scripted::Stdout(json_line("ccccccccccc", "Scraped one")),
                Scripted::Stdout(json_line("ddddddddddd", "Scraped two")),
            ],
            |settings| settings.html_fallback_enabled = true,
        );
        let tools = fixture
            .tools
            .with_fetcher(Arc::new(CannedFetcher(Ok(html.to_string()))));
        let session = tools.new_session();
        let outcome = tools.search_videos(&session, "ambient", Some(10)).unwrap();
        assert_eq!(outcome.origin, ResultOrigin::Scraped);
        let ids: Vec<&str> = outcome.records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["ccccccccccc", "ddddddddddd"]);
        assert_eq!(fixture.runner.calls().len(), 3);
        assert_eq!(
            fixture.runner.calls()[1].args.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v=ccccccccccc")
        );
        assert_eq!(session.cached_search_count(), 0);
    }

    #[test]
    fn missing_extractor_still_yields_demonstration_search() {
        let fixture = fixture(Vec::new(), |_| {});
        let tools = fixture
            .tools
            .with_extractor_locator(ToolLocator::custom_only(None));
        let session = tools.new_session();
        let outcome = tools.search_videos(&session, "anything", None).unwrap();
        assert!(outcome.is_demonstration());
        assert!(matches!(
            tools.fetch_video_metadata(VIDEO_URL),
            Err(StreamError::ToolUnavailable(_))
        ));
        assert!(fixture.runner.calls().is_empty());
    }

    #[test]
    fn invalid_input_never_reaches_the_tool() {
        let fixture = fixture(Vec::new(), |_| {});
        let session = fixture.tools.new_session();
        assert!(matches!(
            fixture.tools.search_videos(&session, "!!! ???", None),
            Err(StreamError::Validation(_))
        ));
        assert!(matches!(
            fixture.tools.fetch_video_metadata("https://example.com/v/123"),
            Err(StreamError::Validation(_))
        ));
        assert!(matches!(
            fixture.tools.download_media(&session, "not a link", MediaFormat::Mp4),
            Err(StreamError::Validation(_))
        ));
        assert!(fixture.runner.calls().is_empty());
        assert!(!session.is_download_in_flight());
    }

    #[test]
    fn metadata_timeout_is_retried_exactly_once() {
        let fixture = fixture(
            vec![
                Scripted::TimedOut,
                Scripted::Stdout(json_line("dQw4w9WgXcQ", "Retried")),
            ],
            |_| {},
        );
        let record = fixture.tools.fetch_video_metadata(VIDEO_URL).unwrap();
        assert_eq!(record.title, "Retried");
        let calls = fixture.runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert_eq!(
            calls[0].args.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
    }

    #[test]
    fn metadata_double_timeout_surfaces_timeout() {
        let fixture = fixture(vec![Scripted::TimedOut, Scripted::TimedOut], |_| {});
        assert!(matches!(
            fixture.tools.fetch_video_metadata(VIDEO_URL),
            Err(StreamError::ExternalTimeout(30))
        ));
        assert_eq!(fixture.runner.calls().len(), 2);
    }

    #[test]
    fn metadata_failure_is_not_retried() {
        let fixture = fixture(
            vec![Scripted::Failure {
                stdout: String::new(),
                stderr: "ERROR: Private video".to_string(),
            }],
            |_| {},
        );
        let error = fixture.tools.fetch_video_metadata(VIDEO_URL).unwrap_err();
        assert_eq!(error.stderr(), Some("ERROR: Private video"));
        assert_eq!(fixture.runner.calls().len(), 1);
    }

    #[test]
    fn concurrent_download_is_rejected_without_running_the_tool() {
        let fixture = fixture(vec![Scripted::Produce("clip.mp4")], |_| {});
        let session = fixture.tools.new_session();
        let held = session.try_begin_download().unwrap();
        assert!(matches!(
            fixture.tools.download_media(&session, VIDEO_URL, MediaFormat::Mp4),
            Err(StreamError::DownloadInProgress)
        ));
        assert!(fixture.runner.calls().is_empty());
        drop(held);
        assert!(fixture
            .tools
            .download_media(&session, VIDEO_URL, MediaFormat::Mp4)
            .is_ok());
    }

    #[test]
    fn mp3_without_transcoder_is_renamed_and_scratch_removed() {
        let fixture = fixture(vec![Scripted::Produce("Song-dQw4w9WgXcQ.m4a")], |_| {});
        let session = fixture.tools.new_session();
        let result = fixture
            .tools
            .download_media(&session, VIDEO_URL, MediaFormat::Mp3)
            .unwrap();
        assert_eq!(result.file_name, "Song-dQw4w9WgXcQ.mp3");
        assert_eq!(result.mime_type, "audio/mpeg");
        assert_eq!(result.conversion, MediaConversion::ExtensionOnly);
        assert!(!result.is_true_conversion());
        assert_eq!(result.native_extension.as_deref(), Some("m4a"));
        assert_eq!(result.data, b"media-bytes");
        assert!(scratch_is_empty(&fixture));
        assert!(!session.is_download_in_flight());
        assert!(!fixture.runner.calls()[0].has_flag("-x"));
    }

    #[test]
    fn mp4_with_transcoder_passes_its_path() {
        let fixture = fixture(vec![Scripted::Produce("Clip-dQw4w9WgXcQ.mp4")], |_| {});
        let tools = fixture
            .tools
            .with_transcoder_locator(ToolLocator::custom_only(Some(fixture.ffmpeg_path.clone())));
        let session = tools.new_session();
        let result = tools.download_media(&session, VIDEO_URL, MediaFormat::Mp4).unwrap();
        assert_eq!(result.conversion, MediaConversion::Native);
        assert!(!result.used_relaxed_format);
        let calls = fixture.runner.calls();
        let location = calls[0].flag_value("--ffmpeg-location").unwrap();
        assert!(location.ends_with("ffmpeg"));
        assert!(session.cached_transcoder().unwrap().available);
    }

    #[test]
    fn failed_download_retries_relaxed_once() {
        let fixture = fixture(
            vec![
                Scripted::Failure {
                    stdout: String::new(),
                    stderr: "ERROR: Requested format is not available".to_string(),
                },
                Scripted::Produce("Clip-dQw4w9WgXcQ.webm"),
            ],
            |_| {},
        );
        let session = fixture.tools.new_session();
        let result = fixture
            .tools
            .download_media(&session, VIDEO_URL, MediaFormat::Mp4)
            .unwrap();
        assert!(result.used_relaxed_format);
        assert_eq!(result.file_name, "Clip-dQw4w9WgXcQ.mp4");
        assert_eq!(result.conversion, MediaConversion::ExtensionOnly);
        let calls = fixture.runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].flag_value("-f"), Some("best"));
        assert!(scratch_is_empty(&fixture));
    }

    #[test]
    fn persistent_download_failure_is_final_and_cleans_up() {
        let fixture = fixture(
            vec![
                Scripted::Failure {
                    stdout: String::new(),
                    stderr: "ERROR: Sign in to confirm your age".to_string(),
                },
                Scripted::Failure {
                    stdout: String::new(),
                    stderr: "ERROR: Sign in to confirm your age".to_string(),
                },
            ],
            |_| {},
        );
        let session = fixture.tools.new_session();
        let error = fixture
            .tools
            .download_media(&session, VIDEO_URL, MediaFormat::Mp4)
            .unwrap_err();
        assert!(matches!(error, StreamError::ExternalFailure { .. }));
        assert_eq!(fixture.runner.calls().len(), 2);
        assert!(scratch_is_empty(&fixture));
        assert!(!session.is_download_in_flight());
    }

    #[test]
    fn clean_exit_without_file_is_file_not_found() {
        let fixture = fixture(vec![Scripted::Stdout(String::new())], |_| {});
        let session = fixture.tools.new_session();
        let error = fixture
            .tools
            .download_media(&session, VIDEO_URL, MediaFormat::Mp3)
            .unwrap_err();
        assert!(matches!(error, StreamError::FileNotFound { .. }));
        assert_eq!(fixture.runner.calls().len(), 1);
        assert!(scratch_is_empty(&fixture));
    }

    #[test]
    fn transcoder_status_is_cached_until_refreshed() {
        let fixture = fixture(Vec::new(), |_| {});
        let session = fixture.tools.new_session();
        assert!(session.cached_transcoder().is_none());
        let status = fixture.tools.transcoder_status(&session);
        assert!(!status.available);
        assert_eq!(status.source, ToolSource::Missing);
        assert_eq!(session.cached_transcoder(), Some(status));
    }

    #[test]
    fn tool_status_reads_versions_through_the_runner() {
        let fixture = fixture(vec![Scripted::TimedOut], |_| {});
        let session = fixture.tools.new_session();
        let status = fixture.tools.tool_status(&session, false);

        assert!(status.extractor.available);
        assert_eq!(status.extractor.version, None);
        assert!(!status.transcoder.available);
        let calls = fixture.runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, vec!["--version".to_string()]);
    }
}
