use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cyber_stream::{
    init_logging, paginate, save_download, save_settings, settings_file_path, ExternalToolStatus,
    InstallProgress, ManagedTool, MediaFormat, RuntimeTools, StreamError, StreamResult,
    VideoRecord, ViewCountStyle, DEFAULT_PAGE_SIZE,
};

#[derive(Parser)]
#[command(name = "cyber-stream")]
#[command(version)]
#[command(about = "Search, preview and download videos through yt-dlp")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repeat for more log output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for videos
    Search {
        query: String,

        #[arg(short, long)]
        limit: Option<u32>,

        /// 1-based result page
        #[arg(short, long, default_value_t = 1)]
        page: usize,
    },

    /// Show full metadata for one video
    Info { url: String },

    /// Download a video as mp4 or its audio as mp3
    Download {
        url: String,

        #[arg(short, long, default_value = "mp4")]
        format: MediaFormat,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Report where yt-dlp and ffmpeg were found
    Tools {
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },

    /// Install a managed copy of yt-dlp or ffmpeg
    Install { tool: ManagedTool },

    /// Print the effective settings
    Settings {
        /// Write the normalized settings back to the settings file
        #[arg(long, default_value_t = false)]
        save: bool,
    },
}

fn print_record(index: usize, record: &VideoRecord) {
    let demo = if record.is_demo { " [DEMO]" } else { "" };
    println!("{index:>3}. {}{demo}", record.title);
    println!(
        "     {} | {} | {} views",
        record.channel_name,
        record.duration_text(),
        record.view_count_text(ViewCountStyle::Grouped)
    );
    println!("     {}", record.url);
}

fn print_tool(status: &ExternalToolStatus) {
    let location = status
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "not found".to_string());
    println!(
        "{:<8} {:<9} {} {}",
        status.name,
        format!("{:?}", status.source).to_lowercase(),
        location,
        status.version.as_deref().unwrap_or("")
    );
}

fn run(cli: Cli) -> StreamResult<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => settings_file_path()?,
    };
    let tools = RuntimeTools::from_settings_file(&config_path)?;
    let session = tools.new_session();

    match cli.command {
        Commands::Search { query, limit, page } => {
            let outcome = tools.search_videos(&session, &query, limit)?;
            if outcome.is_demonstration() {
                println!("No live results were available. Showing demonstration data.");
            }
            let shown = paginate(&outcome.records, page.saturating_sub(1), DEFAULT_PAGE_SIZE);
            let offset = shown.page * DEFAULT_PAGE_SIZE;
            for (index, record) in shown.items.iter().enumerate() {
                print_record(offset + index + 1, record);
            }
            println!(
                "Page {}/{} ({} results for \"{}\"{})",
                shown.page + 1,
                shown.page_count,
                outcome.records.len(),
                outcome.query,
                if outcome.from_cache { ", cached" } else { "" }
            );
        }
        Commands::Info { url } => {
            let record = tools.fetch_video_metadata(&url)?;
            print_record(1, &record);
            if let Some(date) = record.upload_date.as_deref() {
                println!("     Uploaded {date}");
            }
            if let Some(description) = record.description.as_deref() {
                println!();
                println!("{description}");
            }
        }
        Commands::Download {
            url,
            format,
            output,
        } => {
            let result = tools.download_media(&session, &url, format)?;
            let saved = save_download(&result, &output)?;
            println!("Saved {} ({} bytes)", saved.display(), result.size_bytes());
            if !result.is_true_conversion() {
                println!(
                    "Note: not a true {} conversion; the file keeps its native {} encoding.",
                    format.extension().to_uppercase(),
                    result.native_extension.as_deref().unwrap_or("unknown")
                );
            }
        }
        Commands::Tools { refresh } => {
            let status = tools.tool_status(&session, refresh);
            print_tool(&status.extractor);
            print_tool(&status.transcoder);
            if let Some(dir) = status.managed_tools_dir {
                println!("Managed tools: {}", dir.display());
            }
        }
        Commands::Install { tool } => {
            let report = |event: &InstallProgress| {
                let percent = event
                    .progress
                    .map(|value| format!("{:>3.0}% ", value * 100.0))
                    .unwrap_or_default();
                match event.detail.as_deref() {
                    Some(detail) => eprintln!("{percent}{} ({detail})", event.message),
                    None => eprintln!("{percent}{}", event.message),
                }
            };
            let status = tools.install(&session, tool, &report)?;
            print_tool(&status);
        }
        Commands::Settings { save } => {
            let settings = if save {
                save_settings(&config_path, tools.settings().clone())?
            } else {
                tools.settings().clone()
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
            println!("# {}", config_path.display());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    init_logging(level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            if let Some(stderr) = error.stderr() {
                eprintln!("  {stderr}");
            }
            if matches!(error, StreamError::ToolUnavailable(_)) {
                eprintln!("  Try `cyber-stream install yt-dlp` or set a custom path.");
            }
            ExitCode::FAILURE
        }
    }
}
