mod logging;
mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use capture_core::ProgressInfo;
use capture_engine::{CaptureResult, EngineConfig, EngineEvent, EngineHandle};
use clap::Parser;
use engine_logging::{engine_debug, engine_info};
use log::LevelFilter;

/// Capture a web page with its images, styles, scripts, fonts and videos into
/// a self-contained zip archive.
#[derive(Debug, Parser)]
#[command(name = "capture_app", version)]
struct Cli {
    /// Page to capture (http or https; a bare host is treated as https).
    url: String,
    /// Capture options as JSON, or RON when the file ends in `.ron`.
    #[arg(long, value_name = "FILE")]
    options: Option<PathBuf>,
    /// Sanitizer rule lists replacing the built-in ones.
    #[arg(long, value_name = "FILE")]
    rules: Option<PathBuf>,
    /// Directory the archive is written to. Defaults to the system temp dir.
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
    /// Also copy the finished archive into this directory.
    #[arg(long, value_name = "DIR")]
    save_to: Option<PathBuf>,
    /// off, error, warn, info, debug or trace.
    #[arg(long, value_name = "LEVEL", default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

fn parse_level(raw: &str) -> Result<LevelFilter, String> {
    raw.parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level {raw:?}"))
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize(cli.log_level, cli.log_file.as_deref());

    let options = settings::load_options(cli.options.as_deref())?;
    let rules = settings::load_rules(cli.rules.as_deref())?;
    let config = match &cli.out {
        Some(dir) => EngineConfig::default_with_output(dir),
        None => EngineConfig::default(),
    };

    let handle = EngineHandle::with_rules(config, &rules);
    handle.start(cli.url.clone(), options);
    let result = wait_for_result(&handle)
        .with_context(|| format!("capture of {} failed", cli.url))?;

    if let Some(dir) = &cli.save_to {
        let saved = settings::save_archive_to(&result.zip_path, dir)?;
        engine_info!("Archive saved to {}", saved.display());
    }

    let json = serde_json::to_string_pretty(&result).context("failed to encode the result")?;
    println!("{json}");
    Ok(())
}

fn wait_for_result(handle: &EngineHandle) -> Result<CaptureResult> {
    let mut last: Option<ProgressInfo> = None;
    loop {
        match handle.recv_timeout(POLL_INTERVAL) {
            Some(EngineEvent::Progress(info)) => {
                report(last.as_ref(), &info);
                last = Some(info);
            }
            Some(EngineEvent::Completed(result)) => return Ok(result?),
            None => continue,
        }
    }
}

fn report(previous: Option<&ProgressInfo>, info: &ProgressInfo) {
    let phase_changed = previous.map_or(true, |prev| prev.phase != info.phase);
    let counts_changed = previous.map_or(true, |prev| {
        prev.completed_files != info.completed_files || prev.failed_files != info.failed_files
    });

    if phase_changed {
        engine_info!("{:?}: {}", info.phase, info.current_file);
    }
    if counts_changed && info.total_files > 0 {
        engine_info!(
            "{}/{} done, {} failed, {} downloading, {} pending",
            info.completed_files,
            info.total_files,
            info.failed_files,
            info.downloading_files,
            info.pending_files
        );
    } else if !info.current_file.is_empty() {
        engine_debug!("{} ({}%)", info.current_file, info.file_progress);
    }
}
