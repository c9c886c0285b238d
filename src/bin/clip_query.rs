//! clip_query - run a structured frame query and extract the matching clips

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use footage_index::clip::{default_extractor, CameraRegistry, ClipSource};
use footage_index::{
    find_clips, ClipAggregator, ClipInterval, ClipOutcome, ClipPipeline, FrameQuery,
    IndexerConfig, SqliteFrameLog,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (TOML or JSON) naming the frame log and camera sources.
    #[arg(long, env = "FOOTAGE_CONFIG")]
    config: Option<PathBuf>,
    /// Path to a frame query JSON file.
    #[arg(long, conflicts_with = "query_json")]
    query: Option<PathBuf>,
    /// Frame query as inline JSON.
    #[arg(long)]
    query_json: Option<String>,
    /// Override the clip output directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Override the gap tolerance in frames.
    #[arg(long)]
    tolerance: Option<u64>,
    /// Override the padding in seconds added around each clip.
    #[arg(long)]
    pad_s: Option<f64>,
    /// List intervals without extracting anything.
    #[arg(long)]
    dry_run: bool,
    /// UI mode for stderr progress (auto|plain|pretty|quiet)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Serialize)]
struct QueryReport<'a> {
    intervals: &'a [ClipInterval],
    #[serde(skip_serializing_if = "Option::is_none")]
    outcomes: Option<&'a [ClipOutcome]>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(
        ui::UiMode::parse(Some(&args.ui)),
        std::io::stderr().is_terminal(),
    );

    let query = match (&args.query, &args.query_json) {
        (Some(path), None) => FrameQuery::from_file(path)?,
        (None, Some(json)) => FrameQuery::from_json(json)?,
        _ => return Err(anyhow!("pass exactly one of --query or --query-json")),
    };

    let mut cfg = IndexerConfig::load_from(args.config.as_deref())?;
    if let Some(dir) = args.output_dir {
        cfg.clips.output_dir = dir;
    }
    if let Some(tolerance) = args.tolerance {
        cfg.clips.tolerance_frames = tolerance;
    }
    if let Some(pad_s) = args.pad_s {
        cfg.clips.pad_s = pad_s;
    }

    let extractor = if args.dry_run {
        None
    } else {
        Some(default_extractor()?)
    };

    let intervals = {
        let mut stage = ui.stage("query frame log");
        let log = SqliteFrameLog::open(&cfg.db_path)?;
        let intervals = find_clips(
            &log,
            &query,
            &ClipAggregator::new(cfg.clips.tolerance_frames),
        )?;
        stage.note(format!("{} interval(s)", intervals.len()));
        intervals
    };

    let Some(extractor) = extractor else {
        return print_report(&QueryReport {
            intervals: &intervals,
            outcomes: None,
        });
    };

    let sources: CameraRegistry = cfg.cameras.iter().map(ClipSource::from).collect();
    let pipeline = ClipPipeline::new(
        extractor,
        Arc::new(sources),
        cfg.clips.pipeline_config(),
    )?;
    let report = {
        let mut stage = ui.counter("extract clips", intervals.len() as u64);
        let report = pipeline.run_with_progress(&intervals, &|_| stage.inc())?;
        stage.note(format!(
            "{} extracted, {} failed",
            report.extracted_count(),
            report.failed_count()
        ));
        report
    };

    print_report(&QueryReport {
        intervals: &intervals,
        outcomes: Some(&report.outcomes),
    })
}

fn print_report(report: &QueryReport<'_>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
