//! demo - end-to-end synthetic run: index two stub cameras, query for
//! people, extract clip manifests

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use footage_index::clip::{CameraRegistry, ClipPipelineConfig, ClipSource, ManifestExtractor};
use footage_index::detect::{walkthrough_script, ScriptedBackend, DEFAULT_INPUT_SIZE};
use footage_index::{
    find_clips, run_streams, AttributeExtractor, ClipAggregator, ClipPipeline, DetectionPredicate,
    FileConfig, FileSource, FrameLog, FrameQuery, ObjectClass, SqliteFrameLog, StreamSpec,
    StreamWorker,
};

#[path = "../ui.rs"]
mod ui;

const DEMO_CAMERAS: [&str; 2] = ["lobby", "dock"];
const DEMO_DB_NAME: &str = "demo_footage.db";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of synthetic footage per camera.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Frames per second of the synthetic cameras.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Output directory for the frame log, stand-in archives and clips.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// UI mode for stderr progress (auto|plain|pretty|quiet)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    let ui = ui::Ui::new(
        ui::UiMode::parse(Some(&args.ui)),
        std::io::stderr().is_terminal(),
    );

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)?;
    let db_path = out_dir.join(DEMO_DB_NAME);
    reset_db(&db_path)?;
    let db_path = db_path
        .to_str()
        .ok_or_else(|| anyhow!("output path is not valid UTF-8"))?
        .to_string();
    let total_frames = args.seconds.saturating_mul(args.fps as u64);

    {
        let mut stage = ui.stage("index synthetic cameras");
        let log: Arc<dyn FrameLog> = Arc::new(SqliteFrameLog::open(&db_path)?);
        let mut workers = Vec::new();
        for camera_id in DEMO_CAMERAS {
            let mut source_config = FileConfig::new(&format!("stub://{}", camera_id));
            source_config.frame_limit = Some(total_frames);
            let (width, height) = source_config.synthetic_size;
            let backend = ScriptedBackend::new(
                width,
                height,
                DEFAULT_INPUT_SIZE,
                walkthrough_script(width, height, total_frames as usize),
            )?;
            workers.push(StreamWorker::new(
                StreamSpec::new(camera_id, f64::from(args.fps)),
                Box::new(FileSource::open(source_config)?),
                Arc::new(Mutex::new(backend)),
                AttributeExtractor::default(),
                Arc::clone(&log),
            )?);
        }
        let mut frames = 0u64;
        for (camera_id, result) in run_streams(workers) {
            let stats = result.with_context(|| format!("camera {} failed", camera_id))?;
            frames += stats.frames;
        }
        stage.note(format!("{} frame(s) recorded", frames));
    }

    let query = FrameQuery::all().with_detection(DetectionPredicate {
        class: Some(ObjectClass::Person),
        ..DetectionPredicate::default()
    });
    let intervals = {
        let mut stage = ui.stage("query for people");
        let log = SqliteFrameLog::open(&db_path)?;
        let intervals = find_clips(&log, &query, &ClipAggregator::default())?;
        stage.note(format!("{} interval(s)", intervals.len()));
        intervals
    };

    let archive_dir = out_dir.join("archive");
    fs::create_dir_all(&archive_dir)?;
    let mut sources = CameraRegistry::new();
    for camera_id in DEMO_CAMERAS {
        let path = archive_dir.join(format!("{}.mp4", camera_id));
        fs::write(&path, b"synthetic archive placeholder")?;
        sources.insert(ClipSource {
            camera_id: camera_id.to_string(),
            path,
            fps: f64::from(args.fps),
            location: None,
        });
    }

    let mut clip_config = ClipPipelineConfig::new(out_dir.join("clips"));
    clip_config.pad_s = 0.5;
    let pipeline = ClipPipeline::new(
        Arc::new(ManifestExtractor {
            source_duration_s: Some(args.seconds as f64),
        }),
        Arc::new(sources),
        clip_config,
    )?;
    let report = {
        let mut stage = ui.counter("extract clip manifests", intervals.len() as u64);
        let report = pipeline.run_with_progress(&intervals, &|_| stage.inc())?;
        stage.note(format!("{} written", report.extracted_count()));
        report
    };

    for (interval, path) in report.extracted() {
        println!(
            "{} frames {}..{} ({:.1}s..{:.1}s) -> {}",
            interval.camera_id,
            interval.start_frame,
            interval.end_frame,
            interval.start_time,
            interval.end_time,
            path.display()
        );
    }
    for (interval, failure) in report.failed() {
        println!(
            "{} frames {}..{} failed: {}",
            interval.camera_id, interval.start_frame, interval.end_frame, failure
        );
    }
    Ok(())
}

/// Fresh log on every run; SQLite side files go with it.
fn reset_db(db_path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut path = db_path.as_os_str().to_owned();
        path.push(suffix);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("failed to reset {}", db_path.display())),
        }
    }
    Ok(())
}
