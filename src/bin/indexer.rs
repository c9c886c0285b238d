//! indexer - per-camera ingestion into the frame log
//!
//! This daemon:
//! 1. Loads configuration (file named by FOOTAGE_CONFIG, then FOOTAGE_* overrides)
//! 2. Opens one frame source and detector per configured camera
//! 3. Runs decode, track and record building on one thread per camera
//! 4. Appends every frame record to the shared SQLite frame log
//! 5. Stops cleanly on Ctrl-C or when every source has ended

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use footage_index::attributes::DominantColorSampler;
use footage_index::config::{CameraSettings, IndexerConfig};
use footage_index::detect::{walkthrough_script, BackendRegistry, ScriptedBackend};
use footage_index::ingest::is_synthetic_path;
use footage_index::{
    run_streams, AttributeClassifier, AttributeExtractor, FileConfig, FileSource, FrameLog,
    SqliteFrameLog, StreamSpec, StreamWorker,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (TOML or JSON).
    #[arg(long, env = "FOOTAGE_CONFIG")]
    config: Option<PathBuf>,
    /// ONNX detector model used for non-stub cameras.
    #[arg(long, env = "FOOTAGE_MODEL")]
    model: Option<PathBuf>,
    /// ONNX person attribute model. Without it only clothing colors are recorded.
    #[arg(long, env = "FOOTAGE_ATTRIBUTE_MODEL")]
    attribute_model: Option<PathBuf>,
    /// Frames produced by each stub:// camera before it ends.
    #[arg(long, default_value_t = 300)]
    stub_frames: u64,
    /// Only run these cameras (repeatable). Defaults to all configured cameras.
    #[arg(long = "camera")]
    cameras: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = IndexerConfig::load_from(args.config.as_deref())?;
    let cameras: Vec<&CameraSettings> = cfg
        .cameras
        .iter()
        .filter(|camera| {
            args.cameras.is_empty()
                || args
                    .cameras
                    .iter()
                    .any(|wanted| wanted.trim().eq_ignore_ascii_case(&camera.camera_id))
        })
        .collect();
    if cameras.is_empty() {
        return Err(anyhow!(
            "no cameras to run; configure [[cameras]] or set FOOTAGE_CAMERAS=camera_id=path"
        ));
    }

    let log: Arc<dyn FrameLog> = Arc::new(SqliteFrameLog::open(&cfg.db_path)?);
    log::info!("frame log at {}", cfg.db_path);

    let attributes = AttributeExtractor::new(
        load_attribute_classifier(args.attribute_model.as_deref())?,
        Arc::new(DominantColorSampler::default()),
    )
    .with_untracked_color(cfg.color_untracked);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let mut registry = BackendRegistry::new();
    let mut workers = Vec::with_capacity(cameras.len());
    for camera in cameras {
        let path = camera.source_path.to_string_lossy().to_string();
        let mut source_config = FileConfig::new(&path);
        let backend_name = if is_synthetic_path(&path) {
            source_config.frame_limit = Some(args.stub_frames);
            let (width, height) = source_config.synthetic_size;
            let script = walkthrough_script(width, height, args.stub_frames as usize);
            registry.register_as(
                &camera.camera_id,
                ScriptedBackend::new(width, height, cfg.decoder.input_size, script)?,
            );
            camera.camera_id.clone()
        } else {
            register_model_backend(&mut registry, args.model.as_deref(), &cfg)?
        };
        let source = FileSource::open(source_config)?;

        let mut spec = StreamSpec::new(&camera.camera_id, camera.fps);
        spec.decoder = cfg.decoder.clone();
        spec.tracker = cfg.tracker.tracker.clone();
        spec.tracked_class = cfg.tracker.tracked_class;
        spec.rematch_distance = cfg.tracker.rematch_distance;
        spec.retry = cfg.append.clone();

        let worker = StreamWorker::new(
            spec,
            Box::new(source),
            registry.resolve(Some(&backend_name))?,
            attributes.clone(),
            Arc::clone(&log),
        )?
        .with_stop_flag(Arc::clone(&stop));
        workers.push(worker);
    }
    log::info!("detector backends: {}", registry.list().join(", "));
    registry.warm_up_all()?;

    let mut failed = 0usize;
    for (camera_id, result) in run_streams(workers) {
        match result {
            Ok(stats) => log::info!(
                "stream {}: {} frame(s), {} detection(s), {} tracked, last frame {:?}",
                camera_id,
                stats.frames,
                stats.detections,
                stats.tracked_detections,
                stats.last_frame_number
            ),
            Err(e) => {
                failed += 1;
                log::error!("stream {} failed: {:#}", camera_id, e);
            }
        }
    }
    if failed > 0 {
        return Err(anyhow!("{} stream(s) failed", failed));
    }
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn register_model_backend(
    registry: &mut BackendRegistry,
    model: Option<&std::path::Path>,
    cfg: &IndexerConfig,
) -> Result<String> {
    use footage_index::detect::backends::TractBackend;

    if registry.get("tract").is_none() {
        let model = model.ok_or_else(|| anyhow!("--model is required for file cameras"))?;
        registry.register(TractBackend::new(model, cfg.decoder.input_size)?);
    }
    Ok("tract".to_string())
}

#[cfg(not(feature = "backend-tract"))]
fn register_model_backend(
    _registry: &mut BackendRegistry,
    _model: Option<&std::path::Path>,
    _cfg: &IndexerConfig,
) -> Result<String> {
    Err(anyhow!(
        "file cameras need a detector model; rebuild with --features backend-tract"
    ))
}

#[cfg(feature = "backend-tract")]
fn load_attribute_classifier(
    path: Option<&std::path::Path>,
) -> Result<Option<Arc<dyn AttributeClassifier>>> {
    use footage_index::attributes::TractAttributeClassifier;

    match path {
        Some(path) => Ok(Some(Arc::new(TractAttributeClassifier::new(path)?))),
        None => Ok(None),
    }
}

#[cfg(not(feature = "backend-tract"))]
fn load_attribute_classifier(
    path: Option<&std::path::Path>,
) -> Result<Option<Arc<dyn AttributeClassifier>>> {
    if path.is_some() {
        return Err(anyhow!(
            "--attribute-model requires a build with --features backend-tract"
        ));
    }
    Ok(None)
}
