use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clip::{ClipPipelineConfig, ClipSource, DEFAULT_CLIP_PARALLELISM, DEFAULT_TOLERANCE_FRAMES};
use crate::detect::{
    DecoderConfig, ObjectClass, DEFAULT_CONF_THRESHOLD, DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD,
    DEFAULT_MAX_CANDIDATES, DEFAULT_MAX_DETECTIONS,
};
use crate::storage::RetryPolicy;
use crate::track::{TrackerConfig, DEFAULT_MAX_DISAPPEARED, DEFAULT_MAX_DISTANCE};
use crate::builder::DEFAULT_REMATCH_DISTANCE;

const DEFAULT_DB_PATH: &str = "footage.db";
const DEFAULT_CLIP_DIR: &str = "clips";
const DEFAULT_TRACKED_CLASS: &str = "person";
const DEFAULT_CAMERA_FPS: f64 = 30.0;
const DEFAULT_APPEND_ATTEMPTS: u32 = 5;
const DEFAULT_APPEND_BACKOFF_MS: u64 = 50;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct IndexerConfigFile {
    db_path: Option<String>,
    decoder: Option<DecoderConfigFile>,
    tracker: Option<TrackerConfigFile>,
    clips: Option<ClipsConfigFile>,
    append: Option<AppendConfigFile>,
    attributes: Option<AttributesConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DecoderConfigFile {
    input_size: Option<u32>,
    conf_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_candidates: Option<usize>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackerConfigFile {
    tracked_class: Option<String>,
    max_disappeared: Option<u32>,
    max_distance: Option<f32>,
    rematch_distance: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClipsConfigFile {
    tolerance_frames: Option<u64>,
    output_dir: Option<PathBuf>,
    pad_s: Option<f64>,
    parallelism: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppendConfigFile {
    max_attempts: Option<u32>,
    backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AttributesConfigFile {
    color_untracked: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    camera_id: String,
    source_path: PathBuf,
    fps: Option<f64>,
    location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub db_path: String,
    pub decoder: DecoderConfig,
    pub tracker: TrackerSettings,
    pub clips: ClipSettings,
    pub append: RetryPolicy,
    pub color_untracked: bool,
    pub cameras: Vec<CameraSettings>,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub tracked_class: ObjectClass,
    pub tracker: TrackerConfig,
    pub rematch_distance: f32,
}

#[derive(Debug, Clone)]
pub struct ClipSettings {
    pub tolerance_frames: u64,
    pub output_dir: PathBuf,
    pub pad_s: f64,
    pub parallelism: usize,
}

impl ClipSettings {
    pub fn pipeline_config(&self) -> ClipPipelineConfig {
        ClipPipelineConfig {
            output_dir: self.output_dir.clone(),
            pad_s: self.pad_s,
            parallelism: self.parallelism,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub camera_id: String,
    pub source_path: PathBuf,
    pub fps: f64,
    pub location: Option<String>,
}

impl From<&CameraSettings> for ClipSource {
    fn from(camera: &CameraSettings) -> Self {
        ClipSource {
            camera_id: camera.camera_id.clone(),
            path: camera.source_path.clone(),
            fps: camera.fps,
            location: camera.location.clone(),
        }
    }
}

impl IndexerConfig {
    /// Built-in defaults with no file and no environment applied.
    pub fn defaults() -> Result<Self> {
        Self::from_file(IndexerConfigFile::default())
    }

    /// File named by `FOOTAGE_CONFIG` (if any), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FOOTAGE_CONFIG").ok();
        let config_path = config_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(Path::new);
        Self::load_from(config_path)
    }

    /// `path` (TOML or JSON by extension), then environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = path.map(read_config_file).transpose()?;
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: IndexerConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let decoder_file = file.decoder.unwrap_or_default();
        let decoder = DecoderConfig {
            input_size: decoder_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            conf_threshold: decoder_file.conf_threshold.unwrap_or(DEFAULT_CONF_THRESHOLD),
            iou_threshold: decoder_file.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            max_candidates: decoder_file.max_candidates.unwrap_or(DEFAULT_MAX_CANDIDATES),
            max_detections: decoder_file.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
        };

        let tracker_file = file.tracker.unwrap_or_default();
        let tracked_class = ObjectClass::from_label(
            tracker_file
                .tracked_class
                .as_deref()
                .unwrap_or(DEFAULT_TRACKED_CLASS),
        )?;
        let tracker = TrackerSettings {
            tracked_class,
            tracker: TrackerConfig {
                max_disappeared: tracker_file.max_disappeared.unwrap_or(DEFAULT_MAX_DISAPPEARED),
                max_distance: tracker_file.max_distance.unwrap_or(DEFAULT_MAX_DISTANCE),
            },
            rematch_distance: tracker_file
                .rematch_distance
                .unwrap_or(DEFAULT_REMATCH_DISTANCE),
        };

        let clips_file = file.clips.unwrap_or_default();
        let clips = ClipSettings {
            tolerance_frames: clips_file.tolerance_frames.unwrap_or(DEFAULT_TOLERANCE_FRAMES),
            output_dir: clips_file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIP_DIR)),
            pad_s: clips_file.pad_s.unwrap_or(0.0),
            parallelism: clips_file.parallelism.unwrap_or(DEFAULT_CLIP_PARALLELISM),
        };

        let append_file = file.append.unwrap_or_default();
        let append = RetryPolicy {
            max_attempts: append_file.max_attempts.unwrap_or(DEFAULT_APPEND_ATTEMPTS),
            backoff: Duration::from_millis(
                append_file.backoff_ms.unwrap_or(DEFAULT_APPEND_BACKOFF_MS),
            ),
        };

        let color_untracked = file
            .attributes
            .and_then(|attributes| attributes.color_untracked)
            .unwrap_or(false);

        let cameras = file
            .cameras
            .unwrap_or_default()
            .into_iter()
            .map(|camera| CameraSettings {
                camera_id: camera.camera_id,
                source_path: camera.source_path,
                fps: camera.fps.unwrap_or(DEFAULT_CAMERA_FPS),
                location: camera.location,
            })
            .collect();

        Ok(Self {
            db_path,
            decoder,
            tracker,
            clips,
            append,
            color_untracked,
            cameras,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("FOOTAGE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(value) = std::env::var("FOOTAGE_CONF_THRESHOLD") {
            self.decoder.conf_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("FOOTAGE_CONF_THRESHOLD must be a number"))?;
        }
        if let Ok(value) = std::env::var("FOOTAGE_IOU_THRESHOLD") {
            self.decoder.iou_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("FOOTAGE_IOU_THRESHOLD must be a number"))?;
        }
        if let Ok(dir) = std::env::var("FOOTAGE_CLIP_DIR") {
            if !dir.trim().is_empty() {
                self.clips.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(value) = std::env::var("FOOTAGE_CLIP_TOLERANCE") {
            self.clips.tolerance_frames = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("FOOTAGE_CLIP_TOLERANCE must be a whole number of frames"))?;
        }
        if let Ok(value) = std::env::var("FOOTAGE_COLOR_UNTRACKED") {
            self.color_untracked = parse_bool(&value)
                .ok_or_else(|| anyhow!("FOOTAGE_COLOR_UNTRACKED must be true or false"))?;
        }
        if let Ok(cameras) = std::env::var("FOOTAGE_CAMERAS") {
            for entry in split_csv(&cameras) {
                let (camera_id, path) = entry.split_once('=').ok_or_else(|| {
                    anyhow!("FOOTAGE_CAMERAS entries must be camera_id=path, got '{}'", entry)
                })?;
                let camera_id = camera_id.trim().to_string();
                let source_path = PathBuf::from(path.trim());
                match self.cameras.iter_mut().find(|c| c.camera_id == camera_id) {
                    Some(existing) => existing.source_path = source_path,
                    None => self.cameras.push(CameraSettings {
                        camera_id,
                        source_path,
                        fps: DEFAULT_CAMERA_FPS,
                        location: None,
                    }),
                }
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.decoder.validate()?;
        self.tracker.tracker.validate()?;
        if !(self.tracker.rematch_distance > 0.0) {
            return Err(anyhow!("tracker rematch_distance must be greater than zero"));
        }
        if !(self.clips.pad_s >= 0.0) || !self.clips.pad_s.is_finite() {
            return Err(anyhow!("clips pad_s must be a non-negative number"));
        }
        if self.clips.parallelism == 0 {
            return Err(anyhow!("clips parallelism must be greater than zero"));
        }
        if self.append.max_attempts == 0 {
            return Err(anyhow!("append max_attempts must be greater than zero"));
        }

        let mut seen = std::collections::HashSet::new();
        for camera in &mut self.cameras {
            crate::validate_camera_id(&camera.camera_id)?;
            camera.camera_id = camera.camera_id.trim().to_lowercase();
            if !seen.insert(camera.camera_id.clone()) {
                return Err(anyhow!("camera '{}' is configured twice", camera.camera_id));
            }
            if !(camera.fps > 0.0) || !camera.fps.is_finite() {
                return Err(anyhow!(
                    "camera '{}' fps must be greater than zero",
                    camera.camera_id
                ));
            }
        }
        Ok(())
    }

    pub fn camera(&self, camera_id: &str) -> Option<&CameraSettings> {
        self.cameras.iter().find(|c| c.camera_id == camera_id)
    }
}

fn read_config_file(path: &Path) -> Result<IndexerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
