use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use uuid::Uuid;

use super::aggregate::ClipInterval;
use super::extract::{ClipExtractor, ExtractionFailure, ExtractionFailureKind};
use super::source::SourceRegistry;

pub const DEFAULT_CLIP_PARALLELISM: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct ClipPipelineConfig {
    pub output_dir: PathBuf,
    /// Seconds added before and after each interval.
    pub pad_s: f64,
    /// Upper bound on concurrent extractions.
    pub parallelism: usize,
}

impl ClipPipelineConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pad_s: 0.0,
            parallelism: DEFAULT_CLIP_PARALLELISM,
        }
    }
}

/// Result of one interval.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClipOutcome {
    Extracted {
        interval: ClipInterval,
        path: PathBuf,
    },
    Failed {
        interval: ClipInterval,
        failure: ExtractionFailure,
    },
}

impl ClipOutcome {
    pub fn interval(&self) -> &ClipInterval {
        match self {
            ClipOutcome::Extracted { interval, .. } | ClipOutcome::Failed { interval, .. } => {
                interval
            }
        }
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self, ClipOutcome::Extracted { .. })
    }
}

/// Per-interval outcomes, in input order. Partial success is a normal result.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClipReport {
    pub outcomes: Vec<ClipOutcome>,
}

impl ClipReport {
    pub fn extracted(&self) -> impl Iterator<Item = (&ClipInterval, &Path)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            ClipOutcome::Extracted { interval, path } => Some((interval, path.as_path())),
            ClipOutcome::Failed { .. } => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&ClipInterval, &ExtractionFailure)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            ClipOutcome::Failed { interval, failure } => Some((interval, failure)),
            ClipOutcome::Extracted { .. } => None,
        })
    }

    pub fn extracted_count(&self) -> usize {
        self.extracted().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn all_extracted(&self) -> bool {
        self.outcomes.iter().all(ClipOutcome::is_extracted)
    }
}

/// Materializes clip intervals as files in the output directory.
pub struct ClipPipeline {
    extractor: Arc<dyn ClipExtractor>,
    sources: Arc<dyn SourceRegistry>,
    config: ClipPipelineConfig,
}

impl ClipPipeline {
    pub fn new(
        extractor: Arc<dyn ClipExtractor>,
        sources: Arc<dyn SourceRegistry>,
        config: ClipPipelineConfig,
    ) -> Result<Self> {
        if !(config.pad_s >= 0.0) || !config.pad_s.is_finite() {
            return Err(anyhow!("clip pad must be a non-negative number, got {}", config.pad_s));
        }
        Ok(Self {
            extractor,
            sources,
            config,
        })
    }

    pub fn config(&self) -> &ClipPipelineConfig {
        &self.config
    }

    /// Extract every interval. Only failure to prepare the output directory
    /// aborts the batch; per-interval failures land in the report.
    pub fn run(&self, intervals: &[ClipInterval]) -> Result<ClipReport> {
        self.run_with_progress(intervals, &|_| {})
    }

    /// `run`, calling `on_outcome` from the worker threads as each interval
    /// finishes.
    pub fn run_with_progress(
        &self,
        intervals: &[ClipInterval],
        on_outcome: &(dyn Fn(&ClipOutcome) + Sync),
    ) -> Result<ClipReport> {
        if intervals.is_empty() {
            return Ok(ClipReport::default());
        }
        fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!(
                "failed to create clip directory {}",
                self.config.output_dir.display()
            )
        })?;

        let workers = self.config.parallelism.max(1).min(intervals.len());
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<(usize, ClipOutcome)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(interval) = intervals.get(index) else {
                        break;
                    };
                    let outcome = self.extract_one(interval);
                    on_outcome(&outcome);
                    if tx.send((index, outcome)).is_err() {
                        break;
                    }
                });
            }
        });
        drop(tx);

        let mut slots: Vec<Option<ClipOutcome>> = vec![None; intervals.len()];
        for (index, outcome) in rx {
            slots[index] = Some(outcome);
        }
        let outcomes = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| anyhow!("clip worker dropped interval {}", index))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ClipReport { outcomes })
    }

    fn extract_one(&self, interval: &ClipInterval) -> ClipOutcome {
        match self.try_extract(interval) {
            Ok(path) => {
                log::info!(
                    "clip {} frames {}..{} -> {}",
                    interval.video_id,
                    interval.start_frame,
                    interval.end_frame,
                    path.display()
                );
                ClipOutcome::Extracted {
                    interval: interval.clone(),
                    path,
                }
            }
            Err(failure) => {
                log::warn!(
                    "clip {} frames {}..{} failed: {}",
                    interval.video_id,
                    interval.start_frame,
                    interval.end_frame,
                    failure
                );
                ClipOutcome::Failed {
                    interval: interval.clone(),
                    failure,
                }
            }
        }
    }

    fn try_extract(&self, interval: &ClipInterval) -> Result<PathBuf, ExtractionFailure> {
        check_file_component(&interval.video_id)?;
        let source = self
            .sources
            .resolve(&interval.video_id, &interval.camera_id)
            .ok_or_else(|| {
                ExtractionFailure::new(
                    ExtractionFailureKind::SourceMissing,
                    format!("no archived source for camera {}", interval.camera_id),
                )
            })?;

        let start_s = (interval.start_time - self.config.pad_s).max(0.0);
        let end_s = interval.end_time + self.config.pad_s;

        let file_name = interval.file_name();
        let final_path = self.config.output_dir.join(&file_name);
        let tmp_path = self
            .config
            .output_dir
            .join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let published = self
            .extractor
            .extract(&source.path, start_s, end_s, &tmp_path)
            .and_then(|()| publish(&tmp_path, &final_path));
        if published.is_err() {
            discard(&tmp_path);
        }
        published.map(|()| final_path)
    }
}

fn publish(tmp_path: &Path, final_path: &Path) -> Result<(), ExtractionFailure> {
    File::open(tmp_path)
        .and_then(|file| file.sync_all())
        .map_err(|e| {
            ExtractionFailure::backend(format!(
                "extractor output {} unusable: {}",
                tmp_path.display(),
                e
            ))
        })?;
    fs::rename(tmp_path, final_path).map_err(|e| {
        ExtractionFailure::backend(format!(
            "failed to publish {}: {}",
            final_path.display(),
            e
        ))
    })
}

fn discard(tmp_path: &Path) {
    match fs::remove_file(tmp_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove partial clip {}: {}", tmp_path.display(), e),
    }
}

fn check_file_component(video_id: &str) -> Result<(), ExtractionFailure> {
    let valid = !video_id.is_empty()
        && !video_id.starts_with('.')
        && video_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ExtractionFailure::new(
            ExtractionFailureKind::Backend,
            format!("video id {:?} is not usable as a file name", video_id),
        ))
    }
}
