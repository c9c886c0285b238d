use std::fmt;
use std::fs::File;
use std::path::Path;

use serde::Serialize;

/// Why a single interval could not be extracted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailureKind {
    SourceMissing,
    SourceUnreadable,
    InvalidRange,
    Backend,
}

impl ExtractionFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionFailureKind::SourceMissing => "source_missing",
            ExtractionFailureKind::SourceUnreadable => "source_unreadable",
            ExtractionFailureKind::InvalidRange => "invalid_range",
            ExtractionFailureKind::Backend => "backend",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractionFailure {
    pub kind: ExtractionFailureKind,
    pub message: String,
}

impl ExtractionFailure {
    pub fn new(kind: ExtractionFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn backend(err: impl fmt::Display) -> Self {
        Self::new(ExtractionFailureKind::Backend, format!("{:#}", err))
    }
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ExtractionFailure {}

/// Cuts `[start_s, end_s]` of a source video into a file at `out_path`.
///
/// Callers own publication: `out_path` is a private temporary path that is
/// renamed into place only when this returns `Ok`.
pub trait ClipExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(
        &self,
        source: &Path,
        start_s: f64,
        end_s: f64,
        out_path: &Path,
    ) -> Result<(), ExtractionFailure>;
}

/// Checks shared by every extractor: the range is sane and the source is a
/// readable file.
pub fn check_request(source: &Path, start_s: f64, end_s: f64) -> Result<(), ExtractionFailure> {
    if !start_s.is_finite() || !end_s.is_finite() || start_s < 0.0 || end_s < start_s {
        return Err(ExtractionFailure::new(
            ExtractionFailureKind::InvalidRange,
            format!("invalid time range {:.3}s..{:.3}s", start_s, end_s),
        ));
    }
    if !source.exists() {
        return Err(ExtractionFailure::new(
            ExtractionFailureKind::SourceMissing,
            format!("source {} does not exist", source.display()),
        ));
    }
    if !source.is_file() {
        return Err(ExtractionFailure::new(
            ExtractionFailureKind::SourceUnreadable,
            format!("source {} is not a regular file", source.display()),
        ));
    }
    File::open(source).map_err(|e| {
        ExtractionFailure::new(
            ExtractionFailureKind::SourceUnreadable,
            format!("cannot open source {}: {}", source.display(), e),
        )
    })?;
    Ok(())
}

#[derive(Serialize)]
struct ClipManifest<'a> {
    source: &'a Path,
    source_bytes: u64,
    start_s: f64,
    end_s: f64,
    duration_s: f64,
}

/// Writes a JSON manifest describing the cut instead of video data.
///
/// Used where no media backend is compiled in, and by tests.
#[derive(Clone, Debug, Default)]
pub struct ManifestExtractor {
    /// Known source length in seconds; ranges ending past it are rejected.
    pub source_duration_s: Option<f64>,
}

impl ClipExtractor for ManifestExtractor {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn extract(
        &self,
        source: &Path,
        start_s: f64,
        end_s: f64,
        out_path: &Path,
    ) -> Result<(), ExtractionFailure> {
        check_request(source, start_s, end_s)?;
        if let Some(duration) = self.source_duration_s {
            if start_s > duration {
                return Err(ExtractionFailure::new(
                    ExtractionFailureKind::InvalidRange,
                    format!("start {:.3}s is past source end {:.3}s", start_s, duration),
                ));
            }
        }
        let end_s = match self.source_duration_s {
            Some(duration) => end_s.min(duration),
            None => end_s,
        };
        let source_bytes = std::fs::metadata(source)
            .map(|m| m.len())
            .map_err(|e| ExtractionFailure::new(ExtractionFailureKind::SourceUnreadable, e.to_string()))?;
        let manifest = ClipManifest {
            source,
            source_bytes,
            start_s,
            end_s,
            duration_s: end_s - start_s,
        };
        let bytes = serde_json::to_vec_pretty(&manifest).map_err(ExtractionFailure::backend)?;
        std::fs::write(out_path, bytes).map_err(ExtractionFailure::backend)?;
        Ok(())
    }
}
