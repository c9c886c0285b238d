use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Archived recording of one camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipSource {
    pub camera_id: String,
    pub path: PathBuf,
    pub fps: f64,
    #[serde(default)]
    pub location: Option<String>,
}

/// Resolves a clip interval's stream to its archived source video.
pub trait SourceRegistry: Send + Sync {
    fn resolve(&self, video_id: &str, camera_id: &str) -> Option<ClipSource>;
}

/// Camera table built from configuration.
#[derive(Clone, Debug, Default)]
pub struct CameraRegistry {
    cameras: BTreeMap<String, ClipSource>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `source.camera_id`.
    pub fn insert(&mut self, source: ClipSource) -> Option<ClipSource> {
        self.cameras.insert(source.camera_id.clone(), source)
    }

    pub fn get(&self, camera_id: &str) -> Option<&ClipSource> {
        self.cameras.get(camera_id)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClipSource> {
        self.cameras.values()
    }
}

impl FromIterator<ClipSource> for CameraRegistry {
    fn from_iter<I: IntoIterator<Item = ClipSource>>(iter: I) -> Self {
        let mut registry = Self::new();
        for source in iter {
            registry.insert(source);
        }
        registry
    }
}

impl SourceRegistry for CameraRegistry {
    fn resolve(&self, video_id: &str, camera_id: &str) -> Option<ClipSource> {
        // Streams are keyed by camera; video ids equal camera ids.
        self.cameras
            .get(camera_id)
            .or_else(|| self.cameras.get(video_id))
            .cloned()
    }
}
