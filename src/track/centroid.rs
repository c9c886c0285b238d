use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::geometry::{BoundingBox, Point};

use super::snapshot::{TrackEntry, TrackSnapshot};
use super::{TrackState, DEFAULT_MAX_DISAPPEARED, DEFAULT_MAX_DISTANCE};

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    /// A track is released once it has been missed for more than this many
    /// consecutive updates.
    pub max_disappeared: u32,
    /// Matching gate in pixels; a pair is accepted only when strictly closer.
    pub max_distance: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_disappeared: DEFAULT_MAX_DISAPPEARED,
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_distance > 0.0) || !self.max_distance.is_finite() {
            return Err(anyhow!(
                "tracker max_distance must be a positive number, got {}",
                self.max_distance
            ));
        }
        Ok(())
    }
}

/// A persistent identity within one stream.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    pub track_id: u64,
    pub last_box: BoundingBox,
    pub last_centroid: Point,
    pub frames_since_seen: u32,
    pub state: TrackState,
}

impl TrackedObject {
    fn register(track_id: u64, bbox: BoundingBox) -> Self {
        Self {
            track_id,
            last_box: bbox,
            last_centroid: bbox.centroid(),
            frames_since_seen: 0,
            state: TrackState::New,
        }
    }

    fn observe(&mut self, bbox: BoundingBox) {
        self.last_box = bbox;
        self.last_centroid = bbox.centroid();
        self.frames_since_seen = 0;
        self.state = TrackState::Active;
    }

    fn miss(&mut self, max_disappeared: u32) {
        self.frames_since_seen = self.frames_since_seen.saturating_add(1);
        self.state = if self.frames_since_seen > max_disappeared {
            TrackState::Expired
        } else {
            TrackState::Stale
        };
    }

    fn entry(&self) -> TrackEntry {
        TrackEntry {
            bbox: self.last_box,
            centroid: self.last_centroid,
            state: self.state,
            frames_since_seen: self.frames_since_seen,
        }
    }
}

/// Greedy nearest-centroid tracker.
///
/// Pairs of (existing track, new detection) are considered in increasing
/// centroid distance. A pair is accepted when neither side has been
/// consumed and the distance is under the gate. Every unmatched detection
/// starts a new track and every unmatched track ages by one frame.
#[derive(Debug)]
pub struct CentroidTracker {
    config: TrackerConfig,
    next_id: u64,
    frame_index: u64,
    tracks: BTreeMap<u64, TrackedObject>,
}

impl Default for CentroidTracker {
    fn default() -> Self {
        Self {
            config: TrackerConfig::default(),
            next_id: 1,
            frame_index: 0,
            tracks: BTreeMap::new(),
        }
    }
}

impl CentroidTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Number of updates performed so far.
    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, track_id: u64) -> Option<&TrackedObject> {
        self.tracks.get(&track_id)
    }

    /// Advance by one frame. Must be called exactly once per frame, in frame
    /// order, even when `detections` is empty.
    pub fn update(&mut self, detections: &[BoundingBox]) -> TrackSnapshot {
        self.frame_index += 1;

        let track_ids: Vec<u64> = self.tracks.keys().copied().collect();
        let mut track_used = vec![false; track_ids.len()];
        let mut detection_used = vec![false; detections.len()];

        for (track_idx, detection_idx) in self.greedy_pairs(&track_ids, detections) {
            track_used[track_idx] = true;
            detection_used[detection_idx] = true;
            if let Some(track) = self.tracks.get_mut(&track_ids[track_idx]) {
                track.observe(detections[detection_idx]);
            }
        }

        let mut expired = Vec::new();
        for (track_idx, track_id) in track_ids.iter().enumerate() {
            if track_used[track_idx] {
                continue;
            }
            if let Some(track) = self.tracks.get_mut(track_id) {
                track.miss(self.config.max_disappeared);
                if track.state == TrackState::Expired {
                    expired.push(*track_id);
                }
            }
        }
        for track_id in &expired {
            self.tracks.remove(track_id);
            log::debug!("track {} expired at frame {}", track_id, self.frame_index);
        }

        for (detection_idx, bbox) in detections.iter().enumerate() {
            if !detection_used[detection_idx] {
                let track_id = self.next_id;
                self.next_id += 1;
                self.tracks
                    .insert(track_id, TrackedObject::register(track_id, *bbox));
            }
        }

        let entries = self
            .tracks
            .iter()
            .map(|(id, track)| (*id, track.entry()))
            .collect();
        TrackSnapshot::new(self.frame_index, entries, expired)
    }

    /// Accepted `(track index, detection index)` pairs in acceptance order.
    fn greedy_pairs(&self, track_ids: &[u64], detections: &[BoundingBox]) -> Vec<(usize, usize)> {
        if track_ids.is_empty() || detections.is_empty() {
            return Vec::new();
        }
        let centroids: Vec<Point> = detections.iter().map(BoundingBox::centroid).collect();

        let mut pairs = Vec::with_capacity(track_ids.len() * centroids.len());
        for (track_idx, track_id) in track_ids.iter().enumerate() {
            let Some(track) = self.tracks.get(track_id) else {
                continue;
            };
            for (detection_idx, centroid) in centroids.iter().enumerate() {
                pairs.push((
                    track.last_centroid.distance(centroid),
                    track_idx,
                    detection_idx,
                ));
            }
        }
        // Stable on equal distances so ties resolve by track then detection order.
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut track_used = vec![false; track_ids.len()];
        let mut detection_used = vec![false; detections.len()];
        let mut accepted = Vec::new();
        for (distance, track_idx, detection_idx) in pairs {
            if distance >= self.config.max_distance {
                break;
            }
            if track_used[track_idx] || detection_used[detection_idx] {
                continue;
            }
            track_used[track_idx] = true;
            detection_used[detection_idx] = true;
            accepted.push((track_idx, detection_idx));
        }
        accepted
    }
}
