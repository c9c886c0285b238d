use std::collections::BTreeMap;

use crate::geometry::{BoundingBox, Point};

use super::TrackState;

/// One live track as of a given frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackEntry {
    pub bbox: BoundingBox,
    pub centroid: Point,
    pub state: TrackState,
    pub frames_since_seen: u32,
}

/// The tracker's answer for one frame: `track_id -> (box, centroid)` for all
/// non-expired tracks, plus the ids released during this update.
#[derive(Clone, Debug, Default)]
pub struct TrackSnapshot {
    frame_index: u64,
    tracks: BTreeMap<u64, TrackEntry>,
    expired: Vec<u64>,
}

impl TrackSnapshot {
    pub(crate) fn new(
        frame_index: u64,
        tracks: BTreeMap<u64, TrackEntry>,
        expired: Vec<u64>,
    ) -> Self {
        Self {
            frame_index,
            tracks,
            expired,
        }
    }

    /// 1-based count of updates the tracker had performed when this snapshot
    /// was taken.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackEntry> {
        self.tracks.get(&track_id)
    }

    pub fn contains(&self, track_id: u64) -> bool {
        self.tracks.contains_key(&track_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &TrackEntry)> {
        self.tracks.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn expired(&self) -> &[u64] {
        &self.expired
    }

    /// Tracks observed in this frame.
    pub fn seen(&self) -> impl Iterator<Item = (u64, &TrackEntry)> {
        self.iter().filter(|(_, entry)| entry.state.seen_this_frame())
    }

    /// Id of the track observed this frame whose centroid is nearest to
    /// `bbox`'s centroid, if strictly closer than `gate`. Ties go to the
    /// lower id.
    ///
    /// Stale tracks are skipped: their last box predates this frame.
    pub fn nearest(&self, bbox: &BoundingBox, gate: f32) -> Option<u64> {
        let center = bbox.centroid();
        let mut best: Option<(u64, f32)> = None;
        for (id, entry) in self.seen() {
            let distance = entry.centroid.distance(&center);
            if distance >= gate {
                continue;
            }
            match best {
                Some((_, current)) if current <= distance => {}
                _ => best = Some((id, distance)),
            }
        }
        best.map(|(id, _)| id)
    }
}
