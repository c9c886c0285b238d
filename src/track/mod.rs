//! Centroid multi-object tracking.
//!
//! One `CentroidTracker` belongs to one camera stream for that stream's whole
//! lifetime. It is fed the boxes of a single tracked class once per frame, in
//! frame order, and answers with a `TrackSnapshot` of every live track.

mod centroid;
mod snapshot;

pub use centroid::{CentroidTracker, TrackedObject, TrackerConfig};
pub use snapshot::{TrackEntry, TrackSnapshot};

pub const DEFAULT_MAX_DISAPPEARED: u32 = 20;
pub const DEFAULT_MAX_DISTANCE: f32 = 50.0;

/// Lifecycle of one track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackState {
    /// Registered during the current update.
    New,
    /// Matched during the current update.
    Active,
    /// Missed one or more consecutive updates but still within the
    /// disappearance threshold.
    Stale,
    /// Released. Expired ids are reported once and never reused.
    Expired,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackState::New => "new",
            TrackState::Active => "active",
            TrackState::Stale => "stale",
            TrackState::Expired => "expired",
        }
    }

    /// True when the track was observed in the current frame.
    pub fn seen_this_frame(&self) -> bool {
        matches!(self, TrackState::New | TrackState::Active)
    }
}
