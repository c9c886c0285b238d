use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::record::FrameKey;

pub const DEFAULT_TOLERANCE_FRAMES: u64 = 5;

/// A contiguous run of matching frames in one stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipInterval {
    pub video_id: String,
    pub camera_id: String,
    pub start_frame: u64,
    pub start_time: f64,
    pub end_frame: u64,
    pub end_time: f64,
}

impl ClipInterval {
    fn open(key: &FrameKey) -> Self {
        Self {
            video_id: key.video_id.clone(),
            camera_id: key.camera_id.clone(),
            start_frame: key.frame_number,
            start_time: key.frame_timestamp,
            end_frame: key.frame_number,
            end_time: key.frame_timestamp,
        }
    }

    pub fn frame_span(&self) -> u64 {
        self.end_frame - self.start_frame + 1
    }

    pub fn duration_s(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// `{video_id}_{start_frame}_{end_frame}.mp4`
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.mp4", self.video_id, self.start_frame, self.end_frame)
    }
}

/// Groups matching frame keys into clip intervals.
#[derive(Clone, Debug)]
pub struct ClipAggregator {
    tolerance: u64,
}

impl Default for ClipAggregator {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE_FRAMES,
        }
    }
}

impl ClipAggregator {
    /// Consecutive matches at most `tolerance` frames apart share an interval.
    pub fn new(tolerance: u64) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> u64 {
        self.tolerance
    }

    /// Groups keys per `(video_id, camera_id)`, then makes one pass over
    /// each group in ascending frame order.
    ///
    /// Intervals come out grouped in the order each stream first appears,
    /// ascending within a group. Input that is not already sorted is sorted
    /// per group, never trimmed. Empty input gives no intervals.
    pub fn aggregate(&self, keys: &[FrameKey]) -> Vec<ClipInterval> {
        let mut groups: Vec<Vec<&FrameKey>> = Vec::new();
        let mut index: HashMap<(&str, &str), usize> = HashMap::new();
        for key in keys {
            let slot = *index
                .entry((key.video_id.as_str(), key.camera_id.as_str()))
                .or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
            groups[slot].push(key);
        }

        let mut out = Vec::new();
        for mut group in groups {
            if !group.windows(2).all(|w| w[0].frame_number <= w[1].frame_number) {
                log::debug!(
                    "sorting {} out-of-order frame key(s) for {}",
                    group.len(),
                    group[0].video_id
                );
                group.sort_by_key(|key| key.frame_number);
            }
            let mut current: Option<ClipInterval> = None;
            for key in group {
                if let Some(open) = current.as_mut() {
                    if key.frame_number - open.end_frame <= self.tolerance {
                        open.end_frame = key.frame_number;
                        open.end_time = key.frame_timestamp;
                        continue;
                    }
                }
                out.extend(current.replace(ClipInterval::open(key)));
            }
            out.extend(current);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(video: &str, frames: &[u64]) -> Vec<FrameKey> {
        frames
            .iter()
            .map(|f| FrameKey::new(video, video, *f, *f as f64 / 30.0))
            .collect()
    }

    fn spans(intervals: &[ClipInterval]) -> Vec<(u64, u64)> {
        intervals.iter().map(|i| (i.start_frame, i.end_frame)).collect()
    }

    #[test]
    fn splits_on_gaps_beyond_tolerance() {
        let out = ClipAggregator::new(5).aggregate(&keys("cam", &[10, 12, 14, 30, 31]));
        assert_eq!(spans(&out), vec![(10, 14), (30, 31)]);
        assert!((out[0].start_time - 10.0 / 30.0).abs() < 1e-12);
        assert!((out[1].end_time - 31.0 / 30.0).abs() < 1e-12);
        assert_eq!(out[0].file_name(), "cam_10_14.mp4");
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(ClipAggregator::default().aggregate(&[]).is_empty());
    }

    #[test]
    fn all_within_tolerance_is_one_interval() {
        let out = ClipAggregator::default().aggregate(&keys("cam", &[3, 8, 13, 18, 19]));
        assert_eq!(spans(&out), vec![(3, 19)]);
        assert_eq!(out[0].frame_span(), 17);
    }

    #[test]
    fn gap_equal_to_tolerance_extends() {
        let out = ClipAggregator::new(5).aggregate(&keys("cam", &[0, 5, 11]));
        assert_eq!(spans(&out), vec![(0, 5), (11, 11)]);
    }

    #[test]
    fn groups_are_kept_apart() {
        let mut input = keys("a", &[1, 2, 3]);
        input.extend(keys("b", &[2, 4]));
        input.extend(keys("c", &[100]));
        let out = ClipAggregator::new(5).aggregate(&input);
        let ids: Vec<&str> = out.iter().map(|i| i.video_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(spans(&out), vec![(1, 3), (2, 4), (100, 100)]);
    }

    #[test]
    fn zero_tolerance_only_joins_repeats() {
        let out = ClipAggregator::new(0).aggregate(&keys("cam", &[4, 4, 5]));
        assert_eq!(spans(&out), vec![(4, 4), (5, 5)]);
    }

    #[test]
    fn unsorted_keys_are_sorted_not_dropped() {
        let mut input = keys("cam", &[30, 12, 10]);
        input.extend(keys("dock", &[7]));
        input.extend(keys("cam", &[31, 14]));
        let out = ClipAggregator::new(5).aggregate(&input);
        let ids: Vec<&str> = out.iter().map(|i| i.video_id.as_str()).collect();
        assert_eq!(ids, vec!["cam", "cam", "dock"]);
        assert_eq!(spans(&out), vec![(10, 14), (30, 31), (7, 7)]);
        assert!((out[0].end_time - 14.0 / 30.0).abs() < 1e-12);
    }
}
