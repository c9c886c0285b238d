use crate::detect::class::ObjectClass;
use crate::geometry::BoundingBox;

/// A scored candidate in detector input space.
#[derive(Clone, Debug)]
pub(crate) struct Candidate {
    pub class: ObjectClass,
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Class-aware greedy non-max suppression.
///
/// `candidates` must already be sorted by descending score. Returns the
/// indices of the kept candidates in score order, at most `max_keep`.
pub(crate) fn batched_nms(candidates: &[Candidate], iou_threshold: f32, max_keep: usize) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        if kept.len() >= max_keep {
            break;
        }
        let suppressed = kept.iter().any(|&k| {
            let other = &candidates[k];
            other.class == candidate.class && other.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(index);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(class: ObjectClass, score: f32, x: f32) -> Candidate {
        Candidate {
            class,
            score,
            bbox: BoundingBox::new(x, 0.0, x + 10.0, 10.0),
        }
    }

    #[test]
    fn suppresses_overlap_within_class_only() {
        let candidates = vec![
            cand(ObjectClass::Person, 0.9, 0.0),
            cand(ObjectClass::Person, 0.8, 1.0),
            cand(ObjectClass::Dog, 0.7, 1.0),
            cand(ObjectClass::Person, 0.6, 50.0),
        ];
        assert_eq!(batched_nms(&candidates, 0.5, 300), vec![0, 2, 3]);
    }

    #[test]
    fn caps_survivors() {
        let candidates: Vec<_> = (0..10)
            .map(|i| cand(ObjectClass::Car, 1.0 - i as f32 * 0.01, i as f32 * 100.0))
            .collect();
        assert_eq!(batched_nms(&candidates, 0.5, 3), vec![0, 1, 2]);
    }
}
