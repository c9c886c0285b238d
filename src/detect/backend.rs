use anyhow::Result;

use crate::detect::letterbox::InputTensor;
use crate::detect::result::RawDetections;

/// Object detector collaborator.
///
/// Backends receive a letterboxed square tensor and return the raw
/// per-candidate box + score tensor. They are treated as synchronous and
/// stateless with respect to the frames they have seen; decoding,
/// thresholding and suppression happen in `DetectionDecoder`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Side length of the square input this backend expects.
    fn input_size(&self) -> u32;

    /// Run inference on one preprocessed frame.
    fn infer(&mut self, input: &InputTensor) -> Result<RawDetections>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
