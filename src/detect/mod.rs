//! Detection decoding: detector backends, letterbox geometry, thresholding,
//! class-aware suppression and rescaling to original pixels.

mod backend;
pub mod backends;
mod class;
mod decoder;
mod letterbox;
mod nms;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{walkthrough_script, ScriptedBackend};
pub use class::{ObjectClass, CLASS_LABELS, NUM_CLASSES};
pub use decoder::{
    encode_detections, DecoderConfig, DetectionDecoder, DEFAULT_CONF_THRESHOLD,
    DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_CANDIDATES, DEFAULT_MAX_DETECTIONS,
};
pub use letterbox::{letterbox_tensor, InputTensor, Letterbox};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{DetectionBox, RawDetections};
