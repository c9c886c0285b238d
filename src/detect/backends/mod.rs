pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::{walkthrough_script, ScriptedBackend};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
