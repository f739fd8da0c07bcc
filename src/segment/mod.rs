//! Segment generation module
//!
//! Cuts elementary streams into fragmented MP4 segments.

pub mod boxes;
pub mod engine;
pub mod fmp4;
#[cfg(test)]
pub(crate) mod isobmff;
pub mod naming;
pub mod writer;

pub use engine::{EngineSettings, EngineState, EngineStats, SegmentationEngine};
pub use fmp4::FragmentedMp4Writer;
pub use naming::SegmentNaming;
pub use writer::{ContainerWriter, SegmentRange, TrackConfig};
