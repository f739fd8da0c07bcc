//! MPEG-DASH packager
//!
//! Classifies elementary streams into a manifest, cuts each one into
//! keyframe aligned fragmented MP4 segments and writes a static MPD.

pub mod config;
pub mod error;
pub mod index;
pub mod manifest;
pub mod media;
pub mod pipeline;
pub mod segment;
pub mod source;

#[cfg(test)]
pub(crate) mod tests;

pub use config::PackagerConfig;
pub use error::{ClassificationError, CodecRuleError, PackagerError, Result};
#[cfg(feature = "ffmpeg")]
pub use error::FfmpegError;
pub use pipeline::{PackageOutcome, PackageReport, Packager, RepresentationReport};
pub use source::{InputSpec, PacketSource, StreamInput};
