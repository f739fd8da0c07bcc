//! Manifest model and MPD serialization

pub mod duration;
pub mod model;
pub mod mpd;

pub use duration::format_iso8601;
pub use model::{
    AdaptationSet, Addressing, InitializationRange, Manifest, ManifestSink, Period,
    Representation, Segment,
};
pub use mpd::render;
