//! Manifest entity graph
//!
//! The manifest owns the whole Period -> AdaptationSet -> Representation ->
//! Segment tree. Engines never hold manifest state; they address their
//! representation by [`RepresentationKey`] through the [`ManifestSink`] trait.
//! Each representation guards its own timeline so engines of different
//! representations never contend.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{DurationPolicy, PackagerConfig};
use crate::error::{PackagerError, Result};
use crate::media::{InputStream, MediaKind, Rational, RepresentationKey};
use crate::segment::naming::SegmentNaming;

/// Live profile, used with SegmentTemplate addressing
pub const PROFILE_LIVE: &str = "urn:mpeg:dash:profile:isoff-live:2011";

/// Full profile, used with SegmentList addressing
pub const PROFILE_FULL: &str = "urn:mpeg:dash:profile:full:2011";

/// One cut unit of a representation
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Path relative to the manifest
    pub file: String,
    pub offset: u64,
    pub size: u64,
    pub index_size: Option<u64>,
    /// Seconds
    pub duration: f64,
    /// 1-based sequence number
    pub number: u32,
}

/// Byte range of the initialization segment, always starting at 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationRange {
    pub file: String,
    pub size: u64,
}

#[derive(Debug, Default)]
struct Timeline {
    segments: Vec<Segment>,
    total_duration: f64,
    total_bytes: u64,
    init: Option<InitializationRange>,
}

/// One encoded rendition
#[derive(Debug)]
pub struct Representation {
    pub id: u32,
    pub kind: MediaKind,
    /// Label of the input stream feeding this representation
    pub source: String,
    pub codecs: String,
    /// Declared bitrate in bits/s, 0 if unknown
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub sample_rate: u32,
    pub channels: u16,
    timeline: Mutex<Timeline>,
}

impl Representation {
    pub fn from_stream(id: u32, stream: &InputStream, codecs: String) -> Self {
        let params = &stream.params;
        Self {
            id,
            kind: stream.kind,
            source: stream.label(),
            codecs,
            bandwidth: params.bit_rate,
            width: params.width,
            height: params.height,
            frame_rate: params.frame_rate,
            sample_rate: params.sample_rate,
            channels: params.channels,
            timeline: Mutex::new(Timeline::default()),
        }
    }

    /// Snapshot of the segments in sequence order
    pub fn segments(&self) -> Vec<Segment> {
        self.timeline.lock().segments.clone()
    }

    pub fn segment_count(&self) -> usize {
        self.timeline.lock().segments.len()
    }

    /// Sum of all segment durations in seconds
    pub fn total_duration(&self) -> f64 {
        self.timeline.lock().total_duration
    }

    pub fn total_bytes(&self) -> u64 {
        self.timeline.lock().total_bytes
    }

    pub fn initialization(&self) -> Option<InitializationRange> {
        self.timeline.lock().init.clone()
    }

    /// Longest segment seen so far, in seconds
    pub fn max_segment_duration(&self) -> f64 {
        self.timeline
            .lock()
            .segments
            .iter()
            .map(|s| s.duration)
            .fold(0.0, f64::max)
    }

    /// Declared bitrate, or the measured average when none was declared
    pub fn effective_bandwidth(&self) -> u64 {
        if self.bandwidth > 0 {
            return self.bandwidth;
        }
        let timeline = self.timeline.lock();
        if timeline.total_duration <= 0.0 {
            return 0;
        }
        (timeline.total_bytes as f64 * 8.0 / timeline.total_duration).round() as u64
    }

    fn append(&self, key: RepresentationKey, segment: Segment) -> Result<()> {
        let mut timeline = self.timeline.lock();
        let expected = timeline.segments.len() as u32 + 1;
        if segment.number != expected {
            return Err(PackagerError::SegmentOrder {
                adaptation_set_id: key.adaptation_set_id,
                representation_id: key.representation_id,
                expected,
                got: segment.number,
            });
        }
        debug!(
            "[{}] segment {} {} offset={} size={} duration={:.3}s",
            key, segment.number, segment.file, segment.offset, segment.size, segment.duration
        );
        timeline.total_duration += segment.duration;
        timeline.total_bytes += segment.size;
        timeline.segments.push(segment);
        Ok(())
    }
}

/// Alternative encodings of one content kind
#[derive(Debug)]
pub struct AdaptationSet {
    pub id: u32,
    pub kind: MediaKind,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    pub fn new(id: u32, kind: MediaKind) -> Self {
        Self {
            id,
            kind,
            representations: Vec::new(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.kind.content_type()
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn representation(&self, id: u32) -> Option<&Representation> {
        self.representations.iter().find(|r| r.id == id)
    }
}

/// A time-contiguous section of the presentation
#[derive(Debug)]
pub struct Period {
    pub id: u32,
    /// Start time in seconds
    pub start: f64,
    pub adaptation_sets: Vec<AdaptationSet>,
}

/// How segments are addressed in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// One SegmentTemplate per adaptation set with `$Number$`
    Template,
    /// SegmentTemplate with an explicit SegmentTimeline per representation
    Timeline,
    /// BaseURL + SegmentList of byte ranges per representation
    SingleFile,
}

/// Static or dynamic presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationType {
    Static,
}

impl PresentationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresentationType::Static => "static",
        }
    }
}

/// Root of the entity graph
#[derive(Debug)]
pub struct Manifest {
    pub profile: String,
    pub presentation_type: PresentationType,
    /// Seconds
    pub min_buffer_time: f64,
    pub target_duration_ms: u64,
    pub single_file: bool,
    pub segment_template: bool,
    pub segment_timeline: bool,
    pub duration_policy: DurationPolicy,
    pub naming: SegmentNaming,
    pub periods: Vec<Period>,
}

impl Manifest {
    /// An empty manifest carrying the document level settings
    pub fn from_config(config: &PackagerConfig) -> Self {
        let layout = &config.layout;
        let profile = config.manifest.profile.clone().unwrap_or_else(|| {
            if layout.single_file {
                PROFILE_FULL.to_string()
            } else {
                PROFILE_LIVE.to_string()
            }
        });
        Self {
            profile,
            presentation_type: PresentationType::Static,
            min_buffer_time: config.min_buffer_ms() as f64 / 1000.0,
            target_duration_ms: config.segment.target_duration_ms,
            single_file: layout.single_file,
            segment_template: layout.segment_template,
            segment_timeline: layout.segment_timeline,
            duration_policy: config.manifest.duration_policy,
            naming: SegmentNaming::from_layout(layout),
            periods: Vec::new(),
        }
    }

    /// Single-file wins over timeline, timeline over plain templates
    pub fn addressing(&self) -> Addressing {
        if self.single_file {
            Addressing::SingleFile
        } else if self.segment_timeline {
            Addressing::Timeline
        } else {
            Addressing::Template
        }
    }

    pub fn target_duration(&self) -> f64 {
        self.target_duration_ms as f64 / 1000.0
    }

    pub fn representation(&self, key: RepresentationKey) -> Option<&Representation> {
        self.periods
            .first()?
            .adaptation_sets
            .iter()
            .find(|a| a.id == key.adaptation_set_id)?
            .representation(key.representation_id)
    }

    /// All representations with their keys, in document order
    pub fn representations(&self) -> impl Iterator<Item = (RepresentationKey, &Representation)> {
        self.periods.iter().flat_map(|p| {
            p.adaptation_sets.iter().flat_map(|a| {
                a.representations.iter().map(move |r| {
                    (
                        RepresentationKey {
                            adaptation_set_id: a.id,
                            representation_id: r.id,
                        },
                        r,
                    )
                })
            })
        })
    }

    /// Presentation duration in seconds according to the duration policy.
    /// Logs a warning when representations drift apart by more than one
    /// target duration.
    pub fn presentation_duration(&self) -> f64 {
        let totals: Vec<f64> = self
            .representations()
            .map(|(_, r)| r.total_duration())
            .collect();
        let Some(&first) = totals.first() else {
            return 0.0;
        };
        let max = totals.iter().copied().fold(f64::MIN, f64::max);
        let min = totals.iter().copied().fold(f64::MAX, f64::min);
        if max - min > self.target_duration() {
            warn!(
                "Representation durations diverge: shortest {:.3}s, longest {:.3}s",
                min, max
            );
        }
        match self.duration_policy {
            DurationPolicy::First => first,
            DurationPolicy::Max => max,
        }
    }

    /// Longest segment of the presentation, falling back to the target
    pub fn max_segment_duration(&self) -> f64 {
        let observed = self
            .representations()
            .map(|(_, r)| r.max_segment_duration())
            .fold(0.0, f64::max);
        if observed > 0.0 {
            observed
        } else {
            self.target_duration()
        }
    }

    fn lookup(&self, key: RepresentationKey) -> Result<&Representation> {
        self.representation(key)
            .ok_or(PackagerError::UnknownRepresentation {
                adaptation_set_id: key.adaptation_set_id,
                representation_id: key.representation_id,
            })
    }
}

/// Receives segmentation events
pub trait ManifestSink: Send + Sync {
    /// Record where the initialization segment of a representation lives
    fn set_initialization(&self, key: RepresentationKey, init: InitializationRange) -> Result<()>;

    /// Append the next segment of a representation
    fn append_segment(&self, key: RepresentationKey, segment: Segment) -> Result<()>;
}

impl ManifestSink for Manifest {
    fn set_initialization(&self, key: RepresentationKey, init: InitializationRange) -> Result<()> {
        let representation = self.lookup(key)?;
        representation.timeline.lock().init = Some(init);
        Ok(())
    }

    fn append_segment(&self, key: RepresentationKey, segment: Segment) -> Result<()> {
        self.lookup(key)?.append(key, segment)
    }
}

impl<T: ManifestSink + ?Sized> ManifestSink for Arc<T> {
    fn set_initialization(&self, key: RepresentationKey, init: InitializationRange) -> Result<()> {
        (**self).set_initialization(key, init)
    }

    fn append_segment(&self, key: RepresentationKey, segment: Segment) -> Result<()> {
        (**self).append_segment(key, segment)
    }
}
