//! Container I/O port
//!
//! The segmentation engine drives a [`ContainerWriter`] through an explicit
//! handle per representation. A handle owns every buffer and file of its
//! track; writers keep no shared state between handles.

use bytes::Bytes;

use crate::error::Result;
use crate::media::{FourCc, InputStream, MediaKind, Packet, Rational, RepresentationKey};

use super::naming::SegmentNaming;

/// Byte range of a finished media segment inside its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub offset: u64,
    pub size: u64,
    /// Size of a leading segment index, when one was written
    pub index_size: Option<u64>,
}

/// Everything a writer needs to describe one output track
#[derive(Debug, Clone)]
pub struct TrackConfig {
    pub key: RepresentationKey,
    pub kind: MediaKind,
    pub codec_tag: FourCc,
    pub extradata: Bytes,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u64,
    /// Time base of incoming packet timestamps
    pub time_base: Rational,
    /// Timescale of the output track
    pub timescale: u32,
    /// Path of the initialization segment, relative to the output directory
    pub init_file: String,
}

impl TrackConfig {
    pub fn from_stream(stream: &InputStream, key: RepresentationKey, naming: &SegmentNaming) -> Self {
        let params = &stream.params;
        let tb = params.time_base;
        let timescale = if tb.num == 1 && tb.den > 0 {
            tb.den as u32
        } else if stream.kind == MediaKind::Audio && params.sample_rate > 0 {
            params.sample_rate
        } else {
            90000
        };
        Self {
            key,
            kind: stream.kind,
            codec_tag: params.codec_tag,
            extradata: params.extradata.clone(),
            width: params.width,
            height: params.height,
            sample_rate: params.sample_rate,
            channels: params.channels,
            bit_rate: params.bit_rate,
            time_base: tb,
            timescale,
            init_file: naming.init_file(key),
        }
    }

    /// Output track time base
    pub fn output_time_base(&self) -> Rational {
        Rational::new(1, self.timescale as i32)
    }
}

/// Writes initialization and media segments for one track per handle
pub trait ContainerWriter: Send {
    type Handle: Send;

    /// Prepare a track; nothing is written until the init boundary is marked
    fn open_init_segment(&mut self, track: &TrackConfig) -> Result<Self::Handle>;

    /// Append one sample to the segment in progress
    fn write_sample(&mut self, handle: &mut Self::Handle, packet: &Packet) -> Result<()>;

    /// Flush the initialization segment; returns the byte offset where it ends
    fn mark_init_boundary(&mut self, handle: &mut Self::Handle) -> Result<u64>;

    /// Start a media segment stored in `filename`. Reusing the current file
    /// name appends to it.
    fn begin_segment(&mut self, handle: &mut Self::Handle, filename: &str) -> Result<()>;

    /// Flush the segment in progress
    fn end_segment(&mut self, handle: &mut Self::Handle) -> Result<SegmentRange>;

    /// Release the handle
    fn close(&mut self, handle: Self::Handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::CodecParameters;

    #[test]
    fn test_timescale_selection() {
        let key = RepresentationKey {
            adaptation_set_id: 0,
            representation_id: 0,
        };
        let naming = SegmentNaming::default();

        let params = CodecParameters::new(FourCc(*b"avc1"), Rational::new(1, 90000));
        let stream = InputStream::new("a.mp4", 0, MediaKind::Video, params);
        let track = TrackConfig::from_stream(&stream, key, &naming);
        assert_eq!(track.timescale, 90000);
        assert_eq!(track.init_file, "0/0/init.mp4");

        let mut params = CodecParameters::new(FourCc(*b"mp4a"), Rational::new(2, 96000));
        params.sample_rate = 44100;
        let stream = InputStream::new("a.mp4", 1, MediaKind::Audio, params);
        assert_eq!(TrackConfig::from_stream(&stream, key, &naming).timescale, 44100);

        let params = CodecParameters::new(FourCc(*b"avc1"), Rational::new(1001, 30000));
        let stream = InputStream::new("a.mp4", 2, MediaKind::Video, params);
        assert_eq!(TrackConfig::from_stream(&stream, key, &naming).timescale, 90000);
    }
}
