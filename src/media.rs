//! Media stream types shared by the sources, the classifier and the engines.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

impl MediaKind {
    /// DASH `contentType` value
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Other => "other",
        }
    }

    /// MIME type of the fragmented MP4 output
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Video => "video/mp4",
            MediaKind::Audio => "audio/mp4",
            MediaKind::Other => "application/mp4",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_type())
    }
}

/// A rational number, used for time bases and frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Millisecond time base
    pub const MILLIS: Rational = Rational::new(1, 1000);

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn to_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Convert `value` expressed in `from` units into `to` units,
    /// rounding to the nearest integer (halves away from zero).
    pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
        let numer = value as i128 * from.num as i128 * to.den as i128;
        let denom = from.den as i128 * to.num as i128;
        if denom == 0 {
            return 0;
        }
        let half = denom.abs() / 2;
        let rounded = if (numer < 0) != (denom < 0) {
            (numer - half * denom.signum()) / denom
        } else {
            (numer + half * denom.signum()) / denom
        };
        rounded as i64
    }

    /// `value` ticks of this time base in seconds
    pub fn seconds(&self, value: i64) -> f64 {
        value as f64 * self.to_f64()
    }

    /// Exact comparison of `value` ticks of this time base against `millis`:
    /// returns true when `value` is at least `millis` milliseconds.
    pub fn reaches_millis(&self, value: i64, millis: u64) -> bool {
        let lhs = value as i128 * self.num as i128 * 1000;
        let rhs = millis as i128 * self.den as i128;
        lhs >= rhs
    }

    /// Frame rate as a fraction. Integral rates become `n/1`, NTSC style
    /// rates become `n*1000/1001`, anything else is approximated in 1/1000.
    pub fn from_frame_rate(fps: f64) -> Self {
        if !fps.is_finite() || fps <= 0.0 {
            return Rational::new(0, 1);
        }
        let rounded = fps.round();
        if (fps - rounded).abs() < 0.001 {
            return Rational::new(rounded as i32, 1);
        }
        let ntsc = fps * 1001.0 / 1000.0;
        if (ntsc - ntsc.round()).abs() < 0.01 {
            return Rational::new(ntsc.round() as i32 * 1000, 1001);
        }
        Rational::new((fps * 1000.0).round() as i32, 1000)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Four character container codec tag
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// From a 32-bit container tag whose little-endian bytes spell the code
    pub fn from_le_u32(tag: u32) -> Self {
        FourCc(tag.to_le_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<&[u8; 4]> for FourCc {
    fn from(b: &[u8; 4]) -> Self {
        FourCc(*b)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc(\"{}\")", self)
    }
}

/// Decoded codec parameters of an input stream
#[derive(Debug, Clone)]
pub struct CodecParameters {
    pub codec_tag: FourCc,
    /// Decoder configuration record (avcC, hvcC, AudioSpecificConfig, ...)
    pub extradata: Bytes,
    /// Declared bitrate in bits/s, 0 if unknown
    pub bit_rate: u64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub time_base: Rational,
    pub sample_rate: u32,
    pub channels: u16,
}

impl CodecParameters {
    pub fn new(codec_tag: FourCc, time_base: Rational) -> Self {
        Self {
            codec_tag,
            extradata: Bytes::new(),
            bit_rate: 0,
            width: 0,
            height: 0,
            frame_rate: Rational::new(0, 1),
            time_base,
            sample_rate: 0,
            channels: 0,
        }
    }
}

/// One compressed media sample
#[derive(Debug, Clone)]
pub struct Packet {
    /// Presentation timestamp in the stream time base
    pub pts: i64,
    /// Decode timestamp in the stream time base
    pub dts: i64,
    pub duration: i64,
    pub is_keyframe: bool,
    pub data: Bytes,
}

/// Identifies a representation inside the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepresentationKey {
    pub adaptation_set_id: u32,
    pub representation_id: u32,
}

impl fmt::Display for RepresentationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.adaptation_set_id, self.representation_id)
    }
}

/// Where the classifier placed a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamAssignment {
    pub period_id: u32,
    pub key: RepresentationKey,
}

/// One elementary stream of one source
#[derive(Debug, Clone)]
pub struct InputStream {
    /// Source identifier, usually the file path
    pub source: String,
    pub stream_index: usize,
    pub kind: MediaKind,
    pub params: CodecParameters,
    assignment: Option<StreamAssignment>,
}

impl InputStream {
    pub fn new(source: impl Into<String>, stream_index: usize, kind: MediaKind, params: CodecParameters) -> Self {
        Self {
            source: source.into(),
            stream_index,
            kind,
            params,
            assignment: None,
        }
    }

    pub fn assignment(&self) -> Option<StreamAssignment> {
        self.assignment
    }

    pub fn key(&self) -> Option<RepresentationKey> {
        self.assignment.map(|a| a.key)
    }

    /// Record the classifier's decision. Only the first assignment sticks.
    pub(crate) fn assign(&mut self, assignment: StreamAssignment) -> bool {
        if self.assignment.is_some() {
            return false;
        }
        self.assignment = Some(assignment);
        true
    }

    /// Human readable `source#index` label
    pub fn label(&self) -> String {
        format!("{}#{}", self.source, self.stream_index)
    }
}
