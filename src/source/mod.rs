//! Packet sources
//!
//! A [`PacketSource`] yields the packets of one elementary stream in decode
//! order. Input files are probed into [`InputStream`]s and one source is
//! opened per selected stream.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod mp4_track;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::DemuxerKind;
use crate::error::{PackagerError, Result};
use crate::media::{InputStream, MediaKind, Packet};

/// Ordered packets of one elementary stream
pub trait PacketSource: Send {
    /// `Ok(None)` at end of stream
    fn next_packet(&mut self) -> Result<Option<Packet>>;
}

impl<T: PacketSource + ?Sized> PacketSource for Box<T> {
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        (**self).next_packet()
    }
}

/// A stream paired with the source that produces its packets
pub struct StreamInput {
    pub stream: InputStream,
    pub source: Box<dyn PacketSource>,
}

impl fmt::Debug for StreamInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInput")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

/// Input selector: `path` uses every audio and video stream of the file,
/// `path#N` only stream N
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub path: PathBuf,
    pub stream: Option<usize>,
}

impl InputSpec {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            stream: None,
        }
    }

    pub fn with_stream(mut self, stream: usize) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Whether a probed stream is selected by this spec
    pub fn selects(&self, stream: &InputStream) -> bool {
        match self.stream {
            Some(index) => stream.stream_index == index,
            None => stream.kind != MediaKind::Other,
        }
    }
}

impl FromStr for InputSpec {
    type Err = PackagerError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(PackagerError::Config("empty input".into()));
        }
        if let Some((path, index)) = s.rsplit_once('#') {
            if let Ok(index) = index.parse::<usize>() {
                if path.is_empty() {
                    return Err(PackagerError::Config(format!("no file in input '{}'", s)));
                }
                return Ok(InputSpec::new(path).with_stream(index));
            }
        }
        Ok(InputSpec::new(s))
    }
}

impl fmt::Display for InputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stream {
            Some(index) => write!(f, "{}#{}", self.path.display(), index),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Probe every spec and open one source per selected stream
pub fn open_inputs(specs: &[InputSpec], demuxer: DemuxerKind) -> Result<Vec<StreamInput>> {
    let mut inputs = Vec::new();
    for spec in specs {
        let opened = match demuxer {
            DemuxerKind::Mp4 => mp4_track::open_spec(spec)?,
            #[cfg(feature = "ffmpeg")]
            DemuxerKind::Ffmpeg => ffmpeg::open_spec(spec)?,
            #[cfg(not(feature = "ffmpeg"))]
            DemuxerKind::Ffmpeg => {
                return Err(PackagerError::Config(
                    "the ffmpeg demuxer requires building with the `ffmpeg` feature".into(),
                ))
            }
        };
        if opened.is_empty() {
            return Err(PackagerError::Config(format!(
                "input {} selects no stream",
                spec
            )));
        }
        inputs.extend(opened);
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CodecParameters, FourCc, Rational};

    #[test]
    fn test_parse_input_spec() {
        let spec: InputSpec = "movie.mp4".parse().unwrap();
        assert_eq!(spec, InputSpec::new("movie.mp4"));

        let spec: InputSpec = "movie.mp4#2".parse().unwrap();
        assert_eq!(spec, InputSpec::new("movie.mp4").with_stream(2));
        assert_eq!(spec.to_string(), "movie.mp4#2");

        // a '#' that is not followed by a number belongs to the file name
        let spec: InputSpec = "take#one.mp4".parse().unwrap();
        assert_eq!(spec.path, PathBuf::from("take#one.mp4"));
        assert_eq!(spec.stream, None);

        assert!("".parse::<InputSpec>().is_err());
        assert!("#1".parse::<InputSpec>().is_err());
    }

    #[test]
    fn test_selection() {
        let params = CodecParameters::new(FourCc(*b"avc1"), Rational::new(1, 90000));
        let video = InputStream::new("a.mp4", 1, MediaKind::Video, params.clone());
        let other = InputStream::new("a.mp4", 3, MediaKind::Other, params);

        let all = InputSpec::new("a.mp4");
        assert!(all.selects(&video));
        assert!(!all.selects(&other));

        let only = InputSpec::new("a.mp4").with_stream(3);
        assert!(!only.selects(&video));
        assert!(only.selects(&other));
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_ffmpeg_demuxer_needs_feature() {
        let err = open_inputs(&[InputSpec::new("a.mkv")], DemuxerKind::Ffmpeg).unwrap_err();
        assert!(matches!(err, PackagerError::Config(_)));
    }
}
