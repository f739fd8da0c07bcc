//! Fragmented MP4 writer backed by the file system.
//!
//! Media segments go to the file named by `begin_segment`. Naming the file
//! that is already open appends to it, which is how single-file output keeps
//! init and media segments contiguous in one file.

use bytes::{Bytes, BytesMut};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{PackagerError, Result};
use crate::media::{Packet, Rational};

use super::boxes::{init_segment, media_segment, FragmentSample};
use super::writer::{ContainerWriter, SegmentRange, TrackConfig};

struct OpenFile {
    name: String,
    writer: BufWriter<File>,
    position: u64,
}

/// Per-track state of a [`FragmentedMp4Writer`]
pub struct Fmp4Handle {
    track: TrackConfig,
    init: Bytes,
    file: Option<OpenFile>,
    in_segment: bool,
    samples: Vec<FragmentSample>,
    payload: BytesMut,
    /// Decode time of the first sample in the segment, output timescale
    segment_start_dts: Option<i64>,
    last_dts: Option<i64>,
    /// Last known non-zero sample duration, stands in for a missing one at
    /// the end of a segment
    last_duration: u32,
    /// Decode time of the very first sample; the output timeline starts at 0
    dts_origin: Option<i64>,
    fragment_sequence: u32,
}

impl Fmp4Handle {
    fn file(&mut self) -> Result<&mut OpenFile> {
        self.file
            .as_mut()
            .ok_or_else(|| PackagerError::Container("no output file open".into()))
    }
}

/// Writes fMP4 init and media segments below an output directory
#[derive(Debug, Clone)]
pub struct FragmentedMp4Writer {
    root: PathBuf,
}

impl FragmentedMp4Writer {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn create(&self, name: &str) -> Result<OpenFile> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        debug!("Opened {}", path.display());
        Ok(OpenFile {
            name: name.to_string(),
            writer: BufWriter::new(file),
            position: 0,
        })
    }

    /// Make `name` the current file, opening it when it is not already
    fn switch_to(&self, handle: &mut Fmp4Handle, name: &str) -> Result<()> {
        if handle.file.as_ref().map(|f| f.name.as_str()) == Some(name) {
            return Ok(());
        }
        if let Some(mut previous) = handle.file.take() {
            previous.writer.flush()?;
        }
        handle.file = Some(self.create(name)?);
        Ok(())
    }
}

impl ContainerWriter for FragmentedMp4Writer {
    type Handle = Fmp4Handle;

    fn open_init_segment(&mut self, track: &TrackConfig) -> Result<Fmp4Handle> {
        if track.timescale == 0 {
            return Err(PackagerError::Container(format!(
                "track {} has no timescale",
                track.key
            )));
        }
        Ok(Fmp4Handle {
            track: track.clone(),
            init: init_segment(track),
            file: None,
            in_segment: false,
            samples: Vec::new(),
            payload: BytesMut::new(),
            segment_start_dts: None,
            last_dts: None,
            last_duration: 0,
            dts_origin: None,
            fragment_sequence: 1,
        })
    }

    fn write_sample(&mut self, handle: &mut Fmp4Handle, packet: &Packet) -> Result<()> {
        if !handle.in_segment {
            return Err(PackagerError::Container(
                "sample written outside of a segment".into(),
            ));
        }
        let from = handle.track.time_base;
        let to = handle.track.output_time_base();
        let dts = Rational::rescale(packet.dts, from, to);
        let pts = Rational::rescale(packet.pts, from, to);
        let duration = Rational::rescale(packet.duration, from, to).max(0);

        let origin = *handle.dts_origin.get_or_insert(dts);
        let dts = dts - origin;
        let pts = pts - origin;

        // Backfill a missing duration from the decode time delta
        if let (Some(last_dts), Some(prev)) = (handle.last_dts, handle.samples.last_mut()) {
            if prev.duration == 0 && dts > last_dts {
                prev.duration = (dts - last_dts) as u32;
                handle.last_duration = prev.duration;
            }
        }
        if duration > 0 {
            handle.last_duration = duration as u32;
        }

        handle.segment_start_dts.get_or_insert(dts);
        handle.last_dts = Some(dts);
        handle.samples.push(FragmentSample {
            duration: duration as u32,
            size: packet.data.len() as u32,
            composition_offset: (pts - dts) as i32,
            is_sync: packet.is_keyframe,
        });
        handle.payload.extend_from_slice(&packet.data);
        Ok(())
    }

    fn mark_init_boundary(&mut self, handle: &mut Fmp4Handle) -> Result<u64> {
        let name = handle.track.init_file.clone();
        self.switch_to(handle, &name)?;
        let init = handle.init.clone();
        let file = handle.file()?;
        file.writer.write_all(&init)?;
        file.writer.flush()?;
        file.position += init.len() as u64;
        Ok(file.position)
    }

    fn begin_segment(&mut self, handle: &mut Fmp4Handle, filename: &str) -> Result<()> {
        if handle.in_segment {
            return Err(PackagerError::Container(format!(
                "segment already open while starting {}",
                filename
            )));
        }
        self.switch_to(handle, filename)?;
        handle.in_segment = true;
        handle.samples.clear();
        handle.payload.clear();
        handle.segment_start_dts = None;
        Ok(())
    }

    fn end_segment(&mut self, handle: &mut Fmp4Handle) -> Result<SegmentRange> {
        if !handle.in_segment {
            return Err(PackagerError::Container("no segment in progress".into()));
        }
        if handle.samples.is_empty() {
            return Err(PackagerError::Container("cannot flush an empty segment".into()));
        }
        let last_duration = handle.last_duration;
        if let Some(last) = handle.samples.last_mut() {
            if last.duration == 0 {
                last.duration = last_duration;
            }
        }
        let base = handle.segment_start_dts.unwrap_or(0).max(0) as u64;
        let data = media_segment(
            handle.fragment_sequence,
            base,
            &handle.samples,
            &handle.payload,
        );
        handle.fragment_sequence += 1;
        handle.in_segment = false;
        handle.samples.clear();
        handle.payload.clear();

        let file = handle.file()?;
        let offset = file.position;
        file.writer.write_all(&data)?;
        file.writer.flush()?;
        file.position += data.len() as u64;
        Ok(SegmentRange {
            offset,
            size: data.len() as u64,
            index_size: None,
        })
    }

    fn close(&mut self, mut handle: Fmp4Handle) {
        if let Some(mut file) = handle.file.take() {
            if let Err(e) = file.writer.flush() {
                warn!("Failed to flush {}: {}", file.name, e);
            }
        }
    }
}
