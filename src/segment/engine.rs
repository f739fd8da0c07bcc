//! Segmentation engine
//!
//! One engine per representation. Packets arrive in decode order; the engine
//! decides where segments end, drives the container writer and reports every
//! finished segment to the manifest.
//!
//! A cut becomes due once the current segment spans the target duration and
//! is executed at the next keyframe. Segments therefore always start with a
//! sync sample. A segment that outgrows the keyframe ceiling fails the
//! representation.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PackagerConfig;
use crate::error::{PackagerError, Result};
use crate::manifest::{InitializationRange, ManifestSink, Segment};
use crate::media::{Packet, Rational, RepresentationKey};

use super::naming::SegmentNaming;
use super::writer::{ContainerWriter, TrackConfig};

/// Cut parameters shared by all engines of a run
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub target_duration_ms: u64,
    pub keyframe_ceiling_ms: u64,
    pub naming: SegmentNaming,
}

impl EngineSettings {
    pub fn from_config(config: &PackagerConfig) -> Self {
        Self {
            target_duration_ms: config.segment.target_duration_ms,
            keyframe_ceiling_ms: config.keyframe_ceiling_ms(),
            naming: SegmentNaming::from_layout(&config.layout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    AwaitingFirstSample,
    WritingInit,
    Accumulating,
    Finalized,
}

/// Counters reported after a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub packets: u64,
    pub segments: u32,
    pub deferred_cuts: u32,
}

pub struct SegmentationEngine<W: ContainerWriter, S: ManifestSink> {
    key: RepresentationKey,
    time_base: Rational,
    writer: W,
    handle: Option<W::Handle>,
    sink: S,
    settings: EngineSettings,
    state: EngineState,
    first_pts: Option<i64>,
    last_cut_pts: i64,
    curr_pts: i64,
    next_number: u32,
    samples_in_segment: u32,
    /// A due cut is waiting for a keyframe
    deferring: bool,
    stats: EngineStats,
}

impl<W: ContainerWriter, S: ManifestSink> SegmentationEngine<W, S> {
    /// Open the writer handle for `track`
    pub fn new(track: &TrackConfig, mut writer: W, sink: S, settings: EngineSettings) -> Result<Self> {
        let handle = writer.open_init_segment(track)?;
        Ok(Self {
            key: track.key,
            time_base: track.time_base,
            writer,
            handle: Some(handle),
            sink,
            settings,
            state: EngineState::AwaitingFirstSample,
            first_pts: None,
            last_cut_pts: 0,
            curr_pts: 0,
            next_number: 1,
            samples_in_segment: 0,
            deferring: false,
            stats: EngineStats::default(),
        })
    }

    pub fn key(&self) -> RepresentationKey {
        self.key
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn first_pts(&self) -> Option<i64> {
        self.first_pts
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Feed the next packet of the stream
    pub fn handle_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.state == EngineState::Finalized {
            return Err(PackagerError::EngineFinalized);
        }
        let result = self.process(packet);
        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Flush trailing samples as a last segment and release the writer handle.
    /// Calling it again is a no-op.
    pub fn finalize(&mut self) -> Result<()> {
        if self.state == EngineState::Finalized {
            return Ok(());
        }
        if self.state == EngineState::Accumulating && self.samples_in_segment > 0 {
            if let Err(e) = self.cut(self.curr_pts) {
                self.abort();
                return Err(e);
            }
        } else if self.first_pts.is_none() {
            warn!("[{}] stream ended without packets", self.key);
        }
        self.release();
        debug!(
            "[{}] finalized: {} packets, {} segments",
            self.key, self.stats.packets, self.stats.segments
        );
        Ok(())
    }

    /// Stop after a failure: close the handle without flushing anything
    pub fn abort(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.writer.close(handle);
        }
        self.state = EngineState::Finalized;
    }

    fn process(&mut self, packet: &Packet) -> Result<()> {
        if self.first_pts.is_none() {
            self.first_pts = Some(packet.pts);
            self.last_cut_pts = packet.pts;
            self.curr_pts = packet.pts;
            self.state = EngineState::WritingInit;
        }
        self.curr_pts = self.curr_pts.max(packet.pts + packet.duration);
        self.stats.packets += 1;

        if self.state == EngineState::WritingInit {
            self.start_first_segment()?;
        }

        let elapsed = packet.pts - self.last_cut_pts;
        if self.samples_in_segment > 0
            && self
                .time_base
                .reaches_millis(elapsed, self.settings.target_duration_ms)
        {
            if packet.is_keyframe {
                self.cut(packet.pts)?;
                self.begin_next_segment()?;
            } else {
                if !self.deferring {
                    self.deferring = true;
                    self.stats.deferred_cuts += 1;
                    warn!(
                        "[{}] keyframe alignment: cut due at pts {} deferred to the next keyframe",
                        self.key, packet.pts
                    );
                }
                if self
                    .time_base
                    .reaches_millis(elapsed, self.settings.keyframe_ceiling_ms)
                {
                    return Err(PackagerError::KeyframeStarvation {
                        elapsed_ms: Rational::rescale(elapsed, self.time_base, Rational::MILLIS),
                        ceiling_ms: self.settings.keyframe_ceiling_ms as i64,
                    });
                }
            }
        }

        let handle = self.handle.as_mut().ok_or(PackagerError::EngineFinalized)?;
        self.writer.write_sample(handle, packet)?;
        self.samples_in_segment += 1;
        Ok(())
    }

    fn start_first_segment(&mut self) -> Result<()> {
        let handle = self.handle.as_mut().ok_or(PackagerError::EngineFinalized)?;
        let init_size = self.writer.mark_init_boundary(handle)?;
        self.sink.set_initialization(
            self.key,
            InitializationRange {
                file: self.settings.naming.init_file(self.key),
                size: init_size,
            },
        )?;
        self.state = EngineState::Accumulating;
        self.begin_next_segment()
    }

    fn begin_next_segment(&mut self) -> Result<()> {
        let handle = self.handle.as_mut().ok_or(PackagerError::EngineFinalized)?;
        let file = self.settings.naming.media_file(self.key, self.next_number);
        self.writer.begin_segment(handle, &file)
    }

    /// Close the segment in progress at `end_pts` and report it
    fn cut(&mut self, end_pts: i64) -> Result<()> {
        let handle = self.handle.as_mut().ok_or(PackagerError::EngineFinalized)?;
        let range = self.writer.end_segment(handle)?;
        let segment = Segment {
            file: self.settings.naming.media_file(self.key, self.next_number),
            offset: range.offset,
            size: range.size,
            index_size: range.index_size,
            duration: self.time_base.seconds(end_pts - self.last_cut_pts),
            number: self.next_number,
        };
        self.sink.append_segment(self.key, segment)?;

        self.stats.segments += 1;
        self.next_number += 1;
        self.last_cut_pts = end_pts;
        self.samples_in_segment = 0;
        self.deferring = false;
        Ok(())
    }
}
