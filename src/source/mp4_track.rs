//! MP4 demuxer built on the `mp4` crate
//!
//! Each selected track gets its own reader so tracks can be consumed
//! independently and concurrently.

use std::fs::File;
use std::io::{BufReader, Read, Seek};

use bytes::{BufMut, Bytes, BytesMut};
use mp4::{Mp4Reader, Mp4Track, TrackType};

use crate::error::{PackagerError, Result};
use crate::media::{CodecParameters, FourCc, InputStream, MediaKind, Packet, Rational};

use super::{InputSpec, PacketSource, StreamInput};

/// AAC sampling frequency table, indexed by `samplingFrequencyIndex`
const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Probe `spec.path` and open one track source per selected stream
pub fn open_spec(spec: &InputSpec) -> Result<Vec<StreamInput>> {
    let label = spec.path.display().to_string();
    let streams = {
        let reader = open_reader(spec)?;
        probe(&reader, &label)?
    };

    let mut inputs = Vec::new();
    for (stream, track_id) in streams {
        if !spec.selects(&stream) {
            tracing::debug!("Skipping {} ({:?})", stream.label(), stream.kind);
            continue;
        }
        let reader = open_reader(spec)?;
        inputs.push(StreamInput {
            stream,
            source: Box::new(Mp4TrackSource::new(reader, track_id)),
        });
    }
    Ok(inputs)
}

fn open_reader(spec: &InputSpec) -> Result<Mp4Reader<BufReader<File>>> {
    let file = File::open(&spec.path)?;
    let size = file.metadata()?.len();
    Ok(Mp4Reader::read_header(BufReader::new(file), size)?)
}

/// Describe every track of an opened file. Streams are numbered from zero
/// in track id order; the second value of each pair is the mp4 track id.
pub fn probe<R: Read + Seek>(
    reader: &Mp4Reader<R>,
    source: &str,
) -> Result<Vec<(InputStream, u32)>> {
    let mut track_ids: Vec<u32> = reader.tracks().keys().copied().collect();
    track_ids.sort_unstable();

    let mut streams = Vec::with_capacity(track_ids.len());
    for (index, track_id) in track_ids.into_iter().enumerate() {
        let Some(track) = reader.tracks().get(&track_id) else {
            continue;
        };
        let (kind, params) = describe_track(track)?;
        tracing::debug!(
            "Found track {} in {}: {:?} {} timescale={}",
            track_id,
            source,
            kind,
            params.codec_tag,
            params.time_base
        );
        streams.push((InputStream::new(source, index, kind, params), track_id));
    }
    Ok(streams)
}

fn describe_track(track: &Mp4Track) -> Result<(MediaKind, CodecParameters)> {
    let timescale = track.timescale();
    if timescale == 0 {
        return Err(PackagerError::Container(format!(
            "track {} has a zero timescale",
            track.track_id()
        )));
    }
    let time_base = Rational::new(1, timescale as i32);
    let kind = match track.track_type() {
        Ok(TrackType::Video) => MediaKind::Video,
        Ok(TrackType::Audio) => MediaKind::Audio,
        _ => MediaKind::Other,
    };
    let tag = match track.box_type() {
        Ok(fourcc) => FourCc(fourcc.value),
        Err(_) => FourCc(*b"none"),
    };

    let mut params = CodecParameters::new(tag, time_base);
    params.bit_rate = track.bitrate() as u64;

    match kind {
        MediaKind::Video => {
            params.width = track.width() as u32;
            params.height = track.height() as u32;
            let seconds = track.duration().as_secs_f64();
            if seconds > 0.0 {
                params.frame_rate =
                    Rational::from_frame_rate(track.sample_count() as f64 / seconds);
            }
            if &tag.0 == b"avc1" || &tag.0 == b"avc3" {
                let sps = track.sequence_parameter_set()?;
                let pps = track.picture_parameter_set()?;
                params.extradata = avc_decoder_config(sps, pps)?;
            }
        }
        MediaKind::Audio => {
            params.sample_rate = timescale;
            if &tag.0 == b"mp4a" {
                let object_type = track.audio_profile()? as u8;
                let freq_index = track.sample_freq_index()? as u8;
                let channels = track.channel_config()? as u8;
                if let Some(rate) = AAC_SAMPLE_RATES.get(freq_index as usize) {
                    params.sample_rate = *rate;
                }
                params.channels = channels as u16;
                params.extradata = audio_specific_config(object_type, freq_index, channels);
            }
        }
        MediaKind::Other => {}
    }
    Ok((kind, params))
}

/// Rebuild an `AVCDecoderConfigurationRecord` with one SPS and one PPS
fn avc_decoder_config(sps: &[u8], pps: &[u8]) -> Result<Bytes> {
    if sps.len() < 4 {
        return Err(PackagerError::Container(format!(
            "SPS too short ({} bytes)",
            sps.len()
        )));
    }
    let mut out = BytesMut::with_capacity(11 + sps.len() + pps.len());
    out.put_u8(1);
    out.put_slice(&sps[1..4]);
    // 4 byte NAL lengths, one SPS
    out.put_u8(0xff);
    out.put_u8(0xe1);
    out.put_u16(sps.len() as u16);
    out.put_slice(sps);
    out.put_u8(1);
    out.put_u16(pps.len() as u16);
    out.put_slice(pps);
    Ok(out.freeze())
}

/// Two byte `AudioSpecificConfig`
fn audio_specific_config(object_type: u8, freq_index: u8, channels: u8) -> Bytes {
    let value = ((object_type as u16 & 0x1f) << 11)
        | ((freq_index as u16 & 0x0f) << 7)
        | ((channels as u16 & 0x0f) << 3);
    Bytes::copy_from_slice(&value.to_be_bytes())
}

/// Packets of one track, in sample order
pub struct Mp4TrackSource<R> {
    reader: Mp4Reader<R>,
    track_id: u32,
    next_sample: u32,
    sample_count: u32,
}

impl<R: Read + Seek> Mp4TrackSource<R> {
    pub fn new(reader: Mp4Reader<R>, track_id: u32) -> Self {
        let sample_count = reader.sample_count(track_id).unwrap_or(0);
        Self {
            reader,
            track_id,
            next_sample: 1,
            sample_count,
        }
    }
}

impl<R: Read + Seek + Send> PacketSource for Mp4TrackSource<R> {
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.next_sample > self.sample_count {
            return Ok(None);
        }
        let sample_id = self.next_sample;
        self.next_sample += 1;

        let Some(sample) = self.reader.read_sample(self.track_id, sample_id)? else {
            return Ok(None);
        };
        let dts = sample.start_time as i64;
        Ok(Some(Packet {
            pts: dts + sample.rendering_offset as i64,
            dts,
            duration: sample.duration as i64,
            is_keyframe: sample.is_sync,
            data: sample.bytes,
        }))
    }
}
