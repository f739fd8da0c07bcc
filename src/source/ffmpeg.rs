//! FFmpeg demuxer, for inputs the MP4 reader cannot open (Matroska,
//! MPEG-TS and friends).

use bytes::Bytes;
use ffmpeg_next as ffmpeg;

use crate::error::{FfmpegError, Result};
use crate::media::{CodecParameters, FourCc, InputStream, MediaKind, Packet, Rational};

use super::{InputSpec, PacketSource, StreamInput};

/// Probe `spec.path` and open one input context per selected stream
pub fn open_spec(spec: &InputSpec) -> Result<Vec<StreamInput>> {
    ffmpeg::init().map_err(|e| FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e)))?;

    let label = spec.path.display().to_string();
    let streams = {
        let context = open_input(spec)?;
        probe(&context, &label)
    };

    let mut inputs = Vec::new();
    for stream in streams {
        if !spec.selects(&stream) {
            tracing::debug!("Skipping {} ({:?})", stream.label(), stream.kind);
            continue;
        }
        let source = FfmpegStreamSource::new(open_input(spec)?, stream.stream_index);
        inputs.push(StreamInput {
            stream,
            source: Box::new(source),
        });
    }
    Ok(inputs)
}

fn open_input(spec: &InputSpec) -> Result<ffmpeg::format::context::Input> {
    let context = ffmpeg::format::input(&spec.path).map_err(|e| {
        FfmpegError::OpenInput(format!("Failed to open {:?}: {}", spec.path, e))
    })?;
    Ok(context)
}

/// Describe every stream of an opened input
pub fn probe(context: &ffmpeg::format::context::Input, source: &str) -> Vec<InputStream> {
    let mut streams = Vec::new();
    for (index, stream) in context.streams().into_iter().enumerate() {
        let parameters = stream.parameters();
        let kind = match parameters.medium() {
            ffmpeg::media::Type::Video => MediaKind::Video,
            ffmpeg::media::Type::Audio => MediaKind::Audio,
            _ => MediaKind::Other,
        };
        let time_base = to_rational(stream.time_base());
        let tag = codec_tag(&parameters).unwrap_or(FourCc(*b"none"));

        let mut params = CodecParameters::new(tag, time_base);
        params.extradata = extradata(&parameters);
        params.bit_rate = bit_rate(&parameters);
        match kind {
            MediaKind::Video => {
                let (width, height) = dimensions(&parameters);
                params.width = width;
                params.height = height;
                let rate = stream.avg_frame_rate();
                if rate.numerator() > 0 && rate.denominator() > 0 {
                    params.frame_rate = to_rational(rate);
                }
            }
            MediaKind::Audio => {
                let (sample_rate, channels) = audio_format(&parameters);
                params.sample_rate = sample_rate;
                params.channels = channels;
            }
            MediaKind::Other => {}
        }

        tracing::debug!(
            "Found stream {} in {}: {:?} {} time_base={}",
            index,
            source,
            kind,
            params.codec_tag,
            params.time_base
        );
        streams.push(InputStream::new(source, index, kind, params));
    }
    streams
}

fn to_rational(rate: ffmpeg::Rational) -> Rational {
    Rational::new(rate.numerator(), rate.denominator())
}

/// Container tag, falling back to the ISO-BMFF sample entry of the codec
/// when the container stores none (Matroska, MPEG-TS).
fn codec_tag(parameters: &ffmpeg::codec::Parameters) -> Option<FourCc> {
    // SAFETY: the parameters pointer is valid for the lifetime of the stream
    let tag = unsafe { (*parameters.as_ptr()).codec_tag };
    if tag != 0 {
        return Some(FourCc::from_le_u32(tag));
    }
    use ffmpeg::codec::Id;
    let fallback = match parameters.id() {
        Id::H264 => b"avc1",
        Id::HEVC => b"hvc1",
        Id::AAC => b"mp4a",
        Id::AC3 => b"ac-3",
        Id::EAC3 => b"ec-3",
        Id::OPUS => b"Opus",
        Id::FLAC => b"fLaC",
        _ => return None,
    };
    Some(FourCc(*fallback))
}

fn extradata(parameters: &ffmpeg::codec::Parameters) -> Bytes {
    // SAFETY: extradata holds extradata_size bytes when non-null
    unsafe {
        let ptr = parameters.as_ptr();
        let data = (*ptr).extradata;
        let size = (*ptr).extradata_size;
        if data.is_null() || size <= 0 {
            return Bytes::new();
        }
        Bytes::copy_from_slice(std::slice::from_raw_parts(data, size as usize))
    }
}

fn bit_rate(parameters: &ffmpeg::codec::Parameters) -> u64 {
    // SAFETY: plain field read
    let rate = unsafe { (*parameters.as_ptr()).bit_rate };
    rate.max(0) as u64
}

fn dimensions(parameters: &ffmpeg::codec::Parameters) -> (u32, u32) {
    // SAFETY: plain field reads
    unsafe {
        let ptr = parameters.as_ptr();
        ((*ptr).width.max(0) as u32, (*ptr).height.max(0) as u32)
    }
}

fn audio_format(parameters: &ffmpeg::codec::Parameters) -> (u32, u16) {
    // SAFETY: plain field reads
    unsafe {
        let ptr = parameters.as_ptr();
        (
            (*ptr).sample_rate.max(0) as u32,
            (*ptr).ch_layout.nb_channels.max(0) as u16,
        )
    }
}

/// Packets of one stream of an input context
pub struct FfmpegStreamSource {
    context: ffmpeg::format::context::Input,
    stream_index: usize,
    next_dts: Option<i64>,
}

impl FfmpegStreamSource {
    pub fn new(context: ffmpeg::format::context::Input, stream_index: usize) -> Self {
        Self {
            context,
            stream_index,
            next_dts: None,
        }
    }
}

impl PacketSource for FfmpegStreamSource {
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.context) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => {
                    return Err(FfmpegError::ReadPacket(format!(
                        "stream {}: {}",
                        self.stream_index, e
                    ))
                    .into())
                }
            }
            if packet.stream() != self.stream_index {
                continue;
            }

            // Missing timestamps are inferred from the previous packet
            let dts = packet
                .dts()
                .or(packet.pts())
                .or(self.next_dts)
                .unwrap_or(0);
            let pts = packet.pts().unwrap_or(dts);
            let duration = packet.duration().max(0);
            self.next_dts = Some(dts + duration);

            let data = packet.data().map(Bytes::copy_from_slice).unwrap_or_default();
            return Ok(Some(Packet {
                pts,
                dts,
                duration,
                is_keyframe: packet.is_key(),
                data,
            }));
        }
    }
}
