//! ISO-BMFF box serialization for fragmented MP4.
//!
//! - Init segment: ftyp + moov (one track, empty sample tables, mvex)
//! - Media segment: styp + moof (mfhd, traf with tfhd/tfdt/trun) + mdat

use bytes::{BufMut, Bytes, BytesMut};

use crate::media::MediaKind;

use super::writer::TrackConfig;

/// Every output file carries a single track
pub const TRACK_ID: u32 = 1;

/// Sample flags: sync sample (depends on nothing)
const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;

/// Sample flags: depends on others, non-sync
const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

/// One sample inside a fragment, timed in the track timescale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSample {
    pub duration: u32,
    pub size: u32,
    pub composition_offset: i32,
    pub is_sync: bool,
}

fn begin_box(buf: &mut BytesMut, kind: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0); // patched by end_box
    buf.put_slice(kind);
    start
}

fn begin_full_box(buf: &mut BytesMut, kind: &[u8; 4], version: u8, flags: u32) -> usize {
    let start = begin_box(buf, kind);
    buf.put_u32(((version as u32) << 24) | (flags & 0x00ff_ffff));
    start
}

fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn put_matrix(buf: &mut BytesMut) {
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        buf.put_u32(v);
    }
}

/// Serialize the initialization segment of a track
pub fn init_segment(track: &TrackConfig) -> Bytes {
    let mut buf = BytesMut::with_capacity(1024);

    let ftyp = begin_box(&mut buf, b"ftyp");
    buf.put_slice(b"iso6");
    buf.put_u32(0);
    for brand in [b"iso6", b"isom", b"dash", b"msdh"] {
        buf.put_slice(brand);
    }
    end_box(&mut buf, ftyp);

    let moov = begin_box(&mut buf, b"moov");
    write_mvhd(&mut buf, track);
    write_trak(&mut buf, track);
    let mvex = begin_box(&mut buf, b"mvex");
    let trex = begin_full_box(&mut buf, b"trex", 0, 0);
    buf.put_u32(TRACK_ID);
    buf.put_u32(1); // default sample description index
    buf.put_u32(0); // default sample duration
    buf.put_u32(0); // default sample size
    buf.put_u32(0); // default sample flags
    end_box(&mut buf, trex);
    end_box(&mut buf, mvex);
    end_box(&mut buf, moov);

    buf.freeze()
}

fn write_mvhd(buf: &mut BytesMut, track: &TrackConfig) {
    let mvhd = begin_full_box(buf, b"mvhd", 0, 0);
    buf.put_u32(0); // creation time
    buf.put_u32(0); // modification time
    buf.put_u32(track.timescale);
    buf.put_u32(0); // duration, carried by the fragments
    buf.put_u32(0x0001_0000); // rate 1.0
    buf.put_u16(0x0100); // volume 1.0
    buf.put_u16(0);
    buf.put_u64(0);
    put_matrix(buf);
    for _ in 0..6 {
        buf.put_u32(0);
    }
    buf.put_u32(TRACK_ID + 1);
    end_box(buf, mvhd);
}

fn write_trak(buf: &mut BytesMut, track: &TrackConfig) {
    let trak = begin_box(buf, b"trak");

    // enabled | in movie | in preview
    let tkhd = begin_full_box(buf, b"tkhd", 0, 0x000007);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(TRACK_ID);
    buf.put_u32(0);
    buf.put_u32(0); // duration
    buf.put_u64(0);
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate group
    buf.put_u16(if track.kind == MediaKind::Audio { 0x0100 } else { 0 });
    buf.put_u16(0);
    put_matrix(buf);
    if track.kind == MediaKind::Video {
        buf.put_u32(track.width << 16);
        buf.put_u32(track.height << 16);
    } else {
        buf.put_u32(0);
        buf.put_u32(0);
    }
    end_box(buf, tkhd);

    let mdia = begin_box(buf, b"mdia");
    let mdhd = begin_full_box(buf, b"mdhd", 0, 0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(track.timescale);
    buf.put_u32(0);
    buf.put_u16(0x55c4); // "und"
    buf.put_u16(0);
    end_box(buf, mdhd);

    let (handler, name): (&[u8; 4], &[u8]) = match track.kind {
        MediaKind::Video => (b"vide", &b"VideoHandler\0"[..]),
        MediaKind::Audio => (b"soun", &b"SoundHandler\0"[..]),
        MediaKind::Other => (b"meta", &b"MetaHandler\0"[..]),
    };
    let hdlr = begin_full_box(buf, b"hdlr", 0, 0);
    buf.put_u32(0);
    buf.put_slice(handler);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_slice(name);
    end_box(buf, hdlr);

    let minf = begin_box(buf, b"minf");
    match track.kind {
        MediaKind::Video => {
            let vmhd = begin_full_box(buf, b"vmhd", 0, 1);
            buf.put_u64(0); // graphics mode + opcolor
            end_box(buf, vmhd);
        }
        MediaKind::Audio => {
            let smhd = begin_full_box(buf, b"smhd", 0, 0);
            buf.put_u32(0); // balance + reserved
            end_box(buf, smhd);
        }
        MediaKind::Other => {
            let nmhd = begin_full_box(buf, b"nmhd", 0, 0);
            end_box(buf, nmhd);
        }
    }

    let dinf = begin_box(buf, b"dinf");
    let dref = begin_full_box(buf, b"dref", 0, 0);
    buf.put_u32(1);
    let url = begin_full_box(buf, b"url ", 0, 1); // self-contained
    end_box(buf, url);
    end_box(buf, dref);
    end_box(buf, dinf);

    let stbl = begin_box(buf, b"stbl");
    let stsd = begin_full_box(buf, b"stsd", 0, 0);
    buf.put_u32(1);
    match track.kind {
        MediaKind::Audio => write_audio_sample_entry(buf, track),
        _ => write_visual_sample_entry(buf, track),
    }
    end_box(buf, stsd);
    for kind in [b"stts", b"stsc", b"stco"] {
        let empty = begin_full_box(buf, kind, 0, 0);
        buf.put_u32(0);
        end_box(buf, empty);
    }
    let stsz = begin_full_box(buf, b"stsz", 0, 0);
    buf.put_u32(0);
    buf.put_u32(0);
    end_box(buf, stsz);
    end_box(buf, stbl);

    end_box(buf, minf);
    end_box(buf, mdia);
    end_box(buf, trak);
}

/// Name of the box carrying the decoder configuration for a sample entry
fn config_box(tag: &[u8; 4]) -> Option<&'static [u8; 4]> {
    match tag {
        b"avc1" | b"avc3" => Some(b"avcC"),
        b"hvc1" | b"hev1" => Some(b"hvcC"),
        b"ac-3" => Some(b"dac3"),
        b"ec-3" => Some(b"dec3"),
        b"Opus" => Some(b"dOps"),
        _ => None,
    }
}

fn write_visual_sample_entry(buf: &mut BytesMut, track: &TrackConfig) {
    let entry = begin_box(buf, track.codec_tag.as_bytes());
    buf.put_slice(&[0; 6]);
    buf.put_u16(1); // data reference index
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_slice(&[0; 12]);
    buf.put_u16(track.width as u16);
    buf.put_u16(track.height as u16);
    buf.put_u32(0x0048_0000); // 72 dpi
    buf.put_u32(0x0048_0000);
    buf.put_u32(0);
    buf.put_u16(1); // frame count
    buf.put_slice(&[0; 32]); // compressor name
    buf.put_u16(0x0018);
    buf.put_i16(-1);
    if let Some(kind) = config_box(track.codec_tag.as_bytes()) {
        if !track.extradata.is_empty() {
            let config = begin_box(buf, kind);
            buf.put_slice(&track.extradata);
            end_box(buf, config);
        }
    }
    end_box(buf, entry);
}

fn write_audio_sample_entry(buf: &mut BytesMut, track: &TrackConfig) {
    let entry = begin_box(buf, track.codec_tag.as_bytes());
    buf.put_slice(&[0; 6]);
    buf.put_u16(1);
    buf.put_u64(0);
    buf.put_u16(track.channels.max(1));
    buf.put_u16(16); // sample size
    buf.put_u16(0);
    buf.put_u16(0);
    let rate = if track.sample_rate <= 0xffff { track.sample_rate } else { 0 };
    buf.put_u32(rate << 16);
    if track.codec_tag.as_bytes() == b"mp4a" {
        write_esds(buf, track);
    } else if let Some(kind) = config_box(track.codec_tag.as_bytes()) {
        if !track.extradata.is_empty() {
            let config = begin_box(buf, kind);
            buf.put_slice(&track.extradata);
            end_box(buf, config);
        }
    }
    end_box(buf, entry);
}

fn put_descriptor(buf: &mut BytesMut, tag: u8, payload: &[u8]) {
    buf.put_u8(tag);
    // four byte size form keeps every length representable
    let len = payload.len() as u32;
    buf.put_u8(0x80 | ((len >> 21) & 0x7f) as u8);
    buf.put_u8(0x80 | ((len >> 14) & 0x7f) as u8);
    buf.put_u8(0x80 | ((len >> 7) & 0x7f) as u8);
    buf.put_u8((len & 0x7f) as u8);
    buf.put_slice(payload);
}

fn write_esds(buf: &mut BytesMut, track: &TrackConfig) {
    let mut decoder_specific = BytesMut::new();
    put_descriptor(&mut decoder_specific, 0x05, &track.extradata);

    let mut decoder_config = BytesMut::new();
    decoder_config.put_u8(0x40); // MPEG-4 audio
    decoder_config.put_u8(0x15); // audio stream
    decoder_config.put_slice(&[0, 0, 0]); // buffer size
    let bitrate = track.bit_rate.min(u32::MAX as u64) as u32;
    decoder_config.put_u32(bitrate);
    decoder_config.put_u32(bitrate);
    decoder_config.put_slice(&decoder_specific);

    let mut es = BytesMut::new();
    es.put_u16(TRACK_ID as u16);
    es.put_u8(0);
    put_descriptor(&mut es, 0x04, &decoder_config);
    put_descriptor(&mut es, 0x06, &[0x02]);

    let esds = begin_full_box(buf, b"esds", 0, 0);
    put_descriptor(buf, 0x03, &es);
    end_box(buf, esds);
}

/// Serialize one media segment: styp, a single moof and its mdat
pub fn media_segment(
    sequence: u32,
    base_decode_time: u64,
    samples: &[FragmentSample],
    payload: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(256 + samples.len() * 16 + payload.len());

    let styp = begin_box(&mut buf, b"styp");
    buf.put_slice(b"msdh");
    buf.put_u32(0);
    buf.put_slice(b"msdh");
    buf.put_slice(b"msix");
    end_box(&mut buf, styp);

    let moof = begin_box(&mut buf, b"moof");
    let mfhd = begin_full_box(&mut buf, b"mfhd", 0, 0);
    buf.put_u32(sequence);
    end_box(&mut buf, mfhd);

    let traf = begin_box(&mut buf, b"traf");
    let tfhd = begin_full_box(&mut buf, b"tfhd", 0, 0x020000); // default-base-is-moof
    buf.put_u32(TRACK_ID);
    end_box(&mut buf, tfhd);

    let tfdt = begin_full_box(&mut buf, b"tfdt", 1, 0);
    buf.put_u64(base_decode_time);
    end_box(&mut buf, tfdt);

    // data offset, duration, size, flags, signed composition offset
    let trun = begin_full_box(&mut buf, b"trun", 1, 0x000001 | 0x000100 | 0x000200 | 0x000400 | 0x000800);
    buf.put_u32(samples.len() as u32);
    let data_offset_pos = buf.len();
    buf.put_i32(0);
    for sample in samples {
        buf.put_u32(sample.duration);
        buf.put_u32(sample.size);
        buf.put_u32(if sample.is_sync {
            SYNC_SAMPLE_FLAGS
        } else {
            NON_SYNC_SAMPLE_FLAGS
        });
        buf.put_i32(sample.composition_offset);
    }
    end_box(&mut buf, trun);
    end_box(&mut buf, traf);
    end_box(&mut buf, moof);

    // first sample byte, relative to the start of moof
    let data_offset = (buf.len() - moof + 8) as i32;
    buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());

    buf.put_u32((8 + payload.len()) as u32);
    buf.put_slice(b"mdat");
    buf.put_slice(payload);

    buf.freeze()
}
