//! MPD serializer
//!
//! Renders a finished [`Manifest`] as a static MPEG-DASH document.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::warn;

use super::duration::format_iso8601;
use super::model::{AdaptationSet, Addressing, Manifest, Representation, Segment};
use crate::error::{PackagerError, Result};
use crate::media::MediaKind;

const MPD_NAMESPACE: &str = "urn:mpeg:dash:schema:mpd:2011";
const CHANNEL_CONFIGURATION_SCHEME: &str =
    "urn:mpeg:dash:23003:3:audio_channel_configuration:2011";

/// Timescale of all template and timeline values
const TIMESCALE: u64 = 1000;

struct MpdWriter {
    writer: Writer<Vec<u8>>,
}

impl MpdWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| PackagerError::Manifest(format!("XML write error: {}", e)))
    }

    fn start(&mut self, element: BytesStart<'_>) -> Result<()> {
        self.write(Event::Start(element))
    }

    fn empty(&mut self, element: BytesStart<'_>) -> Result<()> {
        self.write(Event::Empty(element))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(BytesStart::new(name))?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| PackagerError::Manifest(format!("invalid UTF-8: {}", e)))
    }
}

/// Push a duration attribute, leaving it out when the value cannot be
/// represented
fn push_duration(element: &mut BytesStart<'_>, name: &str, seconds: f64) {
    match format_iso8601(seconds) {
        Ok(value) => element.push_attribute((name, value.as_str())),
        Err(e) => warn!("Skipping {}: {}", name, e),
    }
}

fn millis(seconds: f64) -> u64 {
    (seconds * TIMESCALE as f64).round() as u64
}

/// Render the manifest document
pub fn render(manifest: &Manifest) -> Result<String> {
    let mut w = MpdWriter::new();
    w.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut mpd = BytesStart::new("MPD");
    mpd.push_attribute(("xmlns", MPD_NAMESPACE));
    mpd.push_attribute(("profiles", manifest.profile.as_str()));
    mpd.push_attribute(("type", manifest.presentation_type.as_str()));
    push_duration(&mut mpd, "minBufferTime", manifest.min_buffer_time);
    push_duration(
        &mut mpd,
        "mediaPresentationDuration",
        manifest.presentation_duration(),
    );
    push_duration(&mut mpd, "maxSegmentDuration", manifest.max_segment_duration());
    w.start(mpd)?;

    w.write(Event::Comment(BytesText::new(concat!(
        " Generated by dash-packager ",
        env!("CARGO_PKG_VERSION"),
        " "
    ))))?;

    for period in &manifest.periods {
        let mut p = BytesStart::new("Period");
        p.push_attribute(("id", period.id.to_string().as_str()));
        if period.start > 0.0 {
            push_duration(&mut p, "start", period.start);
        }
        w.start(p)?;
        for adaptation_set in &period.adaptation_sets {
            write_adaptation_set(&mut w, manifest, adaptation_set)?;
        }
        w.end("Period")?;
    }

    w.end("MPD")?;
    w.finish()
}

fn write_adaptation_set(w: &mut MpdWriter, manifest: &Manifest, set: &AdaptationSet) -> Result<()> {
    let mut element = BytesStart::new("AdaptationSet");
    element.push_attribute(("id", set.id.to_string().as_str()));
    element.push_attribute(("contentType", set.content_type()));
    element.push_attribute(("mimeType", set.mime_type()));
    element.push_attribute(("segmentAlignment", "true"));
    element.push_attribute(("bitstreamSwitching", "true"));
    element.push_attribute(("startWithSAP", "1"));
    w.start(element)?;

    if manifest.addressing() == Addressing::Template {
        let mut template = segment_template(manifest, set.id);
        template.push_attribute(("duration", manifest.target_duration_ms.to_string().as_str()));
        w.empty(template)?;
    }

    for representation in &set.representations {
        write_representation(w, manifest, set, representation)?;
    }

    w.end("AdaptationSet")
}

fn segment_template(manifest: &Manifest, adaptation_set_id: u32) -> BytesStart<'static> {
    let mut template = BytesStart::new("SegmentTemplate");
    template.push_attribute((
        "initialization",
        manifest.naming.init_template(adaptation_set_id).as_str(),
    ));
    template.push_attribute((
        "media",
        manifest.naming.media_template(adaptation_set_id).as_str(),
    ));
    template.push_attribute(("startNumber", "1"));
    template.push_attribute(("timescale", TIMESCALE.to_string().as_str()));
    template
}

fn write_representation(
    w: &mut MpdWriter,
    manifest: &Manifest,
    set: &AdaptationSet,
    rep: &Representation,
) -> Result<()> {
    let mut element = BytesStart::new("Representation");
    element.push_attribute(("id", rep.id.to_string().as_str()));
    element.push_attribute(("codecs", rep.codecs.as_str()));
    match rep.kind {
        MediaKind::Video => {
            element.push_attribute(("width", rep.width.to_string().as_str()));
            element.push_attribute(("height", rep.height.to_string().as_str()));
            if rep.frame_rate.is_valid() {
                element.push_attribute(("frameRate", rep.frame_rate.to_string().as_str()));
            }
        }
        MediaKind::Audio => {
            if rep.sample_rate > 0 {
                element.push_attribute(("audioSamplingRate", rep.sample_rate.to_string().as_str()));
            }
        }
        MediaKind::Other => {}
    }
    element.push_attribute(("bandwidth", rep.effective_bandwidth().to_string().as_str()));
    w.start(element)?;

    if rep.kind == MediaKind::Audio && rep.channels > 0 {
        let mut channels = BytesStart::new("AudioChannelConfiguration");
        channels.push_attribute(("schemeIdUri", CHANNEL_CONFIGURATION_SCHEME));
        channels.push_attribute(("value", rep.channels.to_string().as_str()));
        w.empty(channels)?;
    }

    let segments = rep.segments();
    match manifest.addressing() {
        Addressing::Template => {}
        Addressing::Timeline => write_segment_timeline(w, manifest, set.id, &segments)?,
        Addressing::SingleFile => write_segment_list(w, manifest, rep, &segments)?,
    }

    w.end("Representation")
}

/// Runs of equal durations as `(start, duration, repeat)` in milliseconds.
/// Segment boundaries are rounded from the exact running time, so `t` never
/// drifts from the media timeline.
fn timeline_runs(segments: &[Segment]) -> Vec<(u64, u64, u32)> {
    let mut runs: Vec<(u64, u64, u32)> = Vec::new();
    let mut elapsed = 0.0f64;
    let mut start = 0u64;
    for segment in segments {
        elapsed += segment.duration;
        let end = millis(elapsed).max(start);
        let d = end - start;
        match runs.last_mut() {
            Some(last) if last.1 == d => last.2 += 1,
            _ => runs.push((start, d, 0)),
        }
        start = end;
    }
    runs
}

fn write_segment_timeline(
    w: &mut MpdWriter,
    manifest: &Manifest,
    adaptation_set_id: u32,
    segments: &[Segment],
) -> Result<()> {
    w.start(segment_template(manifest, adaptation_set_id))?;
    w.start(BytesStart::new("SegmentTimeline"))?;
    for (t, d, r) in timeline_runs(segments) {
        let mut s = BytesStart::new("S");
        s.push_attribute(("t", t.to_string().as_str()));
        s.push_attribute(("d", d.to_string().as_str()));
        if r > 0 {
            s.push_attribute(("r", r.to_string().as_str()));
        }
        w.empty(s)?;
    }
    w.end("SegmentTimeline")?;
    w.end("SegmentTemplate")
}

fn write_segment_list(
    w: &mut MpdWriter,
    manifest: &Manifest,
    rep: &Representation,
    segments: &[Segment],
) -> Result<()> {
    let init = rep.initialization();
    let base_url = init
        .as_ref()
        .map(|i| i.file.clone())
        .or_else(|| segments.first().map(|s| s.file.clone()));
    if let Some(url) = base_url {
        w.text_element("BaseURL", &url)?;
    }

    let mut list = BytesStart::new("SegmentList");
    list.push_attribute(("timescale", TIMESCALE.to_string().as_str()));
    list.push_attribute(("duration", manifest.target_duration_ms.to_string().as_str()));
    w.start(list)?;

    if let Some(init) = init.filter(|i| i.size > 0) {
        let mut element = BytesStart::new("Initialization");
        element.push_attribute(("range", format!("0-{}", init.size - 1).as_str()));
        w.empty(element)?;
    }
    for segment in segments.iter().filter(|s| s.size > 0) {
        let mut element = BytesStart::new("SegmentURL");
        let range = format!("{}-{}", segment.offset, segment.offset + segment.size - 1);
        element.push_attribute(("mediaRange", range.as_str()));
        w.empty(element)?;
    }

    w.end("SegmentList")
}
