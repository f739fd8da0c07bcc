//! End-to-end integration tests

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PackagerConfig;
use crate::error::{ClassificationError, PackagerError};
use crate::media::{InputStream, MediaKind, RepresentationKey};
use crate::pipeline::{PackageOutcome, Packager};
use crate::segment::FragmentedMp4Writer;
use crate::source::{InputSpec, StreamInput};
use crate::tests::fixtures::{
    audio_packets, audio_stream, input, mp4_file, video_packets, video_stream, BrokenSource,
    FailingWriter, PanickingSource, StallingSource, SyntheticSource, ThreadRecordingWriter,
};

const VIDEO: RepresentationKey = RepresentationKey {
    adaptation_set_id: 0,
    representation_id: 0,
};

const AUDIO: RepresentationKey = RepresentationKey {
    adaptation_set_id: 1,
    representation_id: 0,
};

fn config(dir: &Path) -> PackagerConfig {
    let mut config = PackagerConfig::default();
    config.output_dir = dir.to_path_buf();
    config.segment.target_duration_ms = 2000;
    config
}

fn av_inputs() -> Vec<StreamInput> {
    vec![
        input(video_stream(0), SyntheticSource::new(video_packets(10_000, 2000))),
        input(audio_stream(1), SyntheticSource::new(audio_packets(10_000))),
    ]
}

async fn package(config: PackagerConfig, inputs: Vec<StreamInput>) -> PackageOutcome {
    let root = config.output_dir.clone();
    Packager::new(config)
        .run(inputs, |_| Ok(FragmentedMp4Writer::new(&root)))
        .await
        .unwrap()
}

fn assert_sequential(outcome: &PackageOutcome, key: RepresentationKey) {
    let rep = outcome.manifest.representation(key).unwrap();
    let segments = rep.segments();
    for (i, segment) in segments.iter().enumerate() {
        assert_eq!(segment.number, i as u32 + 1);
    }
    let sum: f64 = segments.iter().map(|s| s.duration).sum();
    assert!((sum - rep.total_duration()).abs() < 1e-9);
}

#[tokio::test]
async fn test_video_and_audio() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = package(config(dir.path()), av_inputs()).await;

    let report = &outcome.report;
    assert!(report.is_success());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.representations.len(), 2);
    for rep in &report.representations {
        assert_eq!(rep.segments, 5, "{}", rep.key);
        assert!((rep.total_duration - 10.0).abs() < 1e-9);
        assert_eq!(rep.stats.deferred_cuts, 0);
    }
    assert_eq!(report.representations[0].stats.packets, 250);
    assert_eq!(report.representations[1].stats.packets, 500);
    assert_sequential(&outcome, VIDEO);
    assert_sequential(&outcome, AUDIO);

    let period = &outcome.manifest.periods[0];
    assert_eq!(period.adaptation_sets.len(), 2);
    assert_eq!(period.adaptation_sets[0].kind, MediaKind::Video);
    assert_eq!(period.adaptation_sets[1].kind, MediaKind::Audio);
    assert!(period.adaptation_sets.iter().all(|a| a.representations.len() == 1));

    let written = std::fs::read_to_string(dir.path().join("manifest.mpd")).unwrap();
    assert_eq!(written, outcome.document);
    assert!(written.contains(r#"mediaPresentationDuration="PT10S""#));
    assert!(written.contains(r#"minBufferTime="PT4S""#));
    assert!(written.contains(r#"codecs="avc1.64001f""#));
    assert!(written.contains(r#"codecs="mp4a.40.2""#));
    assert!(written.contains(r#"media="0/$RepresentationID$/seg-$Number$.m4s""#));
    assert!(written.contains(r#"duration="2000""#));

    for file in ["0/0/init.mp4", "0/0/seg-1.m4s", "0/0/seg-5.m4s", "1/0/init.mp4", "1/0/seg-5.m4s"] {
        assert!(dir.path().join(file).exists(), "{} missing", file);
    }
    assert!(!dir.path().join("0/0/seg-6.m4s").exists());
}

#[tokio::test]
async fn test_writer_failure_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let outcome = Packager::new(config(dir.path()))
        .run(av_inputs(), |stream: &InputStream| {
            let fail_on = if stream.kind == MediaKind::Audio { 3 } else { 0 };
            Ok(FailingWriter::new(FragmentedMp4Writer::new(&root), fail_on))
        })
        .await
        .unwrap();

    let report = &outcome.report;
    assert!(!report.is_success());
    assert_eq!(report.exit_code(), 1);

    let video = &report.representations[0];
    assert_eq!(video.key, VIDEO);
    assert!(video.is_success());
    assert_eq!(video.segments, 5);

    let audio = &report.representations[1];
    assert_eq!(audio.key, AUDIO);
    assert_eq!(audio.segments, 2);
    assert!(audio.error.as_deref().unwrap().contains("no space left"));
    assert_sequential(&outcome, AUDIO);

    // The partial manifest is still written
    let written = std::fs::read_to_string(dir.path().join("manifest.mpd")).unwrap();
    assert!(written.contains(r#"contentType="audio""#));
    assert!(written.contains(r#"mediaPresentationDuration="PT10S""#));
}

#[tokio::test]
async fn test_deferred_cuts_land_on_keyframes() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![input(
        video_stream(0),
        SyntheticSource::new(video_packets(10_000, 3000)),
    )];
    let outcome = package(config(dir.path()), inputs).await;

    let rep = outcome.manifest.representation(VIDEO).unwrap();
    let durations: Vec<f64> = rep.segments().iter().map(|s| s.duration).collect();
    let expected = [3.0, 3.0, 3.0, 1.0];
    assert_eq!(durations.len(), expected.len());
    for (got, want) in durations.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "{:?}", durations);
    }
    assert_eq!(outcome.report.representations[0].stats.deferred_cuts, 3);
    assert!(outcome.document.contains(r#"maxSegmentDuration="PT3S""#));
}

#[tokio::test]
async fn test_single_file_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.layout.single_file = true;
    let outcome = package(config, av_inputs()).await;
    assert!(outcome.report.is_success());

    let rep = outcome.manifest.representation(VIDEO).unwrap();
    let init = rep.initialization().unwrap();
    assert_eq!(init.file, "0/0/stream.mp4");
    let segments = rep.segments();
    assert_eq!(segments.len(), 5);
    assert_eq!(segments[0].offset, init.size);
    for pair in segments.windows(2) {
        assert_eq!(pair[1].offset, pair[0].offset + pair[0].size);
    }
    let last = segments.last().unwrap();
    let file = std::fs::metadata(dir.path().join("0/0/stream.mp4")).unwrap();
    assert_eq!(file.len(), last.offset + last.size);

    let doc = &outcome.document;
    assert!(doc.contains("urn:mpeg:dash:profile:full:2011"));
    assert!(doc.contains("<BaseURL>0/0/stream.mp4</BaseURL>"));
    assert!(doc.contains("<SegmentList"));
    assert!(doc.contains(&format!(r#"range="0-{}""#, init.size - 1)));
    assert!(!doc.contains("SegmentTemplate"));
}

#[tokio::test]
async fn test_segment_timeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.layout.segment_timeline = true;
    let outcome = package(config, av_inputs()).await;

    let doc = &outcome.document;
    assert!(doc.contains("<SegmentTimeline>"));
    assert!(doc.contains(r#"t="0" d="2000" r="4""#));
    assert!(doc.contains("urn:mpeg:dash:profile:isoff-live:2011"));
}

#[tokio::test]
async fn test_stalled_source_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.pipeline.read_timeout_ms = 200;
    let inputs = vec![
        input(
            video_stream(0),
            StallingSource::new(video_packets(3000, 2000), Duration::from_secs(1)),
        ),
        input(audio_stream(1), SyntheticSource::new(audio_packets(10_000))),
    ];
    let outcome = package(config, inputs).await;

    let video = &outcome.report.representations[0];
    assert_eq!(video.segments, 1);
    assert!(video.error.as_deref().unwrap().contains("200 ms"));
    let audio = &outcome.report.representations[1];
    assert!(audio.is_success());
    assert_eq!(audio.segments, 5);
    assert_eq!(outcome.report.exit_code(), 1);
}

#[tokio::test]
async fn test_source_error_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        input(video_stream(0), SyntheticSource::new(video_packets(10_000, 2000))),
        input(audio_stream(1), BrokenSource::new(audio_packets(5000))),
    ];
    let outcome = package(config(dir.path()), inputs).await;

    assert!(outcome.report.representations[0].is_success());
    let audio = &outcome.report.representations[1];
    assert_eq!(audio.segments, 2);
    assert!(audio.error.as_deref().unwrap().contains("truncated input"));
}

#[tokio::test]
async fn test_reader_panic_fails_representation() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = vec![
        input(video_stream(0), PanickingSource::new(video_packets(4000, 2000))),
        input(audio_stream(1), SyntheticSource::new(audio_packets(10_000))),
    ];
    let outcome = package(config(dir.path()), inputs).await;

    let video = &outcome.report.representations[0];
    assert!(!video.is_success());
    assert!(video.error.as_deref().unwrap().contains("corrupt sample table"));
    // the open segment is dropped, not flushed as if the stream had ended
    assert_eq!(video.segments, 1);
    assert!(outcome.report.representations[1].is_success());
    assert_eq!(outcome.report.exit_code(), 1);
}

#[tokio::test]
async fn test_container_writes_stay_off_the_runtime_thread() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let threads = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&threads);
    let outcome = Packager::new(config(dir.path()))
        .run(av_inputs(), move |_| {
            Ok(ThreadRecordingWriter::new(
                FragmentedMp4Writer::new(&root),
                Arc::clone(&recorded),
            ))
        })
        .await
        .unwrap();
    assert!(outcome.report.is_success());

    // the test runtime is single threaded: every task runs on this thread
    let runtime_thread = std::thread::current().id();
    let threads = threads.lock();
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|id| *id != runtime_thread));
}

#[tokio::test]
async fn test_classification_failure_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken = video_stream(0);
    broken.params.extradata = bytes::Bytes::new();
    let inputs = vec![
        input(broken, SyntheticSource::new(video_packets(4000, 2000))),
        input(audio_stream(1), SyntheticSource::new(audio_packets(4000))),
    ];
    let root = dir.path().to_path_buf();
    let result = Packager::new(config(dir.path()))
        .run(inputs, |_| Ok(FragmentedMp4Writer::new(&root)))
        .await;

    assert!(matches!(
        result,
        Err(PackagerError::Classification(
            ClassificationError::CodecParameters { .. }
        ))
    ));
    assert!(!dir.path().join("manifest.mpd").exists());
    assert!(!dir.path().join("1/0/init.mp4").exists());
}

#[tokio::test]
async fn test_mp4_file_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.mp4");
    std::fs::write(&path, mp4_file(10_000, 2000)).unwrap();

    let out = dir.path().join("out");
    let outcome = Packager::new(config(&out))
        .run_files(&[InputSpec::new(&path)])
        .await
        .unwrap();

    let report = &outcome.report;
    assert!(report.is_success());
    assert_eq!(report.representations.len(), 2);
    let video = &report.representations[0];
    assert_eq!(video.kind, MediaKind::Video);
    assert_eq!(video.codecs, "avc1.64001f");
    assert_eq!(video.segments, 5);
    let audio = &report.representations[1];
    assert_eq!(audio.codecs, "mp4a.40.2");
    assert_eq!(audio.segments, 5);
    assert!((audio.total_duration - 10.0).abs() < 0.05);

    assert!(out.join("manifest.mpd").exists());
    assert!(out.join("1/0/seg-5.m4s").exists());
}
