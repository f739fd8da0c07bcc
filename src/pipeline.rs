//! Packaging pipeline
//!
//! Runs in three phases: every input stream is classified into the manifest
//! skeleton, one segmentation engine per representation consumes its packets
//! concurrently, and the finished manifest is serialized once every engine
//! has stopped. A representation that fails keeps the segments it produced
//! and does not stop the others.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::PackagerConfig;
use crate::error::{PackagerError, Result};
use crate::index::StreamClassifier;
use crate::manifest::{render, Manifest};
use crate::media::{InputStream, MediaKind, Packet, RepresentationKey};
use crate::segment::{
    ContainerWriter, EngineSettings, EngineStats, FragmentedMp4Writer, SegmentationEngine,
    TrackConfig,
};
use crate::source::{open_inputs, InputSpec, PacketSource, StreamInput};

/// Result of one representation
#[derive(Debug, Clone, Serialize)]
pub struct RepresentationReport {
    pub key: RepresentationKey,
    pub kind: MediaKind,
    pub source: String,
    pub codecs: String,
    pub segments: usize,
    /// Seconds
    pub total_duration: f64,
    pub stats: EngineStats,
    pub error: Option<String>,
}

impl RepresentationReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a packaging run
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub manifest_path: PathBuf,
    /// Seconds
    pub presentation_duration: f64,
    pub representations: Vec<RepresentationReport>,
}

impl PackageReport {
    pub fn is_success(&self) -> bool {
        self.representations.iter().all(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RepresentationReport> {
        self.representations.iter().filter(|r| !r.is_success())
    }

    /// Process exit status for the run
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PackagerError::Manifest(e.to_string()))
    }
}

/// Everything a run produced
#[derive(Debug)]
pub struct PackageOutcome {
    pub manifest: Arc<Manifest>,
    /// The serialized MPD, as written to `report.manifest_path`
    pub document: String,
    pub report: PackageReport,
}

struct EngineResult {
    stats: EngineStats,
    error: Option<String>,
}

/// Drives classification, segmentation and serialization
#[derive(Debug)]
pub struct Packager {
    config: PackagerConfig,
    classifier: StreamClassifier,
}

impl Packager {
    pub fn new(config: PackagerConfig) -> Self {
        Self::with_classifier(config, StreamClassifier::new())
    }

    pub fn with_classifier(config: PackagerConfig, classifier: StreamClassifier) -> Self {
        Self { config, classifier }
    }

    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    /// Package files into fragmented MP4 below the configured output directory
    pub async fn run_files(&self, specs: &[InputSpec]) -> Result<PackageOutcome> {
        let owned = specs.to_vec();
        let demuxer = self.config.pipeline.demuxer;
        let inputs = tokio::task::spawn_blocking(move || open_inputs(&owned, demuxer))
            .await
            .map_err(|e| PackagerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let root = self.config.output_dir.clone();
        self.run(inputs, |_| Ok(FragmentedMp4Writer::new(&root))).await
    }

    /// Package already opened inputs. `make_writer` supplies the container
    /// writer of each representation; a writer that cannot be created fails
    /// only that representation.
    pub async fn run<W, F>(&self, inputs: Vec<StreamInput>, mut make_writer: F) -> Result<PackageOutcome>
    where
        W: ContainerWriter + 'static,
        W::Handle: 'static,
        F: FnMut(&InputStream) -> Result<W>,
    {
        self.config.validate()?;

        let (mut streams, sources): (Vec<InputStream>, Vec<Box<dyn PacketSource>>) = inputs
            .into_iter()
            .map(|input| (input.stream, input.source))
            .unzip();

        info!("Classifying {} input stream(s)", streams.len());
        let manifest = Arc::new(self.classifier.classify(&mut streams, &self.config)?);

        let settings = EngineSettings::from_config(&self.config);
        let read_timeout = Duration::from_millis(self.config.pipeline.read_timeout_ms);
        let capacity = self.config.pipeline.channel_capacity;

        let mut results = HashMap::new();
        let mut tasks = Vec::new();
        for (stream, source) in streams.into_iter().zip(sources) {
            let Some(key) = stream.key() else {
                debug!("Ignoring {} ({:?})", stream.label(), stream.kind);
                continue;
            };
            let track = TrackConfig::from_stream(&stream, key, &settings.naming);
            let engine = make_writer(&stream).and_then(|writer| {
                SegmentationEngine::new(&track, writer, Arc::clone(&manifest), settings.clone())
            });
            match engine {
                Ok(engine) => {
                    debug!("[{}] starting engine for {}", key, stream.label());
                    let task = tokio::spawn(drive(engine, source, capacity, read_timeout));
                    tasks.push((key, task));
                }
                Err(e) => {
                    error!("[{}] cannot start {}: {}", key, stream.label(), e);
                    results.insert(
                        key,
                        EngineResult {
                            stats: EngineStats::default(),
                            error: Some(e.to_string()),
                        },
                    );
                }
            }
        }

        info!("Segmenting {} representation(s)", tasks.len());
        for (key, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!("[{}] engine task failed: {}", key, e);
                    EngineResult {
                        stats: EngineStats::default(),
                        error: Some(format!("engine task failed: {}", e)),
                    }
                }
            };
            results.insert(key, result);
        }

        let document = render(&manifest)?;
        let manifest_path = self.config.manifest_path();
        std::fs::create_dir_all(&self.config.output_dir)?;
        std::fs::write(&manifest_path, &document)?;
        info!("Wrote {}", manifest_path.display());

        let representations = manifest
            .representations()
            .map(|(key, representation)| {
                let result = results.remove(&key);
                RepresentationReport {
                    key,
                    kind: representation.kind,
                    source: representation.source.clone(),
                    codecs: representation.codecs.clone(),
                    segments: representation.segment_count(),
                    total_duration: representation.total_duration(),
                    stats: result.as_ref().map(|r| r.stats).unwrap_or_default(),
                    error: result.and_then(|r| r.error),
                }
            })
            .collect();

        let report = PackageReport {
            manifest_path,
            presentation_duration: manifest.presentation_duration(),
            representations,
        };
        for failed in report.failed() {
            warn!(
                "[{}] incomplete after {} segment(s): {}",
                failed.key,
                failed.segments,
                failed.error.as_deref().unwrap_or("unknown error")
            );
        }

        Ok(PackageOutcome {
            manifest,
            document,
            report,
        })
    }
}

type Engine<W> = SegmentationEngine<W, Arc<Manifest>>;

/// Upper bound on packets handed to one blocking engine call
const MAX_BATCH: usize = 256;

/// What the reader sends: a packet, `Ok(None)` once the source is exhausted,
/// or the error that stopped it
type ReadItem = Result<Option<Packet>>;

/// Feed one engine from its source until end of stream or the first error.
/// Container writes block, so the engine only ever runs on the blocking pool.
async fn drive<W: ContainerWriter + 'static>(
    engine: Engine<W>,
    source: Box<dyn PacketSource>,
    capacity: usize,
    read_timeout: Duration,
) -> EngineResult {
    let key = engine.key();
    let (tx, rx) = mpsc::channel(capacity);
    let mut reader = tokio::task::spawn_blocking(move || read_packets(source, tx));
    let mut feed = PacketFeed {
        rx,
        pending: None,
        read_timeout,
    };

    let mut engine = engine;
    let outcome = loop {
        let step = feed.next().await;
        let (returned, result, done) = match step {
            Step::Packets(batch) => {
                let (engine, result) = on_engine(engine, move |engine| {
                    batch.iter().try_for_each(|packet| engine.handle_packet(packet))
                })
                .await;
                (engine, result, false)
            }
            Step::End => {
                let (engine, result) = on_engine(engine, |engine| engine.finalize()).await;
                (engine, result, true)
            }
            Step::Failed(e) => (Some(engine), Err(e), true),
            Step::Closed => (Some(engine), Err(reader_failure(&mut reader).await), true),
        };
        let Some(returned) = returned else {
            break EngineResult {
                stats: EngineStats::default(),
                error: result.err().map(|e| e.to_string()),
            };
        };
        engine = returned;
        if let Err(e) = result {
            error!("[{}] representation failed: {}", key, e);
            let (engine, _) = on_engine(engine, |engine| {
                engine.abort();
                Ok(())
            })
            .await;
            break EngineResult {
                stats: engine.map(|engine| engine.stats()).unwrap_or_default(),
                error: Some(e.to_string()),
            };
        }
        if done {
            break EngineResult {
                stats: engine.stats(),
                error: None,
            };
        }
    };
    // A stalled reader is not awaited. It stops at its next send once the
    // receiver is gone.
    drop(feed);
    outcome
}

/// Run `f` against the engine on the blocking pool. The engine is lost only
/// when `f` panics.
async fn on_engine<W, F>(mut engine: Engine<W>, f: F) -> (Option<Engine<W>>, Result<()>)
where
    W: ContainerWriter + 'static,
    F: FnOnce(&mut Engine<W>) -> Result<()> + Send + 'static,
{
    let key = engine.key();
    let task = tokio::task::spawn_blocking(move || {
        let result = f(&mut engine);
        (engine, result)
    });
    match task.await {
        Ok((engine, result)) => (Some(engine), result),
        Err(e) => {
            error!("[{}] engine panicked: {}", key, e);
            (
                None,
                Err(PackagerError::Container(format!("engine task failed: {}", e))),
            )
        }
    }
}

/// Why the reader hung up without reporting the end of its stream
async fn reader_failure(reader: &mut tokio::task::JoinHandle<()>) -> PackagerError {
    match reader.await {
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            PackagerError::Container(format!("packet reader panicked: {}", message))
        }
        Err(e) => PackagerError::Container(format!("packet reader failed: {}", e)),
        Ok(()) => PackagerError::Container("packet reader stopped before end of stream".into()),
    }
}

enum Step {
    Packets(Vec<Packet>),
    End,
    Failed(PackagerError),
    /// The channel closed without an end-of-stream item
    Closed,
}

struct PacketFeed {
    rx: mpsc::Receiver<ReadItem>,
    /// Item that ended the previous batch
    pending: Option<ReadItem>,
    read_timeout: Duration,
}

impl PacketFeed {
    /// Wait for the next item, then take whatever else is already queued
    async fn next(&mut self) -> Step {
        let first = match self.pending.take() {
            Some(item) => item,
            None => match tokio::time::timeout(self.read_timeout, self.rx.recv()).await {
                Ok(Some(item)) => item,
                Ok(None) => return Step::Closed,
                Err(_) => {
                    return Step::Failed(PackagerError::ReadTimeout(
                        self.read_timeout.as_millis() as u64,
                    ))
                }
            },
        };
        let mut batch = match first {
            Ok(Some(packet)) => vec![packet],
            Ok(None) => return Step::End,
            Err(e) => return Step::Failed(e),
        };
        while batch.len() < MAX_BATCH {
            match self.rx.try_recv() {
                Ok(Ok(Some(packet))) => batch.push(packet),
                Ok(item) => {
                    self.pending = Some(item);
                    break;
                }
                Err(_) => break,
            }
        }
        Step::Packets(batch)
    }
}

/// Blocking reader loop. The last item sent is either the end-of-stream
/// marker or the error that stopped the source.
fn read_packets(mut source: Box<dyn PacketSource>, tx: mpsc::Sender<ReadItem>) {
    loop {
        let item = source.next_packet();
        let last = !matches!(item, Ok(Some(_)));
        if tx.blocking_send(item).is_err() || last {
            return;
        }
    }
}
