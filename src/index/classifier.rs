//! Stream classifier - places input streams into the manifest skeleton

use tracing::{debug, info};

use crate::config::PackagerConfig;
use crate::error::ClassificationError;
use crate::manifest::{AdaptationSet, Manifest, Period, Representation};
use crate::media::{InputStream, MediaKind, RepresentationKey, StreamAssignment};

use super::codec::CodecStringRegistry;

/// Only one period is produced
const PERIOD_ID: u32 = 0;

/// Assigns streams to adaptation sets and representations
#[derive(Debug, Clone, Default)]
pub struct StreamClassifier {
    codecs: CodecStringRegistry,
}

impl StreamClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(codecs: CodecStringRegistry) -> Self {
        Self { codecs }
    }

    pub fn registry_mut(&mut self) -> &mut CodecStringRegistry {
        &mut self.codecs
    }

    /// Build the manifest skeleton for `streams` and record each stream's
    /// assignment.
    ///
    /// Video gets the first adaptation set when present, audio the next.
    /// Representation ids count from 0 within their adaptation set in input
    /// order. Streams of any other kind are skipped.
    pub fn classify(
        &self,
        streams: &mut [InputStream],
        config: &PackagerConfig,
    ) -> Result<Manifest, ClassificationError> {
        let has = |kind| streams.iter().any(|s| s.kind == kind);
        let kinds: Vec<MediaKind> = [MediaKind::Video, MediaKind::Audio]
            .into_iter()
            .filter(|&k| has(k))
            .collect();
        if kinds.is_empty() {
            return Err(ClassificationError::NoMediaStreams(streams.len()));
        }

        // Resolve every codec identifier before mutating anything
        let mut codecs = Vec::with_capacity(streams.len());
        for stream in streams.iter() {
            if !kinds.contains(&stream.kind) {
                codecs.push(None);
                continue;
            }
            let codec = match self.codecs.codec_string(&stream.params) {
                None => {
                    return Err(ClassificationError::UnsupportedCodec {
                        stream: stream.label(),
                        tag: stream.params.codec_tag.to_string(),
                    })
                }
                Some(Err(source)) => {
                    return Err(ClassificationError::CodecParameters {
                        stream: stream.label(),
                        source,
                    })
                }
                Some(Ok(codec)) => codec,
            };
            codecs.push(Some(codec));
        }

        let mut sets: Vec<AdaptationSet> = kinds
            .iter()
            .enumerate()
            .map(|(id, &kind)| AdaptationSet::new(id as u32, kind))
            .collect();

        for (stream, codec) in streams.iter_mut().zip(codecs) {
            let Some(codec) = codec else {
                info!("Skipping {} stream {}", stream.kind, stream.label());
                continue;
            };
            let Some(set) = sets.iter_mut().find(|s| s.kind == stream.kind) else {
                continue;
            };
            let key = RepresentationKey {
                adaptation_set_id: set.id,
                representation_id: set.representations.len() as u32,
            };
            stream.assign(StreamAssignment {
                period_id: PERIOD_ID,
                key,
            });
            debug!("{} -> {} ({})", stream.label(), key, codec);
            set.representations
                .push(Representation::from_stream(key.representation_id, stream, codec));
        }

        for set in &sets {
            info!(
                "Adaptation set {}: {} with {} representation(s)",
                set.id,
                set.content_type(),
                set.representations.len()
            );
        }

        let mut manifest = Manifest::from_config(config);
        manifest.periods.push(Period {
            id: PERIOD_ID,
            start: 0.0,
            adaptation_sets: sets,
        });
        Ok(manifest)
    }
}
