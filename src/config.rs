//! Packager configuration
//!
//! All settings have defaults; a TOML file may override any subset of them
//! and command line flags override the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PackagerError, Result};

/// Segmentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Target segment duration in milliseconds
    pub target_duration_ms: u64,

    /// A segment that grows to this multiple of the target without meeting
    /// a keyframe fails its representation
    pub keyframe_ceiling_factor: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            target_duration_ms: 4000,
            keyframe_ceiling_factor: 10.0,
        }
    }
}

/// Output layout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Write init and media segments of a representation into one file
    pub single_file: bool,

    /// Address segments with a SegmentTemplate
    pub segment_template: bool,

    /// Address segments with an explicit SegmentTimeline
    pub segment_timeline: bool,

    /// Initialization segment file name
    pub init_name: String,

    /// Media segment file name prefix (`seg` gives `seg-1.m4s`)
    pub segment_prefix: String,

    /// Media segment file extension
    pub segment_extension: String,

    /// File name used in single-file mode
    pub single_file_name: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            single_file: false,
            segment_template: true,
            segment_timeline: false,
            init_name: "init.mp4".to_string(),
            segment_prefix: "seg".to_string(),
            segment_extension: "m4s".to_string(),
            single_file_name: "stream.mp4".to_string(),
        }
    }
}

/// How the presentation duration is derived from the representations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationPolicy {
    /// Total of the first representation of the first adaptation set
    First,
    /// Longest total over all representations
    Max,
}

/// Manifest settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Manifest file name inside the output directory
    pub file_name: String,

    /// Profile URN; derived from the addressing mode when unset
    pub profile: Option<String>,

    pub duration_policy: DurationPolicy,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            file_name: "manifest.mpd".to_string(),
            profile: None,
            duration_policy: DurationPolicy::Max,
        }
    }
}

/// Demuxer backend used for input files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemuxerKind {
    Mp4,
    Ffmpeg,
}

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum wait for one packet before the representation fails
    pub read_timeout_ms: u64,

    /// Packets buffered between a reader and its engine
    pub channel_capacity: usize,

    pub demuxer: DemuxerKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 30_000,
            channel_capacity: 64,
            demuxer: DemuxerKind::Mp4,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Complete packager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    /// Directory receiving the manifest and all segments
    pub output_dir: PathBuf,
    pub segment: SegmentConfig,
    pub layout: LayoutConfig,
    pub manifest: ManifestConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            segment: SegmentConfig::default(),
            layout: LayoutConfig::default(),
            manifest: ManifestConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PackagerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| {
            PackagerError::Config(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| PackagerError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Minimum buffer time, twice the target segment duration
    pub fn min_buffer_ms(&self) -> u64 {
        self.segment.target_duration_ms * 2
    }

    /// Deferred cuts fail once a segment reaches this length
    pub fn keyframe_ceiling_ms(&self) -> u64 {
        (self.segment.target_duration_ms as f64 * self.segment.keyframe_ceiling_factor) as u64
    }

    /// Path of the manifest file
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(&self.manifest.file_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment.target_duration_ms == 0 {
            return Err(PackagerError::Config(
                "segment duration must be greater than zero".into(),
            ));
        }
        if !(self.segment.keyframe_ceiling_factor >= 1.0) {
            return Err(PackagerError::Config(format!(
                "keyframe ceiling factor must be at least 1, got {}",
                self.segment.keyframe_ceiling_factor
            )));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(PackagerError::Config(
                "channel capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PackagerConfig::default();
        assert_eq!(config.segment.target_duration_ms, 4000);
        assert_eq!(config.min_buffer_ms(), 8000);
        assert_eq!(config.keyframe_ceiling_ms(), 40_000);
        assert!(config.layout.segment_template);
        assert!(!config.layout.single_file);
        assert_eq!(config.manifest.duration_policy, DurationPolicy::Max);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: PackagerConfig = toml::from_str(
            r#"
            output_dir = "/tmp/out"

            [segment]
            target_duration_ms = 2000

            [layout]
            single_file = true

            [manifest]
            duration_policy = "first"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.segment.target_duration_ms, 2000);
        assert_eq!(config.segment.keyframe_ceiling_factor, 10.0);
        assert!(config.layout.single_file);
        assert_eq!(config.layout.init_name, "init.mp4");
        assert_eq!(config.manifest.duration_policy, DurationPolicy::First);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.min_buffer_ms(), 4000);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packager.toml");
        let mut config = PackagerConfig::default();
        config.segment.target_duration_ms = 6000;
        config.pipeline.demuxer = DemuxerKind::Ffmpeg;
        config.to_file(&path).unwrap();

        let loaded = PackagerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.segment.target_duration_ms, 6000);
        assert_eq!(loaded.pipeline.demuxer, DemuxerKind::Ffmpeg);
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let mut config = PackagerConfig::default();
        config.segment.target_duration_ms = 0;
        assert!(matches!(config.validate(), Err(PackagerError::Config(_))));

        let mut config = PackagerConfig::default();
        config.segment.keyframe_ceiling_factor = 0.5;
        assert!(config.validate().is_err());
    }
}
