//! Output file naming
//!
//! Every representation gets its own directory `<adaptation set>/<representation>`
//! so that init segments never collide. Paths are relative to the output
//! directory, which is also where the manifest lives.

use crate::config::LayoutConfig;
use crate::media::RepresentationKey;

/// `$RepresentationID$` placeholder of a SegmentTemplate
pub const REPRESENTATION_ID: &str = "$RepresentationID$";

/// `$Number$` placeholder of a SegmentTemplate
pub const NUMBER: &str = "$Number$";

/// Derives segment file names for a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentNaming {
    single_file: bool,
    init_name: String,
    prefix: String,
    extension: String,
    single_file_name: String,
}

impl Default for SegmentNaming {
    fn default() -> Self {
        Self::from_layout(&LayoutConfig::default())
    }
}

impl SegmentNaming {
    pub fn from_layout(layout: &LayoutConfig) -> Self {
        Self {
            single_file: layout.single_file,
            init_name: layout.init_name.clone(),
            prefix: layout.segment_prefix.clone(),
            extension: layout.segment_extension.clone(),
            single_file_name: layout.single_file_name.clone(),
        }
    }

    pub fn is_single_file(&self) -> bool {
        self.single_file
    }

    fn directory(key: RepresentationKey) -> String {
        format!("{}/{}", key.adaptation_set_id, key.representation_id)
    }

    /// Initialization segment path of a representation
    pub fn init_file(&self, key: RepresentationKey) -> String {
        if self.single_file {
            return self.single_file_path(key);
        }
        format!("{}/{}", Self::directory(key), self.init_name)
    }

    /// Path of media segment `number` (1-based)
    pub fn media_file(&self, key: RepresentationKey, number: u32) -> String {
        if self.single_file {
            return self.single_file_path(key);
        }
        format!(
            "{}/{}-{}.{}",
            Self::directory(key),
            self.prefix,
            number,
            self.extension
        )
    }

    /// The one file holding everything in single-file mode
    pub fn single_file_path(&self, key: RepresentationKey) -> String {
        format!("{}/{}", Self::directory(key), self.single_file_name)
    }

    /// `initialization` attribute shared by an adaptation set
    pub fn init_template(&self, adaptation_set_id: u32) -> String {
        format!("{}/{}/{}", adaptation_set_id, REPRESENTATION_ID, self.init_name)
    }

    /// `media` attribute shared by an adaptation set
    pub fn media_template(&self, adaptation_set_id: u32) -> String {
        format!(
            "{}/{}/{}-{}.{}",
            adaptation_set_id, REPRESENTATION_ID, self.prefix, NUMBER, self.extension
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: RepresentationKey = RepresentationKey {
        adaptation_set_id: 1,
        representation_id: 2,
    };

    #[test]
    fn test_multi_file_names() {
        let naming = SegmentNaming::default();
        assert_eq!(naming.init_file(KEY), "1/2/init.mp4");
        assert_eq!(naming.media_file(KEY, 1), "1/2/seg-1.m4s");
        assert_eq!(naming.media_file(KEY, 12), "1/2/seg-12.m4s");
    }

    #[test]
    fn test_templates_expand_to_file_names() {
        let naming = SegmentNaming::default();
        let media = naming
            .media_template(1)
            .replace(REPRESENTATION_ID, "2")
            .replace(NUMBER, "7");
        assert_eq!(media, naming.media_file(KEY, 7));
        let init = naming.init_template(1).replace(REPRESENTATION_ID, "2");
        assert_eq!(init, naming.init_file(KEY));
    }

    #[test]
    fn test_single_file_names() {
        let layout = LayoutConfig {
            single_file: true,
            ..LayoutConfig::default()
        };
        let naming = SegmentNaming::from_layout(&layout);
        assert_eq!(naming.init_file(KEY), "1/2/stream.mp4");
        assert_eq!(naming.media_file(KEY, 3), "1/2/stream.mp4");
    }
}
