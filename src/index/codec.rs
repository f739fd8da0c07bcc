//! RFC 6381 codec identifiers
//!
//! Derives the `codecs` attribute of a Representation from the container
//! codec tag and the decoder configuration record. Each codec family has its
//! own rule; callers can register additional rules on the registry.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use crate::error::CodecRuleError;
use crate::media::{CodecParameters, FourCc};

/// Derives a codec identifier for one codec family
pub trait CodecStringRule: Send + Sync {
    fn codec_string(&self, params: &CodecParameters) -> Result<String, CodecRuleError>;
}

/// AVC: `avc1.PPCCLL` from bytes 1..4 of the avcC record
#[derive(Debug, Default, Clone, Copy)]
pub struct AvcRule;

impl CodecStringRule for AvcRule {
    fn codec_string(&self, params: &CodecParameters) -> Result<String, CodecRuleError> {
        let extradata = &params.extradata;
        if extradata.is_empty() {
            return Err(CodecRuleError::MissingExtradata(params.codec_tag.to_string()));
        }
        if extradata.len() < 4 {
            return Err(CodecRuleError::TruncatedExtradata {
                len: extradata.len(),
                need: 4,
            });
        }
        Ok(format!(
            "{}.{:02x}{:02x}{:02x}",
            params.codec_tag, extradata[1], extradata[2], extradata[3]
        ))
    }
}

/// HEVC: `hvc1.<space><profile>.<compat>.<tier><level>[.<constraint>...]`
#[derive(Debug, Default, Clone, Copy)]
pub struct HevcRule;

/// hvcC bytes up to and including general_level_idc
const HVCC_MIN_LEN: usize = 13;

impl CodecStringRule for HevcRule {
    fn codec_string(&self, params: &CodecParameters) -> Result<String, CodecRuleError> {
        let hvcc = &params.extradata;
        if hvcc.is_empty() {
            return Err(CodecRuleError::MissingExtradata(params.codec_tag.to_string()));
        }
        if hvcc.len() < HVCC_MIN_LEN {
            return Err(CodecRuleError::TruncatedExtradata {
                len: hvcc.len(),
                need: HVCC_MIN_LEN,
            });
        }
        if hvcc[0] != 1 {
            return Err(CodecRuleError::Malformed(format!(
                "hvcC configuration version {}",
                hvcc[0]
            )));
        }

        let profile_space = hvcc[1] >> 6;
        let tier_flag = (hvcc[1] >> 5) & 0x01;
        let profile_idc = hvcc[1] & 0x1f;
        let compat = u32::from_be_bytes([hvcc[2], hvcc[3], hvcc[4], hvcc[5]]).reverse_bits();
        let constraints = &hvcc[6..12];
        let level_idc = hvcc[12];

        let mut out = params.codec_tag.to_string();
        out.push('.');
        match profile_space {
            1 => out.push('A'),
            2 => out.push('B'),
            3 => out.push('C'),
            _ => {}
        }
        let _ = write!(out, "{}.{:X}", profile_idc, compat);
        out.push('.');
        out.push(if tier_flag == 1 { 'H' } else { 'L' });
        let _ = write!(out, "{}", level_idc);

        let significant = constraints
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        for b in &constraints[..significant] {
            let _ = write!(out, ".{:X}", b);
        }
        Ok(out)
    }
}

/// AAC: `mp4a.40.<audio object type>` from the AudioSpecificConfig
#[derive(Debug, Default, Clone, Copy)]
pub struct AacRule;

impl AacRule {
    /// Audio object type, honoring the escape value 31
    pub fn audio_object_type(asc: &[u8]) -> Result<u8, CodecRuleError> {
        let first = *asc.first().ok_or_else(|| CodecRuleError::MissingExtradata("mp4a".into()))?;
        let aot = first >> 3;
        if aot != 31 {
            return Ok(aot);
        }
        let second = *asc.get(1).ok_or(CodecRuleError::TruncatedExtradata {
            len: asc.len(),
            need: 2,
        })?;
        let ext = ((first & 0x07) << 3) | (second >> 5);
        Ok(32 + ext)
    }
}

impl CodecStringRule for AacRule {
    fn codec_string(&self, params: &CodecParameters) -> Result<String, CodecRuleError> {
        let aot = Self::audio_object_type(&params.extradata)?;
        if aot == 0 {
            return Err(CodecRuleError::Malformed("audio object type 0".into()));
        }
        Ok(format!("mp4a.40.{}", aot))
    }
}

/// Codecs identified by their bare tag
#[derive(Debug, Clone)]
pub struct PlainTagRule(pub &'static str);

impl CodecStringRule for PlainTagRule {
    fn codec_string(&self, _params: &CodecParameters) -> Result<String, CodecRuleError> {
        Ok(self.0.to_string())
    }
}

/// Codec identifier rules keyed by container tag
#[derive(Clone)]
pub struct CodecStringRegistry {
    rules: HashMap<FourCc, Arc<dyn CodecStringRule>>,
}

impl Default for CodecStringRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(FourCc(*b"avc1"), AvcRule);
        registry.register(FourCc(*b"avc3"), AvcRule);
        registry.register(FourCc(*b"hvc1"), HevcRule);
        registry.register(FourCc(*b"hev1"), HevcRule);
        registry.register(FourCc(*b"mp4a"), AacRule);
        registry.register(FourCc(*b"ac-3"), PlainTagRule("ac-3"));
        registry.register(FourCc(*b"ec-3"), PlainTagRule("ec-3"));
        registry.register(FourCc(*b"Opus"), PlainTagRule("Opus"));
        registry.register(FourCc(*b"fLaC"), PlainTagRule("fLaC"));
        registry
    }
}

impl CodecStringRegistry {
    /// A registry with no rules
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Register (or replace) the rule for a codec tag
    pub fn register<R: CodecStringRule + 'static>(&mut self, tag: FourCc, rule: R) {
        self.rules.insert(tag, Arc::new(rule));
    }

    pub fn supports(&self, tag: FourCc) -> bool {
        self.rules.contains_key(&tag)
    }

    /// `None` when no rule exists for the tag
    pub fn codec_string(&self, params: &CodecParameters) -> Option<Result<String, CodecRuleError>> {
        self.rules
            .get(&params.codec_tag)
            .map(|rule| rule.codec_string(params))
    }
}

impl std::fmt::Debug for CodecStringRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<String> = self.rules.keys().map(|t| t.to_string()).collect();
        tags.sort();
        f.debug_struct("CodecStringRegistry").field("tags", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Rational;
    use bytes::Bytes;

    fn params(tag: &[u8; 4], extradata: &[u8]) -> CodecParameters {
        let mut p = CodecParameters::new(FourCc(*tag), Rational::new(1, 90000));
        p.extradata = Bytes::copy_from_slice(extradata);
        p
    }

    #[test]
    fn test_avc_codec_string() {
        let registry = CodecStringRegistry::default();
        let tag = FourCc::from_le_u32(u32::from_le_bytes(*b"avc1"));
        let mut p = params(b"avc1", &[0x01, 0x64, 0x00, 0x1f, 0xff]);
        p.codec_tag = tag;
        assert_eq!(registry.codec_string(&p).unwrap().unwrap(), "avc1.64001f");
    }

    #[test]
    fn test_avc_baseline() {
        let p = params(b"avc1", &[0x01, 0x42, 0xc0, 0x1e]);
        assert_eq!(AvcRule.codec_string(&p).unwrap(), "avc1.42c01e");
    }

    #[test]
    fn test_avc_missing_extradata() {
        let p = params(b"avc1", &[]);
        assert_eq!(
            AvcRule.codec_string(&p),
            Err(CodecRuleError::MissingExtradata("avc1".into()))
        );
        let p = params(b"avc1", &[0x01, 0x64]);
        assert_eq!(
            AvcRule.codec_string(&p),
            Err(CodecRuleError::TruncatedExtradata { len: 2, need: 4 })
        );
    }

    #[test]
    fn test_hevc_main_profile() {
        // configurationVersion=1, profile_space=0, tier=0, profile_idc=1,
        // compat flags 0x60000000, constraint 0x90 0 0 0 0 0, level 93
        let hvcc = [
            0x01, 0x01, 0x60, 0x00, 0x00, 0x00, 0x90, 0x00, 0x00, 0x00, 0x00, 0x00, 93, 0xf0,
        ];
        let p = params(b"hvc1", &hvcc);
        assert_eq!(HevcRule.codec_string(&p).unwrap(), "hvc1.1.6.L93.90");
    }

    #[test]
    fn test_hevc_main10_high_tier() {
        let hvcc = [
            0x01, 0x22, 0x20, 0x00, 0x00, 0x00, 0xb0, 0x00, 0x00, 0x00, 0x00, 0x00, 120,
        ];
        let p = params(b"hev1", &hvcc);
        assert_eq!(HevcRule.codec_string(&p).unwrap(), "hev1.2.4.H120.B0");
    }

    #[test]
    fn test_aac_lc() {
        // AAC-LC, 48 kHz, stereo
        let p = params(b"mp4a", &[0x11, 0x90]);
        assert_eq!(AacRule.codec_string(&p).unwrap(), "mp4a.40.2");
    }

    #[test]
    fn test_aac_escaped_object_type() {
        // aot 31 escape, extension 3 -> object type 35
        assert_eq!(AacRule::audio_object_type(&[0xf8, 0x60]).unwrap(), 35);
    }

    #[test]
    fn test_unknown_tag_has_no_rule() {
        let registry = CodecStringRegistry::default();
        let p = params(b"vp09", &[1, 2, 3, 4]);
        assert!(registry.codec_string(&p).is_none());
        assert!(!registry.supports(FourCc(*b"vp09")));
    }

    struct FixedRule;

    impl CodecStringRule for FixedRule {
        fn codec_string(&self, _params: &CodecParameters) -> Result<String, CodecRuleError> {
            Ok("vp09.00.10.08".into())
        }
    }

    #[test]
    fn test_register_custom_rule() {
        let mut registry = CodecStringRegistry::default();
        registry.register(FourCc(*b"vp09"), FixedRule);
        let p = params(b"vp09", &[]);
        assert_eq!(registry.codec_string(&p).unwrap().unwrap(), "vp09.00.10.08");
    }
}
