//! Stream classification
//!
//! - Assignment of input streams to adaptation sets and representations
//! - Codec identifier derivation, pluggable per codec family

pub mod classifier;
pub mod codec;

pub use classifier::StreamClassifier;
pub use codec::{CodecStringRegistry, CodecStringRule};
