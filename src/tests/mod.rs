//! Integration testing module
//!
//! End-to-end runs of the packager over synthetic packet sources:
//! - Segmentation and manifest output for video and audio
//! - Addressing modes
//! - Failure isolation between representations

pub mod e2e;
