//! Audio engine - block buffering, signal sources and the producer loop
//!
//! This module provides:
//! - Bounded blocking ring of frame blocks
//! - Stateless test-tone generators
//! - Frame-addressable file decoding
//! - The producer state machine and its control surface

mod buffer;
mod file;
mod producer;
mod signal;

pub use buffer::{BlockRing, FrameBlock};
pub use file::{FileFrameSource, FrameSource, SourceError, SourceInfo};
pub use producer::{
    AudioProducer, ConsumerHandle, EngineConfig, EngineEvent, Mode, SampleRateVariant,
};
