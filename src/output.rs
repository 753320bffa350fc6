//! Device output
//!
//! Adapts the block queue to a cpal output stream. The callback drains one
//! staging block at a time and emits silence whenever the queue is empty,
//! so the real-time side never blocks on the producer.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::{ConsumerHandle, FrameBlock};

/// Running output stream. Drop to stop.
pub struct BlockOutput {
    _stream: cpal::Stream,
}

impl BlockOutput {
    /// Open the default output device and start draining blocks.
    ///
    /// Returns `None` (with logged warnings) when no usable device exists;
    /// the engine keeps producing either way.
    pub fn start(handle: ConsumerHandle) -> Option<Self> {
        let host = cpal::default_host();
        let device = match host.default_output_device() {
            Some(d) => d,
            None => {
                log::warn!("No output device available");
                return None;
            }
        };

        let config = match device.default_output_config() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to get output config: {}", e);
                return None;
            }
        };

        let device_channels = config.channels() as usize;
        let block_channels = handle.block_channels();
        let frames = handle.frames_per_block();

        let mut staging = FrameBlock::new(block_channels, frames);
        // Staging starts exhausted so the first callback pops immediately.
        let mut offset = frames;

        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(device_channels) {
                    if offset >= frames {
                        if handle.occupancy() == 0 {
                            // Producer fell behind or stopped.
                            frame.fill(0.0);
                            continue;
                        }
                        handle.pop_block(&mut staging);
                        offset = 0;
                    }
                    let samples = staging.as_slice();
                    let start = offset * block_channels;
                    let shared = frame.len().min(block_channels);
                    frame[..shared].copy_from_slice(&samples[start..start + shared]);
                    for ch in frame.iter_mut().skip(shared) {
                        *ch = 0.0;
                    }
                    offset += 1;
                }
            },
            |err| log::error!("Audio output error: {}", err),
            None,
        );

        match stream {
            Ok(s) => {
                if let Err(e) = s.play() {
                    log::warn!("Failed to start output stream: {}", e);
                    return None;
                }
                log::info!("Output stream running ({} channels)", device_channels);
                Some(Self { _stream: s })
            }
            Err(e) => {
                log::warn!("Failed to build output stream: {}", e);
                None
            }
        }
    }
}
