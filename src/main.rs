#![allow(dead_code)]

//! framefeed - multichannel block streamer
//!
//! Streams an audio file (or the built-in channel test tone when no file is
//! given) through a bounded block queue to the default output device.
//!
//! Usage: `framefeed [FILE] [--loop]`

use std::time::Duration;

mod audio;
mod output;

use audio::{AudioProducer, EngineConfig, EngineEvent};
use output::BlockOutput;

fn main() {
    env_logger::init();
    log::info!("Starting framefeed");

    let path = std::env::args()
        .nth(1)
        .filter(|a| a != "--loop")
        .unwrap_or_default();
    let loop_enabled = std::env::args().any(|a| a == "--loop");

    let (mut producer, events) = AudioProducer::new(EngineConfig::default());
    producer.load_source(&path);
    producer.set_loop_enabled(loop_enabled);
    producer.start();

    let _output = BlockOutput::start(producer.consumer_handle());

    // Run until the stream reports completion. With looping enabled that
    // never happens; interrupt to quit.
    loop {
        match events.recv() {
            Ok(EngineEvent::StreamDone) => {
                log::info!("Stream finished");
                break;
            }
            Ok(EngineEvent::Warning(message)) => log::warn!("{message}"),
            Err(_) => break,
        }
    }

    // Let the device drain what is still queued before tearing down.
    std::thread::sleep(Duration::from_millis(200));
    producer.stop();
}
