//! Block producer: mode state machine, loop points, control surface
//!
//! [`AudioProducer`] owns the block ring and a worker thread that fills it.
//! Each loop iteration dispatches on the current mode (file / steady tone /
//! per-channel test / exit), produces at most one block, then parks on the
//! ring while it is full. Configuration calls arrive from other threads and
//! mutate the shared [`PlaybackState`] under its mutex; the worker observes
//! them on its next tick.
//!
//! The consumer side gets a [`ConsumerHandle`]: pop one block per call and
//! wake the producer once occupancy drains to the low-water mark.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::buffer::{BlockRing, FrameBlock};
use super::file::{FileFrameSource, FrameSource, SourceInfo};
use super::signal;

/// Default queue depth in blocks.
const QUEUE_BLOCKS: usize = 10;

/// Free slots kept as headroom: the consumer wakes the producer once
/// occupancy falls to `capacity - QUEUE_HEADROOM` or below.
const QUEUE_HEADROOM: usize = 5;

/// Pause after a tick that produced nothing, so an exhausted source does
/// not spin hot while staying responsive to configuration changes.
const IDLE_TICK: Duration = Duration::from_millis(1);

/// Signal source feeding the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Stream the loaded file source.
    FileSource,
    /// Fixed sine on every channel.
    SteadyTone,
    /// Sine on one channel, silence on the rest.
    #[default]
    ChannelTest,
    /// Terminal: stop producing.
    Exit,
}

/// Sample-rate variant for the channel test tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRateVariant {
    Hz44100,
    Hz48000,
}

impl SampleRateVariant {
    fn hz(self) -> u32 {
        match self {
            SampleRateVariant::Hz44100 => 44_100,
            SampleRateVariant::Hz48000 => 48_000,
        }
    }
}

/// Notifications delivered to the controlling caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The loop boundary was crossed without looping enabled.
    StreamDone,
    /// A source failed to open; the engine fell back to the channel test.
    Warning(String),
}

/// Fixed shape of the engine's blocks and queue.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Channel width of every block. Sources may carry fewer channels
    /// (the rest stay silent), never more.
    pub channels: usize,
    pub frames_per_block: usize,
    pub queue_blocks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channels: 8,
            frames_per_block: 512,
            queue_blocks: QUEUE_BLOCKS,
        }
    }
}

/// Mutable playback cursor and loop window, shared between the worker and
/// the configuration setters.
struct PlaybackState {
    mode: Mode,
    /// Read cursor, in frames.
    frame_pos: u64,
    loop_a: u64,
    loop_b: u64,
    total_frames: u64,
    frame_rate: u32,
    /// Channels of the active source (<= block width).
    channel_count: usize,
    loop_enabled: bool,
    test_channel: usize,
    test_delay_secs: u32,
}

impl PlaybackState {
    fn new(channels: usize) -> Self {
        Self {
            mode: Mode::default(),
            frame_pos: 0,
            loop_a: 0,
            loop_b: 0,
            total_frames: 0,
            frame_rate: 44_100,
            channel_count: channels,
            loop_enabled: false,
            test_channel: 0,
            test_delay_secs: 2,
        }
    }

    /// Fold the cursor back into the A/B window.
    ///
    /// Returns true when the B boundary was crossed and the stream should
    /// report completion: always when looping is disabled and, with
    /// `degenerate_check`, also when the reset cursor still sits past B
    /// (B < A). Skipped entirely while the window is unset (`loop_b == 0`).
    fn apply_loop_window(&mut self, degenerate_check: bool) -> bool {
        let mut done = false;
        if self.loop_b > 0 && self.frame_pos >= self.loop_b {
            self.frame_pos = self.loop_a;
            if !self.loop_enabled {
                done = true;
            } else if degenerate_check && self.frame_pos > self.loop_b {
                done = true;
            }
        }
        if self.frame_pos < self.loop_a {
            self.frame_pos = self.loop_a;
        }
        done
    }

    fn percent_to_frame(&self, percent: f64) -> u64 {
        (percent.clamp(0.0, 100.0) / 100.0 * self.total_frames as f64) as u64
    }
}

struct Shared {
    ring: BlockRing,
    state: Mutex<PlaybackState>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    info: Mutex<Option<SourceInfo>>,
    active: AtomicBool,
}

/// Producer engine and control surface.
pub struct AudioProducer {
    shared: Arc<Shared>,
    events: Sender<EngineEvent>,
    worker: Option<JoinHandle<()>>,
}

impl AudioProducer {
    /// Create an engine plus the receiver its events arrive on.
    pub fn new(config: EngineConfig) -> (Self, Receiver<EngineEvent>) {
        let (events, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            ring: BlockRing::new(
                config.queue_blocks,
                config.channels,
                config.frames_per_block,
            ),
            state: Mutex::new(PlaybackState::new(config.channels)),
            source: Mutex::new(None),
            info: Mutex::new(None),
            active: AtomicBool::new(true),
        });
        (
            Self {
                shared,
                events,
                worker: None,
            },
            rx,
        )
    }

    /// Handle for the consuming side (audio callback).
    pub fn consumer_handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Open `path` and switch to file playback.
    ///
    /// An empty path selects the channel test and succeeds; an open failure
    /// selects the channel test, emits a [`EngineEvent::Warning`], and
    /// fails.
    pub fn load_source(&self, path: &str) -> bool {
        if path.is_empty() {
            log::info!("No file given, playing channel test tone");
            self.shared.state.lock().unwrap().mode = Mode::ChannelTest;
            return true;
        }

        match FileFrameSource::open(path, self.shared.ring.channels()) {
            Ok(source) => {
                let info = source.info().clone();
                {
                    let mut st = self.shared.state.lock().unwrap();
                    st.mode = Mode::FileSource;
                    st.channel_count = info.channels;
                    st.total_frames = info.total_frames;
                    st.frame_rate = info.sample_rate;
                    st.loop_a = 0;
                    st.loop_b = info.total_frames;
                }
                *self.shared.source.lock().unwrap() = Some(Box::new(source));
                *self.shared.info.lock().unwrap() = Some(info);
                // Prime a producer that may be parked on a full ring.
                self.shared.ring.notify_space();
                true
            }
            Err(e) => {
                let message = format!(
                    "The audio file {path} could not be loaded: {e}. \
                     Playing the channel test tone instead."
                );
                log::warn!("{message}");
                self.shared.state.lock().unwrap().mode = Mode::ChannelTest;
                let _ = self.events.send(EngineEvent::Warning(message));
                false
            }
        }
    }

    /// Switch to an already-constructed source (synthetic or decoded).
    pub fn install_source(&self, source: Box<dyn FrameSource>) {
        if source.channel_count() > self.shared.ring.channels() {
            log::error!(
                "install_source: source has {} channels, blocks hold {}",
                source.channel_count(),
                self.shared.ring.channels()
            );
            return;
        }
        {
            let mut st = self.shared.state.lock().unwrap();
            st.mode = Mode::FileSource;
            st.channel_count = source.channel_count();
            st.total_frames = source.total_frames();
            st.frame_rate = source.sample_rate();
            st.loop_a = 0;
            st.loop_b = source.total_frames();
        }
        *self.shared.source.lock().unwrap() = Some(source);
        self.shared.ring.notify_space();
    }

    pub fn set_mode(&self, mode: Mode) {
        self.shared.state.lock().unwrap().mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.shared.state.lock().unwrap().mode
    }

    /// Select the test-tone channel, tone length and sample-rate variant.
    pub fn configure_test(&self, channel: usize, delay_secs: u32, rate: SampleRateVariant) {
        let mut st = self.shared.state.lock().unwrap();
        st.test_channel = channel;
        st.test_delay_secs = delay_secs;
        st.frame_rate = rate.hz();
    }

    /// Move the read cursor, `percent` of the total frame count (0-100).
    pub fn set_position(&self, percent: f64) {
        let mut st = self.shared.state.lock().unwrap();
        st.frame_pos = st.percent_to_frame(percent);
        log::debug!("position set to {percent}% (frame {})", st.frame_pos);
    }

    pub fn set_loop_a(&self, percent: f64) {
        let mut st = self.shared.state.lock().unwrap();
        st.loop_a = st.percent_to_frame(percent);
        log::debug!("loop A set to frame {}", st.loop_a);
    }

    pub fn set_loop_b(&self, percent: f64) {
        let mut st = self.shared.state.lock().unwrap();
        st.loop_b = st.percent_to_frame(percent);
        log::debug!("loop B set to frame {}", st.loop_b);
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.shared.state.lock().unwrap().loop_enabled = enabled;
    }

    /// Current cursor as a fraction of the total frame count (0.0-1.0).
    pub fn position_fraction(&self) -> f32 {
        let st = self.shared.state.lock().unwrap();
        if st.total_frames == 0 {
            return 0.0;
        }
        st.frame_pos as f32 / st.total_frames as f32
    }

    /// Current cursor in seconds.
    pub fn position_seconds(&self) -> f64 {
        let st = self.shared.state.lock().unwrap();
        st.frame_pos as f64 / st.frame_rate as f64
    }

    /// Metadata of the loaded file source, if any.
    pub fn source_info(&self) -> Option<SourceInfo> {
        self.shared.info.lock().unwrap().clone()
    }

    /// Spawn the producer thread. A second call is a no-op.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        self.shared.active.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let handle = thread::Builder::new()
            .name("audio-producer".into())
            .spawn(move || Worker::new(shared, events).run())
            .expect("failed to spawn producer thread");
        self.worker = Some(handle);
        log::debug!("producer started");
    }

    /// Stop producing: mark inactive, wake the worker, join it, purge the
    /// ring and drop the source.
    pub fn stop(&mut self) {
        self.shared.state.lock().unwrap().mode = Mode::Exit;
        self.shared.active.store(false, Ordering::Release);
        self.shared.ring.shutdown();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared.ring.purge();
        *self.shared.source.lock().unwrap() = None;
        *self.shared.info.lock().unwrap() = None;
        log::debug!("producer stopped");
    }
}

impl Drop for AudioProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pull side of the engine, handed to the output callback.
#[derive(Clone)]
pub struct ConsumerHandle {
    shared: Arc<Shared>,
}

impl ConsumerHandle {
    /// Pop the next queued block into `out`, waking the producer once
    /// occupancy drains to the low-water mark.
    ///
    /// Returns false only once the producer has fully stopped; otherwise
    /// true even when nothing was available (check [`occupancy`] to tell
    /// the cases apart).
    ///
    /// [`occupancy`]: Self::occupancy
    pub fn pop_block(&self, out: &mut FrameBlock) -> bool {
        let ring = &self.shared.ring;
        if ring.pop_into(out)
            && ring.occupancy() <= ring.capacity().saturating_sub(QUEUE_HEADROOM)
        {
            ring.notify_space();
        }
        self.shared.active.load(Ordering::Acquire)
    }

    /// Queued block count.
    pub fn occupancy(&self) -> usize {
        self.shared.ring.occupancy()
    }

    pub fn block_channels(&self) -> usize {
        self.shared.ring.channels()
    }

    pub fn frames_per_block(&self) -> usize {
        self.shared.ring.frames()
    }
}

/// Outcome of one production tick.
enum Tick {
    Produced,
    Idle,
}

/// Producer-thread state: the shared engine plus one reusable block.
struct Worker {
    shared: Arc<Shared>,
    events: Sender<EngineEvent>,
    block: FrameBlock,
}

impl Worker {
    fn new(shared: Arc<Shared>, events: Sender<EngineEvent>) -> Self {
        let block = FrameBlock::new(shared.ring.channels(), shared.ring.frames());
        Self {
            shared,
            events,
            block,
        }
    }

    fn run(&mut self) {
        log::debug!("producer thread running");
        while self.shared.active.load(Ordering::Acquire) {
            let mode = self.shared.state.lock().unwrap().mode;
            let tick = match mode {
                Mode::FileSource => self.file_tick(),
                Mode::SteadyTone => self.steady_tick(),
                Mode::ChannelTest => self.channel_test_tick(),
                Mode::Exit => break,
            };
            self.shared.ring.wait_while_full();
            if matches!(tick, Tick::Idle) {
                thread::sleep(IDLE_TICK);
            }
        }
        // Terminal: wake anything parked on the ring, drop queued blocks
        // and release the source.
        self.shared.active.store(false, Ordering::Release);
        self.shared.ring.shutdown();
        self.shared.ring.purge();
        *self.shared.source.lock().unwrap() = None;
        log::debug!("producer thread finished");
    }

    /// One block from the file source, loop window applied first.
    fn file_tick(&mut self) -> Tick {
        let frames_per_block = self.block.frames() as u64;
        let (pos, total) = {
            let mut st = self.shared.state.lock().unwrap();
            if st.apply_loop_window(false) {
                let _ = self.events.send(EngineEvent::StreamDone);
            }
            (st.frame_pos, st.total_frames)
        };

        if pos > total {
            // End of stream; keep running but emit nothing until the
            // cursor is moved externally.
            return Tick::Idle;
        }

        let read = {
            let mut source = self.shared.source.lock().unwrap();
            let Some(source) = source.as_mut() else {
                return Tick::Idle;
            };
            source.seek(pos);
            self.block.fill_silence();
            source.read(&mut self.block)
        };
        if read == 0 {
            // Nothing decoded this tick; never push stale slot contents.
            return Tick::Idle;
        }

        if self.shared.active.load(Ordering::Acquire) {
            self.shared.ring.push(&self.block);
        }
        self.shared.state.lock().unwrap().frame_pos += frames_per_block;
        Tick::Produced
    }

    fn steady_tick(&mut self) -> Tick {
        signal::steady_tone(&mut self.block);
        self.shared.ring.push(&self.block);
        Tick::Produced
    }

    /// One test-tone block. The tone defines its own synthetic stream
    /// length (`delay * rate`) and pins loop B to it.
    fn channel_test_tick(&mut self) -> Tick {
        let frames_per_block = self.block.frames() as u64;
        let target = {
            let mut st = self.shared.state.lock().unwrap();
            st.total_frames = st.test_delay_secs as u64 * st.frame_rate as u64;
            st.loop_b = st.total_frames;
            if st.apply_loop_window(true) {
                let _ = self.events.send(EngineEvent::StreamDone);
            }
            st.test_channel
        };

        signal::channel_tone(&mut self.block, target);
        if self.shared.active.load(Ordering::Acquire) {
            self.shared.ring.push(&self.block);
        }
        self.shared.state.lock().unwrap().frame_pos += frames_per_block;
        Tick::Produced
    }
}
