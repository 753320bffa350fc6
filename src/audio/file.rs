//! Frame-addressable audio file decoding
//!
//! [`FrameSource`] is the seam between the producer loop and whatever feeds
//! it file audio: metadata, frame-accurate seek, and read-one-block. The
//! shipping implementation decodes media files with symphonia; tests stand
//! in stub sources.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;

use super::buffer::FrameBlock;

/// Errors that can occur while opening an audio file.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to probe audio format: {0}")]
    Probe(String),

    #[error("no audio tracks found")]
    NoTracks,

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("source has {found} channels, output supports at most {max}")]
    TooManyChannels { found: usize, max: usize },
}

/// Metadata of an opened source.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub channels: usize,
    pub total_frames: u64,
    pub sample_rate: u32,
}

/// A seekable supplier of interleaved audio frames.
///
/// `read` fills the leading `channel_count()` channels of the block for up
/// to one block's worth of frames and reports how many frames it wrote;
/// zero means end of stream. Resource release is `Drop`.
pub trait FrameSource: Send {
    fn channel_count(&self) -> usize;
    fn total_frames(&self) -> u64;
    fn sample_rate(&self) -> u32;
    /// Position the read cursor at `frame`.
    fn seek(&mut self, frame: u64);
    /// Decode up to `out.frames()` frames starting at the read cursor.
    fn read(&mut self, out: &mut FrameBlock) -> usize;
}

/// Symphonia-backed [`FrameSource`].
pub struct FileFrameSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: SourceInfo,
    /// Interleaved samples decoded ahead of the read cursor.
    pending: VecDeque<f32>,
    /// Absolute frame index of the front of `pending`.
    next_frame: u64,
}

impl std::fmt::Debug for FileFrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileFrameSource")
            .field("track_id", &self.track_id)
            .field("info", &self.info)
            .field("pending", &self.pending.len())
            .field("next_frame", &self.next_frame)
            .finish_non_exhaustive()
    }
}

impl FileFrameSource {
    /// Probe and open `path`, rejecting sources wider than `max_channels`.
    pub fn open(path: impl AsRef<Path>, max_channels: usize) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| SourceError::Probe(e.to_string()))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(SourceError::NoTracks)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;
        let sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);
        let total_frames = codec_params.n_frames.unwrap_or(0);

        if channels > max_channels {
            return Err(SourceError::TooManyChannels {
                found: channels,
                max: max_channels,
            });
        }

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| SourceError::Decoder(e.to_string()))?;

        let info = SourceInfo {
            path: path.to_path_buf(),
            channels,
            total_frames,
            sample_rate,
        };
        log::info!(
            "Opened {:?}: {} ch, {} frames @ {} Hz",
            info.path,
            info.channels,
            info.total_frames,
            info.sample_rate
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            info,
            pending: VecDeque::new(),
            next_frame: 0,
        })
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }
}

impl FrameSource for FileFrameSource {
    fn channel_count(&self) -> usize {
        self.info.channels
    }

    fn total_frames(&self) -> u64 {
        self.info.total_frames
    }

    fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    fn seek(&mut self, frame: u64) {
        // The producer re-seeks every block; skip the expensive path when
        // the cursor is already there.
        if frame == self.next_frame {
            return;
        }
        let time = Time::from(frame as f64 / self.info.sample_rate as f64);
        let _ = self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        );
        self.decoder.reset();
        self.pending.clear();
        self.next_frame = frame;
    }

    fn read(&mut self, out: &mut FrameBlock) -> usize {
        let want = out.frames();
        let channels = self.info.channels;

        while self.pending.len() < want * channels {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(_) => break,
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => push_interleaved(&decoded, &mut self.pending),
                Err(_) => continue,
            }
        }

        let have = self.pending.len() / channels;
        let frames = want.min(have);
        let block_channels = out.channels();
        let samples = out.as_mut_slice();
        let mut drained = self.pending.drain(..frames * channels);
        for frame in 0..frames {
            for ch in 0..channels {
                samples[frame * block_channels + ch] = drained.next().unwrap_or(0.0);
            }
        }
        drop(drained);

        self.next_frame += frames as u64;
        frames
    }
}

/// Append a decoded buffer to `pending` as interleaved f32 samples.
fn push_interleaved(decoded: &AudioBufferRef<'_>, pending: &mut VecDeque<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => {
            let channels = buf.spec().channels.count();
            for frame in 0..buf.frames() {
                for ch in 0..channels {
                    pending.push_back(buf.chan(ch)[frame]);
                }
            }
        }
        AudioBufferRef::S16(buf) => {
            let channels = buf.spec().channels.count();
            for frame in 0..buf.frames() {
                for ch in 0..channels {
                    pending.push_back(buf.chan(ch)[frame] as f32 / 32768.0);
                }
            }
        }
        AudioBufferRef::S32(buf) => {
            let channels = buf.spec().channels.count();
            for frame in 0..buf.frames() {
                for ch in 0..channels {
                    pending.push_back(buf.chan(ch)[frame] as f32 / 2147483648.0);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_file_is_io_error() {
        let err = FileFrameSource::open("/nonexistent/audio.wav", 8).unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }

    #[test]
    fn open_non_audio_file_is_probe_error() {
        let dir = std::env::temp_dir().join("framefeed-file-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("not_audio.wav");
        std::fs::write(&path, b"definitely not a media container").unwrap();

        let err = FileFrameSource::open(&path, 8).unwrap_err();
        assert!(matches!(err, SourceError::Probe(_)));
    }
}
