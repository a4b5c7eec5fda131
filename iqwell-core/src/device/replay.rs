//! File playback device.
//!
//! Replays previously captured IQ from disk through the same seam as a
//! live tuner. Two layouts are understood: raw CS16LE (interleaved
//! little-endian i16 pairs, no header) and 16-bit stereo integer WAV,
//! where left carries I and right carries Q. A trailing fragment shorter
//! than one block is dropped, matching how short driver reads are treated
//! upstream.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::convert::BYTES_PER_SAMPLE;
use crate::device::RadioDevice;
use crate::error::{IqwellError, Result};
use crate::gain::GainStage;

#[derive(Debug, Clone, Copy)]
enum ReplayFormat {
    Raw,
    Wav { header_rate: u32 },
}

pub struct ReplayRadio {
    path: PathBuf,
    format: ReplayFormat,
    loop_playback: bool,
    throttle: bool,
    rate: Mutex<f64>,
    center_hz: Mutex<f64>,
    cancel: AtomicBool,
}

impl ReplayRadio {
    /// Opens `path` for playback, probing the layout from the file itself.
    ///
    /// Files with a readable WAV header must be 16-bit integer stereo;
    /// anything else is treated as raw CS16LE. With `loop_playback` the
    /// file repeats from the top instead of ending the stream at EOF.
    pub fn open(path: impl Into<PathBuf>, loop_playback: bool) -> Result<Self> {
        let path = path.into();
        let format = probe_format(&path)?;
        let rate = match format {
            ReplayFormat::Raw => 500_000.0,
            ReplayFormat::Wav { header_rate } => f64::from(header_rate),
        };
        debug!(path = %path.display(), ?format, "replay source opened");
        Ok(Self {
            path,
            format,
            loop_playback,
            throttle: true,
            rate: Mutex::new(rate),
            center_hz: Mutex::new(0.0),
            cancel: AtomicBool::new(false),
        })
    }

    /// Disables per-block pacing; playback then runs as fast as the disk
    /// allows.
    pub fn with_throttle(mut self, on: bool) -> Self {
        self.throttle = on;
        self
    }

    fn pace(&self, samples: usize, rate: f64) {
        if !self.throttle || rate <= 0.0 {
            return;
        }
        let mut left = Duration::from_secs_f64(samples as f64 / rate);
        let step = Duration::from_millis(25);
        while !self.cancel.load(Ordering::Acquire) && !left.is_zero() {
            let nap = left.min(step);
            std::thread::sleep(nap);
            left = left.saturating_sub(nap);
        }
    }

    fn run_raw(&self, block_bytes: usize, deliver: &mut dyn FnMut(&[u8])) -> Result<()> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        // A looped file shorter than one block would rewind forever
        // without ever delivering.
        if self.loop_playback && reader.get_ref().metadata()?.len() < block_bytes as u64 {
            return Err(IqwellError::Device(format!(
                "{} holds less than one {block_bytes}-byte block, cannot loop",
                self.path.display()
            )));
        }
        let mut block = vec![0u8; block_bytes];

        while !self.cancel.load(Ordering::Acquire) {
            let filled = read_up_to(&mut reader, &mut block)?;
            if filled < block_bytes {
                if !self.loop_playback {
                    break;
                }
                reader.seek(SeekFrom::Start(0))?;
                continue;
            }
            deliver(&block);
            self.pace(block_bytes / BYTES_PER_SAMPLE, *self.rate.lock());
        }
        Ok(())
    }

    fn run_wav(&self, block_bytes: usize, deliver: &mut dyn FnMut(&[u8])) -> Result<()> {
        let rate = *self.rate.lock();
        if self.loop_playback {
            let reader = hound::WavReader::open(&self.path)
                .map_err(|e| IqwellError::Device(format!("wav open failed: {e}")))?;
            if (reader.len() as usize).saturating_mul(2) < block_bytes {
                return Err(IqwellError::Device(format!(
                    "{} holds less than one {block_bytes}-byte block, cannot loop",
                    self.path.display()
                )));
            }
        }
        let mut block = vec![0u8; block_bytes];

        'playback: while !self.cancel.load(Ordering::Acquire) {
            let mut reader = hound::WavReader::open(&self.path)
                .map_err(|e| IqwellError::Device(format!("wav open failed: {e}")))?;
            let mut samples = reader.samples::<i16>();

            loop {
                let mut at = 0;
                while at < block_bytes {
                    match samples.next() {
                        Some(value) => {
                            let value = value.map_err(|e| {
                                IqwellError::Device(format!("wav read failed: {e}"))
                            })?;
                            block[at..at + 2].copy_from_slice(&value.to_le_bytes());
                            at += 2;
                        }
                        None => {
                            if self.loop_playback {
                                continue 'playback;
                            }
                            break 'playback;
                        }
                    }
                }
                deliver(&block);
                self.pace(block_bytes / BYTES_PER_SAMPLE, rate);
                if self.cancel.load(Ordering::Acquire) {
                    break 'playback;
                }
            }
        }
        Ok(())
    }
}

impl RadioDevice for ReplayRadio {
    fn label(&self) -> String {
        let kind = match self.format {
            ReplayFormat::Raw => "raw CS16LE",
            ReplayFormat::Wav { .. } => "wav",
        };
        format!("replay of {} ({kind})", self.path.display())
    }

    fn sample_rates(&self) -> Vec<f64> {
        match self.format {
            // Raw files carry no rate of their own.
            ReplayFormat::Raw => Vec::new(),
            ReplayFormat::Wav { header_rate } => vec![f64::from(header_rate)],
        }
    }

    fn set_sample_rate(&self, rate: f64) -> Result<f64> {
        match self.format {
            ReplayFormat::Raw => {
                if rate <= 0.0 {
                    return Err(IqwellError::Device(format!(
                        "sample rate {rate} Hz is not positive"
                    )));
                }
                *self.rate.lock() = rate;
                Ok(rate)
            }
            ReplayFormat::Wav { header_rate } => {
                let actual = f64::from(header_rate);
                if (rate - actual).abs() > f64::EPSILON {
                    warn!(
                        requested = rate,
                        actual,
                        "wav replay keeps the rate recorded in its header"
                    );
                }
                Ok(actual)
            }
        }
    }

    fn sample_rate(&self) -> f64 {
        *self.rate.lock()
    }

    fn frequency_range(&self) -> (f64, f64) {
        (0.0, 0.0)
    }

    fn set_center_frequency(&self, hz: f64) -> Result<f64> {
        // Recorded files have no tuner; remember the value for reporting.
        *self.center_hz.lock() = hz;
        Ok(hz)
    }

    fn center_frequency(&self) -> f64 {
        *self.center_hz.lock()
    }

    fn gain_stages(&self) -> Vec<GainStage> {
        Vec::new()
    }

    fn set_stage_gain(&self, stage: usize, _db: f64) -> Result<()> {
        Err(IqwellError::Device(format!(
            "replay device has no gain stage {stage}"
        )))
    }

    fn run_stream(
        &self,
        block_bytes: usize,
        _block_count: usize,
        deliver: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        if block_bytes == 0 || block_bytes % BYTES_PER_SAMPLE != 0 {
            return Err(IqwellError::Device(format!(
                "block size {block_bytes} is not a whole number of IQ pairs"
            )));
        }
        match self.format {
            ReplayFormat::Raw => self.run_raw(block_bytes, deliver),
            ReplayFormat::Wav { .. } => self.run_wav(block_bytes, deliver),
        }
    }

    fn cancel_stream(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

fn probe_format(path: &Path) -> Result<ReplayFormat> {
    match hound::WavReader::open(path) {
        Ok(reader) => {
            let spec = reader.spec();
            if spec.channels != 2
                || spec.bits_per_sample != 16
                || spec.sample_format != hound::SampleFormat::Int
            {
                return Err(IqwellError::Device(format!(
                    "{} is a wav file but not 16-bit integer stereo",
                    path.display()
                )));
            }
            Ok(ReplayFormat::Wav {
                header_rate: spec.sample_rate,
            })
        }
        Err(hound::Error::IoError(e)) => Err(IqwellError::Io(e)),
        // Unreadable header: treat the file as raw pairs.
        Err(_) => {
            File::open(path)?;
            Ok(ReplayFormat::Raw)
        }
    }
}

/// Reads until `buf` is full or the stream ends, returning bytes read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut at = 0;
    while at < buf.len() {
        let n = reader.read(&mut buf[at..])?;
        if n == 0 {
            break;
        }
        at += n;
    }
    Ok(at)
}
