// Audio output using cpal
// The stream worker pushes chunks into a ring buffer drained by the device callback

use crate::decoder::AudioSpec;
use crate::error::{PlayerError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Device buffer length in milliseconds
const DEVICE_BUFFER_MS: usize = 500;

/// Destination for decoded PCM, owned by exactly one worker
pub trait AudioSink {
    /// Queue interleaved samples, blocking while the device is full.
    /// Returns how many were accepted; fewer than given means the device stalled
    /// and the rest must be offered again.
    fn write(&mut self, samples: &[f32]) -> Result<usize>;

    /// Hold or release the device while the worker is paused
    fn set_paused(&mut self, _paused: bool) -> Result<()> {
        Ok(())
    }

    /// Let already-written audio play out before the sink is dropped
    fn drain(&mut self) {}
}

/// Opens sinks sized to a track's stream layout
pub trait OutputFactory: Send + Sync {
    fn open(&self, spec: AudioSpec) -> Result<Box<dyn AudioSink>>;
}

/// Single-producer ring of f32 samples
pub struct SampleRing {
    buffer: Vec<f32>,
    write_pos: usize,
    read_pos: usize,
}

impl SampleRing {
    pub fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(2)],
            write_pos: 0,
            read_pos: 0,
        }
    }

    fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn write(&mut self, data: &[f32]) -> usize {
        let to_write = data.len().min(self.available_write());
        let size = self.size();

        // Two slice copies at most: up to the end, then wrapped to the front
        let first = to_write.min(size - self.write_pos);
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        let second = to_write - first;
        self.buffer[..second].copy_from_slice(&data[first..to_write]);

        self.write_pos = (self.write_pos + to_write) % size;
        to_write
    }

    pub fn read(&mut self, output: &mut [f32]) -> usize {
        let to_read = output.len().min(self.available_read());
        let size = self.size();

        let first = to_read.min(size - self.read_pos);
        output[..first].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);
        let second = to_read - first;
        output[first..to_read].copy_from_slice(&self.buffer[..second]);

        self.read_pos = (self.read_pos + to_read) % size;
        to_read
    }

    pub fn available_write(&self) -> usize {
        self.size() - self.available_read() - 1
    }

    pub fn available_read(&self) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            self.size() - (self.read_pos - self.write_pos)
        }
    }

    pub fn fullness(&self) -> f32 {
        self.available_read() as f32 / self.size() as f32
    }
}

/// Default output device through cpal
pub struct CpalOutputFactory {
    stall_timeout: Duration,
}

impl CpalOutputFactory {
    pub fn new(stall_timeout: Duration) -> Self {
        Self { stall_timeout }
    }
}

impl OutputFactory for CpalOutputFactory {
    fn open(&self, spec: AudioSpec) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(CpalSink::open(spec, self.stall_timeout)?))
    }
}

/// cpal stream plus the ring it drains. Not `Send`: lives and dies on the worker thread.
pub struct CpalSink {
    stream: Stream,
    ring: Arc<Mutex<SampleRing>>,
    device_error: Arc<Mutex<Option<String>>>,
    stall_timeout: Duration,
    buffer_duration: Duration,
}

impl CpalSink {
    pub fn open(spec: AudioSpec, stall_timeout: Duration) -> Result<Self> {
        log::info!("Initializing audio stream: {}Hz, {} channels", spec.sample_rate, spec.channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::OutputDevice("No output device available".to_string()))?;

        log::info!("Using audio device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

        let config = StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring_len = spec.sample_rate as usize * spec.channels as usize * DEVICE_BUFFER_MS / 1000;
        let ring = Arc::new(Mutex::new(SampleRing::new(ring_len)));
        let device_error = Arc::new(Mutex::new(None));

        let callback_ring = ring.clone();
        let callback_error = device_error.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let read = callback_ring.lock().read(data);
                    // Underrun: play silence rather than stale samples
                    data[read..].fill(0.0);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                    *callback_error.lock() = Some(err.to_string());
                },
                None,
            )
            .map_err(|e| PlayerError::OutputDevice(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::OutputDevice(format!("Failed to start stream: {}", e)))?;

        Ok(Self {
            stream,
            ring,
            device_error,
            stall_timeout,
            buffer_duration: Duration::from_millis(DEVICE_BUFFER_MS as u64),
        })
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, samples: &[f32]) -> Result<usize> {
        if let Some(err) = self.device_error.lock().take() {
            return Err(PlayerError::OutputDevice(err));
        }

        let mut accepted = 0;
        let mut last_progress = Instant::now();

        while accepted < samples.len() {
            let mut ring = self.ring.lock();
            let written = ring.write(&samples[accepted..]);
            let fullness = ring.fullness();
            drop(ring);

            if written > 0 {
                accepted += written;
                last_progress = Instant::now();
                continue;
            }

            if last_progress.elapsed() >= self.stall_timeout {
                if accepted == 0 {
                    return Err(PlayerError::OutputDevice("device stopped draining".to_string()));
                }
                log::warn!("Device stalled after {} of {} samples", accepted, samples.len());
                break;
            }

            // Sleep longer the fuller the device buffer is
            let sleep_ms = if fullness > 0.9 { 15 } else if fullness > 0.7 { 10 } else { 5 };
            thread::sleep(Duration::from_millis(sleep_ms));
        }

        Ok(accepted)
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        let result = if paused {
            self.stream.pause().map_err(|e| e.to_string())
        } else {
            self.stream.play().map_err(|e| e.to_string())
        };
        result.map_err(|e| PlayerError::OutputDevice(format!("Failed to toggle stream: {}", e)))
    }

    fn drain(&mut self) {
        let deadline = Instant::now() + self.buffer_duration + Duration::from_millis(200);
        while self.ring.lock().available_read() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::debug!("Stream pause on release failed: {}", e);
        }
        log::info!("Audio stream released");
    }
}
