// Local decode-and-stream worker
// Streams one file to an output sink in fixed-size chunks, honoring pause and cancel flags

use crate::config::DecodeConfig;
use crate::decoder::{AudioSpec, TrackDecoder};
use crate::error::{PlayerError, Result};
use crate::output::{AudioSink, OutputFactory};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Flags shared between the session (writer) and one worker (reader)
#[derive(Clone, Default)]
pub struct WorkerControls {
    cancel: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
}

impl WorkerControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Flip the pause flag, returning the new value
    pub fn toggle_pause(&self) -> bool {
        !self.pause.fetch_xor(true, Ordering::SeqCst)
    }
}

/// Tunables of the stream loop
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub chunk_frames: usize,
    pub pause_poll: Duration,
    pub max_write_failures: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from(&DecodeConfig::default())
    }
}

impl From<&DecodeConfig> for StreamOptions {
    fn from(config: &DecodeConfig) -> Self {
        Self {
            chunk_frames: config.chunk_frames,
            pause_poll: Duration::from_millis(config.pause_poll_ms),
            max_write_failures: config.max_write_failures.max(1),
        }
    }
}

/// How a stream ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    /// No data left in the file
    Finished,
    /// The cancel flag was observed
    Cancelled,
}

/// Stream `path` to a sink from `output` until end of file or cancellation.
///
/// `on_elapsed` receives whole elapsed seconds, computed from frames written,
/// each time the value changes. The decoder and the sink are released before
/// this returns, whatever the exit path.
pub fn stream_file(
    path: &Path,
    controls: &WorkerControls,
    output: &dyn OutputFactory,
    options: &StreamOptions,
    on_elapsed: &mut dyn FnMut(u64),
) -> Result<StreamExit> {
    let mut decoder = TrackDecoder::open(path)?;
    let spec = decoder.spec();
    let mut sink = output.open(spec)?;

    log::info!("Stream worker started: {}", path.display());
    let result = pump(&mut decoder, sink.as_mut(), spec, controls, options, on_elapsed);

    drop(sink);
    drop(decoder);

    match &result {
        Ok(exit) => log::info!("Stream worker exited: {:?}", exit),
        Err(e) => log::error!("Stream worker failed: {}", e),
    }
    result
}

fn pump(
    decoder: &mut TrackDecoder,
    sink: &mut dyn AudioSink,
    spec: AudioSpec,
    controls: &WorkerControls,
    options: &StreamOptions,
    on_elapsed: &mut dyn FnMut(u64),
) -> Result<StreamExit> {
    let channels = spec.channels.max(1) as u64;
    let mut samples_written: u64 = 0;
    let mut last_emitted: Option<u64> = None;
    let mut consecutive_failures = 0u32;
    let mut holding = false;
    let mut retry: Option<Vec<f32>> = None;

    loop {
        if controls.is_cancelled() {
            return Ok(StreamExit::Cancelled);
        }

        if controls.is_paused() {
            if !holding {
                if let Err(e) = sink.set_paused(true) {
                    log::warn!("Failed to pause output: {}", e);
                }
                holding = true;
            }
            thread::sleep(options.pause_poll);
            continue;
        }

        if holding {
            if let Err(e) = sink.set_paused(false) {
                log::warn!("Failed to resume output: {}", e);
            }
            holding = false;
        }

        // Samples the device did not take are offered again before decoding more
        let chunk = match retry.take() {
            Some(chunk) => chunk,
            None => match decoder.next_chunk(options.chunk_frames)? {
                Some(chunk) => chunk,
                None => {
                    sink.drain();
                    return Ok(StreamExit::Finished);
                }
            },
        };

        let (accepted, failure) = match sink.write(&chunk) {
            Ok(n) if n >= chunk.len() => (chunk.len(), None),
            Ok(n) => (
                n,
                Some(PlayerError::OutputDevice(format!(
                    "device accepted {} of {} samples",
                    n,
                    chunk.len()
                ))),
            ),
            Err(e) => (0, Some(e)),
        };
        samples_written += accepted as u64;

        match failure {
            Some(e) => {
                consecutive_failures += 1;
                log::warn!(
                    "Output write failed ({}/{}): {}",
                    consecutive_failures,
                    options.max_write_failures,
                    e
                );
                if consecutive_failures >= options.max_write_failures {
                    return Err(PlayerError::DecodeFailed(format!(
                        "output device failed {} consecutive writes: {}",
                        consecutive_failures, e
                    )));
                }
                retry = Some(chunk[accepted..].to_vec());
            }
            None => consecutive_failures = 0,
        }

        if accepted == 0 {
            continue;
        }
        let elapsed = samples_written / channels / spec.sample_rate as u64;
        if last_emitted != Some(elapsed) {
            last_emitted = Some(elapsed);
            on_elapsed(elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_tone_wav, MemoryOutput};
    use std::time::Instant;

    fn options(chunk_frames: usize) -> StreamOptions {
        StreamOptions {
            chunk_frames,
            pause_poll: Duration::from_millis(10),
            max_write_failures: 3,
        }
    }

    #[test]
    fn test_streams_to_natural_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("three.wav");
        write_tone_wav(&path, 8000, 2, 8000 * 3);

        let output = MemoryOutput::new();
        let mut seen = Vec::new();
        let exit = stream_file(&path, &WorkerControls::new(), &output, &options(800), &mut |s| seen.push(s))
            .unwrap();

        assert_eq!(exit, StreamExit::Finished);
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(output.stats().frames(), 8000 * 3);
        assert_eq!(output.stats().opened(), 1);
        assert_eq!(output.stats().released(), 1);
    }

    #[test]
    fn test_cancel_before_first_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone_wav(&path, 8000, 1, 8000);

        let controls = WorkerControls::new();
        controls.cancel();
        let output = MemoryOutput::new();
        let mut seen = Vec::new();

        let exit = stream_file(&path, &controls, &output, &options(256), &mut |s| seen.push(s)).unwrap();

        assert_eq!(exit, StreamExit::Cancelled);
        assert!(seen.is_empty());
        assert_eq!(output.stats().frames(), 0);
        assert_eq!(output.stats().released(), 1);
    }

    #[test]
    fn test_cancel_observed_while_paused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone_wav(&path, 8000, 1, 8000 * 5);

        let controls = WorkerControls::new();
        controls.set_paused(true);
        let output = Arc::new(MemoryOutput::new());

        let handle = {
            let controls = controls.clone();
            let output = output.clone();
            let path = path.clone();
            thread::spawn(move || stream_file(&path, &controls, output.as_ref(), &options(256), &mut |_| {}))
        };

        thread::sleep(Duration::from_millis(100));
        assert_eq!(output.stats().frames(), 0);
        assert!(output.stats().pause_requests() >= 1);

        let started = Instant::now();
        controls.cancel();
        let exit = handle.join().unwrap().unwrap();
        assert_eq!(exit, StreamExit::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(output.stats().released(), 1);
    }

    #[test]
    fn test_transient_write_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone_wav(&path, 8000, 1, 8000 * 2);

        let output = MemoryOutput::new().failing_first_writes(2);
        let exit = stream_file(&path, &WorkerControls::new(), &output, &options(800), &mut |_| {}).unwrap();

        assert_eq!(exit, StreamExit::Finished);
        assert_eq!(output.stats().frames(), 8000 * 2);
    }

    #[test]
    fn test_partial_writes_resume_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone_wav(&path, 8000, 1, 8000 * 2);

        let output = MemoryOutput::new().accepting_half_of_first_writes(2);
        let mut seen = Vec::new();
        let exit = stream_file(&path, &WorkerControls::new(), &output, &options(800), &mut |s| seen.push(s))
            .unwrap();

        assert_eq!(exit, StreamExit::Finished);
        assert_eq!(output.stats().frames(), 8000 * 2);
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_repeated_write_failures_end_the_track() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone_wav(&path, 8000, 1, 8000 * 2);

        let output = MemoryOutput::new().failing_first_writes(u32::MAX);
        let mut seen = Vec::new();
        let err = stream_file(&path, &WorkerControls::new(), &output, &options(800), &mut |s| seen.push(s))
            .unwrap_err();

        assert!(matches!(err, PlayerError::DecodeFailed(_)));
        assert!(seen.is_empty());
        assert_eq!(output.stats().released(), 1);
    }

    #[test]
    fn test_unreadable_file_never_opens_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = MemoryOutput::new();
        let mut seen = Vec::new();

        let err = stream_file(
            &dir.path().join("missing.wav"),
            &WorkerControls::new(),
            &output,
            &options(800),
            &mut |s| seen.push(s),
        )
        .unwrap_err();

        assert!(matches!(err, PlayerError::DecodeFailed(_)));
        assert!(seen.is_empty());
        assert_eq!(output.stats().opened(), 0);
    }

    #[test]
    fn test_toggle_pause_returns_new_value() {
        let controls = WorkerControls::new();
        assert!(controls.toggle_pause());
        assert!(controls.is_paused());
        assert!(!controls.toggle_pause());
        assert!(!controls.is_paused());
    }
}
