// Playback strategies: local decode or external media process
// The session drives either one through the same trait

use crate::config::TransportConfig;
use crate::decoder::read_media_info;
use crate::error::{PlayerError, Result};
use crate::output::OutputFactory;
use crate::track::{ProgressSample, TrackLocator};
use crate::transport::TransportDriver;
use crate::worker::{stream_file, StreamExit, StreamOptions};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub use crate::worker::WorkerControls;

/// Slice used when sleeping between transport polls, so cancellation stays prompt
const CANCEL_CHECK: Duration = Duration::from_millis(20);

/// How a strategy run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Cancelled,
}

impl From<StreamExit> for RunOutcome {
    fn from(exit: StreamExit) -> Self {
        match exit {
            StreamExit::Finished => RunOutcome::Finished,
            StreamExit::Cancelled => RunOutcome::Cancelled,
        }
    }
}

/// Capability interface over one way of playing a resolved track
pub trait PlaybackStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Play `track` on the calling thread until it ends or `controls` cancel it
    fn run(
        &self,
        track: &TrackLocator,
        controls: &WorkerControls,
        progress: &mut dyn FnMut(ProgressSample),
    ) -> Result<RunOutcome>;

    /// Flip pause for the running track, returning the new pause flag
    fn toggle_pause(&self, controls: &WorkerControls) -> Result<bool>;

    fn set_repeat(&self, on: bool) -> Result<()>;

    /// Release long-lived resources; never fails
    fn shutdown(&self) {}
}

/// Decodes locally and streams PCM to an output device
pub struct DecodeStrategy {
    output: Arc<dyn OutputFactory>,
    options: StreamOptions,
    repeat: AtomicBool,
}

impl DecodeStrategy {
    pub fn new(output: Arc<dyn OutputFactory>, options: StreamOptions) -> Self {
        Self {
            output,
            options,
            repeat: AtomicBool::new(false),
        }
    }
}

impl PlaybackStrategy for DecodeStrategy {
    fn name(&self) -> &'static str {
        "decode"
    }

    fn run(
        &self,
        track: &TrackLocator,
        controls: &WorkerControls,
        progress: &mut dyn FnMut(ProgressSample),
    ) -> Result<RunOutcome> {
        let path = track.local_path().ok_or_else(|| {
            PlayerError::DecodeFailed(format!("{} is not a local file", track.source_uri))
        })?;

        // Resolvers may not know the length; the file header usually does
        let duration = match track.duration_seconds {
            0 => read_media_info(&path).ok().and_then(|info| info.duration_seconds).unwrap_or(0),
            known => known,
        };

        loop {
            let mut on_elapsed = |elapsed_seconds: u64| {
                progress(ProgressSample {
                    elapsed_seconds,
                    duration_seconds: duration,
                })
            };
            let exit = stream_file(&path, controls, self.output.as_ref(), &self.options, &mut on_elapsed)?;

            if exit == StreamExit::Finished && self.repeat.load(Ordering::SeqCst) && !controls.is_cancelled() {
                log::info!("Repeating {}", track.id);
                continue;
            }
            return Ok(exit.into());
        }
    }

    fn toggle_pause(&self, controls: &WorkerControls) -> Result<bool> {
        Ok(controls.toggle_pause())
    }

    fn set_repeat(&self, on: bool) -> Result<()> {
        self.repeat.store(on, Ordering::SeqCst);
        Ok(())
    }
}

/// Polling cadence of the transport worker
#[derive(Debug, Clone)]
pub struct TransportTiming {
    pub poll_interval: Duration,
    pub load_timeout: Duration,
}

impl From<&TransportConfig> for TransportTiming {
    fn from(config: &TransportConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            load_timeout: Duration::from_millis(config.load_timeout_ms),
        }
    }
}

/// Delegates decode and output to the external media process
pub struct TransportStrategy {
    driver: Arc<TransportDriver>,
    timing: TransportTiming,
    /// Held across load and across a pause toggle so the two never interleave
    pause_lock: Mutex<()>,
}

impl TransportStrategy {
    pub fn new(driver: Arc<TransportDriver>, timing: TransportTiming) -> Self {
        Self {
            driver,
            timing,
            pause_lock: Mutex::new(()),
        }
    }

    /// Sleep one poll interval, waking early on cancellation
    fn wait_poll(&self, controls: &WorkerControls) {
        let deadline = Instant::now() + self.timing.poll_interval;
        while !controls.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(CANCEL_CHECK.min(deadline - now));
        }
    }
}

impl PlaybackStrategy for TransportStrategy {
    fn name(&self) -> &'static str {
        "transport"
    }

    fn run(
        &self,
        track: &TrackLocator,
        controls: &WorkerControls,
        progress: &mut dyn FnMut(ProgressSample),
    ) -> Result<RunOutcome> {
        self.driver.ensure_running()?;
        {
            let _pause = self.pause_lock.lock();
            self.driver.load(track)?;
            // Loading unpauses; a pause toggled while mpv was starting still holds
            if controls.is_paused() {
                self.driver.set_pause(true)?;
            }
        }

        let loaded_at = Instant::now();
        let mut started = false;
        let mut last_emitted: Option<u64> = None;

        loop {
            if controls.is_cancelled() {
                if let Err(e) = self.driver.stop_playback() {
                    log::warn!("Failed to stop media process playback: {}", e);
                }
                return Ok(RunOutcome::Cancelled);
            }

            if self.driver.idle_active()? {
                if started {
                    return Ok(RunOutcome::Finished);
                }
                if loaded_at.elapsed() >= self.timing.load_timeout {
                    return Err(PlayerError::DecodeFailed(format!(
                        "media process did not start {}",
                        track.source_uri
                    )));
                }
            } else {
                started = true;
                if let Some(pos) = self.driver.time_pos()? {
                    let elapsed = pos.max(0.0) as u64;
                    if last_emitted != Some(elapsed) {
                        last_emitted = Some(elapsed);
                        progress(ProgressSample {
                            elapsed_seconds: elapsed,
                            duration_seconds: track.duration_seconds,
                        });
                    }
                }
            }

            self.wait_poll(controls);
        }
    }

    fn toggle_pause(&self, controls: &WorkerControls) -> Result<bool> {
        let _pause = self.pause_lock.lock();
        let paused = self.driver.toggle_pause()?;
        controls.set_paused(paused);
        Ok(paused)
    }

    fn set_repeat(&self, on: bool) -> Result<()> {
        self.driver.set_repeat(on)
    }

    fn shutdown(&self) {
        self.driver.shutdown();
    }
}
