// Driver for a persistent mpv process controlled over JSON IPC

use super::ipc::{default_endpoint, IpcConnection};
use super::protocol::IpcRequest;
use crate::config::TransportConfig;
use crate::error::{PlayerError, Result};
use crate::track::TrackLocator;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const STARTUP_POLL: Duration = Duration::from_millis(50);
const QUIT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub mpv_path: PathBuf,
    pub endpoint: String,
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
}

impl From<&TransportConfig> for DriverSettings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            mpv_path: config.mpv_path.clone(),
            endpoint: config.ipc_path.clone().unwrap_or_else(default_endpoint),
            startup_timeout: Duration::from_millis(config.startup_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }
}

#[derive(Default)]
struct DriverInner {
    child: Option<Child>,
    conn: Option<IpcConnection>,
}

impl DriverInner {
    fn is_running(&self) -> bool {
        self.child.is_some() || self.conn.is_some()
    }
}

/// Owns the media process handle and its IPC connection.
///
/// Every request takes the inner lock for one full round trip, so the worker's
/// progress polling and the caller's pause/repeat commands never interleave
/// on the wire.
pub struct TransportDriver {
    settings: DriverSettings,
    inner: Mutex<DriverInner>,
    repeat: AtomicBool,
}

impl TransportDriver {
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(DriverInner::default()),
            repeat: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(DriverSettings::from(config))
    }

    /// Make sure a media process answers on the endpoint, spawning one if needed
    pub fn ensure_running(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        if self.ping(&mut inner) {
            return Ok(());
        }

        let child_alive = match inner.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        };
        if !child_alive {
            inner.child = Some(self.spawn()?);
        }

        let deadline = Instant::now() + self.settings.startup_timeout;
        loop {
            if self.ping(&mut inner) {
                log::info!("Media process ready on {}", self.settings.endpoint);
                return Ok(());
            }

            if let Some(child) = inner.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    inner.child = None;
                    return Err(PlayerError::TransportUnavailable(format!(
                        "media process exited during startup ({})",
                        status
                    )));
                }
            }

            if Instant::now() >= deadline {
                if let Some(mut child) = inner.child.take() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(PlayerError::TransportUnavailable(format!(
                    "no answer on {} within {:?}",
                    self.settings.endpoint, self.settings.startup_timeout
                )));
            }

            thread::sleep(STARTUP_POLL);
        }
    }

    fn spawn(&self) -> Result<Child> {
        log::info!(
            "Spawning media process {} on {}",
            self.settings.mpv_path.display(),
            self.settings.endpoint
        );

        Command::new(&self.settings.mpv_path)
            .arg("--idle=yes")
            .arg("--no-video")
            .arg("--no-terminal")
            .arg("--audio-display=no")
            .arg(format!("--input-ipc-server={}", self.settings.endpoint))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                PlayerError::TransportUnavailable(format!(
                    "failed to start {}: {}",
                    self.settings.mpv_path.display(),
                    e
                ))
            })
    }

    /// Cheap property query used as a liveness check
    fn ping(&self, inner: &mut DriverInner) -> bool {
        self.exchange(inner, &IpcRequest::get_property("mpv-version"))
            .map(|data| !data.is_null())
            .unwrap_or(false)
    }

    /// One request/reply round trip, reconnecting first if the last one failed
    fn exchange(&self, inner: &mut DriverInner, request: &IpcRequest) -> Result<Value> {
        if inner.conn.is_none() {
            let conn = IpcConnection::connect(&self.settings.endpoint, self.settings.request_timeout)
                .map_err(|e| PlayerError::TransportIo(format!("connect to {} failed: {}", self.settings.endpoint, e)))?;
            inner.conn = Some(conn);
        }

        let result = match inner.conn.as_mut() {
            Some(conn) => conn.exchange(request),
            None => Err(PlayerError::TransportIo("not connected".to_string())),
        };

        match result {
            Ok(response) => response.into_data(request.verb()),
            Err(e) => {
                // A broken stream cannot be resynchronized; start over next time
                inner.conn = None;
                Err(e)
            }
        }
    }

    fn request(&self, request: IpcRequest) -> Result<Value> {
        let mut inner = self.inner.lock();
        self.exchange(&mut inner, &request)
    }

    /// Replace the current media with `track` and start it unpaused
    pub fn load(&self, track: &TrackLocator) -> Result<()> {
        log::info!("Loading {} into media process", track.source_uri);
        self.request(IpcRequest::new(
            "loadfile",
            [Value::from(track.source_uri.as_str()), Value::from("replace")],
        ))?;
        self.request(IpcRequest::set_property("pause", false))?;
        if self.repeat.load(Ordering::SeqCst) {
            self.request(IpcRequest::set_property("loop-file", "inf"))?;
        }
        Ok(())
    }

    /// Cycle pause and return the resulting pause flag
    pub fn toggle_pause(&self) -> Result<bool> {
        self.request(IpcRequest::new("cycle", [Value::from("pause")]))?;
        let paused = self.request(IpcRequest::get_property("pause"))?;
        paused
            .as_bool()
            .ok_or_else(|| PlayerError::TransportIo(format!("unexpected pause value: {}", paused)))
    }

    pub fn set_pause(&self, paused: bool) -> Result<()> {
        self.request(IpcRequest::set_property("pause", paused))?;
        Ok(())
    }

    /// Store the loop mode and apply it now if a process is attached
    pub fn set_repeat(&self, on: bool) -> Result<()> {
        self.repeat.store(on, Ordering::SeqCst);

        let mut inner = self.inner.lock();
        if !inner.is_running() {
            return Ok(());
        }
        let mode = if on { "inf" } else { "no" };
        self.exchange(&mut inner, &IpcRequest::set_property("loop-file", mode))?;
        Ok(())
    }

    /// Playback position in seconds; `None` while nothing is loaded
    pub fn time_pos(&self) -> Result<Option<f64>> {
        let mut inner = self.inner.lock();
        match self.exchange(&mut inner, &IpcRequest::get_property("time-pos")) {
            Ok(value) => Ok(value.as_f64()),
            // mpv reports the property as unavailable between files
            Err(PlayerError::TransportIo(msg)) if msg.contains("unavailable") && inner.conn.is_some() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn idle_active(&self) -> Result<bool> {
        let idle = self.request(IpcRequest::get_property("idle-active"))?;
        Ok(idle.as_bool().unwrap_or(false))
    }

    /// Stop the current media, keeping the process alive
    pub fn stop_playback(&self) -> Result<()> {
        self.request(IpcRequest::bare("stop"))?;
        Ok(())
    }

    /// Best-effort quit, then make sure the process is gone
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if !inner.is_running() {
            return;
        }

        if let Err(e) = self.exchange(&mut inner, &IpcRequest::bare("quit")) {
            log::debug!("Quit request failed: {}", e);
        }
        inner.conn = None;

        if let Some(mut child) = inner.child.take() {
            let deadline = Instant::now() + QUIT_GRACE;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() < deadline => thread::sleep(STARTUP_POLL),
                    _ => {
                        if let Err(e) = child.kill() {
                            log::debug!("Kill of media process failed: {}", e);
                        }
                        let _ = child.wait();
                        break;
                    }
                }
            }
        }

        log::info!("Media process shut down");
    }
}

impl Drop for TransportDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
