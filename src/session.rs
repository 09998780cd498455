// Playback session: the state machine a UI drives
//
// One background worker per track. Starting, rewinding or stopping first
// cancels and joins the previous worker, so at most one worker ever holds
// the output device or the media process.

use crate::callback::{CallbackEvent, CallbackManager, PlayerCallback};
use crate::config::{PlayerConfig, SessionConfig, StrategyKind};
use crate::error::{PlayerError, Result};
use crate::output::CpalOutputFactory;
use crate::resolver::{ResolverChain, TrackResolver};
use crate::state::{PlaybackState, SessionStatus, StateContainer, TerminalReason};
use crate::strategy::{
    DecodeStrategy, PlaybackStrategy, RunOutcome, TransportStrategy, TransportTiming, WorkerControls,
};
use crate::track::{ProgressSample, TrackLocator};
use crate::transport::TransportDriver;
use crate::worker::StreamOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use PlaybackState::*;

const JOIN_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Longest a stop/play/rewind waits for the previous worker to exit
    pub join_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            join_timeout: config.join_timeout(),
        }
    }
}

/// What a new worker starts from
enum Request {
    Query(String),
    Track(TrackLocator),
}

/// Live-worker gauge entry, released when the worker thread unwinds.
/// A stop that gave up waiting on this worker is settled to `Idle` here.
struct WorkerGuard {
    gauge: Arc<AtomicUsize>,
    state: StateContainer,
    callbacks: Arc<CallbackManager>,
}

impl WorkerGuard {
    fn enter(gauge: Arc<AtomicUsize>, state: StateContainer, callbacks: Arc<CallbackManager>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self {
            gauge,
            state,
            callbacks,
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(old_state) = self.state.settle_idle(&[Stopping], TerminalReason::Stopped) {
            self.callbacks.dispatch_event(CallbackEvent::StateChanged {
                old_state,
                new_state: Idle,
            });
        }
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything one worker thread needs, cloned out of the session at spawn
struct WorkerContext {
    resolver: Arc<dyn TrackResolver>,
    strategy: Arc<dyn PlaybackStrategy>,
    state: StateContainer,
    callbacks: Arc<CallbackManager>,
    controls: WorkerControls,
}

impl WorkerContext {
    fn notify_state(&self, old_state: PlaybackState, new_state: PlaybackState) {
        self.callbacks
            .dispatch_event(CallbackEvent::StateChanged { old_state, new_state });
    }

    fn run(self, request: Request) {
        let track = match request {
            Request::Track(track) => track,
            Request::Query(query) => match self.resolver.resolve(&query, &self.controls) {
                Ok(track) => track,
                Err(e) if self.controls.is_cancelled() => {
                    log::debug!("Resolution of '{}' abandoned: {}", query, e);
                    return;
                }
                Err(e) => {
                    let error = match e {
                        PlayerError::ResolutionFailed(_) => e,
                        other => PlayerError::ResolutionFailed(other.to_string()),
                    };
                    log::warn!("Could not resolve '{}': {}", query, error);
                    self.fail(error);
                    return;
                }
            },
        };

        self.play(track);
    }

    fn play(&self, track: TrackLocator) {
        self.state.update_status(|status| {
            status.track = Some(track.clone());
            status.progress = Some(ProgressSample {
                elapsed_seconds: 0,
                duration_seconds: track.duration_seconds,
            });
        });

        // A stop issued while resolving wins
        match self.state.transition_from(&[Loading], Playing) {
            Some(from) => self.notify_state(from, Playing),
            None => return,
        }

        log::info!(
            "Playing '{}' ({}) with {} strategy",
            track.title,
            track.id,
            self.strategy.name()
        );
        self.callbacks.dispatch_event(CallbackEvent::TitleChanged {
            track_id: track.id.clone(),
            title: track.title.clone(),
        });
        if track.duration_seconds > 0 {
            self.callbacks.dispatch_event(CallbackEvent::DurationChanged {
                duration_seconds: track.duration_seconds,
            });
        }

        let mut last_elapsed: Option<u64> = None;
        let mut on_progress = |sample: ProgressSample| {
            if self.controls.is_cancelled() {
                return;
            }
            if matches!(last_elapsed, Some(last) if sample.elapsed_seconds < last) {
                self.callbacks.dispatch_event(CallbackEvent::TrackRestarted {
                    track_id: track.id.clone(),
                });
            }
            last_elapsed = Some(sample.elapsed_seconds);
            self.state.update_status(|status| status.progress = Some(sample));
            self.callbacks.dispatch_event(CallbackEvent::Elapsed {
                track_id: track.id.clone(),
                sample,
            });
        };

        match self.strategy.run(&track, &self.controls, &mut on_progress) {
            Ok(RunOutcome::Finished) => {
                if let Some(from) = self.state.settle_idle(&[Playing, Paused], TerminalReason::Finished) {
                    log::info!("Finished '{}'", track.title);
                    self.notify_state(from, Idle);
                    self.callbacks.dispatch_event(CallbackEvent::PlaybackCompleted {
                        track_id: track.id.clone(),
                    });
                }
            }
            Ok(RunOutcome::Cancelled) => log::debug!("Worker for '{}' cancelled", track.id),
            Err(e) => {
                log::error!("Playback of '{}' failed: {}", track.id, e);
                self.fail(e);
            }
        }
    }

    /// Report a failure unless the session already moved on
    fn fail(&self, error: PlayerError) {
        match self.state.settle_idle(&[Loading, Playing, Paused], TerminalReason::Failed) {
            Some(from) => {
                self.notify_state(from, Idle);
                self.callbacks.dispatch_event(CallbackEvent::Error { error });
            }
            None => log::debug!("Dropping failure after cancellation: {}", error),
        }
    }
}

/// Public control surface: play, toggle_pause, rewind, stop, repeat
pub struct PlaybackSession {
    resolver: Arc<dyn TrackResolver>,
    strategy: Arc<dyn PlaybackStrategy>,
    state: StateContainer,
    callbacks: Arc<CallbackManager>,
    controls: WorkerControls,
    worker: Option<JoinHandle<()>>,
    live_workers: Arc<AtomicUsize>,
    options: SessionOptions,
    shut_down: bool,
}

impl PlaybackSession {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        strategy: Arc<dyn PlaybackStrategy>,
        options: SessionOptions,
    ) -> Self {
        log::info!("Playback session created ({} strategy)", strategy.name());
        Self {
            resolver,
            strategy,
            state: StateContainer::new(),
            callbacks: Arc::new(CallbackManager::new()),
            controls: WorkerControls::new(),
            worker: None,
            live_workers: Arc::new(AtomicUsize::new(0)),
            options,
            shut_down: false,
        }
    }

    /// Build the resolver chain and the configured strategy
    pub fn from_config(config: &PlayerConfig) -> Result<Self> {
        crate::init_logging();
        config.validate()?;

        let strategy: Arc<dyn PlaybackStrategy> = match config.strategy {
            StrategyKind::Decode => {
                let stall = Duration::from_millis(config.decode.write_stall_ms);
                Arc::new(DecodeStrategy::new(
                    Arc::new(CpalOutputFactory::new(stall)),
                    StreamOptions::from(&config.decode),
                ))
            }
            StrategyKind::Transport => Arc::new(TransportStrategy::new(
                Arc::new(TransportDriver::from_config(&config.transport)),
                TransportTiming::from(&config.transport),
            )),
        };
        let resolver = Arc::new(ResolverChain::from_config(config)?);

        Ok(Self::new(resolver, strategy, SessionOptions::from(&config.session)))
    }

    pub fn add_callback(&self, callback: Arc<dyn PlayerCallback>) {
        self.callbacks.add_callback(callback);
    }

    pub fn clear_callbacks(&self) {
        self.callbacks.clear_callbacks();
    }

    pub fn state(&self) -> PlaybackState {
        self.state.get_state()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Worker threads currently alive; never above one
    pub fn active_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    /// Resolve `query` and play it, replacing whatever is playing.
    /// Returns once the worker is launched; a resolution failure arrives as an `Error` event.
    pub fn play(&mut self, query: &str) -> Result<()> {
        self.launch(Request::Query(query.to_string()))
    }

    /// Play an already resolved track, replacing whatever is playing
    pub fn play_track(&mut self, track: TrackLocator) -> Result<()> {
        self.launch(Request::Track(track))
    }

    /// Flip between `Playing` and `Paused`, returning the new pause flag
    pub fn toggle_pause(&mut self) -> Result<bool> {
        if !matches!(self.state.get_state(), Playing | Paused) {
            return Err(PlayerError::NoActiveTrack);
        }

        let paused = self.strategy.toggle_pause(&self.controls)?;
        let (from, to) = if paused { (Playing, Paused) } else { (Paused, Playing) };
        if let Some(old) = self.state.transition_from(&[from], to) {
            self.notify_state(old, to);
        }
        Ok(paused)
    }

    /// Restart the current track from the beginning
    pub fn rewind(&mut self) -> Result<()> {
        if !matches!(self.state.get_state(), Playing | Paused) {
            return Err(PlayerError::NoActiveTrack);
        }
        let track = self.state.status().track.ok_or(PlayerError::NoActiveTrack)?;
        log::info!("Rewinding '{}'", track.title);
        self.play_track(track)
    }

    /// Cancel and join the worker. Safe to call in any state, any number of times.
    pub fn stop(&mut self) -> Result<()> {
        self.halt_worker()
    }

    pub fn set_repeat(&self, on: bool) -> Result<()> {
        self.strategy.set_repeat(on)?;
        self.state.update_status(|status| status.repeat = on);
        log::info!("Repeat {}", if on { "on" } else { "off" });
        Ok(())
    }

    /// Stop playback and release the strategy's long-lived resources
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if let Err(e) = self.halt_worker() {
            log::error!("Worker did not stop during shutdown: {}", e);
        }
        self.strategy.shutdown();
        self.shut_down = true;
        log::info!("Playback session shut down");
    }

    fn notify_state(&self, old_state: PlaybackState, new_state: PlaybackState) {
        self.callbacks
            .dispatch_event(CallbackEvent::StateChanged { old_state, new_state });
    }

    fn launch(&mut self, request: Request) -> Result<()> {
        if self.shut_down {
            return Err(PlayerError::InvalidState("session is shut down".to_string()));
        }

        self.halt_worker()?;

        let from = self.state.transition(Loading)?;
        self.notify_state(from, Loading);

        self.controls = WorkerControls::new();
        let context = WorkerContext {
            resolver: self.resolver.clone(),
            strategy: self.strategy.clone(),
            state: self.state.clone(),
            callbacks: self.callbacks.clone(),
            controls: self.controls.clone(),
        };

        // Counted before spawn so the gauge never misses a starting worker
        let guard = WorkerGuard::enter(self.live_workers.clone(), self.state.clone(), self.callbacks.clone());
        let spawned = thread::Builder::new()
            .name("termify-worker".to_string())
            .spawn(move || {
                let _guard = guard;
                context.run(request);
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                if let Some(old) = self.state.settle_idle(&[Loading], TerminalReason::Failed) {
                    self.notify_state(old, Idle);
                }
                Err(PlayerError::Io(format!("failed to spawn worker: {}", e)))
            }
        }
    }

    /// Stopping, cancel, bounded join, then Idle
    fn halt_worker(&mut self) -> Result<()> {
        if let Some(old) = self.state.transition_from(&[Loading, Playing, Paused], Stopping) {
            self.notify_state(old, Stopping);
        }
        self.controls.cancel();

        self.join_worker()?;

        if let Some(old) = self.state.settle_idle(&[Stopping], TerminalReason::Stopped) {
            self.notify_state(old, Idle);
        }
        Ok(())
    }

    /// Wait for the worker to exit. On timeout the handle is kept for the next attempt.
    fn join_worker(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + self.options.join_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                self.worker = Some(handle);
                return Err(PlayerError::WorkerTimeout(format!(
                    "worker still running after {:?}",
                    self.options.join_timeout
                )));
            }
            thread::sleep(JOIN_POLL);
        }

        if handle.join().is_err() {
            log::error!("Worker thread panicked");
        }
        Ok(())
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
