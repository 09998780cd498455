// Thread-safe callback mechanism for session events
// Events are raised on the worker thread; observers must be cheap and non-blocking

use crate::error::PlayerError;
use crate::state::PlaybackState;
use crate::track::ProgressSample;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// Session event types
#[derive(Debug, Clone)]
pub enum CallbackEvent {
    /// Session state changed
    StateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
    },

    /// A track was resolved and started
    TitleChanged { track_id: String, title: String },

    /// Track duration became known
    DurationChanged { duration_seconds: u64 },

    /// Elapsed playback time advanced by at least one whole second
    Elapsed {
        track_id: String,
        sample: ProgressSample,
    },

    /// Repeat started the same track over; elapsed restarts at zero after this
    TrackRestarted { track_id: String },

    /// Track streamed to its natural end
    PlaybackCompleted { track_id: String },

    /// A load or playback failure; the session is back to `Idle`
    Error { error: PlayerError },
}

/// Session callback trait
/// Implementations are invoked from the worker thread and should return quickly
pub trait PlayerCallback: Send + Sync {
    fn on_event(&self, event: CallbackEvent);
}

type TextFn = Box<dyn Fn(&str) + Send + Sync>;
type SecondsFn = Box<dyn Fn(u64) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&PlayerError) + Send + Sync>;

/// Closure-based observer for a UI that only cares about display fields
#[derive(Default)]
pub struct UiCallbacks {
    on_title: Option<TextFn>,
    on_progress: Option<SecondsFn>,
    on_elapsed: Option<SecondsFn>,
    on_error: Option<ErrorFn>,
}

impl UiCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_title(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_title = Some(Box::new(f));
        self
    }

    /// Receives the track duration in seconds
    pub fn on_progress(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_elapsed(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_elapsed = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&PlayerError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl PlayerCallback for UiCallbacks {
    fn on_event(&self, event: CallbackEvent) {
        match event {
            CallbackEvent::TitleChanged { title, .. } => {
                if let Some(f) = &self.on_title {
                    f(&title);
                }
            }
            CallbackEvent::DurationChanged { duration_seconds } => {
                if let Some(f) = &self.on_progress {
                    f(duration_seconds);
                }
            }
            CallbackEvent::Elapsed { sample, .. } => {
                if let Some(f) = &self.on_elapsed {
                    f(sample.elapsed_seconds);
                }
            }
            CallbackEvent::Error { error } => {
                if let Some(f) = &self.on_error {
                    f(&error);
                }
            }
            CallbackEvent::StateChanged { .. }
            | CallbackEvent::TrackRestarted { .. }
            | CallbackEvent::PlaybackCompleted { .. } => {}
        }
    }
}

/// Forwards events into a channel so a UI loop can drain them on its own thread
pub struct ChannelCallback {
    sender: Sender<CallbackEvent>,
}

impl ChannelCallback {
    pub fn new() -> (Self, Receiver<CallbackEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl PlayerCallback for ChannelCallback {
    fn on_event(&self, event: CallbackEvent) {
        // Receiver gone means the UI shut down; nothing left to notify
        if self.sender.send(event).is_err() {
            log::debug!("Event receiver dropped");
        }
    }
}

/// Callback manager for handling multiple observers
pub struct CallbackManager {
    callbacks: Mutex<Vec<Arc<dyn PlayerCallback>>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn add_callback(&self, callback: Arc<dyn PlayerCallback>) {
        self.callbacks.lock().push(callback);
    }

    pub fn clear_callbacks(&self) {
        self.callbacks.lock().clear();
    }

    pub fn dispatch_event(&self, event: CallbackEvent) {
        // Snapshot so an observer may register others without deadlocking
        let callbacks: Vec<Arc<dyn PlayerCallback>> = self.callbacks.lock().clone();
        for callback in callbacks.iter() {
            callback.on_event(event.clone());
        }
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Recording callback for tests
#[cfg(test)]
pub struct TestCallback {
    events: Mutex<Vec<CallbackEvent>>,
}

#[cfg(test)]
impl TestCallback {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn get_events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.get_events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::TitleChanged { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }

    pub fn elapsed(&self) -> Vec<(String, u64)> {
        self.get_events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Elapsed { track_id, sample } => Some((track_id, sample.elapsed_seconds)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<PlayerError> {
        self.get_events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Error { error } => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn restarts(&self) -> usize {
        self.get_events()
            .iter()
            .filter(|e| matches!(e, CallbackEvent::TrackRestarted { .. }))
            .count()
    }

    pub fn completions(&self) -> usize {
        self.get_events()
            .iter()
            .filter(|e| matches!(e, CallbackEvent::PlaybackCompleted { .. }))
            .count()
    }
}

#[cfg(test)]
impl PlayerCallback for TestCallback {
    fn on_event(&self, event: CallbackEvent) {
        self.events.lock().push(event);
    }
}
