// Playback session state management

use crate::error::{PlayerError, Result};
use crate::track::{ProgressSample, TrackLocator};
use parking_lot::RwLock;
use std::sync::Arc;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No worker alive
    Idle,
    /// Worker started, track being resolved or opened
    Loading,
    /// Worker streaming audio
    Playing,
    /// Worker alive but holding output
    Paused,
    /// Cancellation requested, waiting for the worker to exit
    Stopping,
}

/// Why the session last returned to `Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// Track streamed to its natural end
    Finished,
    /// Explicit stop, or superseded by a new play/rewind
    Stopped,
    /// Resolution, decode, device or transport failure
    Failed,
}

/// Snapshot of what the session is doing
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: PlaybackState,
    pub track: Option<TrackLocator>,
    /// Latest progress sample of the active track
    pub progress: Option<ProgressSample>,
    pub repeat: bool,
    pub last_terminal: Option<TerminalReason>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            track: None,
            progress: None,
            repeat: false,
            last_terminal: None,
        }
    }
}

/// Whether `from -> to` is an edge of the session state machine
pub fn is_valid_transition(from: PlaybackState, to: PlaybackState) -> bool {
    use PlaybackState::*;

    matches!(
        (from, to),
        (Idle, Loading)
            | (Loading, Playing)
            | (Loading, Idle)
            | (Loading, Stopping)
            | (Playing, Paused)
            | (Playing, Idle)
            | (Playing, Stopping)
            | (Paused, Playing)
            | (Paused, Idle)
            | (Paused, Stopping)
            | (Stopping, Idle)
    )
}

/// Thread-safe state container shared between the session and its worker.
///
/// Every transition is a check-and-set under one write lock, so the worker's
/// terminal notifications and the caller's operations never interleave into
/// an inconsistent state.
#[derive(Clone)]
pub struct StateContainer {
    status: Arc<RwLock<SessionStatus>>,
}

impl StateContainer {
    pub fn new() -> Self {
        Self {
            status: Arc::new(RwLock::new(SessionStatus::default())),
        }
    }

    pub fn get_state(&self) -> PlaybackState {
        self.status.read().state
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn update_status<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionStatus),
    {
        let mut status = self.status.write();
        f(&mut status);
    }

    /// Move to `to` from whatever the current state is, if that edge exists.
    /// Returns the previous state.
    pub fn transition(&self, to: PlaybackState) -> Result<PlaybackState> {
        let mut status = self.status.write();
        let from = status.state;
        if !is_valid_transition(from, to) {
            return Err(PlayerError::InvalidState(format!(
                "Invalid state transition from {:?} to {:?}",
                from, to
            )));
        }
        status.state = to;
        log::debug!("Session state changed: {:?} -> {:?}", from, to);
        Ok(from)
    }

    /// Move to `to` only if the current state is one of `allowed`.
    /// Returns the previous state when the transition was applied.
    pub fn transition_from(&self, allowed: &[PlaybackState], to: PlaybackState) -> Option<PlaybackState> {
        let mut status = self.status.write();
        let from = status.state;
        if !allowed.contains(&from) || !is_valid_transition(from, to) {
            return None;
        }
        status.state = to;
        log::debug!("Session state changed: {:?} -> {:?}", from, to);
        Some(from)
    }

    /// Return to `Idle` from `allowed`, recording why.
    pub fn settle_idle(&self, allowed: &[PlaybackState], reason: TerminalReason) -> Option<PlaybackState> {
        let mut status = self.status.write();
        let from = status.state;
        if !allowed.contains(&from) || !is_valid_transition(from, PlaybackState::Idle) {
            return None;
        }
        status.state = PlaybackState::Idle;
        status.progress = None;
        status.last_terminal = Some(reason);
        log::debug!("Session state changed: {:?} -> Idle ({:?})", from, reason);
        Some(from)
    }
}

impl Default for StateContainer {
    fn default() -> Self {
        Self::new()
    }
}
