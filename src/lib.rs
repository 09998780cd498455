// Media control core for the Termify terminal music player
// Resolves a query to a track and plays it through local decode or an mpv process

pub mod callback;
pub mod config;
pub mod decoder;
pub mod error;
pub mod output;
pub mod resolver;
pub mod session;
pub mod state;
pub mod strategy;
pub mod track;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod test_support;

use std::sync::Once;

// Re-exports
pub use callback::{CallbackEvent, CallbackManager, ChannelCallback, PlayerCallback, UiCallbacks};
pub use config::{PlayerConfig, StrategyKind};
pub use error::{PlayerError, Result};
pub use resolver::{Library, LibraryResolver, ResolverChain, TrackResolver, UrlResolver, YtDlpResolver};
pub use session::{PlaybackSession, SessionOptions};
pub use state::{PlaybackState, SessionStatus, TerminalReason};
pub use strategy::{DecodeStrategy, PlaybackStrategy, RunOutcome, TransportStrategy, WorkerControls};
pub use track::{ProgressSample, TrackLocator};
pub use transport::TransportDriver;

static INIT_LOGGER: Once = Once::new();

/// Install the env_logger backend once per process; `RUST_LOG` overrides the Info default
pub fn init_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder()
            .is_test(false)
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .try_init();
    });
}
