// Track resolution: free-text query to a playable locator

pub mod library;
pub mod url;
pub mod ytdlp;

use crate::config::{PlayerConfig, StrategyKind};
use crate::error::{PlayerError, Result};
use crate::track::TrackLocator;
use crate::worker::WorkerControls;
use std::sync::Arc;

pub use library::{Library, LibraryEntry, LibraryResolver};
pub use url::UrlResolver;
pub use ytdlp::YtDlpResolver;

/// Turns a query into a playable track. Called from the worker thread.
///
/// Anything that may block on the network or a child process watches
/// `controls` and gives up with `PlayerError::Cancelled` once it is cancelled.
pub trait TrackResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, query: &str, controls: &WorkerControls) -> Result<TrackLocator>;
}

impl<T: TrackResolver + ?Sized> TrackResolver for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resolve(&self, query: &str, controls: &WorkerControls) -> Result<TrackLocator> {
        (**self).resolve(query, controls)
    }
}

/// Tries resolvers in order; the first success wins
pub struct ResolverChain {
    resolvers: Vec<Box<dyn TrackResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self { resolvers: Vec::new() }
    }

    pub fn with(mut self, resolver: impl TrackResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// url, then local library, then yt-dlp search, as enabled in `[resolver]`.
    /// Remote tracks are downloaded into the cache only for the decode strategy.
    pub fn from_config(config: &PlayerConfig) -> Result<Self> {
        let download = config.strategy == StrategyKind::Decode;
        let mut chain = Self::new();

        if config.resolver.enable_url {
            chain = chain.with(UrlResolver::new(&config.cache_dir, download));
        }
        let library = LibraryResolver::scan(&config.music_dir)?.with_max_results(config.resolver.max_results);
        chain = chain.with(library);
        if config.resolver.enable_ytdlp {
            chain = chain.with(YtDlpResolver::new(&config.resolver.ytdlp_path, &config.cache_dir, download));
        }

        log::info!("Resolver chain ready with {} resolvers", chain.len());
        Ok(chain)
    }
}

impl Default for ResolverChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackResolver for ResolverChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn resolve(&self, query: &str, controls: &WorkerControls) -> Result<TrackLocator> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlayerError::ResolutionFailed("empty query".to_string()));
        }

        for resolver in &self.resolvers {
            if controls.is_cancelled() {
                return Err(PlayerError::Cancelled);
            }
            match resolver.resolve(query, controls) {
                Ok(track) => {
                    log::info!("Resolved '{}' via {}: {} ({})", query, resolver.name(), track.title, track.id);
                    return Ok(track);
                }
                Err(PlayerError::Cancelled) => return Err(PlayerError::Cancelled),
                Err(e) => log::debug!("{} could not resolve '{}': {}", resolver.name(), query, e),
            }
        }

        Err(PlayerError::ResolutionFailed(format!("no match for '{}'", query)))
    }
}
