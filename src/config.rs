// Player configuration loaded from TOML
//
// Lookup order: explicit path, TERMIFY_CONFIG, <config_dir>/termify/config.toml,
// then compiled defaults.

use crate::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV_VAR: &str = "TERMIFY_CONFIG";

/// Which worker plays a resolved track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Decode locally and stream PCM to the default output device
    Decode,
    /// Delegate decode and output to an external mpv process
    Transport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub strategy: StrategyKind,
    /// Folder scanned for local tracks
    pub music_dir: PathBuf,
    /// Downloaded tracks are kept here and reused
    pub cache_dir: PathBuf,
    pub decode: DecodeConfig,
    pub transport: TransportConfig,
    pub resolver: ResolverConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Frames written to the device per chunk
    pub chunk_frames: usize,
    pub pause_poll_ms: u64,
    /// Consecutive failed chunk writes before the track is abandoned
    pub max_write_failures: u32,
    /// A write making no progress for this long counts as a failed write
    pub write_stall_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub mpv_path: PathBuf,
    /// Socket path or pipe name; per-process default when unset
    pub ipc_path: Option<String>,
    pub startup_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// How long a freshly loaded track may stay idle before it counts as failed
    pub load_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub ytdlp_path: PathBuf,
    pub enable_ytdlp: bool,
    pub enable_url: bool,
    /// Upper bound on library search results
    pub max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub join_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Decode,
            music_dir: PathBuf::from("music"),
            cache_dir: default_cache_dir(),
            decode: DecodeConfig::default(),
            transport: TransportConfig::default(),
            resolver: ResolverConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            pause_poll_ms: 20,
            max_write_failures: 8,
            write_stall_ms: 2000,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mpv_path: PathBuf::from("mpv"),
            ipc_path: None,
            startup_timeout_ms: 2000,
            request_timeout_ms: 2000,
            poll_interval_ms: 250,
            load_timeout_ms: 5000,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            enable_ytdlp: true,
            enable_url: true,
            max_results: 12,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { join_timeout_ms: 10_000 }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("termify")
}

impl PlayerConfig {
    /// Load configuration following the lookup order above
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = dirs::config_dir().map(|d| d.join("termify").join("config.toml")) {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlayerError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.decode.chunk_frames == 0 {
            return Err(PlayerError::Config("decode.chunk_frames must be positive".to_string()));
        }
        if self.decode.pause_poll_ms == 0 || self.transport.poll_interval_ms == 0 {
            return Err(PlayerError::Config("poll intervals must be positive".to_string()));
        }
        if self.transport.startup_timeout_ms == 0 || self.transport.request_timeout_ms == 0 {
            return Err(PlayerError::Config("transport timeouts must be positive".to_string()));
        }
        Ok(())
    }
}

impl SessionConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
