// Direct HTTP(S) URLs, optionally downloaded into the local cache

use super::TrackResolver;
use crate::decoder::read_media_info;
use crate::error::{PlayerError, Result};
use crate::track::TrackLocator;
use crate::worker::WorkerControls;
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const COPY_BUFFER: usize = 64 * 1024;
const CANCEL_CHECK: Duration = Duration::from_millis(20);

fn create_http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(30))
        .timeout_read(Duration::from_secs(60))
        .timeout_write(Duration::from_secs(30))
        .user_agent("termify/0.1")
        .redirects(10)
        .build()
}

fn url_hash(url: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    hasher.finish()
}

/// Sleep for `delay` unless cancelled first; returns false on cancellation
fn backoff(delay: Duration, controls: &WorkerControls) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if controls.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(CANCEL_CHECK.min(deadline - now));
    }
}

/// Last non-empty path segment, without query or fragment
fn title_from_url(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = without_scheme.split(['?', '#']).next().unwrap_or(without_scheme);
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}

pub struct UrlResolver {
    agent: ureq::Agent,
    cache_dir: PathBuf,
    download: bool,
    max_retries: u32,
}

impl UrlResolver {
    /// With `download` off the URL is handed to the player verbatim
    pub fn new(cache_dir: &Path, download: bool) -> Self {
        Self {
            agent: create_http_agent(),
            cache_dir: cache_dir.to_path_buf(),
            download,
            max_retries: 3,
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Cache file for `url`; the extension is kept as a decoder hint
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let title = title_from_url(url);
        let name = match Path::new(&title).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("url_{:016x}.{}", url_hash(url), ext.to_ascii_lowercase()),
            None => format!("url_{:016x}", url_hash(url)),
        };
        self.cache_dir.join(name)
    }

    /// GET with exponential backoff between attempts, checking `controls` before each
    fn retry_request(&self, url: &str, controls: &WorkerControls) -> Result<ureq::Response> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * (1 << (attempt - 1)));
                log::info!("Retry attempt {} after {:?}", attempt, delay);
                if !backoff(delay, controls) {
                    return Err(PlayerError::Cancelled);
                }
            }
            if controls.is_cancelled() {
                return Err(PlayerError::Cancelled);
            }

            match self.agent.get(url).call() {
                Ok(response) => return Ok(response),
                Err(e) => {
                    log::warn!("Request attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(PlayerError::ResolutionFailed(format!(
            "HTTP request failed after {} attempts: {}",
            self.max_retries + 1,
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    fn download_to(&self, url: &str, dest: &Path, controls: &WorkerControls) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        let response = self.retry_request(url, controls)?;

        // Write to a side file so an interrupted download is never mistaken for a cached one
        let partial = dest.with_extension("part");
        let result = copy_body(response.into_reader(), &partial, controls);
        match result {
            Ok(copied) => {
                fs::rename(&partial, dest)?;
                log::info!("Downloaded {} bytes from {}", copied, url);
                Ok(())
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&partial) {
                    log::debug!("Could not remove {}: {}", partial.display(), rm);
                }
                Err(e)
            }
        }
    }
}

/// Copy a response body into `path` in bounded reads, stopping on cancellation
fn copy_body(mut reader: impl Read, path: &Path, controls: &WorkerControls) -> Result<u64> {
    let mut file = File::create(path)?;
    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut copied = 0u64;

    loop {
        if controls.is_cancelled() {
            return Err(PlayerError::Cancelled);
        }
        let read = reader
            .read(&mut buffer)
            .map_err(|e| PlayerError::ResolutionFailed(format!("Download failed: {}", e)))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])?;
        copied += read as u64;
    }

    file.flush()?;
    Ok(copied)
}

impl TrackResolver for UrlResolver {
    fn name(&self) -> &'static str {
        "url"
    }

    fn resolve(&self, query: &str, controls: &WorkerControls) -> Result<TrackLocator> {
        let url = query.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(PlayerError::ResolutionFailed(format!("not a URL: {}", url)));
        }

        let id = format!("{:016x}", url_hash(url));
        let title = title_from_url(url);

        if !self.download {
            return Ok(TrackLocator::new(id, url, title, 0));
        }

        let path = self.cache_path(url);
        let cached = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        if cached {
            log::info!("Using cached download {}", path.display());
        } else {
            self.download_to(url, &path, controls)?;
        }

        let duration = read_media_info(&path).ok().and_then(|info| info.duration_seconds).unwrap_or(0);
        Ok(TrackLocator::new(id, path.to_string_lossy(), title, duration))
    }
}
