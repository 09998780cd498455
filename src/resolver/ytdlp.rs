// Search and download through the yt-dlp executable

use super::TrackResolver;
use crate::error::{PlayerError, Result};
use crate::track::TrackLocator;
use crate::worker::WorkerControls;
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CHILD_POLL: Duration = Duration::from_millis(20);

/// Fields of a yt-dlp info dict used here; everything else is ignored
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl SearchHit {
    pub fn watch_url(&self) -> String {
        format!("https://youtu.be/{}", self.id)
    }
}

/// First hit of a `--dump-single-json` search; the result is a playlist
/// whose `entries` hold the hits, or a bare info dict for direct links
pub fn parse_search(output: &[u8]) -> Result<SearchHit> {
    let value: Value = serde_json::from_slice(output)
        .map_err(|e| PlayerError::ResolutionFailed(format!("unreadable yt-dlp output: {}", e)))?;

    let hit = match value.get("entries") {
        Some(Value::Array(entries)) => entries
            .first()
            .cloned()
            .ok_or_else(|| PlayerError::ResolutionFailed("no search results".to_string()))?,
        Some(_) => return Err(PlayerError::ResolutionFailed("unexpected entries field".to_string())),
        None => value,
    };

    serde_json::from_value(hit).map_err(|e| PlayerError::ResolutionFailed(format!("unusable search result: {}", e)))
}

fn drain_pipe(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            log::debug!("Child pipe read failed: {}", e);
        }
        buf
    })
}

/// Run `command` to completion, killing it as soon as `controls` are cancelled.
/// Output pipes are drained on side threads so a chatty child never blocks on a full pipe.
fn run_until_cancelled(mut command: Command, controls: &WorkerControls) -> Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PlayerError::ResolutionFailed(format!("failed to run {}: {}", program, e)))?;

    let stdout = child.stdout.take().map(drain_pipe);
    let stderr = child.stderr.take().map(drain_pipe);

    let status = loop {
        if controls.is_cancelled() {
            if let Err(e) = child.kill() {
                log::debug!("Kill of {} failed: {}", program, e);
            }
            let _ = child.wait();
            log::info!("Cancelled {}", program);
            return Err(PlayerError::Cancelled);
        }
        match child.try_wait()? {
            Some(status) => break status,
            None => thread::sleep(CHILD_POLL),
        }
    };

    let collect = |handle: Option<JoinHandle<Vec<u8>>>| handle.and_then(|h| h.join().ok()).unwrap_or_default();
    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

pub struct YtDlpResolver {
    program: PathBuf,
    cache_dir: PathBuf,
    download: bool,
}

impl YtDlpResolver {
    /// With `download` off the watch URL is handed to the player verbatim
    pub fn new(program: &Path, cache_dir: &Path, download: bool) -> Self {
        Self {
            program: program.to_path_buf(),
            cache_dir: cache_dir.to_path_buf(),
            download,
        }
    }

    pub fn search_args(query: &str) -> Vec<String> {
        vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            format!("ytsearch1:{}", query),
        ]
    }

    pub fn download_args(&self, hit: &SearchHit) -> Vec<String> {
        let template = self.cache_dir.join("%(id)s.%(ext)s");
        vec![
            "--format".to_string(),
            "bestaudio/best".to_string(),
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            "wav".to_string(),
            "--no-playlist".to_string(),
            "--quiet".to_string(),
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
            hit.watch_url(),
        ]
    }

    /// Where the extracted audio of `id` lands
    pub fn cached_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.wav", id))
    }

    fn run(&self, args: &[String], controls: &WorkerControls) -> Result<Vec<u8>> {
        log::debug!("Running {} {}", self.program.display(), args.join(" "));

        let mut command = Command::new(&self.program);
        command.args(args);
        let output = run_until_cancelled(command, controls)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("no output").trim().to_string();
            return Err(PlayerError::ResolutionFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                reason
            )));
        }

        Ok(output.stdout)
    }

    pub fn search(&self, query: &str, controls: &WorkerControls) -> Result<SearchHit> {
        let stdout = self.run(&Self::search_args(query), controls)?;
        parse_search(&stdout)
    }

    /// Extract audio for `hit` into the cache unless it is already there
    pub fn fetch(&self, hit: &SearchHit, controls: &WorkerControls) -> Result<PathBuf> {
        let path = self.cached_path(&hit.id);
        if path.is_file() {
            log::info!("Using cached download {}", path.display());
            return Ok(path);
        }

        std::fs::create_dir_all(&self.cache_dir)?;
        log::info!("Downloading {} to {}", hit.watch_url(), path.display());
        self.run(&self.download_args(hit), controls)?;

        if !path.is_file() {
            return Err(PlayerError::ResolutionFailed(format!(
                "yt-dlp finished but {} is missing",
                path.display()
            )));
        }
        Ok(path)
    }
}

impl TrackResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn resolve(&self, query: &str, controls: &WorkerControls) -> Result<TrackLocator> {
        let hit = self.search(query, controls)?;
        let title = hit.title.clone().unwrap_or_else(|| hit.id.clone());
        let duration = hit.duration.map(|d| d.max(0.0).round() as u64).unwrap_or(0);

        let source_uri = if self.download {
            self.fetch(&hit, controls)?.to_string_lossy().into_owned()
        } else {
            hit.watch_url()
        };

        Ok(TrackLocator::new(hit.id, source_uri, title, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_playlist() {
        let output = br#"{"_type":"playlist","id":"song a","entries":[
            {"id":"v1","title":"Song A","duration":180.0,"uploader":"someone"},
            {"id":"v2","title":"Song B","duration":90}
        ]}"#;

        let hit = parse_search(output).unwrap();
        assert_eq!(hit.id, "v1");
        assert_eq!(hit.title.as_deref(), Some("Song A"));
        assert_eq!(hit.duration, Some(180.0));
        assert_eq!(hit.watch_url(), "https://youtu.be/v1");
    }

    #[test]
    fn test_parse_search_single_video() {
        let hit = parse_search(br#"{"id":"v9","title":null}"#).unwrap();
        assert_eq!(hit.id, "v9");
        assert_eq!(hit.title, None);
        assert_eq!(hit.duration, None);
    }

    #[test]
    fn test_parse_search_empty_results() {
        let err = parse_search(br#"{"_type":"playlist","entries":[]}"#).unwrap_err();
        assert!(matches!(err, PlayerError::ResolutionFailed(_)));

        let err = parse_search(b"ERROR: something").unwrap_err();
        assert!(matches!(err, PlayerError::ResolutionFailed(_)));
    }

    #[test]
    fn test_command_lines() {
        assert_eq!(YtDlpResolver::search_args("song a").last().unwrap(), "ytsearch1:song a");

        let resolver = YtDlpResolver::new(Path::new("yt-dlp"), Path::new("/tmp/cache"), true);
        let hit = SearchHit { id: "v1".into(), title: None, duration: None };
        let args = resolver.download_args(&hit);
        assert!(args.windows(2).any(|w| w[0] == "--audio-format" && w[1] == "wav"));
        assert!(args.contains(&"/tmp/cache/%(id)s.%(ext)s".to_string()));
        assert_eq!(args.last().unwrap(), "https://youtu.be/v1");
        assert_eq!(resolver.cached_path("v1"), PathBuf::from("/tmp/cache/v1.wav"));
    }

    #[test]
    fn test_cached_download_is_reused() {
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(cache.path().join("v1.wav"), b"cached").unwrap();
        // The program is never invoked for a cache hit
        let resolver = YtDlpResolver::new(Path::new("/nonexistent/yt-dlp"), cache.path(), true);

        let hit = SearchHit { id: "v1".into(), title: Some("Song A".into()), duration: Some(180.0) };
        assert_eq!(resolver.fetch(&hit, &WorkerControls::new()).unwrap(), cache.path().join("v1.wav"));
    }

    #[test]
    fn test_missing_program_is_resolution_failure() {
        let cache = tempfile::tempdir().unwrap();
        let resolver = YtDlpResolver::new(Path::new("/nonexistent/yt-dlp"), cache.path(), false);
        assert!(matches!(
            resolver.resolve("song a", &WorkerControls::new()),
            Err(PlayerError::ResolutionFailed(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_running_program() {
        let controls = WorkerControls::new();
        let canceller = {
            let controls = controls.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                controls.cancel();
            })
        };

        let started = std::time::Instant::now();
        let mut command = Command::new("sleep");
        command.arg("30");
        let err = run_until_cancelled(command, &controls).unwrap_err();
        canceller.join().unwrap();

        assert_eq!(err, PlayerError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_program_output_is_collected() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo found; echo warned >&2; exit 3"]);
        let output = run_until_cancelled(command, &WorkerControls::new()).unwrap();

        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, b"found\n");
        assert_eq!(output.stderr, b"warned\n");
    }
}
