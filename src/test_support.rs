// Test doubles shared by the unit tests of several modules

use crate::decoder::AudioSpec;
use crate::error::{PlayerError, Result};
use crate::output::{AudioSink, OutputFactory};
use crate::resolver::TrackResolver;
use crate::track::TrackLocator;
use crate::worker::WorkerControls;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Write a 16-bit PCM sine tone
pub fn write_tone_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for n in 0..frames {
        let t = n as f32 / sample_rate as f32;
        let value = ((t * 440.0 * std::f32::consts::TAU).sin() * i16::MAX as f32 * 0.25) as i16;
        for _ in 0..channels {
            writer.write_sample(value).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Counters shared by a `MemoryOutput` and every sink it opened
#[derive(Default)]
pub struct OutputStats {
    frames: AtomicU64,
    opened: AtomicUsize,
    released: AtomicUsize,
    pause_requests: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl OutputStats {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn pause_requests(&self) -> usize {
        self.pause_requests.load(Ordering::SeqCst)
    }

    /// Most sinks ever open at the same time
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

/// Output device that records what it was given instead of playing it
pub struct MemoryOutput {
    stats: Arc<OutputStats>,
    fail_first_writes: u32,
    half_first_writes: u32,
    /// Playback speed multiplier; `None` accepts writes instantly
    pace: Option<f64>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(OutputStats::default()),
            fail_first_writes: 0,
            half_first_writes: 0,
            pace: None,
        }
    }

    pub fn failing_first_writes(mut self, count: u32) -> Self {
        self.fail_first_writes = count;
        self
    }

    /// Stall halfway through each of the first `count` writes
    pub fn accepting_half_of_first_writes(mut self, count: u32) -> Self {
        self.half_first_writes = count;
        self
    }

    /// Block each write for the chunk's duration divided by `speed`
    pub fn paced(mut self, speed: f64) -> Self {
        self.pace = Some(speed);
        self
    }

    pub fn stats(&self) -> Arc<OutputStats> {
        self.stats.clone()
    }
}

impl OutputFactory for MemoryOutput {
    fn open(&self, spec: AudioSpec) -> Result<Box<dyn AudioSink>> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(MemorySink {
            stats: self.stats.clone(),
            spec,
            failures_left: self.fail_first_writes,
            halves_left: self.half_first_writes,
            pace: self.pace,
        }))
    }
}

struct MemorySink {
    stats: Arc<OutputStats>,
    spec: AudioSpec,
    failures_left: u32,
    halves_left: u32,
    pace: Option<f64>,
}

impl AudioSink for MemorySink {
    fn write(&mut self, samples: &[f32]) -> Result<usize> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(PlayerError::OutputDevice("simulated underrun".to_string()));
        }

        let accepted = if self.halves_left > 0 {
            self.halves_left -= 1;
            samples.len() / 2
        } else {
            samples.len()
        };

        let frames = accepted as u64 / self.spec.channels as u64;
        if let Some(speed) = self.pace {
            let secs = frames as f64 / self.spec.sample_rate as f64 / speed;
            thread::sleep(Duration::from_secs_f64(secs));
        }
        self.stats.frames.fetch_add(frames, Ordering::SeqCst);
        Ok(accepted)
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        if paused {
            self.stats.pause_requests.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resolver answering from a fixed table
#[derive(Default)]
pub struct StaticResolver {
    tracks: HashMap<String, TrackLocator>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, track: TrackLocator) -> Self {
        self.tracks.insert(query.to_string(), track);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TrackResolver for StaticResolver {
    fn name(&self) -> &'static str {
        "static"
    }

    fn resolve(&self, query: &str, _controls: &WorkerControls) -> Result<TrackLocator> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tracks
            .get(query)
            .cloned()
            .ok_or_else(|| PlayerError::ResolutionFailed(format!("NotFound: {}", query)))
    }
}

/// Scripted stand-in for the mpv JSON IPC server
#[cfg(unix)]
pub mod fake_mpv {
    use super::*;
    use serde_json::{json, Value};
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::{UnixListener, UnixStream};

    pub struct FakeMpvState {
        pub paused: bool,
        pub idle: bool,
        pub time_pos: f64,
        pub loop_file: String,
        /// Track length in seconds; every `time-pos` query advances one second
        pub track_len: f64,
        /// Broadcast an event line ahead of every `loadfile` reply
        pub emit_events: bool,
        /// Never leave idle after `loadfile`
        pub refuse_load: bool,
    }

    impl Default for FakeMpvState {
        fn default() -> Self {
            Self {
                paused: false,
                idle: true,
                time_pos: 0.0,
                loop_file: "no".to_string(),
                track_len: 3.0,
                emit_events: true,
                refuse_load: false,
            }
        }
    }

    pub struct FakeMpv {
        pub endpoint: String,
        pub state: Arc<Mutex<FakeMpvState>>,
        commands: Arc<Mutex<Vec<Vec<Value>>>>,
        _dir: tempfile::TempDir,
    }

    impl FakeMpv {
        pub fn start() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let endpoint = dir.path().join("mpv.sock").to_string_lossy().into_owned();
            let listener = UnixListener::bind(&endpoint).unwrap();
            let state = Arc::new(Mutex::new(FakeMpvState::default()));
            let commands = Arc::new(Mutex::new(Vec::new()));

            {
                let state = state.clone();
                let commands = commands.clone();
                thread::spawn(move || {
                    for stream in listener.incoming() {
                        let Ok(stream) = stream else { break };
                        let state = state.clone();
                        let commands = commands.clone();
                        thread::spawn(move || serve(stream, state, commands));
                    }
                });
            }

            Self {
                endpoint,
                state,
                commands,
                _dir: dir,
            }
        }

        pub fn commands(&self) -> Vec<Vec<Value>> {
            self.commands.lock().clone()
        }

        /// Verbs received so far, in order
        pub fn verbs(&self) -> Vec<String> {
            self.commands()
                .iter()
                .filter_map(|c| c.first().and_then(|v| v.as_str()).map(str::to_string))
                .collect()
        }
    }

    fn serve(stream: UnixStream, state: Arc<Mutex<FakeMpvState>>, commands: Arc<Mutex<Vec<Vec<Value>>>>) {
        let mut writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(_) => return,
        };
        let reader = BufReader::new(stream);

        for line in reader.lines() {
            let Ok(line) = line else { break };
            let request: Value = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(_) => break,
            };
            let command = request["command"].as_array().cloned().unwrap_or_default();
            commands.lock().push(command.clone());

            let (replies, quit) = respond(&command, &mut state.lock());
            for reply in replies {
                if writer.write_all(format!("{}\n", reply).as_bytes()).is_err() {
                    return;
                }
            }
            if quit {
                return;
            }
        }
    }

    fn respond(command: &[Value], state: &mut FakeMpvState) -> (Vec<Value>, bool) {
        let ok = |data: Value| json!({"data": data, "error": "success", "request_id": 0});
        let verb = command.first().and_then(|v| v.as_str()).unwrap_or("");
        let arg = |i: usize| command.get(i).cloned().unwrap_or(Value::Null);

        match verb {
            "loadfile" => {
                let mut replies = Vec::new();
                if state.emit_events {
                    replies.push(json!({"event": "start-file", "playlist_entry_id": 1}));
                }
                if !state.refuse_load {
                    state.idle = false;
                    state.time_pos = 0.0;
                }
                replies.push(ok(Value::Null));
                (replies, false)
            }
            "get_property" => {
                let reply = match arg(1).as_str().unwrap_or("") {
                    "mpv-version" => ok(json!("mpv 0.37.0")),
                    "pause" => ok(json!(state.paused)),
                    "idle-active" => ok(json!(state.idle)),
                    "time-pos" if state.idle => json!({"data": null, "error": "property unavailable"}),
                    "time-pos" => {
                        let pos = state.time_pos;
                        if !state.paused {
                            state.time_pos += 1.0;
                            if state.time_pos > state.track_len {
                                state.time_pos = 0.0;
                                if state.loop_file != "inf" {
                                    state.idle = true;
                                }
                            }
                        }
                        ok(json!(pos))
                    }
                    _ => json!({"data": null, "error": "property not found"}),
                };
                (vec![reply], false)
            }
            "set_property" => {
                match arg(1).as_str().unwrap_or("") {
                    "pause" => state.paused = arg(2).as_bool().unwrap_or(false),
                    "loop-file" => state.loop_file = arg(2).as_str().unwrap_or("no").to_string(),
                    _ => {}
                }
                (vec![ok(Value::Null)], false)
            }
            "cycle" => {
                state.paused = !state.paused;
                (vec![ok(Value::Null)], false)
            }
            "stop" => {
                state.idle = true;
                (vec![ok(Value::Null)], false)
            }
            "quit" => (vec![ok(Value::Null)], true),
            _ => (vec![json!({"data": null, "error": "invalid parameter"})], false),
        }
    }
}
