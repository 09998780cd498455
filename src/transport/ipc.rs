// Local byte-stream endpoint to the media process
// Unix domain socket on unix hosts, named pipe on windows

use super::protocol::{IpcRequest, IpcResponse};
use crate::error::{PlayerError, Result};
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

#[cfg(unix)]
type Stream = std::os::unix::net::UnixStream;
#[cfg(windows)]
type Stream = std::fs::File;

/// Per-process default endpoint name
pub fn default_endpoint() -> String {
    #[cfg(windows)]
    {
        format!(r"\\.\pipe\termify-mpv-{}", std::process::id())
    }
    #[cfg(not(windows))]
    {
        std::env::temp_dir()
            .join(format!("termify-mpv-{}.sock", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }
}

/// One open connection; requests and replies are matched by order
pub struct IpcConnection {
    reader: BufReader<Stream>,
    writer: Stream,
}

impl IpcConnection {
    #[cfg(unix)]
    pub fn connect(endpoint: &str, timeout: Duration) -> std::io::Result<Self> {
        let stream = Stream::connect(endpoint)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Named pipes have no per-call timeout; the media process answers or closes the pipe.
    #[cfg(windows)]
    pub fn connect(endpoint: &str, _timeout: Duration) -> std::io::Result<Self> {
        let pipe = std::fs::OpenOptions::new().read(true).write(true).open(endpoint)?;
        let writer = pipe.try_clone()?;
        Ok(Self {
            reader: BufReader::new(pipe),
            writer,
        })
    }

    /// Write one request line and read lines until its reply arrives.
    /// Event broadcasts in between are skipped.
    pub fn exchange(&mut self, request: &IpcRequest) -> Result<IpcResponse> {
        let line = request.to_line()?;
        log::debug!("IPC -> {}", line.trim_end());

        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| PlayerError::TransportIo(format!("write failed: {}", e)))?;

        loop {
            let mut buf = String::new();
            let read = self
                .reader
                .read_line(&mut buf)
                .map_err(|e| PlayerError::TransportIo(format!("read failed: {}", e)))?;

            if read == 0 {
                return Err(PlayerError::TransportIo("connection closed by media process".to_string()));
            }
            if !buf.ends_with('\n') {
                return Err(PlayerError::TransportIo("reply missing line terminator".to_string()));
            }

            let text = buf.trim_end();
            if text.is_empty() {
                continue;
            }

            let response = IpcResponse::parse(text)?;
            if response.is_event() {
                log::debug!("IPC event skipped: {}", text);
                continue;
            }

            log::debug!("IPC <- {}", text);
            return Ok(response);
        }
    }
}
