// Audio decoding using Symphonia
// Produces fixed-size chunks of interleaved f32 frames for the stream worker

use crate::error::{PlayerError, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use std::fs::File;
use std::path::Path;

/// Output stream shape read from the file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// Header information of a media file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    pub spec: AudioSpec,
    /// None when the container does not declare a frame count
    pub duration_seconds: Option<u64>,
}

/// Streaming decoder over one local file
pub struct TrackDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: MediaInfo,
    pending: Vec<f32>,
    exhausted: bool,
}

impl TrackDecoder {
    /// Open a file for streaming decode
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| PlayerError::DecodeFailed(format!("Failed to open {}: {}", path.display(), e)))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let media_source_stream = MediaSourceStream::new(Box::new(file), Default::default());
        let probe_result = symphonia::default::get_probe()
            .format(&hint, media_source_stream, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| PlayerError::DecodeFailed(format!("Failed to open media: {}", e)))?;

        let format_reader = probe_result.format;
        let track = format_reader
            .default_track()
            .ok_or_else(|| PlayerError::DecodeFailed("No default track found".to_string()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| PlayerError::DecodeFailed(format!("Failed to create decoder: {}", e)))?;

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| PlayerError::DecodeFailed("Sample rate not specified".to_string()))?;
        let channels = codec_params
            .channels
            .ok_or_else(|| PlayerError::DecodeFailed("Channels not specified".to_string()))?
            .count() as u16;
        if sample_rate == 0 || channels == 0 {
            return Err(PlayerError::DecodeFailed("Empty stream layout".to_string()));
        }

        let info = MediaInfo {
            spec: AudioSpec {
                sample_rate,
                channels,
                bits_per_sample: codec_params.bits_per_sample.unwrap_or(16) as u16,
            },
            duration_seconds: codec_params.n_frames.map(|frames| frames / sample_rate as u64),
        };

        log::info!(
            "Opened {}: {}Hz, {} channels, {} bit, {:?}s",
            path.display(),
            info.spec.sample_rate,
            info.spec.channels,
            info.spec.bits_per_sample,
            info.duration_seconds
        );

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            info,
            pending: Vec::new(),
            exhausted: false,
        })
    }

    pub fn spec(&self) -> AudioSpec {
        self.info.spec
    }

    pub fn info(&self) -> MediaInfo {
        self.info
    }

    /// Next chunk of up to `frames` interleaved frames; `None` once the stream is drained
    pub fn next_chunk(&mut self, frames: usize) -> Result<Option<Vec<f32>>> {
        let wanted = frames.max(1) * self.info.spec.channels as usize;

        while self.pending.len() < wanted && !self.exhausted {
            if !self.decode_packet()? {
                self.exhausted = true;
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = wanted.min(self.pending.len());
        Ok(Some(self.pending.drain(..take).collect()))
    }

    /// Decode one packet into `pending`. Returns false at end of stream.
    fn decode_packet(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => {
                    return Err(PlayerError::DecodeFailed(format!("Failed to read packet: {}", e)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(PlayerError::DecodeFailed(format!("Failed to decode packet: {}", e)));
                }
            };

            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            buf.copy_interleaved_ref(decoded);
            self.pending.extend_from_slice(buf.samples());
            return Ok(true);
        }
    }
}

/// Read header information without decoding audio
pub fn read_media_info(path: &Path) -> Result<MediaInfo> {
    TrackDecoder::open(path).map(|decoder| decoder.info())
}
