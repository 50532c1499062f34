// Audio decoding using Symphonia
//
// Sources come through the MediaCatalog: locators that resolve to a path
// are streamed from the file, anything else is pulled into memory first.

use std::fs::File;
use std::io::{Cursor, Read};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::catalog::MediaCatalog;
use crate::error::{PlayerError, Result};
use crate::track::Locator;

/// Stream parameters of an opened resource.
#[derive(Debug, Clone)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
}

/// Decoder for one audio resource.
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    pub format: AudioFormat,
}

impl AudioDecoder {
    /// Open the resource behind `locator` through the catalog and probe it.
    pub fn open(catalog: &dyn MediaCatalog, locator: &Locator) -> Result<Self> {
        let mut hint = Hint::new();
        if let Some(extension) = locator.as_str().rsplit_once('.').map(|(_, ext)| ext) {
            if !extension.contains('/') {
                hint.with_extension(extension);
            }
        }

        let source: Box<dyn MediaSource> = match catalog.resolve_path(locator) {
            Some(path) => Box::new(
                File::open(&path)
                    .map_err(|e| PlayerError::Load(format!("open {}: {}", path.display(), e)))?,
            ),
            None => {
                let mut reader = catalog
                    .open(locator)
                    .map_err(|e| PlayerError::Load(format!("open {}: {}", locator, e)))?;
                let mut bytes = Vec::new();
                reader
                    .read_to_end(&mut bytes)
                    .map_err(|e| PlayerError::Load(format!("read {}: {}", locator, e)))?;
                Box::new(Cursor::new(bytes))
            }
        };

        let stream = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlayerError::Load(format!("probe failed: {}", e)))?;

        let reader = probed.format;
        let track = reader
            .default_track()
            .ok_or_else(|| PlayerError::Load("no default track".to_string()))?;
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlayerError::Decode(format!("codec init failed: {}", e)))?;

        let params = &track.codec_params;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| PlayerError::Load("sample rate not specified".to_string()))?;
        let channels = params
            .channels
            .ok_or_else(|| PlayerError::Load("channel layout not specified".to_string()))?
            .count() as u16;
        let duration_ms = params
            .n_frames
            .map(|frames| frames * 1000 / sample_rate as u64)
            .unwrap_or(0);

        let format = AudioFormat {
            sample_rate,
            channels,
            duration_ms,
        };
        log::info!(
            "opened {}: {}Hz, {} channels, {} ms",
            locator,
            format.sample_rate,
            format.channels,
            format.duration_ms
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            format,
        })
    }

    /// Decode the next packet into interleaved f32 samples.
    /// `Ok(None)` signals end of stream.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(PlayerError::Decode(format!("packet read failed: {}", e)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self
                .decoder
                .decode(&packet)
                .map_err(|e| PlayerError::Decode(format!("decode failed: {}", e)))?;

            let spec = *decoded.spec();
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            return Ok(Some(buffer.samples().to_vec()));
        }
    }

    /// Seek to `position_ms` and reset decoder state.
    pub fn seek(&mut self, position_ms: u64) -> Result<()> {
        let ts = position_ms * self.format.sample_rate as u64 / 1000;
        self.reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| PlayerError::Playback(format!("seek failed: {}", e)))?;
        self.decoder.reset();
        Ok(())
    }
}

/// Interleaved-f32 ring buffer between the decode thread and the output
/// callback.
pub struct SampleRing {
    buffer: Vec<f32>,
    write_pos: usize,
    read_pos: usize,
}

impl SampleRing {
    pub fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size],
            write_pos: 0,
            read_pos: 0,
        }
    }

    pub fn write(&mut self, data: &[f32]) -> usize {
        let to_write = data.len().min(self.available_write());
        for &sample in &data[..to_write] {
            self.buffer[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.buffer.len();
        }
        to_write
    }

    pub fn read(&mut self, output: &mut [f32]) -> usize {
        let to_read = output.len().min(self.available_read());
        for slot in &mut output[..to_read] {
            *slot = self.buffer[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.buffer.len();
        }
        to_read
    }

    pub fn available_write(&self) -> usize {
        self.buffer.len() - self.available_read() - 1
    }

    pub fn available_read(&self) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            self.buffer.len() - (self.read_pos - self.write_pos)
        }
    }

    pub fn fullness(&self) -> f32 {
        self.available_read() as f32 / self.buffer.len() as f32
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
    }
}
