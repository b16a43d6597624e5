//! Chunked streaming decoder
//!
//! Wraps a symphonia format reader + decoder behind a frame-oriented
//! read/seek contract. Output is always interleaved stereo at the file's
//! native rate: mono is duplicated, anything above two channels keeps the
//! first pair.

use std::fs::File;
use std::path::Path;

use mx_core::Sample;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio_file::AudioFileFormat;
use crate::{FileError, FileResult};

pub struct StreamReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    total_frames: Option<u64>,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Decoded interleaved-stereo frames not yet handed to the caller
    pending: Vec<Sample>,
    pending_pos: usize,
    eof: bool,
}

impl StreamReader {
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();
        if AudioFileFormat::from_path(path) == AudioFileFormat::Unknown {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string();
            return Err(FileError::UnsupportedFormat(ext));
        }

        let file =
            File::open(path).map_err(|_| FileError::NotFound(path.display().to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )
            .map_err(|e| FileError::DecodeError(e.to_string()))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or_else(|| FileError::InvalidFile("no audio track found".to_string()))?;

        let track_id = track.id;
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let total_frames = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| FileError::DecodeError(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            total_frames,
            sample_buf: None,
            pending: Vec::new(),
            pending_pos: 0,
            eof: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total frames, when the container declares them
    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    /// Read up to `out.len() / 2` stereo frames into the interleaved
    /// buffer. Returns the number of frames produced; fewer than requested
    /// (possibly zero) means end of stream.
    pub fn read_frames(&mut self, out: &mut [Sample]) -> FileResult<usize> {
        let want_frames = out.len() / 2;
        let mut produced = 0;

        while produced < want_frames {
            if self.pending_pos >= self.pending.len() {
                if self.eof || !self.decode_next_packet()? {
                    break;
                }
            }

            let available = (self.pending.len() - self.pending_pos) / 2;
            let take = available.min(want_frames - produced);
            let src = &self.pending[self.pending_pos..self.pending_pos + take * 2];
            out[produced * 2..(produced + take) * 2].copy_from_slice(src);
            self.pending_pos += take * 2;
            produced += take;
        }

        Ok(produced)
    }

    /// Reposition to an absolute frame. Container-level seeks can land
    /// early (compressed formats seek to packet boundaries); the remainder
    /// is decoded and discarded so the next read starts exactly at `frame`.
    pub fn seek(&mut self, frame: u64) -> FileResult<()> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| FileError::DecodeError(e.to_string()))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.eof = false;

        if seeked.actual_ts < frame {
            self.skip_frames(frame - seeked.actual_ts)?;
        }
        Ok(())
    }

    fn skip_frames(&mut self, mut remaining: u64) -> FileResult<()> {
        while remaining > 0 {
            if self.pending_pos >= self.pending.len() {
                if self.eof || !self.decode_next_packet()? {
                    return Ok(());
                }
            }
            let available = ((self.pending.len() - self.pending_pos) / 2) as u64;
            let drop = available.min(remaining);
            self.pending_pos += (drop as usize) * 2;
            remaining -= drop;
        }
        Ok(())
    }

    /// Decode one packet into `pending`. Returns false at end of stream.
    fn decode_next_packet(&mut self) -> FileResult<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return Ok(false);
                }
                Err(e) => return Err(FileError::DecodeError(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let duration = decoded.capacity() as u64;
                    let frames = decoded.frames();
                    let src_channels = spec.channels.count();

                    let buf = self
                        .sample_buf
                        .get_or_insert_with(|| SampleBuffer::<f32>::new(duration, spec));
                    if buf.capacity() < frames * src_channels {
                        *buf = SampleBuffer::<f32>::new(duration, spec);
                    }
                    buf.copy_interleaved_ref(decoded);

                    self.pending.clear();
                    self.pending_pos = 0;
                    self.pending.reserve(frames * 2);
                    let samples = buf.samples();
                    match src_channels {
                        0 => {}
                        1 => {
                            for &s in samples.iter().take(frames) {
                                self.pending.push(s);
                                self.pending.push(s);
                            }
                        }
                        n => {
                            for frame in samples.chunks_exact(n).take(frames) {
                                self.pending.push(frame[0]);
                                self.pending.push(frame[1]);
                            }
                        }
                    }
                    return Ok(true);
                }
                Err(symphonia::core::errors::Error::DecodeError(err)) => {
                    log::warn!("skipping undecodable packet: {err}");
                    continue;
                }
                Err(e) => return Err(FileError::DecodeError(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_counting_wav(path: &Path, frames: u32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let v = i as f32 / frames as f32;
            writer.write_sample(v).unwrap();
            writer.write_sample(-v).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_chunked_read_matches_file() {
        let path = std::env::temp_dir().join("mx_stream_chunked.wav");
        write_counting_wav(&path, 10_000);

        let mut reader = StreamReader::open(&path).unwrap();
        assert_eq!(reader.sample_rate(), 44100);
        assert_eq!(reader.channels(), 2);
        assert_eq!(reader.total_frames(), Some(10_000));

        let mut all = Vec::new();
        let mut chunk = vec![0.0f32; 1024 * 2];
        loop {
            let n = reader.read_frames(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            all.extend_from_slice(&chunk[..n * 2]);
        }
        assert_eq!(all.len(), 10_000 * 2);
        assert!((all[2 * 5000] - 0.5).abs() < 1e-6);
        assert!((all[2 * 5000 + 1] + 0.5).abs() < 1e-6);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_seek_is_frame_accurate() {
        let path = std::env::temp_dir().join("mx_stream_seek.wav");
        write_counting_wav(&path, 10_000);

        let mut reader = StreamReader::open(&path).unwrap();
        reader.seek(2_500).unwrap();

        let mut chunk = vec![0.0f32; 8];
        let n = reader.read_frames(&mut chunk).unwrap();
        assert_eq!(n, 4);
        assert!((chunk[0] - 0.25).abs() < 1e-6);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_mono_duplicates_to_stereo() {
        let path = std::env::temp_dir().join("mx_stream_mono.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(0.5f32).unwrap();
        }
        writer.finalize().unwrap();

        let mut reader = StreamReader::open(&path).unwrap();
        let mut chunk = vec![0.0f32; 16];
        reader.read_frames(&mut chunk).unwrap();
        assert_eq!(chunk[0], 0.5);
        assert_eq!(chunk[1], 0.5);

        std::fs::remove_file(&path).ok();
    }
}
