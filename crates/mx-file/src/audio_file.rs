//! Whole-file decoding

use std::fs::File;
use std::path::Path;

use mx_core::Sample;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{FileError, FileResult};

/// Audio file format, keyed off the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFileFormat {
    Wav,
    Flac,
    Mp3,
    Ogg,
    Unknown,
}

impl AudioFileFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "wav" | "wave" => Self::Wav,
            "flac" => Self::Flac,
            "mp3" => Self::Mp3,
            "ogg" | "oga" => Self::Ogg,
            _ => Self::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }
}

/// Fully decoded audio: one Vec per channel, plus the file's native rate
#[derive(Debug, Clone)]
pub struct AudioData {
    pub channels: Vec<Vec<Sample>>,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }
}

/// Reject paths whose extension no decoder handles
fn check_format(path: &Path) -> FileResult<AudioFileFormat> {
    let format = AudioFileFormat::from_path(path);
    if format == AudioFileFormat::Unknown {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        return Err(FileError::UnsupportedFormat(ext));
    }
    Ok(format)
}

/// Read a WAV file using hound
pub fn read_wav<P: AsRef<Path>>(path: P) -> FileResult<AudioData> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(FileError::NotFound(path.display().to_string()));
    }

    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    let sample_rate = spec.sample_rate;

    let samples: Vec<Sample> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.unwrap_or(0.0))
            .collect(),
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max_value)
                .collect()
        }
    };

    let num_frames = samples.len() / num_channels;
    let mut channels = vec![vec![0.0; num_frames]; num_channels];
    for (i, chunk) in samples.chunks_exact(num_channels).enumerate() {
        for (ch, &sample) in chunk.iter().enumerate() {
            channels[ch][i] = sample;
        }
    }

    Ok(AudioData {
        channels,
        sample_rate,
    })
}

/// Decode a whole audio file (WAV via hound, the rest via symphonia)
pub fn read_audio<P: AsRef<Path>>(path: P) -> FileResult<AudioData> {
    let path = path.as_ref();
    let format = check_format(path)?;
    if format == AudioFileFormat::Wav {
        return read_wav(path);
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
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let mut format_reader = probed.format;
    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| FileError::InvalidFile("no audio track found".to_string()))?;

    let track_id = track.id;
    let num_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let mut channels: Vec<Vec<Sample>> = vec![Vec::new(); num_channels];
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        match format_reader.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(decoded) => {
                        let spec = *decoded.spec();
                        let duration = decoded.capacity() as u64;
                        let buf = sample_buf.get_or_insert_with(|| {
                            SampleBuffer::<f32>::new(duration, spec)
                        });
                        if buf.capacity() < decoded.frames() * num_channels {
                            *buf = SampleBuffer::<f32>::new(duration, spec);
                        }
                        buf.copy_interleaved_ref(decoded);
                        for (i, &sample) in buf.samples().iter().enumerate() {
                            channels[i % num_channels].push(sample);
                        }
                    }
                    Err(symphonia::core::errors::Error::DecodeError(err)) => {
                        log::warn!("skipping undecodable packet: {err}");
                        continue;
                    }
                    Err(e) => return Err(FileError::DecodeError(e.to_string())),
                }
            }
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(FileError::DecodeError(e.to_string())),
        }
    }

    Ok(AudioData {
        channels,
        sample_rate,
    })
}
