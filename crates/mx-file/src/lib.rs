//! mx-file: audio file decoding
//!
//! Two ways in:
//! - [`read_audio`] decodes a whole file into split-channel f32 data
//!   (hound for WAV, symphonia for FLAC/MP3/OGG)
//! - [`StreamReader`] opens a file for chunked decoding with seek, used by
//!   disk-streamed sources

mod audio_file;
mod error;
mod stream;

pub use audio_file::{read_audio, read_wav, AudioData, AudioFileFormat};
pub use error::{FileError, FileResult};
pub use stream::StreamReader;
