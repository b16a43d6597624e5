//! Engine boundary errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    File(#[from] mx_file::FileError),

    #[error(transparent)]
    Audio(#[from] mx_audio::AudioError),

    #[error("No such node: {0}")]
    NoSuchNode(String),

    #[error("No such effect slot {1} on node {0}")]
    NoSuchEffect(String, usize),

    #[error("Source rate {source_rate} Hz does not match engine rate {engine_rate} Hz")]
    SampleRateMismatch { source_rate: u32, engine_rate: u32 },

    #[error("System is closed")]
    Closed,

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("A worker thread panicked; the system was shut down")]
    WorkerPanic,
}

pub type EngineResult<T> = Result<T, EngineError>;
