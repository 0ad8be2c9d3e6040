use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("cannot open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },
    #[error("no decodable audio stream in {}", path.display())]
    StreamNotFound { path: PathBuf },
    #[error("resampler init failed ({from_rate} Hz -> {to_rate} Hz): {reason}")]
    ResamplerInit {
        from_rate: u32,
        to_rate: u32,
        reason: String,
    },
    #[error("rewind of {} failed: {reason}", path.display())]
    Seek { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no default output device available")]
    NoDevice,
    #[error("no output configuration supports {0} Hz")]
    UnsupportedConfig(u32),
    #[error("cannot query output configs: {0}")]
    Query(String),
    #[error("failed to build output stream: {0}")]
    Build(String),
    #[error("failed to start output stream: {0}")]
    Play(String),
    #[error("device rejected {0} samples")]
    Rejected(usize),
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("window size must be at least 2, got {0}")]
    InvalidWindow(usize),
    #[error("cannot allocate {0} analysis samples")]
    Allocation(usize),
    #[error("expected a window of {expected} samples, got {actual}")]
    WindowLength { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chunk size must be at least 1")]
    EmptyChunk,
    #[error("chunk size {chunk} exceeds analysis window {window}")]
    ChunkLargerThanWindow { chunk: usize, window: usize },
    #[error("frame rate must be positive, got {0}")]
    FrameRate(f64),
    #[error("analysis window must be at least 2 samples, got {0}")]
    Window(usize),
}
