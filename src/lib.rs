pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod render;

pub use audio::decoder::{probe_metadata, DecoderStream, SampleSource, TrackMetadata};
pub use audio::dsp::fft::{Spectrum, SpectrumAnalyzer};
pub use audio::engine::CpalOutput;
pub use audio::sink::{AudioOutput, PlaybackSink};
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::sync::{Phase, Synchronizer};
