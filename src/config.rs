use std::time::Duration;

use crate::{audio::resample::CANONICAL_SAMPLE_RATE, error::ConfigError};

pub const DEFAULT_WINDOW_SIZE: usize = 2048;
pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_FPS: f64 = 60.0;

/// Tuning of the streaming loop. Sample counts are in canonical samples.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    /// Analysis window, also the ring capacity.
    pub window_size: usize,
    /// Samples read from the visualization decoder per visual tick.
    pub chunk_size: usize,
    /// Initial block queued before streaming starts (~500 ms).
    pub preload_samples: usize,
    /// Backlog below which the playback decoder is pulled again (~200 ms).
    pub low_watermark: usize,
    pub refill_chunk: usize,
    pub refill_interval: Duration,
    pub frame_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let sample_rate = CANONICAL_SAMPLE_RATE;
        Self {
            sample_rate,
            window_size: DEFAULT_WINDOW_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            preload_samples: sample_rate as usize / 2,
            low_watermark: sample_rate as usize / 5,
            refill_chunk: 1024,
            refill_interval: Duration::from_millis(10),
            frame_interval: Duration::from_secs_f64(1.0 / DEFAULT_FPS),
        }
    }
}

impl PipelineConfig {
    pub fn with_frame_rate(mut self, fps: f64) -> Result<Self, ConfigError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(ConfigError::FrameRate(fps));
        }
        self.frame_interval = Duration::from_secs_f64(1.0 / fps);
        Ok(self)
    }

    /// Largest tolerated gap between the audible and the visualized position.
    pub fn drift_ceiling(&self) -> u64 {
        2 * self.chunk_size as u64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size < 2 {
            return Err(ConfigError::Window(self.window_size));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::EmptyChunk);
        }
        if self.chunk_size > self.window_size {
            return Err(ConfigError::ChunkLargerThanWindow {
                chunk: self.chunk_size,
                window: self.window_size,
            });
        }
        if self.frame_interval.is_zero() {
            return Err(ConfigError::FrameRate(f64::INFINITY));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_canonical_timing() {
        let config = PipelineConfig::default();
        assert_eq!(config.preload_samples, 22_050);
        assert_eq!(config.low_watermark, 8_820);
        assert_eq!(config.drift_ceiling(), 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn frame_rate_must_be_positive() {
        assert!(PipelineConfig::default().with_frame_rate(0.0).is_err());
        assert!(PipelineConfig::default().with_frame_rate(f64::NAN).is_err());
        let config = PipelineConfig::default().with_frame_rate(30.0).unwrap();
        assert_eq!(config.frame_interval, Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn chunk_must_fit_window() {
        let config = PipelineConfig {
            chunk_size: 4096,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChunkLargerThanWindow { .. })
        ));

        let config = PipelineConfig {
            chunk_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyChunk)));
    }
}
