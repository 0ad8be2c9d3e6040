use log::debug;
use rubato::{
    ResampleError, Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use crate::error::DecoderError;

/// Sample rate every decoded stream is normalized to.
pub const CANONICAL_SAMPLE_RATE: u32 = 44_100;

/// Mono frames handed to the sinc resampler per call.
const RESAMPLER_CHUNK_FRAMES: usize = 1024;

/// Converts interleaved float audio of any channel count and rate into the
/// canonical mono 16-bit stream.
///
/// Input is downmixed first, then buffered until a full resampler block is
/// available, so the output sequence depends only on the input sequence and
/// never on how callers slice it.
pub struct CanonicalResampler {
    source_rate: u32,
    sinc: Option<SincFixedIn<f32>>,
    input: Vec<f32>,
    delay_remaining: usize,
    frames_in: u64,
    frames_out: u64,
}

impl CanonicalResampler {
    pub fn new(source_rate: u32) -> Result<Self, DecoderError> {
        if source_rate == 0 {
            return Err(DecoderError::ResamplerInit {
                from_rate: source_rate,
                to_rate: CANONICAL_SAMPLE_RATE,
                reason: "source sample rate is zero".to_string(),
            });
        }

        let sinc = if source_rate == CANONICAL_SAMPLE_RATE {
            None
        } else {
            let ratio = CANONICAL_SAMPLE_RATE as f64 / source_rate as f64;
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLER_CHUNK_FRAMES, 1)
                .map_err(|e| DecoderError::ResamplerInit {
                    from_rate: source_rate,
                    to_rate: CANONICAL_SAMPLE_RATE,
                    reason: e.to_string(),
                })?;
            debug!(
                "Resampling {source_rate} Hz -> {CANONICAL_SAMPLE_RATE} Hz (filter delay {} frames)",
                resampler.output_delay()
            );
            Some(resampler)
        };

        let delay_remaining = sinc.as_ref().map_or(0, |s| s.output_delay());
        Ok(Self {
            source_rate,
            sinc,
            input: Vec::with_capacity(RESAMPLER_CHUNK_FRAMES * 2),
            delay_remaining,
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Downmixes `interleaved` and appends every canonical sample that is
    /// ready to `out`. Samples short of a full resampler block stay buffered.
    pub fn push_interleaved(
        &mut self,
        interleaved: &[f32],
        channels: usize,
        out: &mut Vec<i16>,
    ) -> Result<(), ResampleError> {
        let channels = channels.max(1);
        let before = self.input.len();
        self.input.extend(
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
        self.frames_in += (self.input.len() - before) as u64;

        let Some(sinc) = self.sinc.as_mut() else {
            self.frames_out += self.input.len() as u64;
            out.extend(self.input.drain(..).map(to_i16));
            return Ok(());
        };

        let mut consumed = 0;
        loop {
            let needed = sinc.input_frames_next();
            if self.input.len() - consumed < needed {
                break;
            }
            let block: &[&[f32]] = &[&self.input[consumed..consumed + needed]];
            let resampled = sinc.process(block, None)?;
            consumed += needed;
            self.frames_out += emit(&resampled[0], &mut self.delay_remaining, u64::MAX, out);
        }
        self.input.drain(..consumed);
        Ok(())
    }

    /// Flushes buffered input and the filter tail at end of stream. The total
    /// output is trimmed to the length implied by the conversion ratio.
    pub fn finish(&mut self, out: &mut Vec<i16>) -> Result<(), ResampleError> {
        let Some(sinc) = self.sinc.as_mut() else {
            return Ok(());
        };

        let ratio = CANONICAL_SAMPLE_RATE as f64 / self.source_rate as f64;
        let expected = (self.frames_in as f64 * ratio).ceil() as u64;

        if !self.input.is_empty() {
            let tail: &[&[f32]] = &[self.input.as_slice()];
            let resampled = sinc.process_partial(Some(tail), None)?;
            let budget = expected.saturating_sub(self.frames_out);
            self.frames_out += emit(&resampled[0], &mut self.delay_remaining, budget, out);
            self.input.clear();
        }

        while self.frames_out < expected {
            let resampled = sinc.process_partial(None::<&[&[f32]]>, None)?;
            if resampled[0].is_empty() {
                break;
            }
            let budget = expected - self.frames_out;
            self.frames_out += emit(&resampled[0], &mut self.delay_remaining, budget, out);
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        if let Some(sinc) = self.sinc.as_mut() {
            sinc.reset();
            self.delay_remaining = sinc.output_delay();
        }
        self.input.clear();
        self.frames_in = 0;
        self.frames_out = 0;
    }
}

fn emit(frames: &[f32], delay_remaining: &mut usize, budget: u64, out: &mut Vec<i16>) -> u64 {
    let skip = (*delay_remaining).min(frames.len());
    *delay_remaining -= skip;
    let kept = &frames[skip..];
    let take = kept.len().min(usize::try_from(budget).unwrap_or(usize::MAX));
    out.extend(kept[..take].iter().copied().map(to_i16));
    take as u64
}

/// Full-scale float to signed 16-bit, the inverse of symphonia's `i16 -> f32`
/// conversion so 16-bit sources pass through unchanged.
pub fn to_i16(sample: f32) -> i16 {
    (sample * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_rate_passes_through_unchanged() {
        let mut resampler = CanonicalResampler::new(CANONICAL_SAMPLE_RATE).unwrap();
        let input: Vec<f32> = [0, 1, -1, 1000, -32768, 32767]
            .iter()
            .map(|&s| s as f32 / 32_768.0)
            .collect();
        let mut out = Vec::new();
        resampler.push_interleaved(&input, 1, &mut out).unwrap();
        resampler.finish(&mut out).unwrap();
        assert_eq!(out, vec![0, 1, -1, 1000, -32768, 32767]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut resampler = CanonicalResampler::new(CANONICAL_SAMPLE_RATE).unwrap();
        let input = [1000.0 / 32_768.0, 3000.0 / 32_768.0, -0.5, 0.5];
        let mut out = Vec::new();
        resampler.push_interleaved(&input, 2, &mut out).unwrap();
        assert_eq!(out, vec![2000, 0]);
    }

    #[test]
    fn upsampling_produces_ratio_length_output() {
        let mut resampler = CanonicalResampler::new(22_050).unwrap();
        let input: Vec<f32> = (0..5000).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let mut out = Vec::new();
        for block in input.chunks(333) {
            resampler.push_interleaved(block, 1, &mut out).unwrap();
        }
        resampler.finish(&mut out).unwrap();
        assert_eq!(out.len(), 10_000);
    }

    #[test]
    fn reset_reproduces_output() {
        let input: Vec<f32> = (0..3000).map(|i| (i as f32 * 0.03).sin() * 0.25).collect();
        let mut resampler = CanonicalResampler::new(48_000).unwrap();

        let mut first = Vec::new();
        resampler.push_interleaved(&input, 1, &mut first).unwrap();
        resampler.finish(&mut first).unwrap();

        resampler.reset();
        let mut second = Vec::new();
        resampler.push_interleaved(&input, 1, &mut second).unwrap();
        resampler.finish(&mut second).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            CanonicalResampler::new(0),
            Err(DecoderError::ResamplerInit { .. })
        ));
    }

    #[test]
    fn float_conversion_clamps() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), i16::MIN);
        assert_eq!(to_i16(0.0), 0);
    }
}
