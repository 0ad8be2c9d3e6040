use std::{f64::consts::PI, sync::Arc};

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;

use crate::error::AnalyzerError;

/// Canonical visualization bands in Hz, inclusive on both ends.
pub const LOW_BAND: (f64, f64) = (20.0, 200.0);
pub const MID_BAND: (f64, f64) = (200.0, 2_000.0);
pub const HIGH_BAND: (f64, f64) = (2_000.0, 20_000.0);

/// Full-scale normalization for signed 16-bit input.
const PCM_FULL_SCALE: f64 = 32_768.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BandEnergies {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

/// Magnitude spectrum of one analysis window, bins `0..=window_size / 2`.
#[derive(Clone, Debug)]
pub struct Spectrum {
    magnitudes: Vec<f64>,
    dominant_hz: f64,
    sample_rate: u32,
    window_size: usize,
}

impl Spectrum {
    pub fn magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }

    /// Frequency of the strongest bin above bin 1, or 0 Hz for a silent window.
    pub fn dominant_frequency(&self) -> f64 {
        self.dominant_hz
    }

    pub fn bin_width(&self) -> f64 {
        self.sample_rate as f64 / self.window_size as f64
    }

    pub fn bin_to_frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.bin_width()
    }

    /// Root-sum-square of the magnitudes between `low_hz` and `high_hz`.
    pub fn band_energy(&self, low_hz: f64, high_hz: f64) -> f64 {
        let low = self.frequency_to_bin(low_hz);
        let high = self.frequency_to_bin(high_hz);
        if low > high {
            return 0.0;
        }
        self.magnitudes[low..=high]
            .iter()
            .map(|m| m * m)
            .sum::<f64>()
            .sqrt()
    }

    pub fn bands(&self) -> BandEnergies {
        BandEnergies {
            low: self.band_energy(LOW_BAND.0, LOW_BAND.1),
            mid: self.band_energy(MID_BAND.0, MID_BAND.1),
            high: self.band_energy(HIGH_BAND.0, HIGH_BAND.1),
        }
    }

    fn frequency_to_bin(&self, hz: f64) -> usize {
        let bin = (hz * self.window_size as f64 / self.sample_rate as f64).trunc();
        if bin.is_nan() || bin <= 0.0 {
            return 0;
        }
        (bin as usize).min(self.window_size / 2)
    }
}

/// Windowed forward FFT over fixed-length canonical PCM windows.
///
/// The Hann window, FFT plan and work buffers are built once; every
/// [`analyze`](SpectrumAnalyzer::analyze) call is otherwise stateless.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    window_size: usize,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32, window_size: usize) -> Result<Self, AnalyzerError> {
        if window_size < 2 {
            return Err(AnalyzerError::InvalidWindow(window_size));
        }

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(window_size);

        let mut window = alloc_zeroed::<f64>(window_size)?;
        let denom = (window_size - 1) as f64;
        for (i, coeff) in window.iter_mut().enumerate() {
            *coeff = 0.5 * (1.0 - (2.0 * PI * i as f64 / denom).cos());
        }

        let buffer = alloc_zeroed::<Complex<f64>>(window_size)?;
        let scratch = alloc_zeroed::<Complex<f64>>(fft.get_inplace_scratch_len())?;

        Ok(Self {
            sample_rate,
            window_size,
            window,
            fft,
            buffer,
            scratch,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn analyze(&mut self, samples: &[i16]) -> Result<Spectrum, AnalyzerError> {
        if samples.len() != self.window_size {
            return Err(AnalyzerError::WindowLength {
                expected: self.window_size,
                actual: samples.len(),
            });
        }

        for ((slot, &sample), &coeff) in self.buffer.iter_mut().zip(samples).zip(&self.window) {
            *slot = Complex::new(sample as f64 * coeff / PCM_FULL_SCALE, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        // Real input: only bins up to Nyquist are unique. Interior bins carry
        // the folded negative-frequency half, hence the doubling.
        let nyquist = self.window_size / 2;
        let mut magnitudes = Vec::with_capacity(nyquist + 1);
        let mut max_magnitude = 0.0;
        let mut max_bin = 0;
        for (i, c) in self.buffer[..=nyquist].iter().enumerate() {
            let mut magnitude = c.norm();
            if i > 0 && i < nyquist {
                magnitude *= 2.0;
            }
            if i > 1 && magnitude > max_magnitude {
                max_magnitude = magnitude;
                max_bin = i;
            }
            magnitudes.push(magnitude);
        }

        let dominant_hz = if max_bin > 0 {
            max_bin as f64 * self.sample_rate as f64 / self.window_size as f64
        } else {
            0.0
        };

        Ok(Spectrum {
            magnitudes,
            dominant_hz,
            sample_rate: self.sample_rate,
            window_size: self.window_size,
        })
    }
}

fn alloc_zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>, AnalyzerError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| AnalyzerError::Allocation(len))?;
    buf.resize(len, T::default());
    Ok(buf)
}
