use serde::Serialize;

use crate::audio::dsp::fft::BandEnergies;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Color used before the first full analysis window is available.
pub const NEUTRAL: Rgb = Rgb::new(128, 128, 255);

const SATURATION: f64 = 0.8;
const VALUE: f64 = 0.9;
const MIN_HZ: f64 = 20.0;
const MAX_HZ: f64 = 20_000.0;

pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> Rgb {
    let h = h.rem_euclid(360.0);
    let sector = (h / 60.0).floor();
    let f = h / 60.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    let (r, g, b) = match sector as u8 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb::new((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}

/// Log-scale hue from red (20 Hz) to blue (20 kHz).
pub fn frequency_to_rgb(frequency: f64) -> Rgb {
    let frequency = frequency.clamp(MIN_HZ, MAX_HZ);
    let normalized =
        (frequency.log10() - MIN_HZ.log10()) / (MAX_HZ.log10() - MIN_HZ.log10());
    hsv_to_rgb(normalized * 240.0, SATURATION, VALUE)
}

/// Red, green and blue weighted by the share of low, mid and high energy.
pub fn bands_to_rgb(bands: BandEnergies) -> Rgb {
    let total = bands.low + bands.mid + bands.high;
    if total < 0.001 {
        return Rgb::default();
    }

    let weights = [bands.low / total, bands.mid / total, bands.high / total];
    let anchors = [
        hsv_to_rgb(0.0, SATURATION, VALUE),
        hsv_to_rgb(120.0, SATURATION, VALUE),
        hsv_to_rgb(240.0, SATURATION, VALUE),
    ];
    let mix = |channel: fn(&Rgb) -> u8| -> u8 {
        anchors
            .iter()
            .zip(weights)
            .map(|(color, w)| channel(color) as f64 * w)
            .sum::<f64>() as u8
    };
    Rgb::new(mix(|c| c.r), mix(|c| c.g), mix(|c| c.b))
}

/// Per-sample colors: mostly the dominant-frequency color, with the band
/// color mixed in proportionally to each sample's amplitude.
pub fn blend_sample_colors(samples: &[i16], base: Rgb, band: Rgb, out: &mut Vec<Rgb>) {
    out.clear();
    out.extend(samples.iter().map(|&sample| {
        let amplitude = (sample as f64 / 32_768.0).abs();
        let blend = |b: u8, t: u8| (b as f64 * 0.7 + t as f64 * 0.3 * amplitude) as u8;
        Rgb::new(
            blend(base.r, band.r),
            blend(base.g, band.g),
            blend(base.b, band.b),
        )
    }));
}
