pub mod color;
pub mod console;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::Serialize;

use crate::audio::dsp::fft::{BandEnergies, Spectrum};
use color::Rgb;

/// What the synchronizer hands to the renderer on each visual tick.
pub enum VisualFrame<'a> {
    /// The analysis window is still filling up.
    Warmup { samples: &'a [i16], color: Rgb },
    Analyzed {
        samples: &'a [i16],
        spectrum: &'a Spectrum,
        bands: BandEnergies,
        base_color: Rgb,
        band_color: Rgb,
        colors: &'a [Rgb],
    },
}

impl VisualFrame<'_> {
    pub fn samples(&self) -> &[i16] {
        match self {
            VisualFrame::Warmup { samples, .. } | VisualFrame::Analyzed { samples, .. } => samples,
        }
    }

    pub fn is_analyzed(&self) -> bool {
        matches!(self, VisualFrame::Analyzed { .. })
    }

    pub fn summary(&self) -> FrameSummary {
        let peak = self
            .samples()
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0);
        match self {
            VisualFrame::Warmup { samples, color } => FrameSummary {
                analyzed: false,
                samples: samples.len(),
                peak,
                dominant_hz: None,
                bands: None,
                color: *color,
            },
            VisualFrame::Analyzed {
                samples,
                spectrum,
                bands,
                base_color,
                ..
            } => FrameSummary {
                analyzed: true,
                samples: samples.len(),
                peak,
                dominant_hz: Some(spectrum.dominant_frequency()),
                bands: Some(*bands),
                color: *base_color,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameSummary {
    pub analyzed: bool,
    pub samples: usize,
    pub peak: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_hz: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bands: Option<BandEnergies>,
    pub color: Rgb,
}

/// External drawing collaborator.
pub trait Renderer {
    fn render(&mut self, frame: &VisualFrame<'_>);

    /// Polled once per visual tick.
    fn close_requested(&mut self) -> bool;
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, frame: &VisualFrame<'_>) {
        (**self).render(frame);
    }

    fn close_requested(&mut self) -> bool {
        (**self).close_requested()
    }
}

/// Cloneable close flag shared between a renderer and whatever requests the
/// close (input watcher, timer).
#[derive(Clone, Default)]
pub struct CloseSignal(Arc<AtomicBool>);

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
