use std::io::Write;

use log::{info, warn};

use super::{CloseSignal, Renderer, VisualFrame};

/// Headless renderer that logs a short summary every `every` frames.
pub struct LogRenderer {
    close: CloseSignal,
    every: u64,
    frames: u64,
}

impl LogRenderer {
    pub fn new(close: CloseSignal, every: u64) -> Self {
        Self {
            close,
            every: every.max(1),
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, frame: &VisualFrame<'_>) {
        self.frames += 1;
        if self.frames % self.every != 0 {
            return;
        }
        match frame {
            VisualFrame::Warmup { samples, .. } => {
                info!("Filling analysis window ({} samples)", samples.len());
            }
            VisualFrame::Analyzed {
                spectrum, bands, ..
            } => {
                info!(
                    "Dominant {:>7.1} Hz | low {:>8.2} mid {:>8.2} high {:>8.2}",
                    spectrum.dominant_frequency(),
                    bands.low,
                    bands.mid,
                    bands.high
                );
            }
        }
    }

    fn close_requested(&mut self) -> bool {
        self.close.is_requested()
    }
}

/// Writes one JSON object per analyzed frame.
pub struct JsonRenderer<W: Write> {
    out: W,
    close: CloseSignal,
}

impl<W: Write> JsonRenderer<W> {
    pub fn new(out: W, close: CloseSignal) -> Self {
        Self { out, close }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Renderer for JsonRenderer<W> {
    fn render(&mut self, frame: &VisualFrame<'_>) {
        if !frame.is_analyzed() {
            return;
        }
        let written = serde_json::to_writer(&mut self.out, &frame.summary())
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"));
        if let Err(err) = written {
            // A closed pipe ends the session.
            warn!("Cannot write frame summary: {err}");
            self.close.request();
        }
    }

    fn close_requested(&mut self) -> bool {
        self.close.is_requested()
    }
}
