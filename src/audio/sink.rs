use log::warn;

use crate::error::DeviceError;

/// Device seam: a backlog of canonical samples drained asynchronously.
pub trait AudioOutput {
    /// Appends to the device backlog, returning how many samples were taken.
    fn write(&mut self, samples: &[i16]) -> Result<usize, DeviceError>;

    /// Samples written but not yet drained by the device.
    fn queued(&self) -> usize;

    /// Drops every queued sample.
    fn clear(&mut self);

    fn set_paused(&mut self, paused: bool);
}

/// Tracks how much audio has been handed to the device and, from the
/// device backlog, how much of it is already audible.
pub struct PlaybackSink<O> {
    output: O,
    submitted: u64,
    paused: bool,
}

impl<O: AudioOutput> PlaybackSink<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            submitted: 0,
            paused: false,
        }
    }

    /// Queues `samples` and returns the accepted count. Short writes are
    /// reported and not retried.
    pub fn enqueue(&mut self, samples: &[i16]) -> Result<usize, DeviceError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let accepted = self.output.write(samples)?;
        self.submitted += accepted as u64;
        if accepted < samples.len() {
            warn!(
                "Playback device accepted {accepted} of {} samples",
                samples.len()
            );
        }
        Ok(accepted)
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn backlog(&self) -> u64 {
        self.output.queued() as u64
    }

    /// Samples already drained by the device since the last clear.
    pub fn heard(&self) -> u64 {
        self.submitted.saturating_sub(self.backlog())
    }

    /// Empties the backlog and restarts the counters at zero.
    pub fn clear(&mut self) {
        self.output.clear();
        self.submitted = 0;
    }

    pub fn pause(&mut self) {
        self.paused = true;
        self.output.set_paused(true);
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.output.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}
