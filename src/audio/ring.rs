/// Fixed-capacity overwrite ring used to accumulate one analysis window from a
/// continuous stream.
///
/// The ring becomes ready once the write cursor completes its first lap, i.e.
/// after `capacity` samples have been pushed since construction or the last
/// [`reset`](SampleRing::reset).
#[derive(Clone, Debug)]
pub struct SampleRing<T> {
    buf: Vec<T>,
    cursor: usize,
    ready: bool,
}

impl<T: Copy + Default> SampleRing<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            buf: vec![T::default(); capacity],
            cursor: 0,
            ready: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Index the next sample will be written to; also the oldest sample once
    /// the ring is ready.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn push(&mut self, sample: T) {
        self.buf[self.cursor] = sample;
        self.cursor = self.wrap(self.cursor + 1);
        if self.cursor == 0 {
            self.ready = true;
        }
    }

    pub fn push_slice(&mut self, samples: &[T]) {
        for &sample in samples {
            self.push(sample);
        }
    }

    /// Copies the ring oldest-to-newest into `out`, which must hold exactly
    /// `capacity` samples.
    pub fn linearize_into(&self, out: &mut [T]) {
        assert_eq!(out.len(), self.capacity(), "linearize target size");
        let (newer, older) = self.buf.split_at(self.cursor);
        out[..older.len()].copy_from_slice(older);
        out[older.len()..].copy_from_slice(newer);
    }

    pub fn reset(&mut self) {
        self.buf.fill(T::default());
        self.cursor = 0;
        self.ready = false;
    }

    fn wrap(&self, index: usize) -> usize {
        index % self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::SampleRing;

    #[test]
    fn ready_only_after_first_full_lap() {
        let mut ring = SampleRing::<i16>::with_capacity(8);
        ring.push_slice(&[1, 2, 3, 4, 5, 6, 7]);
        assert!(!ring.is_ready());
        ring.push(8);
        assert!(ring.is_ready());
        assert_eq!(ring.cursor(), 0);
    }

    #[test]
    fn linearize_orders_oldest_to_newest() {
        let mut ring = SampleRing::<i16>::with_capacity(4);
        ring.push_slice(&[1, 2, 3, 4, 5, 6]);
        let mut out = [0_i16; 4];
        ring.linearize_into(&mut out);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn reset_clears_cursor_and_ready() {
        let mut ring = SampleRing::<i16>::with_capacity(2);
        ring.push_slice(&[9, 9, 9]);
        assert!(ring.is_ready());
        ring.reset();
        assert!(!ring.is_ready());
        assert_eq!(ring.cursor(), 0);
        let mut out = [1_i16; 2];
        ring.linearize_into(&mut out);
        assert_eq!(out, [0, 0]);
    }
}
