use log::{debug, info};

use super::clock::{Clock, TickScheduler};
use crate::{
    audio::{
        decoder::SampleSource,
        dsp::fft::SpectrumAnalyzer,
        ring::SampleRing,
        sink::{AudioOutput, PlaybackSink},
    },
    config::PipelineConfig,
    error::{ConfigError, Result},
    render::{
        color::{bands_to_rgb, blend_sample_colors, frequency_to_rgb, Rgb, NEUTRAL},
        Renderer, VisualFrame,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Preloading,
    Streaming,
    EofRestarting,
    Shutdown,
}

/// Audible position versus visualized position, in canonical samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncState {
    pub played: u64,
    pub vis: u64,
}

impl SyncState {
    /// Positive when the visualization lags the audible audio.
    pub fn drift(&self) -> i64 {
        self.played as i64 - self.vis as i64
    }
}

/// What the visual activity did during one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisualStep {
    /// One chunk was read and rendered, after discarding `caught_up` samples.
    Rendered { caught_up: u64 },
    /// The visualization is not behind the audible position; nothing to draw.
    Held { caught_up: u64 },
    Restarted,
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tick {
    /// Samples queued by the refill activity.
    pub refilled: u64,
    pub visual: Option<VisualStep>,
}

/// Keeps the visualization decoder on the audible position of the playback
/// decoder.
///
/// Both decoders are independent instances of the same source. The playback
/// one feeds the sink whenever its backlog runs low; the visualization one is
/// advanced against the sink's heard counter, one chunk per visual tick,
/// filling the analysis ring. End of media on either side rewinds both,
/// clears the sink and preloads again so the two positions stay comparable.
///
/// Fields are declared in reverse acquisition order so dropping releases the
/// renderer first and the playback decoder last.
pub struct Synchronizer<S, O, R, C> {
    renderer: R,
    analyzer: SpectrumAnalyzer,
    sink: PlaybackSink<O>,
    visual: S,
    playback: S,
    clock: C,
    config: PipelineConfig,
    scheduler: TickScheduler,
    ring: SampleRing<i16>,
    phase: Phase,
    vis_position: u64,
    restarts: u64,
    chunk: Vec<i16>,
    refill_buf: Vec<i16>,
    preload_buf: Vec<i16>,
    window: Vec<i16>,
    colors: Vec<Rgb>,
}

impl<S, O, R, C> Synchronizer<S, O, R, C>
where
    S: SampleSource,
    O: AudioOutput,
    R: Renderer,
    C: Clock,
{
    pub fn new(
        config: PipelineConfig,
        playback: S,
        visual: S,
        sink: PlaybackSink<O>,
        analyzer: SpectrumAnalyzer,
        renderer: R,
        clock: C,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let window_size = analyzer.window_size();
        if config.chunk_size > window_size {
            return Err(ConfigError::ChunkLargerThanWindow {
                chunk: config.chunk_size,
                window: window_size,
            });
        }

        Ok(Self {
            scheduler: TickScheduler::new(config.refill_interval, config.frame_interval),
            ring: SampleRing::with_capacity(window_size),
            phase: Phase::Preloading,
            vis_position: 0,
            restarts: 0,
            chunk: vec![0; config.chunk_size],
            refill_buf: vec![0; config.refill_chunk.max(1)],
            preload_buf: vec![0; config.preload_samples],
            window: vec![0; window_size],
            colors: Vec::with_capacity(config.chunk_size),
            renderer,
            analyzer,
            sink,
            visual,
            playback,
            clock,
            config,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sync_state(&self) -> SyncState {
        SyncState {
            played: self.sink.heard(),
            vis: self.vis_position,
        }
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn ring_ready(&self) -> bool {
        self.ring.is_ready()
    }

    pub fn sink(&self) -> &PlaybackSink<O> {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut PlaybackSink<O> {
        &mut self.sink
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Drives [`tick`](Self::tick) until shutdown, sleeping until the next
    /// timer deadline between ticks.
    pub fn run(&mut self) -> Result<()> {
        while self.phase != Phase::Shutdown {
            self.tick()?;
            let wait = self.scheduler.until_next(self.clock.now());
            if self.phase != Phase::Shutdown && !wait.is_zero() {
                self.clock.sleep(wait);
            }
        }
        Ok(())
    }

    pub fn tick(&mut self) -> Result<Tick> {
        let mut tick = Tick::default();
        match self.phase {
            Phase::Shutdown => {}
            Phase::Preloading => self.preload()?,
            Phase::EofRestarting => self.restart()?,
            Phase::Streaming => {
                let now = self.clock.now();
                if self.scheduler.refill.due(now) {
                    tick.refilled = self.refill()?;
                }
                if self.scheduler.frame.due(now) {
                    tick.visual = Some(self.visual_tick()?);
                }
            }
        }
        Ok(tick)
    }

    /// Releases owned resources, last acquired first.
    pub fn shutdown(self) {
        let Self {
            renderer,
            analyzer,
            sink,
            visual,
            playback,
            ..
        } = self;
        drop(renderer);
        drop(analyzer);
        drop(sink);
        drop(visual);
        drop(playback);
        info!("Pipeline shut down");
    }

    /// Queues the initial block and advances the visualization decoder over
    /// the same span.
    fn preload(&mut self) -> Result<()> {
        let read = self.playback.read(&mut self.preload_buf);
        let queued = self.sink.enqueue(&self.preload_buf[..read])?;

        let mut skipped = 0;
        while skipped < queued {
            let n = self.visual.read(&mut self.preload_buf[..queued - skipped]);
            if n == 0 {
                break;
            }
            skipped += n;
        }

        self.vis_position = skipped as u64;
        self.ring.reset();
        self.phase = Phase::Streaming;
        debug!("Preloaded {queued} samples");
        Ok(())
    }

    /// Rewinds both decoders and restarts the sink from an empty backlog.
    fn restart(&mut self) -> Result<()> {
        self.phase = Phase::EofRestarting;
        self.playback.rewind()?;
        self.visual.rewind()?;
        self.sink.clear();
        self.restarts += 1;
        self.preload()?;
        info!("End of media; restarted playback (restart #{})", self.restarts);
        Ok(())
    }

    fn refill(&mut self) -> Result<u64> {
        let mut queued = 0;
        let mut restarted = false;
        while self.sink.backlog() < self.config.low_watermark as u64 {
            let n = self.playback.read(&mut self.refill_buf);
            if n == 0 {
                // One restart per pass keeps a source shorter than the
                // watermark from looping here.
                if restarted {
                    break;
                }
                self.restart()?;
                restarted = true;
                continue;
            }
            let accepted = self.sink.enqueue(&self.refill_buf[..n])?;
            queued += accepted as u64;
            if accepted < n {
                break;
            }
        }
        Ok(queued)
    }

    fn visual_tick(&mut self) -> Result<VisualStep> {
        if self.renderer.close_requested() {
            info!("Close requested");
            self.phase = Phase::Shutdown;
            return Ok(VisualStep::Closed);
        }

        let chunk = self.config.chunk_size as u64;
        let heard = self.sink.heard();

        let mut caught_up = 0;
        if heard > self.vis_position + self.config.drift_ceiling() {
            while heard > self.vis_position + self.config.drift_ceiling()
                && self.vis_position + chunk <= heard
            {
                let n = self.visual.read(&mut self.chunk);
                if n == 0 {
                    break;
                }
                self.vis_position += n as u64;
                caught_up += n as u64;
            }
            debug!(
                "Visualization caught up {caught_up} samples (drift now {})",
                heard as i64 - self.vis_position as i64
            );
        }

        if heard < self.vis_position + chunk {
            return Ok(VisualStep::Held { caught_up });
        }

        let n = self.visual.read(&mut self.chunk);
        if n == 0 {
            self.restart()?;
            return Ok(VisualStep::Restarted);
        }
        self.vis_position += n as u64;
        self.ring.push_slice(&self.chunk[..n]);
        self.present(n)?;
        Ok(VisualStep::Rendered { caught_up })
    }

    fn present(&mut self, n: usize) -> Result<()> {
        let samples = &self.chunk[..n];
        if !self.ring.is_ready() {
            self.renderer.render(&VisualFrame::Warmup {
                samples,
                color: NEUTRAL,
            });
            return Ok(());
        }

        self.ring.linearize_into(&mut self.window);
        let spectrum = self.analyzer.analyze(&self.window)?;
        let bands = spectrum.bands();
        let base_color = frequency_to_rgb(spectrum.dominant_frequency());
        let band_color = bands_to_rgb(bands);
        blend_sample_colors(samples, base_color, band_color, &mut self.colors);

        self.renderer.render(&VisualFrame::Analyzed {
            samples,
            spectrum: &spectrum,
            bands,
            base_color,
            band_color,
            colors: &self.colors,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque, time::Duration};

    use super::*;
    use crate::{
        error::{DecoderError, DeviceError},
        pipeline::clock::ManualClock,
        render::CloseSignal,
    };

    const RATE: u32 = 44_100;

    struct MemorySource {
        samples: Vec<i16>,
        pos: usize,
    }

    impl MemorySource {
        fn new(samples: Vec<i16>) -> Self {
            Self { samples, pos: 0 }
        }
    }

    impl SampleSource for MemorySource {
        fn read(&mut self, out: &mut [i16]) -> usize {
            let n = out.len().min(self.samples.len() - self.pos);
            out[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
            self.pos += n;
            n
        }

        fn rewind(&mut self) -> std::result::Result<(), DecoderError> {
            self.pos = 0;
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            RATE
        }
    }

    /// Device that drains in real time according to a manual clock.
    struct ClockedOutput {
        clock: ManualClock,
        state: RefCell<ClockedState>,
    }

    #[derive(Default)]
    struct ClockedState {
        queue: VecDeque<i16>,
        last: Duration,
        credit: f64,
        paused: bool,
    }

    impl ClockedOutput {
        fn new(clock: ManualClock) -> Self {
            Self {
                state: RefCell::new(ClockedState {
                    last: clock.now(),
                    ..ClockedState::default()
                }),
                clock,
            }
        }

        fn update(&self) {
            let mut state = self.state.borrow_mut();
            let now = self.clock.now();
            let elapsed = now.saturating_sub(state.last);
            state.last = now;
            if state.paused {
                return;
            }
            state.credit += elapsed.as_secs_f64() * RATE as f64;
            let due = state.credit.floor();
            state.credit -= due;
            let take = (due as usize).min(state.queue.len());
            state.queue.drain(..take);
        }
    }

    impl AudioOutput for ClockedOutput {
        fn write(&mut self, samples: &[i16]) -> std::result::Result<usize, DeviceError> {
            self.update();
            self.state.borrow_mut().queue.extend(samples);
            Ok(samples.len())
        }

        fn queued(&self) -> usize {
            self.update();
            self.state.borrow().queue.len()
        }

        fn clear(&mut self) {
            self.update();
            self.state.borrow_mut().queue.clear();
        }

        fn set_paused(&mut self, paused: bool) {
            self.update();
            self.state.borrow_mut().paused = paused;
        }
    }

    struct Recorded {
        analyzed: bool,
        samples: usize,
        dominant_hz: Option<f64>,
        spectrum_silent: Option<bool>,
    }

    #[derive(Default)]
    struct RecordingRenderer {
        frames: Vec<Recorded>,
        close: CloseSignal,
        close_after: Option<usize>,
    }

    impl Renderer for RecordingRenderer {
        fn render(&mut self, frame: &VisualFrame<'_>) {
            let record = match frame {
                VisualFrame::Warmup { samples, color } => {
                    assert_eq!(*color, NEUTRAL);
                    Recorded {
                        analyzed: false,
                        samples: samples.len(),
                        dominant_hz: None,
                        spectrum_silent: None,
                    }
                }
                VisualFrame::Analyzed {
                    samples,
                    spectrum,
                    colors,
                    ..
                } => {
                    assert_eq!(colors.len(), samples.len());
                    Recorded {
                        analyzed: true,
                        samples: samples.len(),
                        dominant_hz: Some(spectrum.dominant_frequency()),
                        spectrum_silent: Some(spectrum.magnitudes().iter().all(|&m| m == 0.0)),
                    }
                }
            };
            self.frames.push(record);
        }

        fn close_requested(&mut self) -> bool {
            let limit_reached = self
                .close_after
                .is_some_and(|limit| self.frames.len() >= limit);
            limit_reached || self.close.is_requested()
        }
    }

    type TestSync = Synchronizer<MemorySource, ClockedOutput, RecordingRenderer, ManualClock>;

    fn build(samples: Vec<i16>, config: PipelineConfig, renderer: RecordingRenderer) -> (TestSync, ManualClock) {
        let clock = ManualClock::new();
        let analyzer = SpectrumAnalyzer::new(RATE, config.window_size).unwrap();
        let sync = Synchronizer::new(
            config,
            MemorySource::new(samples.clone()),
            MemorySource::new(samples),
            PlaybackSink::new(ClockedOutput::new(clock.clone())),
            analyzer,
            renderer,
            clock.clone(),
        )
        .unwrap();
        (sync, clock)
    }

    fn ramp(len: usize) -> Vec<i16> {
        (0..len).map(|i| (i % 2000) as i16 - 1000).collect()
    }

    #[test]
    fn silent_source_end_to_end() {
        let renderer = RecordingRenderer {
            close_after: Some(40),
            ..RecordingRenderer::default()
        };
        let (mut sync, _clock) = build(vec![0; 5 * RATE as usize], PipelineConfig::default(), renderer);

        sync.run().unwrap();
        assert_eq!(sync.phase(), Phase::Shutdown);

        let frames = &sync.renderer().frames;
        assert_eq!(frames.len(), 40);
        assert!(frames.iter().all(|f| f.samples == 512));
        assert!(frames[..3].iter().all(|f| !f.analyzed));
        assert!(frames[3..].iter().all(|f| f.analyzed));
        for frame in &frames[3..] {
            assert_eq!(frame.dominant_hz, Some(0.0));
            assert_eq!(frame.spectrum_silent, Some(true));
        }
        sync.shutdown();
    }

    #[test]
    fn preload_aligns_both_positions() {
        let (mut sync, _clock) = build(ramp(RATE as usize * 3), PipelineConfig::default(), RecordingRenderer::default());
        assert_eq!(sync.phase(), Phase::Preloading);

        sync.tick().unwrap();
        assert_eq!(sync.phase(), Phase::Streaming);
        assert_eq!(sync.sink().submitted(), 22_050);
        assert_eq!(sync.sync_state(), SyncState { played: 0, vis: 22_050 });
        assert!(!sync.ring_ready());
    }

    #[test]
    fn drift_stays_bounded_once_audio_catches_up() {
        let config = PipelineConfig::default();
        let chunk = config.chunk_size as i64;
        let ceiling = config.drift_ceiling() as i64;
        let (mut sync, clock) = build(ramp(RATE as usize * 10), config, RecordingRenderer::default());

        let mut warmed_up = false;
        let mut rendered = 0;
        for _ in 0..4000 {
            let tick = sync.tick().unwrap();
            let drift = sync.sync_state().drift();
            if drift >= 0 {
                warmed_up = true;
            }
            if let Some(step) = tick.visual {
                if warmed_up {
                    assert!(
                        (0..=ceiling).contains(&drift),
                        "drift {drift} out of bounds after {step:?}"
                    );
                }
                if let VisualStep::Rendered { .. } = step {
                    rendered += 1;
                    assert!(drift <= chunk, "rendered past audible position: {drift}");
                }
            }
            clock.advance(Duration::from_millis(1));
        }
        assert!(warmed_up);
        assert!(rendered > 100);
        assert_eq!(sync.restarts(), 0);
    }

    #[test]
    fn catch_up_never_overtakes_audible_position() {
        // One visual tick per second while the device keeps playing and
        // being refilled.
        let config = PipelineConfig {
            frame_interval: Duration::from_secs(1),
            ..PipelineConfig::default()
        };
        let (mut sync, clock) = build(ramp(RATE as usize * 10), config, RecordingRenderer::default());
        sync.tick().unwrap();

        let mut step = None;
        for _ in 0..1500 {
            clock.advance(Duration::from_millis(1));
            if let Some(VisualStep::Rendered { caught_up }) = sync.tick().unwrap().visual {
                step = Some(caught_up);
                break;
            }
        }

        let caught_up = step.expect("no frame rendered");
        assert!(caught_up > 20_000);
        let state = sync.sync_state();
        assert!(state.vis <= state.played);
        assert!(state.drift() <= 512);
    }

    #[test]
    fn end_of_media_restarts_both_streams_together() {
        let (mut sync, clock) = build(ramp(RATE as usize), PipelineConfig::default(), RecordingRenderer::default());

        let mut restarted = false;
        for _ in 0..3000 {
            sync.tick().unwrap();
            if sync.restarts() > 0 {
                restarted = true;
                break;
            }
            clock.advance(Duration::from_millis(1));
        }
        assert!(restarted);
        assert_eq!(sync.phase(), Phase::Streaming);
        assert_eq!(sync.sink().submitted(), 22_050);
        assert_eq!(sync.sync_state().vis, 22_050);
        assert_eq!(sync.sync_state().played, 0);
        assert!(!sync.ring_ready());
    }

    #[test]
    fn source_shorter_than_watermark_does_not_spin() {
        let (mut sync, clock) = build(ramp(1000), PipelineConfig::default(), RecordingRenderer::default());
        for _ in 0..200 {
            sync.tick().unwrap();
            clock.advance(Duration::from_millis(5));
        }
        assert!(sync.restarts() > 0);
        assert!(sync.sink().submitted() <= 1000);
    }

    #[test]
    fn empty_source_streams_nothing() {
        let (mut sync, clock) = build(Vec::new(), PipelineConfig::default(), RecordingRenderer::default());
        for _ in 0..50 {
            sync.tick().unwrap();
            clock.advance(Duration::from_millis(10));
        }
        assert_eq!(sync.sink().submitted(), 0);
        assert!(sync.renderer().frames.is_empty());
    }

    #[test]
    fn close_request_shuts_down_on_next_visual_tick() {
        let renderer = RecordingRenderer::default();
        let close = renderer.close.clone();
        let (mut sync, clock) = build(ramp(RATE as usize * 2), PipelineConfig::default(), renderer);
        sync.tick().unwrap();

        close.request();
        clock.advance(Duration::from_millis(20));
        let tick = sync.tick().unwrap();
        assert_eq!(tick.visual, Some(VisualStep::Closed));
        assert_eq!(sync.phase(), Phase::Shutdown);

        sync.run().unwrap();
        sync.shutdown();
    }

    #[test]
    fn paused_sink_holds_visuals() {
        let (mut sync, clock) = build(ramp(RATE as usize * 5), PipelineConfig::default(), RecordingRenderer::default());
        sync.tick().unwrap();
        sync.sink_mut().pause();

        for _ in 0..100 {
            let tick = sync.tick().unwrap();
            if let Some(step) = tick.visual {
                assert!(matches!(step, VisualStep::Held { .. }), "{step:?}");
            }
            clock.advance(Duration::from_millis(10));
        }
        assert_eq!(sync.sync_state().played, 0);
        assert!(sync.renderer().frames.is_empty());
    }
}
