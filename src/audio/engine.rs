use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
use log::{info, warn};
use ringbuf::{
    traits::{Consumer as _, Producer as _, Split},
    HeapCons, HeapProd, HeapRb,
};

use super::sink::AudioOutput;
use crate::error::DeviceError;

const STATE_PAUSED: u8 = 0;
const STATE_PLAYING: u8 = 1;

/// Device-side backlog capacity. The core keeps roughly 0.2-0.7 s queued, so
/// four seconds leaves room for stale samples still awaiting a skip after a
/// clear.
const BACKLOG_SECONDS: usize = 4;

/// Counters shared between the core and the audio callback.
///
/// Every sample ever written has an absolute index. The callback publishes
/// how many it has consumed; a clear publishes the index below which samples
/// are stale, which lets the core reset its view of the backlog without
/// touching the consumer side of the queue.
struct SharedCounters {
    is_playing: AtomicU8,
    consumed: AtomicU64,
    discard_until: AtomicU64,
}

/// Producer half of the lock-free device backlog.
struct BacklogQueue {
    producer: HeapProd<i16>,
    shared: Arc<SharedCounters>,
    written: u64,
}

impl BacklogQueue {
    fn new(capacity: usize) -> (Self, HeapCons<i16>, Arc<SharedCounters>) {
        let ring = HeapRb::<i16>::new(capacity);
        let (producer, consumer) = ring.split();
        let shared = Arc::new(SharedCounters {
            is_playing: AtomicU8::new(STATE_PLAYING),
            consumed: AtomicU64::new(0),
            discard_until: AtomicU64::new(0),
        });
        let queue = Self {
            producer,
            shared: Arc::clone(&shared),
            written: 0,
        };
        (queue, consumer, shared)
    }

    fn write(&mut self, samples: &[i16]) -> usize {
        let accepted = self.producer.push_slice(samples);
        self.written += accepted as u64;
        accepted
    }

    fn queued(&self) -> usize {
        let consumed = self.shared.consumed.load(Ordering::Acquire);
        let discarded = self.shared.discard_until.load(Ordering::Acquire);
        self.written.saturating_sub(consumed.max(discarded)) as usize
    }

    fn clear(&mut self) {
        self.shared
            .discard_until
            .store(self.written, Ordering::Release);
    }

    fn set_paused(&self, paused: bool) {
        let state = if paused { STATE_PAUSED } else { STATE_PLAYING };
        self.shared.is_playing.store(state, Ordering::SeqCst);
    }
}

/// Default cpal output device fed with canonical mono samples.
///
/// The mono stream is copied to every device channel and converted to the
/// device sample format inside the callback. Underruns and pauses play
/// silence.
pub struct CpalOutput {
    queue: BacklogQueue,
    _stream: Stream,
}

impl CpalOutput {
    pub fn open(sample_rate: u32) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;

        let (stream_config, sample_format) = select_stream_config(&device, sample_rate)?;
        let channels = stream_config.channels as usize;
        info!(
            "Output device {} configured: {} Hz, {} channels, {:?}",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string()),
            sample_rate,
            channels,
            sample_format
        );

        let (queue, mut consumer, shared) =
            BacklogQueue::new(sample_rate as usize * BACKLOG_SECONDS);

        let err_fn = |err: cpal::StreamError| warn!("Audio stream error: {err}");
        let stream = match sample_format {
            SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |output: &mut [f32], _| {
                    fill_output(output, channels, &mut consumer, &shared, |s| {
                        s as f32 / 32_768.0
                    });
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &stream_config,
                move |output: &mut [i16], _| {
                    fill_output(output, channels, &mut consumer, &shared, |s| s);
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_output_stream(
                &stream_config,
                move |output: &mut [u16], _| {
                    fill_output(output, channels, &mut consumer, &shared, i16_to_u16);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(DeviceError::Build(format!(
                    "unsupported output sample format {other:?}; expected f32/i16/u16"
                )))
            }
        }
        .map_err(|e| DeviceError::Build(e.to_string()))?;

        stream.play().map_err(|e| DeviceError::Play(e.to_string()))?;

        Ok(Self {
            queue,
            _stream: stream,
        })
    }
}

impl AudioOutput for CpalOutput {
    fn write(&mut self, samples: &[i16]) -> Result<usize, DeviceError> {
        Ok(self.queue.write(samples))
    }

    fn queued(&self) -> usize {
        self.queue.queued()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn set_paused(&mut self, paused: bool) {
        self.queue.set_paused(paused);
    }
}

/// Picks a configuration that runs at exactly `sample_rate`, preferring the
/// fewest channels and a 16-bit format.
fn select_stream_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<(StreamConfig, SampleFormat), DeviceError> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| DeviceError::Query(e.to_string()))?;

    let format_rank = |format: SampleFormat| match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    };

    ranges
        .filter(|cfg| {
            cfg.min_sample_rate().0 <= sample_rate && sample_rate <= cfg.max_sample_rate().0
        })
        .filter_map(|cfg| {
            let rank = format_rank(cfg.sample_format())?;
            Some(((cfg.channels(), rank), cfg))
        })
        .min_by_key(|(key, _)| *key)
        .map(|(_, cfg)| {
            (
                StreamConfig {
                    channels: cfg.channels(),
                    sample_rate: SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                },
                cfg.sample_format(),
            )
        })
        .ok_or(DeviceError::UnsupportedConfig(sample_rate))
}

fn fill_output<T: Copy>(
    output: &mut [T],
    channels: usize,
    consumer: &mut impl ringbuf::traits::Consumer<Item = i16>,
    shared: &SharedCounters,
    convert: impl Fn(i16) -> T,
) {
    let silence = convert(0);
    if shared.is_playing.load(Ordering::SeqCst) != STATE_PLAYING {
        output.fill(silence);
        return;
    }

    let discard_until = shared.discard_until.load(Ordering::Acquire);
    let mut consumed = shared.consumed.load(Ordering::Relaxed);
    if consumed < discard_until {
        consumed += consumer.skip((discard_until - consumed) as usize) as u64;
    }

    for frame in output.chunks_mut(channels.max(1)) {
        let value = match consumer.try_pop() {
            Some(sample) => {
                consumed += 1;
                convert(sample)
            }
            None => silence,
        };
        frame.fill(value);
    }

    shared.consumed.store(consumed, Ordering::Release);
}

fn i16_to_u16(sample: i16) -> u16 {
    (sample as i32 + 32_768) as u16
}
