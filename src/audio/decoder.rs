use std::{
    collections::VecDeque,
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::MediaSourceStream,
    meta::{MetadataOptions, MetadataRevision, StandardTagKey},
    probe::{Hint, ProbeResult},
};

use super::resample::{CanonicalResampler, CANONICAL_SAMPLE_RATE};
use crate::error::DecoderError;

/// Pull interface over a canonical (mono, 16-bit, 44.1 kHz) sample stream.
pub trait SampleSource {
    /// Fills `out` from the start and returns how many samples were written.
    /// Returns 0 only once the stream is exhausted.
    fn read(&mut self, out: &mut [i16]) -> usize;

    /// Restarts the stream from its first sample.
    fn rewind(&mut self) -> Result<(), DecoderError>;

    fn sample_rate(&self) -> u32;
}

#[derive(Clone, Debug, Default)]
pub struct TrackMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub duration_seconds: Option<f32>,
    pub source_sample_rate: Option<u32>,
    pub source_channels: Option<usize>,
}

pub fn probe_metadata(path: &Path) -> Result<TrackMetadata, DecoderError> {
    let mut probed = probe(path)?;

    let mut metadata = TrackMetadata::default();

    if let Some(mut pre_metadata) = probed.metadata.get() {
        if let Some(revision) = pre_metadata.current() {
            apply_metadata_revision(revision, &mut metadata);
        }
    }

    let format = &mut probed.format;
    if let Some(revision) = format.metadata().current() {
        apply_metadata_revision(revision, &mut metadata);
    }

    if let Some(track) = format.default_track() {
        let params = &track.codec_params;
        metadata.source_sample_rate = params.sample_rate;
        metadata.source_channels = params.channels.map(|c| c.count());
        if let (Some(sample_rate), Some(n_frames)) = (params.sample_rate, params.n_frames) {
            if sample_rate > 0 {
                metadata.duration_seconds = Some(n_frames as f32 / sample_rate as f32);
            }
        }
    }

    if metadata.title.is_none() {
        metadata.title = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(std::string::ToString::to_string);
    }
    Ok(metadata)
}

fn apply_metadata_revision(revision: &MetadataRevision, metadata: &mut TrackMetadata) {
    for tag in revision.tags() {
        if metadata.artist.is_none()
            && matches!(
                tag.std_key,
                Some(
                    StandardTagKey::Artist
                        | StandardTagKey::AlbumArtist
                        | StandardTagKey::Performer
                )
            )
        {
            metadata.artist = Some(tag.value.to_string());
        }

        if metadata.title.is_none() && matches!(tag.std_key, Some(StandardTagKey::TrackTitle)) {
            metadata.title = Some(tag.value.to_string());
        }
    }
}

fn probe(path: &Path) -> Result<ProbeResult, DecoderError> {
    let open_err = |reason: String| DecoderError::Open {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| open_err(format!("format probe failed: {e}")))
}

/// Streaming decoder producing the canonical sample format.
///
/// Output of a decoded packet that does not fit the caller's buffer is kept in
/// a pending queue and served first on the next [`read`](SampleSource::read),
/// so consecutive reads concatenate to the exact decoded stream.
pub struct DecoderStream {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    codec_params: CodecParameters,
    track_id: u32,
    resampler: CanonicalResampler,
    sample_buffer: Option<SampleBuffer<f32>>,
    unit: Vec<i16>,
    pending: VecDeque<i16>,
    position: u64,
    exhausted: bool,
}

impl DecoderStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecoderError> {
        let path = path.as_ref();
        let probed = probe(path)?;
        let format = probed.format;

        // First audio track a codec is registered for wins.
        let codecs = symphonia::default::get_codecs();
        let selected = format.tracks().iter().find_map(|track| {
            let params = &track.codec_params;
            if params.codec == CODEC_TYPE_NULL || params.sample_rate.is_none() {
                return None;
            }
            match codecs.make(params, &DecoderOptions::default()) {
                Ok(decoder) => Some((track.id, params.clone(), decoder)),
                Err(err) => {
                    debug!("Skipping track {} of {}: {err}", track.id, path.display());
                    None
                }
            }
        });
        let (track_id, codec_params, decoder) =
            selected.ok_or_else(|| DecoderError::StreamNotFound {
                path: path.to_path_buf(),
            })?;

        let source_rate = codec_params.sample_rate.unwrap_or(CANONICAL_SAMPLE_RATE);
        let resampler = CanonicalResampler::new(source_rate)?;

        debug!(
            "Opened {} (track {track_id}, {source_rate} Hz, {} channels)",
            path.display(),
            codec_params.channels.map_or(0, |c| c.count())
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            codec_params,
            track_id,
            resampler,
            sample_buffer: None,
            unit: Vec::new(),
            pending: VecDeque::new(),
            position: 0,
            exhausted: false,
        })
    }

    /// Canonical samples produced since open or the last rewind.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.resampler.source_rate()
    }

    fn drain_pending(&mut self, out: &mut [i16]) -> usize {
        let take = self.pending.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..take)) {
            *slot = sample;
        }
        take
    }

    /// Decodes the next packet of the selected track into `self.unit`.
    /// Returns false once the stream is exhausted and nothing is left.
    fn decode_next_unit(&mut self) -> bool {
        self.unit.clear();
        if self.exhausted {
            return false;
        }

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::ResetRequired) => {
                    match symphonia::default::get_codecs()
                        .make(&self.codec_params, &DecoderOptions::default())
                    {
                        Ok(decoder) => {
                            debug!("Decoder reset required; rebuilt codec");
                            self.decoder = decoder;
                            continue;
                        }
                        Err(err) => {
                            warn!("Cannot rebuild decoder after stream change: {err}");
                            return self.finish();
                        }
                    }
                }
                Err(Error::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                    return self.finish();
                }
                Err(err) => {
                    warn!("Error reading packet from {}: {err}", self.path.display());
                    return self.finish();
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!("Dropping undecodable packet: {err}");
                    return true;
                }
            };

            let spec = *decoded.spec();
            let duration = decoded.capacity() as u64;
            let channels = spec.channels.count();
            let too_small = self
                .sample_buffer
                .as_ref()
                .map_or(true, |buffer| buffer.capacity() < decoded.capacity() * channels);
            if too_small {
                self.sample_buffer = Some(SampleBuffer::<f32>::new(duration, spec));
            }
            let Some(buffer) = self.sample_buffer.as_mut() else {
                return true;
            };
            buffer.copy_interleaved_ref(decoded);

            if let Err(err) = self
                .resampler
                .push_interleaved(buffer.samples(), channels, &mut self.unit)
            {
                debug!("Dropping packet the resampler rejected: {err}");
            }
            return true;
        }
    }

    fn finish(&mut self) -> bool {
        self.exhausted = true;
        if let Err(err) = self.resampler.finish(&mut self.unit) {
            debug!("Resampler flush failed: {err}");
        }
        !self.unit.is_empty()
    }
}

impl SampleSource for DecoderStream {
    fn read(&mut self, out: &mut [i16]) -> usize {
        let mut filled = self.drain_pending(out);

        while filled < out.len() {
            if !self.decode_next_unit() {
                break;
            }
            let take = self.unit.len().min(out.len() - filled);
            out[filled..filled + take].copy_from_slice(&self.unit[..take]);
            filled += take;
            self.pending.extend(&self.unit[take..]);
        }

        self.position += filled as u64;
        filled
    }

    fn rewind(&mut self) -> Result<(), DecoderError> {
        let seeked = self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: 0,
                track_id: self.track_id,
            },
        );

        match seeked {
            Ok(_) => {
                self.decoder.reset();
                self.resampler.reset();
                self.pending.clear();
                self.unit.clear();
                self.position = 0;
                self.exhausted = false;
            }
            Err(err) => {
                debug!("Seek failed ({err}); reopening {}", self.path.display());
                let path = self.path.clone();
                let reopened = Self::open(&path).map_err(|e| DecoderError::Seek {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                *self = reopened;
            }
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        CANONICAL_SAMPLE_RATE
    }
}
