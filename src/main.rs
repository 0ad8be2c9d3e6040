use std::{
    io::{self, BufRead},
    path::PathBuf,
    process::ExitCode,
    thread,
    time::Duration,
};

use clap::Parser;
use log::{info, warn};

use soundwave_lib::{
    audio::resample::CANONICAL_SAMPLE_RATE,
    config::{DEFAULT_CHUNK_SIZE, DEFAULT_FPS, DEFAULT_WINDOW_SIZE},
    pipeline::clock::SystemClock,
    render::{
        console::{JsonRenderer, LogRenderer},
        CloseSignal, Renderer,
    },
    probe_metadata, CpalOutput, DecoderStream, PipelineConfig, PlaybackSink, Result,
    SpectrumAnalyzer, Synchronizer,
};

/// Frames between two log summaries of the headless renderer.
const LOG_EVERY_FRAMES: u64 = 30;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "soundwave")]
#[command(about = "Plays an audio file with a synchronized spectrum analysis", long_about = None)]
struct Args {
    /// Audio file to play
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// FFT window size in samples
    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    window_size: usize,

    /// Samples consumed per visual frame
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Visual frame rate
    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: f64,

    /// Print one JSON line per analyzed frame on stdout
    #[arg(long)]
    json: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS")]
    duration: Option<f32>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("soundwave: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = PipelineConfig {
        window_size: args.window_size,
        chunk_size: args.chunk_size,
        ..PipelineConfig::default()
    }
    .with_frame_rate(args.fps)?;
    config.validate()?;

    match probe_metadata(&args.source) {
        Ok(meta) => info!(
            "Playing {} - {} ({:.1} s, {} Hz, {} ch)",
            meta.artist.as_deref().unwrap_or("Unknown artist"),
            meta.title.as_deref().unwrap_or("Unknown title"),
            meta.duration_seconds.unwrap_or_default(),
            meta.source_sample_rate.unwrap_or_default(),
            meta.source_channels.unwrap_or_default(),
        ),
        Err(err) => warn!("Cannot read metadata: {err}"),
    }

    let playback = DecoderStream::open(&args.source)?;
    let visual = DecoderStream::open(&args.source)?;
    let sink = PlaybackSink::new(CpalOutput::open(CANONICAL_SAMPLE_RATE)?);
    let analyzer = SpectrumAnalyzer::new(config.sample_rate, config.window_size)?;

    let close = CloseSignal::new();
    watch_stdin(close.clone());
    if let Some(seconds) = args.duration {
        match Duration::try_from_secs_f32(seconds) {
            Ok(limit) => close_after(close.clone(), limit),
            Err(_) => warn!("Ignoring invalid duration {seconds}"),
        }
    }

    let renderer: Box<dyn Renderer> = if args.json {
        Box::new(JsonRenderer::new(io::stdout(), close))
    } else {
        Box::new(LogRenderer::new(close, LOG_EVERY_FRAMES))
    };

    info!("Press Enter to stop");
    let mut sync = Synchronizer::new(
        config,
        playback,
        visual,
        sink,
        analyzer,
        renderer,
        SystemClock::new(),
    )?;
    sync.run()?;
    sync.shutdown();
    Ok(())
}

fn watch_stdin(close: CloseSignal) {
    thread::spawn(move || {
        let mut line = String::new();
        // EOF on stdin (detached terminal) does not close the session.
        if let Ok(read) = io::stdin().lock().read_line(&mut line) {
            if read > 0 {
                close.request();
            }
        }
    });
}

fn close_after(close: CloseSignal, limit: Duration) {
    thread::spawn(move || {
        thread::sleep(limit);
        close.request();
    });
}
