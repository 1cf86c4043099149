use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use framestream_core::{Frame, FrameSource, LatestFrameStream, SourceConfig, StreamConfig};
use framestream_hw::V4lDrivers;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "framestream", about = "Latest-frame camera stream diagnostics")]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the config file and `FRAMESTREAM_*` variables.
#[derive(Args)]
struct SourceArgs {
    /// TOML stream config
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use the camera module instead of a USB webcam
    #[arg(long, global = true)]
    pi_camera: bool,
    /// Webcam index (/dev/videoN)
    #[arg(long, global = true)]
    index: Option<u32>,
    #[arg(long, global = true)]
    width: Option<u32>,
    #[arg(long, global = true)]
    height: Option<u32>,
    /// Target frames per second
    #[arg(long, global = true)]
    fps: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Run a stream and report how fresh the latest frame stays
    Probe {
        /// How long to poll
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save the first captured frame to an image file
    Snapshot {
        /// Output path; format follows the extension (png, jpg, ...)
        #[arg(short, long)]
        output: PathBuf,
        /// Give up if no frame arrives within this many seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

#[derive(Serialize)]
struct ProbeReport {
    source: String,
    elapsed_secs: f64,
    first_frame_ms: Option<u64>,
    distinct_frames: u64,
    repeated_reads: u64,
    observed_fps: f64,
    frames_captured: u64,
    capture_failures: u64,
    width: u32,
    height: u32,
    final_state: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = framestream_hw::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Probe { seconds, json } => {
            let config = resolve_config(&cli.source)?;
            let report = probe(config, Duration::from_secs(seconds)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Snapshot { output, timeout } => {
            let config = resolve_config(&cli.source)?;
            snapshot(config, &output, Duration::from_secs(timeout)).await?;
            println!("Saved {}", output.display());
        }
    }

    Ok(())
}

fn resolve_config(args: &SourceArgs) -> Result<StreamConfig> {
    let mut config = StreamConfig::load(args.config.as_deref()).context("failed to load config")?;

    if args.pi_camera {
        config.source = SourceConfig::CameraModule;
    } else if let Some(index) = args.index {
        config.source = SourceConfig::Webcam { index };
    }
    if let Some(width) = args.width {
        config.resolution.width = width;
    }
    if let Some(height) = args.height {
        config.resolution.height = height;
    }
    if let Some(fps) = args.fps {
        config.framerate = fps;
    }

    config.validate()?;
    Ok(config)
}

fn open_stream(config: StreamConfig) -> Result<LatestFrameStream> {
    let drivers = V4lDrivers::from_env();
    let mut stream =
        LatestFrameStream::open(config, &drivers).context("failed to open capture device")?;
    stream.start().context("failed to start stream")?;
    Ok(stream)
}

async fn probe(config: StreamConfig, duration: Duration) -> Result<ProbeReport> {
    let source = format!("{:?}", config.source);
    let poll_interval = Duration::from_secs_f64(1.0 / config.framerate as f64);
    let stream = open_stream(config)?;

    let started = Instant::now();
    let mut ticker = tokio::time::interval(poll_interval);
    let mut first_frame_ms = None;
    let mut last_sequence = None;
    let mut distinct_frames = 0u64;
    let mut repeated_reads = 0u64;
    let (mut width, mut height) = (0, 0);

    while started.elapsed() < duration {
        ticker.tick().await;
        let Some(frame) = stream.read() else {
            continue;
        };
        if first_frame_ms.is_none() {
            first_frame_ms = Some(started.elapsed().as_millis() as u64);
            tracing::info!(width = frame.width, height = frame.height, "first frame");
        }
        if last_sequence == Some(frame.sequence) {
            repeated_reads += 1;
        } else {
            distinct_frames += 1;
            last_sequence = Some(frame.sequence);
        }
        width = frame.width;
        height = frame.height;
    }

    let elapsed = started.elapsed().as_secs_f64();
    stream
        .shutdown()
        .await
        .context("acquisition thread did not stop")?;
    let stats = stream.stats();

    Ok(ProbeReport {
        source,
        elapsed_secs: elapsed,
        first_frame_ms,
        distinct_frames,
        repeated_reads,
        observed_fps: distinct_frames as f64 / elapsed.max(f64::EPSILON),
        frames_captured: stats.frames_captured,
        capture_failures: stats.capture_failures,
        width,
        height,
        final_state: format!("{:?}", stats.state),
    })
}

fn print_report(report: &ProbeReport) {
    println!("source:           {}", report.source);
    println!("resolution:       {}x{}", report.width, report.height);
    match report.first_frame_ms {
        Some(ms) => println!("first frame:      {ms} ms"),
        None => println!("first frame:      none"),
    }
    println!("distinct frames:  {}", report.distinct_frames);
    println!("repeated reads:   {}", report.repeated_reads);
    println!("observed fps:     {:.1}", report.observed_fps);
    println!("frames captured:  {}", report.frames_captured);
    println!("capture failures: {}", report.capture_failures);
    println!("final state:      {}", report.final_state);
}

async fn snapshot(config: StreamConfig, output: &Path, timeout: Duration) -> Result<()> {
    let stream = open_stream(config)?;

    let deadline = Instant::now() + timeout;
    let frame = loop {
        if let Some(frame) = stream.read() {
            break Some(frame);
        }
        if Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    stream
        .shutdown()
        .await
        .context("acquisition thread did not stop")?;

    let Some(frame) = frame else {
        bail!("no frame captured within {timeout:?}");
    };
    save_frame(&frame, output)
}

fn save_frame(frame: &Frame, output: &Path) -> Result<()> {
    match frame.channels {
        3 => {
            let rgb: Vec<u8> = frame
                .data
                .chunks_exact(3)
                .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
                .collect();
            image::RgbImage::from_raw(frame.width, frame.height, rgb)
                .context("frame buffer does not match its dimensions")?
                .save(output)
                .with_context(|| format!("failed to write {}", output.display()))?;
        }
        1 => {
            image::GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
                .context("frame buffer does not match its dimensions")?
                .save(output)
                .with_context(|| format!("failed to write {}", output.display()))?;
        }
        n => bail!("unsupported channel count: {n}"),
    }
    Ok(())
}
