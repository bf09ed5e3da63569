use std::path::{Path, PathBuf};

use anyhow::{bail, Context as AnyhowContext, Result};
use clap::Parser;
use indicatif::ProgressStyle;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use keypoint_track::api::{create_router, ApiState};
use keypoint_track::config::Config;
use keypoint_track::dataset::Dataset;
use keypoint_track::registry::SessionRegistry;
use keypoint_track::{TrackedPoint, TrackingSession};

#[derive(Parser)]
#[clap(version, about = "Online keypoint tracking over a frame-at-a-time API")]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Serve the register/track HTTP API
    Serve {
        #[clap(long, default_value = "0.0.0.0")]
        host: String,
        #[clap(long, default_value = "5000")]
        port: u16,
        /// Refuse new sessions beyond this many
        #[clap(long)]
        max_sessions: Option<usize>,
        #[clap(flatten)]
        config: Config,
    },
    /// Track points through a directory of image files
    Replay {
        #[clap(short, long)]
        frames: PathBuf,
        /// Point to track in the first frame, as `x,y`. Repeat for more points.
        #[clap(short, long = "point", required = true, parse(try_from_str = parse_point))]
        points: Vec<[f64; 2]>,
        #[clap(flatten)]
        config: Config,
    },
}

#[derive(Serialize)]
struct ReplayLine<'a> {
    frame: usize,
    file: &'a str,
    keypoints: Vec<[f64; 2]>,
    visibility: Vec<bool>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();

    match args.command {
        Command::Serve {
            host,
            port,
            max_sessions,
            config,
        } => {
            config.validate()?;
            let runtime = tokio::runtime::Runtime::new().context("cannot start async runtime")?;
            runtime.block_on(serve(&host, port, max_sessions, &config))
        }
        Command::Replay {
            frames,
            points,
            config,
        } => {
            config.validate()?;
            replay(&frames, &points, &config)
        }
    }
}

async fn serve(host: &str, port: u16, max_sessions: Option<usize>, config: &Config) -> Result<()> {
    let registry = SessionRegistry::new(config.model_factory(), config.window_size, max_sessions);
    let app = create_router(ApiState::new(registry));

    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("cannot bind {host}:{port}"))?;
    info!(
        address = %listener.local_addr()?,
        window = config.window_capacity(),
        "keypoint tracker listening"
    );
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn replay(folder: &Path, points: &[[f64; 2]], config: &Config) -> Result<()> {
    let mut dataset = Dataset::new(folder)?;
    if dataset.len() < 2 {
        bail!("replay needs at least two frames, found {}", dataset.len());
    }

    let header_span = info_span!("replay");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(dataset.len() as u64);
    let header_span_enter = header_span.enter();

    let mut session = TrackingSession::new((config.model_factory())(), config.window_size)?;
    let (first_path, first) = dataset.next()?.context("dataset is empty")?;
    session
        .reset(first, points)
        .with_context(|| format!("cannot register points in {}", first_path.display()))?;
    header_span.pb_inc(1);

    let mut frame_number = 1;
    while let Some((path, frame)) = dataset.next()? {
        match session.step(frame) {
            Ok(tracked) => print_line(frame_number, &path, &tracked)?,
            Err(e) if e.is_retryable() => debug!(frame = frame_number, "{e}"),
            Err(e) => {
                return Err(e).with_context(|| format!("tracking failed at {}", path.display()))
            }
        }
        frame_number += 1;
        header_span.pb_inc(1);
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);
    info!(frames = frame_number, "replay finished");

    Ok(())
}

fn print_line(frame: usize, path: &Path, tracked: &[TrackedPoint]) -> Result<()> {
    let file = path.to_string_lossy();
    let line = ReplayLine {
        frame,
        file: &file,
        keypoints: tracked.iter().map(|p| [p.x, p.y]).collect(),
        visibility: tracked.iter().map(|p| p.visible).collect(),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn parse_point(s: &str) -> Result<[f64; 2], String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("bad coordinate '{v}': {e}"))
    };
    Ok([parse(x)?, parse(y)?])
}
