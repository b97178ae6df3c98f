//! Headless stream client.
//!
//! Connects to a `camstream` publisher or pull endpoint, restores each
//! frame and logs its size. Useful for checking a deployment without a
//! display.

use camstream::{
    codec::decode_compressed, transport::TransportError, CompressedFrame, FrameRequester,
    RunningFlag, Subscriber,
};
use clap::{Parser, ValueEnum};
use std::time::Duration;
use tracing::{info, warn};

/// Pause between pull requests.
const REQUEST_INTERVAL: Duration = Duration::from_millis(50);
/// How long a receive waits before re-checking Ctrl+C.
const RECV_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Subscribe to a publisher.
    Sub,
    /// Pull frames from a responder.
    Req,
}

#[derive(Parser, Debug)]
#[command(name = "camstream-subscribe", version, about = "Receive and decode camstream frames")]
struct Cli {
    /// Endpoint to connect to.
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    connect: String,

    #[arg(short, long, value_enum, default_value_t = Mode::Sub)]
    mode: Mode,

    /// Stop after this many frames (0 runs until Ctrl+C).
    #[arg(short = 'n', long, default_value_t = 0)]
    count: u64,
}

/// Decodes one frame and logs it. Decode failures only affect this frame.
fn inspect(frame: &CompressedFrame, received: u64) {
    match decode_compressed(frame.as_bytes()) {
        Ok(image) => info!(
            frame = received,
            width = image.width(),
            height = image.height(),
            bytes = frame.len(),
            "Frame received"
        ),
        Err(e) => warn!(frame = received, bytes = frame.len(), error = %e, "Undecodable frame"),
    }
}

fn subscribe(cli: &Cli, running: &RunningFlag) -> Result<u64, TransportError> {
    let mut subscriber = Subscriber::connect(&cli.connect)?;
    info!(peer = %subscriber.peer_addr(), "Subscribed");

    let mut received = 0;
    while running.is_running() && (cli.count == 0 || received < cli.count) {
        if let Some(frame) = subscriber.recv_timeout(RECV_POLL)? {
            received += 1;
            inspect(&frame, received);
        }
    }
    Ok(received)
}

fn pull(cli: &Cli, running: &RunningFlag) -> Result<u64, TransportError> {
    let mut requester = FrameRequester::connect(&cli.connect)?;
    requester.set_read_timeout(Some(Duration::from_secs(5)))?;
    info!(addr = %cli.connect, "Connected to pull endpoint");

    let mut received = 0;
    while running.is_running() && (cli.count == 0 || received < cli.count) {
        let (header, frame) = requester.request_frame()?;
        received += 1;
        info!(rows = header.rows, cols = header.cols, "Header received");
        inspect(&frame, received);
        running.sleep(REQUEST_INTERVAL);
    }
    Ok(received)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let running = RunningFlag::new();
    if let Err(e) = ctrlc::set_handler({
        let running = running.clone();
        move || running.stop()
    }) {
        warn!(error = %e, "Failed to install Ctrl+C handler");
    }

    let result = match cli.mode {
        Mode::Sub => subscribe(&cli, &running),
        Mode::Req => pull(&cli, &running),
    };

    match result {
        Ok(received) => info!(received, "Done"),
        Err(e) => {
            eprintln!("camstream-subscribe: {e}");
            std::process::exit(1);
        }
    }
}
