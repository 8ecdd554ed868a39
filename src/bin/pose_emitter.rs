//! Synthetic pose producer: streams a swaying 33-landmark body in the wire
//! format and exits when `__QUIT__` arrives on the control port.
//!
//! Useful for exercising the receiver without a camera pipeline.

use std::io::Write;
use std::net::{TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::Parser;
use tokio_util::codec::Encoder;
use tracing::{debug, info, warn};

use landmark_stream::config::LoggingConfig;
use landmark_stream::landmark::{Landmark, Vec3};
use landmark_stream::logging;
use landmark_stream::protocol::{
    encode_payload, LegacyFrameCodec, Observation, DEFAULT_CONTROL_PORT, DEFAULT_DATA_PORT, PING,
    QUIT_SENTINEL,
};

#[derive(Parser, Debug)]
#[command(name = "pose_emitter", about = "Stream synthetic pose landmarks")]
struct Args {
    /// Receiver address
    #[arg(long, default_value_t = format!("127.0.0.1:{}", DEFAULT_DATA_PORT))]
    target: String,
    /// Address to listen on for the quit sentinel
    #[arg(long, default_value_t = format!("127.0.0.1:{}", DEFAULT_CONTROL_PORT))]
    control: String,
    /// Frames per second
    #[arg(long, default_value_t = 30)]
    rate: u32,
    /// Use the length-prefixed TCP stream instead of UDP
    #[arg(long)]
    stream: bool,
    /// Send pings for this long before streaming
    #[arg(long, default_value_t = 0)]
    warmup_ms: u64,
    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

/// Listen for the quit sentinel on `addr` until it arrives or `quit` is set.
fn spawn_quit_listener(addr: &str, quit: Arc<AtomicBool>) -> Result<()> {
    let socket = UdpSocket::bind(addr).with_context(|| format!("failed to bind control {addr}"))?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    info!(%addr, "listening for quit signal");

    std::thread::spawn(move || {
        let mut buf = [0u8; 1024];
        while !quit.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    if String::from_utf8_lossy(&buf[..len]).trim() == QUIT_SENTINEL {
                        info!(%from, "received quit signal");
                        quit.store(true, Ordering::Relaxed);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => {
                    warn!(error = %e, "control receive failed");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    });
    Ok(())
}

/// A loosely standing figure; each landmark sways on its own phase.
fn synthetic_pose(t: f32) -> Vec<Observation> {
    Landmark::ALL
        .iter()
        .map(|&landmark| {
            let i = landmark.index() as f32;
            let side = match landmark.name() {
                n if n.starts_with("LEFT") => -1.0,
                n if n.starts_with("RIGHT") => 1.0,
                _ => 0.0,
            };
            let sway = 0.05 * (t * 2.0 + i * 0.3).sin();
            Observation {
                landmark,
                position: Vec3::new(side * 0.2 + sway, 0.8 - i * 0.05, 0.1 * (t + i).cos()),
            }
        })
        .collect()
}

enum Sink {
    Datagram(UdpSocket, String),
    Stream(TcpStream, LegacyFrameCodec, BytesMut),
}

impl Sink {
    fn send(&mut self, payload: &str) -> Result<()> {
        match self {
            Sink::Datagram(socket, target) => {
                socket.send_to(payload.as_bytes(), target.as_str())?;
            }
            Sink::Stream(stream, codec, buf) => {
                buf.clear();
                codec.encode(payload, buf)?;
                stream.write_all(&buf[..])?;
            }
        }
        Ok(())
    }
}

fn connect(args: &Args, quit: &AtomicBool) -> Result<Option<Sink>> {
    if !args.stream {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        return Ok(Some(Sink::Datagram(socket, args.target.clone())));
    }
    while !quit.load(Ordering::Relaxed) {
        match TcpStream::connect(&args.target) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                info!(addr = %args.target, "connected");
                return Ok(Some(Sink::Stream(stream, LegacyFrameCodec::default(), BytesMut::new())));
            }
            Err(e) => {
                debug!(error = %e, "receiver not up yet");
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }
    Ok(None)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init(&LoggingConfig::default(), "emitter")?;

    let quit = Arc::new(AtomicBool::new(false));
    spawn_quit_listener(&args.control, quit.clone())?;

    let Some(mut sink) = connect(&args, &quit)? else {
        info!("quit before connecting");
        return Ok(());
    };

    let frame_duration = Duration::from_secs_f64(1.0 / args.rate.max(1) as f64);
    let warmup_end = Instant::now() + Duration::from_millis(args.warmup_ms);
    while !quit.load(Ordering::Relaxed) && Instant::now() < warmup_end {
        if let Err(e) = sink.send(PING) {
            debug!(error = %e, "ping failed");
        }
        std::thread::sleep(Duration::from_millis(300));
    }

    info!(addr = %args.target, rate = args.rate, stream = args.stream, "streaming");
    let start = Instant::now();
    let mut sent = 0u64;
    while !quit.load(Ordering::Relaxed) {
        if args.frames.is_some_and(|n| sent >= n) {
            break;
        }
        let loop_start = Instant::now();
        let payload = encode_payload(&synthetic_pose(start.elapsed().as_secs_f32()));
        if let Err(e) = sink.send(&payload) {
            // receiver may not be up yet; keep going
            debug!(error = %e, "send failed");
        }
        sent += 1;

        let spent = loop_start.elapsed();
        if spent < frame_duration {
            std::thread::sleep(frame_duration - spent);
        }
    }

    quit.store(true, Ordering::Relaxed);
    info!(frames = sent, "exiting");
    Ok(())
}
