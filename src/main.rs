use anyhow::{Context, Result};
use std::io::{BufRead, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use landmark_stream::config::Config;
use landmark_stream::supervisor::register_shutdown_signals;
use landmark_stream::{
    logging, Landmark, Listener, Mailbox, PoseReceiver, ProducerProcess, ShutdownSupervisor,
};

const CONFIG_PATH: &str = "config.toml";
const WATCHED: [Landmark; 3] = [Landmark::Nose, Landmark::LeftWrist, Landmark::RightWrist];

/// Sets `quit` when `q` is entered on stdin, or on EOF from a terminal.
/// A non-interactive stdin (e.g. /dev/null under a service manager) hits EOF
/// immediately, so there only signals end the loop.
fn spawn_quit_watcher(quit: Arc<AtomicBool>) {
    let interactive = std::io::stdin().is_terminal();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) if l.trim() == "q" => {
                    quit.store(true, Ordering::Relaxed);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
        if interactive {
            info!("stdin closed");
            quit.store(true, Ordering::Relaxed);
        }
    });
}

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path);
    let _log_guard = logging::init(&config.logging, "receiver")?;

    info!(version = env!("GIT_VERSION"), config = %config_path, "landmark receiver");
    info!(
        samples_for_pose = config.pose.samples_for_pose,
        multiplier = config.pose.multiplier,
        max_speed = config.pose.max_speed,
        target_fps = config.app.target_fps,
        "pose settings"
    );

    let mailbox = Mailbox::new();
    let mut listener = Listener::new(config.transport.clone(), mailbox.clone());
    listener.start().context("failed to start listener")?;

    let producer = if config.producer.enabled {
        Some(ProducerProcess::launch(&config.producer).context("failed to launch producer")?)
    } else {
        None
    };
    let mut supervisor = ShutdownSupervisor::new(listener, producer);
    let mut receiver = PoseReceiver::new(&config.pose, mailbox);

    let quit = Arc::new(AtomicBool::new(false));
    register_shutdown_signals(&quit).context("failed to register signal handlers")?;
    println!("[q] + Enter (or Ctrl+C): quit");
    spawn_quit_watcher(Arc::clone(&quit));

    let frame_duration = Duration::from_secs_f64(1.0 / config.app.target_fps as f64);
    let status_interval = Duration::from_secs_f32(config.app.status_interval_secs.max(0.1));

    let mut last_tick = Instant::now();
    let mut status_timer = Instant::now();
    let mut frame_count = 0u32;
    let mut producer_exited = false;

    while !quit.load(Ordering::Relaxed) {
        let loop_start = Instant::now();
        let dt = loop_start.duration_since(last_tick);
        last_tick = loop_start;

        receiver.tick(dt);
        frame_count += 1;

        if !producer_exited {
            if let Some(producer) = supervisor.producer_mut() {
                if !producer.is_running() {
                    warn!("producer exited on its own");
                    producer_exited = true;
                }
            }
        }

        // status
        let elapsed = status_timer.elapsed();
        if elapsed >= status_interval {
            let mailbox = receiver.mailbox();
            info!(
                fps = format_args!("{:.1}", frame_count as f32 / elapsed.as_secs_f32()),
                active = receiver.is_active(),
                samples_per_sec = format_args!("{:.1}", receiver.samples_per_second()),
                payloads = mailbox.published(),
                dropped = mailbox.dropped(),
                rejected = receiver.totals().rejected,
                "status"
            );
            if receiver.is_active() {
                for landmark in WATCHED {
                    let p = receiver.landmark_position(landmark);
                    info!("  {:<12} [{:>7.2}, {:>7.2}, {:>7.2}]", landmark.name(), p.x, p.y, p.z);
                }
            }
            frame_count = 0;
            status_timer = Instant::now();
        }

        let spent = loop_start.elapsed();
        if spent < frame_duration {
            std::thread::sleep(frame_duration - spent);
        }
    }

    info!("shutting down");
    let report = supervisor.shutdown();
    info!(producer = ?report.producer, listener = ?report.listener, "bye");
    Ok(())
}
