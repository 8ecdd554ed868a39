use std::net::UdpSocket;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use landmark_stream::config::{ProducerConfig, TransportConfig};
use landmark_stream::{
    Listener, ListenerState, Mailbox, PoseReceiver, ProducerOutcome, ProducerProcess,
    ShutdownSupervisor, StopOutcome,
};

const EMITTER: &str = env!("CARGO_BIN_EXE_pose_emitter");

fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn start_listener(mailbox: &Mailbox) -> Listener {
    let config = TransportConfig {
        port: 0,
        recv_timeout_ms: 50,
        ..TransportConfig::default()
    };
    let mut listener = Listener::new(config, mailbox.clone());
    listener.start().unwrap();
    listener
}

fn wait_for_first_payload(mailbox: &Mailbox) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while mailbox.published() == 0 {
        assert!(Instant::now() < deadline, "emitter never sent a payload");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_emitter_quits_on_sentinel() {
    let mailbox = Mailbox::new();
    let listener = start_listener(&mailbox);
    let target = listener.local_addr().unwrap();
    let control_port = free_udp_port();

    let producer = ProducerProcess::launch(&ProducerConfig {
        enabled: true,
        interpreter: EMITTER.to_string(),
        script: PathBuf::new(),
        args: vec![
            "--target".into(),
            target.to_string(),
            "--control".into(),
            format!("127.0.0.1:{}", control_port),
            "--rate".into(),
            "60".into(),
        ],
        working_dir: None,
        control_addr: format!("127.0.0.1:{}", control_port),
        exit_timeout_ms: 3000,
    })
    .unwrap();

    let mut receiver = PoseReceiver::new(&Default::default(), mailbox.clone());
    wait_for_first_payload(&mailbox);
    receiver.tick(Duration::from_millis(16));
    assert!(receiver.is_active());

    let mut supervisor = ShutdownSupervisor::new(listener, Some(producer));
    let started = Instant::now();
    let report = supervisor.shutdown();
    assert_eq!(report.producer, ProducerOutcome::Graceful);
    assert_eq!(report.listener, StopOutcome::Joined);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(supervisor.listener().state(), ListenerState::Closed);

    // second pass is a no-op
    let again = supervisor.shutdown();
    assert_eq!(again.producer, ProducerOutcome::NotRunning);
    assert_eq!(again.listener, StopOutcome::AlreadyClosed);
}

#[cfg(unix)]
#[test]
fn test_slow_producer_is_force_killed() {
    let mailbox = Mailbox::new();
    let listener = start_listener(&mailbox);
    let control = format!("127.0.0.1:{}", free_udp_port());

    // ignores the sentinel and would take 4 seconds to exit
    let mut command = Command::new("sleep");
    command.arg("4");
    let producer = ProducerProcess::spawn(
        command,
        control.parse().unwrap(),
        ProducerConfig::default().exit_timeout(),
    )
    .unwrap();

    let mut supervisor = ShutdownSupervisor::new(listener, Some(producer));
    let started = Instant::now();
    let report = supervisor.shutdown();
    assert_eq!(report.producer, ProducerOutcome::ForcedKill);
    assert_eq!(report.listener, StopOutcome::Joined);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(4));
}

#[test]
fn test_launch_failure_is_reported() {
    let config = ProducerConfig {
        enabled: true,
        interpreter: "/nonexistent/python".to_string(),
        ..ProducerConfig::default()
    };
    assert!(matches!(
        ProducerProcess::launch(&config),
        Err(landmark_stream::Error::Spawn { .. })
    ));
}
