use std::io::Write;
use std::net::{TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use landmark_stream::config::{PoseConfig, TransportConfig, TransportKind};
use landmark_stream::protocol::LegacyFrameCodec;
use landmark_stream::{Landmark, Listener, Mailbox, PoseReceiver, StopOutcome, Vec3};

fn transport(kind: TransportKind) -> TransportConfig {
    TransportConfig {
        kind,
        port: 0,
        recv_timeout_ms: 50,
        ..TransportConfig::default()
    }
}

/// Tick until a payload has been consumed or two seconds pass.
fn tick_until_received(receiver: &mut PoseReceiver) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if receiver.tick(Duration::from_millis(5)).payload_received {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn approx_eq_vec(a: &Vec3, b: &Vec3, eps: f32) -> bool {
    (a - b).iter().all(|d| d.abs() < eps)
}

#[test]
fn test_udp_payload_reaches_target() {
    let mailbox = Mailbox::new();
    let mut listener = Listener::new(transport(TransportKind::Udp), mailbox.clone());
    let addr = listener.start().unwrap();

    let pose = PoseConfig {
        samples_for_pose: 2,
        multiplier: 10.0,
        max_speed: 50.0,
    };
    let mut receiver = PoseReceiver::new(&pose, mailbox);
    assert!(!receiver.is_active());

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(b"5|1.0|2.0|3.0\n5|3.0|4.0|5.0\n", addr)
        .unwrap();

    assert!(tick_until_received(&mut receiver));
    assert!(receiver.is_active());
    assert!(approx_eq_vec(
        &receiver.landmark_target(Landmark::RightEye),
        &Vec3::new(20.0, 30.0, 40.0),
        1e-4
    ));
    // rendered position has started moving but is capped by max_speed
    let rendered = receiver.landmark_position(Landmark::RightEye);
    assert!(rendered.norm() > 0.0);
    assert!(rendered.norm() <= 50.0 * 0.005 + 1e-4);

    assert_eq!(listener.stop(), StopOutcome::Joined);
}

#[test]
fn test_udp_garbage_is_survivable() {
    let mailbox = Mailbox::new();
    let mut listener = Listener::new(transport(TransportKind::Udp), mailbox.clone());
    let addr = listener.start().unwrap();
    let mut receiver = PoseReceiver::new(&PoseConfig::default(), mailbox);

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&[0xff, 0xfe, b'\n', b'|'], addr).unwrap();
    assert!(tick_until_received(&mut receiver));
    assert!(!receiver.is_active());

    sender.send_to(b"0|0.1|0.2|0.3", addr).unwrap();
    assert!(tick_until_received(&mut receiver));
    assert!(receiver.is_active());

    listener.stop();
}

#[test]
fn test_legacy_stream_frames_reach_target() {
    let mailbox = Mailbox::new();
    let mut listener = Listener::new(transport(TransportKind::Stream), mailbox.clone());
    let addr = listener.start().unwrap();
    let mut receiver = PoseReceiver::new(&PoseConfig::default(), mailbox);

    let mut stream = TcpStream::connect(addr).unwrap();
    let mut codec = LegacyFrameCodec::default();
    let mut buf = BytesMut::new();
    // zero-length frame is a no-op
    buf.extend_from_slice(&0u32.to_le_bytes());
    codec.encode("24|1.5|0|-2", &mut buf).unwrap();
    stream.write_all(&buf).unwrap();

    assert!(tick_until_received(&mut receiver));
    assert!(approx_eq_vec(
        &receiver.landmark_target(Landmark::RightHip),
        &Vec3::new(15.0, 0.0, -20.0),
        1e-4
    ));

    assert_eq!(listener.stop(), StopOutcome::Joined);
}

#[test]
fn test_legacy_stream_accepts_reconnect() {
    let mailbox = Mailbox::new();
    let mut listener = Listener::new(transport(TransportKind::Stream), mailbox.clone());
    let addr = listener.start().unwrap();
    let mut receiver = PoseReceiver::new(&PoseConfig::default(), mailbox);
    let mut codec = LegacyFrameCodec::default();

    for payload in ["1|1|1|1", "2|2|2|2"] {
        let mut stream = TcpStream::connect(addr).unwrap();
        let mut buf = BytesMut::new();
        codec.encode(payload, &mut buf).unwrap();
        stream.write_all(&buf).unwrap();
        assert!(tick_until_received(&mut receiver));
        drop(stream);
    }
    assert_eq!(receiver.landmark_target(Landmark::LeftEye), Vec3::new(20.0, 20.0, 20.0));

    listener.stop();
}

#[test]
fn test_stop_with_connected_stream_client() {
    let mut listener = Listener::new(transport(TransportKind::Stream), Mailbox::new());
    let addr = listener.start().unwrap();
    let _client = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    assert_eq!(listener.stop(), StopOutcome::Joined);
    assert!(started.elapsed() < Duration::from_secs(1));
}
