//! Consumer side of the pipeline, driven once per rendered frame.
//!
//! Each tick drains the mailbox, decodes the payload into the accumulator,
//! resolves averaged targets and advances the rendered positions. All of it
//! runs on the caller's thread; the mailbox is the only state shared with
//! the listener.

use std::time::Duration;

use crate::accumulator::SampleAccumulator;
use crate::config::PoseConfig;
use crate::landmark::{Landmark, Vec3};
use crate::mailbox::Mailbox;
use crate::protocol::{self, DecodeStats};
use crate::skeleton::PoseSnapshot;
use crate::smoother::MotionSmoother;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub payload_received: bool,
    pub decoded: DecodeStats,
    /// Landmarks whose target was re-averaged
    pub resolved: usize,
}

/// Accepted records per second over a window of tick time.
#[derive(Debug, Default)]
struct SampleRate {
    window: Duration,
    count: usize,
    rate: f32,
}

impl SampleRate {
    const WINDOW: Duration = Duration::from_secs(1);

    fn record(&mut self, samples: usize, dt: Duration) {
        self.count += samples;
        self.window += dt;
        if self.window >= Self::WINDOW {
            self.rate = self.count as f32 / self.window.as_secs_f32();
            self.count = 0;
            self.window = Duration::ZERO;
        }
    }
}

pub struct PoseReceiver {
    mailbox: Mailbox,
    accumulator: SampleAccumulator,
    smoother: MotionSmoother,
    rate: SampleRate,
    totals: DecodeStats,
}

impl PoseReceiver {
    pub fn new(config: &PoseConfig, mailbox: Mailbox) -> Self {
        Self {
            mailbox,
            accumulator: SampleAccumulator::from_config(config),
            smoother: MotionSmoother::from_config(config),
            rate: SampleRate::default(),
            totals: DecodeStats::default(),
        }
    }

    /// Run one consumer tick covering `dt` of render time. Never blocks.
    pub fn tick(&mut self, dt: Duration) -> TickReport {
        let mut report = TickReport::default();

        if let Some(payload) = self.mailbox.try_take() {
            report.payload_received = true;
            let accumulator = &mut self.accumulator;
            report.decoded = protocol::decode_payload(&payload, |obs| {
                accumulator.accumulate(obs.landmark, obs.position)
            });
            if report.decoded.rejected > 0 {
                tracing::debug!(
                    accepted = report.decoded.accepted,
                    rejected = report.decoded.rejected,
                    "dropped malformed records"
                );
            }
            self.totals += report.decoded;
        }

        report.resolved = self.accumulator.resolve_targets();
        self.smoother.advance(self.accumulator.targets(), dt.as_secs_f32());
        self.rate.record(report.decoded.accepted, dt);
        report
    }

    /// Current rendered position.
    pub fn landmark_position(&self, landmark: Landmark) -> Vec3 {
        self.smoother.position(landmark)
    }

    /// Latest averaged target the rendered position is moving toward.
    pub fn landmark_target(&self, landmark: Landmark) -> Vec3 {
        self.accumulator.target(landmark)
    }

    /// True once any valid record has been received.
    pub fn is_active(&self) -> bool {
        self.accumulator.is_active()
    }

    pub fn snapshot(&self) -> PoseSnapshot {
        PoseSnapshot::new(*self.smoother.positions())
    }

    pub fn virtual_neck(&self) -> Vec3 {
        self.snapshot().virtual_neck()
    }

    pub fn virtual_hip(&self) -> Vec3 {
        self.snapshot().virtual_hip()
    }

    pub fn samples_per_second(&self) -> f32 {
        self.rate.rate
    }

    /// Records accepted and rejected since creation.
    pub fn totals(&self) -> DecodeStats {
        self.totals
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }
}
