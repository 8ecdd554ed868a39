use crate::config::PoseConfig;
use crate::landmark::{Landmark, Vec3};
use crate::smoother::is_finite;

use tracing::warn;

/// Running sum of the samples received for one landmark since the last
/// resolve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccumulatedSample {
    pub sum: Vec3,
    pub count: u32,
}

impl AccumulatedSample {
    pub fn empty() -> Self {
        Self {
            sum: Vec3::zeros(),
            count: 0,
        }
    }

    pub fn mean(&self) -> Option<Vec3> {
        (self.count > 0).then(|| self.sum / self.count as f32)
    }
}

impl Default for AccumulatedSample {
    fn default() -> Self {
        Self::empty()
    }
}

/// Batches samples per landmark and averages them into targets.
///
/// Owned by the consumer tick; nothing here is shared across threads.
pub struct SampleAccumulator {
    samples: [AccumulatedSample; Landmark::COUNT],
    targets: [Vec3; Landmark::COUNT],
    samples_for_pose: u32,
    multiplier: f32,
    active: bool,
}

impl SampleAccumulator {
    pub fn new(samples_for_pose: u32, multiplier: f32) -> Self {
        Self {
            samples: [AccumulatedSample::empty(); Landmark::COUNT],
            targets: [Vec3::zeros(); Landmark::COUNT],
            // zero would average an empty buffer
            samples_for_pose: samples_for_pose.max(1),
            multiplier,
            active: false,
        }
    }

    pub fn from_config(config: &PoseConfig) -> Self {
        Self::new(config.samples_for_pose, config.multiplier)
    }

    pub fn accumulate(&mut self, landmark: Landmark, value: Vec3) {
        let sample = &mut self.samples[landmark.index()];
        sample.sum += value;
        sample.count += 1;
        self.active = true;
    }

    /// Average every landmark that reached the threshold into its target and
    /// reset its buffer. Returns how many targets changed.
    ///
    /// A mean that overflows once scaled is discarded and the previous target
    /// kept.
    pub fn resolve_targets(&mut self) -> usize {
        let mut resolved = 0;
        for (sample, target) in self.samples.iter_mut().zip(self.targets.iter_mut()) {
            if sample.count < self.samples_for_pose {
                continue;
            }
            if let Some(mean) = sample.mean() {
                let next = mean * self.multiplier;
                if is_finite(&next) {
                    *target = next;
                    resolved += 1;
                } else {
                    warn!(count = sample.count, "discarding non-finite target");
                }
            }
            *sample = AccumulatedSample::empty();
        }
        resolved
    }

    pub fn sample(&self, landmark: Landmark) -> &AccumulatedSample {
        &self.samples[landmark.index()]
    }

    pub fn target(&self, landmark: Landmark) -> Vec3 {
        self.targets[landmark.index()]
    }

    pub fn targets(&self) -> &[Vec3; Landmark::COUNT] {
        &self.targets
    }

    /// True once any record has been accumulated.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn samples_for_pose(&self) -> u32 {
        self.samples_for_pose
    }
}
