use crate::config::PoseConfig;
use crate::landmark::{Landmark, Vec3};

/// Move `current` toward `target` by at most `max_delta`, landing exactly on
/// the target when it is within reach. A non-finite `current` snaps to the
/// target; a non-finite target is never approached.
pub fn move_towards(current: &Vec3, target: &Vec3, max_delta: f32) -> Vec3 {
    if !is_finite(target) {
        return if is_finite(current) { *current } else { Vec3::zeros() };
    }
    if !is_finite(current) {
        return *target;
    }
    let delta = target - current;
    let distance = delta.norm();
    if distance <= max_delta || distance == 0.0 || !distance.is_finite() {
        return *target;
    }
    current + delta * (max_delta / distance)
}

pub(crate) fn is_finite(v: &Vec3) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Bounded-velocity follower for every landmark's rendered position.
pub struct MotionSmoother {
    positions: [Vec3; Landmark::COUNT],
    max_speed: f32,
}

impl MotionSmoother {
    pub fn new(max_speed: f32) -> Self {
        Self {
            positions: [Vec3::zeros(); Landmark::COUNT],
            max_speed,
        }
    }

    pub fn from_config(config: &PoseConfig) -> Self {
        Self::new(config.max_speed)
    }

    /// Advance all positions toward `targets` for a tick of `dt_secs`.
    pub fn advance(&mut self, targets: &[Vec3; Landmark::COUNT], dt_secs: f32) {
        let max_delta = self.max_speed * dt_secs.max(0.0);
        for (pos, target) in self.positions.iter_mut().zip(targets.iter()) {
            *pos = move_towards(pos, target, max_delta);
        }
    }

    pub fn position(&self, landmark: Landmark) -> Vec3 {
        self.positions[landmark.index()]
    }

    pub fn positions(&self) -> &[Vec3; Landmark::COUNT] {
        &self.positions
    }

    pub fn reset(&mut self) {
        self.positions = [Vec3::zeros(); Landmark::COUNT];
    }
}
