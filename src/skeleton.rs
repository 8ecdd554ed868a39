use crate::landmark::{Landmark, Vec3};

use Landmark::*;

/// Polylines a renderer draws between landmarks (feet, legs, torso, arms,
/// hands, mouth, face).
pub const SKELETON_CHAINS: [&[Landmark]; 11] = [
    // feet
    &[RightFootIndex, RightHeel, RightAnkle, RightFootIndex],
    &[LeftFootIndex, LeftHeel, LeftAnkle, LeftFootIndex],
    // legs
    &[RightAnkle, RightKnee, RightHip],
    &[LeftAnkle, LeftKnee, LeftHip],
    // torso
    &[RightHip, LeftHip, LeftShoulder, RightShoulder, RightHip],
    // arms
    &[RightShoulder, RightElbow, RightWrist, RightThumb],
    &[LeftShoulder, LeftElbow, LeftWrist, LeftThumb],
    // hands
    &[RightWrist, RightPinky, RightIndex, RightWrist],
    &[LeftWrist, LeftPinky, LeftIndex, LeftWrist],
    // mouth
    &[MouthRight, MouthLeft],
    // face
    &[RightEar, RightEye, Nose, LeftEye, LeftEar],
];

/// Every consecutive pair of the chains as (start, end) segments.
pub fn bones() -> impl Iterator<Item = (Landmark, Landmark)> {
    SKELETON_CHAINS
        .iter()
        .flat_map(|chain| chain.windows(2).map(|w| (w[0], w[1])))
}

/// Rendered positions of all landmarks at one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSnapshot {
    pub positions: [Vec3; Landmark::COUNT],
}

impl PoseSnapshot {
    pub fn new(positions: [Vec3; Landmark::COUNT]) -> Self {
        Self { positions }
    }

    pub fn get(&self, landmark: Landmark) -> Vec3 {
        self.positions[landmark.index()]
    }

    /// Unit vector from `from` to `to`; zero when the two coincide.
    pub fn direction(&self, from: Landmark, to: Landmark) -> Vec3 {
        (self.get(to) - self.get(from))
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vec3::zeros)
    }

    pub fn distance(&self, from: Landmark, to: Landmark) -> f32 {
        (self.get(from) - self.get(to)).norm()
    }

    pub fn midpoint(&self, a: Landmark, b: Landmark) -> Vec3 {
        (self.get(a) + self.get(b)) / 2.0
    }

    /// Between the shoulders; the producer has no neck landmark.
    pub fn virtual_neck(&self) -> Vec3 {
        self.midpoint(RightShoulder, LeftShoulder)
    }

    /// Between the hips.
    pub fn virtual_hip(&self) -> Vec3 {
        self.midpoint(RightHip, LeftHip)
    }
}

impl Default for PoseSnapshot {
    fn default() -> Self {
        Self::new([Vec3::zeros(); Landmark::COUNT])
    }
}
