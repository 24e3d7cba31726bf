use crate::{degrees, radians, KinematicsError, Xyz};
use libm::{acosf, atan2f, cosf, sinf, sqrtf};

/// Two-link planar arm. `arm1` is the shoulder-to-elbow length, `arm2`
/// the elbow-to-effector length, `offset` the shoulder position in
/// machine coordinates. Joint angles are reported in degrees, both
/// measured from the X axis; Z passes through unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Scara {
    pub arm1: f32,
    pub arm2: f32,
    pub offset: [f32; 2],
}

impl Scara {
    pub const fn new(arm1: f32, arm2: f32, offset: [f32; 2]) -> Self {
        Self { arm1, arm2, offset }
    }

    fn shoulder_relative(&self, p: Xyz) -> (f32, f32) {
        (p.x - self.offset[0], p.y - self.offset[1])
    }

    /// Morgan SCARA: the elbow angle comes from the law of cosines, the
    /// shoulder angle from the effector bearing taken off the Y axis.
    pub fn inverse_morgan(&self, p: Xyz) -> Result<Xyz, KinematicsError> {
        let (x, y) = self.shoulder_relative(p);
        let (l1, l2) = (self.arm1, self.arm2);
        let h2 = x * x + y * y;

        let c2 = if l1 == l2 {
            h2 / (2.0 * l1 * l1) - 1.0
        } else {
            (h2 - (l1 * l1 + l2 * l2)) / (2.0 * l1 * l2)
        };
        if !(-1.0..=1.0).contains(&c2) {
            return Err(KinematicsError::Unreachable);
        }

        let s2 = sqrtf(1.0 - c2 * c2);
        let sk1 = l1 + l2 * c2;
        let sk2 = l2 * s2;

        let theta = atan2f(sk1, sk2) - atan2f(x, y);
        let psi = atan2f(s2, c2);

        Ok(Xyz::new(degrees(theta), degrees(theta + psi), p.z))
    }

    /// MP SCARA: both joints from the triangle formed by the two arms and
    /// the shoulder-to-effector chord.
    pub fn inverse_mp(&self, p: Xyz) -> Result<Xyz, KinematicsError> {
        let (x, y) = self.shoulder_relative(p);
        let (l1, l2) = (self.arm1, self.arm2);
        let c = sqrtf(x * x + y * y);
        if c == 0.0 {
            return Err(KinematicsError::Degenerate);
        }

        let cos1 = (c * c + l1 * l1 - l2 * l2) / (2.0 * c * l1);
        let cos2 = (c * c + l2 * l2 - l1 * l1) / (2.0 * c * l2);
        if !(-1.0..=1.0).contains(&cos1) || !(-1.0..=1.0).contains(&cos2) {
            return Err(KinematicsError::Unreachable);
        }

        let theta3 = atan2f(y, x);
        let theta1 = theta3 + acosf(cos1);
        let theta2 = theta3 - acosf(cos2);

        Ok(Xyz::new(degrees(theta1), degrees(theta2), p.z))
    }

    pub fn forward(&self, joints: Xyz) -> Xyz {
        let (a, b) = (radians(joints.x), radians(joints.y));
        Xyz::new(
            cosf(a) * self.arm1 + cosf(b) * self.arm2 + self.offset[0],
            sinf(a) * self.arm1 + sinf(b) * self.arm2 + self.offset[1],
            joints.z,
        )
    }
}
