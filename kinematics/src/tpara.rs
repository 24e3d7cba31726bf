use crate::{degrees, radians, KinematicsError, Xyz};
use libm::{atan2f, cosf, sinf, sqrtf};

/// Three-joint articulated arm: body rotation, shoulder elevation and
/// elbow elevation, all in degrees. The shoulder and elbow angles are
/// measured from the horizontal in the arm plane.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tpara {
    pub arm1: f32,
    pub arm2: f32,
    pub offset: Xyz,
}

impl Tpara {
    pub const fn new(arm1: f32, arm2: f32, offset: Xyz) -> Self {
        Self { arm1, arm2, offset }
    }

    pub fn inverse(&self, p: Xyz) -> Result<Xyz, KinematicsError> {
        let s = p - self.offset;
        let (l1, l2) = (self.arm1, self.arm2);

        let rxy = sqrtf(s.x * s.x + s.y * s.y);
        let rho2 = s.x * s.x + s.y * s.y + s.z * s.z;

        let cg = (l1 * l1 + l2 * l2 - rho2) / (2.0 * l1 * l2);
        if !(-1.0..=1.0).contains(&cg) {
            return Err(KinematicsError::Unreachable);
        }
        let sg = sqrtf(1.0 - cg * cg);
        let k1 = l1 - l2 * cg;
        let k2 = l2 * sg;

        let theta = atan2f(s.y, s.x);
        let gamma = atan2f(sg, cg);
        let phi = atan2f(s.z, rxy) + atan2f(k2, k1);
        let psi = phi + gamma;

        Ok(Xyz::new(degrees(theta), degrees(phi), degrees(psi)))
    }

    /// Only the solution above the shoulder is recovered, the Z term is the
    /// positive root.
    pub fn forward(&self, joints: Xyz) -> Result<Xyz, KinematicsError> {
        let (a, b, c) = (joints.x, joints.y, joints.z);
        let (l1, l2) = (self.arm1, self.arm2);

        let w = c - b;
        let r = l1 * cosf(radians(b)) + l2 * sinf(radians(w - (90.0 - b)));
        let x = r * cosf(radians(a));
        let y = r * sinf(radians(a));
        let rho2 = l1 * l1 + l2 * l2 - 2.0 * l1 * l2 * cosf(radians(w));

        let z2 = rho2 - x * x - y * y;
        if z2 < 0.0 {
            return Err(KinematicsError::Unreachable);
        }
        Ok(self.offset + Xyz::new(x, y, sqrtf(z2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_close;

    #[test]
    fn round_trip_with_offset() {
        let arm = Tpara::new(120.0, 100.0, Xyz::new(5.0, -5.0, 40.0));
        for p in [
            Xyz::new(80.0, 20.0, 60.0),
            Xyz::new(-30.0, 90.0, 100.0),
            Xyz::new(10.0, -120.0, 45.0),
        ] {
            let j = arm.inverse(p).unwrap();
            assert_close(arm.forward(j).unwrap(), p, 1e-3);
        }
    }

    #[test]
    fn beyond_both_arms_is_unreachable() {
        let arm = Tpara::new(120.0, 100.0, Xyz::ZERO);
        assert_eq!(
            arm.inverse(Xyz::new(200.0, 100.0, 50.0)),
            Err(KinematicsError::Unreachable)
        );
    }
}
