use crate::{KinematicsError, Xyz};
use libm::{hypotf, sqrtf};

/// Hanging-plotter geometry: two belts anchored at the top corners of the
/// drawing area. Actuator coordinates are the left and right belt lengths.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Polargraph {
    pub min: [f32; 2],
    pub max: [f32; 2],
    pub max_belt_length: Option<f32>,
}

impl Polargraph {
    pub const fn new(min: [f32; 2], max: [f32; 2], max_belt_length: Option<f32>) -> Self {
        Self {
            min,
            max,
            max_belt_length,
        }
    }

    pub fn inverse(&self, p: Xyz) -> Result<Xyz, KinematicsError> {
        let x1 = p.x - self.min[0];
        let x2 = self.max[0] - p.x;
        let y = p.y - self.max[1];
        let belts = Xyz::new(hypotf(x1, y), hypotf(x2, y), p.z);
        if let Some(max) = self.max_belt_length {
            if belts.x > max || belts.y > max {
                return Err(KinematicsError::Unreachable);
            }
        }
        Ok(belts)
    }

    pub fn forward(&self, belts: Xyz) -> Result<Xyz, KinematicsError> {
        let width = self.max[0] - self.min[0];
        if width <= 0.0 {
            return Err(KinematicsError::Degenerate);
        }
        let (a, b) = (belts.x, belts.y);
        let x1 = (a * a - b * b + width * width) / (2.0 * width);
        let h2 = a * a - x1 * x1;
        if h2 < 0.0 {
            return Err(KinematicsError::Unreachable);
        }
        Ok(Xyz::new(x1 + self.min[0], self.max[1] - sqrtf(h2), belts.z))
    }
}
