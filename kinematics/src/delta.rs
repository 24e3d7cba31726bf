use crate::{radians, KinematicsError, Xyz};
use libm::{cosf, sinf, sqrtf};

const TOWER_ANGLES: [f32; 3] = [210.0, 330.0, 90.0];

/// Calibrated geometry of a linear delta as entered by the user.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeltaGeometry {
    pub diagonal_rod: f32,
    pub radius: f32,
    pub tower_angle_trim: [f32; 3],
    pub radius_trim: [f32; 3],
    pub diagonal_rod_trim: [f32; 3],
}

impl Default for DeltaGeometry {
    fn default() -> Self {
        Self {
            diagonal_rod: 250.0,
            radius: 124.0,
            tower_angle_trim: [0.0; 3],
            radius_trim: [0.0; 3],
            diagonal_rod_trim: [0.0; 3],
        }
    }
}

/// Tower positions and squared rod lengths precomputed from a
/// [`DeltaGeometry`]. Actuator coordinates are carriage heights of towers
/// A, B and C.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Delta {
    geometry: DeltaGeometry,
    towers: [[f32; 2]; 3],
    rod_sq: [f32; 3],
}

impl Delta {
    pub fn new(geometry: &DeltaGeometry) -> Self {
        let mut towers = [[0.0; 2]; 3];
        let mut rod_sq = [0.0; 3];
        for t in 0..3 {
            let angle = radians(TOWER_ANGLES[t] + geometry.tower_angle_trim[t]);
            let r = geometry.radius + geometry.radius_trim[t];
            towers[t] = [cosf(angle) * r, sinf(angle) * r];
            let rod = geometry.diagonal_rod + geometry.diagonal_rod_trim[t];
            rod_sq[t] = rod * rod;
        }
        Self {
            geometry: *geometry,
            towers,
            rod_sq,
        }
    }

    pub fn geometry(&self) -> &DeltaGeometry {
        &self.geometry
    }

    fn carriage_height(&self, p: Xyz, t: usize) -> Result<f32, KinematicsError> {
        let dx = self.towers[t][0] - p.x;
        let dy = self.towers[t][1] - p.y;
        let h2 = self.rod_sq[t] - (dx * dx + dy * dy);
        if h2 < 0.0 {
            return Err(KinematicsError::Unreachable);
        }
        Ok(p.z + sqrtf(h2))
    }

    pub fn inverse(&self, p: Xyz) -> Result<Xyz, KinematicsError> {
        Ok(Xyz::new(
            self.carriage_height(p, 0)?,
            self.carriage_height(p, 1)?,
            self.carriage_height(p, 2)?,
        ))
    }

    /// Trilateration of the effector from the three carriage heights.
    pub fn forward(&self, carriages: Xyz) -> Result<Xyz, KinematicsError> {
        let [a, b, c] = self.towers;
        let (z1, z2, z3) = (carriages.x, carriages.y, carriages.z);

        // unit vector along the new x axis, tower A to tower B
        let p12 = [b[0] - a[0], b[1] - a[1], z2 - z1];
        let d2 = dot(p12, p12);
        if d2 <= 0.0 {
            return Err(KinematicsError::Degenerate);
        }
        let inv_d = 1.0 / sqrtf(d2);
        let ex = scale(p12, inv_d);

        let p13 = [c[0] - a[0], c[1] - a[1], z3 - z1];
        let i = dot(ex, p13);

        let ey = [p13[0] - ex[0] * i, p13[1] - ex[1] * i, p13[2] - ex[2] * i];
        let j2 = dot(ey, ey);
        if j2 <= 0.0 {
            return Err(KinematicsError::Degenerate);
        }
        let inv_j = 1.0 / sqrtf(j2);
        let ey = scale(ey, inv_j);

        let ez = [
            ex[1] * ey[2] - ex[2] * ey[1],
            ex[2] * ey[0] - ex[0] * ey[2],
            ex[0] * ey[1] - ex[1] * ey[0],
        ];

        let x_new = (self.rod_sq[0] - self.rod_sq[1] + d2) * inv_d * 0.5;
        let y_new = ((self.rod_sq[0] - self.rod_sq[2] + i * i + j2) * 0.5 - i * x_new) * inv_j;
        let z2_new = self.rod_sq[0] - (x_new * x_new + y_new * y_new);
        if z2_new < 0.0 {
            return Err(KinematicsError::Unreachable);
        }
        let z_new = sqrtf(z2_new);

        Ok(Xyz::new(
            a[0] + ex[0] * x_new + ey[0] * y_new - ez[0] * z_new,
            a[1] + ex[1] * x_new + ey[1] * y_new - ez[1] * z_new,
            z1 + ex[2] * x_new + ey[2] * y_new - ez[2] * z_new,
        ))
    }
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn scale(a: [f32; 3], s: f32) -> [f32; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}
