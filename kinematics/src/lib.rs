#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! Mapping between logical Cartesian space and machine actuator space.
//!
//! Every supported geometry implements [`KinematicModel`]. [`Kinematics`] is
//! the closed set of geometries a machine can be configured with; it is
//! chosen once from configuration and dispatches to the per-variant
//! formulas.

mod delta;
mod polargraph;
mod scara;
mod tpara;

pub use delta::{Delta, DeltaGeometry};
pub use polargraph::Polargraph;
pub use scara::Scara;
pub use tpara::Tpara;

use core::ops::{Add, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Xyz {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Xyz {
    pub const ZERO: Xyz = Xyz::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Xyz) -> f32 {
        let d = *other - *self;
        libm::sqrtf(d.x * d.x + d.y * d.y + d.z * d.z)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub const fn from_array(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl Add for Xyz {
    type Output = Xyz;

    fn add(self, rhs: Xyz) -> Xyz {
        Xyz::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Xyz {
    type Output = Xyz;

    fn sub(self, rhs: Xyz) -> Xyz {
        Xyz::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Xyz {
    type Output = Xyz;

    fn mul(self, rhs: f32) -> Xyz {
        Xyz::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KinematicsError {
    /// The point lies outside the reachable envelope of the machine.
    Unreachable,
    /// The geometry has no unique solution at this point (singularity).
    Degenerate,
}

impl core::fmt::Display for KinematicsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KinematicsError::Unreachable => f.write_str("position is outside the machine envelope"),
            KinematicsError::Degenerate => f.write_str("position is a kinematic singularity"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KinematicsError {}

/// Bidirectional mapping between logical and actuator coordinates.
///
/// Actuator coordinates are carriage heights (delta), joint angles in
/// degrees (SCARA variants) or belt lengths (polargraph).
pub trait KinematicModel {
    fn inverse(&self, cartesian: Xyz) -> Result<Xyz, KinematicsError>;
    fn forward(&self, actuators: Xyz) -> Result<Xyz, KinematicsError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Kinematics {
    #[default]
    Cartesian,
    Delta(Delta),
    MorganScara(Scara),
    MpScara(Scara),
    AxelTpara(Tpara),
    Polargraph(Polargraph),
}

impl Kinematics {
    /// Cartesian machines move the actuators along straight lines already,
    /// every other geometry needs straight moves split into short segments.
    pub fn is_cartesian(&self) -> bool {
        matches!(self, Kinematics::Cartesian)
    }
}

impl KinematicModel for Kinematics {
    fn inverse(&self, cartesian: Xyz) -> Result<Xyz, KinematicsError> {
        if !cartesian.is_finite() {
            return Err(KinematicsError::Degenerate);
        }
        let actuators = match self {
            Kinematics::Cartesian => Ok(cartesian),
            Kinematics::Delta(d) => d.inverse(cartesian),
            Kinematics::MorganScara(s) => s.inverse_morgan(cartesian),
            Kinematics::MpScara(s) => s.inverse_mp(cartesian),
            Kinematics::AxelTpara(t) => t.inverse(cartesian),
            Kinematics::Polargraph(p) => p.inverse(cartesian),
        }?;
        finite(actuators)
    }

    fn forward(&self, actuators: Xyz) -> Result<Xyz, KinematicsError> {
        if !actuators.is_finite() {
            return Err(KinematicsError::Degenerate);
        }
        let cartesian = match self {
            Kinematics::Cartesian => Ok(actuators),
            Kinematics::Delta(d) => d.forward(actuators),
            Kinematics::MorganScara(s) | Kinematics::MpScara(s) => Ok(s.forward(actuators)),
            Kinematics::AxelTpara(t) => t.forward(actuators),
            Kinematics::Polargraph(p) => p.forward(actuators),
        }?;
        finite(cartesian)
    }
}

// sqrt/acos of an out-of-range argument surfaces as NaN
fn finite(p: Xyz) -> Result<Xyz, KinematicsError> {
    if p.is_finite() {
        Ok(p)
    } else {
        Err(KinematicsError::Unreachable)
    }
}

pub(crate) fn radians(deg: f32) -> f32 {
    deg * (core::f32::consts::PI / 180.0)
}

pub(crate) fn degrees(rad: f32) -> f32 {
    rad * (180.0 / core::f32::consts::PI)
}
