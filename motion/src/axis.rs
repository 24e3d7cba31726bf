use core::ops::{Index, IndexMut};
use kinematics::Xyz;

pub const LINEAR_AXES: usize = 3;
pub const NUM_AXES: usize = LINEAR_AXES + 1;
pub const MAX_EXTRUDERS: usize = 4;

/// Planner axes. The linear axes are actuator axes after kinematics, `E`
/// is the active extruder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    X,
    Y,
    Z,
    E,
}

impl Axis {
    pub const ALL: [Axis; NUM_AXES] = [Axis::X, Axis::Y, Axis::Z, Axis::E];
    pub const LINEAR: [Axis; LINEAR_AXES] = [Axis::X, Axis::Y, Axis::Z];

    pub const fn index(self) -> usize {
        self as usize
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

pub type AxisArray<T> = [T; NUM_AXES];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AxisMask(u8);

impl AxisMask {
    pub const NONE: AxisMask = AxisMask(0);

    pub const fn contains(self, axis: Axis) -> bool {
        self.0 & axis.bit() != 0
    }

    pub fn insert(&mut self, axis: Axis) {
        self.0 |= axis.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// A logical position in millimetres: X, Y, Z and the extruder.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub e: f32,
}

impl Position {
    pub const ORIGIN: Position = Position::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32, e: f32) -> Self {
        Self { x, y, z, e }
    }

    pub const fn xyz(&self) -> Xyz {
        Xyz::new(self.x, self.y, self.z)
    }

    pub const fn with_xyz(xyz: Xyz, e: f32) -> Self {
        Self::new(xyz.x, xyz.y, xyz.z, e)
    }

    pub const fn to_array(self) -> AxisArray<f32> {
        [self.x, self.y, self.z, self.e]
    }

    pub const fn from_array(v: AxisArray<f32>) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    pub fn is_finite(&self) -> bool {
        self.xyz().is_finite() && self.e.is_finite()
    }
}

impl Index<Axis> for Position {
    type Output = f32;

    fn index(&self, axis: Axis) -> &f32 {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::E => &self.e,
        }
    }
}

impl IndexMut<Axis> for Position {
    fn index_mut(&mut self, axis: Axis) -> &mut f32 {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::E => &mut self.e,
        }
    }
}
