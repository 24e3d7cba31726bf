use crate::{
    axis::{Axis, AxisArray, MAX_EXTRUDERS},
    error::ConfigError,
};
use kinematics::{Kinematics, Xyz};

/// Planner ring capacity. Must be a power of two.
pub const BLOCK_BUFFER_SIZE: usize = 16;

/// Speed (mm/s) every planned chain of blocks is allowed to come to rest at.
pub const MINIMUM_PLANNER_SPEED: f32 = 0.05;

/// Cornering policy, resolved from [`MachineConfig`]. Exactly one is active.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cornering {
    /// Per-axis instantaneous speed change (mm/s) allowed at a junction.
    Jerk(AxisArray<f32>),
    /// Junction deviation distance in mm.
    JunctionDeviation(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpeedProfile {
    #[default]
    Trapezoid,
    /// Jerk-limited ramps: the same ramp durations, shaped by a quintic.
    SCurve,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArcConfig {
    pub min_segment_mm: f32,
    pub max_segment_mm: f32,
    pub min_circle_segments: u16,
    /// When set, the segment length follows the feedrate, clamped to the
    /// min/max segment lengths.
    pub segments_per_second: Option<f32>,
    /// Every this many segments the rotation is recomputed with exact trig.
    pub correction_interval: u16,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            min_segment_mm: 0.1,
            max_segment_mm: 1.0,
            min_circle_segments: 24,
            segments_per_second: None,
            correction_interval: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvanceConfig {
    /// Advance factor in mm of filament per mm/s of extrusion speed.
    pub k: f32,
    /// Largest extruder speed change (mm/s) the advance steps may cause.
    pub max_e_jerk: f32,
}

impl Default for AdvanceConfig {
    fn default() -> Self {
        Self {
            k: 0.22,
            max_e_jerk: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShaperConfig {
    pub frequency: f32,
    pub zeta: f32,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        Self {
            frequency: 40.0,
            zeta: 0.15,
        }
    }
}

/// Native-space travel limits, checked before a move is buffered.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SoftEndstops {
    pub min: Xyz,
    pub max: Xyz,
}

/// Machine description as loaded from storage or compiled defaults.
///
/// Speeds are in units/s, accelerations in units/s², where the unit is
/// the actuator unit of the axis (mm, or degrees on arm machines).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MachineConfig {
    pub kinematics: Kinematics,
    pub steps_per_unit: AxisArray<f32>,
    pub max_feedrate: AxisArray<f32>,
    pub max_acceleration: AxisArray<f32>,
    pub acceleration: f32,
    pub retract_acceleration: f32,
    pub travel_acceleration: f32,
    pub min_feedrate: f32,
    pub min_travel_feedrate: f32,
    pub min_segment_time_us: u32,
    pub jerk: Option<AxisArray<f32>>,
    pub junction_deviation_mm: Option<f32>,
    pub min_steps_per_segment: u32,
    pub extruders: u8,
    pub soft_endstops: Option<SoftEndstops>,
    pub home_offset: Xyz,
    pub workspace_offset: Xyz,
    /// Straight-line segmentation rate on non-Cartesian machines.
    pub segments_per_second: f32,
    pub arc: ArcConfig,
    pub speed_profile: SpeedProfile,
    pub advance: Option<AdvanceConfig>,
    pub shaping_x: Option<ShaperConfig>,
    pub shaping_y: Option<ShaperConfig>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kinematics: Kinematics::Cartesian,
            steps_per_unit: [80.0, 80.0, 4000.0, 500.0],
            max_feedrate: [300.0, 300.0, 5.0, 25.0],
            max_acceleration: [3000.0, 3000.0, 100.0, 10000.0],
            acceleration: 3000.0,
            retract_acceleration: 3000.0,
            travel_acceleration: 3000.0,
            min_feedrate: 0.0,
            min_travel_feedrate: 0.0,
            min_segment_time_us: 20_000,
            jerk: Some([10.0, 10.0, 0.3, 5.0]),
            junction_deviation_mm: None,
            min_steps_per_segment: 6,
            extruders: 1,
            soft_endstops: None,
            home_offset: Xyz::ZERO,
            workspace_offset: Xyz::ZERO,
            segments_per_second: 200.0,
            arc: ArcConfig::default(),
            speed_profile: SpeedProfile::Trapezoid,
            advance: None,
            shaping_x: None,
            shaping_y: None,
        }
    }
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f32) -> bool {
    v.is_finite() && v >= 0.0
}

impl MachineConfig {
    /// Check the configuration once and derive the per-step values the
    /// planner needs. Any error here is fatal: the machine must not move.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let cornering = match (self.jerk, self.junction_deviation_mm) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingCornering),
            (None, None) => return Err(ConfigError::MissingCornering),
            (Some(jerk), None) => {
                if let Some(axis) = Axis::ALL.into_iter().find(|a| !non_negative(jerk[a.index()])) {
                    return Err(ConfigError::InvalidAxisParameter(axis));
                }
                Cornering::Jerk(jerk)
            }
            (None, Some(deviation)) => {
                if !positive(deviation) {
                    return Err(ConfigError::InvalidJunctionDeviation);
                }
                Cornering::JunctionDeviation(deviation)
            }
        };

        for axis in Axis::ALL {
            let i = axis.index();
            if !positive(self.steps_per_unit[i])
                || !positive(self.max_feedrate[i])
                || !positive(self.max_acceleration[i])
            {
                return Err(ConfigError::InvalidAxisParameter(axis));
            }
        }

        if ![
            self.acceleration,
            self.retract_acceleration,
            self.travel_acceleration,
        ]
        .into_iter()
        .all(positive)
        {
            return Err(ConfigError::InvalidAcceleration);
        }

        if !non_negative(self.min_feedrate) || !non_negative(self.min_travel_feedrate) {
            return Err(ConfigError::InvalidMinimumFeedrate);
        }

        if self.extruders == 0 || self.extruders as usize > MAX_EXTRUDERS {
            return Err(ConfigError::InvalidExtruderCount(self.extruders));
        }

        if !positive(self.segments_per_second) {
            return Err(ConfigError::InvalidSegmentation);
        }

        let arc = &self.arc;
        if !positive(arc.min_segment_mm)
            || !(arc.max_segment_mm >= arc.min_segment_mm && arc.max_segment_mm.is_finite())
            || arc.min_circle_segments == 0
            || arc.correction_interval == 0
            || arc.segments_per_second.is_some_and(|sps| !positive(sps))
        {
            return Err(ConfigError::InvalidArcLimits);
        }

        if let Some(advance) = self.advance {
            if !non_negative(advance.k) || !positive(advance.max_e_jerk) {
                return Err(ConfigError::InvalidAdvance);
            }
        }

        for (axis, shaper) in [(Axis::X, self.shaping_x), (Axis::Y, self.shaping_y)] {
            if let Some(shaper) = shaper {
                if !positive(shaper.frequency) || !(0.0..1.0).contains(&shaper.zeta) {
                    return Err(ConfigError::InvalidShaper(axis));
                }
            }
        }

        if let Some(limits) = self.soft_endstops {
            let (min, max) = (limits.min.to_array(), limits.max.to_array());
            if let Some(axis) = Axis::LINEAR
                .into_iter()
                .find(|a| !(min[a.index()] <= max[a.index()]))
            {
                return Err(ConfigError::InvalidSoftEndstops(axis));
            }
        }

        let mm_per_step = core::array::from_fn(|i| 1.0 / self.steps_per_unit[i]);
        let max_acceleration_steps =
            core::array::from_fn(|i| (self.max_acceleration[i] * self.steps_per_unit[i]) as u32);

        debug!("configuration accepted, cornering {:?}", cornering);

        Ok(Settings {
            config: *self,
            cornering,
            mm_per_step,
            max_acceleration_steps,
        })
    }
}

/// A validated [`MachineConfig`] plus the values derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    config: MachineConfig,
    cornering: Cornering,
    mm_per_step: AxisArray<f32>,
    max_acceleration_steps: AxisArray<u32>,
}

impl Settings {
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn cornering(&self) -> Cornering {
        self.cornering
    }

    pub fn mm_per_step(&self) -> &AxisArray<f32> {
        &self.mm_per_step
    }

    pub fn max_acceleration_steps(&self) -> &AxisArray<u32> {
        &self.max_acceleration_steps
    }
}
