use crate::axis::Axis;
use core::fmt;
use kinematics::KinematicsError;

/// Refusals from [`MachineConfig::validate`](crate::MachineConfig::validate).
/// The planner is never built from a configuration that produced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    ConflictingCornering,
    MissingCornering,
    InvalidJunctionDeviation,
    InvalidAxisParameter(Axis),
    InvalidAcceleration,
    InvalidMinimumFeedrate,
    InvalidExtruderCount(u8),
    InvalidSegmentation,
    InvalidArcLimits,
    InvalidAdvance,
    InvalidShaper(Axis),
    InvalidSoftEndstops(Axis),
    /// Speed profile and input shaping are fixed once the stepper runs.
    StepperSettingsFixed,
    /// The current position cannot be expressed in the new geometry.
    Kinematics(KinematicsError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ConflictingCornering => {
                f.write_str("both jerk and junction deviation are configured")
            }
            ConfigError::MissingCornering => {
                f.write_str("neither jerk nor junction deviation is configured")
            }
            ConfigError::InvalidJunctionDeviation => {
                f.write_str("junction deviation must be positive")
            }
            ConfigError::InvalidAxisParameter(axis) => {
                write!(f, "invalid steps, feedrate, acceleration or jerk on axis {:?}", axis)
            }
            ConfigError::InvalidAcceleration => f.write_str("accelerations must be positive"),
            ConfigError::InvalidMinimumFeedrate => {
                f.write_str("minimum feedrates must not be negative")
            }
            ConfigError::InvalidExtruderCount(n) => write!(f, "unsupported extruder count {}", n),
            ConfigError::InvalidSegmentation => {
                f.write_str("segments per second must be positive")
            }
            ConfigError::InvalidArcLimits => f.write_str("invalid arc segment limits"),
            ConfigError::InvalidAdvance => f.write_str("invalid linear advance parameters"),
            ConfigError::InvalidShaper(axis) => {
                write!(f, "invalid input shaper on axis {:?}", axis)
            }
            ConfigError::InvalidSoftEndstops(axis) => {
                write!(f, "soft endstop minimum above maximum on axis {:?}", axis)
            }
            ConfigError::StepperSettingsFixed => {
                f.write_str("speed profile and input shaping cannot change while running")
            }
            ConfigError::Kinematics(e) => write!(f, "current position: {}", e),
        }
    }
}

/// Recoverable refusals of a single move. Nothing was buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionError {
    Kinematics(KinematicsError),
    OutsideSoftLimits { axis: Axis },
    InvalidFeedrate,
    InvalidExtruder(u8),
    InvalidArc,
}

impl From<KinematicsError> for MotionError {
    fn from(e: KinematicsError) -> Self {
        MotionError::Kinematics(e)
    }
}

impl fmt::Display for MotionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionError::Kinematics(e) => e.fmt(f),
            MotionError::OutsideSoftLimits { axis } => {
                write!(f, "move leaves the soft endstops on axis {:?}", axis)
            }
            MotionError::InvalidFeedrate => f.write_str("feedrate must be a positive number"),
            MotionError::InvalidExtruder(e) => write!(f, "no extruder {}", e),
            MotionError::InvalidArc => f.write_str("arc radius or centre is invalid"),
        }
    }
}
