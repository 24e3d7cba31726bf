#![cfg_attr(not(test), no_std)]

//! Motion planning and step generation.
//!
//! The foreground side ([`Planner`]) turns logical moves into [`Block`]s and
//! keeps their velocity profiles consistent. The interrupt side
//! ([`Stepper`]) walks the oldest block and emits step pulses through a
//! [`StepperHal`]. Both halves meet in a [`MotionShared`] ring, which is
//! split once into a producer and a consumer end.

#[macro_use]
mod fmt;

mod axis;
mod block;
mod config;
mod error;
mod hal;
mod junction;
mod planner;
pub mod queue;
pub mod segment;
mod shared;
pub mod stepper;

pub use axis::{Axis, AxisArray, AxisMask, Position, LINEAR_AXES, MAX_EXTRUDERS, NUM_AXES};
pub use block::{Block, BlockFlags, Profile, MINIMAL_STEP_RATE};
pub use config::{
    AdvanceConfig, ArcConfig, Cornering, MachineConfig, Settings, ShaperConfig, SoftEndstops,
    SpeedProfile, BLOCK_BUFFER_SIZE, MINIMUM_PLANNER_SPEED,
};
pub use error::{ConfigError, MotionError};
pub use queue::{Ack, CommandQueue, QueueError};
pub use hal::StepperHal;
pub use planner::{Background, PlannedBlock, Planner, PositionSource};
pub use shared::{Consumer, MotionEvent, MotionShared, Producer};
pub use stepper::{Phase, Stepper};

pub use kinematics::{KinematicModel, Kinematics, KinematicsError, Xyz};

/// Tick rate of the step timer.
pub const STEPPER_TIMER_RATE: u32 = 2_000_000;

pub type Duration = fugit::TimerDurationU32<STEPPER_TIMER_RATE>;
