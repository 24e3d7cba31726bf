use crate::{
    axis::{AxisArray, AxisMask},
    STEPPER_TIMER_RATE,
};
use core::ops::BitOr;
use libm::{ceilf, floorf, sqrtf};

/// Slowest step rate a profile may ask for; keeps the timer interval in range.
pub const MINIMAL_STEP_RATE: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockFlags(u8);

impl BlockFlags {
    pub const NONE: BlockFlags = BlockFlags(0);
    /// No motion: the stepper loads `position` into its counters.
    pub const SYNC_POSITION: BlockFlags = BlockFlags(1 << 0);
    /// Not the first segment of a segmented move.
    pub const CONTINUED: BlockFlags = BlockFlags(1 << 1);

    pub const fn contains(self, other: BlockFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BlockFlags {
    type Output = BlockFlags;

    fn bitor(self, rhs: BlockFlags) -> BlockFlags {
        BlockFlags(self.0 | rhs.0)
    }
}

/// Extruder lead for blocks that use linear advance.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Advance {
    /// Lead steps per mm/s of path speed.
    pub comp: f32,
    /// Timer ticks between two lead steps.
    pub interval: u32,
}

/// One straight move in step space. Immutable once queued; the speed
/// profile that goes with it lives next to it as a [`Profile`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Block {
    pub steps: AxisArray<u32>,
    /// Set bits move toward the negative end.
    pub direction: AxisMask,
    pub step_event_count: u32,
    pub nominal_rate: u32,
    pub nominal_speed: f32,
    pub millimeters: f32,
    pub acceleration: f32,
    pub acceleration_steps_per_s2: u32,
    pub flags: BlockFlags,
    pub extruder: u8,
    pub advance: Option<Advance>,
    /// Absolute step position at the end of the block.
    pub position: AxisArray<i32>,
}

impl Block {
    pub fn sync(position: AxisArray<i32>) -> Self {
        Self {
            flags: BlockFlags::SYNC_POSITION,
            position,
            ..Default::default()
        }
    }

    pub fn is_sync(&self) -> bool {
        self.flags.contains(BlockFlags::SYNC_POSITION)
    }

    pub fn is_continued(&self) -> bool {
        self.flags.contains(BlockFlags::CONTINUED)
    }

    /// Path speed in units/s at the given step rate.
    pub fn speed_at(&self, rate: u32) -> f32 {
        if self.nominal_rate == 0 {
            return 0.0;
        }
        rate as f32 * self.nominal_speed / self.nominal_rate as f32
    }
}

/// Step-rate profile of a block, derived from its entry and exit speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Profile {
    pub initial_rate: u32,
    pub cruise_rate: u32,
    pub final_rate: u32,
    pub accelerate_until: u32,
    pub decelerate_after: u32,
    /// Ramp durations in timer ticks, used by S-curve stepping.
    pub acceleration_time: u32,
    pub deceleration_time: u32,
    pub max_adv_steps: u32,
    pub final_adv_steps: u32,
}

impl Profile {
    pub fn plan(block: &Block, entry_speed: f32, exit_speed: f32) -> Self {
        if block.step_event_count == 0 || block.nominal_speed <= 0.0 {
            return Profile::default();
        }
        let nominal = block.nominal_rate as f32;
        let rate = |speed: f32| {
            (ceilf(nominal * (speed / block.nominal_speed)) as u32).max(MINIMAL_STEP_RATE)
        };
        let initial_rate = rate(entry_speed);
        let final_rate = rate(exit_speed);

        let count = block.step_event_count as i64;
        let accel = block.acceleration_steps_per_s2.max(1) as f32;

        let mut accelerate_steps =
            ceilf(estimate_acceleration_distance(initial_rate as f32, nominal, accel)) as i64;
        let decelerate_steps =
            (floorf(estimate_acceleration_distance(nominal, final_rate as f32, -accel)) as i64)
                .max(0);
        let mut plateau_steps = count - accelerate_steps.max(0) - decelerate_steps;

        let cruise_rate = if plateau_steps < 0 {
            let d = ceilf(intersection_distance(
                initial_rate as f32,
                final_rate as f32,
                accel,
                count as f32,
            ));
            accelerate_steps = (d.max(0.0) as i64).min(count);
            plateau_steps = 0;
            let reached = sqrtf(
                initial_rate as f32 * initial_rate as f32 + 2.0 * accel * accelerate_steps as f32,
            );
            (reached as u32).min(block.nominal_rate).max(initial_rate)
        } else {
            accelerate_steps = accelerate_steps.max(0);
            block.nominal_rate
        };

        let ticks = |delta: u32| (delta as f32 / accel * STEPPER_TIMER_RATE as f32) as u32;

        let (max_adv_steps, final_adv_steps) = match block.advance {
            Some(adv) => (
                (block.nominal_speed * adv.comp) as u32,
                (exit_speed * adv.comp) as u32,
            ),
            None => (0, 0),
        };

        Profile {
            initial_rate,
            cruise_rate,
            final_rate,
            accelerate_until: accelerate_steps as u32,
            decelerate_after: (accelerate_steps + plateau_steps) as u32,
            acceleration_time: ticks(cruise_rate.saturating_sub(initial_rate)),
            deceleration_time: ticks(cruise_rate.saturating_sub(final_rate)),
            max_adv_steps,
            final_adv_steps,
        }
    }

    /// The profile a block is queued with before the planner has seen its
    /// neighbours: start and end at the minimum planner speed.
    pub(crate) fn safe(block: &Block, speed: f32) -> Self {
        Self::plan(block, speed, speed)
    }
}

/// Steps needed to go from `initial` to `target` rate at `accel` steps/s².
pub(crate) fn estimate_acceleration_distance(initial: f32, target: f32, accel: f32) -> f32 {
    if accel == 0.0 {
        return 0.0;
    }
    (target * target - initial * initial) / (2.0 * accel)
}

/// Step at which accelerating from `initial` and decelerating to `final_`
/// meet within `distance` steps.
pub(crate) fn intersection_distance(initial: f32, final_: f32, accel: f32, distance: f32) -> f32 {
    if accel == 0.0 {
        return 0.0;
    }
    (2.0 * accel * distance - initial * initial + final_ * final_) / (4.0 * accel)
}

/// Highest speed that can still slow to `target` over `distance` with a
/// (negative) `accel`.
pub(crate) fn max_allowable_speed(accel: f32, target: f32, distance: f32) -> f32 {
    sqrtf(target * target - 2.0 * accel * distance)
}
