use crate::{
    axis::{Axis, AxisArray},
    Duration,
};

/// Pins and timer the step interrupt drives. Implemented by the board
/// support code; every call happens from the step interrupt.
pub trait StepperHal {
    /// Step pin of `axis`. For [`Axis::E`] this is the driver of the
    /// extruder last passed to [`select_extruder`](Self::select_extruder).
    fn set_step_pin(&mut self, axis: Axis, level: bool);

    /// `forward` is the direction of increasing step count.
    fn set_direction_pin(&mut self, axis: Axis, forward: bool);

    /// Fire the step interrupt again after `delay`.
    fn schedule_next_tick(&mut self, delay: Duration);

    /// Route the E step and direction pins to another extruder's driver.
    /// Called between blocks, once no extruder steps are pending.
    fn select_extruder(&mut self, _extruder: u8) {}

    /// Whether the endstop `axis` moves toward is triggered. Only polled
    /// for moving linear axes while endstops are enabled.
    fn endstop_hit(&mut self, _axis: Axis, _toward_max: bool) -> bool {
        false
    }
}

/// Direction pin cache, so a pin is only written when it changes.
#[derive(Debug, Default)]
pub(crate) struct Pins {
    forward: AxisArray<Option<bool>>,
}

impl Pins {
    pub fn step<H: StepperHal>(&mut self, hal: &mut H, axis: Axis, forward: bool) {
        let cached = &mut self.forward[axis.index()];
        if *cached != Some(forward) {
            hal.set_direction_pin(axis, forward);
            *cached = Some(forward);
        }
        hal.set_step_pin(axis, true);
        hal.set_step_pin(axis, false);
    }

    /// The driver behind `axis` changed, its direction is unknown.
    pub fn forget(&mut self, axis: Axis) {
        self.forward[axis.index()] = None;
    }
}
