use crate::{block::MINIMAL_STEP_RATE, STEPPER_TIMER_RATE};

pub const MAX_STEP_FREQUENCY: u32 = 40_000;
/// Above this rate every tick takes two steps, above twice it four.
pub const DOUBLE_STEP_FREQUENCY: u32 = 10_000;

/// Timer ticks between interrupts for `rate` steps/s, and the number of
/// steps each interrupt takes.
pub fn calc_timer_interval(rate: u32) -> (u32, u8) {
    let mut rate = rate.min(MAX_STEP_FREQUENCY);
    let loops = if rate > 2 * DOUBLE_STEP_FREQUENCY {
        rate >>= 2;
        4
    } else if rate > DOUBLE_STEP_FREQUENCY {
        rate >>= 1;
        2
    } else {
        1
    };
    (STEPPER_TIMER_RATE / rate.max(MINIMAL_STEP_RATE), loops)
}

/// Rate `elapsed` ticks into a ramp from `from` to `to` lasting `duration`
/// ticks, following a quintic smoothstep. Zero acceleration at both ends,
/// same average rate as the linear ramp.
pub fn s_curve(from: u32, to: u32, elapsed: u32, duration: u32) -> u32 {
    if duration == 0 || elapsed >= duration {
        return to;
    }
    let x = elapsed as f32 / duration as f32;
    let s = x * x * x * (10.0 + x * (6.0 * x - 15.0));
    let (from, to) = (from as f32, to as f32);
    (from + (to - from) * s) as u32
}
