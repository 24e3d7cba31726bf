use crate::{
    axis::{AxisArray, NUM_AXES},
    config::{Cornering, MINIMUM_PLANNER_SPEED},
};
use libm::{acosf, fabsf, sqrtf};

/// The new block as the cornering policies see it.
pub(crate) struct Segment {
    /// Signed per-axis speed at nominal feedrate.
    pub speed: AxisArray<f32>,
    /// Per-axis distance divided by the path length.
    pub unit: AxisArray<f32>,
    pub nominal_speed: f32,
    pub acceleration: f32,
    pub millimeters: f32,
}

/// What a junction needs to remember about the block before it.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Junction {
    previous_speed: AxisArray<f32>,
    previous_unit: AxisArray<f32>,
    previous_nominal_speed: f32,
    previous_safe_speed: f32,
}

impl Junction {
    /// Forget the previous block, e.g. after the position was set or the
    /// queue was flushed. The next block starts from rest.
    pub fn reset(&mut self) {
        *self = Junction::default();
    }

    /// Highest speed at which `segment` may be entered from the block
    /// planned before it, then remember `segment` as that block.
    pub fn max_entry_speed(
        &mut self,
        cornering: &Cornering,
        max_acceleration: &AxisArray<f32>,
        moves_queued: bool,
        segment: &Segment,
    ) -> f32 {
        let joined = moves_queued && fabsf(self.previous_nominal_speed) > 1e-6;
        let (vmax, safe_speed) = match cornering {
            Cornering::Jerk(max_jerk) => self.jerk_limit(max_jerk, joined, segment),
            Cornering::JunctionDeviation(deviation) => (
                self.deviation_limit(*deviation, max_acceleration, joined, segment),
                0.0,
            ),
        };

        self.previous_speed = segment.speed;
        self.previous_unit = segment.unit;
        self.previous_nominal_speed = segment.nominal_speed;
        self.previous_safe_speed = safe_speed;
        vmax
    }

    fn jerk_limit(
        &self,
        max_jerk: &AxisArray<f32>,
        joined: bool,
        segment: &Segment,
    ) -> (f32, f32) {
        let nominal = segment.nominal_speed;

        // speed the machine can stop from instantly
        let mut safe_speed = nominal;
        let mut limited = false;
        for (speed, &maxj) in segment.speed.iter().zip(max_jerk) {
            let jerk = fabsf(*speed);
            if jerk > maxj {
                if limited {
                    let mjerk = maxj * nominal;
                    if jerk * safe_speed > mjerk {
                        safe_speed = mjerk / jerk;
                    }
                } else {
                    limited = true;
                    safe_speed = maxj;
                }
            }
        }

        if !joined {
            return (safe_speed, safe_speed);
        }

        let mut vmax = nominal.min(self.previous_nominal_speed);
        let smaller_speed_factor = vmax / self.previous_nominal_speed;
        let mut v_factor = 1.0;
        let mut limited = false;
        for axis in 0..NUM_AXES {
            let mut v_exit = self.previous_speed[axis] * smaller_speed_factor;
            let mut v_entry = segment.speed[axis];
            if limited {
                v_exit *= v_factor;
                v_entry *= v_factor;
            }

            let jerk = if v_exit > v_entry {
                if v_entry > 0.0 || v_exit < 0.0 {
                    v_exit - v_entry
                } else {
                    v_exit.max(-v_entry)
                }
            } else if v_entry < 0.0 || v_exit > 0.0 {
                v_entry - v_exit
            } else {
                (-v_exit).max(v_entry)
            };

            if jerk > max_jerk[axis] {
                v_factor *= max_jerk[axis] / jerk;
                limited = true;
            }
        }
        if limited {
            vmax *= v_factor;
        }

        let threshold = vmax * 0.99;
        if self.previous_safe_speed > threshold && safe_speed > threshold {
            // never above what the previous block runs at
            vmax = safe_speed.min(self.previous_nominal_speed);
        }
        (vmax, safe_speed)
    }

    fn deviation_limit(
        &self,
        deviation: f32,
        max_acceleration: &AxisArray<f32>,
        joined: bool,
        segment: &Segment,
    ) -> f32 {
        if !joined {
            return 0.0;
        }

        let mut cos_theta = 0.0;
        for (prev, unit) in self.previous_unit.iter().zip(&segment.unit) {
            cos_theta -= prev * unit;
        }

        // full reversal
        if cos_theta > 0.999_999 {
            return MINIMUM_PLANNER_SPEED;
        }
        let cos_theta = cos_theta.max(-0.999_999);

        let mut junction_unit: AxisArray<f32> =
            core::array::from_fn(|i| segment.unit[i] - self.previous_unit[i]);
        let magnitude = sqrtf(junction_unit.iter().map(|v| v * v).sum());
        let mut acceleration = segment.acceleration;
        if magnitude > 0.0 {
            junction_unit.iter_mut().for_each(|v| *v /= magnitude);
            acceleration = limit_by_axis_maximum(acceleration, &junction_unit, max_acceleration);
        }

        let sin_theta_d2 = sqrtf(0.5 * (1.0 - cos_theta));
        let mut vmax_sqr = acceleration * deviation * sin_theta_d2 / (1.0 - sin_theta_d2);

        // short segments of a curve: bound by the centripetal limit of
        // the arc they approximate
        if segment.millimeters < 1.0 {
            let theta = acosf(-cos_theta);
            vmax_sqr = vmax_sqr.min(segment.millimeters * acceleration / theta);
        }

        let nominal_sqr = segment.nominal_speed * segment.nominal_speed;
        let previous_sqr = self.previous_nominal_speed * self.previous_nominal_speed;
        sqrtf(vmax_sqr.min(nominal_sqr).min(previous_sqr))
    }
}

fn limit_by_axis_maximum(
    max_value: f32,
    unit: &AxisArray<f32>,
    max_acceleration: &AxisArray<f32>,
) -> f32 {
    let mut limit = max_value;
    for (u, max) in unit.iter().zip(max_acceleration) {
        if *u != 0.0 && limit * fabsf(*u) > *max {
            limit = fabsf(max / u);
        }
    }
    limit
}
