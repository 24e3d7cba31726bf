use super::SegmentSink;
use crate::{axis::Position, error::MotionError};
use libm::{fabsf, sqrtf};

const NEAR_ZERO: f32 = 1e-6;

/// Split a straight logical move into `segments_per_second * duration`
/// lines so the actuators of a non-Cartesian machine trace the straight
/// path. `max_segments_per_mm` bounds the count for arm machines, whose
/// joints can't take very short lines. Returns the number of lines queued.
pub fn line_to<S: SegmentSink>(
    sink: &mut S,
    target: &Position,
    feedrate: f32,
    extruder: u8,
    segments_per_second: f32,
    max_segments_per_mm: Option<f32>,
) -> Result<u32, MotionError> {
    let start = sink.position().to_array();
    let end = target.to_array();
    let delta: [f32; 4] = core::array::from_fn(|i| end[i] - start[i]);

    // vertical and extruder-only moves are straight in actuator space too
    if fabsf(delta[0]) < NEAR_ZERO && fabsf(delta[1]) < NEAR_ZERO {
        sink.push_line(target, feedrate, extruder, false)?;
        return Ok(1);
    }

    let mut cartesian_mm = sqrtf(delta[..3].iter().map(|d| d * d).sum());
    if cartesian_mm < NEAR_ZERO {
        cartesian_mm = fabsf(delta[3]);
    }
    if cartesian_mm < NEAR_ZERO {
        return Ok(0);
    }

    let mut segments = if feedrate > 0.0 {
        (segments_per_second * cartesian_mm / feedrate) as u32
    } else {
        1
    };
    if let Some(per_mm) = max_segments_per_mm {
        segments = segments.min((cartesian_mm * per_mm) as u32);
    }
    let segments = segments.max(1);

    for i in 1..segments {
        let f = i as f32 / segments as f32;
        let point = Position::from_array(core::array::from_fn(|a| start[a] + delta[a] * f));
        sink.push_line(&point, feedrate, extruder, i > 1)?;
    }
    // the last line goes to the exact target
    sink.push_line(target, feedrate, extruder, segments > 1)?;
    Ok(segments)
}
