use super::SegmentSink;
use crate::{axis::Position, error::MotionError};
use libm::fabsf;

const MIN_STEP: f32 = 0.002;
const MAX_STEP: f32 = 0.1;
/// Largest L1 distance between the curve and a line that replaces it.
const SIGMA: f32 = 0.1;

/// Cubic Bézier in the XY plane. Z and E move linearly in the curve
/// parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bezier {
    pub target: Position,
    /// First control point relative to the start, second relative to the
    /// target.
    pub control: [[f32; 2]; 2],
}

fn interp(a: f32, b: f32, t: f32) -> f32 {
    (1.0 - t) * a + t * b
}

fn eval(a: f32, b: f32, c: f32, d: f32, t: f32) -> f32 {
    let (ab, bc, cd) = (interp(a, b, t), interp(b, c, t), interp(c, d, t));
    interp(interp(ab, bc, t), interp(bc, cd, t), t)
}

fn dist1(a: [f32; 2], b: [f32; 2]) -> f32 {
    fabsf(a[0] - b[0]) + fabsf(a[1] - b[1])
}

/// Points along a [`Bezier`], spaced so that each chord stays within
/// `SIGMA` of the curve.
#[derive(Debug, Clone)]
pub struct BezierSegments {
    start: Position,
    target: Position,
    xs: [f32; 4],
    ys: [f32; 4],
    t: f32,
    step: f32,
    last: [f32; 2],
}

impl BezierSegments {
    pub fn new(start: &Position, bezier: &Bezier) -> Self {
        let target = bezier.target;
        let [first, second] = bezier.control;
        Self {
            start: *start,
            target,
            xs: [start.x, start.x + first[0], target.x + second[0], target.x],
            ys: [start.y, start.y + first[1], target.y + second[1], target.y],
            t: 0.0,
            step: MAX_STEP,
            last: [start.x, start.y],
        }
    }

    fn at(&self, t: f32) -> [f32; 2] {
        let [x0, x1, x2, x3] = self.xs;
        let [y0, y1, y2, y3] = self.ys;
        [eval(x0, x1, x2, x3, t), eval(y0, y1, y2, y3, t)]
    }

    fn midpoint(&self, to: [f32; 2]) -> [f32; 2] {
        [0.5 * (self.last[0] + to[0]), 0.5 * (self.last[1] + to[1])]
    }
}

impl Iterator for BezierSegments {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        if self.t >= 1.0 {
            return None;
        }
        let t = self.t;

        // shrink the step until the chord is close enough to the curve
        let mut new_t = (t + self.step).min(1.0);
        let mut new_pos = self.at(new_t);
        let mut reduced = false;
        while new_t - t >= MIN_STEP {
            let candidate_t = 0.5 * (t + new_t);
            let candidate = self.at(candidate_t);
            if dist1(candidate, self.midpoint(new_pos)) <= SIGMA {
                break;
            }
            new_t = candidate_t;
            new_pos = candidate;
            reduced = true;
        }

        // or grow it while the chord still fits
        if !reduced {
            while new_t - t <= MAX_STEP {
                let candidate_t = t + 2.0 * (new_t - t);
                if candidate_t >= 1.0 {
                    break;
                }
                let candidate = self.at(candidate_t);
                if dist1(new_pos, self.midpoint(candidate)) > SIGMA {
                    break;
                }
                new_t = candidate_t;
                new_pos = candidate;
            }
        }

        self.step = new_t - t;
        self.t = new_t;
        self.last = new_pos;

        if new_t >= 1.0 {
            return Some(self.target);
        }
        Some(Position::new(
            new_pos[0],
            new_pos[1],
            interp(self.start.z, self.target.z, new_t),
            interp(self.start.e, self.target.e, new_t),
        ))
    }
}

/// Queue `bezier` as lines. Returns the number of lines queued.
pub fn plan_bezier<S: SegmentSink>(
    sink: &mut S,
    bezier: &Bezier,
    feedrate: f32,
    extruder: u8,
) -> Result<u32, MotionError> {
    let start = sink.position();
    let mut queued = 0;
    for point in BezierSegments::new(&start, bezier) {
        sink.push_line(&point, feedrate, extruder, queued > 0)?;
        queued += 1;
    }
    debug!("curve queued as {} lines", queued);
    Ok(queued)
}
