use super::SegmentSink;
use crate::{axis::Position, config::ArcConfig, error::MotionError};
use core::f32::consts::TAU;
use libm::{atan2f, ceilf, cosf, fabsf, floorf, hypotf, sinf, sqrtf};

/// Plane an arc turns in. The remaining linear axis moves linearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Plane {
    #[default]
    Xy,
    Zx,
    Yz,
}

impl Plane {
    /// Indices of the two plane axes and the linear axis.
    fn axes(self) -> (usize, usize, usize) {
        match self {
            Plane::Xy => (0, 1, 2),
            Plane::Zx => (2, 0, 1),
            Plane::Yz => (1, 2, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArcCenter {
    /// Centre relative to the start point, in plane axis order.
    Offset([f32; 2]),
    /// Signed radius: negative picks the longer of the two arcs.
    Radius(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Arc {
    pub target: Position,
    pub center: ArcCenter,
    pub clockwise: bool,
    /// Full circles to run before the arc itself.
    pub circles: u16,
    pub plane: Plane,
}

impl Arc {
    /// Centre offset from `start`, resolving the radius form.
    pub fn offset(&self, start: &Position) -> Result<[f32; 2], MotionError> {
        let (p, q, _) = self.plane.axes();
        let (s, t) = (start.to_array(), self.target.to_array());
        let offset = match self.center {
            ArcCenter::Offset(offset) => offset,
            ArcCenter::Radius(r) => {
                let (dx, dy) = (t[p] - s[p], t[q] - s[q]);
                if r == 0.0 || (dx == 0.0 && dy == 0.0) {
                    return Err(MotionError::InvalidArc);
                }
                let side = if self.clockwise ^ (r < 0.0) { -1.0 } else { 1.0 };
                let d = hypotf(dx, dy);
                let h = sqrtf(r * r - 0.25 * d * d);
                // centre on the perpendicular bisector of the chord
                let (sx, sy) = (-dy / d, dx / d);
                [0.5 * dx + side * h * sx, 0.5 * dy + side * h * sy]
            }
        };
        if !(offset[0].is_finite() && offset[1].is_finite()) || offset == [0.0, 0.0] {
            return Err(MotionError::InvalidArc);
        }
        Ok(offset)
    }
}

/// The points of one arc, each the end of a short line. The rotation is
/// applied incrementally with a small-angle approximation and recomputed
/// exactly every `correction_interval` points.
#[derive(Debug, Clone)]
pub struct ArcSegments {
    axes: (usize, usize, usize),
    start: [f32; 4],
    target: Position,
    offset: [f32; 2],
    center: [f32; 2],
    radius_vector: [f32; 2],
    angular_travel: f32,
    segments: u32,
    theta_per_segment: f32,
    sin_t: f32,
    cos_t: f32,
    linear_per_segment: f32,
    extruder_per_segment: f32,
    correction_interval: u16,
    until_correction: u16,
    index: u32,
}

impl ArcSegments {
    /// `Ok(None)` when there is nothing to cut: no angular travel, a
    /// vanishing length or arithmetic that broke down.
    pub fn new(
        start: &Position,
        arc: &Arc,
        feedrate: f32,
        config: &ArcConfig,
    ) -> Result<Option<Self>, MotionError> {
        let axes = arc.plane.axes();
        let (p, q, l) = axes;
        let offset = arc.offset(start)?;
        let s = start.to_array();
        let t = arc.target.to_array();

        let (r_p, r_q) = (-offset[0], -offset[1]);
        let radius = hypotf(r_p, r_q);
        let center = [s[p] - r_p, s[q] - r_q];
        let (rt_x, rt_y) = (t[p] - center[0], t[q] - center[1]);

        let full_circle = fabsf(t[p] - s[p]) < 1e-6 && fabsf(t[q] - s[q]) < 1e-6;
        let (angular_travel, min_segments) = if full_circle {
            let turn = if arc.clockwise { -TAU } else { TAU };
            (turn, config.min_circle_segments as u32)
        } else {
            let mut angle = atan2f(r_p * rt_y - r_q * rt_x, r_p * rt_x + r_q * rt_y);
            if angle < 0.0 {
                angle += TAU;
            }
            if angle == 0.0 {
                trace!("arc without angular travel skipped");
                return Ok(None);
            }
            let min_segments =
                (ceilf(config.min_circle_segments as f32 * angle / TAU) as u32).max(1);
            if arc.clockwise {
                angle -= TAU;
            }
            (angle, min_segments)
        };

        let linear_travel = t[l] - s[l];
        let extruder_travel = t[3] - s[3];
        let flat_mm = radius * angular_travel;
        let mm_of_travel = if linear_travel != 0.0 {
            hypotf(flat_mm, linear_travel)
        } else {
            fabsf(flat_mm)
        };
        if mm_of_travel.is_nan() {
            warn!("arc arithmetic produced NaN, arc skipped");
            return Ok(None);
        }
        if mm_of_travel < 0.001 {
            return Ok(None);
        }

        let segment_length = match config.segments_per_second {
            Some(sps) => (feedrate / sps).clamp(config.min_segment_mm, config.max_segment_mm),
            None => config.max_segment_mm,
        };
        let segments = (floorf(mm_of_travel / segment_length) as u32).max(min_segments);

        let theta = angular_travel / segments as f32;
        let theta_sq = theta * theta;
        Ok(Some(Self {
            axes,
            start: s,
            target: arc.target,
            offset,
            center,
            radius_vector: [r_p, r_q],
            angular_travel,
            segments,
            theta_per_segment: theta,
            sin_t: theta - theta_sq * theta / 6.0,
            cos_t: 1.0 - 0.5 * theta_sq,
            linear_per_segment: linear_travel / segments as f32,
            extruder_per_segment: extruder_travel / segments as f32,
            correction_interval: config.correction_interval,
            until_correction: config.correction_interval,
            index: 0,
        }))
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn theta_per_segment(&self) -> f32 {
        self.theta_per_segment
    }

    /// Signed total rotation in radians, positive counter-clockwise.
    pub fn angular_travel(&self) -> f32 {
        self.angular_travel
    }

    pub fn center(&self) -> [f32; 2] {
        self.center
    }
}

impl Iterator for ArcSegments {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        if self.index >= self.segments {
            return None;
        }
        self.index += 1;
        if self.index == self.segments {
            return Some(self.target);
        }

        let i = self.index;
        let [r_p, r_q] = self.radius_vector;
        self.until_correction -= 1;
        self.radius_vector = if self.until_correction > 0 {
            [
                r_p * self.cos_t - r_q * self.sin_t,
                r_p * self.sin_t + r_q * self.cos_t,
            ]
        } else {
            self.until_correction = self.correction_interval;
            let angle = i as f32 * self.theta_per_segment;
            let (sin_i, cos_i) = (sinf(angle), cosf(angle));
            let [o_p, o_q] = self.offset;
            [-o_p * cos_i + o_q * sin_i, -o_p * sin_i - o_q * cos_i]
        };

        let (p, q, l) = self.axes;
        let mut point = self.start;
        point[p] = self.center[0] + self.radius_vector[0];
        point[q] = self.center[1] + self.radius_vector[1];
        point[l] += self.linear_per_segment * i as f32;
        point[3] += self.extruder_per_segment * i as f32;
        Some(Position::from_array(point))
    }
}

/// Queue `arc` (its full circles first) as lines. Returns the number of
/// lines queued. Linear and extruder travel is spread over the circles
/// and the arc in proportion to the angle each turns.
pub fn plan_arc<S: SegmentSink>(
    sink: &mut S,
    arc: &Arc,
    feedrate: f32,
    extruder: u8,
    config: &ArcConfig,
) -> Result<u32, MotionError> {
    let start = sink.position();
    let center = ArcCenter::Offset(arc.offset(&start)?);
    let circles = arc.circles;
    let arc = Arc {
        center,
        circles: 0,
        ..*arc
    };

    let mut queued = 0;
    if circles > 0 {
        let turn = ArcSegments::new(&start, &arc, feedrate, config)?
            .map_or(0.0, |a| fabsf(a.angular_travel()));
        let share = TAU / (turn + circles as f32 * TAU);
        let (_, _, l) = arc.plane.axes();
        let (s, t) = (start.to_array(), arc.target.to_array());
        let (l_per_circle, e_per_circle) = ((t[l] - s[l]) * share, (t[3] - s[3]) * share);

        for _ in 0..circles {
            let mut target = sink.position().to_array();
            target[l] += l_per_circle;
            target[3] += e_per_circle;
            let circle = Arc {
                target: Position::from_array(target),
                ..arc
            };
            queue_arc(sink, &circle, feedrate, extruder, config, &mut queued)?;
        }
    }
    queue_arc(sink, &arc, feedrate, extruder, config, &mut queued)?;
    debug!("arc queued as {} lines", queued);
    Ok(queued)
}

fn queue_arc<S: SegmentSink>(
    sink: &mut S,
    arc: &Arc,
    feedrate: f32,
    extruder: u8,
    config: &ArcConfig,
    queued: &mut u32,
) -> Result<(), MotionError> {
    let start = sink.position();
    let Some(points) = ArcSegments::new(&start, arc, feedrate, config)? else {
        return Ok(());
    };
    for point in points {
        sink.push_line(&point, feedrate, extruder, *queued > 0)?;
        *queued += 1;
    }
    Ok(())
}
