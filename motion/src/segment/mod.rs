//! Long and curved moves cut into short straight lines.

use crate::{axis::Position, error::MotionError};

pub mod arc;
pub mod bezier;
mod line;

pub use line::line_to;

/// Where segmented moves go, normally the [`Planner`](crate::Planner).
pub trait SegmentSink {
    /// Logical position the next line starts from.
    fn position(&self) -> Position;

    /// Queue one straight line, waiting for room if needed. `continued` is
    /// set on every line of a segmented move but the first.
    fn push_line(
        &mut self,
        target: &Position,
        feedrate: f32,
        extruder: u8,
        continued: bool,
    ) -> Result<(), MotionError>;
}
