use super::NEVER;
use crate::{axis::Axis, config::ShaperConfig, STEPPER_TIMER_RATE};
use core::f32::consts::PI;
use heapless::Deque;
use libm::{expf, roundf, sqrtf};

/// Echoes in flight per axis. When full, the echo is applied at once.
const ECHO_DEPTH: usize = 512;

/// Weights are out of this.
const UNIT: i16 = 128;

/// ZV shaper for one axis: every input step becomes an immediate
/// fraction and a fraction half a damped period later. A sigma-delta
/// accumulator turns the fractions back into whole steps.
#[derive(Debug)]
struct AxisShaper {
    immediate: i16,
    delayed: i16,
    delay: u32,
    error: i16,
    echoes: Deque<(u32, bool), ECHO_DEPTH>,
}

impl AxisShaper {
    fn new(config: &ShaperConfig) -> Self {
        let damped = sqrtf(1.0 - config.zeta * config.zeta);
        let k = expf(-config.zeta * PI / damped);
        let immediate = roundf(UNIT as f32 / (1.0 + k)) as i16;
        Self {
            immediate,
            delayed: UNIT - immediate,
            delay: (STEPPER_TIMER_RATE as f32 / (2.0 * config.frequency * damped)) as u32,
            error: 0,
            echoes: Deque::new(),
        }
    }

    fn add(&mut self, forward: bool, weight: i16, axis: Axis, emit: &mut impl FnMut(Axis, bool)) {
        self.error += if forward { weight } else { -weight };
        if self.error >= UNIT / 2 {
            emit(axis, true);
            self.error -= UNIT;
        } else if self.error <= -UNIT / 2 {
            emit(axis, false);
            self.error += UNIT;
        }
    }
}

#[derive(Debug)]
pub(crate) struct Shaper {
    axes: [Option<AxisShaper>; 2],
}

const SHAPED: [Axis; 2] = [Axis::X, Axis::Y];

impl Shaper {
    pub fn new(x: Option<ShaperConfig>, y: Option<ShaperConfig>) -> Self {
        Self {
            axes: [x.map(|c| AxisShaper::new(&c)), y.map(|c| AxisShaper::new(&c))],
        }
    }

    fn slot(axis: Axis) -> Option<usize> {
        SHAPED.iter().position(|a| *a == axis)
    }

    pub fn shapes(&self, axis: Axis) -> bool {
        Self::slot(axis).is_some_and(|i| self.axes[i].is_some())
    }

    /// Feed one input step taken at `now`.
    pub fn step(&mut self, axis: Axis, forward: bool, now: u32, mut emit: impl FnMut(Axis, bool)) {
        let Some(shaper) = Self::slot(axis).and_then(|i| self.axes[i].as_mut()) else {
            emit(axis, forward);
            return;
        };
        let weight = shaper.immediate;
        shaper.add(forward, weight, axis, &mut emit);
        if shaper
            .echoes
            .push_back((now.wrapping_add(shaper.delay), forward))
            .is_err()
        {
            let weight = shaper.delayed;
            shaper.add(forward, weight, axis, &mut emit);
        }
    }

    /// Apply every echo due at `now`.
    pub fn service(&mut self, now: u32, mut emit: impl FnMut(Axis, bool)) {
        for (axis, shaper) in SHAPED.into_iter().zip(self.axes.iter_mut()) {
            let Some(shaper) = shaper else { continue };
            while let Some(&(due, forward)) = shaper.echoes.front() {
                if (now.wrapping_sub(due) as i32) < 0 {
                    break;
                }
                shaper.echoes.pop_front();
                let weight = shaper.delayed;
                shaper.add(forward, weight, axis, &mut emit);
            }
        }
    }

    /// Ticks from `now` until the next echo is due.
    pub fn next_due(&self, now: u32) -> u32 {
        self.axes
            .iter()
            .flatten()
            .filter_map(|s| s.echoes.front())
            .map(|(due, _)| (due.wrapping_sub(now) as i32).max(0) as u32)
            .min()
            .unwrap_or(NEVER)
    }

    pub fn is_idle(&self) -> bool {
        self.axes.iter().flatten().all(|s| s.echoes.is_empty())
    }

    pub fn reset(&mut self) {
        for shaper in self.axes.iter_mut().flatten() {
            shaper.echoes.clear();
            shaper.error = 0;
        }
    }
}
