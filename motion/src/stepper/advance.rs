use super::NEVER;
use crate::{
    block::{Block, Profile},
    STEPPER_TIMER_RATE,
};

use super::timing::MAX_STEP_FREQUENCY;

/// Ticks between lead steps while flushing steps nobody scheduled.
const FLUSH_INTERVAL: u32 = STEPPER_TIMER_RATE / MAX_STEP_FREQUENCY;

/// Extruder lead on its own timer. The E steps of advance blocks are
/// queued here by the main tick instead of going to the pin, and the
/// advance tick adds or takes back lead steps as the block speeds up and
/// slows down.
#[derive(Debug)]
pub(crate) struct LinearAdvance {
    /// Pending E steps, positive forward.
    e_steps: i32,
    current_adv_steps: u32,
    max_adv_steps: u32,
    final_adv_steps: u32,
    decelerate_after: u32,
    rate: u32,
    /// Ticks until the next advance tick.
    pub next: u32,
}

impl LinearAdvance {
    pub const fn new() -> Self {
        Self {
            e_steps: 0,
            current_adv_steps: 0,
            max_adv_steps: 0,
            final_adv_steps: 0,
            decelerate_after: 0,
            rate: NEVER,
            next: NEVER,
        }
    }

    pub fn start_block(&mut self, block: &Block, profile: &Profile) {
        if block.advance.is_some() {
            self.max_adv_steps = profile.max_adv_steps;
            self.final_adv_steps = profile.final_adv_steps;
        } else {
            self.max_adv_steps = 0;
            self.final_adv_steps = 0;
        }
        self.decelerate_after = profile.decelerate_after;
    }

    pub fn queue_step(&mut self, forward: bool) {
        self.e_steps += if forward { 1 } else { -1 };
    }

    pub fn has_pending(&self) -> bool {
        self.e_steps != 0
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Run the advance tick now and then every `rate` ticks.
    pub fn request(&mut self, rate: u32) {
        self.next = 0;
        self.rate = rate;
    }

    /// No lead changes for now, but flush what is pending.
    pub fn stop_lead(&mut self) {
        self.rate = NEVER;
        if self.e_steps != 0 {
            self.next = 0;
        }
    }

    /// Nothing is running: take back whatever lead is left.
    pub fn settle(&mut self) {
        self.max_adv_steps = 0;
        self.final_adv_steps = 0;
        self.decelerate_after = 0;
        if self.current_adv_steps > 0 && self.rate == NEVER {
            self.request(FLUSH_INTERVAL);
        } else if self.e_steps != 0 && self.next == NEVER {
            self.next = 0;
        }
    }

    /// `completed` is the step event count of the running block, or past
    /// its end when nothing runs. Emits at most `loops` steps.
    pub fn tick(&mut self, completed: u32, loops: u8, mut emit: impl FnMut(bool)) {
        self.next = self.rate;
        if completed > self.decelerate_after && self.current_adv_steps > self.final_adv_steps {
            self.e_steps -= 1;
            self.current_adv_steps -= 1;
        } else if completed < self.decelerate_after && self.current_adv_steps < self.max_adv_steps {
            self.e_steps += 1;
            self.current_adv_steps += 1;
        } else {
            self.next = NEVER;
            self.rate = NEVER;
        }

        for _ in 0..loops.max(1) {
            if self.e_steps == 0 {
                break;
            }
            let forward = self.e_steps > 0;
            emit(forward);
            self.e_steps -= if forward { 1 } else { -1 };
        }
        if self.e_steps != 0 && self.next == NEVER {
            self.next = FLUSH_INTERVAL;
        }
    }

    /// No steps pending and no lead left over.
    pub fn is_idle(&self) -> bool {
        self.e_steps == 0 && self.current_adv_steps == 0
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
