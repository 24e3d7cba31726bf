use crate::{
    axis::{Axis, AxisArray, Position, MAX_EXTRUDERS, NUM_AXES},
    block::{max_allowable_speed, Advance, Block, BlockFlags, Profile},
    config::{MachineConfig, Settings, MINIMUM_PLANNER_SPEED},
    error::{ConfigError, MotionError},
    junction::{Junction, Segment},
    segment::{
        self,
        arc::{plan_arc, Arc},
        bezier::{plan_bezier, Bezier},
        SegmentSink,
    },
    shared::{MotionEvent, MotionShared, Producer},
    STEPPER_TIMER_RATE,
};
use embassy_sync::blocking_mutex::raw::RawMutex;
use kinematics::{KinematicModel, Kinematics, KinematicsError, Xyz};
use libm::{ceilf, fabsf, roundf, sqrtf};

/// Work the foreground does while it waits for room in the ring or for the
/// stepper to drain it. Never called from the step interrupt.
pub trait Background {
    fn idle(&mut self);
}

impl<F: FnMut()> Background for F {
    fn idle(&mut self) {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PositionSource {
    /// Where the machine will be once everything queued has run.
    Projected,
    /// Where the steppers are now.
    Realtime,
}

/// A queued block as the planner currently sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlannedBlock {
    pub block: Block,
    pub entry_speed: f32,
    pub max_entry_speed: f32,
    pub profile: Profile,
}

#[derive(Debug, Clone, Copy, Default)]
struct PlanState {
    entry_speed: f32,
    max_entry_speed: f32,
    /// The block can reach nominal speed from rest within its length.
    nominal_length: bool,
    recalculate: bool,
}

/// Foreground half of the motion core.
///
/// Turns logical moves into blocks, pushes them into the ring and keeps the
/// entry speeds of everything the stepper has not started yet consistent.
pub struct Planner<'a, M: RawMutex, B: Background, const N: usize> {
    queue: Producer<'a, M, N>,
    settings: Settings,
    plan: [PlanState; N],
    /// Step position at the end of the newest queued block.
    position: AxisArray<i32>,
    /// Native position at the end of the newest queued block.
    native: Xyz,
    /// Logical position of the last accepted move, dropped ones included.
    current: Position,
    junction: Junction,
    flow: [f32; MAX_EXTRUDERS],
    background: B,
}

impl<'a, M: RawMutex, B: Background, const N: usize> Planner<'a, M, B, N> {
    /// The planner starts where the step counters are. Call
    /// [`set_position`](Self::set_position) once the machine is homed.
    pub fn new(
        queue: Producer<'a, M, N>,
        config: &MachineConfig,
        background: B,
    ) -> Result<Self, ConfigError> {
        let settings = config.validate()?;
        let mut planner = Self {
            queue,
            settings,
            plan: [PlanState::default(); N],
            position: [0; NUM_AXES],
            native: Xyz::ZERO,
            current: Position::ORIGIN,
            junction: Junction::default(),
            flow: [1.0; MAX_EXTRUDERS],
            background,
        };
        if let Err(e) = planner.resync() {
            warn!("step counters map to no position ({:?}), set one before moving", e);
        }
        Ok(planner)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn shared(&self) -> &'a MotionShared<M, N> {
        self.queue.shared()
    }

    pub fn moves_free(&self) -> usize {
        self.queue.free()
    }

    pub fn blocks_queued(&self) -> usize {
        self.queue.len()
    }

    /// The `n`th queued block, oldest first.
    pub fn planned(&self, n: usize) -> Option<PlannedBlock> {
        if n >= self.queue.len() {
            return None;
        }
        let counter = self.queue.tail().wrapping_add(n);
        let state = self.plan[slot::<N>(counter)];
        Some(PlannedBlock {
            block: *self.queue.block(counter),
            entry_speed: state.entry_speed,
            max_entry_speed: state.max_entry_speed,
            profile: self.queue.profile(counter),
        })
    }

    /// Queue a straight move, waiting for room when the ring is full. On
    /// non-Cartesian machines the move is split so the tool follows a
    /// straight line.
    pub fn buffer_line(
        &mut self,
        target: &Position,
        feedrate: f32,
        extruder: u8,
    ) -> Result<(), MotionError> {
        self.check_request(target, feedrate, extruder)?;
        let config = self.settings.config();
        if config.kinematics.is_cartesian() {
            return self.push_blocking(target, feedrate, extruder, BlockFlags::NONE);
        }
        let segments_per_second = config.segments_per_second;
        let max_segments_per_mm = match config.kinematics {
            Kinematics::MorganScara(_) | Kinematics::MpScara(_) => Some(4.0),
            _ => None,
        };
        segment::line_to(
            self,
            target,
            feedrate,
            extruder,
            segments_per_second,
            max_segments_per_mm,
        )
        .map(|_| ())
    }

    /// Queue one block without waiting. `WouldBlock` while the ring is
    /// full, a quickstop is in progress or an endstop resync is pending.
    pub fn try_buffer_segment(
        &mut self,
        target: &Position,
        feedrate: f32,
        extruder: u8,
    ) -> nb::Result<(), MotionError> {
        self.check_request(target, feedrate, extruder)?;
        self.push_segment(target, feedrate, extruder, BlockFlags::NONE)
    }

    /// Logical move to `target`, the `G0`/`G1` entry point.
    pub fn move_to(&mut self, target: &Position, feedrate: f32) -> Result<(), MotionError> {
        self.buffer_line(target, feedrate, 0)
    }

    /// Queue an arc as short lines. Returns the number of lines.
    pub fn arc_to(&mut self, arc: &Arc, feedrate: f32, extruder: u8) -> Result<u32, MotionError> {
        self.check_request(&arc.target, feedrate, extruder)?;
        let config = self.settings.config().arc;
        plan_arc(self, arc, feedrate, extruder, &config)
    }

    /// Queue a cubic Bézier as short lines. Returns the number of lines.
    pub fn bezier_to(
        &mut self,
        bezier: &Bezier,
        feedrate: f32,
        extruder: u8,
    ) -> Result<u32, MotionError> {
        self.check_request(&bezier.target, feedrate, extruder)?;
        plan_bezier(self, bezier, feedrate, extruder)
    }

    /// Wait until the stepper has run every queued block, delayed steps
    /// included.
    pub fn synchronize(&mut self) -> Result<(), MotionError> {
        self.drain();
        if self.queue.take_resync() {
            self.resync()?;
        }
        Ok(())
    }

    /// Declare the current position without moving, e.g. after homing.
    /// Goes through the ring so blocks already queued still run first.
    pub fn set_position(&mut self, position: &Position) -> Result<(), MotionError> {
        self.place(position)?;
        Ok(())
    }

    pub fn current_position(&self, source: PositionSource) -> Result<Position, MotionError> {
        match source {
            PositionSource::Projected => Ok(self.current),
            PositionSource::Realtime => {
                let (native, e) = self.native_from_counts(&self.queue.counts())?;
                Ok(self.to_logical(native, e))
            }
        }
    }

    /// Stop now: the stepper drops everything queued, including the block
    /// it is running, and the position is read back from the counters.
    pub fn quick_stop(&mut self) -> Result<(), MotionError> {
        self.queue.request_abort();
        while self.queue.abort_pending() {
            self.background.idle();
        }
        self.queue.take_resync();
        self.resync()?;
        info!("quick stop, position resynchronised");
        Ok(())
    }

    /// Take the planner position from the step counters once the ring has
    /// drained.
    pub fn sync_from_steppers(&mut self) -> Result<(), MotionError> {
        self.drain();
        self.queue.take_resync();
        self.resync()?;
        Ok(())
    }

    pub fn poll_event(&mut self) -> Option<MotionEvent> {
        self.queue.try_take_event()
    }

    pub fn enable_endstops(&mut self, enabled: bool) {
        self.queue.set_endstops_enabled(enabled);
    }

    /// Extrusion multiplier of one extruder, in percent.
    pub fn set_flow_percentage(&mut self, extruder: u8, percent: f32) -> Result<(), MotionError> {
        if extruder >= self.settings.config().extruders {
            return Err(MotionError::InvalidExtruder(extruder));
        }
        if !(percent.is_finite() && percent >= 0.0) {
            return Err(MotionError::InvalidFeedrate);
        }
        self.flow[extruder as usize] = percent * 0.01;
        Ok(())
    }

    /// Swap in a new machine description. Waits for the ring to drain and
    /// re-derives the step position of the current logical position. The
    /// speed profile and input shaping belong to the stepper and must stay
    /// as they are.
    pub fn reconfigure(&mut self, config: &MachineConfig) -> Result<(), ConfigError> {
        let settings = config.validate()?;
        let running = self.settings.config();
        if config.speed_profile != running.speed_profile
            || config.shaping_x != running.shaping_x
            || config.shaping_y != running.shaping_y
        {
            warn!("reconfigure refused: stepper settings differ");
            return Err(ConfigError::StepperSettingsFixed);
        }
        self.drain();
        if self.queue.take_resync() {
            self.resync().map_err(ConfigError::Kinematics)?;
        }
        let current = self.current;
        let previous = core::mem::replace(&mut self.settings, settings);
        if let Err(e) = self.place(&current) {
            self.settings = previous;
            return Err(ConfigError::Kinematics(e));
        }
        info!("machine configuration replaced");
        Ok(())
    }

    /// Wait for the ring to empty and the last steps to reach the pins.
    fn drain(&mut self) {
        while !self.queue.is_empty() || self.queue.abort_pending() || !self.queue.stepper_settled()
        {
            self.background.idle();
        }
    }

    fn check_request(
        &self,
        target: &Position,
        feedrate: f32,
        extruder: u8,
    ) -> Result<(), MotionError> {
        if !feedrate.is_finite() || feedrate < 0.0 {
            return Err(MotionError::InvalidFeedrate);
        }
        if extruder >= self.settings.config().extruders {
            return Err(MotionError::InvalidExtruder(extruder));
        }
        if !target.is_finite() {
            return Err(MotionError::Kinematics(KinematicsError::Degenerate));
        }
        Ok(())
    }

    fn to_native(&self, position: &Position) -> Xyz {
        let config = self.settings.config();
        position.xyz() - config.home_offset - config.workspace_offset
    }

    fn to_logical(&self, native: Xyz, e: f32) -> Position {
        let config = self.settings.config();
        Position::with_xyz(native + config.home_offset + config.workspace_offset, e)
    }

    fn check_soft_limits(&self, native: Xyz) -> Result<(), MotionError> {
        let Some(limits) = self.settings.config().soft_endstops else {
            return Ok(());
        };
        let (v, min, max) = (native.to_array(), limits.min.to_array(), limits.max.to_array());
        match Axis::LINEAR
            .into_iter()
            .find(|a| !(min[a.index()]..=max[a.index()]).contains(&v[a.index()]))
        {
            Some(axis) => Err(MotionError::OutsideSoftLimits { axis }),
            None => Ok(()),
        }
    }

    fn to_steps(&self, actuators: Xyz, e: f32) -> AxisArray<i32> {
        let spu = &self.settings.config().steps_per_unit;
        let [a, b, c] = actuators.to_array();
        let units = [a, b, c, e];
        core::array::from_fn(|i| roundf(units[i] * spu[i]) as i32)
    }

    fn native_from_counts(&self, counts: &AxisArray<i32>) -> Result<(Xyz, f32), KinematicsError> {
        let mm = self.settings.mm_per_step();
        let actuators = Xyz::new(
            counts[0] as f32 * mm[0],
            counts[1] as f32 * mm[1],
            counts[2] as f32 * mm[2],
        );
        let native = self.settings.config().kinematics.forward(actuators)?;
        Ok((native, counts[3] as f32 * mm[3]))
    }

    /// Planner position from the step counters. The ring must be empty.
    fn resync(&mut self) -> Result<(), KinematicsError> {
        let counts = self.queue.counts();
        let (native, e) = self.native_from_counts(&counts)?;
        self.position = counts;
        self.native = native;
        self.current = self.to_logical(native, e);
        self.junction.reset();
        debug!("planner position taken from counters {:?}", counts);
        Ok(())
    }

    fn place(&mut self, position: &Position) -> Result<(), KinematicsError> {
        if !position.is_finite() {
            return Err(KinematicsError::Degenerate);
        }
        let native = self.to_native(position);
        let actuators = self.settings.config().kinematics.inverse(native)?;
        let steps = self.to_steps(actuators, position.e);

        let mut block = Block::sync(steps);
        loop {
            match self.queue.push(block, Profile::default()) {
                Ok(counter) => {
                    self.plan[slot::<N>(counter)] = PlanState::default();
                    break;
                }
                Err(returned) => {
                    block = returned;
                    self.background.idle();
                }
            }
        }

        self.position = steps;
        self.native = native;
        self.current = *position;
        self.junction.reset();
        Ok(())
    }

    fn push_blocking(
        &mut self,
        target: &Position,
        feedrate: f32,
        extruder: u8,
        flags: BlockFlags,
    ) -> Result<(), MotionError> {
        loop {
            match self.push_segment(target, feedrate, extruder, flags) {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => self.background.idle(),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    fn ready(&mut self) -> nb::Result<(), MotionError> {
        if self.queue.abort_pending() {
            return Err(nb::Error::WouldBlock);
        }
        if self.queue.resync_pending() {
            if !self.queue.is_empty() {
                return Err(nb::Error::WouldBlock);
            }
            self.queue.take_resync();
            self.resync().map_err(MotionError::from)?;
        }
        if self.queue.is_full() {
            return Err(nb::Error::WouldBlock);
        }
        Ok(())
    }

    fn push_segment(
        &mut self,
        target: &Position,
        feedrate: f32,
        extruder: u8,
        flags: BlockFlags,
    ) -> nb::Result<(), MotionError> {
        self.ready()?;

        let native = self.to_native(target);
        self.check_soft_limits(native)?;
        let actuators = self
            .settings
            .config()
            .kinematics
            .inverse(native)
            .map_err(MotionError::from)?;
        let steps = self.to_steps(actuators, target.e);
        self.current = *target;

        let Some((block, segment)) = self.build_block(steps, native, feedrate, extruder, flags)
        else {
            trace!("move to {:?} dropped, too short", steps);
            return Ok(());
        };

        let moves_queued = !self.queue.is_empty();
        let cornering = self.settings.cornering();
        let vmax = self.junction.max_entry_speed(
            &cornering,
            &self.settings.config().max_acceleration,
            moves_queued,
            &segment,
        );
        let v_allowable =
            max_allowable_speed(-block.acceleration, MINIMUM_PLANNER_SPEED, block.millimeters);
        let state = PlanState {
            entry_speed: vmax.min(v_allowable),
            max_entry_speed: vmax,
            nominal_length: block.nominal_speed <= v_allowable,
            recalculate: true,
        };

        let profile = Profile::safe(&block, MINIMUM_PLANNER_SPEED);
        let counter = self
            .queue
            .push(block, profile)
            .map_err(|_| nb::Error::WouldBlock)?;
        self.plan[slot::<N>(counter)] = state;
        self.position = steps;
        self.native = native;

        self.recalculate();
        Ok(())
    }

    /// Step counts, speeds and acceleration of a move from the newest
    /// queued position. `None` when the move is too short to queue.
    fn build_block(
        &self,
        target: AxisArray<i32>,
        native: Xyz,
        feedrate: f32,
        extruder: u8,
        flags: BlockFlags,
    ) -> Option<(Block, Segment)> {
        let config = self.settings.config();
        let mm_per_step = self.settings.mm_per_step();

        let mut delta: AxisArray<i32> = core::array::from_fn(|i| target[i] - self.position[i]);
        let e = Axis::E.index();
        delta[e] = roundf(delta[e] as f32 * self.flow[extruder as usize]) as i32;

        let mut block = Block {
            flags,
            extruder,
            position: target,
            ..Default::default()
        };
        for axis in Axis::ALL {
            let d = delta[axis.index()];
            if d < 0 {
                block.direction.insert(axis);
            }
            block.steps[axis.index()] = d.unsigned_abs();
        }
        block.step_event_count = block.steps.iter().copied().max().unwrap_or(0);
        if block.step_event_count == 0 || block.step_event_count < config.min_steps_per_segment {
            return None;
        }

        let delta_mm: AxisArray<f32> = core::array::from_fn(|i| delta[i] as f32 * mm_per_step[i]);
        let min_steps = config.min_steps_per_segment.max(1);
        let linear_steps = &block.steps[..Axis::E.index()];
        let e_only = linear_steps.iter().all(|s| *s < min_steps);
        let millimeters = if e_only {
            fabsf(delta_mm[e])
        } else if config.kinematics.is_cartesian() {
            sqrtf(delta_mm[..e].iter().map(|d| d * d).sum())
        } else {
            self.native.distance(&native)
        };
        if !(millimeters > 0.0) {
            return None;
        }
        block.millimeters = millimeters;

        let extruding = delta[e] != 0;
        let mut feedrate = feedrate * self.queue.shared().feedrate_scale();
        feedrate = feedrate.max(if extruding {
            config.min_feedrate
        } else {
            config.min_travel_feedrate
        });
        if !(feedrate > 0.0) {
            return None;
        }

        let mut inverse_mm_s = feedrate / millimeters;
        let moves_queued = self.queue.len();
        if moves_queued > 1 && moves_queued < N / 2 {
            // slow down short segments while the ring is running dry
            let segment_time_us = roundf(1_000_000.0 / inverse_mm_s) as u32;
            if segment_time_us < config.min_segment_time_us {
                let padding = 2.0 * (config.min_segment_time_us - segment_time_us) as f32
                    / moves_queued as f32;
                inverse_mm_s = 1_000_000.0 / (segment_time_us as f32 + roundf(padding));
            }
        }

        block.nominal_speed = millimeters * inverse_mm_s;
        block.nominal_rate = ceilf(block.step_event_count as f32 * inverse_mm_s) as u32;

        let mut speed: AxisArray<f32> = core::array::from_fn(|i| delta_mm[i] * inverse_mm_s);
        let mut speed_factor = 1.0f32;
        for (s, max) in speed.iter().zip(&config.max_feedrate) {
            let cs = fabsf(*s);
            if cs > *max {
                speed_factor = speed_factor.min(max / cs);
            }
        }
        if speed_factor < 1.0 {
            speed.iter_mut().for_each(|s| *s *= speed_factor);
            block.nominal_speed *= speed_factor;
            block.nominal_rate = (block.nominal_rate as f32 * speed_factor) as u32;
        }
        block.nominal_rate = block.nominal_rate.max(1);

        let steps_per_mm = block.step_event_count as f32 / millimeters;
        let linear_idle = linear_steps.iter().all(|s| *s == 0);
        let mut accel: u64;
        if linear_idle {
            accel = ceilf(config.retract_acceleration * steps_per_mm) as u64;
        } else {
            let base = if extruding {
                config.acceleration
            } else {
                config.travel_acceleration
            };
            accel = ceilf(base * steps_per_mm) as u64;

            if let Some(advance) = config.advance {
                let e_d_ratio = delta_mm[e] / millimeters;
                if advance.k > 0.0 && delta[e] > 0 && e_d_ratio <= 3.0 {
                    let limit = advance.max_e_jerk / (advance.k * e_d_ratio) * steps_per_mm;
                    accel = accel.min(limit as u64);
                    block.advance = Some(Advance {
                        comp: e_d_ratio * advance.k * config.steps_per_unit[e],
                        interval: 0,
                    });
                }
            }

            let max_steps = self.settings.max_acceleration_steps();
            for (steps, max) in block.steps.iter().zip(max_steps) {
                let (steps, max) = (*steps as u64, *max as u64);
                if steps > 0 && max < accel {
                    let comp = max * block.step_event_count as u64;
                    if accel * steps > comp {
                        accel = comp / steps;
                    }
                }
            }
        }
        let accel = accel.clamp(1, u32::MAX as u64) as u32;
        block.acceleration_steps_per_s2 = accel;
        block.acceleration = accel as f32 / steps_per_mm;

        if let Some(advance) = block.advance.as_mut() {
            let lead_rate = advance.comp * block.acceleration;
            advance.interval = if lead_rate > 0.0 {
                ((STEPPER_TIMER_RATE as f32 / lead_rate) as u32).max(1)
            } else {
                u32::MAX
            };
        }

        let unit = core::array::from_fn(|i| delta_mm[i] / millimeters);
        let segment = Segment {
            speed,
            unit,
            nominal_speed: block.nominal_speed,
            acceleration: block.acceleration,
            millimeters,
        };
        Some((block, segment))
    }

    fn recalculate(&mut self) {
        for _ in 0..=N {
            if self.recalculate_once() {
                return;
            }
        }
        warn!("replanning kept racing the stepper, profiles left as they are");
    }

    /// One reverse, forward and trapezoid pass over the blocks the stepper
    /// has not started. False when the stepper started a block during the
    /// pass, which then has to be redone around it.
    fn recalculate_once(&mut self) -> bool {
        let head = self.queue.head();
        let tail = self.queue.tail();
        if head == tail {
            return true;
        }

        let mut first = tail;
        let mut pinned = false;
        if self.queue.is_busy(tail) {
            first = tail.wrapping_add(1);
            if first == head {
                return true;
            }
            self.pin_entry(tail, first);
            pinned = true;
        }

        self.reverse_pass(if pinned { first.wrapping_add(1) } else { first }, head);
        self.forward_pass(first, head);
        self.recalculate_trapezoids(first, head)
    }

    /// The running block cannot change, so the block after it enters at
    /// whatever speed the running one leaves with.
    fn pin_entry(&mut self, running: usize, next: usize) {
        let block = *self.queue.block(running);
        let exit = if block.is_sync() {
            0.0
        } else {
            block.speed_at(self.queue.profile(running).final_rate)
        };
        let state = &mut self.plan[slot::<N>(next)];
        state.entry_speed = exit.min(state.max_entry_speed);
        state.recalculate = true;
    }

    fn reverse_pass(&mut self, from: usize, head: usize) {
        let mut next_entry = MINIMUM_PLANNER_SPEED;
        let mut counter = head;
        while counter != from {
            counter = counter.wrapping_sub(1);
            let block = self.queue.block(counter);
            if block.is_sync() {
                // motion before a sync block comes to rest
                next_entry = MINIMUM_PLANNER_SPEED;
                continue;
            }
            let (acceleration, millimeters) = (block.acceleration, block.millimeters);
            let state = &mut self.plan[slot::<N>(counter)];
            if state.entry_speed != state.max_entry_speed {
                state.entry_speed = if state.nominal_length || state.max_entry_speed <= next_entry
                {
                    state.max_entry_speed
                } else {
                    state
                        .max_entry_speed
                        .min(max_allowable_speed(-acceleration, next_entry, millimeters))
                };
                state.recalculate = true;
            }
            next_entry = state.entry_speed;
        }
    }

    fn forward_pass(&mut self, first: usize, head: usize) {
        let mut previous = first;
        let mut counter = first.wrapping_add(1);
        while counter != head {
            let prev_block = self.queue.block(previous);
            if !prev_block.is_sync() && !self.queue.block(counter).is_sync() {
                let prev = self.plan[slot::<N>(previous)];
                let (acceleration, millimeters) = (prev_block.acceleration, prev_block.millimeters);
                let state = &mut self.plan[slot::<N>(counter)];
                if !prev.nominal_length && prev.entry_speed < state.entry_speed {
                    let entry = state.entry_speed.min(max_allowable_speed(
                        -acceleration,
                        prev.entry_speed,
                        millimeters,
                    ));
                    if entry != state.entry_speed {
                        state.entry_speed = entry;
                        state.recalculate = true;
                    }
                }
            }
            previous = counter;
            counter = counter.wrapping_add(1);
        }
    }

    fn recalculate_trapezoids(&mut self, first: usize, head: usize) -> bool {
        let mut counter = first;
        while counter != head {
            let next = counter.wrapping_add(1);
            let block = *self.queue.block(counter);
            let i = slot::<N>(counter);
            if block.is_sync() {
                self.plan[i].recalculate = false;
                counter = next;
                continue;
            }

            let (exit, next_changed) = if next == head {
                (MINIMUM_PLANNER_SPEED, true)
            } else if self.queue.block(next).is_sync() {
                (MINIMUM_PLANNER_SPEED, false)
            } else {
                let state = self.plan[slot::<N>(next)];
                (state.entry_speed, state.recalculate)
            };

            if self.plan[i].recalculate || next_changed {
                let profile = Profile::plan(&block, self.plan[i].entry_speed, exit);
                if self.queue.commit_profile(counter, profile).is_err() {
                    trace!("block {} started while replanning", counter);
                    return false;
                }
                self.plan[i].recalculate = false;
            }
            counter = next;
        }
        true
    }
}

impl<'a, M: RawMutex, B: Background, const N: usize> SegmentSink for Planner<'a, M, B, N> {
    fn position(&self) -> Position {
        self.current
    }

    fn push_line(
        &mut self,
        target: &Position,
        feedrate: f32,
        extruder: u8,
        continued: bool,
    ) -> Result<(), MotionError> {
        let flags = if continued {
            BlockFlags::CONTINUED
        } else {
            BlockFlags::NONE
        };
        self.push_blocking(target, feedrate, extruder, flags)
    }
}

const fn slot<const N: usize>(counter: usize) -> usize {
    counter & (N - 1)
}
