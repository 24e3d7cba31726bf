//! Step generation.
//!
//! [`Stepper::isr`] is the body of the step timer interrupt. It runs three
//! timelines on one timer: the main tick walks the oldest block with a
//! Bresenham loop and paces itself along the block's speed profile, the
//! advance tick moves extruder lead steps, and shaped axes release their
//! delayed step fractions. Each call schedules the timer for whichever of
//! them is due first.

mod advance;
mod shaping;
mod timing;

pub use timing::{calc_timer_interval, s_curve, DOUBLE_STEP_FREQUENCY, MAX_STEP_FREQUENCY};

use crate::{
    axis::{Axis, AxisArray, NUM_AXES},
    block::{Block, Profile},
    config::{Settings, SpeedProfile},
    hal::{Pins, StepperHal},
    shared::{Consumer, MotionEvent},
    Duration, STEPPER_TIMER_RATE,
};
use advance::LinearAdvance;
use embassy_sync::blocking_mutex::raw::RawMutex;
use shaping::Shaper;

/// Tick period while there is nothing to run.
pub const IDLE_INTERVAL: u32 = STEPPER_TIMER_RATE / 1000;

pub(crate) const NEVER: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Accelerating,
    Cruising,
    Decelerating,
    /// No block running.
    Done,
}

/// Step pins and the counters that follow them. A step is counted when
/// it reaches its pin, so the counters are where the motors are.
#[derive(Debug, Default)]
struct Output {
    pins: Pins,
    counts: AxisArray<i32>,
    dirty: bool,
    extruder: u8,
}

impl Output {
    fn step<H: StepperHal>(&mut self, hal: &mut H, axis: Axis, forward: bool) {
        self.pins.step(hal, axis, forward);
        self.counts[axis.index()] += if forward { 1 } else { -1 };
        self.dirty = true;
    }

    fn select_extruder<H: StepperHal>(&mut self, hal: &mut H, extruder: u8) {
        hal.select_extruder(extruder);
        self.pins.forget(Axis::E);
        self.extruder = extruder;
        debug!("stepping extruder {}", extruder);
    }
}

#[derive(Debug)]
struct Running {
    block: Block,
    profile: Profile,
    counters: AxisArray<i32>,
    completed: u32,
    /// Steps per interrupt at the current rate.
    loops: u8,
    acceleration_time: u32,
    deceleration_time: u32,
    /// Rate reached at the end of acceleration.
    acc_step_rate: u32,
    nominal: (u32, u8),
}

/// Interrupt half of the motion core. Owns the consumer end of the ring.
pub struct Stepper<'a, M: RawMutex, const N: usize> {
    queue: Consumer<'a, M, N>,
    profile: SpeedProfile,
    out: Output,
    running: Option<Running>,
    phase: Phase,
    advance: LinearAdvance,
    shaper: Shaper,
    /// Ticks until the main tick.
    next_main: u32,
    /// Free-running timer position.
    now: u32,
}

impl<'a, M: RawMutex, const N: usize> Stepper<'a, M, N> {
    /// Start from the published step counters. Stepping options are taken
    /// from `settings` once.
    pub fn new(queue: Consumer<'a, M, N>, settings: &Settings) -> Self {
        let config = settings.config();
        let counts = queue.load_counts();
        Self {
            queue,
            profile: config.speed_profile,
            out: Output {
                counts,
                ..Default::default()
            },
            running: None,
            phase: Phase::Done,
            advance: LinearAdvance::new(),
            shaper: Shaper::new(config.shaping_x, config.shaping_y),
            next_main: 0,
            now: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Steps that reached the pins, per axis, from the last sync block
    /// position on.
    pub fn counts(&self) -> AxisArray<i32> {
        self.out.counts
    }

    /// Nothing running, nothing queued and no delayed steps left.
    pub fn is_idle(&self) -> bool {
        self.running.is_none()
            && self.queue.is_empty()
            && self.shaper.is_idle()
            && self.advance.is_idle()
    }

    pub fn isr<H: StepperHal>(&mut self, hal: &mut H) {
        if self.queue.abort_requested() {
            self.abort();
            self.next_main = IDLE_INTERVAL;
            self.now = self.now.wrapping_add(IDLE_INTERVAL);
            self.publish();
            hal.schedule_next_tick(Duration::from_ticks(IDLE_INTERVAL));
            return;
        }

        if self.next_main == 0 {
            self.next_main = self.main_tick(hal);
        }

        if self.advance.next == 0 {
            let (completed, loops) = self
                .running
                .as_ref()
                .map_or((u32::MAX, 1), |r| (r.completed, r.loops));
            let out = &mut self.out;
            self.advance
                .tick(completed, loops, |forward| out.step(hal, Axis::E, forward));
        }

        let now = self.now;
        let out = &mut self.out;
        self.shaper
            .service(now, |axis, forward| out.step(hal, axis, forward));

        let delay = self
            .next_main
            .min(self.advance.next)
            .min(self.shaper.next_due(now))
            .max(1);
        self.next_main -= delay.min(self.next_main);
        if self.advance.next != NEVER {
            self.advance.next -= delay.min(self.advance.next);
        }
        self.now = now.wrapping_add(delay);

        self.publish();
        hal.schedule_next_tick(Duration::from_ticks(delay));
    }

    fn publish(&mut self) {
        if self.out.dirty {
            self.queue.publish_counts(&self.out.counts);
            self.out.dirty = false;
        }
        let settled = self.running.is_none() && self.shaper.is_idle() && self.advance.is_idle();
        self.queue.set_settled(settled);
    }

    /// Run the oldest block for one interrupt. Returns the ticks until the
    /// next main tick.
    fn main_tick<H: StepperHal>(&mut self, hal: &mut H) -> u32 {
        let mut run = match self.running.take().or_else(|| self.load(hal)) {
            Some(run) => run,
            None => {
                self.phase = Phase::Done;
                self.advance.settle();
                return IDLE_INTERVAL;
            }
        };

        if self.queue.endstops_enabled() {
            let block = &run.block;
            let hit = Axis::LINEAR.into_iter().find(|axis| {
                block.steps[axis.index()] > 0
                    && hal.endstop_hit(*axis, !block.direction.contains(*axis))
            });
            if let Some(axis) = hit {
                self.endstop_stop(axis);
                return IDLE_INTERVAL;
            }
        }

        let count = run.block.step_event_count;
        for _ in 0..run.loops {
            for axis in Axis::ALL {
                let i = axis.index();
                run.counters[i] += run.block.steps[i] as i32;
                if run.counters[i] > 0 {
                    run.counters[i] -= count as i32;
                    self.route(hal, &run.block, axis);
                }
            }
            run.completed += 1;
            if run.completed >= count {
                break;
            }
        }

        let interval = self.interval(&mut run);
        if run.completed >= count {
            self.queue.release();
        } else {
            self.running = Some(run);
        }
        interval
    }

    /// Send one Bresenham step to the pin, the extruder lead queue or the
    /// shaper.
    fn route<H: StepperHal>(&mut self, hal: &mut H, block: &Block, axis: Axis) {
        let forward = !block.direction.contains(axis);
        if axis == Axis::E && block.advance.is_some() {
            self.advance.queue_step(forward);
        } else if self.shaper.shapes(axis) {
            let out = &mut self.out;
            self.shaper
                .step(axis, forward, self.now, |a, f| out.step(hal, a, f));
        } else {
            self.out.step(hal, axis, forward);
        }
    }

    /// Interval to the next main tick, from where `run` is on its profile.
    fn interval(&mut self, run: &mut Running) -> u32 {
        let p = run.profile;
        let previous = self.phase;
        let lead = run.block.advance.map(|a| a.interval);

        let (phase, interval) = if run.completed <= p.accelerate_until {
            let rate = match self.profile {
                SpeedProfile::Trapezoid => {
                    let gained = (run.acceleration_time as u64
                        * run.block.acceleration_steps_per_s2 as u64
                        / STEPPER_TIMER_RATE as u64) as u32;
                    p.initial_rate.saturating_add(gained).min(p.cruise_rate)
                }
                SpeedProfile::SCurve => s_curve(
                    p.initial_rate,
                    p.cruise_rate,
                    run.acceleration_time,
                    p.acceleration_time,
                ),
            };
            run.acc_step_rate = rate;
            let (interval, loops) = calc_timer_interval(rate);
            run.loops = loops;
            run.acceleration_time = run.acceleration_time.saturating_add(interval);
            (Phase::Accelerating, interval)
        } else if run.completed > p.decelerate_after {
            let rate = match self.profile {
                SpeedProfile::Trapezoid => {
                    let lost = (run.deceleration_time as u64
                        * run.block.acceleration_steps_per_s2 as u64
                        / STEPPER_TIMER_RATE as u64) as u32;
                    run.acc_step_rate.saturating_sub(lost).max(p.final_rate)
                }
                SpeedProfile::SCurve => s_curve(
                    run.acc_step_rate,
                    p.final_rate,
                    run.deceleration_time,
                    p.deceleration_time,
                ),
            };
            let (interval, loops) = calc_timer_interval(rate);
            run.loops = loops;
            run.deceleration_time = run.deceleration_time.saturating_add(interval);
            (Phase::Decelerating, interval)
        } else {
            let (interval, loops) = run.nominal;
            run.loops = loops;
            (Phase::Cruising, interval)
        };

        match (phase, lead) {
            (Phase::Cruising, _) | (_, None) => self.advance.stop_lead(),
            (_, Some(rate)) => {
                let pending = self.advance.has_pending() && self.advance.rate() != rate;
                if phase != previous || pending {
                    self.advance.request(rate);
                }
            }
        }
        self.phase = phase;
        interval
    }

    /// Start the next block with steps. Sync blocks on the way are applied
    /// once the delayed steps of earlier moves are out, and a block for
    /// another extruder waits for the lead of the current one.
    fn load<H: StepperHal>(&mut self, hal: &mut H) -> Option<Running> {
        loop {
            let block = self.queue.front()?;
            if block.is_sync() {
                if !(self.shaper.is_idle() && self.advance.is_idle()) {
                    return None;
                }
                self.out.counts = block.position;
                self.out.dirty = true;
                self.queue.take();
                self.queue.release();
                trace!("step counters set to {:?}", block.position);
                continue;
            }

            if block.step_event_count == 0 {
                self.queue.take();
                self.queue.release();
                continue;
            }
            if block.extruder != self.out.extruder {
                if !self.advance.is_idle() {
                    return None;
                }
                self.out.select_extruder(hal, block.extruder);
            }

            let (block, profile) = self.queue.take()?;

            self.advance.start_block(&block, &profile);
            let (acceleration_time, loops) = calc_timer_interval(profile.initial_rate);
            let half = (block.step_event_count >> 1) as i32;
            self.phase = Phase::Done;
            return Some(Running {
                block,
                profile,
                counters: [-half; NUM_AXES],
                completed: 0,
                loops,
                acceleration_time,
                deceleration_time: 0,
                acc_step_rate: profile.cruise_rate,
                nominal: calc_timer_interval(profile.cruise_rate),
            });
        }
    }

    /// Stop stepping. Delayed steps that never reached a pin are dropped
    /// and were never counted.
    fn halt(&mut self) {
        self.running = None;
        self.phase = Phase::Done;
        self.advance.reset();
        self.shaper.reset();
        self.queue.publish_counts(&self.out.counts);
        self.out.dirty = false;
    }

    fn abort(&mut self) {
        let discarded = self.queue.discard_all();
        self.halt();
        let counts = self.out.counts;
        self.queue.signal(MotionEvent::Aborted { discarded, counts });
        self.queue.ack_abort();
        info!("motion aborted, {} blocks dropped", discarded);
    }

    /// Stop the running block where it is, along with the rest of the move
    /// it belongs to.
    fn endstop_stop(&mut self, axis: Axis) {
        self.halt();
        self.queue.set_resync();
        self.queue.release();
        let discarded = 1 + self.queue.discard_continued();
        let counts = self.out.counts;
        self.queue.signal(MotionEvent::EndstopHit {
            axis,
            discarded,
            counts,
        });
        warn!("endstop hit on {:?} at {:?}", axis, counts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::Advance,
        config::{MachineConfig, ShaperConfig},
        shared::MotionShared,
    };
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type Shared = MotionShared<CriticalSectionRawMutex, 16>;

    #[derive(Default)]
    struct Hal {
        steps: AxisArray<i32>,
        forward: AxisArray<bool>,
        delays: Vec<u32>,
        /// X position at every Y step.
        y_steps_at: Vec<i32>,
        endstop_at: Option<i32>,
        extruder: u8,
        selected: Vec<u8>,
        e_by_extruder: [i32; 4],
    }

    impl StepperHal for Hal {
        fn set_step_pin(&mut self, axis: Axis, level: bool) {
            if !level {
                return;
            }
            let i = axis.index();
            self.steps[i] += if self.forward[i] { 1 } else { -1 };
            if axis == Axis::Y {
                self.y_steps_at.push(self.steps[0]);
            }
            if axis == Axis::E {
                self.e_by_extruder[self.extruder as usize] += if self.forward[i] { 1 } else { -1 };
            }
        }

        fn select_extruder(&mut self, extruder: u8) {
            self.extruder = extruder;
            self.selected.push(extruder);
            // the new driver's direction pin was never written
            self.forward[Axis::E.index()] = false;
        }

        fn set_direction_pin(&mut self, axis: Axis, forward: bool) {
            self.forward[axis.index()] = forward;
        }

        fn schedule_next_tick(&mut self, delay: Duration) {
            self.delays.push(delay.ticks());
        }

        fn endstop_hit(&mut self, axis: Axis, toward_max: bool) -> bool {
            axis == Axis::X && toward_max && self.endstop_at.is_some_and(|at| self.steps[0] >= at)
        }
    }

    fn block(steps: AxisArray<u32>) -> Block {
        let count = steps.into_iter().max().unwrap_or(0);
        Block {
            steps,
            step_event_count: count,
            nominal_rate: 4000,
            nominal_speed: 50.0,
            millimeters: count as f32 / 80.0,
            acceleration: 3000.0,
            acceleration_steps_per_s2: 240_000,
            ..Default::default()
        }
    }

    fn push(producer: &mut crate::shared::Producer<'_, CriticalSectionRawMutex, 16>, block: Block) {
        let profile = Profile::plan(&block, 0.0, 0.0);
        assert!(producer.push(block, profile).is_ok());
    }

    fn settings() -> Settings {
        MachineConfig::default().validate().unwrap()
    }

    fn run<M: RawMutex, const N: usize>(stepper: &mut Stepper<'_, M, N>, hal: &mut Hal) {
        for _ in 0..100_000 {
            stepper.isr(hal);
            if stepper.is_idle() {
                return;
            }
        }
        panic!("stepper never went idle");
    }

    #[test]
    fn a_block_runs_to_completion() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal::default();

        push(&mut producer, block([800, 0, 0, 0]));
        run(&mut stepper, &mut hal);

        assert_eq!(hal.steps, [800, 0, 0, 0]);
        assert_eq!(stepper.counts(), [800, 0, 0, 0]);
        assert_eq!(producer.counts(), [800, 0, 0, 0]);
        assert!(producer.is_empty());

        // cruise at 4000 steps/s, never slower than the minimum rate
        assert!(hal.delays.contains(&500));
        assert!(hal.delays.iter().all(|d| *d <= STEPPER_TIMER_RATE / 120));
    }

    #[test]
    fn negative_moves_count_down() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal::default();

        let mut b = block([0, 0, 120, 0]);
        b.direction.insert(Axis::Z);
        push(&mut producer, b);
        run(&mut stepper, &mut hal);
        assert_eq!(stepper.counts(), [0, 0, -120, 0]);
        assert_eq!(hal.steps, [0, 0, -120, 0]);
    }

    #[test]
    fn axes_arrive_together() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal::default();

        push(&mut producer, block([800, 200, 0, 0]));
        run(&mut stepper, &mut hal);

        assert_eq!(hal.y_steps_at.len(), 200);
        assert_eq!(hal.y_steps_at[99], 399);
        assert!(*hal.y_steps_at.last().unwrap() >= 796);
    }

    #[test]
    fn phases_follow_the_profile() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal::default();

        push(&mut producer, block([800, 0, 0, 0]));
        let mut phases = vec![stepper.phase()];
        while !stepper.is_idle() || phases.len() == 1 {
            stepper.isr(&mut hal);
            if phases.last() != Some(&stepper.phase()) {
                phases.push(stepper.phase());
            }
        }
        // the next main tick finds nothing to load
        for _ in 0..3 {
            stepper.isr(&mut hal);
        }
        if phases.last() != Some(&stepper.phase()) {
            phases.push(stepper.phase());
        }
        assert_eq!(
            phases,
            [
                Phase::Done,
                Phase::Accelerating,
                Phase::Cruising,
                Phase::Decelerating,
                Phase::Done
            ]
        );
    }

    #[test]
    fn s_curve_runs_the_same_steps() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let config = MachineConfig {
            speed_profile: SpeedProfile::SCurve,
            ..Default::default()
        };
        let mut stepper = Stepper::new(consumer, &config.validate().unwrap());
        let mut hal = Hal::default();

        push(&mut producer, block([800, 400, 0, 0]));
        push(&mut producer, block([40, 0, 0, 0]));
        run(&mut stepper, &mut hal);
        assert_eq!(hal.steps, [840, 400, 0, 0]);
        assert!(hal.delays.contains(&500));
    }

    #[test]
    fn sync_blocks_load_the_counters() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal::default();

        producer
            .push(Block::sync([10, 20, 30, 40]), Profile::default())
            .unwrap();
        push(&mut producer, block([80, 0, 0, 0]));
        run(&mut stepper, &mut hal);

        assert_eq!(stepper.counts(), [90, 20, 30, 40]);
        assert_eq!(producer.counts(), [90, 20, 30, 40]);
        assert_eq!(hal.steps, [80, 0, 0, 0]);
    }

    #[test]
    fn abort_drops_everything() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal::default();

        for _ in 0..3 {
            push(&mut producer, block([800, 0, 0, 0]));
        }
        for _ in 0..50 {
            stepper.isr(&mut hal);
        }
        producer.request_abort();
        stepper.isr(&mut hal);

        assert!(producer.is_empty());
        assert!(!producer.abort_pending());
        assert_eq!(stepper.phase(), Phase::Done);
        assert!(stepper.is_idle());
        match producer.try_take_event() {
            Some(MotionEvent::Aborted { discarded, counts }) => {
                assert_eq!(discarded, 3);
                assert_eq!(counts, hal.steps);
                assert!(counts[0] > 0 && counts[0] < 800);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(producer.counts(), hal.steps);
    }

    #[test]
    fn endstop_cuts_the_move_short() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal {
            endstop_at: Some(100),
            ..Default::default()
        };

        push(&mut producer, block([800, 0, 0, 0]));
        let mut continued = block([800, 0, 0, 0]);
        continued.flags = crate::block::BlockFlags::CONTINUED;
        push(&mut producer, continued);
        let mut back = block([0, 80, 0, 0]);
        back.direction.insert(Axis::Y);
        push(&mut producer, back);
        producer.set_endstops_enabled(true);

        let event = loop {
            stepper.isr(&mut hal);
            if let Some(event) = producer.try_take_event() {
                break event;
            }
        };
        assert_eq!(
            event,
            MotionEvent::EndstopHit {
                axis: Axis::X,
                discarded: 2,
                counts: [100, 0, 0, 0],
            }
        );
        assert!(producer.resync_pending());
        assert_eq!(producer.len(), 1);

        run(&mut stepper, &mut hal);
        assert_eq!(hal.steps, [100, -80, 0, 0]);
    }

    #[test]
    fn extruder_lead_is_returned() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal::default();

        let b = Block {
            advance: Some(Advance {
                comp: 0.1,
                interval: 200,
            }),
            ..block([800, 0, 0, 40])
        };
        push(&mut producer, b);
        run(&mut stepper, &mut hal);
        assert_eq!(hal.steps, [800, 0, 0, 40]);
        assert_eq!(stepper.counts(), [800, 0, 0, 40]);
    }

    #[test]
    fn shaped_axes_keep_their_step_count() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let config = MachineConfig {
            shaping_x: Some(ShaperConfig::default()),
            ..Default::default()
        };
        let mut stepper = Stepper::new(consumer, &config.validate().unwrap());
        let mut hal = Hal::default();

        push(&mut producer, block([800, 300, 0, 0]));
        let mut back = block([200, 0, 0, 0]);
        back.direction.insert(Axis::X);
        push(&mut producer, back);
        run(&mut stepper, &mut hal);
        assert_eq!(hal.steps, [600, 300, 0, 0]);
        assert_eq!(stepper.counts(), [600, 300, 0, 0]);
    }

    fn abort_after<M: RawMutex, const N: usize>(
        stepper: &mut Stepper<'_, M, N>,
        producer: &mut crate::shared::Producer<'_, M, N>,
        hal: &mut Hal,
        ticks: usize,
    ) -> AxisArray<i32> {
        for _ in 0..ticks {
            stepper.isr(hal);
        }
        producer.request_abort();
        stepper.isr(hal);
        match producer.try_take_event() {
            Some(MotionEvent::Aborted { counts, .. }) => counts,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn abort_while_shaping_counts_what_reached_the_pins() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let config = MachineConfig {
            shaping_x: Some(ShaperConfig {
                frequency: 40.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut stepper = Stepper::new(consumer, &config.validate().unwrap());
        let mut hal = Hal::default();

        push(&mut producer, block([800, 0, 0, 0]));
        let counts = abort_after(&mut stepper, &mut producer, &mut hal, 400);

        assert!(hal.steps[0] > 0 && hal.steps[0] < 800);
        assert_eq!(counts, hal.steps);
        assert_eq!(stepper.counts(), hal.steps);
        assert_eq!(producer.counts(), hal.steps);
        assert!(stepper.is_idle());

        // nothing trickles out after the stop
        for _ in 0..100 {
            stepper.isr(&mut hal);
        }
        assert_eq!(producer.counts(), hal.steps);
    }

    #[test]
    fn abort_with_extruder_lead_counts_what_reached_the_pins() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal::default();

        let b = Block {
            advance: Some(Advance {
                comp: 2.0,
                interval: 100,
            }),
            ..block([800, 0, 0, 400])
        };
        push(&mut producer, b);
        let counts = abort_after(&mut stepper, &mut producer, &mut hal, 60);

        assert!(hal.steps[3] > 0);
        assert_eq!(counts, hal.steps);
        assert_eq!(producer.counts(), hal.steps);
    }

    #[test]
    fn endstop_while_shaping_counts_what_reached_the_pins() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let config = MachineConfig {
            shaping_x: Some(ShaperConfig::default()),
            ..Default::default()
        };
        let mut stepper = Stepper::new(consumer, &config.validate().unwrap());
        let mut hal = Hal {
            endstop_at: Some(150),
            ..Default::default()
        };

        push(&mut producer, block([800, 0, 0, 0]));
        producer.set_endstops_enabled(true);
        let counts = loop {
            stepper.isr(&mut hal);
            if let Some(MotionEvent::EndstopHit { counts, .. }) = producer.try_take_event() {
                break counts;
            }
        };
        assert_eq!(counts, hal.steps);
        assert_eq!(producer.counts(), hal.steps);
    }

    #[test]
    fn each_extruder_steps_its_own_driver() {
        let mut shared = Shared::new();
        let (mut producer, consumer) = shared.split();
        let mut stepper = Stepper::new(consumer, &settings());
        let mut hal = Hal::default();

        let extrude = Block {
            advance: Some(Advance {
                comp: 0.5,
                interval: 200,
            }),
            ..block([400, 0, 0, 40])
        };
        push(&mut producer, extrude);
        let mut other = block([400, 0, 0, 30]);
        other.extruder = 2;
        push(&mut producer, other);
        push(&mut producer, block([0, 80, 0, 0]));
        run(&mut stepper, &mut hal);

        // the lead of extruder 0 is back before extruder 2 starts
        assert_eq!(hal.selected, [2, 0]);
        assert_eq!(hal.e_by_extruder, [40, 0, 30, 0]);
        assert_eq!(stepper.counts(), [800, 80, 0, 70]);
    }
}
