//! Planner and stepper run together: the planner's idle callback stands in
//! for the step timer interrupt.

use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use kinematics::{Delta, DeltaGeometry, Kinematics};
use motion::{
    segment::{
        arc::{Arc, ArcCenter, Plane},
        bezier::Bezier,
    },
    AdvanceConfig, Axis, AxisArray, CommandQueue, Duration, MachineConfig, MotionError, MotionEvent,
    MotionShared, Planner, Position, PositionSource, ShaperConfig, Stepper, StepperHal,
    MINIMUM_PLANNER_SPEED,
};

type Shared = MotionShared<CriticalSectionRawMutex, 16>;

#[derive(Default)]
struct Hal {
    steps: AxisArray<i32>,
    forward: AxisArray<bool>,
    /// Axes in the order they stepped, repeats folded.
    order: Vec<Axis>,
    endstop_x: Option<i32>,
}

impl StepperHal for Hal {
    fn set_step_pin(&mut self, axis: Axis, level: bool) {
        if !level {
            return;
        }
        let i = axis.index();
        self.steps[i] += if self.forward[i] { 1 } else { -1 };
        if self.order.last() != Some(&axis) {
            self.order.push(axis);
        }
    }

    fn set_direction_pin(&mut self, axis: Axis, forward: bool) {
        self.forward[axis.index()] = forward;
    }

    fn schedule_next_tick(&mut self, _delay: Duration) {}

    fn endstop_hit(&mut self, axis: Axis, toward_max: bool) -> bool {
        axis == Axis::X && toward_max && self.endstop_x.is_some_and(|at| self.steps[0] >= at)
    }
}

fn at(x: f32, y: f32, z: f32, e: f32) -> Position {
    Position::new(x, y, z, e)
}

fn close(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() <= eps
}

#[test]
fn ten_millimetres_end_where_they_should() {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let config = MachineConfig::default();
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal::default());
    let mut planner = Planner::new(producer, &config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    planner.move_to(&at(10.0, 0.0, 0.0, 0.0), 50.0).unwrap();
    planner.synchronize().unwrap();

    assert_eq!(hal.borrow().steps, [800, 0, 0, 0]);
    assert_eq!(stepper.borrow().counts(), [800, 0, 0, 0]);
    let now = planner.current_position(PositionSource::Realtime).unwrap();
    assert!(close(now.x, 10.0, 1e-4));
    assert_eq!(planner.blocks_queued(), 0);
}

#[test]
fn blocks_run_in_the_order_queued() {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let config = MachineConfig::default();
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal::default());
    let mut planner = Planner::new(producer, &config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    for k in 1..=4 {
        let k = k as f32;
        planner.move_to(&at(k, k - 1.0, 0.1 * (k - 1.0), 0.0), 50.0).unwrap();
        planner.move_to(&at(k, k, 0.1 * (k - 1.0), 0.0), 50.0).unwrap();
        planner.move_to(&at(k, k, 0.1 * k, 0.0), 50.0).unwrap();
    }
    planner.synchronize().unwrap();

    let hal = hal.borrow();
    assert_eq!(hal.order, [Axis::X, Axis::Y, Axis::Z].repeat(4));
    assert_eq!(hal.steps, [320, 320, 1600, 0]);
}

#[test]
fn full_ring_would_block() {
    let mut shared = Shared::new();
    let (producer, _consumer) = shared.split();
    let mut planner = Planner::new(producer, &MachineConfig::default(), || {}).unwrap();

    let mut queued = 0;
    let blocked = loop {
        let x = (queued + 1) as f32;
        match planner.try_buffer_segment(&at(x, 0.0, 0.0, 0.0), 50.0, 0) {
            Ok(()) => queued += 1,
            Err(e) => break e,
        }
    };
    assert_eq!(blocked, nb::Error::WouldBlock);
    assert_eq!(queued, 16);
    assert_eq!(planner.moves_free(), 0);
}

fn quick_stop_with(blocks: usize, ticks: usize) {
    quick_stop_on(&MachineConfig::default(), blocks, ticks);
}

fn quick_stop_on(config: &MachineConfig, blocks: usize, ticks: usize) {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal::default());
    let mut planner = Planner::new(producer, config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    for n in 0..blocks {
        let x = 10.0 * (n + 1) as f32;
        planner
            .try_buffer_segment(&at(x, 0.0, 0.0, 0.5 * (n + 1) as f32), 50.0, 0)
            .unwrap();
    }
    for _ in 0..ticks {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut());
    }

    planner.quick_stop().unwrap();
    assert_eq!(planner.blocks_queued(), 0);
    assert!(stepper.borrow().is_idle());

    let projected = planner.current_position(PositionSource::Projected).unwrap();
    let realtime = planner.current_position(PositionSource::Realtime).unwrap();
    assert_eq!(projected, realtime);
    assert!(close(projected.x, hal.borrow().steps[0] as f32 / 80.0, 1e-4));
    assert!(close(projected.e, hal.borrow().steps[3] as f32 / 500.0, 1e-4));
    if blocks > 0 {
        assert!(projected.x < 10.0 * blocks as f32);
    }

    match planner.poll_event() {
        Some(MotionEvent::Aborted { discarded, counts }) => {
            assert_eq!(discarded, blocks);
            assert_eq!(counts, hal.borrow().steps);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // the planner carries on from where the machine stopped
    planner.move_to(&at(5.0, 0.0, 0.0, 1.0), 50.0).unwrap();
    planner.synchronize().unwrap();
    assert_eq!(hal.borrow().steps[0], 400);
    assert_eq!(hal.borrow().steps[3], 500);
    assert_eq!(stepper.borrow().counts(), hal.borrow().steps);
}

#[test]
fn quick_stop_with_nothing_queued() {
    quick_stop_with(0, 0);
}

#[test]
fn quick_stop_in_the_middle_of_a_block() {
    quick_stop_with(1, 40);
}

#[test]
fn quick_stop_with_a_full_ring() {
    quick_stop_with(16, 300);
}

fn shaped_with_advance() -> MachineConfig {
    MachineConfig {
        advance: Some(AdvanceConfig {
            k: 0.2,
            ..Default::default()
        }),
        shaping_x: Some(ShaperConfig {
            frequency: 40.0,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[test]
fn quick_stop_while_shaping_and_leading() {
    let config = shaped_with_advance();
    quick_stop_on(&config, 1, 400);
    quick_stop_on(&config, 6, 900);
}

#[test]
fn synchronize_waits_for_delayed_steps() {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let config = shaped_with_advance();
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal::default());
    let mut planner = Planner::new(producer, &config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    planner.move_to(&at(10.0, 0.0, 0.0, 0.8), 50.0).unwrap();
    planner.sync_from_steppers().unwrap();
    assert_eq!(hal.borrow().steps, [800, 0, 0, 400]);
    let now = planner.current_position(PositionSource::Realtime).unwrap();
    assert!(close(now.x, 10.0, 1e-4) && close(now.e, 0.8, 1e-4));
}

/// Entry speeds of queued blocks are within their junction limit and both
/// reachable from and reducible to their neighbours.
fn check_junctions<M, B, const N: usize>(planner: &Planner<'_, M, B, N>)
where
    M: embassy_sync::blocking_mutex::raw::RawMutex,
    B: motion::Background,
{
    let queued = planner.blocks_queued();
    let within = |lhs: f32, rhs: f32| lhs <= rhs * 1.001 + 0.01;
    for n in 1..queued {
        let Some(b) = planner.planned(n) else { break };
        assert!(within(b.entry_speed, b.max_entry_speed), "{n}: {b:?}");
        let reach = 2.0 * b.block.acceleration * b.block.millimeters;
        let exit = match planner.planned(n + 1) {
            Some(next) => {
                let (e0, e1) = (b.entry_speed, next.entry_speed);
                assert!(within(e1 * e1, e0 * e0 + reach), "{n}: {e0} -> {e1}");
                e1
            }
            None => MINIMUM_PLANNER_SPEED,
        };
        let e0 = b.entry_speed;
        assert!(within(e0 * e0, exit * exit + reach), "{n}: {e0} -> {exit}");
        let p = b.profile;
        assert!(p.accelerate_until <= p.decelerate_after);
        assert!(p.decelerate_after <= b.block.step_event_count);
    }
}

fn random_moves(config: MachineConfig) {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal::default());
    let mut planner = Planner::new(producer, &config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    let mut seed = 0x1234_5678u32;
    let mut uniform = move || {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (seed >> 8) as f32 / (1u32 << 24) as f32
    };

    let mut target = Position::ORIGIN;
    for _ in 0..120 {
        let (x, y) = (uniform() * 40.0, uniform() * 40.0);
        let extruding = uniform() < 0.5;
        let length = libm::hypotf(x - target.x, y - target.y);
        target = Position {
            x,
            y,
            e: target.e + if extruding { 0.04 * length } else { 0.0 },
            ..target
        };
        let feedrate = 10.0 + uniform() * 190.0;
        planner.move_to(&target, feedrate).unwrap();
        check_junctions(&planner);
    }
    planner.synchronize().unwrap();

    let expected = [
        libm::roundf(target.x * 80.0) as i32,
        libm::roundf(target.y * 80.0) as i32,
        0,
        libm::roundf(target.e * 500.0) as i32,
    ];
    assert_eq!(hal.borrow().steps, expected);
}

#[test]
fn random_moves_keep_junctions_consistent_with_jerk() {
    random_moves(MachineConfig::default());
}

#[test]
fn random_moves_keep_junctions_consistent_with_junction_deviation() {
    random_moves(MachineConfig {
        jerk: None,
        junction_deviation_mm: Some(0.05),
        ..Default::default()
    });
}

#[test]
fn fractional_steps_are_not_lost() {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let mut config = MachineConfig::default();
    config.steps_per_unit[0] = 93.3;
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal::default());
    let mut planner = Planner::new(producer, &config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    for k in 1..=100 {
        planner.move_to(&at(k as f32 * 0.1, 0.0, 0.0, 0.0), 20.0).unwrap();
    }
    planner.synchronize().unwrap();
    assert_eq!(hal.borrow().steps[0], 933);
}

#[test]
fn full_circle_comes_back_to_the_start() {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let config = MachineConfig::default();
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal::default());
    let mut planner = Planner::new(producer, &config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    planner.move_to(&at(20.0, 20.0, 0.0, 0.0), 100.0).unwrap();
    let arc = Arc {
        target: at(20.0, 20.0, 0.0, 1.0),
        center: ArcCenter::Offset([10.0, 0.0]),
        clockwise: false,
        circles: 0,
        plane: Plane::Xy,
    };
    let lines = planner.arc_to(&arc, 40.0, 0).unwrap();
    assert!(lines >= 24, "{lines}");
    planner.synchronize().unwrap();

    assert_eq!(hal.borrow().steps, [1600, 1600, 0, 500]);
    let now = planner.current_position(PositionSource::Realtime).unwrap();
    assert!(close(now.x, 20.0, 1e-4) && close(now.y, 20.0, 1e-4));
}

#[test]
fn bezier_lands_on_its_target() {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let config = MachineConfig::default();
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal::default());
    let mut planner = Planner::new(producer, &config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    let bezier = Bezier {
        target: at(20.0, 10.0, 0.0, 0.0),
        control: [[5.0, 15.0], [-5.0, 5.0]],
    };
    let lines = planner.bezier_to(&bezier, 60.0, 0).unwrap();
    assert!(lines > 1);
    planner.synchronize().unwrap();
    assert_eq!(hal.borrow().steps, [1600, 800, 0, 0]);
}

#[test]
fn endstop_hit_resynchronises_the_planner() {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let config = MachineConfig::default();
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal {
        endstop_x: Some(400),
        ..Default::default()
    });
    let mut planner = Planner::new(producer, &config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    planner.enable_endstops(true);
    planner.move_to(&at(10.0, 0.0, 0.0, 0.0), 30.0).unwrap();
    planner.synchronize().unwrap();

    assert!(matches!(
        planner.poll_event(),
        Some(MotionEvent::EndstopHit { axis: Axis::X, .. })
    ));
    let projected = planner.current_position(PositionSource::Projected).unwrap();
    assert!(close(projected.x, 5.0, 1e-4), "{projected:?}");

    planner.move_to(&at(2.0, 0.0, 0.0, 0.0), 30.0).unwrap();
    planner.synchronize().unwrap();
    assert_eq!(hal.borrow().steps[0], 160);
}

#[test]
fn delta_lines_are_segmented_and_land() {
    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let config = MachineConfig {
        kinematics: Kinematics::Delta(Delta::new(&DeltaGeometry::default())),
        steps_per_unit: [80.0, 80.0, 80.0, 500.0],
        max_feedrate: [300.0, 300.0, 300.0, 25.0],
        max_acceleration: [3000.0, 3000.0, 3000.0, 10000.0],
        jerk: Some([10.0, 10.0, 10.0, 5.0]),
        ..Default::default()
    };
    let stepper = RefCell::new(Stepper::new(consumer, &config.validate().unwrap()));
    let hal = RefCell::new(Hal::default());
    let mut planner = Planner::new(producer, &config, || {
        stepper.borrow_mut().isr(&mut *hal.borrow_mut())
    })
    .unwrap();

    planner.set_position(&Position::ORIGIN).unwrap();
    planner.move_to(&at(20.0, 10.0, 5.0, 0.0), 50.0).unwrap();
    planner.synchronize().unwrap();

    let now = planner.current_position(PositionSource::Realtime).unwrap();
    assert!(close(now.x, 20.0, 0.05), "{now:?}");
    assert!(close(now.y, 10.0, 0.05), "{now:?}");
    assert!(close(now.z, 5.0, 0.05), "{now:?}");
    assert!(hal.borrow().order.len() > 3);
}

#[test]
fn unreachable_targets_are_refused() {
    let mut shared = Shared::new();
    let (producer, _consumer) = shared.split();
    let config = MachineConfig {
        kinematics: Kinematics::Delta(Delta::new(&DeltaGeometry::default())),
        steps_per_unit: [80.0, 80.0, 80.0, 500.0],
        ..Default::default()
    };
    let mut planner = Planner::new(producer, &config, || {}).unwrap();
    planner.set_position(&Position::ORIGIN).unwrap();
    let queued = planner.blocks_queued();

    let far = at(400.0, 0.0, 0.0, 0.0);
    assert!(matches!(
        planner.try_buffer_segment(&far, 50.0, 0),
        Err(nb::Error::Other(MotionError::Kinematics(_)))
    ));
    assert_eq!(planner.blocks_queued(), queued);
}

#[test]
fn acknowledgements_report_free_space() {
    let mut shared = Shared::new();
    let (producer, _consumer) = shared.split();
    let mut planner = Planner::new(producer, &MachineConfig::default(), || {}).unwrap();
    let mut queue = CommandQueue::new();

    assert_eq!(queue.enqueue("G1 X10 F3000"), Ok(true));
    assert_eq!(queue.enqueue("G1 X20"), Ok(true));
    planner.move_to(&at(10.0, 0.0, 0.0, 0.0), 50.0).unwrap();
    planner.move_to(&at(20.0, 0.0, 0.0, 0.0), 50.0).unwrap();

    let (command, ack) = queue.pop(planner.moves_free()).unwrap();
    assert_eq!(command.as_str(), "G1 X10 F3000");
    assert_eq!(ack.to_string(), "ok P14 B3");
}
