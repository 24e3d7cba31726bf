use dimensioned::{
    f64prefixes::*,
    si::{Meter, Second, M, S},
};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, error, info};
use motion::{
    segment::{
        arc::{Arc, ArcCenter, Plane},
        bezier::Bezier,
    },
    AdvanceConfig, Axis, AxisArray, Background, Duration, MachineConfig, MotionError, MotionShared,
    Phase, Planner, Position, PositionSource, Producer, ShaperConfig, Stepper, StepperHal,
    NUM_AXES, STEPPER_TIMER_RATE,
};
use serde::Serialize;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

const RING: usize = 16;

type Shared = MotionShared<CriticalSectionRawMutex, RING>;

/// Step pins and timer of a machine that only exists in memory. Time
/// advances by whatever the stepper schedules.
#[derive(Debug)]
struct VirtualMachine {
    mm_per_step: AxisArray<f64>,
    steps: AxisArray<i32>,
    forward: AxisArray<bool>,
    pulses: u64,
    time: Second<f64>,
    next_sample: Second<f64>,
    sample_period: Second<f64>,
}

#[derive(Debug)]
struct Telemetry {
    time: Second<f64>,
    position: [Meter<f64>; NUM_AXES],
    phase: Phase,
}

impl VirtualMachine {
    fn new(config: &MachineConfig) -> Self {
        Self {
            mm_per_step: config.steps_per_unit.map(|s| 1.0 / s as f64),
            steps: [0; NUM_AXES],
            forward: [true; NUM_AXES],
            pulses: 0,
            time: 0.0 * S,
            next_sample: 0.0 * S,
            sample_period: 1.0 * MILLI * S,
        }
    }

    fn sample(&mut self, phase: Phase) -> Option<Telemetry> {
        if self.time < self.next_sample {
            return None;
        }
        self.next_sample += self.sample_period;
        let position =
            core::array::from_fn(|i| self.steps[i] as f64 * self.mm_per_step[i] * MILLI * M);
        Some(Telemetry {
            time: self.time,
            position,
            phase,
        })
    }
}

impl StepperHal for VirtualMachine {
    fn set_step_pin(&mut self, axis: Axis, level: bool) {
        if level {
            let i = axis.index();
            self.steps[i] += if self.forward[i] { 1 } else { -1 };
            self.pulses += 1;
        }
    }

    fn set_direction_pin(&mut self, axis: Axis, forward: bool) {
        self.forward[axis.index()] = forward;
    }

    fn schedule_next_tick(&mut self, delay: Duration) {
        self.time += delay.ticks() as f64 / STEPPER_TIMER_RATE as f64 * S;
    }
}

/// Straight move in the print plane, extruding along it when asked.
fn line_to<B: Background>(
    planner: &mut Planner<'_, CriticalSectionRawMutex, B, RING>,
    e: &mut f32,
    x: f32,
    y: f32,
    extrude: bool,
) -> Result<(), MotionError> {
    let from = planner.current_position(PositionSource::Projected)?;
    if extrude {
        *e += 0.04 * (x - from.x).hypot(y - from.y);
    }
    planner.move_to(&Position::new(x, y, 0.2, *e), 60.0)
}

/// A square, a circle inside it and a curve back to the corner.
fn draw<B: Background>(
    planner: &mut Planner<'_, CriticalSectionRawMutex, B, RING>,
) -> Result<(), MotionError> {
    let mut e = 0.0;
    line_to(planner, &mut e, 10.0, 10.0, false)?;
    line_to(planner, &mut e, 50.0, 10.0, true)?;
    line_to(planner, &mut e, 50.0, 50.0, true)?;
    line_to(planner, &mut e, 10.0, 50.0, true)?;
    line_to(planner, &mut e, 10.0, 10.0, true)?;
    line_to(planner, &mut e, 20.0, 30.0, false)?;

    let circle = Arc {
        target: Position::new(20.0, 30.0, 0.2, e + 2.5),
        center: ArcCenter::Offset([10.0, 0.0]),
        clockwise: true,
        circles: 0,
        plane: Plane::Xy,
    };
    let lines = planner.arc_to(&circle, 40.0, 0)?;
    debug!("circle as {} lines", lines);

    let curve = Bezier {
        target: Position::new(10.0, 10.0, 0.2, e + 3.5),
        control: [[-15.0, 5.0], [5.0, 15.0]],
    };
    let lines = planner.bezier_to(&curve, 40.0, 0)?;
    debug!("curve as {} lines", lines);

    planner.move_to(&Position::new(0.0, 0.0, 5.0, e + 3.0), 100.0)
}

fn produce(
    producer: Producer<'_, CriticalSectionRawMutex, RING>,
    config: &MachineConfig,
) -> Result<Position, String> {
    let mut planner =
        Planner::new(producer, config, thread::yield_now).map_err(|e| e.to_string())?;
    planner
        .set_position(&Position::ORIGIN)
        .map_err(|e| e.to_string())?;
    draw(&mut planner).map_err(|e| e.to_string())?;
    planner.synchronize().map_err(|e| e.to_string())?;
    planner
        .current_position(PositionSource::Realtime)
        .map_err(|e| e.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MachineConfig {
        jerk: None,
        junction_deviation_mm: Some(0.05),
        advance: Some(AdvanceConfig::default()),
        shaping_x: Some(ShaperConfig::default()),
        shaping_y: Some(ShaperConfig {
            frequency: 35.0,
            ..Default::default()
        }),
        ..Default::default()
    };
    let settings = config.validate().map_err(|e| e.to_string())?;
    debug!("{settings:#?}");

    let mut shared = Shared::new();
    let (producer, consumer) = shared.split();
    let done = AtomicBool::new(false);
    let mut writer = csv::Writer::from_path("/tmp/motion.csv")?;

    let (outcome, isr) = thread::scope(|s| {
        let isr = s.spawn(|| -> Result<VirtualMachine, csv::Error> {
            let mut stepper = Stepper::new(consumer, &settings);
            let mut machine = VirtualMachine::new(&config);
            while !(done.load(Ordering::Acquire) && stepper.is_idle()) {
                stepper.isr(&mut machine);
                if let Some(row) = machine.sample(stepper.phase()) {
                    writer.serialize(&row)?;
                }
                if stepper.is_idle() {
                    thread::yield_now();
                }
            }
            writer.flush()?;
            Ok(machine)
        });
        let outcome = produce(producer, &config);
        done.store(true, Ordering::Release);
        (outcome, isr.join())
    });

    let machine = isr.map_err(|_| "step thread panicked")??;
    match outcome {
        Ok(position) => info!(
            "ended at {:?} after {:.3} s, {} pulses",
            position,
            dimensioned::Dimensioned::value_unsafe(&machine.time),
            machine.pulses
        ),
        Err(e) => {
            error!("drawing failed: {e}");
            return Err(e.into());
        }
    }
    info!("telemetry written to /tmp/motion.csv");
    Ok(())
}

impl Serialize for Telemetry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use dimensioned::Dimensioned;
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Telemetry", 6)?;
        s.serialize_field("time", &self.time.value_unsafe())?;
        for (name, position) in ["x", "y", "z", "e"].into_iter().zip(&self.position) {
            s.serialize_field(name, &(*position / MILLI).value_unsafe())?;
        }
        let phase = match self.phase {
            Phase::Accelerating => "accelerating",
            Phase::Cruising => "cruising",
            Phase::Decelerating => "decelerating",
            Phase::Done => "idle",
        };
        s.serialize_field("phase", phase)?;
        s.end()
    }
}
