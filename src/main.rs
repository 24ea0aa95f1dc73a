//! circuitsim - run a built-in demo circuit and print a probe trace.
//!
//! # Usage
//!
//! ```bash
//! circuitsim rc --duration 0.005 > rc.csv
//! RUST_LOG=debug circuitsim diode --time-step 1e-6
//! ```
//!
//! Output is `time,current,voltage` CSV for the probed component.

use std::io::{self, BufWriter, Write};
use std::ops::ControlFlow;
use std::process;
use std::sync::mpsc;

use clap::{Parser, ValueEnum};
use log::info;

use circuit_core::components::{
    Capacitor, Chip, Component, Diode, Firmware, Ground, Inductor, PinBank, PinMode, Resistor,
    VoltageSource,
};
use circuit_core::scope::write_csv_row;
use circuit_core::solver::DEFAULT_TIME_STEP;
use circuit_core::{Circuit, ComponentId, Driver, Result, Simulator, SimulatorConfig};

/// Built-in demo circuits.
#[derive(ValueEnum, Debug, Clone, Copy)]
enum Demo {
    /// 10 V across 100 ohm
    Ohm,
    /// 5 V charging 1 uF through 1 kohm
    Rc,
    /// 5 V into 10 mH through 10 ohm
    Rl,
    /// 5 V 50 Hz sine into a diode and 1 kohm
    Diode,
    /// Chip toggling an LED every millisecond
    Blink,
}

/// Discrete-time circuit simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Demo circuit to run
    #[arg(value_enum)]
    demo: Demo,

    /// Fixed time step in seconds
    #[arg(short, long, default_value_t = DEFAULT_TIME_STEP)]
    time_step: f64,

    /// Simulated duration in seconds
    #[arg(short, long, default_value_t = 0.01)]
    duration: f64,

    /// Print every Nth tick
    #[arg(short, long, default_value_t = 1)]
    every: u64,

    /// Hand the full matrix to the solver without row reduction
    #[arg(long)]
    no_simplify: bool,
}

/// Toggles output pin 0 at a fixed interval.
struct Blink {
    half_period_micros: u64,
    elapsed_micros: u64,
    on: bool,
}

impl Firmware for Blink {
    fn clock(&mut self, elapsed_micros: u64, pins: &mut PinBank) {
        self.elapsed_micros += elapsed_micros;
        while self.elapsed_micros >= self.half_period_micros {
            self.elapsed_micros -= self.half_period_micros;
            self.on = !self.on;
        }
        pins.write(0, self.on);
    }

    fn reset(&mut self) {
        self.elapsed_micros = 0;
        self.on = false;
    }
}

/// Build a series loop `ground -> source -> parts... -> ground` and return
/// the circuit with the id of the part to probe.
fn series_loop(
    source: VoltageSource,
    parts: Vec<Box<dyn Component>>,
    probe: usize,
) -> Result<(Circuit, ComponentId)> {
    let mut circuit = Circuit::new();
    let ground = circuit.create(Ground::new())?;
    let source = circuit.create(source)?;
    circuit.connect_leads(ground, 0, source, 0)?;

    let mut previous = source;
    let mut ids = Vec::with_capacity(parts.len());
    for part in parts {
        let id = circuit.insert(part)?;
        circuit.connect_leads(previous, 1, id, 0)?;
        ids.push(id);
        previous = id;
    }
    circuit.connect_leads(previous, 1, ground, 0)?;

    let probed = ids.get(probe).copied().unwrap_or(source);
    Ok((circuit, probed))
}

fn part(component: impl Component + 'static) -> Box<dyn Component> {
    Box::new(component)
}

fn build(demo: Demo) -> Result<(Circuit, ComponentId)> {
    match demo {
        Demo::Ohm => series_loop(VoltageSource::dc(10.0), vec![part(Resistor::new(100.0))], 0),
        Demo::Rc => series_loop(
            VoltageSource::dc(5.0),
            vec![part(Resistor::new(1e3)), part(Capacitor::new(1e-6))],
            1,
        ),
        Demo::Rl => series_loop(
            VoltageSource::dc(5.0),
            vec![part(Resistor::new(10.0)), part(Inductor::new(10e-3))],
            1,
        ),
        Demo::Diode => series_loop(
            VoltageSource::sine(5.0, 50.0),
            vec![part(Diode::new()), part(Resistor::new(1e3))],
            0,
        ),
        Demo::Blink => {
            let mut circuit = Circuit::new();
            let ground = circuit.create(Ground::new())?;
            let firmware = Blink {
                half_period_micros: 1000,
                elapsed_micros: 0,
                on: false,
            };
            let chip = circuit.create(Chip::new(&[PinMode::Output], firmware))?;
            let resistor = circuit.create(Resistor::new(220.0))?;
            let led = circuit.create(Diode::led())?;
            circuit.connect_leads(chip, 0, resistor, 0)?;
            circuit.connect_leads(resistor, 1, led, 0)?;
            circuit.connect_leads(led, 1, ground, 0)?;
            Ok((circuit, led))
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let (circuit, probed) = build(args.demo)?;
    let config = SimulatorConfig::new().with_simplify(!args.no_simplify);
    let mut simulator = Simulator::with_config(circuit, config);
    simulator.set_time_step(args.time_step)?;
    info!("running {:?} demo for {} s", args.demo, args.duration);

    let duration = args.duration;
    let every = args.every.max(1);
    let mut ticks = 0u64;
    let mut out = BufWriter::new(io::stdout());
    let _ = writeln!(out, "time,current,voltage");

    let (errors, failures) = mpsc::channel();
    let mut driver = Driver::new(simulator);
    driver.start(
        move |sim| {
            ticks += 1;
            if ticks % every == 0 {
                let written = sim
                    .sample(probed)
                    .map(|sample| write_csv_row(&mut out, &sample));
                // Stop quietly when stdout goes away
                if !matches!(written, Ok(Ok(()))) {
                    return ControlFlow::Break(());
                }
            }
            if sim.time() >= duration {
                let _ = out.flush();
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        },
        move |code, component| {
            let _ = errors.send((code, component));
        },
    );
    driver.wait();

    if let Ok((code, component)) = failures.try_recv() {
        match component {
            Some(id) => eprintln!("simulation failed with {code} at component {id}"),
            None => eprintln!("simulation failed with {code}"),
        }
        process::exit(1);
    }

    Ok(())
}
