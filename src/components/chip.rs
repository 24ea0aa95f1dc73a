//! Firmware-driven composite chip.
//!
//! The chip only models the electrical surface of a microcontroller: pins
//! fixed as inputs or outputs, an external [`Firmware`] clocked by elapsed
//! simulated microseconds, and interrupt callbacks fired on input
//! transitions. Each output pin drives its lead from an internal node held
//! by a voltage source, through an output resistance:
//!
//!   ground --(V = high * level)-- internal --[R_out]-- pin
//!
//! Inputs are high impedance.

use std::fmt;

use log::debug;

use super::{Component, ComponentKind, Terminals};
use crate::solver::MnaSystem;

/// Default logic-high voltage.
pub const DEFAULT_HIGH_VOLTAGE: f64 = 5.0;
/// Default output resistance of a driven pin.
pub const DEFAULT_OUTPUT_RESISTANCE: f64 = 25.0;

/// Direction of a pin, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Input transition that fires an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptMode {
    Rising,
    Falling,
    Change,
    /// Fires every step while the input is low
    Low,
}

impl InterruptMode {
    fn fires(self, was_high: bool, is_high: bool) -> bool {
        match self {
            InterruptMode::Rising => !was_high && is_high,
            InterruptMode::Falling => was_high && !is_high,
            InterruptMode::Change => was_high != is_high,
            InterruptMode::Low => !is_high,
        }
    }
}

/// State of one pin as seen by firmware.
#[derive(Debug, Clone)]
pub struct Pin {
    pub mode: PinMode,
    /// Solved pin voltage from the last tick
    voltage: f64,
    /// Output level as a fraction of the high voltage (PWM duty)
    level: f64,
    interrupt: Option<InterruptMode>,
    was_high: bool,
}

impl Pin {
    fn new(mode: PinMode) -> Self {
        Self {
            mode,
            voltage: 0.0,
            level: 0.0,
            interrupt: None,
            was_high: false,
        }
    }
}

/// The pins of a chip, read and written by firmware.
#[derive(Debug, Clone)]
pub struct PinBank {
    pins: Vec<Pin>,
    high_voltage: f64,
}

impl PinBank {
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn mode(&self, pin: usize) -> Option<PinMode> {
        self.pins.get(pin).map(|p| p.mode)
    }

    /// Voltage at a pin as of the last tick.
    pub fn voltage(&self, pin: usize) -> f64 {
        self.pins.get(pin).map_or(0.0, |p| p.voltage)
    }

    /// Digital reading of a pin: above half the high voltage.
    pub fn is_high(&self, pin: usize) -> bool {
        self.voltage(pin) > self.high_voltage / 2.0
    }

    /// Drive an output pin fully high or low.
    pub fn write(&mut self, pin: usize, high: bool) {
        self.write_duty(pin, if high { 1.0 } else { 0.0 });
    }

    /// Drive an output pin with a PWM duty cycle, averaged to a level.
    pub fn write_duty(&mut self, pin: usize, duty: f64) {
        match self.pins.get_mut(pin) {
            Some(p) if p.mode == PinMode::Output => p.level = duty.clamp(0.0, 1.0),
            _ => debug!("ignoring write to non-output pin {pin}"),
        }
    }

    /// Output level of a pin (0..1).
    pub fn level(&self, pin: usize) -> f64 {
        self.pins.get(pin).map_or(0.0, |p| p.level)
    }

    pub fn attach_interrupt(&mut self, pin: usize, mode: InterruptMode) {
        if let Some(p) = self.pins.get_mut(pin) {
            p.interrupt = Some(mode);
        }
    }

    pub fn detach_interrupt(&mut self, pin: usize) {
        if let Some(p) = self.pins.get_mut(pin) {
            p.interrupt = None;
        }
    }

    fn output_voltage(&self, pin: usize) -> f64 {
        self.high_voltage * self.level(pin)
    }
}

/// Program running on a [`Chip`].
pub trait Firmware: Send {
    /// Advance the program by `elapsed_micros` of simulated time.
    fn clock(&mut self, elapsed_micros: u64, pins: &mut PinBank);

    /// Called when an attached interrupt fires on `pin`.
    fn interrupt(&mut self, _pin: usize, _pins: &mut PinBank) {}

    /// Restart the program.
    fn reset(&mut self) {}
}

/// A chip whose outputs are driven by firmware.
pub struct Chip {
    bank: PinBank,
    firmware: Box<dyn Firmware>,
    output_resistance: f64,
    /// Pin index of each output, in internal-lead order
    outputs: Vec<usize>,
    /// Solved current per output source
    output_currents: Vec<f64>,
    /// Simulated time of the last firmware clock, in microseconds
    last_clock_micros: u64,
    terminals: Terminals,
}

impl fmt::Debug for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chip")
            .field("bank", &self.bank)
            .field("output_resistance", &self.output_resistance)
            .field("last_clock_micros", &self.last_clock_micros)
            .finish_non_exhaustive()
    }
}

impl Chip {
    /// Create a chip with one pin per entry of `modes`.
    pub fn new(modes: &[PinMode], firmware: impl Firmware + 'static) -> Self {
        let outputs: Vec<usize> = modes
            .iter()
            .enumerate()
            .filter(|(_, &mode)| mode == PinMode::Output)
            .map(|(pin, _)| pin)
            .collect();
        Self {
            bank: PinBank {
                pins: modes.iter().map(|&mode| Pin::new(mode)).collect(),
                high_voltage: DEFAULT_HIGH_VOLTAGE,
            },
            firmware: Box::new(firmware),
            output_resistance: DEFAULT_OUTPUT_RESISTANCE,
            output_currents: vec![0.0; outputs.len()],
            outputs,
            last_clock_micros: 0,
            terminals: Terminals::default(),
        }
    }

    /// Set the logic-high voltage.
    pub fn with_high_voltage(mut self, volts: f64) -> Self {
        self.bank.high_voltage = volts;
        self
    }

    /// Set the output resistance of driven pins.
    pub fn with_output_resistance(mut self, ohms: f64) -> Self {
        self.output_resistance = ohms;
        self
    }

    pub fn pins(&self) -> &PinBank {
        &self.bank
    }

    /// Current sourced by an output pin, if `pin` is an output.
    pub fn pin_current(&self, pin: usize) -> Option<f64> {
        let idx = self.outputs.iter().position(|&p| p == pin)?;
        Some(self.output_currents[idx])
    }

    fn internal_node(&self, output: usize) -> usize {
        self.terminals.node(self.bank.len() + output)
    }
}

impl Component for Chip {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Chip
    }

    fn lead_count(&self) -> usize {
        self.bank.len()
    }

    fn internal_lead_count(&self) -> usize {
        self.outputs.len()
    }

    fn voltage_source_count(&self) -> usize {
        self.outputs.len()
    }

    fn terminals(&self) -> &Terminals {
        &self.terminals
    }

    fn terminals_mut(&mut self) -> &mut Terminals {
        &mut self.terminals
    }

    fn stamp(&mut self, mna: &mut MnaSystem) {
        for (out, &pin) in self.outputs.iter().enumerate() {
            let internal = self.internal_node(out);
            mna.stamp_varying_voltage_source(0, internal, self.terminals.voltage_source(out));
            mna.stamp_resistor(internal, self.terminals.node(pin), self.output_resistance);
        }
    }

    fn begin_step(&mut self, mna: &MnaSystem) {
        for pin in 0..self.bank.len() {
            let voltage = self.terminals.volts[pin];
            let p = &mut self.bank.pins[pin];
            p.voltage = voltage;
            if p.mode != PinMode::Input {
                continue;
            }
            let is_high = voltage > self.bank.high_voltage / 2.0;
            let fires = p.interrupt.is_some_and(|mode| mode.fires(p.was_high, is_high));
            p.was_high = is_high;
            if fires {
                self.firmware.interrupt(pin, &mut self.bank);
            }
        }

        let now = (mna.time() * 1e6).round() as u64;
        let elapsed = now.saturating_sub(self.last_clock_micros);
        self.last_clock_micros = now;
        self.firmware.clock(elapsed, &mut self.bank);
    }

    fn step(&mut self, mna: &mut MnaSystem) {
        for (out, &pin) in self.outputs.iter().enumerate() {
            let vs = self.terminals.voltage_source(out);
            mna.update_voltage_source(vs, self.bank.output_voltage(pin));
        }
    }

    fn set_current(&mut self, source: usize, current: f64) {
        if let Some(slot) = self.output_currents.get_mut(source) {
            *slot = current;
        }
        self.terminals.current = self.output_currents.iter().sum();
    }

    fn lead_is_ground(&self, lead: usize) -> bool {
        self.bank.mode(lead) == Some(PinMode::Output)
    }

    fn leads_are_connected(&self, _a: usize, _b: usize) -> bool {
        false
    }

    fn reset(&mut self) {
        self.terminals.volts.fill(0.0);
        self.terminals.current = 0.0;
        self.output_currents.fill(0.0);
        self.last_clock_micros = 0;
        for p in &mut self.bank.pins {
            p.voltage = 0.0;
            p.level = 0.0;
            p.was_high = false;
        }
        self.firmware.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Mirrors input pin 0 onto output pin 1 and counts interrupts.
    struct Follower {
        interrupts: Arc<Mutex<Vec<usize>>>,
        clocked: Arc<Mutex<u64>>,
    }

    impl Firmware for Follower {
        fn clock(&mut self, elapsed_micros: u64, pins: &mut PinBank) {
            *self.clocked.lock().unwrap() += elapsed_micros;
            let high = pins.is_high(0);
            pins.write(1, high);
        }

        fn interrupt(&mut self, pin: usize, _pins: &mut PinBank) {
            self.interrupts.lock().unwrap().push(pin);
        }
    }

    fn follower_chip() -> (Chip, Arc<Mutex<Vec<usize>>>, Arc<Mutex<u64>>) {
        let interrupts = Arc::new(Mutex::new(Vec::new()));
        let clocked = Arc::new(Mutex::new(0));
        let firmware = Follower {
            interrupts: interrupts.clone(),
            clocked: clocked.clone(),
        };
        let mut chip = Chip::new(&[PinMode::Input, PinMode::Output], firmware);
        chip.terminals_mut().allocate(3);
        chip.bank.attach_interrupt(0, InterruptMode::Rising);
        (chip, interrupts, clocked)
    }

    #[test]
    fn test_pin_layout() {
        let (chip, _, _) = follower_chip();
        assert_eq!(chip.lead_count(), 2);
        assert_eq!(chip.internal_lead_count(), 1);
        assert_eq!(chip.voltage_source_count(), 1);
        assert!(chip.lead_is_ground(1));
        assert!(!chip.lead_is_ground(0));
        assert_eq!(chip.pin_current(0), None);
    }

    #[test]
    fn test_rising_interrupt_and_clock() {
        let (mut chip, interrupts, clocked) = follower_chip();
        let mut mna = MnaSystem::new(5e-6);

        mna.set_time(5e-6);
        chip.begin_step(&mna);
        assert!(interrupts.lock().unwrap().is_empty());
        assert_eq!(chip.pins().level(1), 0.0);

        chip.set_lead_voltage(0, 5.0);
        mna.set_time(10e-6);
        chip.begin_step(&mna);
        assert_eq!(*interrupts.lock().unwrap(), vec![0]);
        assert_eq!(chip.pins().level(1), 1.0);
        assert_eq!(*clocked.lock().unwrap(), 10);

        // Staying high does not fire again
        mna.set_time(15e-6);
        chip.begin_step(&mna);
        assert_eq!(interrupts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_writes_to_inputs_are_ignored() {
        let (mut chip, _, _) = follower_chip();
        chip.bank.write_duty(0, 0.5);
        chip.bank.write_duty(1, 1.5);
        assert_eq!(chip.pins().level(0), 0.0);
        assert_eq!(chip.pins().level(1), 1.0);
        assert_eq!(chip.bank.output_voltage(1), DEFAULT_HIGH_VOLTAGE);
    }

    #[test]
    fn test_interrupt_modes() {
        assert!(InterruptMode::Falling.fires(true, false));
        assert!(!InterruptMode::Falling.fires(false, false));
        assert!(InterruptMode::Change.fires(false, true));
        assert!(InterruptMode::Low.fires(false, false));
    }
}
