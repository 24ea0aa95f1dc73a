//! Voltage and current sources.

use std::f64::consts::PI;

use super::{Component, ComponentKind, Terminals};
use crate::solver::MnaSystem;

/// Source waveform shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    /// Constant `amplitude + bias`
    #[default]
    Dc,
    /// Sine wave
    Sine,
    /// Square wave with configurable duty cycle
    Square,
    /// Triangle wave
    Triangle,
    /// Rising ramp that drops back at the end of each period
    Sawtooth,
    /// Short pulse at the start of each period
    Pulse,
}

impl Waveform {
    /// Parse waveform from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dc" => Some(Self::Dc),
            "sine" | "sin" | "ac" => Some(Self::Sine),
            "square" | "sq" => Some(Self::Square),
            "triangle" | "tri" => Some(Self::Triangle),
            "sawtooth" | "saw" => Some(Self::Sawtooth),
            "pulse" => Some(Self::Pulse),
            _ => None,
        }
    }

    /// Waveform from a numeric tag, as used in parameter tables.
    pub fn from_index(index: f64) -> Option<Self> {
        if index.fract() != 0.0 {
            return None;
        }
        match index as i64 {
            0 => Some(Self::Dc),
            1 => Some(Self::Sine),
            2 => Some(Self::Square),
            3 => Some(Self::Triangle),
            4 => Some(Self::Sawtooth),
            5 => Some(Self::Pulse),
            _ => None,
        }
    }
}

/// Waveform parameters shared by two-lead sources and rails.
#[derive(Debug, Clone)]
pub struct Signal {
    pub waveform: Waveform,
    /// Peak amplitude in volts
    pub amplitude: f64,
    /// DC offset added to the waveform
    pub bias: f64,
    /// Frequency in Hz
    pub frequency: f64,
    /// Phase shift in radians
    pub phase_shift: f64,
    /// Fraction of the period a square wave spends high
    pub duty_cycle: f64,
    /// Frequency the phase reference was derived for
    active_frequency: f64,
    /// Time at which the phase was zero
    freq_time_zero: f64,
}

impl Signal {
    pub fn new(waveform: Waveform, amplitude: f64, frequency: f64) -> Self {
        Self {
            waveform,
            amplitude,
            bias: 0.0,
            frequency,
            phase_shift: 0.0,
            duty_cycle: 0.5,
            active_frequency: frequency,
            freq_time_zero: 0.0,
        }
    }

    /// Keep the waveform phase-continuous when the frequency was changed
    /// since the last step.
    fn retime(&mut self, t: f64) {
        if self.frequency == self.active_frequency {
            return;
        }
        self.freq_time_zero = if self.frequency == 0.0 {
            0.0
        } else {
            t - self.active_frequency * (t - self.freq_time_zero) / self.frequency
        };
        self.active_frequency = self.frequency;
    }

    /// Source voltage at time `t`.
    pub fn voltage(&self, t: f64) -> f64 {
        let w = 2.0 * PI * (t - self.freq_time_zero) * self.active_frequency + self.phase_shift;
        let wrapped = w % (2.0 * PI);
        match self.waveform {
            Waveform::Dc => self.amplitude + self.bias,
            Waveform::Sine => w.sin() * self.amplitude + self.bias,
            Waveform::Square => {
                if wrapped > 2.0 * PI * self.duty_cycle {
                    self.bias - self.amplitude
                } else {
                    self.bias + self.amplitude
                }
            }
            Waveform::Triangle => self.bias + triangle(wrapped) * self.amplitude,
            Waveform::Sawtooth => self.bias + wrapped * (self.amplitude / PI) - self.amplitude,
            Waveform::Pulse => {
                if wrapped < 1.0 {
                    self.amplitude + self.bias
                } else {
                    self.bias
                }
            }
        }
    }

    fn reset(&mut self) {
        self.active_frequency = self.frequency;
        self.freq_time_zero = 0.0;
    }
}

/// Triangle over one period `[0, 2π)`, ranging -1..1.
fn triangle(x: f64) -> f64 {
    if x < PI {
        x * (2.0 / PI) - 1.0
    } else {
        1.0 - (x - PI) * (2.0 / PI)
    }
}

/// A two-lead voltage source. Lead 1 is the positive terminal.
///
/// Voltage sources require an extra row/column in the MNA matrix for the
/// branch current. The source enforces: V[lead 1] - V[lead 0] = V_source
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub signal: Signal,
    terminals: Terminals,
}

impl VoltageSource {
    /// Create a source with the given waveform.
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            terminals: Terminals::default(),
        }
    }

    /// Create a DC source.
    pub fn dc(voltage: f64) -> Self {
        Self::new(Signal::new(Waveform::Dc, voltage, 0.0))
    }

    /// Create a sine source.
    pub fn sine(amplitude: f64, frequency: f64) -> Self {
        Self::new(Signal::new(Waveform::Sine, amplitude, frequency))
    }

    /// Create a square-wave source.
    pub fn square(amplitude: f64, frequency: f64) -> Self {
        Self::new(Signal::new(Waveform::Square, amplitude, frequency))
    }

    /// Get the source voltage at time `t`.
    pub fn voltage(&self, t: f64) -> f64 {
        self.signal.voltage(t)
    }
}

impl Component for VoltageSource {
    fn kind(&self) -> ComponentKind {
        ComponentKind::VoltageSource
    }

    fn lead_count(&self) -> usize {
        2
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn terminals(&self) -> &Terminals {
        &self.terminals
    }

    fn terminals_mut(&mut self) -> &mut Terminals {
        &mut self.terminals
    }

    fn stamp(&mut self, mna: &mut MnaSystem) {
        let t = &self.terminals;
        let (n0, n1, vs) = (t.node(0), t.node(1), t.voltage_source(0));
        if self.signal.waveform == Waveform::Dc {
            mna.stamp_voltage_source(n0, n1, vs, self.signal.voltage(mna.time()));
        } else {
            mna.stamp_varying_voltage_source(n0, n1, vs);
        }
    }

    fn begin_step(&mut self, mna: &MnaSystem) {
        self.signal.retime(mna.time());
    }

    fn step(&mut self, mna: &mut MnaSystem) {
        if self.signal.waveform != Waveform::Dc {
            let vs = self.terminals.voltage_source(0);
            mna.update_voltage_source(vs, self.signal.voltage(mna.time()));
        }
    }

    fn voltage_delta(&self) -> f64 {
        let volts = &self.terminals.volts;
        match volts.as_slice() {
            [a, b, ..] => b - a,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.terminals.volts.fill(0.0);
        self.terminals.current = 0.0;
        self.signal.reset();
    }
}

/// A one-lead voltage source referenced to ground.
#[derive(Debug, Clone)]
pub struct Rail {
    pub signal: Signal,
    terminals: Terminals,
}

impl Rail {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            terminals: Terminals::default(),
        }
    }

    /// Create a DC rail.
    pub fn dc(voltage: f64) -> Self {
        Self::new(Signal::new(Waveform::Dc, voltage, 0.0))
    }
}

impl Component for Rail {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Rail
    }

    fn lead_count(&self) -> usize {
        1
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn terminals(&self) -> &Terminals {
        &self.terminals
    }

    fn terminals_mut(&mut self) -> &mut Terminals {
        &mut self.terminals
    }

    fn stamp(&mut self, mna: &mut MnaSystem) {
        let t = &self.terminals;
        let (n0, vs) = (t.node(0), t.voltage_source(0));
        if self.signal.waveform == Waveform::Dc {
            mna.stamp_voltage_source(0, n0, vs, self.signal.voltage(mna.time()));
        } else {
            mna.stamp_varying_voltage_source(0, n0, vs);
        }
    }

    fn begin_step(&mut self, mna: &MnaSystem) {
        self.signal.retime(mna.time());
    }

    fn step(&mut self, mna: &mut MnaSystem) {
        if self.signal.waveform != Waveform::Dc {
            let vs = self.terminals.voltage_source(0);
            mna.update_voltage_source(vs, self.signal.voltage(mna.time()));
        }
    }

    fn lead_is_ground(&self, _lead: usize) -> bool {
        true
    }

    fn reset(&mut self) {
        self.terminals.volts.fill(0.0);
        self.terminals.current = 0.0;
        self.signal.reset();
    }
}

/// A current source component.
///
/// Current sources add directly to the RHS vector of the MNA equations.
/// Current flows from lead 0 through the source to lead 1.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub current_value: f64,
    terminals: Terminals,
}

impl CurrentSource {
    /// Create a new current source.
    pub fn new(current: f64) -> Self {
        Self {
            current_value: current,
            terminals: Terminals {
                current,
                ..Terminals::default()
            },
        }
    }
}

impl Component for CurrentSource {
    fn kind(&self) -> ComponentKind {
        ComponentKind::CurrentSource
    }

    fn lead_count(&self) -> usize {
        2
    }

    fn terminals(&self) -> &Terminals {
        &self.terminals
    }

    fn terminals_mut(&mut self) -> &mut Terminals {
        &mut self.terminals
    }

    fn stamp(&mut self, mna: &mut MnaSystem) {
        let t = &self.terminals;
        mna.stamp_current_source(t.node(0), t.node(1), self.current_value);
    }

    fn calculate_current(&mut self) {
        self.terminals.current = self.current_value;
    }

    fn reset(&mut self) {
        self.terminals.volts.fill(0.0);
        self.terminals.current = self.current_value;
    }
}
