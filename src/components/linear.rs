//! Topology and linear passive components: Ground, Wire, Resistor,
//! Capacitor, Inductor.

use super::{Component, ComponentKind, Terminals};
use crate::solver::MnaSystem;

/// Voltage a capacitor is seeded with on reset, so symmetric oscillators
/// do not sit at an unstable equilibrium.
const CAPACITOR_SEED_VOLTAGE: f64 = 1e-3;

/// The reference node. Every ground lead resolves to node 0.
#[derive(Debug, Clone, Default)]
pub struct Ground {
    terminals: Terminals,
}

impl Ground {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Component for Ground {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Ground
    }

    fn lead_count(&self) -> usize {
        1
    }

    fn terminals(&self) -> &Terminals {
        &self.terminals
    }

    fn terminals_mut(&mut self) -> &mut Terminals {
        &mut self.terminals
    }

    fn stamp(&mut self, _mna: &mut MnaSystem) {}

    fn voltage_delta(&self) -> f64 {
        0.0
    }

    fn lead_is_ground(&self, _lead: usize) -> bool {
        true
    }
}

/// An ideal wire, stamped as a 0 V voltage source so its current is solved.
#[derive(Debug, Clone, Default)]
pub struct Wire {
    terminals: Terminals,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Component for Wire {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Wire
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
        mna.stamp_voltage_source(t.node(0), t.node(1), t.voltage_source(0), 0.0);
    }

    fn is_wire(&self) -> bool {
        true
    }
}

/// A resistor component.
#[derive(Debug, Clone)]
pub struct Resistor {
    pub resistance: f64,
    terminals: Terminals,
}

impl Resistor {
    /// Create a new resistor.
    pub fn new(resistance: f64) -> Self {
        Self {
            resistance,
            terminals: Terminals::default(),
        }
    }

    /// Get the conductance (1/R).
    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }
}

impl Component for Resistor {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Resistor
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
        mna.stamp_resistor(t.node(0), t.node(1), self.resistance);
    }

    fn calculate_current(&mut self) {
        self.terminals.current = self.terminals.voltage_delta() / self.resistance;
    }
}

/// A capacitor component.
///
/// In discrete-time simulation, a capacitor is modeled using a Norton
/// companion model: a resistance R_eq in parallel with a current source.
///
/// Trapezoidal rule:     R_eq = h / 2C,  I_eq = -v(n-1)/R_eq - i(n-1)
/// Backward Euler:       R_eq = h / C,   I_eq = -v(n-1)/R_eq
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub capacitance: f64,
    /// Use the trapezoidal rule instead of backward Euler
    pub trapezoidal: bool,
    terminals: Terminals,

    // State for discrete-time model
    comp_resistance: f64,
    cur_source_value: f64,
    /// Voltage across the capacitor at the last solve
    volt_diff: f64,
}

impl Capacitor {
    /// Create a new capacitor using the trapezoidal rule.
    pub fn new(capacitance: f64) -> Self {
        Self {
            capacitance,
            trapezoidal: true,
            terminals: Terminals::default(),
            comp_resistance: 0.0,
            cur_source_value: 0.0,
            volt_diff: CAPACITOR_SEED_VOLTAGE,
        }
    }

    /// Switch to backward-Euler integration.
    pub fn backward_euler(mut self) -> Self {
        self.trapezoidal = false;
        self
    }

    /// Equivalent conductance of the companion model for step `h`.
    pub fn conductance(&self, h: f64) -> f64 {
        if self.trapezoidal {
            2.0 * self.capacitance / h
        } else {
            self.capacitance / h
        }
    }

    /// Companion current source for the step being solved.
    pub fn companion_current(&self) -> f64 {
        self.cur_source_value
    }
}

impl Component for Capacitor {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Capacitor
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
        let (n0, n1) = (self.terminals.node(0), self.terminals.node(1));
        self.comp_resistance = 1.0 / self.conductance(mna.time_step());
        mna.stamp_resistor(n0, n1, self.comp_resistance);
        mna.mark_right_side_changes(n0);
        mna.mark_right_side_changes(n1);
    }

    fn begin_step(&mut self, _mna: &MnaSystem) {
        self.cur_source_value = -self.volt_diff / self.comp_resistance;
        if self.trapezoidal {
            self.cur_source_value -= self.terminals.current;
        }
    }

    fn step(&mut self, mna: &mut MnaSystem) {
        let (n0, n1) = (self.terminals.node(0), self.terminals.node(1));
        mna.stamp_current_source(n0, n1, self.cur_source_value);
    }

    fn calculate_current(&mut self) {
        self.volt_diff = self.terminals.voltage_delta();
        // Guard against being called before the first stamp
        if self.comp_resistance > 0.0 {
            self.terminals.current = self.volt_diff / self.comp_resistance + self.cur_source_value;
        }
    }

    fn reset(&mut self) {
        self.terminals.volts.fill(0.0);
        self.terminals.current = 0.0;
        self.volt_diff = CAPACITOR_SEED_VOLTAGE;
    }
}

/// An inductor component.
///
/// Modeled as a Norton companion: a resistance R_eq in parallel with a
/// current source carrying the history term.
///
/// Trapezoidal rule:     R_eq = 2L / h,  I_eq = v(n-1)/R_eq + i(n-1)
/// Backward Euler:       R_eq = L / h,   I_eq = i(n-1)
#[derive(Debug, Clone)]
pub struct Inductor {
    pub inductance: f64,
    /// Use the trapezoidal rule instead of backward Euler
    pub trapezoidal: bool,
    /// Current restored on reset
    pub initial_current: f64,
    terminals: Terminals,

    // State for discrete-time model
    comp_resistance: f64,
    cur_source_value: f64,
}

impl Inductor {
    /// Create a new inductor using the trapezoidal rule.
    pub fn new(inductance: f64) -> Self {
        Self {
            inductance,
            trapezoidal: true,
            initial_current: 0.0,
            terminals: Terminals::default(),
            comp_resistance: 0.0,
            cur_source_value: 0.0,
        }
    }

    /// Switch to backward-Euler integration.
    pub fn backward_euler(mut self) -> Self {
        self.trapezoidal = false;
        self
    }

    /// Start with a nonzero current.
    pub fn with_initial_current(mut self, current: f64) -> Self {
        self.initial_current = current;
        self.terminals.current = current;
        self
    }

    /// Equivalent resistance of the companion model for step `h`.
    pub fn resistance(&self, h: f64) -> f64 {
        if self.trapezoidal {
            2.0 * self.inductance / h
        } else {
            self.inductance / h
        }
    }
}

impl Component for Inductor {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Inductor
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
        let (n0, n1) = (self.terminals.node(0), self.terminals.node(1));
        self.comp_resistance = self.resistance(mna.time_step());
        mna.stamp_resistor(n0, n1, self.comp_resistance);
        mna.mark_right_side_changes(n0);
        mna.mark_right_side_changes(n1);
    }

    fn begin_step(&mut self, _mna: &MnaSystem) {
        self.cur_source_value = if self.trapezoidal {
            self.terminals.voltage_delta() / self.comp_resistance + self.terminals.current
        } else {
            self.terminals.current
        };
    }

    fn step(&mut self, mna: &mut MnaSystem) {
        let (n0, n1) = (self.terminals.node(0), self.terminals.node(1));
        mna.stamp_current_source(n0, n1, self.cur_source_value);
    }

    fn calculate_current(&mut self) {
        if self.comp_resistance > 0.0 {
            self.terminals.current =
                self.terminals.voltage_delta() / self.comp_resistance + self.cur_source_value;
        }
    }

    fn reset(&mut self) {
        self.terminals.volts.fill(0.0);
        self.terminals.current = self.initial_current;
        self.cur_source_value = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resistor_conductance() {
        let r = Resistor::new(1000.0);
        assert!((r.conductance() - 0.001).abs() < 1e-10);
    }

    #[test]
    fn test_resistor_current() {
        let mut r = Resistor::new(100.0);
        r.terminals_mut().allocate(2);
        r.set_lead_voltage(0, 10.0);
        r.set_lead_voltage(1, 0.0);
        assert!((r.current() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_capacitor_companion_model() {
        let c = Capacitor::new(1e-6);
        let dt = 1.0 / 48000.0;
        // G_eq = 2C/dt = 2 * 1e-6 / (1/48000) = 96 mS
        assert!((c.conductance(dt) - 0.096).abs() < 1e-6);

        let c = Capacitor::new(1e-6).backward_euler();
        assert!((c.conductance(dt) - 0.048).abs() < 1e-6);
    }

    #[test]
    fn test_capacitor_history_source() {
        let mut c = Capacitor::new(1e-6);
        c.terminals_mut().allocate(2);
        c.comp_resistance = 0.5;
        c.set_lead_voltage(0, 2.0);
        c.set_lead_voltage(1, 1.0);
        c.terminals.current = 0.25;

        let mna = MnaSystem::new(1e-6);
        c.begin_step(&mna);
        // -(1 V / 0.5 ohm) - 0.25 A
        assert!((c.companion_current() + 2.25).abs() < 1e-12);

        c.trapezoidal = false;
        c.begin_step(&mna);
        assert!((c.companion_current() + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_capacitor_reset_seeds_voltage() {
        let mut c = Capacitor::new(1e-6);
        c.terminals_mut().allocate(2);
        c.volt_diff = 4.0;
        c.reset();
        assert_eq!(c.volt_diff, CAPACITOR_SEED_VOLTAGE);
        assert_eq!(c.current(), 0.0);
    }

    #[test]
    fn test_inductor_companion_model() {
        let l = Inductor::new(1e-3);
        assert!((l.resistance(1e-6) - 2000.0).abs() < 1e-9);
        let l = Inductor::new(1e-3).backward_euler();
        assert!((l.resistance(1e-6) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_inductor_history_source() {
        let mut l = Inductor::new(1e-3).with_initial_current(0.5);
        l.terminals_mut().allocate(2);
        l.comp_resistance = 2000.0;
        l.terminals.volts = vec![4.0, 0.0];

        let mna = MnaSystem::new(1e-6);
        l.begin_step(&mna);
        assert!((l.cur_source_value - (4.0 / 2000.0 + 0.5)).abs() < 1e-12);

        l.reset();
        assert_eq!(l.current(), 0.5);
    }

    #[test]
    fn test_ground_is_ground() {
        let g = Ground::new();
        assert!(g.lead_is_ground(0));
        assert_eq!(g.voltage_delta(), 0.0);
    }
}
