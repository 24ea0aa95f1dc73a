//! Component models for circuit simulation.
//!
//! This module provides models for all supported circuit components:
//! - Topology: Ground, Wire
//! - Linear: Resistor, Capacitor, Inductor
//! - Sources: Voltage Source (with waveforms), Rail, Current Source
//! - Nonlinear: Diode (LED and Zener presets)
//! - Controls: Switch
//! - Composite: Chip driven by external firmware
//!
//! Every component implements the [`Component`] trait. The analyzer and the
//! time-step iterator only talk to components through this trait, so custom
//! components can be added without touching the engine.

mod chip;
mod controls;
mod diode;
mod linear;
mod sources;

pub use chip::{
    Chip, Firmware, InterruptMode, Pin, PinBank, PinMode, DEFAULT_HIGH_VOLTAGE,
    DEFAULT_OUTPUT_RESISTANCE,
};
pub use controls::Switch;
pub use diode::{Diode, DiodeModel, DEFAULT_FORWARD_DROP, DEFAULT_ZENER_VOLTAGE, LED_FORWARD_DROP};
pub use linear::{Capacitor, Ground, Inductor, Resistor, Wire};
pub use sources::{CurrentSource, Rail, Signal, VoltageSource, Waveform};

use std::any::Any;
use std::fmt;

use crate::solver::MnaSystem;

/// Broad classification used by ground anchoring and degenerate-path search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Ground,
    Wire,
    Resistor,
    Capacitor,
    Inductor,
    Diode,
    VoltageSource,
    Rail,
    CurrentSource,
    Switch,
    Chip,
    Other,
}

impl ComponentKind {
    /// Sources that impose a voltage (two-lead sources and rails).
    pub fn is_voltage_source(&self) -> bool {
        matches!(self, ComponentKind::VoltageSource | ComponentKind::Rail)
    }
}

/// Per-component solver bookkeeping: node indices, lead voltages, current
/// and the global indices of the voltage sources the component owns.
#[derive(Debug, Clone, Default)]
pub struct Terminals {
    /// Dense node index per lead, leads first then internal leads
    pub nodes: Vec<usize>,
    /// Solved voltage per lead
    pub volts: Vec<f64>,
    /// Current through the component
    pub current: f64,
    /// Global voltage-source index per owned source
    pub voltage_sources: Vec<usize>,
}

impl Terminals {
    /// Size the lead arrays to `count`, reallocating only when it changes.
    pub fn allocate(&mut self, count: usize) {
        if self.nodes.len() != count {
            self.nodes = vec![0; count];
            self.volts = vec![0.0; count];
        }
    }

    /// Dense node index of a lead.
    pub fn node(&self, lead: usize) -> usize {
        self.nodes[lead]
    }

    /// Global index of the `n`th owned voltage source.
    pub fn voltage_source(&self, n: usize) -> usize {
        self.voltage_sources[n]
    }

    /// Voltage across the first two leads.
    pub fn voltage_delta(&self) -> f64 {
        match self.volts.as_slice() {
            [a, b, ..] => a - b,
            [a] => *a,
            [] => 0.0,
        }
    }
}

/// Downcasting support for trait objects.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The contract every circuit component implements.
///
/// Node arguments passed to [`MnaSystem`] stamping methods are dense node
/// indices taken from [`Terminals::nodes`]; node 0 is ground and is
/// skipped by every stamp.
pub trait Component: AsAny + fmt::Debug + Send {
    /// Classification used by the analyzer.
    fn kind(&self) -> ComponentKind;

    /// Number of external leads.
    fn lead_count(&self) -> usize;

    /// Number of hidden nodes used by composite models.
    fn internal_lead_count(&self) -> usize {
        0
    }

    /// Number of voltage-source unknowns this component injects.
    fn voltage_source_count(&self) -> usize {
        0
    }

    fn terminals(&self) -> &Terminals;

    fn terminals_mut(&mut self) -> &mut Terminals;

    /// Write the time-invariant linear contribution and mark rows that
    /// must be restamped every sub-iteration. Called once per analysis.
    fn stamp(&mut self, mna: &mut MnaSystem);

    /// Snapshot state for this step's companion model. Called once per tick.
    fn begin_step(&mut self, _mna: &MnaSystem) {}

    /// Restamp nonlinear or time-varying contributions. Called once per
    /// sub-iteration.
    fn step(&mut self, _mna: &mut MnaSystem) {}

    /// Recompute the current from the lead voltages.
    fn calculate_current(&mut self) {}

    /// Receive a solved lead voltage.
    fn set_lead_voltage(&mut self, lead: usize, voltage: f64) {
        self.terminals_mut().volts[lead] = voltage;
        self.calculate_current();
    }

    /// Receive the solved current of the `source`th owned voltage source.
    fn set_current(&mut self, _source: usize, current: f64) {
        self.terminals_mut().current = current;
    }

    fn current(&self) -> f64 {
        self.terminals().current
    }

    fn voltage_delta(&self) -> f64 {
        self.terminals().voltage_delta()
    }

    /// Zero-resistance connection between its leads.
    fn is_wire(&self) -> bool {
        false
    }

    fn nonlinear(&self) -> bool {
        false
    }

    /// Lead has a direct connection to ground through this component.
    fn lead_is_ground(&self, _lead: usize) -> bool {
        false
    }

    /// Leads `a` and `b` are joined by a conduction path inside the component.
    fn leads_are_connected(&self, _a: usize, _b: usize) -> bool {
        true
    }

    /// Re-initialize time-dependent state.
    fn reset(&mut self) {
        let terminals = self.terminals_mut();
        terminals.volts.fill(0.0);
        terminals.current = 0.0;
    }
}
