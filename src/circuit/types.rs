//! Core types for circuit representation.

use std::fmt;

/// A raw node id allocated by [`Circuit::connect`](super::Circuit::connect).
///
/// Raw ids are independent of the dense numbering the analyzer assigns to
/// matrix rows; they only record which leads share an electrical node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// A unique identifier for a component in the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// A component terminal, identified by (component, lead index).
///
/// Leads are plain handles used for wiring; they never own the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lead {
    pub component: ComponentId,
    pub index: usize,
}

impl Lead {
    pub fn new(component: ComponentId, index: usize) -> Self {
        Self { component, index }
    }
}

impl fmt::Display for Lead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.index)
    }
}

/// A timestamped read-back of one component's electrical state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeSample {
    /// Simulated time in seconds
    pub time: f64,
    /// Current through the component in amperes
    pub current: f64,
    /// Voltage across the component in volts
    pub voltage: f64,
}
