//! Control components: Switch.

use super::{Component, ComponentKind, Terminals};
use crate::solver::MnaSystem;

/// A single-pole single-throw switch.
///
/// Closed, it is an ideal wire stamped as a 0 V voltage source. Open, it
/// stamps nothing and its leads are topologically disconnected. The unknown
/// count depends on the state, so changing it requires a new analysis; go
/// through [`Circuit::set_switch`](crate::circuit::Circuit::set_switch) so
/// the topology is marked dirty.
#[derive(Debug, Clone, Default)]
pub struct Switch {
    closed: bool,
    terminals: Terminals,
}

impl Switch {
    /// Create a new switch.
    pub fn new(closed: bool) -> Self {
        Self {
            closed,
            terminals: Terminals::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_closed(&mut self, closed: bool) {
        self.closed = closed;
        if !closed {
            self.terminals.current = 0.0;
        }
    }

    /// Flip the switch.
    pub fn toggle(&mut self) {
        self.set_closed(!self.closed);
    }
}

impl Component for Switch {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Switch
    }

    fn lead_count(&self) -> usize {
        2
    }

    fn voltage_source_count(&self) -> usize {
        usize::from(self.closed)
    }

    fn terminals(&self) -> &Terminals {
        &self.terminals
    }

    fn terminals_mut(&mut self) -> &mut Terminals {
        &mut self.terminals
    }

    fn stamp(&mut self, mna: &mut MnaSystem) {
        if self.closed {
            let t = &self.terminals;
            mna.stamp_voltage_source(t.node(0), t.node(1), t.voltage_source(0), 0.0);
        }
    }

    fn calculate_current(&mut self) {
        if !self.closed {
            self.terminals.current = 0.0;
        }
    }

    fn is_wire(&self) -> bool {
        self.closed
    }

    fn leads_are_connected(&self, _a: usize, _b: usize) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_state() {
        let mut s = Switch::new(true);
        assert!(s.is_wire());
        assert_eq!(s.voltage_source_count(), 1);

        s.terminals.current = 0.3;
        s.toggle();
        assert!(!s.is_closed());
        assert!(!s.leads_are_connected(0, 1));
        assert_eq!(s.voltage_source_count(), 0);
        assert_eq!(s.current(), 0.0);
    }
}
