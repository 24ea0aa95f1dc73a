//! Timestamped read-back of component state for plotting.

use std::collections::VecDeque;
use std::io::{self, Write};

use crate::circuit::ComponentId;
use crate::error::Result;
use crate::solver::Simulator;

pub use crate::circuit::ScopeSample;

/// Default number of samples a [`Probe`] keeps.
pub const DEFAULT_PROBE_CAPACITY: usize = 4096;

/// Bounded sample history for one component.
///
/// Once full, the oldest sample is dropped for each new one.
#[derive(Debug, Clone)]
pub struct Probe {
    component: ComponentId,
    capacity: usize,
    samples: VecDeque<ScopeSample>,
}

impl Probe {
    pub fn new(component: ComponentId) -> Self {
        Self::with_capacity(component, DEFAULT_PROBE_CAPACITY)
    }

    /// A probe keeping at most `capacity` samples (at least one).
    pub fn with_capacity(component: ComponentId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            component,
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn component(&self) -> ComponentId {
        self.component
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sample the probed component and append it to the history.
    pub fn record(&mut self, simulator: &Simulator) -> Result<ScopeSample> {
        let sample = simulator.sample(self.component)?;
        self.push(sample);
        Ok(sample)
    }

    pub fn push(&mut self, sample: ScopeSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&ScopeSample> {
        self.samples.back()
    }

    /// Samples from oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = &ScopeSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Drain the history, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = ScopeSample> + '_ {
        self.samples.drain(..)
    }

    /// Write the history as `time,current,voltage` CSV rows, with header.
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "time,current,voltage")?;
        for sample in &self.samples {
            write_csv_row(&mut out, sample)?;
        }
        Ok(())
    }
}

/// Write one sample as a CSV row.
pub fn write_csv_row<W: Write>(out: &mut W, sample: &ScopeSample) -> io::Result<()> {
    writeln!(out, "{},{},{}", sample.time, sample.current, sample.voltage)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::circuit::Circuit;
    use crate::components::{Ground, Resistor, VoltageSource};

    fn sample(time: f64) -> ScopeSample {
        ScopeSample {
            time,
            current: 0.0,
            voltage: 0.0,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut probe = Probe::with_capacity(ComponentId(0), 3);
        for i in 0..5 {
            probe.push(sample(i as f64));
        }
        assert_eq!(probe.len(), 3);
        let times: Vec<f64> = probe.samples().map(|s| s.time).collect();
        assert_eq!(times, vec![2.0, 3.0, 4.0]);
        assert_eq!(probe.latest().map(|s| s.time), Some(4.0));
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut probe = Probe::with_capacity(ComponentId(0), 0);
        probe.push(sample(1.0));
        probe.push(sample(2.0));
        assert_eq!(probe.len(), 1);
    }

    #[test]
    fn test_record_from_simulator() {
        let mut circuit = Circuit::new();
        let g = circuit.create(Ground::new()).unwrap();
        let v = circuit.create(VoltageSource::dc(5.0)).unwrap();
        let r = circuit.create(Resistor::new(1000.0)).unwrap();
        circuit.connect_leads(g, 0, v, 0).unwrap();
        circuit.connect_leads(v, 1, r, 0).unwrap();
        circuit.connect_leads(r, 1, g, 0).unwrap();

        let mut sim = Simulator::new(circuit);
        let mut probe = Probe::new(r);
        for _ in 0..4 {
            sim.tick().unwrap();
            probe.record(&sim).unwrap();
        }

        assert_eq!(probe.len(), 4);
        let last = probe.latest().unwrap();
        assert_relative_eq!(last.current, 5e-3, epsilon = 1e-12);
        assert_relative_eq!(last.voltage.abs(), 5.0, epsilon = 1e-9);
        assert_eq!(last.time, sim.time());

        assert!(Probe::new(ComponentId(42)).record(&sim).is_err());
    }

    #[test]
    fn test_write_csv() {
        let mut probe = Probe::new(ComponentId(0));
        probe.push(ScopeSample {
            time: 0.5,
            current: 1.0,
            voltage: -2.0,
        });
        let mut out = Vec::new();
        probe.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "time,current,voltage\n0.5,1,-2\n");
    }
}
