//! Main simulator interface.

use log::debug;

use crate::circuit::{Circuit, ComponentId, ScopeSample};
use crate::error::{Result, SimError};

use super::analyze::{analyze, Topology};
use super::mna::MnaSystem;
use super::{DEFAULT_TIME_STEP, MAX_SUB_ITERATIONS, SHALLOW_PATH_DEPTH};

/// Sub-iteration counts above this are logged.
const SLOW_CONVERGENCE_LOG_THRESHOLD: usize = 5;

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Fixed time step in seconds.
    pub time_step: f64,
    /// Sub-iteration budget per step for nonlinear circuits.
    pub max_sub_iterations: usize,
    /// Solve constant and equal rows symbolically before factoring.
    pub simplify: bool,
    /// Depth of the cheap first inductor path search; `None` skips it.
    pub shallow_path_depth: Option<usize>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            time_step: DEFAULT_TIME_STEP,
            max_sub_iterations: MAX_SUB_ITERATIONS,
            simplify: true,
            shallow_path_depth: Some(SHALLOW_PATH_DEPTH),
        }
    }
}

impl SimulatorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fixed time step (seconds).
    pub fn with_time_step(mut self, time_step: f64) -> Self {
        self.time_step = time_step;
        self
    }

    /// Set the sub-iteration budget for nonlinear circuits.
    pub fn with_max_sub_iterations(mut self, max_sub_iterations: usize) -> Self {
        self.max_sub_iterations = max_sub_iterations;
        self
    }

    /// Enable or disable symbolic row reduction.
    ///
    /// Disabling it hands the full matrix to the LU solver; results are the
    /// same, only slower.
    pub fn with_simplify(mut self, simplify: bool) -> Self {
        self.simplify = simplify;
        self
    }

    /// Set the depth of the first inductor path search.
    pub fn with_shallow_path_depth(mut self, depth: Option<usize>) -> Self {
        self.shallow_path_depth = depth;
        self
    }

    fn validate_time_step(time_step: f64) -> Result<()> {
        if !time_step.is_finite() || time_step <= 0.0 {
            return Err(SimError::InvalidSimulationParam {
                message: format!("time step must be positive and finite, got {time_step}"),
            });
        }
        Ok(())
    }
}

/// The main circuit simulator.
///
/// Owns the circuit and its MNA system. The topology is analyzed lazily:
/// any change that marks the circuit dirty is picked up by the next
/// [`tick`](Self::tick).
#[derive(Debug)]
pub struct Simulator {
    /// The circuit being simulated
    circuit: Circuit,
    /// MNA matrix system
    mna: MnaSystem,
    config: SimulatorConfig,
    /// Mapping from unknowns back to leads, from the last analysis
    topology: Option<Topology>,
}

impl Simulator {
    /// Create a new simulator for the given circuit with default configuration.
    pub fn new(circuit: Circuit) -> Self {
        Self::with_config(circuit, SimulatorConfig::default())
    }

    /// Create a new simulator for the given circuit with custom configuration.
    pub fn with_config(circuit: Circuit, config: SimulatorConfig) -> Self {
        Self {
            circuit,
            mna: MnaSystem::new(config.time_step),
            config,
            topology: None,
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Get a reference to the circuit.
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// Get a mutable reference to the circuit.
    ///
    /// Wiring changes mark the topology dirty themselves; for other changes
    /// that affect stamping call [`Circuit::mark_dirty`].
    pub fn circuit_mut(&mut self) -> &mut Circuit {
        &mut self.circuit
    }

    pub fn into_circuit(self) -> Circuit {
        self.circuit
    }

    /// The MNA system from the last analysis.
    pub fn mna(&self) -> &MnaSystem {
        &self.mna
    }

    /// The node and voltage-source map from the last successful analysis.
    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    /// Simulated time in seconds.
    pub fn time(&self) -> f64 {
        self.mna.time()
    }

    pub fn time_step(&self) -> f64 {
        self.config.time_step
    }

    /// The last tick's nonlinear iteration settled.
    pub fn converged(&self) -> bool {
        self.mna.converged()
    }

    /// Change the fixed time step. Companion models depend on it, so the
    /// topology is re-analyzed before the next tick.
    pub fn set_time_step(&mut self, time_step: f64) -> Result<()> {
        SimulatorConfig::validate_time_step(time_step)?;
        self.config.time_step = time_step;
        self.mna.set_time_step(time_step);
        self.circuit.mark_dirty();
        Ok(())
    }

    /// Rewind to t = 0 and reset every component's time-dependent state.
    pub fn reset_time(&mut self) {
        self.mna.set_time(0.0);
        for component in self.circuit.components_mut() {
            component.reset();
        }
        self.circuit.mark_dirty();
    }

    /// Analyze the circuit now instead of on the next tick.
    pub fn analyze(&mut self) -> Result<()> {
        SimulatorConfig::validate_time_step(self.config.time_step)?;
        self.mna.set_time_step(self.config.time_step);
        self.topology = None;
        let topology = analyze(&mut self.circuit, &mut self.mna, &self.config)?;
        self.topology = Some(topology);
        self.circuit.mark_clean();
        Ok(())
    }

    /// Advance the simulation by one time step, re-analyzing first if the
    /// topology changed.
    ///
    /// A failed tick drops the factored matrix and leaves the circuit
    /// marked for re-analysis.
    pub fn tick(&mut self) -> Result<()> {
        if self.circuit.is_dirty() || self.topology.is_none() {
            self.analyze()?;
        }
        let result = self.run_sub_iterations();
        if result.is_err() {
            self.mna.invalidate();
            self.circuit.mark_dirty();
        }
        result
    }

    /// Run `ticks` time steps.
    pub fn run(&mut self, ticks: usize) -> Result<()> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    fn run_sub_iterations(&mut self) -> Result<()> {
        let Some(topology) = self.topology.as_ref() else {
            return Ok(());
        };
        let mna = &mut self.mna;
        let components = self.circuit.components_mut();
        let nonlinear = mna.is_nonlinear();
        let node_unknowns = topology.nodes.len() - 1;
        let max = self.config.max_sub_iterations;

        for component in components.iter_mut() {
            component.begin_step(mna);
        }

        let mut subiter = 0;
        while subiter < max {
            mna.set_converged(true);
            mna.restore();
            for component in components.iter_mut() {
                component.step(mna);
            }
            mna.check_finite()?;

            if nonlinear {
                if mna.converged() && subiter > 0 {
                    break;
                }
                mna.factor()?;
            }
            mna.solve();

            for j in 0..mna.full_size() {
                let value = mna.unknown_value(j);
                if value.is_nan() {
                    mna.set_converged(false);
                    break;
                }
                if j < node_unknowns {
                    for link in &topology.nodes[j + 1].links {
                        components[link.component.0].set_lead_voltage(link.index, value);
                    }
                } else {
                    let (owner, local) = topology.voltage_sources[j - node_unknowns];
                    components[owner.0].set_current(local, value);
                }
            }

            if !nonlinear {
                break;
            }
            subiter += 1;
        }

        if subiter > SLOW_CONVERGENCE_LOG_THRESHOLD {
            debug!("converged after {subiter} sub-iterations");
        }
        if subiter >= max {
            return Err(SimError::ConvergenceFailure { iterations: max });
        }

        mna.advance_time();
        Ok(())
    }

    /// Timestamped current and voltage of one component.
    pub fn sample(&self, id: ComponentId) -> Result<ScopeSample> {
        let component = self.circuit.get(id)?;
        Ok(ScopeSample {
            time: self.time(),
            current: component.current(),
            voltage: component.voltage_delta(),
        })
    }

    /// Solved voltage at a lead of a component.
    pub fn lead_voltage(&self, id: ComponentId, lead: usize) -> Result<f64> {
        let lead = self.circuit.lead(id, lead)?;
        let component = self.circuit.get(id)?;
        Ok(component.terminals().volts.get(lead.index).copied().unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::components::{Ground, Resistor, VoltageSource};

    fn ohm_circuit() -> (Circuit, ComponentId, ComponentId) {
        let mut circuit = Circuit::new();
        let g = circuit.create(Ground::new()).unwrap();
        let v = circuit.create(VoltageSource::dc(10.0)).unwrap();
        let r = circuit.create(Resistor::new(100.0)).unwrap();
        circuit.connect_leads(g, 0, v, 0).unwrap();
        circuit.connect_leads(v, 1, r, 0).unwrap();
        circuit.connect_leads(r, 1, g, 0).unwrap();
        (circuit, v, r)
    }

    #[test]
    fn test_config_builder() {
        let config = SimulatorConfig::new()
            .with_time_step(1e-6)
            .with_max_sub_iterations(10)
            .with_simplify(false)
            .with_shallow_path_depth(None);
        assert_eq!(config.time_step, 1e-6);
        assert_eq!(config.max_sub_iterations, 10);
        assert!(!config.simplify);
        assert_eq!(config.shallow_path_depth, None);
    }

    #[test]
    fn test_tick_analyzes_lazily() {
        let (circuit, v, r) = ohm_circuit();
        let mut sim = Simulator::new(circuit);
        assert!(sim.topology().is_none());
        sim.tick().unwrap();
        assert!(sim.topology().is_some());
        assert!(!sim.circuit().is_dirty());

        assert_relative_eq!(sim.sample(r).unwrap().current, 0.1, epsilon = 1e-12);
        assert_relative_eq!(sim.sample(v).unwrap().voltage, 10.0, epsilon = 1e-12);
        assert_relative_eq!(sim.lead_voltage(r, 0).unwrap(), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_set_time_step() {
        let (circuit, _, _) = ohm_circuit();
        let mut sim = Simulator::new(circuit);
        sim.tick().unwrap();
        assert!(sim.set_time_step(0.0).is_err());
        assert!(sim.set_time_step(f64::NAN).is_err());
        sim.set_time_step(1e-3).unwrap();
        assert!(sim.circuit().is_dirty());
        sim.tick().unwrap();
        assert_relative_eq!(sim.time(), 5e-6 + 1e-3, epsilon = 1e-15);
    }

    #[test]
    fn test_reset_time() {
        let (circuit, _, _) = ohm_circuit();
        let mut sim = Simulator::new(circuit);
        sim.run(10).unwrap();
        assert!(sim.time() > 0.0);
        sim.reset_time();
        assert_eq!(sim.time(), 0.0);
        assert!(sim.circuit().is_dirty());
    }

    #[test]
    fn test_convergence_budget() {
        use crate::components::Diode;

        let mut circuit = Circuit::new();
        let g = circuit.create(Ground::new()).unwrap();
        let v = circuit.create(VoltageSource::dc(5.0)).unwrap();
        let r = circuit.create(Resistor::new(1000.0)).unwrap();
        let d = circuit.create(Diode::new()).unwrap();
        circuit.connect_leads(g, 0, v, 0).unwrap();
        circuit.connect_leads(v, 1, r, 0).unwrap();
        circuit.connect_leads(r, 1, d, 0).unwrap();
        circuit.connect_leads(d, 1, g, 0).unwrap();

        // A single sub-iteration can never confirm convergence
        let config = SimulatorConfig::new().with_max_sub_iterations(1);
        let mut sim = Simulator::with_config(circuit, config);
        let err = sim.tick().unwrap_err();
        assert_eq!(err, SimError::ConvergenceFailure { iterations: 1 });
        assert!(sim.circuit().is_dirty());
        assert!(!sim.mna().is_factored());
    }
}
