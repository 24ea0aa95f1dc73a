//! # Circuit Core
//!
//! A discrete-time circuit simulator built on Modified Nodal Analysis.
//!
//! This library provides:
//! - A circuit graph of components wired lead to lead
//! - Topology analysis with diagnostics for unsolvable circuits
//! - Linear components (R, C, L), diodes, sources, switches and
//!   firmware-driven chips
//! - A fixed-step time iterator and a background driver thread
//!
//! ## Architecture
//!
//! - [`circuit`] - Circuit graph, lead wiring and the component registry
//! - [`components`] - Component models and the [`Component`](components::Component) trait
//! - [`solver`] - MNA assembly, topology analysis, LU solving and time stepping
//! - [`driver`] - Runs a simulator on its own thread
//! - [`scope`] - Timestamped read-back of component state
//! - [`error`] - Error types and diagnostic codes
//!
//! ## Usage
//!
//! ```
//! use circuit_core::components::{Ground, Resistor, VoltageSource};
//! use circuit_core::{Circuit, Simulator};
//!
//! # fn main() -> circuit_core::Result<()> {
//! let mut circuit = Circuit::new();
//! let ground = circuit.create(Ground::new())?;
//! let source = circuit.create(VoltageSource::dc(10.0))?;
//! let load = circuit.create(Resistor::new(100.0))?;
//! circuit.connect_leads(ground, 0, source, 0)?;
//! circuit.connect_leads(source, 1, load, 0)?;
//! circuit.connect_leads(load, 1, ground, 0)?;
//!
//! let mut sim = Simulator::new(circuit);
//! sim.tick()?;
//! assert!((sim.sample(load)?.current - 0.1).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```
//!
//! ## Simulation Method
//!
//! Every tick advances time by a fixed step h:
//!
//! 1. If the wiring changed, re-analyze: number the nodes, stamp the
//!    constant part of the matrix, reduce trivial rows and factor once if
//!    the circuit is linear
//! 2. Let components stamp their time-dependent contributions
//! 3. Solve, re-linearizing nonlinear components until they settle
//! 4. Scatter node voltages and source currents back to the components
//!
//! Capacitors and inductors use trapezoidal companion models by default,
//! with backward Euler available per component.

pub mod circuit;
pub mod components;
pub mod driver;
pub mod error;
pub mod scope;
pub mod solver;

// Re-export main types for convenience
pub use circuit::{Circuit, ComponentId, ComponentRegistry, Lead};
pub use driver::{Driver, DriverState};
pub use error::{ErrorCode, Result, SimError};
pub use scope::{Probe, ScopeSample};
pub use solver::{Simulator, SimulatorConfig};
