//! MNA (Modified Nodal Analysis) solver.
//!
//! This module provides the numerical engine for circuit simulation.
//!
//! ## Modified Nodal Analysis
//!
//! MNA assembles a system of equations Ax = z where:
//! - x contains node voltages and voltage-source currents
//! - A is the conductance/coefficient matrix
//! - z is the source vector
//!
//! The matrix structure is:
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! where:
//! - G is the conductance matrix (node equations)
//! - B, C connect voltage sources to nodes
//! - D is usually 0 (for ideal voltage sources)
//! - v is the vector of node voltages
//! - j is the vector of voltage source currents
//! - i is the sum of current sources into each node
//! - e is the vector of voltage source values
//!
//! Before solving, rows that never change during a time step and hold at
//! most two entries are solved symbolically and dropped, so the matrix
//! handed to [`lu`] is usually much smaller than the full system.

pub mod analyze;
pub mod lu;
mod mna;
pub mod path;
mod simulator;

pub use analyze::{analyze, CircuitNode, Topology};
pub use mna::{MnaSystem, RowInfo, RowKind};
pub use simulator::{Simulator, SimulatorConfig};

/// Default fixed time step in seconds.
pub const DEFAULT_TIME_STEP: f64 = 5e-6;

/// Maximum sub-iterations per time step for nonlinear circuits.
pub const MAX_SUB_ITERATIONS: usize = 5000;

/// Depth of the cheap first inductor path search.
pub const SHALLOW_PATH_DEPTH: usize = 5;

/// Resistance tying nodes with no path to ground down to ground.
pub const UNCONNECTED_NODE_RESISTANCE: f64 = 1e8;
