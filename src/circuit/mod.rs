//! Circuit graph representation.
//!
//! The [`Circuit`] struct holds all components and the node mesh recording
//! how their leads are wired, in a form the analyzer can turn into an MNA
//! system. Components are added directly or through a [`ComponentRegistry`].

mod graph;
mod registry;
mod types;

pub use graph::Circuit;
pub use registry::{ComponentRegistry, Constructor};
pub use types::*;
