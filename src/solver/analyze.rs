//! Topology analysis.
//!
//! Turns the circuit graph into an MNA system: anchors ground, assigns
//! dense node indices, enumerates voltage sources, stamps every component,
//! regularizes nodes with no path to ground, rejects degenerate
//! topologies, then reduces and compacts the matrix. Linear systems are
//! factored here once; nonlinear ones are factored every sub-iteration.

use std::collections::HashMap;

use log::{debug, warn};

use super::mna::MnaSystem;
use super::path::{PathKind, PathSearch};
use super::simulator::SimulatorConfig;
use super::UNCONNECTED_NODE_RESISTANCE;
use crate::circuit::{Circuit, ComponentId, Lead, NodeId};
use crate::components::{Component, ComponentKind};
use crate::error::{Result, SimError};

/// A dense node discovered during analysis.
#[derive(Debug, Clone, Default)]
pub struct CircuitNode {
    /// Raw mesh node, if the node came from wiring
    pub raw: Option<NodeId>,
    /// Hidden node owned by a composite component
    pub internal: bool,
    /// Every lead that sits on this node
    pub links: Vec<Lead>,
}

/// Result of analyzing a circuit: what the solved unknowns map back to.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Dense nodes; index 0 is ground
    pub nodes: Vec<CircuitNode>,
    /// Owner of each voltage-source unknown and its local source index
    pub voltage_sources: Vec<(ComponentId, usize)>,
    /// Any component is nonlinear
    pub nonlinear: bool,
}

/// Where node 0 comes from.
enum GroundAnchor {
    /// Every Ground lead and whatever shares its node
    Ground,
    /// Lead 0 of this voltage source
    Source(usize),
    /// A private node nothing is wired to
    Private,
}

fn find_anchor(components: &[Box<dyn Component>]) -> GroundAnchor {
    let kinds = || components.iter().map(|c| c.kind());
    if kinds().any(|k| k == ComponentKind::Ground) {
        return GroundAnchor::Ground;
    }
    // Rails are referenced to ground themselves
    if kinds().any(|k| k == ComponentKind::Rail) {
        return GroundAnchor::Private;
    }
    match kinds().position(|k| k == ComponentKind::VoltageSource) {
        Some(idx) => GroundAnchor::Source(idx),
        None => GroundAnchor::Private,
    }
}

/// Analyze `circuit` into `mna`.
///
/// On error the circuit is left dirty so a corrected topology can retry.
pub fn analyze(
    circuit: &mut Circuit,
    mna: &mut MnaSystem,
    config: &SimulatorConfig,
) -> Result<Topology> {
    let (components, mesh) = circuit.parts_mut();
    mna.invalidate();

    if components.len() != mesh.len() {
        return Err(SimError::RegistrationMismatch {
            component: ComponentId(components.len().min(mesh.len())),
            registered: mesh.len(),
            expected: components.len(),
        });
    }
    for (i, (component, row)) in components.iter().zip(mesh).enumerate() {
        if row.len() != component.lead_count() {
            return Err(SimError::RegistrationMismatch {
                component: ComponentId(i),
                registered: row.len(),
                expected: component.lead_count(),
            });
        }
    }

    let nodes = assign_nodes(components, mesh);
    let node_count = nodes.len();

    // Voltage-source unknowns follow the node voltages
    let mut voltage_sources = Vec::new();
    let mut nonlinear = false;
    for (i, component) in components.iter_mut().enumerate() {
        let count = component.voltage_source_count();
        let first = voltage_sources.len();
        component.terminals_mut().voltage_sources = (first..first + count).collect();
        voltage_sources.extend((0..count).map(|local| (ComponentId(i), local)));
        nonlinear |= component.nonlinear();
    }

    mna.allocate(node_count, voltage_sources.len());
    mna.set_nonlinear(nonlinear);
    mna.set_converged(true);
    for component in components.iter_mut() {
        component.stamp(mna);
    }

    regularize_unreached(components, &nodes, mna);
    check_degenerate_paths(components, node_count, config.shallow_path_depth)?;

    if config.simplify {
        mna.simplify()?;
    }
    mna.compact()?;
    if !nonlinear {
        mna.factor()?;
    }

    debug!(
        "analyzed {} components: {} nodes, {} voltage sources, matrix {} -> {}, {}",
        components.len(),
        node_count,
        voltage_sources.len(),
        mna.full_size(),
        mna.size(),
        if nonlinear { "nonlinear" } else { "linear" }
    );

    Ok(Topology {
        nodes,
        voltage_sources,
        nonlinear,
    })
}

/// Resolve every lead to a dense node index, ground first.
fn assign_nodes(
    components: &mut [Box<dyn Component>],
    mesh: &[Vec<Option<NodeId>>],
) -> Vec<CircuitNode> {
    let anchor = find_anchor(components);
    let mut nodes = vec![CircuitNode::default()];
    let mut dense: HashMap<NodeId, usize> = HashMap::new();

    // Seed node 0 with every raw node tied to ground
    let is_forced_ground = |i: usize, lead: usize, kind: ComponentKind| match anchor {
        GroundAnchor::Ground => kind == ComponentKind::Ground,
        GroundAnchor::Source(idx) => i == idx && lead == 0,
        GroundAnchor::Private => false,
    };
    for (i, (component, row)) in components.iter().zip(mesh).enumerate() {
        for (lead, raw) in row.iter().enumerate() {
            if let Some(raw) = raw {
                if is_forced_ground(i, lead, component.kind()) {
                    dense.insert(*raw, 0);
                    nodes[0].raw = Some(*raw);
                }
            }
        }
    }

    for (i, (component, row)) in components.iter_mut().zip(mesh).enumerate() {
        let leads = component.lead_count();
        let internal = component.internal_lead_count();
        let kind = component.kind();
        let mut assigned = Vec::with_capacity(leads + internal);

        for (lead, raw) in row.iter().enumerate() {
            let idx = if is_forced_ground(i, lead, kind) {
                0
            } else {
                match raw {
                    Some(raw) => match dense.get(raw) {
                        Some(&idx) => idx,
                        None => {
                            let idx = fresh(&mut nodes, Some(*raw), false);
                            dense.insert(*raw, idx);
                            idx
                        }
                    },
                    None => fresh(&mut nodes, None, false),
                }
            };
            assigned.push(idx);
        }
        for _ in 0..internal {
            assigned.push(fresh(&mut nodes, None, true));
        }

        let terminals = component.terminals_mut();
        terminals.allocate(leads + internal);
        terminals.nodes.copy_from_slice(&assigned);
        for (lead, &idx) in assigned.iter().enumerate() {
            nodes[idx].links.push(Lead::new(ComponentId(i), lead));
            if idx == 0 {
                component.set_lead_voltage(lead, 0.0);
            }
        }
    }
    nodes
}

fn fresh(nodes: &mut Vec<CircuitNode>, raw: Option<NodeId>, internal: bool) -> usize {
    nodes.push(CircuitNode {
        raw,
        internal,
        links: Vec::new(),
    });
    nodes.len() - 1
}

/// Tie every node with no conduction path to ground to ground through a
/// very large resistor, so the matrix is not singular.
fn regularize_unreached(
    components: &[Box<dyn Component>],
    nodes: &[CircuitNode],
    mna: &mut MnaSystem,
) {
    let mut closure = vec![false; nodes.len()];
    closure[0] = true;
    loop {
        let mut changed = false;
        for component in components {
            let t = component.terminals();
            let leads = component.lead_count();
            for j in 0..leads {
                let nj = t.node(j);
                if !closure[nj] {
                    if component.lead_is_ground(j) {
                        closure[nj] = true;
                        changed = true;
                    }
                    continue;
                }
                for k in 0..leads {
                    let nk = t.node(k);
                    if k != j && !closure[nk] && component.leads_are_connected(j, k) {
                        closure[nk] = true;
                        changed = true;
                    }
                }
            }
        }
        if changed {
            continue;
        }

        let unreached = (0..nodes.len()).find(|&i| !closure[i] && !nodes[i].internal);
        let Some(i) = unreached else {
            break;
        };
        warn!("node {i} has no path to ground, tying it down with {UNCONNECTED_NODE_RESISTANCE} ohms");
        mna.stamp_resistor(0, i, UNCONNECTED_NODE_RESISTANCE);
        closure[i] = true;
    }
}

/// Reject current sources without a path, resistance-free voltage loops and
/// capacitor loops; reset inductors that cannot carry their current.
fn check_degenerate_paths(
    components: &mut [Box<dyn Component>],
    node_count: usize,
    shallow_depth: Option<usize>,
) -> Result<()> {
    for i in 0..components.len() {
        let component = components[i].as_ref();
        let kind = component.kind();
        if component.lead_count() != 2 {
            continue;
        }
        let (n0, n1) = (component.terminals().node(0), component.terminals().node(1));
        let id = ComponentId(i);
        let search = |kind: PathKind, depth: Option<usize>| {
            PathSearch::new(&*components, node_count, kind, i, n1).find_path(n0, depth)
        };

        match kind {
            ComponentKind::Inductor => {
                let shallow = shallow_depth.is_some_and(|d| search(PathKind::Induct, Some(d)));
                if !shallow && !search(PathKind::Induct, None) {
                    warn!("inductor {id} has no current path, resetting it");
                    let inductor = &mut components[i];
                    inductor.reset();
                    inductor.terminals_mut().current = 0.0;
                }
            }
            ComponentKind::CurrentSource => {
                if !search(PathKind::Induct, None) {
                    return Err(SimError::CurrentSourceOpen { component: id });
                }
            }
            ComponentKind::VoltageSource | ComponentKind::Wire | ComponentKind::Switch
                if kind == ComponentKind::VoltageSource || component.is_wire() =>
            {
                if search(PathKind::Voltage, None) {
                    return Err(SimError::VoltageLoop { component: id });
                }
            }
            ComponentKind::Capacitor => {
                if search(PathKind::Short, None) || search(PathKind::CapacitorVoltage, None) {
                    return Err(SimError::CapacitorLoop { component: id });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{
        CurrentSource, Ground, Inductor, Resistor, Switch, Terminals, VoltageSource, Wire,
    };

    fn analyze_default(circuit: &mut Circuit) -> Result<(Topology, MnaSystem)> {
        let config = SimulatorConfig::default();
        let mut mna = MnaSystem::new(config.time_step);
        let topology = analyze(circuit, &mut mna, &config)?;
        Ok((topology, mna))
    }

    /// Source (lead 1 positive) across a resistor, lead 0 grounded.
    fn source_and_resistor(circuit: &mut Circuit) -> (ComponentId, ComponentId, ComponentId) {
        let g = circuit.create(Ground::new()).unwrap();
        let v = circuit.create(VoltageSource::dc(10.0)).unwrap();
        let r = circuit.create(Resistor::new(100.0)).unwrap();
        circuit.connect_leads(v, 1, r, 0).unwrap();
        circuit.connect_leads(r, 1, v, 0).unwrap();
        circuit.connect_leads(g, 0, v, 0).unwrap();
        (g, v, r)
    }

    #[test]
    fn test_ground_leads_are_node_zero() {
        let mut circuit = Circuit::new();
        let (g, v, r) = source_and_resistor(&mut circuit);
        let (topology, mna) = analyze_default(&mut circuit).unwrap();

        assert_eq!(topology.nodes.len(), 2);
        assert_eq!(circuit.get(g).unwrap().terminals().nodes, vec![0]);
        assert_eq!(circuit.get(v).unwrap().terminals().nodes, vec![0, 1]);
        assert_eq!(circuit.get(r).unwrap().terminals().nodes, vec![1, 0]);
        assert_eq!(topology.voltage_sources, vec![(v, 0)]);
        assert!(!topology.nonlinear);
        assert_eq!(mna.full_size(), 2);
        assert!(mna.is_factored());
    }

    #[test]
    fn test_first_source_anchors_ground() {
        let mut circuit = Circuit::new();
        let v = circuit.create(VoltageSource::dc(5.0)).unwrap();
        let r = circuit.create(Resistor::new(100.0)).unwrap();
        circuit.connect_leads(v, 1, r, 0).unwrap();
        circuit.connect_leads(r, 1, v, 0).unwrap();
        let (topology, _) = analyze_default(&mut circuit).unwrap();

        assert_eq!(topology.nodes.len(), 2);
        assert_eq!(circuit.get(v).unwrap().terminals().nodes, vec![0, 1]);
        assert_eq!(circuit.get(r).unwrap().terminals().nodes, vec![1, 0]);
    }

    #[test]
    fn test_unconnected_leads_get_own_nodes() {
        let mut circuit = Circuit::new();
        circuit.create(Ground::new()).unwrap();
        let r = circuit.create(Resistor::new(100.0)).unwrap();
        let (topology, _) = analyze_default(&mut circuit).unwrap();
        // Ground, plus one node per dangling resistor lead
        assert_eq!(topology.nodes.len(), 3);
        assert_eq!(circuit.get(r).unwrap().terminals().nodes, vec![1, 2]);
    }

    #[test]
    fn test_floating_current_source() {
        let mut circuit = Circuit::new();
        let g = circuit.create(Ground::new()).unwrap();
        let i = circuit.create(CurrentSource::new(1e-3)).unwrap();
        let r = circuit.create(Resistor::new(100.0)).unwrap();
        circuit.connect_leads(g, 0, i, 0).unwrap();
        circuit.connect_leads(i, 1, r, 0).unwrap();

        let err = analyze_default(&mut circuit).unwrap_err();
        assert_eq!(err, SimError::CurrentSourceOpen { component: i });
    }

    #[test]
    fn test_wire_loop() {
        let mut circuit = Circuit::new();
        let (_, v, _) = source_and_resistor(&mut circuit);
        let w = circuit.create(Wire::new()).unwrap();
        circuit.connect_leads(w, 0, v, 0).unwrap();
        circuit.connect_leads(w, 1, v, 1).unwrap();

        let err = analyze_default(&mut circuit).unwrap_err();
        assert_eq!(err, SimError::VoltageLoop { component: v });
    }

    #[test]
    fn test_closed_switch_loop() {
        let mut circuit = Circuit::new();
        let g = circuit.create(Ground::new()).unwrap();
        let v = circuit.create(VoltageSource::dc(10.0)).unwrap();
        let r = circuit.create(Resistor::new(100.0)).unwrap();
        let s1 = circuit.create(Switch::new(true)).unwrap();
        let s2 = circuit.create(Switch::new(true)).unwrap();
        circuit.connect_leads(g, 0, v, 0).unwrap();
        circuit.connect_leads(v, 1, r, 0).unwrap();
        circuit.connect_leads(r, 1, s1, 0).unwrap();
        circuit.connect_leads(s1, 1, g, 0).unwrap();
        circuit.connect_leads(s1, 0, s2, 0).unwrap();
        circuit.connect_leads(s1, 1, s2, 1).unwrap();

        let err = analyze_default(&mut circuit).unwrap_err();
        assert_eq!(err, SimError::VoltageLoop { component: s1 });

        // One open switch breaks the loop
        circuit.set_switch(s2, false).unwrap();
        analyze_default(&mut circuit).unwrap();
    }

    #[test]
    fn test_floating_inductor_is_reset() {
        let mut circuit = Circuit::new();
        let (_, v, _) = source_and_resistor(&mut circuit);
        let l = circuit.create(Inductor::new(1e-3).with_initial_current(0.25)).unwrap();
        circuit.connect_leads(v, 1, l, 0).unwrap();

        analyze_default(&mut circuit).unwrap();
        assert_eq!(circuit.get(l).unwrap().current(), 0.0);
    }

    /// Component whose lead count can change after registration.
    #[derive(Debug, Default)]
    struct Morph {
        leads: usize,
        terminals: Terminals,
    }

    impl Component for Morph {
        fn kind(&self) -> ComponentKind {
            ComponentKind::Other
        }

        fn lead_count(&self) -> usize {
            self.leads
        }

        fn terminals(&self) -> &Terminals {
            &self.terminals
        }

        fn terminals_mut(&mut self) -> &mut Terminals {
            &mut self.terminals
        }

        fn stamp(&mut self, _mna: &mut MnaSystem) {}
    }

    #[test]
    fn test_registration_mismatch() {
        let mut circuit = Circuit::new();
        circuit.create(Ground::new()).unwrap();
        let m = circuit
            .create(Morph {
                leads: 2,
                ..Morph::default()
            })
            .unwrap();
        circuit.update::<Morph, _>(m, |m| m.leads = 3).unwrap();

        let err = analyze_default(&mut circuit).unwrap_err();
        assert_eq!(
            err,
            SimError::RegistrationMismatch {
                component: m,
                registered: 2,
                expected: 3
            }
        );
        assert_eq!(err.code(), Some(crate::error::ErrorCode::E8));
    }
}
