//! Degenerate-topology path search.
//!
//! Answers "is there a conduction path from node A to node B, possibly
//! through ground, using only components allowed by a filter?" The search
//! runs over the unreduced topology right after stamping.

use crate::components::{Component, ComponentKind};

/// Maximum difference between an inductor's current and the seed current
/// for the inductor to count as part of the same current path.
const INDUCTOR_CURRENT_TOLERANCE: f64 = 1e-10;

/// Which components a path may traverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Anything except current sources; inductors must carry the seed current
    Induct,
    /// Wires and voltage sources only
    Voltage,
    /// Wires only
    Short,
    /// Wires, capacitors and voltage sources
    CapacitorVoltage,
}

/// Depth-first search state for one query.
pub struct PathSearch<'a> {
    components: &'a [Box<dyn Component>],
    kind: PathKind,
    /// Component the query starts from; never traversed
    first: usize,
    dest: usize,
    used: Vec<bool>,
}

impl<'a> PathSearch<'a> {
    /// Prepare a search for a path ending at node `dest` that avoids the
    /// component at index `first`.
    pub fn new(
        components: &'a [Box<dyn Component>],
        node_count: usize,
        kind: PathKind,
        first: usize,
        dest: usize,
    ) -> Self {
        Self {
            components,
            kind,
            first,
            dest,
            used: vec![false; node_count],
        }
    }

    fn allows(&self, component: &dyn Component) -> bool {
        let kind = component.kind();
        match self.kind {
            PathKind::Induct => kind != ComponentKind::CurrentSource,
            PathKind::Voltage => component.is_wire() || kind.is_voltage_source(),
            PathKind::Short => component.is_wire(),
            PathKind::CapacitorVoltage => {
                component.is_wire()
                    || kind == ComponentKind::Capacitor
                    || kind.is_voltage_source()
            }
        }
    }

    /// Search from node `from`. `depth` bounds the number of nodes visited
    /// along a path; `None` searches without bound.
    pub fn find_path(&mut self, from: usize, depth: Option<usize>) -> bool {
        if from == self.dest {
            return true;
        }
        let depth = match depth {
            Some(0) => return false,
            Some(d) => Some(d - 1),
            None => None,
        };
        if self.used[from] {
            return false;
        }
        self.used[from] = true;
        let found = self.search_from(from, depth);
        self.used[from] = false;
        found
    }

    fn search_from(&mut self, from: usize, depth: Option<usize>) -> bool {
        let components = self.components;
        for (idx, component) in components.iter().enumerate() {
            if idx == self.first {
                continue;
            }
            let component = component.as_ref();
            if !self.allows(component) {
                continue;
            }
            let leads = component.lead_count();
            let nodes = &component.terminals().nodes;

            if from == 0 {
                // Paths may pass through ground
                for lead in 0..leads {
                    if component.lead_is_ground(lead) && self.find_path(nodes[lead], depth) {
                        return true;
                    }
                }
            }

            let Some(j) = (0..leads).find(|&lead| nodes[lead] == from) else {
                continue;
            };
            if component.lead_is_ground(j) && self.find_path(0, depth) {
                return true;
            }

            if self.kind == PathKind::Induct && component.kind() == ComponentKind::Inductor {
                let mut current = component.current();
                if j == 0 {
                    current = -current;
                }
                let seed = components[self.first].current();
                if (current - seed).abs() > INDUCTOR_CURRENT_TOLERANCE {
                    continue;
                }
            }

            for k in 0..leads {
                if k != j
                    && component.leads_are_connected(j, k)
                    && self.find_path(nodes[k], depth)
                {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{CurrentSource, Resistor, VoltageSource, Wire};

    fn placed(mut component: Box<dyn Component>, nodes: &[usize]) -> Box<dyn Component> {
        let count = component.lead_count() + component.internal_lead_count();
        let terminals = component.terminals_mut();
        terminals.allocate(count);
        terminals.nodes.copy_from_slice(nodes);
        component
    }

    #[test]
    fn test_resistor_path_for_current_source() {
        let components = vec![
            placed(Box::new(CurrentSource::new(1e-3)), &[0, 1]),
            placed(Box::new(Resistor::new(100.0)), &[1, 2]),
            placed(Box::new(Resistor::new(100.0)), &[2, 0]),
        ];
        let mut search = PathSearch::new(&components, 3, PathKind::Induct, 0, 1);
        assert!(search.find_path(0, None));
    }

    #[test]
    fn test_dead_end_has_no_path() {
        let components = vec![
            placed(Box::new(CurrentSource::new(1e-3)), &[0, 1]),
            placed(Box::new(Resistor::new(100.0)), &[1, 2]),
        ];
        let mut search = PathSearch::new(&components, 3, PathKind::Induct, 0, 1);
        assert!(!search.find_path(0, None));
    }

    #[test]
    fn test_voltage_filter_ignores_resistors() {
        let components = vec![
            placed(Box::new(VoltageSource::dc(5.0)), &[0, 1]),
            placed(Box::new(Resistor::new(100.0)), &[1, 0]),
        ];
        let mut search = PathSearch::new(&components, 2, PathKind::Voltage, 0, 1);
        assert!(!search.find_path(0, None));

        let components = vec![
            placed(Box::new(VoltageSource::dc(5.0)), &[0, 1]),
            placed(Box::new(Wire::new()), &[1, 0]),
        ];
        let mut search = PathSearch::new(&components, 2, PathKind::Voltage, 0, 1);
        assert!(search.find_path(0, None));
    }

    #[test]
    fn test_depth_bound() {
        // Chain of resistors 1-2-3-4-5-6-0 from node 1 back to ground
        let mut components = vec![placed(Box::new(CurrentSource::new(1e-3)), &[0, 1])];
        for n in 1..6 {
            components.push(placed(Box::new(Resistor::new(10.0)), &[n, n + 1]));
        }
        components.push(placed(Box::new(Resistor::new(10.0)), &[6, 0]));

        let mut search = PathSearch::new(&components, 7, PathKind::Induct, 0, 1);
        assert!(!search.find_path(0, Some(3)));
        assert!(search.find_path(0, None));
    }
}
