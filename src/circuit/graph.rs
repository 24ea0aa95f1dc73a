//! Circuit graph structure.

use std::any::type_name;
use std::collections::HashMap;

use super::registry::ComponentRegistry;
use super::types::{ComponentId, Lead, NodeId};
use crate::components::{Component, Switch};
use crate::error::{Result, SimError};

/// A circuit under construction or simulation.
///
/// Holds the components and a parallel node mesh recording, per component
/// lead, the raw node it is wired to. Raw node ids only say which leads
/// share a node; the analyzer assigns dense matrix indices separately.
#[derive(Debug)]
pub struct Circuit {
    /// All components in the circuit
    components: Vec<Box<dyn Component>>,

    /// Raw node per lead, one row per component; `None` is unconnected
    mesh: Vec<Vec<Option<NodeId>>>,

    /// Next raw node id to hand out
    next_node: usize,

    /// Topology changed since the last successful analysis
    dirty: bool,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    /// Create an empty circuit.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            mesh: Vec::new(),
            next_node: 1,
            dirty: true,
        }
    }

    /// Add a component, returning its id. All leads start unconnected.
    pub fn create<T: Component + 'static>(&mut self, component: T) -> Result<ComponentId> {
        self.insert(Box::new(component))
    }

    /// Add a component built by `registry` from a type tag and parameters.
    pub fn create_tagged(
        &mut self,
        registry: &ComponentRegistry,
        tag: &str,
        params: &HashMap<String, f64>,
    ) -> Result<ComponentId> {
        let component = registry.build(tag, params)?;
        self.insert(component)
    }

    /// Add a boxed component.
    pub fn insert(&mut self, component: Box<dyn Component>) -> Result<ComponentId> {
        let id = ComponentId(self.components.len());
        if self.mesh.len() != self.components.len() {
            return Err(SimError::RegistrationMismatch {
                component: id,
                registered: self.mesh.len(),
                expected: self.components.len(),
            });
        }
        self.mesh.push(vec![None; component.lead_count()]);
        self.components.push(component);
        self.dirty = true;
        Ok(id)
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Handle to lead `index` of a component, validated.
    pub fn lead(&self, id: ComponentId, index: usize) -> Result<Lead> {
        let row = self
            .mesh
            .get(id.0)
            .ok_or(SimError::ComponentNotFound { component: id })?;
        if index >= row.len() {
            return Err(SimError::InvalidLead {
                component: id,
                lead: index,
            });
        }
        Ok(Lead::new(id, index))
    }

    /// Raw node a lead is wired to.
    pub fn node_of(&self, lead: Lead) -> Result<Option<NodeId>> {
        let lead = self.lead(lead.component, lead.index)?;
        Ok(self.mesh[lead.component.0][lead.index])
    }

    /// Wire two leads into one node.
    ///
    /// If neither lead is connected, both get a fresh node. If one is, the
    /// other joins it. If both are, `b` is moved onto `a`'s node; any other
    /// leads still on `b`'s old node stay there.
    pub fn connect(&mut self, a: Lead, b: Lead) -> Result<()> {
        let na = self.node_of(a)?;
        let nb = self.node_of(b)?;
        let node = match (na, nb) {
            (Some(node), _) | (None, Some(node)) => node,
            (None, None) => {
                let node = NodeId(self.next_node);
                self.next_node += 1;
                node
            }
        };
        self.mesh[a.component.0][a.index] = Some(node);
        self.mesh[b.component.0][b.index] = Some(node);
        self.dirty = true;
        Ok(())
    }

    /// Wire lead `ia` of `a` to lead `ib` of `b`.
    pub fn connect_leads(&mut self, a: ComponentId, ia: usize, b: ComponentId, ib: usize) -> Result<()> {
        let la = self.lead(a, ia)?;
        let lb = self.lead(b, ib)?;
        self.connect(la, lb)
    }

    /// Borrow a component as its concrete type.
    pub fn component<T: Component + 'static>(&self, id: ComponentId) -> Result<&T> {
        self.get(id)?
            .as_any()
            .downcast_ref::<T>()
            .ok_or(SimError::WrongComponentType {
                component: id,
                expected: type_name::<T>(),
            })
    }

    /// Mutably borrow a component as its concrete type.
    ///
    /// Changes that affect stamped values or the unknown count must go
    /// through [`update`](Self::update) instead so the topology is
    /// re-analyzed.
    pub fn component_mut<T: Component + 'static>(&mut self, id: ComponentId) -> Result<&mut T> {
        let component = self
            .components
            .get_mut(id.0)
            .ok_or(SimError::ComponentNotFound { component: id })?;
        component
            .as_mut()
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(SimError::WrongComponentType {
                component: id,
                expected: type_name::<T>(),
            })
    }

    /// Mutate a component and mark the topology dirty.
    pub fn update<T, R>(&mut self, id: ComponentId, f: impl FnOnce(&mut T) -> R) -> Result<R>
    where
        T: Component + 'static,
    {
        let result = f(self.component_mut::<T>(id)?);
        self.dirty = true;
        Ok(result)
    }

    /// Open or close a switch.
    pub fn set_switch(&mut self, id: ComponentId, closed: bool) -> Result<()> {
        self.update::<Switch, _>(id, |s| s.set_closed(closed))
    }

    /// Flip a switch, returning its new state.
    pub fn toggle_switch(&mut self, id: ComponentId) -> Result<bool> {
        self.update::<Switch, _>(id, |s| {
            s.toggle();
            s.is_closed()
        })
    }

    /// Borrow a component through the trait.
    pub fn get(&self, id: ComponentId) -> Result<&dyn Component> {
        self.components
            .get(id.0)
            .map(|c| c.as_ref())
            .ok_or(SimError::ComponentNotFound { component: id })
    }

    /// Iterate over components with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, &dyn Component)> {
        self.components
            .iter()
            .enumerate()
            .map(|(i, c)| (ComponentId(i), c.as_ref()))
    }

    /// Topology changed since the last successful analysis.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Force a re-analysis before the next tick.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Components and node mesh, split so the analyzer can mutate one
    /// while reading the other.
    pub(crate) fn parts_mut(&mut self) -> (&mut [Box<dyn Component>], &[Vec<Option<NodeId>>]) {
        (self.components.as_mut_slice(), self.mesh.as_slice())
    }

    pub(crate) fn components_mut(&mut self) -> &mut [Box<dyn Component>] {
        &mut self.components
    }
}
