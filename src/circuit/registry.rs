//! Tag-based component construction.
//!
//! Maps a component type tag (`"resistor"`, `"capacitor"`, ...) to a
//! constructor closure taking a parameter table. The registry is built once
//! at startup; looking up a tag never reflects over types.

use std::collections::HashMap;
use std::fmt;

use crate::components::{
    Capacitor, Component, CurrentSource, Diode, DiodeModel, Ground, Inductor, Rail, Resistor,
    Signal, Switch, VoltageSource, Waveform, Wire, DEFAULT_ZENER_VOLTAGE,
};
use crate::error::{Result, SimError};

/// Constructor registered for a tag.
pub type Constructor =
    Box<dyn Fn(&HashMap<String, f64>) -> Result<Box<dyn Component>> + Send + Sync>;

/// Registry of component constructors keyed by type tag.
pub struct ComponentRegistry {
    constructors: HashMap<String, Constructor>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("ComponentRegistry").field("tags", &tags).finish()
    }
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry holding every built-in component.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (tag, constructor) in builtin_constructors() {
            registry.constructors.insert(tag.to_string(), constructor);
        }
        registry
    }

    /// Register a constructor. Registering a tag twice is an error.
    pub fn register<F>(&mut self, tag: &str, constructor: F) -> Result<()>
    where
        F: Fn(&HashMap<String, f64>) -> Result<Box<dyn Component>> + Send + Sync + 'static,
    {
        let tag = tag.to_lowercase();
        if self.constructors.contains_key(&tag) {
            return Err(SimError::DuplicateComponentType { component_type: tag });
        }
        self.constructors.insert(tag, Box::new(constructor));
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(&tag.to_lowercase())
    }

    /// Build a component from its tag and parameters.
    pub fn build(&self, tag: &str, params: &HashMap<String, f64>) -> Result<Box<dyn Component>> {
        let constructor = self
            .constructors
            .get(&tag.to_lowercase())
            .ok_or_else(|| SimError::UnknownComponentType {
                component_type: tag.to_string(),
            })?;
        constructor(params)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Look up a parameter, falling back to `default`.
fn param(params: &HashMap<String, f64>, name: &str, default: f64) -> f64 {
    params.get(name).copied().unwrap_or(default)
}

/// Look up a parameter that must be present, finite and positive.
fn positive(params: &HashMap<String, f64>, component: &str, name: &str) -> Result<f64> {
    let value = params
        .get(name)
        .copied()
        .ok_or_else(|| SimError::invalid_parameter(component, name, "missing"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(SimError::invalid_parameter(
            component,
            name,
            format!("must be positive, got {value}"),
        ));
    }
    Ok(value)
}

fn signal(params: &HashMap<String, f64>, component: &str) -> Result<Signal> {
    let waveform = match params.get("waveform") {
        Some(&index) => Waveform::from_index(index).ok_or_else(|| {
            SimError::invalid_parameter(component, "waveform", format!("unknown waveform {index}"))
        })?,
        None => Waveform::Dc,
    };
    let mut signal = Signal::new(
        waveform,
        param(params, "voltage", 5.0),
        param(params, "frequency", 40.0),
    );
    signal.bias = param(params, "bias", 0.0);
    signal.phase_shift = param(params, "phase", 0.0);
    signal.duty_cycle = param(params, "duty", 0.5);
    Ok(signal)
}

fn constructor<F>(f: F) -> Constructor
where
    F: Fn(&HashMap<String, f64>) -> Result<Box<dyn Component>> + Send + Sync + 'static,
{
    Box::new(f)
}

fn boxed(component: impl Component + 'static) -> Result<Box<dyn Component>> {
    Ok(Box::new(component))
}

fn builtin_constructors() -> Vec<(&'static str, Constructor)> {
    vec![
        ("ground", constructor(|_| boxed(Ground::new()))),
        ("wire", constructor(|_| boxed(Wire::new()))),
        (
            "resistor",
            constructor(|p| boxed(Resistor::new(positive(p, "resistor", "resistance")?))),
        ),
        (
            "capacitor",
            constructor(|p| {
                let mut c = Capacitor::new(positive(p, "capacitor", "capacitance")?);
                c.trapezoidal = param(p, "trapezoidal", 1.0) != 0.0;
                boxed(c)
            }),
        ),
        (
            "inductor",
            constructor(|p| {
                let mut l = Inductor::new(positive(p, "inductor", "inductance")?)
                    .with_initial_current(param(p, "current", 0.0));
                l.trapezoidal = param(p, "trapezoidal", 1.0) != 0.0;
                boxed(l)
            }),
        ),
        (
            "diode",
            constructor(|p| {
                let defaults = DiodeModel::default();
                let model = DiodeModel {
                    leakage: param(p, "leakage", defaults.leakage),
                    forward_drop: param(p, "forward_drop", defaults.forward_drop),
                    zener_voltage: param(p, "zener_voltage", 0.0),
                };
                if model.leakage <= 0.0 || model.forward_drop <= 0.0 {
                    return Err(SimError::invalid_parameter(
                        "diode",
                        "forward_drop",
                        "leakage and forward drop must be positive",
                    ));
                }
                boxed(Diode::with_model(model))
            }),
        ),
        ("led", constructor(|_| boxed(Diode::led()))),
        (
            "zener",
            constructor(|p| boxed(Diode::zener(param(p, "zener_voltage", DEFAULT_ZENER_VOLTAGE)))),
        ),
        (
            "voltage",
            constructor(|p| boxed(VoltageSource::new(signal(p, "voltage")?))),
        ),
        ("rail", constructor(|p| boxed(Rail::new(signal(p, "rail")?)))),
        (
            "current",
            constructor(|p| boxed(CurrentSource::new(param(p, "current", 0.01)))),
        ),
        (
            "switch",
            constructor(|p| boxed(Switch::new(param(p, "closed", 1.0) != 0.0))),
        ),
    ]
}
