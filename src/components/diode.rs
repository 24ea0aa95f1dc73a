//! Diode model.
//!
//! Uses the Shockley diode equation:
//!   I = Is * (exp(V / Vt) - 1)
//!
//! with `Vt` derived from the forward drop at 1 A. For each sub-iteration
//! the exponential is linearized around the previous voltage guess:
//!   I ≈ I0 + G_d * (V - V0)
//!
//! where G_d = dI/dV = Is/Vt * exp(V0/Vt). Large voltage steps are limited
//! logarithmically so `exp()` cannot overflow. A configured breakdown
//! voltage adds the reverse Zener branch.

use super::{Component, ComponentKind, Terminals};
use crate::solver::MnaSystem;

/// Forward drop of a silicon diode at 1 A.
pub const DEFAULT_FORWARD_DROP: f64 = 0.805904783;
/// Forward drop of a red LED at 1 A.
pub const LED_FORWARD_DROP: f64 = 2.1024259;
/// Default Zener breakdown voltage.
pub const DEFAULT_ZENER_VOLTAGE: f64 = 5.6;

/// Successive voltage estimates differing by more than this are not converged.
const CONVERGENCE_TOLERANCE: f64 = 0.01;
/// Current at which the Zener breakdown voltage is specified.
const ZENER_TEST_CURRENT: f64 = -0.005;

/// Parameters for a diode model.
#[derive(Debug, Clone, PartialEq)]
pub struct DiodeModel {
    /// Saturation current (Is)
    pub leakage: f64,
    /// Forward voltage at 1 A
    pub forward_drop: f64,
    /// Reverse breakdown voltage; 0 disables the Zener branch
    pub zener_voltage: f64,
}

impl Default for DiodeModel {
    fn default() -> Self {
        Self {
            leakage: 1e-14,
            forward_drop: DEFAULT_FORWARD_DROP,
            zener_voltage: 0.0,
        }
    }
}

impl DiodeModel {
    /// Create parameters for an LED.
    pub fn led() -> Self {
        Self {
            forward_drop: LED_FORWARD_DROP,
            ..Self::default()
        }
    }

    /// Create parameters for a Zener diode.
    pub fn zener(breakdown: f64) -> Self {
        Self {
            zener_voltage: breakdown,
            ..Self::default()
        }
    }
}

/// Constants derived from a [`DiodeModel`].
#[derive(Debug, Clone, Copy)]
struct Derived {
    /// 1 / Vt
    vdcoef: f64,
    vt: f64,
    /// Voltage above which steps are limited
    vcrit: f64,
    /// Reverse offset of the Zener branch
    zoffset: f64,
}

impl Derived {
    fn from_model(model: &DiodeModel) -> Self {
        let vdcoef = (1.0 / model.leakage + 1.0).ln() / model.forward_drop;
        let vt = 1.0 / vdcoef;
        let vcrit = vt * (vt / (std::f64::consts::SQRT_2 * model.leakage)).ln();
        let zoffset = if model.zener_voltage == 0.0 {
            0.0
        } else {
            model.zener_voltage - (-(1.0 + ZENER_TEST_CURRENT / model.leakage)).ln() / vdcoef
        };
        Self {
            vdcoef,
            vt,
            vcrit,
            zoffset,
        }
    }
}

/// A diode component. Lead 0 is the anode, lead 1 the cathode.
#[derive(Debug, Clone)]
pub struct Diode {
    model: DiodeModel,
    derived: Derived,
    terminals: Terminals,
    /// Voltage the last linearization was built around
    last_voltage_delta: f64,
}

impl Diode {
    /// Create a silicon diode.
    pub fn new() -> Self {
        Self::with_model(DiodeModel::default())
    }

    pub fn with_model(model: DiodeModel) -> Self {
        Self {
            derived: Derived::from_model(&model),
            model,
            terminals: Terminals::default(),
            last_voltage_delta: 0.0,
        }
    }

    /// Create an LED.
    pub fn led() -> Self {
        Self::with_model(DiodeModel::led())
    }

    /// Create a Zener diode with the given breakdown voltage.
    pub fn zener(breakdown: f64) -> Self {
        Self::with_model(DiodeModel::zener(breakdown))
    }

    pub fn model(&self) -> &DiodeModel {
        &self.model
    }

    fn is_zener(&self) -> bool {
        self.model.zener_voltage != 0.0
    }

    /// Logarithmic damping of a forward step, or `None` if the step is small.
    fn limit_forward(&self, vnew: f64, vold: f64) -> Option<f64> {
        let Derived { vt, vcrit, .. } = self.derived;
        if vnew <= vcrit || (vnew - vold).abs() <= vt + vt {
            return None;
        }
        let limited = if vold > 0.0 {
            let arg = 1.0 + (vnew - vold) / vt;
            if arg > 0.0 {
                vold + vt * arg.ln()
            } else {
                vcrit
            }
        } else {
            vt * (vnew / vt).ln()
        };
        Some(limited)
    }

    /// Limit the step from `vold` to `vnew`, flagging non-convergence when
    /// the step was clamped.
    fn limit_step(&self, mna: &mut MnaSystem, vnew: f64, vold: f64) -> f64 {
        if let Some(limited) = self.limit_forward(vnew, vold) {
            mna.set_not_converged();
            return limited;
        }
        let zoffset = self.derived.zoffset;
        if vnew < 0.0 && zoffset != 0.0 {
            // Same limiting on the breakdown side, in translated coordinates
            let tnew = -vnew - zoffset;
            let told = -vold - zoffset;
            if let Some(limited) = self.limit_forward(tnew, told) {
                mna.set_not_converged();
                return -(limited + zoffset);
            }
        }
        vnew
    }

    /// Diode current at voltage `v`.
    pub fn current_at(&self, v: f64) -> f64 {
        let Derived {
            vdcoef, zoffset, ..
        } = self.derived;
        let leakage = self.model.leakage;
        if v >= 0.0 || !self.is_zener() {
            leakage * ((v * vdcoef).exp() - 1.0)
        } else {
            leakage * ((v * vdcoef).exp() - ((-v - zoffset) * vdcoef).exp() - 1.0)
        }
    }
}

impl Default for Diode {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for Diode {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Diode
    }

    fn lead_count(&self) -> usize {
        2
    }

    fn terminals(&self) -> &Terminals {
        &self.terminals
    }

    fn terminals_mut(&mut self) -> &mut Terminals {
        &mut self.terminals
    }

    fn nonlinear(&self) -> bool {
        true
    }

    fn stamp(&mut self, mna: &mut MnaSystem) {
        mna.mark_nonlinear(self.terminals.node(0));
        mna.mark_nonlinear(self.terminals.node(1));
    }

    fn step(&mut self, mna: &mut MnaSystem) {
        let (n0, n1) = (self.terminals.node(0), self.terminals.node(1));
        let Derived {
            vdcoef, zoffset, ..
        } = self.derived;
        let leakage = self.model.leakage;

        let raw = self.terminals.voltage_delta();
        if (raw - self.last_voltage_delta).abs() > CONVERGENCE_TOLERANCE {
            mna.set_not_converged();
        }
        let v = self.limit_step(mna, raw, self.last_voltage_delta);
        self.last_voltage_delta = v;

        let (geq, nc) = if v >= 0.0 || !self.is_zener() {
            let eval = if v < 0.0 { 1.0 } else { (v * vdcoef).exp() };
            let geq = vdcoef * leakage * eval;
            (geq, (eval - 1.0) * leakage - geq * v)
        } else {
            let forward = (v * vdcoef).exp();
            let reverse = ((-v - zoffset) * vdcoef).exp();
            let geq = leakage * vdcoef * (forward + reverse);
            (geq, leakage * (forward - reverse - 1.0) + geq * -v)
        };
        mna.stamp_conductance(n0, n1, geq);
        mna.stamp_current_source(n0, n1, nc);
    }

    fn calculate_current(&mut self) {
        self.terminals.current = self.current_at(self.terminals.voltage_delta());
    }

    fn reset(&mut self) {
        self.terminals.volts.fill(0.0);
        self.terminals.current = 0.0;
        self.last_voltage_delta = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_drop_at_one_amp() {
        let d = Diode::new();
        let i = d.current_at(DEFAULT_FORWARD_DROP);
        assert!((i - 1.0).abs() < 1e-6, "current at forward drop was {i}");
    }

    #[test]
    fn test_reverse_leakage() {
        let d = Diode::new();
        let i = d.current_at(-5.0);
        assert!(i < 0.0 && i > -2e-14);
    }

    #[test]
    fn test_led_needs_higher_voltage() {
        let d = Diode::new();
        let led = Diode::led();
        assert!(led.current_at(1.5) < d.current_at(0.6));
    }

    #[test]
    fn test_zener_breakdown() {
        let z = Diode::zener(DEFAULT_ZENER_VOLTAGE);
        // 5 mA reverse current at the breakdown voltage
        let i = z.current_at(-DEFAULT_ZENER_VOLTAGE);
        assert!((i + 0.005).abs() < 1e-6, "{i}");
        // A plain diode barely conducts there
        assert!(Diode::new().current_at(-DEFAULT_ZENER_VOLTAGE).abs() < 1e-13);
    }

    #[test]
    fn test_large_step_is_limited() {
        let d = Diode::new();
        let mut mna = MnaSystem::new(1e-6);
        mna.set_converged(true);
        let v = d.limit_step(&mut mna, 5.0, 0.6);
        assert!(v < 1.0, "limited to {v}");
        assert!(!mna.converged());

        let mut mna = MnaSystem::new(1e-6);
        mna.set_converged(true);
        let v = d.limit_step(&mut mna, 0.61, 0.6);
        assert_eq!(v, 0.61);
        assert!(mna.converged());
    }
}
