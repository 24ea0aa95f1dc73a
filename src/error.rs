//! Error types for the circuit simulator.
//!
//! This module provides a unified error type [`SimError`]. The first eight
//! variants form the fixed diagnostic taxonomy reported through the driver's
//! error callback (see [`ErrorCode`]); the remaining variants describe misuse
//! of the construction API and are returned directly to the caller.

use std::fmt;

use thiserror::Error;

use crate::circuit::ComponentId;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Fixed diagnostic categories surfaced to the error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Matrix contains a NaN or infinite entry after stamping.
    E1,
    /// LU factorization found a singular matrix.
    E2,
    /// Nonlinear sub-iteration budget exhausted.
    E3,
    /// Current source without a closed conduction path.
    E4,
    /// Voltage source or wire loop with no resistance.
    E5,
    /// Capacitor loop with no resistance, or a shorted capacitor.
    E6,
    /// Matrix reduction found no solvable row.
    E7,
    /// Component registration size mismatch.
    E8,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::E1 => "E1",
            ErrorCode::E2 => "E2",
            ErrorCode::E3 => "E3",
            ErrorCode::E4 => "E4",
            ErrorCode::E5 => "E5",
            ErrorCode::E6 => "E6",
            ErrorCode::E7 => "E7",
            ErrorCode::E8 => "E8",
        };
        f.write_str(code)
    }
}

/// Unified error type for all simulator operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    // ============ Tick-time errors ============
    /// Non-finite value in the stamped matrix
    #[error("NaN or infinite matrix entry at ({row}, {col})")]
    NumericalOverflow { row: usize, col: usize },

    /// Matrix is singular and cannot be factored
    #[error("Singular matrix - circuit may have a short circuit or floating node")]
    SingularMatrix,

    /// Nonlinear sub-iteration did not converge
    #[error("Sub-iteration did not converge after {iterations} iterations")]
    ConvergenceFailure { iterations: usize },

    // ============ Analysis-time errors ============
    /// Current source has no conduction path
    #[error("No path for current source {component}")]
    CurrentSourceOpen { component: ComponentId },

    /// Voltage source or wire loop without resistance
    #[error("Voltage source/wire loop with no resistance at {component}")]
    VoltageLoop { component: ComponentId },

    /// Capacitor loop without resistance
    #[error("Capacitor loop with no resistance at {component}")]
    CapacitorLoop { component: ComponentId },

    /// Symbolic reduction hit an empty row
    #[error("Matrix reduction failed at row {row}")]
    MatrixReduction { row: usize },

    /// Node mesh and component disagree on lead count
    #[error("Component {component} registered with {registered} leads but reports {expected}")]
    RegistrationMismatch {
        component: ComponentId,
        registered: usize,
        expected: usize,
    },

    // ============ Construction errors ============
    /// Unknown component tag
    #[error("Unknown component type '{component_type}'")]
    UnknownComponentType { component_type: String },

    /// Component tag registered twice
    #[error("Component type '{component_type}' is already registered")]
    DuplicateComponentType { component_type: String },

    /// Invalid parameter value
    #[error("Invalid parameter '{param}' for component '{component}': {message}")]
    InvalidParameter {
        component: String,
        param: String,
        message: String,
    },

    /// Lead index out of range
    #[error("Component {component} has no lead {lead}")]
    InvalidLead { component: ComponentId, lead: usize },

    /// Component id not present in the circuit
    #[error("Component {component} not found in circuit")]
    ComponentNotFound { component: ComponentId },

    /// Downcast to the requested component type failed
    #[error("Component {component} is not a {expected}")]
    WrongComponentType {
        component: ComponentId,
        expected: &'static str,
    },

    /// Invalid simulation parameter
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },
}

impl SimError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(
        component: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            component: component.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Diagnostic code, for errors that belong to the fixed taxonomy.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::NumericalOverflow { .. } => Some(ErrorCode::E1),
            Self::SingularMatrix => Some(ErrorCode::E2),
            Self::ConvergenceFailure { .. } => Some(ErrorCode::E3),
            Self::CurrentSourceOpen { .. } => Some(ErrorCode::E4),
            Self::VoltageLoop { .. } => Some(ErrorCode::E5),
            Self::CapacitorLoop { .. } => Some(ErrorCode::E6),
            Self::MatrixReduction { .. } => Some(ErrorCode::E7),
            Self::RegistrationMismatch { .. } => Some(ErrorCode::E8),
            _ => None,
        }
    }

    /// The component that triggered the error, if any.
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            Self::CurrentSourceOpen { component }
            | Self::VoltageLoop { component }
            | Self::CapacitorLoop { component }
            | Self::RegistrationMismatch { component, .. }
            | Self::InvalidLead { component, .. }
            | Self::ComponentNotFound { component }
            | Self::WrongComponentType { component, .. } => Some(*component),
            _ => None,
        }
    }

    /// True for errors raised while analyzing topology (E4-E8).
    pub fn is_analysis_error(&self) -> bool {
        matches!(
            self.code(),
            Some(ErrorCode::E4 | ErrorCode::E5 | ErrorCode::E6 | ErrorCode::E7 | ErrorCode::E8)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_codes() {
        let err = SimError::VoltageLoop {
            component: ComponentId(3),
        };
        assert_eq!(err.code(), Some(ErrorCode::E5));
        assert_eq!(err.component(), Some(ComponentId(3)));
        assert!(err.is_analysis_error());

        assert_eq!(SimError::SingularMatrix.code(), Some(ErrorCode::E2));
        assert!(!SimError::SingularMatrix.is_analysis_error());
    }

    #[test]
    fn test_construction_errors_have_no_code() {
        let err = SimError::UnknownComponentType {
            component_type: "flux".to_string(),
        };
        assert_eq!(err.code(), None);
        assert_eq!(err.to_string(), "Unknown component type 'flux'");
    }

    #[test]
    fn test_code_display() {
        assert_eq!(ErrorCode::E7.to_string(), "E7");
    }
}
