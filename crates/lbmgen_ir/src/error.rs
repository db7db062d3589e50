use std::fmt;

/// Rejected configuration, detected before any generation starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    UnknownStencil(String),
    InvalidStencil {
        name: String,
        reason: String,
    },
    UnsupportedDimension {
        name: String,
        d: usize,
    },
    InvalidDirection {
        direction: Vec<i32>,
    },
    InvalidParameter {
        component: &'static str,
        parameter: &'static str,
        value: f64,
        expected: &'static str,
    },
    InvalidBoundaryIndex(u8),
    DuplicateBoundaryIndex(u8),
    IncompatibleComponents {
        component: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownStencil(tag) => write!(f, "unknown stencil '{tag}'"),
            ConfigError::InvalidStencil { name, reason } => {
                write!(f, "invalid stencil '{name}': {reason}")
            }
            ConfigError::UnsupportedDimension { name, d } => write!(
                f,
                "stencil '{name}' has {d} dimensions; only 1, 2 and 3 are supported"
            ),
            ConfigError::InvalidDirection { direction } => write!(
                f,
                "wrong direction {direction:?}: expected a list of length 1, 2 or 3 with all entries 0 except one 1 or -1"
            ),
            ConfigError::InvalidParameter {
                component,
                parameter,
                value,
                expected,
            } => write!(
                f,
                "{component}: parameter '{parameter}' = {value} is invalid, expected {expected}"
            ),
            ConfigError::InvalidBoundaryIndex(index) => write!(
                f,
                "boundary index {index} is reserved for fluid cells; use an index >= 1"
            ),
            ConfigError::DuplicateBoundaryIndex(index) => {
                write!(f, "boundary index {index} is used by more than one boundary")
            }
            ConfigError::IncompatibleComponents { component, reason } => {
                write!(f, "{component} cannot be used here: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
