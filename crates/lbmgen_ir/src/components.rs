//! Closed configuration families for the pluggable kernel components.
//!
//! Each spec carries only what is needed to pick and parameterise a
//! generation strategy. Validation happens in the constructors so an invalid
//! combination never reaches the generator.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollisionSpec {
    Bgk { tau: f64 },
    NoCollision,
}

impl CollisionSpec {
    pub fn bgk(tau: f64) -> Result<Self, ConfigError> {
        let spec = CollisionSpec::Bgk { tau };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            CollisionSpec::Bgk { tau } if !(tau.is_finite() && tau > 0.5) => {
                Err(ConfigError::InvalidParameter {
                    component: "bgk collision",
                    parameter: "tau",
                    value: tau,
                    expected: "a finite relaxation time > 0.5",
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamingSpec {
    NoStreaming,
    Standard {
        #[serde(default)]
        support_no_streaming_mask: bool,
    },
}

impl StreamingSpec {
    pub fn standard() -> Self {
        StreamingSpec::Standard {
            support_no_streaming_mask: false,
        }
    }

    pub fn standard_masked() -> Self {
        StreamingSpec::Standard {
            support_no_streaming_mask: true,
        }
    }

    /// Whether the kernel reads `f` and writes a separate `f_next`.
    pub fn is_double_buffered(&self) -> bool {
        matches!(self, StreamingSpec::Standard { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EquilibriumSpec {
    #[default]
    Quadratic,
}

/// Outlet side given as a unit axis vector, e.g. `[1, 0]` for the +x face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<i32>", into = "Vec<i32>")]
pub struct OutletDirection {
    components: Vec<i32>,
    axis: usize,
    sign: i32,
}

impl OutletDirection {
    pub fn new(components: Vec<i32>) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidDirection {
            direction: components.clone(),
        };
        if components.is_empty() || components.len() > 3 {
            return Err(invalid());
        }
        let nonzero: Vec<(usize, i32)> = components
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, c)| *c != 0)
            .collect();
        match nonzero.as_slice() {
            [(axis, sign)] if sign.abs() == 1 => Ok(Self {
                axis: *axis,
                sign: *sign,
                components,
            }),
            _ => Err(invalid()),
        }
    }

    pub fn components(&self) -> &[i32] {
        &self.components
    }

    pub fn arity(&self) -> usize {
        self.components.len()
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    /// +1 for the high face of the axis, -1 for the low face.
    pub fn sign(&self) -> i32 {
        self.sign
    }
}

impl TryFrom<Vec<i32>> for OutletDirection {
    type Error = ConfigError;

    fn try_from(value: Vec<i32>) -> Result<Self, Self::Error> {
        OutletDirection::new(value)
    }
}

impl From<OutletDirection> for Vec<i32> {
    fn from(value: OutletDirection) -> Self {
        value.components
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundarySpec {
    /// Full-way bounce-back on cells whose `no_collision_mask` equals `index`.
    BounceBack { index: u8 },
    AntiBounceBackOutlet { direction: OutletDirection },
    /// Overwrites cells tagged `index` with the equilibrium at a fixed
    /// density and velocity, both in lattice units.
    Equilibrium { index: u8, rho: f64, velocity: Vec<f64> },
}

impl BoundarySpec {
    pub fn bounce_back(index: u8) -> Result<Self, ConfigError> {
        if index == 0 {
            return Err(ConfigError::InvalidBoundaryIndex(index));
        }
        Ok(BoundarySpec::BounceBack { index })
    }

    pub fn outlet(direction: Vec<i32>) -> Result<Self, ConfigError> {
        Ok(BoundarySpec::AntiBounceBackOutlet {
            direction: OutletDirection::new(direction)?,
        })
    }

    pub fn equilibrium(index: u8, rho: f64, velocity: Vec<f64>) -> Result<Self, ConfigError> {
        let spec = BoundarySpec::Equilibrium {
            index,
            rho,
            velocity,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// The `no_collision_mask` value this boundary claims, if any.
    pub fn mask_index(&self) -> Option<u8> {
        match self {
            BoundarySpec::BounceBack { index } | BoundarySpec::Equilibrium { index, .. } => {
                Some(*index)
            }
            BoundarySpec::AntiBounceBackOutlet { .. } => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mask_index() == Some(0) {
            return Err(ConfigError::InvalidBoundaryIndex(0));
        }
        if let BoundarySpec::Equilibrium { rho, velocity, .. } = self {
            if !(rho.is_finite() && *rho > 0.0) {
                return Err(ConfigError::InvalidParameter {
                    component: "equilibrium boundary",
                    parameter: "rho",
                    value: *rho,
                    expected: "a finite positive density",
                });
            }
            if velocity.is_empty() || velocity.len() > 3 {
                return Err(ConfigError::InvalidParameter {
                    component: "equilibrium boundary",
                    parameter: "velocity",
                    value: velocity.len() as f64,
                    expected: "1, 2 or 3 components",
                });
            }
            if let Some(bad) = velocity.iter().find(|v| !v.is_finite()) {
                return Err(ConfigError::InvalidParameter {
                    component: "equilibrium boundary",
                    parameter: "velocity",
                    value: *bad,
                    expected: "finite components",
                });
            }
        }
        Ok(())
    }
}

/// Checks a boundary list as a whole: each spec on its own, and no two
/// masked boundaries sharing a mask index.
pub fn validate_boundaries(boundaries: &[BoundarySpec]) -> Result<(), ConfigError> {
    let mut seen = Vec::new();
    for boundary in boundaries {
        boundary.validate()?;
        if let Some(index) = boundary.mask_index() {
            if seen.contains(&index) {
                return Err(ConfigError::DuplicateBoundaryIndex(index));
            }
            seen.push(index);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outlet_direction_requires_exactly_one_unit_entry() {
        for bad in [vec![1, 1], vec![0, 0], vec![2, 0], vec![], vec![1, 0, 0, 0], vec![1, -1, 0]] {
            let err = BoundarySpec::outlet(bad.clone()).unwrap_err();
            assert_eq!(err, ConfigError::InvalidDirection { direction: bad.clone() });
            assert!(err.to_string().contains(&format!("{bad:?}")));
        }
        for good in [vec![1], vec![-1], vec![1, 0], vec![-1, 0], vec![0, 0, 1]] {
            assert!(BoundarySpec::outlet(good).is_ok());
        }
    }

    #[test]
    fn outlet_direction_reports_axis_and_sign() {
        let dir = OutletDirection::new(vec![0, -1, 0]).unwrap();
        assert_eq!((dir.axis(), dir.sign(), dir.arity()), (1, -1, 3));
    }

    #[test]
    fn bgk_rejects_unstable_relaxation_time() {
        assert!(CollisionSpec::bgk(0.5).is_err());
        assert!(CollisionSpec::bgk(f64::NAN).is_err());
        assert!(CollisionSpec::bgk(0.6).is_ok());
    }

    #[test]
    fn duplicate_bounce_back_indices_are_rejected() {
        let boundaries = vec![
            BoundarySpec::bounce_back(1).unwrap(),
            BoundarySpec::bounce_back(1).unwrap(),
        ];
        assert_eq!(
            validate_boundaries(&boundaries),
            Err(ConfigError::DuplicateBoundaryIndex(1))
        );
        assert_eq!(BoundarySpec::bounce_back(0), Err(ConfigError::InvalidBoundaryIndex(0)));
    }

    #[test]
    fn equilibrium_boundary_checks_its_state() {
        assert!(BoundarySpec::equilibrium(2, 1.0, vec![0.05, 0.0]).is_ok());
        assert_eq!(
            BoundarySpec::equilibrium(0, 1.0, vec![0.0]),
            Err(ConfigError::InvalidBoundaryIndex(0))
        );
        assert!(BoundarySpec::equilibrium(1, 0.0, vec![0.0]).is_err());
        assert!(BoundarySpec::equilibrium(1, 1.0, vec![]).is_err());
        assert!(BoundarySpec::equilibrium(1, 1.0, vec![f64::INFINITY, 0.0]).is_err());
    }

    #[test]
    fn bounce_back_and_equilibrium_share_the_mask_namespace() {
        let boundaries = vec![
            BoundarySpec::bounce_back(1).unwrap(),
            BoundarySpec::equilibrium(1, 1.0, vec![0.0, 0.0]).unwrap(),
        ];
        assert_eq!(
            validate_boundaries(&boundaries),
            Err(ConfigError::DuplicateBoundaryIndex(1))
        );
    }

    #[test]
    fn specs_deserialize_from_tagged_json() {
        let spec: BoundarySpec =
            serde_json::from_str(r#"{"kind":"anti_bounce_back_outlet","direction":[-1,0]}"#).unwrap();
        assert_eq!(spec, BoundarySpec::outlet(vec![-1, 0]).unwrap());

        let bad = serde_json::from_str::<BoundarySpec>(
            r#"{"kind":"anti_bounce_back_outlet","direction":[1,1]}"#,
        );
        assert!(bad.is_err());

        let eq: BoundarySpec =
            serde_json::from_str(r#"{"kind":"equilibrium","index":3,"rho":1.0,"velocity":[0.1,0.0]}"#)
                .unwrap();
        assert_eq!(eq.mask_index(), Some(3));

        let streaming: StreamingSpec = serde_json::from_str(r#"{"kind":"standard"}"#).unwrap();
        assert_eq!(streaming, StreamingSpec::standard());
    }
}
