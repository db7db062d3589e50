//! Discrete velocity sets.
//!
//! A [`StencilDescriptor`] is immutable once built: velocities, weights, the
//! opposite-direction permutation and the lattice speed of sound. The
//! constructor checks every structural invariant so that downstream code
//! (generators, reference operators) can index without re-validating.

use indexmap::IndexMap;

use crate::error::ConfigError;

/// Largest dimensionality a stencil may have. The generated kernels map
/// spatial axes onto `x`, `y`, `z` thread coordinates.
pub const MAX_DIMENSIONS: usize = 3;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct StencilDescriptor {
    name: String,
    d: usize,
    e: Vec<Vec<i32>>,
    w: Vec<f64>,
    opposite: Vec<usize>,
    cs: f64,
}

impl StencilDescriptor {
    pub fn new(
        name: impl Into<String>,
        e: Vec<Vec<i32>>,
        w: Vec<f64>,
        cs: f64,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let invalid = |reason: String| ConfigError::InvalidStencil {
            name: name.clone(),
            reason,
        };

        let Some(first) = e.first() else {
            return Err(invalid("stencil has no velocities".to_string()));
        };
        let d = first.len();
        if d == 0 || d > MAX_DIMENSIONS {
            return Err(ConfigError::UnsupportedDimension { name, d });
        }
        if let Some((i, v)) = e.iter().enumerate().find(|(_, v)| v.len() != d) {
            return Err(invalid(format!(
                "velocity {i} {v:?} has {} components, expected {d}",
                v.len()
            )));
        }
        if first.iter().any(|&c| c != 0) {
            return Err(invalid(format!(
                "velocity 0 must be the rest particle, got {first:?}"
            )));
        }
        if w.len() != e.len() {
            return Err(invalid(format!(
                "{} weights for {} velocities",
                w.len(),
                e.len()
            )));
        }
        let sum: f64 = w.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(invalid(format!("weights sum to {sum}, expected 1")));
        }
        if !(cs.is_finite() && cs > 0.0) {
            return Err(invalid(format!("speed of sound {cs} must be positive")));
        }

        let mut opposite = Vec::with_capacity(e.len());
        for (i, v) in e.iter().enumerate() {
            let negated: Vec<i32> = v.iter().map(|c| -c).collect();
            let matches: Vec<usize> = e
                .iter()
                .enumerate()
                .filter(|(_, other)| **other == negated)
                .map(|(j, _)| j)
                .collect();
            match matches.as_slice() {
                [j] => opposite.push(*j),
                [] => {
                    return Err(invalid(format!(
                        "velocity {i} {v:?} has no opposite direction"
                    )))
                }
                _ => {
                    return Err(invalid(format!(
                        "velocity {negated:?} appears more than once"
                    )))
                }
            }
        }

        Ok(Self {
            name,
            d,
            e,
            w,
            opposite,
            cs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of spatial dimensions.
    pub fn d(&self) -> usize {
        self.d
    }

    /// Number of discrete velocities.
    pub fn q(&self) -> usize {
        self.e.len()
    }

    pub fn e(&self) -> &[Vec<i32>] {
        &self.e
    }

    pub fn velocity(&self, i: usize) -> &[i32] {
        &self.e[i]
    }

    pub fn w(&self) -> &[f64] {
        &self.w
    }

    pub fn opposite(&self) -> &[usize] {
        &self.opposite
    }

    pub fn cs(&self) -> f64 {
        self.cs
    }

    /// Indices of the velocities whose projection onto `direction` equals +1.
    pub fn velocities_along(&self, direction: &[i32]) -> Vec<usize> {
        self.e
            .iter()
            .enumerate()
            .filter(|(_, v)| v.iter().zip(direction).map(|(a, b)| a * b).sum::<i32>() == 1)
            .map(|(i, _)| i)
            .collect()
    }
}

fn lattice_cs() -> f64 {
    1.0 / 3.0_f64.sqrt()
}

fn build(name: &str, e: Vec<Vec<i32>>, w: Vec<f64>) -> StencilDescriptor {
    match StencilDescriptor::new(name, e, w, lattice_cs()) {
        Ok(stencil) => stencil,
        // Built-in tables are fixed; a failure here is a typo in this file.
        Err(err) => panic!("built-in stencil {name} is malformed: {err}"),
    }
}

pub fn d1q3() -> StencilDescriptor {
    build(
        "D1Q3",
        vec![vec![0], vec![1], vec![-1]],
        vec![2.0 / 3.0, 1.0 / 6.0, 1.0 / 6.0],
    )
}

pub fn d2q9() -> StencilDescriptor {
    let e = vec![
        vec![0, 0],
        vec![1, 0],
        vec![0, 1],
        vec![-1, 0],
        vec![0, -1],
        vec![1, 1],
        vec![-1, 1],
        vec![-1, -1],
        vec![1, -1],
    ];
    let mut w = vec![4.0 / 9.0];
    w.extend([1.0 / 9.0; 4]);
    w.extend([1.0 / 36.0; 4]);
    build("D2Q9", e, w)
}

pub fn d3q15() -> StencilDescriptor {
    let e = vec![
        vec![0, 0, 0],
        vec![0, 0, 1],
        vec![0, 0, -1],
        vec![0, 1, 0],
        vec![0, -1, 0],
        vec![1, 0, 0],
        vec![-1, 0, 0],
        vec![1, 1, 1],
        vec![-1, -1, -1],
        vec![1, 1, -1],
        vec![-1, -1, 1],
        vec![1, -1, 1],
        vec![-1, 1, -1],
        vec![1, -1, -1],
        vec![-1, 1, 1],
    ];
    let mut w = vec![2.0 / 9.0];
    w.extend([1.0 / 9.0; 6]);
    w.extend([1.0 / 72.0; 8]);
    build("D3Q15", e, w)
}

fn d3_faces_and_edges() -> Vec<Vec<i32>> {
    vec![
        vec![0, 0, 0],
        vec![1, 0, 0],
        vec![-1, 0, 0],
        vec![0, 1, 0],
        vec![0, -1, 0],
        vec![0, 0, 1],
        vec![0, 0, -1],
        vec![0, 1, 1],
        vec![0, -1, -1],
        vec![0, 1, -1],
        vec![0, -1, 1],
        vec![1, 0, 1],
        vec![-1, 0, -1],
        vec![1, 0, -1],
        vec![-1, 0, 1],
        vec![1, 1, 0],
        vec![-1, -1, 0],
        vec![1, -1, 0],
        vec![-1, 1, 0],
    ]
}

pub fn d3q19() -> StencilDescriptor {
    let mut w = vec![1.0 / 3.0];
    w.extend([1.0 / 18.0; 6]);
    w.extend([1.0 / 36.0; 12]);
    build("D3Q19", d3_faces_and_edges(), w)
}

pub fn d3q27() -> StencilDescriptor {
    let mut e = d3_faces_and_edges();
    e.extend([
        vec![1, 1, 1],
        vec![-1, -1, -1],
        vec![1, 1, -1],
        vec![-1, -1, 1],
        vec![1, -1, 1],
        vec![-1, 1, -1],
        vec![1, -1, -1],
        vec![-1, 1, 1],
    ]);
    let mut w = vec![8.0 / 27.0];
    w.extend([2.0 / 27.0; 6]);
    w.extend([1.0 / 54.0; 12]);
    w.extend([1.0 / 216.0; 8]);
    build("D3Q27", e, w)
}

pub type StencilConstructor = fn() -> StencilDescriptor;

/// Tag -> constructor map, populated by explicit [`StencilRegistry::register`] calls.
#[derive(Debug, Clone, Default)]
pub struct StencilRegistry {
    entries: IndexMap<String, StencilConstructor>,
}

impl StencilRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("D1Q3", d1q3);
        registry.register("D2Q9", d2q9);
        registry.register("D3Q15", d3q15);
        registry.register("D3Q19", d3q19);
        registry.register("D3Q27", d3q27);
        registry
    }

    pub fn register(&mut self, tag: &str, constructor: StencilConstructor) {
        self.entries.insert(tag.to_ascii_uppercase(), constructor);
    }

    pub fn get(&self, tag: &str) -> Result<StencilDescriptor, ConfigError> {
        self.entries
            .get(&tag.to_ascii_uppercase())
            .map(|constructor| constructor())
            .ok_or_else(|| ConfigError::UnknownStencil(tag.to_string()))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn all(&self) -> Vec<StencilDescriptor> {
        self.entries.values().map(|constructor| constructor()).collect()
    }
}
