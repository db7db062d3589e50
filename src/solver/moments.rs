//! Linear moment bases for single-cell population vectors.

use std::fmt;

use indexmap::IndexMap;
use lbmgen_ir::{stencil, StencilDescriptor};
use nalgebra::{DMatrix, DVector};

use super::reference::ops;

/// `prod_d e[i][d]^multiindex[d]` for every velocity `i`.
pub fn moment_tensor(e: &[Vec<i32>], multiindex: &[u32]) -> Vec<f64> {
    e.iter()
        .map(|v| {
            v.iter()
                .zip(multiindex)
                .map(|(&c, &m)| f64::from(c).powi(m as i32))
                .product()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum MomentError {
    UnknownMoment(String),
    NoTransform(String),
    UnknownTransform { stencil: String, name: String },
    Singular(&'static str),
    LengthMismatch { expected: usize, found: usize },
}

impl fmt::Display for MomentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MomentError::UnknownMoment(name) => write!(f, "unknown moment '{name}'"),
            MomentError::NoTransform(stencil) => {
                write!(f, "no moment transform registered for stencil {stencil}")
            }
            MomentError::UnknownTransform { stencil, name } => {
                write!(f, "stencil {stencil} has no moment transform '{name}'")
            }
            MomentError::Singular(name) => write!(f, "moment matrix of {name} is singular"),
            MomentError::LengthMismatch { expected, found } => {
                write!(f, "expected {expected} values, got {found}")
            }
        }
    }
}

impl std::error::Error for MomentError {}

/// How the equilibrium moments of a basis are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentEquilibrium {
    /// Back to populations, quadratic equilibrium, forward again.
    Populations,
    Dellar,
    Lallemand,
}

#[derive(Debug, Clone)]
pub struct MomentTransform {
    name: &'static str,
    stencil: StencilDescriptor,
    names: Vec<&'static str>,
    matrix: DMatrix<f64>,
    inverse: DMatrix<f64>,
    equilibrium: MomentEquilibrium,
}

impl MomentTransform {
    /// `matrix` is `Q x Q` in row-major order; the inverse is computed.
    pub fn new(
        name: &'static str,
        stencil: StencilDescriptor,
        names: Vec<&'static str>,
        matrix: &[f64],
        equilibrium: MomentEquilibrium,
    ) -> Result<Self, MomentError> {
        let q = stencil.q();
        if names.len() != q {
            return Err(MomentError::LengthMismatch {
                expected: q,
                found: names.len(),
            });
        }
        if matrix.len() != q * q {
            return Err(MomentError::LengthMismatch {
                expected: q * q,
                found: matrix.len(),
            });
        }
        let matrix = DMatrix::from_row_slice(q, q, matrix);
        let inverse = matrix
            .clone()
            .try_inverse()
            .ok_or(MomentError::Singular(name))?;
        Ok(Self {
            name,
            stencil,
            names,
            matrix,
            inverse,
            equilibrium,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stencil(&self) -> &StencilDescriptor {
        &self.stencil
    }

    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn inverse(&self) -> &DMatrix<f64> {
        &self.inverse
    }

    /// Positions of the named moments.
    pub fn indices(&self, names: &[&str]) -> Result<Vec<usize>, MomentError> {
        names
            .iter()
            .map(|name| {
                self.names
                    .iter()
                    .position(|candidate| candidate == name)
                    .ok_or_else(|| MomentError::UnknownMoment(name.to_string()))
            })
            .collect()
    }

    fn apply(&self, matrix: &DMatrix<f64>, values: &[f64]) -> Result<Vec<f64>, MomentError> {
        let q = self.stencil.q();
        if values.len() != q {
            return Err(MomentError::LengthMismatch {
                expected: q,
                found: values.len(),
            });
        }
        let out = matrix * DVector::from_column_slice(values);
        Ok(out.iter().copied().collect())
    }

    pub fn transform(&self, f: &[f64]) -> Result<Vec<f64>, MomentError> {
        self.apply(&self.matrix, f)
    }

    pub fn inverse_transform(&self, m: &[f64]) -> Result<Vec<f64>, MomentError> {
        self.apply(&self.inverse, m)
    }

    pub fn equilibrium(&self, m: &[f64]) -> Result<Vec<f64>, MomentError> {
        let q = self.stencil.q();
        if m.len() != q {
            return Err(MomentError::LengthMismatch {
                expected: q,
                found: m.len(),
            });
        }
        match self.equilibrium {
            MomentEquilibrium::Populations => {
                let f = self.inverse_transform(m)?;
                let rho = ops::density(&self.stencil, &f);
                let u = ops::velocity(&self.stencil, &f, &rho);
                self.transform(&ops::quadratic_equilibrium(&self.stencil, &rho, &u))
            }
            MomentEquilibrium::Dellar => {
                let (rho, jx, jy) = (m[0], m[1], m[2]);
                let mut meq = vec![0.0; q];
                meq[..6].copy_from_slice(&[
                    rho,
                    jx,
                    jy,
                    jx * jx / rho * 9.0 / 2.0,
                    jx * jy / rho * 9.0,
                    jy * jy / rho * 9.0 / 2.0,
                ]);
                Ok(meq)
            }
            MomentEquilibrium::Lallemand => {
                let (rho, jx, jy) = (m[0], m[1], m[2]);
                let (c1, alpha2, alpha3) = (-2.0, -8.0, 4.0);
                let (gamma1, gamma2, gamma3, gamma4) = (2.0 / 3.0, 18.0, 2.0 / 3.0, -18.0);
                let j_sq = jx * jx + jy * jy;
                Ok(vec![
                    rho,
                    jx,
                    jy,
                    gamma1 / 2.0 * (jx * jx - jy * jy),
                    gamma3 / 2.0 * jx * jy,
                    alpha2 / 4.0 * rho + gamma2 / 6.0 * j_sq,
                    c1 / 2.0 * jx,
                    c1 / 2.0 * jy,
                    alpha3 / 4.0 * rho + gamma4 / 6.0 * j_sq,
                ])
            }
        }
    }
}

/// Positions of the momentum moments `jx`, `jy`, `jz` (`j` in one dimension).
pub fn momentum_indices(transform: &MomentTransform) -> Result<Vec<usize>, MomentError> {
    let d = transform.stencil().d();
    let names: Vec<&str> = ["jx", "jy", "jz"][..d.min(3)].to_vec();
    match transform.indices(&names) {
        Err(_) if d == 1 => transform.indices(&["j"]),
        found => found,
    }
}

/// One BGK relaxation step in moment space that keeps the velocity at `u`
/// (`[D, N]`). Used to build consistent non-equilibrium populations from an
/// initial velocity field: density relaxes with `tau + 1`, the other moments
/// with `tau`, and momentum is reset to `rho u`.
pub fn bgk_initialization(
    transform: &MomentTransform,
    f: &[f64],
    u: &[f64],
    tau: f64,
) -> Result<Vec<f64>, MomentError> {
    let stencil = transform.stencil();
    let q = stencil.q();
    let d = stencil.d();
    if f.len() % q != 0 {
        return Err(MomentError::LengthMismatch {
            expected: q * (f.len() / q + 1),
            found: f.len(),
        });
    }
    let n = f.len() / q;
    if u.len() != d * n {
        return Err(MomentError::LengthMismatch {
            expected: d * n,
            found: u.len(),
        });
    }
    let momentum = momentum_indices(transform)?;
    let rho = ops::density(stencil, f);
    let f_eq = ops::quadratic_equilibrium(stencil, &rho, u);

    let mut out = vec![0.0; f.len()];
    for cell in 0..n {
        let column = |field: &[f64]| (0..q).map(|i| field[i * n + cell]).collect::<Vec<_>>();
        let m = transform.transform(&column(f))?;
        let meq = transform.transform(&column(&f_eq))?;
        let mut relaxed: Vec<f64> = m
            .iter()
            .zip(&meq)
            .map(|(m, meq)| m - (m - meq) / tau)
            .collect();
        relaxed[0] = m[0] - (m[0] - meq[0]) / (tau + 1.0);
        for (axis, &k) in momentum.iter().enumerate() {
            relaxed[k] = rho[cell] * u[axis * n + cell];
        }
        for (i, value) in transform.inverse_transform(&relaxed)?.into_iter().enumerate() {
            out[i * n + cell] = value;
        }
    }
    Ok(out)
}

#[rustfmt::skip]
const D1Q3_MATRIX: [[f64; 3]; 3] = [
    [1.0, 1.0, 1.0],
    [0.0, 1.0, -1.0],
    [0.0, 1.0, 1.0],
];

#[rustfmt::skip]
const DELLAR_MATRIX: [[f64; 9]; 9] = [
    [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
    [0.0, 1.0, 0.0, -1.0, 0.0, 1.0, -1.0, -1.0, 1.0],
    [0.0, 0.0, 1.0, 0.0, -1.0, 1.0, 1.0, -1.0, -1.0],
    [-1.5, 3.0, -1.5, 3.0, -1.5, 3.0, 3.0, 3.0, 3.0],
    [0.0, 0.0, 0.0, 0.0, 0.0, 9.0, -9.0, 9.0, -9.0],
    [-1.5, -1.5, 3.0, -1.5, 3.0, 3.0, 3.0, 3.0, 3.0],
    [1.0, -2.0, -2.0, -2.0, -2.0, 4.0, 4.0, 4.0, 4.0],
    [0.0, -2.0, 0.0, 2.0, 0.0, 4.0, -4.0, -4.0, 4.0],
    [0.0, 0.0, -2.0, 0.0, 2.0, 4.0, 4.0, -4.0, -4.0],
];

#[rustfmt::skip]
const LALLEMAND_MATRIX: [[f64; 9]; 9] = [
    [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
    [0.0, 1.0, 0.0, -1.0, 0.0, 1.0, -1.0, -1.0, 1.0],
    [0.0, 0.0, 1.0, 0.0, -1.0, 1.0, 1.0, -1.0, -1.0],
    [0.0, 1.0, -1.0, 1.0, -1.0, 0.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, -1.0, 1.0, -1.0],
    [-4.0, -1.0, -1.0, -1.0, -1.0, 2.0, 2.0, 2.0, 2.0],
    [0.0, -2.0, 0.0, 2.0, 0.0, 1.0, -1.0, -1.0, 1.0],
    [0.0, 0.0, -2.0, 0.0, 2.0, 1.0, 1.0, -1.0, -1.0],
    [4.0, -2.0, -2.0, -2.0, -2.0, 1.0, 1.0, 1.0, 1.0],
];

pub fn d1q3_transform() -> Result<MomentTransform, MomentError> {
    MomentTransform::new(
        "D1Q3Transform",
        stencil::d1q3(),
        vec!["rho", "j", "e"],
        &D1Q3_MATRIX.concat(),
        MomentEquilibrium::Populations,
    )
}

pub fn d2q9_dellar() -> Result<MomentTransform, MomentError> {
    MomentTransform::new(
        "D2Q9Dellar",
        stencil::d2q9(),
        vec!["rho", "jx", "jy", "Pi_xx", "Pi_xy", "PI_yy", "N", "Jx", "Jy"],
        &DELLAR_MATRIX.concat(),
        MomentEquilibrium::Dellar,
    )
}

pub fn d2q9_lallemand() -> Result<MomentTransform, MomentError> {
    MomentTransform::new(
        "D2Q9Lallemand",
        stencil::d2q9(),
        vec!["rho", "jx", "jy", "pxx", "pxy", "e", "qx", "qy", "eps"],
        &LALLEMAND_MATRIX.concat(),
        MomentEquilibrium::Lallemand,
    )
}

pub type TransformConstructor = fn() -> Result<MomentTransform, MomentError>;

/// Stencil tag -> transforms. The first transform registered for a stencil
/// is its default.
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    entries: IndexMap<String, IndexMap<&'static str, TransformConstructor>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("D1Q3", "D1Q3Transform", d1q3_transform);
        registry.register("D2Q9", "D2Q9Lallemand", d2q9_lallemand);
        registry.register("D2Q9", "D2Q9Dellar", d2q9_dellar);
        registry
    }

    pub fn register(&mut self, stencil: &str, name: &'static str, constructor: TransformConstructor) {
        self.entries
            .entry(stencil.to_ascii_uppercase())
            .or_default()
            .insert(name, constructor);
    }

    pub fn get(&self, stencil: &str, name: &str) -> Result<MomentTransform, MomentError> {
        let constructor = self
            .entries
            .get(&stencil.to_ascii_uppercase())
            .and_then(|transforms| transforms.get(name))
            .ok_or_else(|| MomentError::UnknownTransform {
                stencil: stencil.to_string(),
                name: name.to_string(),
            })?;
        constructor()
    }

    pub fn default_for(&self, stencil: &str) -> Result<MomentTransform, MomentError> {
        let (_, constructor) = self
            .entries
            .get(&stencil.to_ascii_uppercase())
            .and_then(|transforms| transforms.first())
            .ok_or_else(|| MomentError::NoTransform(stencil.to_string()))?;
        constructor()
    }

    pub fn all(&self) -> Result<Vec<MomentTransform>, MomentError> {
        self.entries
            .values()
            .flat_map(|transforms| transforms.values())
            .map(|constructor| constructor())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d2q9_equilibrium_moments(transform: &MomentTransform) -> (Vec<f64>, Vec<f64>) {
        let f_eq = ops::quadratic_equilibrium(transform.stencil(), &[1.2], &[0.05, -0.03]);
        let m = transform.transform(&f_eq).unwrap();
        let meq = transform.equilibrium(&m).unwrap();
        (m, meq)
    }

    #[test]
    fn leading_rows_are_moment_tensors() {
        let stencil = stencil::d2q9();
        for transform in [d2q9_dellar().unwrap(), d2q9_lallemand().unwrap()] {
            for (row, multiindex) in [[0u32, 0], [1, 0], [0, 1]].iter().enumerate() {
                let expected = moment_tensor(stencil.e(), multiindex);
                let actual: Vec<f64> = transform.matrix().row(row).iter().copied().collect();
                assert_eq!(actual, expected, "{} row {row}", transform.name());
            }
        }
    }

    #[test]
    fn moments_are_found_by_name() {
        let transform = d2q9_lallemand().unwrap();
        assert_eq!(transform.indices(&["jx", "jy"]).unwrap(), vec![1, 2]);
        assert_eq!(
            transform.indices(&["Pi_xx"]).unwrap_err(),
            MomentError::UnknownMoment("Pi_xx".to_string())
        );
    }

    #[test]
    fn dellar_equilibrium_matches_population_equilibrium() {
        let transform = d2q9_dellar().unwrap();
        let (m, meq) = d2q9_equilibrium_moments(&transform);
        for (k, (a, b)) in m.iter().zip(&meq).enumerate() {
            assert!((a - b).abs() < 1e-5, "moment {k}: {a} vs {b}");
        }
    }

    #[test]
    fn lallemand_equilibrium_matches_conserved_and_heat_flux_moments() {
        let transform = d2q9_lallemand().unwrap();
        let (m, meq) = d2q9_equilibrium_moments(&transform);
        for k in transform.indices(&["rho", "jx", "jy", "qx", "qy"]).unwrap() {
            assert!((m[k] - meq[k]).abs() < 1e-5, "moment {k}: {} vs {}", m[k], meq[k]);
        }
    }

    #[test]
    fn computed_inverse_matches_closed_form() {
        let transform = d1q3_transform().unwrap();
        let expected = [[1.0, 0.0, -1.0], [0.0, 0.5, 0.5], [0.0, -0.5, 0.5]];
        for (r, row) in expected.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                assert!((transform.inverse()[(r, c)] - value).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn population_equilibrium_is_a_fixed_point() {
        let transform = d1q3_transform().unwrap();
        let f_eq = ops::quadratic_equilibrium(transform.stencil(), &[0.8], &[0.1]);
        let m = transform.transform(&f_eq).unwrap();
        let meq = transform.equilibrium(&m).unwrap();
        for (a, b) in m.iter().zip(&meq) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn bgk_initialization_imposes_velocity_and_keeps_density() {
        let transform = d2q9_lallemand().unwrap();
        let stencil = transform.stencil().clone();
        let n = 3;
        let f: Vec<f64> = (0..stencil.q() * n)
            .map(|k| stencil.w()[k / n] * (1.0 + 0.03 * ((k * 7) % 5) as f64))
            .collect();
        let u = vec![0.02, -0.01, 0.0, 0.03, 0.01, -0.02];
        let out = bgk_initialization(&transform, &f, &u, 0.8).unwrap();

        let rho_in = ops::density(&stencil, &f);
        let rho_out = ops::density(&stencil, &out);
        let u_out = ops::velocity(&stencil, &out, &rho_out);
        for (a, b) in rho_in.iter().zip(&rho_out) {
            assert!((a - b).abs() < 1e-10, "{a} vs {b}");
        }
        for (a, b) in u.iter().zip(&u_out) {
            assert!((a - b).abs() < 1e-10, "{a} vs {b}");
        }
    }

    #[test]
    fn bgk_initialization_keeps_matching_equilibrium() {
        let transform = d1q3_transform().unwrap();
        let f_eq = ops::quadratic_equilibrium(transform.stencil(), &[1.1, 0.9], &[0.05, -0.02]);
        let out = bgk_initialization(&transform, &f_eq, &[0.05, -0.02], 0.7).unwrap();
        for (a, b) in f_eq.iter().zip(&out) {
            assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        }
        assert_eq!(momentum_indices(&transform).unwrap(), vec![1]);
        assert!(matches!(
            bgk_initialization(&transform, &f_eq, &[0.0], 0.7),
            Err(MomentError::LengthMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn registry_defaults() {
        let registry = TransformRegistry::builtin();
        assert_eq!(registry.default_for("d2q9").unwrap().name(), "D2Q9Lallemand");
        assert_eq!(registry.default_for("D1Q3").unwrap().name(), "D1Q3Transform");
        assert_eq!(registry.get("D2Q9", "D2Q9Dellar").unwrap().name(), "D2Q9Dellar");
        assert_eq!(
            registry.default_for("D3Q19").unwrap_err(),
            MomentError::NoTransform("D3Q19".to_string())
        );
        assert_eq!(registry.all().unwrap().len(), 3);
    }
}
