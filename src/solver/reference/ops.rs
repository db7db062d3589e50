//! Array-level LBM operators on flat `[Q, N_x(, N_y(, N_z))]` population
//! fields, row-major like the generated kernel.

use lbmgen_ir::{OutletDirection, StencilDescriptor};

/// Row-major cell indexing for a periodic grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    shape: Vec<usize>,
}

impl Grid {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn cells(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn coords(&self, cell: usize) -> Vec<usize> {
        let mut coords = vec![0; self.shape.len()];
        let mut rest = cell;
        for (axis, &extent) in self.shape.iter().enumerate().rev() {
            coords[axis] = rest % extent;
            rest /= extent;
        }
        coords
    }

    pub fn cell(&self, coords: &[usize]) -> usize {
        coords
            .iter()
            .zip(&self.shape)
            .fold(0, |acc, (&c, &extent)| acc * extent + c)
    }

    /// `coords + e` with periodic wraparound on every axis.
    pub fn shifted(&self, coords: &[usize], e: &[i32]) -> Vec<usize> {
        coords
            .iter()
            .zip(e)
            .zip(&self.shape)
            .map(|((&c, &step), &extent)| {
                (c as i64 + i64::from(step)).rem_euclid(extent as i64) as usize
            })
            .collect()
    }
}

pub fn density(stencil: &StencilDescriptor, f: &[f64]) -> Vec<f64> {
    let n = f.len() / stencil.q();
    (0..n)
        .map(|cell| (0..stencil.q()).map(|i| f[i * n + cell]).sum())
        .collect()
}

/// Velocity field `[D, N]`.
pub fn velocity(stencil: &StencilDescriptor, f: &[f64], rho: &[f64]) -> Vec<f64> {
    let n = rho.len();
    let mut u = vec![0.0; stencil.d() * n];
    for (i, e) in stencil.e().iter().enumerate() {
        for (axis, &c) in e.iter().enumerate() {
            if c == 0 {
                continue;
            }
            for cell in 0..n {
                u[axis * n + cell] += f64::from(c) * f[i * n + cell];
            }
        }
    }
    for axis in 0..stencil.d() {
        for cell in 0..n {
            u[axis * n + cell] /= rho[cell];
        }
    }
    u
}

/// Second-order equilibrium `[Q, N]` for density `rho` and velocity `u` (`[D, N]`).
pub fn quadratic_equilibrium(stencil: &StencilDescriptor, rho: &[f64], u: &[f64]) -> Vec<f64> {
    let n = rho.len();
    let d = stencil.d();
    let cs_sq = stencil.cs() * stencil.cs();
    let mut f_eq = vec![0.0; stencil.q() * n];
    for cell in 0..n {
        let u_sq: f64 = (0..d).map(|a| u[a * n + cell] * u[a * n + cell]).sum();
        for (i, e) in stencil.e().iter().enumerate() {
            let eu: f64 = e
                .iter()
                .enumerate()
                .map(|(a, &c)| f64::from(c) * u[a * n + cell])
                .sum();
            f_eq[i * n + cell] = stencil.w()[i]
                * rho[cell]
                * (1.0 + eu / cs_sq + 0.5 * eu * eu / (cs_sq * cs_sq) - 0.5 * u_sq / cs_sq);
        }
    }
    f_eq
}

/// BGK relaxation toward `f_eq`. With `node_type`, only fluid cells (`0`)
/// relax.
pub fn bgk_collision(f: &mut [f64], f_eq: &[f64], tau: f64, node_type: Option<&[u8]>) {
    for (k, (value, eq)) in f.iter_mut().zip(f_eq).enumerate() {
        if node_type.is_some_and(|mask| mask[k % mask.len()] != 0) {
            continue;
        }
        *value -= (*value - eq) / tau;
    }
}

/// Full-way bounce-back on cells whose `node_type` equals `index`.
pub fn bounce_back(stencil: &StencilDescriptor, f: &mut [f64], node_type: &[u8], index: u8) {
    let n = node_type.len();
    for (cell, _) in node_type.iter().enumerate().filter(|(_, &t)| t == index) {
        let before: Vec<f64> = (0..stencil.q()).map(|i| f[i * n + cell]).collect();
        for (i, &opposite) in stencil.opposite().iter().enumerate() {
            f[i * n + cell] = before[opposite];
        }
    }
}

/// Overwrites cells whose `node_type` equals `index` with the equilibrium at
/// density `rho` and velocity `u` (`[D]`, lattice units).
pub fn equilibrium_boundary(
    stencil: &StencilDescriptor,
    f: &mut [f64],
    node_type: &[u8],
    index: u8,
    rho: f64,
    u: &[f64],
) {
    let n = node_type.len();
    let f_eq = quadratic_equilibrium(stencil, &[rho], u);
    for (cell, _) in node_type.iter().enumerate().filter(|(_, &t)| t == index) {
        for (i, &eq) in f_eq.iter().enumerate() {
            f[i * n + cell] = eq;
        }
    }
}

/// Anti-bounce-back pressure outlet on the boundary layer facing `direction`.
///
/// Moments are taken from `f` as it is on entry, i.e. after collision and
/// any boundary applied before this one; `f` is then updated in place.
/// Layers without an interior neighbour (extent 1 along the axis) are left
/// alone.
pub fn anti_bounce_back_outlet(
    stencil: &StencilDescriptor,
    grid: &Grid,
    f: &mut [f64],
    direction: &OutletDirection,
) {
    let n = grid.cells();
    let d = stencil.d();
    let axis = direction.axis();
    let extent = grid.shape()[axis];
    if extent < 2 {
        return;
    }
    let (layer, inner) = if direction.sign() > 0 {
        (extent - 1, extent - 2)
    } else {
        (0, 1)
    };
    let cs_sq = stencil.cs() * stencil.cs();
    let selected = stencil.velocities_along(direction.components());
    let rho = density(stencil, f);
    let u = velocity(stencil, f, &rho);

    for cell in 0..n {
        let coords = grid.coords(cell);
        if coords[axis] != layer {
            continue;
        }
        let mut neighbour = coords.clone();
        neighbour[axis] = inner;
        let nb = grid.cell(&neighbour);

        let u_w: Vec<f64> = (0..d)
            .map(|j| {
                let u_j = u[j * n + cell];
                u_j + 0.5 * (u_j - u[j * n + nb])
            })
            .collect();
        let u_w_sq: f64 = u_w.iter().map(|v| v * v).sum();

        for &v in &selected {
            let eu: f64 = stencil
                .velocity(v)
                .iter()
                .zip(&u_w)
                .map(|(&c, &uw)| f64::from(c) * uw)
                .sum();
            let opposite = stencil.opposite()[v];
            f[opposite * n + cell] = -f[v * n + cell]
                + stencil.w()[v]
                    * rho[cell]
                    * (2.0 + eu * eu / (cs_sq * cs_sq) - u_w_sq / cs_sq);
        }
    }
}

/// Periodic streaming into a new field. Cells flagged in `no_stream_mask`
/// keep their own populations; everything else pulls from `x - e_i`.
pub fn standard_streaming(
    stencil: &StencilDescriptor,
    grid: &Grid,
    f: &[f64],
    no_stream_mask: Option<&[u8]>,
) -> Vec<f64> {
    let n = grid.cells();
    let mut out = vec![0.0; f.len()];
    for cell in 0..n {
        let coords = grid.coords(cell);
        let kept = no_stream_mask.is_some_and(|mask| mask[cell] != 0);
        for (i, e) in stencil.e().iter().enumerate() {
            let source = if kept {
                cell
            } else {
                let back: Vec<i32> = e.iter().map(|c| -c).collect();
                grid.cell(&grid.shifted(&coords, &back))
            };
            out[i * n + cell] = f[i * n + source];
        }
    }
    out
}

/// The identity streaming step.
pub fn no_streaming(f: &[f64]) -> Vec<f64> {
    f.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbmgen_ir::stencil;

    #[test]
    fn grid_indexing_is_row_major() {
        let grid = Grid::new(&[3, 4]);
        assert_eq!(grid.cell(&[1, 2]), 6);
        assert_eq!(grid.coords(6), vec![1, 2]);
        assert_eq!(grid.shifted(&[2, 0], &[1, -1]), vec![0, 3]);
    }

    #[test]
    fn equilibrium_reproduces_its_moments() {
        let stencil = stencil::d2q9();
        let rho = vec![1.2, 0.9];
        let u = vec![0.05, -0.02, -0.03, 0.01];
        let f_eq = quadratic_equilibrium(&stencil, &rho, &u);
        let rho_eq = density(&stencil, &f_eq);
        let u_eq = velocity(&stencil, &f_eq, &rho_eq);
        for (a, b) in rho.iter().zip(&rho_eq) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in u.iter().zip(&u_eq) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn bounce_back_swaps_opposites_on_tagged_cells() {
        let stencil = stencil::d1q3();
        let mut f = vec![1.0, 1.0, 2.0, 3.0, 3.0, 5.0];
        bounce_back(&stencil, &mut f, &[0, 1], 1);
        assert_eq!(f, vec![1.0, 1.0, 2.0, 5.0, 3.0, 3.0]);
    }

    #[test]
    fn equilibrium_boundary_only_touches_tagged_cells() {
        let stencil = stencil::d1q3();
        let mut f = vec![0.5; 6];
        equilibrium_boundary(&stencil, &mut f, &[0, 2], 2, 1.5, &[0.1]);
        let expected = quadratic_equilibrium(&stencil, &[1.5], &[0.1]);
        for i in 0..3 {
            assert_eq!(f[i * 2], 0.5);
            assert!((f[i * 2 + 1] - expected[i]).abs() < 1e-15);
        }
    }

    #[test]
    fn outlet_on_uniform_state_reproduces_it() {
        // Zero velocity gradient: u_w = u and the rebuilt populations are the
        // equilibrium ones.
        let stencil = stencil::d2q9();
        let grid = Grid::new(&[4, 3]);
        let n = grid.cells();
        let state = quadratic_equilibrium(&stencil, &[1.1], &[0.04, 0.0]);
        let mut f: Vec<f64> = state
            .iter()
            .flat_map(|&v| std::iter::repeat(v).take(n))
            .collect();
        let before = f.clone();
        let direction = OutletDirection::new(vec![1, 0]).unwrap();
        anti_bounce_back_outlet(&stencil, &grid, &mut f, &direction);
        for (a, b) in before.iter().zip(&f) {
            assert!((a - b).abs() < 1e-13, "{a} vs {b}");
        }
    }

    #[test]
    fn outlet_leaves_single_cell_axes_alone() {
        let stencil = stencil::d2q9();
        let grid = Grid::new(&[1, 4]);
        let mut f: Vec<f64> = (0..36).map(|k| 0.1 + 0.01 * f64::from(k)).collect();
        let before = f.clone();
        let direction = OutletDirection::new(vec![1, 0]).unwrap();
        anti_bounce_back_outlet(&stencil, &grid, &mut f, &direction);
        assert_eq!(f, before);
    }

    #[test]
    fn masked_collision_skips_tagged_cells() {
        let mut f = vec![2.0, 2.0, 4.0, 4.0];
        let f_eq = vec![1.0; 4];
        bgk_collision(&mut f, &f_eq, 2.0, Some(&[0, 3]));
        assert_eq!(f, vec![1.5, 2.0, 2.5, 4.0]);
    }

    #[test]
    fn masked_streaming_keeps_flagged_cells() {
        let stencil = stencil::d1q3();
        let grid = Grid::new(&[3]);
        let f: Vec<f64> = (0..9).map(f64::from).collect();
        let out = standard_streaming(&stencil, &grid, &f, Some(&[0, 1, 0]));
        assert_eq!(&out[0..3], &[0.0, 1.0, 2.0]);
        assert_eq!(&out[3..6], &[5.0, 4.0, 4.0]);
        assert_eq!(&out[6..9], &[7.0, 7.0, 6.0]);
    }
}
