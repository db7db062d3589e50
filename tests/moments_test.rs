use lbmgen::solver::moments::{moment_tensor, TransformRegistry};
use lbmgen::solver::reference::ops;

#[test]
fn every_registered_transform_round_trips() {
    for transform in TransformRegistry::builtin().all().unwrap() {
        let q = transform.stencil().q();
        let f: Vec<f64> = (0..q)
            .map(|i| transform.stencil().w()[i] * (1.0 + 0.1 * ((i * 5) % 7) as f64))
            .collect();
        let m = transform.transform(&f).unwrap();
        let back = transform.inverse_transform(&m).unwrap();
        for (a, b) in f.iter().zip(&back) {
            assert!((a - b).abs() < 1e-6, "{}: {a} vs {b}", transform.name());
        }
    }
}

#[test]
fn density_and_momentum_rows_agree_with_reference_moments() {
    for transform in TransformRegistry::builtin().all().unwrap() {
        let stencil = transform.stencil();
        let f_eq = ops::quadratic_equilibrium(stencil, &[1.1], &vec![0.02; stencil.d()]);
        let m = transform.transform(&f_eq).unwrap();
        let rho = ops::density(stencil, &f_eq);
        assert!((m[0] - rho[0]).abs() < 1e-12);
        for axis in 0..stencil.d() {
            let mut multiindex = vec![0u32; stencil.d()];
            multiindex[axis] = 1;
            let row = moment_tensor(stencil.e(), &multiindex);
            let j: f64 = row.iter().zip(&f_eq).map(|(e, f)| e * f).sum();
            assert!((m[1 + axis] - j).abs() < 1e-12, "{}", transform.name());
        }
    }
}

#[test]
fn wrong_length_is_rejected() {
    let transform = TransformRegistry::builtin().default_for("D2Q9").unwrap();
    assert!(transform.transform(&[1.0; 3]).is_err());
}
