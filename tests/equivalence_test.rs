//! The generated kernel, executed on the host, against the whole-array
//! reference operators.

use lbmgen::solver::native::{
    Generator, HostBuffer, HostLauncher, LaunchError, NativeModule, SlotScope,
};
use lbmgen::solver::ReferenceSimulation;
use lbmgen_ir::{stencil, BoundarySpec, CollisionSpec, EquilibriumSpec, StencilDescriptor, StreamingSpec};

const TOLERANCE: f64 = 1e-12;

struct Case {
    stencil: StencilDescriptor,
    shape: Vec<usize>,
    collision: CollisionSpec,
    boundaries: Vec<BoundarySpec>,
    streaming: StreamingSpec,
}

impl Case {
    fn new(stencil: StencilDescriptor, shape: &[usize]) -> Self {
        Self {
            stencil,
            shape: shape.to_vec(),
            collision: CollisionSpec::Bgk { tau: 0.8 },
            boundaries: Vec::new(),
            streaming: StreamingSpec::standard(),
        }
    }

    fn simulation(&self) -> ReferenceSimulation {
        ReferenceSimulation::new(
            self.stencil.clone(),
            &self.shape,
            self.collision,
            self.boundaries.clone(),
            self.streaming,
        )
        .unwrap()
    }

    fn module(&self) -> NativeModule {
        Generator::new(
            self.stencil.clone(),
            self.collision,
            self.boundaries.clone(),
            EquilibriumSpec::Quadratic,
            self.streaming,
        )
        .unwrap()
        .generate_module()
        .unwrap()
    }
}

/// Binds the simulation state the way the Python wrapper passes it.
fn launcher_for(module: &NativeModule, sim: &ReferenceSimulation) -> HostLauncher {
    let mut launcher = HostLauncher::new(module, sim.grid().shape()).unwrap();
    launcher
        .bind_buffer("f", HostBuffer::Scalar(sim.f.clone()))
        .unwrap();
    let kernel = |name: &str| module.slots.contains(SlotScope::Kernel, name);
    if kernel("f_next") {
        launcher
            .bind_buffer("f_next", HostBuffer::Scalar(vec![0.0; sim.f.len()]))
            .unwrap();
    }
    if kernel("no_collision_mask") {
        launcher
            .bind_buffer(
                "no_collision_mask",
                HostBuffer::Byte(sim.no_collision_mask.clone()),
            )
            .unwrap();
    }
    if kernel("no_stream_mask") {
        launcher
            .bind_buffer("no_stream_mask", HostBuffer::Byte(sim.no_stream_mask.clone()))
            .unwrap();
    }
    if let CollisionSpec::Bgk { tau } = *sim.collision() {
        launcher.bind_value("tau_inv", 1.0 / tau).unwrap();
    }
    launcher
}

fn perturb(sim: &mut ReferenceSimulation) {
    for (k, value) in sim.f.iter_mut().enumerate() {
        *value *= 1.0 + 0.05 * ((k * 7919) % 13) as f64 / 13.0;
    }
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (k, (a, b)) in actual.iter().zip(expected).enumerate() {
        assert!((a - b).abs() < TOLERANCE, "element {k}: kernel {a}, reference {b}");
    }
}

/// Steps both sides `steps` times and compares `f` after each step.
fn check(case: &Case, sim: &mut ReferenceSimulation, steps: usize) {
    let module = case.module();
    let mut launcher = launcher_for(&module, sim);
    for _ in 0..steps {
        sim.step();
        launcher.launch().unwrap();
        assert_close(launcher.scalars("f").unwrap(), &sim.f);
    }
}

#[test]
fn bgk_single_step_matches_reference() {
    let case = Case {
        collision: CollisionSpec::Bgk { tau: 2.0 },
        ..Case::new(stencil::d2q9(), &[16, 16])
    };
    let mut sim = case.simulation();
    sim.f.fill(1.0);
    let n = 16 * 16;
    for i in 0..9 {
        sim.f[i * n + 2 * 16 + 2] = 2.0;
    }
    check(&case, &mut sim, 1);
}

#[test]
fn bgk_multi_step_on_every_dimension() {
    for (stencil, shape) in [
        (stencil::d1q3(), vec![11]),
        (stencil::d2q9(), vec![7, 5]),
        (stencil::d3q15(), vec![4, 3, 5]),
        (stencil::d3q19(), vec![3, 4, 3]),
    ] {
        let case = Case::new(stencil, &shape);
        let mut sim = case.simulation();
        perturb(&mut sim);
        check(&case, &mut sim, 3);
    }
}

#[test]
fn no_collision_no_streaming_is_identity() {
    let case = Case {
        collision: CollisionSpec::NoCollision,
        streaming: StreamingSpec::NoStreaming,
        ..Case::new(stencil::d2q9(), &[5, 6])
    };
    let mut sim = case.simulation();
    perturb(&mut sim);
    let before = sim.f.clone();
    check(&case, &mut sim, 2);
    assert_close(&sim.f, &before);
}

#[test]
fn bounce_back_matches_reference() {
    let case = Case {
        boundaries: vec![
            BoundarySpec::bounce_back(1).unwrap(),
            BoundarySpec::bounce_back(2).unwrap(),
        ],
        ..Case::new(stencil::d2q9(), &[8, 6])
    };
    let mut sim = case.simulation();
    perturb(&mut sim);
    for y in 0..6 {
        sim.no_collision_mask[y] = 1;
        sim.no_collision_mask[7 * 6 + y] = 2;
    }
    sim.no_collision_mask[3 * 6 + 3] = 1;
    check(&case, &mut sim, 3);
}

#[test]
fn bounce_back_under_no_streaming_matches_reference() {
    let case = Case {
        boundaries: vec![BoundarySpec::bounce_back(1).unwrap()],
        streaming: StreamingSpec::NoStreaming,
        ..Case::new(stencil::d1q3(), &[6])
    };
    let mut sim = case.simulation();
    perturb(&mut sim);
    sim.no_collision_mask[0] = 1;
    sim.no_collision_mask[5] = 1;
    check(&case, &mut sim, 2);
}

#[test]
fn outlets_match_reference() {
    for direction in [vec![1, 0], vec![-1, 0], vec![0, 1], vec![0, -1]] {
        let case = Case {
            boundaries: vec![BoundarySpec::outlet(direction).unwrap()],
            ..Case::new(stencil::d2q9(), &[6, 5])
        };
        let mut sim = case.simulation();
        perturb(&mut sim);
        check(&case, &mut sim, 2);
    }

    let case = Case {
        boundaries: vec![
            BoundarySpec::bounce_back(1).unwrap(),
            BoundarySpec::outlet(vec![0, 0, 1]).unwrap(),
        ],
        ..Case::new(stencil::d3q27(), &[3, 3, 4])
    };
    let mut sim = case.simulation();
    perturb(&mut sim);
    sim.no_collision_mask[0] = 1;
    check(&case, &mut sim, 2);
}

#[test]
fn periodic_wraparound() {
    let case = Case {
        collision: CollisionSpec::NoCollision,
        ..Case::new(stencil::d2q9(), &[4, 3])
    };
    let mut sim = case.simulation();
    sim.f.fill(0.0);
    let n = 12;
    let cell = |x: usize, y: usize| x * 3 + y;
    // e[1] = (1, 0) from (3, 1); e[7] = (-1, -1) from (0, 0)
    sim.f[n + cell(3, 1)] = 1.0;
    sim.f[7 * n + cell(0, 0)] = 2.0;
    check(&case, &mut sim, 1);
    assert_eq!(sim.f[n + cell(0, 1)], 1.0);
    assert_eq!(sim.f[7 * n + cell(3, 2)], 2.0);
}

#[test]
fn masked_cells_keep_their_populations() {
    let case = Case {
        collision: CollisionSpec::NoCollision,
        streaming: StreamingSpec::standard_masked(),
        ..Case::new(stencil::d2q9(), &[5, 5])
    };
    let mut sim = case.simulation();
    perturb(&mut sim);
    let masked = [2 * 5 + 2, 2 * 5 + 3, 0];
    for &cell in &masked {
        sim.no_stream_mask[cell] = 1;
    }
    let before = sim.f.clone();
    check(&case, &mut sim, 1);
    for &cell in &masked {
        for i in 0..9 {
            assert_eq!(sim.f[i * 25 + cell], before[i * 25 + cell]);
        }
    }
}

#[test]
fn unbound_tensor_is_reported() {
    let case = Case {
        boundaries: vec![BoundarySpec::bounce_back(1).unwrap()],
        ..Case::new(stencil::d2q9(), &[4, 4])
    };
    let module = case.module();
    let sim = case.simulation();
    let mut launcher = HostLauncher::new(&module, sim.grid().shape()).unwrap();
    launcher
        .bind_buffer("f", HostBuffer::Scalar(sim.f.clone()))
        .unwrap();
    launcher
        .bind_buffer("f_next", HostBuffer::Scalar(sim.f.clone()))
        .unwrap();
    assert_eq!(
        launcher.launch(),
        Err(LaunchError::Unbound("no_collision_mask".to_string()))
    );
}

#[test]
fn outlet_on_single_cell_axis_matches_reference() {
    let case = Case {
        boundaries: vec![BoundarySpec::outlet(vec![1, 0]).unwrap()],
        ..Case::new(stencil::d2q9(), &[1, 4])
    };
    let mut sim = case.simulation();
    perturb(&mut sim);
    check(&case, &mut sim, 2);
}

#[test]
fn outlets_sharing_a_corner_apply_in_list_order() {
    for boundaries in [
        vec![
            BoundarySpec::outlet(vec![1, 0]).unwrap(),
            BoundarySpec::outlet(vec![0, 1]).unwrap(),
        ],
        vec![
            BoundarySpec::outlet(vec![0, 1]).unwrap(),
            BoundarySpec::outlet(vec![1, 0]).unwrap(),
        ],
    ] {
        let case = Case {
            boundaries,
            ..Case::new(stencil::d2q9(), &[6, 5])
        };
        let mut sim = case.simulation();
        perturb(&mut sim);
        check(&case, &mut sim, 3);
    }
}

#[test]
fn outlet_next_to_earlier_boundaries_matches_reference() {
    let case = Case {
        boundaries: vec![
            BoundarySpec::bounce_back(1).unwrap(),
            BoundarySpec::equilibrium(2, 1.0, vec![0.03, 0.0]).unwrap(),
            BoundarySpec::outlet(vec![1, 0]).unwrap(),
            BoundarySpec::outlet(vec![0, -1]).unwrap(),
        ],
        ..Case::new(stencil::d2q9(), &[6, 5])
    };
    let mut sim = case.simulation();
    perturb(&mut sim);
    // Bounce-back and equilibrium cells right next to the outlet layers.
    sim.no_collision_mask[4 * 5 + 2] = 1;
    sim.no_collision_mask[2 * 5 + 1] = 2;
    sim.no_collision_mask[4 * 5 + 1] = 2;
    check(&case, &mut sim, 3);
}

#[test]
fn equilibrium_boundary_matches_reference() {
    for (stencil, shape, velocity) in [
        (stencil::d1q3(), vec![7], vec![0.04]),
        (stencil::d2q9(), vec![6, 5], vec![0.05, -0.01]),
        (stencil::d3q19(), vec![3, 4, 3], vec![0.0, 0.02, 0.01]),
    ] {
        let case = Case {
            boundaries: vec![BoundarySpec::equilibrium(1, 1.02, velocity).unwrap()],
            ..Case::new(stencil, &shape)
        };
        let mut sim = case.simulation();
        perturb(&mut sim);
        let inlet_layer = shape[1..].iter().product::<usize>();
        for cell in 0..inlet_layer {
            sim.no_collision_mask[cell] = 1;
        }
        check(&case, &mut sim, 3);
    }
}

#[test]
fn bounce_back_with_masked_streaming_matches_reference() {
    let case = Case {
        boundaries: vec![BoundarySpec::bounce_back(1).unwrap()],
        streaming: StreamingSpec::standard_masked(),
        ..Case::new(stencil::d2q9(), &[7, 6])
    };
    let mut sim = case.simulation();
    perturb(&mut sim);
    for y in 0..6 {
        sim.no_collision_mask[y] = 1;
        sim.no_collision_mask[6 * 6 + y] = 1;
        sim.no_stream_mask[6 * 6 + y] = 1;
    }
    sim.no_collision_mask[3 * 6 + 2] = 1;
    sim.no_stream_mask[3 * 6 + 3] = 1;
    check(&case, &mut sim, 3);
}
