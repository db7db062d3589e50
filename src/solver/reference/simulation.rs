use lbmgen_ir::{
    validate_boundaries, BoundarySpec, CollisionSpec, ConfigError, StencilDescriptor,
    StreamingSpec,
};

use super::ops::{self, Grid};

/// Whole-array LBM step with the same component semantics as a generated
/// kernel: collision, then boundaries in list order, then streaming.
#[derive(Debug, Clone)]
pub struct ReferenceSimulation {
    stencil: StencilDescriptor,
    grid: Grid,
    collision: CollisionSpec,
    boundaries: Vec<BoundarySpec>,
    streaming: StreamingSpec,
    pub f: Vec<f64>,
    pub no_collision_mask: Vec<u8>,
    pub no_stream_mask: Vec<u8>,
}

impl ReferenceSimulation {
    /// Starts from the rest state `f = w` in every cell with empty masks.
    pub fn new(
        stencil: StencilDescriptor,
        shape: &[usize],
        collision: CollisionSpec,
        boundaries: Vec<BoundarySpec>,
        streaming: StreamingSpec,
    ) -> Result<Self, ConfigError> {
        collision.validate()?;
        validate_boundaries(&boundaries)?;
        if shape.len() != stencil.d() {
            return Err(ConfigError::InvalidStencil {
                name: stencil.name().to_string(),
                reason: format!(
                    "grid shape {shape:?} does not have {} dimensions",
                    stencil.d()
                ),
            });
        }
        check_components(&stencil, &boundaries, &streaming)?;
        let grid = Grid::new(shape);
        let cells = grid.cells();
        let f = stencil
            .w()
            .iter()
            .flat_map(|&w| std::iter::repeat(w).take(cells))
            .collect();
        Ok(Self {
            stencil,
            grid,
            collision,
            boundaries,
            streaming,
            f,
            no_collision_mask: vec![0; cells],
            no_stream_mask: vec![0; cells],
        })
    }

    pub fn stencil(&self) -> &StencilDescriptor {
        &self.stencil
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn collision(&self) -> &CollisionSpec {
        &self.collision
    }

    pub fn density(&self) -> Vec<f64> {
        ops::density(&self.stencil, &self.f)
    }

    pub fn velocity(&self) -> Vec<f64> {
        ops::velocity(&self.stencil, &self.f, &self.density())
    }

    pub fn step(&mut self) {
        let stencil = &self.stencil;
        let mut post = std::mem::take(&mut self.f);
        if let CollisionSpec::Bgk { tau } = self.collision {
            let rho = ops::density(stencil, &post);
            let u = ops::velocity(stencil, &post, &rho);
            let f_eq = ops::quadratic_equilibrium(stencil, &rho, &u);
            let masked = self.boundaries.iter().any(|b| b.mask_index().is_some());
            let node_type = masked.then_some(self.no_collision_mask.as_slice());
            ops::bgk_collision(&mut post, &f_eq, tau, node_type);
        }

        for boundary in &self.boundaries {
            match boundary {
                BoundarySpec::BounceBack { index } => {
                    ops::bounce_back(stencil, &mut post, &self.no_collision_mask, *index)
                }
                BoundarySpec::AntiBounceBackOutlet { direction } => {
                    ops::anti_bounce_back_outlet(stencil, &self.grid, &mut post, direction)
                }
                BoundarySpec::Equilibrium {
                    index,
                    rho,
                    velocity,
                } => ops::equilibrium_boundary(
                    stencil,
                    &mut post,
                    &self.no_collision_mask,
                    *index,
                    *rho,
                    velocity,
                ),
            }
        }

        self.f = match self.streaming {
            StreamingSpec::NoStreaming => ops::no_streaming(&post),
            StreamingSpec::Standard {
                support_no_streaming_mask,
            } => ops::standard_streaming(
                stencil,
                &self.grid,
                &post,
                support_no_streaming_mask.then_some(self.no_stream_mask.as_slice()),
            ),
        };
    }
}

/// Rejects the combinations a generated kernel cannot express either.
fn check_components(
    stencil: &StencilDescriptor,
    boundaries: &[BoundarySpec],
    streaming: &StreamingSpec,
) -> Result<(), ConfigError> {
    let d = stencil.d();
    for boundary in boundaries {
        match boundary {
            BoundarySpec::AntiBounceBackOutlet { direction } => {
                if direction.arity() != d {
                    return Err(ConfigError::IncompatibleComponents {
                        component: format!("outlet {:?}", direction.components()),
                        reason: format!("stencil {} has {d} dimensions", stencil.name()),
                    });
                }
                if !streaming.is_double_buffered() {
                    return Err(ConfigError::IncompatibleComponents {
                        component: format!("outlet {:?}", direction.components()),
                        reason: "it needs a double-buffered streaming, not no_streaming"
                            .to_string(),
                    });
                }
            }
            BoundarySpec::Equilibrium { velocity, .. } if velocity.len() != d => {
                return Err(ConfigError::IncompatibleComponents {
                    component: format!("equilibrium boundary {velocity:?}"),
                    reason: format!("stencil {} has {d} dimensions", stencil.name()),
                });
            }
            _ => {}
        }
    }
    Ok(())
}
