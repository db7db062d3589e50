use lbmgen_codegen::native::{AssignOp, Expr, Stmt, Type};
use lbmgen_ir::{BoundarySpec, OutletDirection};

use super::context::GenContext;
use super::error::GenerationError;
use super::primitives::{
    cell_prologue, density, generate_cs, generate_f_reg, generate_node_type, generate_opposite,
    generate_q, generate_u, generate_w, velocity, AXES,
};

pub trait NativeBoundary {
    fn name(&self) -> String;

    /// Whether cells owned by this boundary are tagged in `no_collision_mask`
    /// and therefore skip collision.
    fn masks_collision(&self) -> bool;

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError>;

    fn contribute_launcher_fragments(
        &self,
        _ctx: &mut GenContext<'_>,
    ) -> Result<(), GenerationError> {
        Ok(())
    }
}

pub fn native_boundary(spec: &BoundarySpec) -> Box<dyn NativeBoundary> {
    match spec {
        BoundarySpec::BounceBack { index } => Box::new(BounceBackBoundary::new(*index)),
        BoundarySpec::AntiBounceBackOutlet { direction } => {
            Box::new(AntiBounceBackOutlet::new(direction.clone()))
        }
        BoundarySpec::Equilibrium {
            index,
            rho,
            velocity,
        } => Box::new(EquilibriumBoundary::new(*index, *rho, velocity.clone())),
    }
}

/// Full-way bounce-back on every cell whose `no_collision_mask` equals
/// `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BounceBackBoundary {
    index: u8,
}

impl BounceBackBoundary {
    pub fn new(index: u8) -> Self {
        Self { index }
    }
}

impl NativeBoundary for BounceBackBoundary {
    fn name(&self) -> String {
        format!("bounce_back_{}", self.index)
    }

    fn masks_collision(&self) -> bool {
        true
    }

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        if !ctx.register(&self.name()) {
            return Ok(());
        }
        generate_q(ctx)?;
        generate_f_reg(ctx)?;
        generate_opposite(ctx)?;
        generate_node_type(ctx)?;

        let bounce = || Expr::ident("bounce").index("i");
        let f_reg = || Expr::ident("f_reg").index("i");
        ctx.append_node([
            Stmt::comment(format!("bounce back on node type {}", self.index)),
            Stmt::if_(
                Expr::ident("node_type").eq(i64::from(self.index)),
                vec![
                    Stmt::array("bounce", Type::Scalar, "q"),
                    Stmt::for_range(
                        "i",
                        "q",
                        vec![Stmt::assign(
                            bounce(),
                            Expr::ident("f_reg").index(Expr::ident("opposite").index("i")),
                        )],
                    ),
                    Stmt::for_range("i", "q", vec![Stmt::assign(f_reg(), bounce())]),
                ],
            ),
            Stmt::Blank,
        ]);
        Ok(())
    }
}

/// Anti-bounce-back pressure outlet on the boundary layer facing
/// `direction`.
///
/// Populations entering the domain through the outlet face are rebuilt from
/// the wall velocity `u_w = u + (u - u_nb) / 2`. Both velocities are taken
/// after collision and after every boundary listed before this one. The
/// neighbour's state is not visible to this thread, so it is recomputed in a
/// nested scope by replaying the node phase so far on the neighbour's
/// pre-step populations. Those are read from `f` while streaming writes
/// `f_next`, so a double-buffered streaming is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntiBounceBackOutlet {
    direction: OutletDirection,
}

impl AntiBounceBackOutlet {
    pub fn new(direction: OutletDirection) -> Self {
        Self { direction }
    }

    pub fn direction(&self) -> &OutletDirection {
        &self.direction
    }
}

impl NativeBoundary for AntiBounceBackOutlet {
    fn name(&self) -> String {
        let side = if self.direction.sign() > 0 { "p" } else { "n" };
        format!("anti_bounce_back_outlet_{}{}", AXES[self.direction.axis()], side)
    }

    fn masks_collision(&self) -> bool {
        false
    }

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        let name = self.name();
        if !ctx.register(&name) {
            return Ok(());
        }
        let d = ctx.d();
        if self.direction.arity() != d {
            return Err(GenerationError::unavailable(
                name,
                format!(
                    "direction {:?} does not match the {}-dimensional stencil {}",
                    self.direction.components(),
                    d,
                    ctx.stencil().name()
                ),
            ));
        }
        if !ctx.is_double_buffered() {
            return Err(GenerationError::unavailable(
                "f_next",
                format!("{name} reads pre-step neighbour populations"),
            ));
        }
        generate_f_reg(ctx)?;
        generate_u(ctx)?;
        generate_w(ctx)?;
        generate_cs(ctx)?;

        let stencil = ctx.stencil();
        let axis = self.direction.axis();
        let sign = self.direction.sign();

        let index = |a: usize| Expr::ident("index").index(a);
        let dimension = |a: usize| Expr::ident("dimension").index(a);
        let at_face = if sign > 0 {
            index(axis).eq(dimension(axis) - 1)
        } else {
            index(axis).eq(0)
        };
        // A single-cell axis has no inner neighbour; the outlet is skipped.
        let on_layer = at_face & dimension(axis).gt(1);

        let mut body = vec![Stmt::array("neighbour", Type::Index, "d")];
        for a in 0..d {
            let value = match (a == axis, sign > 0) {
                (true, true) => index(a) - 1,
                (true, false) => index(a) + 1,
                (false, _) => index(a),
            };
            body.push(Stmt::assign(Expr::ident("neighbour").index(a), value));
        }

        let mut nested = vec![Stmt::array("index", Type::Index, "d")];
        nested.extend((0..d).map(|a| Stmt::assign(index(a), Expr::ident("neighbour").index(a))));
        nested.extend(cell_prologue(ctx)?);
        nested.extend(ctx.node_stmts().iter().cloned());
        nested.extend(density("rho_nb"));
        nested.push(velocity("u_nb", "rho_nb"));

        let outlet_u = || Expr::ident("outlet_u").index("j");
        let u_w_j = || Expr::ident("u_w").index("j");
        body.push(Stmt::array("u_nb", Type::Scalar, "d"));
        body.push(Stmt::scope(nested));
        body.extend(density("outlet_rho"));
        body.extend([
            Stmt::array("outlet_u", Type::Scalar, "d"),
            velocity("outlet_u", "outlet_rho"),
            Stmt::array("u_w", Type::Scalar, "d"),
            Stmt::var("u_w_sq", Type::Scalar, 0.0),
            Stmt::for_range(
                "j",
                "d",
                vec![
                    Stmt::assign(
                        u_w_j(),
                        outlet_u()
                            + Expr::lit_f64(0.5) * (outlet_u() - Expr::ident("u_nb").index("j")),
                    ),
                    Stmt::assign_op("u_w_sq", AssignOp::Add, u_w_j() * u_w_j()),
                ],
            ),
        ]);

        let cs_sq = || Expr::ident("cs_sq");
        for v in stencil.velocities_along(self.direction.components()) {
            let eu_name = format!("eu_{v}");
            let eu = || Expr::ident(eu_name.as_str());
            let opposite = stencil.opposite()[v];
            body.push(Stmt::let_(
                eu_name.as_str(),
                Type::Scalar,
                projection(stencil.velocity(v)),
            ));
            body.push(Stmt::assign(
                Expr::ident("f_reg").index(opposite),
                -Expr::ident("f_reg").index(v)
                    + Expr::ident("w").index(v)
                        * Expr::ident("outlet_rho")
                        * (Expr::lit_f64(2.0) + eu() * eu() / (cs_sq() * cs_sq())
                            - Expr::ident("u_w_sq") / cs_sq()),
            ));
        }

        let side = if sign > 0 { "last" } else { "first" };
        ctx.append_node([
            Stmt::comment(format!(
                "anti-bounce-back outlet on the {side} {} layer",
                AXES[axis]
            )),
            Stmt::if_(on_layer, body),
            Stmt::Blank,
        ]);
        Ok(())
    }
}

/// `e . u_w` written out for one integer velocity.
fn projection(velocity: &[i32]) -> Expr {
    let mut acc: Option<Expr> = None;
    for (axis, &c) in velocity.iter().enumerate() {
        let term = Expr::ident("u_w").index(axis);
        let term = if c.abs() == 1 { term } else { term * c.abs() };
        acc = match (acc, c.signum()) {
            (acc, 0) => acc,
            (None, 1) => Some(term),
            (None, _) => Some(-term),
            (Some(acc), 1) => Some(acc + term),
            (Some(acc), _) => Some(acc - term),
        };
    }
    acc.unwrap_or_else(|| Expr::lit_f64(0.0))
}

/// Overwrites every cell whose `no_collision_mask` equals `index` with the
/// equilibrium at a fixed density and velocity in lattice units.
#[derive(Debug, Clone, PartialEq)]
pub struct EquilibriumBoundary {
    index: u8,
    rho: f64,
    velocity: Vec<f64>,
}

impl EquilibriumBoundary {
    pub fn new(index: u8, rho: f64, velocity: Vec<f64>) -> Self {
        Self {
            index,
            rho,
            velocity,
        }
    }
}

impl NativeBoundary for EquilibriumBoundary {
    fn name(&self) -> String {
        format!("equilibrium_{}", self.index)
    }

    fn masks_collision(&self) -> bool {
        true
    }

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        let name = self.name();
        if !ctx.register(&name) {
            return Ok(());
        }
        if self.velocity.len() != ctx.d() {
            return Err(GenerationError::unavailable(
                name,
                format!(
                    "velocity {:?} does not match the {}-dimensional stencil {}",
                    self.velocity,
                    ctx.d(),
                    ctx.stencil().name()
                ),
            ));
        }
        generate_q(ctx)?;
        generate_f_reg(ctx)?;
        generate_node_type(ctx)?;

        let mut body = vec![Stmt::array("eq_u", Type::Scalar, "d")];
        body.extend(
            self.velocity
                .iter()
                .enumerate()
                .map(|(a, &v)| Stmt::assign(Expr::ident("eq_u").index(a), v)),
        );
        body.extend(ctx.equilibrium_stmts(Expr::lit_f64(self.rho), "eq_u", "f_reg")?);

        ctx.append_node([
            Stmt::comment(format!("equilibrium on node type {}", self.index)),
            Stmt::if_(Expr::ident("node_type").eq(i64::from(self.index)), body),
            Stmt::Blank,
        ]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::native::equilibrium::QuadraticEquilibrium;
    use lbmgen_codegen::native::Block;
    use lbmgen_ir::stencil;

    fn node_text(ctx: GenContext<'_>) -> String {
        let (_, buffers) = ctx.finish();
        Block::new(buffers.node).to_cuda(0)
    }

    #[test]
    fn outlet_skips_single_cell_axes() {
        let stencil = stencil::d2q9();
        let equilibrium = QuadraticEquilibrium;
        let mut ctx = GenContext::new(&stencil, &equilibrium, true, false);
        let outlet = AntiBounceBackOutlet::new(OutletDirection::new(vec![1, 0]).unwrap());
        outlet.contribute_kernel_fragments(&mut ctx).unwrap();
        let text = node_text(ctx);
        assert!(
            text.contains("if (index[0] == dimension[0] - 1 && dimension[0] > 1) {"),
            "{text}"
        );
    }

    #[test]
    fn outlet_replays_earlier_node_statements_for_the_neighbour() {
        let stencil = stencil::d2q9();
        let equilibrium = QuadraticEquilibrium;
        let mut ctx = GenContext::new(&stencil, &equilibrium, true, true);
        BounceBackBoundary::new(1).contribute_kernel_fragments(&mut ctx).unwrap();
        AntiBounceBackOutlet::new(OutletDirection::new(vec![0, -1]).unwrap())
            .contribute_kernel_fragments(&mut ctx)
            .unwrap();
        let text = node_text(ctx);
        // Once for the cell itself, once inside the neighbour's scope.
        assert_eq!(text.matches("if (node_type == 1) {").count(), 2, "{text}");
        assert!(text.contains("index[1] = neighbour[1];"));
        assert!(text.contains("u_nb[j] /= rho_nb;"));
        assert!(text.contains("outlet_u[j] /= outlet_rho;"));
    }

    #[test]
    fn outlet_requires_matching_arity_and_double_buffering() {
        let stencil = stencil::d2q9();
        let equilibrium = QuadraticEquilibrium;
        let outlet = AntiBounceBackOutlet::new(OutletDirection::new(vec![0, 0, 1]).unwrap());
        let mut ctx = GenContext::new(&stencil, &equilibrium, true, false);
        assert!(matches!(
            outlet.contribute_kernel_fragments(&mut ctx),
            Err(GenerationError::PrimitiveUnavailable { .. })
        ));

        let outlet = AntiBounceBackOutlet::new(OutletDirection::new(vec![1, 0]).unwrap());
        let mut ctx = GenContext::new(&stencil, &equilibrium, false, false);
        assert!(matches!(
            outlet.contribute_kernel_fragments(&mut ctx),
            Err(GenerationError::PrimitiveUnavailable { .. })
        ));
    }

    #[test]
    fn equilibrium_boundary_writes_fixed_state_into_tagged_cells() {
        let stencil = stencil::d2q9();
        let equilibrium = QuadraticEquilibrium;
        let mut ctx = GenContext::new(&stencil, &equilibrium, true, true);
        EquilibriumBoundary::new(2, 1.0, vec![0.05, 0.0])
            .contribute_kernel_fragments(&mut ctx)
            .unwrap();
        let text = node_text(ctx);
        assert!(text.contains("if (node_type == 2) {"), "{text}");
        assert!(text.contains("eq_u[0] = 0.05;"));
        assert!(text.contains("f_reg[i] = w[i] * 1.0 *"));

        let mut ctx = GenContext::new(&stencil, &equilibrium, true, true);
        assert!(EquilibriumBoundary::new(2, 1.0, vec![0.0])
            .contribute_kernel_fragments(&mut ctx)
            .is_err());
    }

    #[test]
    fn projection_skips_zero_components() {
        assert_eq!(projection(&[0, -1]).to_string(), "-u_w[1]");
        assert_eq!(projection(&[1, 0, -1]).to_string(), "u_w[0] - u_w[2]");
        assert_eq!(projection(&[0, 0]).to_string(), "0.0");
    }
}
