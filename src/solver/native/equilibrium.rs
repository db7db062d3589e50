use lbmgen_codegen::native::{AssignOp, Expr, Stmt, Type};
use lbmgen_ir::EquilibriumSpec;

use super::context::GenContext;
use super::error::GenerationError;
use super::primitives::{generate_cs, generate_e, generate_u, generate_w};

pub trait NativeEquilibrium {
    fn name(&self) -> String;

    /// Declares `f_eq[q]` in the node phase. Requested on demand by
    /// collision operators through [`GenContext::request_f_eq`].
    fn generate_f_eq(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError>;

    /// Statements assigning `target[i]` for every direction from density
    /// `rho` and the velocity array `u`. `target` must already be declared.
    fn equilibrium_stmts(
        &self,
        ctx: &mut GenContext<'_>,
        rho: Expr,
        u: &str,
        target: &str,
    ) -> Result<Vec<Stmt>, GenerationError>;

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError>;

    fn contribute_launcher_fragments(
        &self,
        _ctx: &mut GenContext<'_>,
    ) -> Result<(), GenerationError> {
        Ok(())
    }
}

pub fn native_equilibrium(spec: &EquilibriumSpec) -> Box<dyn NativeEquilibrium> {
    match spec {
        EquilibriumSpec::Quadratic => Box::new(QuadraticEquilibrium),
    }
}

/// Second-order expansion of the Maxwell-Boltzmann distribution:
/// `w_i rho (1 + e.u/cs^2 + (e.u)^2/(2 cs^4) - u.u/(2 cs^2))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadraticEquilibrium;

impl NativeEquilibrium for QuadraticEquilibrium {
    fn name(&self) -> String {
        "quadratic".to_string()
    }

    fn generate_f_eq(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        if !ctx.register("f_eq") {
            return Ok(());
        }
        generate_u(ctx)?;

        let mut stmts = vec![
            Stmt::comment("quadratic equilibrium"),
            Stmt::array("f_eq", Type::Scalar, "q"),
        ];
        stmts.extend(self.equilibrium_stmts(ctx, Expr::ident("rho"), "u", "f_eq")?);
        stmts.push(Stmt::Blank);
        ctx.append_node(stmts);
        Ok(())
    }

    fn equilibrium_stmts(
        &self,
        ctx: &mut GenContext<'_>,
        rho: Expr,
        u: &str,
        target: &str,
    ) -> Result<Vec<Stmt>, GenerationError> {
        generate_e(ctx)?;
        generate_w(ctx)?;
        generate_cs(ctx)?;

        let u_j = || Expr::ident(u).index("j");
        let eu = || Expr::ident("eu");
        let cs_sq = || Expr::ident("cs_sq");
        let half = || Expr::lit_f64(0.5);
        let value = Expr::ident("w").index("i")
            * rho
            * (Expr::lit_f64(1.0) + eu() / cs_sq() + half() * eu() * eu() / (cs_sq() * cs_sq())
                - half() * Expr::ident("u_sq") / cs_sq());

        Ok(vec![
            Stmt::var("u_sq", Type::Scalar, 0.0),
            Stmt::for_range("j", "d", vec![Stmt::assign_op("u_sq", AssignOp::Add, u_j() * u_j())]),
            Stmt::for_range(
                "i",
                "q",
                vec![
                    Stmt::var("eu", Type::Scalar, 0.0),
                    Stmt::for_range(
                        "j",
                        "d",
                        vec![Stmt::assign_op(
                            "eu",
                            AssignOp::Add,
                            Expr::ident("e").index("i").index("j") * u_j(),
                        )],
                    ),
                    Stmt::assign(Expr::ident(target).index("i"), value),
                ],
            ),
        ])
    }

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        generate_w(ctx)?;
        generate_cs(ctx)
    }
}
