use lbmgen_codegen::native::{Expr, Stmt, Type};
use lbmgen_ir::CollisionSpec;

use super::context::GenContext;
use super::error::GenerationError;
use super::primitives::{generate_f_reg, generate_node_type, generate_q};

pub trait NativeCollision {
    fn name(&self) -> String;

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError>;

    fn contribute_launcher_fragments(
        &self,
        _ctx: &mut GenContext<'_>,
    ) -> Result<(), GenerationError> {
        Ok(())
    }
}

pub fn native_collision(spec: &CollisionSpec) -> Box<dyn NativeCollision> {
    match spec {
        CollisionSpec::Bgk { .. } => Box::new(BgkCollision),
        CollisionSpec::NoCollision => Box::new(NoCollision),
    }
}

/// Single-relaxation-time collision. `tau` is read from the simulation at
/// launch time, so one kernel serves every relaxation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct BgkCollision;

impl NativeCollision for BgkCollision {
    fn name(&self) -> String {
        "bgk".to_string()
    }

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        if !ctx.register("collision") {
            return Ok(());
        }
        generate_q(ctx)?;
        generate_f_reg(ctx)?;
        ctx.request_f_eq()?;
        if !ctx.kernel_hooked("tau_inv") {
            ctx.register_kernel_slot(
                "tau_inv",
                Type::const_(Type::Scalar),
                "static_cast<scalar_t>(tau_inv)",
            )?;
        }

        let f_reg = || Expr::ident("f_reg").index("i");
        let relax = Stmt::for_range(
            "i",
            "q",
            vec![Stmt::assign(
                f_reg(),
                f_reg() - Expr::ident("tau_inv") * (f_reg() - Expr::ident("f_eq").index("i")),
            )],
        );

        let mut stmts = vec![Stmt::comment("bgk collision")];
        if ctx.is_collision_masked() {
            generate_node_type(ctx)?;
            stmts.push(Stmt::if_(Expr::ident("node_type").eq(0), vec![relax]));
        } else {
            stmts.push(relax);
        }
        stmts.push(Stmt::Blank);
        ctx.append_node(stmts);
        Ok(())
    }

    fn contribute_launcher_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        if !ctx.launcher_hooked("tau_inv") {
            ctx.register_launcher_slot("tau_inv", Type::Double, "1.0 / simulation.collision.tau")?;
        }
        Ok(())
    }
}

/// Leaves populations untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCollision;

impl NativeCollision for NoCollision {
    fn name(&self) -> String {
        "no_collision".to_string()
    }

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        generate_f_reg(ctx)
    }
}
