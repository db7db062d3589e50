use lbmgen_codegen::native::{AssignOp, Expr, PyStmt, Stmt, Type};
use lbmgen_ir::StreamingSpec;

use super::context::GenContext;
use super::error::GenerationError;
use super::primitives::{
    generate_e, generate_f_reg, generate_node_offset, generate_offset, index_coords,
    node_offset_at, offset_at, AXES,
};

pub trait NativeStreaming {
    fn name(&self) -> String;

    /// Whether the kernel writes a second buffer that is swapped with `f`
    /// after the launch.
    fn is_double_buffered(&self) -> bool;

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError>;

    fn contribute_launcher_fragments(
        &self,
        _ctx: &mut GenContext<'_>,
    ) -> Result<(), GenerationError> {
        Ok(())
    }
}

pub fn native_streaming(spec: &StreamingSpec) -> Box<dyn NativeStreaming> {
    match *spec {
        StreamingSpec::NoStreaming => Box::new(NoStreaming),
        StreamingSpec::Standard {
            support_no_streaming_mask,
        } => Box::new(StandardStreaming::new(support_no_streaming_mask)),
    }
}

/// Kernel-side `f_next` write target.
pub fn generate_f_next(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if ctx.register("f_next") && !ctx.kernel_hooked("f_next") {
        ctx.register_kernel_slot(
            "f_next",
            Type::ptr(Type::Scalar),
            "f_next.data_ptr<scalar_t>()",
        )?;
    }
    Ok(())
}

/// Launcher-side `f_next`: the tensor, its presence check and the swap
/// after the launch.
pub fn hook_f_next(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.launcher_hooked("f_next") {
        ctx.append_python_pre(PyStmt::assert_has_attr("simulation", "f_next"));
        ctx.register_launcher_slot("f_next", Type::Tensor, "simulation.f_next")?;
        ctx.append_python_post(PyStmt::swap("simulation.f", "simulation.f_next"));
    }
    Ok(())
}

pub fn generate_no_stream_mask(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if ctx.register("no_stream_mask") && !ctx.kernel_hooked("no_stream_mask") {
        ctx.register_kernel_slot(
            "no_stream_mask",
            Type::const_ptr(Type::Byte),
            "no_stream_mask.data_ptr<byte_t>()",
        )?;
    }
    Ok(())
}

pub fn hook_no_stream_mask(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.launcher_hooked("no_stream_mask") {
        ctx.append_python_pre(PyStmt::assert_has_attr(
            "simulation.streaming",
            "no_stream_mask",
        ));
        ctx.register_launcher_slot(
            "no_stream_mask",
            Type::const_(Type::Tensor),
            "simulation.streaming.no_stream_mask",
        )?;
    }
    Ok(())
}

/// Writes every population back to its own cell of `f`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStreaming;

impl NativeStreaming for NoStreaming {
    fn name(&self) -> String {
        "no_streaming".to_string()
    }

    fn is_double_buffered(&self) -> bool {
        false
    }

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        if !ctx.register("read_write()") {
            return Ok(());
        }
        generate_f_reg(ctx)?;
        generate_offset(ctx)?;

        let coords = index_coords(ctx.d());
        ctx.append_write([Stmt::for_range(
            "i",
            "q",
            vec![Stmt::assign(
                Expr::ident("f").index(offset_at("i", &coords)),
                Expr::ident("f_reg").index("i"),
            )],
        )]);
        Ok(())
    }
}

/// Double-buffered streaming with periodic wraparound on every axis.
///
/// With `support_no_streaming_mask`, cells flagged in
/// `simulation.streaming.no_stream_mask` keep their populations in place:
/// a flagged cell writes its own slots, and pushes aimed at a flagged cell
/// are dropped, so every element of `f_next` has exactly one writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StandardStreaming {
    support_no_streaming_mask: bool,
}

impl StandardStreaming {
    pub fn new(support_no_streaming_mask: bool) -> Self {
        Self {
            support_no_streaming_mask,
        }
    }

    pub fn supports_no_streaming_mask(&self) -> bool {
        self.support_no_streaming_mask
    }
}

impl NativeStreaming for StandardStreaming {
    fn name(&self) -> String {
        if self.support_no_streaming_mask {
            "standard_streaming_m".to_string()
        } else {
            "standard_streaming".to_string()
        }
    }

    fn is_double_buffered(&self) -> bool {
        true
    }

    fn contribute_kernel_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        if !ctx.register("read_write()") {
            return Ok(());
        }
        if self.support_no_streaming_mask {
            generate_no_stream_mask(ctx)?;
            generate_node_offset(ctx)?;
        }
        generate_f_next(ctx)?;
        generate_f_reg(ctx)?;
        generate_offset(ctx)?;
        generate_e(ctx)?;

        let d = ctx.d();
        let coords = index_coords(d);
        let f_reg = || Expr::ident("f_reg").index("i");

        let mut stream = Vec::new();
        let mut neighbour = Vec::with_capacity(d);
        for (axis, name) in AXES.iter().enumerate().take(d) {
            let var = Expr::ident(format!("{name}_"));
            let extent = Expr::ident("dimension").index(axis);
            stream.push(Stmt::var(
                format!("{name}_"),
                Type::Index,
                Expr::ident("index").index(axis) + Expr::ident("e").index("i").index(axis),
            ));
            stream.push(Stmt::if_else(
                var.clone().lt(0),
                vec![Stmt::assign_op(var.clone(), AssignOp::Add, extent.clone())],
                vec![Stmt::if_(
                    var.clone().ge(extent.clone()),
                    vec![Stmt::assign_op(var.clone(), AssignOp::Sub, extent)],
                )],
            ));
            neighbour.push(var);
        }
        let push = Stmt::assign(Expr::ident("f_next").index(offset_at("i", &neighbour)), f_reg());

        let mut stmts = Vec::new();
        let body = if self.support_no_streaming_mask {
            stmts.push(Stmt::let_(
                "no_stream",
                Type::Byte,
                Expr::ident("no_stream_mask").index(node_offset_at(&coords)),
            ));
            let mut body = vec![Stmt::if_(
                Expr::ident("no_stream").ne(0),
                vec![Stmt::assign(
                    Expr::ident("f_next").index(offset_at("i", &coords)),
                    f_reg(),
                )],
            )];
            body.extend(stream);
            let target_free = Expr::ident("no_stream_mask")
                .index(node_offset_at(&neighbour))
                .eq(0);
            body.push(Stmt::if_(target_free, vec![push]));
            body
        } else {
            stream.push(push);
            stream
        };
        stmts.push(Stmt::for_range("i", "q", body));
        ctx.append_write(stmts);
        Ok(())
    }

    fn contribute_launcher_fragments(&self, ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
        if self.support_no_streaming_mask {
            hook_no_stream_mask(ctx)?;
        }
        hook_f_next(ctx)
    }
}
