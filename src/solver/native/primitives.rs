//! Stencil and lattice primitives shared by every component.
//!
//! Each `generate_*` function is idempotent: the first call registers its
//! fragment key, requests its own dependencies and emits; later calls return
//! immediately.

use lbmgen_codegen::native::{
    AssignOp, Block, Constant, ConstantArray, Expr, Extent, FnQualifier, Function, Item, Param,
    PyStmt, Stmt, Storage, Type,
};

use super::context::GenContext;
use super::error::GenerationError;

pub const AXES: [&str; 3] = ["x", "y", "z"];

/// Name of spatial axis `axis` (`x`, `y`, `z`) for the active stencil.
pub fn axis_name(ctx: &GenContext<'_>, axis: usize) -> Result<&'static str, GenerationError> {
    if axis >= ctx.d() {
        return Err(GenerationError::unavailable(
            format!("axis {axis}"),
            format!("stencil {} has {} dimensions", ctx.stencil().name(), ctx.d()),
        ));
    }
    Ok(AXES[axis])
}

/// `index[0], index[1], ...` for the active stencil.
pub fn index_coords(d: usize) -> Vec<Expr> {
    (0..d).map(|a| Expr::ident("index").index(a)).collect()
}

fn dimension_at(axis: usize) -> Expr {
    Expr::ident("dimension").index(axis)
}

/// Call of the `node_offset` device function at `coords`.
pub fn node_offset_at(coords: &[Expr]) -> Expr {
    let mut args = coords.to_vec();
    args.extend((1..coords.len()).map(dimension_at));
    Expr::call("node_offset", args)
}

/// Call of the `offset` device function for direction `q_` at `coords`.
pub fn offset_at(q_: impl Into<Expr>, coords: &[Expr]) -> Expr {
    let mut args = vec![q_.into()];
    args.extend(coords.iter().cloned());
    args.extend((0..coords.len()).map(dimension_at));
    Expr::call("offset", args)
}

pub fn generate_q(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if ctx.register("q") {
        let q = ctx.q();
        ctx.append_hook(Item::Constant(Constant::new(
            "q",
            Type::Index,
            Storage::Constexpr,
            q,
        )));
    }
    Ok(())
}

pub fn generate_d(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if ctx.register("d") {
        let d = ctx.d();
        ctx.append_hook(Item::Constant(Constant::new(
            "d",
            Type::Index,
            Storage::Constexpr,
            d,
        )));
    }
    Ok(())
}

pub fn generate_e(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("e") {
        return Ok(());
    }
    generate_q(ctx)?;
    generate_d(ctx)?;

    let stencil = ctx.stencil();
    let values = stencil
        .e()
        .iter()
        .flat_map(|v| v.iter().map(|&c| Expr::from(c)))
        .collect();
    ctx.append_hook(Item::ConstantArray(ConstantArray::new(
        "e",
        Type::Index,
        Storage::DeviceConstant,
        vec![Extent::new("q", stencil.q()), Extent::new("d", stencil.d())],
        values,
    )));
    Ok(())
}

pub fn generate_w(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("w") {
        return Ok(());
    }
    generate_q(ctx)?;

    let stencil = ctx.stencil();
    let values = stencil.w().iter().map(|&w| Expr::from(w)).collect();
    ctx.append_hook(Item::ConstantArray(ConstantArray::new(
        "w",
        Type::Double,
        Storage::DeviceConstant,
        vec![Extent::new("q", stencil.q())],
        values,
    )));
    Ok(())
}

pub fn generate_opposite(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("opposite") {
        return Ok(());
    }
    generate_q(ctx)?;

    let stencil = ctx.stencil();
    let values = stencil.opposite().iter().map(|&i| Expr::from(i)).collect();
    ctx.append_hook(Item::ConstantArray(ConstantArray::new(
        "opposite",
        Type::Index,
        Storage::DeviceConstant,
        vec![Extent::new("q", stencil.q())],
        values,
    )));
    Ok(())
}

/// `cs` and `cs_sq`.
pub fn generate_cs(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if ctx.register("cs") {
        let cs = ctx.stencil().cs();
        ctx.append_hook(Item::Constant(Constant::new(
            "cs",
            Type::Double,
            Storage::Constexpr,
            cs,
        )));
        ctx.append_hook(Item::Constant(Constant::new(
            "cs_sq",
            Type::Double,
            Storage::Constexpr,
            Expr::ident("cs") * Expr::ident("cs"),
        )));
    }
    Ok(())
}

/// The distribution buffer. It is read-only in the kernel when streaming
/// writes into `f_next`.
pub fn generate_f(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("f") {
        return Ok(());
    }
    let ty = if ctx.is_double_buffered() {
        Type::const_ptr(Type::Scalar)
    } else {
        Type::ptr(Type::Scalar)
    };
    if !ctx.launcher_hooked("f") {
        ctx.register_launcher_slot("f", Type::Tensor, "simulation.f")?;
    }
    if !ctx.kernel_hooked("f") {
        ctx.register_kernel_slot("f", ty, "f.data_ptr<scalar_t>()")?;
    }
    Ok(())
}

/// Grid extents as scalar kernel parameters plus a local `dimension[d]`.
pub fn generate_dimension(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("dimension") {
        return Ok(());
    }
    generate_d(ctx)?;
    generate_f(ctx)?;

    let d = ctx.d();
    let mut stmts = vec![Stmt::array("dimension", Type::Index, "d")];
    for axis in 0..d {
        let name = format!("dimension_{}", axis_name(ctx, axis)?);
        ctx.register_kernel_slot(
            &name,
            Type::const_(Type::Index),
            format!("static_cast<index_t>(f.size({}))", axis + 1),
        )?;
        stmts.push(Stmt::assign(dimension_at(axis), Expr::ident(name)));
    }
    ctx.append_index(stmts);
    Ok(())
}

/// Per-thread lattice coordinate; threads outside the grid return.
pub fn generate_index(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("index") {
        return Ok(());
    }
    generate_dimension(ctx)?;

    let d = ctx.d();
    let mut stmts = vec![Stmt::Blank, Stmt::array("index", Type::Index, "d")];
    for (axis, name) in AXES.iter().enumerate().take(d) {
        let value = Expr::ident("blockIdx").field(*name) * Expr::ident("blockDim").field(*name)
            + Expr::ident("threadIdx").field(*name);
        stmts.push(Stmt::assign(Expr::ident("index").index(axis), value));
    }
    let outside = (0..d).map(|axis| Expr::ident("index").index(axis).ge(dimension_at(axis)));
    if let Some(cond) = Expr::any(outside) {
        stmts.push(Stmt::if_(cond, vec![Stmt::Return(None)]));
    }
    ctx.append_index(stmts);
    Ok(())
}

/// `node_offset(x_, y_, z_, ny, nz)`: row-major offset of a node in a
/// `[N_x, N_y, N_z]` field.
pub fn generate_node_offset(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("node_offset()") {
        return Ok(());
    }
    let d = ctx.d();
    let mut params: Vec<Param> = AXES
        .iter()
        .take(d)
        .map(|axis| Param::new(format!("{axis}_"), Type::Index))
        .collect();
    params.extend(
        AXES.iter()
            .take(d)
            .skip(1)
            .map(|axis| Param::new(format!("n{axis}"), Type::Index)),
    );

    let mut value = Expr::ident("x_");
    for axis in AXES.iter().take(d).skip(1) {
        value = value * Expr::ident(format!("n{axis}")) + Expr::ident(format!("{axis}_"));
    }

    ctx.append_hook(Item::Function(Function::new(
        "node_offset",
        vec![FnQualifier::Device, FnQualifier::ForceInline],
        Type::Index,
        params,
        Block::new(vec![Stmt::Return(Some(value))]),
    )));
    Ok(())
}

/// `offset(q_, x_, y_, z_, nx, ny, nz)`: offset of direction `q_` at a node
/// in a `[Q, N_x, N_y, N_z]` field, i.e. `q_ * nx * ny * nz + node_offset(..)`.
pub fn generate_offset(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("offset()") {
        return Ok(());
    }
    generate_node_offset(ctx)?;

    let d = ctx.d();
    let coords: Vec<Expr> = AXES
        .iter()
        .take(d)
        .map(|axis| Expr::ident(format!("{axis}_")))
        .collect();
    let extents: Vec<Expr> = AXES
        .iter()
        .take(d)
        .map(|axis| Expr::ident(format!("n{axis}")))
        .collect();

    let mut params = vec![Param::new("q_", Type::Index)];
    params.extend(
        AXES.iter()
            .take(d)
            .map(|axis| Param::new(format!("{axis}_"), Type::Index)),
    );
    params.extend(
        AXES.iter()
            .take(d)
            .map(|axis| Param::new(format!("n{axis}"), Type::Index)),
    );

    let mut node_args = coords;
    node_args.extend(extents.iter().skip(1).cloned());
    let nodes = extents
        .iter()
        .cloned()
        .reduce(|acc, n| acc * n)
        .unwrap_or_else(|| Expr::lit_int(1));
    let value = Expr::ident("q_") * nodes + Expr::call("node_offset", node_args);

    ctx.append_hook(Item::Function(Function::new(
        "offset",
        vec![FnQualifier::Device, FnQualifier::ForceInline],
        Type::Index,
        params,
        Block::new(vec![Stmt::Return(Some(value))]),
    )));
    Ok(())
}

/// Loads the cell's populations into registers.
pub fn generate_f_reg(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("f_reg") {
        return Ok(());
    }
    generate_f(ctx)?;
    generate_q(ctx)?;
    generate_index(ctx)?;
    generate_offset(ctx)?;

    let mut stmts = vec![Stmt::Blank];
    stmts.extend(load_f_reg(ctx.d()));
    ctx.append_index(stmts);
    Ok(())
}

pub fn generate_rho(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("rho") {
        return Ok(());
    }
    generate_f_reg(ctx)?;

    let mut stmts = vec![Stmt::Blank];
    stmts.extend(density("rho"));
    ctx.append_index(stmts);
    Ok(())
}

/// Velocity `u[d] = sum_i e[i] f_reg[i] / rho`.
pub fn generate_u(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("u") {
        return Ok(());
    }
    generate_rho(ctx)?;
    generate_e(ctx)?;

    let mut stmts = vec![Stmt::Blank, Stmt::array("u", Type::Scalar, "d")];
    stmts.push(velocity("u", "rho"));
    ctx.append_index(stmts);
    Ok(())
}

fn load_f_reg(d: usize) -> Vec<Stmt> {
    let coords = index_coords(d);
    vec![
        Stmt::array("f_reg", Type::Scalar, "q"),
        Stmt::for_range(
            "i",
            "q",
            vec![Stmt::assign(
                Expr::ident("f_reg").index("i"),
                Expr::ident("f").index(offset_at("i", &coords)),
            )],
        ),
    ]
}

/// Declares `name` as the sum of `f_reg`.
pub fn density(name: &str) -> Vec<Stmt> {
    vec![
        Stmt::var(name, Type::Scalar, 0.0),
        Stmt::for_range(
            "i",
            "q",
            vec![Stmt::assign_op(
                name,
                AssignOp::Add,
                Expr::ident("f_reg").index("i"),
            )],
        ),
    ]
}

/// Fills the already declared array `name[d]` with the velocity of `f_reg`.
pub fn velocity(name: &str, rho: &str) -> Stmt {
    let u_j = || Expr::ident(name).index("j");
    let momentum = Expr::ident("e").index("i").index("j") * Expr::ident("f_reg").index("i");
    Stmt::for_range(
        "j",
        "d",
        vec![
            Stmt::assign(u_j(), 0.0),
            Stmt::for_range("i", "q", vec![Stmt::assign_op(u_j(), AssignOp::Add, momentum)]),
            Stmt::assign_op(u_j(), AssignOp::Div, rho),
        ],
    )
}

fn load_node_type(d: usize) -> Stmt {
    Stmt::let_(
        "node_type",
        Type::Byte,
        Expr::ident("no_collision_mask").index(node_offset_at(&index_coords(d))),
    )
}

/// Re-derives the per-cell locals (`f_reg`, `rho`, `u` and `node_type` when
/// present) for whatever `index` names in the enclosing scope. Node
/// statements replayed after this run as if on that cell.
pub fn cell_prologue(ctx: &mut GenContext<'_>) -> Result<Vec<Stmt>, GenerationError> {
    generate_u(ctx)?;
    let d = ctx.d();
    let mut stmts = load_f_reg(d);
    stmts.extend(density("rho"));
    stmts.push(Stmt::array("u", Type::Scalar, "d"));
    stmts.push(velocity("u", "rho"));
    if ctx.registered("node_type") {
        stmts.push(load_node_type(d));
    }
    Ok(stmts)
}

pub fn generate_no_collision_mask(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("no_collision_mask") {
        return Ok(());
    }
    if !ctx.launcher_hooked("no_collision_mask") {
        ctx.append_python_pre(PyStmt::assert_has_attr("simulation", "no_collision_mask"));
        ctx.register_launcher_slot(
            "no_collision_mask",
            Type::const_(Type::Tensor),
            "simulation.no_collision_mask",
        )?;
    }
    if !ctx.kernel_hooked("no_collision_mask") {
        ctx.register_kernel_slot(
            "no_collision_mask",
            Type::const_ptr(Type::Byte),
            "no_collision_mask.data_ptr<byte_t>()",
        )?;
    }
    Ok(())
}

/// Boundary tag of the cell: `0` for fluid, otherwise the index of the
/// masked boundary that owns it.
pub fn generate_node_type(ctx: &mut GenContext<'_>) -> Result<(), GenerationError> {
    if !ctx.register("node_type") {
        return Ok(());
    }
    generate_index(ctx)?;
    generate_node_offset(ctx)?;
    generate_no_collision_mask(ctx)?;

    let d = ctx.d();
    ctx.append_index([Stmt::Blank, load_node_type(d)]);
    Ok(())
}
