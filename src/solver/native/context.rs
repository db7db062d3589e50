use indexmap::IndexSet;
use lbmgen_codegen::native::{Expr, Item, PyStmt, Stmt, Type};
use lbmgen_ir::StencilDescriptor;
use log::debug;

use super::buffers::CodeBuffers;
use super::equilibrium::NativeEquilibrium;
use super::error::{GenerationError, SlotScope};
use super::slots::SlotTable;

/// State of one generation run, handed to every component by `&mut`.
///
/// Components only see this narrow interface: check-and-register a fragment
/// key, declare parameters, append statements. Everything is dropped or
/// returned by [`GenContext::finish`] when the run ends, so nothing carries
/// over between `generate()` calls.
pub struct GenContext<'a> {
    stencil: &'a StencilDescriptor,
    equilibrium: &'a dyn NativeEquilibrium,
    double_buffered: bool,
    collision_masked: bool,
    registered: IndexSet<String>,
    slots: SlotTable,
    buffers: CodeBuffers,
}

impl<'a> GenContext<'a> {
    pub fn new(
        stencil: &'a StencilDescriptor,
        equilibrium: &'a dyn NativeEquilibrium,
        double_buffered: bool,
        collision_masked: bool,
    ) -> Self {
        Self {
            stencil,
            equilibrium,
            double_buffered,
            collision_masked,
            registered: IndexSet::new(),
            slots: SlotTable::new(),
            buffers: CodeBuffers::new(),
        }
    }

    pub fn stencil(&self) -> &'a StencilDescriptor {
        self.stencil
    }

    pub fn d(&self) -> usize {
        self.stencil.d()
    }

    pub fn q(&self) -> usize {
        self.stencil.q()
    }

    /// Whether streaming reads `f` and writes a separate `f_next`.
    pub fn is_double_buffered(&self) -> bool {
        self.double_buffered
    }

    /// Whether boundary cells are tagged by `node_type` and excluded from
    /// collision.
    pub fn is_collision_masked(&self) -> bool {
        self.collision_masked
    }

    pub fn registered(&self, key: &str) -> bool {
        self.registered.contains(key)
    }

    /// Registers `key` and returns `true` if this is the first request.
    /// Callers emit their fragment only when this returns `true`.
    pub fn register(&mut self, key: &str) -> bool {
        if self.registered.contains(key) {
            return false;
        }
        debug!("emitting fragment '{}'", key);
        self.registered.insert(key.to_string());
        true
    }

    pub fn register_kernel_slot(
        &mut self,
        name: &str,
        ty: Type,
        source: impl Into<String>,
    ) -> Result<(), GenerationError> {
        self.slots
            .register(SlotScope::Kernel, name, ty, source)
            .map(|_| ())
    }

    pub fn register_launcher_slot(
        &mut self,
        name: &str,
        ty: Type,
        source: impl Into<String>,
    ) -> Result<(), GenerationError> {
        self.slots
            .register(SlotScope::Launcher, name, ty, source)
            .map(|_| ())
    }

    pub fn kernel_hooked(&self, name: &str) -> bool {
        self.slots.contains(SlotScope::Kernel, name)
    }

    pub fn launcher_hooked(&self, name: &str) -> bool {
        self.slots.contains(SlotScope::Launcher, name)
    }

    pub fn append_hook(&mut self, item: Item) {
        self.buffers.hooks.push(item);
    }

    pub fn append_index(&mut self, stmts: impl IntoIterator<Item = Stmt>) {
        self.buffers.index.extend(stmts);
    }

    pub fn append_node(&mut self, stmts: impl IntoIterator<Item = Stmt>) {
        self.buffers.node.extend(stmts);
    }

    /// Node-phase statements emitted so far, in order.
    pub fn node_stmts(&self) -> &[Stmt] {
        &self.buffers.node
    }

    pub fn append_write(&mut self, stmts: impl IntoIterator<Item = Stmt>) {
        self.buffers.write.extend(stmts);
    }

    pub fn append_python_pre(&mut self, stmt: PyStmt) {
        self.buffers.python_pre.push(stmt);
    }

    pub fn append_python_post(&mut self, stmt: PyStmt) {
        self.buffers.python_post.push(stmt);
    }

    /// Asks the configured equilibrium for `f_eq[q]` in the node phase.
    pub fn request_f_eq(&mut self) -> Result<(), GenerationError> {
        let equilibrium = self.equilibrium;
        equilibrium.generate_f_eq(self)
    }

    /// Statements filling `target[q]` with the configured equilibrium at
    /// density `rho` and velocity array `u`.
    pub fn equilibrium_stmts(
        &mut self,
        rho: Expr,
        u: &str,
        target: &str,
    ) -> Result<Vec<Stmt>, GenerationError> {
        let equilibrium = self.equilibrium;
        equilibrium.equilibrium_stmts(self, rho, u, target)
    }

    pub fn finish(self) -> (SlotTable, CodeBuffers) {
        (self.slots, self.buffers)
    }
}
