use lbmgen_codegen::native::{Item, PyStmt, Stmt};

/// Named text buffers produced by `generate()`, one per template placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferName {
    Name,
    Hooks,
    KernelParameters,
    KernelArguments,
    LauncherParameters,
    LauncherNames,
    LauncherArguments,
    LauncherChecks,
    Index,
    Node,
    Write,
    PythonPre,
    PythonPost,
}

impl BufferName {
    pub const ALL: [BufferName; 13] = [
        BufferName::Name,
        BufferName::Hooks,
        BufferName::KernelParameters,
        BufferName::KernelArguments,
        BufferName::LauncherParameters,
        BufferName::LauncherNames,
        BufferName::LauncherArguments,
        BufferName::LauncherChecks,
        BufferName::Index,
        BufferName::Node,
        BufferName::Write,
        BufferName::PythonPre,
        BufferName::PythonPost,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BufferName::Name => "name",
            BufferName::Hooks => "hooks",
            BufferName::KernelParameters => "kernel_parameters",
            BufferName::KernelArguments => "kernel_arguments",
            BufferName::LauncherParameters => "launcher_parameters",
            BufferName::LauncherNames => "launcher_names",
            BufferName::LauncherArguments => "launcher_arguments",
            BufferName::LauncherChecks => "launcher_checks",
            BufferName::Index => "index",
            BufferName::Node => "node",
            BufferName::Write => "write",
            BufferName::PythonPre => "python_pre",
            BufferName::PythonPost => "python_post",
        }
    }
}

/// Structured fragments appended by components during one generation run.
///
/// Kernel statements are split by phase: `index` runs first (coordinates,
/// loads, pre-collision moments), then `node` (equilibrium, collision,
/// boundaries), then `write` (streaming). Append order within a buffer is
/// render order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeBuffers {
    pub hooks: Vec<Item>,
    pub index: Vec<Stmt>,
    pub node: Vec<Stmt>,
    pub write: Vec<Stmt>,
    pub python_pre: Vec<PyStmt>,
    pub python_post: Vec<PyStmt>,
}

impl CodeBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel body in execution order.
    pub fn kernel_body(&self) -> Vec<Stmt> {
        let mut body = Vec::with_capacity(self.index.len() + self.node.len() + self.write.len());
        for phase in [&self.index, &self.node, &self.write] {
            body.extend(phase.iter().cloned());
        }
        body
    }
}
