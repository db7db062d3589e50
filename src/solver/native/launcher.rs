use std::collections::HashMap;

use indexmap::IndexMap;
use lbmgen_codegen::native::{
    Arg, KernelParam, Memory, ParamKind, Program, PyStmt, ScalarKind, ThreadIndex, Value, Write,
};
use log::debug;
use rayon::prelude::*;

use super::error::LaunchError;
use super::generator::NativeModule;
use super::primitives::AXES;
use super::slots::SlotTable;

/// Host-side storage for one pointer parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum HostBuffer {
    Scalar(Vec<f64>),
    Byte(Vec<u8>),
}

impl HostBuffer {
    pub fn len(&self) -> usize {
        match self {
            HostBuffer::Scalar(data) => data.len(),
            HostBuffer::Byte(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_scalars(&self) -> Option<&[f64]> {
        match self {
            HostBuffer::Scalar(data) => Some(data),
            HostBuffer::Byte(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HostBuffer::Byte(data) => Some(data),
            HostBuffer::Scalar(_) => None,
        }
    }

    fn kind(&self) -> ScalarKind {
        match self {
            HostBuffer::Scalar(_) => ScalarKind::Float,
            HostBuffer::Byte(_) => ScalarKind::Int,
        }
    }

    fn load(&self, index: usize) -> Option<Value> {
        match self {
            HostBuffer::Scalar(data) => data.get(index).map(|&v| Value::Float(v)),
            HostBuffer::Byte(data) => data.get(index).map(|&v| Value::Int(i64::from(v))),
        }
    }

    fn store(&mut self, index: usize, value: Value) {
        match self {
            HostBuffer::Scalar(data) => {
                if let Some(slot) = data.get_mut(index) {
                    *slot = value.as_f64();
                }
            }
            HostBuffer::Byte(data) => {
                if let Some(slot) = data.get_mut(index) {
                    *slot = value.as_i64() as u8;
                }
            }
        }
    }
}

/// Thread block shape for a `d`-dimensional grid; the same split the `.cu`
/// launcher uses.
pub fn block_dim(d: usize) -> [u32; 3] {
    match d {
        1 => [256, 1, 1],
        2 => [16, 16, 1],
        _ => [8, 8, 4],
    }
}

struct Snapshot<'a> {
    buffers: &'a [HostBuffer],
}

impl Memory for Snapshot<'_> {
    fn len(&self, buffer: usize) -> usize {
        self.buffers.get(buffer).map_or(0, HostBuffer::len)
    }

    fn load(&self, buffer: usize, index: usize) -> Option<Value> {
        self.buffers.get(buffer)?.load(index)
    }
}

fn points(extent: [u32; 3]) -> impl Iterator<Item = [u32; 3]> {
    (0..extent[0]).flat_map(move |x| {
        (0..extent[1]).flat_map(move |y| (0..extent[2]).map(move |z| [x, y, z]))
    })
}

/// Runs a generated kernel on the host.
///
/// Kernel pointers are bound by slot name. Launcher tensors share those
/// names, so the wrapper statements of the module (`hasattr` checks and the
/// `f`/`f_next` swap) resolve against the same bindings.
pub struct HostLauncher {
    program: Program,
    kernel_name: String,
    shape: Vec<usize>,
    slots: SlotTable,
    python_pre: Vec<PyStmt>,
    python_post: Vec<PyStmt>,
    bindings: IndexMap<String, usize>,
    buffers: Vec<HostBuffer>,
    values: IndexMap<String, f64>,
}

impl HostLauncher {
    /// Compiles `module` for a grid of `shape` cells. The `dimension_*`
    /// parameters are bound from `shape`.
    pub fn new(module: &NativeModule, shape: &[usize]) -> Result<Self, LaunchError> {
        if shape.len() != module.d {
            return Err(LaunchError::ShapeMismatch {
                expected: module.d,
                found: shape.len(),
            });
        }
        let kernel_name = module.kernel_name();
        let program = Program::compile(&module.cuda_module(), &kernel_name)?;
        let mut launcher = Self {
            program,
            kernel_name,
            shape: shape.to_vec(),
            slots: module.slots.clone(),
            python_pre: module.buffers.python_pre.clone(),
            python_post: module.buffers.python_post.clone(),
            bindings: IndexMap::new(),
            buffers: Vec::new(),
            values: IndexMap::new(),
        };
        for (axis, &extent) in shape.iter().enumerate() {
            let name = format!("dimension_{}", AXES[axis]);
            if launcher.param(&name).is_ok() {
                launcher.values.insert(name, extent as f64);
            }
        }
        Ok(launcher)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of cells in the grid.
    pub fn cells(&self) -> usize {
        self.shape.iter().product()
    }

    fn param(&self, name: &str) -> Result<&KernelParam, LaunchError> {
        self.program
            .kernel_params()
            .iter()
            .find(|param| param.name == name)
            .ok_or_else(|| LaunchError::UnknownParameter(name.to_string()))
    }

    pub fn bind_buffer(&mut self, name: &str, buffer: HostBuffer) -> Result<(), LaunchError> {
        match self.param(name)?.kind {
            ParamKind::Pointer { elem, .. } if elem == buffer.kind() => {}
            _ => return Err(LaunchError::BufferKind(name.to_string())),
        }
        match self.bindings.get(name) {
            Some(&slot) => self.buffers[slot] = buffer,
            None => {
                self.bindings.insert(name.to_string(), self.buffers.len());
                self.buffers.push(buffer);
            }
        }
        Ok(())
    }

    pub fn bind_value(&mut self, name: &str, value: f64) -> Result<(), LaunchError> {
        match self.param(name)?.kind {
            ParamKind::Scalar(_) => {
                self.values.insert(name.to_string(), value);
                Ok(())
            }
            ParamKind::Pointer { .. } => Err(LaunchError::BufferKind(name.to_string())),
        }
    }

    pub fn buffer(&self, name: &str) -> Option<&HostBuffer> {
        self.bindings
            .get(name)
            .and_then(|&slot| self.buffers.get(slot))
    }

    pub fn scalars(&self, name: &str) -> Option<&[f64]> {
        self.buffer(name).and_then(HostBuffer::as_scalars)
    }

    /// One step: wrapper checks, every cell of the grid, then the wrapper's
    /// post-launch statements.
    pub fn launch(&mut self) -> Result<(), LaunchError> {
        for stmt in self.python_pre.clone() {
            self.execute(&stmt)?;
        }

        let args = self.arguments()?;
        let threads = self.threads();
        debug!(
            "launching {} over {:?} ({} threads)",
            self.kernel_name,
            self.shape,
            threads.len()
        );
        let memory = Snapshot {
            buffers: &self.buffers,
        };
        let program = &self.program;
        let writes = threads
            .into_par_iter()
            .map(|thread| program.run_thread(&args, &memory, thread))
            .collect::<Result<Vec<_>, _>>()?;

        let merged = self.merge(writes)?;
        for ((buffer, index), value) in merged {
            self.buffers[buffer].store(index, value);
        }

        for stmt in self.python_post.clone() {
            self.execute(&stmt)?;
        }
        Ok(())
    }

    fn arguments(&self) -> Result<Vec<Arg>, LaunchError> {
        self.program
            .kernel_params()
            .iter()
            .map(|param| {
                let arg = match param.kind {
                    ParamKind::Pointer { .. } => {
                        self.bindings.get(&param.name).map(|&slot| Arg::Buffer(slot))
                    }
                    ParamKind::Scalar(kind) => self.values.get(&param.name).map(|&v| {
                        Arg::Value(match kind {
                            ScalarKind::Float => Value::Float(v),
                            ScalarKind::Int => Value::Int(v as i64),
                            ScalarKind::Bool => Value::Bool(v != 0.0),
                        })
                    }),
                };
                arg.ok_or_else(|| LaunchError::Unbound(param.name.clone()))
            })
            .collect()
    }

    fn threads(&self) -> Vec<ThreadIndex> {
        let block_dim = block_dim(self.shape.len());
        let mut grid = [1u32; 3];
        for (axis, &extent) in self.shape.iter().enumerate() {
            grid[axis] = (extent as u32).div_ceil(block_dim[axis]);
        }
        points(grid)
            .flat_map(|block_idx| {
                points(block_dim).map(move |thread_idx| ThreadIndex {
                    block_idx,
                    thread_idx,
                    block_dim,
                })
            })
            .collect()
    }

    /// Later writes of one thread replace its earlier ones; a second thread
    /// touching the same element is a conflict.
    fn merge(
        &self,
        writes: Vec<Vec<Write>>,
    ) -> Result<HashMap<(usize, usize), Value>, LaunchError> {
        let mut merged = HashMap::new();
        for thread_writes in writes {
            let mut own = HashMap::new();
            for write in thread_writes {
                own.insert((write.buffer, write.index), write.value);
            }
            for (key, value) in own {
                if merged.insert(key, value).is_some() {
                    return Err(LaunchError::WriteConflict {
                        buffer: self.buffer_name(key.0),
                        index: key.1,
                    });
                }
            }
        }
        Ok(merged)
    }

    fn buffer_name(&self, slot: usize) -> String {
        self.bindings
            .iter()
            .find(|(_, &bound)| bound == slot)
            .map(|(name, _)| name.clone())
            .unwrap_or_default()
    }

    fn resolve(&self, expression: &str) -> Result<String, LaunchError> {
        self.slots
            .launcher_by_source(expression)
            .map(str::to_string)
            .ok_or_else(|| LaunchError::UnresolvedHostExpression(expression.to_string()))
    }

    fn bound(&self, name: &str) -> Result<usize, LaunchError> {
        self.bindings
            .get(name)
            .copied()
            .ok_or_else(|| LaunchError::Unbound(name.to_string()))
    }

    fn execute(&mut self, stmt: &PyStmt) -> Result<(), LaunchError> {
        match stmt {
            PyStmt::Comment(_) => Ok(()),
            PyStmt::AssertHasAttr { object, attribute } => {
                let name = self.resolve(&format!("{object}.{attribute}"))?;
                self.bound(&name).map(|_| ())
            }
            PyStmt::Swap { left, right } => {
                let left = self.resolve(left)?;
                let right = self.resolve(right)?;
                let left_slot = self.bound(&left)?;
                let right_slot = self.bound(&right)?;
                self.bindings.insert(left, right_slot);
                self.bindings.insert(right, left_slot);
                Ok(())
            }
        }
    }
}
