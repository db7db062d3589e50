//! Host-side execution of kernel modules built with [`cuda_ast`](super::cuda_ast).
//!
//! [`Program::compile`] resolves every identifier of a module against its
//! scopes once and lowers it into an owned tree that no longer touches the
//! expression arena, so a compiled program can be shared across threads.
//! Arithmetic follows C: integer operands stay integral (division
//! truncates), mixed operands promote to `double`, and assignments convert
//! to the declared type.
//!
//! Pointer stores never touch memory directly. [`Program::run_thread`]
//! returns the writes of one thread and the caller decides how to apply them.

use std::collections::HashMap;
use std::fmt;

use super::cuda_ast::{
    AssignOp, BinaryOp, Block, ConstantArray, Expr, ExprNode, FnQualifier, Function, Item, Literal,
    Module, Stmt, Type, UnaryOp,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
            Value::Bool(v) => f64::from(u8::from(v)),
        }
    }

    /// Integral value; floats truncate toward zero like a C conversion.
    pub fn as_i64(self) -> i64 {
        match self {
            Value::Int(v) => v,
            Value::Float(v) => v as i64,
            Value::Bool(v) => i64::from(v),
        }
    }

    pub fn truthy(self) -> bool {
        match self {
            Value::Int(v) => v != 0,
            Value::Float(v) => v != 0.0,
            Value::Bool(v) => v,
        }
    }

    fn coerce(self, kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Int => Value::Int(self.as_i64()),
            ScalarKind::Float => Value::Float(self.as_f64()),
            ScalarKind::Bool => Value::Bool(self.truthy()),
        }
    }

    fn is_integral(self) -> bool {
        matches!(self, Value::Int(_) | Value::Bool(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Float,
    Bool,
}

impl ScalarKind {
    pub fn of(ty: &Type) -> Result<Self, EvalError> {
        match ty.unqualified() {
            Type::Scalar | Type::Double => Ok(ScalarKind::Float),
            Type::Index | Type::Int | Type::Byte => Ok(ScalarKind::Int),
            Type::Bool => Ok(ScalarKind::Bool),
            other => Err(EvalError::UnsupportedType(other.to_string())),
        }
    }

    fn zero(self) -> Value {
        match self {
            ScalarKind::Int => Value::Int(0),
            ScalarKind::Float => Value::Float(0.0),
            ScalarKind::Bool => Value::Bool(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Pointer { elem: ScalarKind, writable: bool },
    Scalar(ScalarKind),
}

impl ParamKind {
    pub fn of(ty: &Type) -> Result<Self, EvalError> {
        match ty.unqualified() {
            Type::Ptr(inner) => Ok(ParamKind::Pointer {
                elem: ScalarKind::of(inner)?,
                writable: !matches!(inner.as_ref(), Type::Const(_)),
            }),
            other => Ok(ParamKind::Scalar(ScalarKind::of(other)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParam {
    pub name: String,
    pub kind: ParamKind,
}

/// Launch argument for one kernel parameter, by position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    /// Index of a buffer in the [`Memory`] the thread runs against.
    Buffer(usize),
    Value(Value),
}

/// Read-only view of the buffers bound to pointer parameters.
pub trait Memory: Sync {
    fn len(&self, buffer: usize) -> usize;
    fn load(&self, buffer: usize, index: usize) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Write {
    pub buffer: usize,
    pub index: usize,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadIndex {
    pub block_idx: [u32; 3],
    pub thread_idx: [u32; 3],
    pub block_dim: [u32; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    MissingKernel(String),
    UnknownIdentifier(String),
    UnknownFunction(String),
    UnsupportedType(String),
    UnsupportedExpression(String),
    NotAssignable(String),
    MalformedTable {
        name: String,
        expected: usize,
        found: usize,
    },
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },
    ArgumentMismatch(String),
    IndexOutOfBounds {
        target: String,
        index: i64,
        len: usize,
    },
    DivisionByZero,
    MissingReturn(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::MissingKernel(name) => write!(f, "module has no __global__ function '{name}'"),
            EvalError::UnknownIdentifier(name) => write!(f, "unknown identifier '{name}'"),
            EvalError::UnknownFunction(name) => write!(f, "unknown function '{name}'"),
            EvalError::UnsupportedType(ty) => write!(f, "unsupported type '{ty}'"),
            EvalError::UnsupportedExpression(what) => write!(f, "unsupported expression: {what}"),
            EvalError::NotAssignable(name) => write!(f, "'{name}' is not assignable"),
            EvalError::MalformedTable {
                name,
                expected,
                found,
            } => write!(
                f,
                "table '{name}' declares {expected} elements but is initialised with {found}"
            ),
            EvalError::ArityMismatch {
                function,
                expected,
                found,
            } => write!(
                f,
                "function '{function}' takes {expected} arguments, {found} given"
            ),
            EvalError::ArgumentMismatch(name) => {
                write!(f, "launch argument for '{name}' is missing or has the wrong kind")
            }
            EvalError::IndexOutOfBounds { target, index, len } => {
                write!(f, "index {index} out of bounds for '{target}' of length {len}")
            }
            EvalError::DivisionByZero => write!(f, "integer division by zero"),
            EvalError::MissingReturn(name) => {
                write!(f, "function '{name}' returned without a value")
            }
        }
    }
}

impl std::error::Error for EvalError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinVar {
    BlockIdx,
    ThreadIdx,
    BlockDim,
}

#[derive(Debug, Clone)]
enum CExpr {
    Const(Value),
    Local(usize),
    ArrayLoad {
        slot: usize,
        name: String,
        index: Box<CExpr>,
    },
    TableLoad {
        table: usize,
        indices: Vec<CExpr>,
    },
    Param {
        position: usize,
        kind: ScalarKind,
        name: String,
    },
    Load {
        position: usize,
        name: String,
        index: Box<CExpr>,
    },
    Builtin(BuiltinVar, usize),
    Unary(UnaryOp, Box<CExpr>),
    Binary(Box<CExpr>, BinaryOp, Box<CExpr>),
    Call {
        function: usize,
        name: String,
        args: Vec<CExpr>,
    },
}

#[derive(Debug, Clone)]
enum CStmt {
    Store {
        slot: usize,
        kind: ScalarKind,
        value: CExpr,
    },
    DeclareArray {
        slot: usize,
        kind: ScalarKind,
        name: String,
        len: CExpr,
    },
    StoreArray {
        slot: usize,
        kind: ScalarKind,
        name: String,
        index: CExpr,
        value: CExpr,
    },
    StorePointer {
        position: usize,
        kind: ScalarKind,
        name: String,
        index: CExpr,
        value: CExpr,
    },
    If {
        cond: CExpr,
        then_block: Vec<CStmt>,
        else_block: Vec<CStmt>,
    },
    For {
        slot: usize,
        start: CExpr,
        end: CExpr,
        body: Vec<CStmt>,
    },
    Return(Option<CExpr>),
    Eval(CExpr),
}

#[derive(Debug, Clone)]
struct Table {
    name: String,
    shape: Vec<usize>,
    strides: Vec<usize>,
    values: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
struct ParamSlot {
    slot: usize,
    kind: ScalarKind,
}

#[derive(Debug, Clone)]
struct CompiledFunction {
    name: String,
    params: Vec<ParamSlot>,
    ret: Option<ScalarKind>,
    scalars: usize,
    arrays: usize,
    body: Vec<CStmt>,
}

/// A compiled kernel module: constant tables, device functions and one
/// `__global__` entry point.
#[derive(Debug, Clone)]
pub struct Program {
    tables: Vec<Table>,
    functions: Vec<CompiledFunction>,
    kernel: usize,
    params: Vec<KernelParam>,
}

impl Program {
    pub fn compile(module: &Module, kernel: &str) -> Result<Self, EvalError> {
        let mut compiler = Compiler::default();
        let mut entry = None;
        for item in module.items() {
            match item {
                Item::Comment(_) | Item::Include(_) | Item::Alias { .. } => {}
                Item::Constant(constant) => {
                    let kind = ScalarKind::of(&constant.ty)?;
                    let value = compiler.constant(&constant.value)?.coerce(kind);
                    compiler
                        .globals
                        .insert(constant.name.clone(), Global::Constant(value));
                }
                Item::ConstantArray(array) => compiler.table(array)?,
                Item::Function(function) if function.qualifiers.contains(&FnQualifier::Global) => {
                    if function.name == kernel {
                        entry = Some(compiler.kernel(function)?);
                    }
                }
                Item::Function(function) => compiler.device_function(function)?,
            }
        }
        let (kernel, params) = entry.ok_or_else(|| EvalError::MissingKernel(kernel.to_string()))?;
        Ok(Self {
            tables: compiler.tables,
            functions: compiler.functions,
            kernel,
            params,
        })
    }

    pub fn kernel_params(&self) -> &[KernelParam] {
        &self.params
    }

    /// Executes the kernel body for one thread and returns its pointer writes
    /// in program order.
    pub fn run_thread(
        &self,
        args: &[Arg],
        memory: &dyn Memory,
        thread: ThreadIndex,
    ) -> Result<Vec<Write>, EvalError> {
        self.check_args(args)?;
        let mut exec = Exec {
            program: self,
            args,
            memory,
            thread,
            writes: Vec::new(),
        };
        exec.call(self.kernel, Vec::new())?;
        Ok(exec.writes)
    }

    fn check_args(&self, args: &[Arg]) -> Result<(), EvalError> {
        if args.len() != self.params.len() {
            return Err(EvalError::ArityMismatch {
                function: self.functions[self.kernel].name.clone(),
                expected: self.params.len(),
                found: args.len(),
            });
        }
        for (param, arg) in self.params.iter().zip(args) {
            let ok = matches!(
                (param.kind, arg),
                (ParamKind::Pointer { .. }, Arg::Buffer(_)) | (ParamKind::Scalar(_), Arg::Value(_))
            );
            if !ok {
                return Err(EvalError::ArgumentMismatch(param.name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Global {
    Constant(Value),
    Table(usize),
    Function(usize),
}

#[derive(Debug, Default)]
struct Compiler {
    globals: HashMap<String, Global>,
    tables: Vec<Table>,
    functions: Vec<CompiledFunction>,
}

impl Compiler {
    fn constant(&self, expr: &Expr) -> Result<Value, EvalError> {
        let compiled = FnCompiler::new(self).expr(expr)?;
        fold(&compiled)
    }

    fn table(&mut self, array: &ConstantArray) -> Result<(), EvalError> {
        let kind = ScalarKind::of(&array.ty)?;
        let shape: Vec<usize> = array.shape.iter().map(|extent| extent.len).collect();
        let expected: usize = shape.iter().product();
        if array.values.len() != expected {
            return Err(EvalError::MalformedTable {
                name: array.name.clone(),
                expected,
                found: array.values.len(),
            });
        }
        let mut strides = vec![1; shape.len()];
        for axis in (0..shape.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * shape[axis + 1];
        }
        let values = array
            .values
            .iter()
            .map(|value| self.constant(value).map(|v| v.coerce(kind)))
            .collect::<Result<Vec<_>, _>>()?;
        self.globals
            .insert(array.name.clone(), Global::Table(self.tables.len()));
        self.tables.push(Table {
            name: array.name.clone(),
            shape,
            strides,
            values,
        });
        Ok(())
    }

    fn device_function(&mut self, function: &Function) -> Result<(), EvalError> {
        let mut fc = FnCompiler::new(self);
        let mut params = Vec::with_capacity(function.params.len());
        for param in &function.params {
            if param.ty.is_pointer() {
                return Err(EvalError::UnsupportedType(format!(
                    "{} in device function '{}'",
                    param.ty, function.name
                )));
            }
            let kind = ScalarKind::of(&param.ty)?;
            let mutable = !matches!(param.ty, Type::Const(_));
            let slot = fc.declare_scalar(&param.name, kind, mutable);
            params.push(ParamSlot { slot, kind });
        }
        let ret = match &function.return_type {
            Type::Void => None,
            ty => Some(ScalarKind::of(ty)?),
        };
        let body = fc.block(&function.body)?;
        let compiled = CompiledFunction {
            name: function.name.clone(),
            params,
            ret,
            scalars: fc.scalars,
            arrays: fc.arrays,
            body,
        };
        self.globals
            .insert(function.name.clone(), Global::Function(self.functions.len()));
        self.functions.push(compiled);
        Ok(())
    }

    fn kernel(&mut self, function: &Function) -> Result<(usize, Vec<KernelParam>), EvalError> {
        if function.return_type != Type::Void {
            return Err(EvalError::UnsupportedType(format!(
                "__global__ function '{}' must return void",
                function.name
            )));
        }
        let mut fc = FnCompiler::new(self);
        let mut params = Vec::with_capacity(function.params.len());
        for (position, param) in function.params.iter().enumerate() {
            let kind = ParamKind::of(&param.ty)?;
            let binding = match kind {
                ParamKind::Pointer { elem, writable } => Local::Pointer {
                    position,
                    kind: elem,
                    writable,
                },
                ParamKind::Scalar(kind) => Local::Param { position, kind },
            };
            fc.bind(&param.name, binding);
            params.push(KernelParam {
                name: param.name.clone(),
                kind,
            });
        }
        let body = fc.block(&function.body)?;
        let compiled = CompiledFunction {
            name: function.name.clone(),
            params: Vec::new(),
            ret: None,
            scalars: fc.scalars,
            arrays: fc.arrays,
            body,
        };
        let index = self.functions.len();
        self.functions.push(compiled);
        Ok((index, params))
    }
}

fn fold(expr: &CExpr) -> Result<Value, EvalError> {
    match expr {
        CExpr::Const(value) => Ok(*value),
        CExpr::Unary(op, inner) => Ok(unary(*op, fold(inner)?)),
        CExpr::Binary(left, op, right) => binary(*op, fold(left)?, fold(right)?),
        other => Err(EvalError::UnsupportedExpression(format!(
            "{other:?} is not a constant expression"
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
enum Local {
    Scalar {
        slot: usize,
        kind: ScalarKind,
        mutable: bool,
    },
    Array {
        slot: usize,
        kind: ScalarKind,
    },
    Param {
        position: usize,
        kind: ScalarKind,
    },
    Pointer {
        position: usize,
        kind: ScalarKind,
        writable: bool,
    },
}

enum Place {
    Scalar {
        slot: usize,
        kind: ScalarKind,
    },
    Array {
        slot: usize,
        kind: ScalarKind,
        name: String,
        index: CExpr,
    },
    Pointer {
        position: usize,
        kind: ScalarKind,
        name: String,
        index: CExpr,
    },
}

impl Place {
    fn read(&self) -> CExpr {
        match self {
            Place::Scalar { slot, .. } => CExpr::Local(*slot),
            Place::Array {
                slot, name, index, ..
            } => CExpr::ArrayLoad {
                slot: *slot,
                name: name.clone(),
                index: Box::new(index.clone()),
            },
            Place::Pointer {
                position,
                name,
                index,
                ..
            } => CExpr::Load {
                position: *position,
                name: name.clone(),
                index: Box::new(index.clone()),
            },
        }
    }

    fn store(self, value: CExpr) -> CStmt {
        match self {
            Place::Scalar { slot, kind } => CStmt::Store { slot, kind, value },
            Place::Array {
                slot,
                kind,
                name,
                index,
            } => CStmt::StoreArray {
                slot,
                kind,
                name,
                index,
                value,
            },
            Place::Pointer {
                position,
                kind,
                name,
                index,
            } => CStmt::StorePointer {
                position,
                kind,
                name,
                index,
                value,
            },
        }
    }
}

struct FnCompiler<'c> {
    compiler: &'c Compiler,
    scopes: Vec<HashMap<String, Local>>,
    scalars: usize,
    arrays: usize,
}

impl<'c> FnCompiler<'c> {
    fn new(compiler: &'c Compiler) -> Self {
        Self {
            compiler,
            scopes: vec![HashMap::new()],
            scalars: 0,
            arrays: 0,
        }
    }

    fn bind(&mut self, name: &str, local: Local) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), local);
        }
    }

    fn declare_scalar(&mut self, name: &str, kind: ScalarKind, mutable: bool) -> usize {
        let slot = self.scalars;
        self.scalars += 1;
        self.bind(name, Local::Scalar { slot, kind, mutable });
        slot
    }

    fn declare_array(&mut self, name: &str, kind: ScalarKind) -> usize {
        let slot = self.arrays;
        self.arrays += 1;
        self.bind(name, Local::Array { slot, kind });
        slot
    }

    fn local(&self, name: &str) -> Option<Local> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn block(&mut self, block: &Block) -> Result<Vec<CStmt>, EvalError> {
        self.scopes.push(HashMap::new());
        let mut out = Vec::with_capacity(block.stmts.len());
        let result = block
            .stmts
            .iter()
            .try_for_each(|stmt| self.stmt(stmt, &mut out));
        self.scopes.pop();
        result.map(|()| out)
    }

    fn stmt(&mut self, stmt: &Stmt, out: &mut Vec<CStmt>) -> Result<(), EvalError> {
        match stmt {
            Stmt::Comment(_) | Stmt::Blank => {}
            Stmt::Let { name, ty, expr } => {
                let value = self.expr(expr)?;
                let kind = ScalarKind::of(ty)?;
                let slot = self.declare_scalar(name, kind, false);
                out.push(CStmt::Store { slot, kind, value });
            }
            Stmt::Var { name, ty, expr } => {
                let kind = ScalarKind::of(ty)?;
                let value = match expr {
                    Some(expr) => self.expr(expr)?,
                    None => CExpr::Const(kind.zero()),
                };
                let slot = self.declare_scalar(name, kind, true);
                out.push(CStmt::Store { slot, kind, value });
            }
            Stmt::Array { name, ty, len } => {
                let len = self.expr(len)?;
                let kind = ScalarKind::of(ty)?;
                let slot = self.declare_array(name, kind);
                out.push(CStmt::DeclareArray {
                    slot,
                    kind,
                    name: name.clone(),
                    len,
                });
            }
            Stmt::Assign { target, value } => {
                let place = self.place(target)?;
                let value = self.expr(value)?;
                out.push(place.store(value));
            }
            Stmt::AssignOp { target, op, value } => {
                let place = self.place(target)?;
                let value = CExpr::Binary(
                    Box::new(place.read()),
                    assign_op(*op),
                    Box::new(self.expr(value)?),
                );
                out.push(place.store(value));
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let cond = self.expr(cond)?;
                let then_block = self.block(then_block)?;
                let else_block = match else_block {
                    Some(block) => self.block(block)?,
                    None => Vec::new(),
                };
                out.push(CStmt::If {
                    cond,
                    then_block,
                    else_block,
                });
            }
            Stmt::For {
                var,
                start,
                end,
                body,
                ..
            } => {
                let start = self.expr(start)?;
                self.scopes.push(HashMap::new());
                let slot = self.declare_scalar(var, ScalarKind::Int, false);
                let compiled = self
                    .expr(end)
                    .and_then(|end| self.block(body).map(|body| (end, body)));
                self.scopes.pop();
                let (end, body) = compiled?;
                out.push(CStmt::For {
                    slot,
                    start,
                    end,
                    body,
                });
            }
            Stmt::Return(expr) => {
                let value = expr.as_ref().map(|expr| self.expr(expr)).transpose()?;
                out.push(CStmt::Return(value));
            }
            Stmt::Call(expr) => out.push(CStmt::Eval(self.expr(expr)?)),
            // Scoping is resolved here; the compiled body runs inline.
            Stmt::Scope(block) => out.extend(self.block(block)?),
        }
        Ok(())
    }

    fn place(&self, target: &Expr) -> Result<Place, EvalError> {
        match target.node().clone() {
            ExprNode::Ident(name) => match self.local(&name) {
                Some(Local::Scalar {
                    slot,
                    kind,
                    mutable: true,
                }) => Ok(Place::Scalar { slot, kind }),
                Some(_) => Err(EvalError::NotAssignable(name)),
                None => Err(EvalError::UnknownIdentifier(name)),
            },
            ExprNode::Index { base, index } => {
                let name = match base.node() {
                    ExprNode::Ident(name) => name.clone(),
                    _ => return Err(EvalError::NotAssignable(target.to_string())),
                };
                let index = self.expr(&index)?;
                match self.local(&name) {
                    Some(Local::Array { slot, kind }) => Ok(Place::Array {
                        slot,
                        kind,
                        name,
                        index,
                    }),
                    Some(Local::Pointer {
                        position,
                        kind,
                        writable: true,
                    }) => Ok(Place::Pointer {
                        position,
                        kind,
                        name,
                        index,
                    }),
                    Some(_) => Err(EvalError::NotAssignable(name)),
                    None if self.compiler.globals.contains_key(&name) => {
                        Err(EvalError::NotAssignable(name))
                    }
                    None => Err(EvalError::UnknownIdentifier(name)),
                }
            }
            _ => Err(EvalError::NotAssignable(target.to_string())),
        }
    }

    fn expr(&self, expr: &Expr) -> Result<CExpr, EvalError> {
        match expr.node().clone() {
            ExprNode::Literal(literal) => Ok(CExpr::Const(match literal {
                Literal::Bool(v) => Value::Bool(v),
                Literal::Int(v) => Value::Int(v),
                Literal::Float(v) => Value::Float(v),
            })),
            ExprNode::Ident(name) => self.ident(name),
            ExprNode::Field { base, field } => builtin(base, &field),
            ExprNode::Index { .. } => self.indexed(expr),
            ExprNode::Unary { op, expr } => Ok(CExpr::Unary(op, Box::new(self.expr(&expr)?))),
            ExprNode::Binary { left, op, right } => Ok(CExpr::Binary(
                Box::new(self.expr(&left)?),
                op,
                Box::new(self.expr(&right)?),
            )),
            ExprNode::Call { callee, args } => {
                let Some(Global::Function(function)) = self.compiler.globals.get(&callee) else {
                    return Err(EvalError::UnknownFunction(callee));
                };
                let expected = self.compiler.functions[*function].params.len();
                if expected != args.len() {
                    return Err(EvalError::ArityMismatch {
                        function: callee,
                        expected,
                        found: args.len(),
                    });
                }
                let args = args
                    .into_iter()
                    .map(|arg| self.expr(&arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CExpr::Call {
                    function: *function,
                    name: callee,
                    args,
                })
            }
        }
    }

    fn ident(&self, name: String) -> Result<CExpr, EvalError> {
        match self.local(&name) {
            Some(Local::Scalar { slot, .. }) => return Ok(CExpr::Local(slot)),
            Some(Local::Param { position, kind }) => {
                return Ok(CExpr::Param {
                    position,
                    kind,
                    name,
                })
            }
            Some(Local::Array { .. } | Local::Pointer { .. }) => {
                return Err(EvalError::UnsupportedExpression(format!(
                    "array '{name}' used as a value"
                )))
            }
            None => {}
        }
        match self.compiler.globals.get(&name) {
            Some(Global::Constant(value)) => Ok(CExpr::Const(*value)),
            Some(_) => Err(EvalError::UnsupportedExpression(format!(
                "'{name}' used as a value"
            ))),
            None => Err(EvalError::UnknownIdentifier(name)),
        }
    }

    fn indexed(&self, expr: &Expr) -> Result<CExpr, EvalError> {
        let mut indices = Vec::new();
        let mut cursor = expr.clone();
        let name = loop {
            match cursor.node().clone() {
                ExprNode::Index { base, index } => {
                    indices.push(index);
                    cursor = base;
                }
                ExprNode::Ident(name) => break name,
                _ => {
                    return Err(EvalError::UnsupportedExpression(format!(
                        "indexing into '{cursor}'"
                    )))
                }
            }
        };
        indices.reverse();
        let mut compiled = indices
            .into_iter()
            .map(|index| self.expr(&index))
            .collect::<Result<Vec<_>, _>>()?;

        match self.local(&name) {
            Some(Local::Array { slot, .. }) => Ok(CExpr::ArrayLoad {
                slot,
                index: single_index(&mut compiled, &name)?,
                name,
            }),
            Some(Local::Pointer { position, .. }) => Ok(CExpr::Load {
                position,
                index: single_index(&mut compiled, &name)?,
                name,
            }),
            Some(_) => Err(EvalError::UnsupportedExpression(format!(
                "'{name}' is not an array"
            ))),
            None => match self.compiler.globals.get(&name) {
                Some(Global::Table(table)) => {
                    let rank = self.compiler.tables[*table].shape.len();
                    if rank != compiled.len() {
                        return Err(EvalError::UnsupportedExpression(format!(
                            "table '{name}' has rank {rank}, indexed with {} subscripts",
                            compiled.len()
                        )));
                    }
                    Ok(CExpr::TableLoad {
                        table: *table,
                        indices: compiled,
                    })
                }
                Some(_) => Err(EvalError::UnsupportedExpression(format!(
                    "'{name}' is not an array"
                ))),
                None => Err(EvalError::UnknownIdentifier(name)),
            },
        }
    }
}

fn single_index(compiled: &mut Vec<CExpr>, name: &str) -> Result<Box<CExpr>, EvalError> {
    match (compiled.pop(), compiled.is_empty()) {
        (Some(index), true) => Ok(Box::new(index)),
        _ => Err(EvalError::UnsupportedExpression(format!(
            "'{name}' must be indexed with exactly one subscript"
        ))),
    }
}

fn builtin(base: Expr, field: &str) -> Result<CExpr, EvalError> {
    let var = match base.node() {
        ExprNode::Ident(name) => match name.as_str() {
            "blockIdx" => BuiltinVar::BlockIdx,
            "threadIdx" => BuiltinVar::ThreadIdx,
            "blockDim" => BuiltinVar::BlockDim,
            _ => {
                return Err(EvalError::UnsupportedExpression(format!(
                    "member access '{name}.{field}'"
                )))
            }
        },
        _ => {
            return Err(EvalError::UnsupportedExpression(format!(
                "member access on '{base}'"
            )))
        }
    };
    let axis = match field {
        "x" => 0,
        "y" => 1,
        "z" => 2,
        _ => {
            return Err(EvalError::UnsupportedExpression(format!(
                "unknown component '{field}'"
            )))
        }
    };
    Ok(CExpr::Builtin(var, axis))
}

fn assign_op(op: AssignOp) -> BinaryOp {
    match op {
        AssignOp::Add => BinaryOp::Add,
        AssignOp::Sub => BinaryOp::Sub,
        AssignOp::Mul => BinaryOp::Mul,
        AssignOp::Div => BinaryOp::Div,
    }
}

fn unary(op: UnaryOp, value: Value) -> Value {
    match (op, value) {
        (UnaryOp::Negate, Value::Float(v)) => Value::Float(-v),
        (UnaryOp::Negate, other) => Value::Int(other.as_i64().wrapping_neg()),
        (UnaryOp::Not, other) => Value::Bool(!other.truthy()),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    let integral = left.is_integral() && right.is_integral();
    let value = match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
            if integral =>
        {
            let (a, b) = (left.as_i64(), right.as_i64());
            match op {
                BinaryOp::Add => Value::Int(a.wrapping_add(b)),
                BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
                BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
                _ if b == 0 => return Err(EvalError::DivisionByZero),
                BinaryOp::Div => Value::Int(a.wrapping_div(b)),
                _ => Value::Int(a.wrapping_rem(b)),
            }
        }
        BinaryOp::Add => Value::Float(left.as_f64() + right.as_f64()),
        BinaryOp::Sub => Value::Float(left.as_f64() - right.as_f64()),
        BinaryOp::Mul => Value::Float(left.as_f64() * right.as_f64()),
        BinaryOp::Div => Value::Float(left.as_f64() / right.as_f64()),
        BinaryOp::Rem => Value::Float(left.as_f64() % right.as_f64()),
        BinaryOp::Less
        | BinaryOp::LessEq
        | BinaryOp::Greater
        | BinaryOp::GreaterEq
        | BinaryOp::Equal
        | BinaryOp::NotEqual => Value::Bool(compare(op, left, right, integral)),
        BinaryOp::And => Value::Bool(left.truthy() && right.truthy()),
        BinaryOp::Or => Value::Bool(left.truthy() || right.truthy()),
    };
    Ok(value)
}

fn compare(op: BinaryOp, left: Value, right: Value, integral: bool) -> bool {
    let ordering = if integral {
        Some(left.as_i64().cmp(&right.as_i64()))
    } else {
        left.as_f64().partial_cmp(&right.as_f64())
    };
    let Some(ordering) = ordering else {
        return op == BinaryOp::NotEqual;
    };
    match op {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::LessEq => ordering.is_le(),
        BinaryOp::Greater => ordering.is_gt(),
        BinaryOp::GreaterEq => ordering.is_ge(),
        BinaryOp::Equal => ordering.is_eq(),
        _ => ordering.is_ne(),
    }
}

fn checked_index(value: Value, len: usize, target: &str) -> Result<usize, EvalError> {
    let index = value.as_i64();
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| EvalError::IndexOutOfBounds {
            target: target.to_string(),
            index,
            len,
        })
}

enum Flow {
    Next,
    Return(Option<Value>),
}

struct Frame {
    scalars: Vec<Value>,
    arrays: Vec<Vec<Value>>,
}

struct Exec<'a> {
    program: &'a Program,
    args: &'a [Arg],
    memory: &'a dyn Memory,
    thread: ThreadIndex,
    writes: Vec<Write>,
}

impl<'a> Exec<'a> {
    fn call(&mut self, function: usize, args: Vec<Value>) -> Result<Option<Value>, EvalError> {
        let program: &'a Program = self.program;
        let compiled = &program.functions[function];
        let mut frame = Frame {
            scalars: vec![Value::Int(0); compiled.scalars],
            arrays: vec![Vec::new(); compiled.arrays],
        };
        for (param, value) in compiled.params.iter().zip(args) {
            frame.scalars[param.slot] = value.coerce(param.kind);
        }
        match self.block(&compiled.body, &mut frame)? {
            Flow::Return(value) => Ok(match (value, compiled.ret) {
                (Some(value), Some(kind)) => Some(value.coerce(kind)),
                (value, _) => value,
            }),
            Flow::Next => Ok(None),
        }
    }

    fn buffer(&self, position: usize, name: &str) -> Result<usize, EvalError> {
        match self.args.get(position) {
            Some(Arg::Buffer(buffer)) => Ok(*buffer),
            _ => Err(EvalError::ArgumentMismatch(name.to_string())),
        }
    }

    fn block(&mut self, stmts: &'a [CStmt], frame: &mut Frame) -> Result<Flow, EvalError> {
        for stmt in stmts {
            if let Flow::Return(value) = self.stmt(stmt, frame)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn stmt(&mut self, stmt: &'a CStmt, frame: &mut Frame) -> Result<Flow, EvalError> {
        match stmt {
            CStmt::Store { slot, kind, value } => {
                let value = self.expr(value, frame)?;
                frame.scalars[*slot] = value.coerce(*kind);
            }
            CStmt::DeclareArray {
                slot,
                kind,
                name,
                len,
            } => {
                let len = self.expr(len, frame)?.as_i64();
                let len = usize::try_from(len).map_err(|_| EvalError::IndexOutOfBounds {
                    target: name.clone(),
                    index: len,
                    len: 0,
                })?;
                frame.arrays[*slot] = vec![kind.zero(); len];
            }
            CStmt::StoreArray {
                slot,
                kind,
                name,
                index,
                value,
            } => {
                let index = self.expr(index, frame)?;
                let value = self.expr(value, frame)?;
                let array = &mut frame.arrays[*slot];
                let index = checked_index(index, array.len(), name)?;
                array[index] = value.coerce(*kind);
            }
            CStmt::StorePointer {
                position,
                kind,
                name,
                index,
                value,
            } => {
                let buffer = self.buffer(*position, name)?;
                let index = self.expr(index, frame)?;
                let index = checked_index(index, self.memory.len(buffer), name)?;
                let value = self.expr(value, frame)?.coerce(*kind);
                self.writes.push(Write {
                    buffer,
                    index,
                    value,
                });
            }
            CStmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let branch = if self.expr(cond, frame)?.truthy() {
                    then_block
                } else {
                    else_block
                };
                return self.block(branch, frame);
            }
            CStmt::For {
                slot,
                start,
                end,
                body,
            } => {
                let mut i = self.expr(start, frame)?.as_i64();
                loop {
                    frame.scalars[*slot] = Value::Int(i);
                    if i >= self.expr(end, frame)?.as_i64() {
                        break;
                    }
                    if let Flow::Return(value) = self.block(body, frame)? {
                        return Ok(Flow::Return(value));
                    }
                    i += 1;
                }
            }
            CStmt::Return(value) => {
                let value = value
                    .as_ref()
                    .map(|value| self.expr(value, frame))
                    .transpose()?;
                return Ok(Flow::Return(value));
            }
            CStmt::Eval(expr) => {
                self.eval_discarded(expr, frame)?;
            }
        }
        Ok(Flow::Next)
    }

    fn eval_discarded(&mut self, expr: &'a CExpr, frame: &mut Frame) -> Result<(), EvalError> {
        match expr {
            CExpr::Call { function, args, .. } => {
                let values = self.args_of(args, frame)?;
                self.call(*function, values).map(|_| ())
            }
            other => self.expr(other, frame).map(|_| ()),
        }
    }

    fn args_of(&mut self, args: &'a [CExpr], frame: &mut Frame) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|arg| self.expr(arg, frame)).collect()
    }

    fn expr(&mut self, expr: &'a CExpr, frame: &mut Frame) -> Result<Value, EvalError> {
        match expr {
            CExpr::Const(value) => Ok(*value),
            CExpr::Local(slot) => Ok(frame.scalars[*slot]),
            CExpr::ArrayLoad { slot, name, index } => {
                let index = self.expr(index, frame)?;
                let array = &frame.arrays[*slot];
                let index = checked_index(index, array.len(), name)?;
                Ok(array[index])
            }
            CExpr::TableLoad { table, indices } => {
                let program: &'a Program = self.program;
                let table = &program.tables[*table];
                let mut flat = 0;
                for ((index, &extent), stride) in
                    indices.iter().zip(&table.shape).zip(&table.strides)
                {
                    let index = self.expr(index, frame)?;
                    flat += checked_index(index, extent, &table.name)? * stride;
                }
                Ok(table.values[flat])
            }
            CExpr::Param {
                position,
                kind,
                name,
            } => match self.args.get(*position) {
                Some(Arg::Value(value)) => Ok(value.coerce(*kind)),
                _ => Err(EvalError::ArgumentMismatch(name.clone())),
            },
            CExpr::Load {
                position,
                name,
                index,
            } => {
                let buffer = self.buffer(*position, name)?;
                let index = self.expr(index, frame)?;
                let len = self.memory.len(buffer);
                let index = checked_index(index, len, name)?;
                if let Some(write) = self
                    .writes
                    .iter()
                    .rev()
                    .find(|write| write.buffer == buffer && write.index == index)
                {
                    return Ok(write.value);
                }
                self.memory
                    .load(buffer, index)
                    .ok_or_else(|| EvalError::IndexOutOfBounds {
                        target: name.clone(),
                        index: index as i64,
                        len,
                    })
            }
            CExpr::Builtin(var, axis) => {
                let source = match var {
                    BuiltinVar::BlockIdx => self.thread.block_idx,
                    BuiltinVar::ThreadIdx => self.thread.thread_idx,
                    BuiltinVar::BlockDim => self.thread.block_dim,
                };
                Ok(Value::Int(i64::from(source[*axis])))
            }
            CExpr::Unary(op, inner) => Ok(unary(*op, self.expr(inner, frame)?)),
            CExpr::Binary(left, BinaryOp::And, right) => {
                let value = self.expr(left, frame)?.truthy() && self.expr(right, frame)?.truthy();
                Ok(Value::Bool(value))
            }
            CExpr::Binary(left, BinaryOp::Or, right) => {
                let value = self.expr(left, frame)?.truthy() || self.expr(right, frame)?.truthy();
                Ok(Value::Bool(value))
            }
            CExpr::Binary(left, op, right) => {
                let left = self.expr(left, frame)?;
                let right = self.expr(right, frame)?;
                binary(*op, left, right)
            }
            CExpr::Call {
                function,
                name,
                args,
            } => {
                let values = self.args_of(args, frame)?;
                self.call(*function, values)?
                    .ok_or_else(|| EvalError::MissingReturn(name.clone()))
            }
        }
    }
}
