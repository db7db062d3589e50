pub mod cuda_ast;
pub mod eval;
pub mod python_ast;

pub use cuda_ast::{
    AssignOp, Block, Constant, ConstantArray, Expr, Extent, FnQualifier, Function, Item, Module,
    Param, Stmt, Storage, Type,
};
pub use eval::{Arg, EvalError, KernelParam, Memory, ParamKind, Program, ScalarKind, ThreadIndex, Value, Write};
pub use python_ast::{render_py_block, PyStmt};
