use std::fmt;
use std::io;
use std::path::PathBuf;

use lbmgen_codegen::native::{EvalError, Type};
use lbmgen_ir::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotScope {
    Kernel,
    Launcher,
}

impl fmt::Display for SlotScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotScope::Kernel => write!(f, "kernel"),
            SlotScope::Launcher => write!(f, "launcher"),
        }
    }
}

/// Structural failure while assembling a kernel. Aborts the whole
/// `generate()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationError {
    Config(ConfigError),
    SlotConflict {
        scope: SlotScope,
        name: String,
        existing: Type,
        requested: Type,
    },
    PrimitiveUnavailable {
        primitive: String,
        reason: String,
    },
}

impl GenerationError {
    pub fn unavailable(primitive: impl Into<String>, reason: impl Into<String>) -> Self {
        GenerationError::PrimitiveUnavailable {
            primitive: primitive.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Config(err) => write!(f, "invalid configuration: {err}"),
            GenerationError::SlotConflict {
                scope,
                name,
                existing,
                requested,
            } => write!(
                f,
                "{scope} parameter '{name}' is declared as '{existing}' and cannot be redeclared as '{requested}'"
            ),
            GenerationError::PrimitiveUnavailable { primitive, reason } => {
                write!(f, "primitive '{primitive}' is unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for GenerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenerationError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for GenerationError {
    fn from(err: ConfigError) -> Self {
        GenerationError::Config(err)
    }
}

#[derive(Debug)]
pub enum TemplateError {
    MissingBuffer { template: String, placeholder: String },
    UnusedBuffer(String),
    NotADirectory(PathBuf),
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::MissingBuffer {
                template,
                placeholder,
            } => write!(
                f,
                "template '{template}' references '{{{{{placeholder}}}}}' but no buffer provides it"
            ),
            TemplateError::UnusedBuffer(name) => {
                write!(f, "buffer '{name}' has no placeholder in any template")
            }
            TemplateError::NotADirectory(path) => {
                write!(f, "{} is not a writable directory", path.display())
            }
            TemplateError::Io { path, source } => {
                write!(f, "failed to write {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TemplateError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum InstallError {
    Spawn { program: String, source: io::Error },
    BuildFailed { status: Option<i32>, stderr: String },
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallError::Spawn { program, source } => {
                write!(f, "failed to start '{program}': {source}")
            }
            InstallError::BuildFailed { status, stderr } => {
                match status {
                    Some(code) => write!(f, "build exited with status {code}")?,
                    None => write!(f, "build terminated by signal")?,
                }
                if !stderr.trim().is_empty() {
                    write!(f, ":\n{}", stderr.trim_end())?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for InstallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InstallError::Spawn { source, .. } => Some(source),
            InstallError::BuildFailed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LaunchError {
    Eval(EvalError),
    Unbound(String),
    UnknownParameter(String),
    BufferKind(String),
    ShapeMismatch { expected: usize, found: usize },
    WriteConflict { buffer: String, index: usize },
    UnresolvedHostExpression(String),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::Eval(err) => write!(f, "kernel execution failed: {err}"),
            LaunchError::Unbound(name) => write!(f, "kernel parameter '{name}' is not bound"),
            LaunchError::UnknownParameter(name) => {
                write!(f, "the kernel has no parameter named '{name}'")
            }
            LaunchError::BufferKind(name) => {
                write!(f, "buffer bound to '{name}' has the wrong element type")
            }
            LaunchError::ShapeMismatch { expected, found } => write!(
                f,
                "grid has {found} dimensions but the kernel was generated for {expected}"
            ),
            LaunchError::WriteConflict { buffer, index } => write!(
                f,
                "more than one cell wrote element {index} of '{buffer}' in the same launch"
            ),
            LaunchError::UnresolvedHostExpression(expr) => {
                write!(f, "'{expr}' does not name a launcher parameter")
            }
        }
    }
}

impl std::error::Error for LaunchError {}

impl From<EvalError> for LaunchError {
    fn from(err: EvalError) -> Self {
        LaunchError::Eval(err)
    }
}
