use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use lbmgen_ir::{
    BoundarySpec, CollisionSpec, ConfigError, EquilibriumSpec, StencilRegistry, StreamingSpec,
};
use serde::{Deserialize, Serialize};

use super::native::{BuildCommand, Generator};

/// Driver configuration for one generated extension, read from JSON.
///
/// Missing fields fall back to the default setup: D2Q9, BGK with
/// `tau = 0.8`, bounce-back boundaries 1 and 2, quadratic equilibrium and
/// standard streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub stencil: String,
    pub collision: CollisionSpec,
    pub streaming: StreamingSpec,
    pub equilibrium: EquilibriumSpec,
    pub boundaries: Vec<BoundarySpec>,
    pub output_dir: PathBuf,
    pub build_command: Option<BuildCommand>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            stencil: "D2Q9".to_string(),
            collision: CollisionSpec::Bgk { tau: 0.8 },
            streaming: StreamingSpec::standard(),
            equilibrium: EquilibriumSpec::Quadratic,
            boundaries: vec![
                BoundarySpec::BounceBack { index: 1 },
                BoundarySpec::BounceBack { index: 2 },
            ],
            output_dir: PathBuf::from("lettuce_native"),
            build_command: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigLoadError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(ConfigError),
}

impl fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLoadError::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigLoadError::Parse(err) => write!(f, "malformed generator config: {err}"),
            ConfigLoadError::Invalid(err) => write!(f, "invalid generator config: {err}"),
        }
    }
}

impl std::error::Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigLoadError::Io { source, .. } => Some(source),
            ConfigLoadError::Parse(err) => Some(err),
            ConfigLoadError::Invalid(err) => Some(err),
        }
    }
}

impl From<ConfigError> for ConfigLoadError {
    fn from(err: ConfigError) -> Self {
        ConfigLoadError::Invalid(err)
    }
}

impl GeneratorConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigLoadError> {
        serde_json::from_str(text).map_err(ConfigLoadError::Parse)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Resolves the stencil tag and validates every component.
    pub fn build(&self) -> Result<Generator, ConfigError> {
        let stencil = StencilRegistry::builtin().get(&self.stencil)?;
        Generator::new(
            stencil,
            self.collision,
            self.boundaries.clone(),
            self.equilibrium,
            self.streaming,
        )
    }

    pub fn build_command(&self) -> BuildCommand {
        self.build_command.clone().unwrap_or_default()
    }
}
