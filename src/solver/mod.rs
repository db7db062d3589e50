pub mod config;
pub mod moments;
pub mod native;
pub mod reference;

pub use config::{ConfigLoadError, GeneratorConfig};
pub use moments::{
    bgk_initialization, moment_tensor, MomentError, MomentTransform, TransformRegistry,
};
pub use native::{Generator, HostBuffer, HostLauncher, NativeModule};
pub use reference::ReferenceSimulation;
