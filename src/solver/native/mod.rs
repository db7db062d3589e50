pub mod boundary;
pub mod buffers;
pub mod collision;
pub mod context;
pub mod equilibrium;
pub mod error;
pub mod generator;
pub mod install;
pub mod launcher;
pub mod primitives;
pub mod slots;
pub mod streaming;
pub mod template;

pub use boundary::{
    native_boundary, AntiBounceBackOutlet, BounceBackBoundary, EquilibriumBoundary, NativeBoundary,
};
pub use buffers::{BufferName, CodeBuffers};
pub use collision::{native_collision, BgkCollision, NativeCollision, NoCollision};
pub use context::GenContext;
pub use equilibrium::{native_equilibrium, NativeEquilibrium, QuadraticEquilibrium};
pub use error::{GenerationError, InstallError, LaunchError, SlotScope, TemplateError};
pub use generator::{Generator, NativeModule};
pub use install::BuildCommand;
pub use launcher::{HostBuffer, HostLauncher};
pub use slots::{Slot, SlotTable};
pub use streaming::{native_streaming, NativeStreaming, NoStreaming, StandardStreaming};
pub use template::{Template, TEMPLATES};
