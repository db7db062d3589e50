//! Pure-data descriptions consumed by the native kernel generator: velocity
//! stencils and the closed component configuration families.

pub mod components;
pub mod error;
pub mod stencil;

pub use components::{
    validate_boundaries, BoundarySpec, CollisionSpec, EquilibriumSpec, OutletDirection,
    StreamingSpec,
};
pub use error::ConfigError;
pub use stencil::{StencilDescriptor, StencilRegistry};
