pub mod ops;
pub mod simulation;

pub use ops::Grid;
pub use simulation::ReferenceSimulation;
