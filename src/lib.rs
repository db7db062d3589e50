//! Generator for specialised native lattice Boltzmann step kernels.
//!
//! A [`solver::native::Generator`] combines a velocity stencil with one
//! collision, equilibrium and streaming strategy plus any number of
//! boundaries, and emits the CUDA kernel, its C++ launcher and the Python
//! glue of a torch extension.

pub mod solver;
