pub mod compiler;
pub mod native;
