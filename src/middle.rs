//! The middle-end of the compiler.

pub mod flat;
pub mod flatten;
pub mod uniquify;

pub use flatten::flatten;
pub use uniquify::{uniquify, UniqueProgram};
