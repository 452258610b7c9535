//! This is the compiler as a library.  See `src/bin` directory for the
//! executable programs using this library.
//!
//! The compiler lowers a small expression language to a subset of x86-64
//! through a fixed sequence of intermediate forms; each pass consumes the
//! previous form and produces the next one.  See [pipeline] for the pass
//! order.

pub mod common;
pub mod front;
pub mod middle;
pub mod back;
pub mod pipeline;
