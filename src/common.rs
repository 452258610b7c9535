//! Common definitions that are shared between different parts of the compiler.

use std::collections::VecDeque;

use derive_more::Display;

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers.
pub type Id = internment::Intern<String>;

/// Intern a name.
pub fn id(name: &str) -> Id {
    internment::Intern::from_ref(name)
}

/// The reserved name of the synthetic variable that carries a program's
/// result: flatten introduces it, and the allocator pins it to `%rax`.
pub fn retvar() -> Id {
    id("retvar")
}

/// The external source of integers consumed by `(read)`.
///
/// The stream is total: an oracle always produces a next integer.
pub trait Oracle {
    fn next_int(&mut self) -> i64;
}

/// A pre-recorded input stream, replayed in order.
///
/// Evaluating every intermediate form of one program against fresh copies of
/// the same recording is how the test harness establishes observable
/// equivalence.  An exhausted recording keeps producing zero so the stream
/// stays total.
#[derive(Clone, Debug, Default)]
pub struct Recording {
    inputs: VecDeque<i64>,
}

impl Recording {
    pub fn new(inputs: impl IntoIterator<Item = i64>) -> Self {
        Recording {
            inputs: inputs.into_iter().collect(),
        }
    }
}

impl Oracle for Recording {
    fn next_int(&mut self) -> i64 {
        self.inputs.pop_front().unwrap_or(0)
    }
}

/// Everything that can go wrong in a pass or an evaluator.
///
/// Errors are surfaced, never recovered: no pass retries, and the driver
/// reports the first error it sees.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum Error {
    /// The lexer hit a character it has no rule for.
    #[display("lexer error: {_0}")]
    Lex(String),
    /// The token stream does not match the surface grammar.
    #[display("parse error: {_0}")]
    Parse(String),
    /// An operand refers to a name outside the function's locals and formals.
    #[display("variable {_0} is not declared")]
    VarNotDeclared(String),
    /// A variable (or register, or memory cell) is read before it is given a
    /// value.
    #[display("variable {_0} is not defined")]
    VarNotDefined(String),
    /// A call names a function that does not exist.
    #[display("function {_0} is not defined")]
    FunctionNotDefined(String),
    /// A call passes the wrong number of arguments.
    #[display("function {name} takes {expected} argument(s) but was given {given}")]
    WrongArity {
        name: String,
        expected: usize,
        given: usize,
    },
    /// A structural invariant of an intermediate form is violated.
    #[display("ill-formed program: {_0}")]
    IllFormed(String),
    /// A shape the pass does not handle.
    #[display("unsupported form: {_0}")]
    UnsupportedForm(String),
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_names_compare_by_content() {
        assert_eq!(id("x"), id("x"));
        assert_ne!(id("x"), id("y"));
        assert!(id("a") < id("b"));
    }

    #[test]
    fn recording_replays_then_zeroes() {
        let mut oracle = Recording::new([7, 3]);
        assert_eq!(oracle.next_int(), 7);
        assert_eq!(oracle.next_int(), 3);
        assert_eq!(oracle.next_int(), 0);
    }
}
