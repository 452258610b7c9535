//! The abstract syntax tree of the surface language, with its reference
//! evaluator and printer.
//!
//! Programs are finite expression trees over 64-bit integers.  Arithmetic
//! wraps on overflow; the reference semantics is otherwise the obvious one,
//! with strict left-to-right evaluation of operands.  That order is the only
//! observable ordering the rest of the pipeline has to preserve, because it
//! fixes how the input oracle is consumed.

use std::fmt;

use crate::common::{Error, Id, Map, Oracle, Result, Set};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub functions: Vec<Function>,
    pub body: Expr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: Id,
    pub formals: Vec<Id>,
    pub body: Expr,
}

/// Expressions.  Variable and function names live in separate namespaces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Read,
    Var(Id),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Let {
        var: Id,
        rhs: Box<Expr>,
        body: Box<Expr>,
    },
    Call(Id, Vec<Expr>),
}

impl Expr {
    pub fn neg(e: Expr) -> Expr {
        Expr::Neg(Box::new(e))
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Add(Box::new(lhs), Box::new(rhs))
    }

    pub fn let_(var: Id, rhs: Expr, body: Expr) -> Expr {
        Expr::Let {
            var,
            rhs: Box::new(rhs),
            body: Box::new(body),
        }
    }
}

impl Program {
    /// Evaluate the program, reading external integers from `oracle`.
    pub fn interpret(&self, oracle: &mut dyn Oracle) -> Result<i64> {
        let fns: Map<Id, &Function> = self.functions.iter().map(|f| (f.name, f)).collect();
        self.body.interpret(&Map::new(), &fns, oracle)
    }

    /// Structural well-formedness: the program is closed.  Every variable
    /// reference is bound by an enclosing `let` or a formal, and every call
    /// names a defined function.
    pub fn check_form(&self) -> Result<()> {
        let fnames: Set<Id> = self.functions.iter().map(|f| f.name).collect();
        for f in &self.functions {
            let scope: Set<Id> = f.formals.iter().copied().collect();
            f.body.check_scope(&scope, &fnames)?;
        }
        self.body.check_scope(&Set::new(), &fnames)
    }
}

impl Expr {
    fn interpret(
        &self,
        env: &Map<Id, i64>,
        fns: &Map<Id, &Function>,
        oracle: &mut dyn Oracle,
    ) -> Result<i64> {
        match self {
            Expr::Int(v) => Ok(*v),
            Expr::Read => Ok(oracle.next_int()),
            Expr::Var(x) => env
                .get(x)
                .copied()
                .ok_or_else(|| Error::VarNotDefined(x.to_string())),
            Expr::Neg(e) => Ok(e.interpret(env, fns, oracle)?.wrapping_neg()),
            Expr::Add(lhs, rhs) => {
                // Left operand first; the oracle sees reads in this order.
                let lhs = lhs.interpret(env, fns, oracle)?;
                let rhs = rhs.interpret(env, fns, oracle)?;
                Ok(lhs.wrapping_add(rhs))
            }
            Expr::Let { var, rhs, body } => {
                let bound = rhs.interpret(env, fns, oracle)?;
                let mut inner = env.clone();
                inner.insert(*var, bound);
                body.interpret(&inner, fns, oracle)
            }
            Expr::Call(fname, args) => {
                let f = fns
                    .get(fname)
                    .ok_or_else(|| Error::FunctionNotDefined(fname.to_string()))?;
                if f.formals.len() != args.len() {
                    return Err(Error::WrongArity {
                        name: fname.to_string(),
                        expected: f.formals.len(),
                        given: args.len(),
                    });
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.interpret(env, fns, oracle)?);
                }
                // The callee body sees its formals and nothing else.
                let inner: Map<Id, i64> = f.formals.iter().copied().zip(values).collect();
                f.body.interpret(&inner, fns, oracle)
            }
        }
    }

    fn check_scope(&self, vars: &Set<Id>, fns: &Set<Id>) -> Result<()> {
        match self {
            Expr::Int(_) | Expr::Read => Ok(()),
            Expr::Var(x) => {
                if vars.contains(x) {
                    Ok(())
                } else {
                    Err(Error::IllFormed(format!("unbound variable {x}")))
                }
            }
            Expr::Neg(e) => e.check_scope(vars, fns),
            Expr::Add(lhs, rhs) => {
                lhs.check_scope(vars, fns)?;
                rhs.check_scope(vars, fns)
            }
            Expr::Let { var, rhs, body } => {
                rhs.check_scope(vars, fns)?;
                let mut inner = vars.clone();
                inner.insert(*var);
                body.check_scope(&inner, fns)
            }
            Expr::Call(fname, args) => {
                if !fns.contains(fname) {
                    return Err(Error::IllFormed(format!("call to unknown function {fname}")));
                }
                for arg in args {
                    arg.check_scope(vars, fns)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(program (")?;
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{func}")?;
        }
        write!(f, ") {})", self.body)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(function {} (", self.name)?;
        for (i, formal) in self.formals.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{formal}")?;
        }
        write!(f, ") {})", self.body)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Read => write!(f, "(read)"),
            Expr::Var(x) => write!(f, "{x}"),
            Expr::Neg(e) => write!(f, "(- {e})"),
            Expr::Add(lhs, rhs) => write!(f, "(+ {lhs} {rhs})"),
            Expr::Let { var, rhs, body } => write!(f, "(let ([{var} {rhs}]) {body})"),
            Expr::Call(fname, args) => {
                write!(f, "({fname}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{id, Recording};

    fn run(program: &Program, inputs: &[i64]) -> Result<i64> {
        program.interpret(&mut Recording::new(inputs.iter().copied()))
    }

    fn main_program(body: Expr) -> Program {
        Program {
            functions: vec![],
            body,
        }
    }

    #[test]
    fn literals_and_operators() {
        let p = main_program(Expr::add(Expr::Int(3), Expr::neg(Expr::Int(5))));
        assert_eq!(run(&p, &[]), Ok(-2));
    }

    #[test]
    fn let_binds_and_shadows() {
        let p = main_program(Expr::let_(
            id("x"),
            Expr::Int(1),
            Expr::let_(id("x"), Expr::Int(2), Expr::Var(id("x"))),
        ));
        assert_eq!(run(&p, &[]), Ok(2));
    }

    #[test]
    fn read_consumes_left_to_right() {
        let p = main_program(Expr::add(Expr::Read, Expr::neg(Expr::Read)));
        assert_eq!(run(&p, &[7, 3]), Ok(4));
        assert_eq!(run(&p, &[3, 7]), Ok(-4));
    }

    #[test]
    fn free_variable_is_undefined() {
        let p = main_program(Expr::Var(id("x")));
        assert_eq!(run(&p, &[]), Err(Error::VarNotDefined("x".into())));
        assert!(p.check_form().is_err());
    }

    #[test]
    fn calls_check_definition_and_arity() {
        let double = Function {
            name: id("double"),
            formals: vec![id("n")],
            body: Expr::add(Expr::Var(id("n")), Expr::Var(id("n"))),
        };
        let p = Program {
            functions: vec![double],
            body: Expr::Call(id("double"), vec![Expr::Int(21)]),
        };
        assert_eq!(run(&p, &[]), Ok(42));

        let unknown = main_program(Expr::Call(id("nope"), vec![]));
        assert_eq!(
            run(&unknown, &[]),
            Err(Error::FunctionNotDefined("nope".into()))
        );

        let wrong = Program {
            body: Expr::Call(id("double"), vec![]),
            ..p.clone()
        };
        assert_eq!(
            run(&wrong, &[]),
            Err(Error::WrongArity {
                name: "double".into(),
                expected: 1,
                given: 0,
            })
        );
    }

    #[test]
    fn display_round_trips_shape() {
        let p = main_program(Expr::let_(
            id("x"),
            Expr::Int(10),
            Expr::add(Expr::Var(id("x")), Expr::Var(id("x"))),
        ));
        assert_eq!(p.to_string(), "(program () (let ([x 10]) (+ x x)))");
    }
}
