//! The flat three-address intermediate form.
//!
//! A program is a `main` function plus its helpers.  Function bodies are
//! straight-line sequences of assignments ending in a return, and operator
//! operands are atomic by construction: the [Rhs] type has no room for a
//! nested expression.

use std::fmt;

use crate::common::{Error, Id, Map, Oracle, Result, Set};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub main: Function,
    pub functions: Vec<Function>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: Id,
    pub formals: Vec<Id>,
    /// Every name this function assigns to.
    pub locals: Set<Id>,
    pub instrs: Vec<Instr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    Assign(Id, Rhs),
    Return(Id),
}

/// Right-hand sides of assignments.  All operands are atomic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rhs {
    Int(i64),
    Read,
    Var(Id),
    Neg(Id),
    Add(Id, Id),
    Call(Id, Vec<Id>),
}

impl Program {
    pub fn interpret(&self, oracle: &mut dyn Oracle) -> Result<i64> {
        let fns: Map<Id, &Function> = self.functions.iter().map(|f| (f.name, f)).collect();
        self.main.interpret(&fns, &[], oracle)
    }

    pub fn check_form(&self) -> Result<()> {
        self.main.check_form()?;
        for f in &self.functions {
            f.check_form()?;
        }
        Ok(())
    }
}

impl Function {
    fn interpret(
        &self,
        fns: &Map<Id, &Function>,
        args: &[i64],
        oracle: &mut dyn Oracle,
    ) -> Result<i64> {
        if args.len() != self.formals.len() {
            return Err(Error::WrongArity {
                name: self.name.to_string(),
                expected: self.formals.len(),
                given: args.len(),
            });
        }
        // Declared locals start out without a value; formals arrive defined.
        let mut env: Map<Id, Option<i64>> = Map::new();
        for local in &self.locals {
            env.insert(*local, None);
        }
        for (formal, value) in self.formals.iter().zip(args) {
            env.insert(*formal, Some(*value));
        }
        for instr in &self.instrs {
            match instr {
                Instr::Assign(dst, rhs) => {
                    if !env.contains_key(dst) {
                        return Err(Error::VarNotDeclared(dst.to_string()));
                    }
                    let value = eval_rhs(rhs, &env, fns, oracle)?;
                    env.insert(*dst, Some(value));
                }
                Instr::Return(x) => return lookup(&env, x),
            }
        }
        Err(Error::IllFormed(format!(
            "function {} has no return",
            self.name
        )))
    }

    pub fn check_form(&self) -> Result<()> {
        let mut declared: Set<Id> = self.locals.clone();
        declared.extend(self.formals.iter().copied());
        let check = |x: &Id| -> Result<()> {
            if declared.contains(x) {
                Ok(())
            } else {
                Err(Error::IllFormed(format!(
                    "{} refers to undeclared name {x}",
                    self.name
                )))
            }
        };
        match self.instrs.last() {
            Some(Instr::Return(_)) => {}
            _ => {
                return Err(Error::IllFormed(format!(
                    "function {} does not end in a return",
                    self.name
                )))
            }
        }
        for instr in &self.instrs[..self.instrs.len() - 1] {
            match instr {
                Instr::Return(_) => {
                    return Err(Error::IllFormed(format!(
                        "function {} returns before its last instruction",
                        self.name
                    )))
                }
                Instr::Assign(dst, rhs) => {
                    check(dst)?;
                    match rhs {
                        Rhs::Int(_) | Rhs::Read => {}
                        Rhs::Var(s) | Rhs::Neg(s) => check(s)?,
                        Rhs::Add(a, b) => {
                            check(a)?;
                            check(b)?;
                        }
                        Rhs::Call(_, args) => {
                            for arg in args {
                                check(arg)?;
                            }
                        }
                    }
                }
            }
        }
        if let Some(Instr::Return(x)) = self.instrs.last() {
            check(x)?;
        }
        Ok(())
    }
}

fn lookup(env: &Map<Id, Option<i64>>, x: &Id) -> Result<i64> {
    match env.get(x) {
        None => Err(Error::VarNotDeclared(x.to_string())),
        Some(None) => Err(Error::VarNotDefined(x.to_string())),
        Some(Some(v)) => Ok(*v),
    }
}

fn eval_rhs(
    rhs: &Rhs,
    env: &Map<Id, Option<i64>>,
    fns: &Map<Id, &Function>,
    oracle: &mut dyn Oracle,
) -> Result<i64> {
    match rhs {
        Rhs::Int(v) => Ok(*v),
        Rhs::Read => Ok(oracle.next_int()),
        Rhs::Var(s) => lookup(env, s),
        Rhs::Neg(s) => Ok(lookup(env, s)?.wrapping_neg()),
        Rhs::Add(a, b) => Ok(lookup(env, a)?.wrapping_add(lookup(env, b)?)),
        Rhs::Call(fname, args) => {
            let f = fns
                .get(fname)
                .ok_or_else(|| Error::FunctionNotDefined(fname.to_string()))?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(lookup(env, arg)?);
            }
            f.interpret(fns, &values, oracle)
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
        write!(f, ") {})", self.main)
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
        write!(f, ") (")?;
        for (i, local) in self.locals.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{local}")?;
        }
        write!(f, ")")?;
        for instr in &self.instrs {
            write!(f, " {instr}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Assign(dst, rhs) => write!(f, "(:= {dst} {rhs})"),
            Instr::Return(x) => write!(f, "(retn {x})"),
        }
    }
}

impl fmt::Display for Rhs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rhs::Int(v) => write!(f, "{v}"),
            Rhs::Read => write!(f, "(read)"),
            Rhs::Var(x) => write!(f, "{x}"),
            Rhs::Neg(x) => write!(f, "(- {x})"),
            Rhs::Add(a, b) => write!(f, "(+ {a} {b})"),
            Rhs::Call(fname, args) => {
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

    fn function(name: &str, formals: &[&str], locals: &[&str], instrs: Vec<Instr>) -> Function {
        Function {
            name: id(name),
            formals: formals.iter().map(|s| id(s)).collect(),
            locals: locals.iter().map(|s| id(s)).collect(),
            instrs,
        }
    }

    #[test]
    fn straight_line_evaluation() {
        let main = function(
            "main",
            &[],
            &["retvar", "t"],
            vec![
                Instr::Assign(id("t"), Rhs::Int(5)),
                Instr::Assign(id("t"), Rhs::Neg(id("t"))),
                Instr::Assign(id("retvar"), Rhs::Add(id("t"), id("t"))),
                Instr::Return(id("retvar")),
            ],
        );
        let p = Program {
            main,
            functions: vec![],
        };
        p.check_form().unwrap();
        assert_eq!(p.interpret(&mut Recording::default()), Ok(-10));
    }

    #[test]
    fn reads_come_from_the_oracle() {
        let main = function(
            "main",
            &[],
            &["retvar"],
            vec![
                Instr::Assign(id("retvar"), Rhs::Read),
                Instr::Return(id("retvar")),
            ],
        );
        let p = Program {
            main,
            functions: vec![],
        };
        assert_eq!(p.interpret(&mut Recording::new([9])), Ok(9));
    }

    #[test]
    fn undeclared_and_undefined_are_distinguished() {
        let undeclared = function(
            "main",
            &[],
            &["retvar"],
            vec![
                Instr::Assign(id("retvar"), Rhs::Var(id("ghost"))),
                Instr::Return(id("retvar")),
            ],
        );
        let p = Program {
            main: undeclared,
            functions: vec![],
        };
        assert_eq!(
            p.interpret(&mut Recording::default()),
            Err(Error::VarNotDeclared("ghost".into()))
        );

        let undefined = function(
            "main",
            &[],
            &["retvar", "t"],
            vec![
                Instr::Assign(id("retvar"), Rhs::Var(id("t"))),
                Instr::Return(id("retvar")),
            ],
        );
        let p = Program {
            main: undefined,
            functions: vec![],
        };
        assert_eq!(
            p.interpret(&mut Recording::default()),
            Err(Error::VarNotDefined("t".into()))
        );
    }

    #[test]
    fn calls_run_the_callee_with_fresh_locals() {
        let double = function(
            "double",
            &["n"],
            &["retvar"],
            vec![
                Instr::Assign(id("retvar"), Rhs::Add(id("n"), id("n"))),
                Instr::Return(id("retvar")),
            ],
        );
        let main = function(
            "main",
            &[],
            &["retvar", "arg"],
            vec![
                Instr::Assign(id("arg"), Rhs::Int(21)),
                Instr::Assign(id("retvar"), Rhs::Call(id("double"), vec![id("arg")])),
                Instr::Return(id("retvar")),
            ],
        );
        let p = Program {
            main,
            functions: vec![double],
        };
        p.check_form().unwrap();
        assert_eq!(p.interpret(&mut Recording::default()), Ok(42));
    }

    #[test]
    fn check_form_rejects_early_returns_and_ghosts() {
        let early = function(
            "main",
            &[],
            &["retvar"],
            vec![
                Instr::Return(id("retvar")),
                Instr::Assign(id("retvar"), Rhs::Int(1)),
            ],
        );
        assert!(early.check_form().is_err());

        let ghost = function(
            "main",
            &[],
            &["retvar"],
            vec![
                Instr::Assign(id("ghost"), Rhs::Int(1)),
                Instr::Return(id("retvar")),
            ],
        );
        assert!(ghost.check_form().is_err());
    }
}
