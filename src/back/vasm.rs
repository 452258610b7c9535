//! x86 over virtual registers.
//!
//! The instruction set is the four arithmetic/move forms plus `retq`, and the
//! only operands are immediates and name-addressed virtual registers.  One
//! virtual register is special: [retvar] holds the program's result when
//! `retq` executes, and the allocator later pins it to `%rax`.

use std::fmt;

use derive_more::Display;

use crate::common::{Error, Id, Map, Result};

/// The reserved virtual register holding the return value.
pub use crate::common::retvar;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operand {
    #[display("${_0}")]
    Imm(i64),
    #[display("{_0}")]
    VReg(Id),
}

impl Operand {
    /// The virtual register named by this operand, if it is one.
    pub fn vreg(self) -> Option<Id> {
        match self {
            Operand::VReg(x) => Some(x),
            Operand::Imm(_) => None,
        }
    }
}

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum Instr {
    #[display("movq {src}, {dst}")]
    Movq { src: Operand, dst: Operand },
    #[display("addq {src}, {dst}")]
    Addq { src: Operand, dst: Operand },
    #[display("subq {src}, {dst}")]
    Subq { src: Operand, dst: Operand },
    #[display("negq {dst}")]
    Negq { dst: Operand },
    #[display("retq")]
    Retq,
}

impl Instr {
    pub fn src(&self) -> Option<Operand> {
        match self {
            Instr::Movq { src, .. } | Instr::Addq { src, .. } | Instr::Subq { src, .. } => {
                Some(*src)
            }
            Instr::Negq { .. } | Instr::Retq => None,
        }
    }

    pub fn dst(&self) -> Option<Operand> {
        match self {
            Instr::Movq { dst, .. }
            | Instr::Addq { dst, .. }
            | Instr::Subq { dst, .. }
            | Instr::Negq { dst } => Some(*dst),
            Instr::Retq => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub instrs: Vec<Instr>,
}

impl Program {
    /// Run the program over a name-addressed register file and return the
    /// value of [retvar] when `retq` executes.
    pub fn interpret(&self) -> Result<i64> {
        let mut env: Map<Id, i64> = Map::new();
        for instr in &self.instrs {
            match instr {
                Instr::Retq => return read(&env, retvar()),
                Instr::Movq { src, dst } => {
                    let value = operand(&env, *src)?;
                    write(&mut env, *dst, value)?;
                }
                Instr::Addq { src, dst } => {
                    let value = operand(&env, *dst)?.wrapping_add(operand(&env, *src)?);
                    write(&mut env, *dst, value)?;
                }
                Instr::Subq { src, dst } => {
                    let value = operand(&env, *dst)?.wrapping_sub(operand(&env, *src)?);
                    write(&mut env, *dst, value)?;
                }
                Instr::Negq { dst } => {
                    let value = operand(&env, *dst)?.wrapping_neg();
                    write(&mut env, *dst, value)?;
                }
            }
        }
        Err(Error::IllFormed("program did not execute retq".into()))
    }

    /// Structural well-formedness: a nonempty instruction list whose single
    /// `retq` comes last, and no instruction writes to an immediate.
    pub fn check_form(&self) -> Result<()> {
        match self.instrs.last() {
            Some(Instr::Retq) => {}
            _ => return Err(Error::IllFormed("program does not end in retq".into())),
        }
        for instr in &self.instrs[..self.instrs.len() - 1] {
            if matches!(instr, Instr::Retq) {
                return Err(Error::IllFormed("retq before the last instruction".into()));
            }
            if matches!(instr.dst(), Some(Operand::Imm(_))) {
                return Err(Error::IllFormed(format!(
                    "immediate destination in {instr}"
                )));
            }
        }
        Ok(())
    }
}

fn read(env: &Map<Id, i64>, x: Id) -> Result<i64> {
    env.get(&x)
        .copied()
        .ok_or_else(|| Error::VarNotDefined(x.to_string()))
}

fn operand(env: &Map<Id, i64>, op: Operand) -> Result<i64> {
    match op {
        Operand::Imm(v) => Ok(v),
        Operand::VReg(x) => read(env, x),
    }
}

fn write(env: &mut Map<Id, i64>, dst: Operand, value: i64) -> Result<()> {
    match dst {
        Operand::VReg(x) => {
            env.insert(x, value);
            Ok(())
        }
        Operand::Imm(_) => Err(Error::IllFormed("immediate destination".into())),
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ".global _main")?;
        write!(f, "_main:")?;
        for instr in &self.instrs {
            write!(f, "\n\t{instr}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use Operand::*;

    fn vreg(name: &str) -> Operand {
        VReg(id(name))
    }

    #[test]
    fn arithmetic_lands_in_retvar() {
        let p = Program {
            instrs: vec![
                Instr::Movq {
                    src: Imm(5),
                    dst: vreg("t"),
                },
                Instr::Negq { dst: vreg("t") },
                Instr::Movq {
                    src: vreg("t"),
                    dst: vreg("retvar"),
                },
                Instr::Addq {
                    src: Imm(8),
                    dst: vreg("retvar"),
                },
                Instr::Retq,
            ],
        };
        p.check_form().unwrap();
        assert_eq!(p.interpret(), Ok(3));
    }

    #[test]
    fn subq_subtracts_the_source() {
        let p = Program {
            instrs: vec![
                Instr::Movq {
                    src: Imm(10),
                    dst: vreg("retvar"),
                },
                Instr::Subq {
                    src: Imm(4),
                    dst: vreg("retvar"),
                },
                Instr::Retq,
            ],
        };
        assert_eq!(p.interpret(), Ok(6));
    }

    #[test]
    fn reading_an_unwritten_register_fails() {
        let p = Program {
            instrs: vec![
                Instr::Movq {
                    src: vreg("ghost"),
                    dst: vreg("retvar"),
                },
                Instr::Retq,
            ],
        };
        assert_eq!(p.interpret(), Err(Error::VarNotDefined("ghost".into())));
    }

    #[test]
    fn check_form_wants_a_single_trailing_retq() {
        let empty = Program { instrs: vec![] };
        assert!(empty.check_form().is_err());

        let early = Program {
            instrs: vec![Instr::Retq, Instr::Retq],
        };
        assert!(early.check_form().is_err());
    }

    #[test]
    fn renders_att_syntax() {
        let p = Program {
            instrs: vec![
                Instr::Movq {
                    src: Imm(42),
                    dst: vreg("retvar"),
                },
                Instr::Retq,
            ],
        };
        assert_eq!(
            p.to_string(),
            ".global _main\n_main:\n\tmovq $42, retvar\n\tretq"
        );
    }
}
