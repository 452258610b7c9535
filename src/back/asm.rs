//! The x86-64 backend form.
//!
//! This module covers the last two shapes a program takes: the
//! post-allocation form, where every operand is a physical register or a
//! frame slot, and the patched form, where additionally no binary
//! instruction touches memory twice.  Both share the types here; the patched
//! form is the subset accepted by [Program::check_patched].
//!
//! # Call stack frame
//!
//! The stack grows down, and frames stay aligned to two words.  A compiled
//! program has exactly one frame, laid out by the prologue:
//!
//! ```txt
//!
//!   High memory addresses
//!
//!   +-------------------------+
//!   | Saved frame pointer     | <- Current frame pointer (%rbp)
//!   +-------------------------+
//!   | Spilled variables       |
//!   |   [%rbp - 8], ...       |
//!   +-------------------------+ <- Stack pointer (%rsp)
//!
//!   Low memory addresses
//! ```
//!
//! - The prologue pushes `%rbp`, makes it point at the saved copy, and then
//!   drops `%rsp` by the (padded) spill area.
//! - The epilogue undoes both steps and returns with the result in `%rax`.
//!
//! # Registers
//!
//! All sixteen general-purpose registers exist in the register file, but
//! four never hold program variables: `%rsp` and `%rbp` address the frame,
//! `%rax` is reserved for the return value, and `%r15` is the scratch
//! register of the patch pass.
//!
//! # Evaluation
//!
//! The evaluator models a register file and a small bounded memory of
//! word-sized cells.  `pushq`/`popq` move `%rsp` by one word and access the
//! cell it points at.  Reading a register or cell that was never written is
//! an error, as is any unaligned or out-of-range address; both would be
//! silent garbage on a real machine.

use std::fmt;

use derive_more::Display;

use crate::common::{Error, Map, Result};

/// Word and pointer size for this processor
pub const WORD_SIZE: i64 = 8;

/// Bytes of simulated stack available to the evaluator.
const STACK_SPACE: i64 = 1 << 12;

/// The x86-64 general-purpose registers, in register-file order.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Reg {
    #[display("%rsp")]
    Rsp,
    #[display("%rbp")]
    Rbp,
    #[display("%rax")]
    Rax,
    #[display("%rbx")]
    Rbx,
    #[display("%rcx")]
    Rcx,
    #[display("%rdx")]
    Rdx,
    #[display("%rsi")]
    Rsi,
    #[display("%rdi")]
    Rdi,
    #[display("%r8")]
    R8,
    #[display("%r9")]
    R9,
    #[display("%r10")]
    R10,
    #[display("%r11")]
    R11,
    #[display("%r12")]
    R12,
    #[display("%r13")]
    R13,
    #[display("%r14")]
    R14,
    #[display("%r15")]
    R15,
}

/// Locations an instruction can name: immediates, registers, and memory at
/// a fixed offset from a base register.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operand {
    #[display("${_0}")]
    Imm(i64),
    #[display("{_0}")]
    Reg(Reg),
    #[display("{offset}({base})")]
    Addr { base: Reg, offset: i64 },
}

impl Operand {
    /// Is this operand a memory reference?
    pub fn is_mem(self) -> bool {
        matches!(self, Operand::Addr { .. })
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
    #[display("pushq {src}")]
    Pushq { src: Operand },
    #[display("popq {dst}")]
    Popq { dst: Operand },
    #[display("retq")]
    Retq,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub instrs: Vec<Instr>,
}

impl Program {
    /// Run the program; the result is whatever `%rax` holds at `retq`.
    pub fn interpret(&self) -> Result<i64> {
        let mut machine = Machine::new();
        for instr in &self.instrs {
            match instr {
                Instr::Retq => return machine.reg(Reg::Rax),
                Instr::Movq { src, dst } => {
                    let value = machine.value(*src)?;
                    machine.write(*dst, value)?;
                }
                Instr::Addq { src, dst } => {
                    let value = machine.value(*dst)?.wrapping_add(machine.value(*src)?);
                    machine.write(*dst, value)?;
                }
                Instr::Subq { src, dst } => {
                    let value = machine.value(*dst)?.wrapping_sub(machine.value(*src)?);
                    machine.write(*dst, value)?;
                }
                Instr::Negq { dst } => {
                    let value = machine.value(*dst)?.wrapping_neg();
                    machine.write(*dst, value)?;
                }
                Instr::Pushq { src } => {
                    let value = machine.value(*src)?;
                    let sp = machine.reg(Reg::Rsp)? - WORD_SIZE;
                    machine.set_reg(Reg::Rsp, sp);
                    machine.store(sp, value)?;
                }
                Instr::Popq { dst } => {
                    let sp = machine.reg(Reg::Rsp)?;
                    let value = machine.load(sp)?;
                    machine.write(*dst, value)?;
                    machine.set_reg(Reg::Rsp, sp + WORD_SIZE);
                }
            }
        }
        Err(Error::IllFormed("program did not execute retq".into()))
    }

    /// Structural well-formedness: a single trailing `retq` and no writes to
    /// immediates.
    pub fn check_form(&self) -> Result<()> {
        match self.instrs.last() {
            Some(Instr::Retq) => {}
            _ => return Err(Error::IllFormed("program does not end in retq".into())),
        }
        for instr in &self.instrs[..self.instrs.len() - 1] {
            let dst = match instr {
                Instr::Retq => {
                    return Err(Error::IllFormed("retq before the last instruction".into()))
                }
                Instr::Pushq { .. } => continue,
                Instr::Movq { dst, .. }
                | Instr::Addq { dst, .. }
                | Instr::Subq { dst, .. }
                | Instr::Negq { dst }
                | Instr::Popq { dst } => dst,
            };
            if matches!(dst, Operand::Imm(_)) {
                return Err(Error::IllFormed(format!("immediate destination in {instr}")));
            }
        }
        Ok(())
    }

    /// The additional invariant established by the patch pass: no binary
    /// instruction has two memory operands.
    pub fn check_patched(&self) -> Result<()> {
        self.check_form()?;
        for instr in &self.instrs {
            if let Instr::Movq { src, dst } | Instr::Addq { src, dst } | Instr::Subq { src, dst } =
                instr
            {
                if src.is_mem() && dst.is_mem() {
                    return Err(Error::IllFormed(format!(
                        "memory-to-memory operands in {instr}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Register file plus bounded memory; the machine the evaluator runs on.
struct Machine {
    regs: Map<Reg, i64>,
    mem: Map<i64, i64>,
}

impl Machine {
    fn new() -> Self {
        let mut regs = Map::new();
        regs.insert(Reg::Rsp, STACK_SPACE);
        regs.insert(Reg::Rbp, STACK_SPACE);
        Machine {
            regs,
            mem: Map::new(),
        }
    }

    fn reg(&self, r: Reg) -> Result<i64> {
        self.regs
            .get(&r)
            .copied()
            .ok_or_else(|| Error::VarNotDefined(r.to_string()))
    }

    fn set_reg(&mut self, r: Reg, value: i64) {
        self.regs.insert(r, value);
    }

    fn check_addr(addr: i64) -> Result<i64> {
        if addr < 0 || addr >= STACK_SPACE || addr % WORD_SIZE != 0 {
            Err(Error::IllFormed(format!("bad memory address {addr}")))
        } else {
            Ok(addr)
        }
    }

    fn load(&self, addr: i64) -> Result<i64> {
        self.mem
            .get(&Self::check_addr(addr)?)
            .copied()
            .ok_or_else(|| Error::VarNotDefined(format!("memory at {addr}")))
    }

    fn store(&mut self, addr: i64, value: i64) -> Result<()> {
        self.mem.insert(Self::check_addr(addr)?, value);
        Ok(())
    }

    fn value(&self, op: Operand) -> Result<i64> {
        match op {
            Operand::Imm(v) => Ok(v),
            Operand::Reg(r) => self.reg(r),
            Operand::Addr { base, offset } => self.load(self.reg(base)? + offset),
        }
    }

    fn write(&mut self, op: Operand, value: i64) -> Result<()> {
        match op {
            Operand::Imm(_) => Err(Error::IllFormed("immediate destination".into())),
            Operand::Reg(r) => {
                self.set_reg(r, value);
                Ok(())
            }
            Operand::Addr { base, offset } => {
                let addr = self.reg(base)? + offset;
                self.store(addr, value)
            }
        }
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
