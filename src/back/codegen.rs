//! Code generation: instruction selection, home assignment, and patching.
//!
//! Three passes live here.  `select_instructions` maps flat assignments onto
//! virtual-register x86; `assign_homes` runs the allocator in [crate::back::alloc]
//! and rewrites virtuals to physical homes between a prologue and an
//! epilogue; `patch` removes memory-to-memory operand pairs by staging
//! through the reserved scratch register.

use crate::back::alloc::{annotate_liveness, color, get_vars, interference};
use crate::back::asm;
use crate::back::vasm::{self, retvar};
use crate::common::{Error, Id, Result, Set};
use crate::middle::flat;

/// Map a flat program onto virtual-register instructions.
///
/// Only the straight-line `main` of a read-free, call-free program has a
/// lowering; the other right-hand sides are rejected as unsupported rather
/// than silently miscompiled.
pub fn select_instructions(program: &flat::Program) -> Result<vasm::Program> {
    if !program.functions.is_empty() {
        return Err(Error::UnsupportedForm(
            "function definitions have no instruction selection".into(),
        ));
    }
    let main = &program.main;
    let mut declared: Set<Id> = main.locals.clone();
    declared.extend(main.formals.iter().copied());
    let check = |x: &Id| -> Result<vasm::Operand> {
        if declared.contains(x) {
            Ok(vasm::Operand::VReg(*x))
        } else {
            Err(Error::VarNotDeclared(x.to_string()))
        }
    };

    let mut instrs = Vec::new();
    for instr in &main.instrs {
        match instr {
            flat::Instr::Assign(dst, rhs) => {
                let dst = check(dst)?;
                match rhs {
                    flat::Rhs::Int(v) => instrs.push(vasm::Instr::Movq {
                        src: vasm::Operand::Imm(*v),
                        dst,
                    }),
                    flat::Rhs::Var(s) => instrs.push(vasm::Instr::Movq {
                        src: check(s)?,
                        dst,
                    }),
                    flat::Rhs::Neg(s) => {
                        instrs.push(vasm::Instr::Movq {
                            src: check(s)?,
                            dst,
                        });
                        instrs.push(vasm::Instr::Negq { dst });
                    }
                    flat::Rhs::Add(lhs, rhs) => {
                        // Load whichever operand already coincides with the
                        // destination first, so the other is added in place.
                        let (first, second) = if vasm::Operand::VReg(*lhs) == dst {
                            (check(lhs)?, check(rhs)?)
                        } else {
                            (check(rhs)?, check(lhs)?)
                        };
                        instrs.push(vasm::Instr::Movq { src: first, dst });
                        instrs.push(vasm::Instr::Addq { src: second, dst });
                    }
                    flat::Rhs::Read => {
                        return Err(Error::UnsupportedForm(
                            "read has no instruction selection".into(),
                        ))
                    }
                    flat::Rhs::Call(..) => {
                        return Err(Error::UnsupportedForm(
                            "call has no instruction selection".into(),
                        ))
                    }
                }
            }
            flat::Instr::Return(x) => {
                let src = check(x)?;
                if *x != retvar() {
                    instrs.push(vasm::Instr::Movq {
                        src,
                        dst: vasm::Operand::VReg(retvar()),
                    });
                }
                instrs.push(vasm::Instr::Retq);
            }
        }
    }
    Ok(vasm::Program { instrs })
}

/// Replace virtual registers with physical homes, bracketed by the frame
/// prologue and epilogue.
pub fn assign_homes(program: &vasm::Program) -> Result<asm::Program> {
    program.check_form()?;

    let vars = get_vars(&program.instrs);
    let annotated = annotate_liveness(&program.instrs);
    let graph = interference(&annotated);
    let (homes, slots) = color(&vars, &graph)?;

    // Keep the frame two-word aligned.
    let slots = slots + (slots & 1);
    let frame = asm::WORD_SIZE * slots as i64;

    let home = |op: vasm::Operand| -> Result<asm::Operand> {
        match op {
            vasm::Operand::Imm(v) => Ok(asm::Operand::Imm(v)),
            vasm::Operand::VReg(x) => homes
                .get(&x)
                .map(|h| h.operand())
                .ok_or_else(|| Error::IllFormed(format!("no home for {x}"))),
        }
    };

    let mut instrs = vec![
        asm::Instr::Pushq {
            src: asm::Operand::Reg(asm::Reg::Rbp),
        },
        asm::Instr::Movq {
            src: asm::Operand::Reg(asm::Reg::Rsp),
            dst: asm::Operand::Reg(asm::Reg::Rbp),
        },
        asm::Instr::Subq {
            src: asm::Operand::Imm(frame),
            dst: asm::Operand::Reg(asm::Reg::Rsp),
        },
    ];
    // check_form put the single retq last; everything before it is rewritten.
    for instr in &program.instrs[..program.instrs.len() - 1] {
        instrs.push(match instr {
            vasm::Instr::Movq { src, dst } => asm::Instr::Movq {
                src: home(*src)?,
                dst: home(*dst)?,
            },
            vasm::Instr::Addq { src, dst } => asm::Instr::Addq {
                src: home(*src)?,
                dst: home(*dst)?,
            },
            vasm::Instr::Subq { src, dst } => asm::Instr::Subq {
                src: home(*src)?,
                dst: home(*dst)?,
            },
            vasm::Instr::Negq { dst } => asm::Instr::Negq { dst: home(*dst)? },
            vasm::Instr::Retq => {
                return Err(Error::IllFormed("retq before the last instruction".into()))
            }
        });
    }
    instrs.extend([
        asm::Instr::Addq {
            src: asm::Operand::Imm(frame),
            dst: asm::Operand::Reg(asm::Reg::Rsp),
        },
        asm::Instr::Popq {
            dst: asm::Operand::Reg(asm::Reg::Rbp),
        },
        asm::Instr::Retq,
    ]);
    Ok(asm::Program { instrs })
}

/// Stage memory-to-memory binary instructions through `%r15`.
pub fn patch(program: &asm::Program) -> asm::Program {
    let scratch = asm::Operand::Reg(asm::Reg::R15);
    let mut instrs = Vec::with_capacity(program.instrs.len());
    for instr in &program.instrs {
        match *instr {
            asm::Instr::Movq { src, dst } if src.is_mem() && dst.is_mem() => {
                instrs.push(asm::Instr::Movq { src, dst: scratch });
                instrs.push(asm::Instr::Movq { src: scratch, dst });
            }
            asm::Instr::Addq { src, dst } if src.is_mem() && dst.is_mem() => {
                instrs.push(asm::Instr::Movq { src, dst: scratch });
                instrs.push(asm::Instr::Addq { src: scratch, dst });
            }
            asm::Instr::Subq { src, dst } if src.is_mem() && dst.is_mem() => {
                instrs.push(asm::Instr::Movq { src, dst: scratch });
                instrs.push(asm::Instr::Subq { src: scratch, dst });
            }
            ref other => instrs.push(other.clone()),
        }
    }
    asm::Program { instrs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::middle::flat::{Instr, Rhs};

    fn main_only(locals: &[&str], instrs: Vec<Instr>) -> flat::Program {
        flat::Program {
            main: flat::Function {
                name: id("main"),
                formals: vec![],
                locals: locals.iter().map(|s| id(s)).collect(),
                instrs,
            },
            functions: vec![],
        }
    }

    fn vreg(name: &str) -> vasm::Operand {
        vasm::Operand::VReg(id(name))
    }

    #[test]
    fn literals_select_to_movq() {
        let p = main_only(
            &["retvar"],
            vec![
                Instr::Assign(id("retvar"), Rhs::Int(42)),
                Instr::Return(id("retvar")),
            ],
        );
        let virt = select_instructions(&p).unwrap();
        assert_eq!(
            virt.instrs,
            vec![
                vasm::Instr::Movq {
                    src: vasm::Operand::Imm(42),
                    dst: vreg("retvar"),
                },
                vasm::Instr::Retq,
            ]
        );
    }

    #[test]
    fn return_of_another_variable_moves_into_retvar() {
        let p = main_only(
            &["retvar", "t"],
            vec![Instr::Assign(id("t"), Rhs::Int(1)), Instr::Return(id("t"))],
        );
        let virt = select_instructions(&p).unwrap();
        assert_eq!(
            virt.instrs[1],
            vasm::Instr::Movq {
                src: vreg("t"),
                dst: vreg("retvar"),
            }
        );
    }

    #[test]
    fn addition_loads_the_destination_operand_first() {
        // t := t + u keeps t in place ...
        let p = main_only(
            &["retvar", "t", "u"],
            vec![
                Instr::Assign(id("t"), Rhs::Int(1)),
                Instr::Assign(id("u"), Rhs::Int(2)),
                Instr::Assign(id("t"), Rhs::Add(id("t"), id("u"))),
                Instr::Return(id("t")),
            ],
        );
        let virt = select_instructions(&p).unwrap();
        assert_eq!(
            virt.instrs[2..4],
            [
                vasm::Instr::Movq {
                    src: vreg("t"),
                    dst: vreg("t"),
                },
                vasm::Instr::Addq {
                    src: vreg("u"),
                    dst: vreg("t"),
                },
            ]
        );

        // ... and d := t + d loads d (the rhs) first, adding t in place.
        let p = main_only(
            &["retvar", "t", "d"],
            vec![
                Instr::Assign(id("t"), Rhs::Int(1)),
                Instr::Assign(id("d"), Rhs::Int(2)),
                Instr::Assign(id("d"), Rhs::Add(id("t"), id("d"))),
                Instr::Return(id("d")),
            ],
        );
        let virt = select_instructions(&p).unwrap();
        assert_eq!(
            virt.instrs[2..4],
            [
                vasm::Instr::Movq {
                    src: vreg("d"),
                    dst: vreg("d"),
                },
                vasm::Instr::Addq {
                    src: vreg("t"),
                    dst: vreg("d"),
                },
            ]
        );
    }

    #[test]
    fn unsupported_right_hand_sides_are_reported() {
        let read = main_only(
            &["retvar"],
            vec![
                Instr::Assign(id("retvar"), Rhs::Read),
                Instr::Return(id("retvar")),
            ],
        );
        assert!(matches!(
            select_instructions(&read),
            Err(Error::UnsupportedForm(_))
        ));

        let call = main_only(
            &["retvar"],
            vec![
                Instr::Assign(id("retvar"), Rhs::Call(id("f"), vec![])),
                Instr::Return(id("retvar")),
            ],
        );
        assert!(matches!(
            select_instructions(&call),
            Err(Error::UnsupportedForm(_))
        ));
    }

    #[test]
    fn undeclared_operands_are_reported() {
        let p = main_only(
            &["retvar"],
            vec![
                Instr::Assign(id("retvar"), Rhs::Var(id("ghost"))),
                Instr::Return(id("retvar")),
            ],
        );
        assert_eq!(
            select_instructions(&p),
            Err(Error::VarNotDeclared("ghost".into()))
        );
    }

    #[test]
    fn assign_homes_brackets_with_prologue_and_epilogue() {
        let virt = vasm::Program {
            instrs: vec![
                vasm::Instr::Movq {
                    src: vasm::Operand::Imm(42),
                    dst: vreg("retvar"),
                },
                vasm::Instr::Retq,
            ],
        };
        let mem = assign_homes(&virt).unwrap();
        mem.check_form().unwrap();
        let rsp = asm::Operand::Reg(asm::Reg::Rsp);
        let rbp = asm::Operand::Reg(asm::Reg::Rbp);
        assert_eq!(
            mem.instrs,
            vec![
                asm::Instr::Pushq { src: rbp },
                asm::Instr::Movq { src: rsp, dst: rbp },
                asm::Instr::Subq {
                    src: asm::Operand::Imm(0),
                    dst: rsp,
                },
                asm::Instr::Movq {
                    src: asm::Operand::Imm(42),
                    dst: asm::Operand::Reg(asm::Reg::Rax),
                },
                asm::Instr::Addq {
                    src: asm::Operand::Imm(0),
                    dst: rsp,
                },
                asm::Instr::Popq { dst: rbp },
                asm::Instr::Retq,
            ]
        );
        assert_eq!(mem.interpret(), Ok(42));
    }

    #[test]
    fn frames_are_padded_to_an_even_slot_count() {
        // A 13-clique forces exactly one spill; the frame must round up to
        // two slots.
        let mut instrs = Vec::new();
        let names: Vec<Id> = (0..13).map(|i| id(&format!("t{i:02}"))).collect();
        for (i, name) in names.iter().enumerate() {
            instrs.push(vasm::Instr::Movq {
                src: vasm::Operand::Imm(i as i64),
                dst: vasm::Operand::VReg(*name),
            });
        }
        instrs.push(vasm::Instr::Movq {
            src: vasm::Operand::Imm(0),
            dst: vreg("retvar"),
        });
        for name in &names {
            instrs.push(vasm::Instr::Addq {
                src: vasm::Operand::VReg(*name),
                dst: vreg("retvar"),
            });
        }
        instrs.push(vasm::Instr::Retq);
        let mem = assign_homes(&vasm::Program { instrs }).unwrap();
        assert!(mem.instrs.contains(&asm::Instr::Subq {
            src: asm::Operand::Imm(2 * asm::WORD_SIZE),
            dst: asm::Operand::Reg(asm::Reg::Rsp),
        }));
        assert_eq!(mem.interpret(), Ok((0..13).sum()));
    }

    #[test]
    fn patch_splits_memory_to_memory_pairs() {
        let a = asm::Operand::Addr {
            base: asm::Reg::Rbp,
            offset: -8,
        };
        let b = asm::Operand::Addr {
            base: asm::Reg::Rbp,
            offset: -16,
        };
        let p = asm::Program {
            instrs: vec![
                asm::Instr::Movq { src: a, dst: b },
                asm::Instr::Addq { src: b, dst: a },
                asm::Instr::Retq,
            ],
        };
        let patched = patch(&p);
        patched.check_patched().unwrap();
        let scratch = asm::Operand::Reg(asm::Reg::R15);
        assert_eq!(
            patched.instrs,
            vec![
                asm::Instr::Movq { src: a, dst: scratch },
                asm::Instr::Movq { src: scratch, dst: b },
                asm::Instr::Movq { src: b, dst: scratch },
                asm::Instr::Addq { src: scratch, dst: a },
                asm::Instr::Retq,
            ]
        );
    }

    #[test]
    fn patch_leaves_single_memory_operands_alone() {
        let slot = asm::Operand::Addr {
            base: asm::Reg::Rbp,
            offset: -8,
        };
        let p = asm::Program {
            instrs: vec![
                asm::Instr::Movq {
                    src: asm::Operand::Imm(3),
                    dst: slot,
                },
                asm::Instr::Negq { dst: slot },
                asm::Instr::Movq {
                    src: slot,
                    dst: asm::Operand::Reg(asm::Reg::Rax),
                },
                asm::Instr::Retq,
            ],
        };
        assert_eq!(patch(&p), p);
    }
}
