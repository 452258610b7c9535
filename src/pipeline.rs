//! The compilation pipeline.
//!
//! Passes run in a fixed order, each consuming the previous intermediate
//! form:
//!
//! | pass                | from        | to          |
//! |---------------------|-------------|-------------|
//! | uniquify            | surface ast | unique ast  |
//! | flatten             | unique ast  | flat        |
//! | select instructions | flat        | virtual x86 |
//! | assign homes        | virtual x86 | physical x86|
//! | patch               | physical    | patched x86 |
//!
//! Each output is checked for well-formedness before the next pass runs.
//! [Pipeline::run] keeps every intermediate that was produced before a
//! failure, which is what the differential test harness evaluates.

use crate::back::{assign_homes, asm, patch, select_instructions, vasm};
use crate::common::{Error, Result};
use crate::front::ast;
use crate::front::parse;
use crate::middle::{flat, flatten, uniquify, UniqueProgram};

/// Every intermediate form produced for one source program.  Stages after
/// the first failed pass are `None`.
#[derive(Clone, Debug)]
pub struct Pipeline {
    pub ast: ast::Program,
    pub uniq: Option<UniqueProgram>,
    pub flat: Option<flat::Program>,
    pub virt: Option<vasm::Program>,
    pub mem: Option<asm::Program>,
    pub patched: Option<asm::Program>,
}

impl Pipeline {
    /// Run all passes, retaining partial results.  Returns the stages
    /// together with the first error, if any pass failed.
    pub fn run(ast: ast::Program) -> (Pipeline, Option<Error>) {
        let mut stages = Pipeline {
            ast,
            uniq: None,
            flat: None,
            virt: None,
            mem: None,
            patched: None,
        };
        let error = Self::fill(&mut stages);
        (stages, error.err())
    }

    fn fill(stages: &mut Pipeline) -> Result<()> {
        stages.ast.check_form()?;

        let uniq = uniquify(&stages.ast)?;
        uniq.check_form()?;
        stages.uniq = Some(uniq.clone());

        let flat = flatten(&uniq);
        flat.check_form()?;
        stages.flat = Some(flat.clone());

        let virt = select_instructions(&flat)?;
        virt.check_form()?;
        stages.virt = Some(virt.clone());

        let mem = assign_homes(&virt)?;
        mem.check_form()?;
        stages.mem = Some(mem.clone());

        let patched = patch(&mem);
        patched.check_patched()?;
        stages.patched = Some(patched);
        Ok(())
    }
}

/// Compile a surface program all the way down, or report the first error.
pub fn compile(program: ast::Program) -> Result<asm::Program> {
    let (stages, error) = Pipeline::run(program);
    match error {
        Some(e) => Err(e),
        None => stages
            .patched
            .ok_or_else(|| Error::IllFormed("pipeline stopped early".into())),
    }
}

/// Compile source text to assembly text.
pub fn compile_source(source: &str) -> Result<String> {
    let program = parse(source).map_err(|e| Error::Parse(e.to_string()))?;
    Ok(compile(program)?.to_string())
}
