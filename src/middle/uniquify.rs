//! Renaming pass: give every binder in the program a globally unique name.
//!
//! Every binding occurrence of a variable `x` becomes `x-vN` and every
//! function definition `f` becomes `f-fN`, where the counters N run over the
//! whole program, per namespace.  References rewrite to the rename that is in
//! scope at that point, so shadowing resolves here once and for all and no
//! later pass needs scope information.

use crate::common::{id, Error, Id, Map, Oracle, Result, Set};
use crate::front::ast::{Expr, Function, Program};

/// A program whose binders are all distinct.  Only [uniquify] produces these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueProgram(pub Program);

impl UniqueProgram {
    pub fn interpret(&self, oracle: &mut dyn Oracle) -> Result<i64> {
        self.0.interpret(oracle)
    }

    /// The surface invariants plus the one this pass establishes: syntactic
    /// equality of two bound names implies they are the same binder.
    pub fn check_form(&self) -> Result<()> {
        self.0.check_form()?;
        let mut vars = Set::new();
        let mut fnames = Set::new();
        for f in &self.0.functions {
            if !fnames.insert(f.name) {
                return Err(Error::IllFormed(format!("duplicate function name {}", f.name)));
            }
            for formal in &f.formals {
                bind(&mut vars, *formal)?;
            }
            collect_binders(&f.body, &mut vars)?;
        }
        collect_binders(&self.0.body, &mut vars)
    }
}

impl std::fmt::Display for UniqueProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn bind(seen: &mut Set<Id>, name: Id) -> Result<()> {
    if seen.insert(name) {
        Ok(())
    } else {
        Err(Error::IllFormed(format!("duplicate binder {name}")))
    }
}

fn collect_binders(expr: &Expr, seen: &mut Set<Id>) -> Result<()> {
    match expr {
        Expr::Int(_) | Expr::Read | Expr::Var(_) => Ok(()),
        Expr::Neg(e) => collect_binders(e, seen),
        Expr::Add(lhs, rhs) => {
            collect_binders(lhs, seen)?;
            collect_binders(rhs, seen)
        }
        Expr::Let { var, rhs, body } => {
            collect_binders(rhs, seen)?;
            bind(seen, *var)?;
            collect_binders(body, seen)
        }
        Expr::Call(_, args) => {
            for arg in args {
                collect_binders(arg, seen)?;
            }
            Ok(())
        }
    }
}

/// Per-namespace counters of how many renames each base name has received.
#[derive(Default)]
struct Renamer {
    vars: Map<Id, usize>,
    funs: Map<Id, usize>,
}

impl Renamer {
    fn fresh(counters: &mut Map<Id, usize>, base: Id, tag: char) -> Id {
        let n = counters.entry(base).or_insert(0);
        let fresh = id(&format!("{base}-{tag}{n}"));
        *n += 1;
        fresh
    }

    fn fresh_var(&mut self, base: Id) -> Id {
        Self::fresh(&mut self.vars, base, 'v')
    }

    fn fresh_fun(&mut self, base: Id) -> Id {
        Self::fresh(&mut self.funs, base, 'f')
    }
}

pub fn uniquify(program: &Program) -> Result<UniqueProgram> {
    let mut names = Renamer::default();

    // Function names first, so that bodies can call forward as well as
    // backward.  A duplicate definition shadows the earlier one.
    let mut fscope = Map::new();
    let mut renamed = Vec::with_capacity(program.functions.len());
    for f in &program.functions {
        let fresh = names.fresh_fun(f.name);
        fscope.insert(f.name, fresh);
        renamed.push(fresh);
    }

    let mut functions = Vec::with_capacity(program.functions.len());
    for (f, fresh) in program.functions.iter().zip(renamed) {
        let mut vscope = Map::new();
        let mut formals = Vec::with_capacity(f.formals.len());
        for formal in &f.formals {
            let unique = names.fresh_var(*formal);
            vscope.insert(*formal, unique);
            formals.push(unique);
        }
        functions.push(Function {
            name: fresh,
            formals,
            body: uniquify_expr(&f.body, &vscope, &fscope, &mut names)?,
        });
    }

    let body = uniquify_expr(&program.body, &Map::new(), &fscope, &mut names)?;
    Ok(UniqueProgram(Program { functions, body }))
}

fn uniquify_expr(
    expr: &Expr,
    vscope: &Map<Id, Id>,
    fscope: &Map<Id, Id>,
    names: &mut Renamer,
) -> Result<Expr> {
    Ok(match expr {
        Expr::Int(v) => Expr::Int(*v),
        Expr::Read => Expr::Read,
        Expr::Var(x) => Expr::Var(
            *vscope
                .get(x)
                .ok_or_else(|| Error::VarNotDefined(x.to_string()))?,
        ),
        Expr::Neg(e) => Expr::neg(uniquify_expr(e, vscope, fscope, names)?),
        Expr::Add(lhs, rhs) => Expr::add(
            uniquify_expr(lhs, vscope, fscope, names)?,
            uniquify_expr(rhs, vscope, fscope, names)?,
        ),
        Expr::Let { var, rhs, body } => {
            // The binding is renamed in the outer scope; only the body sees
            // the fresh name.
            let rhs = uniquify_expr(rhs, vscope, fscope, names)?;
            let fresh = names.fresh_var(*var);
            let mut inner = vscope.clone();
            inner.insert(*var, fresh);
            Expr::Let {
                var: fresh,
                rhs: Box::new(rhs),
                body: Box::new(uniquify_expr(body, &inner, fscope, names)?),
            }
        }
        Expr::Call(fname, args) => {
            let args = args
                .iter()
                .map(|arg| uniquify_expr(arg, vscope, fscope, names))
                .collect::<Result<Vec<_>>>()?;
            let fresh = *fscope
                .get(fname)
                .ok_or_else(|| Error::FunctionNotDefined(fname.to_string()))?;
            Expr::Call(fresh, args)
        }
    })
}
