//! Flattening pass: from nested expressions to three-address code.
//!
//! Every subexpression is compiled against a target variable that will hold
//! its value.  Compound expressions introduce derived helper names: the right
//! operand of an addition lands in `<target>-sum-rhs`, the i-th argument of a
//! call to `f` in `<f>-arg-<i>`.  The set of targets a function emits becomes
//! its `locals` declaration.

use crate::common::{id, retvar, Id, Set};
use crate::front::ast::{Expr, Program};
use crate::middle::flat;
use crate::middle::uniquify::UniqueProgram;

pub fn flatten(program: &UniqueProgram) -> flat::Program {
    let UniqueProgram(Program { functions, body }) = program;
    flat::Program {
        main: flatten_function(id("main"), &[], body),
        functions: functions
            .iter()
            .map(|f| flatten_function(f.name, &f.formals, &f.body))
            .collect(),
    }
}

fn flatten_function(name: Id, formals: &[Id], body: &Expr) -> flat::Function {
    let mut out = Pieces::default();
    flatten_expr(body, retvar(), &mut out);
    out.instrs.push(flat::Instr::Return(retvar()));
    flat::Function {
        name,
        formals: formals.to_vec(),
        locals: out.locals,
        instrs: out.instrs,
    }
}

#[derive(Default)]
struct Pieces {
    locals: Set<Id>,
    instrs: Vec<flat::Instr>,
}

impl Pieces {
    fn assign(&mut self, target: Id, rhs: flat::Rhs) {
        self.locals.insert(target);
        self.instrs.push(flat::Instr::Assign(target, rhs));
    }
}

fn flatten_expr(expr: &Expr, target: Id, out: &mut Pieces) {
    match expr {
        Expr::Int(v) => out.assign(target, flat::Rhs::Int(*v)),
        Expr::Read => out.assign(target, flat::Rhs::Read),
        Expr::Var(x) => out.assign(target, flat::Rhs::Var(*x)),
        Expr::Neg(e) => {
            flatten_expr(e, target, out);
            out.assign(target, flat::Rhs::Neg(target));
        }
        Expr::Add(lhs, rhs) => {
            let helper = id(&format!("{target}-sum-rhs"));
            flatten_expr(lhs, target, out);
            flatten_expr(rhs, helper, out);
            out.assign(target, flat::Rhs::Add(target, helper));
        }
        Expr::Let { var, rhs, body } => {
            flatten_expr(rhs, *var, out);
            flatten_expr(body, target, out);
        }
        Expr::Call(fname, args) => {
            let mut arg_names = Vec::with_capacity(args.len());
            for (i, arg) in args.iter().enumerate() {
                let arg_name = id(&format!("{fname}-arg-{i}"));
                flatten_expr(arg, arg_name, out);
                arg_names.push(arg_name);
            }
            out.assign(target, flat::Rhs::Call(*fname, arg_names));
        }
    }
}
