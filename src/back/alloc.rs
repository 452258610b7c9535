//! The register-allocation core: liveness analysis, interference graph, and
//! graph coloring by saturation.
//!
//! Two virtual registers interfere when one is defined at a point where the
//! other is live, with one exception: the definition of a `movq` does not
//! interfere with its own source, since both hold the same value and may
//! share a home.  Coloring walks the variables largest-saturation-first
//! (ties broken by name, so the order is deterministic), handing each one
//! the first palette register its neighbors have not claimed, or the next
//! stack slot when the palette is exhausted.

use std::cmp::Reverse;

use derive_more::Display;

use crate::back::asm::{Operand, Reg, WORD_SIZE};
use crate::back::vasm::{self, retvar};
use crate::common::{Error, Id, Map, Result, Set};

/// Registers handed out by the allocator, in the order they are tried.
///
/// `%rax` is pinned to the return value, `%rsp`/`%rbp` address the frame,
/// and `%r15` is the scratch register of the patch pass; none of the four
/// may appear here.
pub const PALETTE: [Reg; 12] = [
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::Rbx,
    Reg::Rcx,
    Reg::Rdx,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
];

/// The physical location assigned to a virtual register.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum Home {
    #[display("{_0}")]
    Reg(Reg),
    #[display("stack slot {_0}")]
    Slot(usize),
}

impl Home {
    /// The operand this home denotes.  Slot `i` lives at `-8i(%rbp)`.
    pub fn operand(self) -> Operand {
        match self {
            Home::Reg(r) => Operand::Reg(r),
            Home::Slot(i) => Operand::Addr {
                base: Reg::Rbp,
                offset: -WORD_SIZE * i as i64,
            },
        }
    }
}

/// Every virtual register mentioned by the instructions.
pub fn get_vars(instrs: &[vasm::Instr]) -> Set<Id> {
    let mut out = Set::new();
    for instr in instrs {
        for op in [instr.src(), instr.dst()].into_iter().flatten() {
            if let Some(x) = op.vreg() {
                out.insert(x);
            }
        }
    }
    out
}

/// Annotate each instruction with the set of virtual registers live after it.
///
/// The walk is backward.  `retq` makes `retvar` live; a `movq` kills its
/// destination and makes its source live; the arithmetic instructions both
/// use and define their destination, so it stays live across them.
pub fn annotate_liveness(instrs: &[vasm::Instr]) -> Vec<(vasm::Instr, Set<Id>)> {
    let mut live: Set<Id> = Set::new();
    let mut out = Vec::with_capacity(instrs.len());
    for instr in instrs.iter().rev() {
        out.push((instr.clone(), live.clone()));
        match instr {
            vasm::Instr::Retq => {
                live.insert(retvar());
            }
            vasm::Instr::Movq { src, dst } => {
                if let Some(d) = dst.vreg() {
                    live.remove(&d);
                }
                if let Some(s) = src.vreg() {
                    live.insert(s);
                }
            }
            vasm::Instr::Addq { src, dst } | vasm::Instr::Subq { src, dst } => {
                if let Some(d) = dst.vreg() {
                    live.insert(d);
                }
                if let Some(s) = src.vreg() {
                    live.insert(s);
                }
            }
            vasm::Instr::Negq { dst } => {
                if let Some(d) = dst.vreg() {
                    live.insert(d);
                }
            }
        }
    }
    out.reverse();
    out
}

/// An undirected graph over virtual registers, kept as an adjacency map.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    edges: Map<Id, Set<Id>>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn add_node(&mut self, node: Id) {
        self.edges.entry(node).or_default();
    }

    pub fn add_edge(&mut self, a: Id, b: Id) {
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    pub fn neighbors(&self, node: Id) -> impl Iterator<Item = Id> + '_ {
        self.edges.get(&node).into_iter().flatten().copied()
    }

    pub fn interferes(&self, a: Id, b: Id) -> bool {
        self.edges.get(&a).is_some_and(|ns| ns.contains(&b))
    }
}

/// Build the interference graph from liveness-annotated instructions.
pub fn interference(annotated: &[(vasm::Instr, Set<Id>)]) -> Graph {
    let mut graph = Graph::new();
    for (instr, live_after) in annotated {
        match instr {
            // A move's destination may share a home with its source.
            vasm::Instr::Movq { src, dst } => {
                if let Some(d) = dst.vreg() {
                    graph.add_node(d);
                    for v in live_after {
                        if *v != d && Some(*v) != src.vreg() {
                            graph.add_edge(d, *v);
                        }
                    }
                }
            }
            vasm::Instr::Addq { dst, .. }
            | vasm::Instr::Subq { dst, .. }
            | vasm::Instr::Negq { dst } => {
                if let Some(d) = dst.vreg() {
                    graph.add_node(d);
                    for v in live_after {
                        if *v != d {
                            graph.add_edge(d, *v);
                        }
                    }
                }
            }
            vasm::Instr::Retq => {}
        }
    }
    graph
}

/// Color the variables with homes.  Returns the home map and the number of
/// stack slots used.
///
/// `retvar` goes to `%rax` first and seeds the saturation of its neighbors;
/// after that, variables are picked largest-saturation-first.  Stack slots
/// are handed out sequentially and never reused, so they need not enter the
/// saturation sets.
pub fn color(vars: &Set<Id>, graph: &Graph) -> Result<(Map<Id, Home>, usize)> {
    let rv = retvar();
    if !vars.contains(&rv) {
        return Err(Error::IllFormed("program never defines retvar".into()));
    }

    let mut saturation: Map<Id, Set<Home>> = vars.iter().map(|v| (*v, Set::new())).collect();
    let mut homes: Map<Id, Home> = Map::new();

    homes.insert(rv, Home::Reg(Reg::Rax));
    for neighbor in graph.neighbors(rv) {
        if let Some(sat) = saturation.get_mut(&neighbor) {
            sat.insert(Home::Reg(Reg::Rax));
        }
    }

    let mut pending: Set<Id> = vars.iter().copied().filter(|v| *v != rv).collect();
    let mut slots = 0;
    loop {
        let next = match pending
            .iter()
            .max_by_key(|v| (saturation[*v].len(), Reverse(**v)))
        {
            Some(v) => *v,
            None => break,
        };
        pending.remove(&next);

        let choice = {
            let taken = &saturation[&next];
            PALETTE
                .iter()
                .copied()
                .map(Home::Reg)
                .find(|home| !taken.contains(home))
        };
        let home = match choice {
            Some(home) => {
                for neighbor in graph.neighbors(next) {
                    if let Some(sat) = saturation.get_mut(&neighbor) {
                        sat.insert(home);
                    }
                }
                home
            }
            None => {
                slots += 1;
                Home::Slot(slots)
            }
        };
        homes.insert(next, home);
    }
    Ok((homes, slots))
}
