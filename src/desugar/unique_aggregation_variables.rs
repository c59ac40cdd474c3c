//! Desugaring pass 1 of 6: within every aggregator that carries
//! a target expression, renames variables that also occur outside the
//! aggregator by appending a unique index, and links each renamed
//! occurrence back to the original with an explicit equality constraint
//! inside the aggregator body.
//!
//! A variable used both inside and outside an aggregator is a grouping
//! key (`count : { e(x, z) }` inside `out(x, n) :- e(x, y), n = ...`
//! counts, for each `x` bound outside, the matching `z`s). Once the
//! aggregator is materialised into its own relation (pass 4) that key has
//! to become an ordinary head variable of the new relation, distinct from
//! the outer `x` and joined back to it explicitly -- renaming alone would
//! silently sever the correlation, so the link is recorded as a
//! constraint rather than left implicit.

use std::collections::{HashMap, HashSet};

use crate::ir::{Argument, Clause, ConstraintOp, Literal, Program};

/// Runs the pass over every clause in `program`, threading a
/// program-wide unique counter so freshly introduced names never collide
/// across clauses.
pub fn run(program: &mut Program) {
    let mut counter: u64 = 0;
    for relation in program.relations.values_mut() {
        for clause in &mut relation.clauses {
            rewrite_clause(clause, &mut counter);
        }
    }
}

fn rewrite_clause(clause: &mut Clause, counter: &mut u64) {
    let outside_vars = clause_variable_names_excluding_aggregators(clause);

    if let Some(head) = &mut clause.head {
        for arg in &mut head.args {
            rewrite_arg(arg, &outside_vars, counter);
        }
    }
    for lit in &mut clause.body {
        rewrite_literal(lit, &outside_vars, counter);
    }
}

fn rewrite_literal(lit: &mut Literal, outside: &HashSet<String>, counter: &mut u64) {
    match lit {
        Literal::Atom(a) | Literal::Negation(a) => {
            for arg in &mut a.args {
                rewrite_arg(arg, outside, counter);
            }
        }
        Literal::Constraint { lhs, rhs, .. } => {
            rewrite_arg(lhs, outside, counter);
            rewrite_arg(rhs, outside, counter);
        }
    }
}

fn rewrite_arg(arg: &mut Argument, outside: &HashSet<String>, counter: &mut u64) {
    match arg {
        Argument::Aggregator { target, body, loc } => {
            if target.is_some() {
                *counter += 1;
                let suffix = *counter;
                let mut renamed = HashMap::new();
                if let Some(target) = target {
                    rename_clashing(target, outside, suffix, &mut renamed);
                }
                for lit in body.iter_mut() {
                    rename_clashing_literal(lit, outside, suffix, &mut renamed);
                }
                for (old, new) in renamed {
                    body.push(Literal::Constraint {
                        op: ConstraintOp::Eq,
                        lhs: Argument::variable(old, loc.clone()),
                        rhs: Argument::variable(new, loc.clone()),
                        loc: loc.clone(),
                    });
                }
            }
            // Nested functors elsewhere in the same argument still need a
            // pass (an aggregator can itself appear inside a larger
            // expression), but the target/body above are handled already.
        }
        Argument::UnaryFun { arg, .. } => rewrite_arg(arg, outside, counter),
        Argument::BinaryFun { lhs, rhs, .. } => {
            rewrite_arg(lhs, outside, counter);
            rewrite_arg(rhs, outside, counter);
        }
        Argument::TernaryFun { a, b, c, .. } => {
            rewrite_arg(a, outside, counter);
            rewrite_arg(b, outside, counter);
            rewrite_arg(c, outside, counter);
        }
        Argument::RecordInit { args, .. } => {
            for a in args {
                rewrite_arg(a, outside, counter);
            }
        }
        Argument::TypeCast { value, .. } => rewrite_arg(value, outside, counter),
        Argument::Variable { .. }
        | Argument::Unnamed { .. }
        | Argument::Counter { .. }
        | Argument::NumberConst { .. }
        | Argument::StringConst { .. }
        | Argument::NullConst { .. } => {}
    }
}

fn rename_clashing(arg: &mut Argument, outside: &HashSet<String>, suffix: u64, renamed: &mut HashMap<String, String>) {
    match arg {
        Argument::Variable { name, .. } if outside.contains(name) => {
            let fresh = renamed.entry(name.clone()).or_insert_with(|| format!("{name}__agg{suffix}")).clone();
            *name = fresh;
        }
        Argument::UnaryFun { arg, .. } => rename_clashing(arg, outside, suffix, renamed),
        Argument::BinaryFun { lhs, rhs, .. } => {
            rename_clashing(lhs, outside, suffix, renamed);
            rename_clashing(rhs, outside, suffix, renamed);
        }
        Argument::TernaryFun { a, b, c, .. } => {
            rename_clashing(a, outside, suffix, renamed);
            rename_clashing(b, outside, suffix, renamed);
            rename_clashing(c, outside, suffix, renamed);
        }
        Argument::RecordInit { args, .. } => {
            for a in args {
                rename_clashing(a, outside, suffix, renamed);
            }
        }
        Argument::TypeCast { value, .. } => rename_clashing(value, outside, suffix, renamed),
        _ => {}
    }
}

fn rename_clashing_literal(lit: &mut Literal, outside: &HashSet<String>, suffix: u64, renamed: &mut HashMap<String, String>) {
    match lit {
        Literal::Atom(a) | Literal::Negation(a) => {
            for arg in &mut a.args {
                rename_clashing(arg, outside, suffix, renamed);
            }
        }
        Literal::Constraint { lhs, rhs, .. } => {
            rename_clashing(lhs, outside, suffix, renamed);
            rename_clashing(rhs, outside, suffix, renamed);
        }
    }
}

/// Every variable name occurring in the clause head or body, not counting
/// names that only occur inside an aggregator's own target/body (those are
/// "inside" for the purposes of this pass).
fn clause_variable_names_excluding_aggregators(clause: &Clause) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut collect_arg = |arg: &Argument| collect_outside_vars(arg, &mut names);
    if let Some(head) = &clause.head {
        for arg in &head.args {
            collect_arg(arg);
        }
    }
    for lit in &clause.body {
        match lit {
            Literal::Atom(a) | Literal::Negation(a) => {
                for arg in &a.args {
                    collect_arg(arg);
                }
            }
            Literal::Constraint { lhs, rhs, .. } => {
                collect_arg(lhs);
                collect_arg(rhs);
            }
        }
    }
    names
}

fn collect_outside_vars(arg: &Argument, out: &mut HashSet<String>) {
    match arg {
        Argument::Variable { name, .. } => {
            out.insert(name.clone());
        }
        Argument::Aggregator { .. } => {
            // Aggregator internals are "inside"; do not count them here.
        }
        _ => crate::ir::visitor::walk_argument_children(arg, &mut |child| collect_outside_vars(child, out)),
    }
}
