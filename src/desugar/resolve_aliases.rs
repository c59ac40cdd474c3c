//! Desugaring pass 2 of 6: per clause, collects equality
//! constraints, computes a most-general unifier by standard unification,
//! applies the resulting substitution to the whole clause, drops
//! constraints of the form `t = t`, and lifts every non-variable functor
//! argument occurring directly inside an atom into a fresh auxiliary
//! variable with an explicit equality constraint.
//!
//! Unification handles variable/variable, variable/term with an
//! occurs-check, and record/record by pointwise decomposition; a clash
//! between two distinct literal terms is left unresolved rather than
//! treated as an error here (later checking passes catch genuine type
//! mismatches).

use std::collections::{HashMap, VecDeque};

use crate::ir::{Argument, Clause, ConstraintOp, Literal, Program};
use crate::loc::SourceLocation;

pub fn run(program: &mut Program) {
    let mut lift_counter: u64 = 0;
    for relation in program.relations.values_mut() {
        for clause in &mut relation.clauses {
            unify_clause(clause);
            lift_clause(clause, &mut lift_counter);
        }
    }
}

/// Runs unification to a fixpoint and rewrites `clause` in place; idempotent
///.
fn unify_clause(clause: &mut Clause) {
    let ranks = var_ranks(clause);

    let mut worklist: VecDeque<(Argument, Argument)> = VecDeque::new();
    for lit in &clause.body {
        if let Literal::Constraint { op: ConstraintOp::Eq, lhs, rhs, .. } = lit {
            worklist.push_back((lhs.clone(), rhs.clone()));
        }
    }

    let mut subst: HashMap<String, Argument> = HashMap::new();
    while let Some((l, r)) = worklist.pop_front() {
        let l = apply_subst(&l, &subst);
        let r = apply_subst(&r, &subst);
        if l == r {
            continue;
        }
        match (&l, &r) {
            // Between two variables, keep whichever occurs earlier in the
            // clause (its declaring atom, or failing that an earlier
            // equality) as the representative, and bind the other to it --
            // this is what makes `p(a,b) :- p(x,y), r=[x,y], s=r, ...`
            // collapse onto the body's `x`/`y` rather than the head's `a`/
            // `b`.
            (Argument::Variable { name: ln, .. }, Argument::Variable { name: rn, .. }) => {
                if rank_of(&ranks, ln) <= rank_of(&ranks, rn) {
                    subst.insert(rn.clone(), l.clone());
                } else {
                    subst.insert(ln.clone(), r.clone());
                }
            }
            (Argument::Variable { name, .. }, _) if !occurs(name, &r) => {
                subst.insert(name.clone(), r);
            }
            (_, Argument::Variable { name, .. }) if !occurs(name, &l) => {
                subst.insert(name.clone(), l);
            }
            (Argument::RecordInit { args: a, .. }, Argument::RecordInit { args: b, .. }) if a.len() == b.len() => {
                for (x, y) in a.iter().zip(b.iter()) {
                    worklist.push_back((x.clone(), y.clone()));
                }
            }
            _ => {
                // literal clash (e.g. two distinct constants, or an occurs-
                // check failure): leave unresolved, matching the source's
                // "literal clashes skipped" behaviour.
            }
        }
    }

    if let Some(head) = &mut clause.head {
        for arg in &mut head.args {
            *arg = apply_subst(arg, &subst);
        }
    }
    for lit in clause.body.iter_mut() {
        apply_subst_literal(lit, &subst);
    }
    clause.body.retain(|lit| !is_trivial_equality(lit));
}

/// First-occurrence index of every variable name in `clause`, scanned in
/// preference order: positive/negative body atoms first (so a variable
/// bound by an atom outranks one only ever seen in an equality chain or the
/// head), then the body's equality constraints, then the head.
fn var_ranks(clause: &Clause) -> HashMap<String, usize> {
    let mut ranks = HashMap::new();
    let mut next = 0usize;
    let mut note = |arg: &Argument, ranks: &mut HashMap<String, usize>| {
        crate::ir::visitor::walk_argument_pre(arg, &mut |a| {
            if let Argument::Variable { name, .. } = a {
                ranks.entry(name.clone()).or_insert_with(|| {
                    let r = next;
                    next += 1;
                    r
                });
            }
        });
    };
    for lit in &clause.body {
        if let Literal::Atom(a) | Literal::Negation(a) = lit {
            for arg in &a.args {
                note(arg, &mut ranks);
            }
        }
    }
    for lit in &clause.body {
        if let Literal::Constraint { lhs, rhs, .. } = lit {
            note(lhs, &mut ranks);
            note(rhs, &mut ranks);
        }
    }
    if let Some(head) = &clause.head {
        for arg in &head.args {
            note(arg, &mut ranks);
        }
    }
    ranks
}

/// Variables that never got ranked (shouldn't happen for a well-formed
/// clause) sort last, so they never win over a ranked variable.
fn rank_of(ranks: &HashMap<String, usize>, name: &str) -> usize {
    ranks.get(name).copied().unwrap_or(usize::MAX)
}

fn is_trivial_equality(lit: &Literal) -> bool {
    matches!(lit, Literal::Constraint { op: ConstraintOp::Eq, lhs, rhs, .. } if lhs == rhs)
}

fn occurs(name: &str, arg: &Argument) -> bool {
    let mut found = false;
    crate::ir::visitor::walk_argument_pre(arg, &mut |a| {
        if let Argument::Variable { name: n, .. } = a {
            if n == name {
                found = true;
            }
        }
    });
    found
}

fn apply_subst(arg: &Argument, subst: &HashMap<String, Argument>) -> Argument {
    match arg {
        Argument::Variable { name, .. } => match subst.get(name) {
            Some(bound) => apply_subst(bound, subst),
            None => arg.clone(),
        },
        Argument::UnaryFun { op, arg: inner, loc } => Argument::UnaryFun {
            op: *op,
            arg: Box::new(apply_subst(inner, subst)),
            loc: loc.clone(),
        },
        Argument::BinaryFun { op, lhs, rhs, loc } => Argument::BinaryFun {
            op: *op,
            lhs: Box::new(apply_subst(lhs, subst)),
            rhs: Box::new(apply_subst(rhs, subst)),
            loc: loc.clone(),
        },
        Argument::TernaryFun { op, a, b, c, loc } => Argument::TernaryFun {
            op: op.clone(),
            a: Box::new(apply_subst(a, subst)),
            b: Box::new(apply_subst(b, subst)),
            c: Box::new(apply_subst(c, subst)),
            loc: loc.clone(),
        },
        Argument::RecordInit { args, loc } => Argument::RecordInit {
            args: args.iter().map(|a| apply_subst(a, subst)).collect(),
            loc: loc.clone(),
        },
        Argument::TypeCast { value, type_name, loc } => Argument::TypeCast {
            value: Box::new(apply_subst(value, subst)),
            type_name: type_name.clone(),
            loc: loc.clone(),
        },
        Argument::Aggregator { op, target, body, loc } => Argument::Aggregator {
            op: *op,
            target: target.as_ref().map(|t| Box::new(apply_subst(t, subst))),
            body: body.iter().map(|l| apply_subst_literal_owned(l, subst)).collect(),
            loc: loc.clone(),
        },
        other @ (Argument::Unnamed { .. }
        | Argument::Counter { .. }
        | Argument::NumberConst { .. }
        | Argument::StringConst { .. }
        | Argument::NullConst { .. }) => other.clone(),
    }
}

fn apply_subst_literal(lit: &mut Literal, subst: &HashMap<String, Argument>) {
    match lit {
        Literal::Atom(a) | Literal::Negation(a) => {
            for arg in &mut a.args {
                *arg = apply_subst(arg, subst);
            }
        }
        Literal::Constraint { lhs, rhs, .. } => {
            *lhs = apply_subst(lhs, subst);
            *rhs = apply_subst(rhs, subst);
        }
    }
}

fn apply_subst_literal_owned(lit: &Literal, subst: &HashMap<String, Argument>) -> Literal {
    let mut lit = lit.clone();
    apply_subst_literal(&mut lit, subst);
    lit
}

/// Lifts every non-variable functor argument (and every record-init that is
/// not purely constant) occurring directly as an atom argument into a fresh
/// variable, leaving an explicit equality constraint in its place.
fn lift_clause(clause: &mut Clause, counter: &mut u64) {
    let mut new_constraints = Vec::new();
    if let Some(head) = &mut clause.head {
        for arg in &mut head.args {
            lift_arg(arg, &mut new_constraints, counter);
        }
    }
    for lit in clause.body.iter_mut() {
        if let Literal::Atom(a) | Literal::Negation(a) = lit {
            for arg in &mut a.args {
                lift_arg(arg, &mut new_constraints, counter);
            }
        }
    }
    clause.body.extend(new_constraints);
}

fn is_liftable(arg: &Argument) -> bool {
    match arg {
        Argument::UnaryFun { .. } | Argument::BinaryFun { .. } | Argument::TernaryFun { .. } | Argument::TypeCast { .. } => true,
        Argument::RecordInit { .. } => !arg.is_constant(),
        _ => false,
    }
}

fn lift_arg(arg: &mut Argument, out: &mut Vec<Literal>, counter: &mut u64) {
    if is_liftable(arg) {
        *counter += 1;
        let loc: SourceLocation = arg.loc().clone();
        let fresh_name = format!("__lift{}", *counter);
        let original = std::mem::replace(arg, Argument::Variable { name: fresh_name.clone(), loc: loc.clone() });
        out.push(Literal::Constraint {
            op: ConstraintOp::Eq,
            lhs: Argument::Variable { name: fresh_name, loc: loc.clone() },
            rhs: original,
            loc,
        });
    }
}
