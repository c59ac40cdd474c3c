//! Desugaring pass 4 of 6: extracts any aggregator whose body is not a
//! single positive atom, or whose single atom repeats a variable, into a
//! fresh relation. The aggregator's own body becomes that relation's
//! single defining clause; the aggregator itself is left referencing the
//! new relation through one non-repeating atom, which is always eligible
//! for direct translation during lowering.
//!
//! An atom that repeats a variable (`e(x, x)`) can't be projected onto a
//! fresh relation without a join condition enforcing the repeat, so the
//! constraint form alone is not enough; the same goes for a body that is
//! a conjunction, a negation, or empty. Materializing first sidesteps all
//! three by turning the aggregator body into an ordinary clause, which
//! already knows how to handle them.
//!
//! Every unnamed argument inside the extracted body is promoted to a
//! fresh variable and added to the new relation's head; otherwise two
//! existentially-different matches that only differ in an unnamed
//! position would collapse into the same row once projected, silently
//! undercounting.

use std::collections::HashMap;

use crate::ir::{Argument, Atom, Attribute, Clause, Literal, Program, Relation};
use crate::loc::QualifiedName;

pub fn run(program: &mut Program) {
    let snapshot = program.relations.clone();
    let mut counter: u64 = 0;
    let mut new_relations = Vec::new();

    for relation in program.relations.values_mut() {
        for clause in &mut relation.clauses {
            if let Some(head) = &mut clause.head {
                for arg in &mut head.args {
                    rewrite_arg(arg, &snapshot, &mut counter, &mut new_relations);
                }
            }
            for lit in &mut clause.body {
                rewrite_literal(lit, &snapshot, &mut counter, &mut new_relations);
            }
        }
    }

    for relation in new_relations {
        program.relations.insert(relation.name.clone(), relation);
    }
}

fn rewrite_literal(lit: &mut Literal, snapshot: &HashMap<QualifiedName, Relation>, counter: &mut u64, out: &mut Vec<Relation>) {
    match lit {
        Literal::Atom(a) | Literal::Negation(a) => {
            for arg in &mut a.args {
                rewrite_arg(arg, snapshot, counter, out);
            }
        }
        Literal::Constraint { lhs, rhs, .. } => {
            rewrite_arg(lhs, snapshot, counter, out);
            rewrite_arg(rhs, snapshot, counter, out);
        }
    }
}

fn rewrite_arg(arg: &mut Argument, snapshot: &HashMap<QualifiedName, Relation>, counter: &mut u64, out: &mut Vec<Relation>) {
    match arg {
        Argument::Aggregator { target, body, loc } => {
            if let Some(target) = target {
                rewrite_arg(target, snapshot, counter, out);
            }
            for lit in body.iter_mut() {
                rewrite_literal(lit, snapshot, counter, out);
            }
            if needs_materialization(body) {
                promote_unnamed(body, counter);
                let target_vars = target.as_ref().map(|t| t.variable_names()).unwrap_or_default();
                let free_vars = free_variables(&target_vars, body);

                let name = QualifiedName::new(format!("__agg_rel_{}", *counter));
                *counter += 1;
                let attrs = free_vars.iter().map(|v| Attribute { name: v.clone(), type_name: infer_type(v, body, snapshot) }).collect();
                let head_args: Vec<Argument> = free_vars.iter().map(|v| Argument::variable(v.clone(), loc.clone())).collect();

                let mut relation = Relation::new(name.clone(), attrs, loc.clone());
                relation.clauses.push(Clause::rule(
                    Atom::new(name.clone(), head_args.clone(), loc.clone()),
                    std::mem::take(body),
                    loc.clone(),
                ));
                out.push(relation);

                *body = vec![Literal::Atom(Atom::new(name, head_args, loc.clone()))];
            }
        }
        Argument::UnaryFun { arg, .. } => rewrite_arg(arg, snapshot, counter, out),
        Argument::BinaryFun { lhs, rhs, .. } => {
            rewrite_arg(lhs, snapshot, counter, out);
            rewrite_arg(rhs, snapshot, counter, out);
        }
        Argument::TernaryFun { a, b, c, .. } => {
            rewrite_arg(a, snapshot, counter, out);
            rewrite_arg(b, snapshot, counter, out);
            rewrite_arg(c, snapshot, counter, out);
        }
        Argument::RecordInit { args, .. } => {
            for a in args {
                rewrite_arg(a, snapshot, counter, out);
            }
        }
        Argument::TypeCast { value, .. } => rewrite_arg(value, snapshot, counter, out),
        Argument::Variable { .. }
        | Argument::Unnamed { .. }
        | Argument::Counter { .. }
        | Argument::NumberConst { .. }
        | Argument::StringConst { .. }
        | Argument::NullConst { .. } => {}
    }
}

fn needs_materialization(body: &[Literal]) -> bool {
    match body {
        [Literal::Atom(a)] => has_repeated_variable(a),
        _ => true,
    }
}

fn has_repeated_variable(atom: &Atom) -> bool {
    let mut seen = std::collections::HashSet::new();
    for arg in &atom.args {
        if let Argument::Variable { name, .. } = arg {
            if !seen.insert(name.clone()) {
                return true;
            }
        }
    }
    false
}

fn promote_unnamed(body: &mut [Literal], counter: &mut u64) {
    for lit in body.iter_mut() {
        if let Literal::Atom(a) | Literal::Negation(a) = lit {
            for arg in &mut a.args {
                promote_unnamed_arg(arg, counter);
            }
        }
    }
}

fn promote_unnamed_arg(arg: &mut Argument, counter: &mut u64) {
    if let Argument::Unnamed { loc } = arg {
        *counter += 1;
        *arg = Argument::Variable { name: format!("__agg_unnamed{}", *counter), loc: loc.clone() };
        return;
    }
    match arg {
        Argument::UnaryFun { arg, .. } => promote_unnamed_arg(arg, counter),
        Argument::BinaryFun { lhs, rhs, .. } => {
            promote_unnamed_arg(lhs, counter);
            promote_unnamed_arg(rhs, counter);
        }
        Argument::TernaryFun { a, b, c, .. } => {
            promote_unnamed_arg(a, counter);
            promote_unnamed_arg(b, counter);
            promote_unnamed_arg(c, counter);
        }
        Argument::RecordInit { args, .. } => {
            for a in args {
                promote_unnamed_arg(a, counter);
            }
        }
        Argument::TypeCast { value, .. } => promote_unnamed_arg(value, counter),
        _ => {}
    }
}

/// The new relation's head: the aggregator's target variables (the
/// grouping keys shared with the outer clause) followed by every distinct
/// variable occurring in the body, in first-seen order.
fn free_variables(target_vars: &[String], body: &[Literal]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in target_vars {
        if seen.insert(name.clone()) {
            out.push(name.clone());
        }
    }
    for lit in body {
        let names = match lit {
            Literal::Atom(a) | Literal::Negation(a) => a.args.iter().flat_map(Argument::variable_names).collect::<Vec<_>>(),
            Literal::Constraint { lhs, rhs, .. } => {
                let mut v = lhs.variable_names();
                v.extend(rhs.variable_names());
                v
            }
        };
        for name in names {
            if seen.insert(name.clone()) {
                out.push(name);
            }
        }
    }
    out
}

fn infer_type(var: &str, body: &[Literal], snapshot: &HashMap<QualifiedName, Relation>) -> String {
    for lit in body {
        if let Literal::Atom(a) | Literal::Negation(a) = lit {
            if let Some(relation) = snapshot.get(&a.name) {
                for (i, arg) in a.args.iter().enumerate() {
                    if let Argument::Variable { name, .. } = arg {
                        if name == var {
                            if let Some(attr) = relation.attributes.get(i) {
                                return attr.type_name.clone();
                            }
                        }
                    }
                }
            }
        }
    }
    "symbol".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AggregateOp, ConstraintOp};
    use crate::loc::{Point, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::new("t.dl", Point::new(1, 1), Point::new(1, 1))
    }

    fn var(name: &str) -> Argument {
        Argument::variable(name, loc())
    }

    #[test]
    fn repeated_variable_atom_is_extracted_into_its_own_relation() {
        let mut program = Program::new();
        let mut e = Relation::new(
            QualifiedName::new("e"),
            vec![
                Attribute { name: "a".into(), type_name: "number".into() },
                Attribute { name: "b".into(), type_name: "number".into() },
            ],
            loc(),
        );
        e.clauses.push(Clause::fact(Atom::new(QualifiedName::new("e"), vec![var("x"), var("x")], loc()), loc()));
        program.relations.insert(e.name.clone(), e);

        let inner = Atom::new(QualifiedName::new("e"), vec![var("x"), var("x")], loc());
        let agg = Argument::Aggregator { op: AggregateOp::Count, target: None, body: vec![Literal::Atom(inner)], loc: loc() };
        let mut out = Relation::new(QualifiedName::new("out"), vec![Attribute { name: "n".into(), type_name: "number".into() }], loc());
        out.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("out"), vec![var("n")], loc()),
            vec![Literal::Constraint { op: ConstraintOp::Eq, lhs: var("n"), rhs: agg, loc: loc() }],
            loc(),
        ));
        program.relations.insert(out.name.clone(), out);

        let before = program.relations.len();
        run(&mut program);
        assert_eq!(program.relations.len(), before + 1);

        let rewritten = &program.relation(&QualifiedName::new("out")).unwrap().clauses[0];
        let Literal::Constraint { rhs, .. } = &rewritten.body[0] else { unreachable!() };
        let Argument::Aggregator { body, .. } = rhs else { unreachable!() };
        assert_eq!(body.len(), 1);
        let Literal::Atom(a) = &body[0] else { unreachable!() };
        assert!(a.name.to_dotted().starts_with("__agg_rel_"));

        let materialized = program.relation(&a.name).unwrap();
        assert_eq!(materialized.clauses.len(), 1);
        assert_eq!(materialized.clauses[0].body.len(), 1);
    }

    #[test]
    fn single_non_repeating_atom_is_left_as_is() {
        let inner = Atom::new(QualifiedName::new("e"), vec![var("x"), var("y")], loc());
        let agg = Argument::Aggregator { op: AggregateOp::Count, target: None, body: vec![Literal::Atom(inner)], loc: loc() };
        let mut program = Program::new();
        let mut out = Relation::new(QualifiedName::new("out"), vec![Attribute { name: "n".into(), type_name: "number".into() }], loc());
        out.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("out"), vec![var("n")], loc()),
            vec![Literal::Constraint { op: ConstraintOp::Eq, lhs: var("n"), rhs: agg.clone(), loc: loc() }],
            loc(),
        ));
        program.relations.insert(out.name.clone(), out);

        let before = program.relations.len();
        run(&mut program);
        assert_eq!(program.relations.len(), before);

        let rewritten = &program.relation(&QualifiedName::new("out")).unwrap().clauses[0];
        let Literal::Constraint { rhs, .. } = &rewritten.body[0] else { unreachable!() };
        assert_eq!(*rhs, agg);
    }
}
