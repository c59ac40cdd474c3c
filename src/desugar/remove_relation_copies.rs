//! Desugaring pass 3 of 6: detects a relation defined by a single
//! non-fact clause of the exact shape `r(x1, ..., xn) :- s(x1, ..., xn)`
//! (same variables, same order, nothing else in the body) and rewrites
//! every reference to `r` as a reference to `s` instead, dropping `r`
//! entirely -- unless `r` is itself computed (carries `output` or
//! `printsize`) or the alias chain is cyclic.
//!
//! A cyclic alias (`r` copies `s`, `s` copies `r`) cannot be collapsed to
//! either side without losing one of them, so the defining clause is
//! stripped and the relation kept, empty, for
//! [`super::remove_empty_relations`] to clean up from the using side.

use std::collections::HashMap;

use crate::ir::{Argument, Literal, Program};
use crate::loc::QualifiedName;

pub fn run(program: &mut Program) {
    let aliases = find_aliases(program);
    let resolved = resolve_chains(&aliases);

    // Cyclic aliases resolve to themselves; computed aliases must keep
    // producing their own tuples. Neither is eliminated -- only the
    // defining clause of a cyclic alias is dropped, leaving an empty
    // relation for `remove_empty_relations` to reconcile from the
    // using side.
    let mut eliminate = HashMap::new();
    for (name, target) in &resolved {
        if name == target {
            if let Some(relation) = program.relation_mut(name) {
                relation.clauses.clear();
            }
            continue;
        }
        let computed = program.relation(name).is_some_and(crate::ir::Relation::is_computed);
        if !computed {
            eliminate.insert(name.clone(), target.clone());
        }
    }

    for relation in program.relations.values_mut() {
        for clause in &mut relation.clauses {
            rewrite_clause_names(clause, &eliminate);
        }
    }

    for name in eliminate.keys() {
        program.relations.remove(name);
    }
}

/// A relation name maps to the single relation it is a verbatim positional
/// copy of, if any.
fn find_aliases(program: &Program) -> HashMap<QualifiedName, QualifiedName> {
    let mut aliases = HashMap::new();
    for relation in program.relations.values() {
        if relation.clauses.len() != 1 {
            continue;
        }
        let clause = &relation.clauses[0];
        if clause.body.len() != 1 {
            continue;
        }
        let Some(head) = &clause.head else { continue };
        let Literal::Atom(body_atom) = &clause.body[0] else { continue };
        if body_atom.name == relation.name {
            continue;
        }
        if head.args.len() != body_atom.args.len() {
            continue;
        }
        let is_positional_copy = head
            .args
            .iter()
            .zip(body_atom.args.iter())
            .all(|(h, b)| matches!((h, b), (Argument::Variable { name: hn, .. }, Argument::Variable { name: bn, .. }) if hn == bn));
        if is_positional_copy {
            aliases.insert(relation.name.clone(), body_atom.name.clone());
        }
    }
    aliases
}

/// Follows each alias chain to its non-alias (or cyclic) end. A name whose
/// chain revisits itself resolves to itself, leaving the cycle in place.
fn resolve_chains(aliases: &HashMap<QualifiedName, QualifiedName>) -> HashMap<QualifiedName, QualifiedName> {
    let mut resolved = HashMap::new();
    for start in aliases.keys() {
        let mut seen = vec![start.clone()];
        let mut current = start;
        let target = loop {
            match aliases.get(current) {
                Some(next) if seen.contains(next) => break start.clone(),
                Some(next) => {
                    seen.push(next.clone());
                    current = next;
                }
                None => break current.clone(),
            }
        };
        resolved.insert(start.clone(), target);
    }
    resolved
}

fn rewrite_clause_names(clause: &mut crate::ir::Clause, resolved: &HashMap<QualifiedName, QualifiedName>) {
    if let Some(head) = &mut clause.head {
        if let Some(target) = resolved.get(&head.name) {
            head.name = target.clone();
        }
    }
    for lit in &mut clause.body {
        rewrite_literal_names(lit, resolved);
    }
}

fn rewrite_literal_names(lit: &mut Literal, resolved: &HashMap<QualifiedName, QualifiedName>) {
    match lit {
        Literal::Atom(a) | Literal::Negation(a) => {
            if let Some(target) = resolved.get(&a.name) {
                a.name = target.clone();
            }
            for arg in &mut a.args {
                rewrite_arg_names(arg, resolved);
            }
        }
        Literal::Constraint { lhs, rhs, .. } => {
            rewrite_arg_names(lhs, resolved);
            rewrite_arg_names(rhs, resolved);
        }
    }
}

fn rewrite_arg_names(arg: &mut Argument, resolved: &HashMap<QualifiedName, QualifiedName>) {
    match arg {
        Argument::Aggregator { target, body, .. } => {
            if let Some(target) = target {
                rewrite_arg_names(target, resolved);
            }
            for lit in body.iter_mut() {
                rewrite_literal_names(lit, resolved);
            }
        }
        Argument::UnaryFun { arg, .. } => rewrite_arg_names(arg, resolved),
        Argument::BinaryFun { lhs, rhs, .. } => {
            rewrite_arg_names(lhs, resolved);
            rewrite_arg_names(rhs, resolved);
        }
        Argument::TernaryFun { a, b, c, .. } => {
            rewrite_arg_names(a, resolved);
            rewrite_arg_names(b, resolved);
            rewrite_arg_names(c, resolved);
        }
        Argument::RecordInit { args, .. } => {
            for a in args {
                rewrite_arg_names(a, resolved);
            }
        }
        Argument::TypeCast { value, .. } => rewrite_arg_names(value, resolved),
        Argument::Variable { .. }
        | Argument::Unnamed { .. }
        | Argument::Counter { .. }
        | Argument::NumberConst { .. }
        | Argument::StringConst { .. }
        | Argument::NullConst { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Atom, Clause, Qualifier, Relation};
    use crate::loc::{Point, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::new("t.dl", Point::new(1, 1), Point::new(1, 1))
    }

    fn var(name: &str) -> Argument {
        Argument::variable(name, loc())
    }

    fn relation(name: &str, arity: usize) -> Relation {
        Relation::new(
            QualifiedName::new(name),
            (0..arity)
                .map(|i| crate::ir::Attribute { name: format!("a{i}"), type_name: "number".into() })
                .collect(),
            loc(),
        )
    }

    #[test]
    fn positional_copy_relation_is_inlined_away() {
        let mut program = Program::new();

        let mut r = relation("r", 2);
        r.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("r"), vec![var("x"), var("y")], loc()),
            vec![Literal::Atom(Atom::new(QualifiedName::new("s"), vec![var("x"), var("y")], loc()))],
            loc(),
        ));
        program.relations.insert(r.name.clone(), r);

        let mut s = relation("s", 2);
        s.clauses.push(Clause::fact(Atom::new(QualifiedName::new("s"), vec![var("x"), var("y")], loc()), loc()));
        program.relations.insert(s.name.clone(), s);

        let mut user = relation("uses_r", 2);
        user.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("uses_r"), vec![var("x"), var("y")], loc()),
            vec![Literal::Atom(Atom::new(QualifiedName::new("r"), vec![var("x"), var("y")], loc()))],
            loc(),
        ));
        program.relations.insert(user.name.clone(), user);

        run(&mut program);

        assert!(program.relation(&QualifiedName::new("r")).is_none());
        let rewritten = &program.relation(&QualifiedName::new("uses_r")).unwrap().clauses[0];
        let Literal::Atom(a) = &rewritten.body[0] else { unreachable!() };
        assert_eq!(a.name, QualifiedName::new("s"));
    }

    #[test]
    fn output_relation_that_is_a_copy_is_kept() {
        let mut program = Program::new();
        let mut r = relation("r", 1);
        r.qualifiers.insert(Qualifier::Output);
        r.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("r"), vec![var("x")], loc()),
            vec![Literal::Atom(Atom::new(QualifiedName::new("s"), vec![var("x")], loc()))],
            loc(),
        ));
        program.relations.insert(r.name.clone(), r);
        let mut s = relation("s", 1);
        s.clauses.push(Clause::fact(Atom::new(QualifiedName::new("s"), vec![var("x")], loc()), loc()));
        program.relations.insert(s.name.clone(), s);

        run(&mut program);

        assert!(program.relation(&QualifiedName::new("r")).is_some());
    }

    #[test]
    fn cyclic_aliases_are_left_in_place() {
        let mut program = Program::new();
        let mut r = relation("r", 1);
        r.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("r"), vec![var("x")], loc()),
            vec![Literal::Atom(Atom::new(QualifiedName::new("s"), vec![var("x")], loc()))],
            loc(),
        ));
        program.relations.insert(r.name.clone(), r);
        let mut s = relation("s", 1);
        s.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("s"), vec![var("x")], loc()),
            vec![Literal::Atom(Atom::new(QualifiedName::new("r"), vec![var("x")], loc()))],
            loc(),
        ));
        program.relations.insert(s.name.clone(), s);

        run(&mut program);

        assert!(program.relation(&QualifiedName::new("r")).is_some());
        assert!(program.relation(&QualifiedName::new("s")).is_some());
        assert!(program.relation(&QualifiedName::new("r")).unwrap().clauses.is_empty());
        assert!(program.relation(&QualifiedName::new("s")).unwrap().clauses.is_empty());
    }
}
