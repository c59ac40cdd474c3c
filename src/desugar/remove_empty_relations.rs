//! Desugaring pass 5 of 6: a non-input relation with no clauses can never
//! produce a tuple. Every clause with a positive reference to it is
//! removed (it can never fire), and every negation of it is stripped from
//! the clauses that remain (a negated empty relation is vacuously true).
//! Both of those rewrites can turn other relations empty in turn, so the
//! whole thing runs to a fixpoint.

use std::collections::HashSet;

use crate::ir::{Literal, Program};
use crate::loc::QualifiedName;

pub fn run(program: &mut Program) {
    loop {
        let empty = empty_relations(program);
        if empty.is_empty() {
            break;
        }
        let mut changed = false;
        for relation in program.relations.values_mut() {
            let before = relation.clauses.len();
            relation.clauses.retain(|clause| !clause.positive_atoms().any(|a| empty.contains(&a.name)));
            changed |= relation.clauses.len() != before;

            for clause in &mut relation.clauses {
                let before = clause.body.len();
                clause.body.retain(|lit| !matches!(lit, Literal::Negation(a) if empty.contains(&a.name)));
                changed |= clause.body.len() != before;
            }
        }
        if !changed {
            break;
        }
    }
}

fn empty_relations(program: &Program) -> HashSet<QualifiedName> {
    program
        .relations
        .values()
        .filter(|r| !r.is_input() && r.clauses.is_empty())
        .map(|r| r.name.clone())
        .collect()
}
